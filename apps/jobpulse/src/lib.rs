pub mod auth;
pub mod config;
pub mod dashboard;
pub mod model;
pub mod notify;
pub mod session;
pub mod settings;
pub mod support;
pub mod sync;
pub mod telemetry;
