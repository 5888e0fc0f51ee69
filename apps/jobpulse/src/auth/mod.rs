pub mod error;
pub mod oauth;
pub mod store;

pub use error::StoreError;
pub use store::{
    CredentialStore, FileCredentialStore, MemoryCredentialStore, StoreExt, TestAccountSnapshot,
};

use crate::config::ClientConfig;
use std::sync::Arc;

/// Opens the durable store named by the configuration.
pub fn open_store(config: &ClientConfig) -> Result<Arc<dyn CredentialStore>, StoreError> {
    let store = FileCredentialStore::open(config.state_dir.as_deref())?;
    tracing::debug!(
        target: "jobpulse::store",
        path = %store.path().display(),
        "opened credential store"
    );
    Ok(Arc::new(store))
}
