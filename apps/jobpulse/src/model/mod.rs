pub mod email;
pub mod onboarding;
pub mod profile;

pub use email::{
    ApplicationRecord, ApplicationStatus, EmailData, EmailId, decode_records, derive_applications,
};
pub use onboarding::{OnboardingState, OnboardingStep};
pub use profile::{
    NotificationChannel, NotificationEntry, NotificationStatus, ProfileUpdate, UserProfile,
};
