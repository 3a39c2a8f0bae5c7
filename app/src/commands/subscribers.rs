//! Subscriber registration.

use crate::error::CommandError;
use crate::state::AppState;
use exposure_core::{ProfileRef, SubjectId};
use exposure_db::{subscribers, Subscriber};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberResponse {
    pub id: String,
    pub email: String,
    pub profile_ref: Option<i64>,
    pub created_at: String,
}

impl From<Subscriber> for SubscriberResponse {
    fn from(subscriber: Subscriber) -> Self {
        Self {
            id: subscriber.id.to_string(),
            email: subscriber.email,
            profile_ref: subscriber.profile_ref.map(ProfileRef::get),
            created_at: subscriber.created_at.to_rfc3339(),
        }
    }
}

/// Register a subscriber, optionally with an existing provider profile.
pub async fn register_subscriber(
    state: &AppState,
    subject_id: String,
    email: String,
    profile_ref: Option<i64>,
) -> Result<SubscriberResponse, CommandError> {
    let subject_id = SubjectId::new(subject_id)?;
    let profile_ref = profile_ref.map(ProfileRef::new).transpose()?;
    if !email.contains('@') {
        return Err(CommandError::new(
            "INVALID_INPUT",
            format!("Invalid email address: {email}"),
        ));
    }

    let subscriber =
        subscribers::create_subscriber(state.db.pool(), &subject_id, &email, profile_ref).await?;
    tracing::info!("Registered subscriber {}", subject_id);
    Ok(subscriber.into())
}

/// Attach a provider profile to an existing subscriber.
pub async fn link_profile(
    state: &AppState,
    subject_id: String,
    profile_ref: i64,
) -> Result<(), CommandError> {
    let subject_id = SubjectId::new(subject_id)?;
    let profile_ref = ProfileRef::new(profile_ref)?;
    subscribers::set_profile_ref(state.db.pool(), &subject_id, profile_ref).await?;
    Ok(())
}
