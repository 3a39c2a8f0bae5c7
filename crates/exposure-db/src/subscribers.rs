//! Subscriber lookup.
//!
//! Maps a subscriber to the profile the scanning provider knows them by.

use crate::error::{DatabaseError, Result};
use crate::scan_jobs::parse_timestamp;
use chrono::{DateTime, Utc};
use exposure_core::{ProfileRef, SubjectId};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// A subscriber of the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    /// Subscriber identifier
    pub id: SubjectId,
    /// Primary email address
    pub email: String,
    /// Profile at the scanning provider, once one was created
    pub profile_ref: Option<ProfileRef>,
    /// When the subscriber signed up
    pub created_at: DateTime<Utc>,
}

/// Insert a subscriber.
pub async fn create_subscriber(
    pool: &SqlitePool,
    id: &SubjectId,
    email: &str,
    profile_ref: Option<ProfileRef>,
) -> Result<Subscriber> {
    let created_at = Utc::now();

    sqlx::query("INSERT INTO subscribers (id, email, profile_ref, created_at) VALUES (?, ?, ?, ?)")
        .bind(id.as_str())
        .bind(email)
        .bind(profile_ref.map(ProfileRef::get))
        .bind(created_at.to_rfc3339())
        .execute(pool)
        .await?;

    Ok(Subscriber {
        id: id.clone(),
        email: email.to_string(),
        profile_ref,
        created_at,
    })
}

/// Attach the provider profile to a subscriber.
///
/// # Errors
/// Returns `DatabaseError::NotFoundWithMessage` if the subscriber does not exist.
pub async fn set_profile_ref(
    pool: &SqlitePool,
    id: &SubjectId,
    profile_ref: ProfileRef,
) -> Result<()> {
    let result = sqlx::query("UPDATE subscribers SET profile_ref = ? WHERE id = ?")
        .bind(profile_ref.get())
        .bind(id.as_str())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "subscriber {id} not found"
        )));
    }
    Ok(())
}

/// Fetch a subscriber by id.
pub async fn get_subscriber(pool: &SqlitePool, id: &SubjectId) -> Result<Option<Subscriber>> {
    let Some(row) =
        sqlx::query("SELECT id, email, profile_ref, created_at FROM subscribers WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(pool)
            .await?
    else {
        return Ok(None);
    };

    let profile_ref: Option<i64> = row.try_get("profile_ref")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Some(Subscriber {
        id: id.clone(),
        email: row.try_get("email")?,
        profile_ref: profile_ref
            .map(ProfileRef::new)
            .transpose()
            .map_err(|e| DatabaseError::Decode(e.to_string()))?,
        created_at: parse_timestamp(&created_at)?,
    }))
}
