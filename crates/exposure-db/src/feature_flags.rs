//! Feature flags.
//!
//! A flag is on only while it is enabled, not expired and not deleted. When
//! a user is given, their email must also be on the flag's allow list.

use crate::error::Result;
use crate::scan_jobs::parse_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

/// A stored feature flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlag {
    /// Flag name
    pub name: String,
    /// Master switch
    pub is_enabled: bool,
    /// Free-form description
    pub description: Option<String>,
    /// Emails the flag is enabled for
    pub allow_list: Vec<String>,
    /// Owning team or person
    pub owner: Option<String>,
    /// When the flag expired
    pub expired_at: Option<DateTime<Utc>>,
    /// When the flag was deleted
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FeatureFlag {
    /// An enabled flag with an empty allow list.
    #[must_use]
    pub fn enabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_enabled: true,
            description: None,
            allow_list: Vec::new(),
            owner: None,
            expired_at: None,
            deleted_at: None,
        }
    }

    /// Add an email to the allow list.
    #[must_use]
    pub fn allow(mut self, email: impl Into<String>) -> Self {
        self.allow_list.push(email.into());
        self
    }

    /// Evaluate the flag, optionally for a specific user.
    #[must_use]
    pub fn evaluate(&self, user_email: Option<&str>) -> bool {
        if self.deleted_at.is_some() {
            tracing::warn!("Flag has been deleted: {}", self.name);
            return false;
        }
        if self.expired_at.is_some() {
            tracing::warn!("Flag has expired: {}", self.name);
            return false;
        }
        if !self.is_enabled {
            tracing::warn!("Flag is not enabled: {}", self.name);
            return false;
        }

        match user_email {
            None => true,
            Some(email) if self.allow_list.iter().any(|allowed| allowed == email) => true,
            Some(_) => {
                tracing::warn!("User is not on the allow list for flag: {}", self.name);
                false
            }
        }
    }
}

/// Insert or replace a flag.
pub async fn upsert_flag(pool: &SqlitePool, flag: &FeatureFlag) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let allow_list = serde_json::to_string(&flag.allow_list)?;

    sqlx::query(
        "INSERT INTO feature_flags (name, is_enabled, description, allow_list, owner,
                                    expired_at, deleted_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(name) DO UPDATE SET
             is_enabled = excluded.is_enabled,
             description = excluded.description,
             allow_list = excluded.allow_list,
             owner = excluded.owner,
             expired_at = excluded.expired_at,
             deleted_at = excluded.deleted_at,
             updated_at = excluded.updated_at",
    )
    .bind(&flag.name)
    .bind(flag.is_enabled)
    .bind(&flag.description)
    .bind(&allow_list)
    .bind(&flag.owner)
    .bind(flag.expired_at.map(|t| t.to_rfc3339()))
    .bind(flag.deleted_at.map(|t| t.to_rfc3339()))
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch a flag by name.
pub async fn get_flag(pool: &SqlitePool, name: &str) -> Result<Option<FeatureFlag>> {
    let Some(row) = sqlx::query(
        "SELECT name, is_enabled, description, allow_list, owner, expired_at, deleted_at
         FROM feature_flags WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?
    else {
        return Ok(None);
    };

    let allow_list: String = row.try_get("allow_list")?;
    let expired_at: Option<String> = row.try_get("expired_at")?;
    let deleted_at: Option<String> = row.try_get("deleted_at")?;

    Ok(Some(FeatureFlag {
        name: row.try_get("name")?,
        is_enabled: row.try_get("is_enabled")?,
        description: row.try_get("description")?,
        allow_list: serde_json::from_str(&allow_list)?,
        owner: row.try_get("owner")?,
        expired_at: expired_at.as_deref().map(parse_timestamp).transpose()?,
        deleted_at: deleted_at.as_deref().map(parse_timestamp).transpose()?,
    }))
}

/// Whether a flag is on, optionally for a specific user. Missing flags are off.
pub async fn is_flag_enabled(
    pool: &SqlitePool,
    name: &str,
    user_email: Option<&str>,
) -> Result<bool> {
    match get_flag(pool, name).await? {
        Some(flag) => Ok(flag.evaluate(user_email)),
        None => {
            tracing::warn!("Feature flag does not exist: {}", name);
            Ok(false)
        }
    }
}
