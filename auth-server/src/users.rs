//! User lookup.
//!
//! Accounts, permissions and project memberships are owned by another system;
//! the server only reads them when a user signs in and whenever it mints a token.

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("User directory unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to load users: {0}")]
    Load(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    /// Internal id, kept in sessions and refresh token records
    pub id: String,
    /// Id safe to show outside the system, used as the token subject
    #[serde(default)]
    pub public_id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// project id -> role
    #[serde(default)]
    pub memberships: HashMap<String, String>,
}

impl UserProfile {
    /// Token subject; the internal id stands in when no public id is assigned
    pub fn subject(&self) -> &str {
        if self.public_id.is_empty() {
            &self.id
        } else {
            &self.public_id
        }
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<UserProfile>, UserError>;

    /// Emails compare case-insensitively
    async fn find_by_email(&self, email: &str) -> Result<Option<UserProfile>, UserError>;
}

#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    by_id: HashMap<String, UserProfile>,
    id_by_email: HashMap<String, String>,
}

impl InMemoryUserDirectory {
    pub fn new(users: Vec<UserProfile>) -> Self {
        let mut directory = Self::default();
        for user in users {
            directory
                .id_by_email
                .insert(normalize_email(&user.email), user.id.clone());
            directory.by_id.insert(user.id.clone(), user);
        }
        directory
    }

    pub fn from_file(path: &str) -> Result<Self, UserError> {
        let json =
            std::fs::read_to_string(path).map_err(|e| UserError::Load(format!("{path}: {e}")))?;
        let users: Vec<UserProfile> =
            serde_json::from_str(&json).map_err(|e| UserError::Load(e.to_string()))?;
        info!("Loaded {} user(s) from {}", users.len(), path);
        Ok(Self::new(users))
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_id(&self, id: &str) -> Result<Option<UserProfile>, UserError> {
        Ok(self.by_id.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserProfile>, UserError> {
        Ok(self
            .id_by_email
            .get(&normalize_email(email))
            .and_then(|id| self.by_id.get(id))
            .cloned())
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
