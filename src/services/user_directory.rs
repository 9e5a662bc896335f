//! User existence checks against the shared user directory
//!
//! Connecting viewers and reaction senders are validated here. The directory
//! is an external collaborator; this service only ever asks "does this user
//! exist".

use async_trait::async_trait;
use dashmap::DashSet;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub type SharedUserDirectory = Arc<dyn UserDirectory>;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("user directory unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn exists(&self, user_id: Uuid) -> Result<bool, DirectoryError>;
}

pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn exists(&self, user_id: Uuid) -> Result<bool, DirectoryError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))
    }
}

/// Fixed membership directory for tests and local runs.
#[derive(Default)]
pub struct StaticUserDirectory {
    users: DashSet<Uuid>,
}

impl StaticUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, user_id: Uuid) {
        self.users.insert(user_id);
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn exists(&self, user_id: Uuid) -> Result<bool, DirectoryError> {
        Ok(self.users.contains(&user_id))
    }
}
