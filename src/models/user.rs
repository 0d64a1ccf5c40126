//! Task owner model

use serde::{Deserialize, Serialize};

/// Owner of backup tasks; receives failure e-mails
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
}
