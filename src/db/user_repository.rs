//! User repository

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::models::User;

pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, name: &str, email: &str) -> Result<User> {
        let result = sqlx::query("INSERT INTO users (name, email) VALUES (?1, ?2)")
            .bind(name)
            .bind(email)
            .execute(&self.pool)
            .await
            .context("Failed to create user")?;

        Ok(User {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            email: email.to_string(),
        })
    }

    pub async fn get(&self, id: i64) -> Result<Option<User>> {
        sqlx::query_as::<_, User>("SELECT id, name, email FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user")
    }
}
