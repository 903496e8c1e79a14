//! User model

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUser {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
}

impl User {
    /// Insert unless a user with the same id already exists.
    pub async fn create_if_absent(pool: &SqlitePool, data: CreateUser) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, role)
            VALUES (?, ?, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&data.id)
        .bind(&data.email)
        .bind(data.role.unwrap_or_else(|| "patient".to_string()))
        .execute(pool)
        .await?;

        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(&data.id)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Demo account used by the `seed` command
    pub async fn seed_demo(pool: &SqlitePool) -> Result<Self, sqlx::Error> {
        Self::create_if_absent(
            pool,
            CreateUser {
                id: "demo".to_string(),
                email: Some("demo@example.com".to_string()),
                role: Some("patient".to_string()),
            },
        )
        .await
    }
}
