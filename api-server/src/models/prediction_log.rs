//! Prediction audit log

use serde::Serialize;
use serde_json::Value;
use sqlx::{types::Json, FromRow, SqlitePool};

/// One inference, written once and never changed
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PredictionLog {
    pub id: i64,
    pub user_id: Option<String>,
    pub patient_id: Option<String>,
    pub model_id: String,
    pub inputs: Json<Value>,
    pub outputs: Json<Value>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewPredictionLog {
    pub user_id: Option<String>,
    pub patient_id: Option<String>,
    pub model_id: String,
    pub inputs: Value,
    pub outputs: Value,
}

impl PredictionLog {
    pub async fn create(pool: &SqlitePool, data: NewPredictionLog) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, PredictionLog>(
            r#"
            INSERT INTO prediction_logs (user_id, patient_id, model_id, inputs, outputs, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&data.user_id)
        .bind(&data.patient_id)
        .bind(&data.model_id)
        .bind(Json(&data.inputs))
        .bind(Json(&data.outputs))
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(pool)
        .await
    }

    /// Newest first
    pub async fn list_recent(pool: &SqlitePool, limit: u32) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, PredictionLog>("SELECT * FROM prediction_logs ORDER BY id DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(pool)
            .await
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM prediction_logs")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}
