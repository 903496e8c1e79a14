//! Simulation log
//!
//! Rows are produced by offline what-if and temporal runs; the server only
//! lists them.

use serde::Serialize;
use serde_json::Value;
use sqlx::{types::Json, FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SimulationLog {
    pub id: i64,
    pub user_id: Option<String>,
    pub patient_id: Option<String>,
    pub model_id: String,
    /// `whatif`, `temporal`, ...
    pub sim_type: String,
    pub inputs: Json<Value>,
    pub outputs: Json<Value>,
    pub created_at: i64,
}

#[cfg_attr(not(test), allow(dead_code))]
#[derive(Debug, Clone)]
pub struct NewSimulationLog {
    pub user_id: Option<String>,
    pub patient_id: Option<String>,
    pub model_id: String,
    pub sim_type: String,
    pub inputs: Value,
    pub outputs: Value,
}

impl SimulationLog {
    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn create(pool: &SqlitePool, data: NewSimulationLog) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, SimulationLog>(
            r#"
            INSERT INTO simulation_logs (user_id, patient_id, model_id, sim_type, inputs, outputs, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&data.user_id)
        .bind(&data.patient_id)
        .bind(&data.model_id)
        .bind(&data.sim_type)
        .bind(Json(&data.inputs))
        .bind(Json(&data.outputs))
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(pool)
        .await
    }

    /// Newest first
    pub async fn list_recent(pool: &SqlitePool, limit: u32) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, SimulationLog>("SELECT * FROM simulation_logs ORDER BY id DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(pool)
            .await
    }
}
