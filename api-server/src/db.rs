//! Database module - SQLite connection and migrations

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Create database connection pool
///
/// In-memory databases live only as long as their connection, so they get a
/// single connection that is never recycled.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    if database_url.contains(":memory:") || database_url.contains("mode=memory") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
    } else {
        SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
    }
}

/// Run database migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // SQLite prepares one statement at a time
    for statement in SCHEMA_SQL.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("Database schema applied successfully");
    Ok(())
}

/// Database schema SQL
const SCHEMA_SQL: &str = r#"
-- Users
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT UNIQUE,
    role TEXT NOT NULL DEFAULT 'patient',
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

-- Prediction audit log (append-only)
CREATE TABLE IF NOT EXISTS prediction_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT,
    patient_id TEXT,
    model_id TEXT NOT NULL,
    inputs TEXT NOT NULL,
    outputs TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

-- Simulation log (what-if / temporal runs)
CREATE TABLE IF NOT EXISTS simulation_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT,
    patient_id TEXT,
    model_id TEXT NOT NULL,
    sim_type TEXT NOT NULL,
    inputs TEXT NOT NULL,
    outputs TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_prediction_logs_user ON prediction_logs(user_id);
CREATE INDEX IF NOT EXISTS idx_prediction_logs_patient ON prediction_logs(patient_id);
CREATE INDEX IF NOT EXISTS idx_prediction_logs_model ON prediction_logs(model_id);
CREATE INDEX IF NOT EXISTS idx_prediction_logs_created ON prediction_logs(created_at);
CREATE INDEX IF NOT EXISTS idx_simulation_logs_user ON simulation_logs(user_id);
CREATE INDEX IF NOT EXISTS idx_simulation_logs_patient ON simulation_logs(patient_id);
CREATE INDEX IF NOT EXISTS idx_simulation_logs_model ON simulation_logs(model_id);
CREATE INDEX IF NOT EXISTS idx_simulation_logs_created ON simulation_logs(created_at)
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        let names: Vec<_> = tables.into_iter().map(|(n,)| n).collect();
        assert_eq!(names, vec!["prediction_logs", "simulation_logs", "users"]);
    }
}
