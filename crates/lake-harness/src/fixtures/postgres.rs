//! Relational store fixture.
//!
//! Reads and resets the `<schema>.data` table the command service writes
//! into, plus the relation tables owned by the edge registry.

use common::config::PostgresConfig;
use common::secret::ExposeSecret;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Relational store errors.
#[derive(Debug, Error)]
pub enum RelationalStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid schema name '{0}'")]
    InvalidSchema(String),
}

/// One stored object version.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct DataRow {
    pub object_id: Uuid,
    pub version: i64,
    pub schema_id: Uuid,
    pub payload: serde_json::Value,
}

/// Schema names are interpolated into statements, so only plain
/// identifiers are accepted.
fn validate_identifier(name: &str) -> Result<(), RelationalStoreError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(RelationalStoreError::InvalidSchema(name.to_string()))
    }
}

/// Client for the relational store.
#[derive(Debug, Clone)]
pub struct RelationalStore {
    pool: PgPool,
    schema: String,
}

impl RelationalStore {
    /// Connect with the given settings.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, RelationalStoreError> {
        validate_identifier(&config.schema)?;

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(config.password.expose_secret())
            .database(&config.dbname);

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            schema: config.schema.clone(),
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema and data table if absent.
    pub async fn ensure_data_table(&self) -> Result<(), RelationalStoreError> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema))
            .execute(&self.pool)
            .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {}.data (
                object_id UUID NOT NULL,
                version BIGINT NOT NULL,
                schema_id UUID NOT NULL,
                payload JSON NOT NULL,
                PRIMARY KEY (object_id, version)
            )
            "#,
            self.schema
        ))
        .execute(&self.pool)
        .await?;

        debug!(target: "lake.env", schema = %self.schema, "Data table ensured");
        Ok(())
    }

    /// Every stored row, ordered by version ascending.
    pub async fn fetch_data(&self) -> Result<Vec<DataRow>, RelationalStoreError> {
        let rows = sqlx::query_as::<_, DataRow>(&format!(
            r#"
            SELECT object_id, version, schema_id, payload
            FROM {}.data
            ORDER BY version
            "#,
            self.schema
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Versions of one object, ordered by version ascending.
    pub async fn fetch_object(&self, object_id: Uuid) -> Result<Vec<DataRow>, RelationalStoreError> {
        let rows = sqlx::query_as::<_, DataRow>(&format!(
            r#"
            SELECT object_id, version, schema_id, payload
            FROM {}.data
            WHERE object_id = $1
            ORDER BY version
            "#,
            self.schema
        ))
        .bind(object_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Insert rows in one transaction.
    pub async fn insert_data(&self, rows: &[DataRow]) -> Result<(), RelationalStoreError> {
        let statement = format!(
            "INSERT INTO {}.data (object_id, version, schema_id, payload) VALUES ($1, $2, $3, $4::json)",
            self.schema
        );

        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(&statement)
                .bind(row.object_id)
                .bind(row.version)
                .bind(row.schema_id)
                .bind(row.payload.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Delete every row from the data table.
    pub async fn clear_data(&self) -> Result<u64, RelationalStoreError> {
        let result = sqlx::query(&format!("DELETE FROM {}.data", self.schema))
            .execute(&self.pool)
            .await?;

        debug!(target: "lake.env", rows = result.rows_affected(), "Cleared data table");
        Ok(result.rows_affected())
    }

    /// Delete edges and relations. Tables that do not exist are skipped.
    pub async fn clear_relations(&self) -> Result<(), RelationalStoreError> {
        let mut tx = self.pool.begin().await?;

        // Edges reference relations, so they go first.
        for table in ["edges", "relations"] {
            let qualified = format!("{}.{}", self.schema, table);
            let exists: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
                .bind(&qualified)
                .fetch_one(&mut *tx)
                .await?;

            if exists.is_some() {
                sqlx::query(&format!("DELETE FROM {qualified}"))
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        debug!(target: "lake.env", schema = %self.schema, "Cleared relations");
        Ok(())
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
