//! Query router client fixture.
//!
//! The router resolves a schema through the schema registry and forwards the
//! query to that schema's query service. Every request names its schema in
//! the `SCHEMA_ID` header.

use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

const SCHEMA_ID_HEADER: &str = "SCHEMA_ID";

/// Query router client errors.
#[derive(Debug, Error)]
pub enum QueryRouterError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("JSON deserialization failed: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Request body for `single` and `raw` queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum QueryBody {
    /// Time range for time-series schemas.
    Range {
        from: String,
        to: String,
        step: String,
    },
    /// Statement passed through to the backing store.
    Raw { raw_statement: String },
    /// Document schemas take no parameters.
    Empty {},
}

/// Client for the query router's HTTP API.
#[derive(Debug, Clone)]
pub struct QueryRouterClient {
    base_url: String,
    http_client: Client,
}

impl QueryRouterClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, QueryRouterError> {
        let http_client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    async fn json(response: Response) -> Result<Value, QueryRouterError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueryRouterError::RequestFailed {
                status: status.as_u16(),
                body: super::truncate_body(&body),
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// `POST /single/{object_id}`
    pub async fn query_single(
        &self,
        schema_id: Uuid,
        object_id: Uuid,
        body: &QueryBody,
    ) -> Result<Value, QueryRouterError> {
        let response = self
            .http_client
            .post(format!("{}/single/{}", self.base_url, object_id))
            .header(SCHEMA_ID_HEADER, schema_id.to_string())
            .json(body)
            .send()
            .await?;

        Self::json(response).await
    }

    /// `GET /multiple/{id,id,...}`
    pub async fn query_multiple(
        &self,
        schema_id: Uuid,
        object_ids: &[Uuid],
    ) -> Result<Value, QueryRouterError> {
        let ids = object_ids
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let response = self
            .http_client
            .get(format!("{}/multiple/{}", self.base_url, ids))
            .header(SCHEMA_ID_HEADER, schema_id.to_string())
            .send()
            .await?;

        Self::json(response).await
    }

    /// `GET /schema`: every object of a schema.
    pub async fn query_by_schema(&self, schema_id: Uuid) -> Result<Value, QueryRouterError> {
        let response = self
            .http_client
            .get(format!("{}/schema", self.base_url))
            .header(SCHEMA_ID_HEADER, schema_id.to_string())
            .send()
            .await?;

        Self::json(response).await
    }

    /// `POST /raw`
    pub async fn query_raw(
        &self,
        schema_id: Uuid,
        raw_statement: impl Into<String>,
    ) -> Result<Value, QueryRouterError> {
        let body = QueryBody::Raw {
            raw_statement: raw_statement.into(),
        };

        let response = self
            .http_client
            .post(format!("{}/raw", self.base_url))
            .header(SCHEMA_ID_HEADER, schema_id.to_string())
            .json(&body)
            .send()
            .await?;

        Self::json(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_body_serializes_untagged() {
        let range = QueryBody::Range {
            from: "1626179600".to_string(),
            to: "1626179700".to_string(),
            step: "1s".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&range).expect("serialize"),
            serde_json::json!({"from": "1626179600", "to": "1626179700", "step": "1s"})
        );

        assert_eq!(
            serde_json::to_value(QueryBody::Empty {}).expect("serialize"),
            serde_json::json!({})
        );

        let raw = QueryBody::Raw {
            raw_statement: "SELECT 1".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&raw).expect("serialize"),
            serde_json::json!({"raw_statement": "SELECT 1"})
        );
    }

    #[test]
    fn test_request_failed_display() {
        let err = QueryRouterError::RequestFailed {
            status: 500,
            body: "schema not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Request failed with status 500: schema not found"
        );
    }
}
