//! Edge registry gRPC client fixture.
//!
//! The registry stores schema relations (parent schema to child schema) and
//! edges (one parent object to its child objects within a relation). All ids
//! travel as strings on the wire.

use prost::Message;
use std::time::Duration;
use thiserror::Error;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;
use tracing::{debug, warn};
use uuid::Uuid;

const SERVICE: &str = "edge_registry.EdgeRegistry";

/// Default connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default timeout for registry RPC calls in seconds.
const RPC_TIMEOUT_SECS: u64 = 10;

/// Edge registry client errors.
#[derive(Debug, Error)]
pub enum EdgeRegistryError {
    #[error("Invalid registry address '{0}'")]
    InvalidAddress(String),

    #[error("Connection failed: {0}")]
    Connect(#[from] tonic::transport::Error),

    #[error("RPC {method} failed: {status}")]
    Rpc {
        method: &'static str,
        status: Box<tonic::Status>,
    },

    #[error("Response field {field} is not a UUID: '{value}'")]
    InvalidResponse { field: &'static str, value: String },
}

#[derive(Clone, PartialEq, Message)]
pub struct Empty {}

#[derive(Clone, PartialEq, Message)]
pub struct SchemaRelation {
    #[prost(string, tag = "1")]
    pub parent_schema_id: String,
    #[prost(string, tag = "2")]
    pub child_schema_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct RelationId {
    #[prost(string, tag = "1")]
    pub relation_id: String,
}

/// One schema relation as listed by the registry.
#[derive(Clone, PartialEq, Message)]
pub struct RelationDetails {
    #[prost(string, tag = "1")]
    pub relation_id: String,
    #[prost(string, tag = "2")]
    pub parent_schema_id: String,
    #[prost(string, tag = "3")]
    pub child_schema_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct RelationList {
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<RelationDetails>,
}

/// Children of one parent object within a relation.
#[derive(Clone, PartialEq, Message)]
pub struct Edge {
    #[prost(string, tag = "1")]
    pub relation_id: String,
    #[prost(string, tag = "2")]
    pub parent_object_id: String,
    #[prost(string, repeated, tag = "3")]
    pub child_object_ids: Vec<String>,
}

impl Edge {
    pub fn new(relation_id: Uuid, parent_object_id: Uuid, child_object_ids: &[Uuid]) -> Self {
        Self {
            relation_id: relation_id.to_string(),
            parent_object_id: parent_object_id.to_string(),
            child_object_ids: child_object_ids.iter().map(Uuid::to_string).collect(),
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct ObjectRelations {
    #[prost(message, repeated, tag = "1")]
    pub relations: Vec<Edge>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RelationIdQuery {
    #[prost(string, tag = "1")]
    pub relation_id: String,
    #[prost(string, tag = "2")]
    pub parent_object_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ObjectIdQuery {
    #[prost(string, tag = "1")]
    pub object_id: String,
}

/// Client for the edge registry's RPC interface.
#[derive(Debug, Clone)]
pub struct EdgeRegistryClient {
    inner: Grpc<Channel>,
}

impl EdgeRegistryClient {
    /// Connect to a registry listening at `addr` (`host:port` or a full URI).
    pub async fn connect(addr: &str) -> Result<Self, EdgeRegistryError> {
        let uri = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };

        let channel = Endpoint::from_shared(uri.clone())
            .map_err(|_| EdgeRegistryError::InvalidAddress(addr.to_string()))?
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(RPC_TIMEOUT_SECS))
            .connect()
            .await
            .map_err(|e| {
                warn!(target: "lake.rpc", error = %e, endpoint = %uri, "Failed to connect to edge registry");
                EdgeRegistryError::Connect(e)
            })?;

        Ok(Self {
            inner: Grpc::new(channel),
        })
    }

    async fn unary<Req, Resp>(
        &mut self,
        method: &'static str,
        request: Req,
    ) -> Result<Resp, EdgeRegistryError>
    where
        Req: Message + Send + Sync + 'static,
        Resp: Message + Default + Send + Sync + 'static,
    {
        let rpc_error = |status: tonic::Status| {
            warn!(target: "lake.rpc", method, code = ?status.code(), "Edge registry RPC failed");
            EdgeRegistryError::Rpc {
                method,
                status: Box::new(status),
            }
        };

        self.inner.ready().await.map_err(|e| {
            rpc_error(tonic::Status::unavailable(format!(
                "Service was not ready: {e}"
            )))
        })?;

        let path = PathAndQuery::try_from(format!("/{SERVICE}/{method}"))
            .map_err(|e| rpc_error(tonic::Status::internal(e.to_string())))?;

        debug!(target: "lake.rpc", method, "Calling edge registry");
        let response = self
            .inner
            .unary(Request::new(request), path, ProstCodec::<Req, Resp>::default())
            .await
            .map_err(rpc_error)?;

        Ok(response.into_inner())
    }

    /// Register a relation between two schemas and return its id.
    pub async fn add_relation(
        &mut self,
        parent_schema_id: Uuid,
        child_schema_id: Uuid,
    ) -> Result<Uuid, EdgeRegistryError> {
        let response: RelationId = self
            .unary(
                "AddRelation",
                SchemaRelation {
                    parent_schema_id: parent_schema_id.to_string(),
                    child_schema_id: child_schema_id.to_string(),
                },
            )
            .await?;

        parse_uuid("relation_id", &response.relation_id)
    }

    pub async fn list_relations(&mut self) -> Result<Vec<RelationDetails>, EdgeRegistryError> {
        let response: RelationList = self.unary("ListRelations", Empty {}).await?;
        Ok(response.items)
    }

    pub async fn add_edges(&mut self, edges: Vec<Edge>) -> Result<(), EdgeRegistryError> {
        let _: Empty = self
            .unary("AddEdges", ObjectRelations { relations: edges })
            .await?;
        Ok(())
    }

    /// Children of `parent_object_id` within one relation.
    pub async fn get_edge(
        &mut self,
        relation_id: Uuid,
        parent_object_id: Uuid,
    ) -> Result<Edge, EdgeRegistryError> {
        self.unary(
            "GetEdge",
            RelationIdQuery {
                relation_id: relation_id.to_string(),
                parent_object_id: parent_object_id.to_string(),
            },
        )
        .await
    }

    /// Every edge whose parent is `object_id`, grouped by relation.
    pub async fn get_edges(&mut self, object_id: Uuid) -> Result<Vec<Edge>, EdgeRegistryError> {
        let response: ObjectRelations = self
            .unary(
                "GetEdges",
                ObjectIdQuery {
                    object_id: object_id.to_string(),
                },
            )
            .await?;
        Ok(response.relations)
    }

    pub async fn heartbeat(&mut self) -> Result<(), EdgeRegistryError> {
        let _: Empty = self.unary("Heartbeat", Empty {}).await?;
        Ok(())
    }
}

fn parse_uuid(field: &'static str, value: &str) -> Result<Uuid, EdgeRegistryError> {
    Uuid::parse_str(value).map_err(|_| EdgeRegistryError::InvalidResponse {
        field,
        value: value.to_string(),
    })
}
