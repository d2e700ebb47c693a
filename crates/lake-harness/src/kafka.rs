//! Event log topic administration.

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const ADMIN_TIMEOUT: Duration = Duration::from_secs(10);
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum KafkaAdminError {
    #[error("Kafka client error: {0}")]
    Client(#[from] KafkaError),

    #[error("Topic operation on '{topic}' failed: {code}")]
    Topic {
        topic: String,
        code: RDKafkaErrorCode,
    },

    #[error("Metadata task failed: {0}")]
    Task(String),
}

/// Topic admin client bound to one broker list.
#[derive(Clone)]
pub struct KafkaAdmin {
    admin: Arc<AdminClient<DefaultClientContext>>,
}

impl KafkaAdmin {
    pub fn new(brokers: &str) -> Result<Self, KafkaAdminError> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("client.id", "lake-harness-admin")
            .create()?;

        Ok(Self {
            admin: Arc::new(admin),
        })
    }

    fn options() -> AdminOptions {
        AdminOptions::new()
            .operation_timeout(Some(ADMIN_TIMEOUT))
            .request_timeout(Some(ADMIN_TIMEOUT))
    }

    /// Create a single-partition topic unless it already exists.
    ///
    /// Returns whether this call created the topic.
    pub async fn create_topic_if_absent(&self, topic: &str) -> Result<bool, KafkaAdminError> {
        let new_topic = NewTopic::new(topic, 1, TopicReplication::Fixed(1));
        let results = self
            .admin
            .create_topics(&[new_topic], &Self::options())
            .await?;

        for result in results {
            match result {
                Ok(name) => {
                    info!(target: "lake.env", topic = %name, "Created topic");
                    return Ok(true);
                }
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    debug!(target: "lake.env", topic = %name, "Topic already exists");
                    return Ok(false);
                }
                Err((name, code)) => return Err(KafkaAdminError::Topic { topic: name, code }),
            }
        }

        Ok(false)
    }

    /// Delete a topic. A topic that does not exist is not an error.
    pub async fn delete_topic(&self, topic: &str) -> Result<(), KafkaAdminError> {
        let results = self.admin.delete_topics(&[topic], &Self::options()).await?;

        for result in results {
            match result {
                Ok(name) => info!(target: "lake.env", topic = %name, "Deleted topic"),
                Err((name, RDKafkaErrorCode::UnknownTopicOrPartition)) => {
                    debug!(target: "lake.env", topic = %name, "Topic already absent");
                }
                Err((name, code)) => return Err(KafkaAdminError::Topic { topic: name, code }),
            }
        }

        Ok(())
    }

    /// Whether the broker reports `topic` in its metadata.
    ///
    /// Also serves as the broker bootstrap check: any error here means the
    /// broker did not answer.
    pub async fn topic_exists(&self, topic: &str) -> Result<bool, KafkaAdminError> {
        let admin = Arc::clone(&self.admin);
        let topic = topic.to_string();

        // fetch_metadata blocks the calling thread.
        tokio::task::spawn_blocking(move || {
            let metadata = admin.inner().fetch_metadata(Some(&topic), METADATA_TIMEOUT)?;
            Ok::<_, KafkaAdminError>(
                metadata
                    .topics()
                    .iter()
                    .any(|t| t.name() == topic && t.error().is_none()),
            )
        })
        .await
        .map_err(|e| KafkaAdminError::Task(e.to_string()))?
    }
}

impl std::fmt::Debug for KafkaAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaAdmin").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_error_display_names_topic() {
        let err = KafkaAdminError::Topic {
            topic: "cdl.document.input".to_string(),
            code: RDKafkaErrorCode::InvalidTopic,
        };
        assert!(err.to_string().contains("cdl.document.input"));
    }

    #[test]
    fn test_client_creation_does_not_connect() {
        // librdkafka connects lazily, so an unreachable broker is fine here.
        let admin = KafkaAdmin::new("127.0.0.1:1");
        assert!(admin.is_ok());
    }
}
