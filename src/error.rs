use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoomError {
    /// Malformed area geometry or a missing configuration value.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A message that could not be turned into a distance sample.
    #[error("dropped message on {topic}: {reason}")]
    TransientInput { topic: String, reason: String },

    #[error("message channel not ready: {0}")]
    UpstreamUnavailable(#[from] rumqttc::ClientError),

    #[error("encoding state: {0}")]
    Encode(#[source] serde_json::Error),
}

impl RoomError {
    pub fn input(topic: &str, reason: impl Into<String>) -> Self {
        RoomError::TransientInput {
            topic: topic.to_string(),
            reason: reason.into(),
        }
    }
}
