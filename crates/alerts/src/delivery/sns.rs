//! Cloud notification sink backed by AWS SNS.

use async_trait::async_trait;

use thermwatch_core::AlertMessage;

use crate::dispatch::{AlertSink, DispatchError};

/// Publishes alert text to an SNS topic. Region and credentials come from
/// the ambient AWS provider chain, not from daemon configuration.
pub struct SnsSink {
    client: aws_sdk_sns::Client,
    topic_arn: String,
}

impl SnsSink {
    /// Build a sink for `topic_arn` using the default AWS configuration.
    pub async fn from_default_config(topic_arn: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

        Self {
            client: aws_sdk_sns::Client::new(&config),
            topic_arn: topic_arn.into(),
        }
    }
}

#[async_trait]
impl AlertSink for SnsSink {
    async fn deliver(&self, message: &AlertMessage) -> Result<(), DispatchError> {
        self.client
            .publish()
            .topic_arn(&self.topic_arn)
            .message(&message.text)
            .send()
            .await
            .map_err(|e| {
                DispatchError::Cloud(aws_sdk_sns::error::DisplayErrorContext(e).to_string())
            })?;

        tracing::debug!(topic_arn = %self.topic_arn, "Published alert notification");
        Ok(())
    }
}
