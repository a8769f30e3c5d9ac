//! Queue configuration and CreateQueue attribute parsing

use std::collections::HashMap;
use std::time::Duration;

use vassal_core::SqsError;

pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 262_144; // 256KB
pub const DEFAULT_RETENTION_SECS: u64 = 345_600; // 4 days
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 30;

/// Per-queue configuration, immutable after creation.
///
/// `PartialEq` backs the CreateQueue idempotency check: re-creating a queue
/// with an identical config succeeds, a differing config is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Default delay applied to newly sent messages.
    pub delay: Duration,
    /// Maximum message body size in bytes.
    pub max_message_bytes: usize,
    /// Oldest a message may live before discard.
    pub retention: Duration,
    /// Default long-poll wait for ReceiveMessage.
    pub receive_wait: Duration,
    /// Default visibility lease for received messages.
    pub visibility_timeout: Duration,
    /// Receives before dead-lettering, when set.
    pub max_receives: Option<u32>,
    /// Name of the dead-letter queue, when set.
    pub dead_letter_queue: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            receive_wait: Duration::ZERO,
            visibility_timeout: Duration::from_secs(DEFAULT_VISIBILITY_TIMEOUT_SECS),
            max_receives: None,
            dead_letter_queue: None,
        }
    }
}

impl QueueConfig {
    /// Build a config from CreateQueue `Attribute.N.Name`/`Attribute.N.Value`
    /// pairs. Unknown attribute names and unparseable values are rejected.
    pub fn from_attributes(attrs: &HashMap<String, String>) -> Result<Self, SqsError> {
        let mut config = Self::default();

        for (name, value) in attrs {
            match name.as_str() {
                "DelaySeconds" => config.delay = Duration::from_secs(parse_u64(name, value)?),
                "MaximumMessageSize" => {
                    config.max_message_bytes = parse_u64(name, value)? as usize;
                }
                "MessageRetentionPeriod" => {
                    config.retention = Duration::from_secs(parse_u64(name, value)?);
                }
                "ReceiveMessageWaitTimeSeconds" => {
                    config.receive_wait = Duration::from_secs(parse_u64(name, value)?);
                }
                "VisibilityTimeout" => {
                    config.visibility_timeout = Duration::from_secs(parse_u64(name, value)?);
                }
                "RedrivePolicy" => {
                    let (max_receives, target) = parse_redrive_policy(value)?;
                    config.max_receives = Some(max_receives);
                    config.dead_letter_queue = Some(target);
                }
                other => {
                    return Err(SqsError::InvalidParameterValue(format!(
                        "unknown queue attribute {other}"
                    )));
                }
            }
        }

        Ok(config)
    }

    /// The attributes GetQueueAttributes reports, as (name, value) pairs.
    pub fn to_attributes(&self) -> Vec<(&'static str, String)> {
        vec![
            ("DelaySeconds", self.delay.as_secs().to_string()),
            ("MaximumMessageSize", self.max_message_bytes.to_string()),
            ("MessageRetentionPeriod", self.retention.as_secs().to_string()),
            (
                "ReceiveMessageWaitTimeSeconds",
                self.receive_wait.as_secs().to_string(),
            ),
            (
                "VisibilityTimeout",
                self.visibility_timeout.as_secs().to_string(),
            ),
        ]
    }
}

fn parse_u64(name: &str, value: &str) -> Result<u64, SqsError> {
    value
        .parse()
        .map_err(|_| SqsError::InvalidParameterValue(format!("{name} must be an integer, got {value:?}")))
}

/// Parse the RedrivePolicy attribute JSON:
/// `{"maxReceiveCount": 2, "deadLetterTargetArn": "arn:aws:sqs:...:dlq"}`.
///
/// `maxReceiveCount` arrives as a number or a numeric string depending on the
/// client; the target queue name is the last `:` or `/` segment of the ARN.
fn parse_redrive_policy(value: &str) -> Result<(u32, String), SqsError> {
    let policy: serde_json::Value = serde_json::from_str(value)
        .map_err(|e| SqsError::InvalidParameterValue(format!("RedrivePolicy is not valid JSON: {e}")))?;

    let max_receives = match &policy["maxReceiveCount"] {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| {
        SqsError::InvalidParameterValue("RedrivePolicy.maxReceiveCount must be a positive integer".into())
    })?;

    let target = policy["deadLetterTargetArn"]
        .as_str()
        .map(|arn| {
            arn.rsplit([':', '/'])
                .next()
                .unwrap_or(arn)
                .to_string()
        })
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            SqsError::InvalidParameterValue("RedrivePolicy.deadLetterTargetArn is required".into())
        })?;

    Ok((max_receives as u32, target))
}
