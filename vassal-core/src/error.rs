//! SQS error types and XML formatting

use thiserror::Error;

/// User-visible SQS failures with their stable wire codes.
///
/// Every variant renders as HTTP 400 with an `<ErrorResponse>` body; the
/// codes must match what real SQS clients expect byte for byte.
#[derive(Debug, Clone, Error)]
pub enum SqsError {
    #[error("The specified queue does not exist: {0}")]
    NonExistentQueue(String),
    #[error("A queue already exists with this name and a different configuration: {0}")]
    QueueNameExists(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameterValue(String),
    #[error("The receipt handle is invalid: {0}")]
    ReceiptHandleIsInvalid(String),
    #[error("Unknown action: {0}")]
    InvalidAction(String),
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),
    #[error("Internal error: {0}")]
    Unknown(String),
}

impl SqsError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NonExistentQueue(_) => "AWS.SimpleQueueService.NonExistentQueue",
            Self::QueueNameExists(_) => "AWS.SimpleQueueService.QueueNameExists",
            Self::InvalidParameterValue(_) => "InvalidParameterValue",
            Self::ReceiptHandleIsInvalid(_) => "ReceiptHandleIsInvalid",
            Self::InvalidAction(_) => "InvalidAction",
            Self::MissingParameter(_) => "MissingParameter",
            Self::Unknown(_) => "AWS.SimpleQueueService.Unknown",
        }
    }

    /// All SQS sender errors surface as 400.
    pub fn http_status(&self) -> u16 {
        400
    }

    /// Format as an SQS-style XML error document.
    pub fn to_xml(&self, request_id: &str) -> String {
        format!(
            r#"<ErrorResponse>
  <Error>
    <Type>Sender</Type>
    <Code>{}</Code>
    <Message>{}</Message>
  </Error>
  <RequestId>{}</RequestId>
</ErrorResponse>"#,
            self.code(),
            escape_xml(&self.to_string()),
            request_id
        )
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
