//! HTTP handlers for the SQS query protocol
//!
//! Actions arrive form-urlencoded (GET query string or POST body, already
//! merged by the router) and leave as SQS XML documents.

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::Response,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::QueueConfig;
use crate::coordinator::{QueueCoordinator, ReceiveOptions, ReceivedMessage};
use crate::store::QueueStore;
use vassal_core::{RequestId, SqsError};

/// Dispatch one SQS action. `queue_name` is the `/<queue_name>` path segment
/// when the request was queue-scoped.
///
/// The action runs in its own task so a panicking handler surfaces as an
/// `AWS.SimpleQueueService.Unknown` error instead of tearing down the server.
pub async fn handle_request(
    store: Arc<QueueStore>,
    queue_name: Option<String>,
    params: HashMap<String, String>,
) -> Response {
    let request_id = RequestId::new();

    let outcome = {
        let request_id = request_id.clone();
        tokio::spawn(async move { dispatch(&store, queue_name.as_deref(), &params, &request_id).await })
            .await
    };

    match outcome {
        Ok(Ok(xml)) => xml_response(StatusCode::OK, &xml),
        Ok(Err(e)) => error_response(&e, &request_id),
        Err(join_error) => {
            error!(%join_error, "action handler panicked");
            error_response(
                &SqsError::Unknown("internal failure while handling the request".into()),
                &request_id,
            )
        }
    }
}

async fn dispatch(
    store: &Arc<QueueStore>,
    queue_name: Option<&str>,
    params: &HashMap<String, String>,
    request_id: &RequestId,
) -> Result<String, SqsError> {
    let action = params
        .get("Action")
        .ok_or_else(|| SqsError::MissingParameter("Action".into()))?;

    info!(action = %action, queue = ?queue_name, "SQS request");

    match action.as_str() {
        "CreateQueue" => create_queue(store, params, request_id),
        "GetQueueUrl" => get_queue_url(store, params, request_id),
        "ListQueues" => list_queues(store, params, request_id),
        "DeleteQueue" => delete_queue(store, queue_name, params, request_id),
        "GetQueueAttributes" => get_queue_attributes(store, queue_name, params, request_id),
        "SendMessage" => send_message(store, queue_name, params, request_id),
        "ReceiveMessage" => receive_message(store, queue_name, params, request_id).await,
        "DeleteMessage" => delete_message(store, queue_name, params, request_id),
        "ChangeMessageVisibility" => change_message_visibility(store, queue_name, params, request_id),
        other => {
            warn!(action = %other, "Unknown SQS action");
            Err(SqsError::InvalidAction(other.to_string()))
        }
    }
}

// === Actions ===

fn create_queue(
    store: &Arc<QueueStore>,
    params: &HashMap<String, String>,
    request_id: &RequestId,
) -> Result<String, SqsError> {
    let name = required(params, "QueueName")?;
    if name.is_empty()
        || name.len() > 80
        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SqsError::InvalidParameterValue(format!(
            "invalid queue name {name:?}"
        )));
    }

    let config = QueueConfig::from_attributes(&collect_attributes(params))?;
    let (_, url) = store.add_queue(name, config)?;

    Ok(format!(
        r#"<CreateQueueResponse>
  <CreateQueueResult>
    <QueueUrl>{}</QueueUrl>
  </CreateQueueResult>
  <ResponseMetadata>
    <RequestId>{}</RequestId>
  </ResponseMetadata>
</CreateQueueResponse>"#,
        url, request_id
    ))
}

fn get_queue_url(
    store: &Arc<QueueStore>,
    params: &HashMap<String, String>,
    request_id: &RequestId,
) -> Result<String, SqsError> {
    let name = required(params, "QueueName")?;
    let queue = store.queue_handle(name)?;

    Ok(format!(
        r#"<GetQueueUrlResponse>
  <GetQueueUrlResult>
    <QueueUrl>{}</QueueUrl>
  </GetQueueUrlResult>
  <ResponseMetadata>
    <RequestId>{}</RequestId>
  </ResponseMetadata>
</GetQueueUrlResponse>"#,
        queue.url(),
        request_id
    ))
}

fn list_queues(
    store: &Arc<QueueStore>,
    params: &HashMap<String, String>,
    request_id: &RequestId,
) -> Result<String, SqsError> {
    let prefix = params.get("QueueNamePrefix").map(String::as_str);

    let mut urls = String::new();
    for url in store.list_queues(prefix) {
        urls.push_str(&format!("    <QueueUrl>{url}</QueueUrl>\n"));
    }

    Ok(format!(
        r#"<ListQueuesResponse>
  <ListQueuesResult>
{}  </ListQueuesResult>
  <ResponseMetadata>
    <RequestId>{}</RequestId>
  </ResponseMetadata>
</ListQueuesResponse>"#,
        urls, request_id
    ))
}

fn delete_queue(
    store: &Arc<QueueStore>,
    queue_name: Option<&str>,
    params: &HashMap<String, String>,
    request_id: &RequestId,
) -> Result<String, SqsError> {
    let queue = resolve_queue(store, queue_name, params)?;
    store.remove_queue(queue.name());

    Ok(format!(
        r#"<DeleteQueueResponse>
  <ResponseMetadata>
    <RequestId>{}</RequestId>
  </ResponseMetadata>
</DeleteQueueResponse>"#,
        request_id
    ))
}

fn get_queue_attributes(
    store: &Arc<QueueStore>,
    queue_name: Option<&str>,
    params: &HashMap<String, String>,
    request_id: &RequestId,
) -> Result<String, SqsError> {
    let queue = resolve_queue(store, queue_name, params)?;

    let mut attributes = queue.config().to_attributes();
    attributes.push((
        "ApproximateNumberOfMessages",
        queue.visible_count().to_string(),
    ));

    let mut rendered = String::new();
    for (name, value) in attributes {
        rendered.push_str(&format!(
            "    <Attribute><Name>{name}</Name><Value>{value}</Value></Attribute>\n"
        ));
    }

    Ok(format!(
        r#"<GetQueueAttributesResponse>
  <GetQueueAttributesResult>
{}  </GetQueueAttributesResult>
  <ResponseMetadata>
    <RequestId>{}</RequestId>
  </ResponseMetadata>
</GetQueueAttributesResponse>"#,
        rendered, request_id
    ))
}

fn send_message(
    store: &Arc<QueueStore>,
    queue_name: Option<&str>,
    params: &HashMap<String, String>,
    request_id: &RequestId,
) -> Result<String, SqsError> {
    let queue = resolve_queue(store, queue_name, params)?;
    let body = required(params, "MessageBody")?.clone();
    let delay = parse_seconds(params, "DelaySeconds")?;

    let receipt = queue.send_message(body, delay)?;

    Ok(format!(
        r#"<SendMessageResponse>
  <SendMessageResult>
    <MD5OfMessageBody>{}</MD5OfMessageBody>
    <MessageId>{}</MessageId>
  </SendMessageResult>
  <ResponseMetadata>
    <RequestId>{}</RequestId>
  </ResponseMetadata>
</SendMessageResponse>"#,
        receipt.body_md5, receipt.message_id, request_id
    ))
}

async fn receive_message(
    store: &Arc<QueueStore>,
    queue_name: Option<&str>,
    params: &HashMap<String, String>,
    request_id: &RequestId,
) -> Result<String, SqsError> {
    let queue = resolve_queue(store, queue_name, params)?;

    let max_messages = match params.get("MaxNumberOfMessages") {
        Some(raw) => {
            let value: usize = raw.parse().map_err(|_| {
                SqsError::InvalidParameterValue(format!("MaxNumberOfMessages must be an integer, got {raw:?}"))
            })?;
            if !(1..=10).contains(&value) {
                return Err(SqsError::InvalidParameterValue(format!(
                    "MaxNumberOfMessages must be between 1 and 10, got {value}"
                )));
            }
            value
        }
        None => 1,
    };

    let requested_attributes = collect_attribute_names(params);
    let received = queue
        .receive_message(ReceiveOptions {
            max_messages,
            wait: parse_seconds(params, "WaitTimeSeconds")?,
            visibility_timeout: parse_seconds(params, "VisibilityTimeout")?,
        })
        .await;

    let mut messages = String::new();
    for message in &received {
        messages.push_str(&render_message(message, &requested_attributes));
    }

    Ok(format!(
        r#"<ReceiveMessageResponse>
  <ReceiveMessageResult>{}</ReceiveMessageResult>
  <ResponseMetadata>
    <RequestId>{}</RequestId>
  </ResponseMetadata>
</ReceiveMessageResponse>"#,
        messages, request_id
    ))
}

fn delete_message(
    store: &Arc<QueueStore>,
    queue_name: Option<&str>,
    params: &HashMap<String, String>,
    request_id: &RequestId,
) -> Result<String, SqsError> {
    let queue = resolve_queue(store, queue_name, params)?;
    let receipt_handle = required(params, "ReceiptHandle")?;

    queue.delete_message(receipt_handle)?;

    Ok(format!(
        r#"<DeleteMessageResponse>
  <ResponseMetadata>
    <RequestId>{}</RequestId>
  </ResponseMetadata>
</DeleteMessageResponse>"#,
        request_id
    ))
}

fn change_message_visibility(
    store: &Arc<QueueStore>,
    queue_name: Option<&str>,
    params: &HashMap<String, String>,
    request_id: &RequestId,
) -> Result<String, SqsError> {
    let queue = resolve_queue(store, queue_name, params)?;
    let receipt_handle = required(params, "ReceiptHandle")?;
    let timeout = parse_seconds(params, "VisibilityTimeout")?
        .ok_or_else(|| SqsError::MissingParameter("VisibilityTimeout".into()))?;

    queue.change_visibility(receipt_handle, timeout)?;

    Ok(format!(
        r#"<ChangeMessageVisibilityResponse>
  <ResponseMetadata>
    <RequestId>{}</RequestId>
  </ResponseMetadata>
</ChangeMessageVisibilityResponse>"#,
        request_id
    ))
}

// === Parameter helpers ===

fn required<'a>(params: &'a HashMap<String, String>, name: &str) -> Result<&'a String, SqsError> {
    params
        .get(name)
        .ok_or_else(|| SqsError::MissingParameter(name.to_string()))
}

/// Wire time parameters are whole seconds; the runtime works in Durations.
fn parse_seconds(
    params: &HashMap<String, String>,
    name: &str,
) -> Result<Option<Duration>, SqsError> {
    params
        .get(name)
        .map(|raw| {
            raw.parse::<u64>().map(Duration::from_secs).map_err(|_| {
                SqsError::InvalidParameterValue(format!("{name} must be an integer, got {raw:?}"))
            })
        })
        .transpose()
}

/// Queue resolution order: the `/<queue_name>` path segment, then the
/// `QueueUrl` parameter (its last path segment names the queue).
fn resolve_queue(
    store: &Arc<QueueStore>,
    queue_name: Option<&str>,
    params: &HashMap<String, String>,
) -> Result<Arc<QueueCoordinator>, SqsError> {
    let name = match queue_name {
        Some(name) => name.to_string(),
        None => {
            let url = required(params, "QueueUrl")?;
            url.trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or(url)
                .to_string()
        }
    };
    store.queue_handle(&name)
}

/// Collect CreateQueue `Attribute.N.Name`/`Attribute.N.Value` pairs.
fn collect_attributes(params: &HashMap<String, String>) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    for n in 1.. {
        let (name, value) = (
            params.get(&format!("Attribute.{n}.Name")),
            params.get(&format!("Attribute.{n}.Value")),
        );
        match (name, value) {
            (Some(name), Some(value)) => {
                attrs.insert(name.clone(), value.clone());
            }
            _ => break,
        }
    }
    attrs
}

/// Collect ReceiveMessage `AttributeName.N` values. A bare `AttributeName`
/// is accepted too, as some clients send the singular form.
fn collect_attribute_names(params: &HashMap<String, String>) -> Vec<String> {
    let mut names: Vec<String> = params.get("AttributeName").cloned().into_iter().collect();
    for n in 1.. {
        match params.get(&format!("AttributeName.{n}")) {
            Some(name) => names.push(name.clone()),
            None => break,
        }
    }
    names
}

// === XML rendering ===

fn render_message(message: &ReceivedMessage, requested: &[String]) -> String {
    let mut xml = String::from("\n    <Message>");
    xml.push_str(&format!("<MessageId>{}</MessageId>", message.info.message_id));
    xml.push_str(&format!(
        "<ReceiptHandle>{}</ReceiptHandle>",
        message.receipt_handle
    ));
    xml.push_str(&format!("<MD5OfBody>{}</MD5OfBody>", message.info.body_md5));
    xml.push_str(&format!("<Body>{}</Body>", escape_xml(&message.info.body)));

    let all = requested.iter().any(|name| name == "All");
    let wants = |name: &str| all || requested.iter().any(|r| r == name);

    if wants("SentTimestamp") {
        xml.push_str(&attribute_xml("SentTimestamp", &message.info.sent_timestamp.to_string()));
    }
    if wants("ApproximateReceiveCount") {
        xml.push_str(&attribute_xml(
            "ApproximateReceiveCount",
            &message.info.receive_count.to_string(),
        ));
    }
    if let Some(first_receive) = message.info.first_receive_timestamp {
        if wants("ApproximateFirstReceiveTimestamp") {
            xml.push_str(&attribute_xml(
                "ApproximateFirstReceiveTimestamp",
                &first_receive.to_string(),
            ));
        }
    }

    xml.push_str("</Message>");
    xml
}

fn attribute_xml(name: &str, value: &str) -> String {
    format!("<Attribute><Name>{name}</Name><Value>{value}</Value></Attribute>")
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn xml_response(status: StatusCode, body: &str) -> Response {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/xml"),
    );
    response
}

fn error_response(error: &SqsError, request_id: &RequestId) -> Response {
    let status = StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::BAD_REQUEST);
    let mut response = Response::new(Body::from(error.to_xml(request_id.as_str())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/xml"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn store() -> Arc<QueueStore> {
        QueueStore::new("http://localhost:4589")
    }

    #[tokio::test]
    async fn test_create_queue_and_get_url() {
        let store = store();

        let response = handle_request(
            store.clone(),
            None,
            params(&[("Action", "CreateQueue"), ("QueueName", "q1")]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("<QueueUrl>http://localhost:4589/q1</QueueUrl>"));

        let response = handle_request(
            store,
            None,
            params(&[("Action", "GetQueueUrl"), ("QueueName", "q1")]),
        )
        .await;
        let body = body_string(response).await;
        assert!(body.contains("<QueueUrl>http://localhost:4589/q1</QueueUrl>"));
    }

    #[tokio::test]
    async fn test_create_queue_conflict_renders_queue_name_exists() {
        let store = store();

        handle_request(
            store.clone(),
            None,
            params(&[("Action", "CreateQueue"), ("QueueName", "q1")]),
        )
        .await;

        let response = handle_request(
            store,
            None,
            params(&[
                ("Action", "CreateQueue"),
                ("QueueName", "q1"),
                ("Attribute.1.Name", "VisibilityTimeout"),
                ("Attribute.1.Value", "5"),
            ]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_string(response).await;
        assert!(body.contains("<Code>AWS.SimpleQueueService.QueueNameExists</Code>"));
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let response = handle_request(store(), None, params(&[("Action", "TeleportQueue")])).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_string(response).await;
        assert!(body.contains("<Code>InvalidAction</Code>"));
    }

    #[tokio::test]
    async fn test_missing_action() {
        let response = handle_request(store(), None, params(&[])).await;

        let body = body_string(response).await;
        assert!(body.contains("<Code>MissingParameter</Code>"));
    }

    #[tokio::test]
    async fn test_send_and_receive_via_queue_url() {
        let store = store();
        handle_request(
            store.clone(),
            None,
            params(&[("Action", "CreateQueue"), ("QueueName", "q1")]),
        )
        .await;

        let response = handle_request(
            store.clone(),
            None,
            params(&[
                ("Action", "SendMessage"),
                ("QueueUrl", "http://localhost:4589/q1"),
                ("MessageBody", "hello <world>"),
            ]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("<MessageId>"));
        assert!(body.contains("<MD5OfMessageBody>"));

        let response = handle_request(
            store,
            Some("q1".to_string()),
            params(&[("Action", "ReceiveMessage"), ("WaitTimeSeconds", "0")]),
        )
        .await;
        let body = body_string(response).await;
        assert!(body.contains("<Body>hello &lt;world&gt;</Body>"));
        assert!(body.contains("<ReceiptHandle>"));
    }

    #[tokio::test]
    async fn test_receive_attribute_filtering() {
        let store = store();
        handle_request(
            store.clone(),
            None,
            params(&[("Action", "CreateQueue"), ("QueueName", "q1")]),
        )
        .await;
        handle_request(
            store.clone(),
            Some("q1".to_string()),
            params(&[("Action", "SendMessage"), ("MessageBody", "m")]),
        )
        .await;

        // No AttributeName.N: no attributes rendered.
        let response = handle_request(
            store.clone(),
            Some("q1".to_string()),
            params(&[
                ("Action", "ReceiveMessage"),
                ("VisibilityTimeout", "0"),
            ]),
        )
        .await;
        let body = body_string(response).await;
        assert!(!body.contains("<Attribute>"));

        // All returns the full attribute map. The previous receive used a
        // zero visibility timeout, so the message comes back within the wait.
        let response = handle_request(
            store,
            Some("q1".to_string()),
            params(&[
                ("Action", "ReceiveMessage"),
                ("AttributeName.1", "All"),
                ("WaitTimeSeconds", "2"),
            ]),
        )
        .await;
        let body = body_string(response).await;
        assert!(body.contains("<Name>SentTimestamp</Name>"));
        assert!(body.contains("<Name>ApproximateReceiveCount</Name>"));
        assert!(body.contains("<Name>ApproximateFirstReceiveTimestamp</Name>"));
    }

    #[tokio::test]
    async fn test_max_number_of_messages_bounds() {
        let store = store();
        handle_request(
            store.clone(),
            None,
            params(&[("Action", "CreateQueue"), ("QueueName", "q1")]),
        )
        .await;

        for bad in ["0", "11"] {
            let response = handle_request(
                store.clone(),
                Some("q1".to_string()),
                params(&[("Action", "ReceiveMessage"), ("MaxNumberOfMessages", bad)]),
            )
            .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body = body_string(response).await;
            assert!(body.contains("<Code>InvalidParameterValue</Code>"));
        }
    }

    #[tokio::test]
    async fn test_receive_on_missing_queue() {
        let response = handle_request(
            store(),
            Some("ghost".to_string()),
            params(&[("Action", "ReceiveMessage")]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_string(response).await;
        assert!(body.contains("<Code>AWS.SimpleQueueService.NonExistentQueue</Code>"));
    }

    #[tokio::test]
    async fn test_delete_message_with_bad_handle() {
        let store = store();
        handle_request(
            store.clone(),
            None,
            params(&[("Action", "CreateQueue"), ("QueueName", "q1")]),
        )
        .await;

        let response = handle_request(
            store,
            Some("q1".to_string()),
            params(&[("Action", "DeleteMessage"), ("ReceiptHandle", "bogus")]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_string(response).await;
        assert!(body.contains("<Code>ReceiptHandleIsInvalid</Code>"));
    }

    #[tokio::test]
    async fn test_delete_queue_roundtrip() {
        let store = store();
        handle_request(
            store.clone(),
            None,
            params(&[("Action", "CreateQueue"), ("QueueName", "q1")]),
        )
        .await;

        let response = handle_request(
            store.clone(),
            None,
            params(&[
                ("Action", "DeleteQueue"),
                ("QueueUrl", "http://localhost:4589/q1"),
            ]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!store.queue_exists("q1"));

        // A second delete reports the queue as gone.
        let response = handle_request(
            store,
            None,
            params(&[
                ("Action", "DeleteQueue"),
                ("QueueUrl", "http://localhost:4589/q1"),
            ]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_queues_and_attributes() {
        let store = store();
        for name in ["orders", "orders-dlq", "payments"] {
            handle_request(
                store.clone(),
                None,
                params(&[("Action", "CreateQueue"), ("QueueName", name)]),
            )
            .await;
        }

        let response = handle_request(
            store.clone(),
            None,
            params(&[("Action", "ListQueues"), ("QueueNamePrefix", "orders")]),
        )
        .await;
        let body = body_string(response).await;
        assert!(body.contains("orders</QueueUrl>"));
        assert!(body.contains("orders-dlq</QueueUrl>"));
        assert!(!body.contains("payments"));

        let response = handle_request(
            store,
            Some("orders".to_string()),
            params(&[("Action", "GetQueueAttributes")]),
        )
        .await;
        let body = body_string(response).await;
        assert!(body.contains("<Name>VisibilityTimeout</Name>"));
        assert!(body.contains("<Name>ApproximateNumberOfMessages</Name>"));
    }

    #[tokio::test]
    async fn test_invalid_queue_name_rejected() {
        let response = handle_request(
            store(),
            None,
            params(&[("Action", "CreateQueue"), ("QueueName", "not/valid")]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_string(response).await;
        assert!(body.contains("<Code>InvalidParameterValue</Code>"));
    }
}
