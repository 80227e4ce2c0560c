//! Newline-delimited JSON request/response envelopes.
//!
//! Every connection carries exactly one request line followed by one response
//! line. Payloads are command-specific JSON objects.

use std::time::Duration;

use embedded_broker_harness_core::ClientError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Version stamped on every envelope.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound for one request/response exchange.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub version: u32,
    /// Echoed back in the response.
    pub request_id: String,
    /// Command to execute (e.g. `"create"`, `"produce"`).
    pub command: String,
    pub payload: serde_json::Value,
}

impl Request {
    pub fn new(command: &str, payload: serde_json::Value) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            request_id: uuid::Uuid::new_v4().to_string(),
            command: command.to_string(),
            payload,
        }
    }

    /// Decode the payload into a command-specific shape.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, Response> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            Response::error(
                &self.request_id,
                codes::INVALID_REQUEST,
                &format!("bad payload for '{}': {e}", self.command),
            )
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub version: u32,
    pub request_id: String,
    /// `"ok"` or `"error"`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    /// Machine-readable code, see [`codes`].
    pub code: String,
    pub message: String,
}

/// Error codes shared by both servers.
pub mod codes {
    pub const INVALID_REQUEST: &str = "InvalidRequest";
    pub const VERSION_MISMATCH: &str = "VersionMismatch";
    pub const UNKNOWN_COMMAND: &str = "UnknownCommand";
    pub const NO_NODE: &str = "NoNode";
    pub const NOT_EMPTY: &str = "NotEmpty";
    pub const TOPIC_EXISTS: &str = "TopicAlreadyExists";
    pub const UNKNOWN_TOPIC: &str = "UnknownTopicOrPartition";
    pub const INVALID_PARTITIONS: &str = "InvalidPartitions";
    pub const INVALID_REPLICATION_FACTOR: &str = "InvalidReplicationFactor";
    pub const UNKNOWN_MEMBER: &str = "UnknownMemberId";
    pub const INTERNAL: &str = "InternalError";
}

/// Why a server refused a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: &'static str,
    pub message: String,
}

impl Rejection {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn into_response(self, request_id: &str) -> Response {
        Response::error(request_id, self.code, &self.message)
    }
}

impl Response {
    pub fn ok(request_id: &str, payload: serde_json::Value) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            request_id: request_id.to_string(),
            status: "ok".to_string(),
            payload: Some(payload),
            error: None,
        }
    }

    pub fn error(request_id: &str, code: &str, message: &str) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            request_id: request_id.to_string(),
            status: "error".to_string(),
            payload: None,
            error: Some(ResponseError {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    /// Error code, if this is an error response.
    pub fn code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

/// Send `request` to `address` and wait for the response line.
pub async fn exchange(address: &str, request: &Request) -> Result<Response, ClientError> {
    tokio::time::timeout(EXCHANGE_TIMEOUT, exchange_inner(address, request))
        .await
        .map_err(|_| ClientError::Connection {
            address: address.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no response to '{}' within {EXCHANGE_TIMEOUT:?}", request.command),
            ),
        })?
}

async fn exchange_inner(address: &str, request: &Request) -> Result<Response, ClientError> {
    let connection_error = |source| ClientError::Connection {
        address: address.to_string(),
        source,
    };
    let stream = TcpStream::connect(address)
        .await
        .map_err(connection_error)?;

    let mut line = serde_json::to_string(request).map_err(|e| ClientError::Protocol {
        message: format!("encoding '{}': {e}", request.command),
    })?;
    line.push('\n');

    let mut reader = BufReader::new(stream);
    reader
        .get_mut()
        .write_all(line.as_bytes())
        .await
        .map_err(connection_error)?;

    let mut reply = String::new();
    let read = reader.read_line(&mut reply).await.map_err(connection_error)?;
    if read == 0 {
        return Err(ClientError::Protocol {
            message: format!("connection closed before a reply to '{}'", request.command),
        });
    }
    let response: Response =
        serde_json::from_str(reply.trim()).map_err(|e| ClientError::Protocol {
            message: format!("malformed reply to '{}': {e}", request.command),
        })?;
    if response.request_id != request.request_id {
        return Err(ClientError::Protocol {
            message: format!(
                "reply to '{}' carries request id {}, expected {}",
                request.command, response.request_id, request.request_id
            ),
        });
    }
    Ok(response)
}

/// Like [`exchange`], but error responses become [`ClientError::Rejected`]
/// and the payload is decoded into `T`.
pub async fn call<T: DeserializeOwned>(
    address: &str,
    command: &str,
    payload: serde_json::Value,
) -> Result<T, ClientError> {
    let request = Request::new(command, payload);
    let response = exchange(address, &request).await?;
    into_payload(command, response)
}

pub fn into_payload<T: DeserializeOwned>(
    command: &str,
    response: Response,
) -> Result<T, ClientError> {
    if let Some(error) = response.error {
        return Err(ClientError::Rejected {
            request: command.to_string(),
            code: error.code,
            message: error.message,
        });
    }
    let payload = response.payload.unwrap_or(serde_json::Value::Null);
    serde_json::from_value(payload).map_err(|e| ClientError::Protocol {
        message: format!("unexpected payload for '{command}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_responses_carry_code_and_omit_payload() {
        let response = Response::error("r1", codes::NO_NODE, "missing /a");
        assert!(!response.is_ok());
        assert_eq!(response.code(), Some(codes::NO_NODE));

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("payload").is_none());
        assert_eq!(json["error"]["code"], "NoNode");
    }

    #[test]
    fn rejected_payload_becomes_client_error() {
        let response = Response::error("r1", codes::TOPIC_EXISTS, "t exists");
        let err = into_payload::<serde_json::Value>("create-topic", response).unwrap_err();
        match err {
            ClientError::Rejected { request, code, .. } => {
                assert_eq!(request, "create-topic");
                assert_eq!(code, codes::TOPIC_EXISTS);
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn bad_payload_is_an_invalid_request() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Needs {
            path: String,
        }
        let request = Request::new("get", serde_json::json!({"other": 1}));
        let response = request.payload::<Needs>().unwrap_err();
        assert_eq!(response.code(), Some(codes::INVALID_REQUEST));
        assert_eq!(response.request_id, request.request_id);
    }

    #[tokio::test]
    async fn exchange_reports_unreachable_addresses() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let request = Request::new("ping", serde_json::json!({}));
        let err = exchange(&format!("127.0.0.1:{port}"), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Connection { .. }));
    }
}
