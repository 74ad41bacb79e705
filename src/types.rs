use rocket::http::Status;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::sync::oneshot;

pub type RequestId = u64;

pub type CompletionSender = oneshot::Sender<Result<String, ClassifyFailure>>;
pub type CompletionReceiver = oneshot::Receiver<Result<String, ClassifyFailure>>;

/// Inbound body for `POST /proxy_classify` - one sequence per client call
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifyRequest {
    pub sequence: String,
}

/// `result` is the backend's label for the submitted sequence ("code" or "not code")
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifyResponse {
    pub result: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorResponse {
    pub detail: String,
}

/// Outbound body for the classification backend, max 5 sequences per call
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendRequest {
    pub sequences: Vec<String>,
}

/// Labels come back positionally: `results[i]` belongs to `sequences[i]`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendResponse {
    pub results: Vec<String>,
}

/// Terminal failure delivered to a waiting caller. All variants surface as
/// HTTP 500 with a `detail` message; throttling never appears here because the
/// dispatcher retries it internally.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifyFailure {
    Transport(String),
    Cancelled,
    Internal(String),
}

impl ClassifyFailure {
    pub fn status(&self) -> Status {
        Status::InternalServerError
    }

    pub fn message(&self) -> String {
        match self {
            ClassifyFailure::Transport(reason) => format!("Backend request failed: {reason}"),
            ClassifyFailure::Cancelled => "Request cancelled before completion".to_string(),
            ClassifyFailure::Internal(reason) => format!("Internal error: {reason}"),
        }
    }
}

/// A submitted sequence whose label has not yet been delivered.
#[derive(Debug)]
pub struct PendingRequest {
    pub id: RequestId,
    pub sequence: String,
    /// Cached character count, the cost key for batch composition
    pub length: usize,
    pub arrived_at: Instant,
    pub completion: CompletionSender,
}

impl PendingRequest {
    pub fn new(id: RequestId, sequence: String, completion: CompletionSender) -> Self {
        let length = sequence.chars().count();
        Self {
            id,
            sequence,
            length,
            arrived_at: Instant::now(),
            completion,
        }
    }
}

/// One slot of an outbound batch. The sequence is cloned out of the registry
/// so the record itself stays put until fan-out.
#[derive(Debug, Clone)]
pub struct BatchMember {
    pub id: RequestId,
    pub sequence: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::oneshot;

    #[test]
    fn test_pending_request_caches_char_count() {
        let (completion, _receiver) = oneshot::channel();
        let record = PendingRequest::new(7, "héllo".to_string(), completion);

        assert_eq!(record.id, 7);
        assert_eq!(record.length, 5); // chars, not bytes
    }

    #[test]
    fn test_backend_request_wire_shape() {
        let request = BackendRequest {
            sequences: vec!["fn main() {}".to_string(), "hello".to_string()],
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, json!({"sequences": ["fn main() {}", "hello"]}));
    }

    #[test]
    fn test_backend_response_wire_shape() {
        let value = json!({"results": ["code", "not code"]});
        let response: BackendResponse = serde_json::from_value(value).unwrap();

        assert_eq!(response.results, vec!["code", "not code"]);
    }

    #[test]
    fn test_classify_response_wire_shape() {
        let response = ClassifyResponse {
            result: "code".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"result": "code"})
        );
    }

    #[test]
    fn test_error_response_uses_detail_field() {
        let error = ErrorResponse {
            detail: "boom".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"detail": "boom"})
        );
    }

    #[test]
    fn test_failure_messages() {
        assert!(
            ClassifyFailure::Transport("connection refused".to_string())
                .message()
                .contains("connection refused")
        );
        assert_eq!(
            ClassifyFailure::Cancelled.status(),
            Status::InternalServerError
        );
    }
}
