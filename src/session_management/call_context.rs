//! Request/reply contract between a client connection and its session.
//!
//! Frames are JSON objects keyed by a client-chosen `id`. Each call gets exactly one
//! terminal reply (`result` or `error`), optionally preceded by `progress` frames.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Method {
    Start { image_id: String },
    Destroy,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CallRequest {
    pub id: u64,
    #[serde(flatten)]
    pub method: Method,
}

impl CallRequest {
    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Validating,
    Launching,
    AwaitingContainer,
    RotatingCredential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReady {
    pub session_id: Uuid,
    pub tunnel_port: u16,
    pub credential: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StartError {
    NotEntitled,
    ImageNotFound,
    ContainerConflict,
    CredentialRotationFailed,
    LaunchFailed,
    AlreadyStarted,
    BadRequest,
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyBody {
    Progress(Phase),
    Result(Option<SessionReady>),
    Error(StartError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallReply {
    pub id: u64,
    #[serde(flatten)]
    pub body: ReplyBody,
}

impl CallReply {
    pub fn error(id: u64, error: StartError) -> Self {
        Self {
            id,
            body: ReplyBody::Error(error),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.body, ReplyBody::Progress(_))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub type CallOutcome = Result<Option<SessionReady>, StartError>;

/// Reply handle of one in-flight call.
///
/// [`finish`](Self::finish) consumes the context, so a call can't be answered twice.
/// Replies to a connection that has gone away are dropped with a debug line.
#[derive(Debug)]
pub struct CallContext {
    call_id: u64,
    replies: mpsc::Sender<CallReply>,
}

impl CallContext {
    pub fn new(call_id: u64, replies: mpsc::Sender<CallReply>) -> Self {
        Self { call_id, replies }
    }

    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    pub fn is_closed(&self) -> bool {
        self.replies.is_closed()
    }

    pub async fn progress(&self, phase: Phase) {
        self.send(ReplyBody::Progress(phase)).await;
    }

    pub async fn finish(self, outcome: CallOutcome) {
        let body = match outcome {
            Ok(ready) => ReplyBody::Result(ready),
            Err(error) => {
                warn!("Call {} failed: {}", self.call_id, error);
                ReplyBody::Error(error)
            }
        };
        self.send(body).await;
    }

    async fn send(&self, body: ReplyBody) {
        let reply = CallReply {
            id: self.call_id,
            body,
        };
        if self.replies.send(reply).await.is_err() {
            debug!("Connection gone, reply to call {} skipped", self.call_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_requests() {
        let start = CallRequest::parse(r#"{"id": 1, "method": "start", "image_id": "img1"}"#).unwrap();
        assert_eq!(
            start,
            CallRequest {
                id: 1,
                method: Method::Start {
                    image_id: "img1".to_string()
                }
            }
        );

        let destroy = CallRequest::parse(r#"{"id": 2, "method": "destroy"}"#).unwrap();
        assert_eq!(destroy.method, Method::Destroy);

        assert!(CallRequest::parse(r#"{"id": 3, "method": "reboot"}"#).is_err());
        assert!(CallRequest::parse(r#"{"id": 4, "method": "start"}"#).is_err());
        assert!(CallRequest::parse("not json").is_err());
    }

    #[test]
    fn test_reply_shapes() {
        let progress = CallReply {
            id: 1,
            body: ReplyBody::Progress(Phase::AwaitingContainer),
        };
        assert_eq!(
            serde_json::to_value(&progress).unwrap(),
            json!({"id": 1, "progress": "awaiting_container"})
        );
        assert!(!progress.is_terminal());

        let session_id = Uuid::new_v4();
        let ready = CallReply {
            id: 1,
            body: ReplyBody::Result(Some(SessionReady {
                session_id,
                tunnel_port: 6080,
                credential: "abcdefgh".to_string(),
            })),
        };
        assert_eq!(
            serde_json::to_value(&ready).unwrap(),
            json!({"id": 1, "result": {
                "session_id": session_id.to_string(),
                "tunnel_port": 6080,
                "credential": "abcdefgh"
            }})
        );

        let error = CallReply::error(7, StartError::ImageNotFound);
        assert_eq!(error.to_json().unwrap(), r#"{"id":7,"error":"ImageNotFound"}"#);
        assert!(error.is_terminal());

        let ack = CallReply {
            id: 2,
            body: ReplyBody::Result(None),
        };
        assert_eq!(serde_json::to_value(&ack).unwrap(), json!({"id": 2, "result": null}));
    }

    #[tokio::test]
    async fn test_context_sends_progress_then_result() {
        let (tx, mut rx) = mpsc::channel(4);
        let context = CallContext::new(9, tx);

        context.progress(Phase::Launching).await;
        context.finish(Err(StartError::NotEntitled)).await;

        assert_eq!(rx.recv().await.unwrap().body, ReplyBody::Progress(Phase::Launching));
        assert_eq!(rx.recv().await.unwrap(), CallReply::error(9, StartError::NotEntitled));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_finish_on_closed_connection() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let context = CallContext::new(1, tx);

        assert!(context.is_closed());
        context.finish(Ok(None)).await;
    }
}
