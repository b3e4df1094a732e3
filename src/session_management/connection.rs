use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::mpsc;

use super::call_context::{CallContext, CallReply, CallRequest, Method, StartError};
use super::session_controller::SessionController;

/// Dispatches the frames of one client connection to its session.
///
/// Returns once the frame stream ends, after the session has been destroyed and any
/// pending rotation has delivered its reply.
pub async fn serve_connection(
    mut controller: SessionController,
    mut frames: mpsc::Receiver<String>,
    replies: mpsc::Sender<CallReply>,
) {
    while let Some(frame) = frames.recv().await {
        let request = match CallRequest::parse(&frame) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejecting malformed frame: {}", e);
                let reply = CallReply::error(call_id_of(&frame), StartError::BadRequest);
                if replies.send(reply).await.is_err() {
                    break;
                }
                continue;
            }
        };

        debug!("Call {}: {:?}", request.id, request.method);
        let context = CallContext::new(request.id, replies.clone());
        match request.method {
            Method::Start { image_id } => controller.start(&image_id, context).await,
            Method::Destroy => {
                controller.destroy().await;
                context.finish(Ok(None)).await;
            }
        }
    }

    info!(
        "Connection for session {} closed",
        controller.session_id().await
    );
    controller.destroy().await;
    controller.settle().await;
}

/// Best-effort `id` of a frame that failed to parse as a call, 0 when there is none.
fn call_id_of(frame: &str) -> u64 {
    serde_json::from_str::<Value>(frame)
        .ok()
        .and_then(|value| value.get("id").and_then(Value::as_u64))
        .unwrap_or(0)
}
