use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::Stream;
use http::header;
use serde_json::json;
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use sui_agent::chat::{ChatChunk, ChatRequest};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

// Server-sent events, one event per chat chunk
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        let body = axum::body::Body::from_stream(self);

        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            body,
        )
            .into_response()
    }
}

fn format_chunk(chunk: ChatChunk) -> String {
    format!("data: {}\n\n", json!({ "content": chunk.content() }))
}

/// Send each chunk as an event until done or the receiver is gone.
/// Returns the number of events delivered.
async fn forward_chunks<I>(chunks: I, tx: mpsc::Sender<String>) -> usize
where
    I: Iterator<Item = ChatChunk>,
{
    let mut sent = 0;
    for chunk in chunks {
        if let Err(e) = tx.send(format_chunk(chunk)).await {
            tracing::warn!("Client went away, stopping chat stream: {}", e);
            break;
        }
        sent += 1;
    }
    sent
}

async fn handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<SseResponse, ApiError> {
    let reply = state.chat.chat(request).await.map_err(|e| {
        tracing::error!("Chat failed: {:?}", e);
        ApiError::unknown(format!("Chat failed: {}", e))
    })?;

    // Create channel for streaming
    let (tx, rx) = mpsc::channel(100);

    tokio::spawn(forward_chunks(reply.into_chunks(), tx));

    Ok(SseResponse::new(ReceiverStream::new(rx)))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::state_with_replies;
    use axum::{body::Body, http::Request, http::StatusCode};
    use http_body_util::BodyExt;
    use futures::StreamExt;
    use serde_json::Value;
    use sui_agent::chat::STREAM_END;
    use sui_agent::errors::AgentError;
    use sui_agent::models::message::Message;
    use tower::ServiceExt;

    fn chat_request(message: &str) -> Request<Body> {
        Request::builder()
            .uri("/chat")
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "message": message }).to_string()))
            .unwrap()
    }

    async fn events(response: Response) -> Vec<String> {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        text.split("\n\n")
            .filter(|event| !event.is_empty())
            .map(|event| {
                let data = event.strip_prefix("data: ").unwrap();
                let value: Value = serde_json::from_str(data).unwrap();
                value["content"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_chat_streams_characters() {
        let state = state_with_replies(vec![Ok(vec![Message::assistant().with_text("a\nb")])]);
        let app = routes(state);

        let response = app.oneshot(chat_request("hi")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );

        let contents = events(response).await;
        assert_eq!(contents, vec!["a", "\n", "b", STREAM_END]);
    }

    #[tokio::test]
    async fn test_chat_failure_returns_unknown_error() {
        let state = state_with_replies(vec![Err(AgentError::Internal("quota exceeded".into()))]);
        let app = routes(state);

        let response = app.oneshot(chat_request("hi")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "unknown");
        assert_eq!(
            body["message"],
            "Chat failed: Internal error: quota exceeded"
        );
        assert!(!String::from_utf8_lossy(&bytes).contains(STREAM_END));
    }

    fn long_reply(len: usize) -> impl Iterator<Item = ChatChunk> {
        std::iter::repeat('x')
            .take(len)
            .map(ChatChunk::Char)
            .chain(std::iter::once(ChatChunk::End))
    }

    #[tokio::test]
    async fn test_stream_stops_when_client_disconnects() {
        let (tx, mut rx) = mpsc::channel(1);
        let producer = tokio::spawn(forward_chunks(long_reply(10_000), tx));

        assert_eq!(rx.recv().await.unwrap(), format_chunk(ChatChunk::Char('x')));
        drop(rx);

        let sent = tokio::time::timeout(std::time::Duration::from_secs(5), producer)
            .await
            .expect("producer should stop once the receiver is gone")
            .unwrap();
        assert!(sent < 10, "sent {} events after disconnect", sent);
    }

    #[tokio::test]
    async fn test_stream_delivers_everything_to_a_connected_client() {
        let (tx, rx) = mpsc::channel(1);
        let producer = tokio::spawn(forward_chunks(long_reply(500), tx));

        let events: Vec<String> = ReceiverStream::new(rx).collect().await;
        assert_eq!(producer.await.unwrap(), 501);
        assert_eq!(events.len(), 501);
        assert_eq!(events.last().unwrap(), &format_chunk(ChatChunk::End));
    }

    #[tokio::test]
    async fn test_dropping_the_body_mid_stream() {
        let reply = "y".repeat(5_000);
        let state = state_with_replies(vec![Ok(vec![Message::assistant().with_text(reply)])]);
        let app = routes(state);

        let response = app.oneshot(chat_request("hi")).await.unwrap();
        let mut body = response.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        let data = frame.into_data().unwrap();
        assert!(String::from_utf8_lossy(&data).starts_with("data: {\"content\":\"y\"}"));
        drop(body);
    }

    #[test]
    fn test_format_chunk() {
        assert_eq!(
            format_chunk(ChatChunk::Char('"')),
            "data: {\"content\":\"\\\"\"}\n\n"
        );
        assert_eq!(
            format_chunk(ChatChunk::End),
            "data: {\"content\":\"[STREAM_END]\"}\n\n"
        );
    }
}
