//! Summary stream events and the SSE transport that produces them

use async_stream::stream;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest_eventsource::{Event, EventSource, retry::Never};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

use crate::error::{Error, Result};

/// Events decoded from the summary endpoint's `data:` lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SummaryStreamEvent {
    /// A piece of model output
    Chunk { content: String },
    /// The server reported a failure mid-stream
    Error { message: String },
    /// Generation finished; `output` is the server's own parse when present
    Done { output: Option<String> },
}

impl SummaryStreamEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SummaryStreamEvent::Done { .. } | SummaryStreamEvent::Error { .. }
        )
    }
}

/// A stream of summary events. Transport failures arrive as `Err`, server
/// reported failures as [`SummaryStreamEvent::Error`].
pub type SummaryEventStream = Pin<Box<dyn Stream<Item = Result<SummaryStreamEvent>> + Send>>;

/// Raw `data:` payload. The server mixes three shapes on one channel:
/// `{type:"chunk",content}`, `{error}` and `{done:true,output?}`.
#[derive(Debug, Deserialize)]
struct WirePayload {
    #[serde(rename = "type")]
    kind: Option<String>,
    content: Option<String>,
    error: Option<String>,
    #[serde(default)]
    done: bool,
    output: Option<String>,
}

/// Decode one `data:` payload. Returns `None` for malformed or unrecognised
/// payloads, which callers skip.
pub fn decode_event(data: &str) -> Option<SummaryStreamEvent> {
    let payload: WirePayload = match serde_json::from_str(data) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("Skipping malformed summary event: {}", e);
            return None;
        }
    };

    if let Some(message) = payload.error {
        return Some(SummaryStreamEvent::Error { message });
    }
    if payload.done {
        return Some(SummaryStreamEvent::Done {
            output: payload.output,
        });
    }
    match (payload.kind.as_deref(), payload.content) {
        (Some("chunk"), Some(content)) => Some(SummaryStreamEvent::Chunk { content }),
        _ => {
            tracing::debug!("Ignoring unrecognised summary event: {}", data);
            None
        }
    }
}

/// Error body shape used by the backend for JSON failures
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Pull the server-provided message out of a JSON error body
pub(crate) fn error_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    parsed
        .error
        .or(parsed.message)
        .filter(|m| !m.trim().is_empty())
}

/// Classify a failed response: JSON bodies become structured errors,
/// anything else a bare status.
pub(crate) async fn error_from_response(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));

    let message = if is_json {
        match response.text().await {
            Ok(body) => error_message(&body),
            Err(_) => None,
        }
    } else {
        None
    };

    if response_is_success(status) {
        // 2xx with the wrong content type (JSON instead of an event stream)
        return match message {
            Some(message) => Error::api(status, message),
            None => Error::UnexpectedResponse(format!("status {} without event stream", status)),
        };
    }
    Error::from_status(status, message)
}

fn response_is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Open the event source and wait for the connection to be established, so
/// that open failures are returned to the caller instead of being yielded as
/// stream items.
pub(crate) async fn open(request: reqwest::RequestBuilder) -> Result<SummaryEventStream> {
    let mut event_source = EventSource::new(request)
        .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;
    event_source.set_retry_policy(Box::new(Never));

    let mut pending = None;
    match event_source.next().await {
        Some(Ok(Event::Open)) => {}
        Some(Ok(Event::Message(msg))) => pending = Some(msg.data),
        Some(Err(e)) => {
            event_source.close();
            return Err(map_open_error(e).await);
        }
        None => {
            return Err(Error::Sse("stream closed before opening".to_string()));
        }
    }

    Ok(Box::pin(create_stream(event_source, pending)))
}

async fn map_open_error(error: reqwest_eventsource::Error) -> Error {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(_, response)
        | reqwest_eventsource::Error::InvalidContentType(_, response) => {
            error_from_response(response).await
        }
        other => map_transport_error(other),
    }
}

fn map_transport_error(error: reqwest_eventsource::Error) -> Error {
    match error {
        reqwest_eventsource::Error::Transport(e) => Error::Http(e),
        other => Error::Sse(other.to_string()),
    }
}

fn create_stream(
    mut event_source: EventSource,
    pending: Option<String>,
) -> impl Stream<Item = Result<SummaryStreamEvent>> {
    stream! {
        if let Some(event) = pending.as_deref().and_then(decode_event) {
            let terminal = event.is_terminal();
            yield Ok(event);
            if terminal {
                event_source.close();
                return;
            }
        }

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    let Some(event) = decode_event(&msg.data) else {
                        continue;
                    };
                    let terminal = event.is_terminal();
                    yield Ok(event);
                    if terminal {
                        break;
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    tracing::warn!("Summary stream failed: {}", e);
                    yield Err(map_transport_error(e));
                    break;
                }
            }
        }
        event_source.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Read one request (headers plus Content-Length body)
    async fn read_request(socket: &mut TcpStream) {
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request);
            if let Some(end) = text.find("\r\n\r\n") {
                let content_length = text[..end]
                    .lines()
                    .find_map(|line| {
                        line.to_ascii_lowercase()
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if request.len() >= end + 4 + content_length {
                    return;
                }
            }
        }
    }

    /// Answer a single request on a local port with `raw` bytes, then hang up
    async fn serve_once(raw: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let _ = socket.write_all(raw.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{}/summary", addr)
    }

    fn http_response(status: &str, content_type: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            content_type,
            body.len(),
            body
        )
    }

    async fn open_raw(raw: String) -> Result<SummaryEventStream> {
        let url = serve_once(raw).await;
        let request = reqwest::Client::new()
            .post(url)
            .json(&serde_json::json!({ "messages": ["Ada: hi"], "language": "en" }));
        open(request).await
    }

    async fn open_error(raw: String) -> Error {
        match open_raw(raw).await {
            Ok(_) => panic!("expected open to fail"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_decode_chunk() {
        let event = decode_event(r#"{"type":"chunk","content":"Hello"}"#);
        assert_eq!(
            event,
            Some(SummaryStreamEvent::Chunk {
                content: "Hello".into()
            })
        );
    }

    #[test]
    fn test_decode_error() {
        let event = decode_event(r#"{"error":"model offline"}"#);
        assert_eq!(
            event,
            Some(SummaryStreamEvent::Error {
                message: "model offline".into()
            })
        );
        assert!(event.unwrap().is_terminal());
    }

    #[test]
    fn test_decode_done_with_and_without_output() {
        assert_eq!(
            decode_event(r#"{"done":true,"output":"Final"}"#),
            Some(SummaryStreamEvent::Done {
                output: Some("Final".into())
            })
        );
        assert_eq!(
            decode_event(r#"{"done":true}"#),
            Some(SummaryStreamEvent::Done { output: None })
        );
    }

    #[test]
    fn test_decode_malformed_is_skipped() {
        assert_eq!(decode_event("{not json"), None);
        assert_eq!(decode_event(""), None);
    }

    #[test]
    fn test_decode_unrecognised_is_skipped() {
        assert_eq!(decode_event(r#"{"type":"ping"}"#), None);
        assert_eq!(decode_event(r#"{"type":"chunk"}"#), None);
        assert_eq!(decode_event(r#"{"done":false}"#), None);
    }

    #[test]
    fn test_error_message_prefers_error_field() {
        assert_eq!(
            error_message(r#"{"error":"LLM not configured","message":"other"}"#),
            Some("LLM not configured".into())
        );
        assert_eq!(
            error_message(r#"{"message":"bad language"}"#),
            Some("bad language".into())
        );
        assert_eq!(error_message(r#"{"error":"  "}"#), None);
        assert_eq!(error_message("<html>502</html>"), None);
    }

    #[tokio::test]
    async fn test_open_json_error_is_structured() {
        let err = open_error(http_response(
            "500 Internal Server Error",
            "application/json",
            r#"{"error":"LLM not configured"}"#,
        ))
        .await;
        assert!(
            matches!(err, Error::Api { status: 500, ref message } if message == "LLM not configured"),
            "got: {:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_open_non_json_error_is_bare_status() {
        let err = open_error(http_response(
            "502 Bad Gateway",
            "text/html",
            "<html>bad gateway</html>",
        ))
        .await;
        assert!(matches!(err, Error::Status(502)), "got: {:?}", err);
    }

    #[tokio::test]
    async fn test_open_rejected_credentials() {
        let err = open_error(http_response(
            "401 Unauthorized",
            "application/json",
            r#"{"message":"token expired"}"#,
        ))
        .await;
        assert!(err.is_unauthorized(), "got: {:?}", err);
    }

    #[tokio::test]
    async fn test_open_json_success_body_is_api_error() {
        let err = open_error(http_response(
            "200 OK",
            "application/json",
            r#"{"error":"quota exceeded"}"#,
        ))
        .await;
        assert!(
            matches!(err, Error::Api { status: 200, ref message } if message == "quota exceeded"),
            "got: {:?}",
            err
        );

        let err = open_error(http_response("200 OK", "application/json", "{}")).await;
        assert!(matches!(err, Error::UnexpectedResponse(_)), "got: {:?}", err);
    }

    #[tokio::test]
    async fn test_stream_skips_malformed_lines() {
        let body = "data: {\"type\":\"chunk\",\"content\":\"a\"}\n\n\
                    data: {not json\n\n\
                    data: {\"type\":\"chunk\",\"content\":\"b\"}\n\n\
                    data: {\"done\":true}\n\n";
        let stream = match open_raw(http_response("200 OK", "text/event-stream", body)).await {
            Ok(stream) => stream,
            Err(e) => panic!("open failed: {}", e),
        };

        let events: Vec<SummaryStreamEvent> = stream.map(|item| item.unwrap()).collect().await;
        assert_eq!(
            events,
            vec![
                SummaryStreamEvent::Chunk { content: "a".into() },
                SummaryStreamEvent::Chunk { content: "b".into() },
                SummaryStreamEvent::Done { output: None },
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_transport_failure_is_err() {
        let first = "data: {\"type\":\"chunk\",\"content\":\"a\"}\n\n";
        let raw = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\n\r\n\
             {:x}\r\n{}\r\n40\r\ndata: {{\"type\":\"chu",
            first.len(),
            first
        );
        let stream = match open_raw(raw).await {
            Ok(stream) => stream,
            Err(e) => panic!("open failed: {}", e),
        };

        let items: Vec<Result<SummaryStreamEvent>> = stream.collect().await;
        assert_eq!(items.len(), 2, "got: {:?}", items);
        assert!(matches!(
            &items[0],
            Ok(SummaryStreamEvent::Chunk { content }) if content == "a"
        ));
        assert!(matches!(&items[1], Err(Error::Http(_) | Error::Sse(_))));
    }
}
