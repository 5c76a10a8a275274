use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use chat_api::{
    ApiResponse, AttemptFailure, ChatApiClient, ChatApiError, ChatRequest, ClientConfig, DeepSeek,
    HttpMethod, RequestOptions, SendOptions,
};
use conversation::Message;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration, Instant};

#[derive(Clone)]
struct ResponseChunk {
    delay_ms: u64,
    bytes: Vec<u8>,
}

#[derive(Clone)]
enum ScriptedResponse {
    Respond {
        status: u16,
        content_type: &'static str,
        chunks: Vec<ResponseChunk>,
    },
    Reset,
}

#[derive(Debug, Clone)]
struct RecordedRequest {
    head: String,
    body: Vec<u8>,
}

impl RecordedRequest {
    fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }

    fn json_body(&self) -> Value {
        serde_json::from_slice(&self.body).expect("request body should be JSON")
    }
}

struct ScriptedServer {
    base_url: String,
    request_count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    async fn new(scripts: Vec<ScriptedResponse>) -> Self {
        let scripts = Arc::new(scripts);
        let request_count = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("local TCP listener should bind");
        let addr = listener
            .local_addr()
            .expect("resolved local listener address");
        let base_url = format!("http://{addr}/v1");

        let handle = tokio::spawn({
            let scripts = Arc::clone(&scripts);
            let request_count = Arc::clone(&request_count);
            let requests = Arc::clone(&requests);

            async move {
                loop {
                    let (socket, _) = match listener.accept().await {
                        Ok(pair) => pair,
                        Err(_) => break,
                    };
                    let scripts = Arc::clone(&scripts);
                    let request_count = Arc::clone(&request_count);
                    let requests = Arc::clone(&requests);
                    tokio::spawn(async move {
                        serve_one(socket, scripts, request_count, requests).await;
                    });
                }
            }
        });

        Self {
            base_url,
            request_count,
            requests,
            handle,
        }
    }

    fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Acquire)
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("request log").clone()
    }

    fn shutdown(&self) {
        self.handle.abort();
    }
}

fn response_json(status: u16, body: &str) -> ScriptedResponse {
    ScriptedResponse::Respond {
        status,
        content_type: "application/json",
        chunks: vec![ResponseChunk {
            delay_ms: 0,
            bytes: body.as_bytes().to_vec(),
        }],
    }
}

fn response_sse(frames: &[&str]) -> ScriptedResponse {
    ScriptedResponse::Respond {
        status: 200,
        content_type: "text/event-stream",
        chunks: vec![ResponseChunk {
            delay_ms: 0,
            bytes: sse_frames(frames),
        }],
    }
}

fn sse_frames(frames: &[&str]) -> Vec<u8> {
    let mut body = String::new();
    for frame in frames {
        body.push_str("data: ");
        body.push_str(frame);
        body.push_str("\n\n");
    }
    body.into_bytes()
}

fn delta(text: &str) -> String {
    json!({"choices": [{"delta": {"content": text}}]}).to_string()
}

fn reply(text: &str) -> String {
    json!({"choices": [{"message": {"role": "assistant", "content": text}}]}).to_string()
}

fn client_for(server: &ScriptedServer, max_retries: u32) -> ChatApiClient {
    let config = ClientConfig::for_vendor(&DeepSeek, "sk-test")
        .with_base_url(&server.base_url)
        .with_max_retries(max_retries)
        .with_retry_delay(Duration::from_millis(10))
        .with_timeout(Duration::from_secs(5));
    ChatApiClient::new(config, Arc::new(DeepSeek)).expect("client")
}

fn hello_request() -> ChatRequest {
    ChatRequest::new(
        RequestOptions::new("deepseek-chat").with_temperature(0.7),
        vec![Message::user("hello")],
    )
}

#[tokio::test]
async fn complete_sends_vendor_payload_and_returns_reply() {
    let server = ScriptedServer::new(vec![response_json(200, &reply("hi there"))]).await;
    let client = client_for(&server, 3);

    let text = client
        .complete(&hello_request(), None)
        .await
        .expect("completion should succeed");
    assert_eq!(text, "hi there");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.request_line(), "POST /v1/chat/completions HTTP/1.1");
    assert_eq!(request.header("authorization").as_deref(), Some("Bearer sk-test"));
    assert_eq!(
        request.header("content-type").as_deref(),
        Some("application/json")
    );
    let body = request.json_body();
    assert_eq!(body["model"], "deepseek-chat");
    assert_eq!(body["stream"], false);
    assert_eq!(body["messages"], json!([{"role": "user", "content": "hello"}]));

    server.shutdown();
}

#[tokio::test]
async fn each_retryable_status_is_retried_until_success() {
    for status in [429, 500, 502, 503, 504] {
        let server = ScriptedServer::new(vec![
            response_json(status, r#"{"error":{"message":"busy"}}"#),
            response_json(200, r#"{"ok":true}"#),
        ])
        .await;
        let client = client_for(&server, 3);

        let response = client
            .send(HttpMethod::Post, "/chat/completions", Some(&json!({})), &SendOptions::json(), None)
            .await
            .unwrap_or_else(|error| panic!("{status} should be retried: {error}"));

        assert_eq!(response.into_json(), Some(json!({"ok": true})));
        assert_eq!(server.request_count(), 2, "status {status}");
        server.shutdown();
    }
}

#[tokio::test]
async fn fatal_status_fails_after_single_attempt() {
    let server = ScriptedServer::new(vec![
        response_json(401, r#"{"error":{"message":"Authentication Fails","code":"invalid_api_key"}}"#),
        response_json(200, r#"{"ok":true}"#),
    ])
    .await;
    let client = client_for(&server, 3);

    let error = client
        .send(HttpMethod::Get, "/models", None, &SendOptions::json(), None)
        .await
        .expect_err("401 must not be retried");

    assert!(matches!(error, ChatApiError::Fatal { status: 401, .. }));
    assert!(error.to_string().contains("Authentication Fails (invalid_api_key)"));
    assert_eq!(server.request_count(), 1);
    server.shutdown();
}

#[tokio::test]
async fn retryable_status_exhausts_attempts_and_reports_last_status() {
    let server = ScriptedServer::new(vec![
        response_json(503, "first"),
        response_json(503, "second"),
        response_json(503, "third"),
    ])
    .await;
    let client = client_for(&server, 3);

    let error = client
        .send(HttpMethod::Post, "/chat/completions", Some(&json!({})), &SendOptions::json(), None)
        .await
        .expect_err("all attempts fail");

    match error {
        ChatApiError::ExhaustedRetries {
            attempts,
            last_failure: AttemptFailure::Status { status, body },
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(status, 503);
            assert_eq!(body, "third");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(server.request_count(), 3);
    server.shutdown();
}

#[tokio::test]
async fn backoff_doubles_between_attempts() {
    let server = ScriptedServer::new(vec![
        response_json(500, ""),
        response_json(500, ""),
        response_json(200, r#"{"ok":true}"#),
    ])
    .await;
    let config = ClientConfig::for_vendor(&DeepSeek, "sk-test")
        .with_base_url(&server.base_url)
        .with_max_retries(3)
        .with_retry_delay(Duration::from_millis(100));
    let client = ChatApiClient::new(config, Arc::new(DeepSeek)).expect("client");

    let started = Instant::now();
    client
        .send(HttpMethod::Get, "/models", None, &SendOptions::json(), None)
        .await
        .expect("third attempt succeeds");

    // 100ms after the first failure, 200ms after the second.
    assert!(started.elapsed() >= Duration::from_millis(300));
    server.shutdown();
}

#[tokio::test]
async fn dropped_connections_surface_as_no_response() {
    let server = ScriptedServer::new(vec![ScriptedResponse::Reset, ScriptedResponse::Reset]).await;
    let client = client_for(&server, 2);

    let error = timeout(
        Duration::from_secs(10),
        client.send(HttpMethod::Get, "/models", None, &SendOptions::json(), None),
    )
    .await
    .expect("retry path should be bounded")
    .expect_err("resets exhaust retries");

    assert!(matches!(
        error,
        ChatApiError::ExhaustedRetries {
            attempts: 2,
            last_failure: AttemptFailure::Transport(_),
        }
    ));
    assert_eq!(error.status(), None);
    assert_eq!(server.request_count(), 2);
    server.shutdown();
}

#[tokio::test]
async fn non_json_success_body_is_wrapped_as_text() {
    let server = ScriptedServer::new(vec![response_json(200, "pong")]).await;
    let client = client_for(&server, 1);

    let response = client
        .send(HttpMethod::Get, "/ping", None, &SendOptions::json(), None)
        .await
        .expect("success");

    assert_eq!(response.into_json(), Some(json!({"text": "pong"})));
    server.shutdown();
}

#[tokio::test]
async fn caller_headers_override_defaults_but_not_auth() {
    let server = ScriptedServer::new(vec![response_json(200, "{}")]).await;
    let client = client_for(&server, 1);
    let options = SendOptions::json()
        .with_header("Content-Type", "text/plain")
        .with_header("Authorization", "Bearer stolen")
        .with_header("X-Trace", "abc");

    client
        .send(HttpMethod::Put, "/echo", Some(&json!({"a": 1})), &options, None)
        .await
        .expect("success");

    let request = &server.requests()[0];
    assert!(request.request_line().starts_with("PUT /v1/echo "));
    assert_eq!(request.header("content-type").as_deref(), Some("text/plain"));
    assert_eq!(request.header("authorization").as_deref(), Some("Bearer sk-test"));
    assert_eq!(request.header("x-trace").as_deref(), Some("abc"));
    server.shutdown();
}

#[tokio::test]
async fn empty_prefix_sends_bare_key_in_custom_header() {
    let server = ScriptedServer::new(vec![response_json(200, "{}")]).await;
    let config = ClientConfig::new(&server.base_url, "raw-key").with_key_header("X-Api-Key", "");
    let client = ChatApiClient::new(config, Arc::new(DeepSeek)).expect("client");

    client
        .send(HttpMethod::Delete, "/item", None, &SendOptions::json(), None)
        .await
        .expect("success");

    let request = &server.requests()[0];
    assert_eq!(request.header("x-api-key").as_deref(), Some("raw-key"));
    assert_eq!(request.header("authorization"), None);
    server.shutdown();
}

#[tokio::test]
async fn streaming_completion_yields_fragments_in_order() {
    let first = delta("Hel");
    let second = delta("lo");
    let server = ScriptedServer::new(vec![response_sse(&[&first, "{broken", &second, "[DONE]"])]).await;
    let client = client_for(&server, 1);

    let mut stream = client
        .stream_completion(&hello_request(), None)
        .await
        .expect("stream opens");

    let mut fragments = Vec::new();
    while let Some(chunk) = stream.next_chunk(None).await.expect("decode") {
        fragments.push(chunk.delta_content);
    }
    assert_eq!(fragments, vec!["Hel".to_string(), "lo".to_string()]);
    assert_eq!(stream.skipped_chunks(), 1);

    let request = &server.requests()[0];
    assert_eq!(request.header("accept").as_deref(), Some("text/event-stream"));
    assert_eq!(request.json_body()["stream"], true);
    server.shutdown();
}

#[tokio::test]
async fn send_with_stream_option_returns_unread_stream() {
    let body = delta("x");
    let server = ScriptedServer::new(vec![response_sse(&[&body])]).await;
    let client = client_for(&server, 1);

    let response = client
        .send(
            HttpMethod::Post,
            "/chat/completions",
            Some(&json!({"stream": true})),
            &SendOptions::streaming(),
            None,
        )
        .await
        .expect("stream opens");

    let ApiResponse::Stream(stream) = response else {
        panic!("expected a stream");
    };
    assert_eq!(stream.collect_text(None).await.expect("collect"), "x");
    server.shutdown();
}

#[tokio::test]
async fn cancellation_during_stream_stops_reading() {
    let first = delta("stream");
    let late = delta("late");
    let server = ScriptedServer::new(vec![ScriptedResponse::Respond {
        status: 200,
        content_type: "text/event-stream",
        chunks: vec![
            ResponseChunk {
                delay_ms: 0,
                bytes: sse_frames(&[&first]),
            },
            ResponseChunk {
                delay_ms: 400,
                bytes: sse_frames(&[&late, "[DONE]"]),
            },
        ],
    }])
    .await;
    let client = Arc::new(client_for(&server, 1));
    let cancel = Arc::new(AtomicBool::new(false));

    let task = tokio::spawn({
        let client = Arc::clone(&client);
        let cancel = Arc::clone(&cancel);
        async move {
            let stream = match client
                .stream_completion(&hello_request(), Some(&cancel))
                .await
            {
                Ok(stream) => stream,
                Err(error) => return Err(error),
            };
            let mut seen = Vec::new();
            let result = stream
                .for_each_chunk(Some(&cancel), |chunk| seen.push(chunk.delta_content))
                .await;
            result.map(|()| seen)
        }
    });

    sleep(Duration::from_millis(150)).await;
    cancel.store(true, Ordering::Release);

    let error = timeout(Duration::from_secs(5), task)
        .await
        .expect("stream task should resolve")
        .expect("join handle should resolve")
        .expect_err("cancellation should abort the stream");
    assert!(matches!(error, ChatApiError::Cancelled));
    server.shutdown();
}

#[tokio::test]
async fn slow_stream_outlives_timeout_while_frames_keep_arriving() {
    let mut chunks = Vec::new();
    for index in 0..6 {
        chunks.push(ResponseChunk {
            delay_ms: 150,
            bytes: sse_frames(&[&delta(&index.to_string())]),
        });
    }
    chunks.push(ResponseChunk {
        delay_ms: 0,
        bytes: sse_frames(&["[DONE]"]),
    });
    let server = ScriptedServer::new(vec![ScriptedResponse::Respond {
        status: 200,
        content_type: "text/event-stream",
        chunks,
    }])
    .await;
    let config = ClientConfig::for_vendor(&DeepSeek, "sk-test")
        .with_base_url(&server.base_url)
        .with_max_retries(1)
        .with_timeout(Duration::from_millis(500));
    let client = ChatApiClient::new(config, Arc::new(DeepSeek)).expect("client");

    let started = Instant::now();
    let text = client
        .stream_completion(&hello_request(), None)
        .await
        .expect("stream opens")
        .collect_text(None)
        .await
        .expect("stream should not be cut off by the per-read timeout");

    assert_eq!(text, "012345");
    assert!(started.elapsed() >= Duration::from_millis(500));
    server.shutdown();
}

#[tokio::test]
async fn stalled_non_streaming_reply_times_out() {
    let server = ScriptedServer::new(vec![ScriptedResponse::Respond {
        status: 200,
        content_type: "application/json",
        chunks: vec![ResponseChunk {
            delay_ms: 800,
            bytes: reply("late").into_bytes(),
        }],
    }])
    .await;
    let config = ClientConfig::for_vendor(&DeepSeek, "sk-test")
        .with_base_url(&server.base_url)
        .with_max_retries(1)
        .with_timeout(Duration::from_millis(200));
    let client = ChatApiClient::new(config, Arc::new(DeepSeek)).expect("client");

    let error = client
        .complete(&hello_request(), None)
        .await
        .expect_err("stalled body should time out");
    assert!(matches!(
        error,
        ChatApiError::ExhaustedRetries {
            attempts: 1,
            last_failure: AttemptFailure::Transport(_),
        }
    ));
    server.shutdown();
}

#[tokio::test]
async fn cancellation_interrupts_backoff_sleep() {
    let server = ScriptedServer::new(vec![response_json(503, ""), response_json(200, "{}")]).await;
    let config = ClientConfig::for_vendor(&DeepSeek, "sk-test")
        .with_base_url(&server.base_url)
        .with_retry_delay(Duration::from_secs(30));
    let client = Arc::new(ChatApiClient::new(config, Arc::new(DeepSeek)).expect("client"));
    let cancel = Arc::new(AtomicBool::new(false));

    let task = tokio::spawn({
        let client = Arc::clone(&client);
        let cancel = Arc::clone(&cancel);
        async move {
            client
                .send(HttpMethod::Get, "/models", None, &SendOptions::json(), Some(&cancel))
                .await
                .map(|_| ())
        }
    });

    sleep(Duration::from_millis(200)).await;
    cancel.store(true, Ordering::Release);

    let error = timeout(Duration::from_secs(5), task)
        .await
        .expect("cancel should cut the 30s backoff short")
        .expect("join handle should resolve")
        .expect_err("cancelled");
    assert!(matches!(error, ChatApiError::Cancelled));
    assert_eq!(server.request_count(), 1);
    server.shutdown();
}

#[tokio::test]
async fn already_cancelled_call_makes_no_request() {
    let server = ScriptedServer::new(vec![response_json(200, "{}")]).await;
    let client = client_for(&server, 3);
    let cancel = Arc::new(AtomicBool::new(true));

    let error = client
        .list_models(Some(&cancel))
        .await
        .expect_err("cancelled before first attempt");
    assert!(matches!(error, ChatApiError::Cancelled));
    assert_eq!(server.request_count(), 0);
    server.shutdown();
}

#[tokio::test]
async fn list_models_issues_get() {
    let server = ScriptedServer::new(vec![response_json(
        200,
        r#"{"object":"list","data":[{"id":"deepseek-chat"}]}"#,
    )])
    .await;
    let client = client_for(&server, 1);

    let models = client.list_models(None).await.expect("models");
    assert_eq!(models["data"][0]["id"], "deepseek-chat");
    assert_eq!(server.requests()[0].request_line(), "GET /v1/models HTTP/1.1");
    server.shutdown();
}

#[tokio::test]
async fn missing_reply_is_reported() {
    let server = ScriptedServer::new(vec![response_json(200, r#"{"choices":[]}"#)]).await;
    let client = client_for(&server, 1);

    let error = client
        .complete(&hello_request(), None)
        .await
        .expect_err("no choices");
    assert!(matches!(error, ChatApiError::MissingReply(_)));
    server.shutdown();
}

#[test]
fn zero_attempt_config_is_rejected() {
    let config = ClientConfig::for_vendor(&DeepSeek, "k").with_max_retries(0);
    assert!(matches!(
        ChatApiClient::new(config, Arc::new(DeepSeek)),
        Err(ChatApiError::InvalidConfig(_))
    ));
}

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        401 => "Unauthorized",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Error",
    }
}

async fn serve_one(
    mut socket: TcpStream,
    scripts: Arc<Vec<ScriptedResponse>>,
    request_count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) {
    let Ok(request) = read_request(&mut socket).await else {
        return;
    };

    let index = request_count.fetch_add(1, Ordering::AcqRel);
    requests.lock().expect("request log").push(request);
    let response = scripts
        .get(index)
        .cloned()
        .unwrap_or_else(|| response_json(500, r#"{"error":"unexpected request"}"#));

    match response {
        ScriptedResponse::Reset => {}
        ScriptedResponse::Respond {
            status,
            content_type,
            chunks,
        } => {
            let headers = format!(
                "HTTP/1.1 {status} {}\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
                status_reason(status),
                content_type,
            );

            if socket.write_all(headers.as_bytes()).await.is_err() {
                return;
            }

            for chunk in chunks {
                if chunk.delay_ms > 0 {
                    sleep(Duration::from_millis(chunk.delay_ms)).await;
                }
                if chunk.bytes.is_empty() {
                    continue;
                }
                let prefix = format!("{:X}\r\n", chunk.bytes.len());
                if socket.write_all(prefix.as_bytes()).await.is_err() {
                    return;
                }
                if socket.write_all(&chunk.bytes).await.is_err() {
                    return;
                }
                if socket.write_all(b"\r\n").await.is_err() {
                    return;
                }
            }

            let _ = socket.write_all(b"0\r\n\r\n").await;
            let _ = socket.shutdown().await;
        }
    }
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<RecordedRequest> {
    let mut raw = Vec::new();
    let mut buffer = [0_u8; 2048];

    let header_end = loop {
        if let Some(position) = raw.windows(4).position(|window| window == b"\r\n\r\n") {
            break position + 4;
        }
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        raw.extend_from_slice(&buffer[..n]);
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).into_owned();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    let mut body = raw[header_end..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buffer[..n]);
    }

    Ok(RecordedRequest { head, body })
}
