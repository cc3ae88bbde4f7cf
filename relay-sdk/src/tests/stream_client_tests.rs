//! Tests for the retrying stream client
//!
//! A scripted transport covers the retry state machine attempt by attempt;
//! WireMock covers the HTTP transport end to end.

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::stream::{self, StreamExt};
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::error::{RelayError, Result};
    use crate::resilience::{BackoffPolicy, RecordingSleeper};
    use crate::session::{converse, ReducerState, Role, Session};
    use crate::tests::support::helpers::StalledSleeper;
    use crate::stream::{
        BodyLine, HttpStreamTransport, LineStream, MAX_LINE_LENGTH, StreamEvent, StreamPolicy, StreamRequest,
        StreamRetryClient, StreamTransport,
    };

    /// One line of a scripted body, or a failure in its place
    enum Step {
        Line(&'static str),
        Fail(fn() -> RelayError),
    }

    /// What one scripted attempt does
    enum Script {
        Refuse(fn() -> RelayError),
        Body(Vec<Step>),
        Hang,
    }

    struct ScriptedTransport {
        scripts: Mutex<VecDeque<Script>>,
        opened: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                opened: AtomicU32::new(0),
            })
        }

        fn opened(&self) -> u32 {
            self.opened.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StreamTransport for ScriptedTransport {
        async fn open(&self, _request: &StreamRequest) -> Result<LineStream> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().unwrap().pop_front();

            match script {
                Some(Script::Refuse(error)) => Err(error()),
                Some(Script::Body(steps)) => {
                    let items: Vec<Result<BodyLine>> = steps
                        .into_iter()
                        .map(|step| match step {
                            Step::Line(line) => Ok(BodyLine::from(line)),
                            Step::Fail(error) => Err(error()),
                        })
                        .collect();
                    Ok(stream::iter(items).boxed())
                }
                Some(Script::Hang) => Ok(stream::pending().boxed()),
                None => Err(RelayError::internal("no scripted attempt left")),
            }
        }

        fn endpoint(&self) -> &str {
            "http://agent.test/agents/agente_pdf/runs"
        }
    }

    fn rate_limited() -> RelayError {
        RelayError::rate_limit("HTTP 429: Too Many Requests")
    }

    fn connection_reset() -> RelayError {
        RelayError::network("connection reset by peer")
    }

    fn unavailable() -> RelayError {
        RelayError::http(503, "Service Unavailable")
    }

    fn client(transport: Arc<dyn StreamTransport>, sleeper: &RecordingSleeper) -> StreamRetryClient {
        StreamRetryClient::new(transport).with_sleeper(Arc::new(sleeper.clone()))
    }

    async fn collect(client: &StreamRetryClient, cancel: CancellationToken) -> Vec<StreamEvent> {
        client
            .stream(StreamRequest::new("Qual foi a receita do 2T25?"), cancel)
            .collect()
            .await
    }

    fn content(text: &str) -> StreamEvent {
        StreamEvent::RunContent {
            content: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_persistent_rate_limit() {
        let transport = ScriptedTransport::new(vec![
            Script::Refuse(rate_limited),
            Script::Refuse(rate_limited),
            Script::Refuse(rate_limited),
        ]);
        let sleeper = RecordingSleeper::new();
        let client = client(transport.clone(), &sleeper);

        let events = collect(&client, CancellationToken::new()).await;

        assert_eq!(events.len(), 3);
        for event in &events[..2] {
            match event {
                StreamEvent::Retry { delay, message } => {
                    assert_eq!(*delay, Some(Duration::from_secs(60)));
                    assert!(message.contains("60s"));
                }
                other => panic!("expected Retry, got {:?}", other),
            }
        }
        match &events[2] {
            StreamEvent::Error { message } => {
                assert!(message.contains("Rate limit"));
                assert!(message.contains("Gave up after 3 attempts"));
            }
            other => panic!("expected Error, got {:?}", other),
        }

        assert_eq!(transport.opened(), 3);
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_secs(60), Duration::from_secs(60)]
        );
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let transport = ScriptedTransport::new(vec![Script::Body(vec![
            Step::Line(r#"data: {"event":"ToolCallStarted","tool":{"tool_name":"search_knowledge_base","tool_args":{"query":"receita"}}}"#),
            Step::Line("data: {\"event\":\"RunContent\",\"content\":"),
            Step::Line(""),
            Step::Line(r#"data: {"event":"RunContent","content":"A receita "}"#),
            Step::Line("data: not json at all"),
            Step::Line(r#"data: {"event":"RunContent","content":"cresceu."}"#),
        ])]);
        let sleeper = RecordingSleeper::new();
        let client = client(transport.clone(), &sleeper);

        let events = collect(&client, CancellationToken::new()).await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].name(), "ToolCallStarted");
        assert_eq!(events[1], content("A receita "));
        assert_eq!(events[2], content("cresceu."));
        assert_eq!(transport.opened(), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_mid_stream_drop_restarts_request() {
        let transport = ScriptedTransport::new(vec![
            Script::Body(vec![
                Step::Line(r#"data: {"event":"RunContent","content":"parcial"}"#),
                Step::Fail(connection_reset),
            ]),
            Script::Body(vec![Step::Line(
                r#"data: {"event":"RunContent","content":"completo"}"#,
            )]),
        ]);
        let sleeper = RecordingSleeper::new();
        let client = client(transport.clone(), &sleeper);

        let events = collect(&client, CancellationToken::new()).await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], content("parcial"));
        assert!(matches!(
            events[1],
            StreamEvent::Retry {
                delay: Some(d),
                ..
            } if d == Duration::from_secs(2)
        ));
        assert_eq!(events[2], content("completo"));
        assert_eq!(transport.opened(), 2);
    }

    #[tokio::test]
    async fn test_server_error_is_terminal() {
        let transport = ScriptedTransport::new(vec![Script::Refuse(unavailable)]);
        let sleeper = RecordingSleeper::new();
        let client = client(transport.clone(), &sleeper);

        let events = collect(&client, CancellationToken::new()).await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Error { message } => {
                assert!(message.contains("HTTP error 503"));
                assert!(message.contains("http://agent.test/agents/agente_pdf/runs"));
            }
            other => panic!("expected Error, got {:?}", other),
        }
        assert_eq!(transport.opened(), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_in_band_error_ends_stream() {
        let transport = ScriptedTransport::new(vec![Script::Body(vec![
            Step::Line(r#"data: {"event":"RunContent","content":"Olá"}"#),
            Step::Line(r#"data: {"event":"Error","content":"model overloaded"}"#),
            Step::Line(r#"data: {"event":"RunContent","content":"never seen"}"#),
        ])]);
        let sleeper = RecordingSleeper::new();
        let client = client(transport.clone(), &sleeper);

        let events = collect(&client, CancellationToken::new()).await;

        assert_eq!(
            events,
            vec![
                content("Olá"),
                StreamEvent::Error {
                    message: "model overloaded".to_string()
                },
            ]
        );
        assert_eq!(transport.opened(), 1);
    }

    #[tokio::test]
    async fn test_idle_stream_times_out_per_attempt() {
        let transport = ScriptedTransport::new(vec![Script::Hang, Script::Hang]);
        let sleeper = RecordingSleeper::new();
        let client = client(transport.clone(), &sleeper).with_policy(StreamPolicy {
            backoff: BackoffPolicy::streaming(),
            max_attempts: 2,
            attempt_timeout: Duration::from_millis(50),
        });

        let events = collect(&client, CancellationToken::new()).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StreamEvent::Retry { .. }));
        match &events[1] {
            StreamEvent::Error { message } => assert!(message.starts_with("Timeout")),
            other => panic!("expected Error, got {:?}", other),
        }
        assert_eq!(transport.opened(), 2);
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_pending_read() {
        let transport = ScriptedTransport::new(vec![Script::Hang]);
        let sleeper = RecordingSleeper::new();
        let client = client(transport.clone(), &sleeper);

        let cancel = CancellationToken::new();
        let mut rx = client.open_stream(StreamRequest::new("olá"), cancel.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("cancellation was not observed");
        assert_eq!(
            event,
            Some(StreamEvent::Error {
                message: "Request cancelled".to_string()
            })
        );
        assert_eq!(rx.recv().await, None);
        assert_eq!(transport.opened(), 1);
    }

    #[tokio::test]
    async fn test_converse_keeps_only_the_final_attempt() {
        let transport = ScriptedTransport::new(vec![
            Script::Body(vec![
                Step::Line(r#"data: {"event":"ToolCallStarted","tool":{"tool_name":"search_knowledge_base","tool_args":{"query":"lucro"}}}"#),
                Step::Line(r#"data: {"event":"RunContent","content":"parcial"}"#),
                Step::Fail(connection_reset),
            ]),
            Script::Body(vec![
                Step::Line(r#"data: {"event":"RunContent","content":"O lucro "}"#),
                Step::Line(r#"data: {"event":"RunContent","content":"subiu."}"#),
            ]),
        ]);
        let sleeper = RecordingSleeper::new();
        let client = client(transport, &sleeper);

        let mut session = Session::new();
        let mut updates = 0;
        let state = converse(
            &client,
            &mut session,
            "Como foi o lucro?",
            CancellationToken::new(),
            |_, _| updates += 1,
        )
        .await;

        assert_eq!(state, ReducerState::Completed);
        assert_eq!(updates, 5);
        assert_eq!(session.len(), 2);
        assert_eq!(session.messages()[0].role, Role::User);

        let reply = session.last().unwrap();
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.content, "O lucro subiu.");
        assert!(reply.process.is_none());
    }

    fn sse_body(frames: &[&str]) -> String {
        frames
            .iter()
            .map(|frame| format!("data: {}\n\n", frame))
            .collect()
    }

    fn http_client(mock_server: &MockServer, sleeper: &RecordingSleeper) -> StreamRetryClient {
        let transport = HttpStreamTransport::new(
            format!("{}/agents/agente_pdf/runs", mock_server.uri()),
            Duration::from_secs(5),
        )
        .expect("Failed to build transport");
        client(Arc::new(transport), sleeper)
    }

    #[tokio::test]
    async fn test_http_stream_with_malformed_frames() {
        let mock_server = MockServer::start().await;

        let body = sse_body(&[
            r#"{"event":"RunStarted"}"#,
            r#"{"event":"RunContent","content":"Receita "}"#,
            r#"{"event":"RunContent","content""#,
            r#"{"event":"RunContent","content":"recorde"}"#,
        ]);

        Mock::given(method("POST"))
            .and(path("/agents/agente_pdf/runs"))
            .and(header("accept", "text/event-stream"))
            .and(body_string_contains("stream=true"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let sleeper = RecordingSleeper::new();
        let events = collect(&http_client(&mock_server, &sleeper), CancellationToken::new()).await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Other {
                    event: "RunStarted".to_string()
                },
                content("Receita "),
                content("recorde"),
            ]
        );
    }

    async fn serve_bytes(mock_server: &MockServer, body: Vec<u8>) {
        Mock::given(method("POST"))
            .and(path("/agents/agente_pdf/runs"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_bytes(body),
            )
            .expect(1)
            .mount(mock_server)
            .await;
    }

    #[tokio::test]
    async fn test_http_invalid_utf8_frame_is_dropped() {
        let mock_server = MockServer::start().await;

        let mut body = Vec::new();
        body.extend_from_slice(b"data: {\"event\":\"RunContent\",\"content\":\"a\"}\n\n");
        body.extend_from_slice(b"data: {\"event\":\"RunContent\",\"content\":\"\xff\xfe\"}\n\n");
        body.extend_from_slice(b"data: {\"event\":\"RunContent\",\"content\":\"b\"}\n\n");
        serve_bytes(&mock_server, body).await;

        let sleeper = RecordingSleeper::new();
        let events = collect(&http_client(&mock_server, &sleeper), CancellationToken::new()).await;

        assert_eq!(events, vec![content("a"), content("b")]);
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_http_overlong_frame_is_dropped() {
        let mock_server = MockServer::start().await;

        let filler = "x".repeat(MAX_LINE_LENGTH + 10);
        let body = format!(
            "data: {{\"event\":\"RunContent\",\"content\":\"a\"}}\n\n\
             data: {{\"event\":\"RunContent\",\"content\":\"{}\"}}\n\n\
             data: {{\"event\":\"RunContent\",\"content\":\"b\"}}\n\n",
            filler
        );
        serve_bytes(&mock_server, body.into_bytes()).await;

        let sleeper = RecordingSleeper::new();
        let events = collect(&http_client(&mock_server, &sleeper), CancellationToken::new()).await;

        assert_eq!(events, vec![content("a"), content("b")]);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let transport = ScriptedTransport::new(vec![Script::Refuse(connection_reset)]);
        let sleeper = StalledSleeper::new();
        let client = StreamRetryClient::new(transport.clone()).with_sleeper(Arc::new(sleeper.clone()));

        let cancel = CancellationToken::new();
        let mut rx = client.open_stream(StreamRequest::new("olá"), cancel.clone());

        assert!(matches!(rx.recv().await, Some(StreamEvent::Retry { .. })));
        sleeper.entered().await;
        cancel.cancel();

        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Error {
                message: "Request cancelled".to_string()
            })
        );
        assert_eq!(rx.recv().await, None);
        assert_eq!(transport.opened(), 1);
    }

    #[tokio::test]
    async fn test_http_rate_limit_then_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/agents/agente_pdf/runs"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
            .up_to_n_times(2)
            .expect(2)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/agents/agente_pdf/runs"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(sse_body(&[r#"{"event":"RunContent","content":"ok"}"#])),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let sleeper = RecordingSleeper::new();
        let events = collect(&http_client(&mock_server, &sleeper), CancellationToken::new()).await;

        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], StreamEvent::Retry { .. }));
        assert!(matches!(events[1], StreamEvent::Retry { .. }));
        assert_eq!(events[2], content("ok"));
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_secs(60), Duration::from_secs(60)]
        );
    }

    #[tokio::test]
    async fn test_http_persistent_rate_limit() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/agents/agente_pdf/runs"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&mock_server)
            .await;

        let sleeper = RecordingSleeper::new();
        let events = collect(&http_client(&mock_server, &sleeper), CancellationToken::new()).await;

        let names: Vec<_> = events.iter().map(|e| e.name().to_string()).collect();
        assert_eq!(names, vec!["Retry", "Retry", "Error"]);
    }

    #[tokio::test]
    async fn test_http_server_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/agents/agente_pdf/runs"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "detail": "agent crashed"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let sleeper = RecordingSleeper::new();
        let events = collect(&http_client(&mock_server, &sleeper), CancellationToken::new()).await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Error { message } => {
                assert!(message.contains("HTTP error 500"));
                assert!(message.contains("agent crashed"));
            }
            other => panic!("expected Error, got {:?}", other),
        }
    }
}
