use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use carscraper_rs::{
    EscalationReason, EventHandler, FetchConfig, FetchError, FetchEvent, FetchMode,
    FetchOrchestrator, FetchTarget, HeaderCatalog, MetricsCollector, PageRenderer, PlainHttpClient, PlainRequest,
    PlainResponse, RenderError, RenderResult, TransportError, UserAgentAffinity,
};
use url::Url;

const BASE: &str = "https://example.com";

/// Replays queued outcomes and records every request it sees.
#[derive(Default)]
struct MockHttpClient {
    replies: Mutex<VecDeque<Result<PlainResponse, TransportError>>>,
    requests: Mutex<Vec<PlainRequest>>,
}

impl MockHttpClient {
    fn replying(replies: Vec<Result<PlainResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn ok(status: u16, body: &str) -> Result<PlainResponse, TransportError> {
        Ok(PlainResponse {
            status,
            body: body.to_string(),
            final_url: Url::parse(BASE).unwrap(),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn requests(&self) -> Vec<PlainRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlainHttpClient for MockHttpClient {
    async fn get(&self, request: &PlainRequest) -> Result<PlainResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(TransportError::Connect("no reply queued".into())))
    }
}

struct MockRenderer {
    html: Option<String>,
    renders: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl MockRenderer {
    fn returning(html: &str) -> Arc<Self> {
        Arc::new(Self {
            html: Some(html.to_string()),
            renders: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            html: None,
            renders: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        })
    }

    fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageRenderer for MockRenderer {
    async fn render(&self, _url: &Url, max_wait: Duration) -> RenderResult<String> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        self.html.clone().ok_or(RenderError::Timeout(max_wait))
    }

    async fn shutdown(&self) -> RenderResult<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingHandler(Mutex<Vec<FetchEvent>>);

impl EventHandler for RecordingHandler {
    fn handle(&self, event: &FetchEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

fn config(pool: &[&str]) -> FetchConfig {
    let mut config = FetchConfig::new(BASE);
    config.intermediaries = pool.iter().map(|entry| entry.to_string()).collect();
    config.delay_min_ms = 0;
    config.delay_max_ms = 0;
    config
}

fn orchestrator(
    config: FetchConfig,
    client: Arc<MockHttpClient>,
    renderer: Option<Arc<MockRenderer>>,
) -> FetchOrchestrator {
    let mut builder = FetchOrchestrator::builder()
        .with_config(config)
        .with_http_client(client)
        .with_seed(11)
        .disable_logging_events();
    if let Some(renderer) = renderer {
        builder = builder.with_renderer(renderer);
    }
    builder.build().unwrap()
}

#[tokio::test]
async fn long_plain_body_is_returned_unchanged() {
    let body = "x".repeat(500);
    let client = MockHttpClient::replying(vec![MockHttpClient::ok(200, &body)]);
    let renderer = MockRenderer::returning("<html>rendered</html>");
    let mut cfg = config(&["proxy1:8080"]);
    cfg.min_page_length = 100;
    let orchestrator = orchestrator(cfg, client.clone(), Some(renderer.clone()));

    let page = orchestrator.fetch(&FetchTarget::new(BASE)).await.unwrap();

    assert_eq!(page.html, body);
    assert_eq!(page.mode, FetchMode::Plain);
    assert!(page.escalation.is_none());
    assert_eq!(client.calls(), 1);
    assert_eq!(renderer.renders(), 0);
}

#[tokio::test]
async fn script_dependent_target_is_rendered() {
    let client = MockHttpClient::replying(vec![MockHttpClient::ok(200, "")]);
    let renderer = MockRenderer::returning("<html><div id=\"search-basics-area\"></div></html>");
    let orchestrator = orchestrator(config(&["proxy1:8080"]), client.clone(), Some(renderer.clone()));

    let target = FetchTarget::new(BASE).script_dependent();
    let page = orchestrator.fetch(&target).await.unwrap();

    assert_eq!(page.html, "<html><div id=\"search-basics-area\"></div></html>");
    assert_eq!(page.mode, FetchMode::Rendered);
    assert_eq!(page.escalation, Some(EscalationReason::ScriptDependent));
    assert_eq!(renderer.renders(), 1);
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn empty_pool_fails_without_network_calls() {
    let client = MockHttpClient::replying(vec![MockHttpClient::ok(200, &"x".repeat(600))]);
    let renderer = MockRenderer::returning("<html></html>");
    let orchestrator = orchestrator(config(&[]), client.clone(), Some(renderer.clone()));

    let err = orchestrator.fetch(&FetchTarget::new(BASE)).await.unwrap_err();

    assert!(matches!(err, FetchError::EmptyPool));
    assert_eq!(client.calls(), 0);
    assert_eq!(renderer.renders(), 0);
}

#[tokio::test]
async fn script_dependent_never_returns_plain_result() {
    let client = MockHttpClient::replying(vec![MockHttpClient::ok(200, &"x".repeat(5000))]);
    let orchestrator = orchestrator(config(&["proxy1:8080"]), client.clone(), None);

    let err = orchestrator
        .fetch(&FetchTarget::new(BASE).script_dependent())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FetchError::EscalationNotEligible {
            reason: EscalationReason::ScriptDependent,
            ..
        }
    ));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn shell_page_escalates_to_renderer() {
    let client = MockHttpClient::replying(vec![MockHttpClient::ok(200, "<div id=\"app\"></div>")]);
    let renderer = MockRenderer::returning("<html>full listing</html>");
    let orchestrator = orchestrator(config(&["proxy1:8080"]), client.clone(), Some(renderer.clone()));

    let page = orchestrator.fetch(&FetchTarget::new(BASE)).await.unwrap();

    assert_eq!(page.html, "<html>full listing</html>");
    assert!(matches!(
        page.escalation,
        Some(EscalationReason::ShellPage { length: 20, threshold: 512 })
    ));
    assert_eq!(client.calls(), 1);
    assert_eq!(renderer.renders(), 1);
}

#[tokio::test]
async fn shell_page_without_fallback_is_not_eligible() {
    let client = MockHttpClient::replying(vec![MockHttpClient::ok(200, "")]);
    let renderer = MockRenderer::returning("<html></html>");
    let orchestrator = orchestrator(config(&["proxy1:8080"]), client.clone(), Some(renderer.clone()));

    let target = FetchTarget::new(BASE).with_render_fallback(false);
    let err = orchestrator.fetch(&target).await.unwrap_err();

    assert!(matches!(
        err,
        FetchError::EscalationNotEligible {
            reason: EscalationReason::ShellPage { length: 0, .. },
            ..
        }
    ));
    assert_eq!(renderer.renders(), 0);
}

#[tokio::test]
async fn transport_failure_without_renderer_is_network_failure() {
    let client = MockHttpClient::replying(vec![Err(TransportError::Timeout)]);
    let orchestrator = orchestrator(config(&["proxy1:8080"]), client.clone(), None);

    let err = orchestrator.fetch(&FetchTarget::new(BASE)).await.unwrap_err();

    assert!(matches!(
        err,
        FetchError::NetworkFailure {
            source: TransportError::Timeout,
            ..
        }
    ));
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn transport_failure_escalates_when_eligible() {
    let client = MockHttpClient::replying(vec![Err(TransportError::Connect("refused".into()))]);
    let renderer = MockRenderer::returning("<html>via browser</html>");
    let orchestrator = orchestrator(config(&["proxy1:8080"]), client, Some(renderer.clone()));

    let page = orchestrator.fetch(&FetchTarget::new(BASE)).await.unwrap();

    assert_eq!(page.mode, FetchMode::Rendered);
    assert!(matches!(page.escalation, Some(EscalationReason::Transport(_))));
}

#[tokio::test]
async fn render_failure_is_terminal() {
    let client = MockHttpClient::replying(vec![MockHttpClient::ok(403, &"x".repeat(800))]);
    let renderer = MockRenderer::failing();
    let orchestrator = orchestrator(config(&["proxy1:8080"]), client.clone(), Some(renderer.clone()));

    let err = orchestrator.fetch(&FetchTarget::new(BASE)).await.unwrap_err();

    assert!(matches!(
        err,
        FetchError::RenderFailure {
            source: RenderError::Timeout(_),
            ..
        }
    ));
    assert_eq!(client.calls(), 1);
    assert_eq!(renderer.renders(), 1);
}

#[tokio::test]
async fn plain_request_carries_identity_and_resolved_url() {
    let client = MockHttpClient::replying(vec![MockHttpClient::ok(200, &"x".repeat(600))]);
    let orchestrator = orchestrator(config(&["user:secret@proxy1:8080"]), client.clone(), None);

    let target = FetchTarget::new("/shopping/results/")
        .with_query("makes[]", "toyota")
        .with_query("page", "2")
        .with_referer("https://example.com/shopping/");
    orchestrator.fetch(&target).await.unwrap();

    let requests = client.requests();
    let request = &requests[0];
    assert_eq!(
        request.url.as_str(),
        "https://example.com/shopping/results/?makes%5B%5D=toyota&page=2"
    );
    assert_eq!(request.intermediary.address(), "user:secret@proxy1:8080");
    assert_eq!(request.headers.referer(), "https://example.com/shopping/");
    assert_eq!(request.headers.connection(), "keep-alive");
    assert_eq!(request.timeout, Duration::from_secs(15));
}

#[tokio::test]
async fn same_seed_sends_same_identities() {
    let pool = ["proxy1:8080", "proxy2:8080", "proxy3:8080"];
    let replies = || (0..10).map(|_| MockHttpClient::ok(200, &"x".repeat(600))).collect();
    let first = MockHttpClient::replying(replies());
    let second = MockHttpClient::replying(replies());

    for client in [&first, &second] {
        let orchestrator = orchestrator(config(&pool), client.clone(), None);
        for _ in 0..10 {
            orchestrator.fetch(&FetchTarget::new(BASE)).await.unwrap();
        }
    }

    let identities = |client: &MockHttpClient| {
        client
            .requests()
            .into_iter()
            .map(|request| (request.intermediary, request.headers))
            .collect::<Vec<_>>()
    };
    assert_eq!(identities(first.as_ref()), identities(second.as_ref()));
}

#[tokio::test]
async fn events_and_metrics_follow_the_fetch() {
    let client = MockHttpClient::replying(vec![MockHttpClient::ok(200, "")]);
    let renderer = MockRenderer::returning("<html>ok</html>");
    let recorder = Arc::new(RecordingHandler::default());
    let metrics = MetricsCollector::new();

    let orchestrator = FetchOrchestrator::builder()
        .with_config(config(&["user:secret@proxy1:8080"]))
        .with_http_client(client)
        .with_renderer(renderer)
        .with_seed(3)
        .with_event_handler(recorder.clone())
        .with_metrics(metrics.clone())
        .disable_logging_events()
        .build()
        .unwrap();

    orchestrator.fetch(&FetchTarget::new(BASE)).await.unwrap();

    let events = recorder.0.lock().unwrap();
    assert!(matches!(events[0], FetchEvent::PlainRequest(ref e) if e.intermediary == "proxy1"));
    assert!(matches!(events[1], FetchEvent::PlainResponse(ref e) if e.status == 200));
    assert!(matches!(events[2], FetchEvent::Escalation(_)));
    assert!(matches!(events[3], FetchEvent::Rendered(_)));
    assert_eq!(events.len(), 4);

    let stats = metrics.domain("example.com").unwrap();
    assert_eq!(stats.plain_requests, 1);
    assert_eq!(stats.escalations, 1);
    assert_eq!(stats.rendered, 1);
}

#[tokio::test]
async fn calibration_pins_first_working_user_agent() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("proxies_user_agents.json");

    let client = MockHttpClient::replying(vec![
        MockHttpClient::ok(403, "blocked"),
        MockHttpClient::ok(200, "welcome"),
        Err(TransportError::Timeout),
        Err(TransportError::Timeout),
    ]);
    let mut cfg = config(&["proxy1:8080", "proxy2:8080"]);
    cfg.user_agent_cache = Some(cache.clone());
    let orchestrator = orchestrator(cfg, client.clone(), None);

    let report = orchestrator.calibrate_user_agents(2).await.unwrap();

    assert_eq!(report.pinned, vec!["proxy1".to_string()]);
    assert_eq!(report.failed, vec!["proxy2".to_string()]);
    assert_eq!(client.calls(), 4);

    let requests = client.requests();
    let pinned = orchestrator.affinity().get("proxy1").unwrap();
    assert_eq!(pinned, requests[1].headers.user_agent());

    let reloaded = UserAgentAffinity::load(&cache).unwrap();
    assert_eq!(reloaded.get("proxy1"), Some(pinned));
}

#[tokio::test]
async fn calibration_skips_pinned_hosts() {
    let client = MockHttpClient::replying(vec![]);
    let affinity = Arc::new(UserAgentAffinity::new());
    affinity.pin("proxy1", "Pinned/1.0");

    let orchestrator = FetchOrchestrator::builder()
        .with_config(config(&["proxy1:8080"]))
        .with_http_client(client.clone())
        .with_affinity(affinity)
        .disable_logging_events()
        .build()
        .unwrap();

    let report = orchestrator.calibrate_user_agents(3).await.unwrap();
    assert_eq!(report.already_pinned, vec!["proxy1".to_string()]);
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn shutdown_reaches_the_renderer() {
    let renderer = MockRenderer::returning("<html></html>");
    let orchestrator = orchestrator(
        config(&["proxy1:8080"]),
        MockHttpClient::replying(vec![]),
        Some(renderer.clone()),
    );

    orchestrator.shutdown().await.unwrap();
    assert_eq!(renderer.shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fetch_html_returns_only_the_body() {
    let body = format!("<html>{}</html>", "listing ".repeat(100));
    let client = MockHttpClient::replying(vec![MockHttpClient::ok(200, &body)]);
    let orchestrator = orchestrator(config(&["proxy1:8080"]), client, None);

    let html = orchestrator
        .fetch_html("/vehicledetail/abc-123/")
        .await
        .unwrap();
    assert_eq!(html, body);
}

fn delayed_config(pool: &[&str]) -> FetchConfig {
    let mut config = config(pool);
    config.delay_min_ms = 1000;
    config.delay_max_ms = 2000;
    config
}

fn recorded_delays(recorder: &RecordingHandler) -> Vec<Duration> {
    recorder
        .0
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            FetchEvent::PlainRequest(request) => Some(request.delay),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn plain_fetch_sleeps_within_the_delay_range() {
    let replies = (0..5).map(|_| MockHttpClient::ok(200, &"x".repeat(600))).collect();
    let client = MockHttpClient::replying(replies);
    let recorder = Arc::new(RecordingHandler::default());
    let orchestrator = FetchOrchestrator::builder()
        .with_config(delayed_config(&["proxy1:8080", "proxy2:8080"]))
        .with_http_client(client.clone())
        .with_event_handler(recorder.clone())
        .with_seed(21)
        .disable_logging_events()
        .build()
        .unwrap();

    let mut elapsed = Vec::new();
    for _ in 0..5 {
        let started = tokio::time::Instant::now();
        orchestrator.fetch(&FetchTarget::new(BASE)).await.unwrap();
        elapsed.push(started.elapsed());
    }

    let delays = recorded_delays(&recorder);
    assert_eq!(delays.len(), 5);
    for (delay, waited) in delays.iter().zip(&elapsed) {
        assert!(*delay >= Duration::from_millis(1000), "{delay:?}");
        assert!(*delay <= Duration::from_millis(2000), "{delay:?}");
        assert!(*waited >= *delay, "waited {waited:?} for {delay:?}");
    }
    assert_eq!(client.calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn script_dependent_render_is_not_delayed() {
    let client = MockHttpClient::replying(vec![]);
    let renderer = MockRenderer::returning("<html>rendered</html>");
    let recorder = Arc::new(RecordingHandler::default());
    let orchestrator = FetchOrchestrator::builder()
        .with_config(delayed_config(&["proxy1:8080"]))
        .with_http_client(client.clone())
        .with_renderer(renderer.clone())
        .with_event_handler(recorder.clone())
        .with_seed(21)
        .disable_logging_events()
        .build()
        .unwrap();

    let started = tokio::time::Instant::now();
    let page = orchestrator
        .fetch(&FetchTarget::new(BASE).script_dependent())
        .await
        .unwrap();

    assert_eq!(page.mode, FetchMode::Rendered);
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert!(recorded_delays(&recorder).is_empty());
    assert_eq!(client.calls(), 0);
    assert_eq!(renderer.renders(), 1);
}

#[tokio::test(start_paused = true)]
async fn escalation_waits_only_before_the_plain_request() {
    let client = MockHttpClient::replying(vec![MockHttpClient::ok(200, "")]);
    let renderer = MockRenderer::returning("<html>rendered</html>");
    let recorder = Arc::new(RecordingHandler::default());
    let orchestrator = FetchOrchestrator::builder()
        .with_config(delayed_config(&["proxy1:8080"]))
        .with_http_client(client)
        .with_renderer(renderer.clone())
        .with_event_handler(recorder.clone())
        .with_seed(5)
        .disable_logging_events()
        .build()
        .unwrap();

    let started = tokio::time::Instant::now();
    orchestrator.fetch(&FetchTarget::new(BASE)).await.unwrap();
    let waited = started.elapsed();

    let delays = recorded_delays(&recorder);
    assert_eq!(delays.len(), 1);
    assert!(waited >= delays[0]);
    assert!(waited < delays[0] + Duration::from_millis(1000));
    assert_eq!(renderer.renders(), 1);
}

#[tokio::test]
async fn invalid_header_value_is_reported_as_failure() {
    let client = MockHttpClient::replying(vec![MockHttpClient::ok(200, &"x".repeat(600))]);
    let recorder = Arc::new(RecordingHandler::default());
    let metrics = MetricsCollector::new();
    let catalog = HeaderCatalog::new(
        vec!["Broken\u{1}Agent".to_string()],
        vec!["text/html".to_string()],
        vec!["en-US".to_string()],
    )
    .unwrap();

    let orchestrator = FetchOrchestrator::builder()
        .with_config(config(&["proxy1:8080"]))
        .with_http_client(client.clone())
        .with_catalog(catalog)
        .with_event_handler(recorder.clone())
        .with_metrics(metrics.clone())
        .disable_logging_events()
        .build()
        .unwrap();

    let err = orchestrator.fetch(&FetchTarget::new(BASE)).await.unwrap_err();

    assert!(matches!(err, FetchError::InvalidHeader(_)));
    assert_eq!(client.calls(), 0);
    let events = recorder.0.lock().unwrap();
    assert!(matches!(
        events.as_slice(),
        [FetchEvent::Failure(failure)] if failure.mode == FetchMode::Plain
    ));
    assert_eq!(metrics.domain("example.com").unwrap().failures, 1);
}
