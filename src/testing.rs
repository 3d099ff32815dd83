//! Test doubles shared across module tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::bridge::{
    Bridge, HttpMethod, HttpRequest, HttpResponse, HttpTransport, TransportError,
};
use crate::cache::sources::CatalogSource;
use crate::cache::{CacheItem, CacheKind, CacheSettings, MemoryStore, ResolutionCache};
use crate::client::{BridgeClient, BridgeInjector};
use crate::commands::ExecutionContext;
use crate::config::{BridgeConfig, Config, EndpointsConfig};
use crate::error::PaletteResult;
use crate::feedback::Feedback;
use crate::navigation::{detect_instance, Navigator, Opener};
use crate::page::{Page, StaticPage};

enum Reply {
    Response { status: u16, body: String },
    Error(TransportError),
}

struct Route {
    method: HttpMethod,
    url_contains: String,
    reply: Reply,
}

/// In-memory transport answering from a fixed route table. The first
/// route whose method matches and whose fragment occurs in the URL wins;
/// anything else gets a 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Vec<Route>,
    delay: Option<Duration>,
    sent: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, method: HttpMethod, url_contains: &str, status: u16, body: &str) -> Self {
        self.routes.push(Route {
            method,
            url_contains: url_contains.to_string(),
            reply: Reply::Response {
                status,
                body: body.to_string(),
            },
        });
        self
    }

    pub fn on_error(mut self, method: HttpMethod, url_contains: &str, error: TransportError) -> Self {
        self.routes.push(Route {
            method,
            url_contains: url_contains.to_string(),
            reply: Reply::Error(error),
        });
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.sent.lock().unwrap().clone()
    }

    /// Requests whose URL contains `fragment`.
    pub fn count(&self, fragment: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.contains(fragment))
            .count()
    }
}

fn reason(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.sent.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let route = self
            .routes
            .iter()
            .find(|r| r.method == request.method && request.url.contains(&r.url_contains));

        match route.map(|r| &r.reply) {
            Some(Reply::Error(error)) => Err(error.clone()),
            Some(Reply::Response { status, body }) => Ok(HttpResponse {
                status: *status,
                reason: reason(*status),
                headers: Default::default(),
                body: body.clone(),
            }),
            None => Ok(HttpResponse {
                status: 404,
                reason: reason(404),
                headers: Default::default(),
                body: String::new(),
            }),
        }
    }
}

/// Opener that remembers what it was asked to do.
#[derive(Default)]
pub struct RecordingOpener {
    opened: Mutex<Vec<String>>,
    reloads: Mutex<usize>,
}

impl RecordingOpener {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn reloads(&self) -> usize {
        *self.reloads.lock().unwrap()
    }
}

impl Opener for RecordingOpener {
    fn open_url(&self, url: &str) -> PaletteResult<()> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }

    fn reload(&self, _url: &str) -> PaletteResult<()> {
        *self.reloads.lock().unwrap() += 1;
        Ok(())
    }
}

/// Feedback that records every message by kind.
#[derive(Default)]
pub struct RecordingFeedback {
    errors: Mutex<Vec<String>>,
    successes: Mutex<Vec<String>>,
    infos: Mutex<Vec<String>>,
}

impl RecordingFeedback {
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn successes(&self) -> Vec<String> {
        self.successes.lock().unwrap().clone()
    }

    pub fn infos(&self) -> Vec<String> {
        self.infos.lock().unwrap().clone()
    }
}

impl Feedback for RecordingFeedback {
    fn show_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }

    fn show_success(&self, message: &str) {
        self.successes.lock().unwrap().push(message.to_string());
    }

    fn show_info(&self, message: &str) {
        self.infos.lock().unwrap().push(message.to_string());
    }
}

/// Catalog with fixed contents.
pub struct StaticCatalog {
    kind: CacheKind,
    items: Vec<CacheItem>,
}

impl StaticCatalog {
    pub fn new(kind: CacheKind, items: Vec<CacheItem>) -> Arc<Self> {
        Arc::new(Self { kind, items })
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    fn kind(&self) -> CacheKind {
        self.kind
    }

    async fn fetch(&self) -> PaletteResult<Vec<CacheItem>> {
        Ok(self.items.clone())
    }
}

/// An execution context with recording feedback and opener and no bridge
/// installed. Needs a tokio runtime.
pub struct Harness {
    pub ctx: ExecutionContext,
    pub feedback: Arc<RecordingFeedback>,
    pub opener: Arc<RecordingOpener>,
    pub page: Arc<Page>,
}

pub fn harness() -> Harness {
    build_harness(None)
}

/// Like [`harness`], but the client injects a bridge that answers from
/// `transport` with the session state in `env`.
pub fn bridged_harness(env: StaticPage, transport: Arc<ScriptedTransport>) -> Harness {
    build_harness(Some((env, transport)))
}

fn build_harness(bridge: Option<(StaticPage, Arc<ScriptedTransport>)>) -> Harness {
    let instance = detect_instance("dev.example.com").unwrap();
    let page = Page::new(instance.clone(), 64);
    let feedback = Arc::new(RecordingFeedback::default());
    let opener = Arc::new(RecordingOpener::default());

    let mut config = Config::default();
    config.instance.url = "https://dev.example.com".to_string();
    config.bridge = BridgeConfig {
        request_timeout_secs: 1,
        ready_grace_ms: 500,
        ..BridgeConfig::default()
    };

    let injector: Option<BridgeInjector> = bridge.map(|(env, transport)| {
        let bridge = Bridge::new(Arc::new(env), transport, &instance, &config);
        let page = Arc::clone(&page);
        Arc::new(move || {
            page.install_bridge(bridge.clone());
        }) as BridgeInjector
    });
    let client = BridgeClient::new(Arc::clone(&page), injector, &config.bridge);
    let navigator = Navigator::new(instance, EndpointsConfig::default(), opener.clone());

    let settings = CacheSettings::new(Duration::from_secs(60), 10);
    let tables = ResolutionCache::new(
        StaticCatalog::new(
            CacheKind::Tables,
            vec![
                CacheItem::new("Incident", "incident"),
                CacheItem::new("Incident Task", "incident_task"),
            ],
        ),
        MemoryStore::new().into_shared(),
        settings.clone(),
    );
    let sources = ResolutionCache::new(
        StaticCatalog::new(
            CacheKind::RemoteSources,
            vec![CacheItem::new("Dev Instance", "src1")],
        ),
        MemoryStore::new().into_shared(),
        settings,
    );

    Harness {
        ctx: ExecutionContext::new(feedback.clone(), client, navigator, tables, sources),
        feedback,
        opener,
        page,
    }
}
