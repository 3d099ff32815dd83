//! The hosting page: the privileged side of the palette.
//!
//! A [`Page`] owns the request queue the bridge drains, the ready flag its
//! clients wait on, and the idempotency flag that keeps a second bridge
//! installation from doing anything. A [`PageEnvironment`] describes what
//! the page can see of the authenticated session (globals, inline scripts,
//! cookies, document markup) and is only ever handed to the bridge.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use url::Url;

use crate::bridge::{Bridge, BridgeMessage, BridgeRequest};
use crate::config::InstanceConfig;
use crate::error::{PaletteError, PaletteResult};

/// Read access to the session state visible from the hosting page.
pub trait PageEnvironment: Send + Sync {
    /// Look up a page global by dotted path, e.g. `g_ck` or `NOW.user`.
    fn global(&self, path: &str) -> Option<Value>;

    /// Text content of every inline script on the page.
    fn inline_scripts(&self) -> Vec<String>;

    /// Value of a cookie visible to the page.
    fn cookie(&self, name: &str) -> Option<String>;

    /// Full document markup, when available.
    fn document_html(&self) -> Option<String> {
        None
    }
}

/// A fixed snapshot of page state.
#[derive(Debug, Clone, Default)]
pub struct StaticPage {
    globals: HashMap<String, Value>,
    scripts: Vec<String>,
    cookies: HashMap<String, String>,
    html: Option<String>,
}

impl StaticPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the page state the terminal front-end can see: the configured
    /// token becomes the `g_ck` global and configured cookies stay cookies.
    pub fn from_config(instance: &InstanceConfig) -> Self {
        let mut page = Self::new();
        if let Some(token) = instance.session_token.as_deref().filter(|t| !t.is_empty()) {
            page = page.with_global("g_ck", Value::String(token.to_string()));
        }
        for (name, value) in &instance.cookies {
            page = page.with_cookie(name, value);
        }
        page
    }

    pub fn with_global(mut self, name: &str, value: Value) -> Self {
        self.globals.insert(name.to_string(), value);
        self
    }

    pub fn with_inline_script(mut self, script: &str) -> Self {
        self.scripts.push(script.to_string());
        self
    }

    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_document_html(mut self, html: &str) -> Self {
        self.html = Some(html.to_string());
        self
    }
}

impl PageEnvironment for StaticPage {
    fn global(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let root = self.globals.get(segments.next()?)?;
        segments
            .try_fold(root, |value, segment| value.get(segment))
            .filter(|value| !value.is_null())
            .cloned()
    }

    fn inline_scripts(&self) -> Vec<String> {
        self.scripts.clone()
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.cookies.get(name).cloned()
    }

    fn document_html(&self) -> Option<String> {
        self.html.clone()
    }
}

/// The page-lifetime hosting context shared by the bridge and its clients.
pub struct Page {
    instance_url: Url,
    requests: mpsc::Sender<BridgeRequest>,
    inbox: Mutex<Option<mpsc::Receiver<BridgeRequest>>>,
    ready: watch::Sender<bool>,
    bridge_installed: AtomicBool,
}

impl Page {
    /// `capacity` bounds the request queue; senders wait for room rather
    /// than drop requests.
    pub fn new(instance_url: Url, capacity: usize) -> Arc<Self> {
        let (requests, inbox) = mpsc::channel(capacity.max(1));
        let (ready, _) = watch::channel(false);
        Arc::new(Self {
            instance_url,
            requests,
            inbox: Mutex::new(Some(inbox)),
            ready,
            bridge_installed: AtomicBool::new(false),
        })
    }

    pub fn instance_url(&self) -> &Url {
        &self.instance_url
    }

    pub fn hostname(&self) -> &str {
        self.instance_url.host_str().unwrap_or_default()
    }

    /// Queue a request for the bridge. Requests queued before the bridge is
    /// installed are answered once it is.
    pub async fn submit(&self, request: BridgeRequest) -> PaletteResult<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| PaletteError::BridgeNetwork("bridge channel closed".to_string()))
    }

    /// Hand out the receiving end of the request queue. Only the first call
    /// gets it.
    pub(crate) fn take_inbox(&self) -> Option<mpsc::Receiver<BridgeRequest>> {
        self.inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Tell every client the bridge is listening.
    pub fn announce_ready(&self) {
        self.ready.send_replace(true);
    }

    pub fn ready_signal(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    pub fn is_bridge_installed(&self) -> bool {
        self.bridge_installed.load(Ordering::SeqCst)
    }

    /// Install the bridge on this page.
    ///
    /// Only the first call does anything; later calls return `None`.
    pub fn install_bridge(&self, bridge: Bridge) -> Option<JoinHandle<()>> {
        if self.bridge_installed.swap(true, Ordering::SeqCst) {
            tracing::debug!(host = self.hostname(), "bridge already installed");
            return None;
        }
        let Some(inbox) = self.take_inbox() else {
            tracing::warn!(host = self.hostname(), "request queue already taken");
            return None;
        };
        tracing::info!(host = self.hostname(), "installing bridge");
        Some(bridge.spawn(self, inbox))
    }
}
