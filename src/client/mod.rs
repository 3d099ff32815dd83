//! Client side of the bridge.
//!
//! Commands never touch the session directly. They queue a request for the
//! bridge and wait for its correlated reply; the reader loop here routes
//! each reply to the one waiter whose correlation id it carries.

pub mod script;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, OnceCell};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::bridge::{BridgeMessage, BridgeRequest, HttpMethod, Payload, UserIdentity};
use crate::config::BridgeConfig;
use crate::error::{PaletteError, PaletteResult};
use crate::page::Page;

pub use script::{ScriptOptions, ScriptRecord, RESULTS_END, RESULTS_START};

/// Extra time a client waits beyond the bridge's own deadline, so the
/// bridge's timeout report normally arrives before the client gives up.
const CLIENT_MARGIN: Duration = Duration::from_secs(2);

/// Installs the bridge on the page when a client finds it missing.
pub type BridgeInjector = Arc<dyn Fn() + Send + Sync>;

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<PaletteResult<Payload>>>>>;

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<String, oneshot::Sender<PaletteResult<Payload>>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a request's pending entry when the waiting side goes away,
/// however it goes away.
struct PendingEntry {
    pending: PendingMap,
    correlation_id: String,
}

impl Drop for PendingEntry {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.correlation_id);
    }
}

/// Result of starting a remote update-set retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRetrieval {
    pub tracker_id: String,
    pub raw: String,
}

/// Handle for sending correlated requests to the bridge.
#[derive(Clone)]
pub struct BridgeClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    page: Arc<Page>,
    pending: PendingMap,
    replies: mpsc::UnboundedSender<BridgeMessage>,
    ready: OnceCell<()>,
    injector: Option<BridgeInjector>,
    grace: Duration,
    request_timeout: Duration,
    script_timeout: Duration,
    reader: JoinHandle<()>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl BridgeClient {
    /// Create a client and start routing replies.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(page: Arc<Page>, injector: Option<BridgeInjector>, config: &BridgeConfig) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (replies, inbox) = mpsc::unbounded_channel();
        let reader = tokio::spawn(run_reader_loop(inbox, Arc::clone(&pending)));

        Self {
            inner: Arc::new(ClientInner {
                page,
                pending,
                replies,
                ready: OnceCell::new(),
                injector,
                grace: config.ready_grace(),
                request_timeout: config.request_timeout(),
                script_timeout: config.script_timeout(),
                reader,
            }),
        }
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.inner.page
    }

    /// Instance URL without the trailing slash `Url` adds.
    pub fn instance_url(&self) -> String {
        self.inner
            .page
            .instance_url()
            .as_str()
            .trim_end_matches('/')
            .to_string()
    }

    /// Make sure the bridge is installed and give it a moment to announce
    /// itself. Only the first call does any work.
    pub async fn ensure_ready(&self) {
        let inner = &self.inner;
        inner
            .ready
            .get_or_init(|| async {
                if inner.page.is_bridge_installed() {
                    return;
                }
                if let Some(inject) = &inner.injector {
                    inject();
                }

                let mut ready = inner.page.ready_signal();
                let signalled = tokio::time::timeout(inner.grace, ready.wait_for(|r| *r))
                    .await
                    .is_ok_and(|r| r.is_ok());
                if signalled {
                    tracing::debug!("bridge ready");
                } else {
                    tracing::debug!(
                        grace_ms = inner.grace.as_millis() as u64,
                        "no ready signal from bridge, proceeding"
                    );
                }
            })
            .await;
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_len(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Queue a request and wait for the reply carrying its correlation id.
    ///
    /// The pending entry is removed on every exit path, including the
    /// caller dropping this future.
    pub async fn send(&self, payload: Payload, timeout: Duration) -> PaletteResult<Payload> {
        self.ensure_ready().await;

        let correlation_id = Uuid::new_v4().to_string();
        let request_type = payload.message_type();
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending).insert(correlation_id.clone(), tx);
        let _entry = PendingEntry {
            pending: Arc::clone(&self.inner.pending),
            correlation_id: correlation_id.clone(),
        };

        tracing::debug!(
            correlation_id = correlation_id.as_str(),
            request_type,
            "queueing bridge request"
        );
        let request = BridgeRequest {
            message: BridgeMessage {
                correlation_id: correlation_id.clone(),
                payload,
            },
            reply_to: self.inner.replies.clone(),
        };
        let exchange = async {
            self.inner.page.submit(request).await?;
            rx.await.unwrap_or_else(|_| {
                Err(PaletteError::BridgeNetwork("bridge channel closed".to_string()))
            })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    correlation_id = correlation_id.as_str(),
                    request_type,
                    "bridge request timed out"
                );
                Err(PaletteError::BridgeTimeout(format!(
                    "No response from the bridge for {} after {:?}",
                    request_type, timeout
                )))
            }
        }
    }

    fn request_wait(&self) -> Duration {
        self.inner.request_timeout + CLIENT_MARGIN
    }

    fn script_wait(&self) -> Duration {
        self.inner.script_timeout + CLIENT_MARGIN
    }

    /// Find a user record by username; `None` when no user matches.
    pub async fn lookup_user(&self, username: &str) -> PaletteResult<Option<Value>> {
        let payload = Payload::LookupUser {
            username: username.to_string(),
            instance_url: self.instance_url(),
        };
        match self.send(payload, self.request_wait()).await? {
            Payload::LookupUserResponse { error: Some(e), .. } => Err(e.into()),
            Payload::LookupUserResponse { user, .. } => Ok(user),
            other => Err(unexpected(other)),
        }
    }

    pub async fn impersonate(&self, username: &str) -> PaletteResult<()> {
        let payload = Payload::Impersonate {
            username: username.to_string(),
            instance_url: self.instance_url(),
        };
        match self.send(payload, self.request_wait()).await? {
            Payload::ImpersonateResponse { success, error } => {
                settle(success, error, "Impersonation failed")
            }
            other => Err(unexpected(other)),
        }
    }

    /// Return to the original user of an impersonated session.
    pub async fn end_impersonation(&self) -> PaletteResult<()> {
        let payload = Payload::EndImpersonate {
            instance_url: self.instance_url(),
        };
        // Probe plus impersonate: two round trips on the bridge side.
        let wait = self.inner.request_timeout * 2 + CLIENT_MARGIN;
        match self.send(payload, wait).await? {
            Payload::EndImpersonateResponse { success, error } => {
                settle(success, error, "Ending impersonation failed")
            }
            other => Err(unexpected(other)),
        }
    }

    pub async fn current_user(&self) -> PaletteResult<UserIdentity> {
        let payload = Payload::CurrentUser {
            instance_url: self.instance_url(),
        };
        match self.send(payload, self.request_wait()).await? {
            Payload::CurrentUserResponse { error: Some(e), .. } => Err(e.into()),
            Payload::CurrentUserResponse { user: Some(user), .. } => Ok(user),
            Payload::CurrentUserResponse { user: None, .. } => Err(
                PaletteError::MalformedResponse("Bridge returned no user".to_string()),
            ),
            other => Err(unexpected(other)),
        }
    }

    /// Arbitrary REST call through the bridge. Relative URLs are resolved
    /// against the instance.
    pub async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<Value>,
        headers: HashMap<String, String>,
    ) -> PaletteResult<Value> {
        let payload = Payload::GenericRequest {
            method,
            url: url.to_string(),
            body,
            headers,
        };
        match self.send(payload, self.request_wait()).await? {
            Payload::GenericResponse { error: Some(e), .. } => Err(e.into()),
            Payload::GenericResponse { result, .. } => Ok(result.unwrap_or(Value::Null)),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get(&self, url: &str) -> PaletteResult<Value> {
        self.request(HttpMethod::Get, url, None, HashMap::new()).await
    }

    /// Start retrieving update sets from a remote source.
    pub async fn retrieve_remote_sources(&self, source_id: &str) -> PaletteResult<RemoteRetrieval> {
        let payload = Payload::RetrieveRemoteSources {
            source_id: source_id.to_string(),
        };
        match self.send(payload, self.request_wait()).await? {
            Payload::RetrieveSourcesResponse { error: Some(e), .. } => Err(e.into()),
            Payload::RetrieveSourcesResponse {
                tracker_id: Some(tracker_id),
                raw,
                ..
            } => Ok(RemoteRetrieval {
                tracker_id,
                raw: raw.unwrap_or_default(),
            }),
            Payload::RetrieveSourcesResponse { .. } => Err(PaletteError::MalformedResponse(
                "Bridge returned no tracker id".to_string(),
            )),
            other => Err(unexpected(other)),
        }
    }
}

fn settle(
    success: bool,
    error: Option<crate::bridge::BridgeFailure>,
    fallback: &str,
) -> PaletteResult<()> {
    match error {
        Some(e) => Err(e.into()),
        None if success => Ok(()),
        None => Err(PaletteError::CommandFailed(fallback.to_string())),
    }
}

fn unexpected(payload: Payload) -> PaletteError {
    PaletteError::MalformedResponse(format!(
        "Unexpected bridge reply: {}",
        payload.message_type()
    ))
}

async fn run_reader_loop(mut replies: mpsc::UnboundedReceiver<BridgeMessage>, pending: PendingMap) {
    while let Some(message) = replies.recv().await {
        if !message.payload.is_response() {
            tracing::debug!(
                correlation_id = message.correlation_id.as_str(),
                "ignoring a non-response reply"
            );
            continue;
        }

        let waiter = lock(&pending).remove(&message.correlation_id);
        match waiter {
            Some(sender) => {
                let _ = sender.send(Ok(message.payload));
            }
            None => tracing::debug!(
                correlation_id = message.correlation_id.as_str(),
                "dropping reply with no waiter"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeFailure, FailureKind};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    fn config() -> BridgeConfig {
        BridgeConfig {
            request_timeout_secs: 1,
            script_timeout_secs: 1,
            ready_grace_ms: 20,
            channel_capacity: 64,
        }
    }

    fn page() -> Arc<Page> {
        Page::new(Url::parse("https://dev.example.com").unwrap(), 64)
    }

    /// Answer the next `count` requests in reverse arrival order, echoing
    /// each request's URL back as its result.
    fn reverse_responder(page: &Page, count: usize) -> JoinHandle<()> {
        let mut inbox = page.take_inbox().unwrap();
        tokio::spawn(async move {
            let mut requests = Vec::new();
            while requests.len() < count {
                let Some(request) = inbox.recv().await else {
                    break;
                };
                let url = match &request.message.payload {
                    Payload::GenericRequest { url, .. } => url.clone(),
                    _ => continue,
                };
                requests.push((request, url));
            }
            for (request, url) in requests.into_iter().rev() {
                request.reply(Payload::GenericResponse {
                    result: Some(json!({ "url": url })),
                    error: None,
                });
            }
        })
    }

    #[tokio::test]
    async fn test_out_of_order_replies_reach_their_callers() {
        let page = page();
        let responder = reverse_responder(&page, 2);
        let client = BridgeClient::new(Arc::clone(&page), None, &config());

        let (first, second) = tokio::join!(client.get("/first"), client.get("/second"));
        assert_eq!(first.unwrap(), json!({"url": "/first"}));
        assert_eq!(second.unwrap(), json!({"url": "/second"}));
        assert_eq!(client.pending_len(), 0);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_discards_entry_and_late_reply() {
        let page = page();
        let mut inbox = page.take_inbox().unwrap();
        tokio::spawn(async move {
            if let Some(request) = inbox.recv().await {
                tokio::time::sleep(Duration::from_millis(150)).await;
                request.reply(Payload::GenericResponse {
                    result: Some(json!("late")),
                    error: None,
                });
            }
        });

        let client = BridgeClient::new(Arc::clone(&page), None, &config());
        let payload = Payload::GenericRequest {
            method: HttpMethod::Get,
            url: "/slow".to_string(),
            body: None,
            headers: HashMap::new(),
        };
        let err = client
            .send(payload, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, PaletteError::BridgeTimeout(_)));
        assert_eq!(client.pending_len(), 0);

        // The late reply is dropped without disturbing anything.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(client.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_requests_leave_no_pending_entries() {
        let page = page();
        let client = BridgeClient::new(Arc::clone(&page), None, &config());
        client.ensure_ready().await;

        for _ in 0..5 {
            let outcome = tokio::time::timeout(Duration::from_millis(30), client.get("/x")).await;
            assert!(outcome.is_err());
        }
        assert_eq!(client.pending_len(), 0);

        // The requests themselves were queued; answering them now is harmless.
        let mut inbox = page.take_inbox().unwrap();
        let mut answered = 0;
        while let Ok(request) = inbox.try_recv() {
            request.reply(Payload::GenericResponse {
                result: None,
                error: None,
            });
            answered += 1;
        }
        assert_eq!(answered, 5);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_failure_reply_becomes_error() {
        let page = page();
        let mut inbox = page.take_inbox().unwrap();
        tokio::spawn(async move {
            while let Some(request) = inbox.recv().await {
                if matches!(request.message.payload, Payload::Impersonate { .. }) {
                    request.reply(Payload::ImpersonateResponse {
                        success: false,
                        error: Some(BridgeFailure::from_status(403, "Forbidden")),
                    });
                    break;
                }
            }
        });

        let client = BridgeClient::new(page, None, &config());
        let err = client.impersonate("admin").await.unwrap_err();
        assert!(matches!(err, PaletteError::AuthenticationRequired(_)));
        assert_eq!(err.to_string(), "API returned: 403 Forbidden");
    }

    #[tokio::test]
    async fn test_ensure_ready_injects_once() {
        let page = page();
        let injected = Arc::new(AtomicUsize::new(0));
        let injector: BridgeInjector = {
            let page = Arc::clone(&page);
            let injected = Arc::clone(&injected);
            Arc::new(move || {
                injected.fetch_add(1, Ordering::SeqCst);
                page.announce_ready();
            })
        };

        let mut config = config();
        config.ready_grace_ms = 5000;
        let client = BridgeClient::new(page, Some(injector), &config);

        let started = std::time::Instant::now();
        client.ensure_ready().await;
        client.ensure_ready().await;
        assert_eq!(injected.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_ready_signal_proceeds_after_grace() {
        let client = BridgeClient::new(page(), None, &config());
        let err = client
            .send(
                Payload::CurrentUser {
                    instance_url: String::new(),
                },
                Duration::from_millis(30),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PaletteError::BridgeTimeout(_)));
        assert_eq!(client.pending_len(), 0);
    }

    #[test]
    fn test_settle() {
        assert!(settle(true, None, "x").is_ok());
        assert!(matches!(
            settle(false, None, "x"),
            Err(PaletteError::CommandFailed(_))
        ));
        let failure = BridgeFailure::new(FailureKind::NotImpersonating, "Not currently impersonating");
        assert!(matches!(
            settle(false, Some(failure), "x"),
            Err(PaletteError::NotImpersonating)
        ));
    }
}
