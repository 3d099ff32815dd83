//! The bridge service.
//!
//! Runs on the page side, drains the page's request queue, performs each
//! operation with the page's session, and replies to the requesting client
//! with the same correlation id. Failures are always answered as data;
//! nothing a request does can take the service loop down.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use super::http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, TransportError};
use super::message::{BridgeFailure, BridgeRequest, Payload, UserIdentity};
use super::session;
use crate::config::{fill_template, Config, EndpointsConfig};
use crate::page::{Page, PageEnvironment};

/// Header the instance reads the session token from.
pub const TOKEN_HEADER: &str = "X-UserToken";

/// AJAX processor that starts a remote update-set retrieval.
const RETRIEVE_PROCESSOR: &str = "UpdateSetSourceAjax";
const RETRIEVE_METHOD: &str = "retrieveUpdateSets";

static ANSWER_ELEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<answer[^>]*>\s*([^<\s]+)\s*</answer>").expect("answer pattern is valid")
});

static ANSWER_ATTRIBUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"answer="([^"]+)""#).expect("answer pattern is valid"));

type OpResult<T> = Result<T, BridgeFailure>;

/// The page-side service that performs privileged operations.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    env: Arc<dyn PageEnvironment>,
    transport: Arc<dyn HttpTransport>,
    endpoints: EndpointsConfig,
    instance_url: String,
    token_cookie: String,
    request_timeout: Duration,
    script_timeout: Duration,
}

impl Bridge {
    /// `instance` is the parsed instance URL; relative request paths are
    /// joined onto it.
    pub fn new(
        env: Arc<dyn PageEnvironment>,
        transport: Arc<dyn HttpTransport>,
        instance: &Url,
        config: &Config,
    ) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                env,
                transport,
                endpoints: config.endpoints.clone(),
                instance_url: instance.as_str().trim_end_matches('/').to_string(),
                token_cookie: config.instance.token_cookie.clone(),
                request_timeout: config.bridge.request_timeout(),
                script_timeout: config.bridge.script_timeout(),
            }),
        }
    }

    /// Announce readiness on `page` and start answering what arrives in
    /// `inbox`.
    ///
    /// Prefer [`Page::install_bridge`], which guards against installing
    /// twice.
    pub(crate) fn spawn(
        self,
        page: &Page,
        mut inbox: mpsc::Receiver<BridgeRequest>,
    ) -> JoinHandle<()> {
        page.announce_ready();

        tokio::spawn(async move {
            while let Some(request) = inbox.recv().await {
                if request.message.payload.is_response() {
                    tracing::debug!(
                        correlation_id = request.message.correlation_id.as_str(),
                        "bridge ignoring a response"
                    );
                    continue;
                }

                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    let request_type = request.message.payload.message_type();
                    tracing::debug!(
                        correlation_id = request.message.correlation_id.as_str(),
                        request_type,
                        "bridge handling request"
                    );
                    if let Some(payload) = inner.handle(request.message.payload.clone()).await {
                        if !request.reply(payload) {
                            tracing::debug!(request_type, "client gone before the reply");
                        }
                    }
                });
            }
            tracing::debug!("bridge loop finished");
        })
    }
}

impl BridgeInner {
    /// Perform one request and build its response; `None` for anything
    /// that is not a request.
    async fn handle(&self, payload: Payload) -> Option<Payload> {
        let response = match payload {
            Payload::LookupUser {
                username,
                instance_url,
            } => match self.lookup_user(&username, &instance_url).await {
                Ok(user) => Payload::LookupUserResponse { user, error: None },
                Err(error) => Payload::LookupUserResponse {
                    user: None,
                    error: Some(error),
                },
            },
            Payload::Impersonate {
                username,
                instance_url,
            } => impersonate_response(self.impersonate(&username, &instance_url).await, false),
            Payload::EndImpersonate { instance_url } => {
                impersonate_response(self.end_impersonation(&instance_url).await, true)
            }
            Payload::CurrentUser { instance_url } => match self.current_user(&instance_url).await {
                Ok(user) => Payload::CurrentUserResponse {
                    user: Some(user),
                    error: None,
                },
                Err(error) => Payload::CurrentUserResponse {
                    user: None,
                    error: Some(error),
                },
            },
            Payload::GenericRequest {
                method,
                url,
                body,
                headers,
            } => match self.generic_request(method, &url, body, headers).await {
                Ok(result) => Payload::GenericResponse {
                    result: Some(result),
                    error: None,
                },
                Err(error) => Payload::GenericResponse {
                    result: None,
                    error: Some(error),
                },
            },
            Payload::RunScript { script, scope } => {
                match self.run_script(&script, scope.as_deref()).await {
                    Ok(html) => Payload::RunScriptResponse {
                        html: Some(html),
                        error: None,
                    },
                    Err(error) => Payload::RunScriptResponse {
                        html: None,
                        error: Some(error),
                    },
                }
            }
            Payload::RetrieveRemoteSources { source_id } => {
                match self.retrieve_remote_sources(&source_id).await {
                    Ok((tracker_id, raw)) => Payload::RetrieveSourcesResponse {
                        tracker_id: Some(tracker_id),
                        raw: Some(raw),
                        error: None,
                    },
                    Err(error) => Payload::RetrieveSourcesResponse {
                        tracker_id: None,
                        raw: None,
                        error: Some(error),
                    },
                }
            }
            _ => return None,
        };
        Some(response)
    }

    fn session_token(&self) -> Option<String> {
        session::discover_session_token(self.env.as_ref(), &self.token_cookie)
    }

    /// Absolute URL for a path; absolute URLs pass through.
    fn url_for(&self, base: &str, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = if base.is_empty() {
            self.instance_url.as_str()
        } else {
            base.trim_end_matches('/')
        };
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }

    fn with_token(&self, request: HttpRequest) -> HttpRequest {
        match self.session_token() {
            Some(token) => request.header(TOKEN_HEADER, &token),
            None => request,
        }
    }

    /// Send with a deadline, keeping whatever status came back.
    async fn send_raw(&self, request: HttpRequest, timeout: Duration) -> OpResult<HttpResponse> {
        match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(TransportError::Timeout(after))) => Err(BridgeFailure::timeout(format!(
                "Request timed out after {}s",
                after.as_secs()
            ))),
            Ok(Err(TransportError::Network(message))) => Err(BridgeFailure::network(message)),
            Err(_) => Err(BridgeFailure::timeout(format!(
                "Request timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Send with the default deadline; non-2xx becomes a failure.
    async fn send(&self, request: HttpRequest) -> OpResult<HttpResponse> {
        self.send_checked(request, self.request_timeout).await
    }

    async fn send_checked(&self, request: HttpRequest, timeout: Duration) -> OpResult<HttpResponse> {
        let response = self.send_raw(request, timeout).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(BridgeFailure::from_status(response.status, &response.reason))
        }
    }

    async fn lookup_user(&self, username: &str, instance_url: &str) -> OpResult<Option<Value>> {
        let path = fill_template(&self.endpoints.user_lookup, &[("username", username)]);
        let request = self.with_token(
            HttpRequest::get(self.url_for(instance_url, &path)).header("Accept", "application/json"),
        );
        let response = self.send(request).await?;
        let body = parse_json(&response.body)?;

        Ok(body
            .get("result")
            .and_then(Value::as_array)
            .and_then(|records| records.first())
            .cloned())
    }

    async fn impersonate(&self, username: &str, instance_url: &str) -> OpResult<()> {
        let path = fill_template(&self.endpoints.impersonate, &[("username", username)]);
        let request = self.with_token(
            HttpRequest::post(self.url_for(instance_url, &path))
                .header("Accept", "application/json")
                .json(json!({})),
        );
        self.send(request).await?;
        tracing::info!(username, "impersonation started");
        Ok(())
    }

    async fn end_impersonation(&self, instance_url: &str) -> OpResult<()> {
        let original = match session::impersonator_from_page(self.env.as_ref()) {
            Some(user) => user,
            None => self
                .probe_impersonator(instance_url)
                .await?
                .ok_or_else(BridgeFailure::not_impersonating)?,
        };
        tracing::debug!(original = original.as_str(), "ending impersonation");
        self.impersonate(&original, instance_url).await
    }

    /// Request a path that does not exist; the error page the instance
    /// renders still embeds the impersonation marker.
    async fn probe_impersonator(&self, instance_url: &str) -> OpResult<Option<String>> {
        let request = HttpRequest::get(self.url_for(instance_url, &self.endpoints.probe));
        let response = self.send_raw(request, self.request_timeout).await?;
        Ok(session::find_impersonator(&response.body))
    }

    async fn current_user(&self, instance_url: &str) -> OpResult<UserIdentity> {
        if let Some(user) = session::current_user_from_globals(self.env.as_ref()) {
            return Ok(user);
        }

        let request = self.with_token(
            HttpRequest::get(self.url_for(instance_url, &self.endpoints.current_user))
                .header("Accept", "application/json"),
        );
        let response = self.send(request).await?;
        let body = parse_json(&response.body)?;

        session::normalize_user(&body)
            .ok_or_else(|| BridgeFailure::malformed("Could not determine the current user"))
    }

    async fn generic_request(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<Value>,
        headers: std::collections::HashMap<String, String>,
    ) -> OpResult<Value> {
        let mut request =
            HttpRequest::new(method, self.url_for("", url)).header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }
        request = self.with_token(request);
        for (name, value) in &headers {
            request = request.header(name, value);
        }

        let response = self.send(request).await?;
        if response.body.trim().is_empty() {
            return Ok(json!({}));
        }
        parse_json(&response.body)
    }

    async fn run_script(&self, script: &str, scope: Option<&str>) -> OpResult<String> {
        let token = self
            .session_token()
            .ok_or_else(BridgeFailure::no_session_token)?;

        let request = HttpRequest::post(self.url_for("", &self.endpoints.script)).form(&[
            ("script", script),
            ("sysparm_ck", &token),
            ("sys_scope", scope.unwrap_or("global")),
            ("runscript", "Run script"),
        ]);

        let response = self.send_checked(request, self.script_timeout).await?;
        Ok(response.body)
    }

    async fn retrieve_remote_sources(&self, source_id: &str) -> OpResult<(String, String)> {
        let token = self.session_token().unwrap_or_default();
        let request = self.with_token(
            HttpRequest::post(self.url_for("", &self.endpoints.ajax_processor)).form(&[
                ("sysparm_processor", RETRIEVE_PROCESSOR),
                ("sysparm_name", RETRIEVE_METHOD),
                ("sysparm_source_id", source_id),
                ("sysparm_ck", &token),
            ]),
        );

        let response = self.send(request).await?;
        let tracker_id = extract_answer(&response.body).ok_or_else(|| {
            BridgeFailure::malformed("No tracker id in the retrieval response")
        })?;
        Ok((tracker_id, response.body))
    }
}

fn impersonate_response(result: OpResult<()>, ending: bool) -> Payload {
    let (success, error) = match result {
        Ok(()) => (true, None),
        Err(error) => (false, Some(error)),
    };
    if ending {
        Payload::EndImpersonateResponse { success, error }
    } else {
        Payload::ImpersonateResponse { success, error }
    }
}

fn parse_json(body: &str) -> OpResult<Value> {
    serde_json::from_str(body)
        .map_err(|e| BridgeFailure::malformed(format!("Response was not valid JSON: {}", e)))
}

/// Pull the single tracker id out of an XML processor answer.
fn extract_answer(xml: &str) -> Option<String> {
    ANSWER_ELEMENT
        .captures(xml)
        .or_else(|| ANSWER_ATTRIBUTE.captures(xml))
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::message::{BridgeMessage, FailureKind};
    use crate::navigation::detect_instance;
    use crate::page::StaticPage;
    use crate::testing::ScriptedTransport;

    fn config() -> Config {
        let mut config = Config::default();
        config.instance.url = "https://dev.example.com".to_string();
        config.bridge.request_timeout_secs = 1;
        config
    }

    fn instance() -> Url {
        Url::parse(INSTANCE).unwrap()
    }

    fn bridge(page: StaticPage, transport: &Arc<ScriptedTransport>) -> Arc<BridgeInner> {
        let bridge = Bridge::new(Arc::new(page), transport.clone(), &instance(), &config());
        bridge.inner
    }

    fn token_page() -> StaticPage {
        StaticPage::new().with_global("g_ck", json!("tok"))
    }

    const INSTANCE: &str = "https://dev.example.com";

    #[tokio::test]
    async fn test_lookup_user_returns_first_record() {
        let transport = Arc::new(ScriptedTransport::new().on(
            HttpMethod::Get,
            "/api/now/table/sys_user",
            200,
            r#"{"result":[{"sys_id":"u1","user_name":"admin"}]}"#,
        ));
        let inner = bridge(token_page(), &transport);

        let user = inner.lookup_user("admin", INSTANCE).await.unwrap();
        assert_eq!(user, Some(json!({"sys_id":"u1","user_name":"admin"})));

        let sent = transport.requests();
        assert!(sent[0].url.contains("user_name=admin"));
        assert_eq!(sent[0].headers.get(TOKEN_HEADER).unwrap(), "tok");
    }

    #[tokio::test]
    async fn test_lookup_user_empty_and_auth_failure() {
        let transport = Arc::new(ScriptedTransport::new().on(
            HttpMethod::Get,
            "sys_user",
            200,
            r#"{"result":[]}"#,
        ));
        let inner = bridge(token_page(), &transport);
        assert_eq!(inner.lookup_user("ghost", INSTANCE).await.unwrap(), None);

        let transport = Arc::new(ScriptedTransport::new().on(HttpMethod::Get, "sys_user", 401, ""));
        let inner = bridge(token_page(), &transport);
        let failure = inner.lookup_user("admin", INSTANCE).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Authentication);
        assert_eq!(failure.status, Some(401));
    }

    #[tokio::test]
    async fn test_timeout_is_distinct_from_network_failure() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on(HttpMethod::Get, "sys_user", 200, "{}")
                .with_delay(Duration::from_secs(5)),
        );
        let inner = bridge(token_page(), &transport);
        let failure = inner.lookup_user("admin", INSTANCE).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Timeout);

        let transport = Arc::new(ScriptedTransport::new().on_error(
            HttpMethod::Get,
            "sys_user",
            TransportError::Network("connection refused".to_string()),
        ));
        let inner = bridge(token_page(), &transport);
        let failure = inner.lookup_user("admin", INSTANCE).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Network);
        assert_eq!(failure.message, "connection refused");
    }

    #[tokio::test]
    async fn test_impersonate_reports_status_and_reason() {
        let transport = Arc::new(ScriptedTransport::new().on(
            HttpMethod::Post,
            "/api/now/ui/impersonate/admin",
            403,
            "",
        ));
        let inner = bridge(token_page(), &transport);

        let response = inner
            .handle(Payload::Impersonate {
                username: "admin".to_string(),
                instance_url: INSTANCE.to_string(),
            })
            .await
            .unwrap();
        match response {
            Payload::ImpersonateResponse { success, error } => {
                assert!(!success);
                assert_eq!(error.unwrap().message, "API returned: 403 Forbidden");
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_end_impersonation_uses_page_marker() {
        let transport = Arc::new(ScriptedTransport::new().on(
            HttpMethod::Post,
            "/api/now/ui/impersonate/admin",
            200,
            "{}",
        ));
        let page = token_page().with_inline_script("var impersonating_user = 'admin';");
        let inner = bridge(page, &transport);

        inner.end_impersonation(INSTANCE).await.unwrap();
        assert_eq!(transport.count("/palette_probe_not_found.do"), 0);
        assert_eq!(transport.count("/api/now/ui/impersonate/admin"), 1);
    }

    #[tokio::test]
    async fn test_end_impersonation_probes_error_page() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on(
                    HttpMethod::Get,
                    "/palette_probe_not_found.do",
                    404,
                    r#"<html><script>var impersonator = "admin";</script></html>"#,
                )
                .on(HttpMethod::Post, "/api/now/ui/impersonate/admin", 200, ""),
        );
        let inner = bridge(token_page(), &transport);

        inner.end_impersonation(INSTANCE).await.unwrap();
        assert_eq!(transport.count("/palette_probe_not_found.do"), 1);
        assert_eq!(transport.count("/api/now/ui/impersonate/admin"), 1);
    }

    #[tokio::test]
    async fn test_end_impersonation_without_marker() {
        let transport = Arc::new(ScriptedTransport::new().on(
            HttpMethod::Get,
            "/palette_probe_not_found.do",
            404,
            "<html>Not found</html>",
        ));
        let inner = bridge(token_page(), &transport);

        let failure = inner.end_impersonation(INSTANCE).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::NotImpersonating);
        assert_eq!(failure.message, "Not currently impersonating");
    }

    #[tokio::test]
    async fn test_current_user_prefers_globals() {
        let transport = Arc::new(ScriptedTransport::new());
        let page = token_page().with_global("g_user", json!({"userID": "g1", "userName": "glide"}));
        let inner = bridge(page, &transport);

        let user = inner.current_user(INSTANCE).await.unwrap();
        assert_eq!(user.id, "g1");
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_current_user_falls_back_to_endpoint() {
        let transport = Arc::new(ScriptedTransport::new().on(
            HttpMethod::Get,
            "/api/now/ui/user/current_user",
            200,
            r#"{"result":{"user_sys_id":"abc","user_name":"admin"}}"#,
        ));
        let inner = bridge(token_page(), &transport);
        let user = inner.current_user(INSTANCE).await.unwrap();
        assert_eq!(
            user,
            UserIdentity {
                id: "abc".to_string(),
                username: "admin".to_string()
            }
        );

        let transport = Arc::new(ScriptedTransport::new().on(
            HttpMethod::Get,
            "/api/now/ui/user/current_user",
            200,
            r#"{"result":{}}"#,
        ));
        let inner = bridge(token_page(), &transport);
        let failure = inner.current_user(INSTANCE).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Malformed);
    }

    #[tokio::test]
    async fn test_generic_request_shapes() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on(HttpMethod::Delete, "/api/now/table/incident/1", 204, "")
                .on(HttpMethod::Get, "/api/now/table/incident", 200, r#"{"result":[]}"#)
                .on(HttpMethod::Get, "/broken", 200, "<html>")
                .on(HttpMethod::Get, "/missing", 404, "nope"),
        );
        let inner = bridge(StaticPage::new().with_cookie("g_ck", "cookie-tok"), &transport);

        let empty = inner
            .generic_request(HttpMethod::Delete, "/api/now/table/incident/1", None, Default::default())
            .await
            .unwrap();
        assert_eq!(empty, json!({}));

        let mut headers = std::collections::HashMap::new();
        headers.insert("X-Custom".to_string(), "1".to_string());
        let listed = inner
            .generic_request(HttpMethod::Get, "/api/now/table/incident", None, headers)
            .await
            .unwrap();
        assert_eq!(listed, json!({"result": []}));

        let sent = transport.requests();
        assert_eq!(sent[1].url, "https://dev.example.com/api/now/table/incident");
        assert_eq!(sent[1].headers.get(TOKEN_HEADER).unwrap(), "cookie-tok");
        assert_eq!(sent[1].headers.get("X-Custom").unwrap(), "1");

        let failure = inner
            .generic_request(HttpMethod::Get, "/broken", None, Default::default())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Malformed);

        let failure = inner
            .generic_request(HttpMethod::Get, "/missing", None, Default::default())
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Http);
        assert_eq!(failure.status, Some(404));
    }

    #[tokio::test]
    async fn test_run_script_requires_token_without_network() {
        let transport = Arc::new(ScriptedTransport::new());
        let inner = bridge(StaticPage::new(), &transport);

        let failure = inner.run_script("gs.print(1)", None).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::NoSessionToken);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_run_script_posts_form_and_returns_html() {
        let transport = Arc::new(ScriptedTransport::new().on(
            HttpMethod::Post,
            "/sys.scripts.do",
            200,
            "<pre>*** Script: 1</pre>",
        ));
        let inner = bridge(token_page(), &transport);

        let html = inner.run_script("gs.print(1)", Some("x_app")).await.unwrap();
        assert_eq!(html, "<pre>*** Script: 1</pre>");

        let sent = &transport.requests()[0];
        assert_eq!(sent.form_field("script"), Some("gs.print(1)"));
        assert_eq!(sent.form_field("sysparm_ck"), Some("tok"));
        assert_eq!(sent.form_field("sys_scope"), Some("x_app"));
    }

    #[tokio::test]
    async fn test_retrieve_remote_sources_extracts_tracker() {
        let xml = r#"<?xml version="1.0"?><xml sysparm_max="15"><answer>abc123</answer></xml>"#;
        let transport = Arc::new(ScriptedTransport::new().on(HttpMethod::Post, "/xmlhttp.do", 200, xml));
        let inner = bridge(token_page(), &transport);

        let (tracker, raw) = inner.retrieve_remote_sources("src1").await.unwrap();
        assert_eq!(tracker, "abc123");
        assert_eq!(raw, xml);
        assert_eq!(
            transport.requests()[0].form_field("sysparm_source_id"),
            Some("src1")
        );
    }

    #[test]
    fn test_extract_answer_forms() {
        assert_eq!(
            extract_answer("<xml><answer>\n  t1 \n</answer></xml>").as_deref(),
            Some("t1")
        );
        assert_eq!(
            extract_answer(r#"<xml answer="t2" sysparm_name="x"/>"#).as_deref(),
            Some("t2")
        );
        assert_eq!(extract_answer("<xml><answer></answer></xml>"), None);
    }

    #[tokio::test]
    async fn test_relative_paths_join_the_parsed_instance() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on(HttpMethod::Get, "/api/now/table/incident", 200, "{}")
                .on(HttpMethod::Post, "/sys.scripts.do", 200, "")
                .on(HttpMethod::Post, "/xmlhttp.do", 200, "<xml><answer>t</answer></xml>"),
        );
        let mut config = config();
        config.instance.url = "dev.example.com".to_string();
        let bridge = Bridge::new(
            Arc::new(token_page()),
            transport.clone(),
            &detect_instance(&config.instance.url).unwrap(),
            &config,
        );
        let inner = bridge.inner;

        inner
            .generic_request(HttpMethod::Get, "/api/now/table/incident", None, Default::default())
            .await
            .unwrap();
        inner.run_script("gs.print(1)", None).await.unwrap();
        inner.retrieve_remote_sources("src1").await.unwrap();

        let urls: Vec<String> = transport.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://dev.example.com/api/now/table/incident",
                "https://dev.example.com/sys.scripts.do",
                "https://dev.example.com/xmlhttp.do",
            ]
        );
    }

    #[tokio::test]
    async fn test_install_is_idempotent_and_answers_requests() {
        let transport = Arc::new(ScriptedTransport::new().on(
            HttpMethod::Post,
            "/api/now/ui/impersonate/admin",
            200,
            "",
        ));
        let page = Page::new(instance(), 16);
        let ready = page.ready_signal();
        let bridge = Bridge::new(Arc::new(token_page()), transport.clone(), &instance(), &config());

        assert!(page.install_bridge(bridge.clone()).is_some());
        assert!(page.install_bridge(bridge).is_none());
        assert!(*ready.borrow());

        let (reply_to, mut replies) = mpsc::unbounded_channel();
        page.submit(BridgeRequest {
            message: BridgeMessage {
                correlation_id: "c-9".to_string(),
                payload: Payload::Impersonate {
                    username: "admin".to_string(),
                    instance_url: INSTANCE.to_string(),
                },
            },
            reply_to,
        })
        .await
        .unwrap();

        assert_eq!(
            replies.recv().await.unwrap(),
            BridgeMessage {
                correlation_id: "c-9".to_string(),
                payload: Payload::ImpersonateResponse {
                    success: true,
                    error: None
                },
            }
        );
        assert_eq!(transport.count("/api/now/ui/impersonate/admin"), 1);
    }
}
