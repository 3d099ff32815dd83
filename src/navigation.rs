//! Instance URLs and opening them.

use std::sync::Arc;

use url::Url;

use crate::config::{fill_template, EndpointsConfig};
use crate::error::{PaletteError, PaletteResult};

/// Open URLs with whatever is displaying the instance.
pub trait Opener: Send + Sync {
    fn open_url(&self, url: &str) -> PaletteResult<()>;

    /// Reload the view of `url`. Without a live page this just opens it
    /// again.
    fn reload(&self, url: &str) -> PaletteResult<()> {
        self.open_url(url)
    }
}

/// Opens URLs in the system browser via the `open` crate.
pub struct BrowserOpener;

impl Opener for BrowserOpener {
    fn open_url(&self, url: &str) -> PaletteResult<()> {
        open::that(url)
            .map_err(|e| PaletteError::CommandFailed(format!("Failed to open {}: {}", url, e)))
    }
}

/// Parse user input into an instance base URL.
///
/// A bare host gets `https://`; anything without a host is rejected.
pub fn detect_instance(input: &str) -> PaletteResult<Url> {
    let input = input.trim();
    if input.is_empty() {
        return Err(PaletteError::Config("No instance URL configured".to_string()));
    }

    let candidate = if input.contains("://") {
        input.to_string()
    } else {
        format!("https://{}", input)
    };

    let url = Url::parse(&candidate)
        .map_err(|e| PaletteError::Config(format!("Invalid instance URL '{}': {}", input, e)))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(PaletteError::Config(format!(
            "Invalid instance URL '{}': no host",
            input
        )));
    }
    Ok(url)
}

/// Builds instance URLs and hands them to an [`Opener`].
#[derive(Clone)]
pub struct Navigator {
    instance: Url,
    endpoints: EndpointsConfig,
    opener: Arc<dyn Opener>,
}

impl Navigator {
    pub fn new(instance: Url, endpoints: EndpointsConfig, opener: Arc<dyn Opener>) -> Self {
        Self {
            instance,
            endpoints,
            opener,
        }
    }

    pub fn instance(&self) -> &Url {
        &self.instance
    }

    pub fn hostname(&self) -> &str {
        self.instance.host_str().unwrap_or_default()
    }

    /// Whether `url` points at this instance.
    pub fn is_instance_url(&self, url: &str) -> bool {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case(self.hostname())))
            .unwrap_or(false)
    }

    /// Absolute URL for an instance-relative path.
    pub fn url_for(&self, path: &str) -> String {
        let base = self.instance.as_str().trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }

    pub fn table_list_url(&self, table: &str) -> String {
        self.url_for(&fill_template(&self.endpoints.table_list, &[("table", table)]))
    }

    pub fn record_url(&self, table: &str, sys_id: &str) -> String {
        self.url_for(&fill_template(
            &self.endpoints.record,
            &[("table", table), ("sys_id", sys_id)],
        ))
    }

    pub fn tracker_url(&self, tracker_id: &str) -> String {
        self.url_for(&fill_template(&self.endpoints.tracker, &[("sys_id", tracker_id)]))
    }

    pub fn navigate(&self, url: &str) -> PaletteResult<()> {
        tracing::info!(url, "navigating");
        self.opener.open_url(url)
    }

    /// Reload the instance so a changed session takes effect.
    pub fn reload(&self) -> PaletteResult<()> {
        tracing::info!(host = self.hostname(), "reloading");
        self.opener.reload(&self.url_for("/"))
    }
}
