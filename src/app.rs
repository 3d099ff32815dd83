//! Top-level wiring.
//!
//! `App` owns the page, the bridge client, the caches and the command
//! registry, and hands commands an [`ExecutionContext`] built from them.

use std::sync::Arc;

use crate::bridge::{Bridge, HttpTransport, ReqwestTransport};
use crate::cache::sources::{RemoteSourceCatalog, TableCatalog};
use crate::cache::{CacheKind, CacheSettings, JsonFileStore, ResolutionCache, SharedStore};
use crate::client::{BridgeClient, BridgeInjector};
use crate::commands::builtin::register_builtins;
use crate::commands::{Command, ExecutionContext, Registry};
use crate::config::Config;
use crate::error::PaletteResult;
use crate::feedback::{ConsoleFeedback, Feedback};
use crate::navigation::{detect_instance, BrowserOpener, Navigator, Opener};
use crate::page::{Page, PageEnvironment, StaticPage};

/// The collaborators `App` needs from the outside world.
pub struct AppServices {
    /// Session state the bridge reads.
    pub environment: Arc<dyn PageEnvironment>,
    /// How the bridge reaches the instance.
    pub transport: Arc<dyn HttpTransport>,
    pub opener: Arc<dyn Opener>,
    pub feedback: Arc<dyn Feedback>,
    /// Cache storage; `None` uses a JSON file per hostname.
    pub store: Option<SharedStore>,
}

impl AppServices {
    /// Terminal services: configured session, real HTTP, system browser,
    /// console output.
    pub fn from_config(config: &Config) -> PaletteResult<Self> {
        let transport =
            ReqwestTransport::new(&config.instance.cookies, config.bridge.request_timeout())?;
        Ok(Self {
            environment: Arc::new(StaticPage::from_config(&config.instance)),
            transport: Arc::new(transport),
            opener: Arc::new(BrowserOpener),
            feedback: Arc::new(ConsoleFeedback),
            store: None,
        })
    }
}

pub struct App {
    page: Arc<Page>,
    registry: Registry,
    ctx: ExecutionContext,
}

impl App {
    /// Wire everything up. Must be called from within a tokio runtime.
    pub fn new(config: Config, services: AppServices) -> PaletteResult<Self> {
        let instance = detect_instance(&config.instance.url)?;
        let page = Page::new(instance.clone(), config.bridge.channel_capacity);

        // The bridge goes in lazily, the first time a client needs it.
        let bridge = Bridge::new(services.environment, services.transport, &instance, &config);
        let injector: BridgeInjector = {
            let page = Arc::clone(&page);
            Arc::new(move || {
                page.install_bridge(bridge.clone());
            })
        };
        let client = BridgeClient::new(Arc::clone(&page), Some(injector), &config.bridge);

        let store = match services.store {
            Some(store) => store,
            None => JsonFileStore::open(page.hostname(), &config.cache.directory_path())
                .into_shared(),
        };
        let tables = ResolutionCache::new(
            Arc::new(TableCatalog::new(
                client.clone(),
                config.endpoints.table_definitions.clone(),
            )),
            Arc::clone(&store),
            CacheSettings::for_kind(CacheKind::Tables, &config.cache),
        );
        let sources = ResolutionCache::new(
            Arc::new(RemoteSourceCatalog::new(
                client.clone(),
                config.endpoints.remote_sources.clone(),
            )),
            store,
            CacheSettings::for_kind(CacheKind::RemoteSources, &config.cache),
        );

        let navigator = Navigator::new(instance, config.endpoints.clone(), services.opener);
        let ctx = ExecutionContext::new(services.feedback, client, navigator, tables, sources);

        let mut registry = Registry::new();
        register_builtins(&mut registry)?;

        tracing::debug!(host = page.hostname(), commands = registry.len(), "app ready");
        Ok(Self {
            page,
            registry,
            ctx,
        })
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Add a command beyond the built-ins.
    pub fn register(&mut self, command: Arc<dyn Command>) -> PaletteResult<()> {
        self.registry.register(command)
    }

    /// Run one input line.
    pub async fn dispatch(&self, line: &str) -> PaletteResult<()> {
        self.registry.dispatch(line, &self.ctx).await
    }

    /// Command names and aliases starting with `prefix`.
    pub fn completions(&self, prefix: &str) -> Vec<String> {
        let prefix = prefix.to_lowercase();
        let mut names: Vec<String> = self
            .registry
            .find_by_prefix(&prefix)
            .iter()
            .flat_map(|command| command.descriptor().names().collect::<Vec<_>>())
            .filter(|name| name.starts_with(&prefix))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn help_text(&self) -> String {
        let mut output = String::from("Available commands:\n");
        for command in self.registry.all() {
            let descriptor = command.descriptor();
            let aliases = if descriptor.aliases.is_empty() {
                String::new()
            } else {
                format!(" ({})", descriptor.aliases.join(", "))
            };
            output.push_str(&format!(
                "  {:<36} {}{}\n",
                descriptor.usage, descriptor.description, aliases
            ));
        }
        output
    }
}
