use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PaletteError, PaletteResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub instance: InstanceConfig,
    pub bridge: BridgeConfig,
    pub cache: CacheConfig,
    pub endpoints: EndpointsConfig,
}

/// The instance to talk to and the session that authenticates against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub url: String,
    /// Session token exposed to the bridge as the page global `g_ck`
    pub session_token: Option<String>,
    /// Cookie that may carry the session token when no global is present
    pub token_cookie: String,
    /// Cookies forwarded with every request (name -> value)
    pub cookies: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub request_timeout_secs: u64,
    pub script_timeout_secs: u64,
    pub ready_grace_ms: u64,
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub directory: String,
    pub table_ttl_hours: u64,
    pub source_ttl_minutes: u64,
    pub max_results: usize,
}

/// Path templates for every network operation the bridge performs.
///
/// `{username}` is substituted URL-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub user_lookup: String,
    pub impersonate: String,
    pub current_user: String,
    pub script: String,
    pub ajax_processor: String,
    pub probe: String,
    pub table_definitions: String,
    pub remote_sources: String,
    pub table_list: String,
    pub record: String,
    pub tracker: String,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            session_token: None,
            token_cookie: "g_ck".to_string(),
            cookies: HashMap::new(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 15,
            script_timeout_secs: 30,
            ready_grace_ms: 250,
            channel_capacity: 256,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: "~/.local/share/palette/cache".to_string(),
            table_ttl_hours: 24,
            source_ttl_minutes: 10,
            max_results: 10,
        }
    }
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            user_lookup: "/api/now/table/sys_user?sysparm_query=user_name={username}&sysparm_limit=1"
                .to_string(),
            impersonate: "/api/now/ui/impersonate/{username}".to_string(),
            current_user: "/api/now/ui/user/current_user".to_string(),
            script: "/sys.scripts.do".to_string(),
            ajax_processor: "/xmlhttp.do".to_string(),
            probe: "/palette_probe_not_found.do".to_string(),
            table_definitions:
                "/api/now/table/sys_db_object?sysparm_fields=name,label&sysparm_limit=10000"
                    .to_string(),
            remote_sources: "/api/now/table/sys_update_set_source?sysparm_fields=sys_id,name"
                .to_string(),
            table_list: "/{table}_list.do".to_string(),
            record: "/{table}.do?sys_id={sys_id}".to_string(),
            tracker: "/sys_execution_tracker.do?sys_id={sys_id}".to_string(),
        }
    }
}

/// Substitute `{name}` placeholders in an endpoint template.
///
/// Values are URL-encoded so usernames and table names cannot break the path.
pub fn fill_template(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), &urlencoding::encode(value))
    })
}

impl BridgeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }

    pub fn ready_grace(&self) -> Duration {
        Duration::from_millis(self.ready_grace_ms)
    }
}

impl CacheConfig {
    /// Cache directory with `~` expanded
    pub fn directory_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.directory).as_ref())
    }

    pub fn table_ttl(&self) -> Duration {
        Duration::from_secs(self.table_ttl_hours * 3600)
    }

    pub fn source_ttl(&self) -> Duration {
        Duration::from_secs(self.source_ttl_minutes * 60)
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
            })
            .join("palette")
            .join("config.toml")
    }

    /// Load config from the default path, or return defaults if not found
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from a file, falling back to defaults on any failure
    pub fn load_from(path: &std::path::Path) -> Self {
        let mut config = if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), "failed to parse config: {}", e);
                        Self::default()
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), "failed to read config: {}", e);
                    Self::default()
                }
            }
        } else {
            Self::default()
        };

        config.validate();
        config
    }

    /// Validate and clamp config values to acceptable ranges
    fn validate(&mut self) {
        self.bridge.request_timeout_secs = self.bridge.request_timeout_secs.clamp(1, 120);
        self.bridge.script_timeout_secs = self.bridge.script_timeout_secs.clamp(1, 600);
        self.bridge.ready_grace_ms = self.bridge.ready_grace_ms.clamp(10, 5000);
        self.bridge.channel_capacity = self.bridge.channel_capacity.clamp(16, 4096);

        self.cache.max_results = self.cache.max_results.clamp(1, 50);

        // Trailing slashes would double up when joining endpoint paths
        while self.instance.url.ends_with('/') {
            self.instance.url.pop();
        }
    }

    /// Save config to the default path
    pub fn save(&self) -> PaletteResult<()> {
        self.save_to(&Self::config_path())
    }

    /// Save config to file
    pub fn save_to(&self, path: &std::path::Path) -> PaletteResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| PaletteError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bridge.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.bridge.script_timeout(), Duration::from_secs(30));
        assert_eq!(config.cache.max_results, 10);
        assert_eq!(config.instance.token_cookie, "g_ck");
    }

    #[test]
    fn test_fill_template_encodes_values() {
        let endpoints = EndpointsConfig::default();
        let path = fill_template(&endpoints.impersonate, &[("username", "abel tuter")]);
        assert_eq!(path, "/api/now/ui/impersonate/abel%20tuter");

        let record = fill_template(&endpoints.record, &[("table", "incident"), ("sys_id", "42")]);
        assert_eq!(record, "/incident.do?sys_id=42");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[instance]\nurl = \"https://dev.example.com/\"\n\n[cache]\nmax_results = 500\n",
        )
        .unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.instance.url, "https://dev.example.com");
        assert_eq!(config.cache.max_results, 50);
        assert_eq!(config.bridge.request_timeout_secs, 15);
    }

    #[test]
    fn test_unparsable_file_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "not = [valid").unwrap();

        let config = Config::load_from(&path);
        assert!(config.instance.url.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.instance.url = "https://dev.example.com".to_string();
        config
            .instance
            .cookies
            .insert("JSESSIONID".to_string(), "abc".to_string());
        config.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path);
        assert_eq!(reloaded.instance.url, "https://dev.example.com");
        assert_eq!(reloaded.instance.cookies.get("JSESSIONID").unwrap(), "abc");
    }
}
