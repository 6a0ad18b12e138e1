//! Configuration management for ruleacquire using the prefer crate.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::scrapers::browser::BrowserEngineConfig;
use crate::scrapers::resolve_user_agent;

/// Resume state filename inside the data directory.
pub const STATE_FILENAME: &str = "scraper_state.json";

/// Catalog database filename inside the data directory.
pub const DATABASE_FILENAME: &str = "catalog.db";

const DOCUMENTS_SUBDIR: &str = "documents";
const DIAGNOSTICS_SUBDIR: &str = "diagnostics";

/// Application settings resolved from config, environment and defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Directory for acquired documents.
    pub documents_dir: PathBuf,
    /// Directory for failed-page dumps and screenshots.
    pub diagnostics_dir: PathBuf,
    /// User agent for HTTP requests.
    pub user_agent: String,
    /// Request timeout in seconds.
    pub request_timeout: u64,
}

impl Default for Settings {
    fn default() -> Self {
        // Falls back gracefully: data dir -> home dir -> current dir
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ruleacquire");

        Self::with_data_dir(data_dir)
    }
}

impl Settings {
    /// Create settings rooted at a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            documents_dir: data_dir.join(DOCUMENTS_SUBDIR),
            diagnostics_dir: data_dir.join(DIAGNOSTICS_SUBDIR),
            data_dir,
            user_agent: resolve_user_agent(None),
            request_timeout: 30,
        }
    }

    fn set_data_dir(&mut self, data_dir: PathBuf) {
        self.documents_dir = data_dir.join(DOCUMENTS_SUBDIR);
        self.diagnostics_dir = data_dir.join(DIAGNOSTICS_SUBDIR);
        self.data_dir = data_dir;
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join(STATE_FILENAME)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILENAME)
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for (label, dir) in [
            ("data", &self.data_dir),
            ("documents", &self.documents_dir),
            ("diagnostics", &self.diagnostics_dir),
        ] {
            fs::create_dir_all(dir).map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create {} directory '{}': {}",
                        label,
                        dir.display(),
                        e
                    ),
                )
            })?;
        }
        Ok(())
    }
}

/// Source site endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub site_url: String,
    /// Bulk item API base (the `thing` endpoint lives below it).
    pub api_url: String,
    /// Structured files index endpoint.
    pub files_api_url: String,
    /// Bearer token for the bulk item API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            site_url: "https://boardgamegeek.com".to_string(),
            api_url: "https://boardgamegeek.com/xmlapi2".to_string(),
            files_api_url: "https://api.geekdo.com/api/files".to_string(),
            auth_token: None,
        }
    }
}

/// Discovery settings for both phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub start_page: u32,
    /// Listing pages fetched per run, counted from `start_page` (0 = unlimited).
    pub max_pages: u32,
    /// Fixed sleep between listing page requests.
    pub politeness_delay_ms: u64,
    pub sequence_enabled: bool,
    pub sequence_start: u64,
    pub sequence_end: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            start_page: 1,
            max_pages: 10,
            politeness_delay_ms: 5000,
            sequence_enabled: true,
            sequence_start: 1,
            sequence_end: 100_000,
        }
    }
}

impl DiscoveryConfig {
    /// Page budget as an option (`None` = unlimited).
    pub fn page_budget(&self) -> Option<u32> {
        (self.max_pages > 0).then_some(self.max_pages)
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    /// Run the document locator for each fetched item.
    pub locate_documents: bool,
    /// Sleep between per-item document lookups.
    pub document_delay_ms: u64,
    /// Retries for transient detail API failures.
    pub detail_retries: u32,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            batch_delay_ms: 2000,
            locate_documents: true,
            document_delay_ms: 1500,
            detail_retries: 3,
        }
    }
}

/// Document locator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentsConfig {
    /// Target language name (e.g. "English").
    pub language: String,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            language: "English".to_string(),
        }
    }
}

/// Acquisition engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Payloads smaller than this are treated as error pages.
    pub min_bytes: usize,
    /// How long to wait for a browser download to appear.
    pub capture_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            min_bytes: 1000,
            capture_timeout_secs: 30,
            username: None,
            password: None,
        }
    }
}

impl AcquisitionConfig {
    /// Login credentials, when both halves are present.
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u.clone(), p.clone())),
            _ => None,
        }
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// User agent string ("impersonate" picks a real browser UA).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub browser: BrowserEngineConfig,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers ruleacquire config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("ruleacquire").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::warn!("{}", e);
                            Self::default()
                        }
                    }
                } else {
                    Self::default()
                }
            }
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.set_data_dir(self.resolve_path(data_dir, base_dir));
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = resolve_user_agent(Some(user_agent));
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
    }

    /// Apply secrets and overrides from the environment.
    pub fn apply_env_overrides(&mut self) {
        if let Some(token) = env_var("BGG_AUTH_TOKEN") {
            self.source.auth_token = Some(token);
        }
        if let Some(username) = env_var("BGG_USERNAME") {
            self.acquisition.username = Some(username);
        }
        if let Some(password) = env_var("BGG_PASSWORD") {
            self.acquisition.password = Some(password);
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Use CWD for relative paths instead of config file directory.
    pub use_cwd: bool,
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(options: LoadOptions) -> (Settings, Config) {
    let mut config = match options.config_path {
        Some(ref path) => Config::load_from_path(path).await.unwrap_or_else(|e| {
            tracing::warn!("{}", e);
            Config::default()
        }),
        None => Config::load().await,
    };
    config.apply_env_overrides();

    let mut settings = Settings::default();

    let cwd = || std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let base_dir = if options.use_cwd {
        cwd()
    } else {
        config.base_dir().unwrap_or_else(cwd)
    };

    config.apply_to_settings(&mut settings, &base_dir);

    // RULEACQUIRE_DATA_DIR takes precedence over the config file
    if let Some(data_dir) = env_var("RULEACQUIRE_DATA_DIR") {
        tracing::debug!("Using RULEACQUIRE_DATA_DIR from environment: {}", data_dir);
        settings.set_data_dir(config.resolve_path(&data_dir, &base_dir));
    }

    (settings, config)
}
