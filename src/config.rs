use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Connection settings for the movie-data backend
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Key used when no key is active in the session store
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_api_key_env() -> Option<String> {
    Some("REEL_API_KEY".to_string())
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            api_key: None,
            api_key_env: default_api_key_env(),
        }
    }
}

impl ApiConfig {
    /// Resolve the fallback API key from config or environment
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            return Some(key.clone());
        }
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u32,
    /// Where session state, history and journals live (default: ~/.reel)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_ttl_hours() -> u32 {
    24
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
            data_dir: None,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.ttl_hours))
    }

    pub fn resolve_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        dirs::home_dir()
            .map(|home| home.join(".reel"))
            .unwrap_or_else(|| PathBuf::from(".reel"))
    }
}

/// Allow-list for the admin credential check. Client-side only.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminConfig {
    #[serde(default = "default_allow")]
    pub allow: Vec<String>,
    #[serde(default = "default_subject_id")]
    pub subject_id: String,
    #[serde(default = "default_subject_email")]
    pub subject_email: String,
}

fn default_allow() -> Vec<String> {
    vec!["admin2025".to_string()]
}

fn default_subject_id() -> String {
    "admin".to_string()
}

fn default_subject_email() -> String {
    "admin@localhost".to_string()
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            allow: default_allow(),
            subject_id: default_subject_id(),
            subject_email: default_subject_email(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DashboardConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Render random demo statistics when the backend is unreachable
    #[serde(default)]
    pub demo_fallback: bool,
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_max_backoff_ms() -> u64 {
    160_000
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            demo_fallback: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page_size() -> u32 {
    10
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeysConfig {
    /// Prefix for locally generated fallback keys
    #[serde(default = "default_key_prefix")]
    pub prefix: String,
}

fn default_key_prefix() -> String {
    "mk_live_".to_string()
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            prefix: default_key_prefix(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub keys: KeysConfig,
}

impl Config {
    /// Load configuration from default paths, then an optional explicit file.
    /// Priority: explicit > local (.reel/config.local.toml) > project (.reel/config.toml) > user (~/.reel/config.toml)
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut layers = Vec::new();
        if let Some(home) = dirs::home_dir() {
            layers.push(home.join(".reel").join("config.toml"));
        }
        layers.push(Path::new(".reel").join("config.toml"));
        // should be gitignored
        layers.push(Path::new(".reel").join("config.local.toml"));

        let mut merged = Self::load_layers(&layers)?;
        if let Some(path) = explicit {
            let table = read_table(path)?;
            merge_tables(&mut merged, table);
        }
        Self::from_table(merged)
    }

    /// Read and deep-merge every existing file in `paths`; later files win.
    pub fn load_layers(paths: &[PathBuf]) -> Result<toml::Table> {
        let mut merged = toml::Table::new();
        for path in paths.iter().filter(|p| p.exists()) {
            let table = read_table(path)?;
            merge_tables(&mut merged, table);
        }
        Ok(merged)
    }

    pub fn from_table(table: toml::Table) -> Result<Self> {
        let config: Config = toml::Value::Table(table)
            .try_into()
            .context("invalid configuration")?;
        Ok(config)
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let url = self.api.base_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(ValidationError {
                field: "api.base_url".to_string(),
                message: format!("Must be an http(s) URL, got '{}'", url),
            });
        }

        if self.api.timeout_ms == 0 {
            errors.push(ValidationError {
                field: "api.timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.session.ttl_hours == 0 {
            errors.push(ValidationError {
                field: "session.ttl_hours".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        for (i, entry) in self.admin.allow.iter().enumerate() {
            if entry.trim().is_empty() {
                errors.push(ValidationError {
                    field: format!("admin.allow[{}]", i),
                    message: "Allow-list entries must not be empty".to_string(),
                });
            }
        }

        if self.dashboard.poll_interval_ms == 0 {
            errors.push(ValidationError {
                field: "dashboard.poll_interval_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }
        if self.dashboard.max_backoff_ms < self.dashboard.poll_interval_ms {
            errors.push(ValidationError {
                field: "dashboard.max_backoff_ms".to_string(),
                message: format!(
                    "Must be at least poll_interval_ms ({})",
                    self.dashboard.poll_interval_ms
                ),
            });
        }

        if !(1..=100).contains(&self.catalog.page_size) {
            errors.push(ValidationError {
                field: "catalog.page_size".to_string(),
                message: format!("Must be between 1 and 100, got {}", self.catalog.page_size),
            });
        }

        if self.keys.prefix.chars().any(char::is_whitespace) {
            errors.push(ValidationError {
                field: "keys.prefix".to_string(),
                message: "Must not contain whitespace".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let table: toml::Table = toml::from_str(&content)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    Ok(table)
}

/// Deep-merge `other` into `base`. Nested tables merge key by key; any other
/// value in `other` replaces the one in `base`.
fn merge_tables(base: &mut toml::Table, other: toml::Table) {
    for (key, value) in other {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.ttl(), chrono::Duration::hours(24));
        assert_eq!(config.dashboard.poll_interval_ms, 10_000);
        assert_eq!(config.catalog.page_size, 10);
    }

    #[test]
    fn test_empty_table_gives_defaults() {
        let config = Config::from_table(toml::Table::new()).unwrap();
        assert_eq!(config.api.base_url, "http://localhost:8000");
        assert_eq!(config.keys.prefix, "mk_live_");
    }

    #[test]
    fn test_layers_merge_key_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let user = write_file(
            dir.path(),
            "user.toml",
            "[api]\nbase_url = \"https://movies.example.com\"\ntimeout_ms = 5000\n",
        );
        let local = write_file(dir.path(), "local.toml", "[api]\ntimeout_ms = 900\n");
        let missing = dir.path().join("missing.toml");

        let table = Config::load_layers(&[user, missing, local]).unwrap();
        let config = Config::from_table(table).unwrap();
        assert_eq!(config.api.base_url, "https://movies.example.com");
        assert_eq!(config.api.timeout_ms, 900);
    }

    #[test]
    fn test_arrays_are_replaced_not_concatenated() {
        let mut base: toml::Table = toml::from_str("[admin]\nallow = [\"a\", \"b\"]\n").unwrap();
        let other: toml::Table = toml::from_str("[admin]\nallow = [\"c\"]\n").unwrap();
        merge_tables(&mut base, other);
        let config = Config::from_table(base).unwrap();
        assert_eq!(config.admin.allow, vec!["c".to_string()]);
    }

    #[test]
    fn test_validate_bad_url_and_ttl() {
        let mut config = Config::default();
        config.api.base_url = "localhost:8000".to_string();
        config.session.ttl_hours = 0;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].field.contains("base_url"));
        assert!(errors[1].field.contains("ttl_hours"));
    }

    #[test]
    fn test_validate_backoff_below_interval() {
        let mut config = Config::default();
        config.dashboard.max_backoff_ms = 1_000;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("poll_interval_ms"));
    }

    #[test]
    fn test_validate_empty_allow_entry() {
        let mut config = Config::default();
        config.admin.allow.push("  ".to_string());
        let errors = config.validate().unwrap_err();
        assert_eq!(errors[0].field, "admin.allow[1]");
    }

    #[test]
    fn test_resolve_api_key_prefers_config() {
        let config = ApiConfig {
            api_key: Some("mk_direct".to_string()),
            api_key_env: Some("REEL_TEST_UNSET_VAR".to_string()),
            ..ApiConfig::default()
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("mk_direct"));

        let config = ApiConfig {
            api_key: None,
            api_key_env: Some("REEL_TEST_UNSET_VAR".to_string()),
            ..ApiConfig::default()
        };
        assert!(config.resolve_api_key().is_none());
    }
}
