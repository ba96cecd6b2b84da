use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// How the fleet's device list is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSource {
    /// Explicit list from `DEVICES`.
    Listed(Vec<String>),
    /// Ask the application's device registry.
    Discover,
}

#[derive(Debug, Clone)]
pub struct Config {
    // TTN application
    pub app_id: String,
    pub region: String,
    pub api_key: String,
    pub base_url: String,

    // Device selection
    pub devices: DeviceSource,
    pub device_include: Vec<String>,
    pub device_exclude: Vec<String>,

    // Windows
    pub lookback_hours: i64,
    pub stale_after_minutes: i64,

    // Pull settings
    pub page_limit: u32,
    pub fallback_page_limit: u32,
    pub http_timeout_seconds: u64,
    pub retry_max: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub device_delay_ms: u64,

    // Output locations
    pub data_dir: PathBuf,
    pub docs_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables (and `.env`, if present).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if required environment variables are not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` for absent required keys (including
    /// `DEVICES` when discovery is disabled) and `ConfigError::Invalid` for
    /// zero page limits.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let region = required("TTN_REGION")?;
        let listed = split_list(&get("DEVICES").unwrap_or_default());
        let auto_discover = get("AUTO_DISCOVER")
            .and_then(|v| v.parse().ok())
            .unwrap_or(listed.is_empty());

        let devices = match (listed.is_empty(), auto_discover) {
            (false, _) => DeviceSource::Listed(listed),
            (true, true) => DeviceSource::Discover,
            (true, false) => return Err(ConfigError::Missing("DEVICES")),
        };

        let config = Self {
            // TTN application
            app_id: required("TTN_APP_ID")?,
            api_key: required("TTN_API_KEY")?,
            base_url: get("TTN_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| format!("https://{region}.cloud.thethings.network")),
            region,

            // Device selection
            devices,
            device_include: split_list(&get("DEVICE_INCLUDE").unwrap_or_default()),
            device_exclude: split_list(&get("DEVICE_EXCLUDE").unwrap_or_default()),

            // Windows
            lookback_hours: parse_or(get("LOOKBACK_HOURS"), 24),
            stale_after_minutes: parse_or(get("STALE_AFTER_MINUTES"), 180),

            // Pull settings
            page_limit: parse_or(get("PAGE_LIMIT"), 1000),
            fallback_page_limit: parse_or(get("FALLBACK_PAGE_LIMIT"), 100),
            http_timeout_seconds: parse_or(get("HTTP_TIMEOUT_SECONDS"), 30),
            retry_max: parse_or(get("RETRY_MAX"), 4),
            retry_base_delay_ms: parse_or(get("RETRY_BASE_DELAY_MS"), 1000),
            retry_max_delay_ms: parse_or(get("RETRY_MAX_DELAY_MS"), 30_000),
            device_delay_ms: parse_or(get("DEVICE_DELAY_MS"), 500),

            // Output locations
            data_dir: get("DATA_DIR").map_or_else(|| PathBuf::from("data"), PathBuf::from),
            docs_dir: get("DOCS_DIR").map_or_else(|| PathBuf::from("docs"), PathBuf::from),
        };

        if config.page_limit == 0 || config.fallback_page_limit == 0 {
            return Err(ConfigError::Invalid("page limits must be positive".to_string()));
        }
        if config.lookback_hours <= 0
            || chrono::Duration::try_hours(config.lookback_hours).is_none()
        {
            return Err(ConfigError::Invalid(format!(
                "LOOKBACK_HOURS must be a positive number of hours, got {}",
                config.lookback_hours
            )));
        }
        if config.stale_after_minutes <= 0
            || chrono::Duration::try_minutes(config.stale_after_minutes).is_none()
        {
            return Err(ConfigError::Invalid(format!(
                "STALE_AFTER_MINUTES must be a positive number of minutes, got {}",
                config.stale_after_minutes
            )));
        }

        Ok(config)
    }

    #[must_use]
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::try_hours(self.lookback_hours).unwrap_or(chrono::Duration::MAX)
    }

    #[must_use]
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::try_minutes(self.stale_after_minutes).unwrap_or(chrono::Duration::MAX)
    }

    #[must_use]
    pub fn device_delay(&self) -> Duration {
        Duration::from_millis(self.device_delay_ms)
    }

    /// Whether a device id passes the include/exclude filters.
    ///
    /// Matching is a case-insensitive substring test; an empty include list
    /// admits everything.
    #[must_use]
    pub fn admits(&self, device_id: &str) -> bool {
        let id = device_id.to_lowercase();
        let hit = |patterns: &[String]| patterns.iter().any(|p| id.contains(&p.to_lowercase()));

        (self.device_include.is_empty() || hit(&self.device_include)) && !hit(&self.device_exclude)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
