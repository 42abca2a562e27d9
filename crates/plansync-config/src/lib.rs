use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_PLANSYNC_CONFIG: &str = "PLANSYNC_CONFIG";
pub const ENV_PLANSYNC_BASELINE_DB: &str = "PLANSYNC_BASELINE_DB";
pub const ENV_PLANSYNC_TRACKING_PLATFORM: &str = "PLANSYNC_TRACKING_PLATFORM";
pub const ENV_PLANSYNC_SUBTREE_CONCURRENCY: &str = "PLANSYNC_SUBTREE_CONCURRENCY";
pub const ENV_PLANSYNC_SEARCH_TTL_SECS: &str = "PLANSYNC_SEARCH_TTL_SECS";
pub const ENV_PLANSYNC_SIMILARITY_PCT: &str = "PLANSYNC_SIMILARITY_PCT";

const DEFAULT_SUBTREE_CONCURRENCY: u32 = 4;
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 4;
const DEFAULT_RETRY_INITIAL_BACKOFF_MS: u64 = 500;
const DEFAULT_RETRY_BACKOFF_MULTIPLIER: u32 = 2;
const DEFAULT_RETRY_MAX_BACKOFF_SECS: u64 = 30;
const DEFAULT_SEARCH_TTL_SECS: u64 = 300;
const DEFAULT_PLATFORM_PERMITS: u32 = 4;
const DEFAULT_SIMILARITY_PCT: u32 = 80;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
}

impl ConfigError {
    fn configuration(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlansyncConfig {
    #[serde(default)]
    pub engine: EngineConfigToml,
    #[serde(default)]
    pub retry: RetryConfigToml,
    #[serde(default)]
    pub cache: CacheConfigToml,
    #[serde(default)]
    pub baselines: BaselineConfigToml,
    #[serde(default)]
    pub platforms: PlatformsConfigToml,
    #[serde(default)]
    pub discovery: DiscoveryConfigToml,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfigToml {
    #[serde(default = "default_subtree_concurrency")]
    pub subtree_concurrency: u32,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for EngineConfigToml {
    fn default() -> Self {
        Self {
            subtree_concurrency: default_subtree_concurrency(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfigToml {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub backoff_multiplier: u32,
    #[serde(default = "default_retry_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

impl Default for RetryConfigToml {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            initial_backoff_ms: default_retry_initial_backoff_ms(),
            backoff_multiplier: default_retry_backoff_multiplier(),
            max_backoff_secs: default_retry_max_backoff_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfigToml {
    #[serde(default = "default_search_ttl_secs")]
    pub search_ttl_secs: u64,
}

impl Default for CacheConfigToml {
    fn default() -> Self {
        Self {
            search_ttl_secs: default_search_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BaselineConfigToml {
    #[serde(default = "default_baseline_db_path")]
    pub db_path: String,
}

impl Default for BaselineConfigToml {
    fn default() -> Self {
        Self {
            db_path: default_baseline_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformPermitEntry {
    pub platform: String,
    pub max_in_flight: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformsConfigToml {
    /// Platform whose remote key is embedded as the bracketed title marker.
    /// Empty means no tracking platform is designated.
    #[serde(default)]
    pub tracking: String,
    /// Platforms to reconcile against. Empty means every registered adapter.
    #[serde(default)]
    pub enabled: Vec<String>,
    #[serde(default)]
    pub permits: Vec<PlatformPermitEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryConfigToml {
    /// Word-overlap threshold for the name-similarity check, in percent.
    #[serde(default = "default_similarity_pct")]
    pub similarity_pct: u32,
}

impl Default for DiscoveryConfigToml {
    fn default() -> Self {
        Self {
            similarity_pct: default_similarity_pct(),
        }
    }
}

impl Default for PlansyncConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfigToml::default(),
            retry: RetryConfigToml::default(),
            cache: CacheConfigToml::default(),
            baselines: BaselineConfigToml::default(),
            platforms: PlatformsConfigToml::default(),
            discovery: DiscoveryConfigToml::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRuntimeConfig {
    pub subtree_concurrency: usize,
    pub call_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRuntimeConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: u32,
    pub max_backoff: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformRuntimeConfig {
    pub tracking: Option<String>,
    pub enabled: Vec<String>,
    permits: Vec<PlatformPermitEntry>,
}

impl PlatformRuntimeConfig {
    pub fn permits_for(&self, platform: &str) -> u32 {
        self.permits
            .iter()
            .find(|entry| entry.platform == platform)
            .map(|entry| entry.max_in_flight)
            .unwrap_or(DEFAULT_PLATFORM_PERMITS)
    }
}

impl PlansyncConfig {
    pub fn engine_runtime(&self) -> EngineRuntimeConfig {
        EngineRuntimeConfig {
            subtree_concurrency: self.engine.subtree_concurrency as usize,
            call_timeout: Duration::from_secs(self.engine.call_timeout_secs),
        }
    }

    pub fn retry_runtime(&self) -> RetryRuntimeConfig {
        RetryRuntimeConfig {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            backoff_multiplier: self.retry.backoff_multiplier,
            max_backoff: Duration::from_secs(self.retry.max_backoff_secs),
        }
    }

    pub fn search_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.search_ttl_secs)
    }

    pub fn baseline_db_path(&self) -> PathBuf {
        PathBuf::from(self.baselines.db_path.as_str())
    }

    pub fn platform_runtime(&self) -> PlatformRuntimeConfig {
        let tracking = self.platforms.tracking.trim();
        PlatformRuntimeConfig {
            tracking: (!tracking.is_empty()).then(|| tracking.to_owned()),
            enabled: self.platforms.enabled.clone(),
            permits: self.platforms.permits.clone(),
        }
    }

    pub fn similarity_threshold(&self) -> f64 {
        f64::from(self.discovery.similarity_pct) / 100.0
    }
}

pub fn load_from_env() -> Result<PlansyncConfig, ConfigError> {
    let path = config_path_from_env()?;
    let mut config = load_from_path(path)?;
    if apply_env_overrides(&mut config)? {
        // Env overrides are per-invocation; re-clamp but never persist them.
        normalize_config(&mut config);
    }
    Ok(config)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<PlansyncConfig, ConfigError> {
    load_or_create_config(path.as_ref())
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = resolve_home_dir().ok_or_else(|| {
        ConfigError::configuration("Unable to resolve home directory from HOME or USERPROFILE")
    })?;

    Ok(home.join(".config").join("plansync").join("config.toml"))
}

fn config_path_from_env() -> Result<PathBuf, ConfigError> {
    match std::env::var(ENV_PLANSYNC_CONFIG) {
        Ok(raw) => {
            if raw.trim().is_empty() {
                default_config_path()
            } else {
                Ok(raw.into())
            }
        }
        Err(std::env::VarError::NotPresent) => default_config_path(),
        Err(_) => Err(ConfigError::configuration(
            "PLANSYNC_CONFIG contained invalid UTF-8",
        )),
    }
}

fn default_plansync_data_dir() -> PathBuf {
    resolve_data_local_dir().join("plansync")
}

fn resolve_data_local_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(path) = std::env::var("LOCALAPPDATA") {
            let path = path.trim();
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }
        if let Some(home) = resolve_home_dir() {
            return home.join("AppData").join("Local");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = resolve_home_dir() {
            return home.join("Library").join("Application Support");
        }
    }

    #[cfg(all(not(target_os = "windows"), not(target_os = "macos")))]
    {
        if let Ok(path) = std::env::var("XDG_DATA_HOME") {
            let path = path.trim();
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }
        if let Some(home) = resolve_home_dir() {
            return home.join(".local").join("share");
        }
    }

    std::env::temp_dir()
}

fn resolve_home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("USERPROFILE")
                .ok()
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        })
}

fn default_baseline_db_path() -> String {
    default_plansync_data_dir()
        .join("baselines.db")
        .to_string_lossy()
        .to_string()
}

fn default_subtree_concurrency() -> u32 {
    DEFAULT_SUBTREE_CONCURRENCY
}

fn default_call_timeout_secs() -> u64 {
    DEFAULT_CALL_TIMEOUT_SECS
}

fn default_retry_max_attempts() -> u32 {
    DEFAULT_RETRY_MAX_ATTEMPTS
}

fn default_retry_initial_backoff_ms() -> u64 {
    DEFAULT_RETRY_INITIAL_BACKOFF_MS
}

fn default_retry_backoff_multiplier() -> u32 {
    DEFAULT_RETRY_BACKOFF_MULTIPLIER
}

fn default_retry_max_backoff_secs() -> u64 {
    DEFAULT_RETRY_MAX_BACKOFF_SECS
}

fn default_search_ttl_secs() -> u64 {
    DEFAULT_SEARCH_TTL_SECS
}

fn default_similarity_pct() -> u32 {
    DEFAULT_SIMILARITY_PCT
}

fn persist_config(path: &Path, config: &PlansyncConfig) -> Result<(), ConfigError> {
    let rendered = toml::to_string_pretty(config).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to serialize PLANSYNC_CONFIG for {}: {err}",
            path.display()
        ))
    })?;

    std::fs::write(path, rendered.as_bytes()).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to write PLANSYNC_CONFIG to {}: {err}",
            path.display()
        ))
    })
}

fn load_or_create_config(path: &Path) -> Result<PlansyncConfig, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|err| {
                        ConfigError::configuration(format!(
                            "Failed to create parent directory {} for PLANSYNC_CONFIG: {err}",
                            parent.display()
                        ))
                    })?;
                }
            }

            let default_config = PlansyncConfig::default();
            persist_config(path, &default_config)?;

            toml::to_string_pretty(&default_config).map_err(|err| {
                ConfigError::configuration(format!(
                    "Failed to serialize default PLANSYNC_CONFIG: {err}"
                ))
            })?
        }
        Err(err) => {
            return Err(ConfigError::configuration(format!(
                "Failed to read PLANSYNC_CONFIG from {}: {err}",
                path.display()
            )));
        }
    };

    let mut config: PlansyncConfig = toml::from_str(&raw).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to parse PLANSYNC_CONFIG from {}: {err}",
            path.display()
        ))
    })?;

    let changed = normalize_config(&mut config);
    if changed {
        persist_config(path, &config)?;
    }

    Ok(config)
}

pub fn normalize_config(config: &mut PlansyncConfig) -> bool {
    let mut changed = false;

    changed |= clamp_u32(
        &mut config.engine.subtree_concurrency,
        default_subtree_concurrency(),
        1,
        32,
    );
    changed |= clamp_u64(
        &mut config.engine.call_timeout_secs,
        default_call_timeout_secs(),
        1,
        300,
    );

    changed |= clamp_u32(
        &mut config.retry.max_attempts,
        default_retry_max_attempts(),
        1,
        10,
    );
    changed |= clamp_u64(
        &mut config.retry.initial_backoff_ms,
        default_retry_initial_backoff_ms(),
        10,
        10_000,
    );
    changed |= clamp_u32(
        &mut config.retry.backoff_multiplier,
        default_retry_backoff_multiplier(),
        1,
        8,
    );
    changed |= clamp_u64(
        &mut config.retry.max_backoff_secs,
        default_retry_max_backoff_secs(),
        1,
        600,
    );

    changed |= clamp_u64(
        &mut config.cache.search_ttl_secs,
        default_search_ttl_secs(),
        1,
        3_600,
    );

    changed |= normalize_non_empty_string(
        &mut config.baselines.db_path,
        default_baseline_db_path(),
    );

    changed |= normalize_platform_id(&mut config.platforms.tracking);
    changed |= normalize_string_vec(&mut config.platforms.enabled);
    for entry in &mut config.platforms.enabled {
        changed |= normalize_platform_id(entry);
    }
    for entry in &mut config.platforms.permits {
        changed |= normalize_platform_id(&mut entry.platform);
        changed |= clamp_u32(&mut entry.max_in_flight, DEFAULT_PLATFORM_PERMITS, 1, 16);
    }
    let before = config.platforms.permits.len();
    config
        .platforms
        .permits
        .retain(|entry| !entry.platform.is_empty());
    if config.platforms.permits.len() != before {
        changed = true;
    }

    changed |= clamp_u32(
        &mut config.discovery.similarity_pct,
        default_similarity_pct(),
        50,
        100,
    );

    changed
}

fn apply_env_overrides(config: &mut PlansyncConfig) -> Result<bool, ConfigError> {
    let mut changed = false;

    if let Some(value) = env_override(ENV_PLANSYNC_BASELINE_DB)? {
        if config.baselines.db_path != value {
            config.baselines.db_path = value;
            changed = true;
        }
    }
    if let Some(value) = env_override(ENV_PLANSYNC_TRACKING_PLATFORM)? {
        if config.platforms.tracking != value {
            config.platforms.tracking = value;
            changed = true;
        }
    }
    if let Some(value) = env_override(ENV_PLANSYNC_SUBTREE_CONCURRENCY)? {
        let parsed = parse_env_number(ENV_PLANSYNC_SUBTREE_CONCURRENCY, &value)?;
        if config.engine.subtree_concurrency != parsed {
            config.engine.subtree_concurrency = parsed;
            changed = true;
        }
    }
    if let Some(value) = env_override(ENV_PLANSYNC_SEARCH_TTL_SECS)? {
        let parsed: u64 = parse_env_number(ENV_PLANSYNC_SEARCH_TTL_SECS, &value)?;
        if config.cache.search_ttl_secs != parsed {
            config.cache.search_ttl_secs = parsed;
            changed = true;
        }
    }
    if let Some(value) = env_override(ENV_PLANSYNC_SIMILARITY_PCT)? {
        let parsed: u32 = parse_env_number(ENV_PLANSYNC_SIMILARITY_PCT, &value)?;
        if config.discovery.similarity_pct != parsed {
            config.discovery.similarity_pct = parsed;
            changed = true;
        }
    }

    Ok(changed)
}

fn env_override(name: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Ok(Some(trimmed.to_owned()))
            }
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(_) => Err(ConfigError::configuration(format!(
            "{name} contained invalid UTF-8"
        ))),
    }
}

fn parse_env_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| {
        ConfigError::configuration(format!(
            "Invalid `{name}` value '{value}': expected an unsigned integer"
        ))
    })
}

fn clamp_u32(value: &mut u32, default: u32, min: u32, max: u32) -> bool {
    let normalized = if *value == 0 {
        default
    } else {
        (*value).clamp(min, max)
    };
    if normalized != *value {
        *value = normalized;
        return true;
    }
    false
}

fn clamp_u64(value: &mut u64, default: u64, min: u64, max: u64) -> bool {
    let normalized = if *value == 0 {
        default
    } else {
        (*value).clamp(min, max)
    };
    if normalized != *value {
        *value = normalized;
        return true;
    }
    false
}

fn normalize_non_empty_string(value: &mut String, default: String) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        if *value != default {
            *value = default;
            return true;
        }
        return false;
    }

    if trimmed != value {
        *value = trimmed.to_owned();
        return true;
    }
    false
}

fn normalize_platform_id(value: &mut String) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    if *value != normalized {
        *value = normalized;
        return true;
    }
    false
}

fn normalize_string_vec(values: &mut Vec<String>) -> bool {
    let normalized = values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect::<Vec<_>>();
    if *values != normalized {
        *values = normalized;
        return true;
    }
    false
}
