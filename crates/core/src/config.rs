use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::budget::BudgetLimits;
use crate::domain::Environment;
use crate::evidence::{EvidenceStore, SignatureScheme, DEFAULT_SIGNING_KEY};
use crate::guard::GuardConfig;
use crate::rate_limit::{RateLimitConfig, RateLimiters};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub guard: GuardConfig,
    pub evidence: EvidenceConfig,
    pub rate_limits: RateLimitSettings,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct EvidenceConfig {
    pub signing_key: SecretString,
    pub scheme: SignatureScheme,
    pub output_dir: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSetting {
    pub max_requests: u32,
    pub window_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub query: LimitSetting,
    pub config: LimitSetting,
    pub pipeline: LimitSetting,
    pub approval: LimitSetting,
    pub pii: LimitSetting,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

impl DatabaseConfig {
    /// Single-connection in-memory database.
    pub fn in_memory() -> Self {
        Self { url: "sqlite::memory:".to_string(), max_connections: 1, timeout_secs: 30 }
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub environment: Option<Environment>,
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub signing_key: Option<String>,
    pub evidence_output_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl LimitSetting {
    const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self { max_requests, window_secs }
    }

    fn to_config(self, prefix: &str) -> RateLimitConfig {
        RateLimitConfig::new(self.max_requests, self.window_secs, prefix)
    }

    fn apply(&mut self, patch: Option<LimitPatch>) {
        let Some(patch) = patch else {
            return;
        };
        if let Some(max_requests) = patch.max_requests {
            self.max_requests = max_requests;
        }
        if let Some(window_secs) = patch.window_secs {
            self.window_secs = window_secs;
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            query: LimitSetting::new(10, 60),
            config: LimitSetting::new(5, 60),
            pipeline: LimitSetting::new(3, 60),
            approval: LimitSetting::new(20, 60),
            pii: LimitSetting::new(5, 60),
        }
    }
}

impl RateLimitSettings {
    pub fn named(&self) -> [(&'static str, LimitSetting); 5] {
        [
            ("query", self.query),
            ("config", self.config),
            ("pipeline", self.pipeline),
            ("approval", self.approval),
            ("pii", self.pii),
        ]
    }

    fn named_mut(&mut self) -> [(&'static str, &mut LimitSetting); 5] {
        [
            ("query", &mut self.query),
            ("config", &mut self.config),
            ("pipeline", &mut self.pipeline),
            ("approval", &mut self.approval),
            ("pii", &mut self.pii),
        ]
    }

    pub fn build(&self) -> RateLimiters {
        RateLimiters::new(
            self.query.to_config("query"),
            self.config.to_config("config"),
            self.pipeline.to_config("pipeline"),
            self.approval.to_config("approval"),
            self.pii.to_config("pii"),
        )
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            guard: GuardConfig::default(),
            evidence: EvidenceConfig {
                signing_key: secret_value(DEFAULT_SIGNING_KEY.to_string()),
                scheme: SignatureScheme::default(),
                output_dir: PathBuf::from("evidence"),
            },
            rate_limits: RateLimitSettings::default(),
            database: DatabaseConfig {
                url: "sqlite://aureus.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("aureus.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Evidence store signing with the configured key and scheme.
    pub fn evidence_store(&self) -> EvidenceStore {
        EvidenceStore::new(self.evidence.signing_key.clone(), self.evidence.scheme)
    }

    pub fn uses_default_signing_key(&self) -> bool {
        self.evidence.signing_key.expose_secret() == DEFAULT_SIGNING_KEY // ubs:ignore
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(guard) = patch.guard {
            if let Some(environment) = guard.environment {
                self.guard.environment = environment;
            }
            if let Some(token_budget) = guard.token_budget {
                self.guard.budget_limits.token_budget = token_budget;
            }
            if let Some(query_cost_budget) = guard.query_cost_budget {
                self.guard.budget_limits.query_cost_budget = query_cost_budget;
            }
            if let Some(enable_audit) = guard.enable_audit {
                self.guard.enable_audit = enable_audit;
            }
            if let Some(enable_snapshots) = guard.enable_snapshots {
                self.guard.enable_snapshots = enable_snapshots;
            }
        }

        if let Some(evidence) = patch.evidence {
            if let Some(signing_key_value) = evidence.signing_key {
                self.evidence.signing_key = secret_value(signing_key_value); // ubs:ignore
            }
            if let Some(scheme) = evidence.scheme {
                self.evidence.scheme = scheme;
            }
            if let Some(output_dir) = evidence.output_dir {
                self.evidence.output_dir = output_dir;
            }
        }

        if let Some(rate_limits) = patch.rate_limits {
            self.rate_limits.query.apply(rate_limits.query);
            self.rate_limits.config.apply(rate_limits.config);
            self.rate_limits.pipeline.apply(rate_limits.pipeline);
            self.rate_limits.approval.apply(rate_limits.approval);
            self.rate_limits.pii.apply(rate_limits.pii);
        }

        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("AUREUS_GUARD_ENVIRONMENT") {
            self.guard.environment = value.parse().map_err(ConfigError::Validation)?;
        }
        if let Some(value) = read_env("AUREUS_GUARD_TOKEN_BUDGET") {
            self.guard.budget_limits.token_budget =
                parse_u64("AUREUS_GUARD_TOKEN_BUDGET", &value)?;
        }
        if let Some(value) = read_env("AUREUS_GUARD_QUERY_COST_BUDGET") {
            self.guard.budget_limits.query_cost_budget =
                parse_decimal("AUREUS_GUARD_QUERY_COST_BUDGET", &value)?;
        }
        if let Some(value) = read_env("AUREUS_GUARD_ENABLE_AUDIT") {
            self.guard.enable_audit = parse_bool("AUREUS_GUARD_ENABLE_AUDIT", &value)?;
        }
        if let Some(value) = read_env("AUREUS_GUARD_ENABLE_SNAPSHOTS") {
            self.guard.enable_snapshots = parse_bool("AUREUS_GUARD_ENABLE_SNAPSHOTS", &value)?;
        }

        if let Some(value) = read_env("AUREUS_EVIDENCE_SIGNING_KEY") {
            self.evidence.signing_key = secret_value(value); // ubs:ignore
        }
        if let Some(value) = read_env("AUREUS_EVIDENCE_SCHEME") {
            self.evidence.scheme = value.parse().map_err(ConfigError::Validation)?;
        }
        if let Some(value) = read_env("AUREUS_EVIDENCE_OUTPUT_DIR") {
            self.evidence.output_dir = PathBuf::from(value);
        }

        for (name, setting) in self.rate_limits.named_mut() {
            let prefix = format!("AUREUS_RATE_LIMITS_{}", name.to_ascii_uppercase());
            let max_key = format!("{prefix}_MAX_REQUESTS");
            if let Some(value) = read_env(&max_key) {
                setting.max_requests = parse_u32(&max_key, &value)?;
            }
            let window_key = format!("{prefix}_WINDOW_SECS");
            if let Some(value) = read_env(&window_key) {
                setting.window_secs = parse_u64(&window_key, &value)?;
            }
        }

        if let Some(value) = read_env("AUREUS_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("AUREUS_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("AUREUS_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("AUREUS_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("AUREUS_DATABASE_TIMEOUT_SECS", &value)?;
        }

        let log_level = read_env("AUREUS_LOGGING_LEVEL").or_else(|| read_env("AUREUS_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("AUREUS_LOGGING_FORMAT").or_else(|| read_env("AUREUS_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(environment) = overrides.environment {
            self.guard.environment = environment;
        }
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(signing_key) = overrides.signing_key {
            self.evidence.signing_key = secret_value(signing_key); // ubs:ignore
        }
        if let Some(output_dir) = overrides.evidence_output_dir {
            self.evidence.output_dir = output_dir;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_guard(&self.guard.budget_limits)?;
        validate_evidence(&self.evidence, self.guard.environment)?;
        validate_rate_limits(&self.rate_limits)?;
        validate_database(&self.database)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("aureus.toml"), PathBuf::from("config/aureus.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_guard(limits: &BudgetLimits) -> Result<(), ConfigError> {
    if limits.token_budget == 0 {
        return Err(ConfigError::Validation(
            "guard.token_budget must be greater than zero".to_string(),
        ));
    }
    if limits.query_cost_budget.is_sign_negative() {
        return Err(ConfigError::Validation(
            "guard.query_cost_budget must not be negative".to_string(),
        ));
    }
    Ok(())
}

fn validate_evidence(evidence: &EvidenceConfig, environment: Environment) -> Result<(), ConfigError> {
    let key = evidence.signing_key.expose_secret(); // ubs:ignore
    if key.trim().is_empty() {
        return Err(ConfigError::Validation(
            "evidence.signing_key must not be empty. Set AUREUS_EVIDENCE_SIGNING_KEY or [evidence].signing_key".to_string(),
        ));
    }
    if environment == Environment::Prod && key == DEFAULT_SIGNING_KEY {
        return Err(ConfigError::Validation(
            "evidence.signing_key is still the placeholder; prod requires a real key (AUREUS_EVIDENCE_SIGNING_KEY)".to_string(),
        ));
    }
    if evidence.output_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "evidence.output_dir must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_rate_limits(rate_limits: &RateLimitSettings) -> Result<(), ConfigError> {
    for (name, setting) in rate_limits.named() {
        if setting.max_requests == 0 {
            return Err(ConfigError::Validation(format!(
                "rate_limits.{name}.max_requests must be greater than zero"
            )));
        }
        if setting.window_secs == 0 || setting.window_secs > 86_400 {
            return Err(ConfigError::Validation(format!(
                "rate_limits.{name}.window_secs must be in range 1..=86400"
            )));
        }
    }
    Ok(())
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| invalid_override(key, value))
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    value.trim().parse::<Decimal>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    guard: Option<GuardPatch>,
    evidence: Option<EvidencePatch>,
    rate_limits: Option<RateLimitsPatch>,
    database: Option<DatabasePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardPatch {
    environment: Option<Environment>,
    token_budget: Option<u64>,
    query_cost_budget: Option<Decimal>,
    enable_audit: Option<bool>,
    enable_snapshots: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct EvidencePatch {
    signing_key: Option<String>,
    scheme: Option<SignatureScheme>,
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct RateLimitsPatch {
    query: Option<LimitPatch>,
    config: Option<LimitPatch>,
    pipeline: Option<LimitPatch>,
    approval: Option<LimitPatch>,
    pii: Option<LimitPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LimitPatch {
    max_requests: Option<u32>,
    window_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
// ubs:ignore
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use rust_decimal::Decimal;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
    use crate::domain::Environment;
    use crate::evidence::SignatureScheme;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    fn missing_path(dir: &TempDir) -> LoadOptions {
        LoadOptions { config_path: Some(dir.path().join("absent.toml")), ..LoadOptions::default() }
    }

    #[test]
    fn defaults_are_valid_and_match_kernel_defaults() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;

        let config = AppConfig::load(missing_path(&dir))
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.guard.environment == Environment::Dev, "default environment is dev")?;
        ensure(config.guard.budget_limits.token_budget == 100_000, "default token budget")?;
        ensure(
            config.guard.budget_limits.query_cost_budget == Decimal::from(1_000),
            "default query cost budget",
        )?;
        ensure(config.rate_limits.query.max_requests == 10, "query preset is 10/min")?;
        ensure(config.uses_default_signing_key(), "placeholder key is the default")?;
        ensure(matches!(config.logging.format, LogFormat::Compact), "compact logging by default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_AUREUS_SIGNING_KEY", "key-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("aureus.toml");
            fs::write(
                &path,
                r#"
[evidence]
signing_key = "${TEST_AUREUS_SIGNING_KEY}" # ubs:ignore
scheme = "hmac_sha256"

[guard]
environment = "uat"
query_cost_budget = 250.5

[rate_limits.pipeline]
max_requests = 1
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.evidence.signing_key.expose_secret() == "key-from-env",
                "signing key should be loaded from environment",
            )?;
            ensure(config.evidence.scheme == SignatureScheme::HmacSha256, "scheme from file")?;
            ensure(config.guard.environment == Environment::Uat, "environment from file")?;
            ensure(
                config.guard.budget_limits.query_cost_budget == Decimal::new(2505, 1),
                "fractional query budget from file",
            )?;
            ensure(config.rate_limits.pipeline.max_requests == 1, "pipeline limit from file")?;
            ensure(config.rate_limits.pipeline.window_secs == 60, "window keeps its default")?;
            ensure(
                config.rate_limits.build().pipeline.config().max_requests == 1,
                "built limiter uses configured limit",
            )
        })();

        clear_vars(&["TEST_AUREUS_SIGNING_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AUREUS_LOG_LEVEL", "warn");
        env::set_var("AUREUS_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["AUREUS_LOG_LEVEL", "AUREUS_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AUREUS_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("AUREUS_GUARD_TOKEN_BUDGET", "5000");
        env::set_var("AUREUS_RATE_LIMITS_QUERY_WINDOW_SECS", "30");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("aureus.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[guard]
token_budget = 100

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.guard.budget_limits.token_budget == 5000,
                "env token budget should win over file and defaults",
            )?;
            ensure(config.rate_limits.query.window_secs == 30, "env window should apply")?;
            Ok(())
        })();

        clear_vars(&[
            "AUREUS_DATABASE_URL",
            "AUREUS_GUARD_TOKEN_BUDGET",
            "AUREUS_RATE_LIMITS_QUERY_WINDOW_SECS",
        ]);
        result
    }

    #[test]
    fn invalid_env_override_names_the_variable() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AUREUS_GUARD_ENABLE_AUDIT", "sometimes");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "AUREUS_GUARD_ENABLE_AUDIT", "error should name the variable")
            }
            other => Err(format!("expected invalid override, got {other:?}")),
        };

        clear_vars(&["AUREUS_GUARD_ENABLE_AUDIT"]);
        result
    }

    #[test]
    fn prod_rejects_placeholder_signing_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AUREUS_GUARD_ENVIRONMENT", "prod");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("evidence.signing_key")
            );
            ensure(has_message, "validation failure should mention evidence.signing_key")?;

            let config = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    signing_key: Some("prod-key".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;
            ensure(config.guard.environment == Environment::Prod, "prod from env")
        })();

        clear_vars(&["AUREUS_GUARD_ENVIRONMENT"]);
        result
    }

    #[test]
    fn zero_rate_limit_fails_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AUREUS_RATE_LIMITS_PII_MAX_REQUESTS", "0");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::Validation(message)) => ensure(
                message == "rate_limits.pii.max_requests must be greater than zero",
                "validation failure should name the limiter",
            ),
            other => Err(format!("expected validation failure, got {other:?}")),
        };

        clear_vars(&["AUREUS_RATE_LIMITS_PII_MAX_REQUESTS"]);
        result
    }

    #[test]
    fn required_file_must_exist() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("aureus.toml");
        match AppConfig::load(LoadOptions {
            config_path: Some(path.clone()),
            require_file: true,
            ..LoadOptions::default()
        }) {
            Err(ConfigError::MissingConfigFile(missing)) => {
                ensure(missing == path, "error should carry the requested path")
            }
            other => Err(format!("expected missing file error, got {other:?}")),
        }
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AUREUS_EVIDENCE_SIGNING_KEY", "super-secret-signing-key");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("super-secret-signing-key"),
                "debug output should not contain the signing key",
            )?;
            ensure(!config.uses_default_signing_key(), "env key replaces the placeholder")
        })();

        clear_vars(&["AUREUS_EVIDENCE_SIGNING_KEY"]);
        result
    }
}
