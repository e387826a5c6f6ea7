use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use aureus_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut entries: Vec<(String, String, String)> = vec![
        (
            "guard.environment".to_string(),
            config.guard.environment.to_string(),
            source("guard.environment", "AUREUS_GUARD_ENVIRONMENT"),
        ),
        (
            "guard.token_budget".to_string(),
            config.guard.budget_limits.token_budget.to_string(),
            source("guard.token_budget", "AUREUS_GUARD_TOKEN_BUDGET"),
        ),
        (
            "guard.query_cost_budget".to_string(),
            config.guard.budget_limits.query_cost_budget.to_string(),
            source("guard.query_cost_budget", "AUREUS_GUARD_QUERY_COST_BUDGET"),
        ),
        (
            "guard.enable_audit".to_string(),
            config.guard.enable_audit.to_string(),
            source("guard.enable_audit", "AUREUS_GUARD_ENABLE_AUDIT"),
        ),
        (
            "guard.enable_snapshots".to_string(),
            config.guard.enable_snapshots.to_string(),
            source("guard.enable_snapshots", "AUREUS_GUARD_ENABLE_SNAPSHOTS"),
        ),
        (
            "evidence.signing_key".to_string(),
            redact_signing_key(&config),
            source("evidence.signing_key", "AUREUS_EVIDENCE_SIGNING_KEY"),
        ),
        (
            "evidence.scheme".to_string(),
            config.evidence.scheme.as_str().to_string(),
            source("evidence.scheme", "AUREUS_EVIDENCE_SCHEME"),
        ),
        (
            "evidence.output_dir".to_string(),
            config.evidence.output_dir.display().to_string(),
            source("evidence.output_dir", "AUREUS_EVIDENCE_OUTPUT_DIR"),
        ),
    ];

    for (name, setting) in config.rate_limits.named() {
        let env_prefix = format!("AUREUS_RATE_LIMITS_{}", name.to_ascii_uppercase());
        let max_path = format!("rate_limits.{name}.max_requests");
        let window_path = format!("rate_limits.{name}.window_secs");
        entries.push((
            max_path.clone(),
            setting.max_requests.to_string(),
            source(&max_path, &format!("{env_prefix}_MAX_REQUESTS")),
        ));
        entries.push((
            window_path.clone(),
            setting.window_secs.to_string(),
            source(&window_path, &format!("{env_prefix}_WINDOW_SECS")),
        ));
    }

    entries.extend([
        (
            "database.url".to_string(),
            config.database.url.clone(),
            source("database.url", "AUREUS_DATABASE_URL"),
        ),
        (
            "database.max_connections".to_string(),
            config.database.max_connections.to_string(),
            source("database.max_connections", "AUREUS_DATABASE_MAX_CONNECTIONS"),
        ),
        (
            "database.timeout_secs".to_string(),
            config.database.timeout_secs.to_string(),
            source("database.timeout_secs", "AUREUS_DATABASE_TIMEOUT_SECS"),
        ),
        (
            "logging.level".to_string(),
            config.logging.level.clone(),
            source("logging.level", "AUREUS_LOGGING_LEVEL"),
        ),
        (
            "logging.format".to_string(),
            format!("{:?}", config.logging.format),
            source("logging.format", "AUREUS_LOGGING_FORMAT"),
        ),
    ]);

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        entries.iter().map(|(key, value, source)| format!("- {key} = {value} (source: {source})")),
    );
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    ["aureus.toml", "config/aureus.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn redact_signing_key(config: &AppConfig) -> String {
    if config.uses_default_signing_key() {
        return "<placeholder>".to_string();
    }
    let length = config.evidence.signing_key.expose_secret().chars().count(); // ubs:ignore
    format!("<redacted, {length} chars>")
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::contains_path;

    #[test]
    fn contains_path_walks_nested_tables() {
        let doc: Value = "[rate_limits.query]\nmax_requests = 3\n".parse().expect("toml");

        assert!(contains_path(&doc, "rate_limits.query.max_requests"));
        assert!(!contains_path(&doc, "rate_limits.query.window_secs"));
        assert!(!contains_path(&doc, "guard.environment"));
    }
}
