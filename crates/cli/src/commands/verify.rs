use std::fs;
use std::path::Path;

use aureus_core::config::{AppConfig, LoadOptions};
use aureus_core::evidence::EvidenceBundle;
use serde_json::{json, Value};

use crate::commands::CommandResult;

pub fn run(bundle_path: &Path) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "verify",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let raw = match fs::read_to_string(bundle_path) {
        Ok(raw) => raw,
        Err(error) => {
            return CommandResult::failure(
                "verify",
                "input_read",
                format!("could not read `{}`: {error}", bundle_path.display()),
                4,
            );
        }
    };

    let bundle: EvidenceBundle<Value> = match serde_json::from_str(&raw) {
        Ok(bundle) => bundle,
        Err(error) => {
            return CommandResult::failure(
                "verify",
                "input_parse",
                format!("invalid evidence bundle: {error}"),
                5,
            );
        }
    };

    let verification = config.evidence_store().verify(&bundle);
    let details = json!({ "status": verification.status(), "verification": verification });
    match verification.failure_reason() {
        None => CommandResult::success_with_details(
            "verify",
            format!("evidence bundle {} is valid", bundle.hash),
            Some(details),
        ),
        Some(reason) => {
            tracing::warn!(
                event_name = "cli.verify.failed",
                path = %bundle_path.display(),
                reason = %reason,
                "evidence verification failed"
            );
            CommandResult::failure_with_details("verify", "verification", reason, 1, Some(details))
        }
    }
}
