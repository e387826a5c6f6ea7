use std::fs;
use std::path::Path;

use aureus_core::domain::ActionContext;
use aureus_core::policy::PolicyEvaluator;
use serde_json::json;

use crate::commands::CommandResult;

/// Exit code when the evaluation does not allow the action outright.
pub const NOT_ALLOWED_EXIT_CODE: u8 = 1;

pub fn run(context_path: &Path) -> CommandResult {
    let raw = match fs::read_to_string(context_path) {
        Ok(raw) => raw,
        Err(error) => {
            return CommandResult::failure(
                "evaluate",
                "input_read",
                format!("could not read `{}`: {error}", context_path.display()),
                4,
            );
        }
    };

    let context: ActionContext = match serde_json::from_str(&raw) {
        Ok(context) => context,
        Err(error) => {
            return CommandResult::failure(
                "evaluate",
                "input_parse",
                format!("invalid action context: {error}"),
                5,
            );
        }
    };

    let evaluation = PolicyEvaluator::with_security_policies().evaluate_all(&context);
    let verdict = if evaluation.blocked {
        "blocked"
    } else if evaluation.requires_approval {
        "requires_approval"
    } else {
        "allowed"
    };
    tracing::info!(
        event_name = "cli.evaluate.completed",
        action_type = context.action_type.as_str(),
        verdict,
        "evaluated action context"
    );

    let details = json!({ "verdict": verdict, "evaluation": evaluation });
    let message = format!(
        "{} by {} in {}: {verdict}",
        context.action_type, context.actor, context.environment
    );
    let mut result = CommandResult::success_with_details("evaluate", message, Some(details));
    if !evaluation.allow {
        result.exit_code = NOT_ALLOWED_EXIT_CODE;
    }
    result
}
