//! CLI command handlers and shared output helpers.

pub mod clusters;
pub mod images;

use serde::Serialize;

use crate::errors::StratusError;

/// Print a value as pretty JSON, for `--format json`.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

/// Render an error to stderr, as JSON when requested.
pub fn print_error(err: &StratusError, format: &str) {
    if format == "json" {
        let value = serde_json::json!({
            "error": err.kind(),
            "message": err.to_string(),
        });
        eprintln!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
    } else {
        eprintln!("Error: {}", err);
    }
}

/// True when the chosen format is JSON.
pub fn is_json(format: &str) -> bool {
    format.eq_ignore_ascii_case("json")
}
