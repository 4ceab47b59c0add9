//! Output formatting for human-readable and JSON modes.
//!
//! Human mode uses colored terminal output.
//! JSON mode outputs pure JSON with no ANSI escapes.

use colored::Colorize;
use serde::Serialize;

/// Prints a success message.
pub fn print_success(msg: &str, json_mode: bool) {
    if json_mode {
        let obj = serde_json::json!({ "status": "ok", "message": msg });
        println!("{obj}");
    } else {
        println!("{} {}", "✓".green().bold(), msg);
    }
}

/// Prints a single key-value pair.
pub fn print_kv(key: &str, value: &str, json_mode: bool) {
    if json_mode {
        let obj = serde_json::json!({ key: value });
        println!("{obj}");
    } else {
        println!("{}: {}", key.bold(), value);
    }
}

/// Prints a serializable value as compact or pretty JSON.
pub fn print_value<T: Serialize>(value: &T, json_mode: bool) {
    let rendered = if json_mode {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    };
    match rendered {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("failed to format output: {e}"),
    }
}

/// Prints a notice that is not an error.
pub fn print_notice(msg: &str, json_mode: bool) {
    if json_mode {
        let obj = serde_json::json!({ "status": "notice", "message": msg });
        println!("{obj}");
    } else {
        println!("{} {}", "•".yellow().bold(), msg);
    }
}

/// Prints an error message.
pub fn print_error(msg: &str, json_mode: bool) {
    if json_mode {
        let obj = serde_json::json!({ "error": msg });
        eprintln!("{obj}");
    } else {
        eprintln!("{} {}", "✗".red().bold(), msg);
    }
}
