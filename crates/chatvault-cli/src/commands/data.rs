//! Storage commands: set, get, remove, clear.

use crate::output;
use crate::session::Session;
use crate::GlobalOpts;

pub fn set(session: &Session, opts: &GlobalOpts, key: &str, raw: &str) -> Result<(), String> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| format!("value is not valid JSON: {e}"))?;
    session.store.set(key, &value).map_err(|e| e.to_string())?;

    let layout = match session.store.layout(key) {
        Some(layout) => format!("{layout:?}"),
        None => "unknown".into(),
    };
    tracing::debug!(key, layout = %layout, "value stored");
    output::print_success(&format!("stored {key}"), opts.json);
    Ok(())
}

pub fn get(session: &Session, opts: &GlobalOpts, key: &str) -> Result<(), String> {
    match session.store.try_get::<serde_json::Value>(key) {
        Some(value) => output::print_value(&value, opts.json),
        None => {
            if opts.json {
                output::print_value(&serde_json::json!({ "found": false }), true);
            } else {
                output::print_notice(&format!("{key} not found"), false);
            }
        }
    }
    Ok(())
}

pub fn remove(session: &Session, opts: &GlobalOpts, key: &str) -> Result<(), String> {
    session.store.remove(key).map_err(|e| e.to_string())?;
    output::print_success(&format!("removed {key}"), opts.json);
    Ok(())
}

/// Clears a whole namespace kind, or the current actor with `current`.
pub fn clear(session: &Session, opts: &GlobalOpts, namespace: &str) -> Result<(), String> {
    let removed = if namespace == "current" {
        session.store.clear_current()
    } else {
        session.store.clear_namespace(namespace)
    }
    .map_err(|e| e.to_string())?;

    output::print_success(&format!("removed {removed} records"), opts.json);
    Ok(())
}
