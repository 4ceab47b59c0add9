//! Identity commands: whoami, login, logout.

use crate::output;
use crate::session::Session;
use crate::GlobalOpts;

pub fn whoami(session: &Session, opts: &GlobalOpts) -> Result<(), String> {
    let namespace = session.store.namespace();
    let logged_in = session.store.identity().token().is_some();

    if opts.json {
        let obj = serde_json::json!({
            "namespace": namespace.as_str(),
            "kind": namespace.kind().to_string(),
            "logged_in": logged_in,
        });
        output::print_value(&obj, true);
    } else {
        output::print_kv("Namespace", namespace.as_str(), false);
        output::print_kv("Kind", &namespace.kind().to_string(), false);
        output::print_kv("Logged in", if logged_in { "yes" } else { "no" }, false);
    }
    Ok(())
}

pub fn login(session: &Session, opts: &GlobalOpts, token: &str) -> Result<(), String> {
    session
        .store
        .identity()
        .login(token)
        .map_err(|e| e.to_string())?;
    let namespace = session.store.namespace();
    output::print_success(&format!("logged in as {namespace}"), opts.json);
    Ok(())
}

pub fn logout(session: &Session, opts: &GlobalOpts) -> Result<(), String> {
    session
        .store
        .identity()
        .logout()
        .map_err(|e| e.to_string())?;
    let namespace = session.store.namespace();
    output::print_success(&format!("logged out, now {namespace}"), opts.json);
    Ok(())
}
