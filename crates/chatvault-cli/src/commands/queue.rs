//! Queue commands: enqueue, drain, stats, dead-letters, reset-queue.

use chatvault_sync::{Method, MutationRequest};

use crate::output;
use crate::session::Session;
use crate::GlobalOpts;

pub async fn enqueue(
    session: &Session,
    opts: &GlobalOpts,
    method: &str,
    url: &str,
    body: Option<&str>,
    headers: &[String],
) -> Result<(), String> {
    let method = method.parse::<Method>().map_err(|e| e.to_string())?;
    let mut request = MutationRequest::new(method, url);
    if let Some(raw) = body {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| format!("body is not valid JSON: {e}"))?;
        request = request.with_body(value);
    }
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| format!("header must be NAME:VALUE, got {header}"))?;
        request = request.with_header(name.trim(), value.trim());
    }

    let id = session.queue.enqueue(request);
    if opts.json {
        output::print_value(&serde_json::json!({ "id": id.as_str() }), true);
    } else {
        output::print_success(&format!("queued {id}"), false);
    }

    // Replay right away when online, as a worker would.
    if let Some(report) = session.queue.drain_if_ready().await {
        print_report(&report, opts);
    }
    Ok(())
}

pub async fn drain(session: &Session, opts: &GlobalOpts) -> Result<(), String> {
    if !session.queue.monitor().is_online() {
        let pending = session.queue.stats().pending;
        output::print_notice(
            &format!("offline, {pending} mutations left pending"),
            opts.json,
        );
        return Ok(());
    }
    let report = session.queue.drain().await;
    print_report(&report, opts);
    Ok(())
}

pub fn stats(session: &Session, opts: &GlobalOpts) -> Result<(), String> {
    let stats = session.queue.stats();
    if opts.json {
        output::print_value(&stats, true);
    } else {
        output::print_kv("Pending", &stats.pending.to_string(), false);
        let oldest = stats
            .oldest
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".into());
        output::print_kv("Oldest", &oldest, false);
    }
    Ok(())
}

pub fn dead_letters(session: &Session, opts: &GlobalOpts, clear: bool) -> Result<(), String> {
    if clear {
        session
            .queue
            .clear_dead_letters()
            .map_err(|e| e.to_string())?;
        output::print_success("dead letters cleared", opts.json);
        return Ok(());
    }
    output::print_value(&session.queue.dead_letters(), opts.json);
    Ok(())
}

pub fn reset(session: &Session, opts: &GlobalOpts) -> Result<(), String> {
    let discarded = session.queue.clear().map_err(|e| e.to_string())?;
    output::print_success(&format!("discarded {discarded} mutations"), opts.json);
    Ok(())
}

fn print_report(report: &chatvault_sync::DrainReport, opts: &GlobalOpts) {
    if opts.json {
        output::print_value(report, true);
        return;
    }
    if report.skipped {
        output::print_notice("a drain was already running", false);
        return;
    }
    output::print_kv(
        "Drained",
        &format!(
            "{} attempted, {} succeeded, {} re-queued, {} dead-lettered",
            report.attempted, report.succeeded, report.requeued, report.dead_lettered
        ),
        false,
    );
}
