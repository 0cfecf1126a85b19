//! `hotwire dispatch` command implementation

use colored::Colorize;
use hotwire_kernel::{CallerContext, HandlerOutcome};
use hotwire_plugins::DispatchReport;
use serde_json::{Value, json};

use super::console_event;
use crate::context::CliContext;

/// Execute the `hotwire dispatch` command
pub async fn run(
    ctx: &CliContext,
    text: &str,
    user: &str,
    group: Option<&str>,
    owner: bool,
    as_json: bool,
) -> anyhow::Result<()> {
    let host = ctx.one_shot_host();
    host.rescan().await;

    let caller = match group {
        Some(group) => CallerContext::group(user, group),
        None => CallerContext::direct(user),
    };
    let owner = owner || ctx.is_owner(user);
    let event = console_event(text, caller, owner);
    let report = host.dispatch_detailed(event.clone()).await;

    if as_json {
        let mut value = report_json(&report);
        value["replies"] = serde_json::to_value(event.replies())?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else if report.matched {
        println!(
            "{} {} handler(s) ran",
            "matched:".green(),
            report.executed.len()
        );
    } else {
        println!("{}", "no handler matched".yellow());
        for denial in &report.denials {
            println!("  {} {} ({})", denial.plugin, denial.pattern, denial.reason);
        }
    }

    host.stop();
    Ok(())
}

fn report_json(report: &DispatchReport) -> Value {
    let executed: Vec<Value> = report
        .executed
        .iter()
        .map(|step| {
            let outcome = match &step.outcome {
                HandlerOutcome::Continue => json!({ "continue": true }),
                HandlerOutcome::Stop(Ok(value)) => json!({ "stop": value }),
                HandlerOutcome::Stop(Err(failure)) => json!({ "failure": failure.to_string() }),
            };
            json!({ "plugin": step.plugin, "handler": step.handler, "outcome": outcome })
        })
        .collect();

    json!({
        "matched": report.matched,
        "generation": report.generation,
        "executed": executed,
        "denials": report.denials,
        "failure": report.failure,
    })
}
