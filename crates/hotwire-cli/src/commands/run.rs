//! `hotwire run` command implementation

use colored::Colorize;
use hotwire_kernel::CallerContext;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use super::console_event;
use crate::context::CliContext;

/// Sender of lines that carry no `user:` prefix
const CONSOLE_USER: &str = "console";

/// Execute the `hotwire run` command
pub async fn run(ctx: CliContext, watch: bool) -> anyhow::Result<()> {
    let mut config = ctx.config.clone();
    config.watch |= watch;
    let host = ctx.host(config);

    let summary = host.start().await?;
    println!(
        "{} {} plugin file(s) loaded, {} failed. Type `user[@group]: text`, Ctrl-D to quit.",
        "→".green(),
        host.status().len(),
        summary.failed.len()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                None
            }
        };
        let Some(line) = line else { break };
        let Some((caller, content)) = parse_line(&line) else {
            continue;
        };

        let owner = ctx.is_owner(&caller.user_id);
        let event = console_event(&content, caller, owner);
        if !host.dispatch(event).await {
            println!("{}", "(no match)".dimmed());
        }
    }

    host.stop();
    Ok(())
}

/// Parse `user[@group]: text`. Blank lines and `#` comments yield `None`.
fn parse_line(line: &str) -> Option<(CallerContext, String)> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || line.starts_with('#') {
        return None;
    }

    if let Some((head, rest)) = line.split_once(':') {
        let head = head.trim();
        if !head.is_empty() && !head.contains(char::is_whitespace) {
            let content = rest.strip_prefix(' ').unwrap_or(rest).to_string();
            let caller = match head.split_once('@') {
                Some((user, group)) if !user.is_empty() && !group.is_empty() => {
                    CallerContext::group(user, group)
                }
                _ => CallerContext::direct(head),
            };
            return Some((caller, content));
        }
    }
    Some((CallerContext::direct(CONSOLE_USER), line.to_string()))
}
