//! `hotwire list` command implementation

use colored::Colorize;
use hotwire_plugins::index::display_path;

use crate::context::CliContext;
use crate::output::Table;

/// Execute the `hotwire list` command
pub async fn run(ctx: &CliContext) -> anyhow::Result<()> {
    let host = ctx.one_shot_host();
    let summary = host.rescan().await;
    let status = host.status();

    println!(
        "{} {} plugin file(s) under {}",
        "→".green(),
        status.len(),
        host.loader().root().display()
    );
    if !summary.failed.is_empty() {
        println!(
            "  {} {} file(s) failed to load",
            "!".red(),
            summary.failed.len()
        );
    }
    if status.is_empty() {
        host.stop();
        return Ok(());
    }

    let mut table = Table::builder().headers(&[
        "File",
        "Plugins",
        "Priority",
        "Handlers",
        "State",
        "Generation",
    ]);
    for (path, entry) in &status {
        table = table.add_row(&[
            display_path(path),
            entry.plugins.join(", "),
            entry.priority.to_string(),
            entry.binding_count.to_string(),
            entry.state.to_string(),
            entry.generation.to_string(),
        ]);
    }
    println!("{}", table.build());

    host.stop();
    Ok(())
}
