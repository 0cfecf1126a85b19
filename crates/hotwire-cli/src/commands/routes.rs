//! `hotwire routes` command implementation

use colored::Colorize;

use crate::context::CliContext;
use crate::output::Table;

/// Execute the `hotwire routes` command
pub async fn run(ctx: &CliContext) -> anyhow::Result<()> {
    let host = ctx.one_shot_host();
    host.rescan().await;
    let routes = host.web_routes();
    host.stop();

    if routes.is_empty() {
        println!("  No dashboard pages declared.");
        return Ok(());
    }

    println!("{} {} dashboard page(s)", "→".green(), routes.len());
    let mut table = Table::builder().headers(&["Path", "Menu", "Icon", "Plugin", "Priority"]);
    for route in &routes {
        table = table.add_row(&[
            route.path.clone(),
            route.menu_name.clone(),
            route.menu_icon.clone(),
            route.plugin.clone(),
            route.priority.to_string(),
        ]);
    }
    println!("{}", table.build());
    Ok(())
}
