//! `hotwire check` command implementation

use colored::Colorize;
use hotwire_kernel::HandlerConfig;
use hotwire_plugins::PatternCache;
use std::path::Path;

use crate::context::CliContext;
use crate::output::Table;

/// Execute the `hotwire check` command
///
/// The file is loaded by its backend and registered nowhere; patterns and
/// handler configs are validated the way the registry would.
pub fn run(ctx: &CliContext, file: &Path) -> anyhow::Result<()> {
    let host = ctx.one_shot_host();
    let declarations = host
        .loader()
        .inspect(file)
        .map_err(|report| anyhow::anyhow!("{} failed to load\n{:?}", file.display(), report))?;
    host.stop();

    if declarations.is_empty() {
        println!("{} {} declares no plugin", "!".yellow(), file.display());
        return Ok(());
    }

    let patterns = PatternCache::new(ctx.config.pattern_cache_capacity);
    let mut problems = 0;
    for declaration in &declarations {
        println!(
            "{} {} (priority {})",
            "→".green(),
            declaration.name.bold(),
            declaration.priority
        );
        let mut table = Table::builder().headers(&["Pattern", "Handler", "Status"]);
        for handler in &declaration.handlers {
            let (name, status) = match HandlerConfig::parse(&handler.pattern, &handler.config) {
                Ok(config) => match patterns.try_compile(&handler.pattern) {
                    Ok(_) => (config.handler().to_string(), "ok".to_string()),
                    Err(e) => {
                        problems += 1;
                        (config.handler().to_string(), format!("invalid pattern: {e}"))
                    }
                },
                Err(e) => {
                    problems += 1;
                    (String::new(), e.to_string())
                }
            };
            table = table.add_row(&[handler.pattern.clone(), name, status]);
        }
        println!("{}", table.build());
        if !declaration.web_pages.is_empty() {
            println!("  {} dashboard page(s)", declaration.web_pages.len());
        }
    }

    if problems > 0 {
        anyhow::bail!("{} binding(s) would be rejected", problems);
    }
    Ok(())
}
