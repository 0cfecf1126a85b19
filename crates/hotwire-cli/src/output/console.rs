//! Terminal log sink and reply printing

use colored::Colorize;
use hotwire_kernel::{CallerContext, LogSink, ReplyPayload};

/// Prints every sink record to stdout, one colored line each
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleLogSink;

impl LogSink for ConsoleLogSink {
    fn add_framework_log(&self, text: &str) {
        println!("{} {}", "[framework]".cyan(), text);
    }

    fn add_error_log(&self, text: &str, detail: &str) {
        println!("{} {}", "[error]".red().bold(), text);
        for line in detail.lines() {
            println!("        {}", line.dimmed());
        }
    }

    fn add_plugin_log(&self, text: &str, caller: &CallerContext, plugin_name: &str) {
        println!(
            "{} {} -> {}: {}",
            "[plugin]".magenta(),
            plugin_name,
            caller,
            text
        );
    }
}

pub fn print_reply(payload: &ReplyPayload) {
    match payload {
        ReplyPayload::Text { text } => println!("{} {}", "<".green(), text),
        ReplyPayload::Image { url, .. }
        | ReplyPayload::Voice { url, .. }
        | ReplyPayload::Video { url, .. } => {
            println!("{} {} {}", "<".green(), payload.log_text(), url.dimmed())
        }
        ReplyPayload::Ark { args, .. } => {
            println!("{} {} {}", "<".green(), payload.log_text(), args)
        }
    }
}
