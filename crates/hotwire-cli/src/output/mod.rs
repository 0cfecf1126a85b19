//! Output formatting module
//!
//! Tables for listings and a console log sink for `--show-logs`.

mod console;
mod table;

pub use console::{ConsoleLogSink, print_reply};
pub use table::Table;
