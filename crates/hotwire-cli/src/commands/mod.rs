//! CLI command implementations

pub mod check;
pub mod dispatch;
pub mod list;
pub mod routes;
pub mod run;

use hotwire_kernel::{CallerContext, MessageEvent};
use std::sync::Arc;

use crate::output::print_reply;

/// Event whose replies are printed as they are sent
pub(crate) fn console_event(content: &str, caller: CallerContext, owner: bool) -> Arc<MessageEvent> {
    Arc::new(
        MessageEvent::new(content)
            .with_caller(caller)
            .with_owner(owner)
            .on_reply(print_reply),
    )
}
