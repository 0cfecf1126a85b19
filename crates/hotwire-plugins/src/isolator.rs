//! Isolated handler execution
//!
//! Every handler call runs on the worker pool under a hard timeout. Errors and
//! panics are contained and reported with the caller's context; a timeout
//! abandons the call silently. While a call is attached, replies it sends are
//! mirrored to the plugin log.

use error_stack::Report;
use hotwire_kernel::{
    CallerContext, Event, HandlerCall, HandlerFailure, HandlerOutcome, HandlerReturn, PluginError,
    PluginResult, PluginUnit, ReplyPayload, SharedLogSink,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::index::HandlerBinding;
use crate::worker_pool::{WorkerPool, panic_message};

/// Runs single handler calls in isolation
pub struct Isolator {
    pool: WorkerPool,
    timeout: Duration,
    sink: SharedLogSink,
    content_limit: usize,
}

impl Isolator {
    pub fn new(pool: WorkerPool, timeout: Duration, sink: SharedLogSink, content_limit: usize) -> Self {
        Self {
            pool,
            timeout,
            sink,
            content_limit,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run `binding`'s handler against `event` with the binding's own captures.
    pub async fn run(
        &self,
        binding: &HandlerBinding,
        event: &Arc<dyn Event>,
        captures: Vec<Option<String>>,
    ) -> HandlerOutcome {
        self.run_pinned(binding, binding.plugin.unit(), event, captures)
            .await
    }

    /// Like [`Isolator::run`], on a unit the caller took from the descriptor
    /// earlier. The call goes to that unit even if the descriptor has been
    /// released since.
    pub async fn run_pinned(
        &self,
        binding: &HandlerBinding,
        unit: Option<Arc<dyn PluginUnit>>,
        event: &Arc<dyn Event>,
        captures: Vec<Option<String>>,
    ) -> HandlerOutcome {
        let plugin = &binding.plugin;
        let Some(unit) = unit else {
            debug!(plugin = %plugin.id(), "plugin code already reclaimed");
            return HandlerOutcome::Stop(Err(HandlerFailure::Unavailable(format!(
                "{} was unloaded",
                plugin.id()
            ))));
        };

        let (tap, _attached) = ReplyTap::attach(event.clone(), &plugin.symbol, self.sink.clone());
        let call = HandlerCall {
            plugin: plugin.symbol.clone(),
            handler: binding.handler.clone(),
            captures,
            event: tap,
        };

        let receiver = match self.pool.submit(move || unit.invoke(call)) {
            Ok(receiver) => receiver,
            Err(e) => {
                self.report(binding, event, PluginError::Dispatch(e.to_string()));
                return HandlerOutcome::Stop(Err(HandlerFailure::Unavailable(e.to_string())));
            }
        };

        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(Ok(Ok(value)))) => value.into(),
            Ok(Ok(Ok(Err(e)))) => {
                let failure = HandlerFailure::Error(e.to_string());
                self.report(binding, event, e);
                HandlerOutcome::Stop(Err(failure))
            }
            Ok(Ok(Err(payload))) => {
                let message = panic_message(payload.as_ref());
                self.report(
                    binding,
                    event,
                    PluginError::Execution(format!("handler panicked: {message}")),
                );
                HandlerOutcome::Stop(Err(HandlerFailure::Panicked(message)))
            }
            Ok(Err(_)) => {
                let e = PluginError::Dispatch("worker dropped the call".to_string());
                let failure = HandlerFailure::Unavailable(e.to_string());
                self.report(binding, event, e);
                HandlerOutcome::Stop(Err(failure))
            }
            Err(_) => {
                debug!(
                    plugin = %plugin.id(),
                    handler = %binding.handler,
                    timeout = ?self.timeout,
                    "handler timed out, abandoning call"
                );
                HandlerOutcome::Stop(Err(HandlerFailure::TimedOut(self.timeout)))
            }
        }
    }

    fn report(&self, binding: &HandlerBinding, event: &Arc<dyn Event>, error: PluginError) {
        let caller = event.caller();
        let text = format!(
            "plugin {} handler {} failed: {}",
            binding.plugin.symbol, binding.handler, error
        );
        let report = Report::new(error)
            .attach(format!("plugin: {}", binding.plugin.id()))
            .attach(format!("handler: {}", binding.handler))
            .attach(format!("user: {}", caller.user_id))
            .attach(format!("chat: {}", caller.chat()))
            .attach(format!(
                "content: {}",
                truncate(event.content(), self.content_limit)
            ));
        self.sink.error(&text, &format!("{report:?}"));
    }
}

/// First `limit` characters of `text`
pub fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Event wrapper that mirrors replies to the plugin log while attached.
struct ReplyTap {
    inner: Arc<dyn Event>,
    plugin: String,
    sink: SharedLogSink,
    attached: Arc<AtomicBool>,
}

/// Detaches its tap when dropped
struct Attached(Arc<AtomicBool>);

impl Drop for Attached {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ReplyTap {
    fn attach(inner: Arc<dyn Event>, plugin: &str, sink: SharedLogSink) -> (Arc<dyn Event>, Attached) {
        let attached = Arc::new(AtomicBool::new(true));
        let tap = ReplyTap {
            inner,
            plugin: plugin.to_string(),
            sink,
            attached: attached.clone(),
        };
        (Arc::new(tap), Attached(attached))
    }
}

impl Event for ReplyTap {
    fn content(&self) -> &str {
        self.inner.content()
    }

    fn is_owner(&self) -> bool {
        self.inner.is_owner()
    }

    fn is_group(&self) -> bool {
        self.inner.is_group()
    }

    fn caller(&self) -> &CallerContext {
        self.inner.caller()
    }

    fn reply(&self, payload: ReplyPayload) -> PluginResult<()> {
        if self.attached.load(Ordering::SeqCst) {
            self.sink
                .plugin(&payload.log_text(), self.inner.caller(), &self.plugin);
        }
        self.inner.reply(payload)
    }

    fn handled(&self) -> bool {
        self.inner.handled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PluginRegistry;
    use crate::testing::StaticUnit;
    use hotwire_kernel::{MemoryLogSink, MessageEvent, PluginDeclaration};
    use serde_json::json;
    use std::path::Path;
    use std::time::Instant;

    struct Fixture {
        registry: PluginRegistry,
        isolator: Isolator,
        logs: Arc<MemoryLogSink>,
    }

    fn fixture(unit: StaticUnit, timeout: Duration) -> Fixture {
        let logs = Arc::new(MemoryLogSink::default());
        let registry = PluginRegistry::default();
        let decls = unit.declarations();
        registry.install(Path::new("p/unit.rhai"), unit.into_arc(), decls);
        let isolator = Isolator::new(
            WorkerPool::new("test-plugin-worker", 8),
            timeout,
            SharedLogSink::new(logs.clone()),
            10,
        );
        Fixture {
            registry,
            isolator,
            logs,
        }
    }

    fn event(content: &str) -> (Arc<MessageEvent>, Arc<dyn Event>) {
        let event = Arc::new(
            MessageEvent::new(content).with_caller(CallerContext::group("u7", "g3")),
        );
        let dyn_event: Arc<dyn Event> = event.clone();
        (event, dyn_event)
    }

    fn declaration() -> PluginDeclaration {
        PluginDeclaration::new("Echo").with_handler("^echo (.*)$", json!("run"))
    }

    #[tokio::test]
    async fn success_mirrors_replies_and_passes_captures() {
        let unit = StaticUnit::new("p/unit.rhai")
            .declare(declaration())
            .handler("run", |call| {
                let text = call.captures[0].clone().unwrap_or_default();
                call.event.reply(ReplyPayload::text(text))?;
                Ok(HandlerReturn::Value(json!("done")))
            });
        let f = fixture(unit, Duration::from_secs(1));
        let binding = f.registry.snapshot().bindings()[0].clone();
        let (message, event) = event("echo hi");

        let outcome = f
            .isolator
            .run(&binding, &event, binding.match_content("echo hi").unwrap())
            .await;

        assert_eq!(outcome, HandlerOutcome::Stop(Ok(json!("done"))));
        assert_eq!(message.reply_texts(), vec!["hi".to_string()]);
        assert_eq!(f.logs.plugin_logs(), vec![("hi".to_string(), "Echo".to_string())]);
    }

    #[tokio::test]
    async fn continue_sentinel_passes_through() {
        let unit = StaticUnit::new("p/unit.rhai")
            .declare(declaration())
            .handler("run", |_| Ok(HandlerReturn::Continue));
        let f = fixture(unit, Duration::from_secs(1));
        let binding = f.registry.snapshot().bindings()[0].clone();
        let (_, event) = event("echo");
        assert!(f.isolator.run(&binding, &event, vec![]).await.is_continue());
    }

    #[tokio::test]
    async fn errors_are_reported_with_context() {
        let unit = StaticUnit::new("p/unit.rhai")
            .declare(declaration())
            .handler("run", |_| Err(PluginError::Execution("division by zero".into())));
        let f = fixture(unit, Duration::from_secs(1));
        let binding = f.registry.snapshot().bindings()[0].clone();
        let (_, event) = event("echo this is a long message");

        let outcome = f.isolator.run(&binding, &event, vec![]).await;
        assert!(matches!(outcome, HandlerOutcome::Stop(Err(HandlerFailure::Error(_)))));

        let errors = f.logs.error_logs();
        assert_eq!(errors.len(), 1);
        let (text, detail) = &errors[0];
        assert!(text.contains("Echo"));
        assert!(text.contains("division by zero"));
        assert!(detail.contains("handler: run"));
        assert!(detail.contains("user: u7"));
        assert!(detail.contains("chat: g3"));
        assert!(detail.contains("content: echo this "));
        assert!(!detail.contains("long message"));
    }

    #[tokio::test]
    async fn panics_are_contained_and_reported() {
        let unit = StaticUnit::new("p/unit.rhai")
            .declare(declaration())
            .handler("run", |_| panic!("plugin bug"));
        let f = fixture(unit, Duration::from_secs(1));
        let binding = f.registry.snapshot().bindings()[0].clone();
        let (_, event) = event("echo");

        let outcome = f.isolator.run(&binding, &event, vec![]).await;
        assert_eq!(
            outcome,
            HandlerOutcome::Stop(Err(HandlerFailure::Panicked("plugin bug".into())))
        );
        assert_eq!(f.logs.error_logs().len(), 1);
    }

    #[tokio::test]
    async fn timeout_is_silent_and_detaches_the_tap() {
        let unit = StaticUnit::new("p/unit.rhai")
            .declare(declaration())
            .handler("run", |call| {
                std::thread::sleep(Duration::from_millis(250));
                call.event.reply(ReplyPayload::text("too late"))?;
                Ok(HandlerReturn::Continue)
            });
        let f = fixture(unit, Duration::from_millis(50));
        let binding = f.registry.snapshot().bindings()[0].clone();
        let (message, event) = event("echo");

        let started = Instant::now();
        let outcome = f.isolator.run(&binding, &event, vec![]).await;
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(
            outcome,
            HandlerOutcome::Stop(Err(HandlerFailure::TimedOut(Duration::from_millis(50))))
        );

        tokio::time::sleep(Duration::from_millis(400)).await;
        // the abandoned call still delivered its reply, but unmirrored
        assert_eq!(message.reply_texts(), vec!["too late".to_string()]);
        assert!(f.logs.plugin_logs().is_empty());
        assert!(f.logs.error_logs().is_empty());
    }

    #[tokio::test]
    async fn reclaimed_unit_is_unavailable() {
        let unit = StaticUnit::new("p/unit.rhai")
            .declare(declaration())
            .handler("run", |_| Ok(HandlerReturn::Continue));
        let f = fixture(unit, Duration::from_secs(1));
        let binding = f.registry.snapshot().bindings()[0].clone();
        binding.plugin.release();
        let (_, event) = event("echo");

        let outcome = f.isolator.run(&binding, &event, vec![]).await;
        assert!(matches!(
            outcome,
            HandlerOutcome::Stop(Err(HandlerFailure::Unavailable(_)))
        ));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("short", 50), "short");
        assert_eq!(truncate("", 3), "");
    }
}
