//! Message dispatcher
//!
//! Matches one event against the published index and runs the permitted
//! matches as a chain. Candidates are collected up front from a single index
//! generation, each with its plugin unit pinned, so a reload or a reclaimer
//! sweep mid-chain cannot take code away from a later step. The chain halts at
//! the first handler that does not return the continue sentinel.

use futures::FutureExt;
use hotwire_kernel::{Denial, Event, HandlerOutcome, PluginUnit, SharedLogSink};
use serde::Serialize;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

use crate::index::{CompiledIndex, HandlerBinding};
use crate::isolator::Isolator;
use crate::registry::PluginRegistry;
use crate::worker_pool::panic_message;

/// A textual match that was refused by its permission predicate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeniedMatch {
    pub plugin: String,
    pub pattern: String,
    pub reason: Denial,
}

/// A permitted match awaiting execution
#[derive(Clone)]
pub struct Candidate {
    pub binding: Arc<HandlerBinding>,
    pub captures: Vec<Option<String>>,
    /// Unit held for the whole dispatch; `None` if already reclaimed
    pub unit: Option<Arc<dyn PluginUnit>>,
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("binding", &self.binding)
            .field("captures", &self.captures)
            .field("pinned", &self.unit.is_some())
            .finish()
    }
}

/// Everything one event matched, in index order
#[derive(Debug, Default)]
pub struct Candidates {
    pub generation: u64,
    pub chain: Vec<Candidate>,
    pub denials: Vec<DeniedMatch>,
}

/// Record of one executed chain step
#[derive(Debug, Clone)]
pub struct ExecutedStep {
    pub plugin: String,
    pub handler: String,
    pub outcome: HandlerOutcome,
}

/// Detailed result of a dispatch
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub matched: bool,
    pub generation: u64,
    pub executed: Vec<ExecutedStep>,
    pub denials: Vec<DeniedMatch>,
    /// Set when the dispatch machinery itself failed
    pub failure: Option<String>,
}

/// Collect matching, permitted bindings from one index generation.
pub fn collect_candidates(
    index: &CompiledIndex,
    content: &str,
    is_owner: bool,
    is_group: bool,
) -> Candidates {
    let mut candidates = Candidates {
        generation: index.generation,
        ..Default::default()
    };

    for binding in index.iter() {
        let Some(captures) = binding.match_content(content) else {
            continue;
        };
        match binding.check(is_owner, is_group) {
            Ok(()) => candidates.chain.push(Candidate {
                binding: binding.clone(),
                captures,
                unit: binding.plugin.unit(),
            }),
            Err(reason) => {
                debug!(
                    plugin = %binding.plugin.id(),
                    pattern = %binding.pattern,
                    %reason,
                    "permission denied"
                );
                candidates.denials.push(DeniedMatch {
                    plugin: binding.plugin.id(),
                    pattern: binding.pattern.clone(),
                    reason,
                });
            }
        }
    }

    candidates
}

/// Routes events to handler chains
pub struct Dispatcher {
    registry: Arc<PluginRegistry>,
    isolator: Arc<Isolator>,
    sink: SharedLogSink,
}

impl Dispatcher {
    pub fn new(registry: Arc<PluginRegistry>, isolator: Arc<Isolator>, sink: SharedLogSink) -> Self {
        Self {
            registry,
            isolator,
            sink,
        }
    }

    /// Candidates for `content` against the current index
    pub fn candidates(&self, content: &str, is_owner: bool, is_group: bool) -> Candidates {
        collect_candidates(&self.registry.snapshot(), content, is_owner, is_group)
    }

    /// Dispatch `event`; `true` when at least one permitted handler matched.
    pub async fn dispatch(&self, event: Arc<dyn Event>) -> bool {
        self.dispatch_detailed(event).await.matched
    }

    /// Dispatch `event` and return what ran.
    ///
    /// Never panics: a failure of the dispatch machinery is reported and
    /// yields an unmatched report.
    pub async fn dispatch_detailed(&self, event: Arc<dyn Event>) -> DispatchReport {
        let guarded = AssertUnwindSafe(self.run_chain(event.clone())).catch_unwind();
        match guarded.await {
            Ok(report) => report,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("dispatch failed: {}", message);
                self.sink.error(
                    &format!("dispatch failed for content from {}", event.caller()),
                    &message,
                );
                DispatchReport {
                    failure: Some(message),
                    ..Default::default()
                }
            }
        }
    }

    async fn run_chain(&self, event: Arc<dyn Event>) -> DispatchReport {
        if event.handled() {
            debug!(caller = %event.caller(), "event already handled");
            return DispatchReport {
                matched: true,
                generation: self.registry.snapshot().generation,
                ..Default::default()
            };
        }

        let candidates = self.candidates(event.content(), event.is_owner(), event.is_group());
        let mut report = DispatchReport {
            matched: !candidates.chain.is_empty(),
            generation: candidates.generation,
            denials: candidates.denials,
            ..Default::default()
        };

        if candidates.chain.is_empty() {
            if !report.denials.is_empty() {
                debug!(denied = report.denials.len(), "only denied matches");
            }
            return report;
        }

        for candidate in candidates.chain {
            let binding = candidate.binding;
            let outcome = self
                .isolator
                .run_pinned(&binding, candidate.unit, &event, candidate.captures)
                .await;
            let proceed = outcome.is_continue();
            report.executed.push(ExecutedStep {
                plugin: binding.plugin.id(),
                handler: binding.handler.clone(),
                outcome,
            });
            if !proceed {
                break;
            }
        }

        report
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }
}
