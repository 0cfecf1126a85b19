//! Script-facing event object and the continue sentinel.

use hotwire_kernel::{Event, ReplyPayload};
use rhai::{Array, Dynamic, Engine, EvalAltResult};
use std::sync::Arc;

use hotwire_extra::rhai::dynamic_to_json;

/// Value returned by `continue_chain()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainSignal;

/// The event as seen by a script handler
#[derive(Clone)]
pub struct ScriptEvent {
    event: Arc<dyn Event>,
    matches: Vec<Option<String>>,
}

impl ScriptEvent {
    pub fn new(event: Arc<dyn Event>, matches: Vec<Option<String>>) -> Self {
        Self { event, matches }
    }

    fn send(&mut self, payload: ReplyPayload) -> Result<(), Box<EvalAltResult>> {
        self.event
            .reply(payload)
            .map_err(|e| format!("reply failed: {e}").into())
    }

    fn matches(&mut self) -> Array {
        self.matches
            .iter()
            .map(|m| match m {
                Some(text) => Dynamic::from(text.clone()),
                None => Dynamic::UNIT,
            })
            .collect()
    }
}

type ScriptResult = Result<(), Box<EvalAltResult>>;

/// Register `Event`, `ChainSignal` and the reply methods on `engine`.
pub fn register_event_api(engine: &mut Engine) {
    engine
        .register_type_with_name::<ChainSignal>("ChainSignal")
        .register_fn("continue_chain", || ChainSignal)
        .register_fn("to_string", |_: &mut ChainSignal| "continue".to_string());

    engine
        .register_type_with_name::<ScriptEvent>("Event")
        .register_get("content", |e: &mut ScriptEvent| e.event.content().to_string())
        .register_get("is_owner", |e: &mut ScriptEvent| e.event.is_owner())
        .register_get("is_group", |e: &mut ScriptEvent| e.event.is_group())
        .register_get("user_id", |e: &mut ScriptEvent| e.event.caller().user_id.clone())
        .register_get("group_id", |e: &mut ScriptEvent| {
            match &e.event.caller().group_id {
                Some(group) => Dynamic::from(group.clone()),
                None => Dynamic::UNIT,
            }
        })
        .register_get("chat", |e: &mut ScriptEvent| e.event.caller().chat().to_string())
        .register_get("matches", ScriptEvent::matches)
        .register_fn("to_string", |e: &mut ScriptEvent| {
            format!("Event({})", e.event.caller())
        });

    engine
        .register_fn("reply", |e: &mut ScriptEvent, text: &str| -> ScriptResult {
            e.send(ReplyPayload::text(text))
        })
        .register_fn("reply_image", |e: &mut ScriptEvent, url: &str| -> ScriptResult {
            e.send(ReplyPayload::Image {
                url: url.to_string(),
                caption: String::new(),
            })
        })
        .register_fn(
            "reply_image",
            |e: &mut ScriptEvent, url: &str, caption: &str| -> ScriptResult {
                e.send(ReplyPayload::Image {
                    url: url.to_string(),
                    caption: caption.to_string(),
                })
            },
        )
        .register_fn("reply_voice", |e: &mut ScriptEvent, url: &str| -> ScriptResult {
            e.send(ReplyPayload::Voice {
                url: url.to_string(),
                caption: String::new(),
            })
        })
        .register_fn(
            "reply_voice",
            |e: &mut ScriptEvent, url: &str, caption: &str| -> ScriptResult {
                e.send(ReplyPayload::Voice {
                    url: url.to_string(),
                    caption: caption.to_string(),
                })
            },
        )
        .register_fn("reply_video", |e: &mut ScriptEvent, url: &str| -> ScriptResult {
            e.send(ReplyPayload::Video {
                url: url.to_string(),
                caption: String::new(),
            })
        })
        .register_fn(
            "reply_video",
            |e: &mut ScriptEvent, url: &str, caption: &str| -> ScriptResult {
                e.send(ReplyPayload::Video {
                    url: url.to_string(),
                    caption: caption.to_string(),
                })
            },
        )
        .register_fn("reply_ark", |e: &mut ScriptEvent, template_id: i64| -> ScriptResult {
            e.send(ReplyPayload::Ark {
                template_id,
                args: serde_json::Value::Null,
            })
        })
        .register_fn(
            "reply_ark",
            |e: &mut ScriptEvent, template_id: i64, args: Dynamic| -> ScriptResult {
                e.send(ReplyPayload::Ark {
                    template_id,
                    args: dynamic_to_json(&args),
                })
            },
        );
}
