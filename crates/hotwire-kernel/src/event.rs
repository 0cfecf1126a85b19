//! 入站事件模型
//! Inbound event model
//!
//! The protocol adapter owns events; the dispatch core only reads their text
//! and flags and may wrap [`Event::reply`] for the duration of one handler call.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::plugin::PluginResult;

/// Chat label used for direct (non-group) conversations
pub const DIRECT_CHAT: &str = "c2c";

/// 调用方身份
/// Caller identity and chat context
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    pub user_id: String,
    pub group_id: Option<String>,
}

impl CallerContext {
    pub fn direct(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            group_id: None,
        }
    }

    pub fn group(user_id: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            group_id: Some(group_id.into()),
        }
    }

    /// Group id, or [`DIRECT_CHAT`] outside groups
    pub fn chat(&self) -> &str {
        self.group_id.as_deref().unwrap_or(DIRECT_CHAT)
    }
}

impl fmt::Display for CallerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user_id, self.chat())
    }
}

/// 回复内容
/// Outgoing reply payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplyPayload {
    Text {
        text: String,
    },
    Image {
        url: String,
        #[serde(default)]
        caption: String,
    },
    Voice {
        url: String,
        #[serde(default)]
        caption: String,
    },
    Video {
        url: String,
        #[serde(default)]
        caption: String,
    },
    Ark {
        template_id: i64,
        #[serde(default)]
        args: serde_json::Value,
    },
}

impl ReplyPayload {
    pub fn text(text: impl Into<String>) -> Self {
        ReplyPayload::Text { text: text.into() }
    }

    /// Text mirrored to the plugin log when this payload is sent
    pub fn log_text(&self) -> String {
        match self {
            ReplyPayload::Text { text } => text.clone(),
            ReplyPayload::Image { caption, .. } => format!("[image] {caption}").trim().to_string(),
            ReplyPayload::Voice { caption, .. } => format!("[voice] {caption}").trim().to_string(),
            ReplyPayload::Video { caption, .. } => format!("[video] {caption}").trim().to_string(),
            ReplyPayload::Ark { template_id, .. } => format!("[ark] {template_id}"),
        }
    }
}

/// 入站事件
/// An inbound textual event
pub trait Event: Send + Sync {
    fn content(&self) -> &str;

    fn is_owner(&self) -> bool;

    fn is_group(&self) -> bool;

    fn caller(&self) -> &CallerContext;

    /// Send a reply back to where the event came from
    fn reply(&self, payload: ReplyPayload) -> PluginResult<()>;

    /// Already consumed upstream; dispatch reports a match without running anything
    fn handled(&self) -> bool {
        false
    }
}

type ReplyCallback = Box<dyn Fn(&ReplyPayload) + Send + Sync>;

/// In-process event that records every reply it is asked to send
pub struct MessageEvent {
    content: String,
    owner: bool,
    handled: bool,
    caller: CallerContext,
    replies: Mutex<Vec<ReplyPayload>>,
    on_reply: Option<ReplyCallback>,
}

impl MessageEvent {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            owner: false,
            handled: false,
            caller: CallerContext::default(),
            replies: Mutex::new(Vec::new()),
            on_reply: None,
        }
    }

    pub fn with_caller(mut self, caller: CallerContext) -> Self {
        self.caller = caller;
        self
    }

    pub fn with_owner(mut self, owner: bool) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_handled(mut self, handled: bool) -> Self {
        self.handled = handled;
        self
    }

    /// Invoke `callback` for every reply, after it is recorded
    pub fn on_reply<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ReplyPayload) + Send + Sync + 'static,
    {
        self.on_reply = Some(Box::new(callback));
        self
    }

    pub fn replies(&self) -> Vec<ReplyPayload> {
        self.replies.lock().clone()
    }

    pub fn reply_texts(&self) -> Vec<String> {
        self.replies.lock().iter().map(ReplyPayload::log_text).collect()
    }
}

impl Event for MessageEvent {
    fn content(&self) -> &str {
        &self.content
    }

    fn is_owner(&self) -> bool {
        self.owner
    }

    fn is_group(&self) -> bool {
        self.caller.group_id.is_some()
    }

    fn caller(&self) -> &CallerContext {
        &self.caller
    }

    fn reply(&self, payload: ReplyPayload) -> PluginResult<()> {
        self.replies.lock().push(payload.clone());
        if let Some(callback) = &self.on_reply {
            callback(&payload);
        }
        Ok(())
    }

    fn handled(&self) -> bool {
        self.handled
    }
}

impl fmt::Debug for MessageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageEvent")
            .field("content", &self.content)
            .field("owner", &self.owner)
            .field("handled", &self.handled)
            .field("caller", &self.caller)
            .finish_non_exhaustive()
    }
}
