//! Wire protocol: one JSON object per WebSocket message.
//!
//! Inbound messages are classified rather than strictly typed: anything that
//! parses as JSON is accepted, and only the `render_effect` + `fire_tornado`
//! pair is treated as a render request. Everything else is echoed.

use serde::Serialize;
use serde_json::Value;

use crate::effect::{EffectParameters, Position};
use crate::errors::EffectError;
use crate::tornado::{RenderedEffect, EFFECT_TYPE};

pub const RENDER_COMMAND: &str = "render_effect";

/// A decoded inbound message.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// `render_effect` for `fire_tornado`. The config is decoded later so a
    /// bad config can be answered with an error envelope.
    RenderTornado {
        effect_id: Value,
        config: Option<Value>,
    },
    /// Any other well-formed JSON value.
    Echo(Value),
}

impl Inbound {
    /// Parse raw text. A JSON syntax error is the only failure.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::classify(value))
    }

    pub fn classify(value: Value) -> Self {
        let is_render = value.get("command").and_then(Value::as_str) == Some(RENDER_COMMAND)
            && value.get("effectType").and_then(Value::as_str) == Some(EFFECT_TYPE);

        if !is_render {
            return Self::Echo(value);
        }

        Self::RenderTornado {
            effect_id: value.get("effectId").cloned().unwrap_or(Value::Null),
            config: value.get("config").cloned(),
        }
    }
}

/// Messages the relay sends. Serialized with a `type` discriminator.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Outbound {
    /// Direct reply to the requester, with full particle data.
    EffectRendered {
        effect_type: &'static str,
        effect_id: Value,
        render_time: f64,
        data: RenderedEffect,
        timestamp: i64,
    },
    /// Reduced notification for every other connection.
    EffectBroadcast {
        effect_type: &'static str,
        position: Position,
        config: EffectParameters,
        timestamp: i64,
    },
    /// Acknowledgment for anything that is not a render request.
    Response {
        original: Value,
        processed: bool,
        port: u16,
        timestamp: i64,
    },
    /// Render request rejected before generation.
    Error {
        code: &'static str,
        message: String,
        effect_id: Value,
        timestamp: i64,
    },
}

impl Outbound {
    pub fn rendered(effect_id: Value, effect: RenderedEffect, render_time: f64) -> Self {
        Self::EffectRendered {
            effect_type: EFFECT_TYPE,
            effect_id,
            render_time,
            data: effect,
            timestamp: now_millis(),
        }
    }

    pub fn broadcast(position: Position, parameters: EffectParameters) -> Self {
        Self::EffectBroadcast {
            effect_type: EFFECT_TYPE,
            position,
            config: parameters,
            timestamp: now_millis(),
        }
    }

    pub fn echo(original: Value, port: u16) -> Self {
        Self::Response {
            original,
            processed: true,
            port,
            timestamp: now_millis(),
        }
    }

    pub fn error(effect_id: Value, err: &EffectError) -> Self {
        Self::Error {
            code: err.code(),
            message: err.to_string(),
            effect_id,
            timestamp: now_millis(),
        }
    }

    /// The `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EffectRendered { .. } => "effect_rendered",
            Self::EffectBroadcast { .. } => "effect_broadcast",
            Self::Response { .. } => "response",
            Self::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
