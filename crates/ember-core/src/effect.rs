//! Effect configuration carried by `render_effect` requests.

use serde::{Deserialize, Serialize};

use crate::errors::EffectError;

/// Upper bound on particles per render unless the server overrides it.
pub const DEFAULT_MAX_PARTICLE_COUNT: u32 = 50_000;

/// Scene-space anchor of an effect.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Generator parameters. Echoed verbatim in the peer broadcast.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectParameters {
    /// Signed so negative counts surface as a validation error, not a decode error.
    pub particle_count: i64,
    pub spiral_layers: i64,
    /// Playback duration in milliseconds.
    pub duration: f64,
    #[serde(default = "default_color_scheme")]
    pub color_scheme: String,
}

fn default_color_scheme() -> String {
    "fire".into()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EffectConfig {
    pub position: Position,
    pub parameters: EffectParameters,
}

impl EffectConfig {
    /// Decode a config from the raw `config` field of a command.
    pub fn from_value(value: Option<&serde_json::Value>) -> Result<Self, EffectError> {
        let value = match value {
            None | Some(serde_json::Value::Null) => return Err(EffectError::MissingConfig),
            Some(v) => v,
        };
        Self::deserialize(value).map_err(|e| EffectError::MalformedConfig(e.to_string()))
    }

    /// Check the invariants the generator divides by.
    pub fn validate(&self, max_particle_count: u32) -> Result<(), EffectError> {
        let p = &self.parameters;

        if p.particle_count <= 0 {
            return Err(EffectError::invalid(
                "particleCount",
                format!("must be greater than zero, got {}", p.particle_count),
            ));
        }
        if p.particle_count > i64::from(max_particle_count) {
            return Err(EffectError::invalid(
                "particleCount",
                format!(
                    "must not exceed {max_particle_count}, got {}",
                    p.particle_count
                ),
            ));
        }
        if p.spiral_layers <= 0 {
            return Err(EffectError::invalid(
                "spiralLayers",
                format!("must be greater than zero, got {}", p.spiral_layers),
            ));
        }
        if !p.duration.is_finite() || p.duration < 0.0 {
            return Err(EffectError::invalid(
                "duration",
                format!("must be a finite, non-negative number, got {}", p.duration),
            ));
        }
        // JSON cannot carry NaN or infinities; these only guard direct callers.
        if !self.position.x.is_finite() {
            return Err(EffectError::invalid("position.x", "must be finite"));
        }
        if !self.position.y.is_finite() {
            return Err(EffectError::invalid("position.y", "must be finite"));
        }
        Ok(())
    }

    /// Validated particle count. Only meaningful after [`validate`](Self::validate).
    pub fn particle_count(&self) -> usize {
        usize::try_from(self.parameters.particle_count).unwrap_or(0)
    }

    /// Validated layer count. Only meaningful after [`validate`](Self::validate).
    pub fn spiral_layers(&self) -> usize {
        usize::try_from(self.parameters.spiral_layers).unwrap_or(0)
    }
}
