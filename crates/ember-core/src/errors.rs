/// Errors raised while turning a render request into particle data.
///
/// Every variant maps to a stable wire code so the relay can answer the
/// requester with an `error` envelope instead of emitting NaN-laden payloads.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum EffectError {
    #[error("render request has no config")]
    MissingConfig,
    #[error("config could not be decoded: {0}")]
    MalformedConfig(String),
    #[error("invalid {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
}

impl EffectError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    /// Wire code sent in the `code` field of an error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingConfig | Self::MalformedConfig(_) | Self::InvalidConfig { .. } => {
                "INVALID_EFFECT_CONFIG"
            }
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MissingConfig => "missing_config",
            Self::MalformedConfig(_) => "malformed_config",
            Self::InvalidConfig { .. } => "invalid_config",
        }
    }
}
