//! # ember-core
//!
//! Domain types shared by the relay server:
//!
//! - [`ids`]: branded connection identifiers
//! - [`effect`]: effect configuration and its validation rules
//! - [`tornado`]: the `fire_tornado` particle generator (pure, RNG injected)
//! - [`protocol`]: inbound command classification and outbound envelopes
//! - [`errors`]: typed errors surfaced to clients as error envelopes

#![deny(unsafe_code)]

pub mod effect;
pub mod errors;
pub mod ids;
pub mod protocol;
pub mod tornado;

pub use effect::{EffectConfig, EffectParameters, Position};
pub use errors::EffectError;
pub use ids::ConnectionId;
pub use tornado::{generate_tornado_effect, generate_tornado_effect_with, Particle, RenderedEffect};
