//! `fire_tornado` particle generator.
//!
//! Structure is deterministic (particle count, layer assignment, angular
//! placement); individual values (height, speed, color band) are drawn from
//! the supplied RNG. Callers must run [`EffectConfig::validate`] first: the
//! generator divides by both the particle and layer counts.

use std::f64::consts::TAU;
use std::time::Instant;

use rand::Rng;
use serde::Serialize;

use crate::effect::{EffectConfig, EffectParameters, Position};

pub const EFFECT_TYPE: &str = "fire_tornado";

const BASE_SPIRAL_RADIUS: f64 = 20.0;
const LAYER_RADIUS_STEP: f64 = 15.0;
const MAX_HEIGHT: f64 = 300.0;
const MIN_SPEED: f64 = 2.0;
const SPEED_JITTER: f64 = 3.0;
const VERTICAL_VELOCITY_SCALE: f64 = 0.02;
const CENTRIPETAL_PULL: f64 = 0.15;
const VERTICAL_BIAS: f64 = 0.05;
const BASE_PARTICLE_RADIUS: f64 = 6.0;
const LAYER_RADIUS_FALLOFF: f64 = 0.6;

/// Cumulative probability bands, hottest core first.
pub const COLOR_BANDS: [(f64, &str); 5] = [
    (0.10, "#FFFFFF"),
    (0.30, "#FFF3B0"),
    (0.60, "#FFB000"),
    (0.85, "#FF6A00"),
    (1.00, "#C62800"),
];

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Particle {
    pub id: usize,
    pub position: Vec3,
    pub velocity: Vec3,
    pub acceleration: Vec3,
    pub radius: f64,
    pub color: &'static str,
    /// Radians in `[0, 2π)`.
    pub rotation: f64,
    pub layer: usize,
}

/// Rendering descriptors attached to every render. Constant, not computed.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityFlags {
    pub level: &'static str,
    pub lighting: &'static str,
    pub blending: &'static str,
    pub antialiasing: bool,
    pub motion_blur: bool,
}

pub const QUALITY: QualityFlags = QualityFlags {
    level: "ultra",
    lighting: "volumetric",
    blending: "additive",
    antialiasing: true,
    motion_blur: true,
};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    /// Playback duration requested by the client, milliseconds.
    pub duration: f64,
    /// Wall time spent generating particles, milliseconds.
    pub generation_ms: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedEffect {
    pub position: Position,
    pub particles: Vec<Particle>,
    pub parameters: EffectParameters,
    pub timing: Timing,
    pub quality: QualityFlags,
}

/// Generate a tornado using the thread-local RNG.
pub fn generate_tornado_effect(config: &EffectConfig) -> RenderedEffect {
    generate_tornado_effect_with(config, &mut rand::rng())
}

/// Generate a tornado drawing randomness from `rng`.
pub fn generate_tornado_effect_with<R: Rng + ?Sized>(
    config: &EffectConfig,
    rng: &mut R,
) -> RenderedEffect {
    let started = Instant::now();
    let count = config.particle_count();
    let layers = config.spiral_layers().max(1);
    let origin = config.position;

    let mut particles = Vec::with_capacity(count);
    for i in 0..count {
        let layer = i % layers;
        let depth = layer as f64 / layers as f64;

        let angle = (i as f64 / count as f64) * TAU;
        let rotation_offset = depth * TAU;
        let theta = (angle + rotation_offset) % TAU;

        let spiral_radius = BASE_SPIRAL_RADIUS + layer as f64 * LAYER_RADIUS_STEP;
        let height = rng.random::<f64>() * MAX_HEIGHT;
        let speed = MIN_SPEED + rng.random::<f64>() * SPEED_JITTER;

        let (sin, cos) = theta.sin_cos();
        particles.push(Particle {
            id: i,
            position: Vec3 {
                x: origin.x + cos * spiral_radius,
                y: origin.y + sin * spiral_radius,
                z: height,
            },
            velocity: Vec3 {
                x: -sin * speed,
                y: cos * speed,
                z: height * VERTICAL_VELOCITY_SCALE,
            },
            acceleration: Vec3 {
                x: -cos * CENTRIPETAL_PULL,
                y: -sin * CENTRIPETAL_PULL,
                z: VERTICAL_BIAS,
            },
            radius: BASE_PARTICLE_RADIUS * (1.0 - depth * LAYER_RADIUS_FALLOFF),
            color: pick_color(rng.random::<f64>()),
            rotation: theta,
            layer,
        });
    }

    RenderedEffect {
        position: origin,
        particles,
        parameters: config.parameters.clone(),
        timing: Timing {
            duration: config.parameters.duration,
            generation_ms: started.elapsed().as_secs_f64() * 1000.0,
        },
        quality: QUALITY,
    }
}

/// Map a uniform sample in `[0, 1)` onto a color band.
pub fn pick_color(sample: f64) -> &'static str {
    COLOR_BANDS
        .iter()
        .find(|(upper, _)| sample < *upper)
        .map_or(COLOR_BANDS[COLOR_BANDS.len() - 1].1, |&(_, color)| color)
}
