//! Decorative idle drift of the viewport while nobody is signed in.
//!
//! The view cruises in one direction, eases to a stop, then eases up to speed
//! in a new random direction. It only ever produces pan deltas.

use kurbo::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;
use std::time::Duration;

#[cfg(target_arch = "wasm32")]
use web_time::Instant;
#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;

/// Drift speed in screen pixels per second.
pub const DRIFT_SPEED: f64 = 30.0;
const CRUISE_TIME: Duration = Duration::from_secs(6);
const EASE_TIME: Duration = Duration::from_millis(1500);
/// Longest step integrated at once, so a stalled host does not jump the view.
const MAX_STEP: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Cruise { until: Instant },
    SlowDown { started: Instant, from: Vec2 },
    SpeedUp { started: Instant, to: Vec2 },
}

/// Idle auto-pan animation.
#[derive(Debug, Clone)]
pub struct AutoPan {
    rng: StdRng,
    phase: Option<Phase>,
    velocity: Vec2,
    last_update: Option<Instant>,
}

impl AutoPan {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            phase: None,
            velocity: Vec2::ZERO,
            last_update: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase.is_some()
    }

    pub fn velocity(&self) -> Vec2 {
        self.velocity
    }

    /// Start drifting. Does nothing if already running.
    pub fn start(&mut self, now: Instant) {
        if self.phase.is_some() {
            return;
        }
        let to = self.random_velocity();
        self.phase = Some(Phase::SpeedUp { started: now, to });
        self.last_update = Some(now);
        log::debug!("Auto-pan started");
    }

    /// Stop immediately.
    pub fn stop(&mut self) {
        if self.phase.take().is_some() {
            log::debug!("Auto-pan stopped");
        }
        self.velocity = Vec2::ZERO;
        self.last_update = None;
    }

    /// Advance to `now` and return the pan delta to apply.
    pub fn update(&mut self, now: Instant) -> Vec2 {
        let Some(phase) = self.phase else {
            return Vec2::ZERO;
        };
        let dt = self
            .last_update
            .map(|last| now.saturating_duration_since(last).min(MAX_STEP))
            .unwrap_or_default();
        self.last_update = Some(now);

        let (velocity, next) = match phase {
            Phase::Cruise { until } => {
                if now >= until {
                    (self.velocity, Some(Phase::SlowDown { started: now, from: self.velocity }))
                } else {
                    (self.velocity, None)
                }
            }
            Phase::SlowDown { started, from } => {
                let t = progress(started, now);
                let velocity = from * (1.0 - ease_in_out(t));
                if t >= 1.0 {
                    let to = self.random_velocity();
                    (Vec2::ZERO, Some(Phase::SpeedUp { started: now, to }))
                } else {
                    (velocity, None)
                }
            }
            Phase::SpeedUp { started, to } => {
                let t = progress(started, now);
                let velocity = to * ease_in_out(t);
                if t >= 1.0 {
                    (to, Some(Phase::Cruise { until: now + CRUISE_TIME }))
                } else {
                    (velocity, None)
                }
            }
        };

        self.velocity = velocity;
        if let Some(next) = next {
            self.phase = Some(next);
        }
        velocity * dt.as_secs_f64()
    }

    fn random_velocity(&mut self) -> Vec2 {
        let angle = self.rng.random_range(0.0..TAU);
        Vec2::from_angle(angle) * DRIFT_SPEED
    }
}

fn progress(started: Instant, now: Instant) -> f64 {
    (now.saturating_duration_since(started).as_secs_f64() / EASE_TIME.as_secs_f64()).clamp(0.0, 1.0)
}

/// Cubic ease-in-out on `[0, 1]`.
fn ease_in_out(t: f64) -> f64 {
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}
