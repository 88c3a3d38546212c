//! Bodies, simulation constants, and the authoritative body store.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::{Result, StargazerError};

/// Default softening length for the pairwise kernel.
pub const DEFAULT_SOFTENING: f64 = 1e-9;

/// Longest run a single `simulate` may schedule.
pub const MAX_STEPS: u64 = 10_000_000;

/// A simulated point mass/charge.
///
/// Vectors travel as `[x, y, z]` arrays; acceleration and force may be
/// omitted on input and start at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    #[serde(default = "Vector3::zeros")]
    pub acceleration: Vector3<f64>,
    #[serde(default = "Vector3::zeros")]
    pub force: Vector3<f64>,
    pub mass: f64,
    #[serde(default)]
    pub charge: f64,
}

impl Body {
    /// Creates a body at rest-free initial state (no acceleration/force yet).
    pub fn new(position: Vector3<f64>, velocity: Vector3<f64>, mass: f64, charge: f64) -> Self {
        Self {
            position,
            velocity,
            acceleration: Vector3::zeros(),
            force: Vector3::zeros(),
            mass,
            charge,
        }
    }

    /// Applies a node's kinematic update. Mass and charge never change.
    pub fn apply(&mut self, update: &BodyUpdate) {
        self.position = update.position;
        self.velocity = update.velocity;
        self.acceleration = update.acceleration;
        self.force = update.force;
    }

    fn check(&self, index: usize) -> Result<()> {
        if !(self.mass.is_finite() && self.mass > 0.0) {
            return Err(StargazerError::validation(format!(
                "body {}: mass must be a positive number",
                index
            )));
        }
        if !self.charge.is_finite() {
            return Err(StargazerError::validation(format!(
                "body {}: charge must be finite",
                index
            )));
        }
        let vectors = [&self.position, &self.velocity, &self.acceleration, &self.force];
        if vectors.iter().any(|v| v.iter().any(|c| !c.is_finite())) {
            return Err(StargazerError::validation(format!(
                "body {}: vectors must be finite triples",
                index
            )));
        }
        Ok(())
    }
}

/// The per-step state a Compute node returns for one body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyUpdate {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub acceleration: Vector3<f64>,
    pub force: Vector3<f64>,
}

impl BodyUpdate {
    /// True if every component is finite.
    pub fn is_finite(&self) -> bool {
        [&self.position, &self.velocity, &self.acceleration, &self.force]
            .iter()
            .all(|v| v.iter().all(|c| c.is_finite()))
    }
}

/// Physical constants for a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    /// Integration step in seconds
    pub timestep: f64,

    /// G in F = G·m1·m2 / r²
    pub gravitational_constant: f64,

    /// k in F = k·q1·q2 / r²
    pub coulomb_constant: f64,

    /// Plummer softening length
    #[serde(default = "default_softening")]
    pub softening: f64,
}

fn default_softening() -> f64 {
    DEFAULT_SOFTENING
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            timestep: 0.01,
            gravitational_constant: 6.674e-11,
            coulomb_constant: 8.9875517923e9,
            softening: DEFAULT_SOFTENING,
        }
    }
}

impl SimulationConfig {
    /// Checks the constants.
    pub fn check(&self) -> Result<()> {
        if !(self.timestep.is_finite() && self.timestep > 0.0) {
            return Err(StargazerError::validation("timestep must be a positive number"));
        }
        if !self.gravitational_constant.is_finite() {
            return Err(StargazerError::validation("gravitationalConstant must be finite"));
        }
        if !self.coulomb_constant.is_finite() {
            return Err(StargazerError::validation("coulombConstant must be finite"));
        }
        if !(self.softening.is_finite() && self.softening >= 0.0) {
            return Err(StargazerError::validation("softening must be non-negative"));
        }
        Ok(())
    }

    /// Number of steps needed to cover `duration` seconds.
    ///
    /// Fails Validation above [`MAX_STEPS`] so a run always terminates.
    pub fn steps_for(&self, duration: f64) -> Result<u64> {
        let steps = (duration / self.timestep).round();
        if !(steps.is_finite() && steps >= 0.0 && steps <= MAX_STEPS as f64) {
            return Err(StargazerError::validation(format!(
                "duration / timestep must be at most {} steps",
                MAX_STEPS
            )));
        }
        Ok(steps as u64)
    }
}

/// An immutable configuration tagged with the version that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub config: SimulationConfig,
}

/// Constants plus initial bodies that passed validation together.
///
/// The only way to obtain one is [`RunSetup::new`], so everything downstream
/// may assume well-formed input.
#[derive(Debug, Clone)]
pub struct RunSetup {
    config: SimulationConfig,
    bodies: Vec<Body>,
}

impl RunSetup {
    /// Validates constants and bodies in one pass.
    pub fn new(config: SimulationConfig, bodies: Vec<Body>) -> Result<Self> {
        config.check()?;
        if bodies.is_empty() {
            return Err(StargazerError::validation("bodies must not be empty"));
        }
        for (i, body) in bodies.iter().enumerate() {
            body.check(i)?;
        }
        Ok(Self { config, bodies })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    pub fn into_parts(self) -> (SimulationConfig, Vec<Body>) {
        (self.config, self.bodies)
    }
}

/// Owner of the authoritative body list.
///
/// Only the coordinator holds one, and [`BodyStore::merge`] is the only
/// write path during a run.
#[derive(Debug, Clone, Default)]
pub struct BodyStore {
    bodies: Vec<Body>,
}

impl BodyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the list wholesale (at configure time).
    pub fn replace(&mut self, bodies: Vec<Body>) {
        self.bodies = bodies;
    }

    /// Writes a node's updates over `range`. The caller has already checked
    /// that `updates.len() == range.len()`.
    pub fn merge(&mut self, range: Range<usize>, updates: &[BodyUpdate]) {
        for (body, update) in self.bodies[range].iter_mut().zip(updates) {
            body.apply(update);
        }
    }

    pub fn as_slice(&self) -> &[Body] {
        &self.bodies
    }

    pub fn to_vec(&self) -> Vec<Body> {
        self.bodies.clone()
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(mass: f64) -> Body {
        Body::new(Vector3::new(1.0, 2.0, 3.0), Vector3::zeros(), mass, 0.0)
    }

    #[test]
    fn test_setup_rejects_bad_constants() {
        let cfg = SimulationConfig {
            timestep: 0.0,
            ..Default::default()
        };
        assert!(RunSetup::new(cfg, vec![body(1.0)]).is_err());

        let cfg = SimulationConfig {
            coulomb_constant: f64::NAN,
            ..Default::default()
        };
        assert!(RunSetup::new(cfg, vec![body(1.0)]).is_err());
    }

    #[test]
    fn test_setup_rejects_bad_bodies() {
        let cfg = SimulationConfig::default();
        assert!(RunSetup::new(cfg, vec![]).is_err());
        assert!(RunSetup::new(cfg, vec![body(1.0), body(0.0)]).is_err());
        assert!(RunSetup::new(cfg, vec![body(-2.0)]).is_err());

        let mut bad = body(1.0);
        bad.velocity.x = f64::INFINITY;
        assert!(RunSetup::new(cfg, vec![bad]).is_err());
    }

    #[test]
    fn test_body_wire_format() {
        let json = r#"{"position":[1,2,3],"velocity":[0,0,0],"mass":2.0}"#;
        let b: Body = serde_json::from_str(json).unwrap();
        assert_eq!(b.position, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(b.force, Vector3::zeros());
        assert_eq!(b.charge, 0.0);

        let short = r#"{"position":[1,2],"velocity":[0,0,0],"mass":2.0}"#;
        assert!(serde_json::from_str::<Body>(short).is_err());
    }

    #[test]
    fn test_config_wire_names() {
        let json = r#"{"timestep":0.5,"gravitationalConstant":1.0,"coulombConstant":2.0}"#;
        let cfg: SimulationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.timestep, 0.5);
        assert_eq!(cfg.coulomb_constant, 2.0);
        assert_eq!(cfg.softening, DEFAULT_SOFTENING);
    }

    #[test]
    fn test_steps_for_rounds() {
        let cfg = SimulationConfig {
            timestep: 0.1,
            ..Default::default()
        };
        assert_eq!(cfg.steps_for(1.0).unwrap(), 10);
        assert_eq!(cfg.steps_for(0.26).unwrap(), 3);
        assert_eq!(cfg.steps_for(0.24).unwrap(), 2);
    }

    #[test]
    fn test_steps_for_rejects_unbounded_runs() {
        let tiny = SimulationConfig {
            timestep: 1e-300,
            ..Default::default()
        };
        let err = tiny.steps_for(1e300).unwrap_err();
        assert_eq!(err.status_code(), 400);

        let cfg = SimulationConfig {
            timestep: 1.0,
            ..Default::default()
        };
        assert_eq!(cfg.steps_for(MAX_STEPS as f64).unwrap(), MAX_STEPS);
        assert!(cfg.steps_for(MAX_STEPS as f64 + 1.0).is_err());
    }

    #[test]
    fn test_store_merge_touches_only_range() {
        let mut store = BodyStore::new();
        store.replace(vec![body(1.0), body(1.0), body(1.0)]);

        let update = BodyUpdate {
            position: Vector3::new(9.0, 9.0, 9.0),
            velocity: Vector3::new(1.0, 0.0, 0.0),
            acceleration: Vector3::zeros(),
            force: Vector3::zeros(),
        };
        store.merge(1..2, &[update]);

        assert_eq!(store.as_slice()[0].position, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(store.as_slice()[1].position, Vector3::new(9.0, 9.0, 9.0));
        assert_eq!(store.as_slice()[2].position, Vector3::new(1.0, 2.0, 3.0));
    }
}
