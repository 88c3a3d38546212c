//! Physics kernel: one timestep for a range of bodies.
//!
//! The kernel is a pure function of the full body list, the range to advance
//! and the constants. It never mutates its input; the caller decides what to
//! do with the returned updates.

use nalgebra::Vector3;
use std::ops::Range;

use crate::body::{Body, BodyUpdate, SimulationConfig};

/// Advances the bodies in `range` by one timestep.
pub trait PhysicsKernel: Send + Sync {
    /// Returns exactly `range.len()` updates, in index order.
    fn step(&self, bodies: &[Body], range: Range<usize>, config: &SimulationConfig) -> Vec<BodyUpdate>;
}

/// All-pairs gravity plus Coulomb, integrated with semi-implicit Euler.
///
/// Gravity attracts, like charges repel. Forces use a Plummer-softened
/// distance `sqrt(r² + ε²)`, so coincident bodies contribute nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PairwiseKernel;

impl PairwiseKernel {
    /// Net force on body `i` from every other body.
    pub fn net_force(bodies: &[Body], i: usize, config: &SimulationConfig) -> Vector3<f64> {
        let me = &bodies[i];
        let eps2 = config.softening * config.softening;
        let mut force = Vector3::zeros();

        for (j, other) in bodies.iter().enumerate() {
            if j == i {
                continue;
            }
            let delta = other.position - me.position;
            let dist2 = delta.norm_squared() + eps2;
            if dist2 == 0.0 {
                continue;
            }
            let inv_r3 = 1.0 / (dist2 * dist2.sqrt());

            let attraction = config.gravitational_constant * me.mass * other.mass;
            let repulsion = config.coulomb_constant * me.charge * other.charge;
            force += delta * ((attraction - repulsion) * inv_r3);
        }

        force
    }
}

impl PhysicsKernel for PairwiseKernel {
    fn step(&self, bodies: &[Body], range: Range<usize>, config: &SimulationConfig) -> Vec<BodyUpdate> {
        let dt = config.timestep;
        range
            .map(|i| {
                let body = &bodies[i];
                let force = Self::net_force(bodies, i, config);
                let acceleration = force / body.mass;
                let velocity = body.velocity + acceleration * dt;
                let position = body.position + velocity * dt;
                BodyUpdate {
                    position,
                    velocity,
                    acceleration,
                    force,
                }
            })
            .collect()
    }
}

// ============================================================================
// DIAGNOSTICS
// ============================================================================

/// Total kinetic energy, Σ ½mv².
pub fn kinetic_energy(bodies: &[Body]) -> f64 {
    bodies
        .iter()
        .map(|b| 0.5 * b.mass * b.velocity.norm_squared())
        .sum()
}

/// Total potential energy of the gravity + Coulomb field (softened).
pub fn potential_energy(bodies: &[Body], config: &SimulationConfig) -> f64 {
    let eps2 = config.softening * config.softening;
    let mut energy = 0.0;
    for i in 0..bodies.len() {
        for j in (i + 1)..bodies.len() {
            let (a, b) = (&bodies[i], &bodies[j]);
            let r = ((b.position - a.position).norm_squared() + eps2).sqrt();
            if r == 0.0 {
                continue;
            }
            energy += (config.coulomb_constant * a.charge * b.charge
                - config.gravitational_constant * a.mass * b.mass)
                / r;
        }
    }
    energy
}
