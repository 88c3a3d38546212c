//! Ground truth oracle for simulation.
//!
//! The Oracle owns the "God's eye view" of a run:
//! - Seeded generation of initial body sets
//! - A serial reference integration over the whole body list
//! - Error metrics between a distributed result and the reference

use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use stargazer_core::kernel::{kinetic_energy, potential_energy};
use stargazer_core::{Body, PairwiseKernel, PhysicsKernel, SimulationConfig};

/// Shape of a generated body cloud.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyCloud {
    /// Position standard deviation per axis
    pub spread: f64,

    /// Velocity standard deviation per axis
    pub speed: f64,

    /// Masses are drawn uniformly from this range
    pub mass: (f64, f64),

    /// Charge standard deviation (0 disables electrostatics)
    pub charge: f64,
}

impl Default for BodyCloud {
    fn default() -> Self {
        Self {
            spread: 10.0,
            speed: 0.5,
            mass: (0.5, 2.0),
            charge: 0.1,
        }
    }
}

/// The Oracle - generates bodies and integrates the serial reference.
pub struct Oracle {
    /// Physics seed (separate from network and token seeds)
    physics_seed: u64,

    rng: ChaCha8Rng,
    cloud: BodyCloud,
}

impl Oracle {
    /// Creates a new Oracle with the given physics seed.
    ///
    /// The physics seed is derived separately from the network seed so
    /// that changing fault injection doesn't change the bodies.
    pub fn new(physics_seed: u64) -> Self {
        Self {
            physics_seed,
            rng: ChaCha8Rng::seed_from_u64(physics_seed),
            cloud: BodyCloud::default(),
        }
    }

    pub fn with_cloud(mut self, cloud: BodyCloud) -> Self {
        self.cloud = cloud;
        self
    }

    pub fn seed(&self) -> u64 {
        self.physics_seed
    }

    fn normal3(&mut self, std: f64) -> Vector3<f64> {
        let x: f64 = self.rng.sample(StandardNormal);
        let y: f64 = self.rng.sample(StandardNormal);
        let z: f64 = self.rng.sample(StandardNormal);
        Vector3::new(x, y, z) * std
    }

    /// Draws `n` bodies from the cloud.
    pub fn spawn_bodies(&mut self, n: usize) -> Vec<Body> {
        (0..n)
            .map(|_| {
                let position = self.normal3(self.cloud.spread);
                let velocity = self.normal3(self.cloud.speed);
                let (lo, hi) = self.cloud.mass;
                let mass = if hi > lo { self.rng.gen_range(lo..hi) } else { lo };
                let z: f64 = self.rng.sample(StandardNormal);
                Body::new(position, velocity, mass, z * self.cloud.charge)
            })
            .collect()
    }

    /// Advances `bodies` by `steps` timesteps over the full index range.
    pub fn reference(bodies: &[Body], config: &SimulationConfig, steps: u64) -> Vec<Body> {
        let mut state = bodies.to_vec();
        for _ in 0..steps {
            let updates = PairwiseKernel.step(&state, 0..state.len(), config);
            for (body, update) in state.iter_mut().zip(&updates) {
                body.apply(update);
            }
        }
        state
    }

    /// Largest position difference between two body lists of equal length.
    pub fn max_position_error(actual: &[Body], expected: &[Body]) -> f64 {
        actual
            .iter()
            .zip(expected)
            .map(|(a, e)| (a.position - e.position).norm())
            .fold(0.0, f64::max)
    }

    /// Total mechanical energy.
    pub fn energy(bodies: &[Body], config: &SimulationConfig) -> f64 {
        kinetic_energy(bodies) + potential_energy(bodies, config)
    }
}

/// Order-sensitive fingerprint of a body list's positions and velocities.
pub fn fingerprint(bodies: &[Body]) -> u64 {
    bodies
        .iter()
        .flat_map(|b| b.position.iter().chain(b.velocity.iter()))
        .fold(0xcbf29ce484222325, |acc, v| {
            (acc ^ v.to_bits()).wrapping_mul(0x100000001b3)
        })
}
