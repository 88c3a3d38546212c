//! JSON exporter for offline visualization.
//!
//! [`FrameRecorder`] is a step observer: installed on the coordinator, it
//! keeps every n-th merged body list as a frame.

use nalgebra::Vector3;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stargazer_core::{Body, StepObserver};
use std::fs::File;
use std::io::Write;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Zero-based step index
    pub step: u64,

    /// Simulated time in seconds
    pub time_sec: f64,

    /// Body positions after the step
    pub bodies: Vec<BodyPosition>,
}

/// Position of a body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyPosition {
    pub index: usize,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl BodyPosition {
    pub fn new(index: usize, pos: Vector3<f64>) -> Self {
        Self {
            index,
            x: pos.x,
            y: pos.y,
            z: pos.z,
        }
    }
}

/// Records frames as the coordinator publishes steps.
pub struct FrameRecorder {
    timestep: f64,
    every: u64,
    frames: Mutex<Vec<SimFrame>>,
}

impl FrameRecorder {
    /// Keeps one frame per `every` steps (at least 1).
    pub fn new(timestep: f64, every: u64) -> Self {
        Self {
            timestep,
            every: every.max(1),
            frames: Mutex::new(Vec::new()),
        }
    }

    /// Takes the recorded frames, leaving the recorder empty.
    pub fn take_frames(&self) -> Vec<SimFrame> {
        std::mem::take(&mut *self.frames.lock())
    }
}

impl StepObserver for FrameRecorder {
    fn on_step(&self, step: u64, bodies: &[Body]) {
        if step % self.every != 0 {
            return;
        }
        let frame = SimFrame {
            step,
            time_sec: (step + 1) as f64 * self.timestep,
            bodies: bodies
                .iter()
                .enumerate()
                .map(|(i, b)| BodyPosition::new(i, b.position))
                .collect(),
        };
        self.frames.lock().push(frame);
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    /// Degraded events in the last run
    pub degraded_events: usize,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            degraded_events: 0,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, degraded_events: usize) {
        self.passed = passed;
        self.degraded_events = degraded_events;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bodies() -> Vec<Body> {
        vec![
            Body::new(Vector3::new(1.0, 2.0, 3.0), Vector3::zeros(), 1.0, 0.0),
            Body::new(Vector3::new(-1.0, 0.0, 0.5), Vector3::zeros(), 1.0, 0.0),
        ]
    }

    #[test]
    fn test_recorder_keeps_every_nth_step() {
        let recorder = FrameRecorder::new(0.1, 2);
        for step in 0..5 {
            recorder.on_step(step, &bodies());
        }

        let frames = recorder.take_frames();
        let steps: Vec<u64> = frames.iter().map(|f| f.step).collect();
        assert_eq!(steps, vec![0, 2, 4]);
        assert_eq!(frames[1].bodies[0].z, 3.0);
        assert!(recorder.take_frames().is_empty());
    }

    #[test]
    fn test_export_tracks_duration() {
        let recorder = FrameRecorder::new(0.5, 1);
        recorder.on_step(0, &bodies());
        recorder.on_step(1, &bodies());

        let mut export = SimExport::new("baseline", 42);
        for frame in recorder.take_frames() {
            export.add_frame(frame);
        }
        export.finalize(true, 0);

        assert_eq!(export.frames.len(), 2);
        assert_eq!(export.duration_sec, 1.0);
        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["frames"][0]["bodies"][1]["x"], -1.0);
    }
}
