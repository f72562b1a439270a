/*
 * Debug Information Module
 *
 * This module defines the DebugInfo struct that collects per-tick
 * statistics for the host to log or display.
 *
 * Includes metrics for:
 * - FPS and frame time (from the host's delta time)
 * - Tick, dispatch and skipped-tick counters
 * - Buffer element counts as last uploaded
 * - Attractors hidden by the device capacity
 * - Degraded device state
 */

use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DebugInfo {
    pub fps: f32,
    pub frame_time: Duration,
    pub ticks: u64,
    pub dispatches: u64,
    // Ticks that ran without a dispatch because the device was unavailable
    pub skipped_ticks: u64,
    pub boid_count: usize,
    pub swarm_count: usize,
    pub triangle_count: usize,
    pub live_attractors: u32,
    pub hidden_attractors: usize,
    pub degraded: bool,
}

impl DebugInfo {
    pub fn record_frame(&mut self, delta_time: f32) {
        self.ticks += 1;
        if delta_time > 0.0 && delta_time.is_finite() {
            self.fps = 1.0 / delta_time;
            self.frame_time = Duration::try_from_secs_f32(delta_time).unwrap_or(Duration::MAX);
        }
    }

    // One-line summary for periodic logging
    pub fn summary(&self) -> String {
        format!(
            "fps {:.1} | boids {} | swarms {} | triangles {} | food {}/{} | ticks {} (skipped {}){}",
            self.fps,
            self.boid_count,
            self.swarm_count,
            self.triangle_count,
            self.live_attractors,
            self.live_attractors as usize + self.hidden_attractors,
            self.ticks,
            self.skipped_ticks,
            if self.degraded { " | DEGRADED" } else { "" }
        )
    }
}
