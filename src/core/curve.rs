//! Multiplier Curves
//!
//! Side A climbs smoothly as a pure function of elapsed time. Side B climbs
//! in discrete steps whose sizes come from the round's jump stream, so both
//! trajectories can be recomputed exactly after the round.

use super::fair::JumpSampler;

/// Growth rate of the smooth curve, per second.
pub const SMOOTH_GROWTH_RATE: f64 = 0.22;

/// Jump steps per second on side B.
pub const JUMP_STEPS_PER_SECOND: f64 = 4.0;

/// Largest base jump per step (12%).
pub const JUMP_BASE_RANGE: f64 = 0.12;

/// Total width of the per-step jitter (±1.5%).
pub const JUMP_JITTER_RANGE: f64 = 0.03;

/// `max(1, e^(k·t))` for `t` seconds of running time.
pub fn smooth_multiplier(elapsed_secs: f64) -> f64 {
    (SMOOTH_GROWTH_RATE * elapsed_secs.max(0.0)).exp().max(1.0)
}

/// Number of completed jump steps after `t` seconds.
pub fn jump_steps(elapsed_secs: f64) -> u64 {
    (elapsed_secs.max(0.0) * JUMP_STEPS_PER_SECOND).floor() as u64
}

/// Growth factor of one step, using draws `2·step` (base) and `2·step + 1` (jitter).
pub fn jump_factor(sampler: &JumpSampler, step: u64) -> f64 {
    let base = 1.0 + sampler.sample(2 * step) * JUMP_BASE_RANGE;
    let jitter = (sampler.sample(2 * step + 1) - 0.5) * JUMP_JITTER_RANGE;
    base + jitter
}

/// Side B's multiplier after `t` seconds, recomputed from scratch.
pub fn jumpy_multiplier(sampler: &JumpSampler, elapsed_secs: f64) -> f64 {
    let mut m = 1.0;
    for step in 0..jump_steps(elapsed_secs) {
        m *= jump_factor(sampler, step);
    }
    m.max(1.0)
}

/// Incremental side-B path for the live tick loop.
///
/// Keeps the running products so a tick costs only the new steps, and
/// multiplies in the same order as [`jumpy_multiplier`] so both agree bit
/// for bit.
#[derive(Clone, Debug)]
pub struct JumpPath {
    sampler: JumpSampler,
    /// `products[i]` is the product of the first `i` step factors.
    products: Vec<f64>,
}

impl JumpPath {
    /// Start an empty path.
    pub fn new(sampler: JumpSampler) -> Self {
        Self { sampler, products: vec![1.0] }
    }

    /// Multiplier after `t` seconds.
    pub fn multiplier_at(&mut self, elapsed_secs: f64) -> f64 {
        let steps = jump_steps(elapsed_secs) as usize;
        while self.products.len() <= steps {
            let step = (self.products.len() - 1) as u64;
            let prev = self.products[self.products.len() - 1];
            self.products.push(prev * jump_factor(&self.sampler, step));
        }
        self.products[steps].max(1.0)
    }

    /// Steps computed so far.
    pub fn computed_steps(&self) -> usize {
        self.products.len() - 1
    }
}
