//! Provably Fair Randomness
//!
//! Every random quantity in a round is derived from a server seed, a public
//! client seed and a per-mode nonce:
//!
//! ```text
//! digest  = HMAC-SHA256(key = server_seed, msg = "{client_seed}:{nonce}:{tag}")
//! uniform = top 52 bits of digest / 2^52        in [0, 1)
//! ```
//!
//! Only `sha256(server_seed)` is published while a round is open. The seed
//! itself is revealed after settlement so anyone can recompute the round.

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// 2^52 as a float; the divisor for 52-bit uniforms.
const TWO_POW_52: f64 = 4_503_599_627_370_496.0;

/// Tag for side A's crash target.
pub const TAG_CRASH_A: &str = "A";
/// Tag for side B's crash target, and the prefix of its jump stream.
pub const TAG_CRASH_B: &str = "B";
/// Tag for the duel's extra running time.
pub const TAG_DURATION: &str = "duration";
/// Tag for the duel's pre-committed roll.
pub const TAG_ROLL: &str = "roll";

/// Upper bound of the duel's fairness-derived extra running time.
pub const DUEL_EXTRA_MAX_MS: u64 = 4_000;

// =============================================================================
// PRIMITIVES
// =============================================================================

/// Hex-encoded SHA-256.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// HMAC-SHA256 keyed by the server seed.
pub fn hmac_sha256(key: &str, message: &str) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    mac.finalize().into_bytes().into()
}

/// Map a digest to `[0, 1)` using its top 52 bits.
pub fn uniform_from_digest(digest: &[u8; 32]) -> f64 {
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let top52 = u64::from_be_bytes(head) >> 12;
    top52 as f64 / TWO_POW_52
}

// =============================================================================
// ROUND SEED
// =============================================================================

/// The secret and public inputs of one round's randomness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundSeed {
    /// Secret until the round has settled.
    pub server_seed: String,
    /// Public, shared across rounds.
    pub client_seed: String,
    /// Per-mode counter.
    pub nonce: u64,
}

impl RoundSeed {
    /// Create a seed triple.
    pub fn new(server_seed: impl Into<String>, client_seed: impl Into<String>, nonce: u64) -> Self {
        Self {
            server_seed: server_seed.into(),
            client_seed: client_seed.into(),
            nonce,
        }
    }

    /// Raw digest for a tag.
    pub fn digest(&self, tag: &str) -> [u8; 32] {
        let message = format!("{}:{}:{}", self.client_seed, self.nonce, tag);
        hmac_sha256(&self.server_seed, &message)
    }

    /// Uniform draw in `[0, 1)` for a tag.
    pub fn uniform(&self, tag: &str) -> f64 {
        uniform_from_digest(&self.digest(tag))
    }

    /// Public commitment: hash only.
    pub fn commitment(&self) -> FairnessCommitment {
        FairnessCommitment {
            server_seed_hash: sha256_hex(self.server_seed.as_bytes()),
            client_seed: self.client_seed.clone(),
            nonce: self.nonce,
            server_seed: None,
        }
    }

    /// Commitment with the seed revealed.
    pub fn reveal(&self) -> FairnessCommitment {
        FairnessCommitment {
            server_seed: Some(self.server_seed.clone()),
            ..self.commitment()
        }
    }
}

/// What clients see of a round's randomness.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FairnessCommitment {
    /// `sha256(server_seed)`, published at round start.
    pub server_seed_hash: String,
    /// Public client seed.
    pub client_seed: String,
    /// Round nonce.
    pub nonce: u64,
    /// Present only after the round has settled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_seed: Option<String>,
}

impl FairnessCommitment {
    /// The seed triple, once revealed.
    pub fn seed(&self) -> Option<RoundSeed> {
        self.server_seed
            .as_ref()
            .map(|s| RoundSeed::new(s.clone(), self.client_seed.clone(), self.nonce))
    }

    /// Check the revealed seed against the published hash.
    pub fn verify(&self) -> bool {
        match &self.server_seed {
            Some(seed) => sha256_hex(seed.as_bytes()) == self.server_seed_hash,
            None => false,
        }
    }
}

// =============================================================================
// SEED SOURCES
// =============================================================================

/// Supplies fresh server seeds, one per round.
pub trait SeedSource: Send {
    /// Produce the next secret server seed.
    fn next_server_seed(&mut self) -> String;
}

/// 32 bytes from the operating system RNG, hex-encoded.
#[derive(Debug, Default)]
pub struct OsSeedSource;

impl SeedSource for OsSeedSource {
    fn next_server_seed(&mut self) -> String {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

/// Deterministic seeds `sha256("{prefix}-{n}")`, for replays and tests.
#[derive(Debug, Clone)]
pub struct SequentialSeedSource {
    prefix: String,
    counter: u64,
}

impl SequentialSeedSource {
    /// Start a sequence.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), counter: 0 }
    }
}

impl SeedSource for SequentialSeedSource {
    fn next_server_seed(&mut self) -> String {
        self.counter += 1;
        sha256_hex(format!("{}-{}", self.prefix, self.counter).as_bytes())
    }
}

// =============================================================================
// CRASH TARGETS
// =============================================================================

/// Inverse-transform parameters for one crash side.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CrashCurve {
    /// House edge folded into the distribution.
    pub edge: f64,
    /// Floor of the target.
    pub min: f64,
    /// Ceiling of the target.
    pub max: f64,
}

/// Side A: heavier edge, smooth curve.
pub const SIDE_A_CURVE: CrashCurve = CrashCurve { edge: 0.04, min: 1.2, max: 250.0 };

/// Side B: lighter edge, jumpy curve.
pub const SIDE_B_CURVE: CrashCurve = CrashCurve { edge: 0.015, min: 1.1, max: 400.0 };

/// Map a uniform draw to a crash target, floored to cents.
pub fn crash_target(u: f64, curve: CrashCurve) -> f64 {
    let u = u.clamp(0.0, 1.0 - 1.0 / TWO_POW_52);
    let raw = 1.0 + (1.0 / (1.0 - u) - 1.0) * (1.0 - curve.edge);
    let cents = (raw * 100.0).floor() / 100.0;
    cents.min(curve.max).max(curve.min)
}

/// Both sides' hidden crash targets.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CrashTargets {
    /// Side A's target.
    pub target_a: f64,
    /// Side B's target.
    pub target_b: f64,
}

/// Derive both crash targets from a seed triple.
pub fn derive_crash_targets(seed: &RoundSeed) -> CrashTargets {
    CrashTargets {
        target_a: crash_target(seed.uniform(TAG_CRASH_A), SIDE_A_CURVE),
        target_b: crash_target(seed.uniform(TAG_CRASH_B), SIDE_B_CURVE),
    }
}

// =============================================================================
// JUMP STREAM
// =============================================================================

/// Index-addressable uniform stream for side B's stepwise multiplier.
///
/// `sample(i)` hashes `"{client_seed}:{nonce}:B:{i}"`, so any element can be
/// recomputed in isolation during an audit.
#[derive(Clone, Debug)]
pub struct JumpSampler {
    server_seed: String,
    prefix: String,
}

impl JumpSampler {
    /// Build the stream for a round.
    pub fn new(seed: &RoundSeed) -> Self {
        Self {
            server_seed: seed.server_seed.clone(),
            prefix: format!("{}:{}:{}", seed.client_seed, seed.nonce, TAG_CRASH_B),
        }
    }

    /// The `index`-th uniform of the stream.
    pub fn sample(&self, index: u64) -> f64 {
        let message = format!("{}:{}", self.prefix, index);
        uniform_from_digest(&hmac_sha256(&self.server_seed, &message))
    }
}

// =============================================================================
// DUEL OUTCOME
// =============================================================================

/// Pre-committed duel randomness.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DuelOutcome {
    /// Added to the 6 s base running time, in `[0, 4000)`.
    pub extra_duration_ms: u64,
    /// Compared against `pA` at resolution.
    pub roll: f64,
}

/// Derive the duel's extra duration and roll.
pub fn derive_duel_outcome(seed: &RoundSeed) -> DuelOutcome {
    let duration = seed.uniform(TAG_DURATION);
    DuelOutcome {
        extra_duration_ms: (duration * DUEL_EXTRA_MAX_MS as f64).floor() as u64,
        roll: seed.uniform(TAG_ROLL),
    }
}
