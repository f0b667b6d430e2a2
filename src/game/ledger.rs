//! Fairness Ledger
//!
//! Hands out seed triples (fresh server seed, shared client seed, per-mode
//! nonce) and keeps a bounded history of settled rounds whose seeds have
//! been revealed.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use crate::core::fair::{FairnessCommitment, RoundSeed, SeedSource};
use crate::game::bet::{GameMode, Side};

/// Settled rounds kept per mode.
pub const FAIRNESS_HISTORY_DEPTH: usize = 100;

/// What a settled round produced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RoundOutcome {
    /// Both crash targets.
    Crash {
        /// Side A's target.
        target_a: f64,
        /// Side B's target.
        target_b: f64,
    },
    /// Duel resolution.
    Duel {
        /// Committed roll.
        roll: f64,
        /// Side A's probability.
        p_a: f64,
        /// Side B's probability.
        p_b: f64,
        /// Winning side.
        winner: Side,
    },
}

/// A settled round with its seed revealed.
#[derive(Clone, Debug, PartialEq)]
pub struct FairRecord {
    /// Mode.
    pub mode: GameMode,
    /// Round id.
    pub round_id: String,
    /// Commitment including the server seed.
    pub commitment: FairnessCommitment,
    /// Outcome to verify against.
    pub outcome: RoundOutcome,
}

/// Crash part of a fair report.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashFair {
    /// Side A's target.
    pub target_a: f64,
    /// Side B's target.
    pub target_b: f64,
}

/// Duel part of a fair report.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DuelFair {
    /// Committed roll.
    pub roll: f64,
    /// Side A's probability.
    #[serde(rename = "pA")]
    pub p_a: f64,
    /// Side B's probability.
    #[serde(rename = "pB")]
    pub p_b: f64,
    /// Winning side.
    pub winner: Side,
}

/// Answer to a `fair` request.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FairReport {
    /// Mode.
    pub mode: GameMode,
    /// Round nonce.
    pub nonce: u64,
    /// Round id.
    pub round_id: String,
    /// Public client seed.
    pub client_seed: String,
    /// Published hash.
    pub server_seed_hash: String,
    /// Revealed seed (settled rounds only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_seed: Option<String>,
    /// Crash outcome (settled crash rounds only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash: Option<CrashFair>,
    /// Duel outcome (settled duel rounds only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duel: Option<DuelFair>,
}

impl FairReport {
    /// Report for a live round: hash only.
    pub fn live(mode: GameMode, round_id: &str, commitment: FairnessCommitment) -> Self {
        Self {
            mode,
            nonce: commitment.nonce,
            round_id: round_id.to_string(),
            client_seed: commitment.client_seed,
            server_seed_hash: commitment.server_seed_hash,
            server_seed: None,
            crash: None,
            duel: None,
        }
    }
}

impl From<&FairRecord> for FairReport {
    fn from(record: &FairRecord) -> Self {
        let (crash, duel) = match record.outcome {
            RoundOutcome::Crash { target_a, target_b } => (Some(CrashFair { target_a, target_b }), None),
            RoundOutcome::Duel { roll, p_a, p_b, winner } => (None, Some(DuelFair { roll, p_a, p_b, winner })),
        };
        Self {
            mode: record.mode,
            nonce: record.commitment.nonce,
            round_id: record.round_id.clone(),
            client_seed: record.commitment.client_seed.clone(),
            server_seed_hash: record.commitment.server_seed_hash.clone(),
            server_seed: record.commitment.server_seed.clone(),
            crash,
            duel,
        }
    }
}

/// Seed issuance and settled-round history.
pub struct FairnessLedger {
    source: Box<dyn SeedSource>,
    client_seed: String,
    next_nonce: BTreeMap<GameMode, u64>,
    history: BTreeMap<GameMode, VecDeque<FairRecord>>,
}

impl FairnessLedger {
    /// Ledger drawing server seeds from `source`.
    pub fn new(source: Box<dyn SeedSource>, client_seed: impl Into<String>) -> Self {
        Self {
            source,
            client_seed: client_seed.into(),
            next_nonce: BTreeMap::new(),
            history: BTreeMap::new(),
        }
    }

    /// Seed triple for the next round of `mode`. Nonces start at 1.
    pub fn next_seed(&mut self, mode: GameMode) -> RoundSeed {
        let counter = self.next_nonce.entry(mode).or_insert(1);
        let nonce = *counter;
        *counter += 1;
        RoundSeed::new(self.source.next_server_seed(), self.client_seed.clone(), nonce)
    }

    /// File a settled round, evicting the oldest beyond the history depth.
    pub fn record(&mut self, record: FairRecord) {
        let entries = self.history.entry(record.mode).or_default();
        entries.push_back(record);
        while entries.len() > FAIRNESS_HISTORY_DEPTH {
            entries.pop_front();
        }
    }

    /// A settled round by nonce.
    pub fn find(&self, mode: GameMode, nonce: u64) -> Option<&FairRecord> {
        self.history
            .get(&mode)?
            .iter()
            .find(|r| r.commitment.nonce == nonce)
    }

    /// Settled rounds kept for `mode`.
    pub fn history_len(&self, mode: GameMode) -> usize {
        self.history.get(&mode).map_or(0, VecDeque::len)
    }
}

impl std::fmt::Debug for FairnessLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FairnessLedger")
            .field("client_seed", &self.client_seed)
            .field("next_nonce", &self.next_nonce)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fair::{derive_crash_targets, SequentialSeedSource};

    fn ledger() -> FairnessLedger {
        FairnessLedger::new(Box::new(SequentialSeedSource::new("ledger")), "client")
    }

    fn crash_record(seed: &RoundSeed) -> FairRecord {
        let targets = derive_crash_targets(seed);
        FairRecord {
            mode: GameMode::CrashDual,
            round_id: format!("round-{}", seed.nonce),
            commitment: seed.reveal(),
            outcome: RoundOutcome::Crash { target_a: targets.target_a, target_b: targets.target_b },
        }
    }

    #[test]
    fn test_nonces_are_per_mode() {
        let mut l = ledger();
        assert_eq!(l.next_seed(GameMode::CrashDual).nonce, 1);
        assert_eq!(l.next_seed(GameMode::CrashDual).nonce, 2);
        assert_eq!(l.next_seed(GameMode::DuelAb).nonce, 1);
        let a = l.next_seed(GameMode::CrashDual);
        let b = l.next_seed(GameMode::CrashDual);
        assert_ne!(a.server_seed, b.server_seed);
        assert_eq!(a.client_seed, "client");
    }

    #[test]
    fn test_history_is_bounded() {
        let mut l = ledger();
        for _ in 0..(FAIRNESS_HISTORY_DEPTH + 20) {
            let seed = l.next_seed(GameMode::CrashDual);
            l.record(crash_record(&seed));
        }
        assert_eq!(l.history_len(GameMode::CrashDual), FAIRNESS_HISTORY_DEPTH);
        assert!(l.find(GameMode::CrashDual, 1).is_none());
        assert!(l.find(GameMode::CrashDual, 120).is_some());
        assert!(l.find(GameMode::DuelAb, 120).is_none());
    }

    #[test]
    fn test_report_reveals_and_verifies() {
        let mut l = ledger();
        let seed = l.next_seed(GameMode::CrashDual);
        l.record(crash_record(&seed));
        let record = l.find(GameMode::CrashDual, 1).unwrap();
        assert!(record.commitment.verify());

        let report = FairReport::from(record);
        let replayed = derive_crash_targets(&record.commitment.seed().unwrap());
        let crash = report.crash.unwrap();
        assert_eq!(crash.target_a, replayed.target_a);
        assert_eq!(crash.target_b, replayed.target_b);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["mode"], "crash_dual");
        assert_eq!(json["roundId"], "round-1");
        assert!(json["serverSeed"].is_string());
        assert!(json.get("duel").is_none());
    }

    #[test]
    fn test_live_report_hides_seed() {
        let seed = RoundSeed::new("secret", "client", 9);
        let report = FairReport::live(GameMode::DuelAb, "live", seed.commitment());
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("serverSeed").is_none());
        assert!(json.get("duel").is_none());
        assert_eq!(json["nonce"], 9);
    }
}
