//! Duel Round Engine
//!
//! A two-sided coin flip weighted by shared micro stats. The roll is drawn
//! when the round opens and held inside the round until resolution, so the
//! outcome is fixed before any bet is placed.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::fair::{derive_duel_outcome, FairnessCommitment, RoundSeed};
use crate::game::bet::{Bet, BetId, Side};
use crate::game::crash::INTERMISSION_MS;

/// Betting window.
pub const DUEL_BETTING_MS: u64 = 5_000;

/// Running time before the seeded extra is added.
pub const DUEL_RUNNING_BASE_MS: u64 = 6_000;

/// Time the winner stays on screen.
pub const DUEL_RESOLVE_MS: u64 = 1_000;

/// Weight shift per point of `speed - opposing defense`.
pub const MICRO_WEIGHT_PER_POINT: f64 = 0.05;

/// Largest weight shift in either direction.
pub const MICRO_WEIGHT_CAP: f64 = 0.8;

/// Duel round lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelPhase {
    /// Accepting bets.
    Betting,
    /// Contest in progress.
    Running,
    /// Winner revealed.
    Resolve,
    /// Settled, waiting for the next round.
    Intermission,
}

impl DuelPhase {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            DuelPhase::Betting => "betting",
            DuelPhase::Running => "running",
            DuelPhase::Resolve => "resolve",
            DuelPhase::Intermission => "intermission",
        }
    }
}

/// Which micro knob a `micro` command turns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MicroStat {
    /// Raises the side's own weight.
    Speed,
    /// Lowers the opponent's weight.
    Defense,
}

/// Micro knobs of one side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideStats {
    /// Speed points.
    pub speed: i64,
    /// Defense points.
    pub defense: i64,
}

/// Both sides' micro knobs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicroStats {
    /// Side A.
    #[serde(rename = "A")]
    pub a: SideStats,
    /// Side B.
    #[serde(rename = "B")]
    pub b: SideStats,
}

impl MicroStats {
    /// Add `delta` to one knob, saturating.
    pub fn adjust(&mut self, side: Side, stat: MicroStat, delta: i64) {
        let stats = match side {
            Side::A => &mut self.a,
            Side::B => &mut self.b,
        };
        let knob = match stat {
            MicroStat::Speed => &mut stats.speed,
            MicroStat::Defense => &mut stats.defense,
        };
        *knob = knob.saturating_add(delta);
    }

    /// `(pA, pB)` from the current knobs.
    pub fn win_probabilities(&self) -> (f64, f64) {
        let weight_a = side_weight(self.a.speed, self.b.defense);
        let weight_b = side_weight(self.b.speed, self.a.defense);
        let p_a = weight_a / (weight_a + weight_b);
        (p_a, 1.0 - p_a)
    }
}

fn side_weight(speed: i64, opposing_defense: i64) -> f64 {
    let shift = (speed as f64 - opposing_defense as f64) * MICRO_WEIGHT_PER_POINT;
    1.0 + shift.clamp(-MICRO_WEIGHT_CAP, MICRO_WEIGHT_CAP)
}

/// The pre-drawn roll, read exactly once at resolution.
#[derive(Clone, Copy, Debug)]
struct PendingRoll {
    value: f64,
    revealed: bool,
}

/// Outcome recorded at resolution.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuelResolution {
    /// The committed roll.
    pub roll: f64,
    /// Side A's probability at resolution.
    pub p_a: f64,
    /// Side B's probability at resolution.
    pub p_b: f64,
    /// `A` iff `roll < pA`.
    pub winner: Side,
}

/// A single duel round.
#[derive(Clone, Debug)]
pub struct DuelRound {
    /// Round id.
    pub id: String,
    /// Current phase.
    pub phase: DuelPhase,
    /// When the current phase began (ms).
    pub started_at: u64,
    /// When the current phase is scheduled to end (ms).
    pub ends_at: u64,
    /// Shared micro knobs.
    pub micro: MicroStats,
    /// Seeded addition to the running time.
    pub runtime_extra_ms: u64,
    bets: Vec<Bet>,
    seen_bet_ids: BTreeSet<BetId>,
    pending_roll: PendingRoll,
    resolution: Option<DuelResolution>,
    seed: RoundSeed,
}

impl DuelRound {
    /// Open a round in `betting`, committing to its roll and duration.
    pub fn new(seed: RoundSeed, now: u64) -> Self {
        let outcome = derive_duel_outcome(&seed);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            phase: DuelPhase::Betting,
            started_at: now,
            ends_at: now + DUEL_BETTING_MS,
            micro: MicroStats::default(),
            runtime_extra_ms: outcome.extra_duration_ms,
            bets: Vec::new(),
            seen_bet_ids: BTreeSet::new(),
            pending_roll: PendingRoll { value: outcome.roll, revealed: false },
            resolution: None,
            seed,
        }
    }

    /// Advance to `now`, returning every phase entered on the way.
    pub fn advance(&mut self, now: u64) -> Vec<DuelPhase> {
        let mut entered = Vec::new();
        while now >= self.ends_at && self.phase != DuelPhase::Intermission {
            let at = self.ends_at;
            match self.phase {
                DuelPhase::Betting => {
                    let run = DUEL_RUNNING_BASE_MS + self.runtime_extra_ms;
                    self.enter(DuelPhase::Running, at, at + run);
                }
                DuelPhase::Running => {
                    self.resolve();
                    self.enter(DuelPhase::Resolve, at, at + DUEL_RESOLVE_MS);
                }
                DuelPhase::Resolve => {
                    self.enter(DuelPhase::Intermission, at, at + INTERMISSION_MS);
                }
                DuelPhase::Intermission => break,
            }
            entered.push(self.phase);
        }
        entered
    }

    fn enter(&mut self, phase: DuelPhase, at: u64, ends_at: u64) {
        debug!(round = %self.id, nonce = self.seed.nonce, ?phase, "duel phase");
        self.phase = phase;
        self.started_at = at;
        self.ends_at = ends_at;
    }

    /// Pick the winner from the committed roll. Only the first call has any effect.
    fn resolve(&mut self) {
        if self.pending_roll.revealed {
            return;
        }
        self.pending_roll.revealed = true;
        let roll = self.pending_roll.value;
        let (p_a, p_b) = self.micro.win_probabilities();
        let winner = if roll < p_a { Side::A } else { Side::B };
        self.resolution = Some(DuelResolution { roll, p_a, p_b, winner });
    }

    /// Push the phase clock forward by `delta` ms, e.g. after a pause.
    pub fn shift_clock(&mut self, delta: u64) {
        self.started_at += delta;
        self.ends_at += delta;
    }

    /// Whether the intermission is over and a new round should open.
    pub fn is_finished(&self, now: u64) -> bool {
        self.phase == DuelPhase::Intermission && now >= self.ends_at
    }

    /// True only during `betting`.
    pub fn accepts_bets(&self) -> bool {
        self.phase == DuelPhase::Betting
    }

    /// Whether `bet_id` was already accepted this round.
    pub fn has_seen(&self, bet_id: &str) -> bool {
        self.seen_bet_ids.contains(bet_id)
    }

    /// Record a bet on `side`. Returns false for an already-seen id.
    pub fn add_bet(&mut self, side: Side, mut bet: Bet) -> bool {
        if !self.seen_bet_ids.insert(bet.id.clone()) {
            return false;
        }
        bet.side = Some(side);
        self.bets.push(bet);
        true
    }

    /// All bets, in acceptance order.
    pub fn bets(&self) -> &[Bet] {
        &self.bets
    }

    /// Winner, once resolved.
    pub fn winner(&self) -> Option<Side> {
        self.resolution.map(|r| r.winner)
    }

    /// Full resolution record, once resolved.
    pub fn resolution(&self) -> Option<DuelResolution> {
        self.resolution
    }

    /// Round nonce.
    pub fn nonce(&self) -> u64 {
        self.seed.nonce
    }

    /// Published commitment (hash only).
    pub fn commitment(&self) -> FairnessCommitment {
        self.seed.commitment()
    }

    /// Commitment with the server seed, for settled rounds.
    pub fn reveal(&self) -> FairnessCommitment {
        self.seed.reveal()
    }

    /// Immutable client-facing copy. The roll never appears here.
    pub fn view(&self) -> DuelView {
        DuelView {
            id: self.id.clone(),
            phase: self.phase,
            started_at: self.started_at,
            ends_at: self.ends_at,
            micro: self.micro,
            bets: self.bets.clone(),
            winner: self.winner(),
            runtime_extra_ms: self.runtime_extra_ms,
            fair: self.commitment(),
        }
    }
}

/// Snapshot of a duel round.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuelView {
    /// Round id.
    pub id: String,
    /// Current phase.
    pub phase: DuelPhase,
    /// Phase start (ms).
    pub started_at: u64,
    /// Phase end (ms).
    pub ends_at: u64,
    /// Micro knobs.
    pub micro: MicroStats,
    /// All bets.
    pub bets: Vec<Bet>,
    /// Winner, from `resolve` on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<Side>,
    /// Seeded running-time extra.
    pub runtime_extra_ms: u64,
    /// Hash-only commitment.
    pub fair: FairnessCommitment,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::money::Amount;

    fn round(nonce: u64) -> DuelRound {
        DuelRound::new(RoundSeed::new("duel-test-seed", "client", nonce), 0)
    }

    #[test]
    fn test_even_stats_are_a_coin_flip() {
        let (p_a, p_b) = MicroStats::default().win_probabilities();
        assert_eq!(p_a, 0.5);
        assert_eq!(p_b, 0.5);
    }

    #[test]
    fn test_micro_weights_clamp() {
        let mut stats = MicroStats::default();
        stats.adjust(Side::A, MicroStat::Speed, 4);
        let (p_a, _) = stats.win_probabilities();
        // wA = 1.2, wB = 1.0
        assert!((p_a - 1.2 / 2.2).abs() < 1e-12);

        stats.adjust(Side::A, MicroStat::Speed, 1_000);
        stats.adjust(Side::A, MicroStat::Defense, 1_000);
        let (p_a, p_b) = stats.win_probabilities();
        // wA = 1.8, wB = 0.2
        assert!((p_a - 0.9).abs() < 1e-12);
        assert!((p_b - 0.1).abs() < 1e-12);

        stats.adjust(Side::B, MicroStat::Speed, i64::MAX);
        stats.adjust(Side::B, MicroStat::Speed, i64::MAX);
        assert_eq!(stats.b.speed, i64::MAX);
    }

    #[test]
    fn test_phase_timeline() {
        let mut r = round(1);
        let run = DUEL_RUNNING_BASE_MS + r.runtime_extra_ms;
        assert!(r.runtime_extra_ms < 4_000);

        assert_eq!(r.advance(DUEL_BETTING_MS), vec![DuelPhase::Running]);
        assert!(r.winner().is_none());
        assert!(r.advance(DUEL_BETTING_MS + run - 1).is_empty());
        assert_eq!(r.advance(DUEL_BETTING_MS + run), vec![DuelPhase::Resolve]);
        assert!(r.winner().is_some());
        assert_eq!(r.advance(DUEL_BETTING_MS + run + 1_000), vec![DuelPhase::Intermission]);
        assert!(r.is_finished(DUEL_BETTING_MS + run + 2_000));
    }

    #[test]
    fn test_late_tick_walks_every_phase() {
        let mut r = round(2);
        let entered = r.advance(60_000);
        assert_eq!(entered, vec![DuelPhase::Running, DuelPhase::Resolve, DuelPhase::Intermission]);
    }

    #[test]
    fn test_winner_is_committed_and_fixed() {
        for nonce in 1..50 {
            let seed = RoundSeed::new("duel-test-seed", "client", nonce);
            let expected_roll = derive_duel_outcome(&seed).roll;
            let mut r = DuelRound::new(seed, 0);
            r.advance(20_000);
            let resolution = r.resolution().unwrap();
            assert_eq!(resolution.roll, expected_roll);
            let expected = if expected_roll < 0.5 { Side::A } else { Side::B };
            assert_eq!(resolution.winner, expected);

            // Stats moved after resolution do not change the outcome.
            r.micro.adjust(Side::A, MicroStat::Speed, 100);
            r.resolve();
            r.advance(30_000);
            assert_eq!(r.winner(), Some(expected));
        }
    }

    #[test]
    fn test_view_hides_winner_until_resolve() {
        let mut r = round(3);
        r.add_bet(Side::B, Bet::new("x", "p", Amount::from(5), Side::B));
        r.advance(DUEL_BETTING_MS);
        let json = serde_json::to_string(&r.view()).unwrap();
        assert!(!json.contains("winner"));
        assert!(!json.contains("roll"));
        assert!(json.contains("\"micro\":{\"A\":{\"speed\":0,\"defense\":0}"));

        r.advance(20_000);
        assert!(serde_json::to_string(&r.view()).unwrap().contains("winner"));
    }

    #[test]
    fn test_duplicate_bet_ids() {
        let mut r = round(4);
        assert!(r.add_bet(Side::A, Bet::new("dup", "p", Amount::from(5), Side::A)));
        assert!(!r.add_bet(Side::A, Bet::new("dup", "p", Amount::from(5), Side::A)));
        assert_eq!(r.bets().len(), 1);
    }
}
