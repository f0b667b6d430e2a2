//! Crash Round Engine
//!
//! Two multipliers race from 1.0 toward hidden targets. Side A follows the
//! smooth curve, side B the seeded stepwise path. The round crashes the
//! instant either side reaches its target (or the running cap expires) and
//! both multipliers freeze there.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::curve::{smooth_multiplier, JumpPath};
use crate::core::fair::{derive_crash_targets, CrashTargets, FairnessCommitment, JumpSampler, RoundSeed};
use crate::core::money::Amount;
use crate::game::bet::{Bet, BetId, Side};
use crate::game::settlement::cashout_payout;

/// Betting window.
pub const CRASH_BETTING_MS: u64 = 4_000;

/// Longest a round may run before it is forced to crash.
pub const CRASH_RUNNING_MAX_MS: u64 = 25_000;

/// Time the frozen result stays on screen.
pub const CRASH_DISPLAY_MS: u64 = 1_000;

/// Pause before the next round (shared by both modes).
pub const INTERMISSION_MS: u64 = 1_000;

/// Crash round lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashPhase {
    /// Accepting bets.
    Betting,
    /// Multipliers climbing, cashouts allowed.
    Running,
    /// Frozen at the crash point.
    Crash,
    /// Settled, waiting for the next round.
    Intermission,
}

impl CrashPhase {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            CrashPhase::Betting => "betting",
            CrashPhase::Running => "running",
            CrashPhase::Crash => "crash",
            CrashPhase::Intermission => "intermission",
        }
    }
}

/// One bet locked in by a cashout.
#[derive(Clone, Debug, PartialEq)]
pub struct CashoutFill {
    /// Bet that was cashed out.
    pub bet_id: BetId,
    /// Side the bet was on.
    pub side: Side,
    /// Multiplier locked in.
    pub multiplier: f64,
    /// Net credit owed to the player.
    pub payout: Amount,
}

/// A single crash round.
#[derive(Clone, Debug)]
pub struct CrashRound {
    /// Round id.
    pub id: String,
    /// Current phase.
    pub phase: CrashPhase,
    /// When the current phase began (ms).
    pub started_at: u64,
    /// When the current phase is scheduled to end (ms).
    pub ends_at: u64,
    /// Side A's live multiplier.
    pub multiplier_a: f64,
    /// Side B's live multiplier.
    pub multiplier_b: f64,
    /// Stakes lost, filled in at settlement.
    pub burned: Amount,
    /// Net winnings, filled in at settlement.
    pub payouts: Amount,
    targets: CrashTargets,
    bets_a: Vec<Bet>,
    bets_b: Vec<Bet>,
    seen_bet_ids: BTreeSet<BetId>,
    seed: RoundSeed,
    jump_path: JumpPath,
}

impl CrashRound {
    /// Open a round in `betting`, drawing both targets from `seed`.
    pub fn new(seed: RoundSeed, now: u64) -> Self {
        let targets = derive_crash_targets(&seed);
        let jump_path = JumpPath::new(JumpSampler::new(&seed));
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            phase: CrashPhase::Betting,
            started_at: now,
            ends_at: now + CRASH_BETTING_MS,
            multiplier_a: 1.0,
            multiplier_b: 1.0,
            burned: Amount::zero(),
            payouts: Amount::zero(),
            targets,
            bets_a: Vec::new(),
            bets_b: Vec::new(),
            seen_bet_ids: BTreeSet::new(),
            seed,
            jump_path,
        }
    }

    // =========================================================================
    // PHASES
    // =========================================================================

    /// Advance to `now`, returning every phase entered on the way.
    ///
    /// While running, both multipliers are recomputed. Several phases may be
    /// entered in one call if ticks were delayed.
    pub fn advance(&mut self, now: u64) -> Vec<CrashPhase> {
        let mut entered = Vec::new();
        loop {
            match self.phase {
                CrashPhase::Betting if now >= self.ends_at => {
                    let at = self.ends_at;
                    self.enter(CrashPhase::Running, at, at + CRASH_RUNNING_MAX_MS);
                }
                CrashPhase::Running => {
                    let at = now.min(self.ends_at);
                    if !self.update_multipliers(at) {
                        break;
                    }
                    self.enter(CrashPhase::Crash, at, at + CRASH_DISPLAY_MS);
                }
                CrashPhase::Crash if now >= self.ends_at => {
                    let at = self.ends_at;
                    self.enter(CrashPhase::Intermission, at, at + INTERMISSION_MS);
                }
                _ => break,
            }
            entered.push(self.phase);
        }
        entered
    }

    fn enter(&mut self, phase: CrashPhase, at: u64, ends_at: u64) {
        debug!(round = %self.id, nonce = self.seed.nonce, ?phase, "crash phase");
        self.phase = phase;
        self.started_at = at;
        self.ends_at = ends_at;
    }

    /// Recompute both multipliers at `at`; returns true if the round crashes.
    fn update_multipliers(&mut self, at: u64) -> bool {
        let elapsed_secs = at.saturating_sub(self.started_at) as f64 / 1000.0;
        let a = smooth_multiplier(elapsed_secs);
        let b = self.jump_path.multiplier_at(elapsed_secs);
        let crashed = a >= self.targets.target_a || b >= self.targets.target_b || at >= self.ends_at;
        if crashed {
            self.multiplier_a = a.min(self.targets.target_a);
            self.multiplier_b = b.min(self.targets.target_b);
        } else {
            self.multiplier_a = a;
            self.multiplier_b = b;
        }
        crashed
    }

    /// Push the phase clock forward by `delta` ms, e.g. after a pause.
    pub fn shift_clock(&mut self, delta: u64) {
        self.started_at += delta;
        self.ends_at += delta;
    }

    /// Whether the intermission is over and a new round should open.
    pub fn is_finished(&self, now: u64) -> bool {
        self.phase == CrashPhase::Intermission && now >= self.ends_at
    }

    /// True only during `betting`.
    pub fn accepts_bets(&self) -> bool {
        self.phase == CrashPhase::Betting
    }

    /// True only during `running`.
    pub fn accepts_cashouts(&self) -> bool {
        self.phase == CrashPhase::Running
    }

    // =========================================================================
    // BETS
    // =========================================================================

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
        match side {
            Side::A => self.bets_a.push(bet),
            Side::B => self.bets_b.push(bet),
        }
        true
    }

    /// Bets on one side, in acceptance order.
    pub fn bets(&self, side: Side) -> &[Bet] {
        match side {
            Side::A => &self.bets_a,
            Side::B => &self.bets_b,
        }
    }

    /// Lock every open bet of `player` at its side's current multiplier.
    ///
    /// Empty outside `running` or when the player has nothing open.
    pub fn cashout(&mut self, player: &str, rake_bps: u32) -> Vec<CashoutFill> {
        if !self.accepts_cashouts() {
            return Vec::new();
        }
        let mut fills = Vec::new();
        let sides = [(Side::A, self.multiplier_a), (Side::B, self.multiplier_b)];
        for (side, multiplier) in sides {
            let bets = match side {
                Side::A => &mut self.bets_a,
                Side::B => &mut self.bets_b,
            };
            for bet in bets.iter_mut().filter(|b| b.player_id == player && !b.cashed_out) {
                bet.cashed_out = true;
                bet.cashout_multiplier = Some(multiplier);
                fills.push(CashoutFill {
                    bet_id: bet.id.clone(),
                    side,
                    multiplier,
                    payout: cashout_payout(&bet.amount, multiplier, rake_bps),
                });
            }
        }
        fills
    }

    // =========================================================================
    // FAIRNESS
    // =========================================================================

    /// The hidden targets. Never sent to clients before the crash.
    pub fn targets(&self) -> CrashTargets {
        self.targets
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

    /// Immutable client-facing copy.
    pub fn view(&self) -> CrashView {
        let revealed = matches!(self.phase, CrashPhase::Crash | CrashPhase::Intermission);
        CrashView {
            id: self.id.clone(),
            phase: self.phase,
            started_at: self.started_at,
            ends_at: self.ends_at,
            multiplier_a: self.multiplier_a,
            multiplier_b: self.multiplier_b,
            target_a: revealed.then_some(self.targets.target_a),
            target_b: revealed.then_some(self.targets.target_b),
            bets_a: self.bets_a.clone(),
            bets_b: self.bets_b.clone(),
            burned: self.burned.clone(),
            payouts: self.payouts.clone(),
            fair: self.commitment(),
        }
    }
}

/// Snapshot of a crash round.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashView {
    /// Round id.
    pub id: String,
    /// Current phase.
    pub phase: CrashPhase,
    /// Phase start (ms).
    pub started_at: u64,
    /// Phase end (ms).
    pub ends_at: u64,
    /// Side A multiplier.
    #[serde(rename = "mA")]
    pub multiplier_a: f64,
    /// Side B multiplier.
    #[serde(rename = "mB")]
    pub multiplier_b: f64,
    /// Side A target, once crashed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_a: Option<f64>,
    /// Side B target, once crashed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_b: Option<f64>,
    /// Bets on A.
    pub bets_a: Vec<Bet>,
    /// Bets on B.
    pub bets_b: Vec<Bet>,
    /// Stakes lost (after settlement).
    pub burned: Amount,
    /// Net winnings (after settlement).
    pub payouts: Amount,
    /// Hash-only commitment.
    pub fair: FairnessCommitment,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::curve::jumpy_multiplier;
    use crate::core::money::RAKE_BPS;

    fn round(nonce: u64) -> CrashRound {
        CrashRound::new(RoundSeed::new("crash-test-seed", "client", nonce), 0)
    }

    /// Run in 100 ms steps until the round leaves `running`.
    fn run_to_crash(r: &mut CrashRound) -> u64 {
        let mut now = 0;
        while r.phase != CrashPhase::Crash {
            now += 100;
            r.advance(now);
        }
        now
    }

    #[test]
    fn test_betting_then_running() {
        let mut r = round(1);
        assert!(r.accepts_bets());
        assert!(r.advance(3_999).is_empty());
        assert_eq!(r.advance(4_000), vec![CrashPhase::Running]);
        assert_eq!(r.started_at, 4_000);
        assert!(!r.accepts_bets());
        assert!(r.accepts_cashouts());
    }

    #[test]
    fn test_crash_freezes_at_target() {
        for nonce in 1..20 {
            let mut r = round(nonce);
            run_to_crash(&mut r);
            let targets = r.targets();
            assert!(r.multiplier_a <= targets.target_a);
            assert!(r.multiplier_b <= targets.target_b);
            assert!(r.multiplier_a >= 1.0 && r.multiplier_b >= 1.0);

            let frozen = (r.multiplier_a, r.multiplier_b);
            r.advance(r.started_at + 500);
            assert_eq!((r.multiplier_a, r.multiplier_b), frozen);
        }
    }

    #[test]
    fn test_running_cap_forces_crash() {
        let mut r = round(5);
        r.advance(4_000);
        // Pretend the targets are out of reach.
        r.targets = CrashTargets { target_a: 250.0, target_b: 400.0 };
        r.advance(4_000 + CRASH_RUNNING_MAX_MS + 500);
        assert_eq!(r.phase, CrashPhase::Crash);
        assert_eq!(r.started_at, 4_000 + CRASH_RUNNING_MAX_MS);
        assert_eq!(r.multiplier_a, smooth_multiplier(25.0));
    }

    #[test]
    fn test_full_lifecycle() {
        let mut r = round(2);
        let crashed_at = run_to_crash(&mut r);
        assert!(!r.is_finished(crashed_at));
        let entered = r.advance(crashed_at + CRASH_DISPLAY_MS);
        assert_eq!(entered, vec![CrashPhase::Intermission]);
        assert!(r.is_finished(r.ends_at));
    }

    #[test]
    fn test_duplicate_bet_ids() {
        let mut r = round(3);
        assert!(r.add_bet(Side::A, Bet::new("same", "p1", Amount::from(10), Side::A)));
        assert!(!r.add_bet(Side::B, Bet::new("same", "p1", Amount::from(10), Side::B)));
        assert_eq!(r.bets(Side::A).len(), 1);
        assert!(r.bets(Side::B).is_empty());
        assert!(r.has_seen("same"));
    }

    #[test]
    fn test_cashout_locks_current_multiplier_once() {
        let mut r = round(4);
        r.add_bet(Side::A, Bet::new("a", "p1", Amount::from(100), Side::A));
        r.add_bet(Side::B, Bet::new("b", "p1", Amount::from(100), Side::B));
        r.add_bet(Side::A, Bet::new("c", "p2", Amount::from(100), Side::A));

        assert!(r.cashout("p1", RAKE_BPS).is_empty(), "no cashouts while betting");

        r.advance(4_000);
        let fills = r.cashout("p1", RAKE_BPS);
        assert_eq!(fills.len(), 2);
        assert!(fills.iter().all(|f| f.multiplier == 1.0));
        assert!(fills.iter().all(|f| f.payout == Amount::from(98)));
        assert!(r.cashout("p1", RAKE_BPS).is_empty());
        assert!(!r.bets(Side::A)[1].cashed_out);
    }

    #[test]
    fn test_live_side_b_matches_recomputation() {
        let seed = RoundSeed::new("trajectory", "client", 11);
        let sampler = JumpSampler::new(&seed);
        let mut r = CrashRound::new(seed, 0);
        r.targets = CrashTargets { target_a: 250.0, target_b: 400.0 };
        r.advance(CRASH_BETTING_MS);
        for step in 1..=150u64 {
            let now = CRASH_BETTING_MS + step * 100;
            r.advance(now);
            let t = (step * 100) as f64 / 1000.0;
            assert_eq!(r.multiplier_b, jumpy_multiplier(&sampler, t), "step {step}");
        }
    }

    #[test]
    fn test_view_hides_targets_until_crash() {
        let mut r = round(6);
        let json = serde_json::to_string(&r.view()).unwrap();
        assert!(!json.contains("targetA"));
        assert!(!json.contains("serverSeed\""));
        assert!(json.contains("\"mA\":1.0"));

        run_to_crash(&mut r);
        let view = r.view();
        assert_eq!(view.target_a, Some(r.targets().target_a));
        assert_eq!(view.target_b, Some(r.targets().target_b));
    }
}
