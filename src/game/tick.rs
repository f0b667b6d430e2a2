//! Round Orchestration Tick
//!
//! One step of the game loop: advance the live mode's round, settle it on
//! entering intermission, open the next round once intermission ends. The
//! paused mode is not touched.

use tracing::warn;

use crate::game::bet::{GameMode, Side};
use crate::game::crash::{CrashPhase, CrashRound};
use crate::game::duel::{DuelPhase, DuelRound};
use crate::game::events::{GameEvent, RoundSummary};
use crate::game::ledger::{FairRecord, RoundOutcome};
use crate::game::settlement::{settle_crash_round, settle_duel_round, RoundSettlement};
use crate::game::state::GameState;

/// Game loop interval.
pub const TICK_INTERVAL_MS: u64 = 100;

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Events generated this tick.
    pub events: Vec<GameEvent>,
}

impl TickResult {
    /// Settlements that happened this tick.
    pub fn settlements(&self) -> impl Iterator<Item = &RoundSummary> {
        self.events.iter().filter_map(|e| match e {
            GameEvent::RoundSettled(summary) => Some(summary),
            _ => None,
        })
    }
}

/// Advance the live mode to `now` (ms).
pub fn tick(state: &mut GameState, now: u64) -> TickResult {
    let mut result = TickResult::default();
    match state.mode() {
        GameMode::CrashDual => tick_crash(state, now, &mut result.events),
        GameMode::DuelAb => tick_duel(state, now, &mut result.events),
    }
    result
}

// =============================================================================
// CRASH
// =============================================================================

fn tick_crash(state: &mut GameState, now: u64, events: &mut Vec<GameEvent>) {
    for phase in state.crash.advance(now) {
        events.push(GameEvent::PhaseChanged {
            mode: GameMode::CrashDual,
            round_id: state.crash.id.clone(),
            phase: phase.as_str(),
        });
        if phase == CrashPhase::Intermission {
            settle_crash(state, events);
        }
    }

    if state.crash.is_finished(now) {
        let seed = state.ledger.next_seed(GameMode::CrashDual);
        state.crash = CrashRound::new(seed, now);
        events.push(GameEvent::RoundStarted {
            mode: GameMode::CrashDual,
            round_id: state.crash.id.clone(),
            nonce: state.crash.nonce(),
        });
    }
}

fn settle_crash(state: &mut GameState, events: &mut Vec<GameEvent>) {
    let settlement = settle_crash_round(&state.crash, state.config.rake_bps);
    state.crash.burned = settlement.burned.clone();
    state.crash.payouts = settlement.payouts.clone();

    let targets = state.crash.targets();
    state.ledger.record(FairRecord {
        mode: GameMode::CrashDual,
        round_id: state.crash.id.clone(),
        commitment: state.crash.reveal(),
        outcome: RoundOutcome::Crash {
            target_a: targets.target_a,
            target_b: targets.target_b,
        },
    });

    let multipliers = vec![(Side::A, targets.target_a), (Side::B, targets.target_b)];
    events.push(GameEvent::RoundSettled(summarize(state, &settlement, multipliers)));
}

// =============================================================================
// DUEL
// =============================================================================

fn tick_duel(state: &mut GameState, now: u64, events: &mut Vec<GameEvent>) {
    for phase in state.duel.advance(now) {
        events.push(GameEvent::PhaseChanged {
            mode: GameMode::DuelAb,
            round_id: state.duel.id.clone(),
            phase: phase.as_str(),
        });
        if phase == DuelPhase::Intermission {
            settle_duel(state, events);
        }
    }

    if state.duel.is_finished(now) {
        let seed = state.ledger.next_seed(GameMode::DuelAb);
        state.duel = DuelRound::new(seed, now);
        events.push(GameEvent::RoundStarted {
            mode: GameMode::DuelAb,
            round_id: state.duel.id.clone(),
            nonce: state.duel.nonce(),
        });
    }
}

fn settle_duel(state: &mut GameState, events: &mut Vec<GameEvent>) {
    let settlement = settle_duel_round(&state.duel, state.config.rake_bps);
    for credit in &settlement.credits {
        match state.wallets.credit(&credit.player_id, &credit.amount) {
            Ok(balance) => events.push(GameEvent::WalletCredited {
                player_id: credit.player_id.clone(),
                balance,
            }),
            Err(err) => warn!(player = %credit.player_id, %err, "duel payout not credited"),
        }
    }

    let mut multipliers = Vec::new();
    if let Some(resolution) = state.duel.resolution() {
        state.ledger.record(FairRecord {
            mode: GameMode::DuelAb,
            round_id: state.duel.id.clone(),
            commitment: state.duel.reveal(),
            outcome: RoundOutcome::Duel {
                roll: resolution.roll,
                p_a: resolution.p_a,
                p_b: resolution.p_b,
                winner: resolution.winner,
            },
        });
        let p = match resolution.winner {
            Side::A => resolution.p_a,
            Side::B => resolution.p_b,
        };
        if p > 0.0 {
            multipliers.push((resolution.winner, 1.0 / p));
        }
    }

    events.push(GameEvent::RoundSettled(summarize(state, &settlement, multipliers)));
}

fn summarize(state: &mut GameState, settlement: &RoundSettlement, multipliers: Vec<(Side, f64)>) -> RoundSummary {
    let rtp = state.economy.record(settlement);
    RoundSummary {
        mode: settlement.mode,
        round_id: settlement.round_id.clone(),
        nonce: settlement.nonce,
        wagered: settlement.wagered.clone(),
        payouts: settlement.payouts.clone(),
        house_delta: settlement.house_delta(),
        rtp,
        multipliers,
    }
}
