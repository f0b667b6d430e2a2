//! Round Settlement
//!
//! Turns a finished round's bets and outcome into payouts. All sums are
//! exact [`Amount`]s; pool distribution assigns the truncation remainder to
//! the last winner so the pool is conserved to the unit.

use serde::Serialize;

use crate::core::money::{apply_basis_points, multiply_by_multiplier, subtract_basis_points, Amount};
use crate::game::bet::{Bet, BetId, GameMode, PlayerId, Side};
use crate::game::crash::CrashRound;
use crate::game::duel::DuelRound;

/// Money owed to one player for one bet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payout {
    /// Recipient.
    #[serde(rename = "uid")]
    pub player_id: PlayerId,
    /// Winning bet.
    pub bet_id: BetId,
    /// Net amount (after rake).
    pub amount: Amount,
}

/// Aggregate result of one round, ready for the economy.
#[derive(Clone, Debug, PartialEq)]
pub struct RoundSettlement {
    /// Mode the round belonged to.
    pub mode: GameMode,
    /// Round id.
    pub round_id: String,
    /// Round nonce.
    pub nonce: u64,
    /// Sum of all stakes.
    pub wagered: Amount,
    /// Stakes feeding the jackpot: losing stakes in crash, every stake in a
    /// duel (the whole pot is burned before the win pool is paid out).
    pub burned: Amount,
    /// Sum of net winnings.
    pub payouts: Amount,
    /// Wallet credits still to apply. Crash cashouts are credited when they
    /// happen, so crash settlements carry none.
    pub credits: Vec<Payout>,
}

impl RoundSettlement {
    /// `wagered - payouts`: the bankroll's change for this round.
    pub fn house_delta(&self) -> Amount {
        &self.wagered - &self.payouts
    }
}

// =============================================================================
// CRASH
// =============================================================================

/// Net credit for cashing out `stake` at `multiplier`.
pub fn cashout_payout(stake: &Amount, multiplier: f64, rake_bps: u32) -> Amount {
    let win = multiply_by_multiplier(stake, multiplier);
    subtract_basis_points(&win, rake_bps)
}

/// Totals for one crash side.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SideSettlement {
    /// Sum of stakes.
    pub wagered: Amount,
    /// Stakes lost.
    pub burned: Amount,
    /// Net winnings.
    pub payouts: Amount,
}

/// Settle one side against its final target.
///
/// A bet wins only if it was cashed out strictly below the target.
pub fn settle_crash_side(bets: &[Bet], final_target: f64, rake_bps: u32) -> SideSettlement {
    let mut totals = SideSettlement::default();
    for bet in bets {
        totals.wagered += &bet.amount;
        match bet.cashout_multiplier {
            Some(m) if bet.cashed_out && m < final_target => {
                totals.payouts += cashout_payout(&bet.amount, m, rake_bps);
            }
            _ => totals.burned += &bet.amount,
        }
    }
    totals
}

/// Settle a crash round that has crashed.
pub fn settle_crash_round(round: &CrashRound, rake_bps: u32) -> RoundSettlement {
    let targets = round.targets();
    let a = settle_crash_side(round.bets(Side::A), targets.target_a, rake_bps);
    let b = settle_crash_side(round.bets(Side::B), targets.target_b, rake_bps);
    RoundSettlement {
        mode: GameMode::CrashDual,
        round_id: round.id.clone(),
        nonce: round.nonce(),
        wagered: a.wagered + b.wagered,
        burned: a.burned + b.burned,
        payouts: a.payouts + b.payouts,
        credits: Vec::new(),
    }
}

// =============================================================================
// DUEL
// =============================================================================

/// Pool-split result of a duel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuelSettlement {
    /// Every stake on the round.
    pub burned: Amount,
    /// `burned` minus rake.
    pub win_pool: Amount,
    /// Sum of `payouts`; equals `win_pool` whenever anyone won.
    pub total_paid: Amount,
    /// One entry per winning bet.
    pub payouts: Vec<Payout>,
}

/// Split the pool among bets on the winning side, pro rata by stake.
///
/// All winners but the last are paid their truncated share; the last takes
/// the exact remainder. With no winning stake nothing is paid.
pub fn settle_duel(bets: &[Bet], winner: Option<Side>, rake_bps: u32) -> DuelSettlement {
    let burned: Amount = bets.iter().map(|b| &b.amount).sum();
    let win_pool = &burned - &apply_basis_points(&burned, rake_bps);

    let winners: Vec<&Bet> = match winner {
        Some(side) => bets.iter().filter(|b| b.side == Some(side)).collect(),
        None => Vec::new(),
    };
    let total_winner_stake: Amount = winners.iter().map(|b| &b.amount).sum();

    let mut payouts = Vec::with_capacity(winners.len());
    let mut distributed = Amount::zero();
    if total_winner_stake.is_positive() {
        let last = winners.len() - 1;
        for (i, bet) in winners.iter().enumerate() {
            let amount = if i == last {
                &win_pool - &distributed
            } else {
                bet.amount.mul_div(&win_pool, &total_winner_stake)
            };
            distributed += &amount;
            payouts.push(Payout {
                player_id: bet.player_id.clone(),
                bet_id: bet.id.clone(),
                amount,
            });
        }
    }

    DuelSettlement {
        burned,
        win_pool,
        total_paid: distributed,
        payouts,
    }
}

/// Settle a resolved duel round.
pub fn settle_duel_round(round: &DuelRound, rake_bps: u32) -> RoundSettlement {
    let split = settle_duel(round.bets(), round.winner(), rake_bps);
    let payouts = split.total_paid.clone();
    RoundSettlement {
        mode: GameMode::DuelAb,
        round_id: round.id.clone(),
        nonce: round.nonce(),
        wagered: split.burned.clone(),
        burned: split.burned,
        payouts,
        credits: split.payouts,
    }
}
