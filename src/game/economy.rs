//! Server Economy
//!
//! Process-wide aggregates, updated exactly once per settled round.

use serde::Serialize;

use crate::core::money::{apply_basis_points, percentage_of, Amount, BASIS_POINTS, JACKPOT_BPS};
use crate::game::bet::GameMode;
use crate::game::settlement::RoundSettlement;

/// Share of wagers the operator aims to keep, for display.
pub const OPERATOR_EDGE_TARGET_BPS: u32 = 300;

/// Aggregate statistics carried in every snapshot.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundStats {
    /// Settled rounds of either mode.
    pub total_rounds: u64,
    /// Settled crash rounds.
    pub crash_rounds: u64,
    /// Settled duel rounds.
    pub duel_rounds: u64,
    /// Sum of all stakes.
    pub total_wagered: Amount,
    /// Sum of all net winnings.
    pub total_payouts: Amount,
    /// `total_wagered - total_payouts`.
    pub operator_profit: Amount,
    /// Profit as a percentage of wagers.
    pub operator_edge: f64,
    /// Target edge, percent.
    pub operator_edge_target: f64,
}

/// The house's books.
#[derive(Clone, Debug)]
pub struct ServerEconomy {
    /// Live mode (global).
    pub mode: GameMode,
    /// House money.
    pub bankroll: Amount,
    /// Accumulated jackpot contributions.
    pub jackpot: Amount,
    /// Mean RTP percent over rounds that had wagers.
    pub rtp_running_average: f64,
    /// Settled rounds of either mode.
    pub rounds_completed: u64,
    /// Sum of all stakes.
    pub total_wagered: Amount,
    /// Sum of all net winnings.
    pub total_paid: Amount,
    rtp_samples: u64,
    crash_rounds: u64,
    duel_rounds: u64,
}

impl ServerEconomy {
    /// Fresh books with the given bankroll.
    pub fn new(mode: GameMode, initial_bankroll: Amount) -> Self {
        Self {
            mode,
            bankroll: initial_bankroll,
            jackpot: Amount::zero(),
            rtp_running_average: 0.0,
            rounds_completed: 0,
            total_wagered: Amount::zero(),
            total_paid: Amount::zero(),
            rtp_samples: 0,
            crash_rounds: 0,
            duel_rounds: 0,
        }
    }

    /// Fold one settlement into the books.
    ///
    /// Returns the round's RTP percent, or `None` if nothing was wagered.
    pub fn record(&mut self, settlement: &RoundSettlement) -> Option<f64> {
        self.bankroll += settlement.house_delta();
        self.jackpot += apply_basis_points(&settlement.burned, JACKPOT_BPS);
        self.total_wagered += &settlement.wagered;
        self.total_paid += &settlement.payouts;
        self.rounds_completed += 1;
        match settlement.mode {
            GameMode::CrashDual => self.crash_rounds += 1,
            GameMode::DuelAb => self.duel_rounds += 1,
        }

        if settlement.wagered.is_zero() {
            return None;
        }
        let rtp = percentage_of(&settlement.payouts, &settlement.wagered);
        self.rtp_samples += 1;
        self.rtp_running_average += (rtp - self.rtp_running_average) / self.rtp_samples as f64;
        Some(rtp)
    }

    /// Lifetime operator profit.
    pub fn operator_profit(&self) -> Amount {
        &self.total_wagered - &self.total_paid
    }

    /// Snapshot-ready statistics.
    pub fn stats(&self) -> RoundStats {
        let operator_profit = self.operator_profit();
        RoundStats {
            total_rounds: self.rounds_completed,
            crash_rounds: self.crash_rounds,
            duel_rounds: self.duel_rounds,
            total_wagered: self.total_wagered.clone(),
            total_payouts: self.total_paid.clone(),
            operator_edge: percentage_of(&operator_profit, &self.total_wagered),
            operator_profit,
            operator_edge_target: OPERATOR_EDGE_TARGET_BPS as f64 * 100.0 / BASIS_POINTS as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fair::{derive_crash_targets, RoundSeed};
    use crate::core::money::RAKE_BPS;
    use crate::game::bet::{Bet, Side};
    use crate::game::settlement::{cashout_payout, settle_crash_side, settle_duel};

    fn settlement(mode: GameMode, wagered: i64, payouts: i64) -> RoundSettlement {
        RoundSettlement {
            mode,
            round_id: "r".into(),
            nonce: 1,
            wagered: Amount::from(wagered),
            burned: Amount::from(wagered - payouts.min(wagered)),
            payouts: Amount::from(payouts),
            credits: Vec::new(),
        }
    }

    #[test]
    fn test_record_updates_books() {
        let mut eco = ServerEconomy::new(GameMode::CrashDual, Amount::from(100_000));
        let rtp = eco.record(&settlement(GameMode::CrashDual, 1_000, 500));
        assert_eq!(rtp, Some(50.0));
        assert_eq!(eco.bankroll, Amount::from(100_500));
        assert_eq!(eco.jackpot, Amount::from(5));

        let rtp = eco.record(&settlement(GameMode::DuelAb, 0, 0));
        assert_eq!(rtp, None);
        assert_eq!(eco.rtp_running_average, 50.0);

        eco.record(&settlement(GameMode::DuelAb, 100, 150));
        assert_eq!(eco.rtp_running_average, 100.0);
        assert_eq!(eco.bankroll, Amount::from(100_450));

        let stats = eco.stats();
        assert_eq!(stats.total_rounds, 3);
        assert_eq!(stats.crash_rounds, 1);
        assert_eq!(stats.duel_rounds, 2);
        assert_eq!(stats.operator_profit, Amount::from(450));
        assert_eq!(stats.operator_edge_target, 3.0);
    }

    #[test]
    fn test_bankroll_delta_is_exact_over_many_rounds() {
        let mut eco = ServerEconomy::new(GameMode::DuelAb, Amount::from(100_000));
        let mut expected = Amount::from(100_000);
        for round in 0..5_000i64 {
            let seed = RoundSeed::new("books", "client", round as u64);
            let winner = if seed.uniform("roll") < 0.5 { Side::A } else { Side::B };
            let bets = vec![
                Bet::new("1", "p1", Amount::from(13 + round % 97), Side::A),
                Bet::new("2", "p2", Amount::from(7 + round % 31), Side::A),
                Bet::new("3", "p3", Amount::from(29 + round % 53), Side::B),
            ];
            let split = settle_duel(&bets, Some(winner), RAKE_BPS);
            let s = RoundSettlement {
                mode: GameMode::DuelAb,
                round_id: round.to_string(),
                nonce: round as u64,
                wagered: split.burned.clone(),
                burned: split.burned.clone(),
                payouts: split.total_paid.clone(),
                credits: split.payouts,
            };
            let before = eco.bankroll.clone();
            eco.record(&s);
            assert_eq!(&eco.bankroll - &before, &s.wagered - &s.payouts);
            expected += &s.wagered - &s.payouts;
        }
        assert_eq!(eco.bankroll, expected);
        assert_eq!(eco.bankroll, Amount::from(100_000) + eco.operator_profit());
    }

    #[test]
    fn test_long_run_rtp_cashing_out_a_at_two() {
        let stake = Amount::from(100);
        let mut wagered = Amount::zero();
        let mut paid = Amount::zero();
        for nonce in 0..100_000u64 {
            let targets = derive_crash_targets(&RoundSeed::new("rtp-sim", "client", nonce));
            let mut bet = Bet::new("b", "p", stake.clone(), Side::A);
            if targets.target_a > 2.0 {
                bet.cashed_out = true;
                bet.cashout_multiplier = Some(2.0);
            }
            let side = settle_crash_side(&[bet], targets.target_a, RAKE_BPS);
            wagered += side.wagered;
            paid += side.payouts;
        }
        assert_eq!(cashout_payout(&stake, 2.0, RAKE_BPS), Amount::from(196));
        let rtp = percentage_of(&paid, &wagered);
        assert!((94.0..=96.0).contains(&rtp), "rtp {rtp}");
    }
}
