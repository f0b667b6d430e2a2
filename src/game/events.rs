//! Game Events
//!
//! Emitted by the tick for the network layer: which wallets to push, what to
//! log, what to record in metrics.

use crate::core::money::Amount;
use crate::game::bet::{GameMode, PlayerId, Side};

/// Per-round summary produced at settlement.
#[derive(Clone, Debug, PartialEq)]
pub struct RoundSummary {
    /// Mode.
    pub mode: GameMode,
    /// Round id.
    pub round_id: String,
    /// Round nonce.
    pub nonce: u64,
    /// Sum of stakes.
    pub wagered: Amount,
    /// Sum of net winnings.
    pub payouts: Amount,
    /// Bankroll change (`wagered - payouts`).
    pub house_delta: Amount,
    /// Round RTP percent, if anything was wagered.
    pub rtp: Option<f64>,
    /// Final multipliers per side (crash targets, or the duel winner's `1/p`).
    pub multipliers: Vec<(Side, f64)>,
}

/// Something the tick did.
#[derive(Clone, Debug, PartialEq)]
pub enum GameEvent {
    /// A new round opened for betting.
    RoundStarted {
        /// Mode.
        mode: GameMode,
        /// New round id.
        round_id: String,
        /// New round nonce.
        nonce: u64,
    },
    /// A round moved to another phase.
    PhaseChanged {
        /// Mode.
        mode: GameMode,
        /// Round id.
        round_id: String,
        /// Phase entered.
        phase: &'static str,
    },
    /// A round was settled and its seed revealed.
    RoundSettled(RoundSummary),
    /// A settlement credited a wallet.
    WalletCredited {
        /// Recipient.
        player_id: PlayerId,
        /// Balance after the credit.
        balance: Amount,
    },
}
