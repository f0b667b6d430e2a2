//! Bets, Sides and Modes

use serde::{Deserialize, Serialize};

use crate::core::money::Amount;

/// Player identifier (UUID string minted at first auth).
pub type PlayerId = String;

/// Client-supplied idempotency key.
pub type BetId = String;

/// One of the two contestants in either mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Left / first side.
    A,
    /// Right / second side.
    B,
}

impl Side {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Side::A => "A",
            Side::B => "B",
        }
    }
}

/// Which round type is live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GameMode {
    /// Two racing crash multipliers.
    #[serde(rename = "crash_dual")]
    CrashDual,
    /// Skill-modified coin flip.
    #[serde(rename = "duel_ab")]
    DuelAb,
}

impl GameMode {
    /// Wire / metrics label.
    pub fn as_str(self) -> &'static str {
        match self {
            GameMode::CrashDual => "crash_dual",
            GameMode::DuelAb => "duel_ab",
        }
    }
}

/// A wager on one round.
///
/// Only `cashed_out` and `cashout_multiplier` ever change after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bet {
    /// Idempotency key.
    pub id: BetId,
    /// Owner.
    #[serde(rename = "uid")]
    pub player_id: PlayerId,
    /// Stake, already debited.
    pub amount: Amount,
    /// Chosen side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    /// Crash only: whether the bet has been cashed out.
    #[serde(default)]
    pub cashed_out: bool,
    /// Crash only: the multiplier locked at cashout.
    #[serde(rename = "cashoutAt", skip_serializing_if = "Option::is_none")]
    pub cashout_multiplier: Option<f64>,
}

impl Bet {
    /// A fresh, not-yet-cashed bet.
    pub fn new(id: impl Into<BetId>, player_id: impl Into<PlayerId>, amount: Amount, side: Side) -> Self {
        Self {
            id: id.into(),
            player_id: player_id.into(),
            amount,
            side: Some(side),
            cashed_out: false,
            cashout_multiplier: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&GameMode::CrashDual).unwrap(), "\"crash_dual\"");
        assert_eq!(serde_json::to_string(&GameMode::DuelAb).unwrap(), "\"duel_ab\"");
        assert_eq!(serde_json::to_string(&Side::B).unwrap(), "\"B\"");

        let bet = Bet::new("b1", "p1", Amount::from(50), Side::A);
        let json = serde_json::to_string(&bet).unwrap();
        assert!(json.contains("\"uid\":\"p1\""));
        assert!(json.contains("\"cashedOut\":false"));
        assert!(!json.contains("cashoutAt"));
    }
}
