//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket. Every
//! message is a JSON object discriminated by its `t` field.

use serde::{Deserialize, Serialize};

use crate::game::bet::{GameMode, PlayerId, Side};
use crate::game::duel::MicroStat;
use crate::game::ledger::FairReport;
use crate::game::state::Snapshot;
use crate::game::wallet::Wallet;

/// Decode failures. Both map to `invalid_payload` on the wire.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not JSON, unknown `t`, or wrong field types.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    /// Well-formed but violates a field constraint.
    #[error("invalid field `{field}`: {reason}")]
    Schema {
        /// Offending field.
        field: &'static str,
        /// What was wrong with it.
        reason: &'static str,
    },
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Identify, optionally resuming an earlier uid.
    Auth {
        /// Returning player id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uid: Option<PlayerId>,
    },

    /// Change the server-wide live mode.
    SwitchMode {
        /// Mode to make live.
        mode: GameMode,
    },

    /// Stake on the live round.
    Bet {
        /// Stake in whole units; fractional parts are dropped.
        amount: f64,
        /// Side; required in duel mode, defaults to A in crash mode.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        side: Option<Side>,
        /// Idempotency key.
        #[serde(rename = "betId")]
        bet_id: String,
    },

    /// Cash out every open crash bet.
    Cashout,

    /// Nudge a duel micro knob.
    Micro {
        /// Side whose knob moves.
        side: Side,
        /// Which knob.
        what: MicroStat,
        /// Amount added (truncated toward zero).
        value: f64,
    },

    /// Faucet credit.
    Topup {
        /// Credit in whole units.
        amount: f64,
    },

    /// Liveness probe.
    Ping,

    /// Ask for a round's fairness data.
    Fair {
        /// Mode of the round.
        mode: GameMode,
        /// Round nonce; the current round if absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nonce: Option<u64>,
    },
}

impl ClientMessage {
    /// Parse and validate. No message reaches the game unless this succeeds.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let msg: ClientMessage = serde_json::from_str(text)?;
        msg.validate()?;
        Ok(msg)
    }

    /// Field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            ClientMessage::Auth { uid: Some(uid) } if uid.is_empty() => Err(schema("uid", "must not be empty")),
            ClientMessage::Bet { amount, bet_id, .. } => {
                positive("amount", *amount)?;
                if bet_id.is_empty() {
                    return Err(schema("betId", "must not be empty"));
                }
                Ok(())
            }
            ClientMessage::Topup { amount } => positive("amount", *amount),
            ClientMessage::Micro { value, .. } if !value.is_finite() => Err(schema("value", "must be finite")),
            _ => Ok(()),
        }
    }

    /// Tag, for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Auth { .. } => "auth",
            ClientMessage::SwitchMode { .. } => "switch_mode",
            ClientMessage::Bet { .. } => "bet",
            ClientMessage::Cashout => "cashout",
            ClientMessage::Micro { .. } => "micro",
            ClientMessage::Topup { .. } => "topup",
            ClientMessage::Ping => "ping",
            ClientMessage::Fair { .. } => "fair",
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn schema(field: &'static str, reason: &'static str) -> ProtocolError {
    ProtocolError::Schema { field, reason }
}

fn positive(field: &'static str, value: f64) -> Result<(), ProtocolError> {
    if !value.is_finite() {
        return Err(schema(field, "must be finite"));
    }
    if value <= 0.0 {
        return Err(schema(field, "must be positive"));
    }
    Ok(())
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to `auth`.
    Hello {
        /// Assigned or resumed uid.
        uid: PlayerId,
        /// Current balance.
        wallet: Wallet,
        /// Current state.
        snapshot: Snapshot,
    },

    /// Balance changed.
    Wallet {
        /// New balance.
        wallet: Wallet,
    },

    /// Periodic state broadcast.
    Snapshot {
        /// Current state.
        snapshot: Snapshot,
    },

    /// Request failed.
    Error {
        /// Error code.
        message: ErrorCode,
    },

    /// Fairness data for one round.
    Fair(FairReport),

    /// Reply to `ping`.
    Pong,
}

impl ServerMessage {
    /// Error reply.
    pub fn error(code: ErrorCode) -> Self {
        ServerMessage::Error { message: code }
    }

    /// Tag, for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Hello { .. } => "hello",
            ServerMessage::Wallet { .. } => "wallet",
            ServerMessage::Snapshot { .. } => "snapshot",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Fair(_) => "fair",
            ServerMessage::Pong => "pong",
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Error codes carried in `{t:"error", message}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Message failed parsing or validation.
    InvalidPayload,
    /// `betId` already used this round.
    DuplicateBet,
    /// Too many messages in the current window.
    RateLimit,
    /// No live or recorded round with that nonce.
    FairNotFound,
    /// Unexpected server failure.
    InternalError,
}
