//! Game Logic Module
//!
//! Round engines, settlement and the owned game state. Nothing here does
//! I/O or reads the clock; time is passed in as milliseconds.
//!
//! ## Module Structure
//!
//! - `bet`: Bets, sides and modes
//! - `crash`: Dual crash round state machine
//! - `duel`: A/B duel round state machine
//! - `settlement`: Payout computation with exact pool conservation
//! - `economy`: Bankroll, jackpot, RTP and statistics
//! - `wallet`: Player balances
//! - `ledger`: Seed issuance and fairness history
//! - `state`: Game state and command handlers
//! - `tick`: Game loop step
//! - `events`: Tick output for the network layer

pub mod bet;
pub mod crash;
pub mod duel;
pub mod settlement;
pub mod economy;
pub mod wallet;
pub mod ledger;
pub mod state;
pub mod tick;
pub mod events;

// Re-export key types
pub use bet::{Bet, BetId, GameMode, PlayerId, Side};
pub use crash::{CrashPhase, CrashRound};
pub use duel::{DuelPhase, DuelRound, MicroStat};
pub use state::{BetRejection, BetRequest, CashoutRejection, GameConfig, GameState, Snapshot};
pub use tick::{tick, TickResult, TICK_INTERVAL_MS};
pub use events::GameEvent;
