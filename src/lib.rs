//! # Clash Dual Server
//!
//! Provably-fair wagering server running two real-time games over WebSocket:
//! a dual crash game with two independent multipliers and an A/B duel.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CLASH DUAL SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── fair.rs     - Seed commitments and round outcomes       │
//! │  ├── money.rs    - Exact integer money arithmetic            │
//! │  └── curve.rs    - Smooth and jumpy multiplier curves        │
//! │                                                              │
//! │  game/           - Game logic (no I/O, injected time)        │
//! │  ├── crash.rs    - Dual crash round state machine            │
//! │  ├── duel.rs     - A/B duel round state machine              │
//! │  ├── settlement.rs - Payouts with exact pool conservation    │
//! │  ├── economy.rs  - Bankroll, jackpot and RTP                 │
//! │  ├── wallet.rs   - Player balances                           │
//! │  ├── ledger.rs   - Seed issuance and fairness history        │
//! │  ├── state.rs    - Owned game state and command handlers     │
//! │  └── tick.rs     - Game loop step                            │
//! │                                                              │
//! │  network/        - Networking (owns the clock)               │
//! │  ├── server.rs   - WebSocket server and metrics endpoint     │
//! │  ├── protocol.rs - Message types and validation              │
//! │  ├── session.rs  - Connection registry                       │
//! │  ├── rate_limit.rs - Per-client message budget               │
//! │  └── metrics.rs  - Prometheus registry                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fairness Guarantee
//!
//! Every round is fixed by a `(serverSeed, clientSeed, nonce)` triple whose
//! server seed hash is published before betting opens. Given the triple,
//! crash targets, jump steps and the duel roll can be recomputed by anyone
//! and must match what the server played.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::fair::{FairnessCommitment, RoundSeed, SeedSource};
pub use core::money::Amount;
pub use game::state::{GameConfig, GameState, Snapshot};
pub use game::bet::{GameMode, PlayerId, Side};
pub use network::server::{GameServer, GameServerError, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
