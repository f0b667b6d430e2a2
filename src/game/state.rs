//! Game State
//!
//! Everything that mutates lives here: both rounds, the wallets, the
//! economy and the fairness ledger. Command handlers are plain synchronous
//! methods; the server serializes calls to them (and to [`tick`]) behind one
//! lock and never holds it across I/O.
//!
//! [`tick`]: crate::game::tick::tick

use serde::Serialize;
use tracing::debug;

use crate::core::fair::SeedSource;
use crate::core::money::{Amount, MoneyError, RAKE_BPS};
use crate::game::bet::{Bet, BetId, GameMode, PlayerId, Side};
use crate::game::crash::{CashoutFill, CrashRound, CrashView};
use crate::game::duel::{DuelRound, DuelView, MicroStat};
use crate::game::economy::{RoundStats, ServerEconomy};
use crate::game::ledger::{FairReport, FairnessLedger};
use crate::game::wallet::{WalletBook, WalletError};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Economic and fairness parameters.
#[derive(Clone, Debug)]
pub struct GameConfig {
    /// Public client seed mixed into every round.
    pub client_seed: String,
    /// Balance of a newly minted player.
    pub starting_balance: Amount,
    /// House bankroll at startup.
    pub initial_bankroll: Amount,
    /// Rake on winnings.
    pub rake_bps: u32,
    /// Live mode at startup.
    pub initial_mode: GameMode,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            client_seed: "clash-dual".to_string(),
            starting_balance: Amount::from(1_000),
            initial_bankroll: Amount::from(100_000),
            rake_bps: RAKE_BPS,
            initial_mode: GameMode::CrashDual,
        }
    }
}

// =============================================================================
// REJECTIONS
// =============================================================================

/// Why a bet was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BetRejection {
    /// No wallet for this player.
    #[error("not authenticated")]
    NotAuthenticated,
    /// The live round is past its betting phase.
    #[error("betting is closed")]
    BettingClosed,
    /// Duel bets must name a side.
    #[error("duel bets require a side")]
    MissingSide,
    /// Stake exceeds the balance.
    #[error("insufficient balance")]
    InsufficientBalance,
    /// `betId` already used this round.
    #[error("duplicate bet id")]
    DuplicateBet,
    /// Stake could not be converted.
    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] MoneyError),
}

impl From<WalletError> for BetRejection {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::UnknownPlayer(_) => BetRejection::NotAuthenticated,
            WalletError::InsufficientBalance => BetRejection::InsufficientBalance,
        }
    }
}

/// Why a cashout did nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CashoutRejection {
    /// No wallet for this player.
    #[error("not authenticated")]
    NotAuthenticated,
    /// Crash is not live or not running.
    #[error("no running crash round")]
    NotRunning,
    /// Player has no open bet on the round.
    #[error("nothing to cash out")]
    NothingToCashOut,
}

/// A validated bet command.
#[derive(Clone, Debug, PartialEq)]
pub struct BetRequest {
    /// Client-supplied stake; truncated and raised to at least 1.
    pub amount: f64,
    /// Chosen side.
    pub side: Option<Side>,
    /// Idempotency key.
    pub bet_id: BetId,
}

/// Result of a successful cashout.
#[derive(Clone, Debug, PartialEq)]
pub struct CashoutReceipt {
    /// Bets locked in.
    pub fills: Vec<CashoutFill>,
    /// Balance after crediting.
    pub balance: Amount,
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Immutable copy of the server's state, broadcast every tick.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Live mode.
    pub mode: GameMode,
    /// Current crash round.
    pub crash: CrashView,
    /// Current duel round.
    pub duel: DuelView,
    /// House bankroll.
    pub bankroll: Amount,
    /// Jackpot.
    pub jackpot: Amount,
    /// Running RTP percent.
    pub rtp_avg: f64,
    /// Settled rounds.
    pub rounds: u64,
    /// Aggregate statistics.
    pub stats: RoundStats,
}

// =============================================================================
// GAME STATE
// =============================================================================

/// The single owned game state.
#[derive(Debug)]
pub struct GameState {
    /// House books (including the live mode).
    pub economy: ServerEconomy,
    /// Player balances.
    pub wallets: WalletBook,
    pub(crate) crash: CrashRound,
    pub(crate) duel: DuelRound,
    pub(crate) ledger: FairnessLedger,
    pub(crate) config: GameConfig,
    /// When the non-live mode's round was paused.
    paused_since: u64,
}

impl GameState {
    /// Fresh state with one open round per mode.
    pub fn new(config: GameConfig, seeds: Box<dyn SeedSource>, now: u64) -> Self {
        let mut ledger = FairnessLedger::new(seeds, config.client_seed.clone());
        let crash = CrashRound::new(ledger.next_seed(GameMode::CrashDual), now);
        let duel = DuelRound::new(ledger.next_seed(GameMode::DuelAb), now);
        Self {
            economy: ServerEconomy::new(config.initial_mode, config.initial_bankroll.clone()),
            wallets: WalletBook::new(config.starting_balance.clone()),
            crash,
            duel,
            ledger,
            config,
            paused_since: now,
        }
    }

    /// The live mode.
    pub fn mode(&self) -> GameMode {
        self.economy.mode
    }

    /// Current crash round.
    pub fn crash_round(&self) -> &CrashRound {
        &self.crash
    }

    /// Current duel round.
    pub fn duel_round(&self) -> &DuelRound {
        &self.duel
    }

    /// Resume a known player or mint a new one. Returns the id and balance.
    pub fn authenticate(&mut self, uid: Option<&str>) -> (PlayerId, Amount) {
        let id = match uid {
            Some(uid) if self.wallets.contains(uid) => uid.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        let balance = self.wallets.open(&id).clone();
        (id, balance)
    }

    /// Make `mode` live for everyone.
    ///
    /// The outgoing round is paused where it stands; the incoming round's
    /// clock is shifted forward by however long it was paused. Returns
    /// false if `mode` was already live.
    pub fn switch_mode(&mut self, mode: GameMode, now: u64) -> bool {
        if mode == self.mode() {
            return false;
        }
        let paused_for = now.saturating_sub(self.paused_since);
        match mode {
            GameMode::CrashDual => self.crash.shift_clock(paused_for),
            GameMode::DuelAb => self.duel.shift_clock(paused_for),
        }
        self.paused_since = now;
        self.economy.mode = mode;
        true
    }

    /// Accept a bet on the live round.
    ///
    /// Checks run in order: wallet, duplicate id, phase, side, balance.
    /// Returns the new balance.
    pub fn place_bet(&mut self, player: &str, request: BetRequest) -> Result<Amount, BetRejection> {
        let balance = self.wallets.balance(player).ok_or(BetRejection::NotAuthenticated)?;
        let amount = Amount::from_whole_units(request.amount.max(1.0))?;

        let mode = self.mode();
        let (seen, open) = match mode {
            GameMode::CrashDual => (self.crash.has_seen(&request.bet_id), self.crash.accepts_bets()),
            GameMode::DuelAb => (self.duel.has_seen(&request.bet_id), self.duel.accepts_bets()),
        };
        if seen {
            return Err(BetRejection::DuplicateBet);
        }
        if !open {
            return Err(BetRejection::BettingClosed);
        }
        let side = match (mode, request.side) {
            (_, Some(side)) => side,
            (GameMode::CrashDual, None) => Side::A,
            (GameMode::DuelAb, None) => return Err(BetRejection::MissingSide),
        };
        if balance < &amount {
            return Err(BetRejection::InsufficientBalance);
        }

        let new_balance = self.wallets.debit(player, &amount)?;
        let bet = Bet::new(request.bet_id, player, amount, side);
        let added = match mode {
            GameMode::CrashDual => self.crash.add_bet(side, bet),
            GameMode::DuelAb => self.duel.add_bet(side, bet),
        };
        debug_assert!(added, "duplicate checked above");
        debug!(player, ?mode, side = side.as_str(), "bet accepted");
        Ok(new_balance)
    }

    /// Cash out all of the player's open crash bets and credit the wallet.
    pub fn cashout(&mut self, player: &str) -> Result<CashoutReceipt, CashoutRejection> {
        if !self.wallets.contains(player) {
            return Err(CashoutRejection::NotAuthenticated);
        }
        if self.mode() != GameMode::CrashDual || !self.crash.accepts_cashouts() {
            return Err(CashoutRejection::NotRunning);
        }
        let fills = self.crash.cashout(player, self.config.rake_bps);
        if fills.is_empty() {
            return Err(CashoutRejection::NothingToCashOut);
        }
        let credit: Amount = fills.iter().map(|f| &f.payout).sum();
        let balance = self
            .wallets
            .credit(player, &credit)
            .map_err(|_| CashoutRejection::NotAuthenticated)?;
        Ok(CashoutReceipt { fills, balance })
    }

    /// Nudge a micro knob on the current duel round. Not phase-gated.
    pub fn adjust_micro(&mut self, side: Side, stat: MicroStat, delta: i64) {
        self.duel.micro.adjust(side, stat, delta);
    }

    /// Faucet credit. Returns the new balance.
    pub fn top_up(&mut self, player: &str, amount: &Amount) -> Result<Amount, WalletError> {
        self.wallets.credit(player, amount)
    }

    /// Fairness report for `mode`, defaulting to its current round.
    ///
    /// Settled rounds still in history are fully revealed; the current
    /// unsettled round reports its hash only.
    pub fn fair_report(&self, mode: GameMode, nonce: Option<u64>) -> Option<FairReport> {
        let (live_nonce, live_id, live_commitment) = match mode {
            GameMode::CrashDual => (self.crash.nonce(), &self.crash.id, self.crash.commitment()),
            GameMode::DuelAb => (self.duel.nonce(), &self.duel.id, self.duel.commitment()),
        };
        let nonce = nonce.unwrap_or(live_nonce);
        if let Some(record) = self.ledger.find(mode, nonce) {
            return Some(FairReport::from(record));
        }
        (nonce == live_nonce).then(|| FairReport::live(mode, live_id, live_commitment))
    }

    /// Immutable copy for broadcast.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            mode: self.mode(),
            crash: self.crash.view(),
            duel: self.duel.view(),
            bankroll: self.economy.bankroll.clone(),
            jackpot: self.economy.jackpot.clone(),
            rtp_avg: self.economy.rtp_running_average,
            rounds: self.economy.rounds_completed,
            stats: self.economy.stats(),
        }
    }
}
