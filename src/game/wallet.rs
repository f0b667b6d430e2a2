//! Player Wallets

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::money::Amount;
use crate::game::bet::PlayerId;

/// Wallet mutation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    /// No wallet was opened for this player.
    #[error("unknown player: {0}")]
    UnknownPlayer(PlayerId),
    /// Debit larger than the balance.
    #[error("insufficient balance")]
    InsufficientBalance,
}

/// Wire view of a wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Wallet {
    /// Current balance.
    pub balance: Amount,
}

/// Every player's balance.
#[derive(Clone, Debug)]
pub struct WalletBook {
    balances: BTreeMap<PlayerId, Amount>,
    starting_balance: Amount,
}

impl WalletBook {
    /// Empty book; new players start with `starting_balance`.
    pub fn new(starting_balance: Amount) -> Self {
        Self {
            balances: BTreeMap::new(),
            starting_balance,
        }
    }

    /// Open a wallet if the player has none. Existing balances are untouched.
    pub fn open(&mut self, player: &str) -> &Amount {
        self.balances
            .entry(player.to_string())
            .or_insert_with(|| self.starting_balance.clone())
    }

    /// Whether the player has a wallet.
    pub fn contains(&self, player: &str) -> bool {
        self.balances.contains_key(player)
    }

    /// Current balance.
    pub fn balance(&self, player: &str) -> Option<&Amount> {
        self.balances.get(player)
    }

    /// Wire view.
    pub fn wallet(&self, player: &str) -> Option<Wallet> {
        self.balance(player).map(|b| Wallet { balance: b.clone() })
    }

    /// Remove `amount`, refusing to go below zero. Returns the new balance.
    pub fn debit(&mut self, player: &str, amount: &Amount) -> Result<Amount, WalletError> {
        let balance = self
            .balances
            .get_mut(player)
            .ok_or_else(|| WalletError::UnknownPlayer(player.to_string()))?;
        if &*balance < amount {
            return Err(WalletError::InsufficientBalance);
        }
        *balance -= amount;
        Ok(balance.clone())
    }

    /// Add `amount`. Returns the new balance.
    pub fn credit(&mut self, player: &str, amount: &Amount) -> Result<Amount, WalletError> {
        let balance = self
            .balances
            .get_mut(player)
            .ok_or_else(|| WalletError::UnknownPlayer(player.to_string()))?;
        *balance += amount;
        Ok(balance.clone())
    }

    /// Number of wallets.
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    /// True if no wallet has been opened.
    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}
