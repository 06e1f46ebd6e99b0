//! Seams between the status flow and the SDK objects it drives.
//!
//! The drift-rs backed implementations live in `drift.rs` and
//! `subscriber.rs`; the flow in `sync.rs` and `actions.rs` only sees these
//! traits and the [`AccountSnapshot`] read model.

use anyhow::Result;
use drift_rs::Pubkey;
use solana_sdk::signature::Signature;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarketKind {
    Perp,
    Spot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Market {
    pub kind: MarketKind,
    pub index: u16,
}

impl Market {
    pub fn perp(index: u16) -> Self {
        Self {
            kind: MarketKind::Perp,
            index,
        }
    }

    pub fn spot(index: u16) -> Self {
        Self {
            kind: MarketKind::Spot,
            index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalanceType {
    #[default]
    Deposit,
    Borrow,
}

impl BalanceType {
    pub fn label(&self) -> &'static str {
        match self {
            BalanceType::Deposit => "deposit",
            BalanceType::Borrow => "borrow",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerpPositionInfo {
    pub market_index: u16,
    pub base_asset_amount: i64,
    pub quote_asset_amount: i64,
    pub quote_entry_amount: i64,
    pub last_cumulative_funding_rate: i64,
    pub open_orders: u8,
    pub open_bids: i64,
    pub open_asks: i64,
}

impl PerpPositionInfo {
    pub fn is_open(&self) -> bool {
        self.base_asset_amount != 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpotPositionInfo {
    pub market_index: u16,
    pub scaled_balance: u64,
    pub balance_type: BalanceType,
    pub open_orders: u8,
    pub open_bids: i64,
    pub open_asks: i64,
}

impl SpotPositionInfo {
    pub fn is_open(&self) -> bool {
        self.scaled_balance != 0
    }

    /// Scaled balance, negative for borrows.
    pub fn signed_balance(&self) -> i128 {
        match self.balance_type {
            BalanceType::Deposit => self.scaled_balance as i128,
            BalanceType::Borrow => -(self.scaled_balance as i128),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderInfo {
    pub order_id: u32,
    pub base_asset_amount: u64,
}

/// Point-in-time copy of the user account plus the margin figures derived from it.
#[derive(Debug, Clone, Default)]
pub struct AccountSnapshot {
    pub free_collateral: i128,
    pub unrealized_pnl: i128,
    pub unrealized_funding_pnl: i128,
    pub perp_positions: Vec<PerpPositionInfo>,
    pub spot_positions: Vec<SpotPositionInfo>,
    pub orders: Vec<OrderInfo>,
    pub perp_symbols: HashMap<u16, String>,
    pub spot_symbols: HashMap<u16, String>,
}

impl AccountSnapshot {
    pub fn open_perp_positions(&self) -> impl Iterator<Item = &PerpPositionInfo> {
        self.perp_positions.iter().filter(|p| p.is_open())
    }

    pub fn open_spot_positions(&self) -> impl Iterator<Item = &SpotPositionInfo> {
        self.spot_positions.iter().filter(|p| p.is_open())
    }

    /// Ids of orders with a non-zero size, in account order.
    pub fn open_order_ids(&self) -> Vec<u32> {
        self.orders
            .iter()
            .filter(|o| o.base_asset_amount != 0)
            .map(|o| o.order_id)
            .collect()
    }

    pub fn perp_symbol(&self, market_index: u16) -> String {
        self.perp_symbols
            .get(&market_index)
            .cloned()
            .unwrap_or_else(|| format!("PERP-{}", market_index))
    }

    pub fn spot_symbol(&self, market_index: u16) -> String {
        self.spot_symbols
            .get(&market_index)
            .cloned()
            .unwrap_or_else(|| format!("SPOT-{}", market_index))
    }
}

/// Node connection: wallet balances and token accounts.
pub trait Connection {
    async fn balance(&self, owner: &Pubkey) -> Result<u64>;
    async fn token_balance(&self, token_account: &Pubkey) -> Result<Option<f64>>;
    /// Returns the wallet's associated token account for `mint`, creating it when absent.
    async fn get_or_create_token_account(&self, mint: &Pubkey) -> Result<Pubkey>;
}

/// Protocol client for the keeper's authority.
pub trait ProtocolClient {
    fn authority(&self) -> Pubkey;
    /// Mint of the collateral (quote) spot market.
    fn collateral_mint(&self) -> Result<Pubkey>;
    /// Stream of asynchronous client errors; yields the receiver once.
    fn take_error_events(&self) -> Option<UnboundedReceiver<anyhow::Error>>;
    async fn subscribe(&self) -> Result<()>;
    async fn fetch_accounts(&self) -> Result<()>;
    async fn user_exists(&self) -> Result<bool>;
    async fn initialize_user_account(&self) -> Result<Signature>;
    async fn close_position(&self, market: Market) -> Result<Signature>;
    async fn cancel_order(&self, order_id: u32) -> Result<Signature>;
    async fn deposit(
        &self,
        amount: u64,
        spot_market_index: u16,
        token_account: &Pubkey,
    ) -> Result<Signature>;
}

/// View over the keeper's user account.
pub trait UserView {
    async fn subscribe(&self) -> Result<()>;
    async fn fetch_accounts(&self) -> Result<()>;
    /// Latest fetched snapshot; errors before the first fetch.
    fn snapshot(&self) -> Result<AccountSnapshot>;
}

/// Background subscription (events, slots).
pub trait Subscriber {
    async fn subscribe(&self) -> Result<()>;
}

pub trait Faucet {
    async fn mint_to_user(&self, token_account: &Pubkey, amount: u64) -> Result<Signature>;
}
