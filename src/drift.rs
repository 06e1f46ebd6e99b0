//! drift-rs backed protocol client and user view.

use crate::connection::NodeConnection;
use crate::ix;
use crate::sdk::{
    AccountSnapshot, BalanceType, Market, MarketKind, OrderInfo, PerpPositionInfo,
    ProtocolClient, SpotPositionInfo, UserView,
};

use anyhow::{Result, anyhow};
use drift_rs::{
    DriftClient, Pubkey,
    constants::PROGRAM_ID,
    math::{
        constants::BASE_PRECISION,
        liquidation::calculate_collateral,
    },
    types::{
        MarginRequirementType, MarketId, MarketType, OrderParams, OrderType, PositionDirection,
        SpotBalanceType, accounts::User,
    },
};
use log::{debug, info, warn};
use solana_sdk::{message::VersionedMessage, signature::Signature};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

pub const SUB_ACCOUNT_ID: u16 = 0;

const PRICE_PRECISION: i128 = 1_000_000;
const FUNDING_RATE_BUFFER: i128 = 1_000;
const AMM_TO_QUOTE_PRECISION_RATIO: i128 = 1_000;

/// Market names are space (or NUL) padded byte arrays.
fn decode_name(name: &[u8; 32]) -> String {
    String::from_utf8_lossy(name)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

/// Funding owed to (positive) or by (negative) the position since its last settlement.
fn funding_payment(
    amm_cumulative_funding_rate: i128,
    position: &PerpPositionInfo,
) -> Result<i128> {
    let delta = amm_cumulative_funding_rate
        .checked_sub(position.last_cumulative_funding_rate as i128)
        .ok_or_else(|| anyhow!("funding rate delta overflow on market {}", position.market_index))?;
    if delta == 0 || position.base_asset_amount == 0 {
        return Ok(0);
    }

    let product = delta
        .unsigned_abs()
        .checked_mul(position.base_asset_amount.unsigned_abs() as u128)
        .ok_or_else(|| anyhow!("funding payment overflow on market {}", position.market_index))?;
    let magnitude = i128::try_from(product)?
        / PRICE_PRECISION
        / FUNDING_RATE_BUFFER
        / AMM_TO_QUOTE_PRECISION_RATIO;

    // longs pay shorts when the rate rises
    let position_sign = if position.base_asset_amount > 0 { -1 } else { 1 };
    Ok(magnitude * position_sign * delta.signum())
}

/// Mark-to-oracle PnL in quote precision.
fn unrealized_pnl(position: &PerpPositionInfo, oracle_price: i64) -> i128 {
    position.quote_asset_amount as i128
        + position.base_asset_amount as i128 * oracle_price as i128 / BASE_PRECISION as i128
}

fn opposite(base_asset_amount: i64) -> PositionDirection {
    if base_asset_amount > 0 {
        PositionDirection::Short
    } else {
        PositionDirection::Long
    }
}

impl From<&drift_rs::types::PerpPosition> for PerpPositionInfo {
    fn from(p: &drift_rs::types::PerpPosition) -> Self {
        Self {
            market_index: p.market_index,
            base_asset_amount: p.base_asset_amount,
            quote_asset_amount: p.quote_asset_amount,
            quote_entry_amount: p.quote_entry_amount,
            last_cumulative_funding_rate: p.last_cumulative_funding_rate,
            open_orders: p.open_orders,
            open_bids: p.open_bids,
            open_asks: p.open_asks,
        }
    }
}

impl From<&drift_rs::types::SpotPosition> for SpotPositionInfo {
    fn from(p: &drift_rs::types::SpotPosition) -> Self {
        Self {
            market_index: p.market_index,
            scaled_balance: p.scaled_balance,
            balance_type: match p.balance_type {
                SpotBalanceType::Deposit => BalanceType::Deposit,
                SpotBalanceType::Borrow => BalanceType::Borrow,
            },
            open_orders: p.open_orders,
            open_bids: p.open_bids,
            open_asks: p.open_asks,
        }
    }
}

/// Protocol client for the keeper authority's default sub-account.
pub struct DriftProtocol {
    client: DriftClient,
    connection: NodeConnection,
    sub_account: Pubkey,
    dry_run: bool,
    errors: Mutex<Option<UnboundedReceiver<anyhow::Error>>>,
}

impl DriftProtocol {
    pub fn new(
        client: DriftClient,
        connection: NodeConnection,
        dry_run: bool,
        errors: UnboundedReceiver<anyhow::Error>,
    ) -> Self {
        let sub_account = client.wallet().sub_account(SUB_ACCOUNT_ID);
        Self {
            client,
            connection,
            sub_account,
            dry_run,
            errors: Mutex::new(Some(errors)),
        }
    }

    pub fn sub_account(&self) -> Pubkey {
        self.sub_account
    }

    pub fn program_id(&self) -> Pubkey {
        PROGRAM_ID
    }

    pub fn perp_symbols(&self) -> HashMap<u16, String> {
        self.client
            .program_data()
            .perp_market_configs()
            .iter()
            .map(|m| (m.market_index, decode_name(&m.name)))
            .collect()
    }

    pub fn spot_symbols(&self) -> HashMap<u16, String> {
        self.client
            .program_data()
            .spot_market_configs()
            .iter()
            .map(|m| (m.market_index, decode_name(&m.name)))
            .collect()
    }

    fn market_ids(&self) -> Vec<MarketId> {
        let data = self.client.program_data();
        data.perp_market_configs()
            .iter()
            .map(|m| MarketId::perp(m.market_index))
            .chain(
                data.spot_market_configs()
                    .iter()
                    .map(|m| MarketId::spot(m.market_index)),
            )
            .collect()
    }

    async fn send(&self, action: &str, tx: VersionedMessage) -> Result<Signature> {
        if self.dry_run {
            info!("Dry run, not sending {}", action);
            return Ok(Signature::default());
        }
        Ok(self.client.sign_and_send(tx).await?)
    }

    async fn close_order(&self, market: Market) -> Result<OrderParams> {
        let user = self.client.get_user_account(&self.sub_account).await?;

        match market.kind {
            MarketKind::Perp => {
                let pos = user
                    .perp_positions
                    .iter()
                    .find(|p| p.market_index == market.index && p.base_asset_amount != 0)
                    .ok_or_else(|| anyhow!("No perp position on market {}", market.index))?;

                Ok(OrderParams {
                    order_type: OrderType::Market,
                    market_type: MarketType::Perp,
                    direction: opposite(pos.base_asset_amount),
                    base_asset_amount: pos.base_asset_amount.unsigned_abs(),
                    market_index: market.index,
                    reduce_only: true,
                    ..Default::default()
                })
            }
            MarketKind::Spot => {
                let pos = user
                    .spot_positions
                    .iter()
                    .find(|p| p.market_index == market.index && p.scaled_balance != 0)
                    .ok_or_else(|| anyhow!("No spot position on market {}", market.index))?;
                let spot_market = self.client.try_get_spot_market_account(market.index)?;
                let token_amount = u64::try_from(pos.get_token_amount(&spot_market)?)?;

                let direction = match pos.balance_type {
                    SpotBalanceType::Deposit => PositionDirection::Short,
                    SpotBalanceType::Borrow => PositionDirection::Long,
                };

                Ok(OrderParams {
                    order_type: OrderType::Market,
                    market_type: MarketType::Spot,
                    direction,
                    base_asset_amount: token_amount,
                    market_index: market.index,
                    reduce_only: true,
                    ..Default::default()
                })
            }
        }
    }
}

impl ProtocolClient for DriftProtocol {
    fn authority(&self) -> Pubkey {
        *self.client.wallet().authority()
    }

    fn collateral_mint(&self) -> Result<Pubkey> {
        self.client
            .program_data()
            .spot_market_configs()
            .iter()
            .find(|m| m.market_index == 0)
            .map(|m| m.mint)
            .ok_or_else(|| anyhow!("Spot market 0 not found"))
    }

    fn take_error_events(&self) -> Option<UnboundedReceiver<anyhow::Error>> {
        self.errors
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }

    async fn subscribe(&self) -> Result<()> {
        let markets = self.market_ids();
        self.client.subscribe_markets(&markets).await?;
        self.client.subscribe_oracles(&markets).await?;
        debug!("Subscribed to {} markets", markets.len());
        Ok(())
    }

    async fn fetch_accounts(&self) -> Result<()> {
        let stats = self.client.get_user_stats(&self.authority()).await?;
        debug!("User stats: {} sub accounts", stats.number_of_sub_accounts);
        Ok(())
    }

    async fn user_exists(&self) -> Result<bool> {
        self.connection.account_exists(&self.sub_account).await
    }

    async fn initialize_user_account(&self) -> Result<Signature> {
        let authority = self.authority();
        let program_id = self.program_id();

        let mut instructions = Vec::with_capacity(2);
        let stats = ix::user_stats_address(&authority);
        if !self.connection.account_exists(&stats).await? {
            instructions.push(ix::initialize_user_stats(&program_id, &authority));
        }
        instructions.push(ix::initialize_user(&program_id, &authority, SUB_ACCOUNT_ID));

        self.connection.send_instructions(&instructions).await
    }

    async fn close_position(&self, market: Market) -> Result<Signature> {
        let order = self.close_order(market).await?;
        let tx = self
            .client
            .init_tx(&self.sub_account, false)
            .await?
            .place_orders(vec![order])
            .build();

        self.send("close position", tx).await
    }

    async fn cancel_order(&self, order_id: u32) -> Result<Signature> {
        let tx = self
            .client
            .init_tx(&self.sub_account, false)
            .await?
            .cancel_orders_by_id(vec![order_id])
            .build();

        self.send("cancel order", tx).await
    }

    async fn deposit(
        &self,
        amount: u64,
        spot_market_index: u16,
        token_account: &Pubkey,
    ) -> Result<Signature> {
        let tx = self
            .client
            .init_tx(&self.sub_account, false)
            .await?
            .deposit(amount, spot_market_index, *token_account, None)
            .build();

        self.send("deposit", tx).await
    }
}

/// View of the keeper's user account, refreshed on `fetch_accounts`.
pub struct DriftUser {
    client: DriftClient,
    sub_account: Pubkey,
    perp_symbols: HashMap<u16, String>,
    spot_symbols: HashMap<u16, String>,
    snapshot: Mutex<Option<AccountSnapshot>>,
}

impl DriftUser {
    pub fn new(client: DriftClient, protocol: &DriftProtocol) -> Self {
        Self {
            client,
            sub_account: protocol.sub_account(),
            perp_symbols: protocol.perp_symbols(),
            spot_symbols: protocol.spot_symbols(),
            snapshot: Mutex::new(None),
        }
    }

    fn build_snapshot(&self, user: &User) -> Result<AccountSnapshot> {
        let collateral = calculate_collateral(&self.client, user, MarginRequirementType::Initial)?;

        let perp_positions: Vec<PerpPositionInfo> =
            user.perp_positions.iter().map(PerpPositionInfo::from).collect();

        let mut pnl = 0i128;
        let mut funding_pnl = 0i128;
        for pos in perp_positions.iter().filter(|p| p.is_open()) {
            match self
                .client
                .try_get_oracle_price_data_and_slot(MarketId::perp(pos.market_index))
            {
                Some(oracle) => pnl += unrealized_pnl(pos, oracle.data.price),
                None => warn!("No oracle price for perp market {}", pos.market_index),
            }

            let market = self.client.try_get_perp_market_account(pos.market_index)?;
            let cumulative = if pos.base_asset_amount > 0 {
                market.amm.cumulative_funding_rate_long.as_i128()
            } else {
                market.amm.cumulative_funding_rate_short.as_i128()
            };
            funding_pnl += funding_payment(cumulative, pos)?;
        }

        Ok(AccountSnapshot {
            free_collateral: collateral.free,
            unrealized_pnl: pnl,
            unrealized_funding_pnl: funding_pnl,
            perp_positions,
            spot_positions: user.spot_positions.iter().map(SpotPositionInfo::from).collect(),
            orders: user
                .orders
                .iter()
                .map(|o| OrderInfo {
                    order_id: o.order_id,
                    base_asset_amount: o.base_asset_amount,
                })
                .collect(),
            perp_symbols: self.perp_symbols.clone(),
            spot_symbols: self.spot_symbols.clone(),
        })
    }
}

impl UserView for DriftUser {
    async fn subscribe(&self) -> Result<()> {
        self.client.subscribe_account(&self.sub_account).await?;
        Ok(())
    }

    async fn fetch_accounts(&self) -> Result<()> {
        let user = self.client.get_user_account(&self.sub_account).await?;
        let snapshot = self.build_snapshot(&user)?;
        *self
            .snapshot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(snapshot);
        Ok(())
    }

    fn snapshot(&self) -> Result<AccountSnapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
            .ok_or_else(|| anyhow!("User account {} not fetched", self.sub_account))
    }
}
