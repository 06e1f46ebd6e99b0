use crate::sdk::AccountSnapshot;

use drift_rs::math::constants::{BASE_PRECISION, QUOTE_PRECISION};
use log::info;

const SPOT_BALANCE_PRECISION: f64 = 1_000_000_000.0; // 1e9
const FUNDING_RATE_PRECISION: f64 = 100_000_000_000_000.0; // 1e14

const QUOTE_PRECISION_F64: f64 = QUOTE_PRECISION as f64;
const BASE_PRECISION_F64: f64 = BASE_PRECISION as f64;

fn quote(value: impl Into<i128>) -> f64 {
    value.into() as f64 / QUOTE_PRECISION_F64
}

fn base(value: impl Into<i128>) -> f64 {
    value.into() as f64 / BASE_PRECISION_F64
}

pub fn account_stats(snapshot: &AccountSnapshot) -> Vec<String> {
    vec![
        format!("User free collateral: ${}:", quote(snapshot.free_collateral)),
        format!(
            "User unrealized funding PnL: {}",
            quote(snapshot.unrealized_funding_pnl)
        ),
        format!("User unrealized PnL:         {}", quote(snapshot.unrealized_pnl)),
    ]
}

pub fn perp_position_lines(snapshot: &AccountSnapshot) -> Vec<String> {
    let mut lines = Vec::new();
    for p in snapshot.open_perp_positions() {
        lines.push(format!("[{}]", snapshot.perp_symbol(p.market_index)));
        lines.push(format!(" . baseAssetAmount:  {}", base(p.base_asset_amount)));
        lines.push(format!(" . quoteAssetAmount: {}", quote(p.quote_asset_amount)));
        lines.push(format!(" . quoteEntryAmount: {}", quote(p.quote_entry_amount)));
        lines.push(format!(
            " . lastCumulativeFundingRate: {}",
            p.last_cumulative_funding_rate as f64 / FUNDING_RATE_PRECISION
        ));
        lines.push(format!(
            " . openOrders: {}, openBids: {}, openAsks: {}",
            p.open_orders,
            base(p.open_bids),
            base(p.open_asks)
        ));
    }
    lines
}

pub fn spot_position_lines(snapshot: &AccountSnapshot) -> Vec<String> {
    let mut lines = Vec::new();
    for p in snapshot.open_spot_positions() {
        lines.push(format!("[{}]", snapshot.spot_symbol(p.market_index)));
        lines.push(format!(
            " . baseAssetAmount:  {}",
            p.signed_balance() as f64 / SPOT_BALANCE_PRECISION
        ));
        lines.push(format!(" . balanceType: {}", p.balance_type.label()));
        lines.push(format!(
            " . openOrders: {}, openBids: {}, openAsks: {}",
            p.open_orders,
            p.open_bids as f64 / SPOT_BALANCE_PRECISION,
            p.open_asks as f64 / SPOT_BALANCE_PRECISION
        ));
    }
    lines
}

/// Prints collateral, PnL and every open position of `snapshot`.
pub fn print(snapshot: &AccountSnapshot) {
    for line in account_stats(snapshot) {
        info!("{}", line);
    }

    info!("Open Perp Positions:");
    for line in perp_position_lines(snapshot) {
        println!("{}", line);
    }

    info!("Open Spot Positions:");
    for line in spot_position_lines(snapshot) {
        println!("{}", line);
    }
}
