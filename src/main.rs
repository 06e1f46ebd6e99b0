//! # Keeper Status
//!
//! One-shot maintenance and status tool for a Drift keeper account.
//!
//! ## What it does
//! - Loads the keeper keypair (file, comma separated bytes, or vault)
//! - Syncs the protocol client and the keeper's user account
//! - Optionally closes positions, deposits collateral or cancels orders
//! - Prints free collateral, PnL and every open position
//!
//! ## Configuration
//! Set environment variables (a `.env` file is loaded when present):
//! - ENV: `devnet` or `mainnet-beta`
//! - ENDPOINT: Solana RPC endpoint
//! - KEEPER_PRIVATE_KEY: path to an id.json or comma separated key bytes
//! - VAULT_ENDPOINT / VAULT_TOKEN: only with `--vault true`
//!
//! ## Usage
//! `keeper-status --close-open-positions --cancel-open-orders`.
//! Press Ctrl+C to abort; the run exits with code 1.

mod actions;
mod bootstrap;
mod cli;
mod connection;
mod drift;
mod error;
mod ix;
mod report;
mod sdk;
mod subscriber;
mod sync;
mod wallet;

use actions::{Actions, Outcome};
use anyhow::{Result, anyhow};
use bootstrap::{Clients, Config};
use clap::Parser;
use cli::Options;
use dotenv::dotenv;
use env_logger::Builder;
use log::{debug, error, info};
use sdk::UserView;
use sync::SyncOptions;

async fn run(opts: &Options) -> Result<()> {
    let keypair = wallet::load_keypair(opts).await?;
    let config = Config::from_env()?;
    info!("RPC endpoint: {}", config.endpoint);

    let clients = Clients::new(&config, keypair, opts.dry_run).await?;

    let sync_opts = SyncOptions {
        init_user: opts.init_user,
        max_attempts: opts.max_subscribe_attempts,
        ..Default::default()
    };
    sync::sync_accounts(
        &sync_opts,
        &clients.connection,
        &clients.protocol,
        &clients.user,
        &clients.events,
        &clients.slots,
    )
    .await?;

    info!("User PublicKey: {}", clients.protocol.sub_account());
    debug!("Current slot: {}", clients.slots.current_slot());
    match clients.events.latest() {
        Some(tx) => debug!(
            "{} recent transactions, latest {} (slot {}, failed: {})",
            clients.events.tx_count(),
            tx.signature,
            tx.slot,
            tx.failed
        ),
        None => debug!("No recent transactions"),
    }
    for (kind, count) in clients.events.event_counts() {
        debug!(" . {} {} events, latest: {:?}", count, kind, clients.events.latest_event(&kind));
    }

    let actions = Actions {
        close_positions: opts.close_open_positions,
        cancel_orders: opts.cancel_open_orders,
        force_deposit: opts.force_deposit,
        require_collateral: opts.jit_maker,
        mint_before_deposit: config.network.is_devnet(),
    };

    match actions::dispatch(&actions, &clients.protocol, &clients.user, &clients.faucet).await? {
        Outcome::DepositOnly { .. } => {}
        Outcome::FullReport => report::print(&clients.user.snapshot()?),
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    let opts = Options::parse();

    // RUST_LOG wins over --debug
    Builder::new()
        .filter_level(opts.log_level())
        .parse_default_env()
        .format_timestamp_millis()
        .init();

    opts.log_summary();

    let result = tokio::select! {
        result = run(&opts) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            Err(anyhow!("interrupted"))
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
    std::process::exit(0);
}
