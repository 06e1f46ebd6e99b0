use crate::error::StatusError;
use crate::ix;
use crate::sdk::{AccountSnapshot, Faucet, Market, ProtocolClient, UserView};

use anyhow::{Result, bail};
use drift_rs::math::constants::QUOTE_PRECISION;
use log::{debug, error, info};
use solana_sdk::signature::Signature;

/// Spot market holding the quote collateral (USDC).
pub const QUOTE_SPOT_MARKET_INDEX: u16 = 0;

/// Which maintenance actions to run, taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct Actions {
    pub close_positions: bool,
    pub cancel_orders: bool,
    pub force_deposit: Option<f64>,
    /// Fail when there is no free collateral (JIT maker runs need some).
    pub require_collateral: bool,
    /// Mint the deposit through the token faucet first (devnet only).
    pub mint_before_deposit: bool,
}

/// What the run should do after dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A deposit was sent; the run ends here.
    DepositOnly { signature: Signature },
    /// Continue to the account report.
    FullReport,
}

/// Converts a UI amount of USDC into quote precision.
fn to_quote_units(amount: f64) -> Result<u64> {
    let scaled = (amount * QUOTE_PRECISION as f64).round();
    if !scaled.is_finite() || scaled > u64::MAX as f64 {
        bail!("Deposit amount {} is out of range", amount);
    }
    Ok(scaled as u64)
}

async fn close_positions<C: ProtocolClient>(client: &C, snapshot: &AccountSnapshot) -> Result<()> {
    info!("Closing open perp positions");
    let mut closed_perps = 0;
    for p in &snapshot.perp_positions {
        if !p.is_open() {
            debug!("no position on market: {}", p.market_index);
            continue;
        }
        info!("closing position on {}", p.market_index);
        info!(" . {}", client.close_position(Market::perp(p.market_index)).await?);
        closed_perps += 1;
    }
    println!("Closed {} perp positions", closed_perps);

    let mut closed_spots = 0;
    for p in &snapshot.spot_positions {
        if !p.is_open() {
            debug!("no position on market: {}", p.market_index);
            continue;
        }
        if p.market_index == QUOTE_SPOT_MARKET_INDEX {
            info!("skipping quote spot market {}", p.market_index);
            continue;
        }
        info!("closing spot position on {}", p.market_index);
        info!(" . {}", client.close_position(Market::spot(p.market_index)).await?);
        closed_spots += 1;
    }
    println!("Closed {} spot positions", closed_spots);
    Ok(())
}

async fn deposit<C: ProtocolClient, F: Faucet>(
    amount: f64,
    mint_first: bool,
    client: &C,
    faucet: &F,
) -> Result<Signature> {
    info!("Depositing ({} USDC to collateral account)", amount);
    if amount.is_nan() || amount <= 0.0 {
        error!("Deposit amount must be greater than 0");
        return Err(StatusError::InvalidDepositAmount(amount).into());
    }

    // TODO: support collateral other than spot market 0
    let mint = client.collateral_mint()?;
    let token_account = ix::associated_token_address(&client.authority(), &mint);
    let units = to_quote_units(amount)?;

    if mint_first {
        faucet.mint_to_user(&token_account, units).await?;
    }

    let sig = client
        .deposit(units, QUOTE_SPOT_MARKET_INDEX, &token_account)
        .await?;
    info!("Deposit transaction: {}", sig);
    info!("exiting...run again without --force-deposit flag");
    Ok(sig)
}

async fn cancel_open_orders<C: ProtocolClient>(
    cancel: bool,
    client: &C,
    snapshot: &AccountSnapshot,
) -> Result<()> {
    info!("");
    info!("Open orders: {}", snapshot.orders.len());

    let orders_to_cancel = snapshot.open_order_ids();
    if !cancel {
        return Ok(());
    }

    for order_id in orders_to_cancel {
        info!("Cancelling open order {}", order_id);
        client.cancel_order(order_id).await?;
    }
    Ok(())
}

/// Runs the requested actions in order: close, deposit, cancel.
///
/// A deposit ends the dispatch with [`Outcome::DepositOnly`], so order
/// cancellation and the report never run after one. Any failed transaction
/// ends the dispatch immediately; earlier transactions stay sent.
pub async fn dispatch<C, U, F>(
    actions: &Actions,
    client: &C,
    user: &U,
    faucet: &F,
) -> Result<Outcome>
where
    C: ProtocolClient,
    U: UserView,
    F: Faucet,
{
    let snapshot = user.snapshot()?;

    if actions.close_positions {
        close_positions(client, &snapshot).await?;
    }

    if snapshot.free_collateral == 0 && actions.require_collateral && actions.force_deposit.is_none()
    {
        return Err(StatusError::NoCollateral.into());
    }

    if let Some(amount) = actions.force_deposit {
        let signature = deposit(amount, actions.mint_before_deposit, client, faucet).await?;
        return Ok(Outcome::DepositOnly { signature });
    }

    cancel_open_orders(actions.cancel_orders, client, &snapshot).await?;
    Ok(Outcome::FullReport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::mock::*;
    use crate::sdk::{OrderInfo, PerpPositionInfo, SpotPositionInfo};

    fn snapshot() -> AccountSnapshot {
        AccountSnapshot {
            free_collateral: 1_000_000,
            perp_positions: vec![
                PerpPositionInfo {
                    base_asset_amount: 0,
                    ..Default::default()
                },
                PerpPositionInfo {
                    market_index: 1,
                    base_asset_amount: 5_000_000,
                    ..Default::default()
                },
            ],
            orders: vec![
                OrderInfo {
                    order_id: 9,
                    base_asset_amount: 100,
                },
                OrderInfo {
                    order_id: 2,
                    base_asset_amount: 0,
                },
                OrderInfo {
                    order_id: 4,
                    base_asset_amount: 7,
                },
            ],
            ..Default::default()
        }
    }

    struct Fixture {
        log: CallLog,
        client: MockProtocol,
        user: MockUser,
        faucet: MockFaucet,
    }

    impl Fixture {
        fn new(snapshot: AccountSnapshot) -> Self {
            let log = CallLog::default();
            Self {
                client: MockProtocol::new(log.clone()),
                user: MockUser::fetched(log.clone(), snapshot),
                faucet: MockFaucet { log: log.clone() },
                log,
            }
        }

        async fn dispatch(&self, actions: &Actions) -> Result<Outcome> {
            dispatch(actions, &self.client, &self.user, &self.faucet).await
        }
    }

    #[test]
    fn test_to_quote_units() {
        assert_eq!(to_quote_units(100.0).unwrap(), 100_000_000);
        assert_eq!(to_quote_units(0.5).unwrap(), 500_000);
        assert!(to_quote_units(f64::INFINITY).is_err());
    }

    #[tokio::test]
    async fn test_close_only_open_positions() {
        let f = Fixture::new(snapshot());
        let actions = Actions {
            close_positions: true,
            ..Default::default()
        };

        assert_eq!(f.dispatch(&actions).await.unwrap(), Outcome::FullReport);
        assert_eq!(f.log.count("close_position"), 1);
        assert_eq!(f.log.count("close_position Perp 1"), 1);
    }

    #[tokio::test]
    async fn test_close_skips_quote_spot_market() {
        let mut snap = snapshot();
        snap.spot_positions = vec![
            SpotPositionInfo {
                market_index: 0,
                scaled_balance: 1_000,
                ..Default::default()
            },
            SpotPositionInfo {
                market_index: 1,
                scaled_balance: 2_000,
                ..Default::default()
            },
            SpotPositionInfo {
                market_index: 2,
                scaled_balance: 0,
                ..Default::default()
            },
        ];
        let f = Fixture::new(snap);
        let actions = Actions {
            close_positions: true,
            ..Default::default()
        };

        f.dispatch(&actions).await.unwrap();
        assert_eq!(f.log.count("close_position Spot"), 1);
        assert_eq!(f.log.count("close_position Spot 1"), 1);
    }

    #[tokio::test]
    async fn test_failed_close_stops_dispatch() {
        let mut snap = snapshot();
        snap.perp_positions.push(PerpPositionInfo {
            market_index: 2,
            base_asset_amount: -3,
            ..Default::default()
        });
        let mut f = Fixture::new(snap);
        f.client.fail_sends = true;
        let actions = Actions {
            close_positions: true,
            cancel_orders: true,
            ..Default::default()
        };

        assert!(f.dispatch(&actions).await.is_err());
        assert_eq!(f.log.count("close_position"), 1);
        assert_eq!(f.log.count("cancel_order"), 0);
    }

    #[tokio::test]
    async fn test_negative_deposit_rejected() {
        let f = Fixture::new(snapshot());
        let actions = Actions {
            force_deposit: Some(-5.0),
            mint_before_deposit: true,
            ..Default::default()
        };

        let err = f.dispatch(&actions).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StatusError>(),
            Some(StatusError::InvalidDepositAmount(_))
        ));
        assert_eq!(f.log.count("deposit"), 0);
        assert_eq!(f.log.count("mint_to_user"), 0);
    }

    #[tokio::test]
    async fn test_devnet_deposit_mints_first_and_ends_run() {
        let f = Fixture::new(snapshot());
        let actions = Actions {
            force_deposit: Some(100.0),
            mint_before_deposit: true,
            cancel_orders: true,
            ..Default::default()
        };

        let outcome = f.dispatch(&actions).await.unwrap();
        assert!(matches!(outcome, Outcome::DepositOnly { .. }));

        assert_eq!(f.log.count("mint_to_user 100000000"), 1);
        assert_eq!(f.log.count("deposit 100000000 0"), 1);
        assert!(f.log.position("mint_to_user").unwrap() < f.log.position("deposit").unwrap());
        assert_eq!(f.log.count("cancel_order"), 0);
    }

    #[tokio::test]
    async fn test_mainnet_deposit_skips_faucet() {
        let f = Fixture::new(snapshot());
        let actions = Actions {
            force_deposit: Some(25.0),
            ..Default::default()
        };

        f.dispatch(&actions).await.unwrap();
        assert_eq!(f.log.count("mint_to_user"), 0);
        assert_eq!(f.log.count("deposit 25000000 0"), 1);
    }

    #[tokio::test]
    async fn test_cancel_open_orders_in_account_order() {
        let f = Fixture::new(snapshot());
        let actions = Actions {
            cancel_orders: true,
            ..Default::default()
        };

        assert_eq!(f.dispatch(&actions).await.unwrap(), Outcome::FullReport);
        assert_eq!(
            f.log.calls(),
            vec!["cancel_order 9".to_string(), "cancel_order 4".to_string()]
        );
    }

    #[tokio::test]
    async fn test_orders_left_alone_without_flag() {
        let f = Fixture::new(snapshot());
        f.dispatch(&Actions::default()).await.unwrap();
        assert!(!f.log.has_mutations());
    }

    #[tokio::test]
    async fn test_jit_maker_requires_collateral() {
        let mut snap = snapshot();
        snap.free_collateral = 0;
        let f = Fixture::new(snap);
        let actions = Actions {
            require_collateral: true,
            cancel_orders: true,
            ..Default::default()
        };

        let err = f.dispatch(&actions).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StatusError>(),
            Some(StatusError::NoCollateral)
        ));
        assert_eq!(f.log.count("cancel_order"), 0);
    }
}
