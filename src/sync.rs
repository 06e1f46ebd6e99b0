use crate::error::StatusError;
use crate::sdk::{Connection, ProtocolClient, Subscriber, UserView};

use anyhow::Result;
use log::{error, info, warn};
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Create the user account when it does not exist yet.
    pub init_user: bool,
    pub retry_interval: Duration,
    /// Retry forever when `None`.
    pub max_attempts: Option<u32>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            init_user: false,
            retry_interval: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

/// Logs every asynchronous client error; never ends the run.
fn spawn_error_listener(mut errors: UnboundedReceiver<anyhow::Error>) {
    tokio::spawn(async move {
        while let Some(e) = errors.recv().await {
            info!("drift client error");
            error!("{:#}", e);
        }
    });
}

async fn log_balances<N: Connection, C: ProtocolClient>(connection: &N, client: &C) -> Result<()> {
    let authority = client.authority();
    let lamports = connection.balance(&authority).await?;
    info!("Wallet pubkey: {}", authority);
    info!(" . SOL balance: {}", lamports as f64 / LAMPORTS_PER_SOL as f64);

    let mint = client.collateral_mint()?;
    let token_account = connection.get_or_create_token_account(&mint).await?;
    let balance = connection.token_balance(&token_account).await?;
    info!(" . USDC balance: {}", balance.unwrap_or_default());
    Ok(())
}

async fn ensure_user<C: ProtocolClient>(init_user: bool, client: &C) -> Result<()> {
    if client.user_exists().await? {
        return Ok(());
    }

    let authority = client.authority();
    error!("User for {} does not exist", authority);
    if !init_user {
        return Err(StatusError::UserNotFound { authority }.into());
    }

    info!("Creating User for {}", authority);
    let sig = client.initialize_user_account().await?;
    info!("Initialized user account in transaction: {}", sig);
    Ok(())
}

async fn try_subscribe<C, U, E, S>(client: &C, user: &U, events: &E, slots: &S) -> Result<()>
where
    C: ProtocolClient,
    U: UserView,
    E: Subscriber,
    S: Subscriber,
{
    client.subscribe().await?;
    user.subscribe().await?;
    events.subscribe().await?;
    slots.subscribe().await
}

/// Subscribes the client, the user view and both subscribers until all of
/// them succeed, sleeping `retry_interval` between attempts.
async fn subscribe_with_retry<C, U, E, S>(
    opts: &SyncOptions,
    client: &C,
    user: &U,
    events: &E,
    slots: &S,
) -> Result<u32>
where
    C: ProtocolClient,
    U: UserView,
    E: Subscriber,
    S: Subscriber,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        let Err(e) = try_subscribe(client, user, events, slots).await else {
            return Ok(attempts);
        };

        if opts.max_attempts.is_some_and(|max| attempts >= max) {
            warn!("Last subscribe error: {:#}", e);
            return Err(StatusError::SubscribeAttemptsExhausted(attempts).into());
        }

        info!("waiting to subscribe to DriftClient and User ({:#})", e);
        tokio::time::sleep(opts.retry_interval).await;
    }
}

/// Brings every client handle to a subscribed, freshly fetched state.
pub async fn sync_accounts<N, C, U, E, S>(
    opts: &SyncOptions,
    connection: &N,
    client: &C,
    user: &U,
    events: &E,
    slots: &S,
) -> Result<()>
where
    N: Connection,
    C: ProtocolClient,
    U: UserView,
    E: Subscriber,
    S: Subscriber,
{
    log_balances(connection, client).await?;

    // subscribe failures here are retried below
    if let Err(e) = client.subscribe().await {
        warn!("DriftClient not subscribed yet: {:#}", e);
    }
    if let Some(errors) = client.take_error_events() {
        spawn_error_listener(errors);
    }

    if let Err(e) = events.subscribe().await {
        warn!("Event subscriber not ready yet: {:#}", e);
    }
    if let Err(e) = slots.subscribe().await {
        warn!("Slot subscriber not ready yet: {:#}", e);
    }

    ensure_user(opts.init_user, client).await?;

    let attempts = subscribe_with_retry(opts, client, user, events, slots).await?;
    if attempts > 1 {
        info!("Subscribed after {} attempts", attempts);
    }

    client.fetch_accounts().await?;
    user.fetch_accounts().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::AccountSnapshot;
    use crate::sdk::mock::*;
    use drift_rs::Pubkey;
    use std::sync::atomic::Ordering;

    struct Fixture {
        log: CallLog,
        connection: MockConnection,
        client: MockProtocol,
        user: MockUser,
        events: MockSubscriber,
        slots: MockSubscriber,
    }

    impl Fixture {
        fn new() -> Self {
            let log = CallLog::default();
            Self {
                connection: MockConnection {
                    log: log.clone(),
                    token_account: Pubkey::new_unique(),
                },
                client: MockProtocol::new(log.clone()),
                user: MockUser::new(log.clone(), AccountSnapshot::default()),
                events: MockSubscriber::new(log.clone(), "events"),
                slots: MockSubscriber::new(log.clone(), "slots"),
                log,
            }
        }

        async fn sync(&self, opts: &SyncOptions) -> Result<()> {
            sync_accounts(
                opts,
                &self.connection,
                &self.client,
                &self.user,
                &self.events,
                &self.slots,
            )
            .await
        }
    }

    #[tokio::test]
    async fn test_sync_happy_path() {
        let f = Fixture::new();
        f.sync(&SyncOptions::default()).await.unwrap();

        assert_eq!(f.log.count("user.subscribe"), 1);
        assert_eq!(f.log.count("initialize_user_account"), 0);
        let calls = f.log.calls();
        assert_eq!(&calls[calls.len() - 2..], &["protocol.fetch", "user.fetch"]);
        assert!(f.user.snapshot().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_sleeps_between_attempts() {
        let f = Fixture::new();
        f.user.failures.store(3, Ordering::SeqCst);

        let start = tokio::time::Instant::now();
        f.sync(&SyncOptions::default()).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(f.log.count("user.subscribe"), 4);
        assert!(elapsed >= Duration::from_secs(3), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(4), "elapsed {:?}", elapsed);

        // nothing mutating between the first and last attempt
        let calls = f.log.calls();
        let first = f.log.position("user.subscribe").unwrap();
        let last = calls.iter().rposition(|c| c == "user.subscribe").unwrap();
        assert!(
            calls[first..=last]
                .iter()
                .all(|c| !MUTATING.iter().any(|m| c.starts_with(m)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_subscribe_failures_are_retried() {
        let f = Fixture::new();
        f.client.subscribe_failures.store(1, Ordering::SeqCst);
        f.slots.failures.store(1, Ordering::SeqCst);

        f.sync(&SyncOptions::default()).await.unwrap();

        assert_eq!(f.log.count("protocol.subscribe"), 2);
        assert_eq!(f.log.count("slots.subscribe"), 2);
        assert_eq!(f.log.count("user.fetch"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_client_subscribe_keeps_retrying() {
        let f = Fixture::new();
        f.client.subscribe_failures.store(4, Ordering::SeqCst);

        let start = tokio::time::Instant::now();
        f.sync(&SyncOptions::default()).await.unwrap();

        // one early failure, three failed loop attempts, then success
        assert_eq!(f.log.count("protocol.subscribe"), 5);
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(!f.log.has_mutations());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_attempts() {
        let f = Fixture::new();
        f.user.failures.store(10, Ordering::SeqCst);
        let opts = SyncOptions {
            max_attempts: Some(2),
            ..Default::default()
        };

        let err = f.sync(&opts).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StatusError>(),
            Some(StatusError::SubscribeAttemptsExhausted(2))
        ));
        assert_eq!(f.log.count("user.subscribe"), 2);
        assert_eq!(f.log.count("user.fetch"), 0);
    }

    #[tokio::test]
    async fn test_missing_user_without_init() {
        let f = Fixture::new();
        f.client.user_exists.store(false, Ordering::SeqCst);

        let err = f.sync(&SyncOptions::default()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StatusError>(),
            Some(StatusError::UserNotFound { .. })
        ));
        assert!(!f.log.has_mutations());
        assert_eq!(f.log.count("user.subscribe"), 0);
        assert_eq!(f.log.count("user.fetch"), 0);
    }

    #[tokio::test]
    async fn test_missing_user_with_init() {
        let f = Fixture::new();
        f.client.user_exists.store(false, Ordering::SeqCst);
        let opts = SyncOptions {
            init_user: true,
            ..Default::default()
        };

        f.sync(&opts).await.unwrap();
        assert_eq!(f.log.count("initialize_user_account"), 1);
        assert!(
            f.log.position("initialize_user_account").unwrap()
                < f.log.position("user.subscribe").unwrap()
        );
    }
}
