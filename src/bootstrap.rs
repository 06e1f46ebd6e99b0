use crate::connection::{NodeConnection, TokenFaucet};
use crate::drift::{DriftProtocol, DriftUser};
use crate::error::StatusError;
use crate::sdk::ProtocolClient;
use crate::subscriber::{EventSubscriber, EventSubscriberConfig, SlotSubscriber};

use anyhow::{Context as _, Result};
use drift_rs::{DriftClient, RpcClient, Wallet, types::Context};
use log::info;
use solana_sdk::{commitment_config::CommitmentConfig, signature::Keypair};
use std::{env, sync::Arc, time::Duration};
use tokio::sync::mpsc;

const POLL_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    DevNet,
    MainNet,
}

impl Network {
    fn parse(name: &str) -> Result<Self, StatusError> {
        match name.trim() {
            "devnet" => Ok(Network::DevNet),
            "mainnet-beta" | "mainnet" => Ok(Network::MainNet),
            other => Err(StatusError::UnknownEnv(other.to_string())),
        }
    }

    pub fn context(&self) -> Context {
        match self {
            Network::DevNet => Context::DevNet,
            Network::MainNet => Context::MainNet,
        }
    }

    pub fn is_devnet(&self) -> bool {
        *self == Network::DevNet
    }
}

/// Network settings read from `ENV` and `ENDPOINT`.
#[derive(Debug, Clone)]
pub struct Config {
    pub network: Network,
    pub endpoint: String,
    pub commitment: CommitmentConfig,
    pub poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self::from_lookup(|key| env::var(key).ok())?)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StatusError> {
        let network = lookup("ENV").ok_or(StatusError::MissingEnv("ENV"))?;
        let endpoint = lookup("ENDPOINT")
            .filter(|e| !e.trim().is_empty())
            .ok_or(StatusError::MissingEnv("ENDPOINT"))?;

        Ok(Self {
            network: Network::parse(&network)?,
            endpoint,
            commitment: CommitmentConfig::confirmed(),
            poll_interval: POLL_INTERVAL,
        })
    }
}

/// Every handle the status run talks to.
pub struct Clients {
    pub connection: NodeConnection,
    pub protocol: DriftProtocol,
    pub user: DriftUser,
    pub events: EventSubscriber,
    pub slots: SlotSubscriber,
    pub faucet: TokenFaucet,
}

impl Clients {
    pub async fn new(config: &Config, keypair: Keypair, dry_run: bool) -> Result<Self> {
        let wallet = Wallet::new(keypair.insecure_clone());
        let keypair = Arc::new(keypair);
        let connection =
            NodeConnection::new(config.endpoint.clone(), config.commitment, keypair);

        let rpc_client = RpcClient::new_with_commitment(config.endpoint.clone(), config.commitment);
        let client = DriftClient::new(config.network.context(), rpc_client, wallet)
            .await
            .context("Failed to create DriftClient")?;

        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let protocol = DriftProtocol::new(client.clone(), connection.clone(), dry_run, errors_rx);
        info!("DriftClient ProgramId: {}", protocol.program_id());

        let user = DriftUser::new(client, &protocol);
        let events = EventSubscriber::new(
            connection.rpc(),
            protocol.sub_account(),
            EventSubscriberConfig {
                poll_interval: config.poll_interval,
                ..Default::default()
            },
            errors_tx.clone(),
        );
        let slots = SlotSubscriber::new(connection.rpc(), config.poll_interval, errors_tx);
        let faucet = TokenFaucet::new(connection.clone(), protocol.collateral_mint()?, dry_run);

        Ok(Self {
            connection,
            protocol,
            user,
            events,
            slots,
            faucet,
        })
    }
}
