use crate::ix;
use crate::sdk::{Connection, Faucet};

use anyhow::{Context, Result};
use drift_rs::{Pubkey, RpcClient};
use log::info;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    instruction::Instruction,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use std::sync::Arc;

/// RPC node connection signing with the keeper keypair.
#[derive(Clone)]
pub struct NodeConnection {
    rpc: Arc<RpcClient>,
    payer: Arc<Keypair>,
}

impl NodeConnection {
    pub fn new(endpoint: String, commitment: CommitmentConfig, payer: Arc<Keypair>) -> Self {
        Self {
            rpc: Arc::new(RpcClient::new_with_commitment(endpoint, commitment)),
            payer,
        }
    }

    pub fn rpc(&self) -> Arc<RpcClient> {
        Arc::clone(&self.rpc)
    }

    pub fn payer(&self) -> Pubkey {
        self.payer.pubkey()
    }

    pub async fn account_exists(&self, address: &Pubkey) -> Result<bool> {
        let response = self
            .rpc
            .get_account_with_commitment(address, self.rpc.commitment())
            .await?;
        Ok(response.value.is_some())
    }

    /// Signs `instructions` with the keeper keypair and waits for confirmation.
    pub async fn send_instructions(&self, instructions: &[Instruction]) -> Result<Signature> {
        let blockhash = self.rpc.get_latest_blockhash().await?;
        let tx = Transaction::new_signed_with_payer(
            instructions,
            Some(&self.payer.pubkey()),
            &[self.payer.as_ref()],
            blockhash,
        );

        self.rpc
            .send_and_confirm_transaction(&tx)
            .await
            .context("Failed to send transaction")
    }
}

impl Connection for NodeConnection {
    async fn balance(&self, owner: &Pubkey) -> Result<u64> {
        Ok(self.rpc.get_balance(owner).await?)
    }

    async fn token_balance(&self, token_account: &Pubkey) -> Result<Option<f64>> {
        let balance = self.rpc.get_token_account_balance(token_account).await?;
        Ok(balance.ui_amount)
    }

    async fn get_or_create_token_account(&self, mint: &Pubkey) -> Result<Pubkey> {
        let owner = self.payer();
        let token_account = ix::associated_token_address(&owner, mint);

        if !self.account_exists(&token_account).await? {
            info!("Creating token account {} for mint {}", token_account, mint);
            let create = ix::create_associated_token_account(&owner, &owner, mint);
            let sig = self.send_instructions(&[create]).await?;
            info!("Created token account in transaction: {}", sig);
        }

        Ok(token_account)
    }
}

/// Devnet token faucet for the collateral mint.
pub struct TokenFaucet {
    connection: NodeConnection,
    mint: Pubkey,
    dry_run: bool,
}

impl TokenFaucet {
    pub fn new(connection: NodeConnection, mint: Pubkey, dry_run: bool) -> Self {
        Self {
            connection,
            mint,
            dry_run,
        }
    }
}

impl Faucet for TokenFaucet {
    async fn mint_to_user(&self, token_account: &Pubkey, amount: u64) -> Result<Signature> {
        let mint = ix::mint_to_user(&ix::TOKEN_FAUCET_PROGRAM_ID, &self.mint, token_account, amount);
        if self.dry_run {
            info!("Dry run, not minting {} to {}", amount, token_account);
            return Ok(Signature::default());
        }

        let sig = self.connection.send_instructions(&[mint]).await?;
        info!("Minted {} to {}: {}", amount, token_account, sig);
        Ok(sig)
    }
}
