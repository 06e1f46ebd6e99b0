//! Instructions outside the drift-rs transaction builder: user account
//! creation (the builder needs an existing user) and the devnet token faucet.

use anchor_lang::{InstructionData, ToAccountMetas};
use drift_rs::{
    Pubkey, Wallet,
    constants::state_account,
    drift_idl::{accounts, instructions},
};
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::{system_program, sysvar};

pub const TOKEN_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");
pub const TOKEN_FAUCET_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("V4v1mQiAdLz4qwckEb45WqHYceYizoib39cDBHSWfaB");

// sha256("global:mint_to_user")[..8]
const MINT_TO_USER_DISCRIMINATOR: [u8; 8] = [75, 194, 44, 77, 10, 65, 232, 85];

const DEFAULT_USER_NAME: &str = "Main Account";

/// Space padded account name.
fn encode_name(name: &str) -> [u8; 32] {
    let mut encoded = [b' '; 32];
    let bytes = name.as_bytes();
    let len = bytes.len().min(32);
    encoded[..len].copy_from_slice(&bytes[..len]);
    encoded
}

pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    spl_associated_token_account_client::address::get_associated_token_address_with_program_id(
        owner,
        mint,
        &TOKEN_PROGRAM_ID,
    )
}

pub fn create_associated_token_account(
    payer: &Pubkey,
    owner: &Pubkey,
    mint: &Pubkey,
) -> Instruction {
    spl_associated_token_account_client::instruction::create_associated_token_account_idempotent(
        payer,
        owner,
        mint,
        &TOKEN_PROGRAM_ID,
    )
}

pub fn user_stats_address(authority: &Pubkey) -> Pubkey {
    Wallet::derive_stats_account(authority)
}

pub fn initialize_user_stats(program_id: &Pubkey, authority: &Pubkey) -> Instruction {
    let accounts = accounts::InitializeUserStats {
        user_stats: user_stats_address(authority),
        state: *state_account(),
        authority: *authority,
        payer: *authority,
        rent: sysvar::rent::ID,
        system_program: system_program::ID,
    };

    Instruction {
        program_id: *program_id,
        accounts: accounts.to_account_metas(None),
        data: instructions::InitializeUserStats {}.data(),
    }
}

pub fn initialize_user(
    program_id: &Pubkey,
    authority: &Pubkey,
    sub_account_id: u16,
) -> Instruction {
    let accounts = accounts::InitializeUser {
        user: Wallet::derive_user_account(authority, sub_account_id),
        user_stats: user_stats_address(authority),
        state: *state_account(),
        authority: *authority,
        payer: *authority,
        rent: sysvar::rent::ID,
        system_program: system_program::ID,
    };

    Instruction {
        program_id: *program_id,
        accounts: accounts.to_account_metas(None),
        data: instructions::InitializeUser {
            sub_account_id,
            name: encode_name(DEFAULT_USER_NAME),
        }
        .data(),
    }
}

/// Mints `amount` of the faucet's token into `user_token_account`. The
/// faucet program has no Rust bindings, so the instruction is built here.
pub fn mint_to_user(
    faucet_program: &Pubkey,
    mint: &Pubkey,
    user_token_account: &Pubkey,
    amount: u64,
) -> Instruction {
    let faucet_config =
        Pubkey::find_program_address(&[b"faucet_config", mint.as_ref()], faucet_program).0;
    let mint_authority =
        Pubkey::find_program_address(&[b"mint_authority", mint.as_ref()], faucet_program).0;

    let mut data = MINT_TO_USER_DISCRIMINATOR.to_vec();
    data.extend_from_slice(&amount.to_le_bytes());

    Instruction {
        program_id: *faucet_program,
        accounts: vec![
            AccountMeta::new_readonly(faucet_config, false),
            AccountMeta::new(*mint, false),
            AccountMeta::new(*user_token_account, false),
            AccountMeta::new_readonly(mint_authority, false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
        ],
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_name() {
        let name = encode_name("Main Account");
        assert_eq!(&name[..12], b"Main Account");
        assert!(name[12..].iter().all(|b| *b == b' '));
        assert_eq!(encode_name(&"x".repeat(40)), [b'x'; 32]);
    }

    #[test]
    fn test_initialize_user_layout() {
        let program = Pubkey::new_unique();
        let authority = Pubkey::new_unique();
        let ix = initialize_user(&program, &authority, 0);

        assert_eq!(ix.program_id, program);
        assert_eq!(ix.data.len(), 8 + 2 + 32);
        assert_eq!(&ix.data[8..10], &[0, 0]);
        assert_eq!(&ix.data[10..22], b"Main Account");
        assert_eq!(ix.accounts.len(), 7);
        assert_eq!(ix.accounts[0].pubkey, Wallet::derive_user_account(&authority, 0));
        assert_eq!(ix.accounts[1].pubkey, user_stats_address(&authority));
        assert!(ix.accounts[3].is_signer);
    }

    #[test]
    fn test_initialize_user_stats_layout() {
        let program = Pubkey::new_unique();
        let authority = Pubkey::new_unique();
        let ix = initialize_user_stats(&program, &authority);

        assert_eq!(ix.data.len(), 8);
        assert_ne!(ix.data[..], initialize_user(&program, &authority, 0).data[..8]);
        assert_eq!(ix.accounts[0].pubkey, user_stats_address(&authority));
        assert!(ix.accounts[0].is_writable);
    }

    #[test]
    fn test_mint_to_user_layout() {
        let mint = Pubkey::new_unique();
        let ata = Pubkey::new_unique();
        let ix = mint_to_user(&TOKEN_FAUCET_PROGRAM_ID, &mint, &ata, 100_000_000);

        assert_eq!(ix.program_id, TOKEN_FAUCET_PROGRAM_ID);
        assert_eq!(&ix.data[..8], &MINT_TO_USER_DISCRIMINATOR);
        assert_eq!(&ix.data[8..], &100_000_000u64.to_le_bytes());
        assert_eq!(ix.accounts[2].pubkey, ata);
        assert!(ix.accounts[2].is_writable);
    }

    #[test]
    fn test_associated_token_address_is_deterministic() {
        let owner = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        assert_eq!(
            associated_token_address(&owner, &mint),
            associated_token_address(&owner, &mint)
        );
        assert_ne!(
            associated_token_address(&owner, &mint),
            associated_token_address(&mint, &owner)
        );
    }
}
