use crate::cli::Options;
use crate::error::StatusError;

use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;
use solana_sdk::signature::Keypair;
use std::{env, fs, path::Path};

#[derive(Debug, Deserialize)]
struct VaultSecret {
    pk: String,
}

#[derive(Debug, Deserialize)]
struct VaultData {
    data: VaultSecret,
}

#[derive(Debug, Deserialize)]
struct VaultResponse {
    data: VaultData,
}

/// Resolves the keeper keypair from vault or the `--private-key` option.
pub async fn load_keypair(opts: &Options) -> Result<Keypair> {
    let private_key = if opts.vault {
        let (endpoint, token) = vault_settings(|key| env::var(key).ok())?;
        Some(fetch_vault_key(&endpoint, &token).await?)
    } else {
        opts.private_key.clone()
    };

    keypair_from_option(private_key)
}

fn keypair_from_option(private_key: Option<String>) -> Result<Keypair> {
    let private_key = private_key
        .filter(|key| !key.trim().is_empty())
        .ok_or(StatusError::MissingPrivateKey)?;

    keypair_from_source(&private_key)
}

/// `VAULT_ENDPOINT` and `VAULT_TOKEN`.
fn vault_settings(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(String, String), StatusError> {
    let endpoint = lookup("VAULT_ENDPOINT").ok_or(StatusError::MissingEnv("VAULT_ENDPOINT"))?;
    let token = lookup("VAULT_TOKEN").ok_or(StatusError::MissingEnv("VAULT_TOKEN"))?;
    Ok((endpoint, token))
}

async fn fetch_vault_key(endpoint: &str, token: &str) -> Result<String> {
    let body = reqwest::Client::new()
        .get(endpoint)
        .header("X-Vault-Token", token)
        .header("X-Vault-Namespace", "admin")
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    parse_vault_response(&body)
}

/// Extracts `data.data.pk` from a vault KV v2 read.
fn parse_vault_response(body: &str) -> Result<String> {
    let response: VaultResponse =
        serde_json::from_str(body).context("Failed to decode vault response")?;
    Ok(response.data.data.pk)
}

pub fn keypair_from_source(private_key: &str) -> Result<Keypair> {
    let bytes = load_key_bytes(private_key)?;
    Keypair::try_from(bytes.as_slice()).context("Invalid secret key bytes")
}

/// Interprets `private_key` as a path to a JSON byte array when such a file
/// exists, otherwise as comma separated byte values.
pub fn load_key_bytes(private_key: &str) -> Result<Vec<u8>> {
    let path = Path::new(private_key);
    if path.exists() {
        info!("loading private key from {}", private_key);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read key file {}", private_key))?;
        return serde_json::from_str(&contents)
            .with_context(|| format!("Key file {} is not a JSON byte array", private_key));
    }

    info!("loading private key as comma separated numbers");
    private_key
        .split(',')
        .enumerate()
        .map(|(i, val)| {
            val.trim()
                .parse::<u8>()
                .with_context(|| format!("Invalid byte '{}' at position {}", val.trim(), i))
        })
        .collect()
}
