use drift_rs::Pubkey;
use thiserror::Error;

/// Configuration and validation failures that end a run.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error(
        "Must set environment variable KEEPER_PRIVATE_KEY with the path to a id.json or a list of comma separated numbers, or load via vault and use the --vault flag"
    )]
    MissingPrivateKey,
    #[error("environment variable {0} not set")]
    MissingEnv(&'static str),
    #[error("unknown ENV '{0}', expected devnet or mainnet-beta")]
    UnknownEnv(String),
    #[error("User for {authority} does not exist. Run with '--init-user' flag to initialize a User")]
    UserNotFound { authority: Pubkey },
    #[error("Deposit amount must be greater than 0 (got {0})")]
    InvalidDepositAmount(f64),
    #[error(
        "No collateral in account, collateral is required to run JitMakerBot, run with --force-deposit flag to deposit collateral"
    )]
    NoCollateral,
    #[error("gave up subscribing after {0} attempts")]
    SubscribeAttemptsExhausted(u32),
}
