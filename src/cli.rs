use clap::{ArgAction, Parser};
use log::info;

/// Command line options, with environment fallbacks where the keeper bots use them.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "keeper-status",
    version,
    about = "Drift keeper account status and maintenance"
)]
pub struct Options {
    /// Dry run, do not send transactions on chain
    #[arg(short = 'd', long)]
    pub dry_run: bool,

    /// Initialize the user account if none exists
    #[arg(long)]
    pub init_user: bool,

    /// Enable filler bot
    #[arg(long)]
    pub filler: bool,

    /// Enable spot filler bot
    #[arg(long)]
    pub spot_filler: bool,

    /// Enable trigger bot
    #[arg(long)]
    pub trigger: bool,

    /// Enable JIT auction maker bot
    #[arg(long)]
    pub jit_maker: bool,

    /// Enable floating maker bot
    #[arg(long)]
    pub floating_maker: bool,

    /// Enable liquidator bot
    #[arg(long)]
    pub liquidator: bool,

    /// Enable PnL settler bot
    #[arg(long)]
    pub pnl_settler: bool,

    /// Cancel open orders on startup
    #[arg(long)]
    pub cancel_open_orders: bool,

    /// Close all open positions
    #[arg(long)]
    pub close_open_positions: bool,

    /// Purposefully fail liveness test after 1 minute
    #[arg(long)]
    pub test_liveness: bool,

    /// Force deposit this amount of USDC to the collateral account,
    /// the program ends after the deposit is sent
    #[arg(long, value_name = "NUMBER", allow_negative_numbers = true)]
    pub force_deposit: Option<f64>,

    /// Enable Prometheus metric scraper on this port
    #[arg(long, value_name = "NUMBER")]
    pub metrics: Option<u16>,

    /// Load the private key from vault (`data.data.pk` of the secret)
    #[arg(long, value_name = "BOOL", action = ArgAction::Set, default_value_t = false)]
    pub vault: bool,

    /// Private key, supports a path to id.json or a list of comma separated numbers
    #[arg(
        short = 'p',
        long,
        value_name = "STRING",
        env = "KEEPER_PRIVATE_KEY",
        hide_env_values = true
    )]
    pub private_key: Option<String>,

    /// Give up after this many subscribe attempts (retries forever when unset)
    #[arg(long, value_name = "NUMBER", env = "MAX_SUBSCRIBE_ATTEMPTS")]
    pub max_subscribe_attempts: Option<u32>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Options {
    pub fn log_level(&self) -> log::LevelFilter {
        if self.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        }
    }

    /// Logs which keeper bots these options would enable.
    pub fn log_summary(&self) {
        info!(
            "Dry run: {},\nFillerBot enabled: {},\nSpotFillerBot enabled: {},\nTriggerBot enabled: {},\nJitMakerBot enabled: {},\nPnlSettler enabled: {},",
            self.dry_run, self.filler, self.spot_filler, self.trigger, self.jit_maker, self.pnl_settler
        );
        info!(
            "FloatingMaker enabled: {},\nLiquidator enabled: {},",
            self.floating_maker, self.liquidator
        );
        if let Some(port) = self.metrics {
            info!("Metrics port requested: {}", port);
        }
        if self.test_liveness {
            info!("Liveness test flag set");
        }
    }
}
