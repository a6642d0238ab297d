use std::path::PathBuf;

use chainship_deploy::CONFIG_FILENAME;
use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// The default directory deployment records are written to.
const DEFAULT_OUTDATA: &str = "deployments";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    Text,
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "chainship")]
#[command(
    author,
    version,
    about = "Deploy and verify smart contracts across EVM networks"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "CHAINSHIP_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the chainship.toml configuration file.
    #[arg(short, long, global = true, alias = "conf", env = "CHAINSHIP_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy a contract to one or more networks and verify it.
    Deploy(DeployArgs),

    /// Verify a contract from a saved deployment record.
    ///
    /// Useful when an earlier run ended with verification still pending.
    Verify(VerifyArgs),

    /// List the configured networks.
    Networks,

    /// Write a starter configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Print shell completions.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Networks to deploy to. Each network is an independent run.
    #[arg(
        short,
        long = "network",
        required = true,
        value_delimiter = ',',
        env = "CHAINSHIP_NETWORKS"
    )]
    pub networks: Vec<String>,

    /// Path to the Hardhat artifact, e.g. artifacts/contracts/Token.sol/Token.json.
    #[arg(short, long, env = "CHAINSHIP_ARTIFACT")]
    pub artifact: PathBuf,

    /// A constructor argument. Repeat in declaration order.
    ///
    /// `$deployer` is replaced by the deploying account's address.
    #[arg(long = "arg", allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Deploy only, even where verification is configured.
    #[arg(long, env = "CHAINSHIP_NO_VERIFY")]
    pub no_verify: bool,

    /// Directory deployment records are saved to.
    #[arg(long, env = "CHAINSHIP_OUTDATA", default_value = DEFAULT_OUTDATA)]
    pub outdata: PathBuf,

    /// How to print the run reports.
    #[arg(long, env = "CHAINSHIP_FORMAT", default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Deployment record written by `chainship deploy`.
    #[arg(long)]
    pub record: PathBuf,

    /// The artifact the recorded contract was deployed from.
    #[arg(short, long, env = "CHAINSHIP_ARTIFACT")]
    pub artifact: PathBuf,

    /// How to print the run report.
    #[arg(long, env = "CHAINSHIP_FORMAT", default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}
