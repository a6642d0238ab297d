//! chainship deploys a compiled contract to one or more EVM networks and gets it verified on their block explorers.

mod cli;

use std::{io, path::Path, process::ExitCode, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use comfy_table::Table;

use chainship_deploy::{
    CancelToken, ChainshipConfig, ContractArtifact, DeploymentRecord, HttpConnector,
    NetworkRegistry, Orchestrator, RunReport, RunRequest, cancel_pair, exit_code, summary_table,
};
use cli::{Cli, Command, DeployArgs, OutputFormat, VerifyArgs};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let Cli {
        verbosity,
        config,
        command,
    } = Cli::parse();

    // Initialize the logger. Reports go to stdout, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_max_level(verbosity)
        .with_writer(io::stderr)
        .init();

    match command {
        Command::Deploy(args) => deploy(&config, args).await,
        Command::Verify(args) => verify(&config, args).await,
        Command::Networks => networks(&config),
        Command::Init { force } => init(&config, force),
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "chainship", &mut io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn orchestrator(config_path: &Path) -> Result<Orchestrator<HttpConnector>> {
    let config = ChainshipConfig::load(config_path)?;
    let registry = NetworkRegistry::from_config(&config)
        .with_context(|| format!("Invalid network configuration in {}", config_path.display()))?;

    tracing::debug!(networks = registry.len(), "Loaded network registry");

    Ok(Orchestrator::new(
        Arc::new(registry),
        HttpConnector::new()?,
        config.polling.into(),
    ))
}

async fn deploy(config_path: &Path, args: DeployArgs) -> Result<ExitCode> {
    let artifact = Arc::new(ContractArtifact::load_hardhat(&args.artifact)?);
    let orchestrator = orchestrator(config_path)?.with_outdata(&args.outdata);

    tracing::info!(
        contract = %artifact.qualified_name(),
        networks = ?args.networks,
        verify = !args.no_verify,
        outdata = %args.outdata.display(),
        "Starting deployment..."
    );

    let requests: Vec<RunRequest> = args
        .networks
        .iter()
        .map(|network| {
            let request = RunRequest::new(network.as_str(), artifact.clone(), args.args.clone());
            if args.no_verify {
                request.without_verification()
            } else {
                request
            }
        })
        .collect();

    let reports = orchestrator.run_all(&requests, &cancel_on_ctrl_c()).await;
    print_reports(&reports, args.format)?;

    Ok(ExitCode::from(exit_code(&reports)))
}

async fn verify(config_path: &Path, args: VerifyArgs) -> Result<ExitCode> {
    let record = DeploymentRecord::load_from_file(&args.record)?;
    let artifact = ContractArtifact::load_hardhat(&args.artifact)?;
    let orchestrator = orchestrator(config_path)?;

    tracing::info!(
        network = %record.network,
        contract = %record.contract_name,
        address = %record.checksummed_address(),
        "Verifying recorded deployment..."
    );

    let report = orchestrator
        .verify_existing(&record, &artifact, &cancel_on_ctrl_c())
        .await;
    let reports = [report];
    print_reports(&reports, args.format)?;

    Ok(ExitCode::from(exit_code(&reports)))
}

fn networks(config_path: &Path) -> Result<ExitCode> {
    let config = ChainshipConfig::load(config_path)?;
    let registry = NetworkRegistry::from_config(&config)?;

    let mut table = Table::new();
    table.set_header(vec![
        "Network",
        "Endpoint",
        "Chain ID",
        "Gas",
        "Confirmations",
        "Explorer",
    ]);

    for ctx in registry.networks() {
        // Endpoint paths often carry provider keys.
        let endpoint = ctx.rpc_endpoint.host_str().unwrap_or("-").to_string();
        let chain_id = ctx
            .chain_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let explorer = match registry.resolve_verification(&ctx.key) {
            None => "-".to_string(),
            Some(_) => registry
                .explorer_urls(&ctx.key)
                .map(|urls| urls.browser_url.to_string())
                .unwrap_or_else(|| "no endpoint".to_string()),
        };

        table.add_row(vec![
            ctx.key.to_string(),
            endpoint,
            chain_id,
            ctx.gas.to_string(),
            ctx.confirmations.to_string(),
            explorer,
        ]);
    }

    println!("{table}");
    Ok(ExitCode::SUCCESS)
}

fn init(path: &Path, force: bool) -> Result<ExitCode> {
    if path.exists() && !force {
        bail!(
            "{} already exists, pass --force to overwrite it",
            path.display()
        );
    }

    ChainshipConfig::starter().save_to_file(path)?;
    println!(
        "Wrote {}. Set DEPLOYER_KEY and the explorer API keys, then run `chainship deploy`.",
        path.display()
    );
    Ok(ExitCode::SUCCESS)
}

/// Cancel in-flight runs on Ctrl+C. Reports are still printed.
fn cancel_on_ctrl_c() -> CancelToken {
    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Received Ctrl+C, cancelling...");
            handle.cancel();
        }
    });
    token
}

fn print_reports(reports: &[RunReport], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for report in reports {
                println!("{report}");
            }
        }
        OutputFormat::Table => println!("{}", summary_table(reports)),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(reports).context("Failed to serialize reports")?
        ),
    }
    Ok(())
}
