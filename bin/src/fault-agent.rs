use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser, ValueEnum};
use ethers::{
    prelude::SignerMiddleware,
    providers::{Http, Middleware, Provider, Ws},
    signers::{LocalWallet, Signer},
    types::Address,
};
use fault_agent_driver::{
    DriverConfig, Engine, EthAdapter, HttpProver, ReplayExecutor, StepVerifier, TraceLog,
    ZkVerifier,
};
use fault_agent_solvers::fault::{ClockConfig, Role, TerminalVerifier};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::Level;

/// Arguments for the `fault-agent` binary.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Verbosity level (0-4)
    #[arg(long, short, help = "Verbosity level (0-4)", action = ArgAction::Count, env = "VERBOSITY")]
    v: u8,

    /// The role to play in tracked dispute games.
    #[arg(
        long,
        value_enum,
        help = "The role to play in tracked dispute games.",
        env = "FAULT_AGENT_ROLE"
    )]
    role: RoleArg,

    /// The terminal verification strategy.
    #[arg(
        long,
        value_enum,
        help = "The terminal verification strategy: single-step replay or succinct proofs.",
        default_value = "step",
        env = "FAULT_AGENT_STRATEGY"
    )]
    strategy: Strategy,

    /// The Websocket RPC endpoint used to index and send transactions.
    #[arg(
        long,
        short,
        help = "The Websocket RPC endpoint used to index and send transactions.",
        env = "FAULT_AGENT_WS"
    )]
    ws_endpoint: String,

    /// The HTTP RPC endpoint of the trusted rollup node.
    #[arg(
        long,
        short,
        help = "The HTTP RPC endpoint of the trusted rollup node.",
        env = "FAULT_AGENT_NODE"
    )]
    node_endpoint: String,

    /// The address of the dispute game factory contract.
    #[arg(
        long,
        short,
        help = "The address of the dispute game factory contract.",
        env = "FAULT_AGENT_DGF"
    )]
    dispute_game_factory: Address,

    /// The address of the output oracle contract.
    #[arg(
        long,
        short,
        help = "The address of the output oracle contract.",
        env = "FAULT_AGENT_ORACLE"
    )]
    output_oracle: Address,

    /// The private key used to sign and send moves.
    #[arg(
        long,
        short,
        help = "The private key used to sign and send moves.",
        env = "FAULT_AGENT_KEY"
    )]
    private_key: String,

    /// Seconds between polling cycles.
    #[arg(long, help = "Seconds between polling cycles.", default_value_t = 5)]
    poll_interval: u64,

    /// Seconds a side may spend answering a bisection claim.
    #[arg(
        long,
        help = "Seconds a side may spend answering a bisection claim.",
        default_value_t = 300
    )]
    response_timeout: u64,

    /// Seconds a side may spend producing the terminal proof.
    #[arg(
        long,
        help = "Seconds a side may spend producing the terminal proof.",
        default_value_t = 1200
    )]
    prove_timeout: u64,

    /// Path to the VM replay binary (step strategy).
    #[arg(long, help = "Path to the VM replay binary (step strategy).", env = "FAULT_AGENT_REPLAY_BIN")]
    replay_bin: Option<PathBuf>,

    /// Path to the VM's initial state snapshot (step strategy).
    #[arg(
        long,
        help = "Path to the VM's initial state snapshot (step strategy).",
        env = "FAULT_AGENT_REPLAY_STATE"
    )]
    replay_state: Option<PathBuf>,

    /// Working directory for replay proofs.
    #[arg(long, help = "Working directory for replay proofs.", default_value = "./replay-work")]
    replay_work_dir: PathBuf,

    /// Endpoint of the external proving service (zk strategy).
    #[arg(
        long,
        help = "Endpoint of the external proving service (zk strategy).",
        env = "FAULT_AGENT_PROVER"
    )]
    prover_endpoint: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RoleArg {
    /// Defend submitted outputs.
    Proposer,
    /// Dispute diverging outputs.
    Challenger,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Strategy {
    /// Deterministic single-step replay with a memory proof.
    Step,
    /// Succinct proofs from an external proving service.
    Zk,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse the command arguments
    let args = Args::parse();

    // Initialize the tracing subscriber
    init_tracing_subscriber(args.v)?;

    // Connect the signing provider to L1 and the trusted rollup node.
    tracing::debug!(target: "fault-agent-cli", "Connecting to the websocket endpoint...");
    let provider = Provider::<Ws>::connect(args.ws_endpoint.clone()).await?;
    let chain_id = provider.get_chainid().await?;
    let wallet = args
        .private_key
        .parse::<LocalWallet>()?
        .with_chain_id(chain_id.as_u64());
    let l1_provider = Arc::new(SignerMiddleware::new(provider, wallet));
    let node_provider = Arc::new(Provider::<Http>::try_from(args.node_endpoint.as_str())?);
    tracing::info!(target: "fault-agent-cli", "Providers connected, websocket @ {}", &args.ws_endpoint);

    let role = match args.role {
        RoleArg::Proposer => Role::Defender,
        RoleArg::Challenger => Role::Challenger,
    };

    // Create the driver config.
    let mut config = DriverConfig::new(
        l1_provider,
        Arc::clone(&node_provider),
        args.dispute_game_factory,
        args.output_oracle,
        role,
    );
    config.poll_interval = Duration::from_secs(args.poll_interval);
    config.clock = ClockConfig {
        response_timeout: Duration::from_secs(args.response_timeout),
        prove_timeout: Duration::from_secs(args.prove_timeout),
    };
    let config = Arc::new(config);
    tracing::info!(target: "fault-agent-cli", "Driver config created successfully.");

    // The trace log follows the trusted node on the polling cadence.
    let trace_log = Arc::new(TraceLog::new(node_provider));
    let refresher = tokio::spawn(Arc::clone(&trace_log).refresh_loop(config.poll_interval));

    let adapter = Arc::new(EthAdapter::new(Arc::clone(&config)));
    let verifier: Arc<dyn TerminalVerifier + Send + Sync> = match args.strategy {
        Strategy::Step => {
            let binary = args
                .replay_bin
                .ok_or_else(|| anyhow!("--replay-bin is required for the step strategy"))?;
            let state = args
                .replay_state
                .ok_or_else(|| anyhow!("--replay-state is required for the step strategy"))?;
            let oracle: Arc<TraceLog> = Arc::clone(&trace_log);
            Arc::new(StepVerifier::new(
                Arc::new(ReplayExecutor::new(binary, state, args.replay_work_dir)),
                oracle,
            ))
        }
        Strategy::Zk => {
            let endpoint = args
                .prover_endpoint
                .ok_or_else(|| anyhow!("--prover-endpoint is required for the zk strategy"))?;
            let oracle: Arc<TraceLog> = Arc::clone(&trace_log);
            Arc::new(ZkVerifier::new(Arc::new(HttpProver::new(endpoint)), oracle))
        }
    };

    // Start the engine and run until interrupted.
    let mut engine = Engine::new(Arc::clone(&config), adapter, trace_log, verifier);
    engine.start();
    tracing::info!(target: "fault-agent-cli", "Engine started, playing the {} role.", role);

    tokio::signal::ctrl_c().await?;
    tracing::info!(target: "fault-agent-cli", "Shutdown signal received, stopping engine.");
    engine.stop().await;
    refresher.abort();

    Ok(())
}

/// Initializes the tracing subscriber
///
/// # Arguments
/// * `verbosity_level` - The verbosity level (0-4)
///
/// # Returns
/// * `Result<()>` - Ok if successful, Err otherwise.
fn init_tracing_subscriber(verbosity_level: u8) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(match verbosity_level {
            0 => Level::ERROR,
            1 => Level::WARN,
            2 => Level::INFO,
            3 => Level::DEBUG,
            _ => Level::TRACE,
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|e| anyhow!(e))
}
