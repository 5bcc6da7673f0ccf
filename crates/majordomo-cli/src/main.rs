//! # Majordomo CLI Entry Point
//!
//! Main binary for the majordomo RPC system. Provides a command-line
//! interface for running a broker, a demo worker, making RPC calls and
//! watching fan-out notifications.
//!
//! ## Usage
//!
//! ```bash
//! # Start a broker
//! majordomo broker -b tcp://*:5555 -p tcp://*:5556
//!
//! # Start an echo worker
//! majordomo worker -u tcp://127.0.0.1:5555
//!
//! # Make an RPC call (outputs raw JSON)
//! majordomo call echo echo -a '[1, "two"]'
//!
//! # Print notifications whose topic starts with "quotes."
//! majordomo subscribe quotes.
//! ```
//!
//! ## Endpoint Format
//!
//! Endpoints are written `tcp://host:port`; `*` as host binds all
//! interfaces.

use anyhow::Result;
use argh::FromArgs;
use majordomo_broker::Broker;
use majordomo_cli::{parse_args, parse_kwargs, resolve_url, BROKER_URL_ENV, PUBLISH_URL_ENV};
use majordomo_client::RpcClient;
use majordomo_common::config::{
    DEFAULT_BROKER_BIND, DEFAULT_BROKER_URL, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_PUBLISH_BIND,
};
use majordomo_common::{BrokerConfig, ClientConfig, Codec, WorkerConfig};
use std::time::Duration;

/// Main CLI structure parsed from command-line arguments.
#[derive(FromArgs)]
/// Majordomo - brokered RPC over worker pools
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

/// Available CLI subcommands.
///
/// - **Broker**: route calls between clients and workers
/// - **Worker**: serve the demo `echo` service
/// - **Call**: make a single RPC call (unix-friendly JSON output)
/// - **Subscribe**: print fan-out notifications as JSON lines
#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Broker(BrokerArgs),
    Worker(WorkerArgs),
    Call(CallArgs),
    Subscribe(SubscribeArgs),
}

/// Arguments for starting a broker.
///
/// # Example
///
/// ```bash
/// majordomo broker -b tcp://*:5555 -p tcp://*:5556 --heartbeat-interval 1000
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "broker")]
/// start a majordomo broker
struct BrokerArgs {
    /// endpoint clients and workers connect to
    #[argh(option, short = 'b', default = "DEFAULT_BROKER_BIND.into()")]
    bind: String,

    /// endpoint subscribers connect to
    #[argh(option, short = 'p', long = "publish", default = "DEFAULT_PUBLISH_BIND.into()")]
    publish: String,

    /// do not open the publish endpoint
    #[argh(switch, long = "no-publish")]
    no_publish: bool,

    /// interval between heartbeats to workers, in milliseconds
    ///
    /// Defaults to 2500ms.
    #[argh(option, long = "heartbeat-interval", default = "DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64")]
    heartbeat_interval_ms: u64,

    /// missed heartbeat intervals before a worker is evicted
    #[argh(option, long = "liveness", default = "2")]
    liveness: u32,

    /// how long a call may wait for a worker, in milliseconds
    ///
    /// Older queued calls are dropped without notice. Defaults to 30000ms.
    #[argh(option, long = "backlog-ttl", default = "30000")]
    backlog_ttl_ms: u64,
}

/// Arguments for starting the demo worker.
///
/// The worker registers under `--service` and answers `echo` by returning
/// its positional arguments, plus the built-in `ping` and `get_health`.
#[derive(FromArgs)]
#[argh(subcommand, name = "worker")]
/// start an echo worker
struct WorkerArgs {
    /// broker endpoint (falls back to MAJORDOMO_BROKER_URL)
    #[argh(option, short = 'u', long = "broker")]
    broker: Option<String>,

    /// service name to register under
    #[argh(option, short = 's', long = "service", default = "\"echo\".into()")]
    service: String,

    /// interval between heartbeats to the broker, in milliseconds
    #[argh(option, long = "heartbeat-interval", default = "DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64")]
    heartbeat_interval_ms: u64,
}

/// Arguments for making a single RPC call.
///
/// Outputs the result as raw JSON to stdout. Errors are reported to stderr
/// with a non-zero exit code.
///
/// # Examples
///
/// ```bash
/// majordomo call account get_balance -a '["acc-1"]'
/// majordomo call account transfer -a '["acc-1", "acc-2"]' -k '{"amount": 10}'
/// majordomo call echo ping | jq .
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call an RPC method through a broker
struct CallArgs {
    /// service to call
    #[argh(positional)]
    service: String,

    /// method to call
    #[argh(positional)]
    method: String,

    /// positional arguments as a JSON array
    #[argh(option, short = 'a', long = "args", default = "\"[]\".into()")]
    args: String,

    /// keyword arguments as a JSON object
    #[argh(option, short = 'k', long = "kwargs", default = "\"{}\".into()")]
    kwargs: String,

    /// broker endpoint (falls back to MAJORDOMO_BROKER_URL)
    #[argh(option, short = 'u', long = "broker")]
    broker: Option<String>,

    /// call timeout in milliseconds
    #[argh(option, short = 't', long = "timeout", default = "5000")]
    timeout_ms: u64,
}

/// Arguments for printing fan-out notifications.
#[derive(FromArgs)]
#[argh(subcommand, name = "subscribe")]
/// print broker notifications as JSON lines
struct SubscribeArgs {
    /// topic prefixes to subscribe to; none means all topics
    #[argh(positional)]
    prefixes: Vec<String>,

    /// publish endpoint (falls back to MAJORDOMO_PUBLISH_URL)
    #[argh(option, short = 'p', long = "publisher")]
    publisher: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Keep `call` output clean for unix tool usage (piping to jq, etc.)
    if !matches!(cli.command, Commands::Call(_)) {
        // Set default log level to INFO, but allow RUST_LOG env var to override
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Broker(args) => run_broker(args).await,
        Commands::Worker(args) => run_worker(args).await,
        Commands::Call(args) => run_call(args).await,
        Commands::Subscribe(args) => {
            let endpoint = resolve_url(
                args.publisher,
                PUBLISH_URL_ENV,
                majordomo_cli::DEFAULT_PUBLISH_URL,
            );
            majordomo_cli::subscribe::run_subscribe(endpoint, args.prefixes).await
        }
    }
}

fn broker_config(args: &BrokerArgs) -> BrokerConfig {
    BrokerConfig::new(args.bind.clone())
        .with_publish_bind((!args.no_publish).then(|| args.publish.clone()))
        .with_heartbeat_interval(Duration::from_millis(args.heartbeat_interval_ms))
        .with_liveness(args.liveness)
        .with_backlog_ttl(Duration::from_millis(args.backlog_ttl_ms))
}

async fn run_broker(args: BrokerArgs) -> Result<()> {
    let config = broker_config(&args);
    tracing::info!(
        "Starting majordomo broker (heartbeat {}ms, liveness timeout {}ms)",
        config.heartbeat_interval.as_millis(),
        config.liveness_timeout().as_millis()
    );

    let broker = Broker::bind(config).await?;
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    broker.shutdown().await;
    Ok(())
}

async fn run_worker(args: WorkerArgs) -> Result<()> {
    let broker_url = resolve_url(args.broker, BROKER_URL_ENV, DEFAULT_BROKER_URL);
    let config = WorkerConfig::new(broker_url, args.service)
        .with_heartbeat_interval(Duration::from_millis(args.heartbeat_interval_ms));

    let worker = majordomo_cli::echo_worker(config);
    worker.start().await?;
    tokio::signal::ctrl_c().await?;

    worker.stop().await;
    Ok(())
}

/// Executes the `call` subcommand.
///
/// No tracing is initialized for this command; the only stdout output is
/// the JSON result.
async fn run_call(args: CallArgs) -> Result<()> {
    let positional = parse_args(&args.args)?;
    let kwargs = parse_kwargs(&args.kwargs)?;

    let broker_url = resolve_url(args.broker, BROKER_URL_ENV, DEFAULT_BROKER_URL);
    let config = ClientConfig::new(broker_url)
        .with_timeout(Duration::from_millis(args.timeout_ms))
        .with_codec(Codec::Json);

    let client = RpcClient::new(config);
    client.start().await?;
    let result = client
        .call(&args.service, &args.method, positional, kwargs)
        .await;
    client.stop().await;

    println!("{}", serde_json::to_string(&result?)?);
    Ok(())
}
