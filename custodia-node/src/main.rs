//! Bootstrap for the settlement engine's operator node (section 10): loads
//! configuration, wires the ledger/KMS backends and the per-custodian driver
//! registry, and runs the HTTP surface and queue worker as structured
//! static tasks until a shutdown signal.

mod authorization_collector;
mod backends;
mod cli;
mod config;
mod driver_registry;
mod logger;
mod or_env;
mod queue;
mod server;
mod worker;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use custodia_api::rest::RestClient;
use custodia_api_core::def::{KmsClient, LedgerBackend};
use custodia_engine::authorizer::Keystore;
use custodia_tokio::notify_once::NotifyOnce;
use custodia_tokio::task::{self, Task};

use crate::authorization_collector::AuthorizationCollector;
use crate::backends::{HttpKmsClient, HttpLedgerBackend};
use crate::config::Config;
use crate::driver_registry::DriverRegistry;
use crate::server::EngineState;

/// Default Redis stream/group the worker forwards queued requests from;
/// not yet surfaced in [`Config`] since multi-stream routing is out of
/// scope for the first cut (section 9 decision).
const QUEUE_STREAM: &str = "custodia-requests";
const QUEUE_CONSUMER_GROUP: &str = "custodia-engine";

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    logger::init();

    let args = cli::parse();
    match args.command {
        cli::Command::CheckConfig(check_args) => check_config(check_args),
        cli::Command::Run(mut run_args) => {
            run_args.or_env()?;
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            rt.block_on(run(run_args))
        }
    }
}

fn check_config(args: cli::CheckConfigArgs) -> anyhow::Result<()> {
    let config = Config::from_toml_file(&args.config_path())?;
    println!(
        "config ok: env={:?} listen_addr={} authorizer_keys={} custodians_configured={}",
        config.env,
        config.listen_addr,
        config.authorizer_keys.len(),
        [
            &config.custodians.bitflyer.base_url,
            &config.custodians.gemini.base_url,
            &config.custodians.uphold.base_url,
            &config.custodians.zebpay.base_url,
            &config.custodians.solana.base_url,
        ]
        .iter()
        .filter(|url| !url.is_empty())
        .count(),
    );
    Ok(())
}

async fn run(run_args: cli::RunArgs) -> anyhow::Result<()> {
    let mut config = Config::from_toml_file(&run_args.config_path())?;
    if let Some(listen_addr) = &run_args.listen_addr {
        config.listen_addr = listen_addr.clone();
    }
    if let Some(redis_url) = &run_args.redis_url {
        config.redis_url = redis_url.clone();
    }

    let keystore = Keystore::new(config.env, &config.raw_key_entries())?;

    let http = RestClient::new("custodia-node");
    let ledger_backend: Arc<dyn LedgerBackend> = Arc::new(HttpLedgerBackend::new(
        http.clone(),
        config.ledger_endpoint.clone(),
    ));
    let kms: Arc<dyn KmsClient> = Arc::new(HttpKmsClient::new(
        http.clone(),
        config.kms_endpoint.clone(),
    ));

    let registry = DriverRegistry::build(&config, ledger_backend, kms)?;

    let listen_addr: SocketAddr = config
        .listen_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen_addr {}: {e}", config.listen_addr))?;

    let engine_state = Arc::new(EngineState {
        keystore,
        registry,
        authz_collector: AuthorizationCollector::new(),
        namespace: config.namespace,
        poll_interval: Duration::from_secs(2),
    });

    let shutdown = NotifyOnce::new();

    let router = server::router(engine_state);
    let mut server_shutdown = shutdown.clone();
    let server_task = Task::spawn("operator-http-surface", async move {
        tokio::select! {
            biased;
            () = server_shutdown.recv() => {}
            result = custodia_api::server::serve(listen_addr, router) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "operator HTTP surface exited with an error");
                }
            }
        }
    });

    let worker_config = worker::WorkerConfig {
        redis_url: config.redis_url.clone(),
        engine_base_url: format!("http://{}", config.listen_addr),
        stream: QUEUE_STREAM.to_owned(),
        consumer_group: QUEUE_CONSUMER_GROUP.to_owned(),
        consumer_name: format!("worker-{}", uuid::Uuid::new_v4()),
    };
    let worker_shutdown = shutdown.clone();
    let worker_task = Task::spawn("queue-worker", async move {
        if let Err(e) = worker::run(worker_config, worker_shutdown).await {
            tracing::error!(error = %e, "queue worker exited with an error");
        }
    });

    let (_eph_tx, eph_rx) = tokio::sync::mpsc::channel(1);
    tokio::spawn(shutdown_on_ctrl_c(shutdown.clone()));

    task::join_tasks_and_shutdown(
        "custodia-node",
        vec![server_task, worker_task],
        eph_rx,
        shutdown,
        Duration::from_secs(10),
    )
    .await;

    Ok(())
}

async fn shutdown_on_ctrl_c(shutdown: NotifyOnce) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received ctrl-c, shutting down");
    shutdown.send();
}
