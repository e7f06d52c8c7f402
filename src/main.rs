use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use shielded_swap::alert::{spawn_escalation, WebhookPager};
use shielded_swap::providers::aggregator_http::AggregatorClient;
use shielded_swap::providers::pool_http::PoolSidecarClient;
use shielded_swap::providers::wallet::{AlloyWallet, DryRunWallet};
use shielded_swap::providers::WalletGateway;
use shielded_swap::swap::events::EventBus;
use shielded_swap::swap::executor::ProviderExecutor;
use shielded_swap::swap::ledger::DepositLedger;
use shielded_swap::swap::messages::SwapEvent;
use shielded_swap::swap::queue::{PhaseQueue, QueueConfig};
use shielded_swap::swap::store::{JsonFileStore, SnapshotStore};
use shielded_swap::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let settings = Settings::from_env()?;

    // Keep the guard alive for the whole process or buffered lines are lost.
    let _log_guard = init_tracing(&settings);

    info!("═══════════════════════════════════════════════════");
    info!("  Shielded Swap — privacy-pool trade orchestrator");
    info!("═══════════════════════════════════════════════════");

    let queue_cfg = QueueConfig::from_env();
    info!(
        "📊 Config: chain={} dry={} confirmations={} max_retries={} retry_delay={:?}",
        settings.chain_id, settings.dry_run, settings.confirmations, queue_cfg.max_retries, queue_cfg.retry_delay
    );

    // ═══ Providers ═══
    let wallet: Arc<dyn WalletGateway> = if settings.dry_run {
        info!("📝 DRY-RUN mode — nothing is signed, trade outputs use quotes");
        Arc::new(DryRunWallet::new(settings.dry_run_address))
    } else {
        let (Some(rpc_url), Some(key)) = (&settings.rpc_url, &settings.private_key) else {
            anyhow::bail!("🚨 FATAL: live mode without SWAP_RPC_URL / SWAP_PRIVATE_KEY");
        };
        Arc::new(AlloyWallet::connect(rpc_url, key, settings.chain_id, settings.confirmations).await?)
    };
    let executor = Arc::new(ProviderExecutor::new(
        Arc::new(PoolSidecarClient::new(settings.pool_url.clone())),
        Arc::new(AggregatorClient::new(settings.aggregator_url.clone())),
        wallet.clone(),
    ));

    // ═══ State (restored when a data dir is configured) ═══
    let store: Option<Arc<dyn SnapshotStore>> = match &settings.data_dir {
        Some(dir) => Some(Arc::new(JsonFileStore::open(dir).await?)),
        None => {
            warn!("⚠️ No SWAP_DATA_DIR: queue and ledger live in memory only");
            None
        }
    };
    let (requests, deposits) = match &store {
        Some(s) => (
            s.load_requests().await.context("Failed to load requests")?,
            s.load_deposits().await.context("Failed to load deposits")?,
        ),
        None => (vec![], vec![]),
    };
    let ledger = DepositLedger::from_deposits(deposits).shared();

    let bus = EventBus::new(queue_cfg.event_capacity);
    let (mut queue, handle) = PhaseQueue::new(queue_cfg, executor, ledger.clone(), bus.clone());
    if let Some(s) = store {
        queue = queue.with_store(s);
    }
    let resumed = queue.restore(requests).await;
    info!(
        "♻️ Restored {} deposit(s) across {} owner(s), {} active request(s)",
        ledger.read().await.len(),
        ledger.read().await.all_owners().len(),
        resumed
    );

    // ═══ Background tasks ═══
    let escalation = spawn_escalation(&bus, Arc::new(WebhookPager::new(settings.alert_webhook_url.clone())));

    let mut events = handle.subscribe();
    let event_log = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let r = event.request();
            match &event {
                SwapEvent::FundRecoveryFailed { .. } => {
                    error!("📣 {} {} [{}]", event.name(), r.short_id(), r.phase)
                }
                _ => info!("📣 {} {} [{}]", event.name(), r.short_id(), r.phase),
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver = tokio::spawn(queue.run(shutdown_rx));

    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    info!("🛑 Ctrl-C received, stopping after the current phase");
    let _ = shutdown_tx.send(true);
    if let Err(e) = driver.await {
        error!("🚨 Queue driver panicked: {}", e);
    }

    let status = handle.queue_status().await;
    if status.length > 0 {
        warn!("⚠️ {} request(s) left in the queue; they resume on next start if persisted", status.length);
    }

    drop(handle);
    drop(bus);
    event_log.abort();
    escalation.abort();
    info!("👋 Bye");
    Ok(())
}

fn init_tracing(settings: &Settings) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = tracing_subscriber::fmt::layer();

    match &settings.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "shielded_swap.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);
            tracing_subscriber::registry().with(filter).with(stdout).with(file).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stdout).init();
            None
        }
    }
}
