//! cairnd — Cairn connection pool daemon.
//!
//! Announces the statically configured providers on the membership bus,
//! keeps their connections pooled, and logs a pool snapshot periodically.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use cairn_core::config::CairnConfig;
use cairn_core::MembershipEvent;
use cairn_pool::{ConnectionRingManager, MembershipBus, ResponseTable, TcpConnector};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config. An explicit path on the command line wins.
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => CairnConfig::from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            if let Err(e) = CairnConfig::write_default_if_missing() {
                tracing::warn!(error = %e, "failed to write default config");
            }
            CairnConfig::load().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to load config, using defaults");
                CairnConfig::default()
            })
        }
    };
    tracing::info!(
        providers = config.providers.len(),
        connect_timeout_ms = config.pool.connect_timeout_ms,
        request_timeout_ms = config.pool.request_timeout_ms,
        "cairnd starting"
    );

    // ── Pool ─────────────────────────────────────────────────────────────────
    let bus = MembershipBus::new();
    let responses = ResponseTable::new();
    let connector = TcpConnector::new(&config.pool, responses.clone());
    let manager = Arc::new(ConnectionRingManager::new(
        config.pool.clone(),
        connector,
        bus.clone(),
        responses,
    ));
    manager.init().context("starting connection ring manager")?;

    for provider in &config.providers {
        tracing::info!(
            addr = %provider.address,
            key = %provider.service,
            application = %provider.application,
            "announcing static provider"
        );
        bus.publish(MembershipEvent::create(provider.clone()));
    }

    // ── Snapshot logger ──────────────────────────────────────────────────────
    let snapshot_task = config.daemon.snapshot_interval().map(|period| {
        let manager = manager.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let snapshot = manager.snapshot();
                match serde_json::to_string(&snapshot) {
                    Ok(json) => tracing::info!(
                        services = snapshot.services.len(),
                        members = snapshot.total_members(),
                        open_connections = snapshot.open_connections,
                        snapshot = %json,
                        "pool snapshot"
                    ),
                    Err(e) => tracing::warn!(error = %e, "failed to serialize pool snapshot"),
                }
            }
        })
    });
    if snapshot_task.is_none() {
        tracing::info!("pool snapshots disabled");
    }

    // ── Wait for exit ────────────────────────────────────────────────────────
    let snapshot_exit = async {
        match snapshot_task {
            Some(task) => task.await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r.context("waiting for ctrl-c")?;
            tracing::info!("shutdown signal received");
        }
        r = snapshot_exit => tracing::error!("snapshot task exited: {:?}", r),
    }

    manager.shutdown().await;
    Ok(())
}
