//! Cairn integration test harness.
//!
//! Tests run the pool against real providers listening on loopback TCP.
//! Nothing needs to be set up beforehand:
//!
//!   cargo test --test integration
//!
//! Each test starts its own providers on ephemeral ports and shuts its
//! manager down before returning.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::{TcpListener, TcpStream};

use cairn_core::config::PoolConfig;
use cairn_core::wire::FrameKind;
use cairn_core::{MembershipEvent, ProviderAddr, ProviderMetadata, ServiceKey};
use cairn_pool::connection::{read_frame, write_frame};
use cairn_pool::{ConnectionRingManager, MembershipBus, ResponseTable, TcpConnector};

mod failures;
mod invoke;

// ── Harness ───────────────────────────────────────────────────────────────────

pub type Manager = ConnectionRingManager<TcpConnector>;

/// How a test provider treats incoming requests.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Reply with `<tag>:<payload>`.
    Echo,
    /// Read requests, never answer.
    Silent,
}

/// A provider listening on loopback.
pub struct TestProvider {
    pub addr: ProviderAddr,
    pub accepted: Arc<AtomicUsize>,
}

impl TestProvider {
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn metadata(&self, key: &str) -> ProviderMetadata {
        ProviderMetadata::new(self.addr.clone(), service(key)).with_application("test-provider")
    }
}

/// Start a provider that answers every request according to `behaviour`.
pub async fn spawn_provider(tag: &'static str, behaviour: Behaviour) -> Result<TestProvider> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve(socket, tag, behaviour));
        }
    });

    Ok(TestProvider {
        addr: ProviderAddr::new("127.0.0.1", port),
        accepted,
    })
}

async fn serve(mut socket: TcpStream, tag: &'static str, behaviour: Behaviour) {
    while let Ok(Some((header, payload))) = read_frame(&mut socket).await {
        if behaviour == Behaviour::Silent {
            continue;
        }
        let mut reply = format!("{tag}:").into_bytes();
        reply.extend_from_slice(&payload);
        if write_frame(&mut socket, FrameKind::Response, header.request_id(), &reply)
            .await
            .is_err()
        {
            return;
        }
    }
}

/// A loopback port with nothing listening on it.
pub async fn dead_port() -> Result<ProviderAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(ProviderAddr::new("127.0.0.1", port))
}

pub fn service(key: &str) -> ServiceKey {
    key.parse().expect("valid service key")
}

pub fn test_config() -> PoolConfig {
    PoolConfig {
        connect_timeout_ms: 1_000,
        republish_delay_ms: 100,
        request_timeout_ms: 2_000,
        ..PoolConfig::default()
    }
}

/// A started manager over real TCP.
pub fn start_manager(config: PoolConfig) -> Result<Arc<Manager>> {
    let responses = ResponseTable::new();
    let connector = TcpConnector::new(&config, responses.clone());
    let manager = Arc::new(ConnectionRingManager::new(
        config,
        connector,
        MembershipBus::new(),
        responses,
    ));
    manager.init().context("manager init")?;
    Ok(manager)
}

pub fn announce(manager: &Manager, provider: &TestProvider, key: &str) {
    manager
        .bus()
        .publish(MembershipEvent::create(provider.metadata(key)));
}

/// Poll `check` every 10ms until it holds or `timeout` passes.
pub async fn wait_until<F>(what: &str, timeout: Duration, mut check: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

/// Async flavour of [`wait_until`].
pub async fn wait_until_async<F, Fut>(what: &str, timeout: Duration, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !check().await {
        if tokio::time::Instant::now() >= deadline {
            bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

/// Ring size for `key`, 0 if there is no ring.
pub fn ring_len(manager: &Manager, key: &str) -> usize {
    manager
        .rings()
        .get(&service(key))
        .map(|r| r.len())
        .unwrap_or(0)
}
