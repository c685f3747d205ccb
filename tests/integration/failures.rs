use std::time::Duration;

use anyhow::Result;
use cairn_core::{EventKind, MembershipEvent, ProviderMetadata};
use cairn_pool::{ManagerError, NoProviderReason, SelectError};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Connect Failures & Lifecycle
// ══════════════════════════════════════════════════════════════════════════════

/// A provider nobody listens for never enters a ring; its CREATE keeps
/// coming back on the bus after the republish delay.
#[tokio::test]
async fn test_refused_connect_is_republished() -> Result<()> {
    let manager = start_manager(test_config())?;
    let mut observer = manager.bus().subscribe();
    let key = "billing/v1/charge";
    let dead = dead_port().await?;

    manager
        .bus()
        .publish(MembershipEvent::create(ProviderMetadata::new(dead.clone(), service(key))));

    // The original, then at least one re-publish.
    for _ in 0..2 {
        let event = tokio::time::timeout(Duration::from_secs(5), observer.recv())
            .await?
            .expect("bus open");
        assert_eq!(event.kind(), EventKind::Create);
        assert_eq!(event.address(), &dead);
    }

    assert!(manager.registered().await.is_empty());
    assert!(matches!(
        manager.select(&service(key)),
        Err(SelectError::UnknownService(_))
    ));

    manager.shutdown().await;
    Ok(())
}

/// A provider that appears after its first CREATE failed is picked up by a
/// later re-publish without outside help.
#[tokio::test]
async fn test_republished_create_succeeds_once_provider_is_up() -> Result<()> {
    let manager = start_manager(test_config())?;
    let key = "billing/v1/charge";

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = cairn_core::ProviderAddr::new("127.0.0.1", listener.local_addr()?.port());
    drop(listener);

    manager
        .bus()
        .publish(MembershipEvent::create(ProviderMetadata::new(addr.clone(), service(key))));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ring_len(&manager, key), 0);

    // Bring the provider up on the port the CREATE names.
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", addr.port())).await?;
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _socket = socket;
                tokio::time::sleep(Duration::from_secs(30)).await;
            });
        }
    });

    wait_until("provider joined after retry", Duration::from_secs(5), || {
        ring_len(&manager, key) == 1
    })
    .await?;
    assert!(manager.select(&service(key)).is_ok());

    manager.shutdown().await;
    Ok(())
}

/// A ring whose only provider was removed reports an empty ring, not an
/// unknown service.
#[tokio::test]
async fn test_empty_ring_after_remove() -> Result<()> {
    let provider = spawn_provider("p1", Behaviour::Echo).await?;
    let manager = start_manager(test_config())?;
    let key = "billing/v1/charge";

    announce(&manager, &provider, key);
    wait_until("ring populated", Duration::from_secs(5), || ring_len(&manager, key) == 1).await?;
    manager.bus().publish(MembershipEvent::remove(provider.addr.clone(), service(key)));
    wait_until("ring emptied", Duration::from_secs(5), || ring_len(&manager, key) == 0).await?;

    match manager.select(&service(key)) {
        Err(SelectError::NoAvailableProvider { reason, .. }) => {
            assert_eq!(reason, NoProviderReason::EmptyRing)
        }
        other => panic!("expected empty ring, got {other:?}"),
    }

    manager.shutdown().await;
    Ok(())
}

/// Shutdown closes every pooled connection, stops consuming the bus, and
/// refuses a later init.
#[tokio::test]
async fn test_shutdown_closes_connections() -> Result<()> {
    let p1 = spawn_provider("p1", Behaviour::Echo).await?;
    let p2 = spawn_provider("p2", Behaviour::Echo).await?;
    let manager = start_manager(test_config())?;

    announce(&manager, &p1, "billing/v1/charge");
    announce(&manager, &p2, "billing/v1/refund");
    wait_until_async("two connections registered", Duration::from_secs(5), || {
        let manager = manager.clone();
        async move { manager.registered().await.len() == 2 }
    })
    .await?;
    let wrappers = manager.registered().await;
    assert_eq!(manager.snapshot().open_connections, 2);

    manager.shutdown().await;

    assert!(wrappers.iter().all(|w| w.connection().is_closed()));
    assert_eq!(manager.snapshot().open_connections, 0);
    assert!(manager.rings().is_empty());
    assert_eq!(manager.bus().subscriber_count(), 0);
    assert_eq!(manager.init(), Err(ManagerError::ShutDown));

    // Events after shutdown are not applied.
    announce(&manager, &p1, "billing/v1/charge");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(manager.registered().await.is_empty());
    Ok(())
}

/// The pool snapshot serialises to the JSON cairnd logs.
#[tokio::test]
async fn test_snapshot_reports_members() -> Result<()> {
    let provider = spawn_provider("p1", Behaviour::Echo).await?;
    let manager = start_manager(test_config())?;
    let key = "billing/v1/charge";

    announce(&manager, &provider, key);
    wait_until("ring populated", Duration::from_secs(5), || ring_len(&manager, key) == 1).await?;

    let json = serde_json::to_value(manager.snapshot())?;
    assert_eq!(json["services"][0]["key"], key);
    assert_eq!(
        json["services"][0]["members"][0]["address"],
        provider.addr.to_string()
    );
    assert_eq!(json["services"][0]["members"][0]["ref_count"], 1);
    assert_eq!(json["open_connections"], 1);

    manager.shutdown().await;
    Ok(())
}
