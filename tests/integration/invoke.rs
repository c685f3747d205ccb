use std::time::Duration;

use anyhow::Result;
use cairn_pool::{InvokeError, Invoker};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Request Path
// ══════════════════════════════════════════════════════════════════════════════

/// Requests alternate between two providers of the same service.
#[tokio::test]
async fn test_requests_round_robin_across_providers() -> Result<()> {
    let p1 = spawn_provider("p1", Behaviour::Echo).await?;
    let p2 = spawn_provider("p2", Behaviour::Echo).await?;
    let manager = start_manager(test_config())?;
    let key = "catalog/v2/lookup";

    announce(&manager, &p1, key);
    announce(&manager, &p2, key);
    wait_until("two providers in ring", Duration::from_secs(5), || {
        ring_len(&manager, key) == 2
    })
    .await?;

    let invoker = Invoker::new(manager.clone());
    let mut replies = Vec::new();
    for _ in 0..4 {
        let body = invoker.invoke(&service(key), b"sku-42", None).await?;
        replies.push(String::from_utf8(body.to_vec())?);
    }

    let from_p1 = replies.iter().filter(|r| *r == "p1:sku-42").count();
    let from_p2 = replies.iter().filter(|r| *r == "p2:sku-42").count();
    assert_eq!((from_p1, from_p2), (2, 2), "replies: {replies:?}");
    assert_ne!(replies[0], replies[1]);
    assert!(manager.responses().is_empty());

    manager.shutdown().await;
    Ok(())
}

/// A provider that never answers gets its connection flagged on timeout and
/// evicted by the next selection, which falls back to the healthy provider.
#[tokio::test]
async fn test_timeout_flags_and_next_select_evicts() -> Result<()> {
    let silent = spawn_provider("silent", Behaviour::Silent).await?;
    let healthy = spawn_provider("ok", Behaviour::Echo).await?;
    let manager = start_manager(test_config())?;
    let key = "catalog/v2/lookup";

    announce(&manager, &silent, key);
    wait_until("silent provider in ring", Duration::from_secs(5), || {
        ring_len(&manager, key) == 1
    })
    .await?;
    announce(&manager, &healthy, key);
    wait_until("healthy provider in ring", Duration::from_secs(5), || {
        ring_len(&manager, key) == 2
    })
    .await?;

    let invoker = Invoker::new(manager.clone());
    // Ring order is [silent, ok]; the cursor starts on silent.
    let err = invoker
        .invoke(&service(key), b"ping", Some(Duration::from_millis(200)))
        .await
        .unwrap_err();
    assert!(matches!(err, InvokeError::Timeout { .. }), "got {err}");
    assert!(manager.responses().is_empty(), "timed-out request forgotten");

    let suspect = manager
        .rings()
        .get(&service(key))
        .map(|r| r.snapshot()[0].clone())
        .expect("ring exists");
    assert!(suspect.is_maybe_down());
    assert!(suspect.matches(&silent.addr));

    // Cursor is on "ok" now; take it so the next call lands on the suspect.
    assert_eq!(&invoker.invoke(&service(key), b"a", None).await?[..], b"ok:a");
    assert_eq!(&invoker.invoke(&service(key), b"b", None).await?[..], b"ok:b");
    assert!(suspect.connection().is_closed());
    assert_eq!(ring_len(&manager, key), 1);

    manager.shutdown().await;
    Ok(())
}

/// A provider that hangs up fails the waiting request immediately.
#[tokio::test]
async fn test_provider_hang_up_fails_request() -> Result<()> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = cairn_core::ProviderAddr::new("127.0.0.1", listener.local_addr()?.port());
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            // Swallow one request, then hang up.
            let _ = cairn_pool::connection::read_frame(&mut socket).await;
        }
    });

    let manager = start_manager(test_config())?;
    let key = "catalog/v2/lookup";
    manager
        .bus()
        .publish(cairn_core::MembershipEvent::create(
            cairn_core::ProviderMetadata::new(addr, service(key)),
        ));
    wait_until("ring populated", Duration::from_secs(5), || ring_len(&manager, key) == 1).await?;

    let invoker = Invoker::new(manager.clone());
    let err = invoker
        .invoke(&service(key), b"ping", Some(Duration::from_secs(5)))
        .await
        .unwrap_err();
    assert!(
        matches!(err, InvokeError::Response(cairn_pool::ResponseError::ConnectionLost(_))),
        "got {err}"
    );

    let wrapper = manager
        .rings()
        .get(&service(key))
        .map(|r| r.snapshot()[0].clone())
        .expect("ring exists");
    assert!(wrapper.is_maybe_down());

    manager.shutdown().await;
    Ok(())
}
