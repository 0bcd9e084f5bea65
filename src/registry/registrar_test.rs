use std::collections::HashSet;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::time::timeout;

use crate::registry::CreateMode;
use crate::registry::DiscoverEvent;
use crate::registry::MockRegistry;
use crate::registry::NodeDescriptor;
use crate::registry::ServiceRegistrar;
use crate::ClusterConfig;
use crate::CoordinationError;

const RETRY: Duration = Duration::from_millis(20);

fn cluster_with_peers(peers: &[&str]) -> ClusterConfig {
    ClusterConfig {
        peer_services: peers.iter().map(|s| s.to_string()).collect(),
        ..ClusterConfig::default()
    }
}

/// # Case 1: registration writes the descriptor to the ephemeral node
///
/// ## Validate
/// 1. The base path is created first
/// 2. The ephemeral node name is this process's listen address
/// 3. The payload decodes back to the expected descriptor
#[tokio::test]
async fn test_register_creates_ephemeral_node() {
    let cluster = cluster_with_peers(&[]);
    let expected = NodeDescriptor::from_cluster(&cluster);

    let mut registry = MockRegistry::new();
    registry
        .expect_create_recursive()
        .withf(|path, data| path == "/services/host-sync" && data.is_empty())
        .times(1)
        .returning(|_, _| Ok(()));
    registry
        .expect_create()
        .withf(move |path, data, mode| {
            let decoded: NodeDescriptor = bincode::deserialize(data).expect("descriptor");
            path == "/services/host-sync/127.0.0.1:9081"
                && decoded == expected
                && *mode == CreateMode::Ephemeral
        })
        .times(1)
        .returning(|path, _, _| Ok(path.to_string()));

    let registrar = ServiceRegistrar::new(Arc::new(registry), cluster, RETRY);
    registrar.register().await.expect("register");
}

/// # Case 2: a stale registration node is overwritten
#[tokio::test]
async fn test_register_overwrites_stale_node() {
    let cluster = cluster_with_peers(&[]);

    let mut registry = MockRegistry::new();
    registry.expect_create_recursive().returning(|_, _| Ok(()));
    registry
        .expect_create()
        .times(1)
        .returning(|path, _, _| Err(CoordinationError::NodeExists(path.to_string()).into()));
    registry
        .expect_update()
        .withf(|path, _| path == "/services/host-sync/127.0.0.1:9081")
        .times(1)
        .returning(|_, _| Ok(()));

    let registrar = ServiceRegistrar::new(Arc::new(registry), cluster, RETRY);
    registrar.register().await.expect("register");
}

/// # Case 3: the ephemeral registration is restored after session loss
///
/// ## Setup
/// 1. The maintenance loop registers and arms a watch on its own node.
/// 2. The watch fires with an error, the shape a session teardown
///    produces on reconnect.
///
/// ## Validation criteria
/// 1. The loop re-creates the registration on the fresh session
/// 2. The loop still exits cleanly on shutdown
#[tokio::test]
async fn test_registration_restored_after_session_loss() {
    let cluster = cluster_with_peers(&[]);
    let creates = Arc::new(AtomicUsize::new(0));
    let armed: Arc<parking_lot::Mutex<Vec<oneshot::Sender<DiscoverEvent>>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));

    let mut registry = MockRegistry::new();
    registry.expect_create_recursive().returning(|_, _| Ok(()));
    let counted = creates.clone();
    registry
        .expect_create()
        .withf(|path, _, mode| {
            path == "/services/host-sync/127.0.0.1:9081" && *mode == CreateMode::Ephemeral
        })
        .returning(move |path, _, _| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(path.to_string())
        });
    let keep = armed.clone();
    registry
        .expect_get_with_watch()
        .withf(|path| path == "/services/host-sync/127.0.0.1:9081")
        .returning(move |_| {
            let (tx, rx) = oneshot::channel();
            keep.lock().push(tx);
            Ok((vec![], rx))
        });

    let registrar = Arc::new(ServiceRegistrar::new(Arc::new(registry), cluster, RETRY));
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let loop_registrar = registrar.clone();
    let handle =
        tokio::spawn(async move { loop_registrar.maintain_registration(shutdown_rx).await });

    let first = wait_for_armed(&armed).await;
    assert_eq!(creates.load(Ordering::SeqCst), 1);

    // Session teardown wakes the armed watch with an error.
    let _ = first.send(DiscoverEvent {
        key: "/services/host-sync/127.0.0.1:9081".to_string(),
        data: vec![],
        error: Some("session expired".to_string()),
    });

    for _ in 0..100 {
        if creates.load(Ordering::SeqCst) >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(creates.load(Ordering::SeqCst), 2, "registration must be re-created");

    shutdown_tx.send(()).expect("signal shutdown");
    timeout(Duration::from_secs(2), handle)
        .await
        .expect("loop stops on shutdown")
        .expect("join")
        .expect("clean exit");
}

/// # Case 4: refresh swaps the peer snapshot and resolve picks from it
///
/// ## Validate
/// 1. `peers_of` reflects the listed children after a refresh
/// 2. `resolve` only ever returns listed addresses
/// 3. An unknown service resolves to nothing
#[tokio::test]
async fn test_refresh_and_resolve() {
    let cluster = cluster_with_peers(&["reporting"]);
    let armed: Arc<parking_lot::Mutex<Vec<oneshot::Sender<DiscoverEvent>>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));
    let keep = armed.clone();

    let mut registry = MockRegistry::new();
    registry
        .expect_watch_children()
        .withf(|path| path == "/services/reporting")
        .returning(move |_| {
            let (tx, rx) = oneshot::channel();
            keep.lock().push(tx);
            Ok((vec!["10.0.0.2:9081".to_string(), "10.0.0.3:9081".to_string()], rx))
        });

    let registrar = ServiceRegistrar::new(Arc::new(registry), cluster, RETRY);
    assert!(registrar.peers_of("reporting").is_empty());
    assert_eq!(registrar.resolve("reporting"), None);

    registrar
        .refresh("reporting", "/services/reporting")
        .await
        .expect("refresh");

    assert_eq!(
        registrar.peers_of("reporting"),
        vec!["10.0.0.2:9081".to_string(), "10.0.0.3:9081".to_string()]
    );

    let listed: HashSet<String> = registrar.peers_of("reporting").into_iter().collect();
    for _ in 0..20 {
        let picked = registrar.resolve("reporting").expect("non-empty snapshot");
        assert!(listed.contains(&picked));
    }

    assert_eq!(registrar.resolve("billing"), None);
}

/// # Case 5: the discovery loop re-reads on every fired watch and stops
/// on shutdown
#[tokio::test]
async fn test_discover_rereads_and_stops() {
    let cluster = cluster_with_peers(&["reporting"]);
    let armed: Arc<parking_lot::Mutex<Vec<oneshot::Sender<DiscoverEvent>>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));
    let keep = armed.clone();
    let mut round = 0u32;

    let mut registry = MockRegistry::new();
    registry.expect_watch_children().returning(move |_path| {
        round += 1;
        let (tx, rx) = oneshot::channel();
        keep.lock().push(tx);
        let children = if round == 1 {
            vec!["10.0.0.2:9081".to_string()]
        } else {
            vec!["10.0.0.2:9081".to_string(), "10.0.0.4:9081".to_string()]
        };
        Ok((children, rx))
    });

    let registrar = Arc::new(ServiceRegistrar::new(Arc::new(registry), cluster, RETRY));
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let loop_registrar = registrar.clone();
    let handle = tokio::spawn(async move { loop_registrar.discover("reporting", shutdown_rx).await });

    // First pass armed: fire the watch so the loop re-lists.
    let first = wait_for_armed(&armed).await;
    let _ = first.send(DiscoverEvent {
        key: "/services/reporting".to_string(),
        data: vec![],
        error: None,
    });

    // Second pass swaps in the grown membership.
    for _ in 0..100 {
        if registrar.peers_of("reporting").len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(registrar.peers_of("reporting").len(), 2);

    shutdown_tx.send(()).expect("signal shutdown");
    timeout(Duration::from_secs(2), handle)
        .await
        .expect("loop stops on shutdown")
        .expect("join")
        .expect("clean exit");
}

/// Waits for a watch to be armed and takes its sender.
async fn wait_for_armed(
    armed: &Arc<parking_lot::Mutex<Vec<oneshot::Sender<DiscoverEvent>>>>
) -> oneshot::Sender<DiscoverEvent> {
    for _ in 0..100 {
        let mut guard = armed.lock();
        if !guard.is_empty() {
            return guard.remove(0);
        }
        drop(guard);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("watch never armed");
}
