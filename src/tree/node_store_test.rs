use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Barrier;

use mockall::predicate::eq;

use super::*;
use crate::constants::ANY_VERSION;
use crate::test_utils::memory_node_store;
use crate::test_utils::recording_handle;
use crate::test_utils::spawn_dispatch_loop;
use crate::Error;
use crate::EventDispatcher;
use crate::EventType;
use crate::KeeperState;
use crate::MockNodeRepository;
use crate::MockUpdateLogRepository;
use crate::NodeError;
use crate::SledStorage;
use crate::StorageError;
use crate::UpdateLogRepository;
use crate::WatchKind;
use crate::WatchPaths;
use crate::WatchRegistry;

const SESSION: i64 = 11;

fn node_err(result: crate::Result<impl std::fmt::Debug>) -> NodeError {
    match result {
        Err(Error::Node(e)) => e,
        other => panic!("expected node error, got {other:?}"),
    }
}

#[test]
fn test_create_and_read_back() {
    let (store, _, _loop) = memory_node_store(1);

    let path = store
        .create(SESSION, "/app", Some(b"cfg".to_vec()), CreateMode::Persistent)
        .unwrap();
    assert_eq!(path, "/app");

    let (data, stat) = store.get_data("/app", None).unwrap();
    assert_eq!(data.as_deref(), Some(&b"cfg"[..]));
    assert_eq!(stat.version, 0);
    assert_eq!(stat.cversion, 0);
    assert_eq!(stat.ephemeral_owner, 0);
    assert_eq!(stat.data_length, 3);
    assert_eq!(stat.ctime, stat.mtime);
    assert_eq!(store.get_children("/", None).unwrap(), vec!["app"]);
}

#[test]
fn test_create_failures() {
    let (store, _, _loop) = memory_node_store(1);
    store.create(SESSION, "/a", None, CreateMode::Persistent).unwrap();
    store.create(SESSION, "/eph", None, CreateMode::Ephemeral).unwrap();

    assert_eq!(
        node_err(store.create(SESSION, "/a", None, CreateMode::Persistent)),
        NodeError::NodeExists("/a".into())
    );
    assert_eq!(
        node_err(store.create(SESSION, "/", None, CreateMode::Persistent)),
        NodeError::NodeExists("/".into())
    );
    assert_eq!(
        node_err(store.create(SESSION, "/missing/child", None, CreateMode::Persistent)),
        NodeError::NoNode("/missing/child".into())
    );
    assert_eq!(
        node_err(store.create(SESSION, "/eph/child", None, CreateMode::Persistent)),
        NodeError::NoChildrenForEphemerals("/eph/child".into())
    );
    assert!(matches!(
        node_err(store.create(SESSION, "relative", None, CreateMode::Persistent)),
        NodeError::InvalidPath { .. }
    ));
    assert!(matches!(
        node_err(store.create(SESSION, "/a/", None, CreateMode::Persistent)),
        NodeError::InvalidPath { .. }
    ));
}

#[test]
fn test_sequential_suffix_follows_parent_cversion() {
    let (store, _, _loop) = memory_node_store(1);
    store.create(SESSION, "/q", None, CreateMode::Persistent).unwrap();

    let first = store
        .create(SESSION, "/q/item-", None, CreateMode::PersistentSequential)
        .unwrap();
    let second = store
        .create(SESSION, "/q/item-", None, CreateMode::EphemeralSequential)
        .unwrap();
    assert_eq!(first, "/q/item-0000000000");
    assert_eq!(second, "/q/item-0000000001");

    // deletes count as child changes too
    store.delete(&first, ANY_VERSION).unwrap();
    let third = store
        .create(SESSION, "/q/", None, CreateMode::PersistentSequential)
        .unwrap();
    assert_eq!(third, "/q/0000000003");

    let (_, q) = store.get_data("/q", None).unwrap();
    assert_eq!(q.cversion, 4);
    assert_eq!(q.num_children, 2);
}

#[test]
fn test_children_of_root_do_not_bump_root_cversion() {
    let (store, _, _loop) = memory_node_store(1);

    let a = store.create(SESSION, "/s-", None, CreateMode::PersistentSequential).unwrap();
    let (_, root) = store.get_data("/", None).unwrap();
    assert_eq!(a, "/s-0000000000");
    assert_eq!(root.cversion, 0);
    assert_eq!(root.num_children, 1);
}

/// Root's cversion stays 0, so every sequential child of `/` with the same
/// prefix gets the same name.
#[test]
fn test_second_sequential_create_under_root_collides() {
    let (store, _, _loop) = memory_node_store(1);

    let first = store.create(SESSION, "/lock-", None, CreateMode::EphemeralSequential);
    assert_eq!(first.unwrap(), "/lock-0000000000");
    assert_eq!(
        node_err(store.create(SESSION, "/lock-", None, CreateMode::EphemeralSequential)),
        NodeError::NodeExists("/lock-0000000000".into())
    );

    // freed again once the first is gone
    store.delete("/lock-0000000000", ANY_VERSION).unwrap();
    assert_eq!(
        store
            .create(SESSION, "/lock-", None, CreateMode::EphemeralSequential)
            .unwrap(),
        "/lock-0000000000"
    );
}

#[test]
fn test_ephemeral_requires_owning_session() {
    let (store, _, _loop) = memory_node_store(1);

    for mode in [CreateMode::Ephemeral, CreateMode::EphemeralSequential] {
        assert_eq!(
            node_err(store.create(0, "/orphan", None, mode)),
            NodeError::EphemeralWithoutSession("/orphan".into())
        );
    }
    assert_eq!(store.exists("/orphan", None).unwrap(), None);

    // persistent nodes do not care who asked
    store.create(0, "/plain", None, CreateMode::Persistent).unwrap();
    assert_eq!(store.exists("/plain", None).unwrap().unwrap().ephemeral_owner, 0);
}

#[test]
fn test_node_kind_follows_create_mode() {
    assert!(Node::new("/e", None, CreateMode::EphemeralSequential, SESSION, 1).is_ephemeral());
    assert!(!Node::new("/p", None, CreateMode::PersistentSequential, 0, 1).is_ephemeral());
}

#[test]
fn test_ephemeral_owner_is_creating_session() {
    let (store, _, _loop) = memory_node_store(1);
    store.create(SESSION, "/lock", None, CreateMode::Ephemeral).unwrap();

    let stat = store.exists("/lock", None).unwrap().unwrap();
    assert_eq!(stat.ephemeral_owner, SESSION);
}

#[test]
fn test_set_data_versions() {
    let (store, _, _loop) = memory_node_store(1);
    store.create(SESSION, "/v", None, CreateMode::Persistent).unwrap();

    let stat = store.set_data("/v", Some(b"one".to_vec()), 0).unwrap();
    assert_eq!(stat.version, 1);
    assert_eq!(stat.data_length, 3);

    assert_eq!(
        node_err(store.set_data("/v", None, 0)),
        NodeError::BadVersion {
            path: "/v".into(),
            expected: 0
        }
    );

    let stat = store.set_data("/v", Some(b"two".to_vec()), ANY_VERSION).unwrap();
    assert_eq!(stat.version, 2);
    assert_eq!(store.get_data("/v", None).unwrap().1, stat);

    assert_eq!(
        node_err(store.set_data("/nope", None, ANY_VERSION)),
        NodeError::NoNode("/nope".into())
    );
}

#[test]
fn test_delete_checks() {
    let (store, _, _loop) = memory_node_store(1);
    store.create(SESSION, "/p", None, CreateMode::Persistent).unwrap();
    store.create(SESSION, "/p/c", None, CreateMode::Persistent).unwrap();

    assert_eq!(node_err(store.delete("/p", ANY_VERSION)), NodeError::NotEmpty("/p".into()));
    assert_eq!(
        node_err(store.delete("/p/c", 5)),
        NodeError::BadVersion {
            path: "/p/c".into(),
            expected: 5
        }
    );
    assert_eq!(node_err(store.delete("/ghost", ANY_VERSION)), NodeError::NoNode("/ghost".into()));
    assert!(matches!(
        node_err(store.delete("/", ANY_VERSION)),
        NodeError::InvalidPath { .. }
    ));

    store.delete("/p/c", 0).unwrap();
    store.delete("/p", 0).unwrap();
    assert_eq!(store.exists("/p", None).unwrap(), None);
}

#[test]
fn test_lost_race_on_conditional_delete_is_bad_version() {
    let mut nodes = MockNodeRepository::new();
    nodes
        .expect_get()
        .with(eq("/n"))
        .returning(|_| Ok(Node::new("/n", None, CreateMode::Persistent, 0, 1)));
    nodes.expect_delete().with(eq("/n"), eq(0i32)).returning(|_, _| Ok(0));

    let (dispatcher, _loop) = EventDispatcher::new(Arc::new(WatchRegistry::new(true)));
    let store = NodeStore::new(1, Arc::new(nodes), Arc::new(MockUpdateLogRepository::new()), dispatcher);

    assert!(matches!(
        node_err(store.delete("/n", ANY_VERSION)),
        NodeError::BadVersion { .. }
    ));
}

#[test]
fn test_storage_failures_pass_through() {
    let mut nodes = MockNodeRepository::new();
    nodes
        .expect_get()
        .returning(|_| Err(StorageError::DataCorruption { location: "disk".into() }.into()));

    let (dispatcher, _loop) = EventDispatcher::new(Arc::new(WatchRegistry::new(true)));
    let store = NodeStore::new(1, Arc::new(nodes), Arc::new(MockUpdateLogRepository::new()), dispatcher);

    assert!(matches!(store.get_data("/x", None), Err(Error::System(_))));
    assert!(matches!(store.exists("/x", None), Err(Error::System(_))));
}

#[test]
fn test_exists_arms_data_or_exist_watch() {
    let (store, _, _loop) = memory_node_store(1);
    let (w, _) = recording_handle(SESSION);
    store.create(SESSION, "/here", None, CreateMode::Persistent).unwrap();

    assert!(store.exists("/here", Some(&w)).unwrap().is_some());
    assert!(store.exists("/gone", Some(&w)).unwrap().is_none());

    assert!(store.registry().contains(&w, WatchKind::Data, "/here"));
    assert!(store.registry().contains(&w, WatchKind::Exist, "/gone"));
}

#[test]
fn test_failed_read_arms_no_watch() {
    let (store, _, _loop) = memory_node_store(1);
    let (w, _) = recording_handle(SESSION);

    assert!(store.get_data("/none", Some(&w)).is_err());
    assert!(store.get_children("/none", Some(&w)).is_err());
    assert!(store.registry().is_empty());
}

#[tokio::test]
async fn test_mutations_fire_watches_once() {
    let (store, _, consumer) = memory_node_store(1);
    let _shutdown = spawn_dispatch_loop(consumer);
    let (w, recorder) = recording_handle(SESSION);

    store.create(SESSION, "/w", None, CreateMode::Persistent).unwrap();
    store.get_data("/w", Some(&w)).unwrap();
    store.get_children("/w", Some(&w)).unwrap();
    store.exists("/w/kid", Some(&w)).unwrap();

    store.create(SESSION, "/w/kid", None, CreateMode::Persistent).unwrap();
    store.set_data("/w", Some(b"x".to_vec()), ANY_VERSION).unwrap();
    // already consumed
    store.set_data("/w", Some(b"y".to_vec()), ANY_VERSION).unwrap();

    recorder.wait_for(3).await;
    let seen: Vec<_> = recorder
        .events()
        .into_iter()
        .map(|e| (e.event_type, e.path.unwrap()))
        .collect();
    assert_eq!(
        seen,
        vec![
            (EventType::NodeCreated, "/w/kid".to_string()),
            (EventType::NodeChildrenChanged, "/w".to_string()),
            (EventType::NodeDataChanged, "/w".to_string()),
        ]
    );
}

#[test]
fn test_delete_fires_data_and_child_watches() {
    let (store, _, _loop) = memory_node_store(1);
    let (w, _) = recording_handle(SESSION);
    let (parent_w, _) = recording_handle(SESSION);
    store.create(SESSION, "/d", None, CreateMode::Persistent).unwrap();
    store.create(SESSION, "/d/x", None, CreateMode::Persistent).unwrap();

    store.get_data("/d/x", Some(&w)).unwrap();
    store.get_children("/d/x", Some(&w)).unwrap();
    store.get_children("/d", Some(&parent_w)).unwrap();

    store.delete("/d/x", ANY_VERSION).unwrap();
    assert!(store.registry().is_empty());
}

#[test]
fn test_every_node_event_is_logged_for_peers() {
    let (store, storage, _loop) = memory_node_store(4);
    store.create(SESSION, "/l", None, CreateMode::Persistent).unwrap();
    store.set_data("/l", None, ANY_VERSION).unwrap();
    store.delete("/l", ANY_VERSION).unwrap();

    let mut logged: Vec<_> = storage
        .query_updates(0, 0)
        .unwrap()
        .into_iter()
        .map(|u| {
            assert_eq!(u.origin_broker, 4);
            (u.event_type, u.path)
        })
        .collect();
    logged.sort_by_key(|(t, p)| (t.code(), p.clone()));
    assert_eq!(
        logged,
        vec![
            (EventType::NodeCreated, "/l".to_string()),
            (EventType::NodeDeleted, "/l".to_string()),
            (EventType::NodeDataChanged, "/l".to_string()),
            (EventType::NodeChildrenChanged, "/".to_string()),
            (EventType::NodeChildrenChanged, "/".to_string()),
        ]
    );
}

#[test]
#[tracing_test::traced_test]
fn test_update_log_failure_does_not_fail_mutation() {
    let (dispatcher, _loop) = EventDispatcher::new(Arc::new(WatchRegistry::new(true)));
    let storage = Arc::new(crate::MemoryStorage::new());
    let mut log = MockUpdateLogRepository::new();
    log.expect_append()
        .returning(|_| Err(StorageError::DataCorruption { location: "log".into() }.into()));
    let store = NodeStore::new(1, storage, Arc::new(log), dispatcher);

    store.create(SESSION, "/ok", None, CreateMode::Persistent).unwrap();
    assert!(logs_contain("failed to record node update"));
}

#[test]
fn test_register_watch_rearms_in_bulk() {
    let (store, _, _loop) = memory_node_store(1);
    let (w, _) = recording_handle(SESSION);

    store.register_watch(
        &w,
        &WatchPaths {
            data: vec!["/a".into()],
            exist: vec!["/b".into()],
            child: vec!["/c".into(), "/d".into()],
        },
    );
    assert_eq!(store.registry().len(), 4);
    assert!(store.registry().contains(&w, WatchKind::Child, "/d"));
}

#[test]
fn test_remove_ephemeral_nodes_of_session() {
    let (store, _, _loop) = memory_node_store(1);
    store.create(SESSION, "/e1", None, CreateMode::Ephemeral).unwrap();
    store.create(SESSION, "/e2-", None, CreateMode::EphemeralSequential).unwrap();
    store.create(SESSION + 1, "/other", None, CreateMode::Ephemeral).unwrap();
    store.create(SESSION, "/kept", None, CreateMode::Persistent).unwrap();

    assert_eq!(store.remove_ephemeral_nodes_of(SESSION).unwrap(), 2);
    assert_eq!(store.get_children("/", None).unwrap(), vec!["kept", "other"]);
    assert_eq!(store.remove_ephemeral_nodes_of(SESSION).unwrap(), 0);
}

#[test]
#[tracing_test::traced_test]
fn test_remove_ephemeral_skips_nodes_already_gone() {
    let mut nodes = MockNodeRepository::new();
    nodes
        .expect_ephemeral_paths()
        .with(eq(SESSION))
        .returning(|_| Ok(vec!["/raced".to_string()]));
    nodes
        .expect_get()
        .returning(|p| Err(StorageError::NotFound(p.to_string()).into()));

    let (dispatcher, _loop) = EventDispatcher::new(Arc::new(WatchRegistry::new(true)));
    let store = NodeStore::new(1, Arc::new(nodes), Arc::new(MockUpdateLogRepository::new()), dispatcher);

    assert_eq!(store.remove_ephemeral_nodes_of(SESSION).unwrap(), 0);
    assert!(logs_contain("skip ephemeral node cleanup"));
}

#[test]
fn test_close_reaps_and_notifies_session() {
    let (store, _, _loop) = memory_node_store(1);
    let (default_w, recorder) = recording_handle(SESSION);
    let (w, _) = recording_handle(SESSION);
    let (other, _) = recording_handle(SESSION + 1);

    store.registry().set_default_watcher(default_w);
    store.create(SESSION, "/mine", None, CreateMode::Ephemeral).unwrap();
    store.exists("/elsewhere", Some(&w)).unwrap();
    store.exists("/elsewhere", Some(&other)).unwrap();

    store.close(SESSION).unwrap();

    assert_eq!(store.exists("/mine", None).unwrap(), None);
    assert_eq!(
        recorder.events(),
        vec![crate::WatchedEvent::connection(KeeperState::Closed)]
    );
    assert!(store.registry().default_watcher(SESSION).is_none());
    assert!(!store.registry().contains(&w, WatchKind::Exist, "/elsewhere"));
    assert!(store.registry().contains(&other, WatchKind::Exist, "/elsewhere"));
}

#[test]
fn test_create_mode_flags_round_trip() {
    for mode in [
        CreateMode::Persistent,
        CreateMode::Ephemeral,
        CreateMode::PersistentSequential,
        CreateMode::EphemeralSequential,
    ] {
        assert_eq!(CreateMode::from_flag(mode.flag()), Some(mode));
    }
    assert_eq!(CreateMode::from_flag(4), None);
    assert!(CreateMode::EphemeralSequential.is_ephemeral());
    assert!(!CreateMode::PersistentSequential.is_ephemeral());
}

const RACED_CREATES: usize = 200;

/// Creates ephemerals on one thread while another reaps the session.
///
/// Anything whose create returned before cleanup began must be gone.
/// Survivors were created concurrently and a second cleanup takes them.
fn create_racing_cleanup(store: &NodeStore) {
    const PRESENT: usize = 20;
    for i in 0..PRESENT {
        store
            .create(SESSION, &format!("/pre-{i}"), None, CreateMode::Ephemeral)
            .unwrap();
    }

    let cleanup_started = AtomicBool::new(false);
    let barrier = Barrier::new(2);

    let (created, removed) = std::thread::scope(|scope| {
        let creator = scope.spawn(|| {
            barrier.wait();
            let mut created = Vec::with_capacity(RACED_CREATES);
            for i in 0..RACED_CREATES {
                let path = store
                    .create(SESSION, &format!("/race-{i}"), None, CreateMode::Ephemeral)
                    .unwrap();
                created.push((path, cleanup_started.load(Ordering::SeqCst)));
            }
            created
        });
        let cleaner = scope.spawn(|| {
            barrier.wait();
            cleanup_started.store(true, Ordering::SeqCst);
            store.remove_ephemeral_nodes_of(SESSION).unwrap()
        });
        (creator.join().unwrap(), cleaner.join().unwrap())
    });

    for i in 0..PRESENT {
        assert_eq!(store.exists(&format!("/pre-{i}"), None).unwrap(), None);
    }
    let mut survivors = 0;
    for (path, after_cleanup_began) in &created {
        if store.exists(path, None).unwrap().is_some() {
            assert!(after_cleanup_began, "{path} outlived a cleanup started after it");
            survivors += 1;
        }
    }
    // every node is accounted for exactly once
    assert_eq!(removed + survivors, PRESENT + RACED_CREATES);
    assert_eq!(store.get_children("/", None).unwrap().len(), survivors);

    assert_eq!(store.remove_ephemeral_nodes_of(SESSION).unwrap(), survivors);
    assert!(store.get_children("/", None).unwrap().is_empty());
}

#[test]
fn test_create_racing_cleanup_over_memory() {
    let (store, _, _loop) = memory_node_store(1);
    create_racing_cleanup(&store);
}

#[test]
fn test_create_racing_cleanup_over_sled() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(SledStorage::open(dir.path().join("db"), 8 * 1024 * 1024).unwrap());
    let (dispatcher, _loop) = EventDispatcher::new(Arc::new(WatchRegistry::new(true)));
    let store = NodeStore::new(1, storage.clone(), storage, dispatcher);

    create_racing_cleanup(&store);
}
