//! Registry and change propagation tests.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;

use super::{DerivedState, Registry};
use crate::allocator::PortPool;
use crate::error::RegistryError;
use crate::routing::RoutingFiles;
use crate::storage::RegistryDatabase;

const SERVER_KEY: &str = "ssh-ed25519 SERVERKEY bastion@server";

struct Fixture {
    dir: TempDir,
    registry: Arc<Registry>,
    reloads: Arc<AtomicUsize>,
}

impl Fixture {
    fn path(&self, rel: &str) -> std::path::PathBuf {
        self.dir.path().join(rel)
    }

    fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path(rel)).unwrap()
    }

    fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

fn routing_files(dir: &Path) -> RoutingFiles {
    RoutingFiles::new(
        dir.join("sshpiper.yaml"),
        dir.join("keys"),
        dir.join("server-key"),
        dir.join("ssh").join("authorized_keys"),
    )
}

async fn fixture_with_pool(ports: PortPool) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("keys")).unwrap();
    std::fs::write(dir.path().join("server-key.pub"), format!("{SERVER_KEY}\n")).unwrap();

    let reloads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reloads);
    let db = RegistryDatabase::open_in_memory().await.unwrap();
    let registry = Registry::new(
        db,
        ports,
        routing_files(dir.path()),
        Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    Fixture {
        dir,
        registry: Arc::new(registry),
        reloads,
    }
}

async fn fixture() -> Fixture {
    fixture_with_pool(PortPool::new(10022, 10024).unwrap()).await
}

fn key(tag: &str) -> String {
    format!("ssh-ed25519 AAAA{tag} {tag}@host")
}

async fn register(f: &Fixture, name: &str) -> Result<u16, RegistryError> {
    f.registry
        .register(name, "alice", "alice", &key(name))
        .await
        .map(|c| c.value.port)
}

#[tokio::test]
async fn register_writes_every_artifact_and_reloads() {
    let f = fixture().await;
    let committed = f
        .registry
        .register("laptop", "alice", "alice", &format!("  {}\n", key("laptop")))
        .await
        .unwrap();

    assert_eq!(committed.value.port, 10022);
    assert_eq!(committed.derived, DerivedState::Fresh);
    assert_eq!(committed.value.public_key, key("laptop"));

    assert_eq!(f.read("keys/laptop.pub"), format!("{}\n", key("laptop")));
    let config = f.read("sshpiper.yaml");
    assert!(config.contains("username: \"laptop\""));
    assert!(config.contains("host: localhost:10022"));

    let auth = f.read("ssh/authorized_keys");
    let lines: Vec<_> = auth.lines().collect();
    assert_eq!(lines[0], SERVER_KEY);
    assert!(lines[1].starts_with("permitlisten=\"localhost:10022\""));
    assert_eq!(f.reloads(), 1);
}

#[tokio::test]
async fn invalid_input_never_reaches_storage() {
    let f = fixture().await;
    let long_key = format!("ssh-ed25519 {}", "A".repeat(2100));
    let cases = [
        ("bad name", "alice", "alice", key("x")),
        ("ok", "-owner", "alice", key("x")),
        ("ok", "alice", "", key("x")),
        ("ok", "alice", "alice", "ssh-ed25519 AAAA\nssh-ed25519 BBBB".to_string()),
        ("ok", "alice", "alice", long_key),
        ("ok", "alice", "alice", "ssh-unknown AAAA".to_string()),
    ];

    for (name, owner, user, pk) in cases {
        let err = f
            .registry
            .register(name, owner, user, &pk)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)), "{name}/{owner}/{user}");
    }
    assert_eq!(f.registry.count().await.unwrap(), 0);
    assert_eq!(f.reloads(), 0);
    assert!(!f.path("sshpiper.yaml").exists());
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let f = fixture().await;
    register(&f, "dup").await.unwrap();
    let err = register(&f, "dup").await.unwrap_err();
    assert!(matches!(err, RegistryError::NameConflict(_)));
    assert_eq!(f.registry.count().await.unwrap(), 1);
    assert_eq!(f.reloads(), 1);
}

#[tokio::test]
async fn full_pool_then_delete_frees_lowest_port() {
    let f = fixture().await;
    for name in ["a", "b", "c"] {
        register(&f, name).await.unwrap();
    }
    assert!(matches!(
        register(&f, "d").await.unwrap_err(),
        RegistryError::PoolExhausted { capacity: 3 }
    ));

    f.registry.delete("a").await.unwrap();
    assert_eq!(register(&f, "d").await.unwrap(), 10022);
}

#[tokio::test]
async fn delete_removes_key_file_and_credential_entry() {
    let f = fixture().await;
    register(&f, "keep").await.unwrap();
    register(&f, "drop").await.unwrap();
    assert!(f.path("keys/drop.pub").exists());

    let committed = f.registry.delete("drop").await.unwrap();
    assert_eq!(committed.value.name, "drop");
    assert!(committed.derived.is_fresh());

    assert!(!f.path("keys/drop.pub").exists());
    let auth = f.read("ssh/authorized_keys");
    assert!(!auth.contains(&key("drop")));
    assert!(auth.contains(&key("keep")));
    assert!(auth.starts_with(SERVER_KEY));
    assert!(!f.read("sshpiper.yaml").contains("\"drop\""));
}

#[tokio::test]
async fn delete_unknown_is_not_found() {
    let f = fixture().await;
    assert!(matches!(
        f.registry.delete("ghost").await.unwrap_err(),
        RegistryError::NotFound(_)
    ));
    assert_eq!(f.reloads(), 0);
}

#[tokio::test]
async fn rename_moves_key_and_regenerates() {
    let f = fixture().await;
    let port = register(&f, "old").await.unwrap();

    let committed = f.registry.rename("old", "new").await.unwrap();
    assert_eq!(committed.value.port, port);

    assert!(f.registry.get("old").await.unwrap().is_none());
    let got = f.registry.get("new").await.unwrap().unwrap();
    assert_eq!(got.public_key, key("old"));
    assert_eq!(got.owner, "alice");

    assert!(!f.path("keys/old.pub").exists());
    assert!(f.path("keys/new.pub").exists());
    assert!(f.read("sshpiper.yaml").contains("username: \"new\""));
    assert_eq!(f.reloads(), 2);
}

#[tokio::test]
async fn rename_validates_both_names() {
    let f = fixture().await;
    register(&f, "old").await.unwrap();
    assert!(matches!(
        f.registry.rename("old", "not valid").await.unwrap_err(),
        RegistryError::Validation(_)
    ));
    assert!(matches!(
        f.registry.rename("../etc", "fine").await.unwrap_err(),
        RegistryError::Validation(_)
    ));
}

#[tokio::test]
async fn rename_conflict_leaves_both_records() {
    let f = fixture().await;
    register(&f, "one").await.unwrap();
    register(&f, "two").await.unwrap();
    let before = f.registry.list().await.unwrap();

    assert!(matches!(
        f.registry.rename("one", "two").await.unwrap_err(),
        RegistryError::NameConflict(_)
    ));
    assert_eq!(f.registry.list().await.unwrap(), before);
}

#[tokio::test]
async fn heartbeat_updates_last_seen_without_reload() {
    let f = fixture().await;
    register(&f, "beat").await.unwrap();
    f.registry.heartbeat("beat").await.unwrap();

    let m = f.registry.get("beat").await.unwrap().unwrap();
    assert!(m.last_seen.is_some());
    assert_eq!(f.reloads(), 1);
    assert!(matches!(
        f.registry.heartbeat("ghost").await.unwrap_err(),
        RegistryError::NotFound(_)
    ));
}

#[tokio::test]
async fn artifact_failure_does_not_undo_registration() {
    let f = fixture().await;
    std::fs::remove_dir_all(f.path("keys")).unwrap();
    std::fs::write(f.path("keys"), "not a directory").unwrap();

    let committed = f
        .registry
        .register("laptop", "alice", "alice", &key("laptop"))
        .await
        .unwrap();
    assert!(matches!(committed.derived, DerivedState::Stale(ref e) if e.len() == 1));
    assert!(f.registry.get("laptop").await.unwrap().is_some());
    // Later steps still ran.
    assert!(f.read("sshpiper.yaml").contains("laptop"));
    assert_eq!(f.reloads(), 1);
}

#[tokio::test]
async fn routing_config_failure_still_revokes_credentials() {
    let f = fixture().await;
    register(&f, "keep").await.unwrap();
    register(&f, "gone").await.unwrap();
    assert!(f.read("ssh/authorized_keys").contains(&key("gone")));

    std::fs::remove_file(f.path("sshpiper.yaml")).unwrap();
    std::fs::create_dir_all(f.path("sshpiper.yaml/blocked")).unwrap();

    let committed = f.registry.delete("gone").await.unwrap();
    assert!(matches!(committed.derived, DerivedState::Stale(ref e) if e.len() == 1));

    let auth = f.read("ssh/authorized_keys");
    assert!(!auth.contains(&key("gone")));
    assert!(auth.contains(&key("keep")));
}

#[tokio::test]
async fn missing_server_key_marks_state_stale() {
    let f = fixture().await;
    std::fs::remove_file(f.path("server-key.pub")).unwrap();

    let committed = f
        .registry
        .register("laptop", "alice", "alice", &key("laptop"))
        .await
        .unwrap();
    assert!(!committed.derived.is_fresh());
    let auth = f.read("ssh/authorized_keys");
    assert!(auth.starts_with("permitlisten=\"localhost:10022\""));
}

#[tokio::test]
async fn regenerate_all_restores_deleted_artifacts() {
    let f = fixture().await;
    register(&f, "a").await.unwrap();
    register(&f, "b").await.unwrap();
    std::fs::remove_file(f.path("keys/a.pub")).unwrap();
    std::fs::remove_file(f.path("sshpiper.yaml")).unwrap();

    assert!(f.registry.regenerate_all().await.is_fresh());
    assert!(f.path("keys/a.pub").exists());
    let config = f.read("sshpiper.yaml");
    assert!(config.find("\"a\"") < config.find("\"b\""));
}

#[tokio::test]
async fn concurrent_registrations_get_distinct_ports() {
    let f = fixture_with_pool(PortPool::new(20000, 20019).unwrap()).await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let registry = Arc::clone(&f.registry);
        handles.push(tokio::spawn(async move {
            registry
                .register(&format!("m{i}"), "alice", "alice", &key(&format!("m{i}")))
                .await
                .map(|c| c.value.port)
        }));
    }

    let mut ports = Vec::new();
    for handle in handles {
        ports.push(handle.await.unwrap().unwrap());
    }
    ports.sort_unstable();
    assert_eq!(ports, (20000..20020).collect::<Vec<u16>>());

    let listed: Vec<u16> = f
        .registry
        .list()
        .await
        .unwrap()
        .iter()
        .map(|m| m.port)
        .collect();
    assert_eq!(listed, ports);
}
