//! End-to-end integration tests
//!
//! Drives real TCP servers with the blocking client through the literal
//! protocol scenarios: single node with and without WAL, restart
//! persistence, and a primary/replica pair.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use latticekv::config::Config;
use latticekv::network::{Client, Server, ServerOptions, ShutdownHandle};
use latticekv::replication::{ReplicaType, ReplicationConfig};
use latticekv::wal::WalConfig;
use latticekv::{Storage, StorageOptions};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

struct TestServer {
    addr: SocketAddr,
    storage: Arc<Storage>,
    shutdown: ShutdownHandle,
    handle: Option<JoinHandle<()>>,
}

fn start_server(options: StorageOptions) -> TestServer {
    let storage = Arc::new(Storage::open(options).unwrap());

    let mut server = Server::new(
        ServerOptions {
            address: "127.0.0.1:0".to_string(),
            max_connections: 16,
            max_message_size: 4096,
            idle_timeout: Duration::from_secs(60),
        },
        Arc::clone(&storage),
    );

    let addr = server.bind().unwrap();
    let shutdown = server.shutdown_handle();
    let handle = thread::spawn(move || server.run().unwrap());

    TestServer {
        addr,
        storage,
        shutdown,
        handle: Some(handle),
    }
}

impl TestServer {
    fn client(&self) -> Client {
        Client::connect(&self.addr.to_string(), Duration::from_secs(5)).unwrap()
    }

    fn stop(mut self) {
        self.shutdown.shutdown();
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
        self.storage.close();
    }
}

fn wal_options(dir: &Path) -> StorageOptions {
    StorageOptions {
        wal: Some(WalConfig {
            flushing_batch_size: 100,
            flushing_batch_timeout: Duration::from_millis(10),
            max_segment_size: 10 << 20,
            data_directory: dir.to_path_buf(),
        }),
        replication: None,
    }
}

/// Reserve a listen address for a component started later
fn free_port_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

/// Poll the server until a GET returns the expected reply
fn wait_for_reply(client: &mut Client, request: &str, expected: &str, deadline: Duration) {
    let started = Instant::now();
    loop {
        if client.send(request).unwrap() == expected {
            return;
        }
        if started.elapsed() > deadline {
            panic!("no {:?} reply to {:?} within {:?}", expected, request, deadline);
        }
        thread::sleep(Duration::from_millis(10));
    }
}

// =============================================================================
// Single Node (S1)
// =============================================================================

#[test]
fn test_single_node_without_wal() {
    let server = start_server(StorageOptions::default());
    let mut client = server.client();

    assert_eq!(client.send("SET a 1").unwrap(), "OK");
    assert_eq!(client.send("GET a").unwrap(), "1");
    assert_eq!(client.send("DEL a").unwrap(), "OK");
    assert_eq!(client.send("GET a").unwrap(), "ERROR: key not found");

    server.stop();
}

#[test]
fn test_malformed_commands_get_error_replies() {
    let server = start_server(StorageOptions::default());
    let mut client = server.client();

    assert!(client.send("SET onlykey").unwrap().starts_with("ERROR: "));
    assert!(client.send("PING").unwrap().starts_with("ERROR: "));
    assert!(client.send("get a").unwrap().starts_with("ERROR: "));

    server.stop();
}

#[test]
fn test_concurrent_clients() {
    let server = start_server(StorageOptions::default());

    let mut handles = vec![];
    for t in 0..4 {
        let addr = server.addr;
        handles.push(thread::spawn(move || {
            let mut client =
                Client::connect(&addr.to_string(), Duration::from_secs(5)).unwrap();
            for i in 0..50 {
                let key = format!("client{}_key{}", t, i);
                assert_eq!(client.send(&format!("SET {} {}", key, i)).unwrap(), "OK");
                assert_eq!(client.send(&format!("GET {}", key)).unwrap(), i.to_string());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    server.stop();
}

// =============================================================================
// Restart Persistence (S2, S3)
// =============================================================================

#[test]
fn test_restart_recovers_sets() {
    let dir = TempDir::new().unwrap();

    {
        let server = start_server(wal_options(dir.path()));
        let mut client = server.client();
        assert_eq!(client.send("SET x hello").unwrap(), "OK");
        assert_eq!(client.send("SET y world").unwrap(), "OK");
        server.stop();
    }

    let server = start_server(wal_options(dir.path()));
    let mut client = server.client();
    assert_eq!(client.send("GET x").unwrap(), "hello");
    assert_eq!(client.send("GET y").unwrap(), "world");
    server.stop();
}

#[test]
fn test_restart_recovers_deletes() {
    let dir = TempDir::new().unwrap();

    {
        let server = start_server(wal_options(dir.path()));
        let mut client = server.client();
        assert_eq!(client.send("SET x hello").unwrap(), "OK");
        assert_eq!(client.send("SET y world").unwrap(), "OK");
        assert_eq!(client.send("DEL x").unwrap(), "OK");
        server.stop();
    }

    let server = start_server(wal_options(dir.path()));
    let mut client = server.client();
    assert_eq!(client.send("GET x").unwrap(), "ERROR: key not found");
    assert_eq!(client.send("GET y").unwrap(), "world");
    server.stop();
}

// =============================================================================
// Primary → Replica (S4)
// =============================================================================

#[test]
fn test_primary_replica_pair_over_tcp() {
    let primary_dir = TempDir::new().unwrap();
    let replica_dir = TempDir::new().unwrap();
    let master_addr = free_port_addr();

    let mut primary_options = wal_options(primary_dir.path());
    primary_options.replication = Some(ReplicationConfig {
        replica_type: ReplicaType::Master,
        master_address: master_addr.clone(),
        sync_interval: Duration::from_millis(50),
        max_connections: 4,
    });
    let primary = start_server(primary_options);

    // All writes land on the primary before the replica ever syncs
    let mut client = primary.client();
    assert_eq!(client.send("SET k1 v1").unwrap(), "OK");
    assert_eq!(client.send("SET k2 v2").unwrap(), "OK");
    assert_eq!(client.send("DEL k1").unwrap(), "OK");

    let mut replica_options = wal_options(replica_dir.path());
    replica_options.replication = Some(ReplicationConfig {
        replica_type: ReplicaType::Slave,
        master_address: master_addr,
        sync_interval: Duration::from_millis(50),
        max_connections: 4,
    });
    let replica = start_server(replica_options);

    let mut replica_client = replica.client();
    wait_for_reply(&mut replica_client, "GET k2", "v2", Duration::from_secs(3));
    assert_eq!(
        replica_client.send("GET k1").unwrap(),
        "ERROR: key not found"
    );
    assert_eq!(
        replica_client.send("SET k3 v3").unwrap(),
        "ERROR: write operations not allowed on slave replica"
    );

    replica.stop();
    primary.stop();
}

// =============================================================================
// Config File
// =============================================================================

#[test]
fn test_config_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");

    std::fs::write(
        &path,
        r#"
engine:
  type: in_memory
network:
  address: "127.0.0.1:4100"
  max_connections: 10
  max_message_size: 2KB
  idle_timeout: 30s
logging:
  level: debug
  output: stderr
wal:
  enabled: true
  flushing_batch_size: 50
  flushing_batch_timeout: 5ms
  max_segment_size: 1MB
  data_directory: /tmp/lattice-test-wal
replication:
  enabled: true
  replica_type: slave
  master_address: "127.0.0.1:4200"
  sync_interval: 2s
"#,
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    config.validate().unwrap();

    assert_eq!(config.network.address, "127.0.0.1:4100");
    assert_eq!(config.network.max_connections, 10);
    assert_eq!(config.message_buffer_size(), 2048);
    assert_eq!(config.network.idle_timeout, Duration::from_secs(30));
    assert_eq!(config.logging.level, "debug");

    let wal = config.wal_config().unwrap().unwrap();
    assert_eq!(wal.flushing_batch_size, 50);
    assert_eq!(wal.flushing_batch_timeout, Duration::from_millis(5));
    assert_eq!(wal.max_segment_size, 1 << 20);

    let replication = config.replication_config().unwrap();
    assert_eq!(replication.replica_type, ReplicaType::Slave);
    assert_eq!(replication.master_address, "127.0.0.1:4200");
    assert_eq!(replication.sync_interval, Duration::from_secs(2));
    // The primary's admission cap comes from the network section
    assert_eq!(replication.max_connections, 10);
}

#[test]
fn test_config_missing_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    assert!(Config::load(&dir.path().join("nope.yaml")).is_err());
}
