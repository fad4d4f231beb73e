//! Tests for primary/replica replication
//!
//! These tests verify:
//! - Replica catch-up from a seeded primary, byte-identical segments
//! - Read-only enforcement on replicas
//! - Idempotent re-sync after a replica restart
//! - Prompt close of the sync loop
//! - Primary failure responses on malformed requests

use std::fs;
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::time::{Duration, Instant};

use latticekv::replication::{
    Primary, ReplicaType, ReplicationConfig, SyncResponse,
};
use latticekv::wal::{self, Wal, WalConfig};
use latticekv::{LatticeError, Storage, StorageOptions};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const SYNC_INTERVAL: Duration = Duration::from_millis(50);

fn wal_config(dir: &Path) -> WalConfig {
    WalConfig {
        flushing_batch_size: 100,
        flushing_batch_timeout: Duration::from_millis(10),
        max_segment_size: 10 << 20,
        data_directory: dir.to_path_buf(),
    }
}

/// Seed a primary WAL directory with one sealed segment:
/// SET k1 v1; SET k2 v2; DEL k1
fn seed_primary(dir: &Path) {
    let wal = Wal::open(wal_config(dir)).unwrap();
    wal.append_set("k1", "v1").wait().unwrap();
    wal.append_set("k2", "v2").wait().unwrap();
    wal.append_delete("k1").wait().unwrap();
    wal.close();
}

fn start_primary(dir: &Path) -> Primary {
    Primary::start("127.0.0.1:0", dir.to_path_buf(), 4).unwrap()
}

fn replica_options(dir: &Path, master: SocketAddr) -> StorageOptions {
    StorageOptions {
        wal: Some(wal_config(dir)),
        replication: Some(ReplicationConfig {
            replica_type: ReplicaType::Slave,
            master_address: master.to_string(),
            sync_interval: SYNC_INTERVAL,
            max_connections: 4,
        }),
    }
}

/// Poll until the replica serves the expected value or the deadline passes
fn wait_for_value(storage: &Storage, key: &str, expected: &str, deadline: Duration) {
    let started = Instant::now();
    loop {
        if let Ok(value) = storage.get(key) {
            if value == expected {
                return;
            }
        }
        if started.elapsed() > deadline {
            panic!("replica did not catch up on {} within {:?}", key, deadline);
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

// =============================================================================
// Catch-up
// =============================================================================

#[test]
fn test_replica_catches_up_from_seeded_primary() {
    let primary_dir = TempDir::new().unwrap();
    let replica_dir = TempDir::new().unwrap();
    seed_primary(primary_dir.path());

    let mut primary = start_primary(primary_dir.path());
    let replica = Storage::open(replica_options(replica_dir.path(), primary.local_addr())).unwrap();

    wait_for_value(&replica, "k2", "v2", SYNC_INTERVAL * 5 + Duration::from_secs(2));
    assert!(matches!(replica.get("k1"), Err(LatticeError::KeyNotFound)));

    // The replica stores the segment byte-for-byte
    let primary_bytes = fs::read(primary_dir.path().join("wal_0.log")).unwrap();
    let replica_bytes = fs::read(replica_dir.path().join("wal_0.log")).unwrap();
    assert_eq!(primary_bytes, replica_bytes);

    replica.close();
    primary.close();
}

#[test]
fn test_replica_catches_up_across_many_segments() {
    let primary_dir = TempDir::new().unwrap();
    let replica_dir = TempDir::new().unwrap();

    // Small segments: 20 records spread over many files, crossing the
    // wal_10 boundary where lexicographic ordering would break
    {
        let mut config = wal_config(primary_dir.path());
        config.max_segment_size = 120;
        let wal = Wal::open(config).unwrap();
        for i in 0..20 {
            wal.append_set(&format!("key{}", i), &format!("value{}", i))
                .wait()
                .unwrap();
        }
        wal.close();
    }
    let primary_segments = wal::list_segments(primary_dir.path()).unwrap();
    assert!(primary_segments.len() >= 3);

    let mut primary = start_primary(primary_dir.path());
    let replica = Storage::open(replica_options(replica_dir.path(), primary.local_addr())).unwrap();

    // One segment ships per sync cycle; the last key arrives last
    let deadline = SYNC_INTERVAL * (primary_segments.len() as u32 + 5);
    wait_for_value(&replica, "key19", "value19", deadline + Duration::from_secs(2));

    for i in 0..20 {
        assert_eq!(
            replica.get(&format!("key{}", i)).unwrap(),
            format!("value{}", i)
        );
    }

    // Same segments, same order, same bytes
    let replica_segments = wal::list_segments(replica_dir.path()).unwrap();
    assert_eq!(primary_segments, replica_segments);

    replica.close();
    primary.close();
}

// =============================================================================
// Read-only Enforcement
// =============================================================================

#[test]
fn test_replica_rejects_writes() {
    let primary_dir = TempDir::new().unwrap();
    let replica_dir = TempDir::new().unwrap();
    seed_primary(primary_dir.path());

    let mut primary = start_primary(primary_dir.path());
    let replica = Storage::open(replica_options(replica_dir.path(), primary.local_addr())).unwrap();
    assert!(!replica.is_master());

    let err = replica.set("k3", "v3").unwrap_err();
    assert!(matches!(err, LatticeError::WriteOnReplica));
    assert_eq!(
        err.to_string(),
        "write operations not allowed on slave replica"
    );
    assert!(matches!(
        replica.delete("k2"),
        Err(LatticeError::WriteOnReplica)
    ));

    // Reads still serve replicated state
    wait_for_value(&replica, "k2", "v2", SYNC_INTERVAL * 5 + Duration::from_secs(2));

    replica.close();
    primary.close();
}

// =============================================================================
// Idempotent Re-sync
// =============================================================================

#[test]
fn test_replica_restart_transfers_nothing_new() {
    let primary_dir = TempDir::new().unwrap();
    let replica_dir = TempDir::new().unwrap();
    seed_primary(primary_dir.path());

    let mut primary = start_primary(primary_dir.path());

    {
        let replica =
            Storage::open(replica_options(replica_dir.path(), primary.local_addr())).unwrap();
        wait_for_value(&replica, "k2", "v2", SYNC_INTERVAL * 5 + Duration::from_secs(2));
        replica.close();
    }

    let segment_path = replica_dir.path().join("wal_0.log");
    let modified_before = fs::metadata(&segment_path).unwrap().modified().unwrap();

    // Restart with last_segment preserved on disk
    let replica = Storage::open(replica_options(replica_dir.path(), primary.local_addr())).unwrap();

    // Local replay alone restores the engine
    assert_eq!(replica.get("k2").unwrap(), "v2");
    assert!(matches!(replica.get("k1"), Err(LatticeError::KeyNotFound)));

    // Give the sync loop several cycles to (not) fetch anything
    std::thread::sleep(SYNC_INTERVAL * 5 + Duration::from_secs(2));

    assert_eq!(
        wal::list_segments(replica_dir.path()).unwrap(),
        vec!["wal_0.log"]
    );
    let modified_after = fs::metadata(&segment_path).unwrap().modified().unwrap();
    assert_eq!(
        modified_before, modified_after,
        "segment was re-transferred on restart"
    );

    replica.close();
    primary.close();
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_replica_close_is_prompt() {
    let primary_dir = TempDir::new().unwrap();
    let replica_dir = TempDir::new().unwrap();
    seed_primary(primary_dir.path());

    let mut primary = start_primary(primary_dir.path());
    let replica = Storage::open(replica_options(replica_dir.path(), primary.local_addr())).unwrap();
    wait_for_value(&replica, "k2", "v2", SYNC_INTERVAL * 5 + Duration::from_secs(2));

    let started = Instant::now();
    replica.close();
    assert!(
        started.elapsed() < Duration::from_millis(1500),
        "replica close took {:?}",
        started.elapsed()
    );

    let started = Instant::now();
    primary.close();
    assert!(
        started.elapsed() < Duration::from_millis(1500),
        "primary close took {:?}",
        started.elapsed()
    );
}

// =============================================================================
// Protocol Failures
// =============================================================================

#[test]
fn test_primary_answers_garbage_with_failure_response() {
    let primary_dir = TempDir::new().unwrap();
    seed_primary(primary_dir.path());
    let mut primary = start_primary(primary_dir.path());

    let mut stream = TcpStream::connect(primary.local_addr()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    // Correctly framed, but the body is not a request
    let body = b"this is not json";
    stream
        .write_all(&(body.len() as u32).to_be_bytes())
        .unwrap();
    stream.write_all(body).unwrap();

    let response: SyncResponse =
        latticekv::replication::read_message(&mut stream, 1 << 20).unwrap();
    assert!(!response.succeed);
    assert!(!response.error.is_empty());

    primary.close();
}
