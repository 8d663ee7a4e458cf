//! Claim protocol integration tests.
//!
//! Several workers, each with its own connection to the same database file,
//! race to claim from one queue. Every ticket must be claimed exactly once.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use spawnpool_core::{
    testing::fixtures, Priority, SqliteTicketStore, TicketFilter, TicketStatus, TicketStore,
};

const WORKERS: usize = 6;
const TICKETS: usize = 40;

fn open_store(path: &std::path::Path) -> SqliteTicketStore {
    SqliteTicketStore::with_busy_timeout(path, Duration::from_secs(10))
        .expect("Failed to open ticket store")
}

#[test]
fn test_concurrent_claims_are_exclusive() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("queue.db");

    let seed = open_store(&db_path);
    for i in 0..TICKETS {
        seed.create(fixtures::defect(&format!("defect {}", i), Priority::P2))
            .unwrap();
    }

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|n| {
            let path = db_path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let store = open_store(&path);
                let worker_id = format!("worker-{}", n);
                barrier.wait();

                let mut claimed = Vec::new();
                while let Some(ticket) = store.claim(&worker_id, 1000 + n as u32, None).unwrap() {
                    assert_eq!(ticket.assigned_to.as_deref(), Some(worker_id.as_str()));
                    claimed.push(ticket.id);
                }
                claimed
            })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in handles {
        for id in handle.join().expect("worker thread panicked") {
            assert!(seen.insert(id), "ticket {} claimed twice", id);
            total += 1;
        }
    }
    assert_eq!(total, TICKETS);

    let in_progress = seed
        .count(&TicketFilter::new().with_status(TicketStatus::InProgress))
        .unwrap();
    assert_eq!(in_progress, TICKETS as i64);
    assert_eq!(seed.count_claimable(None).unwrap(), 0);
}

#[test]
fn test_more_claimants_than_tickets() {
    const CLAIMANTS: usize = 8;
    const AVAILABLE: usize = 3;

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("queue.db");

    let seed = open_store(&db_path);
    for i in 0..AVAILABLE {
        seed.create(fixtures::defect(&format!("scarce {}", i), Priority::P1))
            .unwrap();
    }

    let barrier = Arc::new(Barrier::new(CLAIMANTS));
    let handles: Vec<_> = (0..CLAIMANTS)
        .map(|n| {
            let path = db_path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let store = open_store(&path);
                barrier.wait();
                store
                    .claim(&format!("claimant-{}", n), 2000 + n as u32, None)
                    .unwrap()
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("claimant thread panicked"))
        .collect();

    let won: HashSet<_> = results.iter().flatten().map(|ticket| ticket.id).collect();
    let winners = results.iter().filter(|r| r.is_some()).count();
    let empty = results.iter().filter(|r| r.is_none()).count();

    assert_eq!(winners, AVAILABLE);
    assert_eq!(won.len(), AVAILABLE, "a ticket went to two claimants");
    assert_eq!(empty, CLAIMANTS - AVAILABLE);
    assert_eq!(seed.count_claimable(None).unwrap(), 0);
}

#[test]
fn test_claim_order_is_priority_then_age() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = open_store(&temp_dir.path().join("queue.db"));

    let low = store
        .create(fixtures::defect("cosmetic glitch", Priority::P3))
        .unwrap();
    let first_high = store
        .create(fixtures::defect("data loss", Priority::P0))
        .unwrap();
    let second_high = store
        .create(fixtures::defect("crash on save", Priority::P0))
        .unwrap();

    let order: Vec<_> = std::iter::from_fn(|| store.claim("w1", 1, None).unwrap())
        .map(|ticket| ticket.id)
        .collect();
    assert_eq!(order, vec![first_high.id, second_high.id, low.id]);
}

#[test]
fn test_released_ticket_is_claimable_by_another_worker() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("queue.db");
    let a = open_store(&db_path);
    let b = open_store(&db_path);

    a.create(fixtures::change_request("add export")).unwrap();
    let ticket = a.claim("worker-a", 1, None).unwrap().unwrap();
    assert!(b.claim("worker-b", 2, None).unwrap().is_none());

    assert!(a.release(ticket.id, "worker-a", Some("agent crashed")).unwrap());
    let reclaimed = b.claim("worker-b", 2, None).unwrap().unwrap();
    assert_eq!(reclaimed.id, ticket.id);
    assert_eq!(reclaimed.metadata["failure_history"][0]["error"], "agent crashed");
}
