//! Stress tests for Tessera.
//!
//! These tests verify behavior under heavy load and concurrent access
//! from several handles on one store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tessera_core::{Config, CoreError, QueryArg, Realm, Registry, UpdateMode};

use crate::fixtures::person;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Number of distinct people the operations cycle over.
    pub object_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            object_count: 1_000,
        }
    }
}

fn tally(results: impl IntoIterator<Item = Result<(), CoreError>>) -> (usize, usize) {
    results
        .into_iter()
        .fold((0, 0), |(ok, err), r| if r.is_ok() { (ok + 1, err) } else { (ok, err + 1) })
}

fn upsert(realm: &Realm, id: usize) -> Result<(), CoreError> {
    let id = id as i64;
    realm.write(|| {
        realm.create_with_mode("Person", person(id, &format!("p{id}"), id % 90), UpdateMode::Modified)?;
        Ok(())
    })
}

/// Run a sequential upsert stress test. One transaction per operation.
pub fn stress_sequential_writes(realm: &Realm, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let (ok, err) = tally((0..config.operations).map(|i| upsert(realm, i % config.object_count)));
    StressTestResult::new(ok, err, start.elapsed())
}

/// Run a mixed stress test: upserts, primary key reads, queries and
/// deletes in equal parts.
pub fn stress_mixed_operations(realm: &Realm, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let (ok, err) = tally((0..config.operations).map(|i| {
        let id = i % config.object_count;
        match i % 4 {
            0 => upsert(realm, id),
            1 => realm.object_for_primary_key("Person", id as i64).map(|_| ()),
            2 => realm
                .objects("Person")
                .and_then(|all| all.filtered("age > $0", &[QueryArg::from((id % 90) as i64)]))
                .and_then(|r| r.len())
                .map(|_| ()),
            _ => realm.write(|| {
                if let Some(p) = realm.object_for_primary_key("Person", id as i64)? {
                    realm.delete(&p)?;
                }
                Ok(())
            }),
        }
    }));
    StressTestResult::new(ok, err, start.elapsed())
}

/// Run a concurrent writer stress test. Every thread opens its own handle
/// on the store described by `config` and inserts a disjoint id range.
pub fn stress_concurrent_writers(
    registry: &Registry,
    realm_config: &Config,
    config: &StressConfig,
) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let registry = registry.clone();
            let realm_config = realm_config.clone();
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);

            thread::spawn(move || {
                let realm = registry.open(realm_config).expect("Failed to open handle");
                for i in 0..ops_per_thread {
                    let id = (t * ops_per_thread + i) as i64;
                    let result = realm.write(|| {
                        realm.create("Person", person(id, "writer", (t % 90) as i64))?;
                        Ok(())
                    });
                    let counter = if result.is_ok() { &successful } else { &failed };
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                realm.close();
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run a concurrent read stress test while the calling thread keeps
/// committing. Readers refresh and count the table.
pub fn stress_concurrent_reads(
    registry: &Registry,
    realm_config: &Config,
    writer: &Realm,
    config: &StressConfig,
) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let registry = registry.clone();
            let realm_config = realm_config.clone();
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);

            thread::spawn(move || {
                let realm = registry.open(realm_config).expect("Failed to open handle");
                let people = realm.objects("Person").expect("Failed to query");
                let mut last = 0;
                for _ in 0..ops_per_thread {
                    realm.refresh();
                    match people.len() {
                        // Snapshots only move forward.
                        Ok(n) if n >= last => {
                            last = n;
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        _ => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                realm.close();
            })
        })
        .collect();

    for id in 0..config.object_count {
        let _ = upsert(writer, id);
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run a transaction abort stress test. Every other write fails from
/// inside its body and must roll back.
pub fn stress_transaction_aborts(realm: &Realm, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let (ok, err) = tally((0..config.operations).map(|i| {
        realm.write(|| {
            realm.create_with_mode("Person", person(i as i64, "abort", 1), UpdateMode::Modified)?;
            if i % 2 == 0 {
                Err(CoreError::callback("intentional"))
            } else {
                Ok(())
            }
        })
    }));
    StressTestResult::new(ok, err, start.elapsed())
}

/// Run a large transaction stress test: 100 objects per commit.
pub fn stress_large_transactions(realm: &Realm, config: &StressConfig) -> StressTestResult {
    const BATCH: usize = 100;
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for batch in 0..(config.operations / BATCH) {
        let result = realm.write(|| {
            for i in 0..BATCH {
                let id = (batch * BATCH + i) as i64;
                realm.create_with_mode("Person", person(id, "bulk", id % 90), UpdateMode::Modified)?;
            }
            Ok(())
        });
        match result {
            Ok(()) => successful += BATCH,
            Err(_) => failed += BATCH,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{people_schema, TestRealm};

    fn small() -> StressConfig {
        StressConfig {
            operations: 400,
            threads: 4,
            object_count: 50,
        }
    }

    #[test]
    fn test_sequential_writes() {
        let t = TestRealm::memory(people_schema());
        let result = stress_sequential_writes(&t, &small());
        assert_eq!(result.failed_ops, 0);
        assert_eq!(t.objects("Person").unwrap().len().unwrap(), 50);
    }

    #[test]
    fn test_mixed_operations() {
        let t = TestRealm::memory(people_schema());
        let result = stress_mixed_operations(&t, &small());
        assert_eq!(result.failed_ops, 0);
    }

    #[test]
    fn test_concurrent_writers() {
        let t = TestRealm::memory(people_schema());
        let config = small();
        let result = stress_concurrent_writers(&t.registry, t.config(), &config);
        assert_eq!(result.failed_ops, 0);
        t.refresh();
        assert_eq!(t.objects("Person").unwrap().len().unwrap(), config.operations);
    }

    #[test]
    fn test_concurrent_reads() {
        let t = TestRealm::memory(people_schema());
        let result = stress_concurrent_reads(&t.registry, t.config(), &t, &small());
        assert_eq!(result.failed_ops, 0);
    }

    #[test]
    fn test_transaction_aborts() {
        let t = TestRealm::memory(people_schema());
        let config = StressConfig {
            operations: 100,
            ..small()
        };
        let result = stress_transaction_aborts(&t, &config);
        assert_eq!(result.successful_ops, 50);
        assert_eq!(result.failed_ops, 50);
        assert_eq!(t.objects("Person").unwrap().len().unwrap(), 50);
        assert!(!t.is_in_transaction());
    }

    #[test]
    fn test_large_transactions() {
        let t = TestRealm::memory(people_schema());
        let result = stress_large_transactions(&t, &StressConfig { operations: 1_000, ..small() });
        assert_eq!(result.failed_ops, 0);
        assert_eq!(t.objects("Person").unwrap().len().unwrap(), 1_000);
    }
}
