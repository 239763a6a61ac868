//! Named mutex registry serializing regenerate-and-overwrite runs.
//!
//! One mutex per coarse resource category, not per record key: every run of the
//! same kind is totally ordered, runs of different kinds proceed in parallel. A run
//! that reads what another kind writes holds both categories via
//! [`ConcurrencyGuard::with_locks`].

use log::debug;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

/// The kinds of regenerate-and-overwrite operation the pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceCategory {
    /// Per-team summary, expense classification, estimate and questions.
    TeamStageAnalysis,
    /// Stage-wide revenue distribution, ranking and financial snapshots.
    StageSummaryRegeneration,
}

impl ResourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceCategory::TeamStageAnalysis => "team-stage-analysis",
            ResourceCategory::StageSummaryRegeneration => "stage-summary-regeneration",
        }
    }
}

impl AsRef<str> for ResourceCategory {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Explicit, injectable registry of named mutexes. Construct once and share via `Arc`.
#[derive(Default)]
pub struct ConcurrencyGuard {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, category: &str) -> Arc<AsyncMutex<()>> {
        // The registry map is only touched for lookups, never held across an await.
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(category.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Runs `f` while holding the mutex for `category`.
    ///
    /// The mutex is released on every exit path, including errors, panics and the
    /// returned future being dropped.
    pub async fn with_lock<C, F, Fut, T>(&self, category: C, f: F) -> T
    where
        C: AsRef<str>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let category = category.as_ref();
        let handle = self.handle(category);

        debug!("Waiting for lock '{}'", category);
        let _held = handle.lock().await;
        debug!("Acquired lock '{}'", category);

        let result = f().await;

        debug!("Releasing lock '{}'", category);
        result
    }

    /// Runs `f` while holding the mutexes of every listed category.
    ///
    /// Mutexes are always taken in name order, so callers that hold several
    /// categories can never wait on each other in a cycle.
    pub async fn with_locks<C, F, Fut, T>(&self, categories: &[C], f: F) -> T
    where
        C: AsRef<str>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut names: Vec<&str> = categories.iter().map(|c| c.as_ref()).collect();
        names.sort_unstable();
        names.dedup();
        let handles: Vec<(&str, Arc<AsyncMutex<()>>)> =
            names.into_iter().map(|name| (name, self.handle(name))).collect();

        let mut held = Vec::with_capacity(handles.len());
        for (name, handle) in &handles {
            debug!("Waiting for lock '{}'", name);
            held.push(handle.lock().await);
            debug!("Acquired lock '{}'", name);
        }

        let result = f().await;

        drop(held);
        debug!("Released {} locks", handles.len());
        result
    }

    /// Whether the named mutex is currently held.
    pub fn is_locked(&self, category: impl AsRef<str>) -> bool {
        self.handle(category.as_ref()).try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_releases_after_error() {
        let guard = ConcurrencyGuard::new();
        let result: std::result::Result<(), &str> = guard
            .with_lock(ResourceCategory::TeamStageAnalysis, || async { Err("boom") })
            .await;
        assert!(result.is_err());
        assert!(!guard.is_locked(ResourceCategory::TeamStageAnalysis));
    }

    #[tokio::test]
    async fn test_held_during_closure() {
        let guard = ConcurrencyGuard::new();
        let seen = guard
            .with_lock("stage-summary-regeneration", || async {
                guard.is_locked(ResourceCategory::StageSummaryRegeneration)
            })
            .await;
        assert!(seen);
        assert!(!guard.is_locked(ResourceCategory::StageSummaryRegeneration));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_category_never_overlaps() {
        let guard = Arc::new(ConcurrencyGuard::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let guard = guard.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                guard
                    .with_lock(ResourceCategory::StageSummaryRegeneration, || async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_different_categories_run_in_parallel() {
        let guard = Arc::new(ConcurrencyGuard::new());
        let inner = guard.clone();

        guard
            .with_lock(ResourceCategory::TeamStageAnalysis, || async move {
                // Acquiring another category while one is held must not block.
                tokio::time::timeout(
                    Duration::from_secs(1),
                    inner.with_lock(ResourceCategory::StageSummaryRegeneration, || async {}),
                )
                .await
                .expect("different category should not wait");
            })
            .await;
    }

    #[tokio::test]
    async fn test_with_locks_holds_every_category() {
        let guard = ConcurrencyGuard::new();
        let categories = [
            ResourceCategory::TeamStageAnalysis,
            ResourceCategory::StageSummaryRegeneration,
        ];
        let seen = guard
            .with_locks(&categories, || async {
                categories.iter().all(|c| guard.is_locked(c))
            })
            .await;
        assert!(seen);
        assert!(categories.iter().all(|c| !guard.is_locked(c)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_with_locks_excludes_single_category_holders() {
        let guard = Arc::new(ConcurrencyGuard::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..8 {
            let guard = guard.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let work = || async {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                };
                if i % 2 == 0 {
                    guard
                        .with_locks(
                            &[
                                ResourceCategory::StageSummaryRegeneration,
                                ResourceCategory::TeamStageAnalysis,
                            ],
                            work,
                        )
                        .await;
                } else {
                    guard
                        .with_lock(ResourceCategory::TeamStageAnalysis, work)
                        .await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
