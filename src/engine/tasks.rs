// ── Background Tasks ───────────────────────────────────────────────────────
//
// Periodic upkeep that shares the same locks as foreground work:
//   • L1 maintenance: decay-driven demotions and TTL evictions
//   • consolidation: dense clusters → crystal facts
//   • pending-update sweep: expired knowledge confirmations
//   • link reconciler: retries crystal_links rows that failed their write
//
// Each loop is its own tokio task; `shutdown` aborts all of them. Errors
// inside a tick are logged and the loop keeps running.

use crate::engine::knowledge::KnowledgeEngine;
use crate::engine::manager::MemoryManager;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Intervals for the periodic loops, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub maintenance_interval_secs: u64,
    pub consolidation_interval_secs: u64,
    pub pending_sweep_interval_secs: u64,
    pub reconcile_interval_secs: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            maintenance_interval_secs: 60,
            consolidation_interval_secs: 3600,
            pending_sweep_interval_secs: 30,
            reconcile_interval_secs: 30,
        }
    }
}

/// Handles for the running loops. Dropping without `shutdown` detaches
/// them; call `shutdown` during orderly teardown.
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Spawn all four loops.
    pub fn spawn(
        manager: Arc<MemoryManager>,
        knowledge: Arc<KnowledgeEngine>,
        config: TaskConfig,
    ) -> Self {
        let mut handles = Vec::new();

        {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(Duration::from_secs(config.maintenance_interval_secs));
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = manager.run_maintenance().await {
                        warn!("[tasks] Maintenance tick failed: {}", e);
                    }
                }
            }));
        }

        {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(Duration::from_secs(config.consolidation_interval_secs));
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    match manager.run_consolidation().await {
                        Ok(created) if created > 0 => {
                            info!("[tasks] Consolidation created {} fact(s)", created)
                        }
                        Ok(_) => {}
                        Err(e) => warn!("[tasks] Consolidation tick failed: {}", e),
                    }
                }
            }));
        }

        {
            let knowledge = Arc::clone(&knowledge);
            handles.push(tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(Duration::from_secs(config.pending_sweep_interval_secs));
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    knowledge.sweep_expired();
                }
            }));
        }

        {
            handles.push(tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(Duration::from_secs(config.reconcile_interval_secs));
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = manager.reconcile_links().await {
                        warn!("[tasks] Link reconciliation tick failed: {}", e);
                    }
                }
            }));
        }

        info!("[tasks] Background tasks started");
        Self { handles }
    }

    /// Abort every loop. Safe to call more than once.
    pub fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        info!("[tasks] Background tasks stopped");
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.shutdown();
    }
}
