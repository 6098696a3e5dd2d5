//! Holds [`QueueRedeclarer`]'s implementation (C8): on restart, re-declares
//! missing queues/exchanges/bindings through an [`Admin`] before a worker
//! (re)starts, per spec §4.8.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::admin::Admin;
use crate::error::Error;

/// Decides whether, and how, to ask an [`Admin`] to re-declare topology
/// before a worker starts or restarts.
pub struct QueueRedeclarer {
    /// The admin used to inspect/re-declare topology, if auto-declare is on.
    admin: Option<Arc<dyn Admin>>,
    /// Whether a missing queue's mismatched arguments should be fatal.
    mismatched_queues_fatal: bool,
}

impl QueueRedeclarer {
    /// Creates a redeclarer. `admin` is `None` when `auto_declare` is off.
    pub fn new(admin: Option<Arc<dyn Admin>>, mismatched_queues_fatal: bool) -> Self {
        Self {
            admin,
            mismatched_queues_fatal,
        }
    }

    /// Ensures `queue_names` exist on the broker before a worker (re)starts.
    ///
    /// If no [`Admin`] is configured, this is a no-op (the caller's queues
    /// are assumed to be declared by other means). Otherwise: if any
    /// configured queue is absent, or if `mismatched_queues_fatal` is set
    /// (in which case we always re-declare defensively), calls
    /// [`Admin::initialize`]. Declarations are assumed idempotent, per spec
    /// §4.8.
    pub async fn ensure_declared(&self, queue_names: &[String]) -> Result<(), Error> {
        let Some(admin) = &self.admin else {
            return Ok(());
        };

        let mut any_missing = false;
        for queue in queue_names {
            match admin.get_queue_properties(queue).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    debug!(%queue, "queue missing on broker, will re-declare topology");
                    any_missing = true;
                }
                Err(e) => {
                    if self.mismatched_queues_fatal {
                        return Err(Error::MismatchedQueue {
                            queue: queue.clone(),
                            source: e,
                        });
                    }
                    warn!(%queue, error = %e, "failed to inspect queue before declaring, will redeclare defensively");
                    any_missing = true;
                }
            }
        }

        if any_missing || self.mismatched_queues_fatal {
            admin.initialize().await.map_err(Error::Lapin)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::QueueProperties;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeAdmin {
        present: Mutex<Vec<String>>,
        initialize_calls: AtomicUsize,
    }

    #[async_trait]
    impl Admin for FakeAdmin {
        async fn initialize(&self) -> Result<(), lapin::Error> {
            self.initialize_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn get_queue_properties(
            &self,
            queue: &str,
        ) -> Result<Option<QueueProperties>, lapin::Error> {
            if self.present.lock().unwrap().iter().any(|q| q == queue) {
                Ok(Some(QueueProperties {
                    message_count: 0,
                    consumer_count: 0,
                }))
            } else {
                Ok(None)
            }
        }
    }

    #[tokio::test]
    async fn no_admin_is_a_no_op() {
        let redeclarer = QueueRedeclarer::new(None, false);
        redeclarer
            .ensure_declared(&["q".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn redeclares_only_when_a_queue_is_missing() {
        let admin = Arc::new(FakeAdmin {
            present: Mutex::new(vec!["q".into()]),
            initialize_calls: AtomicUsize::new(0),
        });
        let redeclarer = QueueRedeclarer::new(Some(admin.clone()), false);

        redeclarer
            .ensure_declared(&["q".to_string()])
            .await
            .unwrap();
        assert_eq!(admin.initialize_calls.load(Ordering::SeqCst), 0);

        redeclarer
            .ensure_declared(&["q".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(admin.initialize_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mismatched_queues_fatal_always_redeclares() {
        let admin = Arc::new(FakeAdmin {
            present: Mutex::new(vec!["q".into()]),
            initialize_calls: AtomicUsize::new(0),
        });
        let redeclarer = QueueRedeclarer::new(Some(admin.clone()), true);

        redeclarer
            .ensure_declared(&["q".to_string()])
            .await
            .unwrap();
        assert_eq!(admin.initialize_calls.load(Ordering::SeqCst), 1);
    }
}
