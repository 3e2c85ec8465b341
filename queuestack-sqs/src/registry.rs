//! Named queue registry
//!
//! Lookups go through a sharded map and never touch another queue's lock.
//! Create and delete are serialised by a small admin lock so the
//! FIFO-suffix conflict check sees a consistent view of both names.

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, info};

use queuestack_core::SharedClock;

use crate::error::SqsError;
use crate::fifo::FifoSequencer;
use crate::store::MessageStore;
use crate::types::{
    EngineConfig, QueueConfig, QueueInfo, QueueOptions, FIFO_SUFFIX, MAX_QUEUE_NAME_LEN,
};

/// A live queue: its configuration, message store and long-poll waiters
#[derive(Debug)]
pub struct Queue {
    info: QueueInfo,
    order: u64,
    store: Mutex<MessageStore>,
    notify: Notify,
    deleted: AtomicBool,
}

impl Queue {
    fn new(info: QueueInfo, order: u64, dedup_window_ms: i64) -> Self {
        let fifo = info
            .config
            .fifo
            .then(|| FifoSequencer::new(dedup_window_ms));
        Self {
            store: Mutex::new(MessageStore::new(info.id.clone(), fifo)),
            info,
            order,
            notify: Notify::new(),
            deleted: AtomicBool::new(false),
        }
    }

    pub fn info(&self) -> &QueueInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.info.config
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, MessageStore> {
        self.store.lock()
    }

    pub(crate) fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Wake every long-poller so it re-checks the queue.
    pub(crate) fn wake_receivers(&self) {
        self.notify.notify_waiters();
    }

    fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
        self.wake_receivers();
    }
}

#[derive(Debug)]
pub struct QueueRegistry {
    queues: DashMap<String, Arc<Queue>>,
    admin: Mutex<()>,
    next_order: AtomicU64,
    config: EngineConfig,
    clock: SharedClock,
}

impl QueueRegistry {
    pub fn new(config: EngineConfig, clock: SharedClock) -> Self {
        Self {
            queues: DashMap::new(),
            admin: Mutex::new(()),
            next_order: AtomicU64::new(0),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a queue, or return the existing one if it was created with
    /// the same configuration.
    pub fn create_queue(
        &self,
        name: &str,
        fifo: bool,
        options: &QueueOptions,
    ) -> Result<QueueInfo, SqsError> {
        let name = canonical_name(name, fifo)?;
        let config = QueueConfig::resolve(fifo, options, &self.config)?;

        let _admin = self.admin.lock();

        if let Some(existing) = self.queues.get(&name) {
            if existing.config() == &config {
                debug!(name = %name, "Queue already exists with identical attributes");
                return Ok(existing.info().clone());
            }
            return Err(SqsError::QueueAttributeMismatch(name));
        }

        let sibling = match name.strip_suffix(FIFO_SUFFIX) {
            Some(base) if fifo => base.to_string(),
            _ => format!("{name}{FIFO_SUFFIX}"),
        };
        if self.queues.contains_key(&sibling) {
            return Err(SqsError::NameConflict(name));
        }

        let info = QueueInfo {
            id: uuid::Uuid::new_v4().to_string(),
            url: format!("{}/{}", self.config.base_url.trim_end_matches('/'), name),
            name: name.clone(),
            config,
            created_timestamp: self.clock.now_millis(),
        };
        let order = self.next_order.fetch_add(1, Ordering::Relaxed);
        let dedup_window_ms = i64::from(self.config.dedup_window_secs) * 1000;

        info!(name = %name, fifo = fifo, url = %info.url, "Creating queue");
        self.queues.insert(
            name,
            Arc::new(Queue::new(info.clone(), order, dedup_window_ms)),
        );
        Ok(info)
    }

    pub fn get_queue(&self, name: &str) -> Result<Arc<Queue>, SqsError> {
        self.queues
            .get(name)
            .map(|q| Arc::clone(q.value()))
            .ok_or_else(|| SqsError::QueueNotFound(name.to_string()))
    }

    /// Queues in creation order, optionally filtered by name prefix
    pub fn list_queues(&self, prefix: Option<&str>) -> Vec<QueueInfo> {
        let mut queues: Vec<(u64, QueueInfo)> = self
            .queues
            .iter()
            .filter(|q| prefix.map_or(true, |p| q.key().starts_with(p)))
            .map(|q| (q.order, q.info().clone()))
            .collect();
        queues.sort_by_key(|(order, _)| *order);
        queues.into_iter().map(|(_, info)| info).collect()
    }

    /// Remove a queue and everything in it. Pending receives on it return
    /// `QueueNotFound`, and its receipt handles stop working.
    pub fn delete_queue(&self, name: &str) -> Result<(), SqsError> {
        let _admin = self.admin.lock();
        let (_, queue) = self
            .queues
            .remove(name)
            .ok_or_else(|| SqsError::QueueNotFound(name.to_string()))?;

        info!(name = %name, "Deleting queue");
        queue.mark_deleted();
        Ok(())
    }

    /// Delete every queue. Used on shutdown.
    pub fn clear(&self) -> usize {
        let _admin = self.admin.lock();
        let names: Vec<String> = self.queues.iter().map(|q| q.key().clone()).collect();
        for name in &names {
            if let Some((_, queue)) = self.queues.remove(name) {
                queue.mark_deleted();
            }
        }
        names.len()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Queue>> {
        self.queues.iter().map(|q| Arc::clone(q.value())).collect()
    }
}

/// Validate a queue name, appending the FIFO suffix when needed.
pub(crate) fn canonical_name(name: &str, fifo: bool) -> Result<String, SqsError> {
    if name.trim() != name {
        return Err(SqsError::InvalidName(format!(
            "'{name}': queue names must not have leading or trailing whitespace"
        )));
    }
    let base = match name.strip_suffix(FIFO_SUFFIX) {
        Some(base) if fifo => base,
        Some(_) => {
            return Err(SqsError::InvalidName(format!(
                "'{name}': the {FIFO_SUFFIX} suffix is reserved for FIFO queues"
            )))
        }
        None => name,
    };

    if base.is_empty() {
        return Err(SqsError::InvalidName("queue name must not be empty".into()));
    }
    if !base
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SqsError::InvalidName(format!(
            "'{name}': only alphanumeric characters, hyphens and underscores are allowed"
        )));
    }

    let canonical = if fifo {
        format!("{base}{FIFO_SUFFIX}")
    } else {
        base.to_string()
    };
    if canonical.len() > MAX_QUEUE_NAME_LEN {
        return Err(SqsError::InvalidName(format!(
            "'{canonical}' is longer than {MAX_QUEUE_NAME_LEN} characters"
        )));
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuestack_core::ManualClock;

    fn registry() -> QueueRegistry {
        QueueRegistry::new(EngineConfig::default(), Arc::new(ManualClock::default()))
    }

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name("orders", false).unwrap(), "orders");
        assert_eq!(canonical_name("orders", true).unwrap(), "orders.fifo");
        assert_eq!(canonical_name("orders.fifo", true).unwrap(), "orders.fifo");
        assert_eq!(canonical_name("my_queue-1", false).unwrap(), "my_queue-1");

        assert!(matches!(
            canonical_name("orders.fifo", false),
            Err(SqsError::InvalidName(_))
        ));
        assert!(canonical_name("", false).is_err());
        assert!(canonical_name(".fifo", true).is_err());
        assert!(canonical_name("has space", false).is_err());
        for padded in [" jobs", "jobs ", "\tjobs", " orders.fifo"] {
            assert!(matches!(
                canonical_name(padded, true),
                Err(SqsError::InvalidName(_))
            ));
        }
        assert!(canonical_name("dots.not.allowed", false).is_err());
        assert!(canonical_name(&"a".repeat(80), false).is_ok());
        assert!(canonical_name(&"a".repeat(81), false).is_err());
        // suffix counts towards the limit
        assert!(canonical_name(&"a".repeat(76), true).is_err());
    }

    #[test]
    fn test_create_and_get() {
        let registry = registry();
        let info = registry
            .create_queue("jobs", false, &QueueOptions::default())
            .unwrap();
        assert_eq!(info.url, "http://localhost:3000/queues/jobs");
        assert!(!info.is_fifo());

        let queue = registry.get_queue("jobs").unwrap();
        assert_eq!(queue.info(), &info);
        assert!(matches!(
            registry.get_queue("missing"),
            Err(SqsError::QueueNotFound(_))
        ));

        // a padded name is not silently mapped onto "jobs"
        assert!(matches!(
            registry.create_queue("jobs ", false, &QueueOptions::default()),
            Err(SqsError::InvalidName(_))
        ));
        assert_eq!(registry.list_queues(None).len(), 1);
    }

    #[test]
    fn test_create_is_idempotent() {
        let registry = registry();
        let options = QueueOptions::default().visibility_timeout(10);
        let first = registry.create_queue("jobs", false, &options).unwrap();
        let second = registry.create_queue("jobs", false, &options).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(registry.list_queues(None).len(), 1);
    }

    #[test]
    fn test_create_with_different_attributes() {
        let registry = registry();
        registry
            .create_queue("jobs", false, &QueueOptions::default())
            .unwrap();
        let result =
            registry.create_queue("jobs", false, &QueueOptions::default().visibility_timeout(5));
        assert!(matches!(result, Err(SqsError::QueueAttributeMismatch(_))));
    }

    #[test]
    fn test_fifo_name_conflicts() {
        let registry = registry();
        registry
            .create_queue("orders", false, &QueueOptions::default())
            .unwrap();
        assert!(matches!(
            registry.create_queue("orders", true, &QueueOptions::default()),
            Err(SqsError::NameConflict(_))
        ));

        registry
            .create_queue("events", true, &QueueOptions::default())
            .unwrap();
        assert!(matches!(
            registry.create_queue("events", false, &QueueOptions::default()),
            Err(SqsError::NameConflict(_))
        ));
    }

    #[test]
    fn test_list_in_creation_order_with_prefix() {
        let registry = registry();
        for name in ["zeta", "alpha", "alpine", "mid"] {
            registry
                .create_queue(name, false, &QueueOptions::default())
                .unwrap();
        }

        let names: Vec<String> = registry
            .list_queues(None)
            .into_iter()
            .map(|q| q.name)
            .collect();
        assert_eq!(names, vec!["zeta", "alpha", "alpine", "mid"]);

        let filtered: Vec<String> = registry
            .list_queues(Some("alp"))
            .into_iter()
            .map(|q| q.name)
            .collect();
        assert_eq!(filtered, vec!["alpha", "alpine"]);
    }

    #[test]
    fn test_delete_queue() {
        let registry = registry();
        registry
            .create_queue("jobs", false, &QueueOptions::default())
            .unwrap();
        let queue = registry.get_queue("jobs").unwrap();

        registry.delete_queue("jobs").unwrap();
        assert!(queue.is_deleted());
        assert!(registry.get_queue("jobs").is_err());
        assert!(matches!(
            registry.delete_queue("jobs"),
            Err(SqsError::QueueNotFound(_))
        ));

        // recreated queue is a new incarnation
        let again = registry
            .create_queue("jobs", false, &QueueOptions::default())
            .unwrap();
        assert_ne!(again.id, queue.info().id);
    }

    #[test]
    fn test_clear() {
        let registry = registry();
        registry
            .create_queue("a", false, &QueueOptions::default())
            .unwrap();
        registry
            .create_queue("b", true, &QueueOptions::default())
            .unwrap();
        let a = registry.get_queue("a").unwrap();

        assert_eq!(registry.clear(), 2);
        assert!(a.is_deleted());
        assert!(registry.list_queues(None).is_empty());
    }
}
