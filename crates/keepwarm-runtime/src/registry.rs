//! Process-wide mapping from singleton key to instance handle.
//!
//! Creation is single-flight per key: concurrent first resolutions all wait
//! on the same cell, exactly one runs the creator, and every caller gets the
//! handle it produced. A failed creation leaves the cell empty so the next
//! caller retries.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use keepwarm_core::SingletonKey;
use tokio::sync::OnceCell;

use crate::controller::InstanceHandle;

#[derive(Debug, Default)]
pub struct InstanceRegistry {
    slots: Mutex<HashMap<SingletonKey, Arc<OnceCell<InstanceHandle>>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the handle for `key`, running `create` only if none exists.
    pub async fn get_or_create<F, Fut, E>(&self, key: &SingletonKey, create: F) -> Result<InstanceHandle, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<InstanceHandle, E>>,
    {
        let cell = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        cell.get_or_try_init(create).await.cloned()
    }

    /// Handle for `key` if it was already created.
    pub fn get(&self, key: &SingletonKey) -> Option<InstanceHandle> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Number of created instances.
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use keepwarm_core::{ObjectId, Placement};

    fn handle(key: &SingletonKey) -> InstanceHandle {
        InstanceHandle::new(
            key.clone(),
            ObjectId::from_name(key.as_str()),
            Placement::default(),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn concurrent_first_resolution_creates_once() {
        let registry = Arc::new(InstanceRegistry::new());
        let created = Arc::new(AtomicUsize::new(0));
        let key = SingletonKey::global();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            let created = Arc::clone(&created);
            let key = key.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .get_or_create(&key, || async {
                        created.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, ()>(handle(&key))
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut handles = Vec::new();
        for t in tasks {
            handles.push(t.await.unwrap());
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(handles.windows(2).all(|w| w[0].same_instance(&w[1])));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn failed_creation_is_retried() {
        let registry = InstanceRegistry::new();
        let key = SingletonKey::named("flaky");

        let first = registry
            .get_or_create(&key, || async { Err::<InstanceHandle, _>("backend down") })
            .await;
        assert_eq!(first.err(), Some("backend down"));
        assert!(registry.get(&key).is_none());
        assert!(registry.is_empty());

        let second = registry
            .get_or_create(&key, || async { Ok::<_, &str>(handle(&key)) })
            .await
            .unwrap();
        assert!(registry.get(&key).unwrap().same_instance(&second));
    }

    #[tokio::test]
    async fn distinct_keys_get_distinct_instances() {
        let registry = InstanceRegistry::new();
        let a = SingletonKey::named("a");
        let b = SingletonKey::named("b");
        let ha = registry
            .get_or_create(&a, || async { Ok::<_, ()>(handle(&a)) })
            .await
            .unwrap();
        let hb = registry
            .get_or_create(&b, || async { Ok::<_, ()>(handle(&b)) })
            .await
            .unwrap();
        assert!(!ha.same_instance(&hb));
        assert_eq!(registry.len(), 2);
    }
}
