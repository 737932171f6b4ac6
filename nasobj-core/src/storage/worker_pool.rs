use crate::error::{NasError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard, Semaphore};

/// Bounded blocking-I/O pools, one per device.
///
/// A stalled mount only exhausts its own device's permits; work for other
/// devices keeps flowing. The permit travels into the blocking task, so a
/// caller that gives up does not free the slot before the I/O really ends.
pub struct DevicePools {
    threads_per_disk: usize,
    pools: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl DevicePools {
    pub fn new(threads_per_disk: usize) -> Self {
        Self {
            threads_per_disk: threads_per_disk.max(1),
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Queue for one device, detachable from the pool so object bodies can
    /// keep using it after the call that opened them returns.
    pub fn queue(&self, device: &str) -> DeviceQueue {
        let mut pools = self
            .pools
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let semaphore = pools
            .entry(device.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.threads_per_disk)))
            .clone();
        DeviceQueue { semaphore }
    }

    pub async fn run<F, T>(&self, device: &str, work: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.queue(device).run(work).await
    }

    /// Like [`DevicePools::run`] but gives up after `limit`, reporting the
    /// device as unavailable.
    pub async fn run_with_timeout<F, T>(&self, device: &str, limit: Duration, work: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        match tokio::time::timeout(limit, self.run(device, work)).await {
            Ok(result) => result,
            Err(_) => Err(NasError::BackingStoreUnavailable(format!(
                "device {} did not respond within {:?}",
                device, limit
            ))),
        }
    }
}

#[derive(Clone)]
pub struct DeviceQueue {
    semaphore: Arc<Semaphore>,
}

impl DeviceQueue {
    pub async fn run<F, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|error| NasError::Internal(format!("device pool closed: {}", error)))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        })
        .await
        .map_err(|error| NasError::Internal(format!("blocking task failed: {}", error)))?
    }
}

const LOCK_STRIPES: usize = 256;

/// Striped per-path locks serialising the commit decision for one path
/// within this process. Unrelated paths only contend on a hash collision.
pub struct PathLocks {
    stripes: Vec<AsyncMutex<()>>,
}

impl Default for PathLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl PathLocks {
    pub fn new() -> Self {
        Self {
            stripes: (0..LOCK_STRIPES).map(|_| AsyncMutex::new(())).collect(),
        }
    }

    pub async fn lock(&self, key: &std::path::Path) -> MutexGuard<'_, ()> {
        use std::hash::{DefaultHasher, Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.stripes.len() as u64) as usize;
        self.stripes[index].lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_pool_bounds_concurrency_per_device() {
        let pools = Arc::new(DevicePools::new(2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let pools = Arc::clone(&pools);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                pools
                    .run("sda", move || {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_stalled_device_times_out() {
        let pools = DevicePools::new(1);
        let result = pools
            .run_with_timeout("slow", Duration::from_millis(20), || {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(NasError::BackingStoreUnavailable(_))));

        let other = pools.run("fast", || Ok(7)).await.unwrap();
        assert_eq!(other, 7);
    }
}
