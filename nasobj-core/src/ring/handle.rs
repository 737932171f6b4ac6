use super::{DeviceRecord, PathHasher, Ring};
use crate::config::StorageConfig;
use crate::error::{NasError, Result};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Process-wide handle to one ring kind.
///
/// Readers take a snapshot with [`RingHandle::current`]; a reload swaps in a
/// freshly validated ring without disturbing requests holding the old one.
pub struct RingHandle {
    name: String,
    path: PathBuf,
    current: ArcSwap<Ring>,
}

impl RingHandle {
    pub fn load(name: &str, path: PathBuf) -> Result<Self> {
        let ring = Ring::from_file(&path)?;
        tracing::info!(
            "Loaded {} ring from {:?}: part_power={} replicas={} devices={}",
            name,
            path,
            ring.part_power(),
            ring.replica_count(),
            ring.devices().len()
        );

        Ok(Self {
            name: name.to_string(),
            path,
            current: ArcSwap::from_pointee(ring),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> Arc<Ring> {
        self.current.load_full()
    }

    /// Re-reads the descriptor. On failure the previously loaded ring keeps
    /// serving and the error is returned to the caller.
    pub fn reload(&self) -> Result<()> {
        match Ring::from_file(&self.path) {
            Ok(ring) => {
                tracing::info!(
                    "Reloaded {} ring from {:?}: part_power={} devices={}",
                    self.name,
                    self.path,
                    ring.part_power(),
                    ring.devices().len()
                );
                self.current.store(Arc::new(ring));
                Ok(())
            }
            Err(error) => {
                tracing::warn!(
                    "Keeping previous {} ring, reload from {:?} failed: {}",
                    self.name,
                    self.path,
                    error
                );
                Err(error)
            }
        }
    }

    /// Reloads when the descriptor's mtime differs from the loaded one and
    /// reports whether a new ring was swapped in. Blocking.
    pub fn maybe_reload(&self) -> bool {
        let on_disk = std::fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .ok();
        on_disk.is_some() && on_disk != self.current().loaded_mtime() && self.reload().is_ok()
    }
}

/// Named rings plus the cluster's path hasher.
pub struct RingResolver {
    hasher: PathHasher,
    rings: HashMap<String, RingHandle>,
    reload_interval: Duration,
}

impl RingResolver {
    pub fn load(
        swift_dir: &Path,
        ring_names: &[&str],
        hasher: PathHasher,
        reload_interval: Duration,
    ) -> Result<Self> {
        let mut rings = HashMap::with_capacity(ring_names.len());
        for name in ring_names {
            let path = swift_dir.join(format!("{}.ring.json", name));
            rings.insert(
                name.to_string(),
                RingHandle::load(name, path)?,
            );
        }

        Ok(Self {
            hasher,
            rings,
            reload_interval,
        })
    }

    pub fn from_config(config: &StorageConfig, ring_names: &[&str]) -> Result<Self> {
        Self::load(
            &config.swift_dir,
            ring_names,
            PathHasher::new(&config.hash_path_prefix, &config.hash_path_suffix),
            config.ring_reload_interval(),
        )
    }

    pub fn handle(&self, ring_name: &str) -> Result<&RingHandle> {
        self.rings
            .get(ring_name)
            .ok_or_else(|| NasError::RingLoad(format!("ring '{}' is not loaded", ring_name)))
    }

    pub fn hasher(&self) -> &PathHasher {
        &self.hasher
    }

    /// Partition and ordered devices responsible for an account, container or
    /// object path.
    pub fn get_nodes(
        &self,
        ring_name: &str,
        account: &str,
        container: Option<&str>,
        object: Option<&str>,
    ) -> Result<(u32, Vec<DeviceRecord>)> {
        let ring = self.handle(ring_name)?.current();
        let path = PathHasher::ring_path(account, container, object)?;
        let partition = ring.partition(self.hasher.hash(&path));
        Ok((partition, ring.nodes(partition)))
    }

    pub fn get_part_nodes(&self, ring_name: &str, partition: u32) -> Result<Vec<DeviceRecord>> {
        let ring = self.handle(ring_name)?.current();
        if partition as usize >= ring.partition_count() {
            return Err(NasError::InvalidRequest(format!(
                "partition {} out of range for {} ring",
                partition, ring_name
            )));
        }
        Ok(ring.nodes(partition))
    }

    pub fn has_device(&self, ring_name: &str, device_name: &str) -> Result<bool> {
        Ok(self.handle(ring_name)?.current().has_device(device_name))
    }

    /// Checks every ring for a changed descriptor. Blocking.
    pub fn reload_changed(&self) {
        for handle in self.rings.values() {
            handle.maybe_reload();
        }
    }

    /// Polls the descriptors once per reload interval on the blocking pool,
    /// keeping filesystem access off request paths. The task stops once the
    /// resolver is dropped.
    pub fn spawn_reloader(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = self.reload_interval.max(Duration::from_millis(100));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(resolver) = weak.upgrade() else {
                    break;
                };
                let checked = tokio::task::spawn_blocking(move || resolver.reload_changed()).await;
                if let Err(error) = checked {
                    tracing::warn!("Ring reload check failed: {}", error);
                }
            }
        })
    }

    pub fn reload_all(&self) -> Result<()> {
        for handle in self.rings.values() {
            handle.reload()?;
        }
        Ok(())
    }
}
