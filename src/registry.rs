//! Thread-safe map of service name → [`ServiceProfile`].
//!
//! A single mutex serializes every mutation of the map. No operation here ever
//! calls back into another registry operation while holding the guard, so a
//! plain `parking_lot::Mutex` satisfies the "single lock, no per-profile
//! locking" requirement without needing true lock re-entrancy.
//!
//! Backed by [`IndexMap`] rather than `std::collections::HashMap`: the
//! allocator's growth phase breaks ties between equally-live candidates by
//! insertion order (spec §4.5 step 4), which only `IndexMap`'s iteration order
//! actually guarantees. `remove` uses `shift_remove` so dropping one profile
//! never reorders the rest.

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::{Result, ScalerError};
use crate::profile::ServiceProfile;

/// Thread-safe registry of managed service profiles.
#[derive(Default)]
pub struct ProfileRegistry {
    profiles: Mutex<IndexMap<String, ServiceProfile>>,
}

impl ProfileRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            profiles: Mutex::new(IndexMap::new()),
        }
    }

    /// Insert a new profile, failing if one with the same name already exists.
    pub fn add(&self, profile: ServiceProfile) -> Result<()> {
        let mut guard = self.profiles.lock();
        if guard.contains_key(&profile.name) {
            return Err(ScalerError::AlreadyPresent(profile.name));
        }
        guard.insert(profile.name.clone(), profile);
        Ok(())
    }

    /// Remove a profile by name, returning it if it existed. Preserves the
    /// insertion order of the remaining profiles.
    pub fn remove(&self, name: &str) -> Option<ServiceProfile> {
        self.profiles.lock().shift_remove(name)
    }

    /// Run a closure with read/write access to a single profile.
    pub fn with_profile<R>(&self, name: &str, f: impl FnOnce(&mut ServiceProfile) -> R) -> Option<R> {
        let mut guard = self.profiles.lock();
        guard.get_mut(name).map(f)
    }

    /// Whether a profile with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.profiles.lock().contains_key(name)
    }

    /// Number of managed profiles.
    pub fn len(&self) -> usize {
        self.profiles.lock().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.profiles.lock().is_empty()
    }

    /// A shallow copy of every profile in insertion order, safe to iterate
    /// outside the lock.
    pub fn snapshot(&self) -> Vec<ServiceProfile> {
        self.profiles.lock().values().cloned().collect()
    }

    /// The set of names currently present.
    pub fn names(&self) -> Vec<String> {
        self.profiles.lock().keys().cloned().collect()
    }

    /// Run a closure with the whole map locked. Callers must not re-enter the
    /// registry from within `f`.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut IndexMap<String, ServiceProfile>) -> R) -> R {
        let mut guard = self.profiles.lock();
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{ContainerConfig, ServiceProfileConfig};

    fn profile(name: &str) -> ServiceProfile {
        ServiceProfile::new(ServiceProfileConfig {
            name: name.to_string(),
            container_config: ContainerConfig {
                image: "img".to_string(),
                environment: vec![],
                cpu_cores: 1.0,
                ram_mb: 512,
                allow_internet_access: false,
            },
            config_hash: 0,
            min_instances: 0,
            max_instances: None,
            growth: 60.0,
            shrink: None,
            backlog: 500,
            shutdown_seconds: 30,
            is_analysis: true,
        })
    }

    #[test]
    fn add_then_duplicate_fails() {
        let registry = ProfileRegistry::new();
        registry.add(profile("a")).unwrap();
        let err = registry.add(profile("a")).unwrap_err();
        assert!(matches!(err, ScalerError::AlreadyPresent(name) if name == "a"));
    }

    #[test]
    fn remove_and_snapshot() {
        let registry = ProfileRegistry::new();
        registry.add(profile("a")).unwrap();
        registry.add(profile("b")).unwrap();
        assert_eq!(registry.snapshot().len(), 2);
        registry.remove("a");
        assert_eq!(registry.snapshot().len(), 1);
        assert!(registry.contains("b"));
    }
}
