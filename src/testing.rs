//! In-memory fakes for the external collaborators (`Controller`, `Datastore`,
//! `KV`), used by unit and scenario tests throughout the crate.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::controller::{
    ConfigMount, Controller, ControllerResult, DependencySpec, ResourceInfo, ServiceControlError,
};
use crate::datastore::{Datastore, Service, ServiceDeltaOp, Stage};
use crate::kv::{QueueHandle, QueueProvider, StatusEntry, StatusTable, TimeoutMessage, TimeoutQueue};

/// An in-memory [`Controller`] double. Targets and free-resource readings are
/// mutable via plain setters so tests can script scenarios precisely.
pub struct FakeController {
    targets: Mutex<HashMap<String, u32>>,
    free: Mutex<(f64, i64)>,
    totals: Mutex<(f64, i64)>,
    running_containers: Mutex<Vec<String>>,
    events: Mutex<VecDeque<String>>,
    write_count: AtomicUsize,
    fail_next_set_target: Mutex<Option<String>>,
}

impl FakeController {
    /// Build a controller with no targets and zero free resources.
    pub fn new() -> Self {
        Self {
            targets: Mutex::new(HashMap::new()),
            free: Mutex::new((0.0, 0)),
            totals: Mutex::new((0.0, 0)),
            running_containers: Mutex::new(Vec::new()),
            events: Mutex::new(VecDeque::new()),
            write_count: AtomicUsize::new(0),
            fail_next_set_target: Mutex::new(None),
        }
    }

    /// Set the cluster-wide free CPU/RAM the allocator will observe.
    pub fn set_free(&self, cpu: f64, mem_mb: i64) {
        *self.free.lock() = (cpu, mem_mb);
    }

    /// Set the cluster-wide totals reported by `cpu_info`/`memory_info`.
    pub fn set_totals(&self, cpu: f64, mem_mb: i64) {
        *self.totals.lock() = (cpu, mem_mb);
    }

    /// Seed the set of container names `get_running_container_names` returns.
    pub fn set_running_containers(&self, names: Vec<String>) {
        *self.running_containers.lock() = names;
    }

    /// Number of `set_target` calls observed so far.
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    /// Reset the write counter, typically between idempotence-test runs.
    pub fn reset_write_count(&self) {
        self.write_count.store(0, Ordering::SeqCst);
    }

    /// Make the next `set_target` call for `service` fail once.
    pub fn fail_next_set_target(&self, service: &str) {
        *self.fail_next_set_target.lock() = Some(service.to_string());
    }

    /// Queue an event for the next `new_events` call to drain.
    pub fn push_event(&self, event: impl Into<String>) {
        self.events.lock().push_back(event.into());
    }
}

impl Default for FakeController {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Controller for FakeController {
    async fn add_profile(&self, profile: &crate::profile::ServiceProfile) -> ControllerResult<()> {
        self.targets.lock().entry(profile.name.clone()).or_insert(0);
        Ok(())
    }

    async fn restart(&self, _profile: &crate::profile::ServiceProfile) -> ControllerResult<()> {
        Ok(())
    }

    async fn stop_container(&self, _service: &str, _container: &str) -> ControllerResult<()> {
        Ok(())
    }

    async fn stop_containers(&self, _labels: &HashMap<String, String>) -> ControllerResult<()> {
        Ok(())
    }

    async fn get_target(&self, name: &str) -> ControllerResult<u32> {
        Ok(self.targets.lock().get(name).copied().unwrap_or(0))
    }

    async fn set_target(&self, name: &str, target: u32) -> ControllerResult<()> {
        self.write_count.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.fail_next_set_target.lock();
        if guard.as_deref() == Some(name) {
            guard.take();
            return Err(ServiceControlError::new(name, anyhow::anyhow!("injected failure")));
        }
        drop(guard);
        self.targets.lock().insert(name.to_string(), target);
        Ok(())
    }

    async fn free_cpu(&self) -> ControllerResult<f64> {
        Ok(self.free.lock().0)
    }

    async fn free_memory(&self) -> ControllerResult<i64> {
        Ok(self.free.lock().1)
    }

    async fn cpu_info(&self) -> ControllerResult<ResourceInfo> {
        let free = self.free.lock().0;
        let total = self.totals.lock().0;
        Ok(ResourceInfo { free, total })
    }

    async fn memory_info(&self) -> ControllerResult<ResourceInfo> {
        let free = self.free.lock().1 as f64;
        let total = self.totals.lock().1 as f64;
        Ok(ResourceInfo { free, total })
    }

    async fn get_running_container_names(&self) -> ControllerResult<Vec<String>> {
        Ok(self.running_containers.lock().clone())
    }

    async fn new_events(&self) -> ControllerResult<Vec<String>> {
        Ok(self.events.lock().drain(..).collect())
    }

    async fn prepare_network(&self, _service_name: &str, _allow_internet: bool) -> ControllerResult<()> {
        Ok(())
    }

    async fn start_stateful_container(
        &self,
        _service_name: &str,
        _container_name: &str,
        _spec: &DependencySpec,
        _labels: &HashMap<String, String>,
    ) -> ControllerResult<()> {
        Ok(())
    }

    async fn config_mount(&self, _name: &str, _mount: ConfigMount) -> ControllerResult<()> {
        Ok(())
    }

    async fn stop(&self) -> ControllerResult<()> {
        Ok(())
    }
}

/// An in-memory [`Datastore`] double, backed by a fixed service list plus a
/// recorder of every delta/stage write applied.
pub struct FakeDatastore {
    services: Mutex<Vec<Service>>,
    stages: Mutex<HashMap<String, Stage>>,
    pub(crate) deltas: Mutex<Vec<(String, Vec<ServiceDeltaOp>)>>,
}

impl FakeDatastore {
    /// Build a datastore seeded with `services`, all starting in `Stage::Off`.
    pub fn new(services: Vec<Service>) -> Self {
        let stages = services.iter().map(|s| (s.name.clone(), Stage::Off)).collect();
        Self {
            services: Mutex::new(services),
            stages: Mutex::new(stages),
            deltas: Mutex::new(Vec::new()),
        }
    }

    /// Replace the service list wholesale (simulates catalog changes between cycles).
    pub fn set_services(&self, services: Vec<Service>) {
        *self.services.lock() = services;
    }

    /// Every delta update recorded so far.
    pub fn recorded_deltas(&self) -> Vec<(String, Vec<ServiceDeltaOp>)> {
        self.deltas.lock().clone()
    }
}

#[async_trait]
impl Datastore for FakeDatastore {
    async fn list_all_services(&self) -> anyhow::Result<Vec<Service>> {
        Ok(self.services.lock().clone())
    }

    async fn update_service_delta(&self, name: &str, ops: Vec<ServiceDeltaOp>) -> anyhow::Result<()> {
        self.deltas.lock().push((name.to_string(), ops));
        Ok(())
    }

    async fn get_service_stage(&self, name: &str) -> anyhow::Result<Stage> {
        Ok(self.stages.lock().get(name).copied().unwrap_or(Stage::Off))
    }

    async fn set_service_stage(&self, name: &str, stage: Stage) -> anyhow::Result<()> {
        self.stages.lock().insert(name.to_string(), stage);
        Ok(())
    }
}

/// An in-memory [`QueueHandle`] double with a settable fixed length.
pub struct FakeQueue {
    length: Mutex<u32>,
}

impl FakeQueue {
    /// Build a queue handle reporting `length`.
    pub fn new(length: u32) -> Self {
        Self {
            length: Mutex::new(length),
        }
    }

    /// Change the reported length.
    pub fn set_length(&self, length: u32) {
        *self.length.lock() = length;
    }
}

#[async_trait]
impl QueueHandle for FakeQueue {
    async fn length(&self) -> anyhow::Result<u32> {
        Ok(*self.length.lock())
    }
}

/// An in-memory [`StatusTable`] double.
pub struct FakeStatusTable {
    entries: Mutex<HashMap<String, StatusEntry>>,
}

impl FakeStatusTable {
    /// Build an empty status table.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Insert or replace a host's entry.
    pub fn insert(&self, host: &str, entry: StatusEntry) {
        self.entries.lock().insert(host.to_string(), entry);
    }

    /// Whether `host` still has an entry.
    pub fn contains(&self, host: &str) -> bool {
        self.entries.lock().contains_key(host)
    }
}

impl Default for FakeStatusTable {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusTable for FakeStatusTable {
    async fn snapshot(&self) -> anyhow::Result<Vec<(String, StatusEntry)>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .map(|(h, e)| (h.clone(), e.clone()))
            .collect())
    }

    async fn remove(&self, host: &str) -> anyhow::Result<()> {
        self.entries.lock().remove(host);
        Ok(())
    }
}

/// An in-memory [`TimeoutQueue`] double, draining a fixed `VecDeque`.
pub struct FakeTimeoutQueue {
    messages: Mutex<VecDeque<TimeoutMessage>>,
}

impl FakeTimeoutQueue {
    /// Build a queue pre-loaded with `messages`.
    pub fn new(messages: Vec<TimeoutMessage>) -> Self {
        Self {
            messages: Mutex::new(messages.into()),
        }
    }
}

#[async_trait]
impl TimeoutQueue for FakeTimeoutQueue {
    async fn pop(&self, _timeout: Duration) -> anyhow::Result<Option<TimeoutMessage>> {
        Ok(self.messages.lock().pop_front())
    }
}

/// Convenience: wrap any fake in an `Arc` for the trait-object-heavy worker constructors.
pub fn arc<T>(value: T) -> Arc<T> {
    Arc::new(value)
}

/// An in-memory [`QueueProvider`], lazily creating a zero-length [`FakeQueue`] per service.
pub struct FakeQueueProvider {
    queues: Mutex<HashMap<String, Arc<FakeQueue>>>,
}

impl FakeQueueProvider {
    /// Build an empty provider; every service starts at queue length 0.
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Set a service's queue length, creating its handle if needed.
    pub fn set_length(&self, service: &str, length: u32) {
        self.queues
            .lock()
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(FakeQueue::new(0)))
            .set_length(length);
    }
}

impl Default for FakeQueueProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueProvider for FakeQueueProvider {
    fn queue_handle(&self, service: &str) -> Arc<dyn QueueHandle> {
        self.queues
            .lock()
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(FakeQueue::new(0)))
            .clone()
    }
}
