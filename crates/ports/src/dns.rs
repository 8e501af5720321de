//! DNS and domain registrar trait and in-memory implementation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{PortError, Result};
use crate::sync::lock;

/// Status of an asynchronous registrar operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Submitted,
    InProgress,
    Successful,
    Failed,
    Error,
}

impl OperationStatus {
    /// The operation will not succeed any more.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Error)
    }
}

/// Domain registration and hosted-zone record management.
#[async_trait]
pub trait Dns: Send + Sync {
    /// Returns true when the domain can be registered.
    async fn check_availability(&self, domain: &str) -> Result<bool>;

    /// Starts registering a domain and returns the operation id.
    async fn request_domain(&self, domain: &str) -> Result<String>;

    async fn get_operation(&self, operation_id: &str) -> Result<OperationStatus>;

    /// Creates or replaces an alias record for `fqdn` in the hosted zone of
    /// `zone`, pointing at `target`.
    async fn upsert_alias(&self, zone: &str, fqdn: &str, target: &str) -> Result<()>;

    /// Deletes the alias record for `fqdn`. Deleting a missing record is not
    /// an error.
    async fn delete_alias(&self, zone: &str, fqdn: &str, target: &str) -> Result<()>;
}

#[derive(Debug)]
struct InMemoryDnsState {
    operations: BTreeMap<String, OperationStatus>,
    initial_status: OperationStatus,
    records: BTreeMap<(String, String), String>,
    taken: BTreeSet<String>,
    next_id: u32,
    fail_upsert: bool,
}

impl Default for InMemoryDnsState {
    fn default() -> Self {
        Self {
            operations: BTreeMap::new(),
            initial_status: OperationStatus::Successful,
            records: BTreeMap::new(),
            taken: BTreeSet::new(),
            next_id: 0,
            fail_upsert: false,
        }
    }
}

/// In-memory DNS for testing. Registrations succeed immediately unless
/// configured otherwise.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDns {
    state: Arc<Mutex<InMemoryDnsState>>,
}

impl InMemoryDns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status new registrations start in.
    pub fn set_initial_status(&self, status: OperationStatus) {
        lock(&self.state).initial_status = status;
    }

    /// Moves every known operation to `status`.
    pub fn complete_all(&self, status: OperationStatus) {
        for op in lock(&self.state).operations.values_mut() {
            *op = status;
        }
    }

    /// Marks a domain as already registered elsewhere.
    pub fn mark_taken(&self, domain: &str) {
        lock(&self.state).taken.insert(domain.to_string());
    }

    pub fn set_fail_upsert(&self, fail: bool) {
        lock(&self.state).fail_upsert = fail;
    }

    /// Target of the alias record for `fqdn` in `zone`.
    pub fn alias(&self, zone: &str, fqdn: &str) -> Option<String> {
        lock(&self.state)
            .records
            .get(&(zone.to_string(), fqdn.to_string()))
            .cloned()
    }

    pub fn operation_count(&self) -> usize {
        lock(&self.state).operations.len()
    }
}

#[async_trait]
impl Dns for InMemoryDns {
    async fn check_availability(&self, domain: &str) -> Result<bool> {
        Ok(!lock(&self.state).taken.contains(domain))
    }

    async fn request_domain(&self, domain: &str) -> Result<String> {
        let mut state = lock(&self.state);
        if state.taken.contains(domain) {
            return Err(PortError::Dns(format!("domain {domain} is not available")));
        }
        state.next_id += 1;
        let id = format!("op-{:04}", state.next_id);
        let status = state.initial_status;
        state.operations.insert(id.clone(), status);
        Ok(id)
    }

    async fn get_operation(&self, operation_id: &str) -> Result<OperationStatus> {
        lock(&self.state)
            .operations
            .get(operation_id)
            .copied()
            .ok_or_else(|| PortError::Dns(format!("no such operation: {operation_id}")))
    }

    async fn upsert_alias(&self, zone: &str, fqdn: &str, target: &str) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_upsert {
            return Err(PortError::Dns(format!("no hosted zone for {zone}")));
        }
        state
            .records
            .insert((zone.to_string(), fqdn.to_string()), target.to_string());
        Ok(())
    }

    async fn delete_alias(&self, zone: &str, fqdn: &str, _target: &str) -> Result<()> {
        lock(&self.state)
            .records
            .remove(&(zone.to_string(), fqdn.to_string()));
        Ok(())
    }
}
