//! CDN trait and in-memory implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{PortError, Result};
use crate::sync::lock;

/// Parameters of a new distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionRequest {
    /// Path inside the origin, e.g. `/sites/42`.
    pub origin_path: String,
    /// Origin host serving the uploaded assets.
    pub origin_domain: String,
    /// Domain the distribution answers for.
    pub alias: String,
    pub cert_arn: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionStatus {
    InProgress,
    Deployed,
}

/// Current state of a distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub id: String,
    pub status: DistributionStatus,
    /// CDN host name that DNS aliases point at.
    pub domain_name: String,
    pub enabled: bool,
}

impl Distribution {
    pub fn is_deployed(&self) -> bool {
        self.status == DistributionStatus::Deployed
    }
}

/// Content delivery network operations.
#[async_trait]
pub trait Cdn: Send + Sync {
    /// Creates a distribution and returns its id. Deployment continues in
    /// the background.
    async fn create_distribution(&self, request: DistributionRequest) -> Result<String>;

    async fn get_distribution(&self, id: &str) -> Result<Distribution>;

    /// Disables a distribution. Disabling twice is not an error.
    async fn disable(&self, id: &str) -> Result<()>;
}

#[derive(Debug)]
struct FakeDistribution {
    request: DistributionRequest,
    pending_polls: u32,
    enabled: bool,
}

#[derive(Debug, Default)]
struct InMemoryCdnState {
    distributions: BTreeMap<String, FakeDistribution>,
    next_id: u32,
    polls_until_deployed: u32,
    stalled: bool,
    fail_create: bool,
    create_delay: Option<Duration>,
}

/// In-memory CDN for testing.
///
/// New distributions report `InProgress` for the configured number of
/// polls and `Deployed` afterwards. A stalled CDN never deploys.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCdn {
    state: Arc<Mutex<InMemoryCdnState>>,
}

impl InMemoryCdn {
    /// Creates a CDN whose distributions deploy immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of polls a new distribution stays `InProgress`.
    pub fn set_polls_until_deployed(&self, polls: u32) {
        lock(&self.state).polls_until_deployed = polls;
    }

    /// Holds every distribution in `InProgress` while set.
    pub fn set_stalled(&self, stalled: bool) {
        lock(&self.state).stalled = stalled;
    }

    /// Configures the service to fail on the next create call.
    pub fn set_fail_create(&self, fail: bool) {
        lock(&self.state).fail_create = fail;
    }

    /// Delays every create call.
    pub fn set_create_delay(&self, delay: Option<Duration>) {
        lock(&self.state).create_delay = delay;
    }

    pub fn distribution_count(&self) -> usize {
        lock(&self.state).distributions.len()
    }

    /// Returns the request a distribution was created from.
    pub fn request(&self, id: &str) -> Option<DistributionRequest> {
        lock(&self.state)
            .distributions
            .get(id)
            .map(|d| d.request.clone())
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        lock(&self.state)
            .distributions
            .get(id)
            .is_some_and(|d| d.enabled)
    }

    fn domain_name(id: &str) -> String {
        format!("{}.cdn.test", id.to_lowercase())
    }
}

#[async_trait]
impl Cdn for InMemoryCdn {
    async fn create_distribution(&self, request: DistributionRequest) -> Result<String> {
        let delay = lock(&self.state).create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        if state.fail_create {
            return Err(PortError::Cdn(format!(
                "distribution for {} rejected",
                request.alias
            )));
        }
        state.next_id += 1;
        let id = format!("E{:04}", state.next_id);
        let pending_polls = state.polls_until_deployed;
        state.distributions.insert(
            id.clone(),
            FakeDistribution {
                request,
                pending_polls,
                enabled: true,
            },
        );
        Ok(id)
    }

    async fn get_distribution(&self, id: &str) -> Result<Distribution> {
        let mut state = lock(&self.state);
        let stalled = state.stalled;
        let distribution = state
            .distributions
            .get_mut(id)
            .ok_or_else(|| PortError::Cdn(format!("no such distribution: {id}")))?;

        let status = if stalled || distribution.pending_polls > 0 {
            distribution.pending_polls = distribution.pending_polls.saturating_sub(1);
            DistributionStatus::InProgress
        } else {
            DistributionStatus::Deployed
        };

        Ok(Distribution {
            id: id.to_string(),
            status,
            domain_name: Self::domain_name(id),
            enabled: distribution.enabled,
        })
    }

    async fn disable(&self, id: &str) -> Result<()> {
        let mut state = lock(&self.state);
        let distribution = state
            .distributions
            .get_mut(id)
            .ok_or_else(|| PortError::Cdn(format!("no such distribution: {id}")))?;
        distribution.enabled = false;
        Ok(())
    }
}
