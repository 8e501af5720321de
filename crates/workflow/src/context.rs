//! Shared services and the per-dispatch handler context.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ports::{Cdn, Certificates, Dns, Mailer, ObjectStore, TemplateBuilder};
use store::{Database, UnitOfWork};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, WorkflowError};
use crate::locks::TemplateLocks;

/// Static provisioning parameters.
#[derive(Debug, Clone)]
pub struct ProvisioningSettings {
    /// Parent domain of default-domain sites.
    pub base_domain: String,
    /// Origin host of the site bucket.
    pub default_s3_web_domain: String,
    /// Certificate covering `*.{base_domain}`.
    pub default_cert_arn: String,
    /// Object key prefix of uploaded sites.
    pub sites_prefix: String,
    pub cdn_create_timeout: Duration,
    pub dns_request_timeout: Duration,
    /// Budget for waiting on a distribution to deploy.
    pub deploy_wait: Duration,
    pub deploy_poll_interval: Duration,
    /// Budget for the deployment wait during teardown.
    pub teardown_wait: Duration,
}

impl ProvisioningSettings {
    pub fn new(
        base_domain: impl Into<String>,
        default_s3_web_domain: impl Into<String>,
        default_cert_arn: impl Into<String>,
    ) -> Self {
        Self {
            base_domain: base_domain.into(),
            default_s3_web_domain: default_s3_web_domain.into(),
            default_cert_arn: default_cert_arn.into(),
            sites_prefix: "sites".to_string(),
            cdn_create_timeout: Duration::from_secs(5),
            dns_request_timeout: Duration::from_secs(3),
            deploy_wait: Duration::from_secs(10),
            deploy_poll_interval: Duration::from_secs(1),
            teardown_wait: Duration::from_secs(3),
        }
    }

    /// Object key prefix of one site's assets.
    pub fn site_prefix(&self, site_id: common::SiteId) -> String {
        format!("{}/{}", self.sites_prefix, site_id)
    }
}

/// Everything a handler may touch.
#[derive(Clone)]
pub struct Services {
    pub db: Arc<dyn Database>,
    pub object_store: Arc<dyn ObjectStore>,
    pub cdn: Arc<dyn Cdn>,
    pub dns: Arc<dyn Dns>,
    pub certificates: Arc<dyn Certificates>,
    pub mailer: Arc<dyn Mailer>,
    pub builder: Arc<dyn TemplateBuilder>,
    pub locks: TemplateLocks,
    pub settings: ProvisioningSettings,
}

/// Deadline and abort signal of one handler invocation.
#[derive(Clone)]
pub struct HandlerContext {
    services: Arc<Services>,
    deadline: Instant,
    abort: CancellationToken,
}

impl HandlerContext {
    pub fn new(services: Arc<Services>, timeout: Duration, abort: CancellationToken) -> Self {
        Self {
            services,
            deadline: Instant::now() + timeout,
            abort,
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn settings(&self) -> &ProvisioningSettings {
        &self.services.settings
    }

    /// Time left before the handler deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Opens a unit of work on the shared database.
    pub async fn begin(&self) -> Result<UnitOfWork> {
        Ok(UnitOfWork::start(self.services.db.clone()).await?)
    }

    /// Runs an external call under the handler deadline.
    pub async fn call<T, E, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<WorkflowError>,
    {
        self.run_until(operation, self.deadline, fut).await
    }

    /// Runs an external call under `limit` or the handler deadline,
    /// whichever comes first.
    pub async fn call_within<T, E, F>(
        &self,
        operation: &'static str,
        limit: Duration,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<WorkflowError>,
    {
        let deadline = self.deadline.min(Instant::now() + limit);
        self.run_until(operation, deadline, fut).await
    }

    /// Sleeps unless the handler is aborted first.
    pub async fn pause(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.abort.cancelled() => Err(WorkflowError::Cancelled("pause")),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    async fn run_until<T, E, F>(
        &self,
        operation: &'static str,
        deadline: Instant,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<WorkflowError>,
    {
        let started = Instant::now();
        tokio::select! {
            _ = self.abort.cancelled() => Err(WorkflowError::Cancelled(operation)),
            result = tokio::time::timeout_at(deadline, fut) => match result {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(WorkflowError::Timeout {
                    operation,
                    after: started.elapsed(),
                }),
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use ports::{
        BuildMode, InMemoryCdn, InMemoryCertificates, InMemoryDns, InMemoryMailer,
        InMemoryObjectStore, LocalTemplateBuilder, TemplateLayout,
    };
    use store::MemoryDatabase;

    /// Services wired to in-memory fakes, with templates under `root`.
    pub(crate) fn services(db: MemoryDatabase, root: &std::path::Path) -> Services {
        let object_store = InMemoryObjectStore::new();
        let builder = LocalTemplateBuilder::new(
            Arc::new(object_store.clone()),
            TemplateLayout {
                templates_root: root.to_path_buf(),
                templates_prefix: "templates/".to_string(),
                build_folder: "dist".to_string(),
                fields_file_path: "src".to_string(),
                fields_file_name: "fields.json".to_string(),
            },
            BuildMode::CopySources,
        );
        Services {
            db: Arc::new(db),
            object_store: Arc::new(object_store),
            cdn: Arc::new(InMemoryCdn::new()),
            dns: Arc::new(InMemoryDns::new()),
            certificates: Arc::new(InMemoryCertificates::new()),
            mailer: Arc::new(InMemoryMailer::new()),
            builder: Arc::new(builder),
            locks: TemplateLocks::new(),
            settings: ProvisioningSettings::new("example.com", "bucket.s3-website.test", "arn:default"),
        }
    }
}
