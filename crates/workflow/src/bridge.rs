//! Template change queue bridge.
//!
//! Drains notifications of template source changes from an external queue
//! and rebuilds the affected templates directly, without going through the
//! outbox.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use ports::{MessageQueue, QueueMessage};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::context::{HandlerContext, Services};
use crate::error::{Result, WorkflowError};
use crate::handlers::rebuild_template;

/// Body of a template change notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TemplateChange {
    pub commit: String,
    pub templates: Vec<String>,
}

impl TemplateChange {
    pub fn parse(message: &QueueMessage) -> Result<Self> {
        serde_json::from_str(&message.body).map_err(|e| WorkflowError::MalformedMessage {
            id: message.id.clone(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub max_messages: usize,
    pub wait: Duration,
    pub visibility: Duration,
    /// Deadline of one template rebuild.
    pub rebuild_timeout: Duration,
    /// Pause after a failed receive.
    pub error_backoff: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait: Duration::from_secs(20),
            visibility: Duration::from_secs(30),
            rebuild_timeout: Duration::from_secs(600),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// Summary of one drained batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeReport {
    pub received: usize,
    /// Distinct templates named by the parsed messages.
    pub templates: Vec<String>,
    pub rebuilt: usize,
    pub failed: usize,
    pub deleted: usize,
}

pub struct QueueBridge {
    queue: Arc<dyn MessageQueue>,
    services: Arc<Services>,
    config: BridgeConfig,
    abort: CancellationToken,
}

impl QueueBridge {
    pub fn new(queue: Arc<dyn MessageQueue>, services: Arc<Services>, config: BridgeConfig) -> Self {
        Self {
            queue,
            services,
            config,
            abort: CancellationToken::new(),
        }
    }

    /// Token that cancels in-flight rebuilds when triggered.
    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }

    /// Drains the queue until `shutdown` is cancelled. A batch that has been
    /// received is always processed first.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!("Template queue bridge started");
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.receive() => received,
            };
            match received {
                Ok(messages) => {
                    if let Err(e) = self.process(messages).await {
                        tracing::error!(error = %e, "Template queue batch failed");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Template queue receive failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }
        tracing::info!("Template queue bridge stopped");
    }

    /// Receives and processes one batch.
    pub async fn drain_once(&self) -> Result<BridgeReport> {
        let messages = self.receive().await?;
        self.process(messages).await
    }

    async fn receive(&self) -> Result<Vec<QueueMessage>> {
        Ok(self
            .queue
            .receive(
                self.config.max_messages,
                self.config.wait,
                self.config.visibility,
            )
            .await?)
    }

    #[tracing::instrument(skip_all, fields(messages = messages.len()))]
    async fn process(&self, messages: Vec<QueueMessage>) -> Result<BridgeReport> {
        let mut report = BridgeReport {
            received: messages.len(),
            ..BridgeReport::default()
        };
        if messages.is_empty() {
            return Ok(report);
        }
        metrics::counter!("queue_bridge_messages_total").increment(messages.len() as u64);

        let mut parsed = Vec::with_capacity(messages.len());
        let mut templates = BTreeSet::new();
        for message in messages {
            match TemplateChange::parse(&message) {
                Ok(change) => {
                    tracing::debug!(commit = %change.commit, templates = ?change.templates, "Template change received");
                    templates.extend(change.templates.iter().cloned());
                    parsed.push((message, change));
                }
                Err(e) => tracing::warn!(error = %e, "Skipping template change message"),
            }
        }

        let mut failed = BTreeSet::new();
        for template in &templates {
            let ctx = HandlerContext::new(
                self.services.clone(),
                self.config.rebuild_timeout,
                self.abort.clone(),
            );
            match rebuild_template(&ctx, template).await {
                Ok(_) => {
                    metrics::counter!("queue_bridge_rebuilds_total", "outcome" => "ok").increment(1);
                    report.rebuilt += 1;
                }
                Err(e) => {
                    metrics::counter!("queue_bridge_rebuilds_total", "outcome" => "error")
                        .increment(1);
                    tracing::error!(template = %template, error = %e, "Template rebuild failed");
                    failed.insert(template.clone());
                }
            }
        }
        report.failed = failed.len();
        report.templates = templates.into_iter().collect();

        let handles: Vec<String> = parsed
            .iter()
            .filter(|(_, change)| change.templates.iter().all(|t| !failed.contains(t)))
            .map(|(message, _)| message.receipt_handle.clone())
            .collect();
        if !handles.is_empty() {
            self.queue.delete_batch(&handles).await?;
        }
        report.deleted = handles.len();
        Ok(report)
    }
}
