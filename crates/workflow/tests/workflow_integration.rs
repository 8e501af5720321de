//! End-to-end workflow scenarios over the in-memory database and port fakes.

use std::sync::Arc;
use std::time::Duration;

use common::{DomainType, OutboxStatus, ProvisionStatus, SiteId, SiteStatus, TemplateId, UserId};
use ports::{
    BuildMode, InMemoryCdn, InMemoryCertificates, InMemoryDns, InMemoryMailer,
    InMemoryObjectStore, InMemoryQueue, LocalTemplateBuilder, OperationStatus, TemplateLayout,
};
use serde_json::json;
use store::{
    MemoryDatabase, NewOutboxEntry, NewSite, OutboxRepository, Provision, ProvisionRepository,
    SiteRepository, UnitOfWork,
};
use tempfile::TempDir;
use workflow::{
    BridgeConfig, HandlerRegistry, OutboxPoller, PollReport, PollerConfig, ProvisioningSettings,
    QueueBridge, Services, TemplateLocks, WorkflowEvent,
};

const OWNER: UserId = UserId::new(1);

struct Harness {
    db: MemoryDatabase,
    objects: InMemoryObjectStore,
    cdn: InMemoryCdn,
    dns: InMemoryDns,
    mailer: InMemoryMailer,
    services: Arc<Services>,
    poller: OutboxPoller,
    _templates: TempDir,
}

impl Harness {
    async fn new() -> Self {
        let db = MemoryDatabase::new();
        db.seed_user(OWNER, "ada@example.com", "Ada", "Lovelace").await;
        db.seed_template(TemplateId::new(1), "landing").await;
        db.seed_mail_template("SiteCreated", "Hi {{ first_name }}, {{ domain }} is live.")
            .await;
        db.seed_mail_template(
            "SiteDeactivated",
            "Hi {{ first_name }}, {{ domain }} was taken down: {{ reason }}.",
        )
        .await;

        let objects = InMemoryObjectStore::new();
        objects.put("templates/landing/index.html", "<h1>landing</h1>");
        objects.put("templates/landing/src/app.js", "console.log('landing')");

        let templates = tempfile::tempdir().unwrap();
        let builder = LocalTemplateBuilder::new(
            Arc::new(objects.clone()),
            TemplateLayout {
                templates_root: templates.path().to_path_buf(),
                templates_prefix: "templates/".to_string(),
                build_folder: "dist".to_string(),
                fields_file_path: "src".to_string(),
                fields_file_name: "fields.json".to_string(),
            },
            BuildMode::CopySources,
        );

        let mut settings =
            ProvisioningSettings::new("example.com", "bucket.s3-website.test", "arn:default");
        settings.deploy_wait = Duration::from_millis(50);
        settings.deploy_poll_interval = Duration::from_millis(10);
        settings.teardown_wait = Duration::from_millis(30);

        let cdn = InMemoryCdn::new();
        let dns = InMemoryDns::new();
        let mailer = InMemoryMailer::new();
        let services = Arc::new(Services {
            db: Arc::new(db.clone()),
            object_store: Arc::new(objects.clone()),
            cdn: Arc::new(cdn.clone()),
            dns: Arc::new(dns.clone()),
            certificates: Arc::new(InMemoryCertificates::new()),
            mailer: Arc::new(mailer.clone()),
            builder: Arc::new(builder),
            locks: TemplateLocks::new(),
            settings,
        });
        let poller = OutboxPoller::new(
            services.clone(),
            HandlerRegistry::standard(),
            PollerConfig {
                limit: 5,
                interval: Duration::from_millis(10),
                defer_delay: Duration::ZERO,
                handler_timeout: Duration::from_secs(5),
                status_timeout: Duration::from_secs(1),
            },
        );

        Self {
            db,
            objects,
            cdn,
            dns,
            mailer,
            services,
            poller,
            _templates: templates,
        }
    }

    /// Creates a site and requests its provisioning, the way the command
    /// layer does.
    async fn request_provision(&self, domain_type: DomainType, domain: &str) -> SiteId {
        let fields = json!({ "title": "My site" });
        let mut uow = UnitOfWork::start(self.services.db.clone()).await.unwrap();
        let tx = uow.tx().unwrap();
        let site = tx
            .insert_site(NewSite {
                template_id: TemplateId::new(1),
                owner_id: OWNER,
                plan_id: common::PlanId::new(1),
                fields: fields.clone(),
                subscription_id: Some("sub_1".to_string()),
            })
            .await
            .unwrap();
        tx.update_site_status(site.id, SiteStatus::AwaitingProvision)
            .await
            .unwrap();
        let event =
            WorkflowEvent::site_awaiting_provision(site.id, "landing", domain_type, domain, fields);
        tx.append(event.to_outbox_entry().unwrap()).await.unwrap();
        uow.commit().await.unwrap();
        site.id
    }

    /// Moves a site on, the way an owner or the payment webhook would.
    async fn set_site_status(&self, id: SiteId, status: SiteStatus) {
        let mut uow = UnitOfWork::start(self.services.db.clone()).await.unwrap();
        uow.tx()
            .unwrap()
            .update_site_status(id, status)
            .await
            .unwrap();
        uow.commit().await.unwrap();
    }

    async fn emit(&self, event: WorkflowEvent) {
        self.append(event.to_outbox_entry().unwrap()).await;
    }

    async fn append(&self, entry: NewOutboxEntry) {
        let mut uow = UnitOfWork::start(self.services.db.clone()).await.unwrap();
        uow.tx().unwrap().append(entry).await.unwrap();
        uow.commit().await.unwrap();
    }

    async fn poll(&self) -> PollReport {
        self.poller.poll_once().await.unwrap()
    }

    /// Polls until nothing is claimable or `cycles` runs out.
    async fn drain(&self, cycles: usize) {
        for _ in 0..cycles {
            if self.poll().await.claimed == 0 {
                return;
            }
        }
    }

    async fn site_status(&self, id: SiteId) -> SiteStatus {
        self.db.snapshot().await.sites[&id].status
    }

    async fn provision(&self, id: SiteId) -> Option<Provision> {
        self.db.snapshot().await.provisions.get(&id).cloned()
    }

    async fn statuses(&self, event: &str) -> Vec<OutboxStatus> {
        self.db
            .snapshot()
            .await
            .outbox_events(event)
            .into_iter()
            .map(|e| e.status)
            .collect()
    }
}

#[tokio::test]
async fn default_domain_site_goes_live() {
    let h = Harness::new().await;
    h.cdn.set_polls_until_deployed(1);
    let site_id = h.request_provision(DomainType::DefaultDomain, "mysite").await;

    h.drain(10).await;

    assert_eq!(h.site_status(site_id).await, SiteStatus::Created);
    let provision = h.provision(site_id).await.unwrap();
    assert_eq!(provision.status, ProvisionStatus::Provisioned);
    assert_eq!(provision.domain, "mysite.example.com");
    assert_eq!(provision.cloudfront_id.as_deref(), Some("E0001"));
    assert_eq!(provision.cert_arn.as_deref(), Some("arn:default"));

    let request = h.cdn.request("E0001").unwrap();
    assert_eq!(request.origin_path, "/sites/1");
    assert_eq!(request.alias, "mysite.example.com");
    assert_eq!(
        h.dns.alias("example.com", "mysite.example.com").as_deref(),
        Some("e0001.cdn.test")
    );
    assert!(
        h.objects
            .keys_with_prefix("sites/1/")
            .contains(&"sites/1/index.html".to_string())
    );
    assert_eq!(
        h.objects.content_type("sites/1/index.html").as_deref(),
        Some("text/html")
    );

    let state = h.db.snapshot().await;
    let events: Vec<_> = state
        .outbox_in_order()
        .into_iter()
        .map(|e| (e.event, e.status))
        .collect();
    assert_eq!(
        events,
        vec![
            ("SiteAwaitingProvision".to_string(), OutboxStatus::Processed),
            ("FinalizeProvision".to_string(), OutboxStatus::Processed),
            ("SendMail".to_string(), OutboxStatus::Processed),
        ]
    );
    let mails = state.mails_of_type("SiteCreated");
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].recipients, vec!["ada@example.com"]);
    assert_eq!(mails[0].content, "Hi Ada, mysite.example.com is live.");
    assert_eq!(h.mailer.sent().len(), 1);
}

#[tokio::test]
async fn separate_domain_waits_for_registration() {
    let h = Harness::new().await;
    h.dns.set_initial_status(OperationStatus::InProgress);
    let site_id = h
        .request_provision(DomainType::SeparateDomain, "example.click")
        .await;

    let first = h.poll().await;
    assert_eq!(first.processed, 1);
    let provision = h.provision(site_id).await.unwrap();
    assert_eq!(provision.status, ProvisionStatus::InProcess);
    assert!(provision.cloudfront_id.is_none());
    assert_eq!(h.statuses("ProvisionCDN").await, vec![OutboxStatus::NotProcessed]);

    let second = h.poll().await;
    assert_eq!(second.deferred, 1);
    assert_eq!(h.statuses("ProvisionCDN").await, vec![OutboxStatus::NotProcessed]);
    assert_eq!(h.cdn.distribution_count(), 0);

    h.dns.complete_all(OperationStatus::Successful);
    let third = h.poll().await;
    assert_eq!(third.processed, 1);
    assert_eq!(h.statuses("ProvisionCDN").await, vec![OutboxStatus::Processed]);
    assert_eq!(h.statuses("FinalizeProvision").await, vec![OutboxStatus::NotProcessed]);

    let request = h.cdn.request("E0001").unwrap();
    assert_eq!(request.alias, "example.click");
    assert!(request.cert_arn.ends_with("/0001"));
    assert_eq!(
        h.provision(site_id).await.unwrap().cloudfront_id.as_deref(),
        Some("E0001")
    );

    h.drain(10).await;
    assert_eq!(h.site_status(site_id).await, SiteStatus::Created);
    assert_eq!(
        h.dns.alias("example.click", "example.click").as_deref(),
        Some("e0001.cdn.test")
    );
    assert_eq!(h.db.snapshot().await.mails_of_type("SiteCreated").len(), 1);
}

#[tokio::test]
async fn undeployed_distribution_is_retried() {
    let h = Harness::new().await;
    h.cdn.set_stalled(true);
    let site_id = h.request_provision(DomainType::DefaultDomain, "slow").await;

    assert_eq!(h.poll().await.processed, 1);
    let waiting = h.poll().await;
    assert_eq!(waiting.deferred, 1);
    assert_eq!(h.statuses("FinalizeProvision").await, vec![OutboxStatus::NotProcessed]);
    assert_eq!(h.site_status(site_id).await, SiteStatus::AwaitingProvision);
    assert!(h.dns.alias("example.com", "slow.example.com").is_none());

    h.cdn.set_stalled(false);
    assert_eq!(h.poll().await.processed, 1);
    assert_eq!(h.statuses("FinalizeProvision").await, vec![OutboxStatus::Processed]);
    assert_eq!(h.site_status(site_id).await, SiteStatus::Created);

    h.drain(5).await;
    assert_eq!(h.db.snapshot().await.mails_of_type("SiteCreated").len(), 1);
}

#[tokio::test]
async fn deactivation_tears_down_a_live_site() {
    let h = Harness::new().await;
    let site_id = h.request_provision(DomainType::DefaultDomain, "mysite").await;
    h.drain(10).await;
    assert_eq!(h.site_status(site_id).await, SiteStatus::Created);

    h.emit(WorkflowEvent::deactivate_site(site_id, "payment failed"))
        .await;
    h.drain(10).await;

    assert!(!h.cdn.is_enabled("E0001"));
    assert!(h.dns.alias("example.com", "mysite.example.com").is_none());
    assert_eq!(
        h.provision(site_id).await.unwrap().status,
        ProvisionStatus::Deactivated
    );
    assert_eq!(h.site_status(site_id).await, SiteStatus::Deactivated);

    let mails = h.db.snapshot().await.mails_of_type("SiteDeactivated");
    assert_eq!(mails.len(), 1);
    assert_eq!(
        mails[0].content,
        "Hi Ada, mysite.example.com was taken down: payment failed."
    );

    // A replay finds the provision already deactivated.
    h.emit(WorkflowEvent::deactivate_site(site_id, "payment failed"))
        .await;
    h.drain(10).await;
    assert_eq!(h.statuses("DeactivateSite").await, vec![OutboxStatus::Processed; 2]);
    assert_eq!(h.db.snapshot().await.mails_of_type("SiteDeactivated").len(), 1);
}

#[tokio::test]
async fn site_that_left_provisioning_is_not_built() {
    let h = Harness::new().await;
    let site_id = h.request_provision(DomainType::DefaultDomain, "mysite").await;
    h.set_site_status(site_id, SiteStatus::Deleted).await;

    let report = h.poll().await;

    assert_eq!(report.processed, 1);
    assert_eq!(h.objects.upload_count(), 0);
    assert_eq!(h.cdn.distribution_count(), 0);
    assert!(h.provision(site_id).await.is_none());
    assert!(h.statuses("FinalizeProvision").await.is_empty());
    assert_eq!(h.site_status(site_id).await, SiteStatus::Deleted);
}

#[tokio::test]
async fn finalize_abandons_a_site_awaiting_deactivation() {
    let h = Harness::new().await;
    let site_id = h.request_provision(DomainType::DefaultDomain, "mysite").await;
    assert_eq!(h.poll().await.processed, 1);
    assert!(h.cdn.is_enabled("E0001"));

    h.set_site_status(site_id, SiteStatus::AwaitingDeactivation)
        .await;
    h.drain(10).await;

    assert_eq!(h.statuses("FinalizeProvision").await, vec![OutboxStatus::Processed]);
    assert!(!h.cdn.is_enabled("E0001"));
    assert!(h.dns.alias("example.com", "mysite.example.com").is_none());
    assert_eq!(
        h.provision(site_id).await.unwrap().status,
        ProvisionStatus::Deactivated
    );
    assert_eq!(h.site_status(site_id).await, SiteStatus::Deactivated);
    assert!(h.db.snapshot().await.mails_of_type("SiteCreated").is_empty());
}

#[tokio::test]
async fn registration_of_a_deleted_site_is_abandoned() {
    let h = Harness::new().await;
    h.dns.set_initial_status(OperationStatus::Successful);
    let site_id = h
        .request_provision(DomainType::SeparateDomain, "example.click")
        .await;
    assert_eq!(h.poll().await.processed, 1);

    h.set_site_status(site_id, SiteStatus::Deleted).await;
    h.drain(10).await;

    assert_eq!(h.statuses("ProvisionCDN").await, vec![OutboxStatus::Processed]);
    assert!(h.statuses("FinalizeProvision").await.is_empty());
    assert_eq!(h.cdn.distribution_count(), 0);
    assert_eq!(
        h.provision(site_id).await.unwrap().status,
        ProvisionStatus::Deactivated
    );
    assert_eq!(h.site_status(site_id).await, SiteStatus::Deleted);
}

#[tokio::test]
async fn deactivated_provision_is_never_finalized() {
    let h = Harness::new().await;
    let site_id = h.request_provision(DomainType::DefaultDomain, "mysite").await;
    h.drain(10).await;
    h.emit(WorkflowEvent::deactivate_site(site_id, "payment failed"))
        .await;
    h.drain(10).await;

    h.emit(WorkflowEvent::finalize_provision(
        site_id,
        "E0001",
        DomainType::DefaultDomain,
        "mysite.example.com",
    ))
    .await;
    h.drain(10).await;

    assert_eq!(
        h.statuses("FinalizeProvision").await,
        vec![OutboxStatus::Processed; 2]
    );
    assert_eq!(
        h.provision(site_id).await.unwrap().status,
        ProvisionStatus::Deactivated
    );
    assert_eq!(h.site_status(site_id).await, SiteStatus::Deactivated);
    assert!(h.dns.alias("example.com", "mysite.example.com").is_none());
    assert!(!h.cdn.is_enabled("E0001"));
}

#[tokio::test]
async fn queue_bridge_rebuilds_each_template_once() {
    let h = Harness::new().await;
    h.db.seed_template(TemplateId::new(2), "t1").await;
    h.db.seed_template(TemplateId::new(3), "t2").await;
    h.objects.put("templates/t1/index.html", "<h1>t1</h1>");
    h.objects.put("templates/t2/index.html", "<h1>t2</h1>");

    let mut uow = UnitOfWork::start(h.services.db.clone()).await.unwrap();
    let tx = uow.tx().unwrap();
    let mut live = Vec::new();
    for template in [2, 2, 3] {
        let site = tx
            .insert_site(NewSite {
                template_id: TemplateId::new(template),
                owner_id: OWNER,
                plan_id: common::PlanId::new(1),
                fields: json!({ "title": format!("site of {template}") }),
                subscription_id: None,
            })
            .await
            .unwrap();
        tx.update_site_status(site.id, SiteStatus::Created)
            .await
            .unwrap();
        live.push(site.id);
    }
    uow.commit().await.unwrap();

    let queue = InMemoryQueue::new();
    queue.push(r#"{"commit":"abc","templates":["t1","t1","t2"]}"#);
    let bridge = QueueBridge::new(
        Arc::new(queue.clone()),
        h.services.clone(),
        BridgeConfig {
            wait: Duration::from_millis(50),
            ..BridgeConfig::default()
        },
    );

    let report = bridge.drain_once().await.unwrap();
    assert_eq!(report.received, 1);
    assert_eq!(report.templates, vec!["t1", "t2"]);
    assert_eq!(report.rebuilt, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(report.deleted, 1);
    assert_eq!(queue.deleted_count(), 1);
    assert!(queue.is_empty());

    for id in live {
        let key = format!("sites/{id}/index.html");
        assert!(h.objects.keys_with_prefix(&key).contains(&key));
    }
    assert!(h.db.snapshot().await.outbox.is_empty());
}

#[tokio::test]
async fn queue_bridge_keeps_messages_of_failed_templates() {
    let h = Harness::new().await;
    h.objects.put("templates/t2/index.html", "<h1>t2</h1>");

    let queue = InMemoryQueue::new();
    queue.push(r#"{"commit":"abc","templates":["t2","missing"]}"#);
    queue.push(r#"{"commit":"def","templates":["t2"]}"#);
    queue.push("not json");
    let bridge = QueueBridge::new(
        Arc::new(queue.clone()),
        h.services.clone(),
        BridgeConfig {
            wait: Duration::from_millis(50),
            ..BridgeConfig::default()
        },
    );

    let report = bridge.drain_once().await.unwrap();
    assert_eq!(report.received, 3);
    assert_eq!(report.templates, vec!["missing", "t2"]);
    assert_eq!(report.rebuilt, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.deleted, 1);
    assert_eq!(queue.len(), 2);
}

#[tokio::test]
async fn rebuild_event_refreshes_live_sites() {
    let h = Harness::new().await;
    let site_id = h.request_provision(DomainType::DefaultDomain, "mysite").await;
    h.drain(10).await;
    let uploads = h.objects.upload_count();

    h.objects.put("templates/landing/about.html", "<h1>about</h1>");
    h.emit(WorkflowEvent::rebuild_template("landing")).await;
    let report = h.poll().await;

    assert_eq!(report.processed, 1);
    assert!(h.objects.upload_count() > uploads);
    let key = format!("sites/{site_id}/about.html");
    assert!(h.objects.keys_with_prefix(&key).contains(&key));
}

#[tokio::test]
async fn uploaded_site_is_not_provisioned_twice() {
    let h = Harness::new().await;
    h.objects.put("sites/1/index.html", "<h1>already here</h1>");
    let site_id = h.request_provision(DomainType::DefaultDomain, "mysite").await;
    assert_eq!(site_id, SiteId::new(1));

    let report = h.poll().await;

    assert_eq!(report.deferred, 1);
    assert_eq!(h.objects.upload_count(), 0);
    assert_eq!(h.cdn.distribution_count(), 0);
    assert!(h.provision(site_id).await.is_none());
    assert_eq!(
        h.statuses("SiteAwaitingProvision").await,
        vec![OutboxStatus::NotProcessed]
    );
}

#[tokio::test]
async fn failed_write_emits_no_follow_up() {
    let h = Harness::new().await;
    let site_id = h.request_provision(DomainType::DefaultDomain, "mysite").await;
    let mut uow = UnitOfWork::start(h.services.db.clone()).await.unwrap();
    uow.tx()
        .unwrap()
        .insert_provision(&Provision::in_process(
            site_id,
            DomainType::DefaultDomain,
            "other.example.com",
        ))
        .await
        .unwrap();
    uow.commit().await.unwrap();

    let report = h.poll().await;

    assert_eq!(report.failed, 1);
    assert_eq!(
        h.statuses("SiteAwaitingProvision").await,
        vec![OutboxStatus::Failed]
    );
    assert!(h.statuses("FinalizeProvision").await.is_empty());
    assert_eq!(h.provision(site_id).await.unwrap().domain, "other.example.com");
}

#[tokio::test]
async fn failed_registration_marks_provision_in_error() {
    let h = Harness::new().await;
    h.dns.set_initial_status(OperationStatus::Failed);
    let site_id = h
        .request_provision(DomainType::SeparateDomain, "example.click")
        .await;

    h.poll().await;
    let report = h.poll().await;

    assert_eq!(report.failed, 1);
    assert_eq!(h.statuses("ProvisionCDN").await, vec![OutboxStatus::Failed]);
    assert_eq!(
        h.provision(site_id).await.unwrap().status,
        ProvisionStatus::InError
    );
    assert_eq!(h.cdn.distribution_count(), 0);
}

#[tokio::test]
async fn unknown_events_fail() {
    let h = Harness::new().await;
    h.append(NewOutboxEntry::new("Mystery", json!({}))).await;

    let report = h.poll().await;

    assert_eq!(report.claimed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(h.statuses("Mystery").await, vec![OutboxStatus::Failed]);
    assert_eq!(h.poll().await.claimed, 0);
}

#[tokio::test]
async fn bring_your_domain_fails_without_side_effects() {
    let h = Harness::new().await;
    let site_id = h
        .request_provision(DomainType::BringYourDomain, "mine.org")
        .await;

    let report = h.poll().await;

    assert_eq!(report.failed, 1);
    assert_eq!(h.objects.upload_count(), 0);
    assert!(h.provision(site_id).await.is_none());
}

#[tokio::test]
async fn deferral_delay_hides_events_from_the_next_claim() {
    let h = Harness::new().await;
    h.cdn.set_stalled(true);
    let poller = OutboxPoller::new(
        h.services.clone(),
        HandlerRegistry::standard(),
        PollerConfig {
            defer_delay: Duration::from_secs(60),
            handler_timeout: Duration::from_secs(5),
            ..PollerConfig::default()
        },
    );
    h.request_provision(DomainType::DefaultDomain, "slow").await;

    assert_eq!(poller.poll_once().await.unwrap().processed, 1);
    assert_eq!(poller.poll_once().await.unwrap().deferred, 1);

    let entry = h.db.snapshot().await.outbox_events("FinalizeProvision")[0].clone();
    assert_eq!(entry.status, OutboxStatus::NotProcessed);
    assert!(entry.available_at > chrono::Utc::now() + chrono::Duration::seconds(30));
    assert_eq!(poller.poll_once().await.unwrap().claimed, 0);
}
