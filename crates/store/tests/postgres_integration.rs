//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use serial_test::serial;
use sqlx::PgPool;
use store::{
    AccountRepository, Database, DomainType, MailRepository, NewMail, NewOutboxEntry, NewSite,
    OutboxRepository, OutboxStatus, PgDatabase, PlanId, Provision, ProvisionRepository,
    ProvisionStatus, ProvisionUpdate, SiteRepository, SiteStatus, StoreError, TemplateId,
    UnitOfWork, UserId,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!("../../../migrations/001_create_schema.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/002_seed_mail_templates.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh database with its own pool, cleared tables and one user and
/// template seeded with id 1.
async fn get_test_db() -> (PgPool, Arc<dyn Database>) {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE outbox, mails, provisions, sites, templates, users RESTART IDENTITY CASCADE",
    )
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query("INSERT INTO users (email, first_name, last_name) VALUES ('ada@example.com', 'Ada', 'Lovelace')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO templates (name) VALUES ('landing')")
        .execute(&pool)
        .await
        .unwrap();

    let db: Arc<dyn Database> = Arc::new(PgDatabase::new(pool.clone()));
    (pool, db)
}

fn new_site() -> NewSite {
    NewSite {
        template_id: TemplateId::new(1),
        owner_id: UserId::new(1),
        plan_id: PlanId::new(1),
        fields: serde_json::json!({"title": "Hello"}),
        subscription_id: Some("sub_123".to_string()),
    }
}

#[tokio::test]
#[serial]
async fn append_and_claim_in_creation_order() {
    let (_, db) = get_test_db().await;

    let mut uow = UnitOfWork::start(db.clone()).await.unwrap();
    let tx = uow.tx().unwrap();
    let first = tx
        .append(NewOutboxEntry::new("A", serde_json::json!({"n": 1})))
        .await
        .unwrap();
    let second = tx
        .append(NewOutboxEntry::new("B", serde_json::json!({"n": 2})))
        .await
        .unwrap();
    uow.commit().await.unwrap();

    let mut uow = UnitOfWork::start(db).await.unwrap();
    let claimed = uow.tx().unwrap().claim_batch(5).await.unwrap();
    uow.commit().await.unwrap();

    let ids: Vec<_> = claimed.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![first, second]);
    assert_eq!(claimed[0].payload, serde_json::json!({"n": 1}));
    assert_eq!(claimed[0].status, OutboxStatus::NotProcessed);
}

#[tokio::test]
#[serial]
async fn claimed_rows_are_skipped_by_concurrent_claims() {
    let (_, db) = get_test_db().await;

    let mut uow = UnitOfWork::start(db.clone()).await.unwrap();
    uow.tx()
        .unwrap()
        .append(NewOutboxEntry::new("A", serde_json::json!({})))
        .await
        .unwrap();
    uow.commit().await.unwrap();

    let mut holder = UnitOfWork::start(db.clone()).await.unwrap();
    assert_eq!(holder.tx().unwrap().claim_batch(5).await.unwrap().len(), 1);

    let mut other = UnitOfWork::start(db).await.unwrap();
    assert!(other.tx().unwrap().claim_batch(5).await.unwrap().is_empty());

    other.rollback().await.unwrap();
    holder.rollback().await.unwrap();
}

#[tokio::test]
#[serial]
async fn status_updates_are_terminal_for_claims() {
    let (_, db) = get_test_db().await;

    let mut uow = UnitOfWork::start(db.clone()).await.unwrap();
    let tx = uow.tx().unwrap();
    let id = tx
        .append(NewOutboxEntry::new("A", serde_json::json!({})))
        .await
        .unwrap();
    tx.set_status(id, OutboxStatus::Failed).await.unwrap();
    uow.commit().await.unwrap();

    let mut uow = UnitOfWork::start(db).await.unwrap();
    let tx = uow.tx().unwrap();
    assert!(tx.claim_batch(5).await.unwrap().is_empty());
    assert_eq!(tx.get_entry(id).await.unwrap().status, OutboxStatus::Failed);
    assert_eq!(
        tx.list_entries(Some(OutboxStatus::Failed), 10)
            .await
            .unwrap()
            .len(),
        1
    );
    let err = tx
        .set_status(store::OutboxId::new(999), OutboxStatus::Processed)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
#[serial]
async fn deferred_rows_wait_until_available() {
    let (_, db) = get_test_db().await;

    let mut uow = UnitOfWork::start(db.clone()).await.unwrap();
    let tx = uow.tx().unwrap();
    let id = tx
        .append(NewOutboxEntry::new("A", serde_json::json!({})))
        .await
        .unwrap();
    tx.defer_until(id, chrono::Utc::now() + chrono::Duration::minutes(10))
        .await
        .unwrap();
    uow.commit().await.unwrap();

    let mut uow = UnitOfWork::start(db).await.unwrap();
    assert!(uow.tx().unwrap().claim_batch(5).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn rollback_discards_state_and_outbox_rows_together() {
    let (pool, db) = get_test_db().await;

    let mut uow = UnitOfWork::start(db).await.unwrap();
    let tx = uow.tx().unwrap();
    tx.insert_site(new_site()).await.unwrap();
    tx.append(NewOutboxEntry::new("A", serde_json::json!({})))
        .await
        .unwrap();
    uow.rollback().await.unwrap();

    let sites: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sites")
        .fetch_one(&pool)
        .await
        .unwrap();
    let events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(sites, 0);
    assert_eq!(events, 0);
}

#[tokio::test]
#[serial]
async fn site_lifecycle_queries() {
    let (_, db) = get_test_db().await;

    let mut uow = UnitOfWork::start(db).await.unwrap();
    let tx = uow.tx().unwrap();
    let site = tx.insert_site(new_site()).await.unwrap();
    assert_eq!(site.status, SiteStatus::InCreation);
    assert_eq!(site.fields, serde_json::json!({"title": "Hello"}));

    let last = tx.last_site_created_at(UserId::new(1)).await.unwrap();
    assert_eq!(last, Some(site.created_at));

    tx.update_site_status(site.id, SiteStatus::Created)
        .await
        .unwrap();
    let by_sub = tx.find_site_by_subscription("sub_123").await.unwrap().unwrap();
    assert_eq!(by_sub.status, SiteStatus::Created);

    let live = tx
        .sites_for_template("landing", SiteStatus::Created)
        .await
        .unwrap();
    assert_eq!(live.len(), 1);

    let missing = tx.get_site(store::SiteId::new(404)).await.unwrap_err();
    assert!(missing.is_not_found());
    uow.commit().await.unwrap();
}

#[tokio::test]
#[serial]
async fn provision_insert_and_partial_update() {
    let (_, db) = get_test_db().await;

    let mut uow = UnitOfWork::start(db).await.unwrap();
    let tx = uow.tx().unwrap();
    let site = tx.insert_site(new_site()).await.unwrap();

    let provision = Provision::in_process(site.id, DomainType::SeparateDomain, "example.click")
        .with_cert_arn("arn:aws:acm:cert/1");
    tx.insert_provision(&provision).await.unwrap();

    let duplicate = tx.insert_provision(&provision).await.unwrap_err();
    assert!(matches!(duplicate, StoreError::Conflict(_)));
    uow.rollback().await.unwrap();
}

#[tokio::test]
#[serial]
async fn provision_update_keeps_unset_columns() {
    let (_, db) = get_test_db().await;

    let mut uow = UnitOfWork::start(db).await.unwrap();
    let tx = uow.tx().unwrap();
    let site = tx.insert_site(new_site()).await.unwrap();
    tx.insert_provision(
        &Provision::in_process(site.id, DomainType::SeparateDomain, "example.click")
            .with_cert_arn("arn:aws:acm:cert/1"),
    )
    .await
    .unwrap();

    let updated = tx
        .update_provision(site.id, ProvisionUpdate::default().cloudfront_id("E2ABC"))
        .await
        .unwrap();
    assert_eq!(updated.cloudfront_id.as_deref(), Some("E2ABC"));
    assert_eq!(updated.cert_arn.as_deref(), Some("arn:aws:acm:cert/1"));
    assert_eq!(updated.status, ProvisionStatus::InProcess);

    let updated = tx
        .update_provision(site.id, ProvisionUpdate::status(ProvisionStatus::Provisioned))
        .await
        .unwrap();
    assert_eq!(updated.status, ProvisionStatus::Provisioned);
    assert_eq!(updated.cloudfront_id.as_deref(), Some("E2ABC"));
    uow.commit().await.unwrap();
}

#[tokio::test]
#[serial]
async fn accounts_and_mails() {
    let (pool, db) = get_test_db().await;

    let mut uow = UnitOfWork::start(db).await.unwrap();
    let tx = uow.tx().unwrap();
    let user = tx.get_user(UserId::new(1)).await.unwrap();
    assert_eq!(user.first_name, "Ada");
    assert_eq!(tx.get_template(TemplateId::new(1)).await.unwrap().name, "landing");
    assert!(
        tx.find_mail_template("SiteCreated")
            .await
            .unwrap()
            .is_some()
    );

    let mail = tx
        .insert_mail(NewMail {
            mail_type: "SiteCreated".to_string(),
            recipients: vec![user.email.clone()],
            subject: "Your site is live".to_string(),
            content: "Hello".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(mail.recipients, vec!["ada@example.com".to_string()]);
    uow.commit().await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mails WHERE type = 'SiteCreated'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}
