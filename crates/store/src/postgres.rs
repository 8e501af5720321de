use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};

use crate::{
    AccountRepository, Database, DomainType, Mail, MailRepository, NewMail, NewOutboxEntry,
    NewSite, OutboxEntry, OutboxId, OutboxRepository, OutboxStatus, PlanId, Provision,
    ProvisionRepository, ProvisionStatus, ProvisionUpdate, Result, Site, SiteId, SiteRepository,
    SiteStatus, StoreError, Template, TemplateId, Transaction, User, UserId,
};

const OUTBOX_COLUMNS: &str = "id, event, status, payload, created_at, available_at";
const SITE_COLUMNS: &str =
    "id, template_id, owner_id, plan_id, status, fields, subscription_id, created_at, updated_at";
const PROVISION_COLUMNS: &str =
    "site_id, type, status, domain, cert_arn, cloudfront_id, created_at, updated_at";

/// PostgreSQL-backed database.
#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Creates a database over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

/// Open PostgreSQL transaction. sqlx rolls it back when dropped.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

fn row_to_entry(row: PgRow) -> Result<OutboxEntry> {
    Ok(OutboxEntry {
        id: OutboxId::new(row.try_get("id")?),
        event: row.try_get("event")?,
        status: OutboxStatus::from_code(row.try_get("status")?)?,
        payload: row.try_get("payload")?,
        created_at: row.try_get("created_at")?,
        available_at: row.try_get("available_at")?,
    })
}

fn row_to_site(row: PgRow) -> Result<Site> {
    Ok(Site {
        id: SiteId::new(row.try_get("id")?),
        template_id: TemplateId::new(row.try_get("template_id")?),
        owner_id: UserId::new(row.try_get("owner_id")?),
        plan_id: PlanId::new(row.try_get("plan_id")?),
        status: row.try_get::<String, _>("status")?.parse()?,
        fields: row.try_get("fields")?,
        subscription_id: row.try_get("subscription_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_provision(row: PgRow) -> Result<Provision> {
    Ok(Provision {
        site_id: SiteId::new(row.try_get("site_id")?),
        provision_type: row.try_get::<String, _>("type")?.parse::<DomainType>()?,
        status: row.try_get::<String, _>("status")?.parse::<ProvisionStatus>()?,
        domain: row.try_get("domain")?,
        cert_arn: row.try_get("cert_arn")?,
        cloudfront_id: row.try_get("cloudfront_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn unique_violation(err: sqlx::Error, message: impl FnOnce() -> String) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.is_unique_violation()
    {
        return StoreError::Conflict(message());
    }
    StoreError::Database(err)
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for PgTransaction {
    async fn append(&mut self, entry: NewOutboxEntry) -> Result<OutboxId> {
        let now = Utc::now();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO outbox (event, status, payload, created_at, available_at)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING id
            "#,
        )
        .bind(&entry.event)
        .bind(OutboxStatus::NotProcessed.code())
        .bind(&entry.payload)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(OutboxId::new(id))
    }

    async fn claim_batch(&mut self, limit: i64) -> Result<Vec<OutboxEntry>> {
        let sql = format!(
            r#"
            SELECT {OUTBOX_COLUMNS}
            FROM outbox
            WHERE status = $1 AND available_at <= now()
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            FOR NO KEY UPDATE SKIP LOCKED
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(OutboxStatus::NotProcessed.code())
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await?;
        tracing::debug!(claimed = rows.len(), limit, "Outbox batch claimed");

        rows.into_iter().map(row_to_entry).collect()
    }

    async fn list_entries(
        &mut self,
        status: Option<OutboxStatus>,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>> {
        let sql = format!(
            r#"
            SELECT {OUTBOX_COLUMNS}
            FROM outbox
            WHERE ($1::SMALLINT IS NULL OR status = $1)
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(status.map(|s| s.code()))
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await?;

        rows.into_iter().map(row_to_entry).collect()
    }

    async fn get_entry(&mut self, id: OutboxId) -> Result<OutboxEntry> {
        let sql = format!("SELECT {OUTBOX_COLUMNS} FROM outbox WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_i64())
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| StoreError::not_found("Outbox entry", id))?;

        row_to_entry(row)
    }

    async fn set_status(&mut self, id: OutboxId, status: OutboxStatus) -> Result<()> {
        let result = sqlx::query("UPDATE outbox SET status = $1 WHERE id = $2")
            .bind(status.code())
            .bind(id.as_i64())
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Outbox entry", id));
        }
        Ok(())
    }

    async fn defer_until(&mut self, id: OutboxId, until: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE outbox SET available_at = $1 WHERE id = $2")
            .bind(until)
            .bind(id.as_i64())
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Outbox entry", id));
        }
        Ok(())
    }
}

#[async_trait]
impl ProvisionRepository for PgTransaction {
    async fn find_provision(&mut self, site_id: SiteId) -> Result<Option<Provision>> {
        let sql = format!("SELECT {PROVISION_COLUMNS} FROM provisions WHERE site_id = $1");
        let row = sqlx::query(&sql)
            .bind(site_id.as_i64())
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(row_to_provision).transpose()
    }

    async fn insert_provision(&mut self, provision: &Provision) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO provisions (site_id, type, status, domain, cert_arn, cloudfront_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(provision.site_id.as_i64())
        .bind(provision.provision_type.as_str())
        .bind(provision.status.as_str())
        .bind(&provision.domain)
        .bind(&provision.cert_arn)
        .bind(&provision.cloudfront_id)
        .bind(provision.created_at)
        .bind(provision.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            unique_violation(e, || {
                format!("provision for site {} already exists", provision.site_id)
            })
        })?;

        Ok(())
    }

    async fn update_provision(
        &mut self,
        site_id: SiteId,
        update: ProvisionUpdate,
    ) -> Result<Provision> {
        let sql = format!(
            r#"
            UPDATE provisions SET
                status = COALESCE($2, status),
                cert_arn = COALESCE($3, cert_arn),
                cloudfront_id = COALESCE($4, cloudfront_id),
                updated_at = now()
            WHERE site_id = $1
            RETURNING {PROVISION_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(site_id.as_i64())
            .bind(update.status.map(|s| s.as_str()))
            .bind(update.cert_arn)
            .bind(update.cloudfront_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| StoreError::not_found("Provision", site_id))?;

        row_to_provision(row)
    }
}

#[async_trait]
impl SiteRepository for PgTransaction {
    async fn insert_site(&mut self, site: NewSite) -> Result<Site> {
        let sql = format!(
            r#"
            INSERT INTO sites (template_id, owner_id, plan_id, status, fields, subscription_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {SITE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(site.template_id.as_i64())
            .bind(site.owner_id.as_i64())
            .bind(site.plan_id.as_i64())
            .bind(SiteStatus::InCreation.as_str())
            .bind(&site.fields)
            .bind(&site.subscription_id)
            .fetch_one(&mut *self.tx)
            .await?;

        row_to_site(row)
    }

    async fn find_site(&mut self, id: SiteId) -> Result<Option<Site>> {
        let sql = format!("SELECT {SITE_COLUMNS} FROM sites WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_i64())
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(row_to_site).transpose()
    }

    async fn find_site_by_subscription(&mut self, subscription_id: &str) -> Result<Option<Site>> {
        let sql = format!(
            "SELECT {SITE_COLUMNS} FROM sites WHERE subscription_id = $1 ORDER BY id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(subscription_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(row_to_site).transpose()
    }

    async fn update_site_status(&mut self, id: SiteId, status: SiteStatus) -> Result<()> {
        let result = sqlx::query("UPDATE sites SET status = $1, updated_at = now() WHERE id = $2")
            .bind(status.as_str())
            .bind(id.as_i64())
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Site", id));
        }
        Ok(())
    }

    async fn last_site_created_at(&mut self, owner_id: UserId) -> Result<Option<DateTime<Utc>>> {
        let created_at: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(created_at) FROM sites WHERE owner_id = $1")
                .bind(owner_id.as_i64())
                .fetch_one(&mut *self.tx)
                .await?;

        Ok(created_at)
    }

    async fn sites_for_template(
        &mut self,
        template_name: &str,
        status: SiteStatus,
    ) -> Result<Vec<Site>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.template_id, s.owner_id, s.plan_id, s.status, s.fields,
                   s.subscription_id, s.created_at, s.updated_at
            FROM sites s
            JOIN templates t ON t.id = s.template_id
            WHERE t.name = $1 AND s.status = $2
            ORDER BY s.id ASC
            "#,
        )
        .bind(template_name)
        .bind(status.as_str())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(row_to_site).collect()
    }
}

#[async_trait]
impl AccountRepository for PgTransaction {
    async fn find_user(&mut self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, email, first_name, last_name FROM users WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(&mut *self.tx)
            .await?;

        match row {
            Some(row) => Ok(Some(User {
                id: UserId::new(row.try_get("id")?),
                email: row.try_get("email")?,
                first_name: row.try_get("first_name")?,
                last_name: row.try_get("last_name")?,
            })),
            None => Ok(None),
        }
    }

    async fn find_template(&mut self, id: TemplateId) -> Result<Option<Template>> {
        let row = sqlx::query("SELECT id, name FROM templates WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(&mut *self.tx)
            .await?;

        match row {
            Some(row) => Ok(Some(Template {
                id: TemplateId::new(row.try_get("id")?),
                name: row.try_get("name")?,
            })),
            None => Ok(None),
        }
    }

    async fn find_mail_template(&mut self, mail_type: &str) -> Result<Option<String>> {
        let content: Option<String> =
            sqlx::query_scalar("SELECT content FROM mail_templates WHERE type = $1")
                .bind(mail_type)
                .fetch_optional(&mut *self.tx)
                .await?;

        Ok(content)
    }
}

#[async_trait]
impl MailRepository for PgTransaction {
    async fn insert_mail(&mut self, mail: NewMail) -> Result<Mail> {
        let row = sqlx::query(
            r#"
            INSERT INTO mails (type, recipients, subject, content)
            VALUES ($1, $2, $3, $4)
            RETURNING id, created_at
            "#,
        )
        .bind(&mail.mail_type)
        .bind(&mail.recipients)
        .bind(&mail.subject)
        .bind(&mail.content)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(Mail {
            id: row.try_get("id")?,
            mail_type: mail.mail_type,
            recipients: mail.recipients,
            subject: mail.subject,
            content: mail.content,
            created_at: row.try_get("created_at")?,
        })
    }
}
