//! PostgreSQL store backed by `sqlx`.
//!
//! Every statement runs inside a `db.query` span. Multi-row mutations run in one
//! transaction. Refresh rotation relies on a conditional `UPDATE ... WHERE revoked_at
//! IS NULL` whose affected-row count decides which of two racing refreshes wins.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use std::str::FromStr;
use tracing::{info_span, Instrument, Span};
use uuid::Uuid;

use super::{
    AuditStore, CaseStore, InvitationStore, OnboardingStore, OrganizationStore, PasswordResetStore,
    SessionRegistry, Store, StoreError, StoreResult, UserStore,
};
use crate::lexauth::{
    models::{
        AuditLog, Case, Invitation, LegalDetails, NewAuditLog, NewCase, NewInvitation,
        NewOrganization, NewPasswordReset, NewRefreshToken, NewUser, OnboardingProgress,
        OnboardingStep, OnboardingUpdate, Organization, OrganizationStatus, OrganizationUpdate,
        PasswordReset, RefreshToken, Role, SubscriptionStatus, User,
    },
    utils::is_unique_violation,
};

const EMAIL_TAKEN: &str = "email already registered";
const SEAT_LIMIT: &str = "seat limit reached";

macro_rules! organization_columns {
    () => {
        "id, name, legal_name, registration_number, tax_id, address, subscription_plan, \
         subscription_status, max_users, status, created_at, updated_at"
    };
}

macro_rules! user_columns {
    () => {
        "id, tenant_id, email, password_hash, first_name, last_name, role, status, \
         email_verified, email_verification_token_hash, email_verification_expires_at, \
         failed_login_attempts, locked_until, last_login_at, last_login_ip, mfa_enabled, \
         mfa_secret, created_at, updated_at, deleted_at"
    };
}

macro_rules! refresh_columns {
    () => {
        "id, user_id, tenant_id, token_hash, ip_address, user_agent, created_at, expires_at, \
         revoked_at, replaced_by"
    };
}

macro_rules! reset_columns {
    () => {
        "id, user_id, tenant_id, token_hash, expires_at, used_at, created_at"
    };
}

macro_rules! invitation_columns {
    () => {
        "id, tenant_id, invited_by, email, role, token_hash, status, expires_at, created_at, \
         accepted_at"
    };
}

macro_rules! onboarding_columns {
    () => {
        "tenant_id, user_id, step, completed, percentage, data, completed_at, updated_at"
    };
}

macro_rules! audit_columns {
    () => {
        "id, tenant_id, user_id, action, entity_type, entity_id, old_values, new_values, \
         ip_address, user_agent, created_at"
    };
}

macro_rules! case_columns {
    () => {
        "id, tenant_id, created_by, title, description, created_at"
    };
}

fn db_span(operation: &'static str, statement: &'static str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn text_enum<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value: String = row
        .try_get(column)
        .with_context(|| format!("failed to read column {column}"))?;
    Ok(value.parse::<T>()?)
}

fn organization_from_row(row: &PgRow) -> Result<Organization> {
    Ok(Organization {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        legal: LegalDetails {
            legal_name: row.try_get("legal_name")?,
            registration_number: row.try_get("registration_number")?,
            tax_id: row.try_get("tax_id")?,
            address: row.try_get("address")?,
        },
        subscription_plan: text_enum(row, "subscription_plan")?,
        subscription_status: text_enum(row, "subscription_status")?,
        max_users: row.try_get("max_users")?,
        status: text_enum(row, "status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        role: text_enum(row, "role")?,
        status: text_enum(row, "status")?,
        email_verified: row.try_get("email_verified")?,
        email_verification_token_hash: row.try_get("email_verification_token_hash")?,
        email_verification_expires_at: row.try_get("email_verification_expires_at")?,
        failed_login_attempts: row.try_get("failed_login_attempts")?,
        locked_until: row.try_get("locked_until")?,
        last_login_at: row.try_get("last_login_at")?,
        last_login_ip: row.try_get("last_login_ip")?,
        mfa_enabled: row.try_get("mfa_enabled")?,
        mfa_secret: row.try_get("mfa_secret")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn refresh_from_row(row: &PgRow) -> Result<RefreshToken> {
    Ok(RefreshToken {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        tenant_id: row.try_get("tenant_id")?,
        token_hash: row.try_get("token_hash")?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        revoked_at: row.try_get("revoked_at")?,
        replaced_by: row.try_get("replaced_by")?,
    })
}

fn reset_from_row(row: &PgRow) -> Result<PasswordReset> {
    Ok(PasswordReset {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        tenant_id: row.try_get("tenant_id")?,
        token_hash: row.try_get("token_hash")?,
        expires_at: row.try_get("expires_at")?,
        used_at: row.try_get("used_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn invitation_from_row(row: &PgRow) -> Result<Invitation> {
    Ok(Invitation {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        invited_by: row.try_get("invited_by")?,
        email: row.try_get("email")?,
        role: text_enum(row, "role")?,
        token_hash: row.try_get("token_hash")?,
        status: text_enum(row, "status")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
        accepted_at: row.try_get("accepted_at")?,
    })
}

fn onboarding_from_row(row: &PgRow) -> Result<OnboardingProgress> {
    Ok(OnboardingProgress {
        tenant_id: row.try_get("tenant_id")?,
        user_id: row.try_get("user_id")?,
        step: text_enum(row, "step")?,
        completed: row.try_get("completed")?,
        percentage: row.try_get("percentage")?,
        data: row.try_get("data")?,
        completed_at: row.try_get("completed_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<AuditLog> {
    Ok(AuditLog {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        user_id: row.try_get("user_id")?,
        action: text_enum(row, "action")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        old_values: row.try_get("old_values")?,
        new_values: row.try_get("new_values")?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        created_at: row.try_get("created_at")?,
    })
}

fn case_from_row(row: &PgRow) -> Result<Case> {
    Ok(Case {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        created_by: row.try_get("created_by")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

fn insert_error(err: sqlx::Error, conflict: &str, context: &'static str) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Conflict(conflict.to_string())
    } else {
        StoreError::Backend(anyhow::Error::new(err).context(context))
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_user(
        tx: &mut Transaction<'_, Postgres>,
        user: NewUser,
        now: DateTime<Utc>,
    ) -> StoreResult<User> {
        let query = concat!(
            "INSERT INTO users (id, tenant_id, email, password_hash, first_name, last_name, role, ",
            "status, email_verified, email_verification_token_hash, email_verification_expires_at, ",
            "created_at, updated_at) ",
            "VALUES ($1, $2, $3, $4, $5, $6, $7, 'active', $8, $9, $10, $11, $11) ",
            "RETURNING ",
            user_columns!()
        );
        let row = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(user.tenant_id)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(user.role.as_str())
            .bind(user.email_verified)
            .bind(&user.email_verification_token_hash)
            .bind(user.email_verification_expires_at)
            .bind(now)
            .fetch_one(&mut **tx)
            .instrument(db_span("INSERT", query))
            .await
            .map_err(|err| insert_error(err, EMAIL_TAKEN, "failed to insert user"))?;
        Ok(user_from_row(&row)?)
    }

    async fn revoke_user_tokens(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let query =
            "UPDATE refresh_tokens SET revoked_at = $2 WHERE user_id = $1 AND revoked_at IS NULL";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(now)
            .execute(&mut **tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to revoke refresh tokens")?;
        Ok(result.rows_affected())
    }

    async fn fetch_users(&self, query: &'static str, tenant_id: Uuid) -> StoreResult<Vec<User>> {
        let rows = sqlx::query(query)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list users")?;
        Ok(rows.iter().map(user_from_row).collect::<Result<_>>()?)
    }

    async fn execute(&self, query: &'static str, operation: &'static str, binds: Binds<'_>) -> StoreResult<u64> {
        let mut q = sqlx::query(query);
        for bind in binds.0 {
            q = match bind {
                Bind::Uuid(v) => q.bind(*v),
                Bind::Time(v) => q.bind(*v),
                Bind::OptTime(v) => q.bind(*v),
                Bind::Text(v) => q.bind(*v),
                Bind::OptText(v) => q.bind(v.as_deref()),
                Bind::Bytes(v) => q.bind(*v),
            };
        }
        let result = q
            .execute(&self.pool)
            .instrument(db_span(operation, query))
            .await
            .with_context(|| format!("failed to execute {operation}"))?;
        Ok(result.rows_affected())
    }
}

enum Bind<'a> {
    Uuid(&'a Uuid),
    Time(&'a DateTime<Utc>),
    OptTime(&'a Option<DateTime<Utc>>),
    Text(&'a str),
    OptText(&'a Option<String>),
    Bytes(&'a [u8]),
}

struct Binds<'a>(&'a [Bind<'a>]);

#[async_trait]
impl OrganizationStore for PgStore {
    async fn create_organization_with_owner(
        &self,
        organization: NewOrganization,
        owner: NewUser,
    ) -> StoreResult<(Organization, User)> {
        let mut tx = self.pool.begin().await.context("begin registration transaction")?;
        let now = Utc::now();

        let query = concat!(
            "INSERT INTO organizations (id, name, legal_name, registration_number, tax_id, address, ",
            "subscription_plan, subscription_status, max_users, status, created_at, updated_at) ",
            "VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'provisioning', $10, $10) ",
            "RETURNING ",
            organization_columns!()
        );
        let row = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(&organization.name)
            .bind(&organization.legal.legal_name)
            .bind(&organization.legal.registration_number)
            .bind(&organization.legal.tax_id)
            .bind(&organization.legal.address)
            .bind(organization.subscription_plan.as_str())
            .bind(SubscriptionStatus::Trialing.as_str())
            .bind(organization.subscription_plan.default_max_users())
            .bind(now)
            .fetch_one(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert organization")?;
        let org = organization_from_row(&row)?;

        let user = match Self::insert_user(
            &mut tx,
            NewUser {
                tenant_id: org.id,
                ..owner
            },
            now,
        )
        .await
        {
            Ok(user) => user,
            Err(err) => {
                let _ = tx.rollback().await;
                return Err(err);
            }
        };

        tx.commit().await.context("commit registration transaction")?;
        Ok((org, user))
    }

    async fn find_organization(&self, id: Uuid) -> StoreResult<Option<Organization>> {
        let query = concat!("SELECT ", organization_columns!(), " FROM organizations WHERE id = $1");
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup organization")?;
        Ok(row.as_ref().map(organization_from_row).transpose()?)
    }

    async fn update_organization(
        &self,
        id: Uuid,
        update: OrganizationUpdate,
    ) -> StoreResult<Option<Organization>> {
        let query = concat!(
            "UPDATE organizations SET name = COALESCE($2, name), ",
            "legal_name = CASE WHEN $3 THEN $4 ELSE legal_name END, ",
            "registration_number = CASE WHEN $3 THEN $5 ELSE registration_number END, ",
            "tax_id = CASE WHEN $3 THEN $6 ELSE tax_id END, ",
            "address = CASE WHEN $3 THEN $7 ELSE address END, ",
            "updated_at = NOW() ",
            "WHERE id = $1 AND status <> 'deleted' RETURNING ",
            organization_columns!()
        );
        let legal = update.legal.clone().unwrap_or_default();
        let row = sqlx::query(query)
            .bind(id)
            .bind(&update.name)
            .bind(update.legal.is_some())
            .bind(&legal.legal_name)
            .bind(&legal.registration_number)
            .bind(&legal.tax_id)
            .bind(&legal.address)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update organization")?;
        Ok(row.as_ref().map(organization_from_row).transpose()?)
    }

    async fn set_organization_status(
        &self,
        id: Uuid,
        status: OrganizationStatus,
    ) -> StoreResult<bool> {
        let query = "UPDATE organizations SET status = $2, updated_at = NOW() WHERE id = $1";
        let affected = self
            .execute(
                query,
                "UPDATE",
                Binds(&[Bind::Uuid(&id), Bind::Text(status.as_str())]),
            )
            .await?;
        Ok(affected > 0)
    }

    async fn delete_organization(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<u64>> {
        let mut tx = self.pool.begin().await.context("begin organization delete transaction")?;

        let query = "UPDATE organizations SET status = 'deleted', updated_at = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to delete organization")?;
        if result.rows_affected() == 0 {
            let _ = tx.rollback().await;
            return Ok(None);
        }

        let query = r"
            UPDATE users SET status = 'deleted', deleted_at = $2, updated_at = $2
            WHERE tenant_id = $1 AND deleted_at IS NULL
        ";
        sqlx::query(query)
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to delete organization users")?;

        let query =
            "UPDATE invitations SET status = 'revoked' WHERE tenant_id = $1 AND status = 'pending'";
        sqlx::query(query)
            .bind(id)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to revoke organization invitations")?;

        let query =
            "UPDATE refresh_tokens SET revoked_at = $2 WHERE tenant_id = $1 AND revoked_at IS NULL";
        let revoked = sqlx::query(query)
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to revoke organization sessions")?
            .rows_affected();

        tx.commit().await.context("commit organization delete transaction")?;
        Ok(Some(revoked))
    }

    async fn seats_used(&self, tenant_id: Uuid, now: DateTime<Utc>) -> StoreResult<i64> {
        let query = r"
            SELECT
                (SELECT COUNT(*) FROM users WHERE tenant_id = $1 AND deleted_at IS NULL)
              + (SELECT COUNT(*) FROM invitations
                 WHERE tenant_id = $1 AND status = 'pending' AND expires_at > $2) AS seats
        ";
        let row = sqlx::query(query)
            .bind(tenant_id)
            .bind(now)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to count seats")?;
        let seats: Option<i64> = row.try_get("seats").context("failed to read seats")?;
        Ok(seats.unwrap_or(0))
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let query = concat!(
            "SELECT ",
            user_columns!(),
            " FROM users WHERE lower(email) = lower($1) AND deleted_at IS NULL"
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup user by email")?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn find_user(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<Option<User>> {
        let query = concat!(
            "SELECT ",
            user_columns!(),
            " FROM users WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL"
        );
        let row = sqlx::query(query)
            .bind(tenant_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup user")?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn list_users(&self, tenant_id: Uuid) -> StoreResult<Vec<User>> {
        self.fetch_users(
            concat!(
                "SELECT ",
                user_columns!(),
                " FROM users WHERE tenant_id = $1 AND deleted_at IS NULL ORDER BY created_at"
            ),
            tenant_id,
        )
        .await
    }

    async fn record_failed_login(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<i32> {
        let query = r"
            UPDATE users SET failed_login_attempts = failed_login_attempts + 1
            WHERE tenant_id = $1 AND id = $2
            RETURNING failed_login_attempts
        ";
        let row = sqlx::query(query)
            .bind(tenant_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to record failed login")?;
        Ok(row
            .map(|row| row.try_get::<i32, _>("failed_login_attempts"))
            .transpose()
            .context("failed to read failed_login_attempts")?
            .unwrap_or(0))
    }

    async fn lock_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        until: DateTime<Utc>,
    ) -> StoreResult<()> {
        let query = "UPDATE users SET locked_until = $3 WHERE tenant_id = $1 AND id = $2";
        self.execute(
            query,
            "UPDATE",
            Binds(&[Bind::Uuid(&tenant_id), Bind::Uuid(&user_id), Bind::Time(&until)]),
        )
        .await?;
        Ok(())
    }

    async fn record_successful_login(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        ip: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let query = r"
            UPDATE users
            SET failed_login_attempts = 0, locked_until = NULL, last_login_at = $3, last_login_ip = $4
            WHERE tenant_id = $1 AND id = $2
        ";
        self.execute(
            query,
            "UPDATE",
            Binds(&[
                Bind::Uuid(&tenant_id),
                Bind::Uuid(&user_id),
                Bind::Time(&at),
                Bind::OptText(&ip),
            ]),
        )
        .await?;
        Ok(())
    }

    async fn change_password(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.context("begin password transaction")?;
        let query = r"
            UPDATE users SET password_hash = $3, updated_at = $4
            WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL
        ";
        sqlx::query(query)
            .bind(tenant_id)
            .bind(user_id)
            .bind(&password_hash)
            .bind(now)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update password")?;
        Self::revoke_user_tokens(&mut tx, user_id, now).await?;
        tx.commit().await.context("commit password transaction")?;
        Ok(())
    }

    async fn set_email_verification(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        token_hash: Vec<u8>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let query = r"
            UPDATE users SET email_verification_token_hash = $3, email_verification_expires_at = $4
            WHERE tenant_id = $1 AND id = $2
        ";
        self.execute(
            query,
            "UPDATE",
            Binds(&[
                Bind::Uuid(&tenant_id),
                Bind::Uuid(&user_id),
                Bind::Bytes(&token_hash),
                Bind::Time(&expires_at),
            ]),
        )
        .await?;
        Ok(())
    }

    async fn verify_email(&self, token_hash: &[u8], now: DateTime<Utc>) -> StoreResult<Option<User>> {
        let query = concat!(
            "UPDATE users SET email_verified = TRUE, email_verification_token_hash = NULL, ",
            "email_verification_expires_at = NULL, updated_at = $2 ",
            "WHERE email_verification_token_hash = $1 AND email_verification_expires_at > $2 ",
            "AND deleted_at IS NULL RETURNING ",
            user_columns!()
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to verify email")?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn set_user_role(&self, tenant_id: Uuid, user_id: Uuid, role: Role) -> StoreResult<bool> {
        let query = r"
            UPDATE users SET role = $3, updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL
        ";
        let affected = self
            .execute(
                query,
                "UPDATE",
                Binds(&[
                    Bind::Uuid(&tenant_id),
                    Bind::Uuid(&user_id),
                    Bind::Text(role.as_str()),
                ]),
            )
            .await?;
        Ok(affected > 0)
    }

    async fn soft_delete_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.context("begin delete transaction")?;
        let query = r"
            UPDATE users SET status = 'deleted', deleted_at = $3, updated_at = $3
            WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL
        ";
        let result = sqlx::query(query)
            .bind(tenant_id)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to delete user")?;
        if result.rows_affected() == 0 {
            let _ = tx.rollback().await;
            return Ok(false);
        }
        Self::revoke_user_tokens(&mut tx, user_id, now).await?;
        tx.commit().await.context("commit delete transaction")?;
        Ok(true)
    }
}

#[async_trait]
impl SessionRegistry for PgStore {
    async fn insert_refresh_token(&self, token: NewRefreshToken) -> StoreResult<RefreshToken> {
        let query = concat!(
            "INSERT INTO refresh_tokens (id, user_id, tenant_id, token_hash, ip_address, user_agent, ",
            "created_at, expires_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING ",
            refresh_columns!()
        );
        let row = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(token.user_id)
            .bind(token.tenant_id)
            .bind(&token.token_hash)
            .bind(&token.client.ip)
            .bind(&token.client.user_agent)
            .bind(Utc::now())
            .bind(token.expires_at)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .map_err(|err| insert_error(err, "refresh token collision", "failed to insert refresh token"))?;
        Ok(refresh_from_row(&row)?)
    }

    async fn find_refresh_token(&self, token_hash: &[u8]) -> StoreResult<Option<RefreshToken>> {
        let query = concat!("SELECT ", refresh_columns!(), " FROM refresh_tokens WHERE token_hash = $1");
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup refresh token")?;
        Ok(row.as_ref().map(refresh_from_row).transpose()?)
    }

    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        next: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<RefreshToken>> {
        let mut tx = self.pool.begin().await.context("begin rotation transaction")?;

        let query = r"
            UPDATE refresh_tokens SET revoked_at = $2
            WHERE id = $1 AND revoked_at IS NULL AND expires_at > $2
        ";
        let revoked = sqlx::query(query)
            .bind(old_id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to revoke rotated refresh token")?;
        if revoked.rows_affected() == 0 {
            let _ = tx.rollback().await;
            return Ok(None);
        }

        let query = concat!(
            "INSERT INTO refresh_tokens (id, user_id, tenant_id, token_hash, ip_address, user_agent, ",
            "created_at, expires_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING ",
            refresh_columns!()
        );
        let row = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(next.user_id)
            .bind(next.tenant_id)
            .bind(&next.token_hash)
            .bind(&next.client.ip)
            .bind(&next.client.user_agent)
            .bind(now)
            .bind(next.expires_at)
            .fetch_one(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert rotated refresh token")?;
        let token = refresh_from_row(&row)?;

        let query = "UPDATE refresh_tokens SET replaced_by = $2 WHERE id = $1";
        sqlx::query(query)
            .bind(old_id)
            .bind(token.id)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to link rotated refresh token")?;

        tx.commit().await.context("commit rotation transaction")?;
        Ok(Some(token))
    }

    async fn revoke_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let query = r"
            UPDATE refresh_tokens SET revoked_at = $3
            WHERE user_id = $1 AND token_hash = $2 AND revoked_at IS NULL
        ";
        let affected = self
            .execute(
                query,
                "UPDATE",
                Binds(&[Bind::Uuid(&user_id), Bind::Bytes(token_hash), Bind::Time(&now)]),
            )
            .await?;
        Ok(affected > 0)
    }

    async fn revoke_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let query = r"
            UPDATE refresh_tokens SET revoked_at = $3
            WHERE user_id = $1 AND id = $2 AND revoked_at IS NULL
        ";
        let affected = self
            .execute(
                query,
                "UPDATE",
                Binds(&[Bind::Uuid(&user_id), Bind::Uuid(&session_id), Bind::Time(&now)]),
            )
            .await?;
        Ok(affected > 0)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64> {
        let query =
            "UPDATE refresh_tokens SET revoked_at = $2 WHERE user_id = $1 AND revoked_at IS NULL";
        self.execute(query, "UPDATE", Binds(&[Bind::Uuid(&user_id), Bind::Time(&now)]))
            .await
    }

    async fn list_active_sessions(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<RefreshToken>> {
        let query = concat!(
            "SELECT ",
            refresh_columns!(),
            " FROM refresh_tokens WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > $2 ",
            "ORDER BY created_at DESC"
        );
        let rows = sqlx::query(query)
            .bind(user_id)
            .bind(now)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list sessions")?;
        Ok(rows.iter().map(refresh_from_row).collect::<Result<_>>()?)
    }
}

#[async_trait]
impl PasswordResetStore for PgStore {
    async fn create_password_reset(&self, reset: NewPasswordReset) -> StoreResult<PasswordReset> {
        let query = concat!(
            "INSERT INTO password_resets (id, user_id, tenant_id, token_hash, expires_at) ",
            "VALUES ($1, $2, $3, $4, $5) RETURNING ",
            reset_columns!()
        );
        let row = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(reset.user_id)
            .bind(reset.tenant_id)
            .bind(&reset.token_hash)
            .bind(reset.expires_at)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .map_err(|err| insert_error(err, "reset token collision", "failed to insert password reset"))?;
        Ok(reset_from_row(&row)?)
    }

    async fn complete_password_reset(
        &self,
        token_hash: &[u8],
        password_hash: String,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PasswordReset>> {
        let mut tx = self.pool.begin().await.context("begin reset transaction")?;

        let query = concat!(
            "UPDATE password_resets SET used_at = $2 ",
            "WHERE token_hash = $1 AND used_at IS NULL AND expires_at > $2 RETURNING ",
            reset_columns!()
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to consume password reset")?;
        let Some(reset) = row.as_ref().map(reset_from_row).transpose()? else {
            let _ = tx.rollback().await;
            return Ok(None);
        };

        let query = r"
            UPDATE users SET password_hash = $3, updated_at = $4
            WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL
        ";
        let updated = sqlx::query(query)
            .bind(reset.tenant_id)
            .bind(reset.user_id)
            .bind(&password_hash)
            .bind(now)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update password")?;
        if updated.rows_affected() == 0 {
            let _ = tx.rollback().await;
            return Ok(None);
        }

        Self::revoke_user_tokens(&mut tx, reset.user_id, now).await?;
        tx.commit().await.context("commit reset transaction")?;
        Ok(Some(reset))
    }
}

#[async_trait]
impl InvitationStore for PgStore {
    async fn create_invitation(&self, invitation: NewInvitation) -> StoreResult<Invitation> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.context("begin invitation transaction")?;

        // serializes invitations per tenant until commit
        let query = "SELECT id FROM organizations WHERE id = $1 FOR UPDATE";
        sqlx::query(query)
            .bind(invitation.tenant_id)
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lock organization")?;

        let query = r"
            SELECT
                (SELECT COUNT(*) FROM users WHERE tenant_id = $1 AND deleted_at IS NULL)
              + (SELECT COUNT(*) FROM invitations
                 WHERE tenant_id = $1 AND status = 'pending' AND expires_at > $2) AS seats
        ";
        let row = sqlx::query(query)
            .bind(invitation.tenant_id)
            .bind(now)
            .fetch_one(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to count seats")?;
        let seats: Option<i64> = row.try_get("seats").context("failed to read seats")?;

        let query = concat!(
            "INSERT INTO invitations (id, tenant_id, invited_by, email, role, token_hash, status, expires_at) ",
            "SELECT $1, $2, $3, $4, $5, $6, 'pending', $7 ",
            "WHERE NOT EXISTS (SELECT 1 FROM invitations WHERE tenant_id = $2 AND email = $4 ",
            "AND status = 'pending' AND expires_at > $8) RETURNING ",
            invitation_columns!()
        );
        let inserted = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(invitation.tenant_id)
            .bind(invitation.invited_by)
            .bind(&invitation.email)
            .bind(invitation.role.as_str())
            .bind(&invitation.token_hash)
            .bind(invitation.expires_at)
            .bind(now)
            .fetch_optional(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await
            .map_err(|err| insert_error(err, "invitation token collision", "failed to insert invitation"));
        let row = match inserted {
            Ok(Some(row)) => row,
            Ok(None) => {
                let _ = tx.rollback().await;
                return Err(StoreError::Conflict("invitation already pending".to_string()));
            }
            Err(err) => {
                let _ = tx.rollback().await;
                return Err(err);
            }
        };
        if seats.unwrap_or(0) >= invitation.seat_limit {
            let _ = tx.rollback().await;
            return Err(StoreError::Conflict(SEAT_LIMIT.to_string()));
        }

        let invitation = invitation_from_row(&row)?;
        tx.commit().await.context("commit invitation transaction")?;
        Ok(invitation)
    }

    async fn find_invitation(&self, token_hash: &[u8]) -> StoreResult<Option<Invitation>> {
        let query = concat!("SELECT ", invitation_columns!(), " FROM invitations WHERE token_hash = $1");
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup invitation")?;
        Ok(row.as_ref().map(invitation_from_row).transpose()?)
    }

    async fn list_invitations(&self, tenant_id: Uuid) -> StoreResult<Vec<Invitation>> {
        let query = concat!(
            "SELECT ",
            invitation_columns!(),
            " FROM invitations WHERE tenant_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query(query)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list invitations")?;
        Ok(rows.iter().map(invitation_from_row).collect::<Result<_>>()?)
    }

    async fn revoke_invitation(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<bool> {
        let query = r"
            UPDATE invitations SET status = 'revoked'
            WHERE tenant_id = $1 AND id = $2 AND status = 'pending'
        ";
        let affected = self
            .execute(query, "UPDATE", Binds(&[Bind::Uuid(&tenant_id), Bind::Uuid(&id)]))
            .await?;
        Ok(affected > 0)
    }

    async fn accept_invitation(
        &self,
        token_hash: &[u8],
        user: NewUser,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        let mut tx = self.pool.begin().await.context("begin invitation transaction")?;

        let query = r"
            UPDATE invitations SET status = 'accepted', accepted_at = $2
            WHERE token_hash = $1 AND status = 'pending' AND expires_at > $2
        ";
        let accepted = sqlx::query(query)
            .bind(token_hash)
            .bind(now)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to accept invitation")?;
        if accepted.rows_affected() == 0 {
            let _ = tx.rollback().await;
            return Ok(None);
        }

        let user = match Self::insert_user(&mut tx, user, now).await {
            Ok(user) => user,
            Err(err) => {
                let _ = tx.rollback().await;
                return Err(err);
            }
        };
        tx.commit().await.context("commit invitation transaction")?;
        Ok(Some(user))
    }
}

#[async_trait]
impl OnboardingStore for PgStore {
    async fn list_onboarding(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Vec<OnboardingProgress>> {
        let query = concat!(
            "SELECT ",
            onboarding_columns!(),
            " FROM onboarding_progress WHERE tenant_id = $1 AND user_id = $2"
        );
        let rows = sqlx::query(query)
            .bind(tenant_id)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list onboarding progress")?;
        let mut progress = rows.iter().map(onboarding_from_row).collect::<Result<Vec<_>>>()?;
        progress.sort_by_key(|p| OnboardingStep::ALL.iter().position(|s| *s == p.step));
        Ok(progress)
    }

    async fn upsert_onboarding(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        step: OnboardingStep,
        update: OnboardingUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<OnboardingProgress> {
        let query = concat!(
            "INSERT INTO onboarding_progress (tenant_id, user_id, step, completed, percentage, data, ",
            "completed_at, updated_at) ",
            "VALUES ($1, $2, $3, $4, $5, $6, CASE WHEN $4 THEN $7 ELSE NULL END, $7) ",
            "ON CONFLICT (tenant_id, user_id, step) DO UPDATE SET ",
            "completed = EXCLUDED.completed, percentage = EXCLUDED.percentage, data = EXCLUDED.data, ",
            "completed_at = CASE WHEN EXCLUDED.completed ",
            "THEN COALESCE(onboarding_progress.completed_at, EXCLUDED.completed_at) ELSE NULL END, ",
            "updated_at = EXCLUDED.updated_at RETURNING ",
            onboarding_columns!()
        );
        let row = sqlx::query(query)
            .bind(tenant_id)
            .bind(user_id)
            .bind(step.as_str())
            .bind(update.completed)
            .bind(update.percentage)
            .bind(&update.data)
            .bind(now)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to upsert onboarding progress")?;
        Ok(onboarding_from_row(&row)?)
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn append_audit(&self, entry: NewAuditLog) -> StoreResult<AuditLog> {
        let query = concat!(
            "INSERT INTO audit_logs (id, tenant_id, user_id, action, entity_type, entity_id, ",
            "old_values, new_values, ip_address, user_agent) ",
            "VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING ",
            audit_columns!()
        );
        let row = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(entry.tenant_id)
            .bind(entry.user_id)
            .bind(entry.action.as_str())
            .bind(entry.entity_type)
            .bind(&entry.entity_id)
            .bind(&entry.old_values)
            .bind(&entry.new_values)
            .bind(&entry.client.ip)
            .bind(&entry.client.user_agent)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to append audit log")?;
        Ok(audit_from_row(&row)?)
    }

    async fn list_audit(&self, tenant_id: Uuid, limit: i64) -> StoreResult<Vec<AuditLog>> {
        let query = concat!(
            "SELECT ",
            audit_columns!(),
            " FROM audit_logs WHERE tenant_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2"
        );
        let rows = sqlx::query(query)
            .bind(tenant_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list audit logs")?;
        Ok(rows.iter().map(audit_from_row).collect::<Result<_>>()?)
    }
}

#[async_trait]
impl CaseStore for PgStore {
    async fn create_case(&self, case: NewCase) -> StoreResult<Case> {
        let query = concat!(
            "INSERT INTO cases (id, tenant_id, created_by, title, description) ",
            "VALUES ($1, $2, $3, $4, $5) RETURNING ",
            case_columns!()
        );
        let row = sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(case.tenant_id)
            .bind(case.created_by)
            .bind(&case.title)
            .bind(&case.description)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert case")?;
        Ok(case_from_row(&row)?)
    }

    async fn list_cases(&self, tenant_id: Uuid) -> StoreResult<Vec<Case>> {
        let query = concat!(
            "SELECT ",
            case_columns!(),
            " FROM cases WHERE tenant_id = $1 ORDER BY created_at"
        );
        let rows = sqlx::query(query)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list cases")?;
        Ok(rows.iter().map(case_from_row).collect::<Result<_>>()?)
    }

    async fn find_case(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<Option<Case>> {
        let query = concat!(
            "SELECT ",
            case_columns!(),
            " FROM cases WHERE tenant_id = $1 AND id = $2"
        );
        let row = sqlx::query(query)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup case")?;
        Ok(row.as_ref().map(case_from_row).transpose()?)
    }

    async fn count_cases(&self, tenant_id: Uuid) -> StoreResult<i64> {
        let query = "SELECT COUNT(*) AS total FROM cases WHERE tenant_id = $1";
        let row = sqlx::query(query)
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to count cases")?;
        Ok(row.try_get::<i64, _>("total").context("failed to read case count")?)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        let query = "SELECT 1";
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("database ping failed")?;
        Ok(())
    }
}
