//! Postgres-backed store; schema lives in `db/sql/schema.sql`.

use super::{
    AuthStore, CodeAction, CodeIssue, CodeRedemption, CreateOutcome, IssueOutcome, RedeemOutcome,
};
use crate::auth::model::{Account, NewAccount, Role};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use sqlx::{
    PgPool, Postgres, Row, Transaction,
    postgres::{PgPoolOptions, PgRow},
};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

const ACCOUNT_COLUMNS: &str = "id, name, email, password_hash, role, verified, created_at";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a small connection pool against `dsn`.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let role: String = row.get("role");
    Ok(Account {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role: role.parse::<Role>().map_err(|err| anyhow!(err))?,
        verified: row.get("verified"),
        created_at: row.get("created_at"),
    })
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Serialize code operations per account by locking its row.
async fn lock_account(tx: &mut Transaction<'_, Postgres>, email: &str) -> Result<Option<Uuid>> {
    let query = "SELECT id FROM accounts WHERE email = $1 FOR UPDATE";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to lock account")?;
    Ok(row.map(|row| row.get("id")))
}

#[async_trait]
impl AuthStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<()> {
        let query = "SELECT 1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("database ping failed")?;
        Ok(())
    }

    async fn create_account(&self, account: NewAccount) -> Result<CreateOutcome> {
        let query = format!(
            "INSERT INTO accounts (id, name, email, password_hash, role) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {ACCOUNT_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(Uuid::now_v7())
            .bind(&account.name)
            .bind(&account.email)
            .bind(&account.password_hash)
            .bind(account.role.as_str())
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match row {
            Ok(row) => Ok(CreateOutcome::Created(account_from_row(&row)?)),
            Err(err) if is_unique_violation(&err) => Ok(CreateOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert account"),
        }
    }

    async fn find_account(&self, email: &str) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup account by email")?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_account_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup account by id")?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn issue_code(&self, issue: CodeIssue<'_>) -> Result<IssueOutcome> {
        let mut tx = self.pool.begin().await.context("begin issue transaction")?;

        if lock_account(&mut tx, issue.email).await?.is_none() {
            tx.commit().await.context("commit issue noop")?;
            return Err(anyhow!("cannot issue a code for an unknown account"));
        }

        let query = r"
            SELECT 1
            FROM one_time_codes
            WHERE email = $1
              AND purpose = $2
              AND consumed_at IS NULL
              AND invalidated_at IS NULL
              AND expires_at > NOW()
              AND issued_at > NOW() - ($3 * INTERVAL '1 second')
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let recent = sqlx::query(query)
            .bind(issue.email)
            .bind(issue.purpose.as_str())
            .bind(issue.cooldown_seconds)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to check code cooldown")?;
        if recent.is_some() {
            tx.commit().await.context("commit issue cooldown")?;
            return Ok(IssueOutcome::Cooldown);
        }

        let query = r"
            UPDATE one_time_codes
            SET invalidated_at = NOW()
            WHERE email = $1
              AND purpose = $2
              AND consumed_at IS NULL
              AND invalidated_at IS NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(issue.email)
            .bind(issue.purpose.as_str())
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to invalidate prior codes")?;

        let query = r"
            INSERT INTO one_time_codes (id, email, purpose, code_hash, expires_at)
            VALUES ($1, $2, $3, $4, NOW() + ($5 * INTERVAL '1 second'))
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(issue.email)
            .bind(issue.purpose.as_str())
            .bind(issue.code_hash)
            .bind(issue.ttl_seconds)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert one-time code")?;

        tx.commit().await.context("commit issue transaction")?;
        Ok(IssueOutcome::Issued)
    }

    async fn redeem_code(&self, redemption: CodeRedemption<'_>) -> Result<RedeemOutcome> {
        let mut tx = self.pool.begin().await.context("begin redeem transaction")?;

        let Some(account_id) = lock_account(&mut tx, redemption.email).await? else {
            tx.commit().await.context("commit redeem noop")?;
            return Ok(RedeemOutcome::Rejected);
        };

        let query = r"
            SELECT id, code_hash, attempts
            FROM one_time_codes
            WHERE email = $1
              AND purpose = $2
              AND consumed_at IS NULL
              AND invalidated_at IS NULL
              AND expires_at > NOW()
            ORDER BY issued_at DESC
            LIMIT 1
            FOR UPDATE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(redemption.email)
            .bind(redemption.purpose.as_str())
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to lookup one-time code")?;

        let Some(row) = row else {
            tx.commit().await.context("commit redeem noop")?;
            return Ok(RedeemOutcome::Rejected);
        };

        let code_id: Uuid = row.get("id");
        let code_hash: Vec<u8> = row.get("code_hash");
        let attempts: i32 = row.get("attempts");
        let max_attempts = i32::try_from(redemption.max_attempts).unwrap_or(i32::MAX);
        if attempts >= max_attempts {
            tx.commit().await.context("commit redeem exhausted")?;
            return Ok(RedeemOutcome::Rejected);
        }

        if code_hash != redemption.code_hash {
            let query = "UPDATE one_time_codes SET attempts = attempts + 1 WHERE id = $1";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(code_id)
                .execute(&mut *tx)
                .instrument(span)
                .await
                .context("failed to record code attempt")?;
            tx.commit().await.context("commit code attempt")?;
            return Ok(RedeemOutcome::Rejected);
        }

        let query = "UPDATE one_time_codes SET consumed_at = NOW() WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(code_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to consume one-time code")?;

        let (query, password_hash) = match redemption.action {
            CodeAction::MarkVerified => (
                format!(
                    "UPDATE accounts SET verified = TRUE, updated_at = NOW() \
                     WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
                ),
                None,
            ),
            CodeAction::ReplacePasswordHash(hash) => (
                format!(
                    "UPDATE accounts SET password_hash = $2, updated_at = NOW() \
                     WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
                ),
                Some(hash),
            ),
        };
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let mut statement = sqlx::query(&query).bind(account_id);
        if let Some(hash) = password_hash {
            statement = statement.bind(hash);
        }
        let row = statement
            .fetch_one(&mut *tx)
            .instrument(span)
            .await
            .context("failed to apply code action")?;
        let account = account_from_row(&row)?;

        tx.commit().await.context("commit redeem transaction")?;
        Ok(RedeemOutcome::Redeemed(account))
    }
}
