//! Credential and one-time code persistence.
//!
//! Both implementations keep "invalidate prior + issue new" and
//! "validate, consume and apply" as single atomic units.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use super::model::{Account, CodePurpose, NewAccount};
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug)]
pub enum CreateOutcome {
    Created(Account),
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueOutcome {
    Issued,
    /// The previous live code is younger than the cooldown and stays valid.
    Cooldown,
}

/// Mutation authorized by a redeemed code.
#[derive(Clone, PartialEq, Eq)]
pub enum CodeAction {
    MarkVerified,
    ReplacePasswordHash(String),
}

impl std::fmt::Debug for CodeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MarkVerified => f.write_str("MarkVerified"),
            Self::ReplacePasswordHash(_) => f.write_str("ReplacePasswordHash(***)"),
        }
    }
}

#[derive(Debug)]
pub enum RedeemOutcome {
    Redeemed(Account),
    Rejected,
}

#[derive(Debug, Clone, Copy)]
pub struct CodeIssue<'a> {
    pub email: &'a str,
    pub purpose: CodePurpose,
    pub code_hash: &'a [u8],
    pub ttl_seconds: i64,
    pub cooldown_seconds: i64,
}

#[derive(Debug)]
pub struct CodeRedemption<'a> {
    pub email: &'a str,
    pub purpose: CodePurpose,
    pub code_hash: &'a [u8],
    pub max_attempts: u32,
    pub action: CodeAction,
}

#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Short label reported by the health endpoint.
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<()>;

    /// Insert an unverified account; `Conflict` if the email is taken.
    async fn create_account(&self, account: NewAccount) -> Result<CreateOutcome>;

    async fn find_account(&self, email: &str) -> Result<Option<Account>>;

    async fn find_account_by_id(&self, id: Uuid) -> Result<Option<Account>>;

    /// Invalidate every live code for `(email, purpose)` and store a new one,
    /// unless the newest live code is still inside the cooldown window.
    async fn issue_code(&self, issue: CodeIssue<'_>) -> Result<IssueOutcome>;

    /// Consume the live code and apply its action in one step.
    ///
    /// A mismatch counts as a failed attempt; once `max_attempts` is reached the
    /// code is dead even for the right value.
    async fn redeem_code(&self, redemption: CodeRedemption<'_>) -> Result<RedeemOutcome>;
}
