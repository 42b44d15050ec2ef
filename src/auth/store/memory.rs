use super::{
    AuthStore, CodeAction, CodeIssue, CodeRedemption, CreateOutcome, IssueOutcome, RedeemOutcome,
};
use crate::auth::model::{Account, CodePurpose, NewAccount};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug)]
struct CodeEntry {
    code_hash: Vec<u8>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    attempts: u32,
    consumed: bool,
}

impl CodeEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.consumed && self.expires_at > now
    }
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<String, Account>,
    // One slot per pair: replacing the entry is what invalidates the prior code.
    codes: HashMap<(String, CodePurpose), CodeEntry>,
}

/// Process-local store for development and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create_account(&self, account: NewAccount) -> Result<CreateOutcome> {
        let mut state = self.state.lock().await;
        if state.accounts.contains_key(&account.email) {
            return Ok(CreateOutcome::Conflict);
        }
        let created = Account {
            id: Uuid::now_v7(),
            name: account.name,
            email: account.email,
            password_hash: account.password_hash,
            role: account.role,
            verified: false,
            created_at: Utc::now(),
        };
        state
            .accounts
            .insert(created.email.clone(), created.clone());
        Ok(CreateOutcome::Created(created))
    }

    async fn find_account(&self, email: &str) -> Result<Option<Account>> {
        Ok(self.state.lock().await.accounts.get(email).cloned())
    }

    async fn find_account_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .values()
            .find(|account| account.id == id)
            .cloned())
    }

    async fn issue_code(&self, issue: CodeIssue<'_>) -> Result<IssueOutcome> {
        let now = Utc::now();
        let key = (issue.email.to_string(), issue.purpose);
        let mut state = self.state.lock().await;

        if let Some(existing) = state.codes.get(&key)
            && existing.is_live(now)
            && existing.issued_at + Duration::seconds(issue.cooldown_seconds) > now
        {
            return Ok(IssueOutcome::Cooldown);
        }

        state.codes.insert(
            key,
            CodeEntry {
                code_hash: issue.code_hash.to_vec(),
                issued_at: now,
                expires_at: now + Duration::seconds(issue.ttl_seconds),
                attempts: 0,
                consumed: false,
            },
        );
        Ok(IssueOutcome::Issued)
    }

    async fn redeem_code(&self, redemption: CodeRedemption<'_>) -> Result<RedeemOutcome> {
        let now = Utc::now();
        let key = (redemption.email.to_string(), redemption.purpose);
        let mut guard = self.state.lock().await;
        let State { accounts, codes } = &mut *guard;

        let Some(entry) = codes.get_mut(&key) else {
            return Ok(RedeemOutcome::Rejected);
        };
        if !entry.is_live(now) || entry.attempts >= redemption.max_attempts {
            return Ok(RedeemOutcome::Rejected);
        }
        if entry.code_hash != redemption.code_hash {
            entry.attempts += 1;
            return Ok(RedeemOutcome::Rejected);
        }
        let Some(account) = accounts.get_mut(redemption.email) else {
            return Ok(RedeemOutcome::Rejected);
        };

        match redemption.action {
            CodeAction::MarkVerified => account.verified = true,
            CodeAction::ReplacePasswordHash(hash) => account.password_hash = hash,
        }
        entry.consumed = true;
        Ok(RedeemOutcome::Redeemed(account.clone()))
    }
}
