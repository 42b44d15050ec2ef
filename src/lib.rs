//! # Edugate (Portal Authentication & Sessions)
//!
//! `edugate` owns the authentication and session lifecycle of the campus portal
//! used by students, staff and parents.
//!
//! ## Credential Issuance
//!
//! Accounts are created unverified. A six digit one-time code is emailed on
//! registration and must be redeemed before the first login. Password resets use
//! the same mechanism with a separate code purpose.
//!
//! - **Single use:** a code authorizes exactly one action and is consumed in the
//!   same atomic step as the action.
//! - **Single live code:** issuing a code for an `(email, purpose)` pair
//!   invalidates every previous unconsumed code for that pair.
//! - **Anti-enumeration:** resend and forgot-password always answer with the same
//!   success message.
//!
//! ## Sessions
//!
//! Verified logins receive a short-lived access token and a long-lived refresh
//! token. The [`client::SessionClient`] keeps the access token in memory, stores
//! the refresh token durably and coalesces concurrent `401` responses into a
//! single refresh round-trip through the [`client::RefreshCoordinator`].

pub mod api;
pub mod auth;
pub mod cli;
pub mod client;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
