//! API handlers for edugate.

pub mod auth;
pub mod health;
pub mod root;
