//! # Attesta
//!
//! `attesta` is an identity-provider backend. It authenticates users either
//! with a locally managed password (a "secondary" account) or with a signed
//! assertion delegated to the email domain's own identity provider (a
//! "primary" domain), and mints short-lived Ed25519 certificates binding a
//! user's public key to a verified email address.
//!
//! The moving parts:
//!
//! - [`session`]: the `browserid_state` cookie codec and duration policy.
//! - [`primary`]: discovery and caching of `/.well-known/browserid` support
//!   documents published by delegating domains.
//! - [`keysigner`]: certificate issuance and assertion verification.
//! - [`store`]: the backing-store boundary and its round-robin connection
//!   pool.
//! - [`attesta`]: the authentication service and its `/wsapi` HTTP surface.

pub mod attesta;
pub mod cli;
pub mod keysigner;
pub mod primary;
pub mod session;
pub mod store;
