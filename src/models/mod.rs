//! Persistent models: row types, their queries and per-entity errors.
//!
//! ARCHITECTURE
//! ============
//! Each module owns one table (or a small family of tables) and exposes free
//! async functions taking a `PgPool`. Operations that touch several tables
//! run in one transaction and take `&mut PgConnection` where another model
//! needs to join in. Route handlers never write SQL themselves.

pub mod access_token;
pub mod access_token_scope;
pub mod auth_source;
pub mod badge;
pub mod email_address;
pub mod oauth2;
pub mod oauth2_device;
pub mod perm;
pub mod secret;
pub mod session;
pub mod token_cache;
pub mod user;
pub mod user_block;
pub mod webauthn;
