//! # crypter-store
//!
//! Local-first cache for the Crypter client, backed by SQLite (SQLCipher
//! with the `sqlcipher` feature).
//!
//! Three document collections (`users`, `conferences`, `messages`) hold
//! JSON documents keyed by uuid, with the fields used for ordering and
//! scoping mirrored into indexed columns. References between records are
//! stored as ids and hydrated back into full records on read.
//!
//! [`Database`] is the synchronous handle; [`LocalStore`] wraps it for use
//! from async code.

pub mod collection;
pub mod conferences;
pub mod database;
pub mod documents;
pub mod local;
pub mod messages;
pub mod migrations;
pub mod users;

mod error;

pub use collection::{Collection, Document, Filter, Order, Query, SortField};
pub use database::Database;
pub use error::{Result, StoreError};
pub use local::LocalStore;
