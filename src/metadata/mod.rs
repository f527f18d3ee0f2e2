//! Record storage layer.
//!
//! The record store keeps user profiles, projects and generated
//! artifacts.  The [`store::RecordStore`] trait defines the interface;
//! [`sqlite::SqliteRecordStore`] is the default implementation.

pub mod memory;
pub mod sqlite;
pub mod store;
