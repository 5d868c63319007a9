//! Database initialization, registry access, transactions and row models

pub mod init;
pub mod models;
pub mod registry;
pub mod tx;

pub use init::{init_database, stored_schema_version, SCHEMA_VERSION};
pub use models::*;
pub use tx::ImmediateTx;
