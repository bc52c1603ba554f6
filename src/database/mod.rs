//! Discovery run store
//!
//! SQLite storage for:
//! - Discovery runs and the deployment-wide active-run lock
//! - Routers, their interfaces, networks and routes (per run)
//! - Inferred topology edges (per run)

pub mod connection;
pub mod models;
pub mod queries;
pub mod schema;

pub use connection::Database;
pub use models::*;
pub use queries::*;
