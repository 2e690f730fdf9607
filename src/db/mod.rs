//! Database module: row mapping and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: scan filters and row-to-record mapping.
//! - `repo`: SQL-only functions over the `notifications`, `users` and `mails` tables.
//!
//! External modules should import from `welcome_dispatch::db`; the repository
//! API is re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::ScanFilter;
