//! One-shot migration of persisted form-configuration records. Walks
//! each stored configuration tree, normalizes the attribute references
//! of this integration's form widgets, and validates them against the
//! attribute definitions fetched from the account.

pub mod report;
pub mod runner;
pub mod store;
pub mod tree;

pub use report::MigrationReport;
pub use runner::{CURRENT_VERSION, MigrationError, MigrationRunner, MigrationState};
