//! Client for the Brevo (formerly Sendinblue) v3 contacts API: paginated
//! attribute listing with a TTL cache, contact upsert/double-optin/delete,
//! and the form-submission pipeline built on top of them.

pub mod cache;
pub mod contacts;
pub mod error;
pub mod fetcher;
pub mod phone;
pub mod submit;
pub mod types;

pub use cache::AttributeCache;
pub use error::BrevoError;
pub use fetcher::AttributeFetcher;
