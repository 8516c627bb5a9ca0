pub mod credentials;
pub mod database;
pub mod error;
pub mod schema;

pub use credentials::CredentialCache;
pub use database::Database;
pub use error::StoreError;
