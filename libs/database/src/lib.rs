//! PostgreSQL plumbing shared by the outbox worker and its tooling.
//!
//! - [`postgres::PostgresConfig`] loads pool settings from the environment
//! - [`postgres::connect_from_config_with_retry`] survives a database that is
//!   still starting when the worker boots
//! - [`postgres::run_migrations`] applies any `MigratorTrait` implementation
//! - [`postgres::check_health`] backs the `/ready` probe

pub mod error;
pub mod postgres;
pub mod retry;

pub use error::{DatabaseError, DatabaseResult};
pub use retry::{RetryConfig, retry_with_backoff};
