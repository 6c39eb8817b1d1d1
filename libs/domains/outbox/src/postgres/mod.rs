//! PostgreSQL-backed stores.
//!
//! Reads go through the Sea-ORM entities. Status transitions are single
//! guarded `UPDATE` statements so the status check and the write are one
//! atomic step; `rows_affected` tells the caller whether it won.

mod audit;
mod outbox;
mod preference;
mod template;

pub use audit::PgAuditSink;
pub use outbox::PgOutboxStore;
pub use preference::PgPreferenceStore;
pub use template::PgTemplateStore;
