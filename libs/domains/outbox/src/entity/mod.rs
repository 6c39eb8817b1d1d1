//! Sea-ORM entities for the outbox tables and their domain conversions.

pub mod audit;
pub mod outbox;
pub mod preference;
pub mod template;
