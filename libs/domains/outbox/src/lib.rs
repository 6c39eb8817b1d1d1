//! Email Outbox Domain
//!
//! Durable, at-least-once email delivery for the hospital LMS. Features queue
//! a templated email as a database row and return; a background worker
//! renders and sends it, retrying with backoff and auditing every outcome.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  LMS features   │  ← invites, due-soon reminders, certificates, reviews
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │  OutboxService  │  ← validates the address, inserts a PENDING row
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │  email_outbox   │  ← PostgreSQL table
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐      ┌──────────────┐
//! │  OutboxWorker   │ ───▶ │  Reconciler  │  ← returns stale SENDING claims
//! └────────┬────────┘      └──────────────┘
//!          │
//! ┌────────▼────────┐
//! │ OutboxProcessor │  ← preferences, template, render, send, audit
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │Delivery Provider│  ← SendGrid, SMTP, recording
//! └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_outbox::{OutboxService, PgOutboxStore, SystemClock};
//!
//! let service = OutboxService::new(Arc::new(PgOutboxStore::new(db)), Arc::new(SystemClock));
//! service
//!     .queue_invite("nurse@example.org", "Ana", "St. Mary's", "https://lms.example.org/i/abc")
//!     .await?;
//! ```

pub mod audit;
pub mod clock;
pub mod config;
pub mod entity;
pub mod error;
pub mod metrics;
pub mod models;
pub mod postgres;
pub mod preferences;
pub mod processor;
pub mod providers;
pub mod reconciler;
pub mod renderer;
pub mod retry;
pub mod service;
pub mod store;
pub mod templates;
pub mod worker;

// Re-export commonly used types
pub use audit::{AuditSink, InMemoryAuditSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{MissingTemplatePolicy, WorkerConfig};
pub use error::{DeliveryError, OutboxError, OutboxResult};
pub use metrics::{OutboxMetrics, init_metrics, render_metrics};
pub use models::{
    AuditAction, AuditRecord, NewOutboxEntry, OutboxEntry, OutboxStatus, Payload, StatusCounts,
    Template,
};
pub use postgres::{PgAuditSink, PgOutboxStore, PgPreferenceStore, PgTemplateStore};
pub use preferences::{InMemoryPreferenceStore, PreferenceStore};
pub use processor::{EntryOutcome, OutboxProcessor, ProcessorSettings};
pub use providers::{
    DeliveryProvider, OutgoingEmail, RecordingProvider, SendGridProvider, SendReceipt,
    SmtpProvider,
};
pub use reconciler::Reconciler;
pub use renderer::{RenderedEmail, render, render_template};
pub use retry::{FailureDecision, RetryPolicy};
pub use service::OutboxService;
pub use store::{InMemoryOutboxStore, OutboxStore};
pub use templates::{InMemoryTemplateStore, TemplateStore, default_templates};
pub use worker::{BatchReport, OutboxWorker};
