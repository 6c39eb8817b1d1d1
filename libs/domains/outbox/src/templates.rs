//! Versioned email templates.
//!
//! A `(key, version)` pair is immutable once any entry references it, so an
//! entry always renders the way it did when it was queued. Changing copy
//! means publishing a new version.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::OutboxResult;
use crate::models::Template;

/// Template keys used by the LMS producers.
pub mod keys {
    pub const INVITE: &str = "invite";
    pub const ASSIGNMENT_DUE_SOON: &str = "assignment_due_soon";
    pub const CERTIFICATE_ISSUED: &str = "certificate_issued";
    pub const REVIEW_SCHEDULED: &str = "review_scheduled";
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get(&self, key: &str, version: i32) -> OutboxResult<Option<Template>>;

    /// Publish a template. An existing `(key, version)` is left untouched.
    async fn put(&self, template: Template) -> OutboxResult<bool>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryTemplateStore {
    templates: Arc<RwLock<HashMap<(String, i32), Template>>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with [`default_templates`].
    pub fn with_defaults() -> Self {
        let map = default_templates()
            .into_iter()
            .map(|t| ((t.key.clone(), t.version), t))
            .collect();
        Self {
            templates: Arc::new(RwLock::new(map)),
        }
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn get(&self, key: &str, version: i32) -> OutboxResult<Option<Template>> {
        let templates = self.templates.read().await;
        Ok(templates.get(&(key.to_string(), version)).cloned())
    }

    async fn put(&self, template: Template) -> OutboxResult<bool> {
        let mut templates = self.templates.write().await;
        let slot = (template.key.clone(), template.version);
        if templates.contains_key(&slot) {
            return Ok(false);
        }
        templates.insert(slot, template);
        Ok(true)
    }
}

fn template(key: &str, subject: &str, html: &str, text: &str) -> Template {
    Template {
        key: key.to_string(),
        version: 1,
        subject: subject.to_string(),
        html: html.to_string(),
        text: text.to_string(),
    }
}

/// Version 1 of every template the LMS producers queue.
pub fn default_templates() -> Vec<Template> {
    vec![
        template(
            keys::INVITE,
            "You're invited to {{hospital_name}} Continuing Education",
            "<p>Hi {{name}},</p>\
             <p>You have been invited to join {{hospital_name}} Continuing Education.</p>\
             <p><a href=\"{{invite_url}}\">Accept your invitation</a></p>",
            "Hi {{name}},\n\nYou have been invited to join {{hospital_name}} Continuing Education.\n\
             Accept your invitation: {{invite_url}}\n",
        ),
        template(
            keys::ASSIGNMENT_DUE_SOON,
            "Reminder: {{course_title}} is due {{due_date}}",
            "<p>Hi {{name}},</p>\
             <p><strong>{{course_title}}</strong> is due on {{due_date}}.</p>\
             <p><a href=\"{{course_url}}\">Continue the course</a></p>",
            "Hi {{name}},\n\n{{course_title}} is due on {{due_date}}.\n\
             Continue the course: {{course_url}}\n",
        ),
        template(
            keys::CERTIFICATE_ISSUED,
            "Your certificate for {{course_title}}",
            "<p>Congratulations {{name}}!</p>\
             <p>You completed <strong>{{course_title}}</strong> on {{completed_on}}.</p>\
             <p><a href=\"{{certificate_url}}\">Download your certificate</a></p>",
            "Congratulations {{name}}!\n\nYou completed {{course_title}} on {{completed_on}}.\n\
             Download your certificate: {{certificate_url}}\n",
        ),
        template(
            keys::REVIEW_SCHEDULED,
            "Competency review scheduled: {{competency}}",
            "<p>Hi {{name}},</p>\
             <p>Your {{competency}} review is scheduled for {{review_at}} with {{reviewer_name}}.</p>",
            "Hi {{name}},\n\nYour {{competency}} review is scheduled for {{review_at}} with {{reviewer_name}}.\n",
        ),
    ]
}
