use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OutboxError;
use crate::models::{OutboxEntry, OutboxStatus};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "email_outbox")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub to_email: String,
    pub to_name: Option<String>,
    pub template_key: String,
    pub template_version: i32,
    pub payload: Json, // JSONB object of placeholder values
    pub status: String,
    pub scheduled_at: DateTimeWithTimeZone,
    pub claimed_at: Option<DateTimeWithTimeZone>,
    pub sent_at: Option<DateTimeWithTimeZone>,
    pub attempts: i32,
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub provider_message_id: Option<String>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::audit::Entity")]
    Audit,
}

impl Related<super::audit::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Audit.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for OutboxEntry {
    type Error = OutboxError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let status: OutboxStatus = model.status.parse().map_err(|_| OutboxError::CorruptRow {
            id: model.id,
            details: format!("unknown status {:?}", model.status),
        })?;
        let payload = match model.payload {
            Value::Object(map) => map,
            Value::Null => Default::default(),
            other => {
                return Err(OutboxError::CorruptRow {
                    id: model.id,
                    details: format!("payload is not an object: {other}"),
                });
            }
        };

        Ok(Self {
            id: model.id,
            to_email: model.to_email,
            to_name: model.to_name,
            template_key: model.template_key,
            template_version: model.template_version,
            payload,
            status,
            scheduled_at: model.scheduled_at.into(),
            claimed_at: model.claimed_at.map(Into::into),
            sent_at: model.sent_at.map(Into::into),
            attempts: model.attempts,
            last_error: model.last_error,
            provider_message_id: model.provider_message_id,
            created_at: model.created_at.into(),
        })
    }
}

impl From<&OutboxEntry> for ActiveModel {
    fn from(entry: &OutboxEntry) -> Self {
        ActiveModel {
            id: Set(entry.id),
            to_email: Set(entry.to_email.clone()),
            to_name: Set(entry.to_name.clone()),
            template_key: Set(entry.template_key.clone()),
            template_version: Set(entry.template_version),
            payload: Set(Value::Object(entry.payload.clone())),
            status: Set(entry.status.to_string()),
            scheduled_at: Set(entry.scheduled_at.into()),
            claimed_at: Set(entry.claimed_at.map(Into::into)),
            sent_at: Set(entry.sent_at.map(Into::into)),
            attempts: Set(entry.attempts),
            last_error: Set(entry.last_error.clone()),
            provider_message_id: Set(entry.provider_message_id.clone()),
            created_at: Set(entry.created_at.into()),
        }
    }
}

#[cfg(test)]
pub(crate) fn model_for(entry: &OutboxEntry) -> Model {
    Model {
        id: entry.id,
        to_email: entry.to_email.clone(),
        to_name: entry.to_name.clone(),
        template_key: entry.template_key.clone(),
        template_version: entry.template_version,
        payload: Value::Object(entry.payload.clone()),
        status: entry.status.to_string(),
        scheduled_at: entry.scheduled_at.into(),
        claimed_at: entry.claimed_at.map(Into::into),
        sent_at: entry.sent_at.map(Into::into),
        attempts: entry.attempts,
        last_error: entry.last_error.clone(),
        provider_message_id: entry.provider_message_id.clone(),
        created_at: entry.created_at.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewOutboxEntry;
    use chrono::Utc;

    #[test]
    fn test_model_maps_to_entry() {
        let entry = OutboxEntry::from_new(
            NewOutboxEntry::new("nurse@example.org", "invite", 2).with_value("name", "Ana"),
            Utc::now(),
        );
        let back = OutboxEntry::try_from(model_for(&entry)).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_unknown_status_is_corrupt() {
        let entry =
            OutboxEntry::from_new(NewOutboxEntry::new("a@example.org", "invite", 1), Utc::now());
        let mut model = model_for(&entry);
        model.status = "QUEUED".into();
        assert!(matches!(
            OutboxEntry::try_from(model),
            Err(OutboxError::CorruptRow { id, .. }) if id == entry.id
        ));
    }

    #[test]
    fn test_non_object_payload_is_corrupt() {
        let entry =
            OutboxEntry::from_new(NewOutboxEntry::new("a@example.org", "invite", 1), Utc::now());
        let mut model = model_for(&entry);
        model.payload = Value::from(vec![1, 2]);
        assert!(OutboxEntry::try_from(model).is_err());
    }
}

