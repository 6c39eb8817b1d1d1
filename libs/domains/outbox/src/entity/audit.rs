use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::OutboxError;
use crate::models::{AuditAction, AuditRecord};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "email_audit")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub outbox_id: Uuid,
    pub action: String,
    pub metadata: Json,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::outbox::Entity",
        from = "Column::OutboxId",
        to = "super::outbox::Column::Id",
        on_delete = "Cascade"
    )]
    Outbox,
}

impl Related<super::outbox::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Outbox.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for AuditRecord {
    type Error = OutboxError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let action: AuditAction = model.action.parse().map_err(|_| OutboxError::CorruptRow {
            id: model.outbox_id,
            details: format!("unknown audit action {:?}", model.action),
        })?;

        Ok(Self {
            id: model.id,
            outbox_id: model.outbox_id,
            action,
            metadata: model.metadata,
            created_at: model.created_at.into(),
        })
    }
}

impl From<&AuditRecord> for ActiveModel {
    fn from(record: &AuditRecord) -> Self {
        ActiveModel {
            id: Set(record.id),
            outbox_id: Set(record.outbox_id),
            action: Set(record.action.to_string()),
            metadata: Set(record.metadata.clone()),
            created_at: Set(record.created_at.into()),
        }
    }
}
