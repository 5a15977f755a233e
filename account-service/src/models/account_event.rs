//! Account events - login/logout audit trail, owned by an account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::StoredModel;
use crate::store::{Entity, Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Login,
    LoginFailed,
    Logout,
    Register,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Login => "LOGIN",
            EventType::LoginFailed => "LOGIN_FAILED",
            EventType::Logout => "LOGOUT",
            EventType::Register => "REGISTER",
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LOGIN" => Ok(EventType::Login),
            "LOGIN_FAILED" => Ok(EventType::LoginFailed),
            "LOGOUT" => Ok(EventType::Logout),
            "REGISTER" => Ok(EventType::Register),
            _ => Err(format!("Invalid event type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountEvent {
    pub id: Uuid,
    pub account_id: Uuid,
    pub event_type: EventType,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl AccountEvent {
    pub fn new(account_id: Uuid, event_type: EventType, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            event_type,
            description: Some(description.into()),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

impl StoredModel for AccountEvent {
    const ENTITY: Entity = Entity::AccountEvent;

    fn to_record(&self) -> Record {
        Record::from([
            ("id".to_string(), Value::from(self.id)),
            ("account_id".to_string(), Value::from(self.account_id)),
            ("event_type".to_string(), Value::from(self.event_type.as_str())),
            ("description".to_string(), Value::from(self.description.clone())),
            ("created_at".to_string(), Value::from(self.created_at)),
            ("updated_at".to_string(), Value::from(self.updated_at)),
            ("deleted_at".to_string(), Value::from(self.deleted_at)),
        ])
    }
}
