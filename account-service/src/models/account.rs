//! Account model - the tenant's user record, carrying role flags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::StoredModel;
use crate::store::{Entity, Record, Value};

/// Roles a route may require. Each maps to an `is_<role>` flag on the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Moderator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Moderator => "moderator",
        }
    }

    /// Name of the account column backing this role.
    pub fn flag(&self) -> &'static str {
        match self {
            Role::Admin => "is_admin",
            Role::Moderator => "is_moderator",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "moderator" => Ok(Role::Moderator),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub lead_origin: Option<String>,
    pub photo_url: Option<String>,
    pub birth_date: Option<DateTime<Utc>>,
    pub provider: Option<String>,
    pub provider_aud: Option<String>,
    pub provider_account_id: Option<String>,
    pub provider_identity_id: Option<String>,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub is_admin: bool,
    pub is_moderator: bool,
    pub is_provider_anonymous: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Create a new, active account without roles.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        let name = name.into();
        let (first_name, last_name) = split_display_name(&name);
        Self {
            id: Uuid::new_v4(),
            email: None,
            phone: None,
            name,
            first_name,
            last_name,
            lead_origin: None,
            photo_url: None,
            birth_date: None,
            provider: None,
            provider_aud: None,
            provider_account_id: None,
            provider_identity_id: None,
            is_active: true,
            is_email_verified: false,
            is_admin: false,
            is_moderator: false,
            is_provider_anonymous: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        match role {
            Role::Admin => self.is_admin,
            Role::Moderator => self.is_moderator,
        }
    }

    /// Admins pass every role requirement; anyone else needs at least one of
    /// the required roles.
    pub fn is_authorized_for(&self, required: &[Role]) -> bool {
        self.is_admin || required.iter().any(|role| self.has_role(*role))
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl StoredModel for Account {
    const ENTITY: Entity = Entity::Account;

    fn to_record(&self) -> Record {
        Record::from([
            ("id".to_string(), Value::from(self.id)),
            ("email".to_string(), Value::from(self.email.clone())),
            ("phone".to_string(), Value::from(self.phone.clone())),
            ("name".to_string(), Value::from(self.name.clone())),
            ("first_name".to_string(), Value::from(self.first_name.clone())),
            ("last_name".to_string(), Value::from(self.last_name.clone())),
            ("lead_origin".to_string(), Value::from(self.lead_origin.clone())),
            ("photo_url".to_string(), Value::from(self.photo_url.clone())),
            ("birth_date".to_string(), Value::from(self.birth_date)),
            ("provider".to_string(), Value::from(self.provider.clone())),
            ("provider_aud".to_string(), Value::from(self.provider_aud.clone())),
            (
                "provider_account_id".to_string(),
                Value::from(self.provider_account_id.clone()),
            ),
            (
                "provider_identity_id".to_string(),
                Value::from(self.provider_identity_id.clone()),
            ),
            ("is_active".to_string(), Value::from(self.is_active)),
            ("is_email_verified".to_string(), Value::from(self.is_email_verified)),
            ("is_admin".to_string(), Value::from(self.is_admin)),
            ("is_moderator".to_string(), Value::from(self.is_moderator)),
            (
                "is_provider_anonymous".to_string(),
                Value::from(self.is_provider_anonymous),
            ),
            ("created_at".to_string(), Value::from(self.created_at)),
            ("updated_at".to_string(), Value::from(self.updated_at)),
            ("deleted_at".to_string(), Value::from(self.deleted_at)),
        ])
    }
}

/// First and last word of a display name.
pub fn split_display_name(name: &str) -> (Option<String>, Option<String>) {
    let mut words = name.split_whitespace();
    let first = words.next().map(str::to_string);
    let last = words.last().map(str::to_string);
    (first, last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_satisfies_any_requirement() {
        let mut account = Account::new("Root");
        account.is_admin = true;
        assert!(account.is_authorized_for(&[Role::Moderator]));
        assert!(account.is_authorized_for(&[]));
    }

    #[test]
    fn roles_are_checked_by_flag() {
        let mut account = Account::new("Mod");
        assert!(!account.is_authorized_for(&[Role::Moderator]));
        account.is_moderator = true;
        assert!(account.is_authorized_for(&[Role::Admin, Role::Moderator]));
        assert!(!account.is_authorized_for(&[Role::Admin]));
    }

    #[test]
    fn display_names_split_into_first_and_last() {
        assert_eq!(
            split_display_name("Ada King Lovelace"),
            (Some("Ada".to_string()), Some("Lovelace".to_string()))
        );
        assert_eq!(split_display_name("Ada"), (Some("Ada".to_string()), None));
        assert_eq!(split_display_name("  "), (None, None));
    }

    #[test]
    fn role_flags_follow_naming_convention() {
        for role in [Role::Admin, Role::Moderator] {
            assert_eq!(role.flag(), format!("is_{}", role.as_str()));
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }
}
