//! Best-effort audit trail of authentication activity.

use uuid::Uuid;

use crate::models::{AccountEvent, EventType};
use crate::repositories::{AccountEventRepository, AccountRepository};
use crate::store::StoreError;

/// Who an audit event is about.
#[derive(Debug, Clone, Copy)]
pub enum AuditSubject<'a> {
    Account(Uuid),
    /// Resolved to an account by email; events for unknown emails are dropped.
    Email(&'a str),
}

#[derive(Clone)]
pub struct AccountEventAuditor {
    accounts: AccountRepository,
    events: AccountEventRepository,
}

impl AccountEventAuditor {
    pub fn new(accounts: AccountRepository, events: AccountEventRepository) -> Self {
        Self { accounts, events }
    }

    /// Records an event. Failures are logged and never reach the caller.
    pub async fn record(&self, subject: AuditSubject<'_>, event_type: EventType, description: &str) {
        if let Err(e) = self.try_record(subject, event_type, description).await {
            tracing::warn!(
                event_type = event_type.as_str(),
                error = %e,
                "Failed to record account event"
            );
        }
    }

    async fn try_record(
        &self,
        subject: AuditSubject<'_>,
        event_type: EventType,
        description: &str,
    ) -> Result<(), StoreError> {
        let account_id = match subject {
            AuditSubject::Account(id) => id,
            AuditSubject::Email(email) => match self.accounts.find_by_email(email).await? {
                Some(account) => account.id,
                None => {
                    tracing::debug!(
                        event_type = event_type.as_str(),
                        "No account for audited email; skipping event"
                    );
                    return Ok(());
                }
            },
        };

        self.events
            .create(&AccountEvent::new(account_id, event_type, description))
            .await?;
        Ok(())
    }
}
