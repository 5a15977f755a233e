//! Startup bootstrap of the first administrator.

use service_core::error::AppError;

use crate::config::AdminSeedConfig;
use crate::models::Account;
use crate::repositories::AccountRepository;

pub const SEED_LEAD_ORIGIN: &str = "generated-on-seed";

#[derive(Debug)]
pub enum SeedOutcome {
    Created(Account),
    /// A live account already holds the email; it is left untouched.
    AlreadyPresent,
    /// The email belongs to a deleted account and stays reserved.
    Reserved,
}

/// Creates the configured administrator unless an account, live or deleted,
/// already holds its email. Safe to run on every start.
pub async fn seed_admin(
    accounts: &AccountRepository,
    seed: &AdminSeedConfig,
) -> Result<SeedOutcome, AppError> {
    if accounts.find_by_email(&seed.email).await?.is_some() {
        tracing::debug!(email = %seed.email, "Admin account already present");
        return Ok(SeedOutcome::AlreadyPresent);
    }
    if accounts.email_exists(&seed.email).await? {
        tracing::warn!(email = %seed.email, "Admin email belongs to a deleted account; not seeding");
        return Ok(SeedOutcome::Reserved);
    }

    let mut admin = Account::new(seed.name.trim());
    admin.email = Some(seed.email.clone());
    admin.lead_origin = Some(SEED_LEAD_ORIGIN.to_string());
    admin.is_admin = true;
    admin.is_moderator = true;
    admin.is_email_verified = true;

    let admin = accounts.create(&admin).await?;
    tracing::info!(account_id = %admin.id, email = %seed.email, "Seeded admin account");
    Ok(SeedOutcome::Created(admin))
}
