pub mod account_events;
pub mod accounts;
pub mod auditor;
pub mod auth;
pub mod directory;
pub mod identity;
pub mod metrics;
pub mod seed;

pub use account_events::AccountEventService;
pub use accounts::AccountService;
pub use auditor::{AccountEventAuditor, AuditSubject};
pub use auth::AuthService;
pub use directory::AccountDirectory;
pub use identity::{FirebaseIdentityProvider, IdentityError, IdentityProvider, MockIdentityProvider};
pub use seed::{seed_admin, SeedOutcome};
