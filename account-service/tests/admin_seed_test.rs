//! Startup administrator seeding over the persistence chain.

mod common;

use account_service::{
    config::AdminSeedConfig,
    services::{seed_admin, SeedOutcome},
    store::{Entity, Filter},
};
use axum::http::StatusCode;
use common::TestApp;

fn admin_seed() -> AdminSeedConfig {
    AdminSeedConfig {
        email: "root@x.io".to_string(),
        name: "Root Admin".to_string(),
    }
}

#[tokio::test]
async fn seeded_admin_can_use_admin_routes() {
    let app = TestApp::new();

    let admin = match seed_admin(&app.accounts(), &admin_seed()).await.unwrap() {
        SeedOutcome::Created(admin) => admin,
        other => panic!("expected a new admin, got {:?}", other),
    };
    assert!(admin.is_admin && admin.is_moderator && admin.is_active);
    assert!(admin.is_email_verified);
    assert_eq!(admin.lead_origin.as_deref(), Some("generated-on-seed"));
    assert_eq!(admin.first_name.as_deref(), Some("Root"));

    let token = app.token_for(&admin);
    let (status, body) = app.request("GET", "/v1/accounts", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["pagination"]["total"], 1);
}

#[tokio::test]
async fn seeding_twice_keeps_a_single_admin() {
    let app = TestApp::new();

    seed_admin(&app.accounts(), &admin_seed()).await.unwrap();
    let again = seed_admin(&app.accounts(), &admin_seed()).await.unwrap();

    assert!(matches!(again, SeedOutcome::AlreadyPresent));
    let total = app
        .accounts()
        .count(Filter::new().eq("email", "root@x.io"), true)
        .await
        .unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn existing_account_with_the_email_is_not_promoted() {
    let app = TestApp::new();
    let existing = app.seed_account("root@x.io", |_| {}).await;

    let outcome = seed_admin(&app.accounts(), &admin_seed()).await.unwrap();

    assert!(matches!(outcome, SeedOutcome::AlreadyPresent));
    let stored = app.accounts().get_by_id(existing.id).await.unwrap();
    assert!(!stored.is_admin);
}

#[tokio::test]
async fn deleted_admin_email_stays_reserved() {
    let app = TestApp::new();
    let SeedOutcome::Created(admin) = seed_admin(&app.accounts(), &admin_seed()).await.unwrap()
    else {
        panic!("expected a new admin");
    };
    app.accounts().delete(admin.id).await.unwrap();

    let outcome = seed_admin(&app.accounts(), &admin_seed()).await.unwrap();

    assert!(matches!(outcome, SeedOutcome::Reserved));
    assert_eq!(app.store.raw_rows(Entity::Account).len(), 1);
}
