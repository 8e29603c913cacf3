// ABOUTME: Consent ledger tests: subset checks, union on re-approval, revocation
// ABOUTME: Asserts the single-active-row invariant via the active lookup
//
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::collections::BTreeSet;

fn scope_set(scopes: &[&str]) -> BTreeSet<String> {
    scopes.iter().map(ToString::to_string).collect()
}

/// No consent row means nothing is consented
#[tokio::test]
async fn test_no_consent_initially() {
    let resources = common::test_resources().await;
    let user = common::seed_user(&resources.database).await;
    let client = common::seed_client(&resources.database).await;

    assert!(resources
        .consent
        .active_consent(user.id, client.id)
        .await
        .unwrap()
        .is_none());
    assert!(!resources
        .consent
        .has_consented(user.id, client.id, &scope_set(&["openid"]))
        .await
        .unwrap());
}

/// Approval covers subsets but not supersets
#[tokio::test]
async fn test_subset_check() {
    let resources = common::test_resources().await;
    let user = common::seed_user(&resources.database).await;
    let client = common::seed_client(&resources.database).await;

    resources
        .consent
        .record_consent(user.id, client.id, &scope_set(&["openid", "profile"]))
        .await
        .unwrap();

    assert!(resources
        .consent
        .has_consented(user.id, client.id, &scope_set(&["openid"]))
        .await
        .unwrap());
    assert!(resources
        .consent
        .has_consented(user.id, client.id, &scope_set(&["openid", "profile"]))
        .await
        .unwrap());
    assert!(!resources
        .consent
        .has_consented(user.id, client.id, &scope_set(&["openid", "email"]))
        .await
        .unwrap());
}

/// Re-approval widens the active consent to the union of all approvals
#[tokio::test]
async fn test_consent_union_on_reapproval() {
    let resources = common::test_resources().await;
    let user = common::seed_user(&resources.database).await;
    let client = common::seed_client(&resources.database).await;

    resources
        .consent
        .record_consent(user.id, client.id, &scope_set(&["openid"]))
        .await
        .unwrap();
    resources
        .consent
        .record_consent(user.id, client.id, &scope_set(&["email"]))
        .await
        .unwrap();

    let active = resources
        .consent
        .active_consent(user.id, client.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.scopes, scope_set(&["email", "openid"]));

    // The union row is the single active one; both originals are covered
    assert!(resources
        .consent
        .has_consented(user.id, client.id, &scope_set(&["openid", "email"]))
        .await
        .unwrap());
}

/// Consent is scoped per (user, client) pair
#[tokio::test]
async fn test_consent_isolated_per_pair() {
    let resources = common::test_resources().await;
    let user = common::seed_user(&resources.database).await;
    let other_user = common::seed_user(&resources.database).await;
    let client = common::seed_client(&resources.database).await;

    resources
        .consent
        .record_consent(user.id, client.id, &scope_set(&["openid"]))
        .await
        .unwrap();

    assert!(!resources
        .consent
        .has_consented(other_user.id, client.id, &scope_set(&["openid"]))
        .await
        .unwrap());
}

/// Revocation drops the active row; a later approval starts fresh
#[tokio::test]
async fn test_revoke_consent() {
    let resources = common::test_resources().await;
    let user = common::seed_user(&resources.database).await;
    let client = common::seed_client(&resources.database).await;

    resources
        .consent
        .record_consent(user.id, client.id, &scope_set(&["openid", "email"]))
        .await
        .unwrap();
    assert!(resources
        .consent
        .revoke_consent(user.id, client.id)
        .await
        .unwrap());

    assert!(resources
        .consent
        .active_consent(user.id, client.id)
        .await
        .unwrap()
        .is_none());

    // Revoked scopes do not resurface in the union after a new approval
    resources
        .consent
        .record_consent(user.id, client.id, &scope_set(&["openid"]))
        .await
        .unwrap();
    let active = resources
        .consent
        .active_consent(user.id, client.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.scopes, scope_set(&["openid"]));
}
