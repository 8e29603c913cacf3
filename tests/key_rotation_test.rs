// ABOUTME: Key lifecycle tests: bootstrap, rotation, historical verification, JWKS
// ABOUTME: Covers the single-active invariant and the active-key deletion guard
//
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

/// Bootstrap generates and activates a key when none exists, and is idempotent
#[tokio::test]
async fn test_bootstrap_creates_single_active_key() {
    let resources = common::test_resources().await;

    let first = resources.key_manager.bootstrap().await.unwrap();
    assert!(first.is_active);

    let again = resources.key_manager.bootstrap().await.unwrap();
    assert_eq!(again.id, first.id);

    let keys = resources.key_manager.list().await.unwrap();
    assert_eq!(keys.len(), 1);
}

/// Rotation keeps exactly one active key; historical keys still verify
#[tokio::test]
async fn test_rotation_preserves_historical_verification() {
    let resources = common::test_resources().await;
    let user = common::seed_user(&resources.database).await;

    let old_key = resources.key_manager.bootstrap().await.unwrap();
    let old_token = common::bearer_for(&resources, &user).await;

    // Rotate to a fresh key
    let new_key = resources.key_manager.generate_key_pair().await.unwrap();
    resources.key_manager.activate(new_key.id).await.unwrap();

    let actives: Vec<_> = resources
        .key_manager
        .list()
        .await
        .unwrap()
        .into_iter()
        .filter(|k| k.is_active)
        .collect();
    assert_eq!(actives.len(), 1);
    assert_eq!(actives[0].id, new_key.id);

    // Token signed under the old key verifies by kid lookup
    let claims = resources
        .issuer
        .verify_access_token(&old_token)
        .await
        .unwrap();
    assert_eq!(claims.sub, user.id.to_string());

    // New tokens carry the new kid
    let new_token = common::bearer_for(&resources, &user).await;
    let header = jsonwebtoken::decode_header(&new_token).unwrap();
    assert_eq!(header.kid.as_deref(), Some(new_key.id.to_string().as_str()));
    assert_ne!(old_key.id, new_key.id);
}

/// JWKS lists every stored key so relying parties can verify old tokens
#[tokio::test]
async fn test_jwks_contains_all_keys() {
    let resources = common::test_resources().await;

    let first = resources.key_manager.bootstrap().await.unwrap();
    let second = resources.key_manager.generate_key_pair().await.unwrap();
    resources.key_manager.activate(second.id).await.unwrap();

    let jwks = resources.key_manager.jwks().await.unwrap();
    assert_eq!(jwks.keys.len(), 2);

    let kids: Vec<_> = jwks.keys.iter().map(|k| k.kid.clone()).collect();
    assert!(kids.contains(&first.id.to_string()));
    assert!(kids.contains(&second.id.to_string()));

    for key in &jwks.keys {
        assert_eq!(key.kty, "RSA");
        assert_eq!(key.key_use, "sig");
        assert_eq!(key.alg, "RS256");
        assert!(!key.n.is_empty());
        assert!(!key.e.is_empty());
    }
}

/// The active key cannot be deleted; historical keys can
#[tokio::test]
async fn test_delete_refuses_active_key() {
    let resources = common::test_resources().await;

    let first = resources.key_manager.bootstrap().await.unwrap();
    assert!(resources.key_manager.delete(first.id).await.is_err());

    let second = resources.key_manager.generate_key_pair().await.unwrap();
    resources.key_manager.activate(second.id).await.unwrap();

    // first is now historical and deletable
    resources.key_manager.delete(first.id).await.unwrap();
    let keys = resources.key_manager.list().await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].id, second.id);
}

/// Without any key pair, tokens fall back to HS256 and still verify
#[tokio::test]
async fn test_hs256_fallback_without_key_pairs() {
    let resources = common::test_resources().await;
    let user = common::seed_user(&resources.database).await;

    let token = common::bearer_for(&resources, &user).await;
    let header = jsonwebtoken::decode_header(&token).unwrap();
    assert_eq!(header.alg, jsonwebtoken::Algorithm::HS256);
    assert!(header.kid.is_none());

    let claims = resources.issuer.verify_access_token(&token).await.unwrap();
    assert_eq!(claims.sub, user.id.to_string());
}
