// ABOUTME: Consent ledger: has a user approved these scopes for this client
// ABOUTME: Recording consent widens the active grant to the union of approvals
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

use crate::database::Database;
use crate::errors::AppResult;
use crate::models::Consent;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Consent decisions over the database
#[derive(Clone)]
pub struct ConsentLedger {
    database: Database,
}

impl ConsentLedger {
    /// Create a ledger over the given database
    #[must_use]
    pub const fn new(database: Database) -> Self {
        Self { database }
    }

    /// Get the active consent for a (user, client) pair, if any
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn active_consent(
        &self,
        user_id: Uuid,
        client_id: Uuid,
    ) -> AppResult<Option<Consent>> {
        self.database.get_active_consent(user_id, client_id).await
    }

    /// Check whether the user's active consent covers every requested scope
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn has_consented(
        &self,
        user_id: Uuid,
        client_id: Uuid,
        requested: &BTreeSet<String>,
    ) -> AppResult<bool> {
        match self.active_consent(user_id, client_id).await? {
            Some(consent) => Ok(requested.is_subset(&consent.scopes)),
            None => Ok(false),
        }
    }

    /// Record approval of the given scopes; the active consent becomes the
    /// union of prior and new approvals
    ///
    /// # Errors
    /// Returns an error if the transaction fails
    pub async fn record_consent(
        &self,
        user_id: Uuid,
        client_id: Uuid,
        scopes: &BTreeSet<String>,
    ) -> AppResult<Consent> {
        self.database.record_consent(user_id, client_id, scopes).await
    }

    /// Withdraw consent for a client entirely
    ///
    /// # Errors
    /// Returns an error if the update fails
    pub async fn revoke_consent(&self, user_id: Uuid, client_id: Uuid) -> AppResult<bool> {
        self.database.revoke_consent(user_id, client_id).await
    }
}
