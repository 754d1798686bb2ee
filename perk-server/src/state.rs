//! Application state module
//!
//! Defines shared state accessible across all request handlers and wires the
//! controllers from configuration.

use std::collections::HashSet;
use std::sync::Arc;

use perk_core::{
    ChallengeCodec, ChallengeTransport, Clock, CredentialRegistry, GrantVault, KeyStore,
    ReconcileReport, SealedChallenges, StoreError,
};

use crate::authz::RegistryAuthorizer;
use crate::config::{Config, ConfigError};
use crate::handlers::{AccessController, CredController, PerkController, PerkOptions};
use crate::webauthn::Ceremony;

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    /// Registration and login for configured users
    pub users: Arc<CredController>,
    /// Perk exchange over user credentials
    pub perk: Arc<PerkController>,
    /// Access-control delegation, when administrators are configured
    pub access: Option<Arc<AccessController>>,
    /// Backing key store
    pub store: Arc<dyn KeyStore>,
}

impl AppState {
    /// Wire controllers for a validated configuration.
    ///
    /// Fails with [`ConfigError::MissingHandler`] when `perk` has no handler.
    pub fn build(
        config: &Config,
        store: Arc<dyn KeyStore>,
        ceremony: Arc<dyn Ceremony>,
        clock: Arc<dyn Clock>,
        perk: PerkOptions,
    ) -> Result<Self, ConfigError> {
        if perk.handler.is_none() {
            return Err(ConfigError::MissingHandler);
        }

        let users = Arc::new(config.identity_table()?);
        let admins = config.access_table()?.map(Arc::new);
        let registry = CredentialRegistry::new(store.clone());
        let challenges: Arc<dyn ChallengeTransport> = Arc::new(SealedChallenges::new(
            ChallengeCodec::new(config.session_secret()?, clock.clone()),
            config.session_timeout_ms,
        ));
        let overrides = config.expectation_overrides();

        let mut user_authorizer =
            RegistryAuthorizer::new(registry.clone(), users.clone(), ceremony.clone(), clock.clone());
        if let Some(admins) = &admins {
            user_authorizer = user_authorizer.excluding(admins.clone());
        }

        let access = match admins {
            Some(admins) => {
                let secret = config
                    .credential_secret()?
                    .ok_or(ConfigError::Missing("PERK_CREDENTIAL_SECRET_KEY"))?;
                let authorizer = RegistryAuthorizer::new(
                    registry.clone(),
                    admins.clone(),
                    ceremony.clone(),
                    clock,
                )
                .excluding(users.clone());
                tracing::info!(administrators = admins.len(), "Access control enabled");
                Some(Arc::new(AccessController::new(
                    CredController::new(admins, registry.clone(), ceremony.clone(), challenges.clone()),
                    Arc::new(authorizer),
                    overrides.clone(),
                    GrantVault::new(secret, store.clone()),
                )))
            }
            None => None,
        };

        tracing::info!(
            identities = users.len(),
            ceremony = ceremony.name(),
            store = store.kind(),
            "Application state ready"
        );

        Ok(Self {
            users: Arc::new(CredController::new(users, registry, ceremony, challenges)),
            perk: Arc::new(PerkController::new(Arc::new(user_authorizer), overrides, perk)),
            access,
            store,
        })
    }

    /// Hashes of every configured identity, users and administrators
    pub fn valid_hashes(&self) -> HashSet<String> {
        let mut hashes = self.users.identities().hashes();
        if let Some(access) = &self.access {
            hashes.extend(access.admins().identities().hashes());
        }
        hashes
    }

    /// Remove records of identities that are no longer configured
    pub async fn reconcile(&self) -> Result<ReconcileReport, StoreError> {
        CredentialRegistry::new(self.store.clone())
            .reconcile(&self.valid_hashes())
            .await
    }
}
