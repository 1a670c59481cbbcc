//! Credential check and token issuance.
//!
//! # Invariants
//! - Unknown user names and wrong passwords yield the same problem.
//! - Tokens are returned only after the refresh token is committed.

use super::collaborators::{PasswordHasher, TokenIssuer, TokenPair};
use super::confirmation_manager::RegistrationConfirmationManager;
use super::error::{ServiceError, ServiceResult};
use super::saga::{AbortReason, Saga};
use super::user_manager::UserManager;
use crate::outcome::Problem;
use crate::repo::{RepositoryFactory, TransactionHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStage {
    Started,
    TokensIssued,
    RefreshTokenStored,
    Committed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub user_name: String,
    pub password: String,
}

impl AuthorizationRequest {
    pub fn new(user_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            password: password.into(),
        }
    }
}

fn invalid_credentials() -> ServiceError {
    Problem::authorization(
        "invalid_credentials",
        "Invalid credentials",
        "user name or password is incorrect",
    )
    .into()
}

pub struct AuthorizationWorkflow<'a, 'conn> {
    factory: &'a RepositoryFactory<'conn>,
    hasher: &'a dyn PasswordHasher,
    issuer: &'a dyn TokenIssuer,
}

impl<'a, 'conn> AuthorizationWorkflow<'a, 'conn> {
    pub fn new(
        factory: &'a RepositoryFactory<'conn>,
        hasher: &'a dyn PasswordHasher,
        issuer: &'a dyn TokenIssuer,
    ) -> Self {
        Self {
            factory,
            hasher,
            issuer,
        }
    }

    /// Validates credentials and issues a token pair for a confirmed user.
    pub fn execute_authorization(&self, request: &AuthorizationRequest) -> ServiceResult<TokenPair> {
        let users = UserManager::new(self.factory)?;
        let user = users
            .find_by_user_name(&request.user_name)?
            .ok_or_else(invalid_credentials)?;
        if !self.hasher.validate(&request.password, &user.password_hash) {
            log::info!(
                "event=authorization module=service status=rejected reason=invalid_credentials"
            );
            return Err(invalid_credentials());
        }
        if !RegistrationConfirmationManager::new(self.factory)?.is_user_confirmed(&user)? {
            return Err(Problem::authorization(
                "registration_not_confirmed",
                "Registration not confirmed",
                "confirm the registration before signing in",
            )
            .into());
        }

        let transactions = self.factory.transactions();
        let cancel = self.factory.cancellation().clone();
        let saga = Saga::<_, _, ServiceError>::new("authorization")
            .compensated_step(
                "start_transaction",
                AuthorizationStage::Started,
                {
                    let cancel = cancel.clone();
                    move |_: &mut Option<TokenPair>| {
                        transactions.start(&cancel).map_err(ServiceError::from)
                    }
                },
                {
                    let cancel = cancel.clone();
                    move |_: &mut Option<TokenPair>| {
                        if let Err(err) = transactions.rollback(&cancel) {
                            log::error!(
                                "event=authorization_rollback module=service status=error error={err}"
                            );
                        }
                    }
                },
            )
            .step(
                "issue_tokens",
                AuthorizationStage::TokensIssued,
                |tokens: &mut Option<TokenPair>| {
                    *tokens = Some(self.issuer.generate_tokens(&user)?);
                    Ok(())
                },
            )
            .step(
                "store_refresh_token",
                AuthorizationStage::RefreshTokenStored,
                |tokens: &mut Option<TokenPair>| match tokens {
                    Some(pair) => users.store_refresh_token(&user.id, &pair.refresh_token, pair.expiry_ms),
                    None => Err(ServiceError::Store(crate::repo::RepoError::InvalidData(
                        "no tokens issued".to_string(),
                    ))),
                },
            )
            .step("commit", AuthorizationStage::Committed, {
                let cancel = cancel.clone();
                move |_: &mut Option<TokenPair>| {
                    transactions.commit(&cancel).map_err(ServiceError::from)
                }
            });

        let mut tokens = None;
        match saga.run(&mut tokens, &cancel) {
            Ok(_) => {
                log::info!(
                    "event=authorization module=service status=ok user_id={}",
                    user.id
                );
                tokens.ok_or_else(invalid_credentials)
            }
            Err(abort) => {
                log::warn!(
                    "event=authorization module=service status=error reached={:?} failed_step={}",
                    abort.reached,
                    abort.failed_step
                );
                Err(match abort.reason {
                    AbortReason::Failed(err) => err,
                    AbortReason::Cancelled => ServiceError::Cancelled,
                })
            }
        }
    }
}
