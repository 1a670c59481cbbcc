//! Registration and confirmation workflows.
//!
//! # Responsibility
//! - Register a user, its pending confirmation and the confirmation email as
//!   one store transaction.
//! - Confirm a registration and notify the user.
//!
//! # Invariants
//! - A registration is persisted only if every step succeeded; any failure
//!   rolls back the user and confirmation inserted by the same call.
//! - Plaintext passwords never reach the store or the log.
//! - Requests are validated before any transaction starts.

use super::collaborators::{EmailDelivery, PasswordHasher};
use super::confirmation_manager::RegistrationConfirmationManager;
use super::email_manager::EmailManager;
use super::error::{ServiceError, ServiceResult};
use super::saga::{AbortReason, Saga};
use super::user_manager::UserManager;
use crate::model::{ConfirmationId, Email, RegistrationConfirmation, User};
use crate::outcome::{Failure, Problem};
use crate::repo::{Inclusion, RepositoryFactory, TransactionGuard, TransactionHandler};
use once_cell::sync::Lazy;
use regex::Regex;

pub const MIN_PASSWORD_LEN: usize = 8;

static USER_NAME_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").ok());
static EMAIL_ADDRESS_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

/// Progress of one registration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStage {
    Started,
    HashGenerated,
    UserInserted,
    ConfirmationRegistered,
    EmailSent,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub user_name: String,
    pub email_address: String,
    pub password: String,
}

impl RegistrationRequest {
    pub fn new(
        user_name: impl Into<String>,
        email_address: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            user_name: user_name.into(),
            email_address: email_address.into(),
            password: password.into(),
        }
    }

    /// Collects every field problem at once.
    pub fn validate(&self) -> Result<(), Failure> {
        let mut problems = Vec::new();
        if !matches_pattern(&USER_NAME_PATTERN, &self.user_name) {
            problems.push(Problem::validation(
                "invalid_user_name",
                "Invalid user name",
                "user names are 3 to 32 letters, digits, `_`, `.` or `-`",
            ));
        }
        if !matches_pattern(&EMAIL_ADDRESS_PATTERN, &self.email_address) {
            problems.push(Problem::validation(
                "invalid_email_address",
                "Invalid email address",
                format!("`{}` is not an email address", self.email_address),
            ));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            problems.push(Problem::validation(
                "password_too_short",
                "Password too short",
                format!("passwords need at least {MIN_PASSWORD_LEN} characters"),
            ));
        }
        Failure::from_problems(problems).map_or(Ok(()), Err)
    }
}

fn matches_pattern(pattern: &Lazy<Option<Regex>>, value: &str) -> bool {
    pattern.as_ref().is_some_and(|regex| regex.is_match(value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationRequest {
    pub confirmation_id: ConfirmationId,
}

/// Everything a committed registration produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub user: User,
    pub confirmation: RegistrationConfirmation,
    pub email: Email,
    pub stage: RegistrationStage,
}

#[derive(Default)]
struct RegistrationContext {
    password_hash: Option<String>,
    user: Option<User>,
    confirmation: Option<RegistrationConfirmation>,
    email: Option<Email>,
}

pub struct RegistrationWorkflow<'a, 'conn> {
    factory: &'a RepositoryFactory<'conn>,
    hasher: &'a dyn PasswordHasher,
    delivery: &'a dyn EmailDelivery,
}

impl<'a, 'conn> RegistrationWorkflow<'a, 'conn> {
    pub fn new(
        factory: &'a RepositoryFactory<'conn>,
        hasher: &'a dyn PasswordHasher,
        delivery: &'a dyn EmailDelivery,
    ) -> Self {
        Self {
            factory,
            hasher,
            delivery,
        }
    }

    /// Registers a new user as one transaction.
    ///
    /// # Errors
    /// - `Rejected` with validation problems, `user_already_exists`, or the
    ///   delivery problem; the store is left as it was before the call.
    /// - `Cancelled` when the factory's token fires before commit.
    pub fn execute_registration(&self, request: &RegistrationRequest) -> ServiceResult<Registration> {
        request.validate()?;

        let users = UserManager::new(self.factory)?;
        let confirmations = RegistrationConfirmationManager::new(self.factory)?;
        let emails = EmailManager::new(self.factory, self.delivery)?;
        let transactions = self.factory.transactions();
        let cancel = self.factory.cancellation().clone();

        let saga = Saga::<_, _, ServiceError>::new("registration")
            .compensated_step(
                "start_transaction",
                RegistrationStage::Started,
                {
                    let cancel = cancel.clone();
                    move |_: &mut RegistrationContext| {
                        transactions.start(&cancel).map_err(ServiceError::from)
                    }
                },
                {
                    let cancel = cancel.clone();
                    move |_: &mut RegistrationContext| {
                        if let Err(err) = transactions.rollback(&cancel) {
                            log::error!(
                                "event=registration_rollback module=service status=error error={err}"
                            );
                        }
                    }
                },
            )
            .step(
                "hash_password",
                RegistrationStage::HashGenerated,
                |ctx: &mut RegistrationContext| {
                    ctx.password_hash = Some(self.hasher.generate(&request.password)?);
                    Ok(())
                },
            )
            .step(
                "insert_user",
                RegistrationStage::UserInserted,
                |ctx: &mut RegistrationContext| {
                    let hash = ctx.password_hash.take().unwrap_or_default();
                    let user = User::new(&request.user_name, &request.email_address, hash);
                    ctx.user = Some(users.add_user(user)?);
                    Ok(())
                },
            )
            .step(
                "register_confirmation",
                RegistrationStage::ConfirmationRegistered,
                |ctx: &mut RegistrationContext| {
                    let user = require(&ctx.user, "user")?;
                    ctx.confirmation = Some(confirmations.register(user)?);
                    Ok(())
                },
            )
            .step(
                "send_email",
                RegistrationStage::EmailSent,
                |ctx: &mut RegistrationContext| {
                    let user = require(&ctx.user, "user")?;
                    let confirmation = require(&ctx.confirmation, "confirmation")?;
                    let email = Email::new(
                        "Confirm your registration",
                        format!(
                            "Hello {}, confirm your account with code {}.",
                            user.user_name, confirmation.id
                        ),
                        vec![user.clone()],
                    );
                    ctx.email = Some(emails.send_email(email)?);
                    Ok(())
                },
            )
            .step("commit", RegistrationStage::Committed, {
                let cancel = cancel.clone();
                move |_: &mut RegistrationContext| {
                    transactions.commit(&cancel).map_err(ServiceError::from)
                }
            });

        let mut ctx = RegistrationContext::default();
        match saga.run(&mut ctx, &cancel) {
            Ok(stage) => {
                let stage = stage.unwrap_or(RegistrationStage::Committed);
                let (user, confirmation, email) = match (ctx.user, ctx.confirmation, ctx.email) {
                    (Some(user), Some(confirmation), Some(email)) => (user, confirmation, email),
                    _ => return Err(internal("registration finished without its records")),
                };
                log::info!(
                    "event=registration module=service status=ok stage={stage:?} user_id={}",
                    user.id
                );
                Ok(Registration {
                    user,
                    confirmation,
                    email,
                    stage,
                })
            }
            Err(abort) => {
                log::warn!(
                    "event=registration module=service status=error stage={:?} reached={:?} failed_step={}",
                    RegistrationStage::RolledBack,
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

    /// Confirms a registration and sends the success email.
    ///
    /// An already confirmed registration is returned as-is without opening a
    /// transaction.
    pub fn execute_confirmation(
        &self,
        request: &ConfirmationRequest,
    ) -> ServiceResult<RegistrationConfirmation> {
        let id = request.confirmation_id;
        let confirmations = RegistrationConfirmationManager::new(self.factory)?;
        let found = confirmations.get(
            &id,
            &[Inclusion::of::<RegistrationConfirmation>(RegistrationConfirmation::USER)?],
        )?;
        if found.is_confirmed() {
            log::info!("event=confirmation module=service status=noop confirmation_id={id}");
            return Ok(found);
        }
        let user = found
            .user
            .as_deref()
            .cloned()
            .ok_or_else(|| internal("confirmation without user"))?;

        let emails = EmailManager::new(self.factory, self.delivery)?;
        let transactions = self.factory.transactions();
        let guard = TransactionGuard::begin(&transactions, self.factory.cancellation())?;
        let confirmed = confirmations.confirm(&id)?;
        emails.send_email(Email::new(
            "Registration confirmed",
            format!("Hello {}, your account is now active.", user.user_name),
            vec![user],
        ))?;
        guard.commit()?;

        log::info!("event=confirmation module=service status=ok confirmation_id={id}");
        Ok(confirmed)
    }
}

fn require<'c, T>(slot: &'c Option<T>, what: &str) -> ServiceResult<&'c T> {
    slot.as_ref()
        .ok_or_else(|| internal(&format!("missing {what} from an earlier step")))
}

fn internal(message: &str) -> ServiceError {
    ServiceError::Store(crate::repo::RepoError::InvalidData(message.to_string()))
}
