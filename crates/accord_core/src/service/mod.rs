//! Business orchestration over repositories and external collaborators.
//!
//! # Responsibility
//! - Apply account rules (uniqueness, single pending confirmation).
//! - Run multi-step workflows under one transaction with compensation.
//! - Sweep expired registrations in the background.
//!
//! # Invariants
//! - Expected business failures surface as `ServiceError::Rejected`; store
//!   failures stay fatal.
//! - Every rejected workflow step rolls back before the failure is returned.

pub mod authorization;
pub mod collaborators;
pub mod confirmation_manager;
pub mod email_manager;
pub mod error;
pub mod registration;
pub mod saga;
pub mod sweeper;
pub mod user_manager;

pub use authorization::{AuthorizationRequest, AuthorizationStage, AuthorizationWorkflow};
pub use collaborators::{
    BcryptPasswordHasher, EmailDelivery, HashError, LogEmailDelivery, PasswordHasher, TokenIssuer,
    TokenPair,
};
pub use confirmation_manager::RegistrationConfirmationManager;
pub use email_manager::EmailManager;
pub use error::{ServiceError, ServiceResult};
pub use registration::{
    ConfirmationRequest, Registration, RegistrationRequest, RegistrationStage, RegistrationWorkflow,
};
pub use saga::{AbortReason, Saga, SagaAbort};
pub use sweeper::{
    ConnectionSource, DatabaseFile, ExpiredRegistrationSweeper, SweeperHandle, SweeperSettings,
};
pub use user_manager::UserManager;
