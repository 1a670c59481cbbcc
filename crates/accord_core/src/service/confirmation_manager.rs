//! Registration confirmation rules.
//!
//! # Invariants
//! - A user has at most one unconfirmed confirmation; finding more is a
//!   conflict, never silently resolved.
//! - Confirming is idempotent: an already confirmed row is never updated.

use super::error::ServiceResult;
use crate::clock::Clock;
use crate::model::{ConfirmationId, RegistrationConfirmation, User};
use crate::outcome::Problem;
use crate::repo::{Filter, Inclusion, Repository, RepositoryFactory, UpdateSet};
use crate::schema::CREATED_DATE_COLUMN;

const MULTIPLE_FOUND: &str = "multiple_registration_confirmations_found";

pub struct RegistrationConfirmationManager<'conn> {
    confirmations: Repository<'conn, RegistrationConfirmation>,
    clock: &'conn dyn Clock,
}

impl<'conn> RegistrationConfirmationManager<'conn> {
    pub fn new(factory: &RepositoryFactory<'conn>) -> ServiceResult<Self> {
        Ok(Self {
            confirmations: factory.repository()?,
            clock: factory.clock(),
        })
    }

    /// Returns the user's pending confirmation, creating it when absent.
    pub fn register(&self, user: &User) -> ServiceResult<RegistrationConfirmation> {
        let mut pending = self
            .confirmations
            .query(&[])
            .filter(Filter::eq(RegistrationConfirmation::USER_ID, user.id.to_string()))
            .filter(Filter::is_null(RegistrationConfirmation::CONFIRMATION_DATE))
            .limit(2)
            .fetch()?;
        match pending.len() {
            0 => {
                let confirmation = self
                    .confirmations
                    .insert(RegistrationConfirmation::new(user.id))?;
                log::info!(
                    "event=confirmation_register module=service status=ok confirmation_id={} user_id={}",
                    confirmation.id,
                    user.id
                );
                Ok(confirmation)
            }
            1 => Ok(pending.remove(0)),
            _ => Err(Problem::conflict(
                MULTIPLE_FOUND,
                "Multiple registration confirmations found",
                format!("user {} has more than one pending confirmation", user.id),
            )
            .into()),
        }
    }

    /// Loads one confirmation; a duplicated id is reported as a conflict.
    pub fn get(&self, id: &ConfirmationId, inclusions: &[Inclusion]) -> ServiceResult<RegistrationConfirmation> {
        let mut found = self
            .confirmations
            .query(inclusions)
            .filter(Filter::key(id))
            .limit(2)
            .fetch()?;
        match found.len() {
            0 => Err(Problem::entity_not_found("RegistrationConfirmation", &id.to_string()).into()),
            1 => Ok(found.remove(0)),
            _ => Err(Problem::conflict(
                MULTIPLE_FOUND,
                "Multiple registration confirmations found",
                format!("confirmation id {id} is not unique"),
            )
            .into()),
        }
    }

    /// Stamps the confirmation date once; later calls return the stored row
    /// unchanged.
    pub fn confirm(&self, id: &ConfirmationId) -> ServiceResult<RegistrationConfirmation> {
        let mut confirmation = self.get(id, &[])?;
        if confirmation.is_confirmed() {
            log::debug!("event=confirmation_confirm module=service status=noop confirmation_id={id}");
            return Ok(confirmation);
        }

        let now = self.clock.now_ms();
        let set = UpdateSet::new().set(RegistrationConfirmation::CONFIRMATION_DATE, now);
        self.confirmations.update(&confirmation, &set)?;
        confirmation.confirmation_date = Some(now);
        confirmation.audit.updated_date = now;
        log::info!("event=confirmation_confirm module=service status=ok confirmation_id={id}");
        Ok(confirmation)
    }

    /// Unconfirmed confirmations created strictly before `cutoff_ms`.
    pub fn expired(&self, cutoff_ms: i64) -> ServiceResult<Vec<RegistrationConfirmation>> {
        Ok(self
            .confirmations
            .query(&[])
            .filter(Self::expired_filter(cutoff_ms))
            .fetch()?)
    }

    pub fn count_expired(&self, cutoff_ms: i64) -> ServiceResult<u64> {
        Ok(self
            .confirmations
            .query(&[])
            .filter(Self::expired_filter(cutoff_ms))
            .count()?)
    }

    pub(crate) fn expired_filter(cutoff_ms: i64) -> Filter {
        Filter::is_null(RegistrationConfirmation::CONFIRMATION_DATE)
            .and(Filter::lt(CREATED_DATE_COLUMN, cutoff_ms))
    }

    pub fn is_user_confirmed(&self, user: &User) -> ServiceResult<bool> {
        Ok(self.confirmations.exists_where(
            Filter::eq(RegistrationConfirmation::USER_ID, user.id.to_string())
                .and(Filter::is_not_null(RegistrationConfirmation::CONFIRMATION_DATE)),
        )?)
    }
}
