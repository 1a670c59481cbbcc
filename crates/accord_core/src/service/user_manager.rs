//! User account rules over the generic repository.

use super::confirmation_manager::RegistrationConfirmationManager;
use super::error::{ServiceError, ServiceResult};
use crate::model::{RegistrationConfirmation, User, UserId};
use crate::outcome::Problem;
use crate::repo::{Filter, Inclusion, Repository, RepositoryFactory, UpdateSet};
use crate::schema::KEY_COLUMN;

pub struct UserManager<'conn> {
    users: Repository<'conn, User>,
}

impl<'conn> UserManager<'conn> {
    pub fn new(factory: &RepositoryFactory<'conn>) -> ServiceResult<Self> {
        Ok(Self {
            users: factory.repository()?,
        })
    }

    /// Inserts `user` unless its user name or email address is taken.
    pub fn add_user(&self, user: User) -> ServiceResult<User> {
        let taken = Filter::eq(User::USER_NAME, user.user_name.clone())
            .or(Filter::eq(User::EMAIL_ADDRESS, user.email_address.clone()));
        if self.users.exists_where(taken)? {
            return Err(Problem::conflict(
                "user_already_exists",
                "User already exists",
                format!(
                    "a user named `{}` or with address `{}` already exists",
                    user.user_name, user.email_address
                ),
            )
            .into());
        }
        let user = self.users.insert(user)?;
        log::info!("event=user_add module=service status=ok user_id={}", user.id);
        Ok(user)
    }

    pub fn get_user(&self, id: &UserId, inclusions: &[Inclusion]) -> ServiceResult<User> {
        Ok(self.users.find(id, inclusions)?)
    }

    pub fn find_by_user_name(&self, user_name: &str) -> ServiceResult<Option<User>> {
        Ok(self
            .users
            .query(&[])
            .filter(Filter::eq(User::USER_NAME, user_name.to_string()))
            .first()?)
    }

    pub fn remove_user(&self, id: &UserId) -> ServiceResult<()> {
        if self.users.delete_by_key(id)? == 0 {
            return Err(Problem::entity_not_found("User", &id.to_string()).into());
        }
        Ok(())
    }

    /// Bulk removal by key; returns how many users existed.
    pub fn remove_users(&self, ids: &[UserId]) -> ServiceResult<usize> {
        Ok(self.users.delete_keys(ids)?)
    }

    /// Removes the owners of confirmations still unconfirmed and created
    /// before `cutoff_ms`, in one statement that re-reads confirmation state.
    pub fn remove_unconfirmed_before(&self, cutoff_ms: i64) -> ServiceResult<usize> {
        let expired = Filter::in_selection::<RegistrationConfirmation>(
            KEY_COLUMN,
            RegistrationConfirmation::USER_ID,
            RegistrationConfirmationManager::expired_filter(cutoff_ms),
        );
        Ok(self.users.delete_where(expired)?)
    }

    pub fn store_refresh_token(
        &self,
        id: &UserId,
        refresh_token: &str,
        expiry_ms: i64,
    ) -> ServiceResult<()> {
        let set = UpdateSet::new()
            .set(User::REFRESH_TOKEN, refresh_token.to_string())
            .set(User::REFRESH_TOKEN_EXPIRY, expiry_ms);
        match self.users.update_key(id, &set)? {
            0 => Err(ServiceError::from(Problem::entity_not_found(
                "User",
                &id.to_string(),
            ))),
            _ => Ok(()),
        }
    }
}
