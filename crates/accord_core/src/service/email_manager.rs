//! Persist-then-deliver email sending.

use super::collaborators::EmailDelivery;
use super::error::ServiceResult;
use crate::model::Email;
use crate::outcome::Problem;
use crate::repo::{Repository, RepositoryFactory};

pub struct EmailManager<'conn, 'd> {
    emails: Repository<'conn, Email>,
    delivery: &'d dyn EmailDelivery,
}

impl<'conn, 'd> EmailManager<'conn, 'd> {
    pub fn new(factory: &RepositoryFactory<'conn>, delivery: &'d dyn EmailDelivery) -> ServiceResult<Self> {
        Ok(Self {
            emails: factory.repository()?,
            delivery,
        })
    }

    /// Stores the email and its receiver links, then hands it to delivery.
    ///
    /// # Errors
    /// - `Delivery` problem with every provider message joined by `"; "`.
    ///   The stored record is left for the caller's transaction to keep or
    ///   roll back.
    pub fn send_email(&self, email: Email) -> ServiceResult<Email> {
        let email = self.emails.insert(email)?;
        if let Err(errors) = self.delivery.deliver(&email) {
            log::warn!(
                "event=email_send module=service status=error email_id={} error_count={}",
                email.id,
                errors.len()
            );
            return Err(Problem::delivery(errors.join("; ")).into());
        }
        log::info!("event=email_send module=service status=ok email_id={}", email.id);
        Ok(email)
    }
}
