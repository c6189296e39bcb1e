//! The passwordless state machine: issuance, consumption, cleanup.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::PasswordlessConfig;
use crate::storage::{PasswordlessStore, StorageError};

use super::crypto::{self, CodeBundle};
use super::error::PasswordlessError;
use super::models::{
    ConsumeCodeRequest, ConsumeCodeResponse, ContactMethod, CreateCodeResponse, Device,
    FieldUpdate, User,
};

/// Entry point for every passwordless operation.
///
/// Holds the resolved configuration and the storage handle explicitly; the
/// embedding server constructs one per store and shares it freely (cloning
/// is cheap).
#[derive(Clone)]
pub struct PasswordlessService {
    store: Arc<dyn PasswordlessStore>,
    config: PasswordlessConfig,
}

impl PasswordlessService {
    #[must_use]
    pub fn new(store: Arc<dyn PasswordlessStore>, config: PasswordlessConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn config(&self) -> &PasswordlessConfig {
        &self.config
    }

    /// Issue a code for `contact`, either on a brand new device or — when
    /// `device_id` is given — as an additional code on an existing one.
    ///
    /// Uniqueness collisions on generated material are retried with fresh
    /// values and never surface to the caller.
    ///
    /// # Errors
    /// - [`PasswordlessError::RestartFlow`] if `device_id` is malformed or
    ///   names a device that no longer exists.
    /// - [`PasswordlessError::DuplicateLinkCode`] if the caller pinned both
    ///   `device_id` and `user_input_code` and that exact code already
    ///   exists (deterministic, so retrying cannot help).
    /// - [`PasswordlessError::Storage`] on backend failure.
    pub async fn create_code(
        &self,
        contact: ContactMethod,
        device_id: Option<&str>,
        user_input_code: Option<&str>,
    ) -> Result<CreateCodeResponse, PasswordlessError> {
        match device_id {
            None => self.create_code_on_new_device(contact, user_input_code).await,
            Some(device_id) => self.create_code_on_device(device_id, user_input_code).await,
        }
    }

    async fn create_code_on_new_device(
        &self,
        contact: ContactMethod,
        user_input_code: Option<&str>,
    ) -> Result<CreateCodeResponse, PasswordlessError> {
        loop {
            let bundle = CodeBundle::generate(user_input_code);
            let device = Device::new(bundle.code.device_id_hash.clone(), contact.clone());
            match self
                .store
                .create_device_with_code(&device, &bundle.code)
                .await
            {
                Ok(()) => return Ok(into_response(bundle)),
                // All of these depend on freshly generated material, so a
                // new round of generation resolves them.
                Err(
                    StorageError::DuplicateLinkCodeHash
                    | StorageError::DuplicateCodeId
                    | StorageError::DuplicateDeviceIdHash,
                ) => {
                    debug!("generated device/code collided, retrying with fresh values");
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    async fn create_code_on_device(
        &self,
        device_id: &str,
        user_input_code: Option<&str>,
    ) -> Result<CreateCodeResponse, PasswordlessError> {
        let device_id_bytes =
            crypto::decode_device_id(device_id).map_err(|_| PasswordlessError::RestartFlow)?;
        let pinned = user_input_code.is_some();
        loop {
            let bundle = CodeBundle::for_device_bytes(&device_id_bytes, user_input_code);
            match self.store.create_code(&bundle.code).await {
                Ok(()) => return Ok(into_response(bundle)),
                Err(StorageError::DuplicateLinkCodeHash) if pinned => {
                    // Same device id and same input code derive the same
                    // link code every time; this cannot be retried away.
                    return Err(PasswordlessError::DuplicateLinkCode);
                }
                Err(StorageError::DuplicateLinkCodeHash | StorageError::DuplicateCodeId) => {
                    debug!("generated code collided, retrying with fresh values");
                }
                Err(StorageError::UnknownDeviceIdHash) => {
                    return Err(PasswordlessError::RestartFlow)
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    /// Consume a submitted code and resolve it to a user, creating the user
    /// on the first successful login for its contact value.
    ///
    /// # Errors
    /// - [`PasswordlessError::RestartFlow`] if the link or device anchor is
    ///   gone or expired without penalty, or the flow lost a race.
    /// - [`PasswordlessError::ExpiredUserInputCode`] /
    ///   [`PasswordlessError::IncorrectUserInputCode`] for a counted failed
    ///   attempt, carrying the post-increment attempt count.
    /// - [`PasswordlessError::Storage`] on backend failure.
    pub async fn consume_code(
        &self,
        request: ConsumeCodeRequest,
    ) -> Result<ConsumeCodeResponse, PasswordlessError> {
        let code_lifetime = self.config.code_lifetime_seconds();

        let via_user_input_code = matches!(request, ConsumeCodeRequest::UserInputCode { .. });
        let (device_id_hash, link_code_hash) = match &request {
            ConsumeCodeRequest::LinkCode(link_code) => {
                let raw_link_code = crypto::decode_link_code(link_code)
                    .map_err(|_| PasswordlessError::RestartFlow)?;
                let link_code_hash = crypto::link_code_hash(&raw_link_code);

                // A dead link is rejected before the transaction and costs
                // no attempt: there is no device to penalize the caller on.
                let code = self.store.code_by_link_code_hash(&link_code_hash).await?;
                match code {
                    Some(code) if code.is_live(code_lifetime, Utc::now()) => {
                        (code.device_id_hash, link_code_hash)
                    }
                    _ => return Err(PasswordlessError::RestartFlow),
                }
            }
            ConsumeCodeRequest::UserInputCode {
                device_id,
                user_input_code,
            } => {
                let device_id_bytes = crypto::decode_device_id(device_id)
                    .map_err(|_| PasswordlessError::RestartFlow)?;
                // Reconstruct what issuance would have stored for this
                // device/code pair; if the pair is genuine the lookup key
                // matches an existing row.
                let raw_link_code = crypto::link_code_bytes(&device_id_bytes, user_input_code);
                (
                    crypto::device_id_hash(&device_id_bytes),
                    crypto::link_code_hash(&raw_link_code),
                )
            }
        };

        let consumed_device = self
            .consume_in_transaction(&device_id_hash, &link_code_hash, via_user_input_code)
            .await?;

        let user = match &consumed_device.contact {
            ContactMethod::Email(email) => self.store.user_by_email(email).await?,
            ContactMethod::PhoneNumber(phone_number) => {
                self.store.user_by_phone_number(phone_number).await?
            }
        };

        let Some(user) = user else {
            return self.create_user_for_device(&consumed_device).await;
        };

        // The device's own contact value was cleaned up inside the
        // transaction. If the user's stored contact moved on since this
        // device was issued, codes under the user's current values are no
        // longer reachable through this flow; clear them too.
        if let Some(email) = user.email.as_deref() {
            if consumed_device.contact.email() != Some(email) {
                self.remove_codes_by_email(email).await?;
            }
        }
        if let Some(phone_number) = user.phone_number.as_deref() {
            if consumed_device.contact.phone_number() != Some(phone_number) {
                self.remove_codes_by_phone_number(phone_number).await?;
            }
        }

        Ok(ConsumeCodeResponse {
            created_new_user: false,
            user,
        })
    }

    /// The critical section: everything here runs under the device's row
    /// lock, so concurrent attempts against one device serialize.
    async fn consume_in_transaction(
        &self,
        device_id_hash: &str,
        link_code_hash: &str,
        via_user_input_code: bool,
    ) -> Result<Device, PasswordlessError> {
        let code_lifetime = self.config.code_lifetime_seconds();
        let maximum_attempts = self.config.max_code_input_attempts();

        let mut tx = self.store.begin().await?;

        let Some(device) = tx.lock_device(device_id_hash).await? else {
            return Err(PasswordlessError::RestartFlow);
        };

        // Normally unreachable: the device is deleted in the same breath
        // that would take it to the limit. Guards against a racing writer
        // that incremented without deleting.
        if device.failed_attempts >= maximum_attempts {
            tx.delete_device(device_id_hash).await?;
            tx.commit().await?;
            return Err(PasswordlessError::RestartFlow);
        }

        let code = tx.code_by_link_code_hash(link_code_hash).await?;
        let live = code
            .as_ref()
            .is_some_and(|code| code.is_live(code_lifetime, Utc::now()));

        if !live {
            if !via_user_input_code {
                // Link mode: the link was live before the transaction but
                // is gone now. No device to blame the caller for.
                return Err(PasswordlessError::RestartFlow);
            }

            // A guessed or expired input code against a live device costs
            // an attempt.
            if device.failed_attempts + 1 >= maximum_attempts {
                tx.delete_device(device_id_hash).await?;
                tx.commit().await?;
                warn!(device_id_hash, "device destroyed after exhausting code input attempts");
                return Err(PasswordlessError::RestartFlow);
            }

            tx.increment_failed_attempts(device_id_hash).await?;
            tx.commit().await?;

            let failed_attempts = device.failed_attempts + 1;
            return Err(if code.is_some() {
                PasswordlessError::ExpiredUserInputCode {
                    failed_attempts,
                    maximum_attempts,
                }
            } else {
                PasswordlessError::IncorrectUserInputCode {
                    failed_attempts,
                    maximum_attempts,
                }
            });
        }

        // Success. Every other device for this contact value holds codes
        // that must not remain consumable; drop them all (including this
        // device) in the same transaction.
        match &device.contact {
            ContactMethod::Email(email) => tx.delete_devices_by_email(email).await?,
            ContactMethod::PhoneNumber(phone_number) => {
                tx.delete_devices_by_phone_number(phone_number).await?;
            }
        }
        tx.commit().await?;

        Ok(device)
    }

    async fn create_user_for_device(
        &self,
        device: &Device,
    ) -> Result<ConsumeCodeResponse, PasswordlessError> {
        loop {
            let user = User {
                user_id: Uuid::new_v4(),
                email: device.contact.email().map(str::to_string),
                phone_number: device.contact.phone_number().map(str::to_string),
                time_joined: Utc::now(),
            };
            match self.store.create_user(&user).await {
                Ok(()) => {
                    debug!(user_id = %user.user_id, "created user on first login");
                    return Ok(ConsumeCodeResponse {
                        created_new_user: true,
                        user,
                    });
                }
                Err(StorageError::DuplicateUserId) => {
                    // Id collision; the next round draws a fresh one.
                }
                Err(StorageError::DuplicateEmail | StorageError::DuplicatePhoneNumber) => {
                    // Another flow for the same contact value completed
                    // between our lookup and this insert, or the contact
                    // moved. Reconciling here is not worth the complexity;
                    // the caller restarts.
                    return Err(PasswordlessError::RestartFlow);
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    /// Remove a single code; a no-op if it is already gone. Deletes the
    /// owning device when this was its last code.
    ///
    /// # Errors
    /// [`PasswordlessError::Storage`] on backend failure.
    pub async fn remove_code(&self, code_id: Uuid) -> Result<(), PasswordlessError> {
        let Some(code) = self.store.code_by_id(code_id).await? else {
            return Ok(());
        };

        let mut tx = self.store.begin().await?;
        // Take the device lock so a concurrent consumption cannot interleave.
        tx.lock_device(&code.device_id_hash).await?;

        let codes = tx.codes_of_device(&code.device_id_hash).await?;
        if !codes.iter().any(|candidate| candidate.code_id == code.code_id) {
            // Someone else removed it between the lookup and the lock.
            return Ok(());
        }

        if codes.len() == 1 {
            tx.delete_device(&code.device_id_hash).await?;
        } else {
            tx.delete_code(code.code_id).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Remove every device (and all codes) bound to this email.
    ///
    /// # Errors
    /// [`PasswordlessError::Storage`] on backend failure.
    pub async fn remove_codes_by_email(&self, email: &str) -> Result<(), PasswordlessError> {
        let mut tx = self.store.begin().await?;
        tx.delete_devices_by_email(email).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Remove every device (and all codes) bound to this phone number.
    ///
    /// # Errors
    /// [`PasswordlessError::Storage`] on backend failure.
    pub async fn remove_codes_by_phone_number(
        &self,
        phone_number: &str,
    ) -> Result<(), PasswordlessError> {
        let mut tx = self.store.begin().await?;
        tx.delete_devices_by_phone_number(phone_number).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Apply requested contact changes to a user and sever in-flight codes
    /// tied to both the vacated and the newly claimed values.
    ///
    /// The user is read without a lock; a cleanup decided on slightly stale
    /// contact data cannot corrupt state, at worst a racing consumption
    /// observes a spurious restart.
    ///
    /// # Errors
    /// - [`PasswordlessError::UnknownUserId`] if no such user exists.
    /// - [`PasswordlessError::DuplicateEmail`] /
    ///   [`PasswordlessError::DuplicatePhoneNumber`] if a requested value
    ///   belongs to another user; nothing is changed in that case.
    /// - [`PasswordlessError::Storage`] on backend failure.
    pub async fn update_user(
        &self,
        user_id: Uuid,
        email_update: Option<FieldUpdate>,
        phone_number_update: Option<FieldUpdate>,
    ) -> Result<(), PasswordlessError> {
        let user = self
            .store
            .user_by_id(user_id)
            .await?
            .ok_or(PasswordlessError::UnknownUserId)?;

        let mut tx = self.store.begin().await?;

        if let Some(update) = email_update {
            if update.new_value != user.email {
                tx.update_user_email(user_id, update.new_value.as_deref())
                    .await?;
                if let Some(old_email) = user.email.as_deref() {
                    tx.delete_devices_by_email(old_email).await?;
                }
                if let Some(new_email) = update.new_value.as_deref() {
                    tx.delete_devices_by_email(new_email).await?;
                }
            }
        }

        if let Some(update) = phone_number_update {
            if update.new_value != user.phone_number {
                tx.update_user_phone_number(user_id, update.new_value.as_deref())
                    .await?;
                if let Some(old_phone_number) = user.phone_number.as_deref() {
                    tx.delete_devices_by_phone_number(old_phone_number).await?;
                }
                if let Some(new_phone_number) = update.new_value.as_deref() {
                    tx.delete_devices_by_phone_number(new_phone_number).await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// # Errors
    /// [`PasswordlessError::Storage`] on backend failure.
    pub async fn user_by_id(&self, user_id: Uuid) -> Result<Option<User>, PasswordlessError> {
        Ok(self.store.user_by_id(user_id).await?)
    }

    /// # Errors
    /// [`PasswordlessError::Storage`] on backend failure.
    pub async fn user_by_email(&self, email: &str) -> Result<Option<User>, PasswordlessError> {
        Ok(self.store.user_by_email(email).await?)
    }

    /// # Errors
    /// [`PasswordlessError::Storage`] on backend failure.
    pub async fn user_by_phone_number(
        &self,
        phone_number: &str,
    ) -> Result<Option<User>, PasswordlessError> {
        Ok(self.store.user_by_phone_number(phone_number).await?)
    }
}

fn into_response(bundle: CodeBundle) -> CreateCodeResponse {
    CreateCodeResponse {
        device_id_hash: bundle.code.device_id_hash,
        code_id: bundle.code.code_id,
        device_id: bundle.device_id,
        user_input_code: bundle.user_input_code,
        link_code: bundle.link_code,
        time_created: bundle.code.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    // "000000" contains the digit zero, which neither alphabet includes, so
    // it can never collide with a generated code.
    const NEVER_GENERATED: &str = "000000";

    fn email(address: &str) -> ContactMethod {
        ContactMethod::Email(address.to_string())
    }

    fn phone(number: &str) -> ContactMethod {
        ContactMethod::PhoneNumber(number.to_string())
    }

    fn service(store: &MemoryStore) -> PasswordlessService {
        PasswordlessService::new(Arc::new(store.clone()), PasswordlessConfig::new())
    }

    fn service_with_config(store: &MemoryStore, config: PasswordlessConfig) -> PasswordlessService {
        PasswordlessService::new(Arc::new(store.clone()), config)
    }

    fn input_request(device_id: &str, user_input_code: &str) -> ConsumeCodeRequest {
        ConsumeCodeRequest::UserInputCode {
            device_id: device_id.to_string(),
            user_input_code: user_input_code.to_string(),
        }
    }

    #[tokio::test]
    async fn wrong_input_code_counts_attempts_until_device_destroyed() {
        let store = MemoryStore::new();
        let service = service(&store);
        let created = service
            .create_code(email("a@x.com"), None, None)
            .await
            .unwrap();

        for expected_attempts in 1..=4 {
            let err = service
                .consume_code(input_request(&created.device_id, NEVER_GENERATED))
                .await
                .unwrap_err();
            match err {
                PasswordlessError::IncorrectUserInputCode {
                    failed_attempts,
                    maximum_attempts,
                } => {
                    assert_eq!(failed_attempts, expected_attempts);
                    assert_eq!(maximum_attempts, 5);
                }
                other => panic!("expected IncorrectUserInputCode, got {other:?}"),
            }
        }

        // The fifth failure would reach the maximum; the device dies instead.
        let err = service
            .consume_code(input_request(&created.device_id, NEVER_GENERATED))
            .await
            .unwrap_err();
        assert!(matches!(err, PasswordlessError::RestartFlow));

        // Even the correct code is useless now: the device is gone.
        let err = service
            .consume_code(input_request(&created.device_id, &created.user_input_code))
            .await
            .unwrap_err();
        assert!(matches!(err, PasswordlessError::RestartFlow));
    }

    #[tokio::test]
    async fn expired_input_code_is_reported_as_expired_and_counted() {
        let store = MemoryStore::new();
        let service = service_with_config(
            &store,
            PasswordlessConfig::new().with_code_lifetime_seconds(0),
        );
        let created = service
            .create_code(email("a@x.com"), None, None)
            .await
            .unwrap();

        // The code row exists and the submitted code matches it, but it is
        // past its lifetime: expired, not incorrect.
        let err = service
            .consume_code(input_request(&created.device_id, &created.user_input_code))
            .await
            .unwrap_err();
        match err {
            PasswordlessError::ExpiredUserInputCode {
                failed_attempts,
                maximum_attempts,
            } => {
                assert_eq!(failed_attempts, 1);
                assert_eq!(maximum_attempts, 5);
            }
            other => panic!("expected ExpiredUserInputCode, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dead_link_restarts_without_attempt_penalty() {
        let store = MemoryStore::new();
        let issuing = service(&store);
        let created = issuing
            .create_code(email("a@x.com"), None, None)
            .await
            .unwrap();

        // Same store through a zero-lifetime lens: the link is expired.
        let expired_view = service_with_config(
            &store,
            PasswordlessConfig::new().with_code_lifetime_seconds(0),
        );
        let err = expired_view
            .consume_code(ConsumeCodeRequest::LinkCode(created.link_code.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, PasswordlessError::RestartFlow));

        // The dead link did not cost an attempt: the first wrong input code
        // still reports attempt 1.
        let err = issuing
            .consume_code(input_request(&created.device_id, NEVER_GENERATED))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PasswordlessError::IncorrectUserInputCode {
                failed_attempts: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn malformed_link_and_device_ids_restart_the_flow() {
        let store = MemoryStore::new();
        let service = service(&store);

        let err = service
            .consume_code(ConsumeCodeRequest::LinkCode("not base64!".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, PasswordlessError::RestartFlow));

        let err = service
            .consume_code(input_request("not base64!", "Abc123"))
            .await
            .unwrap_err();
        assert!(matches!(err, PasswordlessError::RestartFlow));

        let err = service
            .create_code(email("a@x.com"), Some("not base64!"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PasswordlessError::RestartFlow));
    }

    #[tokio::test]
    async fn pinned_code_on_same_device_is_a_permanent_duplicate() {
        let store = MemoryStore::new();
        let service = service(&store);
        let created = service
            .create_code(email("a@x.com"), None, Some("Abc123"))
            .await
            .unwrap();
        assert_eq!(created.user_input_code, "Abc123");

        let err = service
            .create_code(email("a@x.com"), Some(&created.device_id), Some("Abc123"))
            .await
            .unwrap_err();
        assert!(matches!(err, PasswordlessError::DuplicateLinkCode));

        // Without a pinned input code the collision space is regenerated,
        // so issuance succeeds.
        let second = service
            .create_code(email("a@x.com"), Some(&created.device_id), None)
            .await
            .unwrap();
        assert_eq!(second.device_id_hash, created.device_id_hash);
        assert_ne!(second.code_id, created.code_id);
    }

    #[tokio::test]
    async fn issuing_on_unknown_device_restarts_the_flow() {
        let store = MemoryStore::new();
        let service = service(&store);
        let unknown_device_id = crypto::encode_device_id(&crypto::generate_device_id_bytes());

        let err = service
            .create_code(email("a@x.com"), Some(&unknown_device_id), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PasswordlessError::RestartFlow));
    }

    #[tokio::test]
    async fn remove_code_collapses_single_code_devices() {
        let store = MemoryStore::new();
        let service = service(&store);
        let created = service
            .create_code(email("a@x.com"), None, None)
            .await
            .unwrap();

        service.remove_code(created.code_id).await.unwrap();
        // Removing again is a no-op.
        service.remove_code(created.code_id).await.unwrap();

        // The device went with its only code.
        let err = service
            .consume_code(input_request(&created.device_id, &created.user_input_code))
            .await
            .unwrap_err();
        assert!(matches!(err, PasswordlessError::RestartFlow));
    }

    #[tokio::test]
    async fn remove_code_keeps_device_with_remaining_codes() {
        let store = MemoryStore::new();
        let service = service(&store);
        let first = service
            .create_code(email("a@x.com"), None, None)
            .await
            .unwrap();
        let second = service
            .create_code(email("a@x.com"), Some(&first.device_id), None)
            .await
            .unwrap();

        service.remove_code(first.code_id).await.unwrap();

        // The device survived; its remaining code still consumes.
        let consumed = service
            .consume_code(input_request(&second.device_id, &second.user_input_code))
            .await
            .unwrap();
        assert!(consumed.created_new_user);
        assert_eq!(consumed.user.email.as_deref(), Some("a@x.com"));
    }

    #[tokio::test]
    async fn update_user_severs_devices_for_old_and_new_email() {
        let store = MemoryStore::new();
        let service = service(&store);

        let created = service
            .create_code(email("old@x.com"), None, None)
            .await
            .unwrap();
        let consumed = service
            .consume_code(ConsumeCodeRequest::LinkCode(created.link_code))
            .await
            .unwrap();
        let user_id = consumed.user.user_id;

        // In-flight codes for the vacated and the claimed value, plus one
        // for an unrelated phone number that must survive.
        let old_email_code = service
            .create_code(email("old@x.com"), None, None)
            .await
            .unwrap();
        let new_email_code = service
            .create_code(email("new@x.com"), None, None)
            .await
            .unwrap();
        let phone_code = service
            .create_code(phone("+36701234567"), None, None)
            .await
            .unwrap();

        service
            .update_user(user_id, Some(FieldUpdate::set("new@x.com")), None)
            .await
            .unwrap();

        let updated = service.user_by_id(user_id).await.unwrap().unwrap();
        assert_eq!(updated.email.as_deref(), Some("new@x.com"));
        assert!(service.user_by_email("old@x.com").await.unwrap().is_none());

        for dead in [&old_email_code, &new_email_code] {
            let err = service
                .consume_code(input_request(&dead.device_id, &dead.user_input_code))
                .await
                .unwrap_err();
            assert!(matches!(err, PasswordlessError::RestartFlow));
        }

        let consumed = service
            .consume_code(input_request(&phone_code.device_id, &phone_code.user_input_code))
            .await
            .unwrap();
        assert!(consumed.created_new_user);
    }

    #[tokio::test]
    async fn update_user_rejects_unknown_and_conflicting_values() {
        let store = MemoryStore::new();
        let service = service(&store);

        let err = service
            .update_user(Uuid::new_v4(), Some(FieldUpdate::set("a@x.com")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PasswordlessError::UnknownUserId));

        // Two users via two full flows.
        for address in ["a@x.com", "b@x.com"] {
            let created = service.create_code(email(address), None, None).await.unwrap();
            service
                .consume_code(ConsumeCodeRequest::LinkCode(created.link_code))
                .await
                .unwrap();
        }
        let second = service.user_by_email("b@x.com").await.unwrap().unwrap();

        let err = service
            .update_user(second.user_id, Some(FieldUpdate::set("a@x.com")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PasswordlessError::DuplicateEmail));

        // The failed transaction rolled back: nothing changed.
        let unchanged = service.user_by_id(second.user_id).await.unwrap().unwrap();
        assert_eq!(unchanged.email.as_deref(), Some("b@x.com"));
    }

    #[tokio::test]
    async fn update_user_can_clear_a_field() {
        let store = MemoryStore::new();
        let service = service(&store);

        let created = service
            .create_code(phone("+36701234567"), None, None)
            .await
            .unwrap();
        let consumed = service
            .consume_code(ConsumeCodeRequest::LinkCode(created.link_code))
            .await
            .unwrap();
        let user_id = consumed.user.user_id;

        service
            .update_user(user_id, Some(FieldUpdate::set("a@x.com")), None)
            .await
            .unwrap();
        service
            .update_user(user_id, Some(FieldUpdate::clear()), None)
            .await
            .unwrap();

        let user = service.user_by_id(user_id).await.unwrap().unwrap();
        assert_eq!(user.email, None);
        assert_eq!(user.phone_number.as_deref(), Some("+36701234567"));
    }
}
