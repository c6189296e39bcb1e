//! Storage contract consumed by the passwordless core.
//!
//! The core never talks to a database directly; it drives an implementation
//! of [`PasswordlessStore`]. Multi-step mutations run inside a
//! [`PasswordlessTransaction`]: `begin` opens it, `commit` makes its writes
//! visible, and dropping it without committing rolls every write back.
//!
//! Implementations backed by SQL map the uniqueness variants of
//! [`StorageError`] from their unique-constraint violations and everything
//! else to [`StorageError::Backend`].

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::passwordless::models::{Code, Device, User};

/// Failures the storage layer can report.
///
/// The uniqueness and unknown-row variants are part of the control flow of
/// the core (retry loops, restart signals); only `Backend` is a true
/// infrastructure failure.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("device id hash already exists")]
    DuplicateDeviceIdHash,
    #[error("code id already exists")]
    DuplicateCodeId,
    #[error("link code hash already exists")]
    DuplicateLinkCodeHash,
    #[error("user id already exists")]
    DuplicateUserId,
    #[error("email already in use")]
    DuplicateEmail,
    #[error("phone number already in use")]
    DuplicatePhoneNumber,
    #[error("unknown device id hash")]
    UnknownDeviceIdHash,
    #[error("unknown user id")]
    UnknownUserId,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Persistence operations the passwordless core requires.
#[async_trait]
pub trait PasswordlessStore: Send + Sync {
    /// Open a transaction. Writes made through the handle become visible
    /// only on [`PasswordlessTransaction::commit`]; dropping the handle
    /// rolls them back.
    ///
    /// # Errors
    /// Returns an error if the backend cannot start a transaction.
    async fn begin<'a>(&'a self)
        -> Result<Box<dyn PasswordlessTransaction + 'a>, StorageError>;

    /// Persist a new device together with its first code, atomically.
    ///
    /// # Errors
    /// `DuplicateDeviceIdHash`, `DuplicateCodeId` or `DuplicateLinkCodeHash`
    /// on a uniqueness conflict.
    async fn create_device_with_code(
        &self,
        device: &Device,
        code: &Code,
    ) -> Result<(), StorageError>;

    /// Persist an additional code for an existing device.
    ///
    /// # Errors
    /// `UnknownDeviceIdHash` if the device is gone; `DuplicateCodeId` or
    /// `DuplicateLinkCodeHash` on a uniqueness conflict.
    async fn create_code(&self, code: &Code) -> Result<(), StorageError>;

    /// # Errors
    /// Returns an error if the backend query fails.
    async fn code_by_id(&self, code_id: Uuid) -> Result<Option<Code>, StorageError>;

    /// # Errors
    /// Returns an error if the backend query fails.
    async fn code_by_link_code_hash(
        &self,
        link_code_hash: &str,
    ) -> Result<Option<Code>, StorageError>;

    /// Persist a new user.
    ///
    /// # Errors
    /// `DuplicateUserId`, `DuplicateEmail` or `DuplicatePhoneNumber` on a
    /// uniqueness conflict.
    async fn create_user(&self, user: &User) -> Result<(), StorageError>;

    /// # Errors
    /// Returns an error if the backend query fails.
    async fn user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StorageError>;

    /// # Errors
    /// Returns an error if the backend query fails.
    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StorageError>;

    /// # Errors
    /// Returns an error if the backend query fails.
    async fn user_by_phone_number(
        &self,
        phone_number: &str,
    ) -> Result<Option<User>, StorageError>;
}

/// One open transaction against a [`PasswordlessStore`].
#[async_trait]
pub trait PasswordlessTransaction: Send {
    /// Fetch a device **and take its row lock** for the remainder of the
    /// transaction. This must be a locking/consistent read (`SELECT ... FOR
    /// UPDATE` or equivalent): the core relies on it to serialize concurrent
    /// consumption attempts against the same device. A plain read here
    /// reintroduces the attempt-counting race the lock exists to prevent.
    ///
    /// # Errors
    /// Returns an error if the backend query fails.
    async fn lock_device(&mut self, device_id_hash: &str)
        -> Result<Option<Device>, StorageError>;

    /// # Errors
    /// Returns an error if the backend query fails.
    async fn code_by_link_code_hash(
        &mut self,
        link_code_hash: &str,
    ) -> Result<Option<Code>, StorageError>;

    /// All codes currently owned by a device.
    ///
    /// # Errors
    /// Returns an error if the backend query fails.
    async fn codes_of_device(
        &mut self,
        device_id_hash: &str,
    ) -> Result<Vec<Code>, StorageError>;

    /// # Errors
    /// `UnknownDeviceIdHash` if the device does not exist.
    async fn increment_failed_attempts(
        &mut self,
        device_id_hash: &str,
    ) -> Result<(), StorageError>;

    /// Delete a device and, cascading, all of its codes.
    ///
    /// # Errors
    /// Returns an error if the backend query fails.
    async fn delete_device(&mut self, device_id_hash: &str) -> Result<(), StorageError>;

    /// # Errors
    /// Returns an error if the backend query fails.
    async fn delete_code(&mut self, code_id: Uuid) -> Result<(), StorageError>;

    /// Delete every device (and its codes) bound to this email.
    ///
    /// # Errors
    /// Returns an error if the backend query fails.
    async fn delete_devices_by_email(&mut self, email: &str) -> Result<(), StorageError>;

    /// Delete every device (and its codes) bound to this phone number.
    ///
    /// # Errors
    /// Returns an error if the backend query fails.
    async fn delete_devices_by_phone_number(
        &mut self,
        phone_number: &str,
    ) -> Result<(), StorageError>;

    /// Set or clear a user's email.
    ///
    /// # Errors
    /// `UnknownUserId` if the user does not exist, `DuplicateEmail` if the
    /// value belongs to another user.
    async fn update_user_email(
        &mut self,
        user_id: Uuid,
        email: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Set or clear a user's phone number.
    ///
    /// # Errors
    /// `UnknownUserId` if the user does not exist, `DuplicatePhoneNumber` if
    /// the value belongs to another user.
    async fn update_user_phone_number(
        &mut self,
        user_id: Uuid,
        phone_number: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Make the transaction's writes visible.
    ///
    /// # Errors
    /// Returns an error if the backend fails to commit; the writes are then
    /// rolled back.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;
}
