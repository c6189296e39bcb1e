//! In-memory reference implementation of the storage contract.
//!
//! A transaction takes the whole-store lock and mutates a working copy of
//! the state; `commit` writes the copy back, dropping the handle discards
//! it. Holding the store lock for the transaction's lifetime serializes all
//! transactions, which satisfies (more strongly than required) the
//! per-device locking read the contract asks for.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::passwordless::models::{Code, Device, User};

use super::{PasswordlessStore, PasswordlessTransaction, StorageError};

#[derive(Debug, Default, Clone)]
struct State {
    devices: HashMap<String, Device>,
    codes: HashMap<Uuid, Code>,
    users: HashMap<Uuid, User>,
}

impl State {
    fn insert_code(&mut self, code: &Code) -> Result<(), StorageError> {
        if self.codes.contains_key(&code.code_id) {
            return Err(StorageError::DuplicateCodeId);
        }
        if self
            .codes
            .values()
            .any(|existing| existing.link_code_hash == code.link_code_hash)
        {
            return Err(StorageError::DuplicateLinkCodeHash);
        }
        self.codes.insert(code.code_id, code.clone());
        Ok(())
    }

    fn delete_device(&mut self, device_id_hash: &str) {
        self.devices.remove(device_id_hash);
        self.codes
            .retain(|_, code| code.device_id_hash != device_id_hash);
    }

    fn delete_devices_by_email(&mut self, email: &str) {
        let doomed: Vec<String> = self
            .devices
            .values()
            .filter(|device| device.contact.email() == Some(email))
            .map(|device| device.device_id_hash.clone())
            .collect();
        for device_id_hash in doomed {
            self.delete_device(&device_id_hash);
        }
    }

    fn delete_devices_by_phone_number(&mut self, phone_number: &str) {
        let doomed: Vec<String> = self
            .devices
            .values()
            .filter(|device| device.contact.phone_number() == Some(phone_number))
            .map(|device| device.device_id_hash.clone())
            .collect();
        for device_id_hash in doomed {
            self.delete_device(&device_id_hash);
        }
    }

    fn code_by_link_code_hash(&self, link_code_hash: &str) -> Option<Code> {
        self.codes
            .values()
            .find(|code| code.link_code_hash == link_code_hash)
            .cloned()
    }
}

/// Hash-map backed store for tests and embedded use.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<State>,
    working: State,
}

#[async_trait]
impl PasswordlessStore for MemoryStore {
    async fn begin<'a>(
        &'a self,
    ) -> Result<Box<dyn PasswordlessTransaction + 'a>, StorageError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }

    async fn create_device_with_code(
        &self,
        device: &Device,
        code: &Code,
    ) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        if state.devices.contains_key(&device.device_id_hash) {
            return Err(StorageError::DuplicateDeviceIdHash);
        }
        state.insert_code(code)?;
        state
            .devices
            .insert(device.device_id_hash.clone(), device.clone());
        Ok(())
    }

    async fn create_code(&self, code: &Code) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        if !state.devices.contains_key(&code.device_id_hash) {
            return Err(StorageError::UnknownDeviceIdHash);
        }
        state.insert_code(code)
    }

    async fn code_by_id(&self, code_id: Uuid) -> Result<Option<Code>, StorageError> {
        let state = self.state.lock().await;
        Ok(state.codes.get(&code_id).cloned())
    }

    async fn code_by_link_code_hash(
        &self,
        link_code_hash: &str,
    ) -> Result<Option<Code>, StorageError> {
        let state = self.state.lock().await;
        Ok(state.code_by_link_code_hash(link_code_hash))
    }

    async fn create_user(&self, user: &User) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        if state.users.contains_key(&user.user_id) {
            return Err(StorageError::DuplicateUserId);
        }
        if let Some(email) = user.email.as_deref() {
            if state
                .users
                .values()
                .any(|existing| existing.email.as_deref() == Some(email))
            {
                return Err(StorageError::DuplicateEmail);
            }
        }
        if let Some(phone_number) = user.phone_number.as_deref() {
            if state
                .users
                .values()
                .any(|existing| existing.phone_number.as_deref() == Some(phone_number))
            {
                return Err(StorageError::DuplicatePhoneNumber);
            }
        }
        state.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StorageError> {
        let state = self.state.lock().await;
        Ok(state.users.get(&user_id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|user| user.email.as_deref() == Some(email))
            .cloned())
    }

    async fn user_by_phone_number(
        &self,
        phone_number: &str,
    ) -> Result<Option<User>, StorageError> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|user| user.phone_number.as_deref() == Some(phone_number))
            .cloned())
    }
}

#[async_trait]
impl PasswordlessTransaction for MemoryTransaction {
    async fn lock_device(
        &mut self,
        device_id_hash: &str,
    ) -> Result<Option<Device>, StorageError> {
        // The store lock held by this transaction is the row lock.
        Ok(self.working.devices.get(device_id_hash).cloned())
    }

    async fn code_by_link_code_hash(
        &mut self,
        link_code_hash: &str,
    ) -> Result<Option<Code>, StorageError> {
        Ok(self.working.code_by_link_code_hash(link_code_hash))
    }

    async fn codes_of_device(
        &mut self,
        device_id_hash: &str,
    ) -> Result<Vec<Code>, StorageError> {
        Ok(self
            .working
            .codes
            .values()
            .filter(|code| code.device_id_hash == device_id_hash)
            .cloned()
            .collect())
    }

    async fn increment_failed_attempts(
        &mut self,
        device_id_hash: &str,
    ) -> Result<(), StorageError> {
        let device = self
            .working
            .devices
            .get_mut(device_id_hash)
            .ok_or(StorageError::UnknownDeviceIdHash)?;
        device.failed_attempts += 1;
        Ok(())
    }

    async fn delete_device(&mut self, device_id_hash: &str) -> Result<(), StorageError> {
        self.working.delete_device(device_id_hash);
        Ok(())
    }

    async fn delete_code(&mut self, code_id: Uuid) -> Result<(), StorageError> {
        self.working.codes.remove(&code_id);
        Ok(())
    }

    async fn delete_devices_by_email(&mut self, email: &str) -> Result<(), StorageError> {
        self.working.delete_devices_by_email(email);
        Ok(())
    }

    async fn delete_devices_by_phone_number(
        &mut self,
        phone_number: &str,
    ) -> Result<(), StorageError> {
        self.working.delete_devices_by_phone_number(phone_number);
        Ok(())
    }

    async fn update_user_email(
        &mut self,
        user_id: Uuid,
        email: Option<&str>,
    ) -> Result<(), StorageError> {
        if let Some(email) = email {
            if self.working.users.values().any(|existing| {
                existing.user_id != user_id && existing.email.as_deref() == Some(email)
            }) {
                return Err(StorageError::DuplicateEmail);
            }
        }
        let user = self
            .working
            .users
            .get_mut(&user_id)
            .ok_or(StorageError::UnknownUserId)?;
        user.email = email.map(str::to_string);
        Ok(())
    }

    async fn update_user_phone_number(
        &mut self,
        user_id: Uuid,
        phone_number: Option<&str>,
    ) -> Result<(), StorageError> {
        if let Some(phone_number) = phone_number {
            if self.working.users.values().any(|existing| {
                existing.user_id != user_id
                    && existing.phone_number.as_deref() == Some(phone_number)
            }) {
                return Err(StorageError::DuplicatePhoneNumber);
            }
        }
        let user = self
            .working
            .users
            .get_mut(&user_id)
            .ok_or(StorageError::UnknownUserId)?;
        user.phone_number = phone_number.map(str::to_string);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
