use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The contact value a login flow is addressed to: exactly one of an email
/// address or a phone number, by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContactMethod {
    Email(String),
    PhoneNumber(String),
}

impl ContactMethod {
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        match self {
            Self::Email(email) => Some(email),
            Self::PhoneNumber(_) => None,
        }
    }

    #[must_use]
    pub fn phone_number(&self) -> Option<&str> {
        match self {
            Self::Email(_) => None,
            Self::PhoneNumber(phone_number) => Some(phone_number),
        }
    }
}

/// Server-side anchor of a login attempt.
///
/// Identified only by the hash of its device id; the raw id bytes never
/// reach storage. The contact value is immutable for the device's lifetime;
/// a contact change means new devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_id_hash: String,
    pub contact: ContactMethod,
    /// Failed consumption attempts against this device's codes. Only grows;
    /// the device is deleted before it can reach the configured maximum.
    pub failed_attempts: u32,
}

impl Device {
    #[must_use]
    pub fn new(device_id_hash: String, contact: ContactMethod) -> Self {
        Self {
            device_id_hash,
            contact,
            failed_attempts: 0,
        }
    }
}

/// One issued login code, stored only in hashed form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Code {
    pub code_id: Uuid,
    pub device_id_hash: String,
    /// SHA-256 of the raw link code; globally unique, the lookup key for
    /// link-based consumption.
    pub link_code_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Code {
    /// Whether the code is still consumable at `now`.
    #[must_use]
    pub fn is_live(&self, code_lifetime_seconds: i64, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at) < Duration::seconds(code_lifetime_seconds)
    }
}

/// A user account, created lazily on the first successful consumption for a
/// contact value. At least one of `email` and `phone_number` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub time_joined: DateTime<Utc>,
}

/// Everything the caller needs to deliver and later consume a fresh code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCodeResponse {
    pub device_id_hash: String,
    pub code_id: Uuid,
    /// Raw device id, standard base64. Returned to the client, never stored.
    pub device_id: String,
    pub user_input_code: String,
    /// Link code, base64url. Embedded in the login link sent to the user.
    pub link_code: String,
    pub time_created: DateTime<Utc>,
}

/// Outcome of a successful consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeCodeResponse {
    pub created_new_user: bool,
    pub user: User,
}

/// The two mutually exclusive ways to submit a code.
#[derive(Debug, Clone)]
pub enum ConsumeCodeRequest {
    /// The long code from a login link, base64url.
    LinkCode(String),
    /// The short code the user typed, together with the device id handed out
    /// at issuance (standard base64).
    UserInputCode {
        device_id: String,
        user_input_code: String,
    },
}

/// A requested change to one contact field of a user.
///
/// Passing `None` instead of a `FieldUpdate` means "leave the field alone";
/// a `FieldUpdate` with `new_value: None` clears it. This is the tri-state
/// the contact update operation needs.
#[derive(Debug, Clone)]
pub struct FieldUpdate {
    pub new_value: Option<String>,
}

impl FieldUpdate {
    #[must_use]
    pub fn set(value: impl Into<String>) -> Self {
        Self {
            new_value: Some(value.into()),
        }
    }

    #[must_use]
    pub fn clear() -> Self {
        Self { new_value: None }
    }
}
