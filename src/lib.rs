//! # Sezamo (Passwordless Authentication Core)
//!
//! `sezamo` implements the server-side state machine of a passwordless login
//! flow: issuing one-time codes bound to a device, consuming a submitted code
//! under expiry and attempt-limit rules, and resolving the outcome into a
//! user record.
//!
//! ## Codes and devices
//!
//! Every login attempt is anchored to a **device**: 32 random bytes whose
//! SHA-256 hash is the only identity the server stores. Each device carries
//! exactly one contact value (an email address or a phone number) and owns
//! the codes issued for it. A code exists in two forms derived from the same
//! secret:
//!
//! - the **user input code**, 6 characters the user types back, and
//! - the **link code**, `HMAC-SHA256(key = device id bytes, msg = input code)`,
//!   embedded in a login link.
//!
//! Only the SHA-256 hash of the link code is persisted, so a database leak
//! exposes neither form.
//!
//! ## Consumption rules
//!
//! Consuming a code runs inside a single storage transaction that locks the
//! device row, so concurrent guesses against the same device serialize.
//! Wrong or expired input codes cost an attempt; reaching the configured
//! maximum destroys the device. A dead link costs nothing and simply asks
//! the client to restart. A successful consumption deletes every device for
//! the same contact value and creates the user on first login.
//!
//! ## Storage
//!
//! Persistence is behind the [`storage::PasswordlessStore`] contract; the
//! crate ships [`storage::MemoryStore`] as a reference implementation and
//! test double. Config and store are passed explicitly through
//! [`passwordless::PasswordlessService`]; there is no global state.

pub mod config;
pub mod passwordless;
pub mod storage;
