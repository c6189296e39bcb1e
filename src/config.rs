//! Passwordless flow configuration.

const DEFAULT_CODE_LIFETIME_SECONDS: i64 = 15 * 60;
const DEFAULT_MAX_CODE_INPUT_ATTEMPTS: u32 = 5;

/// Tunables for code issuance and consumption.
///
/// Loading these from files or the environment is the embedding server's
/// job; this crate only consumes the resolved values.
#[derive(Clone, Debug)]
pub struct PasswordlessConfig {
    code_lifetime_seconds: i64,
    max_code_input_attempts: u32,
}

impl PasswordlessConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            code_lifetime_seconds: DEFAULT_CODE_LIFETIME_SECONDS,
            max_code_input_attempts: DEFAULT_MAX_CODE_INPUT_ATTEMPTS,
        }
    }

    /// How long a code stays consumable after issuance.
    ///
    /// Expiry is enforced at read time; expired codes are not reaped eagerly.
    #[must_use]
    pub fn with_code_lifetime_seconds(mut self, seconds: i64) -> Self {
        self.code_lifetime_seconds = seconds;
        self
    }

    /// How many failed input-code attempts a device survives.
    #[must_use]
    pub fn with_max_code_input_attempts(mut self, attempts: u32) -> Self {
        self.max_code_input_attempts = attempts;
        self
    }

    #[must_use]
    pub fn code_lifetime_seconds(&self) -> i64 {
        self.code_lifetime_seconds
    }

    #[must_use]
    pub fn max_code_input_attempts(&self) -> u32 {
        self.max_code_input_attempts
    }
}

impl Default for PasswordlessConfig {
    fn default() -> Self {
        Self::new()
    }
}
