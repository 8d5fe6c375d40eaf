//! Credential hashing with argon2id.
//!
//! Mismatched passwords are a normal `Ok(false)`; only a malformed digest is
//! an error. `needs_upgrade` lets callers lazily rehash on the next
//! successful login when cost parameters were raised.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum PasswordError {
    #[error("password does not meet policy: {0}")]
    WeakInput(&'static str),
    #[error("malformed password digest")]
    MalformedDigest,
    #[error("failed to hash password")]
    HashingFailed,
}

/// Complexity policy applied before hashing. Deployment configuration, not a
/// hardcoded constant.
#[derive(Clone, Copy, Debug)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_lowercase: bool,
    pub require_uppercase: bool,
    pub require_digit: bool,
    pub require_symbol: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_lowercase: true,
            require_uppercase: true,
            require_digit: true,
            require_symbol: true,
        }
    }
}

impl PasswordPolicy {
    fn check(&self, password: &str) -> Result<(), PasswordError> {
        if password.chars().count() < self.min_length {
            return Err(PasswordError::WeakInput("too short"));
        }
        if self.require_lowercase && !password.chars().any(|c| c.is_ascii_lowercase()) {
            return Err(PasswordError::WeakInput("missing lowercase letter"));
        }
        if self.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(PasswordError::WeakInput("missing uppercase letter"));
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(PasswordError::WeakInput("missing digit"));
        }
        if self.require_symbol && !password.chars().any(|c| !c.is_ascii_alphanumeric()) {
            return Err(PasswordError::WeakInput("missing symbol"));
        }
        Ok(())
    }
}

pub struct PasswordVault {
    policy: PasswordPolicy,
    /// Minimum memory cost (KiB) considered current; lower stored digests
    /// report `needs_upgrade`.
    min_memory_cost: u32,
    params: Params,
}

impl PasswordVault {
    /// # Errors
    /// Fails when the argon2 parameters are out of range.
    pub fn new(policy: PasswordPolicy, memory_cost_kib: u32) -> Result<Self, PasswordError> {
        let params = Params::new(memory_cost_kib, 3, 1, None)
            .map_err(|_| PasswordError::HashingFailed)?;
        Ok(Self {
            policy,
            min_memory_cost: memory_cost_kib,
            params,
        })
    }

    /// Vault with default policy and the argon2 recommended cost.
    ///
    /// # Errors
    /// Fails when the argon2 parameters are out of range.
    pub fn with_defaults() -> Result<Self, PasswordError> {
        Self::new(PasswordPolicy::default(), Params::DEFAULT_M_COST)
    }

    fn hasher(&self) -> Argon2<'_> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password into a PHC digest string.
    ///
    /// # Errors
    /// `WeakInput` when the password fails policy, `HashingFailed` on
    /// primitive failure.
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        self.policy.check(password)?;
        let salt = SaltString::generate(&mut OsRng);
        self.hasher()
            .hash_password(password.as_bytes(), &salt)
            .map(|digest| digest.to_string())
            .map_err(|_| PasswordError::HashingFailed)
    }

    /// Constant-time verification against a stored digest.
    ///
    /// # Errors
    /// Only `MalformedDigest`; a wrong password is `Ok(false)`.
    pub fn verify(&self, password: &str, digest: &str) -> Result<bool, PasswordError> {
        let parsed = PasswordHash::new(digest).map_err(|_| PasswordError::MalformedDigest)?;
        Ok(self
            .hasher()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    /// Whether a stored digest was produced with a lower cost than currently
    /// configured. The caller performs the rehash after a successful login.
    #[must_use]
    pub fn needs_upgrade(&self, digest: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(digest) else {
            return true;
        };
        match Params::try_from(&parsed) {
            Ok(params) => params.m_cost() < self.min_memory_cost,
            Err(_) => true,
        }
    }
}
