//! Cipher registry boundary.
//!
//! The cipher implementations live outside this service; startup only needs
//! to know which identifiers the registry accepts.

#[cfg(test)]
use mockall::automock;

/// Identifiers understood by [`BuiltinCiphers`].
pub const BUILTIN_CIPHERS: &[&str] = &["OpenPGP", "AES-256-OFB", "TOTP", "Signal"];

/// Lookup interface exposed by the cipher registry.
#[cfg_attr(test, automock)]
pub trait CipherRegistry {
    /// Returns `true` if `id` names a cipher the registry can enable.
    fn is_supported(&self, id: &str) -> bool;
}

/// Registry backed by the statically known cipher set.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinCiphers;

impl CipherRegistry for BuiltinCiphers {
    fn is_supported(&self, id: &str) -> bool {
        BUILTIN_CIPHERS.contains(&id)
    }
}
