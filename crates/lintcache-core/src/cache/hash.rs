use serde::Serialize;

use super::Result;

/// Computes the identity token of a unit's current text.
///
/// Implementations must be deterministic and depend on nothing but `text`.
pub trait ContentIdentity {
    fn identity_of(&self, text: &str) -> String;
}

/// Default identity: hex encoded blake3 digest of the text
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Identity;

impl ContentIdentity for Blake3Identity {
    fn identity_of(&self, text: &str) -> String {
        blake3::hash(text.as_bytes()).to_hex().to_string()
    }
}

impl<F> ContentIdentity for F
where
    F: Fn(&str) -> String,
{
    fn identity_of(&self, text: &str) -> String {
        self(text)
    }
}

/// Hash any serializable configuration into an opaque config identity.
///
/// Serialization goes through JSON so that field order, not Rust layout,
/// determines the identity.
pub fn hash_config<T: Serialize + ?Sized>(config: &T) -> Result<String> {
    let bytes = serde_json::to_vec(config)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}
