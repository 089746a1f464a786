//! Credential handling — the raw key never leaves this type except
//! through `expose()`, which only the probe and CSV export call.

use std::fmt;

use zeroize::Zeroizing;

/// Masked form used for keys too short to show any of.
pub const MASK_PLACEHOLDER: &str = "****";

/// Mask a key for display: "sk-ABCDEFGHIJKL" → "sk-A...IJKL".
///
/// Keys of 8 characters or fewer collapse to a fixed placeholder so their
/// length or content is never hinted at.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return MASK_PLACEHOLDER.to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// An API key under test. Wiped on drop; `Debug` and `Display` show only
/// the masked form.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Zeroizing<String>);

impl Credential {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(Zeroizing::new(raw.into()))
    }

    /// The raw key. Callers must not log or serialize it.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn masked(&self) -> String {
        mask_key(&self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.masked()).finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}
