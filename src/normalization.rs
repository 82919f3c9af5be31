use serde::{Deserialize, Serialize};
use std::fmt;

/// Comparison identity for a phone number: ASCII digits with an optional
/// leading `+`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedNumber(String);

impl NormalizedNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NormalizedNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Reduce a raw dialed/caller string to its comparison key.
///
/// Everything that is not an ASCII digit is dropped. A `+` survives only if
/// nothing has been kept before it, so the result carries at most one `+`
/// and only in front. Total and idempotent.
pub fn normalize(raw: &str) -> NormalizedNumber {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_digit() {
            out.push(c);
        } else if c == '+' && out.is_empty() {
            out.push(c);
        }
    }
    NormalizedNumber(out)
}

/// `normalize` for input that may be absent.
pub fn normalize_opt(raw: Option<&str>) -> NormalizedNumber {
    raw.map(normalize).unwrap_or_default()
}

/// Transport schemes that go through list and pattern screening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoipScheme {
    Sip,
    Voip,
}

impl VoipScheme {
    /// Case-insensitive; anything other than `sip` or `voip` is `None`.
    pub fn parse(scheme: Option<&str>) -> Option<VoipScheme> {
        let scheme = scheme?.trim();
        if scheme.eq_ignore_ascii_case("sip") {
            Some(VoipScheme::Sip)
        } else if scheme.eq_ignore_ascii_case("voip") {
            Some(VoipScheme::Voip)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VoipScheme::Sip => "sip",
            VoipScheme::Voip => "voip",
        }
    }
}

impl fmt::Display for VoipScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
