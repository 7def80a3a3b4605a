//! Password generation and strength scoring.

use std::fmt;

use getrandom::fill as getrandom;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::types::SeftError;

pub const MIN_GENERATED_LEN: usize = 8;

/// Upper bound on generated length.
pub const MAX_GENERATED_LEN: usize = 1024;

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*()_+-=[]{}|;:,.<>?";

const COMMON_PASSWORDS: &[&str] = &["password", "12345678", "qwerty123"];

/// Uniform random index below `n` (rejection sampling, no modulo bias).
fn random_below(n: usize) -> Result<usize, SeftError> {
    let n = u32::try_from(n).map_err(|_| SeftError::InvalidInput("range too large"))?;
    let zone = u32::MAX - (u32::MAX % n);
    loop {
        let mut b = [0u8; 4];
        getrandom(&mut b).map_err(|_| SeftError::InvalidInput("system RNG unavailable"))?;
        let v = u32::from_le_bytes(b);
        if v < zone {
            return Ok((v % n) as usize);
        }
    }
}

fn pick(set: &[u8]) -> Result<u8, SeftError> {
    Ok(set[random_below(set.len())?])
}

/// Generate a random password with at least one lowercase letter, uppercase
/// letter and digit, plus one symbol when `symbols` is set.
///
/// # Errors
///
/// `SeftError::InvalidInput` if `length` is below 8 or above 1024.
pub fn generate_password(length: usize, symbols: bool) -> Result<SecretString, SeftError> {
    if length < MIN_GENERATED_LEN {
        return Err(SeftError::InvalidInput(
            "password length must be at least 8 characters",
        ));
    }
    if length > MAX_GENERATED_LEN {
        return Err(SeftError::InvalidInput("password length is too large"));
    }

    let mut alphabet = Zeroizing::new(Vec::with_capacity(96));
    alphabet.extend_from_slice(LOWER);
    alphabet.extend_from_slice(UPPER);
    alphabet.extend_from_slice(DIGITS);

    let mut chars = Zeroizing::new(Vec::with_capacity(length));
    chars.push(pick(LOWER)?);
    chars.push(pick(UPPER)?);
    chars.push(pick(DIGITS)?);
    if symbols {
        chars.push(pick(SYMBOLS)?);
        alphabet.extend_from_slice(SYMBOLS);
    }
    while chars.len() < length {
        chars.push(pick(&alphabet)?);
    }

    // Fisher-Yates
    for i in (1..chars.len()).rev() {
        let j = random_below(i + 1)?;
        chars.swap(i, j);
    }

    let s: String = chars.iter().map(|&b| b as char).collect();
    Ok(SecretString::new(s.into_boxed_str()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StrengthLevel {
    Weak,
    Fair,
    Good,
    Strong,
    VeryStrong,
}

impl fmt::Display for StrengthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StrengthLevel::Weak => "Weak",
            StrengthLevel::Fair => "Fair",
            StrengthLevel::Good => "Good",
            StrengthLevel::Strong => "Strong",
            StrengthLevel::VeryStrong => "Very Strong",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrengthReport {
    pub score: u32,
    pub max_score: u32,
    pub level: StrengthLevel,
    /// Suggestions, empty for a password with nothing to improve.
    pub feedback: Vec<&'static str>,
    pub percentage: u32,
}

/// Score a password out of 8.
///
/// Length earns up to 2 points (8+ chars: 1, 12+: 2), each character class
/// earns 1, and 16+ chars earn a bonus point. Well-known passwords lose 3.
pub fn password_strength(password: &SecretString) -> StrengthReport {
    let pw = password.expose_secret();
    let len = pw.chars().count();
    let mut score: i32 = 0;
    let mut feedback = Vec::new();

    if len >= 12 {
        score += 2;
    } else if len >= 8 {
        score += 1;
    } else {
        feedback.push("Password should be at least 12 characters long");
    }

    let classes: [(bool, &'static str); 4] = [
        (pw.chars().any(char::is_lowercase), "Add lowercase letters"),
        (pw.chars().any(char::is_uppercase), "Add uppercase letters"),
        (pw.chars().any(|c| c.is_ascii_digit()), "Add numbers"),
        (
            pw.bytes().any(|b| SYMBOLS.contains(&b)),
            "Add special characters",
        ),
    ];
    for (present, hint) in classes {
        if present {
            score += 1;
        } else {
            feedback.push(hint);
        }
    }

    if len >= 16 {
        score += 1;
    }

    let lowered = Zeroizing::new(pw.to_lowercase());
    if COMMON_PASSWORDS.contains(&lowered.as_str()) {
        score -= 3;
        feedback.push("Avoid common passwords");
    }

    let level = match score {
        s if s >= 7 => StrengthLevel::VeryStrong,
        s if s >= 5 => StrengthLevel::Strong,
        s if s >= 3 => StrengthLevel::Good,
        2 => StrengthLevel::Fair,
        _ => StrengthLevel::Weak,
    };
    let score = score.max(0) as u32;
    StrengthReport {
        score,
        max_score: 8,
        level,
        feedback,
        percentage: (score * 100 / 8).min(100),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pw(s: &str) -> SecretString {
        SecretString::new(s.into())
    }

    #[test]
    fn generated_password_has_every_class() {
        for _ in 0..20 {
            let p = generate_password(12, true).unwrap();
            let s = p.expose_secret();
            assert_eq!(s.len(), 12);
            assert!(s.bytes().any(|b| LOWER.contains(&b)));
            assert!(s.bytes().any(|b| UPPER.contains(&b)));
            assert!(s.bytes().any(|b| DIGITS.contains(&b)));
            assert!(s.bytes().any(|b| SYMBOLS.contains(&b)));
        }
    }

    #[test]
    fn generated_without_symbols_is_alphanumeric() {
        let p = generate_password(32, false).unwrap();
        assert!(p.expose_secret().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn short_length_is_rejected() {
        assert!(matches!(
            generate_password(7, true),
            Err(SeftError::InvalidInput(_))
        ));
    }

    #[test]
    fn strength_levels() {
        let r = password_strength(&pw("abc"));
        assert_eq!(r.level, StrengthLevel::Weak);
        assert_eq!(r.score, 1);
        assert!(r.feedback.contains(&"Password should be at least 12 characters long"));

        let r = password_strength(&pw("Tr0ub4dor&3-horse-staple"));
        assert_eq!(r.score, 7);
        assert_eq!(r.level, StrengthLevel::VeryStrong);
        assert!(r.feedback.is_empty());
        assert_eq!(r.percentage, 87);
    }

    #[test]
    fn common_password_is_penalised() {
        let r = password_strength(&pw("Password"));
        // 1 length + lower + upper - 3
        assert_eq!(r.score, 0);
        assert_eq!(r.level, StrengthLevel::Weak);
        assert!(r.feedback.contains(&"Avoid common passwords"));
    }
}
