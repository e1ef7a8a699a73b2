use anyhow::anyhow;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

pub const MIN_PASSWORD_LEN: usize = 8;

fn email_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)+$").ok()
    })
    .as_ref()
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    email_re().is_some_and(|re| re.is_match(email.trim()))
}

pub fn parse_dob(dob: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(dob.trim(), "%Y-%m-%d").ok()
}

/// Returns the first rule a new password breaks, if any.
pub fn check_new_password(password: &str, confirm: &str) -> Option<&'static str> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Some("Password must be at least 8 characters");
    }
    if password != confirm {
        return Some("Passwords do not match");
    }
    None
}

/// Argon2id PHC string (`$argon2id$v=19$...`) with a fresh random salt.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| anyhow!("failed to hash password: {e}"))
}

/// Unparsable stored hashes never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_roundtrip_and_salting() {
        let a = hash_password("correct horse").expect("hash");
        let b = hash_password("correct horse").expect("hash");
        assert_ne!(a, b, "salts must differ");
        assert!(a.starts_with("$argon2id$"), "{}", a);
        assert!(verify_password("correct horse", &a));
        assert!(verify_password("correct horse", &b));
        assert!(!verify_password("wrong horse", &a));
        assert!(!verify_password("correct horse", "plain-text"));
    }

    #[test]
    fn stored_hash_is_not_a_plain_digest() {
        let stored = hash_password("password123").expect("hash");
        let parsed = PasswordHash::new(&stored).expect("phc string");
        assert_eq!(parsed.algorithm.as_str(), "argon2id");
        assert!(parsed.salt.is_some());
        // Hashes in the old single-round format are refused outright.
        assert!(!verify_password(
            "password123",
            "sha256$3ed4a1$ef4cba14f0c1a7d5e2b3c4d5e6f708192a3b4c5d6e7f8091a2b3c4d5e6f70819"
        ));
    }

    #[test]
    fn email_rules() {
        assert!(is_valid_email("ada@example.com"));
        assert!(is_valid_email(" first.last+tag@uni.ac.ke "));
        assert!(!is_valid_email("ada@"));
        assert!(!is_valid_email("ada example.com"));
        assert!(!is_valid_email("ada@localhost"));
        assert_eq!(normalize_email(" Ada@Example.COM "), "ada@example.com");
    }

    #[test]
    fn password_rules() {
        assert_eq!(
            check_new_password("short", "short"),
            Some("Password must be at least 8 characters")
        );
        assert_eq!(
            check_new_password("longenough", "different1"),
            Some("Passwords do not match")
        );
        assert_eq!(check_new_password("longenough", "longenough"), None);
    }

    #[test]
    fn dob_parses_iso_dates_only() {
        assert!(parse_dob("2004-02-29").is_some());
        assert!(parse_dob("2003-02-29").is_none());
        assert!(parse_dob("29/02/2004").is_none());
    }
}
