//! Request field validation with field-level error reporting.

use super::{
    error::{ApiError, FieldError},
    utils::{normalize_email, valid_email},
};

pub const MAX_PASSWORD_LENGTH: usize = 128;
pub const MAX_NAME_LENGTH: usize = 100;
pub const MAX_TEXT_LENGTH: usize = 4000;
const MAX_EMAIL_LENGTH: usize = 254;

const MALICIOUS_PATTERNS: [&str; 4] = ["<script", "javascript:", "onerror=", "\u{0}"];

#[must_use]
pub fn looks_malicious(value: &str) -> bool {
    let lowered = value.to_lowercase();
    MALICIOUS_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

/// Collects every field problem of a request before failing.
///
/// A value matching a known injection pattern turns the whole request into
/// `ApiError::Forbidden`.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
    malicious: bool,
}

impl Validator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn screen(&mut self, value: &str) -> bool {
        if looks_malicious(value) {
            self.malicious = true;
            return false;
        }
        true
    }

    pub fn email(&mut self, field: &str, value: &str) -> String {
        let email = normalize_email(value);
        if !self.screen(&email) {
            return email;
        }
        if email.is_empty() {
            self.errors.push(FieldError::new(field, "is required"));
        } else if email.len() > MAX_EMAIL_LENGTH || !valid_email(&email) {
            self.errors.push(FieldError::new(field, "must be a valid email address"));
        }
        email
    }

    pub fn password(&mut self, field: &str, value: &str, min_length: usize) {
        let length = value.chars().count();
        if length < min_length {
            self.errors.push(FieldError::new(
                field,
                format!("must be at least {min_length} characters"),
            ));
        } else if length > MAX_PASSWORD_LENGTH {
            self.errors.push(FieldError::new(
                field,
                format!("must be at most {MAX_PASSWORD_LENGTH} characters"),
            ));
        } else if !value.chars().any(char::is_alphabetic) || !value.chars().any(|c| c.is_ascii_digit()) {
            self.errors
                .push(FieldError::new(field, "must contain a letter and a digit"));
        }
    }

    pub fn required(&mut self, field: &str, value: &str, max: usize) -> String {
        let trimmed = value.trim().to_string();
        if !self.screen(&trimmed) {
            return trimmed;
        }
        if trimmed.is_empty() {
            self.errors.push(FieldError::new(field, "is required"));
        } else if trimmed.chars().count() > max {
            self.errors
                .push(FieldError::new(field, format!("must be at most {max} characters")));
        }
        trimmed
    }

    pub fn optional(&mut self, field: &str, value: Option<&str>, max: usize) -> Option<String> {
        let trimmed = value.map(str::trim).filter(|v| !v.is_empty())?;
        if !self.screen(trimmed) {
            return None;
        }
        if trimmed.chars().count() > max {
            self.errors
                .push(FieldError::new(field, format!("must be at most {max} characters")));
        }
        Some(trimmed.to_string())
    }

    pub fn token(&mut self, field: &str, value: &str) -> String {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.len() > 256 {
            self.errors.push(FieldError::new(field, "is invalid"));
        }
        trimmed.to_string()
    }

    pub fn check(&mut self, field: &str, ok: bool, message: &str) {
        if !ok {
            self.errors.push(FieldError::new(field, message));
        }
    }

    /// # Errors
    /// `Forbidden` for injection patterns, otherwise `Validation` with every field error.
    pub fn finish(self) -> Result<(), ApiError> {
        if self.malicious {
            return Err(ApiError::Forbidden);
        }
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self.errors))
        }
    }
}
