//! Client-side checks run before any identity provider call

use super::AuthError;

/// Minimum accepted password length
pub const MIN_PASSWORD_CHARS: usize = 8;

/// Check a new password and its confirmation
pub fn validate_new_password(password: &str, confirm: &str) -> Result<(), AuthError> {
    if password != confirm {
        return Err(AuthError::Validation("Passwords do not match".to_string()));
    }
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AuthError::Validation(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_CHARS
        )));
    }
    Ok(())
}

/// Loose shape check; the provider has the final say
pub fn validate_email(email: &str) -> Result<(), AuthError> {
    let email = email.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AuthError::Validation(format!("Invalid email address: '{}'", email)))
    }
}
