//! Validation helpers for DTOs.

use validator::ValidationError;

const MAX_NAME_CHARS: usize = 32;

/// Validates a lobby or display name: 1 to 32 characters, not only whitespace, no control
/// characters.
///
/// # Examples
///
/// ```ignore
/// validate_name("Friday night") // Ok
/// validate_name("   ")          // Err - blank
/// ```
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    let chars = name.chars().count();
    if name.trim().is_empty() || chars > MAX_NAME_CHARS {
        let mut err = ValidationError::new("name_length");
        err.message = Some(
            format!("Name must be between 1 and {MAX_NAME_CHARS} characters (got {chars})").into(),
        );
        return Err(err);
    }

    if name.chars().any(char::is_control) {
        let mut err = ValidationError::new("name_format");
        err.message = Some("Name must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name_valid() {
        assert!(validate_name("Friday night").is_ok());
        assert!(validate_name("é").is_ok());
        assert!(validate_name(&"x".repeat(32)).is_ok());
    }

    #[test]
    fn test_validate_name_invalid_length() {
        assert!(validate_name("").is_err());
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"x".repeat(33)).is_err());
    }

    #[test]
    fn test_validate_name_invalid_format() {
        assert!(validate_name("tab\there").is_err());
    }
}
