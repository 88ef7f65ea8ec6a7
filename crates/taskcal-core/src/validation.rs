//! Input validation shared by every repository.
//!
//! All checks run before any write and fail with [`Error::Validation`].

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

static HEX_COLOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#(?:[0-9A-Fa-f]{3}|[0-9A-Fa-f]{6})$").expect("valid regex"));

static MIME_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z]+/[A-Za-z0-9][A-Za-z0-9!#$&^_.+-]{0,126}$").expect("valid regex")
});

/// Require a non-blank name no longer than `max_len` characters. Returns the
/// trimmed value.
pub fn require_name(field: &str, value: &str, max_len: usize) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_field(field, format!("{} is required", field)));
    }
    if trimmed.chars().count() > max_len {
        return Err(Error::invalid_field(
            field,
            format!("{} must be {} characters or less", field, max_len),
        ));
    }
    Ok(trimmed.to_string())
}

/// Require a `#RGB` or `#RRGGBB` color.
pub fn validate_hex_color(field: &str, value: &str) -> Result<()> {
    if HEX_COLOR.is_match(value) {
        Ok(())
    } else {
        Err(Error::invalid_field(
            field,
            format!("{} must be a hex color like #FF5722, got '{}'", field, value),
        ))
    }
}

/// Canonical form of a tag name: trimmed and lowercased.
pub fn normalize_tag_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Validate and normalize a tag name.
pub fn validate_tag_name(name: &str) -> Result<String> {
    let normalized = normalize_tag_name(name);
    if normalized.is_empty() {
        return Err(Error::invalid_field("name", "Tag name cannot be empty"));
    }
    if normalized.chars().count() > crate::defaults::TAG_NAME_MAX_LEN {
        return Err(Error::invalid_field(
            "name",
            format!(
                "Tag name must be {} characters or less",
                crate::defaults::TAG_NAME_MAX_LEN
            ),
        ));
    }
    if normalized.chars().any(|c| c.is_control()) {
        return Err(Error::invalid_field(
            "name",
            "Tag name cannot contain control characters",
        ));
    }
    Ok(normalized)
}

/// Require a `type/subtype` MIME string.
pub fn validate_mime_type(value: &str) -> Result<()> {
    if MIME_TYPE.is_match(value) {
        Ok(())
    } else {
        Err(Error::invalid_field(
            "mime_type",
            format!("Invalid MIME type: '{}'", value),
        ))
    }
}

/// Top-level MIME category used for storage statistics.
pub fn mime_category(mime_type: &str) -> &str {
    mime_type.split('/').next().unwrap_or(mime_type)
}

/// Require a filename without path separators.
pub fn validate_filename(value: &str) -> Result<String> {
    let name = require_name("filename", value, crate::defaults::FILENAME_MAX_LEN)?;
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(Error::invalid_field(
            "filename",
            "Filename cannot contain path separators",
        ));
    }
    Ok(name)
}

/// Require an http(s) URL or a storage-relative path.
pub fn validate_url(value: &str) -> Result<()> {
    let trimmed = value.trim();
    let ok = trimmed.starts_with("https://")
        || trimmed.starts_with("http://")
        || (trimmed.starts_with('/') && !trimmed.starts_with("//"));
    if ok && !trimmed.chars().any(char::is_whitespace) {
        Ok(())
    } else {
        Err(Error::invalid_field(
            "url",
            format!("Invalid attachment URL: '{}'", value),
        ))
    }
}

/// Escape LIKE/ILIKE wildcard characters (`%`, `_`, `\`) in user input.
pub fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_name_trims() {
        assert_eq!(require_name("name", "  Work  ", 10).unwrap(), "Work");
    }

    #[test]
    fn test_require_name_rejects_blank_and_long() {
        assert!(require_name("name", "   ", 10).unwrap_err().is_validation());
        assert!(require_name("name", "abcdefghijk", 10).is_err());
        assert!(require_name("name", "abcdefghij", 10).is_ok());
    }

    #[test]
    fn test_hex_color() {
        assert!(validate_hex_color("color", "#FF5722").is_ok());
        assert!(validate_hex_color("color", "#fff").is_ok());
        assert!(validate_hex_color("color", "FF5722").is_err());
        assert!(validate_hex_color("color", "#GG5722").is_err());
        assert!(validate_hex_color("color", "#FF57221").is_err());
    }

    #[test]
    fn test_tag_name_normalization() {
        assert_eq!(validate_tag_name("  Urgent ").unwrap(), "urgent");
        assert!(validate_tag_name("   ").is_err());
        assert!(validate_tag_name(&"x".repeat(51)).is_err());
        assert!(validate_tag_name("bad\ttag").is_err());
    }

    #[test]
    fn test_mime_type() {
        assert!(validate_mime_type("image/png").is_ok());
        assert!(validate_mime_type("application/vnd.ms-excel").is_ok());
        assert!(validate_mime_type("png").is_err());
        assert!(validate_mime_type("image/").is_err());
        assert_eq!(mime_category("image/png"), "image");
    }

    #[test]
    fn test_filename() {
        assert_eq!(validate_filename(" report.pdf ").unwrap(), "report.pdf");
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename("a\\b").is_err());
    }

    #[test]
    fn test_url() {
        assert!(validate_url("https://files.example.com/a.png").is_ok());
        assert!(validate_url("/uploads/a.png").is_ok());
        assert!(validate_url("//evil.example.com/a.png").is_err());
        assert!(validate_url("ftp://x").is_err());
        assert!(validate_url("https://x/a b").is_err());
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
