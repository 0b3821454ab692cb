//! Filename sanitization and storage-key generation.
//!
//! Object-store keys are never user-controlled: uploaded names are sanitized
//! for display/rename purposes, and the actual key is a fresh UUID plus the
//! lowercased extension.

use uuid::Uuid;

const MAX_FILENAME_LENGTH: usize = 255;

/// Reserved device names on Windows; prefixed with `file_` when matched.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Sanitize a client-provided filename.
///
/// Removes path traversal sequences (`..`, `/`, `\`), replaces every
/// character outside `[A-Za-z0-9._-]` with `_`, prefixes Windows reserved
/// device names with `file_`, and caps the length at 255 preserving the
/// extension. An empty result becomes `file`.
pub fn sanitize(filename: &str) -> String {
    // Strip traversal sequences outright before the character map.
    let mut stripped = filename.replace("..", "");
    stripped.retain(|c| c != '/' && c != '\\');

    let mut sanitized: String = stripped
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect();

    sanitized = sanitized.trim_matches('_').trim().to_string();

    let upper = sanitized.to_uppercase();
    let reserved = RESERVED_NAMES
        .iter()
        .any(|r| upper == *r || upper.starts_with(&format!("{r}.")));
    if reserved {
        sanitized = format!("file_{sanitized}");
    }

    if sanitized.is_empty() {
        sanitized = "file".to_string();
    }

    if sanitized.len() > MAX_FILENAME_LENGTH {
        let ext = extension(&sanitized);
        let keep = MAX_FILENAME_LENGTH - ext.len();
        sanitized = format!("{}{}", &sanitized[..keep], ext);
    }

    sanitized
}

/// Generate the opaque object-store key for a file: `{uuid}{.ext}`.
pub fn storage_key(original_filename: &str) -> String {
    let ext = extension(original_filename);
    let token = Uuid::new_v4();
    if ext.is_empty() {
        token.to_string()
    } else {
        format!("{token}{ext}")
    }
}

/// Extract the lowercased extension including the leading dot, or `""`.
pub fn extension(filename: &str) -> String {
    match filename.rfind('.') {
        Some(idx) if idx + 1 < filename.len() => filename[idx..].to_lowercase(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_plain_names() {
        assert_eq!(sanitize("beach.png"), "beach.png");
        assert_eq!(sanitize("IMG_2024-06-01.jpeg"), "IMG_2024-06-01.jpeg");
    }

    #[test]
    fn test_sanitize_replaces_dangerous_chars() {
        assert_eq!(sanitize("my photo.jpg"), "my_photo.jpg");
        assert_eq!(sanitize("weird!name@.png"), "weird_name_.png");
    }

    #[test]
    fn test_sanitize_path_traversal() {
        let sanitized = sanitize("../../etc/passwd");
        assert!(!sanitized.contains(".."));
        assert!(!sanitized.contains('/'));
        assert_eq!(sanitized, "etcpasswd");
    }

    #[test]
    fn test_sanitize_backslash_traversal() {
        let sanitized = sanitize("..\\..\\boot.ini");
        assert!(!sanitized.contains('\\'));
        assert_eq!(sanitized, "boot.ini");
    }

    #[test]
    fn test_sanitize_reserved_names() {
        assert_eq!(sanitize("CON.jpg"), "file_CON.jpg");
        assert_eq!(sanitize("con.jpg"), "file_con.jpg");
        assert_eq!(sanitize("LPT9"), "file_LPT9");
        // Not a reserved name, just a prefix collision
        assert_eq!(sanitize("CONSOLE.jpg"), "CONSOLE.jpg");
    }

    #[test]
    fn test_sanitize_empty_becomes_file() {
        assert_eq!(sanitize(""), "file");
        assert_eq!(sanitize("///"), "file");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        for name in ["beach.png", "my photo.jpg", "../../etc/passwd", "CON.jpg"] {
            let once = sanitize(name);
            assert_eq!(sanitize(&once), once, "not idempotent for {name}");
        }
    }

    #[test]
    fn test_sanitize_length_cap_preserves_extension() {
        let long = format!("{}.jpeg", "a".repeat(300));
        let sanitized = sanitize(&long);
        assert_eq!(sanitized.len(), 255);
        assert!(sanitized.ends_with(".jpeg"));
    }

    #[test]
    fn test_storage_key_extension() {
        let key = storage_key("Beach.PNG");
        assert!(key.ends_with(".png"));
        // UUID portion parses back
        let stem = key.trim_end_matches(".png");
        assert!(Uuid::parse_str(stem).is_ok());
    }

    #[test]
    fn test_storage_keys_unique() {
        assert_ne!(storage_key("a.jpg"), storage_key("a.jpg"));
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("photo.JPG"), ".jpg");
        assert_eq!(extension("archive.tar.gz"), ".gz");
        assert_eq!(extension("noext"), "");
        assert_eq!(extension("trailing."), "");
    }
}
