use std::path::{Component, Path};

use crate::TransferError;

/// Longest file name accepted, in bytes.
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Validates a bare file name as supplied by an uploading client.
///
/// Rejects empty names, names longer than [`MAX_FILE_NAME_LEN`] bytes,
/// `.`/`..`, path separators of either platform and control characters.
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidName("empty name".into()));
    }
    if name.len() > MAX_FILE_NAME_LEN {
        return Err(TransferError::InvalidName(format!(
            "name longer than {MAX_FILE_NAME_LEN} bytes"
        )));
    }
    if name == "." || name == ".." {
        return Err(TransferError::InvalidName(format!("reserved name: {name}")));
    }
    if name.contains(['/', '\\']) {
        return Err(TransferError::InvalidName(format!(
            "path separators not allowed: {name}"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(TransferError::InvalidName(
            "control characters not allowed".into(),
        ));
    }
    Ok(())
}

/// Validates that a storage key is a relative path that stays inside the
/// blob root when joined to it.
pub fn validate_storage_key(key: &str) -> Result<(), TransferError> {
    if key.is_empty() {
        return Err(TransferError::InvalidPath("empty key".into()));
    }

    let path = Path::new(key);

    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {key}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {key}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {key}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        assert!(validate_file_name("report.pdf").is_ok());
        assert!(validate_file_name("my holiday video (1).mkv").is_ok());
        assert!(validate_file_name("..hidden").is_ok());
        assert!(validate_file_name("ü.txt").is_ok());
    }

    #[test]
    fn rejects_empty_and_reserved_names() {
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name(".").is_err());
        assert!(validate_file_name("..").is_err());
    }

    #[test]
    fn rejects_separators() {
        assert!(validate_file_name("a/b.txt").is_err());
        assert!(validate_file_name("..\\evil").is_err());
        assert!(validate_file_name("/etc/passwd").is_err());
    }

    #[test]
    fn rejects_control_characters() {
        assert!(validate_file_name("bad\nname").is_err());
        assert!(validate_file_name("nul\0").is_err());
    }

    #[test]
    fn name_length_limit_in_bytes() {
        assert!(validate_file_name(&"a".repeat(MAX_FILE_NAME_LEN)).is_ok());
        assert!(validate_file_name(&"a".repeat(MAX_FILE_NAME_LEN + 1)).is_err());
        // 128 two-byte chars = 256 bytes.
        assert!(validate_file_name(&"é".repeat(128)).is_err());
    }

    #[test]
    fn storage_key_accepts_owner_prefix() {
        assert!(validate_storage_key("alice/3f2a-report.pdf").is_ok());
    }

    #[test]
    fn storage_key_rejects_traversal() {
        assert!(validate_storage_key("").is_err());
        assert!(validate_storage_key("../escape").is_err());
        assert!(validate_storage_key("alice/../../escape").is_err());
        assert!(validate_storage_key("/tmp/abs").is_err());
    }
}
