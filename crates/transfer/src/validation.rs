use crate::TransferError;

/// Validates that a remote file name is a single, safe path segment.
///
/// Rejects:
/// - Empty names
/// - `.` and `..`
/// - Path separators (`/` or `\`)
/// - Control characters
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidName("empty name".into()));
    }

    if name == "." || name == ".." {
        return Err(TransferError::InvalidName(format!(
            "relative directory not allowed: {name}"
        )));
    }

    if name.contains(['/', '\\']) {
        return Err(TransferError::InvalidName(format!(
            "path separator not allowed: {name}"
        )));
    }

    if name.chars().any(char::is_control) {
        return Err(TransferError::InvalidName(format!(
            "control character not allowed: {name:?}"
        )));
    }

    Ok(())
}
