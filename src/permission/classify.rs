//! Cross-platform permission-error classification (spec §4.D, §6).

use std::io;

/// Classify any error as a permission-denied condition, the way spec §4.D's
/// `IsPermissionError` is specified: match OS errno/error-code first, fall
/// back to case-insensitive substring matching.
pub fn is_permission_error(err: &io::Error) -> bool {
    if let Some(code) = err.raw_os_error() {
        #[cfg(unix)]
        {
            if code == libc::EACCES || code == libc::EPERM {
                return true;
            }
        }
        #[cfg(windows)]
        {
            const ERROR_ACCESS_DENIED: i32 = 5;
            if code == ERROR_ACCESS_DENIED {
                return true;
            }
        }
    }
    if err.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }
    let text = err.to_string().to_lowercase();
    const NEEDLES: [&str; 3] = [
        "permission denied",
        "access denied",
        "operation not permitted",
    ];
    NEEDLES.iter().any(|needle| text.contains(needle))
}

/// Construct a platform-appropriate permission error for `operation` on
/// `path` (spec §4.D's `GetPermissionError`).
pub fn permission_error(operation: &str, path: &str) -> io::Error {
    #[cfg(unix)]
    {
        io::Error::from_raw_os_error(libc::EACCES).into_with_context(operation, path)
    }
    #[cfg(windows)]
    {
        let raw = io::Error::from_raw_os_error(5);
        raw.into_with_context(operation, path)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (operation, path);
        io::Error::new(io::ErrorKind::PermissionDenied, "permission denied")
    }
}

trait WithContext {
    fn into_with_context(self, operation: &str, path: &str) -> io::Error;
}

impl WithContext for io::Error {
    fn into_with_context(self, operation: &str, path: &str) -> io::Error {
        io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("permission denied: {operation} on {path}: {self}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_fallback_matches() {
        let err = io::Error::new(io::ErrorKind::Other, "Access Denied while opening file");
        assert!(is_permission_error(&err));
    }

    #[test]
    fn unrelated_error_is_not_permission_error() {
        let err = io::Error::new(io::ErrorKind::NotFound, "no such file or directory");
        assert!(!is_permission_error(&err));
    }

    #[test]
    fn constructed_error_round_trips_through_classifier() {
        let err = permission_error("write", "/tmp/x");
        assert!(is_permission_error(&err));
    }
}
