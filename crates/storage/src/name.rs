use crate::error::{ErrorKind, Result};

/// Validates a cache name.
///
/// Names are opaque to the stores, but they end up in log lines and (for
/// [`LocalStore`](crate::backend::LocalStore)) inside a `NAME` file on disk,
/// so empty names and control characters are rejected.
///
/// # Examples
///
/// ```
/// use stowaway_storage::validate_name;
/// assert!(validate_name("stowaway:db:control").is_ok());
/// assert!(validate_name("stowaway:4f2a:assets:app:cache").is_ok());
/// assert!(validate_name("").is_err());
/// assert!(validate_name("a\0b").is_err());
/// assert!(validate_name("line\nbreak").is_err());
/// ```
pub fn validate(name: &str) -> Result<&str> {
    if name.is_empty() || name.chars().any(char::is_control) {
        exn::bail!(ErrorKind::InvalidName(name.to_string()));
    }
    Ok(name)
}
