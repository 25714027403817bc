//! Redaction wrapper for setting values
//!
//! Configuration values routinely hold connection strings and secrets.
//! Anything logged through `Sensitive<T>` prints as a fixed marker.

use std::fmt;

const REDACTED: &str = "***REDACTED***";

/// Wrapper that redacts its content in `Debug` and `Display`
///
/// ```
/// use appconf_core_types::Sensitive;
///
/// let value = Sensitive::new("Server=db;Password=hunter2");
/// assert_eq!(format!("{value}"), "***REDACTED***");
/// assert_eq!(value.expose(), &"Server=db;Password=hunter2");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Sensitive<T>(T);

impl<T> Sensitive<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrow the wrapped value
    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> From<T> for Sensitive<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

impl<T> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_and_display_redact() {
        let secret = Sensitive::new(Some("pa55".to_string()));
        assert_eq!(format!("{:?}", secret), REDACTED);
        assert_eq!(format!("{}", secret), REDACTED);
    }

    #[test]
    fn test_expose_and_into_inner() {
        let secret: Sensitive<&str> = "token".into();
        assert_eq!(*secret.expose(), "token");
        assert_eq!(secret.into_inner(), "token");
    }
}
