//! Secret wrapper for sensitive values

use std::fmt;
use std::path::Path;

use zeroize::Zeroize;

/// Sensitive value (API keys, bearer tokens) - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Resolve a secret from the environment first, then an optional file.
    ///
    /// Secrets never live in config values directly: an env var wins, a
    /// `*_file` path is the fallback. File contents are trimmed, and a
    /// whitespace-only file counts as absent.
    pub fn resolve(env_var: &str, file: Option<&Path>) -> crate::Result<Option<Self>> {
        if let Ok(value) = std::env::var(env_var) {
            return Ok(Some(Self::new(value)));
        }
        if let Some(path) = file {
            let value = std::fs::read_to_string(path).map_err(|e| {
                crate::Error::Config(format!("failed to read {}: {e}", path.display()))
            })?;
            let value = value.trim().to_owned();
            if !value.is_empty() {
                return Ok(Some(Self::new(value)));
            }
        }
        Ok(None)
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
