//! Wipeable storage for credential fields
//!
//! Passphrases, PINs and key identifiers live in `Secret` containers so that
//! "forget network" and logout can overwrite the backing memory with zero
//! bytes before releasing it, instead of relying on drop order alone.

use std::fmt;

use zeroize::Zeroize;

/// A credential field with guaranteed erasure.
///
/// The backing allocation is kept after a wipe (fully zeroed) so the content
/// is destroyed in place rather than handed back to the allocator still
/// readable.
#[derive(Default)]
pub struct Secret {
    buf: Box<[u8]>,
    len: usize,
}

impl Secret {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored value. The previous content is zeroed first.
    pub fn set(&mut self, value: &str) {
        self.buf.zeroize();
        self.buf = value.as_bytes().to_vec().into_boxed_slice();
        self.len = self.buf.len();
    }

    /// Overwrite the backing memory with zero bytes, then mark the field
    /// empty. Wiping an already-wiped field is a no-op.
    pub fn wipe(&mut self) {
        self.buf.zeroize();
        self.len = 0;
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store `value`, reporting whether the visible content changed.
    pub(crate) fn assign(&mut self, value: &str) -> bool {
        if self.as_str() == value {
            return false;
        }
        self.set(value);
        true
    }

    #[cfg(test)]
    pub(crate) fn backing(&self) -> &[u8] {
        &self.buf
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.buf.zeroize();
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("[empty]")
        } else {
            f.write_str("[REDACTED]")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_read() {
        let mut secret = Secret::new();
        assert!(secret.is_empty());
        secret.set("hunter2");
        assert_eq!(secret.as_str(), "hunter2");
        assert!(!secret.is_empty());
    }

    #[test]
    fn test_wipe_zeroes_backing_storage() {
        let mut secret = Secret::new();
        secret.set("correct horse battery staple");
        let prior_len = secret.backing().len();

        secret.wipe();

        assert!(secret.is_empty());
        assert_eq!(secret.as_str(), "");
        // The allocation is still the same size but holds only zero bytes;
        // the prior content is unrecoverable.
        assert_eq!(secret.backing().len(), prior_len);
        assert!(secret.backing().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_wipe_is_idempotent() {
        let mut secret = Secret::new();
        secret.set("pin1234");
        secret.wipe();
        secret.wipe();
        assert!(secret.is_empty());
        assert!(secret.backing().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_assign_reports_change() {
        let mut secret = Secret::new();
        assert!(secret.assign("a"));
        assert!(!secret.assign("a"));
        assert!(secret.assign("b"));
    }

    #[test]
    fn test_debug_never_prints_content() {
        let mut secret = Secret::new();
        secret.set("s3cret");
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
    }
}
