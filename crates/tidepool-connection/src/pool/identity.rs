//! Connection identity tags
//!
//! A tag fingerprints the target address and credentials a physical
//! connection was opened with. Connections whose tag no longer matches the
//! pool (because it was reconfigured, or because they were checked out with
//! other credentials) are closed on return instead of being pooled.

use std::fmt;

use ring::digest::{Context, SHA256};

/// Fingerprint of (url, username, password)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionTag([u8; 16]);

impl ConnectionTag {
    /// Compute the tag for a target address and credentials
    pub fn new(url: &str, username: Option<&str>, password: Option<&str>) -> Self {
        let mut context = Context::new(&SHA256);
        for field in [Some(url), username, password] {
            // Length-prefix each field so ("ab", "c") and ("a", "bc") differ.
            match field {
                Some(value) => {
                    context.update(&[1]);
                    context.update(&(value.len() as u64).to_le_bytes());
                    context.update(value.as_bytes());
                }
                None => context.update(&[0]),
            }
        }
        let digest = context.finish();
        let mut tag = [0u8; 16];
        tag.copy_from_slice(&digest.as_ref()[..16]);
        Self(tag)
    }
}

impl fmt::Debug for ConnectionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionTag({})", self)
    }
}

impl fmt::Display for ConnectionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}
