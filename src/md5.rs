//! MD5, used only by the mount authenticator's OTP check. Delegates
//! to the `md-5` crate rather than vendoring the algorithm by hand.

use md5::{Digest, Md5};

/// Computes the 16-byte MD5 digest of `data`.
pub fn digest(data: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Lower-case hex encoding, as used for OTP comparison.
pub fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string() {
        assert_eq!(hex(&digest(b"")), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn known_vector() {
        assert_eq!(
            hex(&digest(b"abc")),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }
}
