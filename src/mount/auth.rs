//! C10: the mount-password nonce/OTP state machine. The MNT procedure
//! recognises three reserved path prefixes that are not real
//! directories: `@getnonce`, `@password:<pw>/<path>`, and
//! `@otp:<hex32>/<path>`.

use crate::md5;

pub enum MountRequest<'a> {
    GetNonce,
    Password { password: &'a str, path: &'a str },
    Otp { hex: &'a str, path: &'a str },
    Path(&'a str),
}

/// Splits a raw MNT dirpath argument into its reserved-prefix form, if
/// any, falling back to treating it as a literal path.
pub fn parse_request(raw: &str) -> MountRequest<'_> {
    if raw == "@getnonce" {
        return MountRequest::GetNonce;
    }
    if let Some(rest) = raw.strip_prefix("@password:") {
        if let Some(slash) = rest.find('/') {
            return MountRequest::Password { password: &rest[..slash], path: &rest[slash..] };
        }
    }
    if let Some(rest) = raw.strip_prefix("@otp:") {
        if let Some(slash) = rest.find('/') {
            return MountRequest::Otp { hex: &rest[..slash], path: &rest[slash..] };
        }
    }
    MountRequest::Path(raw)
}

/// Computes the hex-encoded OTP for `nonce` and `password`:
/// `MD5(nonce || password)`.
pub fn expected_otp(nonce: &[u8; 32], password: &str) -> String {
    let mut buf = Vec::with_capacity(32 + password.len());
    buf.extend_from_slice(nonce);
    buf.extend_from_slice(password.as_bytes());
    md5::hex(&md5::digest(&buf))
}

pub fn otp_matches(nonce: &[u8; 32], password: &str, candidate_hex: &str) -> bool {
    expected_otp(nonce, password).eq_ignore_ascii_case(candidate_hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_getnonce() {
        assert!(matches!(parse_request("@getnonce"), MountRequest::GetNonce));
    }

    #[test]
    fn parses_password_prefix() {
        match parse_request("@password:hunter2/srv") {
            MountRequest::Password { password, path } => {
                assert_eq!(password, "hunter2");
                assert_eq!(path, "/srv");
            }
            _ => panic!("expected Password variant"),
        }
    }

    #[test]
    fn parses_otp_prefix_keeps_leading_slash() {
        match parse_request("@otp:deadbeefdeadbeefdeadbeefdeadbeef/srv") {
            MountRequest::Otp { hex, path } => {
                assert_eq!(hex, "deadbeefdeadbeefdeadbeefdeadbeef");
                assert_eq!(path, "/srv");
            }
            _ => panic!("expected Otp variant"),
        }
    }

    #[test]
    fn otp_round_trips_against_expected() {
        let nonce = [7u8; 32];
        let otp = expected_otp(&nonce, "hunter2");
        assert!(otp_matches(&nonce, "hunter2", &otp));
        assert!(!otp_matches(&nonce, "wrong", &otp));
    }

    #[test]
    fn plain_path_falls_through() {
        assert!(matches!(parse_request("/srv/data"), MountRequest::Path("/srv/data")));
    }
}
