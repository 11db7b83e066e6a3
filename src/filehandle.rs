//! C2: opaque, stateless filehandle encoding (RFC 1813 §2, wire format
//! per the base specification §6).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::error::{NfsError, Result};

/// Maximum number of path-component hashes an FH can carry.
pub const FH_MAXLEN: usize = 43;

/// Fixed header size before the variable `inos` tail:
/// dev(4) + ino(8) + gen(4) + pwhash(4) + len(1).
const FH_HEADER_LEN: usize = 21;

/// Decoded, stateless filehandle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub dev: u32,
    pub ino: u64,
    pub gen: u32,
    pub pwhash: u32,
    pub len: u8,
    pub inos: [u8; FH_MAXLEN],
}

impl FileHandle {
    /// The handle designating the mount root of an export.
    pub fn root(dev: u32, ino: u64, gen: u32, pwhash: u32) -> Self {
        FileHandle {
            dev,
            ino,
            gen,
            pwhash,
            len: 0,
            inos: [0; FH_MAXLEN],
        }
    }

    /// The invalid filehandle, `(dev,ino) == (0,0)`, used only for
    /// error returns that must carry *some* FH shape.
    pub fn invalid() -> Self {
        FileHandle {
            dev: 0,
            ino: 0,
            gen: 0,
            pwhash: 0,
            len: 0,
            inos: [0; FH_MAXLEN],
        }
    }

    pub fn is_root(&self) -> bool {
        self.len == 0
    }

    /// Total encoded byte length: `21 + len`.
    pub fn wire_len(&self) -> usize {
        FH_HEADER_LEN + self.len as usize
    }

    /// Extends the handle to designate a new object `(dev, ino, gen)`
    /// reached one level below the current one: appends the hash of
    /// `ino` to the trail and moves `dev`/`ino`/`gen` to the new
    /// object's identity. Fails with `NameTooLong` once `len == FH_MAXLEN`.
    pub fn extend(&self, dev: u32, ino: u64, gen: u32) -> Result<Self> {
        if self.len as usize == FH_MAXLEN {
            return Err(NfsError::NameTooLong);
        }
        let mut next = *self;
        next.inos[self.len as usize] = fh_hash(ino);
        next.len += 1;
        next.dev = dev;
        next.ino = ino;
        next.gen = gen;
        Ok(next)
    }

    /// Encodes into the little-endian packed wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        buf.write_u32::<LittleEndian>(self.dev).unwrap();
        buf.write_u64::<LittleEndian>(self.ino).unwrap();
        buf.write_u32::<LittleEndian>(self.gen).unwrap();
        buf.write_u32::<LittleEndian>(self.pwhash).unwrap();
        buf.write_u8(self.len).unwrap();
        buf.extend_from_slice(&self.inos[..self.len as usize]);
        buf
    }

    /// Decodes a wire-format filehandle, validating it against the
    /// server's current password hash. Fails with `Stale` on any
    /// structural or password-hash mismatch, exactly per §8's
    /// testable property.
    pub fn decode(bytes: &[u8], current_pwhash: u32) -> Result<Self> {
        if bytes.len() < FH_HEADER_LEN {
            return Err(NfsError::Stale);
        }
        let mut cur = Cursor::new(bytes);
        let dev = cur.read_u32::<LittleEndian>().map_err(|_| NfsError::Stale)?;
        let ino = cur.read_u64::<LittleEndian>().map_err(|_| NfsError::Stale)?;
        let gen = cur.read_u32::<LittleEndian>().map_err(|_| NfsError::Stale)?;
        let pwhash = cur.read_u32::<LittleEndian>().map_err(|_| NfsError::Stale)?;
        let len = cur.read_u8().map_err(|_| NfsError::Stale)?;

        if len as usize > FH_MAXLEN {
            return Err(NfsError::Stale);
        }
        if bytes.len() != FH_HEADER_LEN + len as usize {
            return Err(NfsError::Stale);
        }
        if pwhash != current_pwhash {
            return Err(NfsError::Stale);
        }

        let mut inos = [0u8; FH_MAXLEN];
        inos[..len as usize].copy_from_slice(&bytes[FH_HEADER_LEN..]);

        Ok(FileHandle {
            dev,
            ino,
            gen,
            pwhash,
            len,
            inos,
        })
    }
}

/// `FH_HASH`: folds a 64-bit inode number down to 8 bits by XORing
/// every byte together.
pub fn fh_hash(ino: u64) -> u8 {
    let mut acc = 0u8;
    let mut v = ino;
    for _ in 0..8 {
        acc ^= (v & 0xff) as u8;
        v >>= 8;
    }
    acc
}

/// FNV-1a (32-bit) hash used for the export password hash carried in
/// every FH.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut fh = FileHandle::root(7, 42, 3, 0);
        fh = fh.extend(7, 100, 0).unwrap();
        fh = fh.extend(7, 200, 1).unwrap();
        let bytes = fh.encode();
        assert_eq!(bytes.len(), fh.wire_len());
        let decoded = FileHandle::decode(&bytes, 0).unwrap();
        assert_eq!(decoded, fh);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn extend_moves_dev_ino_gen_to_the_new_object() {
        let fh = FileHandle::root(7, 42, 3, 0);
        let child = fh.extend(7, 100, 5).unwrap();
        assert_eq!(child.dev, 7);
        assert_eq!(child.ino, 100);
        assert_eq!(child.gen, 5);
        assert_eq!(child.len, 1);
        assert_eq!(child.inos[0], fh_hash(100));
    }

    #[test]
    fn decode_rejects_short_buffer() {
        assert_eq!(FileHandle::decode(&[0u8; 10], 0), Err(NfsError::Stale));
    }

    #[test]
    fn decode_rejects_pwhash_mismatch() {
        let fh = FileHandle::root(1, 1, 0, 0xdead_beef);
        let bytes = fh.encode();
        assert_eq!(FileHandle::decode(&bytes, 0), Err(NfsError::Stale));
    }

    #[test]
    fn extend_fails_past_max_len() {
        let mut fh = FileHandle::root(1, 1, 0, 0);
        for i in 0..FH_MAXLEN as u64 {
            fh = fh.extend(1, i, 0).unwrap();
        }
        assert_eq!(fh.extend(1, 999, 0), Err(NfsError::NameTooLong));
    }

    #[test]
    fn fnv1a_matches_known_empty_basis() {
        assert_eq!(fnv1a(b""), 0x811c_9dc5);
    }
}
