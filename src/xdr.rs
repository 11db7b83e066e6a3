//! XDR (RFC 1014) serialization primitives, grounded on the same
//! trait-plus-macro shape used across the `nfsserve` lineage of
//! servers this implementation draws its wire layer from.

use std::io::{Read, Write};

pub type Result<T> = std::io::Result<T>;

pub trait Xdr {
    fn serialize(&self, dst: &mut impl Write) -> Result<()>;
    fn deserialize(&mut self, src: &mut impl Read) -> Result<()>;
}

fn pad_len(n: usize) -> usize {
    (4 - n % 4) % 4
}

impl Xdr for bool {
    fn serialize(&self, dst: &mut impl Write) -> Result<()> {
        (*self as u32).serialize(dst)
    }
    fn deserialize(&mut self, src: &mut impl Read) -> Result<()> {
        let mut v: u32 = 0;
        v.deserialize(src)?;
        *self = v != 0;
        Ok(())
    }
}

impl Xdr for u8 {
    fn serialize(&self, dst: &mut impl Write) -> Result<()> {
        dst.write_all(&[*self])
    }
    fn deserialize(&mut self, src: &mut impl Read) -> Result<()> {
        let mut buf = [0u8; 1];
        src.read_exact(&mut buf)?;
        *self = buf[0];
        Ok(())
    }
}

macro_rules! xdr_int {
    ($ty:ty) => {
        impl Xdr for $ty {
            fn serialize(&self, dst: &mut impl Write) -> Result<()> {
                dst.write_all(&self.to_be_bytes())
            }
            fn deserialize(&mut self, src: &mut impl Read) -> Result<()> {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                src.read_exact(&mut buf)?;
                *self = <$ty>::from_be_bytes(buf);
                Ok(())
            }
        }
    };
}

xdr_int!(u32);
xdr_int!(i32);
xdr_int!(u64);
xdr_int!(i64);

impl<const N: usize> Xdr for [u8; N] {
    fn serialize(&self, dst: &mut impl Write) -> Result<()> {
        dst.write_all(self)?;
        dst.write_all(&[0u8; 4][..pad_len(N)])
    }
    fn deserialize(&mut self, src: &mut impl Read) -> Result<()> {
        src.read_exact(self)?;
        let mut pad = [0u8; 4];
        src.read_exact(&mut pad[..pad_len(N)])
    }
}

impl Xdr for Vec<u8> {
    fn serialize(&self, dst: &mut impl Write) -> Result<()> {
        (self.len() as u32).serialize(dst)?;
        dst.write_all(self)?;
        dst.write_all(&[0u8; 4][..pad_len(self.len())])
    }
    fn deserialize(&mut self, src: &mut impl Read) -> Result<()> {
        let mut len: u32 = 0;
        len.deserialize(src)?;
        let mut buf = vec![0u8; len as usize];
        src.read_exact(&mut buf)?;
        let mut pad = [0u8; 4];
        src.read_exact(&mut pad[..pad_len(len as usize)])?;
        *self = buf;
        Ok(())
    }
}

impl Xdr for String {
    fn serialize(&self, dst: &mut impl Write) -> Result<()> {
        self.as_bytes().to_vec().serialize(dst)
    }
    fn deserialize(&mut self, src: &mut impl Read) -> Result<()> {
        let mut buf = Vec::new();
        buf.deserialize(src)?;
        *self = String::from_utf8(buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(())
    }
}

impl<T: Xdr + Default> Xdr for Option<T> {
    fn serialize(&self, dst: &mut impl Write) -> Result<()> {
        match self {
            Some(v) => {
                true.serialize(dst)?;
                v.serialize(dst)
            }
            None => false.serialize(dst),
        }
    }
    fn deserialize(&mut self, src: &mut impl Read) -> Result<()> {
        let mut has = false;
        has.deserialize(src)?;
        if has {
            let mut v = T::default();
            v.deserialize(src)?;
            *self = Some(v);
        } else {
            *self = None;
        }
        Ok(())
    }
}

/// Declares a plain field-by-field XDR struct.
macro_rules! xdr_struct {
    ($name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        impl $crate::xdr::Xdr for $name {
            fn serialize(&self, dst: &mut impl std::io::Write) -> $crate::xdr::Result<()> {
                $(self.$field.serialize(dst)?;)*
                Ok(())
            }
            fn deserialize(&mut self, src: &mut impl std::io::Read) -> $crate::xdr::Result<()> {
                $(self.$field.deserialize(src)?;)*
                Ok(())
            }
        }
    };
}

/// Declares XDR (de)serialization for a C-like enum via `num_traits`.
macro_rules! xdr_enum {
    ($name:ident) => {
        impl $crate::xdr::Xdr for $name {
            fn serialize(&self, dst: &mut impl std::io::Write) -> $crate::xdr::Result<()> {
                num_traits::ToPrimitive::to_u32(self)
                    .expect("enum discriminant fits in u32")
                    .serialize(dst)
            }
            fn deserialize(&mut self, src: &mut impl std::io::Read) -> $crate::xdr::Result<()> {
                let mut disc: u32 = 0;
                disc.deserialize(src)?;
                *self = num_traits::FromPrimitive::from_u32(disc).ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "bad enum discriminant")
                })?;
                Ok(())
            }
        }
    };
}

pub(crate) use xdr_enum;
pub(crate) use xdr_struct;
