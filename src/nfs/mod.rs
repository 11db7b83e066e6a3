//! NFSv3 (RFC 1813) wire types: the XDR structures carried by every
//! NFS procedure, independent of how this server resolves or executes
//! them (see `crate::nfs::proc` for the handlers).

#![allow(non_camel_case_types)]

pub mod proc;

use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};

use crate::xdr::{xdr_enum, xdr_struct, Result, Xdr};

pub const PROGRAM: u32 = 100003;
pub const VERSION: u32 = 3;

pub const NFS3_FHSIZE: usize = 64;
pub const NFS3_COOKIEVERFSIZE: usize = 8;
pub const NFS3_CREATEVERFSIZE: usize = 8;
pub const NFS3_WRITEVERFSIZE: usize = 8;

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum Procedure {
    Null = 0,
    GetAttr = 1,
    SetAttr = 2,
    Lookup = 3,
    Access = 4,
    ReadLink = 5,
    Read = 6,
    Write = 7,
    Create = 8,
    MkDir = 9,
    SymLink = 10,
    MkNod = 11,
    Remove = 12,
    RmDir = 13,
    Rename = 14,
    Link = 15,
    ReadDir = 16,
    ReadDirPlus = 17,
    FsStat = 18,
    FsInfo = 19,
    PathConf = 20,
    Commit = 21,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfsstat3 {
    NFS3_OK = 0,
    NFS3ERR_PERM = 1,
    NFS3ERR_NOENT = 2,
    NFS3ERR_IO = 5,
    NFS3ERR_NXIO = 6,
    NFS3ERR_ACCES = 13,
    NFS3ERR_EXIST = 17,
    NFS3ERR_XDEV = 18,
    NFS3ERR_NODEV = 19,
    NFS3ERR_NOTDIR = 20,
    NFS3ERR_ISDIR = 21,
    NFS3ERR_INVAL = 22,
    NFS3ERR_FBIG = 27,
    NFS3ERR_NOSPC = 28,
    NFS3ERR_ROFS = 30,
    NFS3ERR_MLINK = 31,
    NFS3ERR_NAMETOOLONG = 63,
    NFS3ERR_NOTEMPTY = 66,
    NFS3ERR_DQUOT = 69,
    NFS3ERR_STALE = 70,
    NFS3ERR_REMOTE = 71,
    NFS3ERR_BADHANDLE = 10001,
    NFS3ERR_NOT_SYNC = 10002,
    NFS3ERR_BAD_COOKIE = 10003,
    NFS3ERR_NOTSUPP = 10004,
    NFS3ERR_TOOSMALL = 10005,
    NFS3ERR_SERVERFAULT = 10006,
    NFS3ERR_BADTYPE = 10007,
    NFS3ERR_JUKEBOX = 10008,
}
impl Default for nfsstat3 {
    fn default() -> Self {
        nfsstat3::NFS3_OK
    }
}
xdr_enum!(nfsstat3);

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum ftype3 {
    NF3REG = 1,
    NF3DIR = 2,
    NF3BLK = 3,
    NF3CHR = 4,
    NF3LNK = 5,
    NF3SOCK = 6,
    NF3FIFO = 7,
}
impl Default for ftype3 {
    fn default() -> Self {
        ftype3::NF3REG
    }
}
xdr_enum!(ftype3);

#[derive(Debug, Default, Copy, Clone)]
pub struct specdata3 {
    pub specdata1: u32,
    pub specdata2: u32,
}
xdr_struct!(specdata3 { specdata1: u32, specdata2: u32 });

/// Opaque filehandle as it travels on the wire: a length-prefixed
/// byte string. [`crate::filehandle::FileHandle`] is encoded into
/// this, and decoded back out of it, at the dispatcher boundary.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct nfs_fh3 {
    pub data: Vec<u8>,
}
xdr_struct!(nfs_fh3 { data: Vec<u8> });

#[derive(Debug, Default, Copy, Clone)]
pub struct nfstime3 {
    pub seconds: u32,
    pub nseconds: u32,
}
xdr_struct!(nfstime3 { seconds: u32, nseconds: u32 });

#[derive(Debug, Default, Copy, Clone)]
pub struct fattr3 {
    pub ftype: ftype3,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub used: u64,
    pub rdev: specdata3,
    pub fsid: u64,
    pub fileid: u64,
    pub atime: nfstime3,
    pub mtime: nfstime3,
    pub ctime: nfstime3,
}
xdr_struct!(fattr3 {
    ftype: ftype3,
    mode: u32,
    nlink: u32,
    uid: u32,
    gid: u32,
    size: u64,
    used: u64,
    rdev: specdata3,
    fsid: u64,
    fileid: u64,
    atime: nfstime3,
    mtime: nfstime3,
    ctime: nfstime3,
});

pub type post_op_attr = Option<fattr3>;

#[derive(Debug, Default, Copy, Clone)]
pub struct wcc_attr {
    pub size: u64,
    pub mtime: nfstime3,
    pub ctime: nfstime3,
}
xdr_struct!(wcc_attr { size: u64, mtime: nfstime3, ctime: nfstime3 });

pub type pre_op_attr = Option<wcc_attr>;

#[derive(Debug, Default, Clone)]
pub struct wcc_data {
    pub before: pre_op_attr,
    pub after: post_op_attr,
}
xdr_struct!(wcc_data { before: pre_op_attr, after: post_op_attr });

pub type post_op_fh3 = Option<nfs_fh3>;

/// `set_atime`/`set_mtime` discriminated union (RFC 1813 §2.6).
#[derive(Debug, Copy, Clone)]
pub enum SetTime {
    DontChange,
    SetToServerTime,
    SetToClientTime(nfstime3),
}
impl Default for SetTime {
    fn default() -> Self {
        SetTime::DontChange
    }
}
impl Xdr for SetTime {
    fn serialize(&self, dst: &mut impl Write) -> Result<()> {
        match self {
            SetTime::DontChange => 0u32.serialize(dst),
            SetTime::SetToServerTime => 1u32.serialize(dst),
            SetTime::SetToClientTime(t) => {
                2u32.serialize(dst)?;
                t.serialize(dst)
            }
        }
    }
    fn deserialize(&mut self, src: &mut impl Read) -> Result<()> {
        let mut disc = 0u32;
        disc.deserialize(src)?;
        *self = match disc {
            0 => SetTime::DontChange,
            1 => SetTime::SetToServerTime,
            2 => {
                let mut t = nfstime3::default();
                t.deserialize(src)?;
                SetTime::SetToClientTime(t)
            }
            _ => return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "bad set_atime/mtime")),
        };
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct sattr3 {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: SetTime,
    pub mtime: SetTime,
}
xdr_struct!(sattr3 {
    mode: Option<u32>,
    uid: Option<u32>,
    gid: Option<u32>,
    size: Option<u64>,
    atime: SetTime,
    mtime: SetTime,
});

#[derive(Debug, Default, Clone)]
pub struct diropargs3 {
    pub dir: nfs_fh3,
    pub name: String,
}
xdr_struct!(diropargs3 { dir: nfs_fh3, name: String });

#[derive(Debug, Default, Clone)]
pub struct symlinkdata3 {
    pub symlink_attributes: sattr3,
    pub symlink_data: String,
}
xdr_struct!(symlinkdata3 { symlink_attributes: sattr3, symlink_data: String });

#[derive(Debug, Default, Clone)]
pub struct devicedata3 {
    pub dev_attributes: sattr3,
    pub spec: specdata3,
}
xdr_struct!(devicedata3 { dev_attributes: sattr3, spec: specdata3 });

/// `createhow3` discriminated union (RFC 1813 §3.3.8).
#[derive(Debug, Clone)]
pub enum CreateHow3 {
    Unchecked(sattr3),
    Guarded(sattr3),
    Exclusive([u8; NFS3_CREATEVERFSIZE]),
}
impl Default for CreateHow3 {
    fn default() -> Self {
        CreateHow3::Unchecked(sattr3::default())
    }
}
impl Xdr for CreateHow3 {
    fn serialize(&self, dst: &mut impl Write) -> Result<()> {
        match self {
            CreateHow3::Unchecked(a) => {
                0u32.serialize(dst)?;
                a.serialize(dst)
            }
            CreateHow3::Guarded(a) => {
                1u32.serialize(dst)?;
                a.serialize(dst)
            }
            CreateHow3::Exclusive(v) => {
                2u32.serialize(dst)?;
                v.serialize(dst)
            }
        }
    }
    fn deserialize(&mut self, src: &mut impl Read) -> Result<()> {
        let mut disc = 0u32;
        disc.deserialize(src)?;
        *self = match disc {
            0 => {
                let mut a = sattr3::default();
                a.deserialize(src)?;
                CreateHow3::Unchecked(a)
            }
            1 => {
                let mut a = sattr3::default();
                a.deserialize(src)?;
                CreateHow3::Guarded(a)
            }
            2 => {
                let mut v = [0u8; NFS3_CREATEVERFSIZE];
                v.deserialize(src)?;
                CreateHow3::Exclusive(v)
            }
            _ => return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "bad createhow3")),
        };
        Ok(())
    }
}

/// `mknoddata3` discriminated union (RFC 1813 §3.3.11).
#[derive(Debug, Clone)]
pub enum MkNodData3 {
    Block(devicedata3),
    Char(devicedata3),
    Socket(sattr3),
    Fifo(sattr3),
}
impl Xdr for MkNodData3 {
    fn serialize(&self, dst: &mut impl Write) -> Result<()> {
        match self {
            MkNodData3::Block(d) => {
                (ftype3::NF3BLK as u32).serialize(dst)?;
                d.serialize(dst)
            }
            MkNodData3::Char(d) => {
                (ftype3::NF3CHR as u32).serialize(dst)?;
                d.serialize(dst)
            }
            MkNodData3::Socket(a) => {
                (ftype3::NF3SOCK as u32).serialize(dst)?;
                a.serialize(dst)
            }
            MkNodData3::Fifo(a) => {
                (ftype3::NF3FIFO as u32).serialize(dst)?;
                a.serialize(dst)
            }
        }
    }
    fn deserialize(&mut self, src: &mut impl Read) -> Result<()> {
        let mut disc = 0u32;
        disc.deserialize(src)?;
        *self = match disc {
            x if x == ftype3::NF3BLK as u32 => {
                let mut d = devicedata3::default();
                d.deserialize(src)?;
                MkNodData3::Block(d)
            }
            x if x == ftype3::NF3CHR as u32 => {
                let mut d = devicedata3::default();
                d.deserialize(src)?;
                MkNodData3::Char(d)
            }
            x if x == ftype3::NF3SOCK as u32 => {
                let mut a = sattr3::default();
                a.deserialize(src)?;
                MkNodData3::Socket(a)
            }
            x if x == ftype3::NF3FIFO as u32 => {
                let mut a = sattr3::default();
                a.deserialize(src)?;
                MkNodData3::Fifo(a)
            }
            _ => return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "bad mknoddata3")),
        };
        Ok(())
    }
}

pub const ACCESS3_READ: u32 = 0x0001;
pub const ACCESS3_LOOKUP: u32 = 0x0002;
pub const ACCESS3_MODIFY: u32 = 0x0004;
pub const ACCESS3_EXTEND: u32 = 0x0008;
pub const ACCESS3_DELETE: u32 = 0x0010;
pub const ACCESS3_EXECUTE: u32 = 0x0020;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum stable_how {
    UNSTABLE = 0,
    DATA_SYNC = 1,
    FILE_SYNC = 2,
}
impl Default for stable_how {
    fn default() -> Self {
        stable_how::UNSTABLE
    }
}
impl Xdr for stable_how {
    fn serialize(&self, dst: &mut impl Write) -> Result<()> {
        (*self as u32).serialize(dst)
    }
    fn deserialize(&mut self, src: &mut impl Read) -> Result<()> {
        let mut disc = 0u32;
        disc.deserialize(src)?;
        *self = match disc {
            0 => stable_how::UNSTABLE,
            1 => stable_how::DATA_SYNC,
            2 => stable_how::FILE_SYNC,
            _ => return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "bad stable_how")),
        };
        Ok(())
    }
}

pub const FSF3_LINK: u32 = 0x0001;
pub const FSF3_SYMLINK: u32 = 0x0002;
pub const FSF3_HOMOGENEOUS: u32 = 0x0008;
pub const FSF3_CANSETTIME: u32 = 0x0010;
