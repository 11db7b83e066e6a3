//! Per-procedure argument and result wire types (RFC 1813 §3.3).
//! Execution logic lives in [`crate::dispatcher`]; this module only
//! carries the XDR shapes each procedure reads and writes.

use crate::xdr::{xdr_struct, Xdr};

use super::{
    fattr3, nfs_fh3, nfsstat3, post_op_attr, post_op_fh3, sattr3, wcc_data, CreateHow3, MkNodData3,
};

#[derive(Debug, Default, Clone)]
pub struct GetAttr3Args {
    pub object: nfs_fh3,
}
xdr_struct!(GetAttr3Args { object: nfs_fh3 });

#[derive(Debug, Default, Clone)]
pub struct GetAttr3ResOk {
    pub obj_attributes: fattr3,
}
xdr_struct!(GetAttr3ResOk { obj_attributes: fattr3 });

#[derive(Debug, Default, Clone)]
pub struct SetAttr3Args {
    pub object: nfs_fh3,
    pub new_attributes: sattr3,
    pub guard_ctime: Option<super::nfstime3>,
}
xdr_struct!(SetAttr3Args {
    object: nfs_fh3,
    new_attributes: sattr3,
    guard_ctime: Option<super::nfstime3>,
});

#[derive(Debug, Default, Clone)]
pub struct SetAttr3ResOk {
    pub obj_wcc: wcc_data,
}
xdr_struct!(SetAttr3ResOk { obj_wcc: wcc_data });

#[derive(Debug, Default, Clone)]
pub struct SetAttr3ResFail {
    pub obj_wcc: wcc_data,
}
xdr_struct!(SetAttr3ResFail { obj_wcc: wcc_data });

#[derive(Debug, Default, Clone)]
pub struct Lookup3Args {
    pub what: super::diropargs3,
}
xdr_struct!(Lookup3Args { what: super::diropargs3 });

#[derive(Debug, Default, Clone)]
pub struct Lookup3ResOk {
    pub object: nfs_fh3,
    pub obj_attributes: post_op_attr,
    pub dir_attributes: post_op_attr,
}
xdr_struct!(Lookup3ResOk {
    object: nfs_fh3,
    obj_attributes: post_op_attr,
    dir_attributes: post_op_attr,
});

#[derive(Debug, Default, Clone)]
pub struct Lookup3ResFail {
    pub dir_attributes: post_op_attr,
}
xdr_struct!(Lookup3ResFail { dir_attributes: post_op_attr });

#[derive(Debug, Default, Clone)]
pub struct Access3Args {
    pub object: nfs_fh3,
    pub access: u32,
}
xdr_struct!(Access3Args { object: nfs_fh3, access: u32 });

#[derive(Debug, Default, Clone)]
pub struct Access3ResOk {
    pub obj_attributes: post_op_attr,
    pub access: u32,
}
xdr_struct!(Access3ResOk { obj_attributes: post_op_attr, access: u32 });

#[derive(Debug, Default, Clone)]
pub struct ReadLink3Args {
    pub symlink: nfs_fh3,
}
xdr_struct!(ReadLink3Args { symlink: nfs_fh3 });

#[derive(Debug, Default, Clone)]
pub struct ReadLink3ResOk {
    pub symlink_attributes: post_op_attr,
    pub data: String,
}
xdr_struct!(ReadLink3ResOk { symlink_attributes: post_op_attr, data: String });

#[derive(Debug, Default, Clone)]
pub struct Read3Args {
    pub file: nfs_fh3,
    pub offset: u64,
    pub count: u32,
}
xdr_struct!(Read3Args { file: nfs_fh3, offset: u64, count: u32 });

#[derive(Debug, Default, Clone)]
pub struct Read3ResOk {
    pub file_attributes: post_op_attr,
    pub count: u32,
    pub eof: bool,
    pub data: Vec<u8>,
}
xdr_struct!(Read3ResOk {
    file_attributes: post_op_attr,
    count: u32,
    eof: bool,
    data: Vec<u8>,
});

#[derive(Debug, Default, Clone)]
pub struct Write3Args {
    pub file: nfs_fh3,
    pub offset: u64,
    pub count: u32,
    pub stable: super::stable_how,
    pub data: Vec<u8>,
}
xdr_struct!(Write3Args {
    file: nfs_fh3,
    offset: u64,
    count: u32,
    stable: super::stable_how,
    data: Vec<u8>,
});

#[derive(Debug, Default, Clone)]
pub struct Write3ResOk {
    pub file_wcc: wcc_data,
    pub count: u32,
    pub committed: super::stable_how,
    pub verf: [u8; super::NFS3_WRITEVERFSIZE],
}
xdr_struct!(Write3ResOk {
    file_wcc: wcc_data,
    count: u32,
    committed: super::stable_how,
    verf: [u8; super::NFS3_WRITEVERFSIZE],
});

#[derive(Debug, Default, Clone)]
pub struct Create3Args {
    pub where_: super::diropargs3,
    pub how: CreateHow3,
}
xdr_struct!(Create3Args { where_: super::diropargs3, how: CreateHow3 });

#[derive(Debug, Default, Clone)]
pub struct MkDir3Args {
    pub where_: super::diropargs3,
    pub attributes: sattr3,
}
xdr_struct!(MkDir3Args { where_: super::diropargs3, attributes: sattr3 });

#[derive(Debug, Default, Clone)]
pub struct SymLink3Args {
    pub where_: super::diropargs3,
    pub symlink: super::symlinkdata3,
}
xdr_struct!(SymLink3Args { where_: super::diropargs3, symlink: super::symlinkdata3 });

#[derive(Debug, Default, Clone)]
pub struct MkNod3Args {
    pub where_: super::diropargs3,
    pub what: MkNodData3,
}
impl Default for MkNodData3 {
    fn default() -> Self {
        MkNodData3::Fifo(sattr3::default())
    }
}
xdr_struct!(MkNod3Args { where_: super::diropargs3, what: MkNodData3 });

/// Shared OK shape for CREATE/MKDIR/SYMLINK/MKNOD.
#[derive(Debug, Default, Clone)]
pub struct DirOpRes3Ok {
    pub obj: post_op_fh3,
    pub obj_attributes: post_op_attr,
    pub dir_wcc: wcc_data,
}
xdr_struct!(DirOpRes3Ok {
    obj: post_op_fh3,
    obj_attributes: post_op_attr,
    dir_wcc: wcc_data,
});

#[derive(Debug, Default, Clone)]
pub struct DirOpRes3Fail {
    pub dir_wcc: wcc_data,
}
xdr_struct!(DirOpRes3Fail { dir_wcc: wcc_data });

#[derive(Debug, Default, Clone)]
pub struct Remove3Args {
    pub object: super::diropargs3,
}
xdr_struct!(Remove3Args { object: super::diropargs3 });

#[derive(Debug, Default, Clone)]
pub struct RmDir3Args {
    pub object: super::diropargs3,
}
xdr_struct!(RmDir3Args { object: super::diropargs3 });

#[derive(Debug, Default, Clone)]
pub struct RemoveRes3Ok {
    pub dir_wcc: wcc_data,
}
xdr_struct!(RemoveRes3Ok { dir_wcc: wcc_data });

#[derive(Debug, Default, Clone)]
pub struct Rename3Args {
    pub from: super::diropargs3,
    pub to: super::diropargs3,
}
xdr_struct!(Rename3Args { from: super::diropargs3, to: super::diropargs3 });

#[derive(Debug, Default, Clone)]
pub struct Rename3ResOk {
    pub fromdir_wcc: wcc_data,
    pub todir_wcc: wcc_data,
}
xdr_struct!(Rename3ResOk { fromdir_wcc: wcc_data, todir_wcc: wcc_data });

#[derive(Debug, Default, Clone)]
pub struct Link3Args {
    pub file: nfs_fh3,
    pub link: super::diropargs3,
}
xdr_struct!(Link3Args { file: nfs_fh3, link: super::diropargs3 });

#[derive(Debug, Default, Clone)]
pub struct Link3ResOk {
    pub file_attributes: post_op_attr,
    pub linkdir_wcc: wcc_data,
}
xdr_struct!(Link3ResOk { file_attributes: post_op_attr, linkdir_wcc: wcc_data });

#[derive(Debug, Default, Clone)]
pub struct ReadDir3Args {
    pub dir: nfs_fh3,
    pub cookie: u64,
    pub cookieverf: [u8; super::NFS3_COOKIEVERFSIZE],
    pub count: u32,
}
xdr_struct!(ReadDir3Args {
    dir: nfs_fh3,
    cookie: u64,
    cookieverf: [u8; super::NFS3_COOKIEVERFSIZE],
    count: u32,
});

#[derive(Debug, Default, Clone)]
pub struct DirEntry3 {
    pub fileid: u64,
    pub name: String,
    pub cookie: u64,
}
xdr_struct!(DirEntry3 { fileid: u64, name: String, cookie: u64 });

#[derive(Debug, Default, Clone)]
pub struct ReadDir3ResOk {
    pub dir_attributes: post_op_attr,
    pub cookieverf: [u8; super::NFS3_COOKIEVERFSIZE],
    pub entries: Vec<DirEntry3>,
    pub eof: bool,
}

impl crate::xdr::Xdr for ReadDir3ResOk {
    fn serialize(&self, dst: &mut impl std::io::Write) -> crate::xdr::Result<()> {
        self.dir_attributes.serialize(dst)?;
        self.cookieverf.serialize(dst)?;
        for e in &self.entries {
            true.serialize(dst)?;
            e.serialize(dst)?;
        }
        false.serialize(dst)?;
        self.eof.serialize(dst)
    }
    fn deserialize(&mut self, src: &mut impl std::io::Read) -> crate::xdr::Result<()> {
        self.dir_attributes.deserialize(src)?;
        self.cookieverf.deserialize(src)?;
        self.entries.clear();
        loop {
            let mut more = false;
            more.deserialize(src)?;
            if !more {
                break;
            }
            let mut e = DirEntry3::default();
            e.deserialize(src)?;
            self.entries.push(e);
        }
        self.eof.deserialize(src)
    }
}

#[derive(Debug, Default, Clone)]
pub struct FsStat3ResOk {
    pub obj_attributes: post_op_attr,
    pub tbytes: u64,
    pub fbytes: u64,
    pub abytes: u64,
    pub tfiles: u64,
    pub ffiles: u64,
    pub afiles: u64,
    pub invarsec: u32,
}
xdr_struct!(FsStat3ResOk {
    obj_attributes: post_op_attr,
    tbytes: u64,
    fbytes: u64,
    abytes: u64,
    tfiles: u64,
    ffiles: u64,
    afiles: u64,
    invarsec: u32,
});

#[derive(Debug, Default, Clone)]
pub struct FsInfo3ResOk {
    pub obj_attributes: post_op_attr,
    pub rtmax: u32,
    pub rtpref: u32,
    pub rtmult: u32,
    pub wtmax: u32,
    pub wtpref: u32,
    pub wtmult: u32,
    pub dtpref: u32,
    pub maxfilesize: u64,
    pub time_delta: super::nfstime3,
    pub properties: u32,
}
xdr_struct!(FsInfo3ResOk {
    obj_attributes: post_op_attr,
    rtmax: u32,
    rtpref: u32,
    rtmult: u32,
    wtmax: u32,
    wtpref: u32,
    wtmult: u32,
    dtpref: u32,
    maxfilesize: u64,
    time_delta: super::nfstime3,
    properties: u32,
});

#[derive(Debug, Default, Clone)]
pub struct PathConf3ResOk {
    pub obj_attributes: post_op_attr,
    pub linkmax: u32,
    pub name_max: u32,
    pub no_trunc: bool,
    pub chown_restricted: bool,
    pub case_insensitive: bool,
    pub case_preserving: bool,
}
xdr_struct!(PathConf3ResOk {
    obj_attributes: post_op_attr,
    linkmax: u32,
    name_max: u32,
    no_trunc: bool,
    chown_restricted: bool,
    case_insensitive: bool,
    case_preserving: bool,
});

#[derive(Debug, Default, Clone)]
pub struct Commit3Args {
    pub file: nfs_fh3,
    pub offset: u64,
    pub count: u32,
}
xdr_struct!(Commit3Args { file: nfs_fh3, offset: u64, count: u32 });

#[derive(Debug, Default, Clone)]
pub struct Commit3ResOk {
    pub file_wcc: wcc_data,
    pub verf: [u8; super::NFS3_WRITEVERFSIZE],
}
xdr_struct!(Commit3ResOk { file_wcc: wcc_data, verf: [u8; super::NFS3_WRITEVERFSIZE] });

/// One-fits-all failure shape for procedures whose fail-case carries
/// only a `post_op_attr`/`wcc_data` the specific result types above
/// already encode; kept here for the handlers that need a bare status.
pub struct StatusOnly;

impl StatusOnly {
    pub fn write(dst: &mut impl std::io::Write, status: nfsstat3) -> crate::xdr::Result<()> {
        status.serialize(dst)
    }
}
