//! ONC-RPC (RFC 5531) message envelope: the transport-level wrapper
//! every NFSv3/MOUNT call and reply travels inside.

#![allow(non_camel_case_types)]

use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};

use crate::xdr::{xdr_enum, xdr_struct, Result, Xdr};

pub const RPC_VERSION: u32 = 2;

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum AuthFlavor {
    AuthNone = 0,
    AuthSys = 1,
    AuthShort = 2,
    AuthDh = 3,
    RpcSecGss = 6,
}
impl Default for AuthFlavor {
    fn default() -> Self {
        AuthFlavor::AuthNone
    }
}
xdr_enum!(AuthFlavor);

#[derive(Debug, Default, Clone)]
pub struct OpaqueAuth {
    pub flavor: AuthFlavor,
    pub body: Vec<u8>,
}
xdr_struct!(OpaqueAuth { flavor: AuthFlavor, body: Vec<u8> });

/// Decoded `AUTH_SYS` (a.k.a. `AUTH_UNIX`) credential body.
#[derive(Debug, Default, Clone)]
pub struct AuthUnix {
    pub stamp: u32,
    pub machinename: String,
    pub uid: u32,
    pub gid: u32,
    pub gids: Vec<u32>,
}

impl Xdr for AuthUnix {
    fn serialize(&self, dst: &mut impl Write) -> Result<()> {
        self.stamp.serialize(dst)?;
        self.machinename.serialize(dst)?;
        self.uid.serialize(dst)?;
        self.gid.serialize(dst)?;
        (self.gids.len() as u32).serialize(dst)?;
        for g in &self.gids {
            g.serialize(dst)?;
        }
        Ok(())
    }
    fn deserialize(&mut self, src: &mut impl Read) -> Result<()> {
        self.stamp.deserialize(src)?;
        self.machinename.deserialize(src)?;
        self.uid.deserialize(src)?;
        self.gid.deserialize(src)?;
        let mut n: u32 = 0;
        n.deserialize(src)?;
        self.gids = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let mut g = 0u32;
            g.deserialize(src)?;
            self.gids.push(g);
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct CallBody {
    pub rpcvers: u32,
    pub prog: u32,
    pub vers: u32,
    pub proc_: u32,
    pub cred: OpaqueAuth,
    pub verf: OpaqueAuth,
}
xdr_struct!(CallBody {
    rpcvers: u32,
    prog: u32,
    vers: u32,
    proc_: u32,
    cred: OpaqueAuth,
    verf: OpaqueAuth,
});

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum AcceptStat {
    Success = 0,
    ProgUnavail = 1,
    ProgMismatch = 2,
    ProcUnavail = 3,
    GarbageArgs = 4,
    SystemErr = 5,
}
impl Default for AcceptStat {
    fn default() -> Self {
        AcceptStat::Success
    }
}
xdr_enum!(AcceptStat);

#[derive(Debug, Default, Copy, Clone)]
pub struct MismatchInfo {
    pub low: u32,
    pub high: u32,
}
xdr_struct!(MismatchInfo { low: u32, high: u32 });

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum AuthStat {
    AuthOk = 0,
    AuthBadcred = 1,
    AuthRejectedcred = 2,
    AuthBadverf = 3,
    AuthRejectedverf = 4,
    AuthTooweak = 5,
    AuthInvalidresp = 6,
    AuthFailed = 7,
}
impl Default for AuthStat {
    fn default() -> Self {
        AuthStat::AuthOk
    }
}
xdr_enum!(AuthStat);

/// Reply-side helper: replies are built procedurally (each handler
/// already knows exactly which shape it wants to write), so unlike
/// the call side there is no generic `reply_body` decoder — only
/// these constructors.
pub struct ReplyHeader {
    pub xid: u32,
}

impl ReplyHeader {
    fn write_msg_type(dst: &mut impl Write, is_call: bool) -> Result<()> {
        (!is_call as u32).serialize(dst)
    }

    pub fn write_accepted_success(&self, dst: &mut impl Write) -> Result<()> {
        self.xid.serialize(dst)?;
        Self::write_msg_type(dst, false)?;
        OpaqueAuth::default().serialize(dst)?;
        AcceptStat::Success.serialize(dst)
    }

    pub fn write_accepted(&self, dst: &mut impl Write, stat: AcceptStat) -> Result<()> {
        self.xid.serialize(dst)?;
        Self::write_msg_type(dst, false)?;
        OpaqueAuth::default().serialize(dst)?;
        stat.serialize(dst)
    }

    pub fn write_prog_mismatch(&self, dst: &mut impl Write, low: u32, high: u32) -> Result<()> {
        self.xid.serialize(dst)?;
        Self::write_msg_type(dst, false)?;
        OpaqueAuth::default().serialize(dst)?;
        AcceptStat::ProgMismatch.serialize(dst)?;
        MismatchInfo { low, high }.serialize(dst)
    }

    pub fn write_rpc_vers_mismatch(&self, dst: &mut impl Write) -> Result<()> {
        self.xid.serialize(dst)?;
        Self::write_msg_type(dst, false)?;
        // MSG_DENIED
        1u32.serialize(dst)?;
        // RPC_MISMATCH
        0u32.serialize(dst)?;
        MismatchInfo { low: RPC_VERSION, high: RPC_VERSION }.serialize(dst)
    }
}

/// Parses the `rpc_msg`/`call_body` envelope of an inbound message,
/// returning the XID and the decoded call. Replies are never parsed
/// by this server (it has no outbound RPC client side).
pub fn parse_call(src: &mut impl Read) -> Result<(u32, CallBody)> {
    let mut xid: u32 = 0;
    xid.deserialize(src)?;
    let mut msg_type: u32 = 0;
    msg_type.deserialize(src)?;
    if msg_type != 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "expected a CALL message",
        ));
    }
    let mut call = CallBody::default();
    call.deserialize(src)?;
    Ok((xid, call))
}
