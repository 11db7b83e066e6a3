//! C11: the exports file parser and the export table it produces.
//! Grounded on the original `mount.c` export-line grammar and the
//! teacher's `src/export` module layout.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::filehandle::fnv1a;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Squash {
    RootSquash,
    NoRootSquash,
    AllSquash,
}

#[derive(Debug, Clone)]
pub struct ClientMatch {
    pub host: String,
}

impl ClientMatch {
    fn matches(&self, peer: IpAddr) -> bool {
        if self.host == "*" {
            return true;
        }
        match self.host.parse::<IpAddr>() {
            Ok(addr) => addr == peer,
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportEntry {
    pub path: PathBuf,
    pub clients: Vec<ClientMatch>,
    pub read_only: bool,
    pub squash: Squash,
    pub removable: bool,
    pub insecure: bool,
    pub password: Option<String>,
    pub pwhash: u32,
    pub anonuid: u32,
    pub anongid: u32,
    pub fsid_override: Option<u32>,
}

impl ExportEntry {
    pub fn allows(&self, peer: IpAddr) -> bool {
        self.clients.iter().any(|c| c.matches(peer))
    }
}

#[derive(Debug, Default, Clone)]
pub struct ExportTable {
    pub entries: Vec<ExportEntry>,
}

impl ExportTable {
    pub fn find_by_path(&self, path: &Path) -> Option<&ExportEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Finds the export whose root is an ancestor of `path`, preferring
    /// the longest (most specific) matching prefix.
    pub fn find_containing(&self, path: &Path) -> Option<&ExportEntry> {
        self.entries
            .iter()
            .filter(|e| path.starts_with(&e.path))
            .max_by_key(|e| e.path.as_os_str().len())
    }
}

#[derive(Debug)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Parses the whole exports file, returning either a complete table
/// or the first error encountered. A malformed file never yields a
/// partial table: the caller must keep its previous table in that
/// case (see [`crate::context::ServerContext::reload_exports`]).
pub fn parse_file(path: &Path) -> Result<ExportTable, ParseError> {
    let contents = fs::read_to_string(path).map_err(|e| ParseError {
        line: 0,
        message: format!("cannot read {}: {e}", path.display()),
    })?;
    parse_str(&contents)
}

pub fn parse_str(contents: &str) -> Result<ExportTable, ParseError> {
    let mut entries = Vec::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let path_tok = tokens.next().ok_or_else(|| ParseError {
            line: line_no,
            message: "empty export line".to_string(),
        })?;
        if !path_tok.starts_with('/') {
            return Err(ParseError {
                line: line_no,
                message: format!("export path must be absolute: {path_tok}"),
            });
        }
        let path = PathBuf::from(path_tok);

        let mut clients = Vec::new();
        let mut read_only = true;
        let mut squash = Squash::RootSquash;
        let mut removable = false;
        let mut insecure = false;
        let mut password = None;
        let mut anonuid = 65534u32;
        let mut anongid = 65534u32;
        let mut fsid_override = None;

        for host_tok in tokens {
            let (host, flags) = match host_tok.split_once('(') {
                Some((h, rest)) => {
                    let flags = rest.strip_suffix(')').ok_or_else(|| ParseError {
                        line: line_no,
                        message: format!("unterminated flag list: {host_tok}"),
                    })?;
                    (h.to_string(), flags)
                }
                None => (host_tok.to_string(), ""),
            };

            clients.push(ClientMatch { host });

            for flag in flags.split(',').filter(|f| !f.is_empty()) {
                match flag {
                    "ro" => read_only = true,
                    "rw" => read_only = false,
                    "root_squash" => squash = Squash::RootSquash,
                    "no_root_squash" => squash = Squash::NoRootSquash,
                    "all_squash" => squash = Squash::AllSquash,
                    "removable" => removable = true,
                    "insecure" => insecure = true,
                    _ if flag.starts_with("password=") => {
                        password = Some(flag["password=".len()..].to_string());
                    }
                    _ if flag.starts_with("anonuid=") => {
                        anonuid = flag["anonuid=".len()..].parse().map_err(|_| ParseError {
                            line: line_no,
                            message: format!("bad anonuid value: {flag}"),
                        })?;
                    }
                    _ if flag.starts_with("anongid=") => {
                        anongid = flag["anongid=".len()..].parse().map_err(|_| ParseError {
                            line: line_no,
                            message: format!("bad anongid value: {flag}"),
                        })?;
                    }
                    _ if flag.starts_with("fsid=") => {
                        fsid_override = Some(flag["fsid=".len()..].parse().map_err(|_| ParseError {
                            line: line_no,
                            message: format!("bad fsid value: {flag}"),
                        })?);
                    }
                    other => {
                        return Err(ParseError {
                            line: line_no,
                            message: format!("unknown export flag: {other}"),
                        })
                    }
                }
            }
        }

        if clients.is_empty() {
            clients.push(ClientMatch { host: "*".to_string() });
        }

        let pwhash = fnv1a(password.as_deref().unwrap_or("").as_bytes());

        entries.push(ExportEntry {
            path,
            clients,
            read_only,
            squash,
            removable,
            insecure,
            password,
            pwhash,
            anonuid,
            anongid,
            fsid_override,
        });
    }

    Ok(ExportTable { entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_host_defaults() {
        let table = parse_str("/srv 192.168.1.5\n").unwrap();
        assert_eq!(table.entries.len(), 1);
        assert!(table.entries[0].read_only);
        assert_eq!(table.entries[0].squash, Squash::RootSquash);
    }

    #[test]
    fn parses_flags_and_password() {
        let table = parse_str("/srv *(rw,no_root_squash,password=hunter2,anonuid=1000)\n").unwrap();
        let e = &table.entries[0];
        assert!(!e.read_only);
        assert_eq!(e.squash, Squash::NoRootSquash);
        assert_eq!(e.password.as_deref(), Some("hunter2"));
        assert_eq!(e.anonuid, 1000);
        assert_eq!(e.pwhash, fnv1a(b"hunter2"));
    }

    #[test]
    fn rejects_relative_path() {
        assert!(parse_str("srv *(ro)\n").is_err());
    }

    #[test]
    fn rejects_unknown_flag() {
        assert!(parse_str("/srv *(bogus)\n").is_err());
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        let table = parse_str("\n# comment\n/srv *(ro)\n").unwrap();
        assert_eq!(table.entries.len(), 1);
    }
}
