//! C3: the hash-guided recursive resolver and the single-slot stat
//! cache it publishes into.

use std::path::{Path, PathBuf};

use nix::sys::stat::FileStat;

use crate::error::{NfsError, Result};
use crate::filehandle::{fh_hash, FileHandle};
use crate::host;

/// Single process-scoped slot carrying the most recent `lstat` result
/// produced by the resolver. Lifetime is one dispatched operation.
#[derive(Default)]
pub struct StatCache {
    entry: Option<FileStat>,
}

impl StatCache {
    pub fn publish(&mut self, stat: FileStat) {
        self.entry = Some(stat);
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    pub fn get(&self) -> Option<&FileStat> {
        self.entry.as_ref()
    }
}

/// Composes a filehandle for `path`, which must lie under `root`.
/// Walks `root` to `path` component by component, hashing each
/// component's own inode into the FH's trail and leaving `(dev, ino,
/// gen)` set to the terminal object's identity. Fails with
/// `NameTooLong` if the walk would exceed [`crate::filehandle::FH_MAXLEN`]
/// components, or with `Invalid` if `need_dir` is set and the
/// terminal object is not a directory.
pub fn compose(root: &Path, path: &Path, need_dir: bool, gen_of: impl Fn(&Path) -> u32, pwhash: u32) -> Result<FileHandle> {
    let root_stat = host::lstat(root)?;
    let mut fh = FileHandle::root(root_stat.st_dev as u32, root_stat.st_ino, gen_of(root), pwhash);

    let rel = path.strip_prefix(root).map_err(|_| NfsError::ServerFault)?;

    let mut cur = root.to_path_buf();
    let mut terminal = root_stat;
    for comp in rel.components() {
        cur.push(comp.as_os_str());
        terminal = host::lstat(&cur)?;
        fh = fh.extend(terminal.st_dev as u32, terminal.st_ino, gen_of(&cur))?;
    }

    if need_dir && (terminal.st_mode & libc::S_IFMT as u32) != libc::S_IFDIR as u32 {
        return Err(NfsError::Invalid);
    }

    Ok(fh)
}

/// Resolves `fh` to a path under `root`, using a hash-guided
/// depth-first directory search. Publishes the leaf `lstat` into
/// `stat_cache` on success and clears it on failure.
///
/// `fh.len == 0` resolves directly to `root`. Returns `None` when the
/// object cannot be found (deleted, renamed away, or a hash-path
/// mismatch) rather than failing with a hard error: callers map a
/// `None` to `NFS3ERR_STALE`.
pub fn resolve(root: &Path, fh: &FileHandle, stat_cache: &mut StatCache) -> Result<Option<PathBuf>> {
    let root_stat = match host::lstat(root) {
        Ok(s) => s,
        Err(_) => {
            stat_cache.invalidate();
            return Ok(None);
        }
    };

    if fh.is_root() {
        if root_stat.st_dev as u32 == fh.dev && root_stat.st_ino == fh.ino {
            stat_cache.publish(root_stat);
            return Ok(Some(root.to_path_buf()));
        }
        stat_cache.invalidate();
        return Ok(None);
    }

    match resolve_rec(root, fh, 0, stat_cache)? {
        Some(path) => Ok(Some(path)),
        None => {
            stat_cache.invalidate();
            Ok(None)
        }
    }
}

/// Self equality is checked before recursion at every level (not only
/// at the terminal depth): an object found by direct `(dev,ino)` match
/// anywhere along the hash-guided path is accepted immediately, so a
/// rename that keeps the object within a directory still on the path
/// does not make its FH stale.
fn resolve_rec(
    dir: &Path,
    fh: &FileHandle,
    depth: usize,
    stat_cache: &mut StatCache,
) -> Result<Option<PathBuf>> {
    let target_depth = fh.len as usize;
    if depth == target_depth {
        return Ok(None);
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(it) => it,
        Err(_) => return Ok(None),
    };

    let mut matches = 0usize;
    let mut found: Option<PathBuf> = None;
    let mut found_stat: Option<FileStat> = None;

    for entry in entries.flatten() {
        let name = entry.file_name();
        if name == "." || name == ".." {
            continue;
        }
        let child = dir.join(&name);
        let stat = match host::lstat(&child) {
            Ok(s) => s,
            Err(_) => continue,
        };

        if stat.st_dev as u32 == fh.dev && stat.st_ino == fh.ino {
            matches += 1;
            if found.is_none() {
                found = Some(child.clone());
                found_stat = Some(stat);
            }
            // Continue scanning so the collision counter is
            // accurate; tie-break handling below.
            continue;
        }

        if fh_hash(stat.st_ino) == fh.inos[depth] && (stat.st_mode & libc::S_IFMT as u32) == libc::S_IFDIR as u32 {
            if let Some(p) = resolve_rec(&child, fh, depth + 1, stat_cache)? {
                return Ok(Some(p));
            }
        }
    }

    if matches >= 2 {
        // Non-unique inode numbers on this host: refuse rather than
        // guess which entry is the real target.
        return Ok(None);
    }

    if let (Some(path), Some(stat)) = (found, found_stat) {
        stat_cache.publish(stat);
        return Ok(Some(path));
    }

    Ok(None)
}

/// Optional brute-force fallback: scans the whole export tree for an
/// object matching `(dev, ino)` when the hash-guided walk above fails
/// and `brute_force` is enabled. Used as resolution step (3) per the
/// base specification's resolution order.
pub fn brute_force_scan(root: &Path, dev: u32, ino: u64) -> Option<PathBuf> {
    fn walk(dir: &Path, dev: u32, ino: u64) -> Option<PathBuf> {
        let entries = std::fs::read_dir(dir).ok()?;
        for entry in entries.flatten() {
            let child = entry.path();
            let stat = match host::lstat(&child) {
                Ok(s) => s,
                Err(_) => continue,
            };
            if stat.st_dev as u32 == dev && stat.st_ino == ino {
                return Some(child);
            }
            if (stat.st_mode & libc::S_IFMT as u32) == libc::S_IFDIR as u32 {
                if let Some(found) = walk(&child, dev, ino) {
                    return Some(found);
                }
            }
        }
        None
    }
    walk(root, dev, ino)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn compose_then_resolve_round_trips() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("a");
        std::fs::create_dir(&sub).unwrap();
        let file = sub.join("b.txt");
        std::fs::write(&file, b"hi").unwrap();

        let fh = compose(dir.path(), &file, false, |_| 0, 0).unwrap();
        let mut cache = StatCache::default();
        let resolved = resolve(dir.path(), &fh, &mut cache).unwrap();
        assert_eq!(resolved, Some(file));
    }

    #[test]
    fn resolve_root_handle() {
        let dir = tempdir().unwrap();
        let fh = compose(dir.path(), dir.path(), true, |_| 0, 0).unwrap();
        assert!(fh.is_root());
        let mut cache = StatCache::default();
        let resolved = resolve(dir.path(), &fh, &mut cache).unwrap();
        assert_eq!(resolved, Some(dir.path().to_path_buf()));
    }

    #[test]
    fn resolve_survives_a_rename_within_the_same_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a");
        std::fs::write(&file, b"x").unwrap();
        let fh = compose(dir.path(), &file, false, |_| 0, 0).unwrap();
        let renamed = dir.path().join("b");
        std::fs::rename(&file, &renamed).unwrap();
        let mut cache = StatCache::default();
        let resolved = resolve(dir.path(), &fh, &mut cache).unwrap();
        assert_eq!(resolved, Some(renamed));
    }

    #[test]
    fn resolve_after_rename_to_a_different_directory_fails() {
        let dir = tempdir().unwrap();
        let sub1 = dir.path().join("sub1");
        let sub2 = dir.path().join("sub2");
        std::fs::create_dir(&sub1).unwrap();
        std::fs::create_dir(&sub2).unwrap();
        let file = sub1.join("a");
        std::fs::write(&file, b"x").unwrap();

        let fh = compose(dir.path(), &file, false, |_| 0, 0).unwrap();
        std::fs::rename(&file, sub2.join("a")).unwrap();

        let mut cache = StatCache::default();
        let resolved = resolve(dir.path(), &fh, &mut cache).unwrap();
        assert_eq!(resolved, None);
    }
}
