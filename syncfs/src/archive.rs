//! Archive builds the transfer tarball shipped into the running container.

use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use tracing::{debug, instrument, trace};
use walkdir::WalkDir;

use crate::{Error, IgnoreMatcher, Result};

/// BuildArchive walks `root`, skipping `.git`, `.odo`, and anything the ignore matcher rejects,
/// and writes a tar of everything else to `dest`. It returns the written file's modification
/// time as a nanosecond count — the mod-time token used to fence syncs.
#[instrument(skip(ignore), fields(root = %root.display(), dest = %dest.display()))]
pub fn build_archive(root: &Path, dest: &Path, ignore: &IgnoreMatcher) -> Result<i64> {
    match fs::remove_file(dest) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let root = fs::canonicalize(root)?;
    let top = root
        .file_name()
        .ok_or_else(|| Error::BadRoot(root.display().to_string()))?;

    let file = fs::File::create(dest)?;
    let mut tw = tar::Builder::new(file);

    let walk_root = root.clone();
    let prune_root = root.clone();
    let walker = WalkDir::new(&walk_root).into_iter().filter_entry(move |e| {
        let Ok(rel) = e.path().strip_prefix(&prune_root) else {
            return true;
        };
        if rel.as_os_str().is_empty() {
            return true;
        }
        if e.file_type().is_dir() {
            if rel == Path::new(".git") || rel == Path::new(".odo") {
                trace!(path = %rel.display(), "skipping reserved directory");
                return false;
            }
            if ignore.matches(rel, true) {
                trace!(path = %rel.display(), "skipping ignored directory");
                return false;
            }
        }
        true
    });

    let mut count = 0u64;
    for entry in walker {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }
        let path = entry.path();
        let rel = path.strip_prefix(&root).expect("entry is under root");
        let name = top_joined(top, rel);
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            append_symlink(&mut tw, &name, path)?;
            count += 1;
            continue;
        }
        if file_type.is_dir() {
            let is_empty = fs::read_dir(path)?.next().is_none();
            if is_empty {
                tw.append_dir(&name, path)?;
                count += 1;
            }
            continue;
        }
        if ignore.matches(rel, false) {
            trace!(path = %rel.display(), "skipping ignored file");
            continue;
        }
        let mut f = fs::File::open(path)?;
        tw.append_file(&name, &mut f)?;
        count += 1;
    }
    tw.finish()?;
    drop(tw);

    let meta = fs::metadata(dest)?;
    let mtime = meta.modified()?;
    let ns = mtime.duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    let token = i64::try_from(ns)?;
    debug!(entries = count, mod_time = token, "archive built");
    Ok(token)
}

fn top_joined(top: &std::ffi::OsStr, rel: &Path) -> std::path::PathBuf {
    Path::new(top).join(rel)
}

fn append_symlink(
    tw: &mut tar::Builder<fs::File>,
    name: &Path,
    path: &Path,
) -> Result<()> {
    let meta = fs::symlink_metadata(path)?;
    let target = fs::read_link(path)?;
    let mut header = tar::Header::new_gnu();
    header.set_metadata(&meta);
    header.set_entry_type(tar::EntryType::Symlink);
    header.set_size(0);
    header.set_cksum();
    tw.append_link(&mut header, name, &target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn entry_names(tar_path: &Path) -> Vec<String> {
        let f = fs::File::open(tar_path).unwrap();
        let mut ar = tar::Archive::new(f);
        ar.entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn walks_and_tars_non_ignored_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("myproject");
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.rs"), b"fn main() {}").unwrap();
        fs::write(root.join(".gitignore"), "*.log\n").unwrap();
        fs::write(root.join("debug.log"), b"noisy").unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/HEAD"), b"ref: refs/heads/main").unwrap();

        let ignore = IgnoreMatcher::load(&root).unwrap();
        let dest = dir.path().join(".odo/complete.tar");
        let token = build_archive(&root, &dest, &ignore).unwrap();
        assert!(token > 0);

        let names = entry_names(&dest);
        assert!(names.iter().any(|n| n == "myproject/src/main.rs"));
        assert!(names.iter().any(|n| n == "myproject/.gitignore"));
        assert!(!names.iter().any(|n| n.contains("debug.log")));
        assert!(!names.iter().any(|n| n.contains(".git/")));
    }

    #[test]
    fn empty_directories_are_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("proj");
        fs::create_dir_all(root.join("empty")).unwrap();
        let ignore = IgnoreMatcher::load(&root).unwrap();
        let dest = dir.path().join(".odo/complete.tar");
        build_archive(&root, &dest, &ignore).unwrap();

        let names = entry_names(&dest);
        assert!(names.iter().any(|n| n.trim_end_matches('/') == "proj/empty"));
    }

    #[test]
    fn missing_prior_archive_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("proj");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a.txt"), b"hi").unwrap();
        let ignore = IgnoreMatcher::load(&root).unwrap();
        let dest = dir.path().join("nonexistent/complete.tar");
        assert!(build_archive(&root, &dest, &ignore).is_ok());
    }

    #[test]
    fn contents_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("proj");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a.txt"), b"hello world").unwrap();
        let ignore = IgnoreMatcher::load(&root).unwrap();
        let dest = dir.path().join(".odo/complete.tar");
        build_archive(&root, &dest, &ignore).unwrap();

        let f = fs::File::open(&dest).unwrap();
        let mut ar = tar::Archive::new(f);
        let mut found = false;
        for entry in ar.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.path().unwrap().ends_with("a.txt") {
                let mut buf = String::new();
                entry.read_to_string(&mut buf).unwrap();
                assert_eq!(buf, "hello world");
                found = true;
            }
        }
        assert!(found);
    }
}
