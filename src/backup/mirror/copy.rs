use crate::backup::function_path;
use crate::backup::mirror::{Mirror, MirrorReport};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use function_name::named;
use itertools::Itertools;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Portable mirror: walks the source, copies files in parallel on the current rayon pool,
/// then prunes destination entries that have no source counterpart.
#[derive(Clone, Copy, Debug, Default)]
pub struct CopyMirror;

impl Mirror for CopyMirror {
    #[named]
    fn mirror(&self, source: &Path, dest: &Path) -> Result<MirrorReport> {
        mirror_tree(source, dest)
            .map_err(|e| Error::Copy {
                src: source.to_path_buf(),
                dst: dest.to_path_buf(),
                reason: e.to_string(),
            })
            .with_debug_object_and_fn_name(*self, function_path!())
    }
}

fn mirror_tree(source: &Path, dest: &Path) -> Result<MirrorReport> {
    if !source.is_dir() {
        return Err(Error::validation(source, "source is not a directory"));
    }
    std::fs::create_dir_all(dest)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(source).min_depth(1).follow_links(true) {
        let entry = entry?;
        let target = dest.join(entry.path().strip_prefix(source)?);
        if entry.file_type().is_dir() {
            if target.is_file() {
                std::fs::remove_file(&target)?;
            }
            std::fs::create_dir_all(&target)?;
        } else {
            files.push((entry.into_path(), target));
        }
    }

    let errors = files
        .par_iter()
        .filter_map(|(src, dst)| copy_file(src, dst).err())
        .collect::<Vec<_>>();
    convert_error_vec(errors)?;
    let copied = files.len();

    let removed = remove_extraneous(source, dest)?;
    debug!("Mirrored {:?} -> {:?}: {copied} copied, {removed} removed", source, dest);
    Ok(MirrorReport { copied, removed })
}

fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    trace!("Copying {:?} -> {:?}", src, dst);
    if dst.is_dir() {
        std::fs::remove_dir_all(dst)?;
    }
    std::fs::copy(src, dst)
        .map(|_| ())
        .map_err(Error::from)
        .with_msg(format!("Copy {src:?} -> {dst:?} failed"))
}

/// Deletes everything under `dest` whose relative path does not exist under `source`.
fn remove_extraneous(source: &Path, dest: &Path) -> Result<usize> {
    let extraneous: Vec<PathBuf> = WalkDir::new(dest)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .map(|res| res.map_err(Error::from))
        .map_ok(|de| de.into_path())
        .filter_ok(|p| {
            p.strip_prefix(dest)
                .map(|relative| !source.join(relative).exists())
                .unwrap_or(false)
        })
        .collect::<Result<_>>()?;

    let mut removed = 0;
    for path in extraneous {
        // a parent may already be gone since contents come first
        if !path.exists() && path.symlink_metadata().is_err() {
            continue;
        }
        trace!("Removing extraneous {:?}", path);
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, name: &str, data: &str) {
        let path = root.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    #[test]
    fn test_mirror_copies_into_missing_dest() {
        let src = TempDir::new().unwrap();
        write(src.path(), "AddOns/Foo/Foo.lua", "foo");
        write(src.path(), "AddOns/Bar.toc", "bar");
        let out = TempDir::new().unwrap();
        let dest = out.path().join("Interface");

        let report = CopyMirror.mirror(src.path(), &dest).unwrap();

        assert_eq!(report.copied, 2);
        assert_eq!(report.removed, 0);
        assert_eq!(std::fs::read_to_string(dest.join("AddOns/Foo/Foo.lua")).unwrap(), "foo");
    }

    #[test]
    fn test_mirror_removes_extraneous_and_overwrites() {
        let src = TempDir::new().unwrap();
        write(src.path(), "keep.txt", "new");
        std::fs::create_dir_all(src.path().join("empty")).unwrap();
        let dest = TempDir::new().unwrap();
        write(dest.path(), "keep.txt", "old");
        write(dest.path(), "stale.txt", "x");
        write(dest.path(), "stale_dir/deep/file.txt", "x");

        let report = CopyMirror.mirror(src.path(), dest.path()).unwrap();

        assert_eq!(report.copied, 1);
        assert_eq!(std::fs::read_to_string(dest.path().join("keep.txt")).unwrap(), "new");
        assert!(!dest.path().join("stale.txt").exists());
        assert!(!dest.path().join("stale_dir").exists());
        assert!(dest.path().join("empty").is_dir());
    }

    #[test]
    fn test_mirror_missing_source_is_copy_error() {
        let dir = TempDir::new().unwrap();
        let err = CopyMirror
            .mirror(&dir.path().join("missing"), &dir.path().join("dest"))
            .unwrap_err();
        assert!(err.to_string().contains("Mirror"));
        assert!(!dir.path().join("dest").exists());
    }
}
