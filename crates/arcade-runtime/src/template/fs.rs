use std::io;
use std::path::Path;

use super::TemplateLoadCause;

/// Copy every directory and regular file under `src` into `dst`,
/// preserving relative paths. Symlinks are not followed. Returns the number
/// of files copied.
pub(super) fn copy_tree(src: &Path, dst: &Path) -> Result<usize, TemplateLoadCause> {
    std::fs::create_dir_all(dst)?;
    let mut files = 0;
    for entry in walkdir::WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let path = entry.path();
        let Ok(rel) = path.strip_prefix(src) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let _ = std::fs::copy(path, &target)?;
            files += 1;
        }
    }
    Ok(files)
}

/// Recursively delete `path`. Returns `false` if it did not exist.
pub fn remove_dir_if_exists(path: &Path) -> io::Result<bool> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
