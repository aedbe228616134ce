//! Removal of a redundant top-level directory from an extraction result

use std::io;
use std::path::{Path, PathBuf};

/// Returns the only child of `path` if there is exactly one and it is a directory, `path`
/// itself otherwise.
///
/// Archives often wrap their content in a single folder, this looks through it. Nothing is
/// moved; an archive that really wants a single top-level directory kept looks the same and
/// gets flattened too. Symlinks are not followed, a lone symlink to a directory is kept.
pub fn flatten(path: &Path) -> io::Result<PathBuf> {
    let mut entries = fs_err::read_dir(path)?;

    let Some(first) = entries.next().transpose()? else {
        return Ok(path.to_path_buf());
    };

    if entries.next().is_none() && first.file_type()?.is_dir() {
        Ok(first.path())
    } else {
        Ok(path.to_path_buf())
    }
}
