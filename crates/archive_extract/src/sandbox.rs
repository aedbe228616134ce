//! Confinement of untrusted entry names to the extraction directory
//!
//! Entry names are resolved lexically: both `/` and `\` separate segments, empty and `.`
//! segments vanish, leading separators and a leading drive prefix (`C:`) are dropped and
//! `..` removes the previous segment. A `..` that would climb above the root is rejected,
//! it is never clamped.
//!
//! Lexical resolution alone does not protect against symlinks created by earlier entries,
//! so every directory on the way to a written path is checked with `symlink_metadata` and
//! a symlink found there aborts the extraction. Symlinks are only ever created as leaves
//! and are never followed while writing.

use crate::error::ExtractionError;
use std::io;
use std::path::{Path, PathBuf};

/// Resolves entry names against a fixed root directory
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    /// Create a sandbox rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory nothing may escape from
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalize an entry name into a path relative to the root.
    ///
    /// The result only contains normal components. It is empty if the name refers to the
    /// root itself.
    pub fn normalize(name: &str) -> Result<PathBuf, ExtractionError> {
        if name.contains('\0') {
            return Err(ExtractionError::invalid_name(name));
        }
        let segments = resolve_segments(name).ok_or_else(|| ExtractionError::path_escape(name))?;
        Ok(segments.into_iter().collect())
    }

    /// Resolve an entry name to an absolute path beneath the root
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ExtractionError> {
        Ok(self.root.join(Self::normalize(name)?))
    }

    /// Check that a symlink at `link` (relative to the root) pointing at `target` cannot
    /// lead outside of the root.
    ///
    /// The target must be relative and is resolved from the directory containing the link.
    /// `..` is only accepted before the first normal segment: the directories above a link
    /// are real directories, but a segment below it may itself be a symlink, and climbing
    /// back out of one would leave the lexical view.
    pub fn check_symlink_target(
        &self,
        link: &Path,
        entry: &str,
        target: &str,
    ) -> Result<(), ExtractionError> {
        let escape = || ExtractionError::SymlinkEscape {
            entry: entry.to_string(),
            target: target.to_string(),
        };

        if target.is_empty() || target.contains('\0') || is_absolute_name(target) {
            return Err(escape());
        }

        let mut depth = link.components().count().saturating_sub(1);
        let mut descended = false;
        for segment in target.split(['/', '\\']) {
            match segment {
                "" | "." => {}
                ".." if descended => return Err(escape()),
                ".." => depth = depth.checked_sub(1).ok_or_else(escape)?,
                _ => descended = true,
            }
        }
        Ok(())
    }

    /// Create every missing directory of `relative` beneath the root with `mode`.
    ///
    /// Existing directories are left alone. An existing symlink anywhere on the way fails
    /// with [`ExtractionError::ThroughSymlink`] instead of being followed.
    pub fn create_dir_all(
        &self,
        relative: &Path,
        mode: u32,
        entry: &str,
    ) -> Result<(), ExtractionError> {
        let mut current = self.root.clone();
        for component in relative.components() {
            current.push(component);
            match fs_err::symlink_metadata(&current) {
                Ok(metadata) if metadata.file_type().is_symlink() => {
                    return Err(ExtractionError::ThroughSymlink {
                        entry: entry.to_string(),
                        link: current,
                    });
                }
                Ok(metadata) if metadata.is_dir() => {}
                Ok(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("{} exists and is not a directory", current.display()),
                    )
                    .into());
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    fs_err::create_dir(&current)?;
                    set_mode(&current, mode)?;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Fail if any component of `relative`, the last one included, is a symlink.
    pub fn ensure_no_symlinks(&self, relative: &Path, entry: &str) -> Result<(), ExtractionError> {
        let mut current = self.root.clone();
        for component in relative.components() {
            current.push(component);
            if fs_err::symlink_metadata(&current)?.file_type().is_symlink() {
                return Err(ExtractionError::ThroughSymlink {
                    entry: entry.to_string(),
                    link: current,
                });
            }
        }
        Ok(())
    }
}

/// Split `name` into normal segments. `None` if `..` climbs above the root.
fn resolve_segments(name: &str) -> Option<Vec<&str>> {
    let mut segments = Vec::new();
    for (index, segment) in name.split(['/', '\\']).enumerate() {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            drive if index == 0 && is_drive_prefix(drive) => {}
            segment => segments.push(segment),
        }
    }
    Some(segments)
}

fn is_drive_prefix(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn is_absolute_name(name: &str) -> bool {
    name.starts_with(['/', '\\'])
        || name
            .split(['/', '\\'])
            .next()
            .is_some_and(is_drive_prefix)
}

/// Set the permission bits of `path`. A no-op outside of Unix.
#[cfg(unix)]
pub(crate) fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs_err::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

/// Set the permission bits of `path`. A no-op outside of Unix.
#[cfg(not(unix))]
pub(crate) fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("small.txt", "small.txt")]
    #[case("payload/a.txt", "payload/a.txt")]
    #[case("./payload/./a.txt", "payload/a.txt")]
    #[case("payload//a.txt", "payload/a.txt")]
    #[case("/etc/passwd", "etc/passwd")]
    #[case("//server/share/file", "server/share/file")]
    #[case("C:\\Windows\\evil.dll", "Windows/evil.dll")]
    #[case("c:/evil.txt", "evil.txt")]
    #[case("payload/../a.txt", "a.txt")]
    #[case("payload\\sub\\..\\a.txt", "payload/a.txt")]
    #[case("payload/", "payload")]
    #[case("./", "")]
    fn test_normalize(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(PathSandbox::normalize(name).unwrap(), Path::new(expected));
    }

    #[rstest]
    #[case("../evil.txt")]
    #[case("payload/../../evil.txt")]
    #[case("/../evil.txt")]
    #[case("C:\\..\\evil.txt")]
    #[case("..")]
    fn test_normalize_rejects_escapes(#[case] name: &str) {
        assert_matches!(
            PathSandbox::normalize(name),
            Err(ExtractionError::PathEscape { .. })
        );
    }

    #[test]
    fn test_normalize_rejects_nul() {
        assert_matches!(
            PathSandbox::normalize("evil\0.txt"),
            Err(ExtractionError::InvalidName { .. })
        );
    }

    #[rstest]
    #[case("link", "small.txt")]
    #[case("payload/link", "../small.txt")]
    #[case("payload/sub/link", "../../payload/./a.txt")]
    #[case("payload/link", ".")]
    fn test_symlink_inside(#[case] link: &str, #[case] target: &str) {
        let sandbox = PathSandbox::new("/tmp/extract");
        sandbox
            .check_symlink_target(Path::new(link), link, target)
            .unwrap();
    }

    #[rstest]
    #[case("link", "..")]
    #[case("link", "../outside")]
    #[case("payload/link", "../../etc/passwd")]
    #[case("link", "/etc/passwd")]
    #[case("link", "\\\\server\\share")]
    #[case("link", "C:/Windows")]
    #[case("link", "")]
    #[case("payload/link", "sub/../..")]
    #[case("payload/link", "other/../a.txt")]
    fn test_symlink_escape(#[case] link: &str, #[case] target: &str) {
        let sandbox = PathSandbox::new("/tmp/extract");
        assert_matches!(
            sandbox.check_symlink_target(Path::new(link), link, target),
            Err(ExtractionError::SymlinkEscape { .. })
        );
    }

    #[test]
    fn test_create_dir_all() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = PathSandbox::new(root.path());

        sandbox
            .create_dir_all(Path::new("a/b/c"), 0o700, "a/b/c/")
            .unwrap();
        assert!(root.path().join("a/b/c").is_dir());

        // Idempotent
        sandbox
            .create_dir_all(Path::new("a/b"), 0o700, "a/b/")
            .unwrap();

        fs_err::write(root.path().join("a/file"), "x").unwrap();
        assert_matches!(
            sandbox.create_dir_all(Path::new("a/file/d"), 0o700, "a/file/d/"),
            Err(ExtractionError::Io(_))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_create_dir_all_refuses_symlinks() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        let sandbox = PathSandbox::new(root.path());
        assert_matches!(
            sandbox.create_dir_all(Path::new("link/sub"), 0o700, "link/sub/"),
            Err(ExtractionError::ThroughSymlink { .. })
        );
        assert_matches!(
            sandbox.ensure_no_symlinks(Path::new("link"), "link"),
            Err(ExtractionError::ThroughSymlink { .. })
        );
        assert!(!outside.path().join("sub").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_create_dir_all_applies_mode() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let sandbox = PathSandbox::new(root.path());
        sandbox
            .create_dir_all(Path::new("a/b"), 0o750, "a/b/")
            .unwrap();

        for dir in ["a", "a/b"] {
            let mode = fs_err::metadata(root.path().join(dir))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o7777, 0o750);
        }
    }

    proptest! {
        #[test]
        fn resolved_paths_stay_inside_the_root(
            segments in prop::collection::vec(
                prop_oneof![
                    Just("..".to_string()),
                    Just(".".to_string()),
                    Just(String::new()),
                    Just("C:".to_string()),
                    "[a-z]{1,4}",
                ],
                0..8,
            ),
            separator in prop_oneof![Just("/"), Just("\\")],
            leading in any::<bool>(),
        ) {
            let mut name = segments.join(separator);
            if leading {
                name.insert_str(0, separator);
            }

            let sandbox = PathSandbox::new("/srv/extract");
            if let Ok(path) = sandbox.resolve(&name) {
                prop_assert!(path.starts_with("/srv/extract"));
                prop_assert!(path
                    .components()
                    .all(|c| !matches!(c, std::path::Component::ParentDir)));
            }
        }
    }
}
