//! Extraction settings

/// Mode applied to every directory created during extraction (owner rwx).
pub const DEFAULT_DIR_MODE: u32 = 0o700;

/// Mode applied to every file created during extraction (owner rw).
pub const DEFAULT_FILE_MODE: u32 = 0o600;

/// What to do with symlink entries found in an archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SymlinkPolicy {
    /// Recreate the symlink if its target stays inside the extraction directory, fail otherwise
    #[default]
    Confine,
    /// Ignore symlink entries
    Skip,
    /// Fail the extraction on the first symlink entry
    Reject,
}

/// Settings applied to a single extraction call
///
/// Modes are only honored on Unix; they are applied with an explicit `chmod` so the
/// process umask does not change them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractConfig {
    /// Permission bits of created directories
    pub dir_mode: u32,
    /// Permission bits of created files
    pub file_mode: u32,
    /// Handling of symlink entries
    pub symlinks: SymlinkPolicy,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            dir_mode: DEFAULT_DIR_MODE,
            file_mode: DEFAULT_FILE_MODE,
            symlinks: SymlinkPolicy::default(),
        }
    }
}

impl ExtractConfig {
    /// Set the permission bits of created directories. Zero selects [`DEFAULT_DIR_MODE`].
    pub fn with_dir_mode(mut self, mode: u32) -> Self {
        self.dir_mode = mode_or_default(mode, DEFAULT_DIR_MODE);
        self
    }

    /// Set the permission bits of created files. Zero selects [`DEFAULT_FILE_MODE`].
    pub fn with_file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode_or_default(mode, DEFAULT_FILE_MODE);
        self
    }

    /// Set the symlink policy
    pub fn with_symlink_policy(mut self, policy: SymlinkPolicy) -> Self {
        self.symlinks = policy;
        self
    }
}

fn mode_or_default(mode: u32, default: u32) -> u32 {
    match mode & 0o7777 {
        0 => default,
        mode => mode,
    }
}
