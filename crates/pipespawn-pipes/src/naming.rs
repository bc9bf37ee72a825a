//! Pipe naming.
//!
//! `prefix = <namespace><caller pid>_<pipe tag>` and each pipe is
//! `prefix + "_in" | "_out" | "_err"`. The caller pid keeps unrelated
//! callers apart in a shared namespace; the tag keeps one caller's children
//! apart.

use pipespawn_common::{PipeKind, PipeTag};
use std::fmt;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

#[cfg(windows)]
const WINDOWS_PIPE_ROOT: &str = r"\\.\pipe\";

/// Root under which all pipe names are created. Always ends with a
/// separator so names are formed by plain concatenation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeNamespace(String);

impl PipeNamespace {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let mut root = root.as_ref().to_string_lossy().into_owned();
        if !root.ends_with(MAIN_SEPARATOR) && !root.ends_with('/') {
            root.push(MAIN_SEPARATOR);
        }
        Self(root)
    }

    /// Platform default: the kernel pipe namespace on Windows, the temp
    /// directory elsewhere.
    pub fn system() -> Self {
        #[cfg(windows)]
        {
            Self(WINDOWS_PIPE_ROOT.to_string())
        }

        #[cfg(not(windows))]
        {
            Self::new(std::env::temp_dir())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix shared by the three pipes of one child.
    pub fn prefix(&self, caller_pid: u32, tag: PipeTag) -> String {
        format!("{}{}_{}", self.0, caller_pid, tag)
    }
}

impl Default for PipeNamespace {
    fn default() -> Self {
        Self::system()
    }
}

impl From<PathBuf> for PipeNamespace {
    fn from(root: PathBuf) -> Self {
        Self::new(root)
    }
}

/// Full name of one pipe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipeName(String);

impl PipeName {
    pub fn new(prefix: &str, suffix: &str) -> Self {
        Self(format!("{}{}", prefix, suffix))
    }

    pub fn for_kind(prefix: &str, kind: PipeKind) -> Self {
        Self::new(prefix, kind.suffix())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl fmt::Display for PipeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
