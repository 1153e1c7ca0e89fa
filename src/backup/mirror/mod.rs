//! Mirror-copy backends.
//!
//! A mirror makes the destination tree an exact copy of the source tree, removing anything
//! at the destination that the source does not have. The orchestrator only sees the
//! [`Mirror`] trait; the hosting binary picks a backend with [`platform_mirror`].

pub mod copy;
pub mod robocopy;

pub use copy::CopyMirror;
pub use robocopy::RobocopyMirror;

use crate::backup::result_error::result::Result;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MirrorReport {
    pub copied: usize,
    pub removed: usize,
}

pub trait Mirror: Debug + Send + Sync {
    /// Synchronously mirrors `source` onto `dest`, creating `dest` if needed.
    fn mirror(&self, source: &Path, dest: &Path) -> Result<MirrorReport>;
}

/// Robocopy on Windows, the portable walker everywhere else.
pub fn platform_mirror() -> Arc<dyn Mirror> {
    #[cfg(windows)]
    {
        Arc::new(RobocopyMirror::default())
    }
    #[cfg(not(windows))]
    {
        Arc::new(CopyMirror)
    }
}
