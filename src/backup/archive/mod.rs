pub mod compress;
pub mod extract;
pub mod inspect;

pub use compress::compress;
pub use extract::extract;
pub use inspect::{list_contents, validate};

use crate::backup::result_error::result::Result;
use chrono::NaiveDateTime;
use getset::{CopyGetters, Getters};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::num::NonZero;
use std::path::Path;

/// Upper bound on compression workers
pub const COMPRESS_WORKER_CAP: usize = 8;
/// Upper bound on extraction workers, extraction is mostly bound by writes
pub const EXTRACT_WORKER_CAP: usize = 6;

/// Deflate preset used when writing an archive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionProfile {
    /// Deflate level 3
    #[default]
    Fast,
    /// Deflate level 9
    Maximum,
}

impl CompressionProfile {
    pub fn from_fast_flag(fast: bool) -> Self {
        if fast {
            Self::Fast
        } else {
            Self::Maximum
        }
    }

    pub fn deflate_level(&self) -> i64 {
        match self {
            Self::Fast => 3,
            Self::Maximum => 9,
        }
    }
}

/// Read-only metadata of one entry in an archive.
#[derive(Clone, Debug, PartialEq, Eq, Getters, CopyGetters)]
pub struct ArchiveEntry {
    /// `/`-separated path relative to the archive root
    #[getset(get = "pub")]
    path: String,
    #[getset(get_copy = "pub")]
    size: u64,
    #[getset(get_copy = "pub")]
    compressed_size: u64,
    #[getset(get_copy = "pub")]
    modified: Option<NaiveDateTime>,
    #[getset(get_copy = "pub")]
    is_dir: bool,
}

/// Outcome of a compress or extract call that ran to completion.
///
/// `failed` entries were skipped and logged, they do not make the call fail.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    pub total: usize,
    pub failed: usize,
    pub bytes: u64,
}

impl ArchiveReport {
    pub fn succeeded(&self) -> usize {
        self.total - self.failed
    }
}

fn worker_pool(cap: usize, name: &'static str) -> Result<ThreadPool> {
    let threads = std::thread::available_parallelism()
        .map(NonZero::get)
        .unwrap_or(1)
        .min(cap);
    tracing::debug!("Building {name} pool with {threads} threads");
    Ok(ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("{name}-{i}"))
        .build()?)
}

/// Joins the components of `relative` with `/`, the separator zip entry names use.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
