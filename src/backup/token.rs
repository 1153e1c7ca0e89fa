//! Timestamp tokens naming staging directories and backup archives.
//!
//! A token is a local wall-clock instant rendered as `YYYYMMDD_HHMMSS`. Archives at the
//! destination are named `<token>.zip`; anything else in that directory is ignored.

use chrono::{Local, NaiveDateTime, Timelike};
use derive_more::{Deref, From, Into};
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::str::FromStr;

pub static TOKEN_FORMAT: &str = "%Y%m%d_%H%M%S";
pub static ARCHIVE_EXT: &str = "zip";

const TOKEN_LEN: usize = 15;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into, Deref)]
pub struct TimestampToken(NaiveDateTime);

impl TimestampToken {
    /// Token for the current local time, truncated to whole seconds.
    pub fn now() -> Self {
        Self::from_naive(Local::now().naive_local())
    }

    pub fn from_naive(dt: NaiveDateTime) -> Self {
        Self(dt.with_nanosecond(0).unwrap_or(dt))
    }

    pub fn date_time(&self) -> NaiveDateTime {
        self.0
    }

    /// `<token>.zip`
    pub fn archive_file_name(&self) -> String {
        format!("{self}.{ARCHIVE_EXT}")
    }

    /// Parses a destination file name under the `<YYYYMMDD_HHMMSS>.zip` convention.
    pub fn from_archive_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let file_name = path.as_ref().file_name()?.to_str()?;
        let stem = file_name.strip_suffix(&format!(".{ARCHIVE_EXT}"))?;
        stem.parse().ok()
    }
}

impl Display for TimestampToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(TOKEN_FORMAT))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0:?} is not a YYYYMMDD_HHMMSS timestamp")]
pub struct InvalidToken(String);

impl FromStr for TimestampToken {
    type Err = InvalidToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // chrono accepts signs and short fields, the naming convention does not
        let well_formed = s.len() == TOKEN_LEN
            && s.char_indices()
                .all(|(i, c)| if i == 8 { c == '_' } else { c.is_ascii_digit() });
        if !well_formed {
            return Err(InvalidToken(s.to_string()));
        }

        NaiveDateTime::parse_from_str(s, TOKEN_FORMAT)
            .map(Self)
            .map_err(|_| InvalidToken(s.to_string()))
    }
}
