use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use itertools::Itertools;
use std::fmt::Debug;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    InvalidSettings(#[from] validator::ValidationErrors),
    #[error(transparent)]
    ThreadPoolBuildError(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    StripPrefix(#[from] std::path::StripPrefixError),
    #[error("Validation failed for {path:?}: {reason}")]
    Validation { path: PathBuf, reason: String },
    #[error("Mirror {src:?} -> {dst:?} failed: {reason}")]
    Copy {
        src: PathBuf,
        dst: PathBuf,
        reason: String,
    },
    #[error("Archive {path:?} could not be finalized: {reason}")]
    Compression { path: PathBuf, reason: String },
    #[error("Archive {path:?} cannot be restored: {reason}")]
    Extraction { path: PathBuf, reason: String },
    #[error("Removing old backup {path:?} failed: {source}")]
    Rotation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{:?} {} failed:\n{}", obj_debug, fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithDebugObjAndFnName {
        error: Box<Error>,
        obj_debug: Box<dyn Debug + Send + Sync>,
        fn_name: String,
    },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

impl<S: Into<String>, O: Debug + Send + Sync + 'static> WithDebugObjectAndFnName<S, O> for Error {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        Error::WithDebugObjAndFnName {
            error: Box::new(self),
            obj_debug: Box::new(obj),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(errors.into_iter().flat_map(|e| e.into_iter()).collect_vec())
    }
}

impl Error {
    pub fn validation<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::Validation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn extraction<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::Extraction {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    /// True when the error was raised before the job touched anything on disk.
    pub fn is_pre_mutation(&self) -> bool {
        match self {
            Error::Validation { .. } | Error::Extraction { .. } | Error::InvalidSettings(_) => {
                true
            }
            Error::WithMsg { error, .. } | Error::WithDebugObjAndFnName { error, .. } => {
                error.is_pre_mutation()
            }
            Error::LotsOfError(errors) => errors.iter().all(Error::is_pre_mutation),
            _ => false,
        }
    }
}
