//! Directory checks run before a job touches anything.

use crate::backup::result_error::error::Error;
use validator::ValidationError;

use std::path::Path;

pub fn validate_dir_exist<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} not found", dir).into()));
    }

    Ok(())
}

pub fn validate_dir_exist_or_created<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return std::fs::create_dir_all(dir).map_err(|e| {
            ValidationError::new("InvalidDirectory")
                .with_message(format!("cannot create or access {:?}: {}", dir, e).into())
        });
    }

    Ok(())
}

pub fn validate_writable_dir<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    validate_dir_exist_or_created(dir)?;
    let md = std::fs::metadata(dir).map_err(|e| {
        ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot access metadata for {:?}: {}", dir, e).into())
    })?;
    if md.permissions().readonly() {
        Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot write to dir {:?}", dir).into()))
    } else {
        Ok(())
    }
}

/// Lifts a field-less [`ValidationError`] into the crate error, attached to `path`.
pub fn into_error<P: AsRef<Path>>(path: P, e: ValidationError) -> Error {
    let reason = e
        .message
        .map(|m| m.into_owned())
        .unwrap_or_else(|| e.code.into_owned());
    Error::validation(path.as_ref(), reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dir_exist() {
        let dir = TempDir::new().unwrap();
        assert!(validate_dir_exist(dir.path()).is_ok());
        assert!(validate_dir_exist(dir.path().join("missing")).is_err());

        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        let err = into_error(&file, validate_dir_exist(&file).unwrap_err());
        assert!(err.to_string().contains("is not a directory"));
        assert!(err.is_pre_mutation());
    }

    #[test]
    fn test_writable_dir_creates_missing() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b");
        assert!(validate_writable_dir(&nested).is_ok());
        assert!(nested.is_dir());
    }
}
