use crate::backup::mirror::{Mirror, MirrorReport};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Robocopy exit codes at or above this value signal a failed copy
const ROBOCOPY_FAILURE: i32 = 8;

/// Mirror backed by Windows' `robocopy /MIR`.
#[derive(Clone, Debug)]
pub struct RobocopyMirror {
    program: OsString,
    threads: u32,
}

impl Default for RobocopyMirror {
    fn default() -> Self {
        Self {
            program: "robocopy".into(),
            threads: 32,
        }
    }
}

impl RobocopyMirror {
    pub fn with_program<S: Into<OsString>>(program: S) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    fn command(&self, source: &Path, dest: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(source)
            .arg(dest)
            .arg("/MIR")
            .arg(format!("/MT:{}", self.threads))
            .arg("/NFL")
            .arg("/NJH");
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }
        cmd
    }
}

impl Mirror for RobocopyMirror {
    fn mirror(&self, source: &Path, dest: &Path) -> Result<MirrorReport> {
        let copy_error = |reason: String| Error::Copy {
            src: source.to_path_buf(),
            dst: dest.to_path_buf(),
            reason,
        };

        debug!("Running {:?} {:?} -> {:?}", self.program, source, dest);
        let output = self
            .command(source, dest)
            .output()
            .map_err(|e| copy_error(format!("cannot run {:?}: {e}", self.program)))?;

        match output.status.code() {
            Some(code) if code < ROBOCOPY_FAILURE => Ok(MirrorReport::default()),
            code => Err(copy_error(format!(
                "exit code {:?}: {}",
                code,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_arguments() {
        let cmd = RobocopyMirror::default().command(Path::new("src"), Path::new("dst"));
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(cmd.get_program(), "robocopy");
        assert_eq!(args, vec!["src", "dst", "/MIR", "/MT:32", "/NFL", "/NJH"]);
    }

    #[test]
    fn test_missing_program_is_copy_error() {
        let mirror = RobocopyMirror::with_program("definitely-not-robocopy-on-this-host");
        let err = mirror.mirror(Path::new("a"), Path::new("b")).unwrap_err();
        assert!(matches!(err, Error::Copy { .. }));
    }
}
