//! The external `vmtouch` page-cache utility.

use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::{Command, Output};

use log::{debug, warn};

use crate::error::{ProbeError, Result};

#[derive(Debug, Clone)]
pub struct PageCacheTool {
    program: OsString,
}

impl PageCacheTool {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self { program: program.into() }
    }

    /// `vmtouch -vt <path>`: reads every page of `path` into the page cache.
    pub fn warm(&self, path: &Path) -> Result<()> {
        let output = self.invoke(&[OsStr::new("-vt"), path.as_os_str()])?;
        echo(&output);
        if !output.status.success() {
            return Err(ProbeError::Tool {
                tool: self.name(),
                reason: format!("warming {} exited with {}", path.display(), output.status),
            });
        }
        Ok(())
    }

    /// `vmtouch <path>`: prints how much of `path` is resident. A failing
    /// report only costs the printout, so it is logged and ignored.
    pub fn report(&self, path: &Path) {
        match self.invoke(&[path.as_os_str()]) {
            Ok(output) => {
                echo(&output);
                if !output.status.success() {
                    warn!("{} {} exited with {}", self.name(), path.display(), output.status);
                }
            }
            Err(e) => warn!("{e}"),
        }
    }

    fn invoke(&self, args: &[&OsStr]) -> Result<Output> {
        debug!("running {} {:?}", self.name(), args);
        Command::new(&self.program).args(args).output().map_err(|e| ProbeError::Tool {
            tool: self.name(),
            reason: format!("failed to run: {e}"),
        })
    }

    fn name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

fn echo(output: &Output) {
    print!("{}", String::from_utf8_lossy(&output.stdout));
    if !output.stderr.is_empty() {
        eprint!("{}", String::from_utf8_lossy(&output.stderr));
    }
}
