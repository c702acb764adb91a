use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
};

use log::{debug, trace};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
};

use crate::{
    config::{DESTINATION_PLACEHOLDER, SOURCE_PLACEHOLDER},
    error::{Error, Result},
    format::format_path,
};

pub const COMPLETED_STATUS: &str = "Final Job Status: Completed";

/// External program that moves bytes to a remote destination.
///
/// Arguments are a template: `{source}` and `{destination}` are substituted
/// per transfer. The destination carries a short-lived access grant and is
/// never logged.
#[derive(Debug, Clone)]
pub struct TransferCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl TransferCommand {
    pub fn new<P: Into<PathBuf>>(program: P, args: Vec<String>) -> Self {
        TransferCommand {
            program: program.into(),
            args,
        }
    }

    pub async fn run(&self, source: &Path, destination: &str) -> Result<()> {
        debug!("running {} for {}", format_path(&self.program), format_path(source));

        let mut child = Command::new(&self.program)
            .args(self.args_for(source, destination))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| failed(source, "no output stream"))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut completed = false;

        while let Some(line) = lines.next_line().await? {
            trace!("{}", line.replace(destination, "<destination>"));
            if is_completed_status(&line) {
                completed = true;
            }
        }

        let status = child.wait().await?;
        if !completed {
            return Err(failed(source, &format!("no completion status ({status})")));
        }

        if !status.success() {
            return Err(failed(source, &format!("completed but {status}")));
        }

        Ok(())
    }

    fn args_for(&self, source: &Path, destination: &str) -> Vec<OsString> {
        self.args
            .iter()
            .map(|arg| match arg.as_str() {
                SOURCE_PLACEHOLDER => source.as_os_str().to_owned(),
                DESTINATION_PLACEHOLDER => destination.into(),
                _ => arg.into(),
            })
            .collect()
    }
}

/// `CompletedWithErrors` and `CompletedWithSkipped` are not completions.
pub fn is_completed_status(line: &str) -> bool {
    line.trim() == COMPLETED_STATUS
}

fn failed(path: &Path, reason: &str) -> Error {
    Error::TransferFailed {
        path: path.to_owned(),
        reason: reason.to_owned(),
    }
}
