use crate::error::{EnvError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// A program plus its argument vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, arg: &Path) -> Self {
        self.arg(arg.to_string_lossy().into_owned())
    }

    /// File name of the program (`conda`, `mamba`, `bash`, ...)
    pub fn program_name(&self) -> &str {
        self.program
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Seam between the provisioner and the package-manager binaries
pub trait CommandRunner {
    /// Run to completion showing progress; stderr is only surfaced when the
    /// command fails.
    fn run(&self, invocation: &Invocation) -> Result<()>;

    /// Run to completion and return stdout
    fn output(&self, invocation: &Invocation) -> Result<String>;
}

/// Runs commands as child processes, echoing each stdout line as a
/// transient spinner message.
///
/// There is no timeout: a child that never exits blocks the caller.
#[derive(Debug, Default, Clone)]
pub struct StreamingRunner {
    quiet: bool,
}

impl StreamingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppress the spinner (progress lines still go to the debug log)
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    fn spinner(&self, invocation: &Invocation) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {prefix}: {wide_msg}") {
            bar.set_style(style);
        }
        bar.set_prefix(invocation.program_name().to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    }
}

impl CommandRunner for StreamingRunner {
    fn run(&self, invocation: &Invocation) -> Result<()> {
        log::debug!("running {invocation}");
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EnvError::SpawnFailed {
                command: invocation.to_string(),
                source,
            })?;

        // drained on its own thread so a chatty stderr cannot fill the pipe
        // while stdout is being read
        let stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf);
                buf
            })
        });

        let spinner = self.spinner(invocation);
        if let Some(stdout) = child.stdout.take() {
            // read to EOF no matter what: closing the pipe early would kill
            // the child with SIGPIPE
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        let line = line.trim();
                        if !line.is_empty() {
                            log::trace!("{}: {line}", invocation.program_name());
                            spinner.set_message(line.to_string());
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        log::debug!("stopped reading {}: {e}", invocation.program_name());
                        break;
                    }
                }
            }
        }
        spinner.finish_and_clear();

        let status = child.wait()?;
        let stderr = stderr
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            Err(EnvError::CommandFailed {
                command: invocation.to_string(),
                code: status.code(),
                stderr,
            })
        }
    }

    fn output(&self, invocation: &Invocation) -> Result<String> {
        log::debug!("running {invocation}");
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| EnvError::SpawnFailed {
                command: invocation.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(EnvError::CommandFailed {
                command: invocation.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
