//! The debug session: instrument, build, launch, decode, restore.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{ChildStdout, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::codegen::{self, Instrumented, SYNC_MARKER};
use crate::diagnostic::render_diagnostics;
use crate::error::DebugError;
use crate::syntax;
use crate::value::Variable;

/// One configured debug run against a kernel file and the host
/// application that launches it.
pub struct DebugSession {
    kernel: PathBuf,
    binary: PathBuf,
    build_cmd: Option<String>,
    timeout: Duration,
}

impl DebugSession {
    pub fn new(kernel: impl Into<PathBuf>, binary: impl Into<PathBuf>) -> Self {
        Self {
            kernel: kernel.into(),
            binary: binary.into(),
            build_cmd: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Shell command run before launching, e.g. `make`.
    pub fn with_build_command(mut self, cmd: impl Into<String>) -> Self {
        self.build_cmd = Some(cmd.into());
        self
    }

    /// Overall deadline covering the build and every output read.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Instrument the kernel at `break_line`, run the application, and
    /// decode one [`Variable`] per (thread, declaration) pair, threads
    /// in caller order outermost. The kernel file is restored on every
    /// return path once it has been touched.
    pub async fn run(
        &self,
        break_line: u32,
        threads: &[u64],
    ) -> Result<Vec<Variable>, DebugError> {
        let source = std::fs::read_to_string(&self.kernel)?;
        let tree = syntax::scan(&source).map_err(|diags| {
            render_diagnostics(&diags, &self.kernel.to_string_lossy(), &source);
            DebugError::Scan(format!("{} kernel scanner error(s)", diags.len()))
        })?;

        // scope and type errors abort before the kernel file is touched
        let inst = codegen::instrument(&source, &tree, break_line, threads)?;
        info!(
            kernel = %self.kernel.display(),
            line = break_line,
            decls = inst.decls.len(),
            "kernel instrumented"
        );

        let _guard = RestoreGuard::install(&self.kernel, &source)?;
        std::fs::write(&self.kernel, &inst.source)?;
        // side copy for inspection; it survives the session
        std::fs::write(sibling(&self.kernel, "instrumented"), &inst.source)?;

        let deadline = Instant::now() + self.timeout;

        if let Some(cmd) = &self.build_cmd {
            self.build(cmd, deadline).await?;
        }

        if !self.binary.is_file() {
            return Err(DebugError::BinaryNotFound(self.binary.clone()));
        }

        self.capture(&inst, threads, deadline).await
    }

    async fn build(&self, cmd: &str, deadline: Instant) -> Result<(), DebugError> {
        let dir = self.workdir();
        debug!(cmd, dir = %dir.display(), "running build command");
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(cmd)
            .current_dir(&dir)
            .env("PATH", path_env(&dir))
            .stdin(Stdio::null());
        let output = match tokio::time::timeout_at(deadline, command.output()).await {
            Ok(res) => res.map_err(|e| DebugError::BuildFailed(e.to_string()))?,
            Err(_) => return Err(DebugError::Timeout(self.timeout)),
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DebugError::BuildFailed(format!(
                "exit {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn capture(
        &self,
        inst: &Instrumented,
        threads: &[u64],
        deadline: Instant,
    ) -> Result<Vec<Variable>, DebugError> {
        let dir = self.workdir();
        let binary = self.binary.canonicalize()?;
        // the shell merges stderr so build-system chatter and kernel
        // printf output arrive on one stream, in emission order
        let cmd = format!("exec \"{}\" 2>&1", binary.display());
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&cmd)
            .current_dir(&dir)
            .env("PATH", path_env(&dir))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("child stdout not captured"))?;
        let mut lines = BufReader::new(stdout).lines();

        // skip application output until the sync marker
        loop {
            match self.next_line(&mut lines, deadline).await? {
                None => return Err(DebugError::NoDebugData),
                Some(line) if line.trim() == SYNC_MARKER => break,
                Some(line) => debug!(line = %line, "application output"),
            }
        }

        let mut vars = Vec::with_capacity(threads.len() * inst.decls.len());
        for &gid in threads {
            for decl in &inst.decls {
                let line = loop {
                    match self.next_line(&mut lines, deadline).await? {
                        None => return Err(DebugError::NoDebugData),
                        Some(line) if line.trim().is_empty() => continue,
                        Some(line) => break line,
                    }
                };
                vars.push(Variable::decode(decl, &line, Some(gid), &inst.catalog)?);
            }
        }
        info!(count = vars.len(), "variables decoded");

        if let Err(err) = child.kill().await {
            warn!(error = %err, "failed to stop the application");
        }
        Ok(vars)
    }

    async fn next_line(
        &self,
        lines: &mut Lines<BufReader<ChildStdout>>,
        deadline: Instant,
    ) -> Result<Option<String>, DebugError> {
        match tokio::time::timeout_at(deadline, lines.next_line()).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(DebugError::Timeout(self.timeout)),
        }
    }

    /// Both the build and the application run from the binary's
    /// directory, with that directory prepended to `PATH`.
    fn workdir(&self) -> PathBuf {
        match self.binary.parent() {
            Some(p) if p.as_os_str().is_empty() => PathBuf::from("."),
            Some(p) => p.to_path_buf(),
            None => PathBuf::from("."),
        }
    }
}

fn path_env(dir: &Path) -> std::ffi::OsString {
    let mut paths = vec![dir.to_path_buf()];
    if let Some(existing) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths).unwrap_or_else(|_| dir.as_os_str().to_os_string())
}

/// `<kernel>.<suffix>` next to the kernel file.
fn sibling(kernel: &Path, suffix: &str) -> PathBuf {
    let mut name = kernel.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Writes the original kernel bytes to a backup file on creation and
/// puts them back on drop, whatever path the session took.
struct RestoreGuard {
    kernel: PathBuf,
    backup: PathBuf,
}

impl RestoreGuard {
    fn install(kernel: &Path, source: &str) -> Result<Self, DebugError> {
        let backup = sibling(kernel, "probe-backup");
        std::fs::write(&backup, source)?;
        Ok(Self {
            kernel: kernel.to_path_buf(),
            backup,
        })
    }
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        match std::fs::read(&self.backup) {
            Ok(original) => {
                if let Err(err) = std::fs::write(&self.kernel, original) {
                    warn!(
                        kernel = %self.kernel.display(),
                        backup = %self.backup.display(),
                        error = %err,
                        "failed to restore the kernel file"
                    );
                    return;
                }
                if let Err(err) = std::fs::remove_file(&self.backup) {
                    warn!(backup = %self.backup.display(), error = %err, "failed to remove backup");
                }
            }
            Err(err) => warn!(
                backup = %self.backup.display(),
                error = %err,
                "backup unreadable, kernel left as-is"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_appends_to_the_full_name() {
        assert_eq!(
            sibling(Path::new("/tmp/k.cl"), "probe-backup"),
            PathBuf::from("/tmp/k.cl.probe-backup")
        );
    }

    #[test]
    fn restore_guard_puts_bytes_back() {
        let dir = tempfile::tempdir().unwrap();
        let kernel = dir.path().join("k.cl");
        std::fs::write(&kernel, "original").unwrap();
        {
            let _guard = RestoreGuard::install(&kernel, "original").unwrap();
            std::fs::write(&kernel, "instrumented").unwrap();
        }
        assert_eq!(std::fs::read_to_string(&kernel).unwrap(), "original");
        assert!(!kernel.with_extension("cl.probe-backup").exists());
    }
}
