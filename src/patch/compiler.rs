//! Candidate compilation.
//!
//! The engine never compiles source itself. It hands the changed files of a module to a
//! [`CompilerService`] and loads whatever image comes back. [`ProcessCompiler`] drives an
//! external compiler executable with a fixed timeout:
//!
//! ```text
//! <path> <args...> --out <dir>/<module>.dpmod [--define D]... [--reference R]... [--debug] <files...>
//! ```
//!
//! The output must already be a `.dpmod` image; PE assemblies are not read.
//!
//! A non-zero exit status, a missing output file or an expired timeout fail the cycle with
//! [`Error::CompileFailure`].

use std::{
    io::Read,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    metadata::cache::{MODULE_EXTENSION, SYMBOLS_EXTENSION},
    patch::config::CompilerConfig,
    Error, Result,
};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// What to compile.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompileOptions {
    /// Module (and output file) name
    pub module: String,
    /// Source files
    pub files: Vec<PathBuf>,
    /// Referenced module images
    pub references: Vec<PathBuf>,
    /// Preprocessor defines
    pub defines: Vec<String>,
    /// Emit debug symbols
    pub debug_symbols: bool,
}

/// What the compiler produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
    /// The compiled image
    pub module: PathBuf,
    /// Its symbol file, if one was written
    pub symbols: Option<PathBuf>,
    /// Warning lines printed by the compiler
    pub diagnostics: Vec<String>,
}

/// Narrow interface to whatever turns sources into a module image.
pub trait CompilerService {
    /// Directory subsequent compilations write to.
    fn set_output_directory(&mut self, dir: &Path);

    /// Compile one module.
    ///
    /// # Errors
    /// Returns [`Error::CompileFailure`] if no image was produced.
    fn compile(&mut self, options: &CompileOptions) -> Result<CompileOutput>;
}

/// Runs an external compiler executable.
#[derive(Debug, Clone)]
pub struct ProcessCompiler {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    output_dir: PathBuf,
}

impl ProcessCompiler {
    /// Compiler for `program`, writing to the current directory until told otherwise.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        ProcessCompiler {
            program: program.into(),
            args,
            timeout,
            output_dir: PathBuf::from("."),
        }
    }

    /// Compiler described by a configuration section.
    #[must_use]
    pub fn from_config(config: &CompilerConfig) -> Self {
        Self::new(config.path.clone(), config.args.clone(), config.timeout())
    }

    /// Output path for `module`.
    #[must_use]
    pub fn output_path(&self, module: &str) -> PathBuf {
        self.output_dir.join(format!("{module}.{MODULE_EXTENSION}"))
    }

    /// The full argument list for `options`.
    #[must_use]
    pub fn command_line(&self, options: &CompileOptions) -> Vec<String> {
        let mut line = self.args.clone();
        line.push("--out".to_string());
        line.push(self.output_path(&options.module).display().to_string());
        for define in &options.defines {
            line.push("--define".to_string());
            line.push(define.clone());
        }
        for reference in &options.references {
            line.push("--reference".to_string());
            line.push(reference.display().to_string());
        }
        if options.debug_symbols {
            line.push("--debug".to_string());
        }
        line.extend(options.files.iter().map(|file| file.display().to_string()));
        line
    }

    fn failure(options: &CompileOptions, message: impl Into<String>) -> Error {
        Error::CompileFailure {
            module: options.module.clone(),
            message: message.into(),
        }
    }
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut text = String::new();
        if let Some(mut stream) = stream {
            let mut bytes = Vec::new();
            if stream.read_to_end(&mut bytes).is_ok() {
                text = String::from_utf8_lossy(&bytes).into_owned();
            }
        }
        text
    })
}

/// Wait for `child`, killing it once `timeout` expires. Returns `None` on timeout.
fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            // The child may exit between the check and the kill
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

impl CompilerService for ProcessCompiler {
    fn set_output_directory(&mut self, dir: &Path) {
        self.output_dir = dir.to_path_buf();
    }

    fn compile(&mut self, options: &CompileOptions) -> Result<CompileOutput> {
        std::fs::create_dir_all(&self.output_dir)?;
        let output = self.output_path(&options.module);
        // A stale image from an earlier cycle must not pass for a fresh one
        if output.exists() {
            std::fs::remove_file(&output)?;
        }

        log::info!(
            "Compiling {} ({} files) with {}",
            options.module,
            options.files.len(),
            self.program.display()
        );

        let mut child = Command::new(&self.program)
            .args(self.command_line(options))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Self::failure(
                    options,
                    format!("failed to start {} - {e}", self.program.display()),
                )
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let status = wait_with_timeout(&mut child, self.timeout)
            .map_err(|e| Self::failure(options, format!("failed to wait for the compiler - {e}")))?;
        // On timeout the readers are left behind; a surviving grandchild may hold the pipes
        let Some(status) = status else {
            return Err(Self::failure(
                options,
                format!("timed out after {}s", self.timeout.as_secs()),
            ));
        };
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if !status.success() {
            let combined = if !stdout.is_empty() && !stderr.is_empty() {
                format!("stdout: {}\nstderr: {}", stdout.trim(), stderr.trim())
            } else if !stdout.is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(Self::failure(options, format!("{status}: {combined}")));
        }

        if !output.is_file() {
            return Err(Self::failure(
                options,
                format!("compiler succeeded but {} is missing", output.display()),
            ));
        }

        let diagnostics: Vec<String> = stdout
            .lines()
            .chain(stderr.lines())
            .filter(|line| line.contains("warning"))
            .map(ToString::to_string)
            .collect();
        for line in &diagnostics {
            log::warn!("{}", line);
        }

        let symbols = output.with_extension(SYMBOLS_EXTENSION);
        Ok(CompileOutput {
            symbols: symbols.is_file().then_some(symbols),
            module: output,
            diagnostics,
        })
    }
}
