//! EPUB to AZW3 conversion through Calibre's `ebook-convert`.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::error::{Error, Result};

/// How long a single conversion may run before the converter is killed.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const EXECUTABLE: &str = "ebook-convert";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Install locations tried when `ebook-convert` is not on `PATH`.
const KNOWN_LOCATIONS: &[&str] = &[
    r"C:\Program Files\Calibre2\ebook-convert.exe",
    r"C:\Program Files (x86)\Calibre2\ebook-convert.exe",
    "/Applications/calibre.app/Contents/MacOS/ebook-convert",
    "/opt/calibre/ebook-convert",
];

/// Outcome of a conversion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conversion {
    /// Path of the converted file.
    Converted(PathBuf),
    /// No converter is installed; the caller should keep the original.
    Unavailable,
}

/// Handle on the external converter.
#[derive(Debug, Clone)]
pub struct Converter {
    executable: Option<PathBuf>,
    timeout: Duration,
}

impl Converter {
    /// Find `ebook-convert` on `PATH`, then in the usual install locations.
    pub fn locate() -> Self {
        let candidates: Vec<PathBuf> = KNOWN_LOCATIONS.iter().map(PathBuf::from).collect();
        Self::locate_in(&candidates)
    }

    /// Like [`Converter::locate`] with a custom list of fallback locations.
    pub fn locate_in(candidates: &[PathBuf]) -> Self {
        let executable = which::which(EXECUTABLE)
            .ok()
            .or_else(|| candidates.iter().find(|path| path.is_file()).cloned());
        match &executable {
            Some(path) => debug!("Using converter {}", path.display()),
            None => debug!("No {} found", EXECUTABLE),
        }
        Self {
            executable,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_executable<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            executable: Some(path.into()),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// A converter that never converts.
    pub fn unavailable() -> Self {
        Self {
            executable: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_available(&self) -> bool {
        self.executable.is_some()
    }

    pub fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    /// Convert `input` to `<stem>.azw3` in the same directory.
    pub fn convert<P: AsRef<Path>>(&self, input: P) -> Result<Conversion> {
        let input = input.as_ref();
        self.convert_to(input, &input.with_extension("azw3"))
    }

    /// Convert `input` to `output`; the output format follows its extension.
    pub fn convert_to(&self, input: &Path, output: &Path) -> Result<Conversion> {
        let Some(executable) = &self.executable else {
            return Ok(Conversion::Unavailable);
        };

        info!("Converting {} to {}", input.display(), output.display());

        let mut stderr = tempfile::tempfile()?;
        let mut child = Command::new(executable)
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr.try_clone()?)
            .spawn()?;

        let start = Instant::now();
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if start.elapsed() > self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::ConversionTimedOut(self.timeout));
                }
                None => std::thread::sleep(POLL_INTERVAL),
            }
        };

        if !status.success() {
            let mut message = String::new();
            stderr.seek(SeekFrom::Start(0))?;
            stderr.read_to_string(&mut message)?;
            let message = message.trim();
            return Err(Error::Conversion(if message.is_empty() {
                status.to_string()
            } else {
                message.to_string()
            }));
        }

        if !output.is_file() {
            return Err(Error::Conversion("converter produced no output file".into()));
        }

        Ok(Conversion::Converted(output.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_converter() {
        let converter = Converter::unavailable();
        assert!(!converter.is_available());
        assert_eq!(
            converter.convert("book.epub").unwrap(),
            Conversion::Unavailable
        );
    }

    #[test]
    fn test_locate_in_uses_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("ebook-convert");
        std::fs::write(&fake, b"").unwrap();

        let converter = Converter::locate_in(&[dir.path().join("missing"), fake.clone()]);
        // A real install on PATH takes precedence
        assert!(converter.is_available());
        if which::which(EXECUTABLE).is_err() {
            assert_eq!(converter.executable(), Some(fake.as_path()));
        }
    }
}
