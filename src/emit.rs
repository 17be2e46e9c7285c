use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{ProbeError, Result};
use crate::stats::Emission;

/// Appends one `"<mean>, <min>\n"` line per flushed window.
pub struct Emitter<W: Write> {
    out: W,
    path: PathBuf,
    lines: usize,
}

impl Emitter<File> {
    /// Creates or truncates `path` (rw-r--r--) and opens it for appending.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        // std refuses append(true) together with truncate(true); O_APPEND is set directly.
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .custom_flags(libc::O_APPEND)
            .mode(0o644)
            .open(path)
            .map_err(|source| ProbeError::Open { path: path.to_path_buf(), source })?;
        Ok(Self::new(file, path))
    }
}

impl<W: Write> Emitter<W> {
    pub fn new(out: W, path: impl Into<PathBuf>) -> Self {
        Self { out, path: path.into(), lines: 0 }
    }

    pub fn emit(&mut self, e: &Emission) -> Result<()> {
        let line = format_line(e);
        self.out
            .write_all(line.as_bytes())
            .map_err(|source| ProbeError::Output { path: self.path.clone(), source })?;
        self.lines += 1;
        debug!("{}: {}", self.path.display(), line.trim_end());
        Ok(())
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

pub fn format_line(e: &Emission) -> String {
    format!("{:.2}, {:.2}\n", e.mean_ns, e.min_ns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_decimals_comma_space_newline() {
        let line = format_line(&Emission { mean_ns: 20.0, min_ns: 10.0 });
        assert_eq!(line, "20.00, 10.00\n");
        let line = format_line(&Emission { mean_ns: 53.0 / 3.0, min_ns: 0.3456 });
        assert_eq!(line, "17.67, 0.35\n");
    }

    #[test]
    fn lines_accumulate_in_order() {
        let mut em = Emitter::new(Vec::new(), "mem");
        em.emit(&Emission { mean_ns: 1.0, min_ns: 0.5 }).unwrap();
        em.emit(&Emission { mean_ns: 2.25, min_ns: 0.5 }).unwrap();
        assert_eq!(em.lines(), 2);
        assert_eq!(String::from_utf8(em.into_inner()).unwrap(), "1.00, 0.50\n2.25, 0.50\n");
    }

    #[test]
    fn create_truncates_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out1");
        std::fs::write(&path, "stale contents from an earlier run\n").unwrap();

        let mut em = Emitter::create(&path).unwrap();
        em.emit(&Emission { mean_ns: 3.0, min_ns: 1.0 }).unwrap();
        em.emit(&Emission { mean_ns: 4.0, min_ns: 1.0 }).unwrap();
        drop(em);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "3.00, 1.00\n4.00, 1.00\n");
    }

    #[test]
    fn create_sets_append_mode_and_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out2");
        let mut em = Emitter::create(&path).unwrap();
        em.emit(&Emission { mean_ns: 5.0, min_ns: 2.0 }).unwrap();

        // A second handle writing to the same file must not be overwritten.
        let mut other = OpenOptions::new().append(true).open(&path).unwrap();
        other.write_all(b"x\n").unwrap();
        em.emit(&Emission { mean_ns: 6.0, min_ns: 2.0 }).unwrap();
        drop(em);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "5.00, 2.00\nx\n6.00, 2.00\n");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777 & !0o644, 0);
        assert_eq!(mode & 0o600, 0o600);
    }

    #[test]
    fn create_reports_the_path_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("out");
        let err = Emitter::create(&path).err().unwrap();
        assert!(err.to_string().starts_with("open "));
        assert!(err.to_string().contains("no-such-dir"));
    }
}
