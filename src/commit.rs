//! Transactional output: name planning, backup, write and rollback.
//!
//! Before anything is written, the file that will be overwritten (the input
//! itself, or an existing output) is renamed to a `.bak` backup. If writing
//! fails, the partial output is removed and the backup is renamed back, so
//! the original bytes survive under their original name.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{ensure_invariant, Error, Result};
use crate::fsutil;
use crate::options::Options;
use crate::report::{Event, Reporter};
use crate::stream::{OutputSizes, WriteSeek};

/// The files involved in optimizing one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePlan {
    /// File being optimized.
    pub input: PathBuf,
    /// File that will hold the result; equals `input` when in place.
    pub output: PathBuf,
    /// Where the overwritten file is parked while writing.
    pub backup: PathBuf,
    /// The output is a different file from the input.
    pub new_output: bool,
}

impl FilePlan {
    /// Derive output and backup names for `input`.
    ///
    /// Inputs that are not PNG files get a `.png` extension; `out` replaces
    /// the name and `dir` relocates it. The backup name is derived even in
    /// simulation mode so that a name that is too long fails either way.
    pub fn new(input: &Path, is_png_file: bool, options: &Options) -> Result<Self> {
        let mut output = if is_png_file {
            None
        } else {
            Some(fsutil::change_extension(input, "png")?)
        };
        if let Some(out) = &options.out {
            output = Some(out.clone());
        }
        if let Some(dir) = &options.dir {
            let name = output.as_deref().unwrap_or(input);
            output = Some(fsutil::change_directory(name, dir)?);
        }
        let (output, new_output) = match output {
            Some(output) => {
                let new_output = !fsutil::same_file_name(input, &output);
                (output, new_output)
            }
            None => (input.to_path_buf(), false),
        };
        let backup = fsutil::backup_name(if new_output { &output } else { input })?;
        ensure_invariant!(backup != output, "Backup name equals output name");
        Ok(Self {
            input: input.to_path_buf(),
            output,
            backup,
            new_output,
        })
    }

    /// Check, before any trial runs, that the output can be moved aside.
    pub fn preflight(&self, keep: bool) -> Result<()> {
        if !fsutil::test_path(&self.output, "e") {
            return Ok(());
        }
        if self.new_output && !keep {
            return Err(Error::OutputExists);
        }
        if !fsutil::test_path(&self.output, "fw") || fsutil::test_path(&self.backup, "e") {
            return Err(Error::CannotBackupOutput);
        }
        Ok(())
    }

    /// Back up, write the output with `write`, and clean up.
    ///
    /// On a write failure the partial output is removed and the backup
    /// restored before the error is returned.
    pub fn commit<F>(&self, options: &Options, reporter: &mut dyn Reporter, write: F) -> Result<OutputSizes>
    where
        F: FnOnce(&mut dyn WriteSeek) -> Result<OutputSizes>,
    {
        let backed_up = self.make_backup(options, reporter)?;

        let sizes = match self.write_output(write) {
            Ok(sizes) => sizes,
            Err(err) => {
                self.rollback(backed_up, reporter);
                return Err(err);
            }
        };

        if options.preserve {
            let src = if self.new_output { &self.input } else { &self.backup };
            if let Err(err) = fsutil::copy_attributes(&self.output, src) {
                debug!("can't preserve attributes of {}: {err}", self.output.display());
            }
        }
        if !self.new_output && !options.keep {
            fs::remove_file(&self.backup).map_err(|source| Error::BackupNotRemoved {
                path: self.backup.clone(),
                source,
            })?;
        }
        Ok(sizes)
    }

    fn make_backup(&self, options: &Options, reporter: &mut dyn Reporter) -> Result<bool> {
        if !self.new_output {
            fs::rename(&self.input, &self.backup)
                .map_err(|source| Error::BackupFailed { what: "input", source })?;
            return Ok(true);
        }
        reporter.report(&Event::OutputFile { path: &self.output });
        if let Some(dir) = &options.dir {
            if let Err(err) = fsutil::make_dir(dir) {
                debug!("can't create {}: {err}", dir.display());
            }
        }
        if !fsutil::test_path(&self.output, "e") {
            return Ok(false);
        }
        fs::rename(&self.output, &self.backup)
            .map_err(|source| Error::BackupFailed { what: "output", source })?;
        Ok(true)
    }

    fn write_output<F>(&self, write: F) -> Result<OutputSizes>
    where
        F: FnOnce(&mut dyn WriteSeek) -> Result<OutputSizes>,
    {
        let file = File::create(&self.output)
            .map_err(|source| Error::file("Can't open the output file", &self.output, source))?;
        let mut sink = BufWriter::new(file);
        let sizes = write(&mut sink)?;
        sink.flush()?;
        let file = sink.into_inner().map_err(|err| Error::Io(err.into_error()))?;
        file.sync_all()?;
        Ok(sizes)
    }

    fn rollback(&self, backed_up: bool, reporter: &mut dyn Reporter) {
        let removed = match fs::remove_file(&self.output) {
            Ok(()) => true,
            Err(err) => err.kind() == std::io::ErrorKind::NotFound,
        };
        if !backed_up {
            return;
        }
        if !removed || fs::rename(&self.backup, &self.output).is_err() {
            reporter.report(&Event::RecoveryFailed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::RecordingReporter;

    fn plan(input: &Path, is_png_file: bool, options: &Options) -> FilePlan {
        FilePlan::new(input, is_png_file, options).unwrap()
    }

    fn write_bytes(bytes: &'static [u8]) -> impl FnOnce(&mut dyn WriteSeek) -> Result<OutputSizes> {
        move |sink| {
            sink.write_all(bytes)?;
            Ok(OutputSizes {
                file_size: bytes.len() as u64,
                ..OutputSizes::default()
            })
        }
    }

    #[test]
    fn test_plan_in_place() {
        let p = plan(Path::new("a/img.png"), true, &Options::default());
        assert_eq!(p.output, PathBuf::from("a/img.png"));
        assert_eq!(p.backup, PathBuf::from("a/img.png.bak"));
        assert!(!p.new_output);
    }

    #[test]
    fn test_plan_imported_gets_png_extension() {
        let p = plan(Path::new("img.ppm"), false, &Options::default());
        assert_eq!(p.output, PathBuf::from("img.png"));
        assert_eq!(p.backup, PathBuf::from("img.png.bak"));
        assert!(p.new_output);
    }

    #[test]
    fn test_plan_out_and_dir() {
        let options = Options {
            out: Some("b.png".into()),
            ..Options::default()
        };
        let p = plan(Path::new("a.png"), true, &options);
        assert_eq!(p.output, PathBuf::from("b.png"));
        assert!(p.new_output);

        let options = Options {
            dir: Some("out".into()),
            ..Options::default()
        };
        let p = plan(Path::new("in/a.pnm"), false, &options);
        assert_eq!(p.output, Path::new("out").join("a.png"));

        // `out` naming the input itself is in place.
        let options = Options {
            out: Some("a.png".into()),
            ..Options::default()
        };
        assert!(!plan(Path::new("a.png"), true, &options).new_output);
    }

    #[test]
    fn test_preflight() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.png");
        let output = dir.path().join("b.png");
        fs::write(&input, b"in").unwrap();
        let options = Options {
            out: Some(output.clone()),
            ..Options::default()
        };
        let p = plan(&input, true, &options);
        assert!(p.preflight(false).is_ok());

        fs::write(&output, b"old").unwrap();
        assert!(matches!(p.preflight(false), Err(Error::OutputExists)));
        assert!(p.preflight(true).is_ok());

        fs::write(&p.backup, b"bak").unwrap();
        assert!(matches!(p.preflight(true), Err(Error::CannotBackupOutput)));
    }

    #[test]
    fn test_preflight_in_place_stale_backup() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.png");
        fs::write(&input, b"in").unwrap();
        let p = plan(&input, true, &Options::default());
        assert!(p.preflight(false).is_ok());
        fs::write(&p.backup, b"stale").unwrap();
        assert!(matches!(p.preflight(false), Err(Error::CannotBackupOutput)));
    }

    #[test]
    fn test_commit_in_place_removes_backup() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.png");
        fs::write(&input, b"original").unwrap();
        let options = Options::default();
        let p = plan(&input, true, &options);
        let mut reporter = RecordingReporter::default();
        let sizes = p.commit(&options, &mut reporter, write_bytes(b"smaller")).unwrap();
        assert_eq!(sizes.file_size, 7);
        assert_eq!(fs::read(&input).unwrap(), b"smaller");
        assert!(!p.backup.exists());
    }

    #[test]
    fn test_commit_keep_retains_backup() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.png");
        fs::write(&input, b"original").unwrap();
        let options = Options {
            keep: true,
            ..Options::default()
        };
        let p = plan(&input, true, &options);
        p.commit(&options, &mut RecordingReporter::default(), write_bytes(b"new"))
            .unwrap();
        assert_eq!(fs::read(&p.backup).unwrap(), b"original");
        assert_eq!(fs::read(&input).unwrap(), b"new");
    }

    #[test]
    fn test_commit_failure_restores_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.png");
        fs::write(&input, b"original").unwrap();
        let options = Options::default();
        let p = plan(&input, true, &options);
        let mut reporter = RecordingReporter::default();
        let err = p
            .commit(&options, &mut reporter, |sink| {
                sink.write_all(b"partial")?;
                Err(Error::malformed("boom"))
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(fs::read(&input).unwrap(), b"original");
        assert!(!p.backup.exists());
        assert!(!reporter.contains("could not be recovered"));
    }

    #[test]
    fn test_commit_failure_without_backup_removes_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.pnm");
        fs::write(&input, b"P5 1 1 255\n\0").unwrap();
        let options = Options::default();
        let p = plan(&input, false, &options);
        let result = p.commit(&options, &mut RecordingReporter::default(), |_| {
            Err(Error::NoEncoding)
        });
        assert!(matches!(result, Err(Error::NoEncoding)));
        assert!(!p.output.exists());
        assert!(input.exists());
    }

    #[test]
    fn test_commit_new_output_backs_up_existing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.png");
        let output = dir.path().join("b.png");
        fs::write(&input, b"in").unwrap();
        fs::write(&output, b"old output").unwrap();
        let options = Options {
            out: Some(output.clone()),
            keep: true,
            ..Options::default()
        };
        let p = plan(&input, true, &options);
        let mut reporter = RecordingReporter::default();
        p.commit(&options, &mut reporter, write_bytes(b"fresh")).unwrap();
        assert!(reporter.contains("Output file:"));
        assert_eq!(fs::read(&output).unwrap(), b"fresh");
        assert_eq!(fs::read(&p.backup).unwrap(), b"old output");
        assert_eq!(fs::read(&input).unwrap(), b"in");
    }

    #[test]
    fn test_commit_creates_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.png");
        fs::write(&input, b"in").unwrap();
        let options = Options {
            dir: Some(dir.path().join("out/nested")),
            ..Options::default()
        };
        let p = plan(&input, true, &options);
        p.commit(&options, &mut RecordingReporter::default(), write_bytes(b"x"))
            .unwrap();
        assert_eq!(fs::read(dir.path().join("out/nested/a.png")).unwrap(), b"x");
    }
}
