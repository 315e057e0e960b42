//! Boundary to the external distance comparator.
//!
//! The comparator is opaque: it receives sample descriptors and returns
//! `(a, b, dist)` triples, orphan records and QC-failure markers. It may run
//! for a long time and no timeout is imposed on it.

use crate::{Comparison, Error, parse_comparisons};
use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

/// Everything the comparator needs to locate one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleDescriptor {
    pub guid: String,
    /// Sequence file of the sample.
    pub path: PathBuf,
    /// Reference the sample was called against.
    pub reference: PathBuf,
    /// Optional mask of positions to ignore.
    pub mask: Option<PathBuf>,
}

impl SampleDescriptor {
    /// The tab-separated line written to the comparator's stdin. A missing
    /// mask is an empty last field.
    pub fn to_line(&self) -> String {
        let mask = self
            .mask
            .as_ref()
            .map(|m| m.display().to_string())
            .unwrap_or_default();
        format!(
            "{}\t{}\t{}\t{}",
            self.guid,
            self.path.display(),
            self.reference.display(),
            mask
        )
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ComparatorError {
    /// The comparator process could not be started.
    #[error("failed to start comparator {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Talking to the running process failed.
    #[error("comparator I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The process exited unsuccessfully.
    #[error("comparator exited with {status}: {stderr}")]
    Exit { status: ExitStatus, stderr: String },

    /// The process succeeded but its output could not be parsed.
    #[error("unparseable comparator output on line {line}: {reason}")]
    Output { line: usize, reason: String },
}

/// Computes distances for a set of samples.
pub trait Comparator {
    fn compare(&self, samples: &[SampleDescriptor]) -> Result<Vec<Comparison>, ComparatorError>;
}

/// Runs an external program as the comparator.
///
/// Descriptors are written to the child's stdin, one [`SampleDescriptor::to_line`]
/// per line. The child prints comparison lines on stdout in the format read by
/// [`parse_comparisons`]. Standard error is captured and reported on failure.
#[derive(Debug, Clone)]
pub struct CommandComparator {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandComparator {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl Comparator for CommandComparator {
    fn compare(&self, samples: &[SampleDescriptor]) -> Result<Vec<Comparison>, ComparatorError> {
        let program = self.program.to_string_lossy().into_owned();
        tracing::info!(%program, samples = samples.len(), "starting comparator");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ComparatorError::Spawn {
                program: program.clone(),
                source,
            })?;

        let input: String = samples
            .iter()
            .map(|s| s.to_line() + "\n")
            .collect();
        let stdin = child.stdin.take();

        // Feed stdin from a second thread so a child that writes before it
        // has read everything cannot deadlock against us.
        let output = std::thread::scope(|s| {
            let writer = s.spawn(move || -> std::io::Result<()> {
                if let Some(mut stdin) = stdin {
                    match stdin.write_all(input.as_bytes()) {
                        // The child may legitimately exit without reading.
                        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                        other => other?,
                    }
                }
                Ok(())
            });
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")));
            written.and(output)
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::warn!(%program, status = %output.status, "comparator failed");
            return Err(ComparatorError::Exit {
                status: output.status,
                stderr,
            });
        }

        let stdout = String::from_utf8(output.stdout).map_err(|e| ComparatorError::Output {
            line: 0,
            reason: e.to_string(),
        })?;
        let comparisons = parse_comparisons(&stdout).map_err(|e| match e {
            Error::MalformedRecord { line, reason } => ComparatorError::Output { line, reason },
            other => ComparatorError::Output {
                line: 0,
                reason: other.to_string(),
            },
        })?;
        tracing::info!(%program, comparisons = comparisons.len(), "comparator finished");
        Ok(comparisons)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sample(guid: &str, mask: Option<&str>) -> SampleDescriptor {
        SampleDescriptor {
            guid: guid.to_string(),
            path: PathBuf::from(format!("/data/{guid}.fasta")),
            reference: PathBuf::from("/ref/h37rv.fasta"),
            mask: mask.map(PathBuf::from),
        }
    }

    fn shell(script: &str) -> CommandComparator {
        CommandComparator::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn descriptor_line_has_empty_mask_field() {
        assert_eq!(
            sample("s1", None).to_line(),
            "s1\t/data/s1.fasta\t/ref/h37rv.fasta\t"
        );
        assert!(sample("s1", Some("/ref/mask.bed")).to_line().ends_with("\t/ref/mask.bed"));
    }

    #[test]
    fn parses_stdout() {
        let comparator = shell("cat > /dev/null; printf 's1 s2 3\\n||QC_FAIL: s3||\\n'");

        let out = comparator.compare(&[sample("s1", None)]).unwrap();

        assert_eq!(out, vec![Comparison::new("s1", "s2", 3), Comparison::qc_fail("s3")]);
    }

    #[test]
    fn receives_descriptors_on_stdin() {
        // Echo the guid column back as orphan records.
        let comparator = shell("cut -f1 | while read g; do echo \"$g $g -1\"; done");

        let out = comparator
            .compare(&[sample("a", None), sample("b", Some("/m"))])
            .unwrap();

        assert_eq!(out, vec![Comparison::orphan("a"), Comparison::orphan("b")]);
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let err = shell("echo boom >&2; exit 3").compare(&[]).unwrap_err();
        match err {
            ComparatorError::Exit { status, stderr } => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn garbage_output_is_an_error() {
        let err = shell("echo 'not a record'").compare(&[]).unwrap_err();
        assert!(matches!(err, ComparatorError::Output { line: 1, .. }));
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let err = CommandComparator::new("/nonexistent/comparator")
            .compare(&[])
            .unwrap_err();
        assert!(matches!(err, ComparatorError::Spawn { .. }));
    }
}
