use crate::config::{StoreArgs, StoreSettings};
use anyhow::bail;
use clap::Parser;
use relatedness::{
    CommandComparator, CoordinatorConfig, DEFAULT_MAX_STORED_DISTANCE, Job, SampleDescriptor,
    Species,
};
use std::path::PathBuf;

/// Runtime configuration for the `relatedness-worker` binary.
///
/// A worker either processes one sample (`--guid`, `--path`) or drains the
/// species' batch (`--drain-batch`). Either way it first takes a lease from
/// the shared queue and releases it before exiting.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "relatedness-worker",
    version,
    about = "Runs samples through the comparator under the shared lease queue"
)]
pub struct CliArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Tenant whose queue, batch and distances are used.
    ///
    /// Environment variable: `SPECIES`
    #[arg(long, env = "SPECIES")]
    pub species: String,

    /// Comparator program. Receives one tab-separated descriptor per line on
    /// stdin and prints `a b dist` lines on stdout.
    ///
    /// Environment variable: `COMPARATOR`
    #[arg(long, env = "COMPARATOR")]
    pub comparator: PathBuf,

    /// Extra argument passed to the comparator. Repeatable.
    #[arg(long = "comparator-arg", allow_hyphen_values = true)]
    pub comparator_args: Vec<String>,

    /// Sample to process.
    #[arg(long, conflicts_with = "drain_batch")]
    pub guid: Option<String>,

    /// Sequence file of `--guid`.
    #[arg(long, conflicts_with = "drain_batch")]
    pub path: Option<PathBuf>,

    /// Reference the samples were called against.
    ///
    /// Environment variable: `REFERENCE`
    #[arg(long, env = "REFERENCE")]
    pub reference: PathBuf,

    /// Optional mask of positions to ignore.
    ///
    /// Environment variable: `MASK`
    #[arg(long, env = "MASK")]
    pub mask: Option<PathBuf>,

    /// Process every batched sample instead of a single one.
    #[arg(long, default_value_t = false)]
    pub drain_batch: bool,

    /// Directory holding `<guid>.fasta` for batched samples.
    ///
    /// Environment variable: `SAMPLES_DIR`
    #[arg(long, env = "SAMPLES_DIR")]
    pub samples_dir: Option<PathBuf>,

    /// Distances above this are not stored; they still update nearest
    /// neighbours.
    ///
    /// Environment variable: `MAX_STORED_DISTANCE`
    #[arg(long, env = "MAX_STORED_DISTANCE", default_value_t = DEFAULT_MAX_STORED_DISTANCE)]
    pub max_stored_distance: i64,

    /// Store every distance regardless of `--max-stored-distance`.
    #[arg(long, default_value_t = false)]
    pub no_distance_cutoff: bool,
}

/// Where batched samples' files live.
#[derive(Debug, Clone)]
pub struct DrainSource {
    pub samples_dir: PathBuf,
    pub reference: PathBuf,
    pub mask: Option<PathBuf>,
}

impl DrainSource {
    pub fn describe(&self, guid: &str) -> SampleDescriptor {
        SampleDescriptor {
            guid: guid.to_string(),
            path: self.samples_dir.join(format!("{guid}.fasta")),
            reference: self.reference.clone(),
            mask: self.mask.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum WorkerMode {
    Single(Job),
    Drain(DrainSource),
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub settings: StoreSettings,
    pub species: Species,
    pub comparator: PathBuf,
    pub comparator_args: Vec<String>,
    pub coordinator: CoordinatorConfig,
    pub mode: WorkerMode,
}

impl WorkerConfig {
    pub fn comparator(&self) -> CommandComparator {
        CommandComparator::new(&self.comparator).args(&self.comparator_args)
    }
}

impl TryFrom<CliArgs> for WorkerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let species = Species::new(args.species)?;

        if args.max_stored_distance < 0 {
            bail!(
                "MAX_STORED_DISTANCE ({}) must not be negative",
                args.max_stored_distance
            );
        }
        let max_stored_distance = if args.no_distance_cutoff {
            None
        } else {
            Some(args.max_stored_distance)
        };

        let mode = if args.drain_batch {
            let Some(samples_dir) = args.samples_dir else {
                bail!("--drain-batch requires SAMPLES_DIR");
            };
            WorkerMode::Drain(DrainSource {
                samples_dir,
                reference: args.reference,
                mask: args.mask,
            })
        } else {
            let (Some(guid), Some(path)) = (args.guid, args.path) else {
                bail!("--guid and --path are required unless --drain-batch is set");
            };
            relatedness::validate_guid(&guid)?;
            WorkerMode::Single(Job {
                samples: vec![SampleDescriptor {
                    guid: guid.clone(),
                    path,
                    reference: args.reference,
                    mask: args.mask,
                }],
                guid,
            })
        };

        Ok(Self {
            settings: StoreSettings::try_from(args.store)?,
            species,
            comparator: args.comparator,
            comparator_args: args.comparator_args,
            coordinator: CoordinatorConfig {
                max_stored_distance,
            },
            mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> anyhow::Result<WorkerConfig> {
        let base = [
            "relatedness-worker",
            "--species",
            "tb",
            "--comparator",
            "fast-snp",
            "--reference",
            "ref.fasta",
        ];
        let args = CliArgs::try_parse_from(base.iter().chain(extra.iter()).copied())?;
        WorkerConfig::try_from(args)
    }

    #[test]
    fn single_sample_builds_a_job() {
        let config = parse(&["--guid", "s1", "--path", "s1.fasta"]).unwrap();
        let WorkerMode::Single(job) = config.mode else {
            panic!("expected a single-sample run");
        };
        assert_eq!(job.guid, "s1");
        assert_eq!(job.samples[0].reference, PathBuf::from("ref.fasta"));
        assert_eq!(config.coordinator.max_stored_distance, Some(20));
    }

    #[test]
    fn single_sample_needs_guid_and_path() {
        assert!(parse(&["--guid", "s1"]).is_err());
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn drain_needs_samples_dir() {
        assert!(parse(&["--drain-batch"]).is_err());

        let config = parse(&["--drain-batch", "--samples-dir", "/data"]).unwrap();
        let WorkerMode::Drain(source) = config.mode else {
            panic!("expected a drain");
        };
        assert_eq!(source.describe("s7").path, PathBuf::from("/data/s7.fasta"));
    }

    #[test]
    fn cutoff_can_be_disabled() {
        let config = parse(&["--guid", "s1", "--path", "p", "--no-distance-cutoff"]).unwrap();
        assert_eq!(config.coordinator.max_stored_distance, None);
    }
}
