// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Command-line options and the configuration they are layered with.
//!
//! Run-wide settings are resolved from, in increasing order of precedence:
//!
//!  - the built-in defaults,
//!  - an optional TOML file given with `--config`,
//!  - environment variables prefixed with `WSIM_` (e.g. `WSIM_REPEAT=10`),
//!  - the command line.
//!
//! The workload descriptors and the per-workload `-p`/`-s` settings only
//! come from the command line because their meaning depends on the order in
//! which they are given.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{ArgAction, ArgMatches, FromArgMatches, Parser};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use wsim_engine::device::{
    DEFAULT_GENERATION, DEFAULT_VIDEO_ENGINES, DeviceInfo, DriverVariant, MAX_VIDEO_ENGINES,
};
use wsim_engine::sim_error;
use wsim_engine::types::SimError;
use wsim_track::builder::{TrackerConfig, TrackersConfig};
use wsim_workload::context::SimConfig;

/// Prefix of the environment variables that override configuration values.
pub const ENV_PREFIX: &str = "WSIM_";

/// Command-line arguments and layered configuration.
#[derive(Parser, Debug, PartialEq, Serialize, Deserialize)]
#[command(
    name = "wsim",
    version,
    about = "Run GPU workload descriptors against a simulated driver"
)]
pub struct Config {
    /// Workload descriptor, inline or the name of a file containing one.
    /// Give several to run one client per workload.
    #[arg(short = 'w', long = "workload", value_name = "DESC")]
    #[serde(skip)]
    pub workloads: Vec<String>,

    /// Master workload. The other clients run in the background until it
    /// completes.
    #[arg(short = 'W', long, value_name = "DESC")]
    #[serde(skip)]
    pub master: Option<String>,

    /// Descriptor appended to every workload.
    #[arg(short = 'a', long, value_name = "DESC")]
    pub append: Option<String>,

    /// Context priority for the workloads that follow.
    #[arg(short = 'p', long, allow_negative_numbers = true)]
    #[serde(skip)]
    pub priority: Vec<i32>,

    /// Toggle single-slice SSEU configuration for the workloads that follow.
    #[arg(
        short = 's',
        long,
        action = ArgAction::Append,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    #[serde(skip)]
    pub sseu: Vec<bool>,

    /// Number of times each workload is run.
    #[arg(short = 'r', long)]
    pub repeat: Option<u64>,

    /// Number of clients running a clone of the workload.
    #[arg(short = 'c', long)]
    pub clients: Option<usize>,

    /// Seed of the random number generator. Defaults to the current time.
    #[arg(short = 'I', long)]
    pub seed: Option<u64>,

    /// Scale factor for batch durations.
    #[arg(short = 'f', long)]
    pub duration_scale: Option<f64>,

    /// Scale factor for delays.
    #[arg(short = 'F', long)]
    pub delay_scale: Option<f64>,

    /// Give every client the same random sequences.
    #[arg(short = 'S', long, num_args = 0..=1, default_missing_value = "true")]
    pub synced: Option<bool>,

    /// Wait for data dependencies before submitting rather than leaving the
    /// ordering to the driver.
    #[arg(short = 'd', long, num_args = 0..=1, default_missing_value = "true")]
    pub dep_sync: Option<bool>,

    /// Hardware generation of the simulated device.
    #[arg(long)]
    pub generation: Option<u32>,

    /// Kernel driver flavour of the simulated device (i915 or xe).
    #[arg(long)]
    pub variant: Option<DriverVariant>,

    /// Number of video engines on the simulated device.
    #[arg(long)]
    pub video_engines: Option<usize>,

    /// Only report errors.
    #[arg(short = 'q', long)]
    #[serde(skip)]
    pub quiet: bool,

    /// Increase verbosity. May be repeated.
    #[arg(short = 'v', long, action = ArgAction::Count)]
    #[serde(skip)]
    pub verbose: u8,

    /// Level of log messages to display when neither `-q` nor `-v` is given.
    #[arg(long)]
    pub log_level: Option<log::Level>,

    /// Regular expression for which entities log at the chosen level.
    /// Others only log errors.
    #[arg(long)]
    pub log_filter: Option<String>,

    /// Also write log messages to this file.
    #[arg(long)]
    pub log_file: Option<String>,

    /// TOML file providing configuration values.
    #[arg(long, value_name = "FILE")]
    #[serde(skip)]
    pub config: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workloads: Vec::new(),
            master: None,
            append: None,
            priority: Vec::new(),
            sseu: Vec::new(),
            repeat: Some(1),
            clients: Some(1),
            seed: None,
            duration_scale: Some(1.0),
            delay_scale: Some(1.0),
            synced: Some(false),
            dep_sync: Some(false),
            generation: Some(DEFAULT_GENERATION),
            variant: Some(DriverVariant::default()),
            video_engines: Some(DEFAULT_VIDEO_ENGINES),
            quiet: false,
            verbose: 0,
            log_level: Some(log::Level::Warn),
            log_filter: Some(String::new()),
            log_file: None,
            config: None,
        }
    }
}

/// A workload given on the command line with the settings in force at that
/// point.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkloadArg {
    /// Descriptor or file name, as given.
    pub descriptor: String,
    pub master: bool,
    pub priority: i32,
    pub sseu: bool,
}

enum ArgEvent<'a> {
    Priority(i32),
    ToggleSseu,
    Workload { descriptor: &'a str, master: bool },
}

/// Collect the workloads in command-line order, applying the `-p` and `-s`
/// options given before each.
#[must_use]
pub fn workload_args(matches: &ArgMatches) -> Vec<WorkloadArg> {
    let mut events: Vec<(usize, ArgEvent)> = Vec::new();

    if let (Some(indices), Some(values)) = (
        matches.indices_of("priority"),
        matches.get_many::<i32>("priority"),
    ) {
        events.extend(indices.zip(values).map(|(i, p)| (i, ArgEvent::Priority(*p))));
    }
    if let Some(indices) = matches.indices_of("sseu") {
        events.extend(indices.map(|i| (i, ArgEvent::ToggleSseu)));
    }
    for (id, master) in [("workloads", false), ("master", true)] {
        if let (Some(indices), Some(values)) =
            (matches.indices_of(id), matches.get_many::<String>(id))
        {
            events.extend(indices.zip(values).map(|(i, descriptor)| {
                (
                    i,
                    ArgEvent::Workload {
                        descriptor,
                        master,
                    },
                )
            }));
        }
    }
    events.sort_by_key(|(i, _)| *i);

    let mut priority = 0;
    let mut sseu = false;
    let mut workloads = Vec::new();
    for (_, event) in events {
        match event {
            ArgEvent::Priority(p) => priority = p,
            ArgEvent::ToggleSseu => sseu = !sseu,
            ArgEvent::Workload { descriptor, master } => workloads.push(WorkloadArg {
                descriptor: descriptor.to_string(),
                master,
                priority,
                sseu,
            }),
        }
    }
    workloads
}

fn check_conf_file(conf_file: &Path) -> Result<(), SimError> {
    if conf_file.is_dir() {
        return sim_error!(format!(
            "Configuration file '{}' is a directory!",
            conf_file.display()
        ));
    }
    if !conf_file.exists() {
        return sim_error!(format!(
            "Configuration file '{}' not found!",
            conf_file.display()
        ));
    }
    Ok(())
}

macro_rules! merge_if_some {
    ($config:ident, $cli:ident ; $($field:ident),+) => {
        $(
            if $cli.$field.is_some() {
                $config.$field = $cli.$field;
            }
        )+
    };
}

impl Config {
    /// Build the configuration from parsed command-line arguments.
    ///
    /// Returns the layered configuration and the workloads to run.
    pub fn from_matches(matches: &ArgMatches) -> Result<(Self, Vec<WorkloadArg>), SimError> {
        let cli = Self::from_arg_matches(matches).map_err(|e| SimError(e.to_string()))?;
        let workloads = workload_args(matches);
        Ok((Self::layered(cli)?, workloads))
    }

    /// Layer the command-line values over the file, environment and default
    /// values.
    pub fn layered(cli: Self) -> Result<Self, SimError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(conf_file) = &cli.config {
            check_conf_file(conf_file)?;
            figment = figment.merge(Toml::file(conf_file));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX));

        let mut config: Self = figment
            .extract()
            .map_err(|e| SimError(format!("Invalid configuration: {e}")))?;
        config.clap_merge(cli);
        Ok(config)
    }

    fn clap_merge(&mut self, cli: Self) {
        merge_if_some!(self, cli ;
            append, repeat, clients, seed, duration_scale, delay_scale, synced, dep_sync,
            generation, variant, video_engines, log_level, log_filter, log_file
        );
        self.workloads = cli.workloads;
        self.master = cli.master;
        self.priority = cli.priority;
        self.sseu = cli.sseu;
        self.quiet = cli.quiet;
        self.verbose = cli.verbose;
        self.config = cli.config;
    }

    #[must_use]
    pub fn repeat(&self) -> u64 {
        self.repeat.unwrap_or(1)
    }

    #[must_use]
    pub fn clients(&self) -> usize {
        self.clients.unwrap_or(1)
    }

    /// The configured seed, or one derived from the clock.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default()
        })
    }

    /// How much the binary prints: 0 with `-q`, 1 by default and one more
    /// for each `-v`.
    #[must_use]
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            self.verbose.saturating_add(1)
        }
    }

    /// Log level following `-q`/`-v`, or the configured level when neither
    /// is given.
    #[must_use]
    pub fn log_level(&self) -> log::Level {
        match (self.quiet, self.verbose) {
            (true, _) => log::Level::Error,
            (false, 0) => self.log_level.unwrap_or(log::Level::Warn),
            (false, 1) => log::Level::Info,
            (false, 2) => log::Level::Debug,
            (false, _) => log::Level::Trace,
        }
    }

    pub fn device(&self) -> Result<DeviceInfo, SimError> {
        let video_engines = self.video_engines.unwrap_or(DEFAULT_VIDEO_ENGINES);
        if video_engines == 0 || video_engines > MAX_VIDEO_ENGINES {
            return sim_error!(format!(
                "Invalid number of video engines {video_engines}!"
            ));
        }
        Ok(DeviceInfo::new(
            self.generation.unwrap_or(DEFAULT_GENERATION),
            self.variant.unwrap_or_default(),
            video_engines,
        ))
    }

    #[must_use]
    pub fn sim_config(&self, seed: u64) -> SimConfig {
        SimConfig {
            duration_scale: self.duration_scale.unwrap_or(1.0),
            delay_scale: self.delay_scale.unwrap_or(1.0),
            dep_sync: self.dep_sync.unwrap_or(false),
            synced_clients: self.synced.unwrap_or(false),
            seed,
        }
    }

    #[must_use]
    pub fn trackers_config(&self) -> TrackersConfig<'_> {
        let level = self.log_level();
        let filter_regex = self.log_filter.as_deref().unwrap_or("");
        TrackersConfig {
            stdout: TrackerConfig {
                enable: true,
                level,
                filter_regex,
                file: None,
            },
            log_file: TrackerConfig {
                enable: self.log_file.is_some(),
                level,
                filter_regex,
                file: self.log_file.as_deref(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn matches(args: &[&str]) -> ArgMatches {
        Config::command()
            .try_get_matches_from(std::iter::once("wsim").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn command_is_well_formed() {
        Config::command().debug_assert();
    }

    #[test]
    fn settings_apply_to_following_workloads() {
        let workloads = workload_args(&matches(&[
            "-w", "a", "-p", "-5", "-s", "-w", "b", "-W", "c", "-s", "-p", "2", "-w", "d",
        ]));
        let summary: Vec<(&str, bool, i32, bool)> = workloads
            .iter()
            .map(|w| (w.descriptor.as_str(), w.master, w.priority, w.sseu))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a", false, 0, false),
                ("b", false, -5, true),
                ("c", true, -5, true),
                ("d", false, 2, false),
            ]
        );
    }

    #[test]
    fn second_master_is_rejected() {
        assert!(
            Config::command()
                .try_get_matches_from(["wsim", "-W", "a", "-W", "b"])
                .is_err()
        );
    }

    #[test]
    fn flags_take_optional_values() {
        let config = Config::from_arg_matches(&matches(&["-S", "-d", "false", "-w", "x"])).unwrap();
        assert_eq!(config.synced, Some(true));
        assert_eq!(config.dep_sync, Some(false));

        let config = Config::from_arg_matches(&matches(&["-w", "x"])).unwrap();
        assert_eq!(config.synced, None);
        assert_eq!(config.dep_sync, None);
    }

    #[test]
    fn verbosity_and_log_level() {
        let mut config = Config::default();
        assert_eq!(config.verbosity(), 1);
        assert_eq!(config.log_level(), log::Level::Warn);

        config.log_level = Some(log::Level::Info);
        assert_eq!(config.log_level(), log::Level::Info);

        config.verbose = 2;
        assert_eq!(config.verbosity(), 3);
        assert_eq!(config.log_level(), log::Level::Debug);

        config.quiet = true;
        assert_eq!(config.verbosity(), 0);
        assert_eq!(config.log_level(), log::Level::Error);
    }

    #[test]
    fn device_limits() {
        let config = Config {
            video_engines: Some(3),
            ..Config::default()
        };
        assert_eq!(
            config.device().unwrap_err().0,
            "Invalid number of video engines 3!"
        );

        let config = Config {
            generation: Some(9),
            variant: Some(DriverVariant::Xe),
            video_engines: Some(1),
            ..Config::default()
        };
        assert_eq!(
            config.device().unwrap(),
            DeviceInfo::new(9, DriverVariant::Xe, 1)
        );
    }
}
