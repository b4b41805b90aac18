// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Command Line Interface helpers for visiter

use std::{
    ffi::OsString,
    fmt::{Debug, Display},
    sync::Arc,
};

use clap::{arg, command, ErrorKind::ArgumentNotFound};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::{EitherOrBoth, Itertools};
use log::{debug, info, trace, warn};
use prettytable::{cell, format as prettyformat, row, table};

use crate::{
    component::{PrefetchColumns, VisBufferComponent},
    constants::SWEEP_TIME_TOLERANCE,
    error::{
        CLIError::{self, DryRun, InvalidCommandLineArgument, SweepMismatch},
        VisIterError,
    },
    iter::{VisIterConfig, VisibilityIterator},
    source::{MemoryTable, RowSource, SyntheticLayout, SyntheticLayoutBuilder},
    sweep::{compare_sweeps, sweep_with, BufferInfo, SweepDifference},
    with_increment_duration,
};

/// Which iteration modes to sweep with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepMode {
    /// Read each component from the table on first access
    Sync,
    /// Serve prefetched buffers from the look-ahead thread
    Async,
    /// Sweep both ways and compare
    Both,
}

impl SweepMode {
    fn from_arg(value: &str) -> Result<Self, CLIError> {
        match value {
            "sync" => Ok(SweepMode::Sync),
            "async" => Ok(SweepMode::Async),
            "both" => Ok(SweepMode::Both),
            other => Err(InvalidCommandLineArgument {
                option: "--mode <MODE>".into(),
                expected: "one of sync, async or both".into(),
                received: other.into(),
            }),
        }
    }

    fn runs_sync(self) -> bool {
        matches!(self, SweepMode::Sync | SweepMode::Both)
    }

    fn runs_async(self) -> bool {
        matches!(self, SweepMode::Async | SweepMode::Both)
    }
}

impl Display for SweepMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                SweepMode::Sync => "sync",
                SweepMode::Async => "async",
                SweepMode::Both => "both",
            }
        )
    }
}

/// Args for sweeping synthetic tables with a [`VisibilityIterator`].
pub struct VisIterContext {
    /// Shape of each synthetic table
    pub layout: SyntheticLayout,
    /// Number of synthetic tables, iterated one after the other
    pub n_tables: usize,
    /// Iteration options, `async_enabled` is set per sweep from `mode`
    pub config: VisIterConfig,
    /// Which sweeps to run
    pub mode: SweepMode,
    /// Seconds by which sweep times may differ
    pub tolerance: f64,
    /// Whether to draw progress bars
    pub draw_progress: bool,
}

// Add build-time information from the "built" crate.
include!(concat!(env!("OUT_DIR"), "/built.rs"));

/// Write how this executable was compiled.
///
/// # Errors
///
/// propagates writeln! fails
pub fn fmt_build_info(f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    writeln!(f, "Compiled on {}", BUILT_TIME_UTC)?;
    writeln!(f, "         with compiler {}", RUSTC_VERSION)?;
    writeln!(f)?;
    Ok(())
}

impl Display for VisIterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} version {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
        )?;

        fmt_build_info(f)?;

        let mut layout_table = table!(["", "antennas", "timesteps", "chans", "corrs", "fields", "spws"]);
        layout_table.set_format(*prettyformat::consts::FORMAT_CLEAN);
        layout_table.add_row(row![r =>
            format!("{} x", self.n_tables),
            format!("{}{}", self.layout.n_antennas, if self.layout.autocorrelations { "+a" } else { "" }),
            self.layout.n_timesteps,
            self.layout.n_chans,
            self.layout.n_corrs,
            self.layout.n_fields,
            self.layout.n_spws
        ]);
        writeln!(f, "Synthetic tables:\n{}", layout_table)?;

        writeln!(f, "Sweep mode:           {}", self.mode)?;
        if self.mode.runs_async() {
            writeln!(f, "Look-ahead buffers:   {}", self.config.n_buffers)?;
            writeln!(f, "Prefetch:             {}", self.config.prefetch)?;
        }
        if self.config.time_interval > 0.0 {
            writeln!(f, "Chunk interval:       {} [s]", self.config.time_interval)?;
        } else {
            writeln!(f, "Chunk interval:       unlimited")?;
        }
        if self.config.row_blocking > 0 {
            writeln!(f, "Row blocking:         {}", self.config.row_blocking)?;
        }
        if self.mode == SweepMode::Both {
            writeln!(f, "Will compare sweeps within {} [s]", self.tolerance)?;
        }
        Ok(())
    }
}

/// What the sweeps of a [`VisIterContext::run`] saw.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// The synchronous sweep, if one was run
    pub sync: Option<Vec<BufferInfo>>,
    /// The asynchronous sweep, if one was run
    pub r#async: Option<Vec<BufferInfo>>,
    /// How the two sweeps disagree
    pub differences: Vec<SweepDifference>,
}

impl Display for SweepReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sync = self.sync.as_deref().unwrap_or_default();
        let r#async = self.r#async.as_deref().unwrap_or_default();

        let mut sweep_table = table!(["", "sync time [s]", "rows", "async time [s]", "rows"]);
        sweep_table.set_format(*prettyformat::consts::FORMAT_CLEAN);
        for infos in sync.iter().zip_longest(r#async.iter()) {
            let (pair, left, right) = match infos {
                EitherOrBoth::Both(left, right) => (left.pair, Some(left), Some(right)),
                EitherOrBoth::Left(left) => (left.pair, Some(left), None),
                EitherOrBoth::Right(right) => (right.pair, None, Some(right)),
            };
            let time = |info: Option<&BufferInfo>| info.map_or_else(String::new, |i| format!("{:.3}", i.time));
            let rows = |info: Option<&BufferInfo>| info.map_or_else(String::new, |i| format!("{}", i.n_rows));
            sweep_table.add_row(row![r =>
                format!("{}:", pair),
                time(left),
                rows(left),
                time(right),
                rows(right)
            ]);
        }
        writeln!(
            f,
            "Sub-chunks (sync={}, async={}):\n{}",
            sync.len(),
            r#async.len(),
            sweep_table
        )?;
        for difference in &self.differences {
            writeln!(f, "difference: {}", difference)?;
        }
        Ok(())
    }
}

fn sweep_progress(message: &'static str, total_rows: u64, draw_progress: bool) -> ProgressBar {
    let draw_target = if draw_progress {
        ProgressDrawTarget::stderr()
    } else {
        ProgressDrawTarget::hidden()
    };
    let progress = ProgressBar::with_draw_target(Some(total_rows), draw_target);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg:16}: [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent:3}% ({eta:5})")
    {
        progress.set_style(style.progress_chars("=> "));
    }
    progress.set_message(message);
    progress
}

impl VisIterContext {
    fn get_matches<I, T>(args: I) -> Result<clap::ArgMatches, CLIError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        let app = command!()
            .next_line_help(false)
            .about("Sweep synthetic visibility tables with a synchronous and an asynchronous \
                    visibility iterator, and check that they agree.")
            .args(&[
                // mode options
                arg!(--mode <MODE> "Which sweeps to run, defaults to both unless VISITER_ASYNC_ENABLED picks one")
                    .possible_values(["sync", "async", "both"])
                    .required(false),
                arg!(--tolerance <SECONDS> "How far sweep times may differ")
                    .required(false),
                arg!(--"dry-run" "Just print the summary and exit"),
                arg!(--"no-draw-progress" "do not show progress bars"),

                // iteration options
                arg!(--"n-buffers" <COUNT> "Buffers in the look-ahead pool [default: VISITER_ASYNC_NBUFFERS or 2]")
                    .help_heading("ITERATION")
                    .required(false),
                arg!(--prefetch <COMPONENTS> "Comma separated components to prefetch, `all` and `-Component` are understood. Time and NRow are always added")
                    .help_heading("ITERATION")
                    .required(false),
                arg!(--interval <SECONDS> "Maximum time span of a chunk, 0 for no limit")
                    .help_heading("ITERATION")
                    .required(false),
                arg!(--"row-blocking" <ROWS> "Maximum rows in a sub-chunk, 0 for one timestamp each")
                    .help_heading("ITERATION")
                    .required(false),

                // layout options
                arg!(--tables <COUNT> "Number of synthetic tables")
                    .help_heading("LAYOUT")
                    .required(false),
                arg!(--antennas <COUNT> "Antennas per table")
                    .help_heading("LAYOUT")
                    .required(false),
                arg!(--autos "Include autocorrelation baselines")
                    .help_heading("LAYOUT"),
                arg!(--timesteps <COUNT> "Timesteps per field")
                    .help_heading("LAYOUT")
                    .required(false),
                arg!(--chans <COUNT> "Channels per spectral window")
                    .help_heading("LAYOUT")
                    .required(false),
                arg!(--corrs <COUNT> "Correlations, at most 4")
                    .help_heading("LAYOUT")
                    .required(false),
                arg!(--fields <COUNT> "Fields per table")
                    .help_heading("LAYOUT")
                    .required(false),
                arg!(--spws <COUNT> "Spectral windows per table")
                    .help_heading("LAYOUT")
                    .required(false),
            ]);

        app.try_get_matches_from(args).map_err(CLIError::from)
    }

    /// Read an optional argument, `Ok(None)` when it was not given.
    fn optional_value<V>(matches: &clap::ArgMatches, name: &str) -> Result<Option<V>, CLIError>
    where
        V: std::str::FromStr,
        <V as std::str::FromStr>::Err: Display,
    {
        match matches.value_of_t::<V>(name) {
            Ok(value) => Ok(Some(value)),
            // filter any errors other than ArgumentNotFound
            Err(err) if err.kind() == ArgumentNotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn positive_count(
        matches: &clap::ArgMatches,
        name: &str,
        option: &str,
    ) -> Result<Option<usize>, CLIError> {
        match Self::optional_value::<usize>(matches, name)? {
            Some(0) => Err(InvalidCommandLineArgument {
                option: option.into(),
                expected: "a positive, non-zero integer".into(),
                received: "0".into(),
            }),
            count => Ok(count),
        }
    }

    fn parse_layout_matches(matches: &clap::ArgMatches) -> Result<SyntheticLayout, CLIError> {
        let mut builder = SyntheticLayoutBuilder::default();
        builder.autocorrelations(matches.is_present("autos"));
        if let Some(n_antennas) = Self::positive_count(matches, "antennas", "--antennas <COUNT>")? {
            builder.n_antennas(n_antennas);
        }
        if let Some(n_timesteps) = Self::positive_count(matches, "timesteps", "--timesteps <COUNT>")? {
            builder.n_timesteps(n_timesteps);
        }
        if let Some(n_chans) = Self::positive_count(matches, "chans", "--chans <COUNT>")? {
            builder.n_chans(n_chans);
        }
        match Self::positive_count(matches, "corrs", "--corrs <COUNT>")? {
            Some(n_corrs) if n_corrs > 4 => {
                return Err(InvalidCommandLineArgument {
                    option: "--corrs <COUNT>".into(),
                    expected: "between 1 and 4 correlations".into(),
                    received: format!("{}", n_corrs),
                })
            }
            Some(n_corrs) => {
                builder.n_corrs(n_corrs);
            }
            None => {}
        }
        if let Some(n_fields) = Self::positive_count(matches, "fields", "--fields <COUNT>")? {
            builder.n_fields(n_fields);
        }
        if let Some(n_spws) = Self::positive_count(matches, "spws", "--spws <COUNT>")? {
            builder.n_spws(n_spws);
        }
        builder
            .build()
            .map_err(|err| CLIError::VisIter(VisIterError::BadConfig(err.to_string())))
    }

    fn parse_iter_matches(matches: &clap::ArgMatches) -> Result<VisIterConfig, CLIError> {
        // environment first, so explicit arguments win
        let mut config = VisIterConfig::default().with_env_overrides()?;

        if let Some(n_buffers) = Self::positive_count(matches, "n-buffers", "--n-buffers <COUNT>")? {
            config.n_buffers = n_buffers;
        }
        if let Some(prefetch) = matches.value_of("prefetch") {
            config.prefetch =
                prefetch
                    .parse::<PrefetchColumns>()
                    .map_err(|err| InvalidCommandLineArgument {
                        option: "--prefetch <COMPONENTS>".into(),
                        expected: format!("a list of components ({})", err),
                        received: prefetch.into(),
                    })?;
        }
        // a sweep reads these from every buffer
        for component in [VisBufferComponent::Time, VisBufferComponent::NRow] {
            if config.prefetch.insert(component) {
                debug!("adding {} to the prefetch set", component.name());
            }
        }
        if let Some(interval) = Self::optional_value::<f64>(matches, "interval")? {
            if !interval.is_finite() || interval < 0.0 {
                return Err(InvalidCommandLineArgument {
                    option: "--interval <SECONDS>".into(),
                    expected: "a non-negative number of seconds".into(),
                    received: format!("{}", interval),
                });
            }
            config.time_interval = interval;
        }
        if let Some(row_blocking) = Self::optional_value::<usize>(matches, "row-blocking")? {
            config.row_blocking = row_blocking;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse an iterator of arguments, `args` into a `VisIterContext`.
    ///
    /// # Errors
    ///
    /// Can raise:
    /// - [`clap::Error`] if clap cannot parse `args`
    /// - [`CLIError::InvalidCommandLineArgument`] for out of range values
    /// - [`CLIError::VisIter`] if the environment overrides are malformed
    /// - [`CLIError::DryRun`] if `--dry-run` was given, after the summary is logged
    pub fn from_args<I, T>(args: I) -> Result<Self, CLIError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        debug!("args:\n{:?}", &args);

        let matches = Self::get_matches(args)?;
        trace!("arg matches:\n{:?}", &matches);

        let layout = Self::parse_layout_matches(&matches)?;
        let n_tables = Self::positive_count(&matches, "tables", "--tables <COUNT>")?.unwrap_or(1);
        let config = Self::parse_iter_matches(&matches)?;

        let mode = match matches.value_of("mode") {
            Some(mode) => SweepMode::from_arg(mode)?,
            None if config.async_enabled => SweepMode::Async,
            None => SweepMode::Both,
        };

        let tolerance = Self::optional_value::<f64>(&matches, "tolerance")?
            .unwrap_or(SWEEP_TIME_TOLERANCE);
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(InvalidCommandLineArgument {
                option: "--tolerance <SECONDS>".into(),
                expected: "a non-negative number of seconds".into(),
                received: format!("{}", tolerance),
            });
        }

        let result = Self {
            layout,
            n_tables,
            config,
            mode,
            tolerance,
            draw_progress: !matches.is_present("no-draw-progress"),
        };

        info!("{}", &result);

        if matches.is_present("dry-run") {
            return Err(DryRun {});
        }

        Ok(result)
    }

    /// One synthetic table per `n_tables`, each starting where the previous one ended.
    ///
    /// # Errors
    ///
    /// [`CLIError::VisIter`] if a table cannot be synthesized.
    pub fn synthesize_tables(&self) -> Result<Vec<Arc<dyn RowSource>>, CLIError> {
        let span = self.layout.integration_time
            * (self.layout.n_timesteps * self.layout.n_fields) as f64;
        (0..self.n_tables)
            .map(|table_idx| {
                let mut layout = self.layout.clone();
                layout.start_gps_seconds += span * table_idx as f64;
                let table = MemoryTable::synthesize(&layout).map_err(VisIterError::from)?;
                Ok(Arc::new(table) as Arc<dyn RowSource>)
            })
            .collect()
    }

    fn run_sweep(
        &self,
        sources: Vec<Arc<dyn RowSource>>,
        async_enabled: bool,
    ) -> Result<Vec<BufferInfo>, CLIError> {
        let total_rows: usize = sources.iter().map(|source| source.num_rows()).sum();
        let config = VisIterConfig {
            async_enabled,
            ..self.config.clone()
        };
        let message = if async_enabled {
            "async sweep"
        } else {
            "sync sweep"
        };
        let progress = sweep_progress(message, total_rows as u64, self.draw_progress);

        let mut vi = VisibilityIterator::new(sources, config)?;
        let infos = with_increment_duration!(
            message,
            sweep_with(&mut vi, |info| progress.inc(info.n_rows as u64))?
        );
        vi.finish()?;
        progress.finish();
        debug!("{} visited {} sub-chunks", message, infos.len());
        Ok(infos)
    }

    /// Run the requested sweeps, comparing them when both were run.
    ///
    /// # Errors
    ///
    /// Can raise:
    /// - [`CLIError::VisIter`] if iteration fails
    /// - [`CLIError::SweepMismatch`] if the sweeps disagree
    pub fn run(self) -> Result<SweepReport, CLIError> {
        let sources = self.synthesize_tables()?;
        let mut report = SweepReport::default();

        if self.mode.runs_sync() {
            report.sync = Some(self.run_sweep(sources.clone(), false)?);
        }
        if self.mode.runs_async() {
            report.r#async = Some(self.run_sweep(sources, true)?);
        }
        if let (Some(sync), Some(r#async)) = (&report.sync, &report.r#async) {
            report.differences = compare_sweeps(sync, r#async, self.tolerance);
        }

        info!("{}", &report);

        if !report.differences.is_empty() {
            for difference in &report.differences {
                warn!("{}", difference);
            }
            return Err(SweepMismatch(
                report.differences.iter().map(ToString::to_string).join("; "),
            ));
        }
        Ok(report)
    }
}


#[cfg(test)]
mod argparse_tests {
    use super::*;
    use crate::error::CLIError;

    #[test]
    fn test_prefetch_always_has_time_and_nrow() {
        let args = vec!["visiter", "--prefetch", "FlagCube", "--no-draw-progress"];
        let ctx = VisIterContext::from_args(&args).unwrap();
        assert_eq!(
            ctx.config.prefetch,
            PrefetchColumns::from_components([
                VisBufferComponent::FlagCube,
                VisBufferComponent::Time,
                VisBufferComponent::NRow,
            ])
        );
    }

    #[test]
    fn test_parse_bad_prefetch() {
        let args = vec!["visiter", "--prefetch", "Time,Frobnicate"];
        assert!(matches!(
            VisIterContext::from_args(&args),
            Err(CLIError::InvalidCommandLineArgument { .. })
        ));
    }

    #[test]
    fn test_parse_zero_buffers() {
        let args = vec!["visiter", "--n-buffers", "0"];
        match VisIterContext::from_args(&args) {
            Err(CLIError::InvalidCommandLineArgument { option, .. }) => {
                assert_eq!(option, "--n-buffers <COUNT>")
            }
            Err(e) => panic!("expected invalid argument, not {}", e),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_parse_too_many_corrs() {
        let args = vec!["visiter", "--corrs", "5"];
        assert!(matches!(
            VisIterContext::from_args(&args),
            Err(CLIError::InvalidCommandLineArgument { .. })
        ));
    }

    #[test]
    fn test_parse_bad_mode() {
        let args = vec!["visiter", "--mode", "sideways"];
        match VisIterContext::from_args(&args) {
            Err(CLIError::Clap(inner)) => assert!(matches!(
                inner.kind(),
                clap::error::ErrorKind::InvalidValue
            )),
            Err(e) => panic!("expected invalid value error, not {}", e),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_parse_unparseable_interval() {
        let args = vec!["visiter", "--interval", "soon"];
        assert!(matches!(
            VisIterContext::from_args(&args),
            Err(CLIError::Clap(_))
        ));
    }

    #[test]
    fn test_dry_run() {
        let args = vec!["visiter", "--dry-run"];
        assert!(matches!(
            VisIterContext::from_args(&args),
            Err(CLIError::DryRun {})
        ));
    }
}
