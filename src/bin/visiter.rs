// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use clap::ErrorKind::{DisplayHelp, DisplayVersion};
use log::{info, trace};
use std::{env, ffi::OsString, fmt::Debug, time::Duration};
use visiter::{
    cli::VisIterContext,
    error::CLIError::{Clap, DryRun},
    get_durations,
};

fn main_with_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    I: Debug,
{
    let ctx = match VisIterContext::from_args(args) {
        Ok(ctx) => ctx,
        Err(DryRun {}) => {
            info!("Dry run. No sweeps will be run.");
            return 0;
        }
        Err(Clap(inner)) => {
            // Swallow broken pipe errors
            trace!("clap error: {:?}", inner.kind());
            let _ = inner.print();
            match inner.kind() {
                DisplayHelp | DisplayVersion => return 0,
                _ => return 1,
            }
        }
        Err(e) => {
            eprintln!("error parsing args: {e}");
            return 1;
        }
    };

    match ctx.run() {
        Ok(report) => {
            info!(
                "total duration: {:?}",
                get_durations().into_iter().fold(
                    Duration::ZERO,
                    |duration_sum, (name, duration)| {
                        info!("{} duration: {:?}", name, duration);
                        duration_sum + duration
                    }
                )
            );
            let n_subchunks = report
                .sync
                .as_ref()
                .or(report.r#async.as_ref())
                .map_or(0, Vec::len);
            info!("swept {} sub-chunks", n_subchunks);
            0
        }
        Err(e) => {
            eprintln!("sweep error: {e}");
            1
        }
    }
}

fn main() {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );
    trace!("start main");
    let retcode = main_with_args(env::args());
    trace!("end main");
    std::process::exit(retcode);
}
