use std::io::{self, Write};

use env_logger::fmt::Formatter;
use log::{Level, LevelFilter, Record};

const QUIET_MODULES: &[&str] = &["aws_config", "aws_smithy_runtime", "aws_sdk_s3", "hyper"];

pub fn init(level: LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder.format(format).filter_level(level);

    for module in QUIET_MODULES {
        builder.filter_module(module, level.min(LevelFilter::Warn));
    }

    builder.init();
}

pub fn level_from_args(verbose: u8, quiet: u8) -> LevelFilter {
    match i16::from(verbose) - i16::from(quiet) {
        i16::MIN..=-3 => LevelFilter::Off,
        -2 => LevelFilter::Error,
        -1 => LevelFilter::Warn,
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Info and debug lines are bare; trace lines are tagged with their module.
fn format(f: &mut Formatter, record: &Record) -> io::Result<()> {
    let args = record.args();
    let level = record.level();
    let style = f.default_level_style(level);
    match level {
        Level::Error => writeln!(f, "{style}error:{style:#} {args}"),
        Level::Warn => writeln!(f, "{style}warning:{style:#} {args}"),
        Level::Trace => writeln!(f, "{style}[{}]{style:#} {args}", record.target()),
        Level::Info | Level::Debug => writeln!(f, "{args}"),
    }
}
