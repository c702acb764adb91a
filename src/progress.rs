use std::fmt::Debug;

use chrono::{DateTime, Utc};
use clap::builder::styling::AnsiColor;
use log::{debug, error, info};

use crate::format::{format_identity, format_size, format_time};

/// Per-file events emitted as a run classifies and processes files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Progress {
    Unchanged { identity: String },
    Detected { identity: String },
    Copied { identity: String, size: u64 },
    Uploaded { identity: String },
    AlreadyArchived { identity: String },
    Archived { identity: String },
    Recorded {
        identity: String,
        last_modified: DateTime<Utc>,
    },
    Removed { identity: String },
    Failed { identity: String, error: String },
}

pub trait ProgressSink: Debug + Send + Sync {
    fn report(&self, event: Progress);
}

/// Writes progress through the logger.
#[derive(Debug, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, event: Progress) {
        match event {
            Progress::Unchanged { identity } => {
                let style = AnsiColor::BrightBlack.on_default();
                debug!("{style}pass{style:#} {}", format_identity(&identity));
            }
            Progress::Detected { identity } => {
                let style = AnsiColor::Green.on_default();
                info!("{style}backup{style:#} {}", format_identity(&identity));
            }
            Progress::Copied { identity, size } => {
                let msg_style = AnsiColor::Blue.on_default();
                let size_style = AnsiColor::BrightBlack.on_default();
                let formatted_size = format_size(size);
                info!(
                    "{msg_style}copy{msg_style:#} {} {size_style}({formatted_size}){size_style:#}",
                    format_identity(&identity)
                );
            }
            Progress::Uploaded { identity } => {
                let style = AnsiColor::Cyan.on_default();
                info!("{style}upload{style:#} {}", format_identity(&identity));
            }
            Progress::AlreadyArchived { identity } => {
                let style = AnsiColor::BrightBlack.on_default();
                info!("{style}archived already{style:#} {}", format_identity(&identity));
            }
            Progress::Archived { identity } => {
                let style = AnsiColor::Magenta.on_default();
                info!("{style}archive{style:#} {}", format_identity(&identity));
            }
            Progress::Recorded {
                identity,
                last_modified,
            } => {
                debug!(
                    "recorded {} at {}",
                    format_identity(&identity),
                    format_time(&last_modified)
                );
            }
            Progress::Removed { identity } => {
                let style = AnsiColor::Yellow.on_default();
                info!("{style}removed{style:#} {}", format_identity(&identity));
            }
            Progress::Failed { identity, error } => {
                error!("{}: {error}", format_identity(&identity));
            }
        }
    }
}
