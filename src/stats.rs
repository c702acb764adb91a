use std::time::Duration;

use chrono::{DateTime, Utc};
use log::info;

use crate::format::{format_elapsed, format_size};

#[derive(Clone, Debug)]
pub struct Stats {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub files_seen: u64,
    pub files_unchanged: u64,
    pub files_copied: u64,
    pub bytes_copied: u64,
    pub files_uploaded: u64,
    pub files_already_archived: u64,
    pub files_archived: u64,
    pub files_removed: u64,
    pub files_failed: u64,
}

impl Stats {
    pub fn new() -> Self {
        Stats {
            start_time: Utc::now(),
            end_time: None,
            files_seen: 0,
            files_unchanged: 0,
            files_copied: 0,
            bytes_copied: 0,
            files_uploaded: 0,
            files_already_archived: 0,
            files_archived: 0,
            files_removed: 0,
            files_failed: 0,
        }
    }

    pub fn end(&mut self) {
        self.end_time = Some(Utc::now());
    }

    pub fn elapsed(&self) -> Duration {
        let end_time = self.end_time.unwrap_or_else(Utc::now);
        (end_time - self.start_time).to_std().unwrap_or_default()
    }

    pub fn log(&self) {
        info!("files seen: {}", self.files_seen);
        info!("files unchanged: {}", self.files_unchanged);
        info!("files copied: {}", self.files_copied);
        info!("bytes copied: {}", format_size(self.bytes_copied));
        info!("files uploaded: {}", self.files_uploaded);
        info!("files already archived: {}", self.files_already_archived);
        info!("files archived: {}", self.files_archived);
        info!("files removed: {}", self.files_removed);
        info!("files failed: {}", self.files_failed);
        info!("elapsed time: {}", format_elapsed(self.elapsed()));
    }
}

impl Default for Stats {
    fn default() -> Self {
        Stats::new()
    }
}
