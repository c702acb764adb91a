use std::{borrow::Cow, path::Path, time::Duration};

use chrono::{DateTime, Local, Utc};
use humansize::{ToF64, Unsigned, DECIMAL};

pub fn format_path(path: &Path) -> String {
    let path_str = path.to_string_lossy();
    format_identity(&path_str)
}

pub fn format_identity(identity: &str) -> String {
    match snailquote::escape(identity) {
        Cow::Owned(escaped) => escaped,
        Cow::Borrowed(_) => identity.to_owned(),
    }
}

pub fn format_size<T: ToF64 + Unsigned>(input: T) -> String {
    humansize::format_size(input, DECIMAL)
}

pub fn format_time(time: &DateTime<Utc>) -> String {
    time.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let rounded = Duration::from_millis(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
    humantime::format_duration(rounded).to_string()
}
