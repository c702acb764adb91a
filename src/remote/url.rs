use std::{path::PathBuf, str::FromStr};

use crate::error::Error;

pub const S3_PREFIX: &str = "s3:";
pub const LOCAL_PREFIX: &str = "file://";
const ENDPOINT_PREFIXES: &[&str] = &["http://", "https://"];

/// Where objects live: AWS S3 from environment configuration, an
/// S3-compatible endpoint, or a local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteUrl {
    S3 { endpoint: Option<String> },
    Local(PathBuf),
}

impl FromStr for RemoteUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix(S3_PREFIX) {
            if rest.is_empty() || rest == "//" {
                return Ok(RemoteUrl::S3 { endpoint: None });
            }
        } else if let Some(path_str) = s.strip_prefix(LOCAL_PREFIX) {
            if !path_str.is_empty() {
                return Ok(RemoteUrl::Local(path_str.into()));
            }
        } else if ENDPOINT_PREFIXES.iter().any(|prefix| s.starts_with(prefix)) {
            let endpoint = s.trim_end_matches('/').to_owned();
            return Ok(RemoteUrl::S3 {
                endpoint: Some(endpoint),
            });
        }

        Err(Error::InvalidRemoteUrl(s.to_owned()))
    }
}
