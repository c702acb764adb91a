use std::{
    borrow::Cow,
    collections::BTreeMap,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{RecordBackend, Snapshot};

pub const STATE_FILE_NAME: &str = "records.bin";
const STATE_FILE_VERSION: u32 = 1;

type Records = BTreeMap<String, DateTime<Utc>>;

#[derive(Serialize, Deserialize)]
struct Contents<'a> {
    version: u32,
    records: Cow<'a, Records>,
}

/// Record set persisted as one `bincode` file, replaced atomically on every write.
#[derive(Debug)]
pub struct StateFile {
    path: PathBuf,
    records: Records,
}

impl StateFile {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(STATE_FILE_NAME);
        let records = match fs::read(&path) {
            Ok(bytes) => decode(&path, &bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Records::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(StateFile { path, records })
    }

    fn persist(&self) -> Result<()> {
        let contents = Contents {
            version: STATE_FILE_VERSION,
            records: Cow::Borrowed(&self.records),
        };
        let bytes = bincode::serialize(&contents)?;

        let temp_path = self.path.with_extension("bin.tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl RecordBackend for StateFile {
    fn load_all(&mut self) -> Result<Snapshot> {
        let snapshot = self
            .records
            .iter()
            .map(|(identity, modified)| (identity.clone(), *modified))
            .collect();
        Ok(snapshot)
    }

    fn upsert(&mut self, identity: &str, last_modified: DateTime<Utc>) -> Result<()> {
        let previous = self.records.insert(identity.to_owned(), last_modified);
        if let Err(err) = self.persist() {
            match previous {
                Some(modified) => self.records.insert(identity.to_owned(), modified),
                None => self.records.remove(identity),
            };
            return Err(err);
        }

        Ok(())
    }

    fn delete(&mut self, identity: &str) -> Result<bool> {
        let Some(modified) = self.records.remove(identity) else {
            return Ok(false);
        };

        if let Err(err) = self.persist() {
            self.records.insert(identity.to_owned(), modified);
            return Err(err);
        }

        Ok(true)
    }
}

fn decode(path: &Path, bytes: &[u8]) -> Result<Records> {
    let contents: Contents = bincode::deserialize(bytes)?;
    if contents.version != STATE_FILE_VERSION {
        return Err(Error::WrongStateVersion {
            path: path.to_owned(),
            actual: contents.version,
            expected: STATE_FILE_VERSION,
        });
    }

    Ok(contents.records.into_owned())
}
