//! Single-writer state store.
//!
//! One dedicated thread owns the [`RecordBackend`] and drains a FIFO queue of
//! requests. Every other component holds a cloneable [`StateStore`] handle,
//! enqueues a request and waits for its own reply, so concurrent callers see a
//! linear sequence of operations and the backend never needs to be thread-safe.

mod file;

use std::{collections::HashMap, path::Path, thread};

use async_channel::{Receiver, Sender};
use chrono::{DateTime, Utc};
use log::{debug, trace};
use tokio::sync::oneshot;

use crate::error::{Error, Result};

pub use self::file::StateFile;

/// identity → last-modified time of the last completed backup.
pub type Snapshot = HashMap<String, DateTime<Utc>>;

pub trait RecordBackend: Send + 'static {
    fn load_all(&mut self) -> Result<Snapshot>;
    fn upsert(&mut self, identity: &str, last_modified: DateTime<Utc>) -> Result<()>;
    /// Returns whether a record was removed.
    fn delete(&mut self, identity: &str) -> Result<bool>;
}

#[derive(Debug)]
enum Request {
    LoadAll {
        reply: oneshot::Sender<Result<Snapshot>>,
    },
    Upsert {
        identity: String,
        last_modified: DateTime<Utc>,
        reply: oneshot::Sender<Result<()>>,
    },
    Delete {
        identity: String,
        reply: oneshot::Sender<Result<bool>>,
    },
}

#[derive(Clone, Debug)]
pub struct StateStore {
    sender: Sender<Request>,
}

impl StateStore {
    pub fn open(dir: &Path) -> Result<Self> {
        let backend = StateFile::open(dir)?;
        StateStore::spawn(backend)
    }

    pub fn spawn<B: RecordBackend>(backend: B) -> Result<Self> {
        let (sender, receiver) = async_channel::unbounded();
        thread::Builder::new()
            .name("state-store".to_owned())
            .spawn(move || serve(backend, &receiver))?;
        Ok(StateStore { sender })
    }

    pub async fn load_all(&self) -> Result<Snapshot> {
        self.call(|reply| Request::LoadAll { reply }).await
    }

    pub async fn upsert(&self, identity: &str, last_modified: DateTime<Utc>) -> Result<()> {
        let identity = identity.to_owned();
        self.call(|reply| Request::Upsert {
            identity,
            last_modified,
            reply,
        })
        .await
    }

    pub async fn delete(&self, identity: &str) -> Result<bool> {
        let identity = identity.to_owned();
        self.call(|reply| Request::Delete { identity, reply }).await
    }

    async fn call<T, F>(&self, request: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<Result<T>>) -> Request,
    {
        let (reply, response) = oneshot::channel();
        self.sender.send(request(reply)).await?;
        let result = response.await.map_err(|_| Error::StoreClosed)?;
        result.map_err(Error::store)
    }
}

fn serve<B: RecordBackend>(mut backend: B, receiver: &Receiver<Request>) {
    debug!("state store started");

    // A caller that stopped waiting has dropped its receiver; its reply is discarded.
    while let Ok(request) = receiver.recv_blocking() {
        trace!("state store request {request:?}");
        match request {
            Request::LoadAll { reply } => {
                let _ = reply.send(backend.load_all());
            }
            Request::Upsert {
                identity,
                last_modified,
                reply,
            } => {
                let _ = reply.send(backend.upsert(&identity, last_modified));
            }
            Request::Delete { identity, reply } => {
                let _ = reply.send(backend.delete(&identity));
            }
        }
    }

    debug!("state store closed");
}
