//! Versioned model storage for asynchronous peer averaging.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Blob '{name}' already exists in version {version}")]
    AlreadyExists { version: u64, name: String },
    #[error("Version {0} not found")]
    VersionNotFound(u64),
    #[error("Blob '{name}' not found in version {version}")]
    NameNotFound { version: u64, name: String },
    #[error("Peer {peer} out of range for {peers} peers")]
    PeerOutOfRange { peer: usize, peers: usize },
    #[error("Store for peer {0} is poisoned")]
    Poisoned(usize),
}

pub type Blob = Arc<Vec<f32>>;

/// Named blobs grouped by version, keeping only the newest `window` versions.
///
/// Creating a blob under a new version opens that version; once more than `window` versions
/// are open the oldest is evicted together with all its blobs.
#[derive(Debug)]
pub struct VersionedStore {
    window: usize,
    versions: VecDeque<(u64, HashMap<String, Blob>)>,
}

impl VersionedStore {
    /// A `window` of zero is treated as one.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            versions: VecDeque::new(),
        }
    }

    pub fn create(&mut self, version: u64, name: &str, blob: Vec<f32>) -> Result<(), StoreError> {
        let idx = match self.versions.iter().position(|(v, _)| *v == version) {
            Some(idx) => idx,
            None => {
                self.versions.push_back((version, HashMap::new()));
                while self.versions.len() > self.window {
                    self.versions.pop_front();
                }
                match self.versions.iter().position(|(v, _)| *v == version) {
                    Some(idx) => idx,
                    None => return Err(StoreError::VersionNotFound(version)),
                }
            }
        };

        let blobs = &mut self.versions[idx].1;
        if blobs.contains_key(name) {
            return Err(StoreError::AlreadyExists {
                version,
                name: name.to_string(),
            });
        }
        blobs.insert(name.to_string(), Arc::new(blob));
        Ok(())
    }

    pub fn get(&self, version: u64, name: &str) -> Result<Blob, StoreError> {
        let (_, blobs) = self
            .versions
            .iter()
            .find(|(v, _)| *v == version)
            .ok_or(StoreError::VersionNotFound(version))?;
        blobs
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NameNotFound {
                version,
                name: name.to_string(),
            })
    }

    /// The most recently opened version that holds `name`.
    pub fn latest(&self, name: &str) -> Option<(u64, Blob)> {
        self.versions
            .iter()
            .rev()
            .find_map(|(v, blobs)| blobs.get(name).map(|b| (*v, Arc::clone(b))))
    }
}

/// One [`VersionedStore`] per peer, shared by every worker.
///
/// Peers publish only into their own store and read from anyone's.
#[derive(Debug)]
pub struct PeerModelStore {
    peers: Vec<Mutex<VersionedStore>>,
}

impl PeerModelStore {
    pub fn new(peers: usize, window: usize) -> Self {
        Self {
            peers: (0..peers).map(|_| Mutex::new(VersionedStore::new(window))).collect(),
        }
    }

    fn lock(&self, peer: usize) -> Result<MutexGuard<'_, VersionedStore>, StoreError> {
        self.peers
            .get(peer)
            .ok_or(StoreError::PeerOutOfRange {
                peer,
                peers: self.peers.len(),
            })?
            .lock()
            .map_err(|_| StoreError::Poisoned(peer))
    }

    pub fn publish(
        &self,
        peer: usize,
        version: u64,
        name: &str,
        blob: Vec<f32>,
    ) -> Result<(), StoreError> {
        self.lock(peer)?.create(version, name, blob)
    }

    pub fn get(&self, peer: usize, version: u64, name: &str) -> Result<Blob, StoreError> {
        self.lock(peer)?.get(version, name)
    }

    pub fn latest(&self, peer: usize, name: &str) -> Result<Option<(u64, Blob)>, StoreError> {
        Ok(self.lock(peer)?.latest(name))
    }
}
