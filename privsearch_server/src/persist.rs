//! Snapshots of a set-up server, so restarting a deployment does not repeat database construction.

use crate::server::Server;
use privsearch_common::{error::PrivSearchError, hint::HintBundle, pir::PirDatabase};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::{info, warn};

#[derive(Serialize)]
struct SnapshotRef<'a> {
    bundle: &'a HintBundle,
    embeddings: Option<&'a PirDatabase<u64>>,
    urls: Option<&'a PirDatabase<u32>>,
}

#[derive(Deserialize)]
struct Snapshot {
    bundle: HintBundle,
    embeddings: Option<PirDatabase<u64>>,
    urls: Option<PirDatabase<u32>>,
}

impl Server {
    /// Serializes the hint bundle and both databases. Hint-only servers are not part of a snapshot, they are derived
    /// again on first use.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PrivSearchError> {
        let snapshot = SnapshotRef {
            bundle: &self.bundle,
            embeddings: self.embeddings.as_ref(),
            urls: self.urls.as_ref(),
        };

        bincode::serialize(&snapshot).map_err(|e| PrivSearchError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Server, PrivSearchError> {
        let snapshot: Snapshot = bincode::deserialize(bytes).map_err(|e| PrivSearchError::Deserialization(e.to_string()))?;

        if snapshot.bundle.serves_embeddings() != snapshot.embeddings.is_some() || snapshot.bundle.serves_urls() != snapshot.urls.is_some() {
            return Err(PrivSearchError::Deserialization(String::from("snapshot hint bundle does not match its databases")));
        }

        Ok(Server::from_parts(snapshot.bundle, snapshot.embeddings, snapshot.urls))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), PrivSearchError> {
        let bytes = self.to_bytes()?;
        fs::write(path.as_ref(), &bytes)?;

        info!(path = %path.as_ref().display(), bytes = bytes.len(), "Saved server snapshot");
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Server, PrivSearchError> {
        let server = Self::from_bytes(&fs::read(path.as_ref())?)?;

        info!(path = %path.as_ref().display(), "Loaded server snapshot");
        Ok(server)
    }

    /// Loads the snapshot at `path` if there is a usable one, otherwise builds a fresh server and saves it there.
    ///
    /// # Arguments
    ///
    /// * `path` - Location of the snapshot.
    /// * `build` - Sets up a server from scratch, invoked only when no snapshot could be loaded.
    ///
    /// # Returns
    ///
    /// * `Result<Server, PrivSearchError>` - The server, or an error if building or saving failed.
    pub fn load_or_build<P, F>(path: P, build: F) -> Result<Server, PrivSearchError>
    where
        P: AsRef<Path>,
        F: FnOnce() -> Result<Server, PrivSearchError>,
    {
        if path.as_ref().exists() {
            match Self::load(path.as_ref()) {
                Ok(server) => return Ok(server),
                Err(e) => warn!(path = %path.as_ref().display(), error = %e, "Ignoring unusable server snapshot"),
            }
        }

        let server = build()?;
        server.save(path)?;
        Ok(server)
    }
}
