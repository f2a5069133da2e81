//! Named stream profiles saved per owner and persisted as JSON.
//!
//! The file maps an owner ID (as a string) to that owner's profiles:
//! `{"42": [{"name": "webcam", "stream_url": "...", "rtmp_url": "..."}]}`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use streamvisor_core::OwnerId;
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum ProfileStoreError {
    #[error("Failed to write profiles file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode profiles: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub stream_url: String,
    pub rtmp_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

pub struct ProfileStore {
    path: PathBuf,
    profiles: BTreeMap<String, Vec<Profile>>,
}

impl ProfileStore {
    /// Reads the store from `path`.
    ///
    /// A missing or unreadable file yields an empty store; the next save
    /// replaces it.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let profiles = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<BTreeMap<String, Vec<Profile>>>(&text) {
                Ok(profiles) => {
                    info!(
                        "Loaded profiles for {} owners from {}",
                        profiles.len(),
                        path.display()
                    );
                    profiles
                }
                Err(e) => {
                    error!("Failed to parse profiles file {}: {e}", path.display());
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Profiles file {} not found, starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                error!("Failed to read profiles file {}: {e}", path.display());
                BTreeMap::new()
            }
        };

        Self { path, profiles }
    }

    pub fn list(&self, owner: OwnerId) -> &[Profile] {
        self.profiles
            .get(&owner.to_string())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn find(&self, owner: OwnerId, name: &str) -> Option<&Profile> {
        self.list(owner).iter().find(|p| p.name == name)
    }

    /// Adds the profile, or replaces the URLs of an existing one with the same name
    pub fn upsert(&mut self, owner: OwnerId, profile: Profile) -> Result<Upsert, ProfileStoreError> {
        let entries = self.profiles.entry(owner.to_string()).or_default();
        let outcome = match entries.iter_mut().find(|p| p.name == profile.name) {
            Some(existing) => {
                existing.stream_url = profile.stream_url;
                existing.rtmp_url = profile.rtmp_url;
                Upsert::Updated
            }
            None => {
                entries.push(profile);
                Upsert::Created
            }
        };
        self.save()?;
        Ok(outcome)
    }

    /// Deletes a profile by name; `false` if there was none
    pub fn remove(&mut self, owner: OwnerId, name: &str) -> Result<bool, ProfileStoreError> {
        let Some(entries) = self.profiles.get_mut(&owner.to_string()) else {
            return Ok(false);
        };
        let Some(index) = entries.iter().position(|p| p.name == name) else {
            return Ok(false);
        };
        entries.remove(index);
        self.save()?;
        Ok(true)
    }

    /// Writes the whole store, replacing the file atomically
    pub fn save(&self) -> Result<(), ProfileStoreError> {
        let json = serde_json::to_string_pretty(&self.profiles)?;
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(json.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;

        info!("Saved profiles to {}", self.path.display());
        Ok(())
    }
}
