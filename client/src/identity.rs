use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tombola_protocol::{ParticipantId, RoomCode};

const STORE_FILE: &str = "identity.json";
const DEFAULT_NICKNAME: &str = "Guest";

/// The identity a room view acts as. Exactly one per session per room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub id: ParticipantId,
    pub display_name: String,
    pub is_authenticated: bool,
}

/// Identity handed over by the external auth collaborator. Authoritative
/// whenever present; never written to the local store.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: ParticipantId,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredVisitor {
    visitor_id: ParticipantId,
    nickname: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredProfiles {
    rooms: HashMap<String, StoredVisitor>,
}

/// Per-room visitor identities, persisted as one JSON file in the profile
/// directory. Identifiers for different room codes are independent.
pub struct IdentityStore {
    path: PathBuf,
    profiles: Mutex<StoredProfiles>,
}

impl IdentityStore {
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(STORE_FILE);
        let profiles = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => StoredProfiles::default(),
            Err(err) => return Err(err),
        };
        Ok(IdentityStore {
            path,
            profiles: Mutex::new(profiles),
        })
    }

    /// Resolves the active identity for a room. An authenticated identity
    /// wins outright; otherwise the cached visitor entry is returned, or a
    /// fresh one is generated and persisted. Idempotent per room code.
    pub fn resolve(
        &self,
        code: &RoomCode,
        authenticated: Option<&AuthenticatedUser>,
    ) -> io::Result<ResolvedIdentity> {
        if let Some(user) = authenticated {
            return Ok(ResolvedIdentity {
                id: user.id.clone(),
                display_name: user.display_name.clone(),
                is_authenticated: true,
            });
        }

        let mut profiles = self.profiles.lock();
        if let Some(stored) = profiles.rooms.get(code.as_str()) {
            return Ok(ResolvedIdentity {
                id: stored.visitor_id.clone(),
                display_name: stored.nickname.clone(),
                is_authenticated: false,
            });
        }

        let stored = StoredVisitor {
            visitor_id: ParticipantId::random_visitor(),
            nickname: DEFAULT_NICKNAME.to_string(),
        };
        debug!(room = %code, visitor = %stored.visitor_id, "generated visitor identity");
        profiles.rooms.insert(code.as_str().to_string(), stored.clone());
        self.persist(&profiles)?;
        Ok(ResolvedIdentity {
            id: stored.visitor_id,
            display_name: stored.nickname,
            is_authenticated: false,
        })
    }

    /// Records the nickname chosen in the join flow, keeping any visitor id
    /// already issued for the room.
    pub fn remember_nickname(&self, code: &RoomCode, nickname: &str) -> io::Result<ParticipantId> {
        let mut profiles = self.profiles.lock();
        let entry = profiles
            .rooms
            .entry(code.as_str().to_string())
            .or_insert_with(|| StoredVisitor {
                visitor_id: ParticipantId::random_visitor(),
                nickname: String::new(),
            });
        entry.nickname = nickname.to_string();
        let id = entry.visitor_id.clone();
        self.persist(&profiles)?;
        Ok(id)
    }

    /// Forgets the visitor identity for one room. Other rooms are untouched.
    pub fn clear(&self, code: &RoomCode) -> io::Result<()> {
        let mut profiles = self.profiles.lock();
        if profiles.rooms.remove(code.as_str()).is_some() {
            self.persist(&profiles)?;
        }
        Ok(())
    }

    fn persist(&self, profiles: &StoredProfiles) -> io::Result<()> {
        let raw = serde_json::to_string_pretty(profiles)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(&self.path, raw)
    }
}
