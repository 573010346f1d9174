//! Durable protocol state: contacts, pending requests, identity key material.
//!
//! Persistence is a collaborator concern; the protocol core only sees the
//! [`ContactStore`], [`PendingRequestStore`] and [`KeyStore`] traits. Two
//! implementations ship with the crate: [`MemoryStore`] for tests and
//! embedding, and [`JsonFileStore`], which keeps one JSON file per record
//! family under a data directory and rewrites it on every mutation.

use crate::address::OnionAddress;
use crate::error::{OnionChatError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};

/// A peer whose public key is trusted after a completed handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// The peer's onion address.
    pub address: OnionAddress,
    /// The peer's public key PEM, as received in its introduction.
    pub pub_pem: String,
}

/// Which side initiated a pending handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The peer introduced itself to us.
    Incoming,
    /// We introduced ourselves to the peer.
    Outgoing,
}

/// Delivery status of a pending handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Introduction is being transmitted.
    Sending,
    /// Introduction reached the peer; awaiting its reciprocal introduction.
    Delivered,
    /// Terminal failure; the user must re-initiate.
    Failed,
}

/// A handshake in flight, tracked per address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    /// The peer's onion address.
    pub address: OnionAddress,
    /// Who initiated the handshake.
    pub direction: Direction,
    /// Current delivery status.
    pub status: RequestStatus,
    /// For incoming requests: the peer's key, held until promotion.
    pub pending_pub_pem: Option<String>,
}

/// Durable mapping of address to trusted contact.
pub trait ContactStore: Send + Sync {
    /// Looks up a contact by address.
    fn get_contact(&self, address: &OnionAddress) -> Result<Option<Contact>>;
    /// Inserts or replaces a contact.
    fn put_contact(&self, contact: Contact) -> Result<()>;
    /// Removes a contact; returns true if one existed.
    fn remove_contact(&self, address: &OnionAddress) -> Result<bool>;
    /// Returns true if the address has a stored contact.
    fn has_contact(&self, address: &OnionAddress) -> Result<bool> {
        Ok(self.get_contact(address)?.is_some())
    }
    /// Lists all contacts.
    fn list_contacts(&self) -> Result<Vec<Contact>>;
}

/// Durable mapping of address to handshake in flight.
pub trait PendingRequestStore: Send + Sync {
    /// Looks up a pending request by address.
    fn get_pending(&self, address: &OnionAddress) -> Result<Option<PendingRequest>>;
    /// Inserts or replaces a pending request.
    fn put_pending(&self, request: PendingRequest) -> Result<()>;
    /// Removes a pending request; returns true if one existed.
    fn remove_pending(&self, address: &OnionAddress) -> Result<bool>;
    /// Returns true if the address has a pending request.
    fn has_pending(&self, address: &OnionAddress) -> Result<bool> {
        Ok(self.get_pending(address)?.is_some())
    }
    /// Lists all pending requests.
    fn list_pending(&self) -> Result<Vec<PendingRequest>>;
}

/// Storage for the local identity's private key material.
pub trait KeyStore: Send + Sync {
    /// Loads the stored private key PEM, if any.
    fn load_private_pem(&self) -> Result<Option<String>>;
    /// Persists the private key PEM.
    fn store_private_pem(&self, pem: &str) -> Result<()>;
}

// =============================================================================
// In-memory store
// =============================================================================

/// In-memory store backing all three traits. State is lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    contacts: RwLock<HashMap<OnionAddress, Contact>>,
    pending: RwLock<HashMap<OnionAddress, PendingRequest>>,
    private_pem: RwLock<Option<String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContactStore for MemoryStore {
    fn get_contact(&self, address: &OnionAddress) -> Result<Option<Contact>> {
        Ok(self.contacts.read().unwrap().get(address).cloned())
    }

    fn put_contact(&self, contact: Contact) -> Result<()> {
        self.contacts
            .write()
            .unwrap()
            .insert(contact.address.clone(), contact);
        Ok(())
    }

    fn remove_contact(&self, address: &OnionAddress) -> Result<bool> {
        Ok(self.contacts.write().unwrap().remove(address).is_some())
    }

    fn list_contacts(&self) -> Result<Vec<Contact>> {
        Ok(self.contacts.read().unwrap().values().cloned().collect())
    }
}

impl PendingRequestStore for MemoryStore {
    fn get_pending(&self, address: &OnionAddress) -> Result<Option<PendingRequest>> {
        Ok(self.pending.read().unwrap().get(address).cloned())
    }

    fn put_pending(&self, request: PendingRequest) -> Result<()> {
        self.pending
            .write()
            .unwrap()
            .insert(request.address.clone(), request);
        Ok(())
    }

    fn remove_pending(&self, address: &OnionAddress) -> Result<bool> {
        Ok(self.pending.write().unwrap().remove(address).is_some())
    }

    fn list_pending(&self) -> Result<Vec<PendingRequest>> {
        Ok(self.pending.read().unwrap().values().cloned().collect())
    }
}

impl KeyStore for MemoryStore {
    fn load_private_pem(&self) -> Result<Option<String>> {
        Ok(self.private_pem.read().unwrap().clone())
    }

    fn store_private_pem(&self, pem: &str) -> Result<()> {
        *self.private_pem.write().unwrap() = Some(pem.to_string());
        Ok(())
    }
}

// =============================================================================
// JSON file store
// =============================================================================

/// File name for the contact list.
const CONTACTS_FILE: &str = "contacts.json";

/// File name for pending contact requests.
const PENDING_FILE: &str = "contact_requests.json";

/// File name for the identity private key.
const PRIVATE_KEY_FILE: &str = "private_key.json";

/// On-disk shape of the private key file.
#[derive(Default, Serialize, Deserialize)]
struct StoredKeyMaterial {
    pem: String,
}

/// JSON-file-backed store. Records are held in memory and each mutation
/// rewrites the owning file, so reads never touch the disk.
#[derive(Debug)]
pub struct JsonFileStore {
    base_dir: PathBuf,
    contacts: RwLock<HashMap<OnionAddress, Contact>>,
    pending: RwLock<HashMap<OnionAddress, PendingRequest>>,
}

impl JsonFileStore {
    /// Opens a store rooted at `base_dir`, creating the directory and loading
    /// any existing record files.
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).map_err(|e| {
                OnionChatError::storage(format!("failed to create data directory: {}", e))
            })?;
            info!(dir = %base_dir.display(), "created data directory");
        }

        let contacts: HashMap<OnionAddress, Contact> =
            Self::load_file(&base_dir.join(CONTACTS_FILE))?;
        let pending: HashMap<OnionAddress, PendingRequest> =
            Self::load_file(&base_dir.join(PENDING_FILE))?;

        debug!(
            contacts = contacts.len(),
            pending = pending.len(),
            "loaded protocol state"
        );

        Ok(Self {
            base_dir,
            contacts: RwLock::new(contacts),
            pending: RwLock::new(pending),
        })
    }

    fn load_file<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T> {
        if !path.exists() {
            return Ok(T::default());
        }
        let bytes = fs::read(path)
            .map_err(|e| OnionChatError::storage(format!("failed to read {}: {}", path.display(), e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| OnionChatError::storage(format!("corrupt store file {}: {}", path.display(), e)))
    }

    fn write_file<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.base_dir.join(name);
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| OnionChatError::serialization(format!("failed to serialize store: {}", e)))?;
        fs::write(&path, bytes)
            .map_err(|e| OnionChatError::storage(format!("failed to write {}: {}", path.display(), e)))
    }
}

impl ContactStore for JsonFileStore {
    fn get_contact(&self, address: &OnionAddress) -> Result<Option<Contact>> {
        Ok(self.contacts.read().unwrap().get(address).cloned())
    }

    fn put_contact(&self, contact: Contact) -> Result<()> {
        let mut contacts = self.contacts.write().unwrap();
        let address = contact.address.clone();
        let previous = contacts.insert(address.clone(), contact);
        // A failed write must not leave memory ahead of the disk; a reopen
        // would silently forget the record.
        if let Err(e) = self.write_file(CONTACTS_FILE, &*contacts) {
            match previous {
                Some(prev) => contacts.insert(address, prev),
                None => contacts.remove(&address),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove_contact(&self, address: &OnionAddress) -> Result<bool> {
        let mut contacts = self.contacts.write().unwrap();
        let Some(removed) = contacts.remove(address) else {
            return Ok(false);
        };
        if let Err(e) = self.write_file(CONTACTS_FILE, &*contacts) {
            contacts.insert(address.clone(), removed);
            return Err(e);
        }
        Ok(true)
    }

    fn list_contacts(&self) -> Result<Vec<Contact>> {
        Ok(self.contacts.read().unwrap().values().cloned().collect())
    }
}

impl PendingRequestStore for JsonFileStore {
    fn get_pending(&self, address: &OnionAddress) -> Result<Option<PendingRequest>> {
        Ok(self.pending.read().unwrap().get(address).cloned())
    }

    fn put_pending(&self, request: PendingRequest) -> Result<()> {
        let mut pending = self.pending.write().unwrap();
        let address = request.address.clone();
        let previous = pending.insert(address.clone(), request);
        if let Err(e) = self.write_file(PENDING_FILE, &*pending) {
            match previous {
                Some(prev) => pending.insert(address, prev),
                None => pending.remove(&address),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove_pending(&self, address: &OnionAddress) -> Result<bool> {
        let mut pending = self.pending.write().unwrap();
        let Some(removed) = pending.remove(address) else {
            return Ok(false);
        };
        if let Err(e) = self.write_file(PENDING_FILE, &*pending) {
            pending.insert(address.clone(), removed);
            return Err(e);
        }
        Ok(true)
    }

    fn list_pending(&self) -> Result<Vec<PendingRequest>> {
        Ok(self.pending.read().unwrap().values().cloned().collect())
    }
}

impl KeyStore for JsonFileStore {
    fn load_private_pem(&self) -> Result<Option<String>> {
        let path = self.base_dir.join(PRIVATE_KEY_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let material: StoredKeyMaterial = Self::load_file(&path)?;
        Ok(Some(material.pem))
    }

    fn store_private_pem(&self, pem: &str) -> Result<()> {
        self.write_file(
            PRIVATE_KEY_FILE,
            &StoredKeyMaterial {
                pem: pem.to_string(),
            },
        )
    }
}
