//! Durable storage for offers and warehouse contents.
//!
//! Both documents are versioned JSON. `ItemDescriptor::extra` is written as
//! base64 so oversized quantities carried in metadata are never truncated.

use crate::model::{Offer, WarehouseEntry};
use crate::PartyId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub const OFFERS_FILE: &str = "offers.json";
pub const WAREHOUSE_FILE: &str = "warehouse.json";
const FORMAT_VERSION: u32 = 1;

pub type WarehouseMap = BTreeMap<PartyId, Vec<WarehouseEntry>>;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt {file}: {reason}")]
    Corrupt { file: String, reason: String },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;

pub trait PersistenceBackend: Send + Sync {
    fn save_offers(&self, offers: &[Offer]) -> PersistenceResult<()>;
    fn load_offers(&self) -> PersistenceResult<Vec<Offer>>;
    fn save_warehouse(&self, warehouse: &WarehouseMap) -> PersistenceResult<()>;
    fn load_warehouse(&self) -> PersistenceResult<WarehouseMap>;
}

#[derive(Debug, Serialize, Deserialize)]
struct OffersDocument {
    version: u32,
    offers: Vec<Offer>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WarehouseDocument {
    version: u32,
    owners: WarehouseMap,
}

pub fn encode_offers(offers: &[Offer]) -> PersistenceResult<String> {
    let document = OffersDocument {
        version: FORMAT_VERSION,
        offers: offers.to_vec(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

pub fn decode_offers(raw: &str) -> PersistenceResult<Vec<Offer>> {
    let document: OffersDocument = serde_json::from_str(raw).map_err(|e| PersistenceError::Corrupt {
        file: OFFERS_FILE.to_string(),
        reason: e.to_string(),
    })?;
    check_version(OFFERS_FILE, document.version)?;
    Ok(document.offers)
}

pub fn encode_warehouse(warehouse: &WarehouseMap) -> PersistenceResult<String> {
    let document = WarehouseDocument {
        version: FORMAT_VERSION,
        owners: warehouse.clone(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

pub fn decode_warehouse(raw: &str) -> PersistenceResult<WarehouseMap> {
    let document: WarehouseDocument = serde_json::from_str(raw).map_err(|e| PersistenceError::Corrupt {
        file: WAREHOUSE_FILE.to_string(),
        reason: e.to_string(),
    })?;
    check_version(WAREHOUSE_FILE, document.version)?;
    Ok(document.owners)
}

fn check_version(file: &str, version: u32) -> PersistenceResult<()> {
    if version != FORMAT_VERSION {
        return Err(PersistenceError::Corrupt {
            file: file.to_string(),
            reason: format!("unsupported format version {}", version),
        });
    }
    Ok(())
}

/// Stores `offers.json` and `warehouse.json` in one directory.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    pub fn new<P: AsRef<Path>>(dir: P) -> PersistenceResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        info!(path = %dir.display(), "Data directory initialized");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read(&self, file: &str) -> PersistenceResult<Option<String>> {
        read_optional(&self.dir.join(file))
    }

    fn write(&self, file: &str, payload: &str) -> PersistenceResult<()> {
        write_atomic(&self.dir.join(file), payload)
    }
}

/// Reads a whole file; a missing file is `None`.
pub(crate) fn read_optional(path: &Path) -> PersistenceResult<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Writes to a sibling temp file, then renames it over the target.
pub(crate) fn write_atomic(path: &Path, payload: &str) -> PersistenceResult<()> {
    let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

    std::fs::write(&temp_path, payload)?;
    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }

    debug!(path = %path.display(), bytes = payload.len(), "Wrote data file");
    Ok(())
}

impl PersistenceBackend for JsonFileBackend {
    fn save_offers(&self, offers: &[Offer]) -> PersistenceResult<()> {
        self.write(OFFERS_FILE, &encode_offers(offers)?)
    }

    fn load_offers(&self) -> PersistenceResult<Vec<Offer>> {
        match self.read(OFFERS_FILE)? {
            Some(raw) => decode_offers(&raw),
            None => Ok(Vec::new()),
        }
    }

    fn save_warehouse(&self, warehouse: &WarehouseMap) -> PersistenceResult<()> {
        self.write(WAREHOUSE_FILE, &encode_warehouse(warehouse)?)
    }

    fn load_warehouse(&self) -> PersistenceResult<WarehouseMap> {
        match self.read(WAREHOUSE_FILE)? {
            Some(raw) => decode_warehouse(&raw),
            None => Ok(WarehouseMap::new()),
        }
    }
}

/// In-memory backend using the same codec as the file backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    offers: Mutex<Option<String>>,
    warehouse: Mutex<Option<String>>,
    fail_writes: AtomicBool,
    offer_writes: Mutex<usize>,
    warehouse_writes: Mutex<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent save fail until turned off again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_raw_offers(&self, raw: impl Into<String>) {
        *self.offers.lock() = Some(raw.into());
    }

    pub fn set_raw_warehouse(&self, raw: impl Into<String>) {
        *self.warehouse.lock() = Some(raw.into());
    }

    pub fn raw_offers(&self) -> Option<String> {
        self.offers.lock().clone()
    }

    /// Number of successful offer saves.
    pub fn offer_writes(&self) -> usize {
        *self.offer_writes.lock()
    }

    pub fn warehouse_writes(&self) -> usize {
        *self.warehouse_writes.lock()
    }

    fn check_writable(&self) -> PersistenceResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

impl PersistenceBackend for MemoryBackend {
    fn save_offers(&self, offers: &[Offer]) -> PersistenceResult<()> {
        self.check_writable()?;
        *self.offers.lock() = Some(encode_offers(offers)?);
        *self.offer_writes.lock() += 1;
        Ok(())
    }

    fn load_offers(&self) -> PersistenceResult<Vec<Offer>> {
        match self.offers.lock().as_deref() {
            Some(raw) => decode_offers(raw),
            None => Ok(Vec::new()),
        }
    }

    fn save_warehouse(&self, warehouse: &WarehouseMap) -> PersistenceResult<()> {
        self.check_writable()?;
        *self.warehouse.lock() = Some(encode_warehouse(warehouse)?);
        *self.warehouse_writes.lock() += 1;
        Ok(())
    }

    fn load_warehouse(&self) -> PersistenceResult<WarehouseMap> {
        match self.warehouse.lock().as_deref() {
            Some(raw) => decode_warehouse(raw),
            None => Ok(WarehouseMap::new()),
        }
    }
}
