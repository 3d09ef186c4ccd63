//! Instrument Directory
//!
//! Indexes the instrument catalog and resolves instruments given either a
//! numeric identifier or an `EXCHANGE|NAME` symbol.
//!
//! # Design
//!
//! The directory holds two maps built from one catalog snapshot:
//! - name key (`EXCHANGE|NAME`) → instrument id
//! - instrument id → name key
//!
//! Both maps are built together and never mutated afterwards, so they are
//! always inverse of one another. A refreshed catalog produces a new
//! directory which replaces the old one wholesale.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::str::FromStr;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

// =============================================================================
// Types
// =============================================================================

/// Numeric instrument identifier assigned by the feed.
pub type InstrumentId = i64;

/// Separator between exchange segment and instrument name in a name key.
pub const NAME_KEY_SEPARATOR: char = '|';

/// Gzip magic bytes, used to detect compressed catalogs.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One entry of the instrument catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentRecord {
    /// Exchange segment (e.g. `NSECM`).
    pub exchange_segment: String,
    /// Instrument name within the segment (e.g. `RELIANCE`).
    pub instrument_name: String,
    /// Numeric instrument identifier.
    pub instrument_id: InstrumentId,
}

impl InstrumentRecord {
    /// Create a new record.
    #[must_use]
    pub fn new(
        exchange_segment: impl Into<String>,
        instrument_name: impl Into<String>,
        instrument_id: InstrumentId,
    ) -> Self {
        Self {
            exchange_segment: exchange_segment.into(),
            instrument_name: instrument_name.into(),
            instrument_id,
        }
    }

    /// The `EXCHANGE|NAME` key for this record.
    #[must_use]
    pub fn name_key(&self) -> String {
        format!(
            "{}{NAME_KEY_SEPARATOR}{}",
            self.exchange_segment, self.instrument_name
        )
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while building a directory from catalog bytes.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The gzip stream could not be decompressed.
    #[error("catalog decompression failed: {0}")]
    Decompress(#[from] std::io::Error),

    /// The catalog JSON could not be parsed.
    #[error("catalog parse failed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors raised while resolving a single instrument.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstrumentError {
    /// No instrument is registered under this symbol.
    #[error("instrument not found for symbol: {0}")]
    SymbolNotFound(String),

    /// No instrument is registered under this id.
    #[error("instrument id {0} not found in directory")]
    IdNotFound(InstrumentId),

    /// Symbol and id were both given but refer to different instruments.
    #[error("instrument id mismatch for {symbol}: expected {expected}, got {got}")]
    Mismatch {
        /// Symbol that was looked up.
        symbol: String,
        /// Id registered for the symbol.
        expected: InstrumentId,
        /// Id supplied by the caller.
        got: InstrumentId,
    },

    /// The request could not be interpreted.
    #[error("invalid instrument argument: {0}")]
    InvalidArgument(String),
}

/// Failure of an all-or-nothing batch resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("instrument #{index} ({item}) could not be resolved: {source}")]
pub struct BatchError {
    /// Position of the failing item in the input.
    pub index: usize,
    /// The failing item.
    pub item: InstrumentRef,
    /// Why it failed.
    #[source]
    pub source: InstrumentError,
}

// =============================================================================
// Instrument References
// =============================================================================

/// A caller-supplied reference to an instrument.
///
/// Strings that consist only of digits are treated as ids; any other string
/// is kept as a symbol and validated when it is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstrumentRef {
    /// Numeric instrument id.
    Id(InstrumentId),
    /// Symbol in `EXCHANGE|NAME[|ignored...]` form.
    Symbol(String),
}

impl InstrumentRef {
    /// Normalize a symbol to its `EXCHANGE|NAME` key.
    ///
    /// Only the first two `|`-delimited segments are significant; trailing
    /// segments are discarded without validation.
    ///
    /// # Errors
    ///
    /// Returns [`InstrumentError::InvalidArgument`] if the exchange segment
    /// or the name is missing.
    pub fn normalize_symbol(raw: &str) -> Result<String, InstrumentError> {
        let mut parts = raw.trim().split(NAME_KEY_SEPARATOR);
        match (parts.next(), parts.next()) {
            (Some(exchange), Some(name)) if !exchange.is_empty() && !name.is_empty() => {
                Ok(format!("{exchange}{NAME_KEY_SEPARATOR}{name}"))
            }
            _ => Err(InstrumentError::InvalidArgument(format!(
                "exchange segment missing, use EXCHANGE|NAME (e.g. NSECM|RELIANCE), got: {raw}"
            ))),
        }
    }
}

impl From<InstrumentId> for InstrumentRef {
    fn from(id: InstrumentId) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for InstrumentRef {
    fn from(raw: &str) -> Self {
        let trimmed = raw.trim();
        if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(id) = trimmed.parse() {
                return Self::Id(id);
            }
        }
        Self::Symbol(raw.to_string())
    }
}

impl From<String> for InstrumentRef {
    fn from(raw: String) -> Self {
        Self::from(raw.as_str())
    }
}

impl From<&String> for InstrumentRef {
    fn from(raw: &String) -> Self {
        Self::from(raw.as_str())
    }
}

impl FromStr for InstrumentRef {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for InstrumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Symbol(symbol) => f.write_str(symbol),
        }
    }
}

// =============================================================================
// Batch Resolution
// =============================================================================

/// Result of a per-item batch resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResolution {
    /// Resolved ids, in input order, skipping failed items.
    pub resolved: Vec<InstrumentId>,
    /// Failed items with their input position.
    pub failures: Vec<BatchError>,
}

impl BatchResolution {
    /// Whether every item resolved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

// =============================================================================
// Instrument Directory
// =============================================================================

/// Bidirectional symbol/id index built from one catalog snapshot.
///
/// # Example
///
/// ```rust
/// use marketdata_stream::domain::instrument::{InstrumentDirectory, InstrumentRecord};
///
/// let directory = InstrumentDirectory::from_records([
///     InstrumentRecord::new("NSECM", "RELIANCE", 100),
///     InstrumentRecord::new("NSECM", "TCS", 200),
/// ]);
///
/// assert_eq!(directory.resolve(Some("NSECM|RELIANCE|ignored"), None), Ok(100));
/// assert_eq!(directory.symbol_for(200), Some("NSECM|TCS"));
/// assert!(directory.resolve(Some("NSECM|RELIANCE"), Some(200)).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct InstrumentDirectory {
    by_name: HashMap<String, InstrumentId>,
    by_id: HashMap<InstrumentId, String>,
}

impl InstrumentDirectory {
    /// Build a directory from catalog bytes.
    ///
    /// Accepts either a JSON array of records or the same array gzip
    /// compressed. Nothing is returned unless the whole catalog parses.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if decompression or parsing fails.
    pub fn load(bytes: &[u8]) -> Result<Self, CatalogError> {
        let records: Vec<InstrumentRecord> = if bytes.starts_with(&GZIP_MAGIC) {
            let mut json = Vec::with_capacity(bytes.len() * 4);
            GzDecoder::new(bytes).read_to_end(&mut json)?;
            serde_json::from_slice(&json)?
        } else {
            serde_json::from_slice(bytes)?
        };

        let directory = Self::from_records(records);
        tracing::info!(instruments = directory.len(), "Loaded instrument catalog");
        Ok(directory)
    }

    /// Build a directory from already parsed records.
    ///
    /// When a later record reuses a name key or an id, the later record wins
    /// and the pair it displaces is dropped from both maps.
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = InstrumentRecord>) -> Self {
        let mut directory = Self::default();
        let mut displaced = 0_usize;

        for record in records {
            let key = record.name_key();
            let id = record.instrument_id;

            if let Some(old_id) = directory.by_name.insert(key.clone(), id)
                && old_id != id
            {
                directory.by_id.remove(&old_id);
                displaced += 1;
            }
            if let Some(old_key) = directory.by_id.insert(id, key.clone())
                && old_key != key
            {
                directory.by_name.remove(&old_key);
                displaced += 1;
            }
        }

        if displaced > 0 {
            tracing::warn!(displaced, "Catalog contained conflicting instrument entries");
        }

        directory
    }

    /// Number of instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Look up the id registered for a name key.
    #[must_use]
    pub fn id_for(&self, name_key: &str) -> Option<InstrumentId> {
        self.by_name.get(name_key).copied()
    }

    /// Look up the name key registered for an id.
    #[must_use]
    pub fn symbol_for(&self, id: InstrumentId) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// Iterate over `(name key, id)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, InstrumentId)> {
        self.by_name.iter().map(|(name, id)| (name.as_str(), *id))
    }

    /// Resolve an instrument from a symbol, an id, or both.
    ///
    /// A symbol with more than two `|` segments is truncated to its first
    /// two before lookup.
    ///
    /// # Errors
    ///
    /// - [`InstrumentError::SymbolNotFound`] / [`InstrumentError::IdNotFound`]
    ///   if the instrument is unknown
    /// - [`InstrumentError::Mismatch`] if both are given and disagree
    /// - [`InstrumentError::InvalidArgument`] if neither is given
    pub fn resolve(
        &self,
        symbol: Option<&str>,
        id: Option<InstrumentId>,
    ) -> Result<InstrumentId, InstrumentError> {
        match (symbol, id) {
            (Some(symbol), None) => {
                let key = lookup_key(symbol);
                let resolved = self
                    .id_for(&key)
                    .ok_or_else(|| InstrumentError::SymbolNotFound(key.clone()))?;
                tracing::debug!(symbol = %key, instrument_id = resolved, "Instrument matched");
                Ok(resolved)
            }
            (None, Some(id)) => {
                let key = self
                    .symbol_for(id)
                    .ok_or(InstrumentError::IdNotFound(id))?;
                tracing::debug!(symbol = %key, instrument_id = id, "Instrument matched");
                Ok(id)
            }
            (Some(symbol), Some(id)) => {
                let key = lookup_key(symbol);
                let expected = self
                    .id_for(&key)
                    .ok_or_else(|| InstrumentError::SymbolNotFound(key.clone()))?;
                if expected != id {
                    return Err(InstrumentError::Mismatch {
                        symbol: key,
                        expected,
                        got: id,
                    });
                }
                tracing::debug!(symbol = %key, instrument_id = id, "Instrument verified");
                Ok(id)
            }
            (None, None) => Err(InstrumentError::InvalidArgument(
                "either symbol or instrument id must be provided".to_string(),
            )),
        }
    }

    /// Resolve a single caller reference.
    ///
    /// Unlike [`Self::resolve`], a symbol reference must carry both an
    /// exchange segment and a name.
    ///
    /// # Errors
    ///
    /// Returns [`InstrumentError`] if the reference is malformed or unknown.
    pub fn resolve_ref(&self, item: &InstrumentRef) -> Result<InstrumentId, InstrumentError> {
        match item {
            InstrumentRef::Id(id) => self.resolve(None, Some(*id)),
            InstrumentRef::Symbol(raw) => {
                let key = InstrumentRef::normalize_symbol(raw)?;
                self.resolve(Some(&key), None)
            }
        }
    }

    /// Resolve every item, aborting on the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first [`BatchError`] in input order.
    pub fn resolve_all(&self, items: &[InstrumentRef]) -> Result<Vec<InstrumentId>, BatchError> {
        items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                self.resolve_ref(item).map_err(|source| BatchError {
                    index,
                    item: item.clone(),
                    source,
                })
            })
            .collect()
    }

    /// Resolve every item independently, collecting failures.
    #[must_use]
    pub fn resolve_each(&self, items: &[InstrumentRef]) -> BatchResolution {
        let mut outcome = BatchResolution::default();
        for (index, item) in items.iter().enumerate() {
            match self.resolve_ref(item) {
                Ok(id) => outcome.resolved.push(id),
                Err(source) => outcome.failures.push(BatchError {
                    index,
                    item: item.clone(),
                    source,
                }),
            }
        }
        outcome
    }
}

/// Truncate a symbol to its first two segments; leave it as-is otherwise.
fn lookup_key(symbol: &str) -> String {
    InstrumentRef::normalize_symbol(symbol).unwrap_or_else(|_| symbol.trim().to_string())
}

// =============================================================================
// Tests
// =============================================================================
