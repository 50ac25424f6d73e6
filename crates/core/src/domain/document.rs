// Document Domain Model

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Document key inside a collection
pub type DocumentId = String;

/// A value persisted as one row of a keyed collection.
///
/// The store only guarantees atomicity for a single document, so every type
/// that takes part in a transaction names the collection it lives in and
/// round-trips through JSON.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Collection (table) the document is stored in
    const COLLECTION: &'static str;
}
