//! Capabilities a record type opts into so the store can address it.

use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;

use super::key::Key;

/// A typed document stored in one collection.
///
/// Implementors declare their collection name and expose their id. Records
/// living under another document override [`Record::parent`] and
/// [`Record::set_parent`]; records with bookkeeping timestamps override
/// [`Record::timestamps_mut`].
///
/// Writes stage a clone and copy it back once the store accepts it, so a
/// failed write leaves the caller's record untouched.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: &'static str;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    fn parent(&self) -> Option<&Key> {
        None
    }

    fn set_parent(&mut self, _parent: Option<Key>) {}

    fn timestamps_mut(&mut self) -> Option<&mut dyn HasTimestamps> {
        None
    }
}

/// Created/updated bookkeeping maintained on every write.
pub trait HasTimestamps {
    fn created_at(&self) -> Option<OffsetDateTime>;

    fn set_created_at(&mut self, at: OffsetDateTime);

    fn set_updated_at(&mut self, at: OffsetDateTime);
}

/// Apply write timestamps: `created_at` only when unset, `updated_at` always.
pub fn stamp<T: Record>(record: &mut T, now: OffsetDateTime) {
    if let Some(stamps) = record.timestamps_mut() {
        if stamps.created_at().is_none() {
            stamps.set_created_at(now);
        }
        stamps.set_updated_at(now);
    }
}
