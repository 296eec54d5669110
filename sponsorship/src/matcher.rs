use crate::types::{IndexedRecord, RasterId, Snapshot};

/// Finds the feature an identifier refers to.
///
/// Scans the snapshot from the lowest position and stops at the first record
/// carrying `raster_id`, so later duplicates are never selected.
pub fn first_match(snapshot: &Snapshot, raster_id: RasterId) -> Option<&IndexedRecord> {
    snapshot
        .records()
        .iter()
        .find(|indexed| indexed.record.raster_id() == Some(raster_id))
}
