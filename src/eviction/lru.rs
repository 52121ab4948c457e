// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use crate::storage::catalog::FileRecord;
use crate::FileId;

/// Least recently used record not covered by `is_protected`.
///
/// Ties on access time go to the smallest id, so the choice does not depend
/// on map iteration order.
pub fn select_victim<'a, I, P>(records: I, is_protected: P) -> Option<&'a FileRecord>
where
    I: IntoIterator<Item = &'a FileRecord>,
    P: Fn(FileId) -> bool,
{
    records
        .into_iter()
        .filter(|r| !is_protected(r.id))
        .min_by_key(|r| (r.last_access_ms, r.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: FileId, last_access_ms: u64) -> FileRecord {
        FileRecord { id, size_bytes: 1, last_access_ms }
    }

    #[test]
    fn test_oldest_wins() {
        let records = [record(1, 300), record(2, 100), record(3, 200)];
        assert_eq!(select_victim(&records, |_| false).unwrap().id, 2);
    }

    #[test]
    fn test_tie_goes_to_smallest_id() {
        let records = [record(9, 100), record(4, 100), record(6, 100)];
        assert_eq!(select_victim(&records, |_| false).unwrap().id, 4);
    }

    #[test]
    fn test_protected_records_are_skipped() {
        let records = [record(1, 100), record(2, 200)];
        assert_eq!(select_victim(&records, |id| id == 1).unwrap().id, 2);
        assert!(select_victim(&records, |_| true).is_none());
    }

    #[test]
    fn test_empty_catalog() {
        let records: [FileRecord; 0] = [];
        assert!(select_victim(&records, |_| false).is_none());
    }
}
