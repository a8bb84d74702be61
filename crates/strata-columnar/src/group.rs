#![forbid(unsafe_code)]

use crate::context::Platform;
use crate::error::{ColumnarError, Result};
use serde::{Deserialize, Serialize};
use strata_store::{Key, Store};
use uuid::Uuid;

/// The record stored under a group key: just the id high-water mark.
#[derive(Debug, Serialize, Deserialize)]
struct GroupRecord {
    next_id: u32,
}

/// A column group: the unit of chunk-layout sharing.
///
/// Columns in the same group agree on chunk boundaries, so row-aligned
/// operations across them never re-partition. The group itself stores
/// only a member-id counter; membership is implicit in the key scheme
/// (every member key carries the group payload).
#[derive(Clone, Debug)]
pub struct ColumnGroup {
    key: Key,
    store: Store,
}

impl ColumnGroup {
    /// A brand-new group with a random identity.
    pub fn fresh(platform: &Platform) -> ColumnGroup {
        let payload = *Uuid::new_v4().as_bytes();
        ColumnGroup {
            key: Key::group(&payload),
            store: platform.store().clone(),
        }
    }

    /// The group a column or chunk key belongs to.
    pub fn of(platform: &Platform, member: &Key) -> ColumnGroup {
        ColumnGroup {
            key: member.group_of(),
            store: platform.store().clone(),
        }
    }

    pub(crate) fn with_store(store: Store, key: Key) -> ColumnGroup {
        debug_assert_eq!(key, key.group_of());
        ColumnGroup { key, store }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Reserve `count` consecutive member ids and return the first.
    ///
    /// Runs as one atomic read-modify-write of the group record, so
    /// concurrent reservations from any number of builders never
    /// overlap. Ids start at 1; 0 is never handed out.
    pub fn reserve(&self, count: u32) -> Result<u32> {
        debug_assert!(count > 0);
        let mut first = 1;
        let mut failure = None;
        let updated = self.store.compare_and_update(&self.key, |old| {
            let record: GroupRecord = match old {
                Some(bytes) => match serde_json::from_slice(bytes) {
                    Ok(record) => record,
                    // An undecodable record must not reset the counter:
                    // reused ids would overwrite live columns. Leave the
                    // record as is and abort.
                    Err(err) => {
                        failure = Some(err);
                        return Some(bytes.to_vec());
                    }
                },
                None => GroupRecord { next_id: 1 },
            };
            first = record.next_id;
            let next = GroupRecord {
                next_id: record.next_id + count,
            };
            Some(serde_json::to_vec(&next).expect("group record serializes"))
        });
        debug_assert!(updated.is_some());
        if let Some(err) = failure {
            tracing::error!(key = ?self.key, %err, "group record undecodable");
            return Err(ColumnarError::StoreInconsistency(format!(
                "group record undecodable for {:?}: {err}",
                self.key
            )));
        }
        Ok(first)
    }

    /// The column key for member `id` of this group.
    pub fn member_key(&self, id: u32) -> Key {
        self.key.member(id)
    }

    /// Reserve one id and return its column key.
    pub fn fresh_member_key(&self) -> Result<Key> {
        Ok(self.member_key(self.reserve(1)?))
    }
}
