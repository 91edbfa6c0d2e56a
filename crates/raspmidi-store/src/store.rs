//! JSON-file backed patch store.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use raspmidi_core::{BankSlot, Patch, PatchFields, Routing};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::order::PatchOrder;

pub const DEFAULT_MAX_PATCHES: usize = 100;

/// The patch last sent to its device, kept across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRecord {
    pub id: u64,
    pub activated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    next_id: u64,
    patches: Vec<Patch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    active: Option<ActiveRecord>,
}

impl StoreData {
    fn position(&self, id: u64) -> Option<usize> {
        self.patches.iter().position(|p| p.id == id)
    }

    /// Channel and bank/slot uniqueness against every patch except `exclude`.
    fn check_unique(&self, routing: &Routing, exclude: Option<u64>) -> Result<()> {
        let others = self.patches.iter().filter(|p| Some(p.id) != exclude);

        if let Some(channel) = routing.input_channel {
            if let Some(owner) = others
                .clone()
                .find(|p| p.routing.input_channel == Some(channel))
            {
                return Err(Error::DuplicateChannel {
                    channel,
                    patch: owner.routing.name.clone(),
                });
            }
        }

        if let Some(slot) = routing.bank_slot() {
            if let Some(owner) = others.clone().find(|p| p.bank_slot() == Some(slot)) {
                return Err(Error::DuplicateBankSlot {
                    slot,
                    patch: owner.routing.name.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Patch collection with write-time invariant checks.
///
/// Every mutation is staged on a copy, written to disk, and only then
/// published, so a failed write leaves both the file and memory untouched.
#[derive(Debug)]
pub struct PatchStore {
    path: Option<PathBuf>,
    max_patches: usize,
    data: RwLock<StoreData>,
}

impl PatchStore {
    /// Opens (or starts) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut data: StoreData = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                StoreData::default()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            StoreData::default()
        };
        data.patches.sort_by_key(|p| p.id);
        let highest = data.patches.iter().map(|p| p.id).max().unwrap_or(0);
        data.next_id = data.next_id.max(highest + 1);
        if let Some(active) = data.active {
            if data.position(active.id).is_none() {
                debug!(id = active.id, "Dropping active record for a missing patch");
                data.active = None;
            }
        }

        info!(path = %path.display(), patches = data.patches.len(), "Patch store opened");
        Ok(Self {
            path: Some(path),
            max_patches: DEFAULT_MAX_PATCHES,
            data: RwLock::new(data),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            max_patches: DEFAULT_MAX_PATCHES,
            data: RwLock::new(StoreData {
                next_id: 1,
                patches: Vec::new(),
                active: None,
            }),
        }
    }

    pub fn with_max_patches(mut self, max_patches: usize) -> Self {
        self.max_patches = max_patches;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Validates `fields` and adds a patch under the next free id.
    ///
    /// Fails with `DuplicateChannel` or `DuplicateBankSlot` when another patch
    /// already owns the input channel or Zoom slot, and with `Validation` once
    /// the store holds `max_patches`.
    pub fn create(&self, fields: &PatchFields) -> Result<Patch> {
        let routing = fields.validate()?;
        let mut data = self.data.write();

        if data.patches.len() >= self.max_patches {
            return Err(Error::Validation(format!(
                "Patch limit reached ({})",
                self.max_patches
            )));
        }
        data.check_unique(&routing, None)?;

        let mut staged = data.clone();
        let id = staged.next_id.max(1);
        let patch = Patch::new(id, routing, Utc::now());
        staged.next_id = id + 1;
        staged.patches.push(patch.clone());

        self.persist(&staged)?;
        *data = staged;
        Ok(patch)
    }

    /// Replaces the routing of patch `id`, keeping its id and `created_at`.
    ///
    /// Uniqueness is checked against every other patch, so a patch may keep
    /// its own channel and slot.
    pub fn update(&self, id: u64, fields: &PatchFields) -> Result<Patch> {
        let routing = fields.validate()?;
        let mut data = self.data.write();

        let index = data.position(id).ok_or(Error::NotFound(id))?;
        data.check_unique(&routing, Some(id))?;

        let mut staged = data.clone();
        let patch = staged.patches[index].replaced(routing, Utc::now());
        staged.patches[index] = patch.clone();

        self.persist(&staged)?;
        *data = staged;
        Ok(patch)
    }

    /// Removes patch `id` and returns it. Its channel and slot become free,
    /// and it stops being the active patch.
    pub fn delete(&self, id: u64) -> Result<Patch> {
        let mut data = self.data.write();
        let index = data.position(id).ok_or(Error::NotFound(id))?;

        let mut staged = data.clone();
        let removed = staged.patches.remove(index);
        if staged.active.is_some_and(|a| a.id == id) {
            staged.active = None;
        }

        self.persist(&staged)?;
        *data = staged;
        Ok(removed)
    }

    /// Records patch `id` as the active one.
    pub fn set_active(&self, id: u64, activated_at: DateTime<Utc>) -> Result<ActiveRecord> {
        let mut data = self.data.write();
        data.position(id).ok_or(Error::NotFound(id))?;

        let record = ActiveRecord { id, activated_at };
        let mut staged = data.clone();
        staged.active = Some(record);

        self.persist(&staged)?;
        *data = staged;
        Ok(record)
    }

    /// The active patch and when it was activated.
    pub fn active(&self) -> Option<(Patch, DateTime<Utc>)> {
        let data = self.data.read();
        let record = data.active?;
        let index = data.position(record.id)?;
        Some((data.patches[index].clone(), record.activated_at))
    }

    /// Fetches one patch by id.
    pub fn get(&self, id: u64) -> Result<Patch> {
        let data = self.data.read();
        data.position(id)
            .map(|i| data.patches[i].clone())
            .ok_or(Error::NotFound(id))
    }

    /// Every patch, sorted by `order`.
    pub fn list(&self, order: PatchOrder) -> Vec<Patch> {
        let mut patches = self.data.read().patches.clone();
        patches.sort_by(|a, b| order.compare(a, b));
        patches
    }

    pub fn len(&self) -> usize {
        self.data.read().patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn used_channels(&self) -> BTreeSet<u8> {
        self.data
            .read()
            .patches
            .iter()
            .filter_map(|p| p.routing.input_channel)
            .collect()
    }

    pub fn used_bank_slots(&self) -> BTreeSet<BankSlot> {
        self.data
            .read()
            .patches
            .iter()
            .filter_map(Patch::bank_slot)
            .collect()
    }

    pub fn find_by_input_channel(&self, channel: u8) -> Option<Patch> {
        self.data
            .read()
            .patches
            .iter()
            .find(|p| p.routing.input_channel == Some(channel))
            .cloned()
    }

    fn persist(&self, data: &StoreData) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(data)?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, path)?;
        debug!(path = %path.display(), patches = data.patches.len(), "Patch store saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> PatchFields {
        serde_json::from_value(value).unwrap()
    }

    fn pc(name: &str, channel: Option<i64>, zoom_patch: Option<i64>) -> PatchFields {
        fields(json!({
            "name": name,
            "input_device": "Chocolate",
            "output_device": "zoom_g3x",
            "command_type": "pc",
            "input_channel": channel,
            "zoom_patch": zoom_patch,
            "program": 1,
        }))
    }

    #[test]
    fn test_create_assigns_monotonic_ids() {
        let store = PatchStore::in_memory();
        let a = store.create(&pc("A", Some(0), None)).unwrap();
        let b = store.create(&pc("B", Some(1), None)).unwrap();
        assert_eq!((a.id, b.id), (1, 2));

        store.delete(b.id).unwrap();
        let c = store.create(&pc("C", Some(2), None)).unwrap();
        assert_eq!(c.id, 3, "ids are never reused");
    }

    #[test]
    fn test_duplicate_channel() {
        let store = PatchStore::in_memory();
        store.create(&pc("A", Some(5), None)).unwrap();
        let err = store.create(&pc("B", Some(5), None)).unwrap_err();
        assert!(matches!(err, Error::DuplicateChannel { channel: 5, .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_duplicate_bank_slot_through_different_inputs() {
        let store = PatchStore::in_memory();
        store.create(&pc("A", None, Some(15))).unwrap();

        let same_slot = fields(json!({
            "name": "B",
            "input_device": "Chocolate",
            "output_device": "zoom_g3x",
            "command_type": "pc",
            "zoom_bank": "b",
            "zoom_slot": 5,
        }));
        let err = store.create(&same_slot).unwrap_err();
        match err {
            Error::DuplicateBankSlot { slot, patch } => {
                assert_eq!(slot.to_string(), "B5");
                assert_eq!(patch, "A");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_update_keeps_own_channel_and_slot() {
        let store = PatchStore::in_memory();
        let patch = store.create(&pc("A", Some(3), Some(42))).unwrap();
        let updated = store.update(patch.id, &pc("A2", Some(3), Some(42))).unwrap();
        assert_eq!(updated.id, patch.id);
        assert_eq!(updated.created_at, patch.created_at);
        assert_eq!(updated.routing.name, "A2");
        assert!(updated.updated_at >= patch.updated_at);
    }

    #[test]
    fn test_update_conflicting_with_other_patch() {
        let store = PatchStore::in_memory();
        store.create(&pc("A", Some(1), None)).unwrap();
        let b = store.create(&pc("B", Some(2), None)).unwrap();
        let err = store.update(b.id, &pc("B", Some(1), None)).unwrap_err();
        assert!(matches!(err, Error::DuplicateChannel { .. }));
        assert_eq!(store.get(b.id).unwrap().routing.input_channel, Some(2));
    }

    #[test]
    fn test_update_unknown_id() {
        let store = PatchStore::in_memory();
        let err = store.update(99, &pc("A", None, None)).unwrap_err();
        assert!(matches!(err, Error::NotFound(99)));
    }

    #[test]
    fn test_delete_twice_is_not_found() {
        let store = PatchStore::in_memory();
        let patch = store.create(&pc("A", Some(1), None)).unwrap();
        store.delete(patch.id).unwrap();
        assert!(matches!(store.delete(patch.id), Err(Error::NotFound(_))));
        assert!(store.list(PatchOrder::Insertion).is_empty());
    }

    #[test]
    fn test_validation_happens_before_mutation() {
        let store = PatchStore::in_memory();
        let err = store
            .create(&fields(json!({"name": "x", "command_type": "pc"})))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_projections_follow_invariant_state() {
        let store = PatchStore::in_memory();
        store.create(&pc("A", Some(4), Some(15))).unwrap();
        let b = store.create(&pc("B", Some(2), Some(99))).unwrap();
        store.create(&pc("C", None, None)).unwrap();

        assert_eq!(store.used_channels().into_iter().collect::<Vec<_>>(), vec![2, 4]);
        let slots: Vec<String> = store.used_bank_slots().iter().map(|s| s.to_string()).collect();
        assert_eq!(slots, vec!["B5", "J9"]);

        store.delete(b.id).unwrap();
        assert!(!store.used_channels().contains(&2));
        assert_eq!(store.used_bank_slots().len(), 1);
    }

    #[test]
    fn test_list_orderings() {
        let store = PatchStore::in_memory();
        let a = store.create(&pc("A", Some(9), None)).unwrap();
        let b = store.create(&pc("B", None, Some(5))).unwrap();
        let c = store.create(&pc("C", Some(1), Some(50))).unwrap();

        let ids = |order| {
            store
                .list(order)
                .into_iter()
                .map(|p| p.id)
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(PatchOrder::Insertion), vec![a.id, b.id, c.id]);
        assert_eq!(ids(PatchOrder::InputChannel), vec![c.id, a.id, b.id]);
        assert_eq!(ids(PatchOrder::BankSlot), vec![b.id, c.id, a.id]);
        assert_eq!(ids(PatchOrder::CreatedAt), vec![a.id, b.id, c.id]);
    }

    #[test]
    fn test_max_patches() {
        let store = PatchStore::in_memory().with_max_patches(1);
        store.create(&pc("A", None, None)).unwrap();
        assert!(matches!(
            store.create(&pc("B", None, None)),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_find_by_input_channel() {
        let store = PatchStore::in_memory();
        store.create(&pc("A", Some(7), None)).unwrap();
        assert_eq!(store.find_by_input_channel(7).unwrap().routing.name, "A");
        assert!(store.find_by_input_channel(8).is_none());
    }

    #[test]
    fn test_active_record_follows_patch() {
        let store = PatchStore::in_memory();
        let a = store.create(&pc("A", Some(1), None)).unwrap();
        let b = store.create(&pc("B", Some(2), None)).unwrap();
        assert!(store.active().is_none());

        let at = Utc::now();
        store.set_active(a.id, at).unwrap();
        let (patch, activated_at) = store.active().unwrap();
        assert_eq!((patch.id, activated_at), (a.id, at));

        store.delete(b.id).unwrap();
        assert_eq!(store.active().unwrap().0.id, a.id);
        store.delete(a.id).unwrap();
        assert!(store.active().is_none());

        assert!(matches!(store.set_active(a.id, at), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_order_parsing() {
        assert_eq!("bank_slot".parse::<PatchOrder>().unwrap(), PatchOrder::BankSlot);
        assert_eq!("".parse::<PatchOrder>().unwrap(), PatchOrder::Insertion);
        assert!("random".parse::<PatchOrder>().is_err());
    }
}
