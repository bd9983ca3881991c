//! Interfaces to the world runtime and the morph backend.
//!
//! The distribution engine never owns characters, items or morph storage; it
//! reads snapshots handed in by the caller and talks to the rest of the host
//! through the traits below.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::catalog::Gender;

/// Full, load-order resolved id of a world record.
pub type FormId = u32;

/// Stable reference to a live character, valid across threads.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ActorHandle(pub u32);

/// Equipment slots the worn-item classifier looks at.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodySlot {
    Body,
    ChestPrimary,
    ChestSecondary,
    PelvisPrimary,
    PelvisSecondary,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    #[default]
    Armor,
    Armature,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WornItem {
    pub form_id: FormId,
    pub name: String,
    /// Content source that first defines the item.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub kind: ItemKind,
    /// Slots this item occupies.
    #[serde(default)]
    pub slots: Vec<BodySlot>,
}

/// Snapshot of one character, taken by the caller when an event fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorInfo {
    pub handle: ActorHandle,
    /// Base record id, used by the id-keyed rule tables.
    pub form_id: FormId,
    pub name: String,
    pub gender: Gender,
    /// Race editor id.
    #[serde(default)]
    pub race: String,
    /// Faction editor ids, in membership order.
    #[serde(default)]
    pub factions: Vec<String>,
    /// Content sources that declare or override this character; the first
    /// one owns it.
    #[serde(default)]
    pub source_files: Vec<String>,
    /// Host weight attribute, 0..=100.
    #[serde(default)]
    pub weight: f32,
    #[serde(default)]
    pub worn: Vec<WornItem>,
}

impl ActorInfo {
    /// Weight normalised to [0, 1].
    pub fn normalized_weight(&self) -> f32 {
        (self.weight / 100.0).clamp(0.0, 1.0)
    }

    pub fn owning_source(&self) -> Option<&str> {
        self.source_files.first().map(String::as_str)
    }

    pub fn is_from_source(&self, source: &str) -> bool {
        self.source_files.iter().any(|s| s == source)
    }

    pub fn item_in_slot(&self, slot: BodySlot) -> Option<&WornItem> {
        self.worn.iter().find(|item| item.slots.contains(&slot))
    }
}

/// Read access to the loaded world, used while validating configuration.
pub trait WorldRegistry {
    fn is_source_loaded(&self, source: &str) -> bool;

    /// Resolve a source-local id to the full id of a record, if it exists.
    fn lookup_form(&self, local_id: u32, source: &str) -> Option<FormId>;

    fn faction_exists(&self, editor_id: &str) -> bool;

    /// Display names of every currently valid character.
    fn character_names(&self) -> BTreeSet<String>;

    fn race_ids(&self) -> BTreeSet<String>;

    fn outfit_names(&self) -> BTreeSet<String>;
}

/// Per-character morph storage and model refresh.
pub trait MorphBackend: Send + Sync {
    fn set_morph(&self, actor: ActorHandle, morph: &str, key: &str, value: f32);

    fn get_morph(&self, actor: ActorHandle, morph: &str, key: &str) -> f32;

    fn has_morph(&self, actor: ActorHandle, morph: &str, key: &str) -> bool;

    /// Whether any morph is stored under `key`.
    fn has_morph_key(&self, actor: ActorHandle, key: &str) -> bool;

    fn clear_morphs(&self, actor: ActorHandle);

    fn clear_morph_key(&self, actor: ActorHandle, key: &str);

    fn apply_morphs(&self, actor: ActorHandle);

    fn update_model_weight(&self, actor: ActorHandle);
}

/// Liveness checks for handles that may outlive the character.
pub trait ActorPresence: Send + Sync {
    fn is_live(&self, actor: ActorHandle) -> bool;

    /// Whether the character's rendered model is currently loaded.
    fn is_loaded(&self, actor: ActorHandle) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub enum DistributionEvent {
    Generated { actor: ActorHandle, preset: String },
    Naked { actor: ActorHandle },
    RemovingClothes { actor: ActorHandle },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: DistributionEvent);
}

/// Notifier that drops every event.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: DistributionEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor() -> ActorInfo {
        ActorInfo {
            handle: ActorHandle(1),
            form_id: 0x13BA3,
            name: "Lydia".to_string(),
            gender: Gender::Female,
            race: "NordRace".to_string(),
            factions: vec![],
            source_files: vec!["Skyrim.esm".to_string(), "Patch.esp".to_string()],
            weight: 150.0,
            worn: vec![WornItem {
                form_id: 7,
                name: "Steel Armor".to_string(),
                source: "Skyrim.esm".to_string(),
                kind: ItemKind::Armor,
                slots: vec![BodySlot::Body, BodySlot::PelvisPrimary],
            }],
        }
    }

    #[test]
    fn weight_is_clamped() {
        assert_eq!(actor().normalized_weight(), 1.0);
    }

    #[test]
    fn first_source_owns_the_actor() {
        let a = actor();
        assert_eq!(a.owning_source(), Some("Skyrim.esm"));
        assert!(a.is_from_source("Patch.esp"));
        assert!(!a.is_from_source("Other.esp"));
    }

    #[test]
    fn multi_slot_items_fill_each_slot() {
        let a = actor();
        assert!(a.item_in_slot(BodySlot::Body).is_some());
        assert!(a.item_in_slot(BodySlot::PelvisPrimary).is_some());
        assert!(a.item_in_slot(BodySlot::ChestPrimary).is_none());
    }
}
