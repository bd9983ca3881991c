//! In-memory implementations of the host traits.
//!
//! Used by the tests and by the command-line driver, which feeds them from a
//! JSON world snapshot instead of a running game.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::host::{
    ActorHandle, ActorInfo, ActorPresence, DistributionEvent, FormId, MorphBackend, Notifier,
    WorldRegistry,
};

/// Where a content source sits in the load order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum LoadSlot {
    Full(u8),
    Light(u16),
}

impl LoadSlot {
    fn compile(self, local_id: u32) -> FormId {
        match self {
            LoadSlot::Full(index) => ((index as u32) << 24) | (local_id & 0x00FF_FFFF),
            LoadSlot::Light(index) => {
                0xFE00_0000 | (((index as u32) & 0xFFF) << 12) | (local_id & 0xFFF)
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryWorld {
    sources: HashMap<String, LoadSlot>,
    forms: HashSet<FormId>,
    factions: BTreeSet<String>,
    character_names: BTreeSet<String>,
    races: BTreeSet<String>,
    outfit_names: BTreeSet<String>,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&mut self, name: &str, index: u8) {
        self.sources.insert(name.to_string(), LoadSlot::Full(index));
    }

    /// Register a lightweight source, which compiles ids into the shared
    /// `FE` block.
    pub fn add_light_source(&mut self, name: &str, index: u16) {
        self.sources.insert(name.to_string(), LoadSlot::Light(index));
    }

    /// Declare a record defined by `source`. Returns its full id, or `None`
    /// when the source is not loaded.
    pub fn add_form(&mut self, source: &str, local_id: u32) -> Option<FormId> {
        let slot = self.sources.get(source)?;
        let id = slot.compile(local_id);
        self.forms.insert(id);
        Some(id)
    }

    pub fn add_faction(&mut self, editor_id: &str) {
        self.factions.insert(editor_id.to_string());
    }

    pub fn add_character_name(&mut self, name: &str) {
        self.character_names.insert(name.to_string());
    }

    pub fn add_race(&mut self, editor_id: &str) {
        self.races.insert(editor_id.to_string());
    }

    pub fn add_outfit_name(&mut self, name: &str) {
        self.outfit_names.insert(name.to_string());
    }

    /// Register everything an actor snapshot refers to: its name, race,
    /// factions and the names of its worn items.
    pub fn add_actor(&mut self, actor: &ActorInfo) {
        self.add_character_name(&actor.name);
        if !actor.race.is_empty() {
            self.add_race(&actor.race);
        }
        for faction in &actor.factions {
            self.add_faction(faction);
        }
        for item in &actor.worn {
            self.add_outfit_name(&item.name);
            self.forms.insert(item.form_id);
        }
        self.forms.insert(actor.form_id);
    }

    pub fn from_snapshot(snapshot: &WorldSnapshot) -> Self {
        let mut world = MemoryWorld::new();
        for source in &snapshot.sources {
            if source.light {
                world.add_light_source(&source.name, source.index);
            } else {
                match u8::try_from(source.index) {
                    Ok(index) => world.add_source(&source.name, index),
                    Err(_) => log::warn!(
                        "source {} has load index {} outside the full range, skipped",
                        source.name,
                        source.index
                    ),
                }
            }
        }
        for form in &snapshot.forms {
            if world.add_form(&form.source, form.local_id).is_none() {
                log::warn!(
                    "record {:06X} refers to unloaded source {}",
                    form.local_id,
                    form.source
                );
            }
        }
        for faction in &snapshot.factions {
            world.add_faction(faction);
        }
        for race in &snapshot.races {
            world.add_race(race);
        }
        for outfit in &snapshot.outfits {
            world.add_outfit_name(outfit);
        }
        for actor in &snapshot.actors {
            world.add_actor(actor);
        }
        world
    }
}

impl WorldRegistry for MemoryWorld {
    fn is_source_loaded(&self, source: &str) -> bool {
        self.sources.contains_key(source)
    }

    fn lookup_form(&self, local_id: u32, source: &str) -> Option<FormId> {
        let id = self.sources.get(source)?.compile(local_id);
        self.forms.contains(&id).then_some(id)
    }

    fn faction_exists(&self, editor_id: &str) -> bool {
        self.factions.contains(editor_id)
    }

    fn character_names(&self) -> BTreeSet<String> {
        self.character_names.clone()
    }

    fn race_ids(&self) -> BTreeSet<String> {
        self.races.clone()
    }

    fn outfit_names(&self) -> BTreeSet<String> {
        self.outfit_names.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDef {
    pub name: String,
    pub index: u16,
    #[serde(default)]
    pub light: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormDef {
    pub source: String,
    pub local_id: u32,
}

/// Serialized world state read by the command-line driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldSnapshot {
    pub sources: Vec<SourceDef>,
    pub forms: Vec<FormDef>,
    pub factions: Vec<String>,
    pub races: Vec<String>,
    pub outfits: Vec<String>,
    pub actors: Vec<ActorInfo>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct ActorMorphs {
    /// (key, morph) -> value
    values: BTreeMap<(String, String), f32>,
    applies: usize,
    weight_updates: usize,
}

/// Morph storage keyed by actor, namespace key and morph name.
#[derive(Debug, Default)]
pub struct MemoryMorphs {
    actors: Mutex<HashMap<ActorHandle, ActorMorphs>>,
}

impl MemoryMorphs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored morph of `actor` under `key`, sorted by morph name.
    pub fn morphs_under(&self, actor: ActorHandle, key: &str) -> Vec<(String, f32)> {
        let actors = lock(&self.actors);
        actors
            .get(&actor)
            .map(|a| {
                a.values
                    .iter()
                    .filter(|((k, _), _)| k == key)
                    .map(|((_, morph), v)| (morph.clone(), *v))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of stored (key, morph) pairs for `actor`.
    pub fn morph_count(&self, actor: ActorHandle) -> usize {
        lock(&self.actors).get(&actor).map_or(0, |a| a.values.len())
    }

    pub fn apply_count(&self, actor: ActorHandle) -> usize {
        lock(&self.actors).get(&actor).map_or(0, |a| a.applies)
    }

    pub fn weight_update_count(&self, actor: ActorHandle) -> usize {
        lock(&self.actors).get(&actor).map_or(0, |a| a.weight_updates)
    }
}

impl MorphBackend for MemoryMorphs {
    fn set_morph(&self, actor: ActorHandle, morph: &str, key: &str, value: f32) {
        let mut actors = lock(&self.actors);
        actors
            .entry(actor)
            .or_default()
            .values
            .insert((key.to_string(), morph.to_string()), value);
    }

    fn get_morph(&self, actor: ActorHandle, morph: &str, key: &str) -> f32 {
        let actors = lock(&self.actors);
        actors
            .get(&actor)
            .and_then(|a| a.values.get(&(key.to_string(), morph.to_string())))
            .copied()
            .unwrap_or(0.0)
    }

    fn has_morph(&self, actor: ActorHandle, morph: &str, key: &str) -> bool {
        let actors = lock(&self.actors);
        actors
            .get(&actor)
            .map_or(false, |a| a.values.contains_key(&(key.to_string(), morph.to_string())))
    }

    fn has_morph_key(&self, actor: ActorHandle, key: &str) -> bool {
        let actors = lock(&self.actors);
        actors
            .get(&actor)
            .map_or(false, |a| a.values.keys().any(|(k, _)| k == key))
    }

    fn clear_morphs(&self, actor: ActorHandle) {
        if let Some(a) = lock(&self.actors).get_mut(&actor) {
            a.values.clear();
        }
    }

    fn clear_morph_key(&self, actor: ActorHandle, key: &str) {
        if let Some(a) = lock(&self.actors).get_mut(&actor) {
            a.values.retain(|(k, _), _| k != key);
        }
    }

    fn apply_morphs(&self, actor: ActorHandle) {
        lock(&self.actors).entry(actor).or_default().applies += 1;
    }

    fn update_model_weight(&self, actor: ActorHandle) {
        lock(&self.actors).entry(actor).or_default().weight_updates += 1;
    }
}

/// Liveness table. Unknown actors are neither live nor loaded.
#[derive(Debug, Default)]
pub struct MemoryPresence {
    states: Mutex<HashMap<ActorHandle, (bool, bool)>>,
}

impl MemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, actor: ActorHandle, live: bool, loaded: bool) {
        lock(&self.states).insert(actor, (live, loaded));
    }

    pub fn remove(&self, actor: ActorHandle) {
        lock(&self.states).remove(&actor);
    }
}

impl ActorPresence for MemoryPresence {
    fn is_live(&self, actor: ActorHandle) -> bool {
        lock(&self.states).get(&actor).map_or(false, |s| s.0)
    }

    fn is_loaded(&self, actor: ActorHandle) -> bool {
        lock(&self.states).get(&actor).map_or(false, |s| s.0 && s.1)
    }
}

/// Keeps every event in arrival order.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<DistributionEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DistributionEvent> {
        lock(&self.events).clone()
    }

    pub fn take(&self) -> Vec<DistributionEvent> {
        std::mem::take(&mut *lock(&self.events))
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: DistributionEvent) {
        log::debug!("event: {:?}", event);
        lock(&self.events).push(event);
    }
}
