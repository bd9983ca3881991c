//! Worn-item classification and the clothing refit overlay.

use crate::config::{contains_trimmed, DistributionConfig};
use crate::host::{ActorHandle, ActorInfo, BodySlot, ItemKind, MorphBackend, WornItem};
use crate::slider::{Slider, SliderSet};
use crate::tables::RuleTables;

/// Slots that decide whether an actor counts as clothed.
pub const NAKED_SLOTS: [BodySlot; 3] = [BodySlot::Body, BodySlot::ChestPrimary, BodySlot::ChestSecondary];

/// Slots whose removal counts as taking clothes off.
pub const TRACKED_SLOTS: [BodySlot; 5] = [
    BodySlot::Body,
    BodySlot::ChestPrimary,
    BodySlot::ChestSecondary,
    BodySlot::PelvisPrimary,
    BodySlot::PelvisSecondary,
];

/// Outfit rules from both the name-keyed config and the id tables.
#[derive(Clone, Copy)]
pub struct OutfitRules<'a> {
    config: &'a DistributionConfig,
    tables: &'a RuleTables,
}

impl<'a> OutfitRules<'a> {
    pub fn new(config: &'a DistributionConfig, tables: &'a RuleTables) -> Self {
        Self { config, tables }
    }

    /// A blacklisted outfit never counts as worn.
    pub fn is_blacklisted(&self, item: &WornItem) -> bool {
        contains_trimmed(&self.config.blacklisted_outfits, &item.name)
            || self.tables.is_outfit_blacklisted(item.form_id)
            || contains_trimmed(&self.config.blacklisted_outfit_sources, &item.source)
    }

    /// Items that keep the refit overlay on even when nothing else is worn.
    pub fn is_force_refit(&self, item: &WornItem) -> bool {
        let named = matches!(item.kind, ItemKind::Armor | ItemKind::Armature)
            && contains_trimmed(&self.config.force_refit_outfits, &item.name);
        named || self.tables.is_force_refit(item.form_id)
    }
}

fn is_same_item(item: &WornItem, other: Option<&WornItem>) -> bool {
    other.map_or(false, |o| o.form_id == item.form_id)
}

/// Whether `actor` is naked for refit purposes.
///
/// `removing` is the item being taken off by an equip change still in flight.
/// The snapshot still lists it as worn, so any slot it fills is treated as
/// empty and it is skipped when looking for force-refit items.
pub fn is_naked(actor: &ActorInfo, rules: OutfitRules<'_>, removing: Option<&WornItem>) -> bool {
    let wears_something = NAKED_SLOTS.iter().any(|slot| {
        actor
            .item_in_slot(*slot)
            .filter(|item| !is_same_item(item, removing))
            .map_or(false, |item| !rules.is_blacklisted(item))
    });

    !wears_something && !has_force_refit_item(actor, rules, removing)
}

fn has_force_refit_item(actor: &ActorInfo, rules: OutfitRules<'_>, removing: Option<&WornItem>) -> bool {
    actor
        .worn
        .iter()
        .filter(|item| !is_same_item(item, removing))
        .any(|item| rules.is_force_refit(item))
}

/// Whether taking off `item` empties a tracked slot. Only the slot's current
/// occupant counts.
pub fn is_removing_clothes(actor: &ActorInfo, item: &WornItem) -> bool {
    TRACKED_SLOTS
        .iter()
        .any(|slot| is_same_item(item, actor.item_in_slot(*slot)))
}

/// Slider that drives a morph to `target` on top of what the preset set.
fn derived(backend: &dyn MorphBackend, actor: ActorHandle, preset_key: &str, morph: &str, target: f32) -> Slider {
    let current = backend.get_morph(actor, morph, preset_key);
    Slider::fixed(morph, target - current)
}

/// The clothing refit overlay for `actor`.
///
/// Some sliders are absolute targets and read the actor's current preset
/// morphs from `preset_key`, so the preset must already be applied.
pub fn refit_sliders(
    backend: &dyn MorphBackend,
    actor: ActorHandle,
    preset_key: &str,
    include_nipples: bool,
) -> SliderSet {
    let mut set = SliderSet::new();
    let d = |morph: &str, target: f32| derived(backend, actor, preset_key, morph, target);

    // breasts
    set.merge(d("BreastSideShape", 0.0));
    set.merge(d("BreastUnderDepth", 0.0));
    set.merge(d("BreastCleavage", 1.0));
    set.merge(Slider::new("BreastGravity2", -0.1, -0.05));
    set.merge(Slider::new("BreastTopSlope", -0.2, -0.35));
    set.merge(Slider::new("BreastsTogether", 0.3, 0.35));
    set.merge(Slider::fixed("Breasts", -0.05));
    set.merge(Slider::fixed("BreastHeight", 0.15));

    // butt
    set.merge(d("ButtDimples", 0.0));
    set.merge(d("ButtUnderFold", 0.0));
    set.merge(Slider::fixed("AppleCheeks", -0.05));
    set.merge(Slider::fixed("Butt", -0.05));

    // torso
    set.merge(d("Clavicle_v2", 0.0));
    set.merge(d("NavelEven", 1.0));
    set.merge(d("HipCarved", 0.0));

    if include_nipples {
        set.merge(d("NippleDip", 0.0));
        set.merge(d("NippleTip", 0.0));
        set.merge(d("NipplePuffy_v2", 0.0));
        set.merge(d("AreolaSize", -0.3));
        set.merge(d("NipBGone", 1.0));
        set.merge(Slider::new("NippleDistance", 0.05, 0.08));
        set.merge(Slider::new("NippleDown", 0.0, -0.1));
        set.merge(d("NipplePerkManga", -0.25));
    }

    set
}
