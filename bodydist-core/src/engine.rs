//! The distribution service: picks a preset for each actor and keeps the
//! refit overlay in step with what the actor wears.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{preset_by_name, random_by_name, Catalog, Gender, Preset};
use crate::config::{contains_trimmed, DistributionConfig};
use crate::host::{ActorInfo, ActorPresence, DistributionEvent, MorphBackend, Notifier, WornItem};
use crate::randomizer::{genital_sliders, nipple_sliders};
use crate::refit::{is_naked, is_removing_clothes, refit_sliders, OutfitRules};
use crate::scheduler::{ApplyRequest, ApplyScheduler};
use crate::slider::SliderSet;
use crate::tables::RuleTables;
use crate::{Loaded, Settings, BLACKLIST_MORPH, GUARD_MORPH, PRESET_KEY, REFIT_KEY};

/// Host services the distributor talks to.
#[derive(Clone)]
pub struct Services {
    pub morphs: Arc<dyn MorphBackend>,
    pub presence: Arc<dyn ActorPresence>,
    pub notifier: Arc<dyn Notifier>,
}

/// Which rule produced the candidate names.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Tier {
    Character,
    Faction,
    Source,
    Race,
    /// Source or race blacklist. Only ever blacklists, never yields
    /// candidates.
    Blacklist,
    /// No rule matched; drawn from the eligible presets.
    Random,
    /// Requested by name through [`Distributor::generate_by_name`].
    Explicit,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    AlreadyProcessed,
    /// Nothing to assign for this gender.
    NoPresets,
    Blacklisted,
    Applied { preset: String, tier: Tier },
}

/// What [`Distributor::process_equip_event`] did.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EquipOutcome {
    Ignored,
    Unchanged,
    OverlayAdded,
    OverlayRemoved,
}

enum TierOutcome<'a> {
    Pass,
    Candidates(&'a [String]),
    Blacklisted,
}

struct RuleContext<'a> {
    config: &'a DistributionConfig,
    tables: &'a RuleTables,
}

type TierFn = for<'a> fn(&RuleContext<'a>, &ActorInfo) -> TierOutcome<'a>;

/// Resolution order. The first tier that yields candidates or a blacklist
/// decision wins.
const CHAIN: [(Tier, TierFn); 5] = [
    (Tier::Character, character_tier),
    (Tier::Blacklist, global_blacklist_tier),
    (Tier::Faction, faction_tier),
    (Tier::Source, source_tier),
    (Tier::Race, race_tier),
];

fn candidates(names: Option<&Vec<String>>) -> TierOutcome<'_> {
    match names {
        Some(names) if !names.is_empty() => TierOutcome::Candidates(names),
        _ => TierOutcome::Pass,
    }
}

fn character_tier<'a>(ctx: &RuleContext<'a>, actor: &ActorInfo) -> TierOutcome<'a> {
    if let Some(names) = ctx.tables.character_presets(actor.form_id) {
        if !names.is_empty() {
            return TierOutcome::Candidates(names);
        }
    }
    candidates(ctx.config.character_presets_for(&actor.name))
}

fn global_blacklist_tier<'a>(ctx: &RuleContext<'a>, actor: &ActorInfo) -> TierOutcome<'a> {
    let by_source = actor
        .owning_source()
        .map_or(false, |source| contains_trimmed(ctx.config.blacklisted_sources(actor.gender), source));
    let by_race = contains_trimmed(ctx.config.blacklisted_races(actor.gender), &actor.race);
    if by_source || by_race {
        TierOutcome::Blacklisted
    } else {
        TierOutcome::Pass
    }
}

fn faction_tier<'a>(ctx: &RuleContext<'a>, actor: &ActorInfo) -> TierOutcome<'a> {
    let hit = ctx
        .config
        .faction_presets(actor.gender)
        .iter()
        .find(|(faction, names)| !names.is_empty() && actor.factions.iter().any(|f| f == faction));
    candidates(hit.map(|(_, names)| names))
}

fn source_tier<'a>(ctx: &RuleContext<'a>, actor: &ActorInfo) -> TierOutcome<'a> {
    let hit = ctx
        .config
        .source_presets(actor.gender)
        .iter()
        .find(|(source, names)| !names.is_empty() && actor.is_from_source(source));
    candidates(hit.map(|(_, names)| names))
}

fn race_tier<'a>(ctx: &RuleContext<'a>, actor: &ActorInfo) -> TierOutcome<'a> {
    candidates(ctx.config.race_presets(actor.gender).get(&actor.race))
}

/// How an apply was triggered.
#[derive(Copy, Clone, PartialEq, Eq)]
enum Trigger {
    /// Automatic distribution; may be deferred.
    Distribution,
    /// Explicit request from a caller; always immediate.
    Explicit,
}

pub struct Distributor {
    catalog: Catalog,
    config: DistributionConfig,
    tables: RuleTables,
    settings: Settings,
    rng: StdRng,
    services: Services,
    scheduler: ApplyScheduler,
}

impl Distributor {
    pub fn new(loaded: Loaded, settings: Settings, services: Services) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let scheduler = ApplyScheduler::new(services.morphs.clone(), services.presence.clone());
        Self {
            catalog: loaded.catalog,
            config: loaded.config,
            tables: loaded.tables,
            settings,
            rng,
            services,
            scheduler,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn is_processed(&self, actor: &ActorInfo) -> bool {
        self.services
            .morphs
            .has_morph(actor.handle, &self.settings.distribution_key, PRESET_KEY)
    }

    pub fn is_blacklisted(&self, actor: &ActorInfo) -> bool {
        self.services.morphs.has_morph(actor.handle, BLACKLIST_MORPH, PRESET_KEY)
    }

    pub fn is_refit_active(&self, actor: &ActorInfo) -> bool {
        self.services.morphs.has_morph_key(actor.handle, REFIT_KEY)
    }

    fn is_identity_blacklisted(&self, actor: &ActorInfo) -> bool {
        self.tables.is_character_blacklisted(actor.form_id)
            || contains_trimmed(&self.config.blacklisted_characters, &actor.name)
    }

    fn mark_blacklisted(&self, actor: &ActorInfo) {
        let morphs = &self.services.morphs;
        morphs.set_morph(actor.handle, &self.settings.distribution_key, PRESET_KEY, 1.0);
        morphs.set_morph(actor.handle, BLACKLIST_MORPH, PRESET_KEY, 1.0);
    }

    /// Pick and apply a preset for an actor seen for the first time.
    ///
    /// Actors already carrying the processed marker are left alone.
    pub fn generate_actor_body(&mut self, actor: &ActorInfo) -> Resolution {
        if self.is_processed(actor) {
            return Resolution::AlreadyProcessed;
        }
        if self.catalog.all(actor.gender).is_empty() {
            return Resolution::NoPresets;
        }

        log::info!("Trying to find and apply preset to {}", actor.name);

        if self.is_identity_blacklisted(actor) {
            log::info!("{} is blacklisted", actor.name);
            self.mark_blacklisted(actor);
            return Resolution::Blacklisted;
        }

        let ctx = RuleContext {
            config: &self.config,
            tables: &self.tables,
        };
        let mut chosen: (Tier, &[String]) = (Tier::Random, &[]);
        for (tier, resolve) in CHAIN {
            match resolve(&ctx, actor) {
                TierOutcome::Pass => continue,
                TierOutcome::Candidates(names) => {
                    chosen = (tier, names);
                    break;
                }
                TierOutcome::Blacklisted => {
                    log::info!("{} is blacklisted by source or race", actor.name);
                    self.mark_blacklisted(actor);
                    return Resolution::Blacklisted;
                }
            }
        }

        let (tier, names) = chosen;
        if tier == Tier::Random {
            log::info!("No preset defined for this actor, getting it randomly");
        }
        let Some(preset) = random_by_name(&mut self.rng, &self.catalog, actor.gender, names).cloned() else {
            log::info!("No eligible presets for {}", actor.name);
            return Resolution::NoPresets;
        };

        log::info!("Preset {} will be applied to {}", preset.name, actor.name);
        self.apply_preset(actor, &preset, Trigger::Distribution);
        Resolution::Applied {
            preset: preset.name,
            tier,
        }
    }

    /// Apply the preset called `name`, or a random eligible one when no
    /// preset has that name. Applies immediately.
    pub fn generate_by_name(&mut self, actor: &ActorInfo, name: &str) -> Resolution {
        let Some(preset) = preset_by_name(&mut self.rng, &self.catalog, actor.gender, name).cloned() else {
            return Resolution::NoPresets;
        };
        self.apply_preset(actor, &preset, Trigger::Explicit);
        Resolution::Applied {
            preset: preset.name,
            tier: Tier::Explicit,
        }
    }

    fn write_sliders(&self, actor: &ActorInfo, sliders: &SliderSet, key: &str) {
        let weight = actor.normalized_weight();
        for (name, value) in sliders.scaled(weight) {
            self.services.morphs.set_morph(actor.handle, name, key, value);
        }
    }

    fn apply_preset(&mut self, actor: &ActorInfo, preset: &Preset, trigger: Trigger) {
        self.services.morphs.clear_morphs(actor.handle);
        if trigger == Trigger::Explicit && self.settings.external_morph_guard {
            self.services.morphs.set_morph(actor.handle, GUARD_MORPH, PRESET_KEY, 1.0);
        }

        self.write_sliders(actor, &preset.sliders, PRESET_KEY);
        log::info!("Applying preset: {}", preset.name);

        if actor.gender == Gender::Female {
            if self.settings.nipple_randomization {
                let set = nipple_sliders(&mut self.rng);
                self.write_sliders(actor, &set, PRESET_KEY);
            }
            if self.settings.genital_randomization {
                let set = genital_sliders(&mut self.rng);
                self.write_sliders(actor, &set, PRESET_KEY);
            }
        }

        if !is_naked(actor, self.outfit_rules(), None) {
            if self.settings.refit {
                log::info!("Not naked, adding refit overlay");
                self.write_refit(actor);
            }
        } else {
            log::info!("Actor is naked, not applying refit overlay");
            self.services
                .notifier
                .notify(DistributionEvent::Naked { actor: actor.handle });
        }

        self.services
            .morphs
            .set_morph(actor.handle, &self.settings.distribution_key, PRESET_KEY, 1.0);
        self.apply_morphs(actor, trigger == Trigger::Explicit, true);
        self.services.notifier.notify(DistributionEvent::Generated {
            actor: actor.handle,
            preset: preset.name.clone(),
        });
    }

    fn outfit_rules(&self) -> OutfitRules<'_> {
        OutfitRules::new(&self.config, &self.tables)
    }

    fn write_refit(&self, actor: &ActorInfo) {
        let set = refit_sliders(
            self.services.morphs.as_ref(),
            actor.handle,
            PRESET_KEY,
            self.settings.refit_nipple_sliders,
        );
        self.write_sliders(actor, &set, REFIT_KEY);
    }

    fn apply_morphs(&mut self, actor: &ActorInfo, immediate: bool, mark_processed: bool) {
        let request = ApplyRequest {
            actor: actor.handle,
            name: actor.name.clone(),
            distribution_key: self.settings.distribution_key.clone(),
            mark_processed,
        };

        if immediate || !self.settings.performance_mode {
            self.scheduler.apply_now(&request);
        } else {
            let range = self.settings.deferred_delay_secs;
            let secs = if range.min < range.max {
                self.rng.gen_range(range.min..=range.max)
            } else {
                range.min
            };
            log::debug!("deferring apply for {} by {}s", actor.name, secs);
            self.scheduler.apply_after(request, Duration::from_secs(secs));
        }
    }

    /// React to an item being equipped or removed.
    ///
    /// `actor` is the snapshot taken when the event fired, so a removed item
    /// is still listed as worn.
    pub fn process_equip_event(&mut self, actor: &ActorInfo, item: &WornItem, removing: bool) -> EquipOutcome {
        if !self.is_processed(actor) || self.is_blacklisted(actor) {
            return EquipOutcome::Ignored;
        }

        if removing && is_removing_clothes(actor, item) {
            self.services
                .notifier
                .notify(DistributionEvent::RemovingClothes { actor: actor.handle });
        }

        let overlay_active = self.is_refit_active(actor);
        if !self.settings.refit && overlay_active {
            self.services.morphs.clear_morph_key(actor.handle, REFIT_KEY);
            self.apply_morphs(actor, true, true);
            return EquipOutcome::OverlayRemoved;
        }

        if self.catalog.eligible(actor.gender).is_empty() {
            return EquipOutcome::Ignored;
        }

        let removed = removing.then_some(item);
        let naked = is_naked(actor, self.outfit_rules(), removed);

        if !naked && removing {
            self.services
                .notifier
                .notify(DistributionEvent::Naked { actor: actor.handle });
        }

        if overlay_active && naked {
            log::info!("Removing refit overlay from {}", actor.name);
            self.services.morphs.clear_morph_key(actor.handle, REFIT_KEY);
            self.apply_morphs(actor, true, true);
            EquipOutcome::OverlayRemoved
        } else if !overlay_active && !naked && self.settings.refit {
            log::info!("Applying refit overlay to {}", actor.name);
            self.write_refit(actor);
            self.apply_morphs(actor, true, true);
            EquipOutcome::OverlayAdded
        } else {
            EquipOutcome::Unchanged
        }
    }

    /// Layer the refit overlay onto an actor regardless of what it wears.
    pub fn add_refit_overlay(&mut self, actor: &ActorInfo) {
        self.write_refit(actor);
        self.apply_morphs(actor, true, true);
    }

    /// Remove every preset and refit morph. The actor becomes unprocessed.
    pub fn clear_overlays(&mut self, actor: &ActorInfo) {
        self.services.morphs.clear_morph_key(actor.handle, PRESET_KEY);
        self.services.morphs.clear_morph_key(actor.handle, REFIT_KEY);
        self.apply_morphs(actor, true, false);
    }

    pub fn set_refit(&mut self, enabled: bool) {
        self.settings.refit = enabled;
    }

    pub fn set_refit_nipple_sliders(&mut self, enabled: bool) {
        self.settings.refit_nipple_sliders = enabled;
    }

    pub fn set_nipple_randomization(&mut self, enabled: bool) {
        self.settings.nipple_randomization = enabled;
    }

    pub fn set_genital_randomization(&mut self, enabled: bool) {
        self.settings.genital_randomization = enabled;
    }

    pub fn set_performance_mode(&mut self, enabled: bool) {
        self.settings.performance_mode = enabled;
    }

    /// Change the morph name of the processed marker. Actors marked under
    /// the previous name count as unprocessed again.
    pub fn set_distribution_key(&mut self, key: impl Into<String>) {
        self.settings.distribution_key = key.into();
        log::info!("distribution key set to {}", self.settings.distribution_key);
    }

    pub fn female_preset_count(&self) -> usize {
        self.catalog.eligible(Gender::Female).len()
    }

    pub fn male_preset_count(&self) -> usize {
        self.catalog.eligible(Gender::Male).len()
    }

    /// Preset names offered for `actor`, sorted case-insensitively. Blacklisted
    /// presets are included when the config asks for it.
    pub fn list_presets(&self, actor: &ActorInfo) -> Vec<String> {
        self.list_presets_with(actor, self.config.show_blacklisted_presets)
    }

    pub fn list_presets_with(&self, actor: &ActorInfo, include_blacklisted: bool) -> Vec<String> {
        self.catalog.preset_names(actor.gender, include_blacklisted)
    }

    /// Run every deferred apply still waiting and stop the worker.
    pub fn shutdown(&mut self) {
        self.scheduler.shutdown();
    }
}
