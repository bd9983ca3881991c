use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use bodydist_core::catalog::{random_by_name, Catalog, ClassificationPolicy, Gender, PresetDef, PresetFile, SliderDef};
use bodydist_core::config::DistributionConfig;
use bodydist_core::host::{ActorHandle, ActorInfo, BodySlot, ItemKind, MorphBackend, WornItem};
use bodydist_core::memory::{MemoryMorphs, MemoryPresence, MemoryWorld, RecordingNotifier};
use bodydist_core::randomizer::{genital_sliders_with_shape, GenitalShape};
use bodydist_core::refit::{is_naked, OutfitRules};
use bodydist_core::tables::RuleTables;
use bodydist_core::{
    Distributor, Loaded, Resolution, Services, Settings, Tier, BLACKLIST_MORPH, PRESET_KEY,
};

fn preset(name: &str, set: &str) -> PresetDef {
    PresetDef {
        name: name.to_string(),
        set: set.to_string(),
        sliders: vec![
            SliderDef {
                name: "Breasts".to_string(),
                size: "small".to_string(),
                value: 20.0,
            },
            SliderDef {
                name: "Breasts".to_string(),
                size: "big".to_string(),
                value: 80.0,
            },
        ],
    }
}

fn five_presets() -> PresetFile {
    PresetFile {
        presets: ["One", "Two", "Three", "Four", "Five"]
            .iter()
            .map(|n| preset(n, "CBBE 3BA"))
            .collect(),
    }
}

fn world() -> MemoryWorld {
    let mut world = MemoryWorld::new();
    world.add_source("Skyrim.esm", 0x00);
    world.add_light_source("Outfits.esp", 0x002);
    world.add_form("Skyrim.esm", 0x013BA3);
    world.add_form("Skyrim.esm", 0x01A694);
    world.add_form("Outfits.esp", 0x810);
    world.add_character_name("Lydia");
    world.add_race("NordRace");
    world
}

fn lydia() -> ActorInfo {
    ActorInfo {
        handle: ActorHandle(7),
        form_id: 0x00013BA3,
        name: "Lydia".to_string(),
        gender: Gender::Female,
        race: "NordRace".to_string(),
        factions: vec!["HousecarlFaction".to_string()],
        source_files: vec!["Skyrim.esm".to_string()],
        weight: 50.0,
        worn: vec![],
    }
}

struct Rig {
    morphs: Arc<MemoryMorphs>,
    presence: Arc<MemoryPresence>,
    distributor: Distributor,
}

fn rig(config: &str) -> Rig {
    let config = DistributionConfig::from_json_str(config).unwrap();
    let doc = five_presets();
    let catalog = Catalog::from_documents([&doc], &ClassificationPolicy::default(), &config.blacklisted_presets);
    let loaded = Loaded::from_parts(catalog, config, &world());

    let morphs = Arc::new(MemoryMorphs::new());
    let presence = Arc::new(MemoryPresence::new());
    let services = Services {
        morphs: morphs.clone(),
        presence: presence.clone(),
        notifier: Arc::new(RecordingNotifier::new()),
    };
    let settings = Settings {
        seed: Some(2024),
        ..Default::default()
    };
    Rig {
        morphs,
        presence,
        distributor: Distributor::new(loaded, settings, services),
    }
}

#[test]
fn empty_candidate_list_draws_uniformly_from_eligible() {
    let doc = five_presets();
    let catalog = Catalog::from_documents([&doc], &ClassificationPolicy::default(), &[]);
    let mut rng = StdRng::seed_from_u64(42);
    let trials = 10_000;

    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..trials {
        let p = random_by_name(&mut rng, &catalog, Gender::Female, &[]).unwrap();
        *counts.entry(p.name.clone()).or_default() += 1;
    }

    assert_eq!(counts.len(), 5);
    for (name, count) in counts {
        assert!((1700..2300).contains(&count), "{name} drawn {count} times");
    }
}

#[test]
fn id_blacklisted_actor_never_receives_sliders() {
    let mut rig = rig(r#"{"blacklistedCharactersById": {"Skyrim.esm": ["00013BA3"]}}"#);
    let lydia = lydia();
    rig.presence.set(lydia.handle, true, true);

    assert_eq!(rig.distributor.generate_actor_body(&lydia), Resolution::Blacklisted);
    assert!(rig.morphs.has_morph(lydia.handle, BLACKLIST_MORPH, PRESET_KEY));
    assert!(rig.distributor.is_processed(&lydia));
    let after_first = rig.morphs.morphs_under(lydia.handle, PRESET_KEY);

    assert_eq!(rig.distributor.generate_actor_body(&lydia), Resolution::AlreadyProcessed);
    assert_eq!(rig.morphs.morphs_under(lydia.handle, PRESET_KEY), after_first);
    assert!(!rig.morphs.has_morph(lydia.handle, "Breasts", PRESET_KEY));
    assert_eq!(rig.morphs.apply_count(lydia.handle), 0);
}

#[test]
fn name_blacklist_matches_trimmed_display_name() {
    let mut rig = rig(r#"{"blacklistedCharacters": ["Lydia"]}"#);
    let mut lydia = lydia();
    lydia.name = " Lydia ".to_string();
    assert_eq!(rig.distributor.generate_actor_body(&lydia), Resolution::Blacklisted);
}

#[test]
fn resolution_is_idempotent_until_cleared() {
    let mut rig = rig("{}");
    let lydia = lydia();
    rig.presence.set(lydia.handle, true, true);

    let first = rig.distributor.generate_actor_body(&lydia);
    let preset = match first {
        Resolution::Applied { preset, tier } => {
            assert_eq!(tier, Tier::Random);
            preset
        }
        other => panic!("unexpected {other:?}"),
    };
    let breasts = rig.morphs.get_morph(lydia.handle, "Breasts", PRESET_KEY);
    // min 0.2, max 0.8 at weight 0.5
    assert!((breasts - 0.5).abs() < 1e-6);

    assert_eq!(rig.distributor.generate_actor_body(&lydia), Resolution::AlreadyProcessed);
    assert_eq!(rig.morphs.apply_count(lydia.handle), 1);

    rig.distributor.clear_overlays(&lydia);
    assert!(matches!(
        rig.distributor.generate_actor_body(&lydia),
        Resolution::Applied { .. }
    ));
    assert!(!preset.is_empty());
}

#[test]
fn id_override_uses_named_presets() {
    let mut rig = rig(
        r#"{
            "characterPresetsById": {"Skyrim.esm": {"00013BA3": ["Missing", "four"]}},
            "femaleRacePresets": {"NordRace": ["One"]}
        }"#,
    );
    let r = rig.distributor.generate_actor_body(&lydia());
    assert_eq!(
        r,
        Resolution::Applied {
            preset: "Four".to_string(),
            tier: Tier::Character
        }
    );
}

#[test]
fn blacklisted_body_outfit_leaves_actor_naked() {
    let config = DistributionConfig::from_json_str(
        r#"{"blacklistedOutfitsById": {"Outfits.esp": ["FE002810"]}}"#,
    )
    .unwrap();
    let world = world();
    let tables = RuleTables::build(&config, &world);
    let rules = OutfitRules::new(&config, &tables);

    let mut actor = lydia();
    actor.worn.push(WornItem {
        form_id: 0xFE00_2810,
        name: "Sheer Robe".to_string(),
        source: "Outfits.esp".to_string(),
        kind: ItemKind::Armor,
        slots: vec![BodySlot::Body],
    });
    actor.worn.push(WornItem {
        form_id: 0x0001_A694,
        name: "Leather Boots".to_string(),
        source: "Skyrim.esm".to_string(),
        kind: ItemKind::Armor,
        slots: vec![],
    });

    assert!(is_naked(&actor, rules, None));
}

#[test]
fn genital_innie_branch_is_drawn_about_a_fifth_of_the_time() {
    let mut rng = StdRng::seed_from_u64(20240601);
    let trials = 10_000;
    let mut innie = 0;
    let mut outie = 0;
    for _ in 0..trials {
        match genital_sliders_with_shape(&mut rng).0 {
            GenitalShape::Innie => innie += 1,
            GenitalShape::Outie => outie += 1,
            GenitalShape::Average => {}
        }
    }
    let innie_rate = innie as f64 / trials as f64;
    assert!((0.18..=0.22).contains(&innie_rate), "innie rate {innie_rate}");
    // 0.8 * 0.25
    let outie_rate = outie as f64 / trials as f64;
    assert!((0.17..=0.23).contains(&outie_rate), "outie rate {outie_rate}");
}
