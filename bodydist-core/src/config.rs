use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::marker::PhantomData;
use std::path::Path;

use crate::catalog::Gender;
use crate::host::WorldRegistry;
use crate::Result;

/// JSON object that keeps its keys in declaration order.
///
/// Rule tables are matched first-hit in the order the author wrote them, so a
/// hash map is not an option here. Repeated keys keep their first value.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V> {
    entries: Vec<(String, V)>,
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        if !self.contains_key(&key) {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.iter_mut().map(|(_, v)| v)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str, &V) -> bool) {
        self.entries.retain(|(k, v)| keep(k, v));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> FromIterator<(String, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        let mut map = OrderedMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

struct OrderedMapVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
    type Value = OrderedMap<V>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
        let mut map = OrderedMap::new();
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Key → candidate preset names.
pub type NamedTable = OrderedMap<Vec<String>>;

/// The distribution rules written by content authors.
///
/// Name-keyed tables use human-readable keys (display names, editor ids,
/// source file names). The `*_by_id` tables are keyed by owning source and
/// then by source-local id; they feed [`crate::tables::RuleTables`].
///
/// Keys follow the established config file format (`npc`, `factionFemale`,
/// `blacklistedOutfitsFromORefit`, ...). The descriptive camelCase field
/// names are accepted as aliases.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    #[serde(rename = "npc", alias = "characterPresets")]
    pub character_presets: NamedTable,
    #[serde(rename = "npcFormID", alias = "characterPresetsById")]
    pub character_presets_by_id: OrderedMap<NamedTable>,
    #[serde(rename = "blacklistedNpcs", alias = "blacklistedCharacters")]
    pub blacklisted_characters: Vec<String>,
    #[serde(rename = "blacklistedNpcsFormID", alias = "blacklistedCharactersById")]
    pub blacklisted_characters_by_id: OrderedMap<Vec<String>>,

    #[serde(rename = "factionFemale", alias = "femaleFactionPresets")]
    pub female_faction_presets: NamedTable,
    #[serde(rename = "factionMale", alias = "maleFactionPresets")]
    pub male_faction_presets: NamedTable,
    #[serde(rename = "npcPluginFemale", alias = "femaleSourcePresets")]
    pub female_source_presets: NamedTable,
    #[serde(rename = "npcPluginMale", alias = "maleSourcePresets")]
    pub male_source_presets: NamedTable,
    #[serde(rename = "raceFemale", alias = "femaleRacePresets")]
    pub female_race_presets: NamedTable,
    #[serde(rename = "raceMale", alias = "maleRacePresets")]
    pub male_race_presets: NamedTable,

    #[serde(rename = "blacklistedRacesFemale", alias = "blacklistedFemaleRaces")]
    pub blacklisted_female_races: Vec<String>,
    #[serde(rename = "blacklistedRacesMale", alias = "blacklistedMaleRaces")]
    pub blacklisted_male_races: Vec<String>,
    #[serde(rename = "blacklistedNpcsPluginFemale", alias = "blacklistedFemaleSources")]
    pub blacklisted_female_sources: Vec<String>,
    #[serde(rename = "blacklistedNpcsPluginMale", alias = "blacklistedMaleSources")]
    pub blacklisted_male_sources: Vec<String>,

    #[serde(rename = "blacklistedOutfitsFromORefit", alias = "blacklistedOutfits")]
    pub blacklisted_outfits: Vec<String>,
    #[serde(rename = "blacklistedOutfitsFromORefitFormID", alias = "blacklistedOutfitsById")]
    pub blacklisted_outfits_by_id: OrderedMap<Vec<String>>,
    #[serde(rename = "blacklistedOutfitsFromORefitPlugin", alias = "blacklistedOutfitSources")]
    pub blacklisted_outfit_sources: Vec<String>,
    #[serde(rename = "outfitsForceRefit", alias = "forceRefitOutfits")]
    pub force_refit_outfits: Vec<String>,
    #[serde(rename = "outfitsForceRefitFormID", alias = "forceRefitOutfitsById")]
    pub force_refit_outfits_by_id: OrderedMap<Vec<String>>,

    /// Presets kept out of random distribution.
    #[serde(rename = "blacklistedPresetsFromRandomDistribution", alias = "blacklistedPresets")]
    pub blacklisted_presets: Vec<String>,
    /// Whether preset menus list blacklisted presets too.
    #[serde(rename = "blacklistedPresetsShowInOBodyMenu", alias = "showBlacklistedPresets")]
    pub show_blacklisted_presets: bool,
}

/// Remove repeated entries, keeping the first occurrence of each.
pub fn dedup_stable(list: &mut Vec<String>) {
    let mut seen = HashSet::new();
    list.retain(|item| seen.insert(item.clone()));
}

/// Membership test with the value trimmed first.
pub fn contains_trimmed(list: &[String], value: &str) -> bool {
    let value = value.trim();
    list.iter().any(|item| item == value)
}

impl DistributionConfig {
    pub fn from_json_str(data: &str) -> Result<Self> {
        let mut config: DistributionConfig = serde_json::from_str(data)?;
        dedup_stable(&mut config.blacklisted_presets);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn faction_presets(&self, gender: Gender) -> &NamedTable {
        match gender {
            Gender::Female => &self.female_faction_presets,
            Gender::Male => &self.male_faction_presets,
        }
    }

    pub fn source_presets(&self, gender: Gender) -> &NamedTable {
        match gender {
            Gender::Female => &self.female_source_presets,
            Gender::Male => &self.male_source_presets,
        }
    }

    pub fn race_presets(&self, gender: Gender) -> &NamedTable {
        match gender {
            Gender::Female => &self.female_race_presets,
            Gender::Male => &self.male_race_presets,
        }
    }

    pub fn blacklisted_races(&self, gender: Gender) -> &[String] {
        match gender {
            Gender::Female => &self.blacklisted_female_races,
            Gender::Male => &self.blacklisted_male_races,
        }
    }

    pub fn blacklisted_sources(&self, gender: Gender) -> &[String] {
        match gender {
            Gender::Female => &self.blacklisted_female_sources,
            Gender::Male => &self.blacklisted_male_sources,
        }
    }

    /// Preset names configured for a display name, if any.
    pub fn character_presets_for(&self, name: &str) -> Option<&Vec<String>> {
        self.character_presets.get(name.trim())
    }

    /// Drop every name-keyed entry that refers to content the world does not
    /// currently have, and de-duplicate the surviving name lists.
    ///
    /// Registry enumerations are taken once per call. Returns the number of
    /// entries removed.
    pub fn filter_unloaded(&mut self, registry: &dyn WorldRegistry) -> usize {
        log::info!("{:-^47}", "Starting: Removing Not-Loaded Items");
        let mut removed = 0;

        if !self.character_presets.is_empty() || !self.blacklisted_characters.is_empty() {
            let names = registry.character_names();
            removed += retain_keys(&mut self.character_presets, "npc", |k| {
                names.contains(k)
            });
            removed += retain_values(&mut self.blacklisted_characters, "blacklistedNpcs", |v| {
                names.contains(v)
            });
        }

        removed += retain_keys(&mut self.female_faction_presets, "factionFemale", |k| {
            registry.faction_exists(k)
        });
        removed += retain_keys(&mut self.male_faction_presets, "factionMale", |k| {
            registry.faction_exists(k)
        });

        removed += retain_keys(&mut self.female_source_presets, "npcPluginFemale", |k| {
            registry.is_source_loaded(k)
        });
        removed += retain_keys(&mut self.male_source_presets, "npcPluginMale", |k| {
            registry.is_source_loaded(k)
        });

        let race_tables_used = !self.female_race_presets.is_empty()
            || !self.male_race_presets.is_empty()
            || !self.blacklisted_female_races.is_empty()
            || !self.blacklisted_male_races.is_empty();
        if race_tables_used {
            let races = registry.race_ids();
            removed += retain_keys(&mut self.female_race_presets, "raceFemale", |k| {
                races.contains(k)
            });
            removed += retain_keys(&mut self.male_race_presets, "raceMale", |k| {
                races.contains(k)
            });
            removed += retain_values(&mut self.blacklisted_female_races, "blacklistedRacesFemale", |v| {
                races.contains(v)
            });
            removed += retain_values(&mut self.blacklisted_male_races, "blacklistedRacesMale", |v| {
                races.contains(v)
            });
        }

        removed += retain_values(&mut self.blacklisted_female_sources, "blacklistedNpcsPluginFemale", |v| {
            registry.is_source_loaded(v)
        });
        removed += retain_values(&mut self.blacklisted_male_sources, "blacklistedNpcsPluginMale", |v| {
            registry.is_source_loaded(v)
        });

        if !self.blacklisted_outfits.is_empty() || !self.force_refit_outfits.is_empty() {
            let outfits = registry.outfit_names();
            removed += retain_values(&mut self.blacklisted_outfits, "blacklistedOutfitsFromORefit", |v| {
                outfits.contains(v)
            });
            removed += retain_values(&mut self.force_refit_outfits, "outfitsForceRefit", |v| {
                outfits.contains(v)
            });
        }

        removed += retain_values(&mut self.blacklisted_outfit_sources, "blacklistedOutfitsFromORefitPlugin", |v| {
            registry.is_source_loaded(v)
        });

        log::info!("{:-^47}", "Finished: Removing Not-Loaded Items");
        removed
    }
}

fn retain_keys(table: &mut NamedTable, label: &str, keep: impl Fn(&str) -> bool) -> usize {
    if table.is_empty() {
        return 0;
    }
    log::info!("{:-^47}", label);
    let before = table.len();
    table.retain(|key, _| {
        let ok = keep(key);
        if !ok {
            log::info!("removed '{}'", key);
        }
        ok
    });
    for names in table.values_mut() {
        dedup_stable(names);
    }
    before - table.len()
}

fn retain_values(list: &mut Vec<String>, label: &str, keep: impl Fn(&str) -> bool) -> usize {
    if list.is_empty() {
        return 0;
    }
    log::info!("{:-^47}", label);
    dedup_stable(list);
    let before = list.len();
    list.retain(|value| {
        let ok = keep(value);
        if !ok {
            log::info!("removed '{}'", value);
        }
        ok
    });
    before - list.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryWorld;

    const SAMPLE: &str = r#"{
        "characterPresets": {"Mjoll the Lioness": ["Warrior"], "Ghost": ["Petite"]},
        "femaleFactionPresets": {
            "TownFaction": ["Everywoman"],
            "BardsFaction": ["Warrior", "Figure", "Warrior"],
            "MissingFaction": ["Petite"]
        },
        "femaleSourcePresets": {"Skyrim.esm": ["Oppai"], "NotInstalled.esp": ["Petite"]},
        "femaleRacePresets": {"NordRace": ["Everywoman"], "FakeRace": ["Figure"]},
        "blacklistedCharacters": ["Lydia", "Nobody", "Lydia"],
        "blacklistedFemaleRaces": ["ElderRace", "GhostRace"],
        "blacklistedMaleSources": ["Skyrim.esm", "Gone.esp"],
        "blacklistedOutfits": ["Force Naked", "Unknown Robe"],
        "forceRefitOutfits": ["Lingerie"],
        "blacklistedOutfitSources": ["Mage.esp"],
        "blacklistedPresets": ["Zeroed", "Zeroed"],
        "someFutureKey": 12
    }"#;

    fn world() -> MemoryWorld {
        let mut w = MemoryWorld::new();
        w.add_source("Skyrim.esm", 0x00);
        w.add_faction("TownFaction");
        w.add_faction("BardsFaction");
        w.add_character_name("Mjoll the Lioness");
        w.add_character_name("Lydia");
        w.add_race("NordRace");
        w.add_race("ElderRace");
        w.add_outfit_name("Force Naked");
        w.add_outfit_name("Lingerie");
        w
    }

    #[test]
    fn parses_in_declaration_order_and_ignores_unknown_keys() {
        let config = DistributionConfig::from_json_str(SAMPLE).unwrap();
        let keys: Vec<&str> = config
            .faction_presets(Gender::Female)
            .iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["TownFaction", "BardsFaction", "MissingFaction"]);
        assert_eq!(config.blacklisted_presets, vec!["Zeroed"]);
        assert!(!config.show_blacklisted_presets);
    }

    #[test]
    fn filter_drops_unloaded_references() {
        let mut config = DistributionConfig::from_json_str(SAMPLE).unwrap();
        let removed = config.filter_unloaded(&world());

        assert!(config.character_presets.contains_key("Mjoll the Lioness"));
        assert!(!config.character_presets.contains_key("Ghost"));
        assert_eq!(config.blacklisted_characters, vec!["Lydia"]);

        let factions: Vec<&str> = config.female_faction_presets.iter().map(|(k, _)| k).collect();
        assert_eq!(factions, vec!["TownFaction", "BardsFaction"]);
        assert_eq!(
            config.female_faction_presets.get("BardsFaction").unwrap(),
            &vec!["Warrior".to_string(), "Figure".to_string()]
        );

        assert!(config.female_source_presets.contains_key("Skyrim.esm"));
        assert!(!config.female_source_presets.contains_key("NotInstalled.esp"));
        assert!(!config.female_race_presets.contains_key("FakeRace"));
        assert_eq!(config.blacklisted_female_races, vec!["ElderRace"]);
        assert_eq!(config.blacklisted_male_sources, vec!["Skyrim.esm"]);
        assert_eq!(config.blacklisted_outfits, vec!["Force Naked"]);
        assert_eq!(config.force_refit_outfits, vec!["Lingerie"]);
        assert!(config.blacklisted_outfit_sources.is_empty());

        // Ghost, Nobody, MissingFaction, NotInstalled.esp, FakeRace, GhostRace,
        // Gone.esp, Unknown Robe, Mage.esp
        assert_eq!(removed, 9);
    }

    #[test]
    fn reads_established_file_format() {
        let config = DistributionConfig::from_json_str(
            r#"{
                "npcFormID": {"Skyrim.esm": {"00013BA3": ["Bardmaid"]}},
                "npc": {"Lydia": ["Warrior"]},
                "factionFemale": {"TownFaction": ["Everywoman"]},
                "factionMale": {"CompanionsCircle": ["Himbo Muscled"]},
                "npcPluginFemale": {"Skyrim.esm": ["Oppai"]},
                "npcPluginMale": {"Dawnguard.esm": ["Himbo Simple"]},
                "raceFemale": {"NordRace": ["Everywoman"]},
                "raceMale": {"BretonRace": ["Himbo Simple"]},
                "blacklistedNpcs": ["Lydia"],
                "blacklistedNpcsFormID": {"Skyrim.esm": ["00013BB8"]},
                "blacklistedNpcsPluginFemale": ["Hearthfires.esm"],
                "blacklistedNpcsPluginMale": ["Auri.esp"],
                "blacklistedRacesFemale": ["ElderRace"],
                "blacklistedRacesMale": ["DarkElfRace"],
                "blacklistedOutfitsFromORefitFormID": {"Dress.esp": ["FE000817"]},
                "blacklistedOutfitsFromORefit": ["LS Force Naked"],
                "blacklistedOutfitsFromORefitPlugin": ["Mage.esp"],
                "outfitsForceRefitFormID": {"Dress.esp": ["FE000803"]},
                "outfitsForceRefit": ["Lingerie"],
                "blacklistedPresetsFromRandomDistribution": ["Zeroed"],
                "blacklistedPresetsShowInOBodyMenu": true
            }"#,
        )
        .unwrap();

        assert_eq!(config.character_presets_for("Lydia").unwrap(), &vec!["Warrior".to_string()]);
        assert_eq!(config.character_presets_by_id.len(), 1);
        assert_eq!(config.blacklisted_characters, vec!["Lydia"]);
        assert_eq!(config.blacklisted_characters_by_id.len(), 1);
        assert!(config.faction_presets(Gender::Female).contains_key("TownFaction"));
        assert!(config.faction_presets(Gender::Male).contains_key("CompanionsCircle"));
        assert!(config.source_presets(Gender::Female).contains_key("Skyrim.esm"));
        assert!(config.source_presets(Gender::Male).contains_key("Dawnguard.esm"));
        assert!(config.race_presets(Gender::Female).contains_key("NordRace"));
        assert!(config.race_presets(Gender::Male).contains_key("BretonRace"));
        assert_eq!(config.blacklisted_sources(Gender::Female), ["Hearthfires.esm"]);
        assert_eq!(config.blacklisted_sources(Gender::Male), ["Auri.esp"]);
        assert_eq!(config.blacklisted_races(Gender::Female), ["ElderRace"]);
        assert_eq!(config.blacklisted_races(Gender::Male), ["DarkElfRace"]);
        assert_eq!(config.blacklisted_outfits_by_id.len(), 1);
        assert_eq!(config.blacklisted_outfits, vec!["LS Force Naked"]);
        assert_eq!(config.blacklisted_outfit_sources, vec!["Mage.esp"]);
        assert_eq!(config.force_refit_outfits_by_id.len(), 1);
        assert_eq!(config.force_refit_outfits, vec!["Lingerie"]);
        assert_eq!(config.blacklisted_presets, vec!["Zeroed"]);
        assert!(config.show_blacklisted_presets);

        let mut w = world();
        w.add_form("Skyrim.esm", 0x013BB8);
        let tables = crate::tables::RuleTables::build(&config, &w);
        assert!(tables.is_character_blacklisted(0x00013BB8));
    }

    #[test]
    fn serializes_established_key_names() {
        let config = DistributionConfig::from_json_str(r#"{"blacklistedCharacters": ["Lydia"]}"#).unwrap();
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["blacklistedNpcs"], serde_json::json!(["Lydia"]));
        assert!(value.get("blacklistedCharacters").is_none());
    }

    #[test]
    fn stable_dedup_keeps_first_occurrence() {
        let mut list: Vec<String> = ["b", "a", "b", "c", "a"].iter().map(|s| s.to_string()).collect();
        dedup_stable(&mut list);
        assert_eq!(list, vec!["b", "a", "c"]);
    }

    #[test]
    fn trimmed_lookup() {
        let list = vec!["Lydia".to_string()];
        assert!(contains_trimmed(&list, "  Lydia "));
        assert!(!contains_trimmed(&list, "lydia"));
    }

    #[test]
    fn serializes_back_in_order() {
        let config = DistributionConfig::from_json_str(SAMPLE).unwrap();
        let json = serde_json::to_string(&config.female_faction_presets).unwrap();
        assert!(json.starts_with(r#"{"TownFaction""#));
    }
}
