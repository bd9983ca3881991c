use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::slider::{Slider, SliderSet};
use crate::{DistributionError, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    Male,
}

impl Gender {
    pub fn is_female(self) -> bool {
        self == Gender::Female
    }
}

/// Body-shape family a preset was authored for. The two families use
/// opposite polarity on a handful of sliders.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BodyShape {
    Cbbe,
    Unp,
}

/// Keyword heuristics used while ingesting presets. Matching is a
/// case-insensitive substring test against the preset's name or body label.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationPolicy {
    /// Marks a clothed variant rather than a body preset.
    pub clothed_keywords: Vec<String>,
    /// Body labels that make a preset male; everything else is female.
    pub male_markers: Vec<String>,
    /// Body labels that put a preset in the `Unp` family.
    pub unp_keywords: Vec<String>,
    /// Sliders whose small/big polarity is flipped for `Unp` presets.
    pub inverted_sliders: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ClassificationPolicy {
    fn default() -> Self {
        Self {
            clothed_keywords: strings(&[
                "cloth", "outfit", "nevernude", "bikini", "feet", "hands", "push", "cleavage", "armor",
            ]),
            male_markers: strings(&["himbo", "talos", "sam", "sos", "savren"]),
            unp_keywords: strings(&["unp", "coco", "bhunp", "uunp"]),
            inverted_sliders: strings(&[
                "Breasts",
                "BreastsSmall",
                "NippleDistance",
                "NippleSize",
                "ButtCrack",
                "Butt",
                "ButtSmall",
                "Legs",
                "Arms",
                "ShoulderWidth",
            ]),
        }
    }
}

fn contains_any(text: &str, keywords: &[String]) -> bool {
    let text = text.to_lowercase();
    keywords
        .iter()
        .any(|k| !k.is_empty() && text.contains(&k.to_lowercase()))
}

impl ClassificationPolicy {
    pub fn is_clothed(&self, text: &str) -> bool {
        contains_any(text, &self.clothed_keywords)
    }

    pub fn gender_of(&self, body: &str) -> Gender {
        if contains_any(body, &self.male_markers) {
            Gender::Male
        } else {
            Gender::Female
        }
    }

    pub fn body_shape(&self, body: &str) -> BodyShape {
        if contains_any(body, &self.unp_keywords) {
            BodyShape::Unp
        } else {
            BodyShape::Cbbe
        }
    }

    pub fn is_inverted(&self, shape: BodyShape, slider: &str) -> bool {
        shape == BodyShape::Unp && self.inverted_sliders.iter().any(|s| s == slider)
    }
}

/// On-disk preset document: one file may hold several presets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresetFile {
    #[serde(default)]
    pub presets: Vec<PresetDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetDef {
    pub name: String,
    /// Body/shape label the preset targets.
    #[serde(default)]
    pub set: String,
    #[serde(default)]
    pub sliders: Vec<SliderDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliderDef {
    pub name: String,
    /// "big" feeds the weight-1 endpoint, anything else the weight-0 one.
    #[serde(default)]
    pub size: String,
    /// Percentage, 100 = 1.0.
    #[serde(default)]
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    pub name: String,
    pub body: String,
    pub shape: BodyShape,
    pub sliders: SliderSet,
}

impl Preset {
    /// Build a preset from its definition. Returns `None` for clothed variants.
    pub fn from_def(def: &PresetDef, policy: &ClassificationPolicy) -> Option<Preset> {
        if policy.is_clothed(&def.name) || policy.is_clothed(&def.set) {
            return None;
        }

        let shape = policy.body_shape(&def.set);
        let mut sliders = SliderSet::new();
        for node in &def.sliders {
            let inverted = policy.is_inverted(shape, &node.name);
            let raw = node.value / 100.0;
            let value = if inverted { 1.0 - raw } else { raw };

            let (min, max) = if node.size.eq_ignore_ascii_case("big") {
                (0.0, value)
            } else {
                (value, 0.0)
            };
            sliders.merge(Slider::new(node.name.clone(), min, max));
        }

        Some(Preset {
            name: def.name.clone(),
            body: def.set.clone(),
            shape,
            sliders,
        })
    }
}

/// Every ingested preset, split by gender and by whether it takes part in
/// random distribution. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    female: Vec<Preset>,
    male: Vec<Preset>,
    blacklisted_female: Vec<Preset>,
    blacklisted_male: Vec<Preset>,
    all_female: Vec<Preset>,
    all_male: Vec<Preset>,
    invalid_presets: usize,
}

impl Catalog {
    /// Scan `dir` (non-recursively) for `*.json` preset files.
    ///
    /// A file that cannot be read or parsed is counted in
    /// [`Catalog::invalid_presets`] and skipped; only a missing or unreadable
    /// directory is an error.
    pub fn ingest(
        dir: &Path,
        policy: &ClassificationPolicy,
        blacklisted_presets: &[String],
    ) -> Result<Catalog> {
        if !dir.is_dir() {
            return Err(DistributionError::Config(format!(
                "preset directory does not exist: {}",
                dir.display()
            )));
        }

        let mut catalog = Catalog::default();

        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!("load failed: {}", err);
                    catalog.invalid_presets += 1;
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            let is_json = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("json"))
                .unwrap_or(false);
            if !is_json {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            if policy.is_clothed(&file_name) {
                continue;
            }

            match read_preset_file(path) {
                Ok(doc) => catalog.insert_document(&doc, policy, blacklisted_presets),
                Err(err) => {
                    log::warn!("load failed: {} [{}]", path.display(), err);
                    catalog.invalid_presets += 1;
                }
            }
        }

        catalog.materialize();
        log::info!(
            "Female presets: {}, Male presets: {}",
            catalog.female.len(),
            catalog.male.len()
        );
        log::info!(
            "Blacklisted: Female presets: {}, Male presets: {}",
            catalog.blacklisted_female.len(),
            catalog.blacklisted_male.len()
        );

        Ok(catalog)
    }

    /// Build a catalog from already-parsed documents.
    pub fn from_documents<'a, I>(
        docs: I,
        policy: &ClassificationPolicy,
        blacklisted_presets: &[String],
    ) -> Catalog
    where
        I: IntoIterator<Item = &'a PresetFile>,
    {
        let mut catalog = Catalog::default();
        for doc in docs {
            catalog.insert_document(doc, policy, blacklisted_presets);
        }
        catalog.materialize();
        catalog
    }

    fn insert_document(
        &mut self,
        doc: &PresetFile,
        policy: &ClassificationPolicy,
        blacklisted_presets: &[String],
    ) {
        for def in &doc.presets {
            let Some(preset) = Preset::from_def(def, policy) else {
                continue;
            };

            let blacklisted = blacklisted_presets.iter().any(|b| b == &preset.name);
            let bucket = match (policy.gender_of(&preset.body), blacklisted) {
                (Gender::Female, false) => &mut self.female,
                (Gender::Female, true) => &mut self.blacklisted_female,
                (Gender::Male, false) => &mut self.male,
                (Gender::Male, true) => &mut self.blacklisted_male,
            };
            bucket.push(preset);
        }
    }

    fn materialize(&mut self) {
        self.all_female = self
            .female
            .iter()
            .chain(self.blacklisted_female.iter())
            .cloned()
            .collect();
        self.all_male = self
            .male
            .iter()
            .chain(self.blacklisted_male.iter())
            .cloned()
            .collect();
    }

    /// Presets eligible for random distribution.
    pub fn eligible(&self, gender: Gender) -> &[Preset] {
        match gender {
            Gender::Female => &self.female,
            Gender::Male => &self.male,
        }
    }

    pub fn blacklisted(&self, gender: Gender) -> &[Preset] {
        match gender {
            Gender::Female => &self.blacklisted_female,
            Gender::Male => &self.blacklisted_male,
        }
    }

    /// Eligible presets followed by blacklisted ones.
    pub fn all(&self, gender: Gender) -> &[Preset] {
        match gender {
            Gender::Female => &self.all_female,
            Gender::Male => &self.all_male,
        }
    }

    pub fn invalid_presets(&self) -> usize {
        self.invalid_presets
    }

    /// Preset names for a menu, sorted case-insensitively.
    pub fn preset_names(&self, gender: Gender, include_blacklisted: bool) -> Vec<String> {
        let source = if include_blacklisted {
            self.all(gender)
        } else {
            self.eligible(gender)
        };
        let mut names: Vec<String> = source.iter().map(|p| p.name.clone()).collect();
        names.sort_by_key(|n| n.to_lowercase());
        names
    }
}

fn read_preset_file(path: &Path) -> Result<PresetFile> {
    let data = fs::read_to_string(path)?;
    serde_json::from_str(&data).map_err(|source| DistributionError::PresetFile {
        path: path.to_path_buf(),
        source,
    })
}

fn names_match(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

pub fn find_preset<'a>(presets: &'a [Preset], name: &str) -> Option<&'a Preset> {
    presets.iter().find(|p| names_match(&p.name, name))
}

pub fn random_preset<'a, R: Rng>(rng: &mut R, presets: &'a [Preset]) -> Option<&'a Preset> {
    if presets.is_empty() {
        return None;
    }
    Some(&presets[rng.gen_range(0..presets.len())])
}

/// Pick one of `names` at random and resolve it against every preset of
/// `gender`, blacklisted ones included. Names that resolve to nothing are
/// dropped and the draw repeats; once the list is exhausted (or was empty)
/// a uniformly random eligible preset is returned instead.
pub fn random_by_name<'a, R: Rng>(
    rng: &mut R,
    catalog: &'a Catalog,
    gender: Gender,
    names: &[String],
) -> Option<&'a Preset> {
    draw_by_name(rng, catalog, gender, names).0
}

/// As [`random_by_name`], also reporting how many names were looked up.
pub(crate) fn draw_by_name<'a, R: Rng>(
    rng: &mut R,
    catalog: &'a Catalog,
    gender: Gender,
    names: &[String],
) -> (Option<&'a Preset>, usize) {
    let mut candidates: Vec<&str> = names.iter().map(String::as_str).collect();
    let mut lookups = 0usize;

    while !candidates.is_empty() {
        let idx = rng.gen_range(0..candidates.len());
        let chosen = candidates[idx];
        lookups += 1;
        log::info!("Looking for preset: {}", chosen);

        if let Some(preset) = find_preset(catalog.all(gender), chosen) {
            return (Some(preset), lookups);
        }
        candidates.swap_remove(idx);
    }

    log::info!("Preset names exhausted, returning a random one");
    (random_preset(rng, catalog.eligible(gender)), lookups)
}

/// Exact-name lookup used for explicit assignment; falls back to a random
/// eligible preset when the name is unknown.
pub fn preset_by_name<'a, R: Rng>(
    rng: &mut R,
    catalog: &'a Catalog,
    gender: Gender,
    name: &str,
) -> Option<&'a Preset> {
    log::info!("Looking for preset: {}", name);
    if let Some(preset) = find_preset(catalog.all(gender), name) {
        return Some(preset);
    }
    log::info!("Preset not found, choosing a random one.");
    random_preset(rng, catalog.eligible(gender))
}
