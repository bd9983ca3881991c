use crate::config::{dedup_stable, DistributionConfig, OrderedMap};
use crate::host::{FormId, WorldRegistry};

/// A rule resolved to a concrete world record.
#[derive(Debug, Clone, PartialEq)]
pub struct CategorizedEntry {
    pub owner: String,
    pub form_id: FormId,
    /// Candidate presets; empty for blacklist-only entries.
    pub presets: Vec<String>,
}

/// Id-keyed rule tables, validated against the loaded world.
#[derive(Debug, Clone, Default)]
pub struct RuleTables {
    pub character_overrides: Vec<CategorizedEntry>,
    pub character_blacklist: Vec<CategorizedEntry>,
    pub outfit_blacklist: Vec<CategorizedEntry>,
    pub outfit_force_refit: Vec<CategorizedEntry>,
    dropped: usize,
}

/// Parse a hex record id as written by authors. Full eight-digit ids carry a
/// load-order prefix that is meaningless across setups, so only the trailing
/// six digits are kept.
pub fn parse_local_form_id(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let raw = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    let digits = if raw.len() == 8 { raw.get(2..)? } else { raw };
    if digits.is_empty() {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

impl RuleTables {
    pub fn build(config: &DistributionConfig, registry: &dyn WorldRegistry) -> RuleTables {
        let mut tables = RuleTables::default();

        tables.character_blacklist = tables.resolve_id_lists(
            &config.blacklisted_characters_by_id,
            "character blacklist",
            registry,
        );

        for (owner, entries) in config.character_presets_by_id.iter() {
            if !registry.is_source_loaded(owner) {
                log::info!("removed '{}' from character presets (source not loaded)", owner);
                tables.dropped += entries.len();
                continue;
            }
            for (key, names) in entries.iter() {
                let Some(form_id) = tables.resolve_key(owner, key, registry) else {
                    continue;
                };
                let mut presets = names.clone();
                dedup_stable(&mut presets);
                tables.character_overrides.push(CategorizedEntry {
                    owner: owner.to_string(),
                    form_id,
                    presets,
                });
            }
        }

        tables.outfit_blacklist =
            tables.resolve_id_lists(&config.blacklisted_outfits_by_id, "outfit blacklist", registry);
        tables.outfit_force_refit = tables.resolve_id_lists(
            &config.force_refit_outfits_by_id,
            "outfit force refit",
            registry,
        );

        log::info!(
            "Rule tables: {} character overrides, {} blacklisted characters, {} blacklisted outfits, {} force refit outfits ({} dropped)",
            tables.character_overrides.len(),
            tables.character_blacklist.len(),
            tables.outfit_blacklist.len(),
            tables.outfit_force_refit.len(),
            tables.dropped
        );

        tables
    }

    fn resolve_id_lists(
        &mut self,
        table: &OrderedMap<Vec<String>>,
        label: &str,
        registry: &dyn WorldRegistry,
    ) -> Vec<CategorizedEntry> {
        let mut out = Vec::new();
        for (owner, keys) in table.iter() {
            if !registry.is_source_loaded(owner) {
                log::info!("removed '{}' from {} (source not loaded)", owner, label);
                self.dropped += keys.len();
                continue;
            }
            let mut keys = keys.clone();
            dedup_stable(&mut keys);
            for key in &keys {
                if let Some(form_id) = self.resolve_key(owner, key, registry) {
                    out.push(CategorizedEntry {
                        owner: owner.to_string(),
                        form_id,
                        presets: Vec::new(),
                    });
                }
            }
        }
        out
    }

    fn resolve_key(&mut self, owner: &str, key: &str, registry: &dyn WorldRegistry) -> Option<FormId> {
        let resolved = parse_local_form_id(key).and_then(|local| registry.lookup_form(local, owner));
        if resolved.is_none() {
            log::info!("{} is not a valid key for {}!", key, owner);
            self.dropped += 1;
        }
        resolved
    }

    /// Number of configured entries discarded during [`RuleTables::build`].
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn is_character_blacklisted(&self, form_id: FormId) -> bool {
        self.character_blacklist.iter().any(|e| e.form_id == form_id)
    }

    /// Candidate presets for a character, if an id rule names it.
    pub fn character_presets(&self, form_id: FormId) -> Option<&[String]> {
        self.character_overrides
            .iter()
            .find(|e| e.form_id == form_id)
            .map(|e| e.presets.as_slice())
    }

    pub fn is_outfit_blacklisted(&self, form_id: FormId) -> bool {
        self.outfit_blacklist.iter().any(|e| e.form_id == form_id)
    }

    pub fn is_force_refit(&self, form_id: FormId) -> bool {
        self.outfit_force_refit.iter().any(|e| e.form_id == form_id)
    }
}
