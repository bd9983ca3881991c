use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bodydist_core::engine::EquipOutcome;
use bodydist_core::host::{ActorInfo, DistributionEvent};
use bodydist_core::memory::{MemoryMorphs, MemoryPresence, MemoryWorld, RecordingNotifier, WorldSnapshot};
use bodydist_core::tables::parse_local_form_id;
use bodydist_core::{
    load, DistributionError, Distributor, LoadReport, Resolution, Result, Services, Settings, PRESET_KEY,
    REFIT_KEY,
};

#[derive(Debug, Parser)]
#[command(name = "bodydist", version, about = "Preset distribution driver over a world snapshot")]
struct Args {
    /// Settings JSON; flags below override its values.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// World snapshot JSON standing in for the running game.
    #[arg(long)]
    world: PathBuf,

    /// Directory of preset files.
    #[arg(long)]
    presets: Option<PathBuf>,

    /// Distribution config JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value_t = false)]
    no_refit: bool,

    #[arg(long, default_value_t = false)]
    refit_nipple_sliders: bool,

    #[arg(long, default_value_t = false)]
    no_nipple_randomization: bool,

    #[arg(long, default_value_t = false)]
    no_genital_randomization: bool,

    #[arg(long, default_value_t = false)]
    performance_mode: bool,

    #[arg(long, default_value_t = false)]
    external_morph_guard: bool,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[arg(long, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Distribute presets to every actor in the snapshot.
    Distribute,

    /// Apply a named preset to one actor.
    Apply { actor: String, preset: String },

    /// Distribute to one actor, then replay an equip change.
    Equip {
        actor: String,
        /// Hex id of a worn item.
        item: String,
        #[arg(long, default_value_t = false)]
        remove: bool,
    },

    /// List the presets offered for an actor.
    List {
        actor: String,
        /// Include presets kept out of random distribution.
        #[arg(long)]
        all: Option<bool>,
    },

    /// Print catalog sizes and the load report.
    Stats,
}

#[derive(Serialize)]
struct ActorReport {
    name: String,
    outcome: String,
    preset_morphs: BTreeMap<String, f32>,
    refit_morphs: BTreeMap<String, f32>,
    events: Vec<String>,
}

#[derive(Serialize)]
struct StatsReport {
    female_presets: usize,
    male_presets: usize,
    load: LoadReport,
}

fn setup_logging(args: &Args) {
    let level = if args.debug {
        log::LevelFilter::Debug
    } else if args.verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };

    let result = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] [{}] [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply();

    if let Err(e) = result {
        eprintln!("Failed to initialise logging: {e}");
    }
}

fn build_settings(args: &Args) -> Result<Settings> {
    let mut settings = match args.settings.as_ref() {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };

    if let Some(presets) = args.presets.as_ref() {
        settings.preset_dir = presets.clone();
    }
    if let Some(config) = args.config.as_ref() {
        settings.config_path = config.clone();
    }
    if args.seed.is_some() {
        settings.seed = args.seed;
    }
    if args.no_refit {
        settings.refit = false;
    }
    if args.refit_nipple_sliders {
        settings.refit_nipple_sliders = true;
    }
    if args.no_nipple_randomization {
        settings.nipple_randomization = false;
    }
    if args.no_genital_randomization {
        settings.genital_randomization = false;
    }
    if args.performance_mode {
        settings.performance_mode = true;
    }
    if args.external_morph_guard {
        settings.external_morph_guard = true;
    }
    Ok(settings)
}

fn read_snapshot(path: &Path) -> Result<WorldSnapshot> {
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

fn find_actor<'a>(snapshot: &'a WorldSnapshot, name: &str) -> Result<&'a ActorInfo> {
    snapshot
        .actors
        .iter()
        .find(|a| a.name == name.trim())
        .ok_or_else(|| DistributionError::Config(format!("no actor named '{}' in the world snapshot", name)))
}

fn morphs_under(morphs: &MemoryMorphs, actor: &ActorInfo, key: &str) -> BTreeMap<String, f32> {
    morphs.morphs_under(actor.handle, key).into_iter().collect()
}

fn describe_event(event: &DistributionEvent) -> String {
    match event {
        DistributionEvent::Generated { preset, .. } => format!("generated {preset}"),
        DistributionEvent::Naked { .. } => "naked".to_string(),
        DistributionEvent::RemovingClothes { .. } => "removing clothes".to_string(),
    }
}

fn report(
    actor: &ActorInfo,
    outcome: String,
    morphs: &MemoryMorphs,
    events: &[DistributionEvent],
) -> ActorReport {
    let events = events
        .iter()
        .filter(|e| match e {
            DistributionEvent::Generated { actor: a, .. }
            | DistributionEvent::Naked { actor: a }
            | DistributionEvent::RemovingClothes { actor: a } => *a == actor.handle,
        })
        .map(describe_event)
        .collect();
    ActorReport {
        name: actor.name.clone(),
        outcome,
        preset_morphs: morphs_under(morphs, actor, PRESET_KEY),
        refit_morphs: morphs_under(morphs, actor, REFIT_KEY),
        events,
    }
}

fn describe_resolution(resolution: &Resolution) -> String {
    match resolution {
        Resolution::AlreadyProcessed => "already processed".to_string(),
        Resolution::NoPresets => "no presets".to_string(),
        Resolution::Blacklisted => "blacklisted".to_string(),
        Resolution::Applied { preset, tier } => format!("applied {preset} ({tier:?})"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let settings = build_settings(&args)?;
    let snapshot = read_snapshot(&args.world)?;
    let world = MemoryWorld::from_snapshot(&snapshot);

    let loaded = load(&settings, &world);
    let load_report = loaded.report.clone();
    if !load_report.config_valid {
        log::warn!("running with an empty distribution config");
    }

    let morphs = Arc::new(MemoryMorphs::new());
    let presence = Arc::new(MemoryPresence::new());
    let events = Arc::new(RecordingNotifier::new());
    for actor in &snapshot.actors {
        presence.set(actor.handle, true, true);
    }
    let services = Services {
        morphs: morphs.clone(),
        presence,
        notifier: events.clone(),
    };
    let mut distributor = Distributor::new(loaded, settings, services);

    match &args.command {
        Command::Distribute => {
            let mut reports = Vec::new();
            for actor in &snapshot.actors {
                let resolution = distributor.generate_actor_body(actor);
                reports.push((actor, describe_resolution(&resolution)));
            }
            distributor.shutdown();
            let events = events.take();
            let out: Vec<ActorReport> = reports
                .into_iter()
                .map(|(actor, outcome)| report(actor, outcome, &morphs, &events))
                .collect();
            print_json(&out)?;
        }
        Command::Apply { actor, preset } => {
            let actor = find_actor(&snapshot, actor)?;
            let resolution = distributor.generate_by_name(actor, preset);
            distributor.shutdown();
            print_json(&report(actor, describe_resolution(&resolution), &morphs, &events.take()))?;
        }
        Command::Equip { actor, item, remove } => {
            let actor = find_actor(&snapshot, actor)?;
            let local = parse_local_form_id(item)
                .ok_or_else(|| DistributionError::Config(format!("'{}' is not a hex item id", item)))?;
            let worn = actor
                .worn
                .iter()
                .find(|w| w.form_id == local || w.form_id & 0x00FF_FFFF == local)
                .ok_or_else(|| DistributionError::Config(format!("{} does not wear item {}", actor.name, item)))?;

            distributor.generate_actor_body(actor);
            events.take();
            let outcome: EquipOutcome = distributor.process_equip_event(actor, worn, *remove);
            distributor.shutdown();
            print_json(&report(actor, format!("{outcome:?}"), &morphs, &events.take()))?;
        }
        Command::List { actor, all } => {
            let actor = find_actor(&snapshot, actor)?;
            let names = match all {
                Some(include) => distributor.list_presets_with(actor, *include),
                None => distributor.list_presets(actor),
            };
            print_json(&names)?;
        }
        Command::Stats => {
            print_json(&StatsReport {
                female_presets: distributor.female_preset_count(),
                male_presets: distributor.male_preset_count(),
                load: load_report,
            })?;
        }
    }

    Ok(())
}

fn main() {
    let args = Args::parse();
    setup_logging(&args);

    if let Err(err) = run(args) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
