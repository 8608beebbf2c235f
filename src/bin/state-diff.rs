//! Offline comparison of stored page snapshots
//!
//! Snapshots are the JSON documents produced by the DOM extraction script;
//! rectangles are a JSON list of `{id, parent_id, nested_blocks, rect}` with
//! nested blocks given as positional XPaths.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crawl_state::config::{ComparisonConfig, FragmentConfig, LabelMode};
use crawl_state::dom::DocumentTree;
use crawl_state::fragment::{HierarchyKind, RectangleSpec, export_overlay};
use crawl_state::state::factory::offline_hybrid_payload;
use crawl_state::state::{StatePayload, StateVertex, TreeEditPayload};
use crawl_state::ted::TreeComparison;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Hierarchy {
    Visual,
    Dom,
}

impl From<Hierarchy> for HierarchyKind {
    fn from(value: Hierarchy) -> Self {
        match value {
            Hierarchy::Visual => HierarchyKind::Visual,
            Hierarchy::Dom => HierarchyKind::Dom,
        }
    }
}

#[derive(Parser)]
#[command(name = "state-diff")]
#[command(version)]
#[command(about = "Compare and fragment stored page snapshots", long_about = None)]
struct Cli {
    /// Comparison configuration (JSON)
    #[arg(long, short = 'c', value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Label nodes by tag and position instead of tag only
    #[arg(long, global = true)]
    visual: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Edit distance and equality of two snapshots
    Distance { first: PathBuf, second: PathBuf },

    /// Nodes that differ between two snapshots
    Diff { first: PathBuf, second: PathBuf },

    /// Build the fragment tree of a snapshot from its segmentation
    Fragments {
        snapshot: PathBuf,
        rectangles: PathBuf,

        /// Viewport screenshot to crop fragments from
        #[arg(long, value_name = "PNG")]
        screenshot: Option<PathBuf>,

        /// Directory receiving fragment crops and the overlay
        #[arg(long, short = 'o', value_name = "DIR", requires = "screenshot")]
        out: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "visual")]
        hierarchy: Hierarchy,
    },
}

fn load_config(cli: &Cli) -> Result<ComparisonConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let json = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            ComparisonConfig::from_json(&json)?
        }
        None => ComparisonConfig::default(),
    };
    if cli.visual {
        config = config.label_mode(LabelMode::Visual);
    }
    Ok(config)
}

fn load_snapshot(path: &Path) -> Result<DocumentTree> {
    let json = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    DocumentTree::from_json(&json).with_context(|| format!("parsing snapshot {}", path.display()))
}

fn state_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn distance(config: ComparisonConfig, first: &Path, second: &Path) -> Result<()> {
    let a = StateVertex::new(0, state_name(first), StatePayload::TreeEdit(TreeEditPayload::new(load_snapshot(first)?, config)));
    let b = StateVertex::new(1, state_name(second), StatePayload::TreeEdit(TreeEditPayload::new(load_snapshot(second)?, config)));

    println!("distance:        {}", a.distance(&b));
    println!("hidden-adjusted: {}", a.hidden_adjusted_distance(&b));
    println!("threshold:       {}", config.threshold);
    println!("equal:           {}", a.equals(&b));
    Ok(())
}

fn diff(config: ComparisonConfig, first: &Path, second: &Path) -> Result<()> {
    let (a, b) = (load_snapshot(first)?, load_snapshot(second)?);
    let comparison = TreeComparison::run(&a, &b, &config.label_mode)?;
    let changed = comparison.diff_nodes();

    println!("distance: {}", comparison.distance());
    println!("{} ({} changed):", first.display(), changed.doc1.len());
    for node in &changed.doc1 {
        println!("  - {}", a.xpath(*node));
    }
    println!("{} ({} changed):", second.display(), changed.doc2.len());
    for node in &changed.doc2 {
        println!("  + {}", b.xpath(*node));
    }
    Ok(())
}

fn fragments(
    config: ComparisonConfig,
    snapshot: &Path,
    rectangles: &Path,
    screenshot: Option<&Path>,
    out: Option<&Path>,
    hierarchy: Hierarchy,
) -> Result<()> {
    let tree = load_snapshot(snapshot)?;
    let json = fs::read_to_string(rectangles).with_context(|| format!("reading {}", rectangles.display()))?;
    let rectangles = RectangleSpec::load_all(&json, &tree)?;
    let screenshot = screenshot
        .map(|path| image::open(path).with_context(|| format!("opening {}", path.display())))
        .transpose()?;

    let payload = offline_hybrid_payload(tree, screenshot, &rectangles, config, FragmentConfig::default());
    let state = StateVertex::new(0, state_name(snapshot), StatePayload::Hybrid(payload));
    let Some(fragments) = state.fragments() else {
        println!("no fragments");
        return Ok(());
    };

    println!("{} fragments", fragments.len());
    print!("{}", fragments.render_tree(hierarchy.into()));

    if let (Some(dir), Some(viewport)) = (out, state.screenshot()) {
        fs::create_dir_all(dir)?;
        let written = state.export_fragments(dir, viewport)?;
        let overlay = dir.join(format!("{}-overlay.png", state.name()));
        export_overlay(fragments, viewport, &overlay)?;
        info!("Wrote {} crops and {}", written.len(), overlay.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match &cli.command {
        Command::Distance { first, second } => distance(config, first, second),
        Command::Diff { first, second } => diff(config, first, second),
        Command::Fragments {
            snapshot,
            rectangles,
            screenshot,
            out,
            hierarchy,
        } => fragments(config, snapshot, rectangles, screenshot.as_deref(), out.as_deref(), *hierarchy),
    }
}
