#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info, Level as TraceLevel};
use tracing_subscriber::FmtSubscriber;

use rig_scene_panel::constants::logging;
use rig_scene_panel::{ItemId, PanelConfig, PanelSession, PinState, SceneFile, SceneTree};

#[derive(Parser)]
#[command(name = "rig-scene-panel")]
#[command(about = "Organize the nodes of a rig scene into a persistent panel tree")]
struct Cli {
    /// Scene file acting as the backing store
    #[arg(long, global = true, default_value = "scene.json")]
    scene: PathBuf,

    /// Unique name of the rig root to show; every node when omitted
    #[arg(long, global = true)]
    root: Option<String>,

    /// Config file; the platform config dir is used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the panel tree with pin markers
    Show,
    /// Write the current layout onto the rig root
    Save,
    /// Wrap items in a new group
    Group {
        paths: Vec<String>,

        #[arg(long, short)]
        name: Option<String>,
    },
    /// Dissolve a group into its parent
    Ungroup { path: String },
    Pin { paths: Vec<String> },
    Unpin { paths: Vec<String> },
    /// Rename an item (backing nodes are renamed in the scene too)
    Rename { path: String, new_name: String },
    /// Move items under another item
    Move {
        paths: Vec<String>,

        /// Target parent; the top level when omitted
        #[arg(long)]
        to: Option<String>,

        /// Row within the target; appends when omitted
        #[arg(long)]
        row: Option<usize>,
    },
}

fn init_logging(config: &PanelConfig) {
    // LOG_LEVEL wins over the config file
    let log_level = match std::env::var(logging::LEVEL_ENV)
        .unwrap_or_else(|_| config.log_level.clone())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("tracing subscriber already installed");
    }
}

fn load_config(path: Option<&Path>) -> Result<PanelConfig> {
    match path {
        Some(path) => PanelConfig::load_from(path),
        None => PanelConfig::load(),
    }
}

fn resolve(session: &PanelSession<SceneFile>, path: &str) -> Result<ItemId> {
    session
        .find(path)
        .with_context(|| format!("No panel item at '{}'", path))
}

fn resolve_all(session: &PanelSession<SceneFile>, paths: &[String]) -> Result<Vec<ItemId>> {
    paths.iter().map(|path| resolve(session, path)).collect()
}

fn pin_marker(state: PinState) -> &'static str {
    match state {
        PinState::Pinned => "[x]",
        PinState::PartiallyPinned => "[~]",
        PinState::Unpinned => "[ ]",
    }
}

/// Indented outline of the tree, one item per line
fn render(tree: &SceneTree) -> String {
    let mut out = String::new();
    let mut stack: Vec<(ItemId, usize)> = tree.roots().iter().rev().map(|&id| (id, 0)).collect();
    while let Some((id, depth)) = stack.pop() {
        let Some(data) = tree.data(id) else { continue };
        out.push_str(&"  ".repeat(depth));
        out.push_str(pin_marker(tree.pin_state(id)));
        out.push(' ');
        out.push_str(data.display_name());
        if !data.is_group() {
            out.push_str(&format!(" ({})", data.node_type()));
        }
        out.push('\n');
        stack.extend(tree.children(id).iter().rev().map(|&child| (child, depth + 1)));
    }
    out
}

fn run(cli: Cli, config: PanelConfig) -> Result<()> {
    let scene = SceneFile::load(&cli.scene)?;
    let mut session = PanelSession::new(scene, cli.root.clone(), config);
    session.refresh()?;

    let mutated = match cli.command {
        Commands::Show => {
            print!("{}", render(session.tree()));
            false
        }
        Commands::Save => true,
        Commands::Group { paths, name } => {
            let items = resolve_all(&session, &paths)?;
            let group = session.group_selected(&items, name.as_deref())?;
            info!(group = %session.tree().tree_path(group), "Created group");
            true
        }
        Commands::Ungroup { path } => {
            let group = resolve(&session, &path)?;
            session.ungroup(group)?;
            true
        }
        Commands::Pin { paths } => {
            let items = resolve_all(&session, &paths)?;
            session.set_pinned(&items, PinState::Pinned)?;
            true
        }
        Commands::Unpin { paths } => {
            let items = resolve_all(&session, &paths)?;
            session.set_pinned(&items, PinState::Unpinned)?;
            true
        }
        Commands::Rename { path, new_name } => {
            let item = resolve(&session, &path)?;
            let applied = session.rename(item, &new_name)?;
            info!(item = %path, name = %applied, "Renamed");
            true
        }
        Commands::Move { paths, to, row } => {
            let items = resolve_all(&session, &paths)?;
            let parent = to.as_deref().map(|path| resolve(&session, path)).transpose()?;
            session.move_items(&items, parent, row.unwrap_or(usize::MAX))?;
            true
        }
    };

    if mutated {
        session.save()?;
        session.into_builder().save(&cli.scene)?;
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    };
    init_logging(&config);

    if let Err(e) = run(cli, config) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
