// Command line surface
//
// Each subcommand drives the same PlayController and TaskExecutor a
// graphical front end would, then blocks on the executor until the work it
// started has been dispatched.

use crate::app::{MoveDirection, PlayController};
use crate::models::{PackFilter, SelectionFilter};
use crate::services::RegistryEvent;
use crate::tasks::{TaskExecutor, TaskRequest};
use anyhow::{Context, Result, anyhow};
use camino::Utf8PathBuf;
use clap::{ArgAction, Parser, Subcommand};
use inquire::Confirm;

/// Launcher version manager and content-pack load order tool
#[derive(Debug, Parser)]
#[command(name = "packrun")]
#[command(version = crate::VERSION)]
#[command(about = "Install launcher releases, order content packs, and play.")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding packrun.yaml (defaults to the platform config dir)
    #[arg(long, global = true, value_name = "DIR")]
    pub config_dir: Option<Utf8PathBuf>,

    /// Answer yes to every confirmation prompt
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    /// Log debug output to the console
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage content packs and their load order
    #[command(subcommand)]
    Packs(PacksCommand),

    /// Manage installed launcher versions
    #[command(subcommand)]
    Versions(VersionsCommand),

    /// Show or change options written to playlunky.ini
    #[command(subcommand)]
    Options(OptionsCommand),

    /// Fetch the release list now
    Refresh {
        /// Keep running and refresh on the configured interval
        #[arg(long)]
        watch: bool,
    },

    /// Install or update the selected version if needed, then launch it
    Play,

    /// Print a one-line status
    Status,
}

#[derive(Debug, Subcommand)]
pub enum PacksCommand {
    /// List packs in display-name order
    List {
        /// Case-insensitive match on the pack folder name
        #[arg(short, long)]
        query: Option<String>,

        /// Only enabled packs
        #[arg(long, conflicts_with = "unselected")]
        selected: bool,

        /// Only disabled packs
        #[arg(long)]
        unselected: bool,
    },
    /// Append a pack to the end of the load order
    Enable { pack: String },
    /// Drop a pack from the load order
    Disable { pack: String },
    /// Load a pack one slot earlier
    Up { pack: String },
    /// Load a pack one slot later
    Down { pack: String },
    /// Delete a pack directory from disk
    Remove { pack: String },
    /// Delete the packs cache directory
    ClearCache,
}

#[derive(Debug, Subcommand)]
pub enum VersionsCommand {
    /// List selectable versions and which are installed
    List,
    /// Download and install a version
    Install { tag: String },
    /// Remove an installed version
    Uninstall { tag: String },
    /// Choose the version `play` uses
    Select { tag: String },
    /// Delete the cached release list
    ClearCache,
}

#[derive(Debug, Subcommand)]
pub enum OptionsCommand {
    /// List every option with its current value
    List,
    /// Set an option to true or false
    Set {
        option: String,
        #[arg(action = ArgAction::Set)]
        value: bool,
    },
}

/// Ask before a destructive action unless `--yes` was given.
fn confirm(message: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    Confirm::new(message)
        .with_default(false)
        .prompt()
        .context("Failed to read confirmation")
}

/// Run one subcommand to completion.
pub fn execute(cli: &Cli, controller: &PlayController, executor: &mut TaskExecutor) -> Result<()> {
    match &cli.command {
        Command::Packs(command) => run_packs(command, cli.yes, controller),
        Command::Versions(command) => run_versions(command, cli.yes, controller, executor),
        Command::Options(command) => run_options(command, controller),
        Command::Refresh { watch } => {
            controller.request_refresh(executor);
            report_release_count(controller);
            if *watch {
                let ctx = controller.context();
                tracing::info!(
                    "Watching releases every {}s, press Ctrl+C to stop",
                    ctx.releases().interval().as_secs()
                );
                let runtime = executor.runtime().clone();
                let scheduler = {
                    let _enter = runtime.enter();
                    ctx.releases().spawn_periodic(executor.invoker())
                };
                executor.run_until_cancelled();
                scheduler.abort();
            }
            finish(controller)
        }
        Command::Play => {
            refresh_if_due(controller, executor);
            executor.invoke(TaskRequest::Play);
            executor.run_until_idle();
            finish(controller)
        }
        Command::Status => {
            println!("{}", controller.context().state().read(|s| s.status_line()));
            Ok(())
        }
    }
}

fn run_packs(command: &PacksCommand, assume_yes: bool, controller: &PlayController) -> Result<()> {
    let ctx = controller.context();
    ctx.reconcile_packs()?;
    print_registry_events(ctx.drain_registry_events());

    match command {
        PacksCommand::List {
            query,
            selected,
            unselected,
        } => {
            let selection = if *selected {
                SelectionFilter::Selected
            } else if *unselected {
                SelectionFilter::Unselected
            } else {
                SelectionFilter::All
            };
            let filter = PackFilter {
                query: query.clone(),
                selection,
            };
            for pack in ctx.packs(&filter)? {
                let slot = pack
                    .position
                    .map(|p| format!("{:>3}", p + 1))
                    .unwrap_or_else(|| "  -".to_string());
                if pack.display_name == pack.identifier {
                    println!("{} {}", slot, pack.identifier);
                } else {
                    println!("{} {} ({})", slot, pack.display_name, pack.identifier);
                }
            }
        }
        PacksCommand::Enable { pack } => {
            ctx.set_pack_enabled(pack, true)?;
        }
        PacksCommand::Disable { pack } => {
            ctx.set_pack_enabled(pack, false)?;
        }
        PacksCommand::Up { pack } => {
            if !ctx.move_pack(pack, MoveDirection::Up)? {
                println!("{} is not enabled or already first", pack);
            }
        }
        PacksCommand::Down { pack } => {
            if !ctx.move_pack(pack, MoveDirection::Down)? {
                println!("{} is not enabled or already last", pack);
            }
        }
        PacksCommand::Remove { pack } => {
            let Some(target) = ctx.pack_removal_target(pack)? else {
                println!("No pack directory named {}", pack);
                return Ok(());
            };
            if confirm(&format!("Remove {} from disk?", target), assume_yes)? {
                ctx.remove_pack(pack)?;
            }
        }
        PacksCommand::ClearCache => {
            let dir = ctx.pack_cache_dir();
            if confirm(&format!("Remove pack cache {}?", dir), assume_yes)?
                && !ctx.clear_pack_cache()?
            {
                println!("No pack cache at {}", dir);
            }
        }
    }

    print_registry_events(ctx.drain_registry_events());
    Ok(())
}

fn run_versions(
    command: &VersionsCommand,
    assume_yes: bool,
    controller: &PlayController,
    executor: &mut TaskExecutor,
) -> Result<()> {
    let ctx = controller.context();
    match command {
        VersionsCommand::List => {
            refresh_if_due(controller, executor);
            let state = ctx.state().snapshot();
            for tag in &state.version_choices {
                let selected = state.selected_version.as_deref() == Some(tag.as_str());
                let installed = match ctx.installer().installed_version(tag) {
                    Some(version) => format!("installed {}", version),
                    None if state.installed_versions.contains(tag) => "installed".to_string(),
                    None => String::new(),
                };
                println!(
                    "{} {:<20} {}",
                    if selected { "*" } else { " " },
                    tag,
                    installed
                );
            }
            Ok(())
        }
        VersionsCommand::Install { tag } => {
            refresh_if_due(controller, executor);
            ctx.request_install(tag, false, &executor.invoker())?;
            executor.run_until_idle();
            finish(controller)
        }
        VersionsCommand::Uninstall { tag } => {
            if !ctx.installer().is_installed(tag) {
                println!("{} is not installed", tag);
                return Ok(());
            }
            if confirm(&format!("Uninstall {}?", tag), assume_yes)? {
                ctx.request_uninstall(tag, &executor.invoker());
                executor.run_until_idle();
            }
            finish(controller)
        }
        VersionsCommand::Select { tag } => {
            refresh_if_due(controller, executor);
            ctx.select_version(tag)?;
            Ok(())
        }
        VersionsCommand::ClearCache => {
            let path = ctx.releases().snapshot_path().to_path_buf();
            if confirm(&format!("Remove cached release list {}?", path), assume_yes)?
                && !ctx.clear_release_cache()?
            {
                println!("No cached release list at {}", path);
            }
            Ok(())
        }
    }
}

fn run_options(command: &OptionsCommand, controller: &PlayController) -> Result<()> {
    let ctx = controller.context();
    match command {
        OptionsCommand::List => {
            let options = ctx.options();
            let mut current = None;
            for (section, name, value) in options.iter() {
                if current != Some(section) {
                    println!("[{}]", section);
                    current = Some(section);
                }
                println!("  {:<28} {}", name, value);
            }
        }
        OptionsCommand::Set { option, value } => {
            if !ctx.set_option(option, *value)? {
                println!("{} is already {}", option, value);
            }
        }
    }
    Ok(())
}

/// Refresh the snapshot unless the last one is younger than the interval.
fn refresh_if_due(controller: &PlayController, executor: &mut TaskExecutor) {
    let ctx = controller.context();
    let stale = ctx.releases().get_available().needs_refresh;
    if stale || ctx.releases().next_refresh_delay().is_none() {
        controller.request_refresh(executor);
    }
}

fn report_release_count(controller: &PlayController) {
    let count = controller
        .context()
        .state()
        .read(|s| s.version_choices.len());
    println!("{} versions available", count);
}

fn print_registry_events(events: Vec<RegistryEvent>) {
    for event in events {
        match event {
            RegistryEvent::PackCreated { identifier } => println!("+ {}", identifier),
            RegistryEvent::PackDestroyed { identifier } => println!("- {}", identifier),
            RegistryEvent::PackToggled {
                identifier,
                enabled,
            } => println!(
                "{} {}",
                if enabled { "enabled" } else { "disabled" },
                identifier
            ),
        }
    }
}

/// Print the final status and turn a recorded failure into an error.
fn finish(controller: &PlayController) -> Result<()> {
    let state = controller.context().state().snapshot();
    match state.last_error {
        Some(error) => Err(anyhow!(error)),
        None => {
            println!("{}", state.status_line());
            Ok(())
        }
    }
}
