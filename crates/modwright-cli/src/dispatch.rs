use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use modwright_catalog::Catalog;
use modwright_core::{FileFlashStore, FilePrefStore, PrefStore, PREF_MODULES_TO_SHOW, SHOW_ALL};
use modwright_installer::{Action, AppLayout, WizardState, WizardStep};
use modwright_sources::{HttpCatalogFetch, HttpUpdateClient, VersionCache};

use crate::completion;
use crate::flows::{self, APP_VERSION};
use crate::render::{current_output_style, OutputStyle};

#[derive(Parser, Debug)]
#[command(name = "modwright")]
#[command(about = "Module update orchestrator for a host application", long_about = None)]
pub struct Cli {
    // Host application root; defaults to the current directory.
    #[arg(long)]
    pub root: Option<PathBuf>,
    // Remote catalog location; the bundled catalog is used when omitted or
    // unreachable.
    #[arg(long)]
    pub catalog_url: Option<String>,
    #[arg(long)]
    pub plain: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    List,
    Info {
        module: String,
    },
    Check {
        module: String,
    },
    Install {
        module: String,
    },
    Update {
        module: String,
    },
    WizardStep {
        module: String,
        #[arg(long)]
        step: String,
        #[arg(long, default_value = "update")]
        action: String,
        #[arg(long, default_value = "")]
        current_version: String,
        #[arg(long, default_value = "")]
        latest_version: String,
        #[arg(long, default_value = "")]
        download_url: String,
        #[arg(long, default_value = "")]
        error: String,
    },
    Rollback {
        module: String,
    },
    Settings {
        #[arg(long)]
        api_token: Option<String>,
        #[arg(long)]
        modules_to_show: Option<String>,
    },
    Completions {
        shell: Shell,
    },
    Version,
}

struct Env {
    layout: AppLayout,
    catalog: Catalog,
    prefs: FilePrefStore,
    flash: FileFlashStore,
    client: HttpUpdateClient,
    cache: VersionCache,
}

fn open_env(root: Option<PathBuf>, catalog_url: Option<String>) -> Result<Env> {
    let root = root.unwrap_or_else(|| PathBuf::from("."));
    let layout = AppLayout::new(root);
    layout.ensure_base_dirs()?;

    let prefs = FilePrefStore::open(layout.prefs_path())?;
    let flash = FileFlashStore::new(layout.flash_path());
    let client = HttpUpdateClient::new()?;
    let catalog = match catalog_url {
        Some(url) => {
            let fetch = HttpCatalogFetch::new(url)?;
            Catalog::load(Some(&fetch), APP_VERSION)?
        }
        None => Catalog::bundled(APP_VERSION)?,
    };
    let cache = VersionCache::new(layout.cache_dir());

    Ok(Env {
        layout,
        catalog,
        prefs,
        flash,
        client,
        cache,
    })
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let style = if cli.plain {
        OutputStyle::Plain
    } else {
        current_output_style()
    };

    match cli.command {
        Commands::Completions { shell } => {
            completion::write_completions(shell, &mut std::io::stdout());
            return Ok(());
        }
        Commands::Version => {
            println!("{APP_VERSION}");
            return Ok(());
        }
        command => {
            let mut env = open_env(cli.root, cli.catalog_url)?;
            print_lines(flows::boot(&mut env.prefs)?);
            print_lines(flows::run_guard(
                &env.layout,
                &env.catalog,
                &env.client,
                &mut env.prefs,
                &mut env.flash,
                style,
            )?);

            match command {
                Commands::List => {
                    let rows = flows::collect_module_rows(
                        &env.layout,
                        &env.catalog,
                        &env.client,
                        &mut env.prefs,
                        &mut env.flash,
                        Some(&env.cache),
                    )?;
                    let filter = env.prefs.get(PREF_MODULES_TO_SHOW, SHOW_ALL);
                    let rows = flows::filter_rows(rows, &filter);
                    print_lines(flows::format_list_lines(&rows));
                }
                Commands::Info { module } => {
                    let (module_name, service) =
                        flows::resolve_service(&env.layout, &env.catalog, &module)?;
                    let rows = flows::collect_module_rows(
                        &env.layout,
                        &env.catalog,
                        &env.client,
                        &mut env.prefs,
                        &mut env.flash,
                        Some(&env.cache),
                    )?;
                    if let Some(row) = rows.iter().find(|row| row.module_name == module_name) {
                        print_lines(flows::format_info_lines(row, &service));
                    }
                }
                Commands::Check { module } => {
                    print_lines(flows::run_check_command(
                        &env.layout,
                        &env.catalog,
                        &env.client,
                        &mut env.prefs,
                        &mut env.flash,
                        Some(&env.cache),
                        &module,
                        style,
                    )?);
                }
                Commands::Install { module } => {
                    print_lines(flows::run_action(
                        &env.layout,
                        &env.catalog,
                        &env.client,
                        &mut env.prefs,
                        &mut env.flash,
                        Some(&env.cache),
                        &module,
                        Action::Install,
                        style,
                    )?);
                }
                Commands::Update { module } => {
                    print_lines(flows::run_action(
                        &env.layout,
                        &env.catalog,
                        &env.client,
                        &mut env.prefs,
                        &mut env.flash,
                        Some(&env.cache),
                        &module,
                        Action::Update,
                        style,
                    )?);
                }
                Commands::WizardStep {
                    module,
                    step,
                    action,
                    current_version,
                    latest_version,
                    download_url,
                    error,
                } => {
                    let step = WizardStep::parse(&step)
                        .ok_or_else(|| anyhow::anyhow!("unknown wizard step: {step}"))?;
                    let state = WizardState {
                        module_name: module,
                        action: Action::parse(&action),
                        current_version,
                        latest_version,
                        download_url,
                        step,
                        error,
                    };
                    print_lines(flows::run_single_step(
                        &env.layout,
                        &env.catalog,
                        &env.client,
                        &mut env.prefs,
                        &mut env.flash,
                        state,
                        style,
                    )?);
                }
                Commands::Rollback { module } => {
                    print_lines(flows::run_rollback(
                        &env.layout,
                        &env.catalog,
                        &env.client,
                        &mut env.prefs,
                        &mut env.flash,
                        &module,
                        "",
                        style,
                    )?);
                }
                Commands::Settings {
                    api_token,
                    modules_to_show,
                } => {
                    print_lines(flows::apply_settings(
                        &mut env.prefs,
                        api_token.as_deref(),
                        modules_to_show.as_deref(),
                    )?);
                }
                Commands::Completions { .. } | Commands::Version => {}
            }
        }
    }

    Ok(())
}
