// src/main.rs

use anyhow::{Context as _, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use haul::bucket::sync::{sync_all, sync_bucket};
use haul::bucket::{Bucket, BucketList, ObserveMode, Registry, SchemaVariant, validate_name};
use haul::config::{BucketEntry, Config, DEFAULT_WEIGHT};
use haul::download::HttpDownloader;
use haul::environment::Simulator;
use haul::install::{InstallOptions, InstallTransaction, pending_upgrades, uninstall};
use haul::lock::InstanceLock;
use haul::process::{ProcessRunner, SystemRunner};
use haul::venv::Resolver;
use haul::{Context, Paths};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "haul")]
#[command(author, version, about = "Bucket-based package manager with atomic installs and per-package environments", long_about = None)]
struct Cli {
    /// Managed root directory (default: ~/.haul)
    #[arg(long, global = true, env = "HAUL_ROOT")]
    root: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Install packages from the configured buckets
    Install {
        /// Package names
        #[arg(required = true)]
        packages: Vec<String>,
        /// Reinstall even when up to date or frozen
        #[arg(short, long)]
        force: bool,
    },
    /// Remove installed packages
    Uninstall {
        /// Package names
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Sync buckets and show available upgrades
    Update {
        /// Bucket names (syncs all if omitted)
        buckets: Vec<String>,
    },
    /// Upgrade installed packages
    Upgrade {
        /// Package names (upgrades everything not frozen if omitted)
        packages: Vec<String>,
        /// Reinstall even when up to date or frozen
        #[arg(short, long)]
        force: bool,
    },
    /// List installed packages
    List,
    /// Search bucket packages by glob pattern
    Search {
        /// Glob pattern, matched case-insensitively
        pattern: String,
    },
    /// Show package metadata
    Info {
        /// Package name
        package: String,
    },
    /// Pin a package at its installed version
    Freeze {
        /// Package name
        package: String,
    },
    /// Allow a frozen package to upgrade again
    Unfreeze {
        /// Package name
        package: String,
    },
    /// Run a command inside package environments
    Exec {
        /// Packages whose environments to activate
        #[arg(short, long = "package")]
        packages: Vec<String>,
        /// Command line to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Manage buckets
    Bucket {
        #[command(subcommand)]
        command: BucketCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum BucketCommands {
    /// Add a bucket and sync it
    Add {
        /// Bucket name
        name: String,
        /// Git repository or snapshot archive URL
        url: String,
        /// Priority weight (lower = preferred)
        #[arg(short, long, default_value_t = DEFAULT_WEIGHT)]
        weight: u32,
        /// Treat the URL as a snapshot archive instead of a git repository
        #[arg(long)]
        feed: bool,
        /// Package documents use the foreign schema
        #[arg(long)]
        foreign: bool,
        /// Replace an existing bucket of the same name
        #[arg(long)]
        replace: bool,
        /// Short description
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Remove a bucket and its checkout
    Remove {
        /// Bucket name
        name: String,
    },
    /// List buckets in priority order
    List,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .init();
}

fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf> {
    let root = match root {
        Some(root) => root,
        None => Paths::default_root().context("Cannot determine home directory; pass --root")?,
    };
    if root.is_absolute() {
        Ok(root)
    } else {
        Ok(std::env::current_dir()?.join(root))
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let Some(command) = cli.command else {
        println!("Haul Package Manager v{}", env!("CARGO_PKG_VERSION"));
        println!("Run 'haul --help' for usage information");
        return Ok(ExitCode::SUCCESS);
    };

    if let Commands::Completions { shell } = command {
        clap_complete::generate(shell, &mut Cli::command(), "haul", &mut io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let root = resolve_root(cli.root)?;
    debug!("Using root {}", root.display());

    match command {
        Commands::Install { packages, force } => {
            let ctx = Context::load(&root)?;
            let _lock = acquire_lock(&ctx)?;
            install_all(&ctx, &packages, force)
        }
        Commands::Uninstall { packages } => {
            let ctx = Context::load(&root)?;
            let _lock = acquire_lock(&ctx)?;
            let registry = Registry::new(&ctx);
            for name in &packages {
                let report = uninstall(&registry, name)?;
                println!("Uninstalled {} ({} links removed)", report.name, report.removed_links);
                for warning in &report.warnings {
                    println!("  warning: {}", warning);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Update { buckets } => {
            let ctx = Context::load(&root)?;
            let _lock = acquire_lock(&ctx)?;
            cmd_update(&ctx, &buckets)
        }
        Commands::Upgrade { packages, force } => {
            let ctx = Context::load(&root)?;
            let _lock = acquire_lock(&ctx)?;
            let names = if packages.is_empty() {
                let registry = Registry::new(&ctx);
                pending_upgrades(&registry)?
                    .into_iter()
                    .map(|check| check.candidate.name)
                    .collect()
            } else {
                packages
            };
            if names.is_empty() {
                println!("Everything is up to date.");
                return Ok(ExitCode::SUCCESS);
            }
            install_all(&ctx, &names, force)
        }
        Commands::List => {
            let ctx = Context::load(&root)?;
            let records = Registry::new(&ctx).store().list()?;
            if records.is_empty() {
                println!("No packages installed.");
                return Ok(ExitCode::SUCCESS);
            }
            println!("Installed packages:");
            for record in &records {
                let frozen = if ctx.is_frozen(&record.name) { " [frozen]" } else { "" };
                println!("  {} {} ({}){}", record.name, record.version, record.bucket, frozen);
            }
            println!("\nTotal: {} package(s)", records.len());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Search { pattern } => {
            let ctx = Context::load(&root)?;
            let glob = glob::Pattern::new(&pattern)
                .with_context(|| format!("Invalid search pattern '{}'", pattern))?;
            let options = glob::MatchOptions {
                case_sensitive: false,
                ..Default::default()
            };
            let registry = Registry::new(&ctx);
            let mut count = 0;
            for hit in registry.search(|name| glob.matches_with(name, options)) {
                println!("  {} ({})", hit.name, hit.bucket);
                count += 1;
            }
            if count == 0 {
                println!("No packages match '{}'.", pattern);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Info { package } => {
            let ctx = Context::load(&root)?;
            cmd_info(&ctx, &package)
        }
        Commands::Freeze { package } => set_frozen(&root, &package, true),
        Commands::Unfreeze { package } => set_frozen(&root, &package, false),
        Commands::Exec { packages, command } => {
            let ctx = Context::load(&root)?;
            let registry = Registry::new(&ctx);
            let mut sim = Simulator::inherit();
            let resolved = Resolver::new(registry.store()).resolve(&packages, &mut sim)?;
            debug!("Resolved {} path entries", resolved.paths.len());

            let code = SystemRunner.run_attached(&command, &sim.environ(), None)?;
            Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
        }
        Commands::Bucket { command } => cmd_bucket(&root, command),
        Commands::Completions { .. } => Ok(ExitCode::SUCCESS),
    }
}

fn acquire_lock(ctx: &Context) -> Result<InstanceLock> {
    ctx.paths.ensure()?;
    Ok(InstanceLock::acquire(&ctx.paths.lock_file)?)
}

/// Run one transaction per package, sequentially
fn install_all(ctx: &Context, names: &[String], force: bool) -> Result<ExitCode> {
    let registry = Registry::new(ctx);
    let cancel = Arc::new(AtomicBool::new(false));
    let downloader = HttpDownloader::new()?.with_cancel(Arc::clone(&cancel));
    let runner = SystemRunner;
    let options = InstallOptions {
        force,
        progress: true,
        cancel,
    };

    let mut failed = 0;
    for name in names {
        let transaction = InstallTransaction::new(&registry, &downloader, &runner, options.clone());
        match transaction.run(name) {
            Ok(report) => {
                println!("{}: {}", report.name, report.outcome);
                for warning in &report.warnings {
                    println!("  warning: {}", warning);
                }
            }
            Err(e) => {
                eprintln!("error: {}: {}", name, e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} package(s) failed", failed, names.len());
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_update(ctx: &Context, names: &[String]) -> Result<ExitCode> {
    let downloader = HttpDownloader::new()?;
    let runner = SystemRunner;

    let selected: Vec<&Bucket> = if names.is_empty() {
        ctx.buckets.prioritized()
    } else {
        names
            .iter()
            .map(|name| {
                ctx.buckets
                    .find(name)
                    .with_context(|| format!("No bucket named '{}'", name))
            })
            .collect::<Result<_>>()?
    };

    let mut failed = 0;
    for (name, result) in sync_all(selected, &ctx.paths, &downloader, &runner) {
        match result {
            Ok(state) => println!(
                "Synced {} at {}",
                name,
                state.revision.as_deref().unwrap_or("unknown revision")
            ),
            Err(e) => {
                eprintln!("error: {}: {}", name, e);
                failed += 1;
            }
        }
    }

    // Reload so lookups see the new documents and sync states
    let ctx = Context::load(&ctx.paths.root)?;
    let registry = Registry::new(&ctx);
    let pending = pending_upgrades(&registry)?;
    if !pending.is_empty() {
        println!("\nUpgrades available:");
        for check in &pending {
            let installed = check.installed.as_ref().map(|r| r.version.as_str()).unwrap_or("-");
            println!(
                "  {} {} -> {} ({})",
                check.candidate.name, installed, check.candidate.version, check.candidate.source_name
            );
        }
    }

    if failed > 0 {
        bail!("{} bucket(s) failed to sync", failed);
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_info(ctx: &Context, package: &str) -> Result<ExitCode> {
    let registry = Registry::new(ctx);
    let meta = registry.resolve(package)?;

    println!("Name:        {}", meta.name);
    println!("Version:     {}", meta.version);
    println!("Bucket:      {}", meta.source_name);
    if !meta.description.is_empty() {
        println!("Description: {}", meta.description);
    }
    if !meta.homepage.is_empty() {
        println!("Homepage:    {}", meta.homepage);
    }
    if !meta.license.is_empty() {
        println!("License:     {}", meta.license);
    }
    match &meta.arch {
        Some(arch) => println!("Arch:        {}", arch),
        None => println!("Arch:        any"),
    }
    for url in &meta.artifact_urls {
        println!("URL:         {}", url);
    }
    if let Some(hash) = &meta.artifact_hash {
        println!("Hash:        {}", hash);
    }
    if meta.venv.has_dependencies() {
        println!("Depends:     {}", meta.venv.dependencies.join(", "));
    }

    match registry.local_meta(package)? {
        Some(record) => {
            let frozen = if ctx.is_frozen(package) { ", frozen" } else { "" };
            println!("Installed:   {} ({}{})", record.version, record.date, frozen);
        }
        None => println!("Installed:   no"),
    }
    if !meta.notes.is_empty() {
        println!();
        for line in &meta.notes {
            println!("{}", line);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn set_frozen(root: &std::path::Path, package: &str, frozen: bool) -> Result<ExitCode> {
    let paths = Paths::new(root);
    paths.ensure()?;
    let _lock = InstanceLock::acquire(&paths.lock_file)?;

    let mut config = Config::load(&paths.config_file)?;
    let name = validate_name(package)?;
    let changed = if frozen {
        config.freeze(&name)
    } else {
        config.unfreeze(&name)
    };

    if changed {
        config.save(&paths.config_file)?;
        info!("{} {}", if frozen { "Froze" } else { "Unfroze" }, name);
    }
    match (frozen, changed) {
        (true, true) => println!("Froze {}", name),
        (true, false) => println!("{} is already frozen", name),
        (false, true) => println!("Unfroze {}", name),
        (false, false) => println!("{} is not frozen", name),
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_bucket(root: &std::path::Path, command: BucketCommands) -> Result<ExitCode> {
    let paths = Paths::new(root);

    match command {
        BucketCommands::Add {
            name,
            url,
            weight,
            feed,
            foreign,
            replace,
            description,
        } => {
            paths.ensure()?;
            let _lock = InstanceLock::acquire(&paths.lock_file)?;
            let mut config = Config::load(&paths.config_file)?;
            let mut list = BucketList::from_entries(&config.bucket, &paths.buckets_dir)?;

            let mut entry = BucketEntry::new(name.trim(), url);
            entry.description = description;
            entry.weights = weight;
            if feed {
                entry.mode = ObserveMode::Feed;
            }
            if foreign {
                entry.variant = SchemaVariant::Foreign;
            }
            let bucket = Bucket::from_entry(&entry, &paths.buckets_dir);
            list.add(bucket.clone(), replace)?;

            config.bucket = list.to_entries();
            config.save(&paths.config_file)?;
            println!("Added bucket {}", bucket.name);

            let downloader = HttpDownloader::new()?;
            match sync_bucket(&bucket, &paths, &downloader, &SystemRunner) {
                Ok(state) => println!(
                    "Synced {} at {}",
                    bucket.name,
                    state.revision.as_deref().unwrap_or("unknown revision")
                ),
                Err(e) => eprintln!("warning: {} added but not synced: {}", bucket.name, e),
            }
            Ok(ExitCode::SUCCESS)
        }
        BucketCommands::Remove { name } => {
            paths.ensure()?;
            let _lock = InstanceLock::acquire(&paths.lock_file)?;
            let mut config = Config::load(&paths.config_file)?;
            let mut list = BucketList::from_entries(&config.bucket, &paths.buckets_dir)?;
            let removed = list.remove(&name)?;

            config.bucket = list.to_entries();
            config.save(&paths.config_file)?;
            if removed.dir.exists() {
                fs::remove_dir_all(&removed.dir)
                    .with_context(|| format!("Failed to remove {}", removed.dir.display()))?;
            }
            println!("Removed bucket {}", removed.name);
            Ok(ExitCode::SUCCESS)
        }
        BucketCommands::List => {
            let ctx = Context::load(root)?;
            if ctx.buckets.is_empty() {
                println!("No buckets configured.");
                return Ok(ExitCode::SUCCESS);
            }
            println!("Buckets:");
            for bucket in ctx.buckets.prioritized() {
                let synced = bucket.sync_state.last_sync.as_deref().unwrap_or("never synced");
                println!(
                    "  {} (weight {}, {}, {}) {}",
                    bucket.name,
                    bucket.weight,
                    bucket.mode.as_str(),
                    bucket.variant.as_str(),
                    bucket.url
                );
                println!("      last sync: {}", synced);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
