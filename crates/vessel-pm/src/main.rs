//! Vessel Package Manager (vessel)

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use vessel_pm::{classpath_string, find_container_root, Container, Dependencies};

#[derive(Parser)]
#[command(name = "vessel")]
#[command(about = "Container-scoped dependency installer", long_about = None)]
#[command(version)]
struct Cli {
    /// Container root (defaults to the nearest enclosing container)
    #[arg(long, global = true)]
    container: Option<PathBuf>,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new container
    Init,
    /// Declare an explicit dependency
    Add {
        group: String,
        name: String,
        version: String,
        /// Win version conflicts against transitive requests
        #[arg(long)]
        force: bool,
        /// Do not pull in the module's own dependencies
        #[arg(long)]
        intransitive: bool,
    },
    /// Remove an explicit dependency
    Remove { group: String, name: String },
    /// Change the version of an explicit dependency
    Revise {
        group: String,
        name: String,
        version: String,
    },
    /// Exclude a module from resolution
    Exclude { group: String, name: String },
    /// Pin the version of a transitive module
    Override {
        group: String,
        name: String,
        version: String,
    },
    /// Resolve and install all dependencies
    Install {
        /// Rewrite artifacts even when unchanged
        #[arg(long)]
        overwrite: bool,
        /// Skip post-write verification
        #[arg(long)]
        no_verify: bool,
    },
    /// Run uninstallers and delete every managed file
    Uninstall,
    /// Delete managed files that are no longer provided
    Prune,
    /// Pin every resolved version
    Freeze,
    /// Drop all declarations and managed records
    Reset,
    /// List licenses of installed dependencies
    Licenses,
    /// Print the library search path
    Classpath {
        /// Include system locations
        #[arg(long)]
        system: bool,
    },
    /// List packages found on the library search path
    Packages,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Commands::Init = cli.command {
        let root = match cli.container {
            Some(root) => root,
            None => std::env::current_dir().context("Could not read current directory")?,
        };
        let container = Container::create(&root)?;
        println!("Initialized container at {}", container.root().display());
        return Ok(());
    }

    let root = container_root(cli.container.as_deref())?;
    let container = Container::open(&root)?;
    let verify_by_default = container.config().verify;
    let mut deps = Dependencies::open(container)?;

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Add {
            group,
            name,
            version,
            force,
            intransitive,
        } => {
            if !deps.add(&group, &name, &version, force, !intransitive)? {
                tracing::info!(group = %group, name = %name, "dependency already declared");
            }
        }
        Commands::Remove { group, name } => {
            if !deps.remove(&group, &name)? {
                bail!("{}:{} is not an explicit dependency", group, name);
            }
        }
        Commands::Revise {
            group,
            name,
            version,
        } => {
            if !deps.revise(&group, &name, &version)? {
                tracing::info!(group = %group, name = %name, "version unchanged");
            }
        }
        Commands::Exclude { group, name } => {
            deps.exclude(&group, &name)?;
        }
        Commands::Override {
            group,
            name,
            version,
        } => {
            if !deps.override_version(&group, &name, &version)? {
                bail!("{}:{} already has an override", group, name);
            }
        }
        Commands::Install {
            overwrite,
            no_verify,
        } => {
            deps.install(overwrite, verify_by_default && !no_verify)?;
        }
        Commands::Uninstall => {
            let summary = deps.uninstall()?;
            println!("Removed {} managed files", summary.deleted.len());
        }
        Commands::Prune => {
            let summary = deps.prune()?;
            println!("Removed {} managed files", summary.deleted.len());
        }
        Commands::Freeze => {
            let summary = deps.freeze()?;
            for module in summary.revised.iter().chain(&summary.overridden) {
                println!("Pinned {}", module);
            }
        }
        Commands::Reset => deps.reset()?,
        Commands::Licenses => {
            for (license, modules) in deps.licenses()? {
                println!("{} ({})", license.name, license.url);
                for module in modules {
                    println!("  {}", module);
                }
            }
        }
        Commands::Classpath { system } => {
            let entries = deps.classpath(system)?;
            let joined = classpath_string(&entries).context("Library path entry contains a separator")?;
            println!("{}", joined.to_string_lossy());
        }
        Commands::Packages => {
            for package in deps.packages()? {
                println!("{}", package.archive().display());
            }
        }
    }

    Ok(())
}

fn container_root(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(root) = explicit {
        return Ok(root.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Could not read current directory")?;
    find_container_root(&cwd).context("Not inside a container. Run `vessel init` to create one.")
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
