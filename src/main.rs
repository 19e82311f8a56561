// src/main.rs

use anyhow::Result;
use clap::{Parser, Subcommand};
use pallet::db::PackageDb;
use pallet::installer::{Installer, System};
use pallet::package::{Package, PackageId};
use pallet::repository::{self, HttpRepository, Repository};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "pallet")]
#[command(author, version, about = "Artifact-based package manager with boolean dependency solving", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the Pallet database
    Init {
        /// Database path (default: /var/lib/pallet/pallet.db)
        #[arg(short, long, default_value = "/var/lib/pallet/pallet.db")]
        db_path: String,
    },
    /// Manage package repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
        /// Database path (default: /var/lib/pallet/pallet.db)
        #[arg(short, long, default_value = "/var/lib/pallet/pallet.db")]
        db_path: String,
    },
    /// Install packages and their dependencies
    Install {
        /// Packages to install, as category/name@version
        #[arg(required = true)]
        packages: Vec<String>,
        /// Filesystem root to install into
        #[arg(short, long, default_value = "/")]
        target: PathBuf,
        /// Database path (default: /var/lib/pallet/pallet.db)
        #[arg(short, long, default_value = "/var/lib/pallet/pallet.db")]
        db_path: String,
        /// Repository cache directory
        #[arg(long, default_value = "/var/cache/pallet")]
        cache_dir: PathBuf,
        /// Worker threads for downloads and solving
        #[arg(short = 'j', long, default_value_t = 4)]
        concurrency: usize,
    },
    /// Remove a package and any orphaned dependencies
    Uninstall {
        /// Package to remove, as category/name@version
        package: String,
        /// Filesystem root to remove from
        #[arg(short, long, default_value = "/")]
        target: PathBuf,
        /// Database path (default: /var/lib/pallet/pallet.db)
        #[arg(short, long, default_value = "/var/lib/pallet/pallet.db")]
        db_path: String,
    },
    /// List installed packages
    List {
        /// Database path (default: /var/lib/pallet/pallet.db)
        #[arg(short, long, default_value = "/var/lib/pallet/pallet.db")]
        db_path: String,
    },
}

#[derive(Subcommand)]
enum RepoCommands {
    /// Add a repository
    Add {
        name: String,
        url: String,
        /// Higher priority repositories win on conflicting definitions
        #[arg(short, long, default_value_t = 0)]
        priority: i32,
        /// Add the repository in a disabled state
        #[arg(long)]
        disabled: bool,
    },
    /// Remove a repository
    Remove { name: String },
    /// Enable a repository
    Enable { name: String },
    /// Disable a repository
    Disable { name: String },
    /// List configured repositories
    List,
}

/// Parse a `category/name@version` spec into a package identity.
/// The category segment may be omitted.
fn parse_package_spec(spec: &str) -> Result<PackageId> {
    let (path, version) = spec
        .rsplit_once('@')
        .ok_or_else(|| anyhow::anyhow!("Invalid package spec '{}': missing @version", spec))?;
    let (category, name) = path.rsplit_once('/').unwrap_or(("", path));
    if name.is_empty() || version.is_empty() {
        return Err(anyhow::anyhow!("Invalid package spec '{}'", spec));
    }
    Ok(PackageId::new(name, category, version))
}

/// Build HTTP repositories from every enabled database row
fn enabled_repositories(db: &PackageDb, cache_dir: &PathBuf) -> Result<Vec<Box<dyn Repository>>> {
    let records = db.list_enabled_repositories()?;
    if records.is_empty() {
        return Err(anyhow::anyhow!("No enabled repositories configured"));
    }
    Ok(records
        .into_iter()
        .map(|r| {
            Box::new(HttpRepository::new(&r.name, &r.url, r.priority, cache_dir))
                as Box<dyn Repository>
        })
        .collect())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_path } => {
            info!("Initializing Pallet database at: {}", db_path);
            pallet::db::init(&db_path)?;
            println!("Database initialized successfully at: {}", db_path);
            Ok(())
        }
        Commands::Repo { command, db_path } => {
            let db = PackageDb::open(&db_path)?;
            match command {
                RepoCommands::Add {
                    name,
                    url,
                    priority,
                    disabled,
                } => {
                    let repo = repository::add_repository(&db, name, url, !disabled, priority)?;
                    println!("Added repository '{}' ({})", repo.name, repo.url);
                }
                RepoCommands::Remove { name } => {
                    repository::remove_repository(&db, &name)?;
                    println!("Removed repository '{}'", name);
                }
                RepoCommands::Enable { name } => {
                    repository::set_repository_enabled(&db, &name, true)?;
                    println!("Enabled repository '{}'", name);
                }
                RepoCommands::Disable { name } => {
                    repository::set_repository_enabled(&db, &name, false)?;
                    println!("Disabled repository '{}'", name);
                }
                RepoCommands::List => {
                    for repo in db.list_repositories()? {
                        println!(
                            "{}\t{}\tpriority={}\t{}",
                            repo.name,
                            repo.url,
                            repo.priority,
                            if repo.enabled { "enabled" } else { "disabled" }
                        );
                    }
                }
            }
            Ok(())
        }
        Commands::Install {
            packages,
            target,
            db_path,
            cache_dir,
            concurrency,
        } => {
            let wanted: Vec<Package> = packages
                .iter()
                .map(|s| parse_package_spec(s).map(Package::reference))
                .collect::<Result<_>>()?;

            let db = PackageDb::open(&db_path)?;
            let repos = enabled_repositories(&db, &cache_dir)?;
            let system = System { target, db };

            let installer = Installer::new(repos, concurrency);
            installer.install(&system, &wanted)?;
            println!("Installed {} package(s)", wanted.len());

            for repo in system.db.list_enabled_repositories()? {
                repository::mark_synced(&system.db, &repo.name)?;
            }
            Ok(())
        }
        Commands::Uninstall {
            package,
            target,
            db_path,
        } => {
            let id = parse_package_spec(&package)?;
            let db = PackageDb::open(&db_path)?;
            let system = System { target, db };

            // No repositories needed for removal
            let installer = Installer::new(vec![], 1);
            installer.uninstall(&system, &id)?;
            println!("Removed {}", id.fingerprint());
            Ok(())
        }
        Commands::List { db_path } => {
            let db = PackageDb::open(&db_path)?;
            for pkg in db.installed()? {
                println!("{}", pkg.fingerprint());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_package_spec() {
        let id = parse_package_spec("net/curl@8.4").unwrap();
        assert_eq!(id.fingerprint(), "net/curl@8.4");

        let id = parse_package_spec("standalone@1.0").unwrap();
        assert_eq!(id.category, "");
        assert_eq!(id.name, "standalone");

        assert!(parse_package_spec("no-version").is_err());
        assert!(parse_package_spec("net/curl@").is_err());
    }
}
