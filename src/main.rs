//! Gangway - container device manager
//!
//! Validates, persists and translates container devices, and applies
//! device changes to running containers.

mod cli;
mod container;
mod delta;
mod device;
mod error;
mod helper;
mod manifest;
mod mount;
mod network;
mod store;
#[cfg(test)]
mod testutil;

use cli::{Cli, Commands};
use container::{Container, RuntimeConfig};
use delta::DeltaApplier;
use device::types::TYPE_KEY;
use device::{translate, validate_device_set, ConfigLine};
use error::{Error, Result};
use helper::Reexec;
use manifest::{ContainerDef, GangwayConfig};
use network::IpCommand;
use store::OwnerKind;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    // Helper subcommands report through their exit status only
    if let Some(result) = run_helper(&cli.command) {
        if let Err(e) = &result {
            eprintln!("{}", e);
        }
        std::process::exit(helper::exit_code(&result));
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "gangway=debug" } else { "gangway=info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn run_helper(command: &Commands) -> Option<Result<()>> {
    match command {
        Commands::Forkmount {
            pid,
            source,
            target,
        } => Some(helper::fork_mount(*pid, source, target)),
        Commands::Forkumount { pid, target } => Some(helper::fork_umount(*pid, target)),
        Commands::Forknetdel { pid, interface } => Some(helper::fork_netdel(*pid, interface)),
        _ => None,
    }
}

fn run(cli: Cli) -> Result<()> {
    // Commands that don't require config
    if let Commands::Completion { shell } = cli.command {
        Cli::generate_completion(shell);
        return Ok(());
    }

    let config = manifest::load(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let path = config.config.database_path();
            let conn = store::open(&path)?;
            store::init(&conn)?;
            println!("Initialized device database at {}", path.display());
        }

        Commands::Check => check(&config)?,

        Commands::Render { container, output } => {
            let def = config.get_container(&container)?;
            let devices = config.expanded_devices(def)?;

            let mut lines: Vec<ConfigLine> = Vec::new();
            for (name, device) in &devices {
                lines.extend(
                    translate(device).map_err(|e| e.for_device("translating", name, &def.name))?,
                );
            }

            match output {
                Some(path) => {
                    RuntimeConfig::new(&path).write(&lines)?;
                    println!("Wrote {} lines to {}", lines.len(), path.display());
                }
                None => {
                    for line in &lines {
                        println!("{}", line);
                    }
                }
            }
        }

        Commands::Profiles => {
            let mut conn = open_database(&config)?;
            for profile in &config.profiles {
                let devices = profile.device_set()?;
                let id = store::ensure_owner(&conn, OwnerKind::Profile, &profile.name)?;
                let tx = conn.transaction()?;
                store::replace_devices(&tx, OwnerKind::Profile, id, &devices)?;
                tx.commit()?;
                println!("Stored profile {} ({} devices)", profile.name, devices.len());
            }
        }

        Commands::Apply { container, pid } => {
            let def = config.get_container(&container)?;
            let next = def.device_set()?;

            let mut conn = open_database(&config)?;
            let id = store::ensure_owner(&conn, OwnerKind::Container, &def.name)?;
            let handle = container_handle(&config, def, id).with_pid(pid);

            let helper = match &config.config.helper {
                Some(path) => Reexec::new(path),
                None => Reexec::current()?,
            };
            let links = IpCommand;
            let applier = DeltaApplier::new(&links, &helper, config.config.shmounts_dir());

            let report = delta::update_devices(&mut conn, &handle, &next, &applier)?;

            println!("Stored {} devices for {}", next.len(), def.name);
            println!(
                "Runtime config: {} ({} entries)",
                handle.config().path().display(),
                handle.config().items()?.len()
            );
            for name in &report.detached {
                println!("  - {}", name);
            }
            for name in &report.attached {
                println!("  + {}", name);
            }
            for warning in &report.warnings {
                if let Some(e) = warning.error() {
                    println!("  warning: {} failed: {}", warning.operation(), e);
                }
            }
            if let Some(notice) = report.stop_notice() {
                println!("  {}", notice);
            }
        }

        Commands::Devices { container, json } => {
            let mut conn = open_database(&config)?;
            let id = store::find_owner(&conn, OwnerKind::Container, &container)?
                .ok_or_else(|| Error::ContainerNotFound(container.clone()))?;
            let tx = conn.transaction()?;
            let devices = store::load_devices(&tx, OwnerKind::Container, id)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&devices.to_maps())?);
            } else if devices.is_empty() {
                println!("No devices stored for {}", container);
            } else {
                println!("{:<16} {:<12} CONFIG", "NAME", "TYPE");
                for (name, device) in &devices {
                    let config: Vec<String> = device
                        .to_map()
                        .into_iter()
                        .filter(|(key, _)| key != TYPE_KEY)
                        .map(|(key, value)| format!("{}={}", key, value))
                        .collect();
                    println!("{:<16} {:<12} {}", name, device.device_type(), config.join(" "));
                }
            }
        }

        Commands::Completion { .. }
        | Commands::Forkmount { .. }
        | Commands::Forkumount { .. }
        | Commands::Forknetdel { .. } => {}
    }

    Ok(())
}

/// Validate every container's devices, including the privilege guard
fn check(config: &GangwayConfig) -> Result<()> {
    for def in &config.containers {
        let devices = config.expanded_devices(def)?;
        let handle = container_handle(config, def, 0);
        validate_device_set(&handle, &devices)?;
        tracing::debug!(container = %def.name, devices = devices.len(), "container checked");
    }

    println!(
        "Configuration OK: {} profiles, {} containers",
        config.profiles.len(),
        config.containers.len()
    );
    Ok(())
}

fn open_database(config: &GangwayConfig) -> Result<rusqlite::Connection> {
    let path = config.config.database_path();
    let conn = store::open(&path)?;
    store::init(&conn)?;
    Ok(conn)
}

fn container_handle(config: &GangwayConfig, def: &ContainerDef, id: i64) -> Container {
    let runtime = RuntimeConfig::new(def.effective_config_path(&config.config));
    Container::new(id, def.name.clone(), runtime).privileged(def.privileged)
}
