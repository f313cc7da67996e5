use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use cloverup_backup::BackupEngine;
use cloverup_bootloader_core::{detect, validate_clover_package};
use cloverup_content::prepare_source;
use cloverup_core::{EspError, Settings, UpdateTarget};
use cloverup_host_macos::{check_environment, Diskutil, MountCommand, PartitionCatalog};
use cloverup_report::{install, RunSummary, SessionLog};
use cloverup_workflow_engine::{run_menu, EspPipeline, Prompt, Selection, UpdateOrchestrator};
use log::{error, info, LevelFilter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "cloverup", version, about = "Update Clover on an EFI System Partition")]
struct Cli {
    /// JSON settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory for the session log and run summary
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[arg(long, global = true)]
    no_color: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Select, validate and back up an ESP, then open the update menu
    Run(RunArgs),
    /// Print the candidate EFI partitions
    List,
    /// Print which bootloader occupies a mounted ESP
    Detect { mount: PathBuf },
}

#[derive(Args)]
struct RunArgs {
    /// Clover distribution: extracted directory or local .zip
    #[arg(long)]
    source: PathBuf,
    /// Package holding the auxiliary driver (directory or .zip)
    #[arg(long)]
    aux_drivers: PathBuf,
    /// Backups go to <dir>/EFI_BACKUPS
    #[arg(long)]
    backup_base: Option<PathBuf>,
    /// Mount polls before giving up; 0 waits forever
    #[arg(long)]
    mount_attempts: Option<u32>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let Some(command) = cli.command.as_ref() else {
        let _ = Cli::command().print_help();
        return ExitCode::SUCCESS;
    };

    let mut settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("cloverup: {:#}", err);
            return ExitCode::from(2);
        }
    };
    if let Command::Run(args) = command {
        if let Some(base) = &args.backup_base {
            settings.backup_base_dir = base.clone();
        }
        if let Some(attempts) = args.mount_attempts {
            settings.mount_max_attempts = attempts;
        }
    }

    let session = match start_logging(&cli, &settings) {
        Ok(session) => Some(session),
        Err(err) => {
            eprintln!("cloverup: logging disabled: {:#}", err);
            None
        }
    };

    let code = match command {
        Command::Run(args) => run(args, &settings, session.map(SessionLog::path)),
        Command::List => finish(list(&settings)),
        Command::Detect { mount } => {
            println!("{}", detect(mount));
            0
        }
    };

    if let Some(session) = session {
        session.close();
    }
    ExitCode::from(code)
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(dir) = &cli.log_dir {
        settings.log_dir = dir.clone();
    }
    Ok(settings)
}

fn start_logging(cli: &Cli, settings: &Settings) -> Result<&'static SessionLog> {
    let level = match std::env::var("CLOVERUP_LOG") {
        Ok(value) => value
            .parse::<LevelFilter>()
            .with_context(|| format!("invalid CLOVERUP_LOG value '{}'", value))?,
        Err(_) if cli.verbose => LevelFilter::Debug,
        Err(_) => LevelFilter::Info,
    };
    let session = SessionLog::create(&settings.log_dir, level, !cli.no_color)?;
    install(session)
}

fn run(args: &RunArgs, settings: &Settings, log_path: Option<&Path>) -> u8 {
    let mut summary = RunSummary::start();
    let result = run_pipeline(args, settings, &mut summary);
    let error = result.as_ref().err().map(|err| format!("{:#}", err));
    let code = finish(result);
    summary.finish(code, error);

    if let Some(log_path) = log_path {
        let path = log_path.with_extension("json");
        match summary.write(&path) {
            Ok(()) => info!("event=run_summary_saved path={}", path.display()),
            Err(err) => error!("event=run_summary_failed cause={:#}", err),
        }
    }
    code
}

fn run_pipeline(args: &RunArgs, settings: &Settings, summary: &mut RunSummary) -> Result<()> {
    check_environment(settings)?;

    let source = prepare_source(&args.source)?;
    let package = validate_clover_package(&source.root)?;
    let aux = prepare_source(&args.aux_drivers)?;
    info!(
        "event=source_ready clover={} aux={}",
        package.root.display(),
        aux.root.display()
    );

    let disks = Diskutil::new(&settings.diskutil_path);
    let mounts = MountCommand::new(&settings.mount_path);
    let pipeline = EspPipeline::new(&disks, &mounts, settings);
    let mut prompt = Prompt::new(std::io::stdin().lock(), std::io::stdout());

    let esp = match pipeline.prepare(&mut prompt, &BackupEngine::new(settings))? {
        Selection::Ready(esp) => esp,
        Selection::Exit => return Ok(()),
    };
    summary.partition = Some(esp.partition.id.clone());
    summary.mount_point = Some(esp.mount_point.clone());
    summary.backup_dir = Some(esp.snapshot.destination.clone());

    let orchestrator = UpdateOrchestrator::new(
        UpdateTarget {
            source_root: package.root.clone(),
            aux_driver_root: aux.root.clone(),
            efi_root: esp.mount_point.clone(),
        },
        &settings.aux_driver_path,
    );
    run_menu(pipeline.resolver(), &orchestrator, &mut prompt, summary);

    let failed = summary.operations.iter().filter(|op| !op.succeeded).count();
    info!(
        "event=session_complete operations={} failed={}",
        summary.operations.len(),
        failed
    );
    Ok(())
}

fn list(settings: &Settings) -> Result<()> {
    check_environment(settings)?;
    let disks = Diskutil::new(&settings.diskutil_path);
    let candidates = PartitionCatalog::new(&disks, settings.esp_marker.as_str()).list_candidates()?;
    for (idx, partition) in candidates.iter().enumerate() {
        println!("{}. {}", idx + 1, partition.id);
    }
    Ok(())
}

/// Outer boundary: typed gate errors keep their exit code, anything else is
/// an unexpected error.
fn finish(result: Result<()>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(err) => match err.downcast_ref::<EspError>() {
            Some(esp) => {
                error!("event={} error={}", esp.key(), esp);
                esp.exit_code()
            }
            None => {
                error!("event=unexpected_error error={:#}", err);
                1
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_parses_to_help() {
        let cli = Cli::try_parse_from(["cloverup"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn run_requires_both_packages() {
        assert!(Cli::try_parse_from(["cloverup", "run", "--source", "Clover.zip"]).is_err());
        let cli = Cli::try_parse_from([
            "cloverup",
            "run",
            "--source",
            "Clover.zip",
            "--aux-drivers",
            "OcBinaryData",
            "--mount-attempts",
            "0",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Run(args)) => {
                assert_eq!(args.source, PathBuf::from("Clover.zip"));
                assert_eq!(args.mount_attempts, Some(0));
            }
            _ => panic!("expected run"),
        }
    }
}
