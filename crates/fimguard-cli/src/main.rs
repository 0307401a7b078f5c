mod report;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use fimguard_core::config::{self, GuardConfig};
use fimguard_core::error::{EXIT_INVALID_ARGUMENT, EXIT_IO_ERROR};
use fimguard_core::{ActionController, ActionFlags, FileType, GuardError, LocalProbe};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Exit code of path-check for a path no rule monitors
const EXIT_NOT_MONITORED: i32 = 1;
/// Exit code of path-check for a path the limit excludes
const EXIT_OUTSIDE_LIMIT: i32 = 2;

#[derive(Parser, Debug)]
#[command(author, version, about = "fimguard file integrity monitor", long_about = None)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Only consider paths matching this regular expression
    #[arg(short, long, global = true)]
    limit: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the filesystem and write the output database
    Init,
    /// Scan the filesystem without reading content or writing anything
    DryInit,
    /// Compare the input database with the filesystem
    Check,
    /// Check, then write the current state as the output database
    Update,
    /// Compare the input database with database_new
    Compare,
    /// Validate the configuration and exit
    ConfigCheck,
    /// Show which rule decides a path, given as <type>:<path> (e.g. f:/etc/passwd)
    PathCheck { target: String },
    /// List attributes and predefined groups
    Info,
}

impl Commands {
    fn flags(&self) -> Option<ActionFlags> {
        match self {
            Commands::Init => Some(ActionFlags::INIT),
            Commands::DryInit => Some(ActionFlags::INIT | ActionFlags::DRY_RUN),
            Commands::Check => Some(ActionFlags::COMPARE),
            Commands::Update => Some(ActionFlags::INIT | ActionFlags::COMPARE),
            Commands::Compare => Some(ActionFlags::DIFF),
            Commands::ConfigCheck => Some(ActionFlags::DRY_RUN),
            Commands::PathCheck { .. } | Commands::Info => None,
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn config_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(path) = &cli.config {
        return Ok(path.clone());
    }
    let default = config::default_config_path().filter(|path| path.exists());
    default.ok_or_else(|| {
        anyhow!(GuardError::config(
            "--config",
            "no configuration file given and no default configuration found"
        ))
    })
}

fn parse_target(target: &str) -> Result<(FileType, String)> {
    let invalid = || {
        GuardError::InvalidAction(format!(
            "'{}' is not of the form <type>:<path>, e.g. f:/etc/passwd",
            target
        ))
    };
    let (kind, path) = target.split_once(':').ok_or_else(invalid)?;
    let mut chars = kind.chars();
    let file_type = match (chars.next().and_then(FileType::from_char), chars.next()) {
        (Some(t), None) => t,
        _ => return Err(invalid().into()),
    };
    if !path.starts_with('/') {
        return Err(invalid().into());
    }
    Ok((file_type, path.to_string()))
}

fn run(cli: Cli) -> Result<i32> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if let Commands::Info = cli.command {
        report::write_info(&mut out, cli.json)?;
        return Ok(0);
    }

    let path = config_path(&cli)?;
    let ctx = GuardConfig::load(&path)
        .and_then(|config| config.compile(cli.limit.as_deref()))
        .with_context(|| format!("configuration {}", path.display()))?;
    debug!(config = %path.display(), "run context ready");

    if let Commands::PathCheck { target } = &cli.command {
        let (file_type, path) = parse_target(target)?;
        if let (Some(limit), Some(source)) = (&ctx.limit, &ctx.limit_source) {
            if !limit.is_match(&path) {
                report::write_outside_limit(&mut out, &path, file_type, source, cli.json)?;
                return Ok(EXIT_OUTSIDE_LIMIT);
            }
        }
        let decision = ctx.rules.match_path(&path, file_type);
        let monitored = decision.as_ref().map_or(false, |m| m.is_monitored());
        report::write_path_check(&mut out, &path, file_type, decision.as_ref(), cli.json)?;
        return Ok(if monitored { 0 } else { EXIT_NOT_MONITORED });
    }

    let flags = cli
        .command
        .flags()
        .ok_or_else(|| anyhow!(GuardError::InvalidAction(format!("{:?}", cli.command))))?;
    let probe = LocalProbe::new();
    let outcome = ActionController::new(&ctx, &probe).run(flags)?;
    report::write_outcome(&mut out, &outcome, &ctx, cli.json)?;
    Ok(outcome.exit_code())
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<GuardError>())
        .map(GuardError::exit_code)
        .unwrap_or(EXIT_IO_ERROR)
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(EXIT_INVALID_ARGUMENT as u8)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_logging(&cli.log_level);

    match run(cli) {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("fimguard: {:#}", err);
            ExitCode::from(exit_code_for(&err) as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fimguard_core::error::EXIT_CONFIG_ERROR;

    #[test]
    fn targets_need_type_and_absolute_path() {
        assert_eq!(
            parse_target("f:/etc/passwd").unwrap(),
            (FileType::Regular, "/etc/passwd".to_string())
        );
        assert_eq!(parse_target("d:/").unwrap().0, FileType::Directory);
        assert!(parse_target("/etc/passwd").is_err());
        assert!(parse_target("x:/etc").is_err());
        assert!(parse_target("f:etc").is_err());
    }

    #[test]
    fn exit_code_found_through_context() {
        let err = anyhow::Error::new(GuardError::config("rules[0]", "bad"))
            .context("configuration /etc/fimguard.json");
        assert_eq!(exit_code_for(&err), EXIT_CONFIG_ERROR);
        assert_eq!(exit_code_for(&anyhow!("other")), EXIT_IO_ERROR);
    }
}
