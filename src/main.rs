use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{builder::styling, Parser, Subcommand};
use log::LevelFilter;

use stratus::commands::{clusters, images, print_error};
use stratus::config::{ConfigPaths, StratusConfig};
use stratus::Engine;

const STYLES: styling::Styles = styling::Styles::styled()
    .header(styling::AnsiColor::Green.on_default().bold())
    .usage(styling::AnsiColor::Green.on_default().bold())
    .literal(styling::AnsiColor::Cyan.on_default().bold())
    .placeholder(styling::AnsiColor::Cyan.on_default());

#[derive(Parser)]
#[command(name = "stratus")]
#[command(about = "Provision and operate HPC clusters on a cloud provisioning backend")]
#[command(version)]
#[command(styles = STYLES)]
struct Cli {
    /// Output format (table or json)
    #[arg(long, global = true, env = "STRATUS_FORMAT")]
    format: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "STRATUS_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a cluster from a specification file
    Create {
        /// Path to the cluster spec (YAML)
        #[arg(short, long)]
        spec: PathBuf,
        /// Block until the operation completes
        #[arg(long)]
        wait: bool,
    },
    /// Update an existing cluster from a specification file
    Update {
        /// Path to the cluster spec (YAML)
        #[arg(short, long)]
        spec: PathBuf,
        /// Block until the operation completes
        #[arg(long)]
        wait: bool,
    },
    /// Delete a cluster and its stack
    Delete {
        name: String,
        /// Block until the operation completes
        #[arg(long)]
        wait: bool,
    },
    /// Start the compute fleet (head node is unaffected)
    Start { name: String },
    /// Stop the compute fleet (head node keeps running)
    Stop { name: String },
    /// Show the state of a cluster
    Status { name: String },
    /// List all clusters known to the backend
    List,
    /// List the instances of a cluster, grouped by node role
    Instances { name: String },
    /// Open an SSH session to the cluster head node
    Ssh {
        name: String,
        /// Remote user name
        #[arg(short, long)]
        user: Option<String>,
        /// Extra arguments passed through to ssh
        #[arg(trailing_var_arg = true)]
        ssh_args: Vec<String>,
    },
    /// Write a default configuration file
    Configure,
    /// Build a custom machine image
    Createami {
        /// Name of the image build
        name: String,
        /// Source image to build from
        #[arg(long)]
        source_image: String,
        /// Instance type of the transient builder
        #[arg(long, default_value = "c5.xlarge")]
        instance_type: String,
    },
}

fn init_logging(level: &str) {
    let level = level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

fn handle_configure() -> stratus::errors::Result<()> {
    let paths = ConfigPaths::new();
    let Some(dir) = paths.user_config_dir() else {
        return Err(stratus::StratusError::Internal(
            "could not determine the user configuration directory".to_string(),
        ));
    };
    let path = dir.join("config.toml");
    if path.exists() {
        println!("Configuration already exists at {}", path.display());
        return Ok(());
    }
    fs::create_dir_all(&dir).map_err(|e| {
        stratus::StratusError::Internal(format!("failed to create {}: {}", dir.display(), e))
    })?;
    fs::write(&path, StratusConfig::default_file_contents()).map_err(|e| {
        stratus::StratusError::Internal(format!("failed to write {}: {}", path.display(), e))
    })?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn run(cli: Cli, config: &StratusConfig, format: &str) -> stratus::errors::Result<()> {
    if matches!(cli.command, Commands::Configure) {
        return handle_configure();
    }

    let engine = Engine::from_config(config)?;
    match cli.command {
        Commands::Create { spec, wait } => clusters::handle_create(&engine, &spec, wait),
        Commands::Update { spec, wait } => clusters::handle_update(&engine, &spec, wait, format),
        Commands::Delete { name, wait } => clusters::handle_delete(&engine, &name, wait),
        Commands::Start { name } => clusters::handle_start(&engine, &name),
        Commands::Stop { name } => clusters::handle_stop(&engine, &name),
        Commands::Status { name } => clusters::handle_status(&engine, &name, format),
        Commands::List => clusters::handle_list(&engine, format),
        Commands::Instances { name } => clusters::handle_instances(&engine, &name, format),
        Commands::Ssh {
            name,
            user,
            ssh_args,
        } => clusters::handle_ssh(&engine, &name, user.as_deref(), &ssh_args),
        Commands::Createami {
            name,
            source_image,
            instance_type,
        } => images::handle_createami(&engine, &name, &source_image, &instance_type, format),
        Commands::Configure => unreachable!("handled above"),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match StratusConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.client.log_level.clone());
    init_logging(&log_level);

    let format = cli
        .format
        .clone()
        .unwrap_or_else(|| config.client.format.clone());

    match run(cli, &config, &format) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&e, &format);
            ExitCode::FAILURE
        }
    }
}
