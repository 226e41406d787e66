use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod context;
mod logging;
mod prompter;

use commands::{LocationArg, ServiceTypeArg};
use context::AppContext;
use prompter::FlagAnswers;
use ula_application::FilesystemCredentials;

#[derive(Parser)]
#[command(name = "ula")]
#[command(about = "ULA - Linux session provisioning", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ~/.config/ula/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show debug logs on the console
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage filesystems
    Filesystem {
        #[command(subcommand)]
        action: FilesystemAction,
    },
    /// Manage sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Download, verify and extract what a session needs
    Start {
        /// Session name
        session: String,
        #[command(flatten)]
        confirm: ConfirmArgs,
    },
    /// Provision the dedicated session of an application
    App {
        /// Application name; the script is read from <files>/apps/<name>/<name>.sh
        name: String,
        /// Distribution the app runs on
        #[arg(long)]
        distribution: String,
        #[arg(long)]
        cli: bool,
        #[arg(long)]
        gui: bool,
        #[arg(long, value_enum)]
        location: Option<LocationArg>,
        #[arg(long, value_enum)]
        service_type: Option<ServiceTypeArg>,
        #[command(flatten)]
        credentials: CredentialArgs,
        #[command(flatten)]
        confirm: ConfirmArgs,
    },
}

#[derive(Subcommand)]
enum FilesystemAction {
    /// Register a new filesystem
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        distribution: String,
        /// Defaults to the configured architecture
        #[arg(long)]
        arch: Option<String>,
        #[command(flatten)]
        credentials: CredentialArgs,
    },
    /// List filesystems
    List,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Register a new session on an existing filesystem
    Add {
        #[arg(long)]
        name: String,
        /// Filesystem name
        #[arg(long)]
        filesystem: String,
        #[arg(long, value_enum)]
        service_type: Option<ServiceTypeArg>,
    },
    /// List sessions
    List,
}

#[derive(Args, Default)]
struct ConfirmArgs {
    /// Allow downloading the root filesystem archive
    #[arg(long)]
    accept_large_download: bool,
    /// Continue when free storage is low
    #[arg(long)]
    accept_low_storage: bool,
}

#[derive(Args, Default)]
struct CredentialArgs {
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    vnc_password: Option<String>,
}

impl CredentialArgs {
    /// All three values, or nothing.
    fn complete(&self) -> Option<FilesystemCredentials> {
        Some(FilesystemCredentials {
            username: self.username.clone()?,
            password: self.password.clone()?,
            vnc_password: self.vnc_password.clone()?,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = AppContext::load(cli.config.as_deref())?;
    let _logging = logging::init_logging(&ctx.paths.logs_dir(), cli.verbose)?;

    match cli.command {
        Commands::Filesystem { action } => match action {
            FilesystemAction::Add {
                name,
                distribution,
                arch,
                credentials,
            } => {
                commands::filesystem::add(
                    &ctx,
                    commands::filesystem::NewFilesystem {
                        name,
                        distribution,
                        architecture: arch,
                        username: credentials.username,
                        password: credentials.password,
                        vnc_password: credentials.vnc_password,
                    },
                )
                .await?
            }
            FilesystemAction::List => commands::filesystem::list(&ctx).await?,
        },
        Commands::Session { action } => match action {
            SessionAction::Add {
                name,
                filesystem,
                service_type,
            } => commands::session::add(&ctx, name, &filesystem, service_type).await?,
            SessionAction::List => commands::session::list(&ctx).await?,
        },
        Commands::Start { session, confirm } => {
            let answers = FlagAnswers {
                accept_large_download: confirm.accept_large_download,
                accept_low_storage: confirm.accept_low_storage,
                ..FlagAnswers::default()
            };
            commands::start::run(&ctx, &session, answers).await?
        }
        Commands::App {
            name,
            distribution,
            cli: supports_cli,
            gui: supports_gui,
            location,
            service_type,
            credentials,
            confirm,
        } => {
            let answers = FlagAnswers {
                service_location: location.map(Into::into),
                service_type: service_type.map(Into::into),
                credentials: credentials.complete(),
                accept_large_download: confirm.accept_large_download,
                accept_low_storage: confirm.accept_low_storage,
            };
            let selection = commands::app::AppSelection {
                name,
                distribution,
                supports_cli,
                supports_gui,
            };
            commands::app::run(&ctx, selection, answers).await?
        }
    }

    Ok(())
}
