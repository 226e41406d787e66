pub mod app;
pub mod filesystem;
pub mod session;
pub mod start;

use anyhow::{Result, bail};
use clap::ValueEnum;

use crate::context::AppContext;
use ula_application::StartupOutcome;
use ula_core::session::{ServiceLocation, ServiceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ServiceTypeArg {
    Ssh,
    Vnc,
    Xsdl,
}

impl From<ServiceTypeArg> for ServiceType {
    fn from(arg: ServiceTypeArg) -> Self {
        match arg {
            ServiceTypeArg::Ssh => ServiceType::Ssh,
            ServiceTypeArg::Vnc => ServiceType::Vnc,
            ServiceTypeArg::Xsdl => ServiceType::Xsdl,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LocationArg {
    Local,
    Remote,
}

impl From<LocationArg> for ServiceLocation {
    fn from(arg: LocationArg) -> Self {
        match arg {
            LocationArg::Local => ServiceLocation::Local,
            LocationArg::Remote => ServiceLocation::Remote,
        }
    }
}

/// Prints the result of a startup run; failures become errors.
pub fn report_outcome(ctx: &AppContext, outcome: StartupOutcome) -> Result<()> {
    match outcome {
        StartupOutcome::SessionReady {
            session,
            filesystem,
        } => {
            println!(
                "Session '{}' is ready ({} {}, {}) at {}",
                session.name,
                filesystem.distribution_type,
                filesystem.arch_type,
                session.service_type,
                ctx.paths
                    .filesystem_dir(&filesystem.directory_name())
                    .display()
            );
            Ok(())
        }
        StartupOutcome::SessionRestartable { session } => {
            println!("Session '{}' is already running", session.name);
            Ok(())
        }
        StartupOutcome::SingleSessionNotAllowed => {
            bail!("Another session is already running; only one may run at a time")
        }
        StartupOutcome::Cancelled { reason } => {
            println!("Cancelled: {}", reason);
            Ok(())
        }
        StartupOutcome::Failed { reason } => bail!("Startup failed: {}", reason),
    }
}
