use anyhow::{Result, anyhow};

use super::ServiceTypeArg;
use crate::context::AppContext;
use ula_core::session::{ServiceType, Session};

pub async fn add(
    ctx: &AppContext,
    name: String,
    filesystem_name: &str,
    service_type: Option<ServiceTypeArg>,
) -> Result<()> {
    let filesystem = ctx
        .filesystem_repository()
        .list_all()
        .await?
        .into_iter()
        .find(|filesystem| filesystem.name == filesystem_name)
        .ok_or_else(|| anyhow!("No filesystem named '{}'", filesystem_name))?;

    let mut session = Session::new(name, filesystem.id);
    session.filesystem_name = filesystem.name.clone();
    session.service_location = filesystem.location;
    session.service_type = service_type.map(ServiceType::from).unwrap_or(ServiceType::Ssh);
    session.port = session.service_type.default_port();
    session.username = filesystem.default_username.clone();
    session.password = filesystem.default_password.clone();
    session.vnc_password = filesystem.default_vnc_password.clone();

    ctx.session_repository().insert(&session).await?;
    println!(
        "Added session '{}' on filesystem '{}'",
        session.name, filesystem.name
    );
    Ok(())
}

pub async fn list(ctx: &AppContext) -> Result<()> {
    let sessions = ctx.session_repository().list_all().await?;
    if sessions.is_empty() {
        println!("No sessions");
        return Ok(());
    }

    println!(
        "{:<4} {:<24} {:<24} {:<8} {:<8} {}",
        "ID", "NAME", "FILESYSTEM", "TYPE", "ACTIVE", "APP"
    );
    for session in sessions {
        println!(
            "{:<4} {:<24} {:<24} {:<8} {:<8} {}",
            session.id,
            session.name,
            session.filesystem_name,
            session.service_type.to_string(),
            if session.active { "yes" } else { "no" },
            if session.is_apps_session { "yes" } else { "no" }
        );
    }
    Ok(())
}
