use anyhow::Result;

use crate::context::AppContext;
use ula_core::filesystem::Filesystem;

pub struct NewFilesystem {
    pub name: String,
    pub distribution: String,
    pub architecture: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub vnc_password: Option<String>,
}

pub async fn add(ctx: &AppContext, args: NewFilesystem) -> Result<()> {
    let architecture = args
        .architecture
        .unwrap_or_else(|| ctx.config.architecture.clone());
    let mut filesystem = Filesystem::new(args.name, args.distribution, architecture);
    filesystem.set_credentials(
        args.username.unwrap_or_default(),
        args.password.unwrap_or_default(),
        args.vnc_password.unwrap_or_default(),
    );

    ctx.filesystem_repository().insert(&filesystem).await?;
    println!(
        "Added filesystem '{}' ({} {})",
        filesystem.name, filesystem.distribution_type, filesystem.arch_type
    );
    Ok(())
}

pub async fn list(ctx: &AppContext) -> Result<()> {
    let filesystems = ctx.filesystem_repository().list_all().await?;
    if filesystems.is_empty() {
        println!("No filesystems");
        return Ok(());
    }

    println!(
        "{:<4} {:<24} {:<12} {:<8} {:<8} {}",
        "ID", "NAME", "DISTRO", "ARCH", "APPS", "VERSION"
    );
    for filesystem in filesystems {
        println!(
            "{:<4} {:<24} {:<12} {:<8} {:<8} {}",
            filesystem.id,
            filesystem.name,
            filesystem.distribution_type,
            filesystem.arch_type,
            if filesystem.is_apps_filesystem { "yes" } else { "no" },
            filesystem.version_code_used
        );
    }
    Ok(())
}
