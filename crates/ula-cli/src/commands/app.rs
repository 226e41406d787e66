use anyhow::Result;
use std::sync::Arc;

use super::report_outcome;
use crate::context::AppContext;
use crate::prompter::{FlagAnswers, FlagPrompter};
use ula_core::app::App;
use ula_core::session::ServiceLocation;

pub struct AppSelection {
    pub name: String,
    pub distribution: String,
    pub supports_cli: bool,
    pub supports_gui: bool,
}

/// Prepares the app's filesystem and session, then provisions it.
pub async fn run(ctx: &AppContext, selection: AppSelection, answers: FlagAnswers) -> Result<()> {
    let mut app = App::new(selection.name, selection.distribution);
    app.supports_cli = selection.supports_cli;
    app.supports_gui = selection.supports_gui;

    // An unselected location lets the apps flow ask for one.
    let service_location = answers
        .service_location
        .unwrap_or(ServiceLocation::Unselected);

    let (coordinator, forwarder) = ctx
        .startup_engine(Arc::new(FlagPrompter::new(answers)))
        .await?;
    tracing::info!(app = %app.name, "Starting app");
    let outcome = coordinator.start_app(app, service_location).await;
    forwarder.abort();

    report_outcome(ctx, outcome)
}
