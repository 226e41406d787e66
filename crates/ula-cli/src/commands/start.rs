use anyhow::{Result, anyhow};
use std::sync::Arc;

use super::report_outcome;
use crate::context::AppContext;
use crate::prompter::{FlagAnswers, FlagPrompter};

/// Provisions the named session's filesystem.
pub async fn run(ctx: &AppContext, session_name: &str, answers: FlagAnswers) -> Result<()> {
    let session = ctx
        .session_repository()
        .list_all()
        .await?
        .into_iter()
        .find(|session| session.name == session_name)
        .ok_or_else(|| anyhow!("No session named '{}'", session_name))?;

    let (coordinator, forwarder) = ctx
        .startup_engine(Arc::new(FlagPrompter::new(answers)))
        .await?;
    tracing::info!(session = %session.name, "Starting session");
    let outcome = coordinator.start_session(session).await;
    forwarder.abort();

    report_outcome(ctx, outcome)
}
