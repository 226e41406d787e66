//! Non-interactive prompter answering from command-line flags.

use async_trait::async_trait;
use ula_application::{FilesystemCredentials, SessionStartupState, StartupPrompter};
use ula_core::app::App;
use ula_core::download::DownloadRequirement;
use ula_core::filesystem::Filesystem;
use ula_core::session::{ServiceLocation, ServiceType};

/// Answers given up front on the command line. `None` means "not given",
/// which cancels the startup if the question comes up.
#[derive(Debug, Clone, Default)]
pub struct FlagAnswers {
    pub service_location: Option<ServiceLocation>,
    pub service_type: Option<ServiceType>,
    pub credentials: Option<FilesystemCredentials>,
    pub accept_large_download: bool,
    pub accept_low_storage: bool,
}

pub struct FlagPrompter {
    answers: FlagAnswers,
}

impl FlagPrompter {
    pub fn new(answers: FlagAnswers) -> Self {
        Self { answers }
    }
}

#[async_trait]
impl StartupPrompter for FlagPrompter {
    async fn service_location(&self, app: &App) -> Option<ServiceLocation> {
        if self.answers.service_location.is_none() {
            eprintln!("App '{}' needs a service location: pass --location", app.name);
        }
        self.answers.service_location
    }

    async fn filesystem_credentials(&self, filesystem: &Filesystem) -> Option<FilesystemCredentials> {
        if self.answers.credentials.is_none() {
            eprintln!(
                "Filesystem '{}' needs credentials: pass --username, --password and --vnc-password",
                filesystem.name
            );
        }
        self.answers.credentials.clone()
    }

    async fn service_type(&self, app: &App) -> Option<ServiceType> {
        if self.answers.service_type.is_none() {
            eprintln!("App '{}' needs a service type: pass --service-type", app.name);
        }
        self.answers.service_type
    }

    async fn confirm_large_download(&self, requirements: &[DownloadRequirement]) -> bool {
        if !self.answers.accept_large_download {
            let names: Vec<&str> = requirements
                .iter()
                .filter(|requirement| requirement.is_large())
                .map(|requirement| requirement.filename.as_str())
                .collect();
            eprintln!(
                "A large download is required ({}): pass --accept-large-download",
                names.join(", ")
            );
        }
        self.answers.accept_large_download
    }

    async fn confirm_low_storage(&self, available_mb: u64) -> bool {
        if !self.answers.accept_low_storage {
            eprintln!(
                "Only {} MB of storage is available: pass --accept-low-storage",
                available_mb
            );
        }
        self.answers.accept_low_storage
    }

    fn session_state_changed(&self, state: &SessionStartupState) {
        if let Some(line) = progress_line(state) {
            println!("{}", line);
        }
    }
}

/// The progress line shown for `state`, if any.
fn progress_line(state: &SessionStartupState) -> Option<String> {
    use SessionStartupState as S;

    let line = match state {
        S::RetrievingAssetLists => "Retrieving asset lists...".to_string(),
        S::GeneratingDownloadRequirements => "Checking for updated assets...".to_string(),
        S::NoDownloadsRequired => "Assets are up to date".to_string(),
        S::Downloading { completed, total } => format!("Downloading {}/{}", completed, total),
        S::CopyingLocally => "Copying downloads to local storage...".to_string(),
        S::VerifyingFilesystemAssets => "Verifying filesystem assets...".to_string(),
        S::VerifyingStorage => "Checking available storage...".to_string(),
        S::Extracting { line } => {
            tracing::debug!(line = %line, "tar");
            return None;
        }
        S::ExtractionSucceeded => "Filesystem extracted".to_string(),
        _ => return None,
    };
    Some(line)
}
