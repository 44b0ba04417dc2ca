use std::fmt;

use crate::engine::models::VersionRecord;

// Progress events emitted by the engine while it runs.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateState {
    Idle,
    Checking {
        local_id: String,
    },
    UpToDate {
        version: String,
    },
    Updating {
        stage: Stage,
        version: String,
    },
    Downloading {
        progress: f32,
        speed: String,
        downloaded: u64,
        total: Option<u64>,
    },
    Installed {
        version: String,
        files: usize,
    },
    Failed {
        stage: Stage,
        message: String,
    },
}

/// Step of a run that can fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Load,
    Lookup,
    Download,
    Verify,
    Staging,
    Extract,
    Move,
    Persist,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Lookup => "lookup",
            Stage::Download => "download",
            Stage::Verify => "verify",
            Stage::Staging => "staging",
            Stage::Extract => "extract",
            Stage::Move => "move",
            Stage::Persist => "persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckResult {
    UpToDate {
        local: VersionRecord,
    },
    UpdateAvailable {
        local: VersionRecord,
        remote: VersionRecord,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate { version: String },
    Installed { record: VersionRecord, files: usize },
}

impl UpdateState {
    /// Whether the run has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpdateState::UpToDate { .. } | UpdateState::Installed { .. } | UpdateState::Failed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_are_stable() {
        assert_eq!(Stage::Extract.to_string(), "extract");
        assert_eq!(Stage::Persist.as_str(), "persist");
        assert_eq!(format!("{}", Stage::Move), "move");
    }

    #[test]
    fn only_outcomes_are_terminal() {
        assert!(!UpdateState::Idle.is_terminal());
        assert!(
            !UpdateState::Updating {
                stage: Stage::Download,
                version: "2.0.0".into()
            }
            .is_terminal()
        );
        assert!(
            UpdateState::Failed {
                stage: Stage::Extract,
                message: "boom".into()
            }
            .is_terminal()
        );
        assert!(
            UpdateState::UpToDate {
                version: "1.0.0".into()
            }
            .is_terminal()
        );
    }
}
