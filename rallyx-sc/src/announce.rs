//! Operator alerts
//!
//! Timing and scanning outcomes the person at the start line needs to hear
//! about. Delivery is fire-and-forget; an alert can never hold up ingestion.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use tracing::{debug, info, warn};

/// Alert raised by the scoring core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cue {
    Start,
    Finish,
    /// Start seen while starts are disabled
    FalseStart,
    /// Finish with nobody on course, or while finishes are disabled
    FalseFinish,
    /// Scan selected the next entrant
    GoodScan,
    /// Scan did not match an entrant
    BadScan,
}

impl Cue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cue::Start => "start",
            Cue::Finish => "finish",
            Cue::FalseStart => "false_start",
            Cue::FalseFinish => "false_finish",
            Cue::GoodScan => "good_scan",
            Cue::BadScan => "bad_scan",
        }
    }
}

impl fmt::Display for Cue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert delivery
pub trait Annunciator: Send + Sync {
    fn announce(&self, cue: Cue);
}

/// Alerts go to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAnnunciator;

impl Annunciator for LogAnnunciator {
    fn announce(&self, cue: Cue) {
        info!(%cue, "Alert");
    }
}

/// Plays `<directory>/<cue>.wav` through the external `play` command
#[derive(Debug, Clone)]
pub struct SoundAnnunciator {
    directory: PathBuf,
}

impl SoundAnnunciator {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    pub fn sound_path(&self, cue: Cue) -> PathBuf {
        self.directory.join(format!("{}.wav", cue.as_str()))
    }
}

impl Annunciator for SoundAnnunciator {
    fn announce(&self, cue: Cue) {
        let path = self.sound_path(cue);
        if !path.exists() {
            debug!(%cue, path = %path.display(), "No sound file for alert");
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(%cue, "No runtime to play alert on");
            return;
        };

        runtime.spawn(async move {
            let child = tokio::process::Command::new("play")
                .arg("-q")
                .arg(&path)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn();
            match child {
                Ok(mut child) => {
                    if let Err(e) = child.wait().await {
                        warn!(path = %path.display(), "Alert playback failed: {}", e);
                    }
                }
                Err(e) => warn!(path = %path.display(), "Could not start alert playback: {}", e),
            }
        });
    }
}
