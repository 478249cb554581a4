use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

const CONFIG_FILE: &str = ".speed.toml";
const PRIVACY_URL: &str = "https://www.measurementlab.net/privacy";

/// Remembers whether the user accepted the data policy.
pub trait ConsentStore {
    fn is_agreed(&self) -> bool;
    fn record_agreement(&self) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConsentFile {
    #[serde(default)]
    agreed_to_policy: bool,
}

pub struct FileConsentStore {
    path: PathBuf,
}

impl FileConsentStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `<config dir>/.speed.toml` for the current user.
    pub fn user_default() -> Result<Self> {
        let dirs = BaseDirs::new().context("could not determine the home directory")?;
        Ok(Self::new(dirs.config_dir().join(CONFIG_FILE)))
    }
}

impl ConsentStore for FileConsentStore {
    fn is_agreed(&self) -> bool {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return false;
        };
        match toml::from_str::<ConsentFile>(&raw) {
            Ok(file) => file.agreed_to_policy,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "ignoring unreadable consent file");
                false
            }
        }
    }

    fn record_agreement(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string(&ConsentFile {
            agreed_to_policy: true,
        })?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

/// Asks for agreement to the Measurement Lab data policy unless it was given
/// before. Returns whether the session may run.
pub fn prompt_agreement<S, I, O>(store: &S, mut input: I, mut output: O, assume_yes: bool) -> Result<bool>
where
    S: ConsentStore,
    I: BufRead,
    O: Write,
{
    if store.is_agreed() {
        return Ok(true);
    }

    writeln!(output, "Before running the speed test, please review the Measurement Lab privacy policy:")?;
    writeln!(output, "{PRIVACY_URL}")?;
    writeln!(
        output,
        "\nBy continuing, you agree to the data policy, which includes retention and publication of IP addresses."
    )?;

    if !assume_yes {
        write!(output, "Type 'yes' to agree and continue: ")?;
        output.flush()?;

        let mut line = String::new();
        input.read_line(&mut line)?;
        if !line.trim().eq_ignore_ascii_case("yes") {
            writeln!(output, "You must agree to the data policy to proceed. Exiting.")?;
            return Ok(false);
        }
    }

    if let Err(e) = store.record_agreement() {
        warn!(error = %e, "could not save agreement");
        writeln!(output, "Warning: could not save agreement to config file.")?;
    }

    Ok(true)
}
