use std::{path::PathBuf, str::FromStr};

use core_types::{AppConfig, BookId};
use ledger::LedgerConfig;
use thiserror::Error;

/// What a single invocation of the binary does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Annotate every successful run that has no number yet.
    Process,
    /// Number legacy runs annotated before numbering existed.
    Backfill,
    Status,
    Css(BookId),
    Contributors(BookId),
}

impl Command {
    pub fn from_args<I: IntoIterator<Item = String>>(args: I) -> Result<Self, ConfigError> {
        let mut args = args.into_iter();
        let name = args.next().ok_or(ConfigError::Usage)?;
        let mut book_id = || -> Result<BookId, ConfigError> {
            let raw = args.next().ok_or(ConfigError::Usage)?;
            raw.parse()
                .map_err(|_| ConfigError::InvalidBookId { value: raw })
        };
        match name.parse::<Command>()? {
            Command::Css(_) => Ok(Command::Css(book_id()?)),
            Command::Contributors(_) => Ok(Command::Contributors(book_id()?)),
            other => Ok(other),
        }
    }

    /// Commands that change the ledger and need the snapshot written back.
    pub fn mutates(self) -> bool {
        matches!(self, Command::Process | Command::Backfill)
    }
}

impl FromStr for Command {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "process" => Ok(Command::Process),
            "backfill" => Ok(Command::Backfill),
            "status" => Ok(Command::Status),
            "css" => Ok(Command::Css(0)),
            "contributors" => Ok(Command::Contributors(0)),
            other => Err(ConfigError::UnknownCommand {
                value: other.to_string(),
            }),
        }
    }
}

/// Settings resolved for one run of the binary.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub snapshot_path: PathBuf,
    pub ledger: LedgerConfig,
}

impl RuntimeConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let app = AppConfig::load()?;
        Ok(Self::from(&app))
    }
}

impl From<&AppConfig> for RuntimeConfig {
    fn from(app: &AppConfig) -> Self {
        Self {
            snapshot_path: PathBuf::from(&app.snapshot_path),
            ledger: LedgerConfig::from(app),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("usage: storyledger <process|backfill|status|css BOOK|contributors BOOK>")]
    Usage,
    #[error("unknown command {value}")]
    UnknownCommand { value: String },
    #[error("invalid book id {value}")]
    InvalidBookId { value: String },
    #[error(transparent)]
    Settings(#[from] config::ConfigError),
}
