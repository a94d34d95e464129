use serde_derive::{Deserialize, Serialize};

/// A command submitted by the key-value layer.
///
/// `Set` and `Delete` change the store and must go through the replicated
/// log. `Get` only reads, and is executed directly by the leader.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Set {
        #[serde(with = "serde_bytes")]
        key: Vec<u8>,
        #[serde(with = "serde_bytes")]
        value: Vec<u8>,
    },
    Delete {
        #[serde(with = "serde_bytes")]
        key: Vec<u8>,
    },
    Get {
        #[serde(with = "serde_bytes")]
        key: Vec<u8>,
    },
}

impl Command {
    pub fn set(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Command::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Command::Delete { key: key.into() }
    }

    pub fn get(key: impl Into<Vec<u8>>) -> Self {
        Command::Get { key: key.into() }
    }

    /// Whether the command must be stored in the replicated log.
    pub fn is_persistable(&self) -> bool {
        matches!(self, Command::Set { .. } | Command::Delete { .. })
    }
}

/// The command carried by a log entry.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum LogCommand {
    Set {
        #[serde(with = "serde_bytes")]
        key: Vec<u8>,
        #[serde(with = "serde_bytes")]
        value: Vec<u8>,
    },
    Delete {
        #[serde(with = "serde_bytes")]
        key: Vec<u8>,
    },
}

impl TryFrom<Command> for LogCommand {
    type Error = Command;

    /// Returns the command back if it cannot be stored in the log.
    fn try_from(command: Command) -> Result<Self, Self::Error> {
        match command {
            Command::Set { key, value } => Ok(LogCommand::Set { key, value }),
            Command::Delete { key } => Ok(LogCommand::Delete { key }),
            Command::Get { .. } => Err(command),
        }
    }
}

impl From<LogCommand> for Command {
    fn from(command: LogCommand) -> Self {
        match command {
            LogCommand::Set { key, value } => Command::Set { key, value },
            LogCommand::Delete { key } => Command::Delete { key },
        }
    }
}
