/// Faults at the remote boundary, classified the way the sync engine reacts to them.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Missing or rejected credential. Not worth retrying.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Repository or object absent. For a snapshot download this means "empty remote".
    #[error("not found: {0}")]
    NotFound(String),

    #[error("repository error: {0}")]
    Repository(String),

    /// Network or protocol failure; the whole operation may be re-run later.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl RemoteError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        RemoteError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn transport(label: &str, err: impl std::fmt::Display) -> Self {
        RemoteError::Transport(format!("{}: {}", label, err))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}
