//! Persisted participant identity.
//!
//! A client keeps the same identity across restarts so that rejoining a
//! session recovers its seat.

use crate::state::{IdentifierError, ParticipantId};
use derive_more::Display;
use std::path::Path;
use tracing::{debug, info, instrument};

/// Failure to read or write the identity file.
#[derive(Debug, Display)]
pub enum IdentityError {
    /// The file could not be read or written.
    #[display("Identity file error: {}", _0)]
    Io(std::io::Error),

    /// The file does not hold a valid identity.
    #[display("Invalid identity on disk: {}", _0)]
    Invalid(IdentifierError),
}

impl std::error::Error for IdentityError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IdentityError::Io(e) => Some(e),
            IdentityError::Invalid(e) => Some(e),
        }
    }
}

/// Reads the identity stored at `path`, generating and storing a fresh one
/// if the file does not exist.
#[instrument(skip(path), fields(path = %path.as_ref().display()))]
pub fn load_or_create(path: impl AsRef<Path>) -> Result<ParticipantId, IdentityError> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let id = ParticipantId::new(content.trim()).map_err(IdentityError::Invalid)?;
            debug!(participant = %id, "Loaded identity");
            Ok(id)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let id = ParticipantId::generate();
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(IdentityError::Io)?;
            }
            std::fs::write(path, format!("{}\n", id)).map_err(IdentityError::Io)?;
            info!(participant = %id, "Created new identity");
            Ok(id)
        }
        Err(e) => Err(IdentityError::Io(e)),
    }
}
