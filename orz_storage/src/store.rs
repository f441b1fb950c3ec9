use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use log::debug;
use thiserror::Error;

use super::credential::Credential;

/// Why no usable credential could be loaded.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("session expired")]
    Expired,
}

#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// `~/.config/orzbob/token.json` on Linux, `%APPDATA%\orzbob\config\token.json` on Windows, etc.
    pub fn new() -> io::Result<Self> {
        let proj = ProjectDirs::from("", "", "orzbob")
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "Unable to locate config dir"))?;
        Ok(Self::at(proj.config_dir().join("token.json")))
    }

    /// A store backed by an explicit file.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create or overwrite the credential file (owner read/write only).
    pub fn save(&self, credential: &Credential) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut options = fs::OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        // `mode` only applies on create; tighten a file left behind with looser bits
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        serde_json::to_writer_pretty(&mut file, credential).map_err(io::Error::from)?;
        file.write_all(b"\n")
    }

    /// Returns the stored credential if it is present, decodable and not expired.
    pub fn load(&self) -> Result<Credential, AuthError> {
        let file = fs::File::open(&self.path).map_err(|e| {
            debug!("No credential at {:?}: {e}", self.path);
            AuthError::NotAuthenticated
        })?;
        let credential: Credential = serde_json::from_reader(io::BufReader::new(file))
            .map_err(|e| {
                debug!("Unreadable credential at {:?}: {e}", self.path);
                AuthError::NotAuthenticated
            })?;

        if credential.is_expired() {
            debug!("Credential expired at {}", credential.expires_at);
            return Err(AuthError::Expired);
        }
        Ok(credential)
    }

    /// Delete the credential (`Ok(true)` if removed, `Ok(false)` if it didn’t exist).
    pub fn clear(&self) -> io::Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
