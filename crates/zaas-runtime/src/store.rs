//! On-disk identity and manager configuration.
//!
//! ```text
//! {config_dir}/          (0700)
//! ├── uuid               # instance identifier, plain text (0600)
//! └── zaas.json          # manager configuration (0600)
//! ```
//!
//! Both files are only ever replaced through a temporary file in the same
//! directory that is synced and then renamed into place, so readers see
//! either the previous document, no document, or the complete new one.

use std::fs::{self, DirBuilder, File, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;
use zaas_core::config::Settings;
use zaas_core::identity::InstanceIdentity;
use zaas_core::manager::ManagerConfig;

use crate::error::BootstrapError;

const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

/// Owner of the persisted identity and configuration.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    dir: PathBuf,
    identity_path: PathBuf,
    config_path: PathBuf,
}

impl IdentityStore {
    pub fn new(settings: &Settings) -> Self {
        Self {
            dir: settings.config_dir.clone(),
            identity_path: settings.identity_path(),
            config_path: settings.config_path(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn identity_path(&self) -> &Path {
        &self.identity_path
    }

    /// Create the config directory if needed and force it to owner-only access.
    pub fn ensure_dir(&self) -> Result<(), BootstrapError> {
        DirBuilder::new()
            .recursive(true)
            .mode(DIR_MODE)
            .create(&self.dir)
            .map_err(|e| {
                BootstrapError::io(format!("failed to create {}", self.dir.display()), e)
            })?;
        fs::set_permissions(&self.dir, Permissions::from_mode(DIR_MODE)).map_err(|e| {
            BootstrapError::io(
                format!("failed to set permissions on {}", self.dir.display()),
                e,
            )
        })
    }

    /// Read the instance identifier, `None` if it was never created.
    pub fn load_identity(&self) -> Result<Option<InstanceIdentity>, BootstrapError> {
        let text = match fs::read_to_string(&self.identity_path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(self.corrupt_identity("not valid UTF-8"));
            }
            Err(e) => {
                return Err(BootstrapError::io(
                    format!("cannot read {}", self.identity_path.display()),
                    e,
                ));
            }
        };

        InstanceIdentity::parse(&text)
            .map(Some)
            .map_err(|e| self.corrupt_identity(&e.to_string()))
    }

    /// Generate and persist a new identifier. Refuses to overwrite an existing one.
    pub fn create_identity(&self) -> Result<InstanceIdentity, BootstrapError> {
        let identity = InstanceIdentity::generate();
        self.ensure_dir()?;

        let tmp = self.write_temp(format!("{}\n", identity).as_bytes())?;
        tmp.persist_noclobber(&self.identity_path).map_err(|e| {
            BootstrapError::io(
                format!("failed to create {}", self.identity_path.display()),
                e.error,
            )
        })?;
        self.sync_dir()?;

        debug!(path = %self.identity_path.display(), "identity file written");
        Ok(identity)
    }

    /// Load the identifier, generating it on first use. The flag reports creation.
    pub fn load_or_create_identity(&self) -> Result<(InstanceIdentity, bool), BootstrapError> {
        match self.load_identity()? {
            Some(identity) => Ok((identity, false)),
            None => self.create_identity().map(|identity| (identity, true)),
        }
    }

    /// Read the manager configuration, `None` only if the file does not exist.
    pub fn load_config(&self) -> Result<Option<ManagerConfig>, BootstrapError> {
        let bytes = match fs::read(&self.config_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BootstrapError::io(
                    format!("cannot read config file {}", self.config_path.display()),
                    e,
                ));
            }
        };

        ManagerConfig::from_slice(&bytes)
            .map(Some)
            .map_err(|source| BootstrapError::InvalidConfig {
                path: self.config_path.clone(),
                source,
            })
    }

    /// Atomically replace the persisted configuration with `cfg`.
    pub fn save_config(&self, cfg: &ManagerConfig) -> Result<(), BootstrapError> {
        let json = cfg
            .to_json()
            .map_err(|source| BootstrapError::InvalidConfig {
                path: self.config_path.clone(),
                source,
            })?;

        self.ensure_dir()?;
        let tmp = self.write_temp(json.as_bytes())?;
        tmp.persist(&self.config_path).map_err(|e| {
            BootstrapError::io(
                format!("failed to replace {}", self.config_path.display()),
                e.error,
            )
        })?;
        self.sync_dir()?;

        debug!(path = %self.config_path.display(), "config file replaced");
        Ok(())
    }

    /// Write `contents` to a synced, owner-only temp file next to the targets.
    /// The file is removed on drop unless persisted.
    fn write_temp(&self, contents: &[u8]) -> Result<NamedTempFile, BootstrapError> {
        let mut tmp = tempfile::Builder::new()
            .prefix(".zaas-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(|e| {
                BootstrapError::io(
                    format!("failed to create temp file in {}", self.dir.display()),
                    e,
                )
            })?;

        let path = tmp.path().display().to_string();
        write_synced(&mut tmp, contents)
            .map_err(|e| BootstrapError::io(format!("failed to write {}", path), e))?;
        fs::set_permissions(tmp.path(), Permissions::from_mode(FILE_MODE))
            .map_err(|e| BootstrapError::io(format!("failed to set permissions on {}", path), e))?;

        Ok(tmp)
    }

    /// Make the rename itself durable.
    fn sync_dir(&self) -> Result<(), BootstrapError> {
        File::open(&self.dir)
            .and_then(|d| d.sync_all())
            .map_err(|e| BootstrapError::io(format!("failed to sync {}", self.dir.display()), e))
    }

    fn corrupt_identity(&self, reason: &str) -> BootstrapError {
        BootstrapError::CorruptIdentity {
            path: self.identity_path.clone(),
            reason: reason.to_string(),
        }
    }
}

fn write_synced(tmp: &mut NamedTempFile, contents: &[u8]) -> io::Result<()> {
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.as_file().sync_all()
}
