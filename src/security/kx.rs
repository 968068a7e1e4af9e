//! Ephemeral key-exchange parameters.
//!
//! Secured listeners share one set of key-exchange parameters. Generating
//! them is comparatively expensive, so the material is cached on disk and
//! rotated once a day; a reload that transitions the server from unsecured
//! to a secured policy is the usual trigger for generation.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rand::rngs::OsRng;
use rand::RngCore;

use crate::observability::ServerLog;
use crate::security::creds::CryptoError;

/// Opaque key-exchange parameter material shared by all secured listeners.
pub struct KeyExchangeParams {
    material: Vec<u8>,
}

impl KeyExchangeParams {
    /// Size of the generated parameter material in bytes.
    pub const MATERIAL_LEN: usize = 256;

    /// Cached material older than this is regenerated.
    pub const MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

    /// Make sure key-exchange parameters exist.
    ///
    /// Reuses the server's current parameters if it has any; otherwise loads
    /// the cache file when it is present and fresh, and generates + persists
    /// new material when it is not.
    pub fn ensure(
        log: &ServerLog,
        current: Option<&Arc<KeyExchangeParams>>,
        path: &Path,
    ) -> Result<Arc<KeyExchangeParams>, CryptoError> {
        if let Some(params) = current {
            return Ok(Arc::clone(params));
        }

        if let Some(material) = Self::load_fresh(path)? {
            tracing::debug!(path = %path.display(), "Key-exchange parameters loaded from cache");
            return Ok(Arc::new(KeyExchangeParams { material }));
        }

        log.info("generating key-exchange parameters...");
        let mut material = vec![0u8; Self::MATERIAL_LEN];
        OsRng.fill_bytes(&mut material);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
            }
        }
        fs::write(path, &material).map_err(|source| io_error(path, source))?;

        Ok(Arc::new(KeyExchangeParams { material }))
    }

    /// Raw parameter material.
    pub fn material(&self) -> &[u8] {
        &self.material
    }

    fn load_fresh(path: &Path) -> Result<Option<Vec<u8>>, CryptoError> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io_error(path, source)),
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok());
        match age {
            Some(age) if age <= Self::MAX_AGE => {}
            // Stale or unreadable mtime: regenerate.
            _ => return Ok(None),
        }

        let material = fs::read(path).map_err(|source| io_error(path, source))?;
        if material.len() == Self::MATERIAL_LEN {
            Ok(Some(material))
        } else {
            Ok(None)
        }
    }
}

impl std::fmt::Debug for KeyExchangeParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyExchangeParams")
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CryptoError {
    CryptoError::Io {
        path: PathBuf::from(path),
        source,
    }
}
