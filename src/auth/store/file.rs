//! Filesystem token cache.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use super::{CacheError, CacheKey};
use crate::auth::token::TokenSet;

/// File permissions for token files (Unix only): owner read/write.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Directory permissions (Unix only): owner read/write/execute.
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// Path appended to the user cache directory.
const CACHE_SUBDIR: [&str; 2] = ["ic", "oidc-login"];

/// Content-addressed token cache.
///
/// Each [`CacheKey`] maps to `{dir}/{sha256-hex}` holding a JSON
/// [`TokenSet`]. Writes go through a temporary sibling and a rename so a
/// reader never observes a half-written file.
#[derive(Debug, Clone)]
pub struct TokenCache {
    dir: PathBuf,
}

impl TokenCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache rooted at [`default_cache_dir`].
    pub fn with_default_dir() -> Self {
        Self::new(default_cache_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.filename())
    }

    /// Read the token set stored under `key`.
    #[instrument(skip(self, key), fields(dir = %self.dir.display()))]
    pub fn lookup(&self, key: &CacheKey) -> Result<TokenSet, CacheError> {
        let path = self.path_for(key);
        let content = match std::fs::read(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound { path });
            }
            Err(source) => return Err(CacheError::Io { path, source }),
        };

        let tokens = serde_json::from_slice(&content)
            .map_err(|source| CacheError::Corrupt { path: path.clone(), source })?;
        debug!(path = %path.display(), "Token cache hit");
        Ok(tokens)
    }

    /// Persist `tokens` under `key`, replacing any previous entry.
    #[instrument(skip(self, key, tokens), fields(dir = %self.dir.display()))]
    pub fn save(&self, key: &CacheKey, tokens: &TokenSet) -> Result<(), CacheError> {
        self.ensure_dir()?;

        let path = self.path_for(key);
        let content = serde_json::to_vec(tokens)?;
        let temp_path = path.with_extension("tmp");

        if let Err(source) = write_private(&temp_path, &content) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(CacheError::Io { path: temp_path, source });
        }

        if let Err(source) = std::fs::rename(&temp_path, &path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(CacheError::Io { path, source });
        }

        debug!(path = %path.display(), "Token cache updated");
        Ok(())
    }

    /// Delete the entry for `key`.
    #[instrument(skip(self, key), fields(dir = %self.dir.display()))]
    pub fn invalidate(&self, key: &CacheKey) -> Result<(), CacheError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Token cache entry removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CacheError::NotFound { path })
            }
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }

    fn ensure_dir(&self) -> Result<(), CacheError> {
        if self.dir.exists() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.dir).map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(DIR_MODE))
                .map_err(|source| CacheError::Io {
                    path: self.dir.clone(),
                    source,
                })?;
        }

        Ok(())
    }
}

/// Create (or truncate) `path` readable by the owner only and write `content`.
fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(FILE_MODE);
    }

    let mut file = options.open(path)?;
    file.write_all(content)?;
    file.sync_all()
}

/// `<user cache dir>/ic/oidc-login`, or the same suffix under the temp dir when
/// no user cache directory can be resolved.
pub fn default_cache_dir() -> PathBuf {
    let base = user_cache_dir().unwrap_or_else(std::env::temp_dir);
    CACHE_SUBDIR.iter().fold(base, |path, part| path.join(part))
}

fn user_cache_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CACHE_HOME").filter(|d| !d.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    let home = std::env::var_os("HOME").filter(|h| !h.is_empty())?;
    if cfg!(target_os = "macos") {
        Some(PathBuf::from(home).join("Library").join("Caches"))
    } else {
        Some(PathBuf::from(home).join(".cache"))
    }
}
