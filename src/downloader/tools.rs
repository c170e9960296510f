// Extractor binary discovery and execute-permission staging

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::errors::DownloadError;
use super::utils::run_output_with_timeout;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: Option<String>,
    pub path: Option<String>,
    pub is_available: bool,
}

/// Locates the extractor binary and makes sure it can be executed.
#[derive(Debug, Clone)]
pub struct ToolManager {
    explicit_path: Option<PathBuf>,
    asset_dir: PathBuf,
    scratch_dir: PathBuf,
}

impl ToolManager {
    pub fn new(explicit_path: Option<PathBuf>, scratch_dir: PathBuf) -> Self {
        Self {
            explicit_path,
            asset_dir: PathBuf::from("bin"),
            scratch_dir,
        }
    }

    pub fn with_asset_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.asset_dir = dir.into();
        self
    }

    /// Default writable staging directory: user cache dir, else tmp.
    pub fn default_scratch_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("youtube-audio-relay")
    }

    /// Platform-specific name of the bundled asset.
    pub fn binary_name() -> &'static str {
        if cfg!(windows) {
            "yt-dlp.exe"
        } else if cfg!(target_os = "macos") {
            "yt-dlp_macos"
        } else {
            "yt-dlp"
        }
    }

    /// First existing candidate: explicit path, bundled asset, common
    /// install locations, then `PATH`.
    pub fn locate(&self) -> Result<PathBuf, DownloadError> {
        if let Some(path) = &self.explicit_path {
            return if path.is_file() {
                Ok(path.clone())
            } else {
                Err(DownloadError::ToolNotFound(format!(
                    "configured extractor {} does not exist",
                    path.display()
                )))
            };
        }

        let mut candidates = vec![
            self.asset_dir.join(Self::binary_name()),
            PathBuf::from("/opt/homebrew/bin/yt-dlp"), // Homebrew on Apple Silicon
            PathBuf::from("/usr/local/bin/yt-dlp"),
            PathBuf::from("/usr/bin/yt-dlp"),
        ];
        if let Some(path_var) = std::env::var_os("PATH") {
            candidates.extend(std::env::split_paths(&path_var).map(|dir| dir.join("yt-dlp")));
        }

        candidates
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| DownloadError::ToolNotFound("yt-dlp binary not found".to_string()))
    }

    /// Locate and make executable. Cheap and idempotent; safe to call per request.
    pub fn prepare(&self) -> Result<PathBuf, DownloadError> {
        let path = self.locate()?;
        ensure_executable(&path, &self.scratch_dir)
    }

    /// `prepare` on the blocking pool, for callers on the async runtime.
    pub async fn prepare_blocking(&self) -> Result<PathBuf, DownloadError> {
        let tools = self.clone();
        tokio::task::spawn_blocking(move || tools.prepare())
            .await
            .map_err(|e| DownloadError::ExecutionError(format!("extractor preparation aborted: {}", e)))?
    }

    /// Probe the binary version (bounded) for startup logging.
    pub async fn get_tool_info(&self) -> ToolInfo {
        let name = "yt-dlp".to_string();
        let path = match self.prepare_blocking().await {
            Ok(path) => path,
            Err(e) => {
                debug!(error = %e, "extractor binary unavailable");
                return ToolInfo {
                    name,
                    version: None,
                    path: None,
                    is_available: false,
                };
            }
        };

        let program = path.to_string_lossy().to_string();
        let version = match run_output_with_timeout(
            &program,
            vec!["--version".to_string()],
            Duration::from_secs(10),
        )
        .await
        {
            Ok(out) if out.status.success() => {
                Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
            }
            _ => None,
        };

        ToolInfo {
            name,
            is_available: version.is_some(),
            version,
            path: Some(program),
        }
    }
}

/// Return a path to an executable copy of `path`.
///
/// Tries to set the execute bit in place; when that is refused (read-only
/// filesystem) falls back to [`stage_copy`].
#[cfg(unix)]
pub fn ensure_executable(path: &Path, scratch_dir: &Path) -> Result<PathBuf, DownloadError> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::metadata(path)
        .map_err(|e| DownloadError::ToolNotFound(format!("{}: {}", path.display(), e)))?;
    if meta.permissions().mode() & 0o111 != 0 {
        return Ok(path.to_path_buf());
    }

    let mut perms = meta.permissions();
    perms.set_mode(0o755);
    if std::fs::set_permissions(path, perms).is_ok() {
        debug!(path = %path.display(), "marked extractor executable in place");
        return Ok(path.to_path_buf());
    }

    stage_copy(path, scratch_dir)
}

/// Copy `path` into `scratch_dir` as an executable, unless an executable
/// copy is already there.
///
/// The copy goes through a unique temporary file and an atomic rename, so
/// concurrent first use by several requests is harmless.
#[cfg(unix)]
pub fn stage_copy(path: &Path, scratch_dir: &Path) -> Result<PathBuf, DownloadError> {
    use std::os::unix::fs::PermissionsExt;
    use std::sync::atomic::{AtomicU64, Ordering};

    static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

    let file_name = path
        .file_name()
        .ok_or_else(|| DownloadError::ToolNotFound(format!("{} has no file name", path.display())))?;
    let target = scratch_dir.join(file_name);

    if let Ok(existing) = std::fs::metadata(&target) {
        if existing.permissions().mode() & 0o111 != 0 {
            return Ok(target);
        }
    }

    let staging_err =
        |e: std::io::Error| DownloadError::ExecutionError(format!("Failed to stage extractor: {}", e));

    std::fs::create_dir_all(scratch_dir).map_err(staging_err)?;
    let tmp = scratch_dir.join(format!(
        ".{}.{}.{}",
        file_name.to_string_lossy(),
        std::process::id(),
        STAGING_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::copy(path, &tmp).map_err(staging_err)?;
    std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o755)).map_err(staging_err)?;
    if let Err(e) = std::fs::rename(&tmp, &target) {
        let _ = std::fs::remove_file(&tmp);
        return Err(staging_err(e));
    }

    info!(from = %path.display(), to = %target.display(), "staged extractor binary");
    Ok(target)
}

#[cfg(not(unix))]
pub fn ensure_executable(path: &Path, _scratch_dir: &Path) -> Result<PathBuf, DownloadError> {
    Ok(path.to_path_buf())
}
