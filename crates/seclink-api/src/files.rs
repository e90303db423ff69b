use std::path::{Path, PathBuf};

use axum::body::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// URL prefix resumes are served under. The router mounts the upload root
/// at `/uploads`.
pub const RESUME_URL_PREFIX: &str = "/uploads/resumes/";

const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "doc", "docx"];

const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/octet-stream",
];

/// A file part pulled out of a multipart body.
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Resume blobs on local disk.
///
/// Each resume is a flat file at `{root}/resumes/{millis}-{uuid}.{ext}`.
pub struct ResumeStore {
    root: PathBuf,
    dir: PathBuf,
    max_bytes: usize,
}

impl ResumeStore {
    pub async fn new(root: PathBuf, max_bytes: usize) -> anyhow::Result<Self> {
        let dir = root.join("resumes");
        fs::create_dir_all(&dir).await?;
        info!("Resume storage directory: {}", dir.display());
        Ok(Self { root, dir, max_bytes })
    }

    /// Directory served at `/uploads`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Check extension, declared MIME type and size. Returns the lowercase
    /// extension to store the file under.
    pub fn validate(&self, file: &UploadedFile) -> ApiResult<String> {
        let ext = Path::new(&file.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .filter(|e| ALLOWED_EXTENSIONS.contains(&e.as_str()))
            .ok_or_else(|| ApiError::validation("only PDF or Word documents allowed"))?;

        if let Some(mime) = &file.content_type {
            if !ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
                return Err(ApiError::validation("only PDF or Word documents allowed"));
            }
        }

        if file.bytes.is_empty() {
            return Err(ApiError::validation("resume file is empty"));
        }
        if file.bytes.len() > self.max_bytes {
            return Err(ApiError::PayloadTooLarge);
        }

        Ok(ext)
    }

    /// Validate and write a resume. Returns its public URL.
    pub async fn save(&self, file: &UploadedFile) -> ApiResult<String> {
        let ext = self.validate(file)?;
        let file_name = format!(
            "{}-{}.{}",
            chrono::Utc::now().timestamp_millis(),
            Uuid::new_v4(),
            ext
        );

        let path = self.dir.join(&file_name);
        let mut out = fs::File::create(&path).await.map_err(|e| {
            error!("Failed to create resume {}: {}", path.display(), e);
            ApiError::Storage(e.into())
        })?;
        out.write_all(&file.bytes).await.map_err(|e| {
            error!("Failed to write resume {}: {}", path.display(), e);
            ApiError::Storage(e.into())
        })?;
        out.flush().await.map_err(|e| ApiError::Storage(e.into()))?;

        info!("Stored resume {} ({} bytes)", file_name, file.bytes.len());
        Ok(format!("{RESUME_URL_PREFIX}{file_name}"))
    }

    /// Best-effort removal of a resume by its public URL. Never fails the
    /// caller; problems are logged.
    pub async fn delete(&self, url: &str) {
        let Some(path) = self.path_for_url(url) else {
            warn!("Refusing to delete resume outside storage: {}", url);
            return;
        };

        match fs::remove_file(&path).await {
            Ok(()) => info!("Deleted resume {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Resume {} already gone", path.display());
            }
            Err(e) => warn!("Failed to delete resume {}: {}", path.display(), e),
        }
    }

    /// Map a public URL back to a path inside the resume directory. Rejects
    /// anything that is not a bare file name.
    fn path_for_url(&self, url: &str) -> Option<PathBuf> {
        let name = url.strip_prefix(RESUME_URL_PREFIX)?;
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return None;
        }
        Some(self.dir.join(name))
    }
}
