// src/viewer/mod.rs
// Viewer Attachment (C9): downloads a referenced URL into a per-user
// temp file and hands back a handle usable by tools (absolutePath) and
// the client (previewUrl). Files are transient and memory-resident per
// the data model — there is no DB table, only an in-process index swept
// on `max_age_secs`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::server::ViewerConfig;
use crate::oauth::OAuthBroker;
use crate::store::models::ViewerFile;

/// Hosts the registry proxies through an OAuth bearer token, rather
/// than fetching anonymously, keyed by the provider name the token is
/// stored under.
const OAUTH_HOSTS: &[(&str, &str)] = &[
    ("drive.google.com", "google"),
    ("www.googleapis.com", "google"),
    ("docs.google.com", "google"),
    ("slack.com", "slack"),
    ("files.slack.com", "slack"),
    ("api.github.com", "github"),
];

struct FileRecord {
    name: String,
    mime_type: String,
    absolute_path: PathBuf,
    created_at: std::time::Instant,
}

pub struct ViewerService {
    config: ViewerConfig,
    client: reqwest::Client,
    oauth: std::sync::Arc<OAuthBroker>,
    files: Mutex<HashMap<String, FileRecord>>,
}

impl ViewerService {
    pub fn new(config: ViewerConfig, oauth: std::sync::Arc<OAuthBroker>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            oauth,
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Fetches `url`, streaming the body to a temp file under
    /// `<tempDir>/<userId>/<id>-<filename>`, proxying through an OAuth
    /// bearer token when the host is a known provider.
    pub async fn download(&self, user_id: &str, url: &str, filename: &str, mime_type: &str) -> Result<ViewerFile> {
        let mut request = self.client.get(url);

        if let Some(provider) = known_oauth_provider(url) {
            match self.oauth.get_token(user_id, provider, None).await {
                Ok(token) => {
                    request = request.bearer_auth(token.access_token);
                }
                Err(e) => {
                    warn!(provider, user_id, error = %e, "no oauth token available, fetching anonymously");
                }
            }
        }

        let response = request.send().await.context("viewer download request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("viewer download returned {}", response.status());
        }

        let user_dir = PathBuf::from(&self.config.temp_dir).join(user_id);
        tokio::fs::create_dir_all(&user_dir)
            .await
            .context("failed to create viewer temp directory")?;

        let id = Uuid::new_v4().to_string();
        let safe_name = sanitize_filename(filename);
        let absolute_path = user_dir.join(format!("{id}-{safe_name}"));

        let mut file = tokio::fs::File::create(&absolute_path)
            .await
            .context("failed to create viewer temp file")?;

        let bytes = response.bytes().await.context("failed to read viewer download body")?;
        file.write_all(&bytes).await.context("failed to write viewer temp file")?;
        file.flush().await?;

        let size = bytes.len() as u64;
        let absolute_path_str = absolute_path.to_string_lossy().to_string();

        self.files.lock().insert(
            id.clone(),
            FileRecord {
                name: filename.to_string(),
                mime_type: mime_type.to_string(),
                absolute_path: absolute_path.clone(),
                created_at: std::time::Instant::now(),
            },
        );

        info!(id, user_id, size, "viewer file downloaded");

        Ok(ViewerFile {
            id: id.clone(),
            name: filename.to_string(),
            mime_type: mime_type.to_string(),
            preview_url: format!("/api/viewer/files/{id}"),
            source_url: Some(url.to_string()),
            file_uri: Some(format!("file://{absolute_path_str}")),
            absolute_path: Some(absolute_path_str),
            size: Some(size),
        })
    }

    /// Resolves a viewer file id to its path and mime type for the
    /// static-serve route. `None` if unknown or already swept.
    pub fn resolve(&self, id: &str) -> Option<(PathBuf, String)> {
        self.files.lock().get(id).map(|r| (r.absolute_path.clone(), r.mime_type.clone()))
    }

    /// Removes temp files older than `maxAgeSecs` from both the index
    /// and disk. Run on a tick by the caller.
    pub async fn sweep(&self) {
        let max_age = Duration::from_secs(self.config.max_age_secs.max(0) as u64);
        let now = std::time::Instant::now();

        let expired: Vec<(String, PathBuf)> = {
            let files = self.files.lock();
            files
                .iter()
                .filter(|(_, record)| now.duration_since(record.created_at) > max_age)
                .map(|(id, record)| (id.clone(), record.absolute_path.clone()))
                .collect()
        };

        for (id, path) in &expired {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!(id, path = %path.display(), error = %e, "failed to remove expired viewer file");
            }
        }

        if !expired.is_empty() {
            let mut files = self.files.lock();
            for (id, _) in &expired {
                files.remove(id);
            }
            info!(count = expired.len(), "swept expired viewer files");
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.config.sweep_interval_secs)
    }
}

fn known_oauth_provider(url: &str) -> Option<&'static str> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    OAUTH_HOSTS.iter().find(|(h, _)| *h == host).map(|(_, provider)| *provider)
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_known_oauth_hosts() {
        assert_eq!(known_oauth_provider("https://drive.google.com/file/d/abc"), Some("google"));
        assert_eq!(known_oauth_provider("https://example.com/file.pdf"), None);
    }

    #[test]
    fn sanitizes_path_unsafe_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "......etc.passwd");
        assert_eq!(sanitize_filename("Report (final).pdf"), "Report__final_.pdf");
    }
}
