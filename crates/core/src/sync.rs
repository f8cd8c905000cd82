use crate::config::Config;
use crate::error::SyncError;
use crate::models::{RemoteFile, SkippedRemoteFile, SyncReport};
use crate::traits::RemoteFileStore;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const GOOGLE_APPS_PREFIX: &str = "application/vnd.google-apps.";
const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType)";
const PAGE_SIZE: &str = "1000";

/// Interchange format and file extension for remote types that can only be
/// exported, `None` for files that are downloaded as stored.
pub fn export_format_for(mime_type: &str) -> Option<(&'static str, &'static str)> {
    let kind = mime_type.strip_prefix(GOOGLE_APPS_PREFIX)?;
    match kind {
        "document" => Some((
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            ".docx",
        )),
        "spreadsheet" => Some((
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ".xlsx",
        )),
        "presentation" => Some((
            "application/vnd.openxmlformats-officedocument.presentationml.presentation",
            ".pptx",
        )),
        "drawing" => Some(("image/png", ".png")),
        _ => None,
    }
}

/// Name the file gets in the staging directory.
pub fn local_name(file: &RemoteFile) -> Result<String, SyncError> {
    let name = file.name.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(SyncError::UnsafeName(file.name.clone()));
    }

    match export_format_for(&file.mime_type) {
        Some((_, extension)) if !name.to_ascii_lowercase().ends_with(extension) => {
            Ok(format!("{name}{extension}"))
        }
        _ => Ok(name.to_string()),
    }
}

async fn reset_staging_dir(dir: &Path) -> Result<(), SyncError> {
    let staging_error = |source| SyncError::Staging {
        path: dir.to_path_buf(),
        source,
    };

    fs::create_dir_all(dir).await.map_err(staging_error)?;
    let mut entries = fs::read_dir(dir).await.map_err(staging_error)?;
    while let Some(entry) = entries.next_entry().await.map_err(staging_error)? {
        let path = entry.path();
        let file_type = entry.file_type().await.map_err(staging_error)?;
        if file_type.is_dir() {
            fs::remove_dir_all(&path).await.map_err(staging_error)?;
        } else {
            fs::remove_file(&path).await.map_err(staging_error)?;
        }
        debug!(path = %path.display(), "removed stale staging entry");
    }
    Ok(())
}

/// Mirrors one mapped remote folder into its local staging directory.
pub struct FolderSync<R: RemoteFileStore> {
    config: Arc<Config>,
    remote: R,
}

impl<R: RemoteFileStore> FolderSync<R> {
    pub fn new(config: Arc<Config>, remote: R) -> Self {
        Self { config, remote }
    }

    pub async fn sync(&self, folder_id: &str) -> Result<SyncReport, SyncError> {
        let mapping = self.config.mapping_for_folder(folder_id)?;
        let staging_dir = self.config.staging_dir(mapping);

        // A failed listing leaves the previous staging contents in place.
        let files = self.remote.list(folder_id).await?;
        reset_staging_dir(&staging_dir).await?;
        info!(
            folder_id,
            staging_dir = %staging_dir.display(),
            files = files.len(),
            "remote folder listed"
        );

        let mut report = SyncReport {
            folder_id: folder_id.to_string(),
            staging_dir: staging_dir.clone(),
            written: Vec::new(),
            skipped: Vec::new(),
        };
        let mut seen = HashSet::new();

        for file in &files {
            let name = match local_name(file) {
                Ok(name) => name,
                Err(error) => {
                    warn!(file_id = %file.id, error = %error, "skipping remote file");
                    report.skipped.push(skipped(file, error.to_string()));
                    continue;
                }
            };
            if !seen.insert(name.clone()) {
                warn!(file_id = %file.id, name = %name, "duplicate remote file name");
                report
                    .skipped
                    .push(skipped(file, format!("another remote file is already staged as {name}")));
                continue;
            }

            let dest = staging_dir.join(&name);
            match self.remote.fetch(file, &dest).await {
                Ok(()) => {
                    debug!(file_id = %file.id, path = %dest.display(), "remote file staged");
                    report.written.push(dest);
                }
                Err(error) => {
                    warn!(file_id = %file.id, name = %name, error = %error, "remote fetch failed");
                    remove_partial(&dest).await;
                    report.skipped.push(skipped(file, error.to_string()));
                }
            }
        }

        info!(
            folder_id,
            written = report.written.len(),
            skipped = report.skipped.len(),
            "folder sync finished"
        );
        Ok(report)
    }
}

fn skipped(file: &RemoteFile, reason: String) -> SkippedRemoteFile {
    SkippedRemoteFile {
        id: file.id.clone(),
        name: file.name.clone(),
        reason,
    }
}

async fn remove_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed partial download"),
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => warn!(path = %path.display(), error = %error, "failed to remove partial download"),
    }
}

#[derive(Debug, Deserialize)]
struct FileListPage {
    #[serde(default)]
    files: Vec<RemoteFile>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

fn folder_query(folder_id: &str) -> String {
    let escaped = folder_id.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}' in parents and trashed = false")
}

/// Google Drive v3 REST client authenticated with a bearer access token.
pub struct GoogleDriveClient {
    client: Client,
    endpoint: String,
    token: String,
}

impl GoogleDriveClient {
    pub fn new(
        endpoint: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn file_url(&self, file_id: &str) -> String {
        format!("{}/files/{}", self.endpoint, file_id)
    }

    async fn list_page(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<FileListPage, SyncError> {
        let listing_error = |details: String| SyncError::Listing {
            folder_id: folder_id.to_string(),
            details,
        };

        let query = folder_query(folder_id);
        let mut request = self
            .client
            .get(format!("{}/files", self.endpoint))
            .bearer_auth(&self.token)
            .query(&[
                ("q", query.as_str()),
                ("fields", LIST_FIELDS),
                ("pageSize", PAGE_SIZE),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|error| listing_error(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(listing_error(format!("{status}: {}", body.trim())));
        }

        response
            .json::<FileListPage>()
            .await
            .map_err(|error| listing_error(error.to_string()))
    }
}

#[async_trait]
impl RemoteFileStore for GoogleDriveClient {
    async fn list(&self, folder_id: &str) -> Result<Vec<RemoteFile>, SyncError> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.list_page(folder_id, page_token.as_deref()).await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(files)
    }

    async fn fetch(&self, file: &RemoteFile, dest: &Path) -> Result<(), SyncError> {
        let request = match export_format_for(&file.mime_type) {
            Some((export_mime, _)) => self
                .client
                .get(format!("{}/export", self.file_url(&file.id)))
                .query(&[("mimeType", export_mime)]),
            None => self
                .client
                .get(self.file_url(&file.id))
                .query(&[("alt", "media"), ("supportsAllDrives", "true")]),
        };

        let mut response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Fetch {
                name: file.name.clone(),
                details: format!("{status}: {}", body.trim()),
            });
        }

        let mut output = fs::File::create(dest).await?;
        while let Some(bytes) = response.chunk().await? {
            output.write_all(&bytes).await?;
        }
        output.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use std::fs as std_fs;
    use tempfile::tempdir;

    const DOC: &str = "application/vnd.google-apps.document";

    struct FakeDrive {
        files: Vec<RemoteFile>,
        failing: HashSet<String>,
        listing_fails: bool,
    }

    impl FakeDrive {
        fn new(files: Vec<RemoteFile>) -> Self {
            Self {
                files,
                failing: HashSet::new(),
                listing_fails: false,
            }
        }
    }

    #[async_trait]
    impl RemoteFileStore for FakeDrive {
        async fn list(&self, folder_id: &str) -> Result<Vec<RemoteFile>, SyncError> {
            if self.listing_fails {
                return Err(SyncError::Listing {
                    folder_id: folder_id.to_string(),
                    details: "503 Service Unavailable".to_string(),
                });
            }
            Ok(self.files.clone())
        }

        async fn fetch(&self, file: &RemoteFile, dest: &Path) -> Result<(), SyncError> {
            fs::write(dest, format!("content of {}", file.id)).await?;
            if self.failing.contains(&file.id) {
                return Err(SyncError::Fetch {
                    name: file.name.clone(),
                    details: "connection reset".to_string(),
                });
            }
            Ok(())
        }
    }

    fn remote(id: &str, name: &str, mime_type: &str) -> RemoteFile {
        RemoteFile {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
        }
    }

    fn config_for(root: &Path) -> Arc<Config> {
        let content = format!(
            r#"
staging_root = '{}'

[store]
backend = "memory"

[[folders]]
folder_id = "folder-1"
local_dir = "docs"
collection = "docs"
"#,
            root.display()
        );
        Arc::new(Config::from_toml_str(&content).expect("test config is valid"))
    }

    fn staged_names(report: &SyncReport) -> Vec<String> {
        report
            .written
            .iter()
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()).map(String::from))
            .collect()
    }

    #[test]
    fn editable_types_map_to_interchange_formats() {
        assert_eq!(export_format_for(DOC).map(|(_, ext)| ext), Some(".docx"));
        assert_eq!(
            export_format_for("application/vnd.google-apps.spreadsheet").map(|(_, ext)| ext),
            Some(".xlsx")
        );
        assert_eq!(
            export_format_for("application/vnd.google-apps.drawing"),
            Some(("image/png", ".png"))
        );
        assert_eq!(export_format_for("application/vnd.google-apps.folder"), None);
        assert_eq!(export_format_for("application/pdf"), None);
    }

    #[test]
    fn local_names_gain_export_extension_once() -> Result<(), SyncError> {
        assert_eq!(local_name(&remote("1", "Handbook", DOC))?, "Handbook.docx");
        assert_eq!(local_name(&remote("2", "Handbook.DOCX", DOC))?, "Handbook.DOCX");
        assert_eq!(
            local_name(&remote("3", "report.pdf", "application/pdf"))?,
            "report.pdf"
        );

        for name in ["", " ", ".", "..", "../etc/passwd", "a\\b"] {
            assert!(matches!(
                local_name(&remote("4", name, "text/plain")),
                Err(SyncError::UnsafeName(_))
            ));
        }
        Ok(())
    }

    #[test]
    fn folder_query_escapes_quotes() {
        assert_eq!(
            folder_query("abc"),
            "'abc' in parents and trashed = false"
        );
        assert_eq!(
            folder_query("a'b"),
            "'a\\'b' in parents and trashed = false"
        );
    }

    #[tokio::test]
    async fn sync_replaces_staging_contents() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let staging = root.path().join("docs");
        std_fs::create_dir_all(staging.join("old-subdir"))?;
        std_fs::write(staging.join("stale.txt"), "stale")?;
        std_fs::write(staging.join("old-subdir").join("nested.txt"), "stale")?;

        let drive = FakeDrive::new(vec![
            remote("a", "Handbook", DOC),
            remote("b", "faq.txt", "text/plain"),
        ]);
        let sync = FolderSync::new(config_for(root.path()), drive);
        let report = sync.sync("folder-1").await?;

        assert_eq!(report.staging_dir, staging);
        assert_eq!(staged_names(&report), vec!["Handbook.docx", "faq.txt"]);
        assert!(report.skipped.is_empty());

        let mut on_disk: Vec<_> = std_fs::read_dir(&staging)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        on_disk.sort();
        assert_eq!(on_disk, vec!["Handbook.docx", "faq.txt"]);
        assert_eq!(
            std_fs::read_to_string(staging.join("faq.txt"))?,
            "content of b"
        );
        Ok(())
    }

    #[tokio::test]
    async fn failing_download_is_skipped_and_removed() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let mut drive = FakeDrive::new(vec![
            remote("a", "one.txt", "text/plain"),
            remote("b", "two.txt", "text/plain"),
            remote("c", "three.txt", "text/plain"),
        ]);
        drive.failing.insert("b".to_string());

        let sync = FolderSync::new(config_for(root.path()), drive);
        let report = sync.sync("folder-1").await?;

        assert_eq!(staged_names(&report), vec!["one.txt", "three.txt"]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].id, "b");
        assert!(!root.path().join("docs").join("two.txt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn unsafe_and_duplicate_names_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let drive = FakeDrive::new(vec![
            remote("a", "../escape.txt", "text/plain"),
            remote("b", "notes.txt", "text/plain"),
            remote("c", "notes.txt", "text/plain"),
        ]);

        let sync = FolderSync::new(config_for(root.path()), drive);
        let report = sync.sync("folder-1").await?;

        assert_eq!(staged_names(&report), vec!["notes.txt"]);
        let skipped: Vec<_> = report.skipped.iter().map(|file| file.id.as_str()).collect();
        assert_eq!(skipped, vec!["a", "c"]);
        assert!(!root.path().join("escape.txt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn listing_failure_keeps_previous_staging() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let staging = root.path().join("docs");
        std_fs::create_dir_all(&staging)?;
        std_fs::write(staging.join("previous.txt"), "still here")?;

        let mut drive = FakeDrive::new(Vec::new());
        drive.listing_fails = true;

        let sync = FolderSync::new(config_for(root.path()), drive);
        let result = sync.sync("folder-1").await;
        assert!(matches!(result, Err(SyncError::Listing { .. })));
        assert_eq!(
            std_fs::read_to_string(staging.join("previous.txt"))?,
            "still here"
        );
        Ok(())
    }

    #[tokio::test]
    async fn unmapped_folder_is_a_config_error() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let sync = FolderSync::new(config_for(root.path()), FakeDrive::new(Vec::new()));

        let result = sync.sync("not-mapped").await;
        assert!(matches!(
            result,
            Err(SyncError::Config(ConfigError::UnknownFolder(_)))
        ));
        Ok(())
    }

    #[test]
    fn drive_urls_drop_trailing_slash() -> Result<(), SyncError> {
        let client = GoogleDriveClient::new(
            "https://www.googleapis.com/drive/v3/",
            "token",
            Duration::from_secs(5),
        )?;
        assert_eq!(
            client.file_url("abc"),
            "https://www.googleapis.com/drive/v3/files/abc"
        );
        Ok(())
    }

    #[test]
    fn list_pages_parse_drive_payloads() -> Result<(), serde_json::Error> {
        let page: FileListPage = serde_json::from_str(
            r#"{"nextPageToken": "next", "files": [{"id": "1", "name": "a.pdf", "mimeType": "application/pdf"}]}"#,
        )?;
        assert_eq!(page.next_page_token.as_deref(), Some("next"));
        assert_eq!(page.files, vec![remote("1", "a.pdf", "application/pdf")]);

        let last: FileListPage = serde_json::from_str("{}")?;
        assert!(last.files.is_empty());
        assert!(last.next_page_token.is_none());
        Ok(())
    }
}
