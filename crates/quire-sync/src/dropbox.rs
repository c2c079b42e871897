//! Dropbox v2 HTTP API client.

use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quire_core::RemoteSection;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::RemoteError;
use crate::remote::{DeleteOutcome, MoveOutcome, RemoteEntry, RemoteStore};

/// Page size requested from `list_folder`.
const LIST_LIMIT: u32 = 2000;

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error_summary: String,
}

#[derive(Debug, Deserialize)]
struct ListFolderPage {
    entries: Vec<DropboxEntry>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = ".tag", rename_all = "lowercase")]
enum DropboxEntry {
    File {
        path_display: Option<String>,
        server_modified: DateTime<Utc>,
    },
    Folder {
        path_display: Option<String>,
    },
    #[serde(other)]
    Deleted,
}

#[derive(Debug, Deserialize)]
struct FileMetadata {
    server_modified: DateTime<Utc>,
}

/// Remote store backed by a Dropbox account.
///
/// Paths handed to the engine are relative to `root`; Dropbox paths are
/// absolute and compared case-insensitively by the server.
#[derive(Debug, Clone)]
pub struct DropboxStore {
    http: reqwest::Client,
    api_base: String,
    content_base: String,
    root: String,
}

impl DropboxStore {
    pub fn new(remote: &RemoteSection) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: remote.api_base.trim_end_matches('/').to_string(),
            content_base: remote.content_base.trim_end_matches('/').to_string(),
            root: remote.root.trim_matches('/').to_string(),
        }
    }

    /// Use a specific HTTP client.
    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Absolute Dropbox path for a root-relative path. The account root is `""`.
    fn remote_path(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        match (self.root.is_empty(), path.is_empty()) {
            (true, true) => String::new(),
            (true, false) => format!("/{path}"),
            (false, true) => format!("/{}", self.root),
            (false, false) => format!("/{}/{path}", self.root),
        }
    }

    /// Root-relative path for an absolute Dropbox path, `None` for the root
    /// itself or anything outside it.
    fn relative_path(&self, display: &str) -> Option<String> {
        let root = self.remote_path("");
        let head = display.get(..root.len())?;
        if !head.eq_ignore_ascii_case(&root) {
            return None;
        }
        let rest = display.get(root.len()..)?;
        if !root.is_empty() && !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        let rest = rest.trim_start_matches('/');
        (!rest.is_empty()).then(|| rest.to_string())
    }

    async fn rpc<T: DeserializeOwned>(
        &self,
        token: &str,
        endpoint: &str,
        body: &Value,
    ) -> Result<T, RemoteError> {
        tracing::debug!(endpoint, "dropbox rpc");
        let response = self
            .http
            .post(format!("{}/2/{endpoint}", self.api_base))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        let response = check(endpoint, response).await?;
        decode(endpoint, response).await
    }

    fn entry(&self, entry: DropboxEntry) -> Option<RemoteEntry> {
        match entry {
            DropboxEntry::File {
                path_display,
                server_modified,
            } => Some(RemoteEntry::file(
                self.relative_path(&path_display?)?,
                server_modified,
            )),
            DropboxEntry::Folder { path_display } => {
                Some(RemoteEntry::folder(self.relative_path(&path_display?)?))
            }
            DropboxEntry::Deleted => None,
        }
    }
}

#[async_trait]
impl RemoteStore for DropboxStore {
    async fn list_all(&self, token: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let first = self
            .rpc::<ListFolderPage>(
                token,
                "files/list_folder",
                &json!({
                    "path": self.remote_path(""),
                    "recursive": true,
                    "include_deleted": false,
                    "limit": LIST_LIMIT,
                }),
            )
            .await;

        let mut page = match first {
            // A root folder that was never created holds nothing yet.
            Err(RemoteError::Api { summary, .. }) if summary.starts_with("path/not_found") => {
                return Ok(Vec::new());
            }
            other => other?,
        };

        let mut entries = Vec::new();
        loop {
            entries.extend(page.entries.into_iter().filter_map(|e| self.entry(e)));
            if !page.has_more {
                break;
            }
            page = self
                .rpc(token, "files/list_folder/continue", &json!({ "cursor": page.cursor }))
                .await?;
        }

        tracing::debug!(entries = entries.len(), "listed remote tree");
        Ok(entries)
    }

    async fn read(&self, token: &str, path: &str) -> Result<String, RemoteError> {
        let endpoint = "files/download";
        tracing::debug!(endpoint, path, "dropbox content call");
        let response = self
            .http
            .post(format!("{}/2/{endpoint}", self.content_base))
            .bearer_auth(token)
            .header("Dropbox-API-Arg", api_arg(&json!({ "path": self.remote_path(path) })))
            .send()
            .await?;

        match check(endpoint, response).await {
            Ok(response) => Ok(response.text().await?),
            Err(RemoteError::Api { summary, .. }) if summary.starts_with("path/not_found") => {
                Err(RemoteError::NotFound {
                    path: path.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn write(
        &self,
        token: &str,
        path: &str,
        content: &str,
    ) -> Result<DateTime<Utc>, RemoteError> {
        let endpoint = "files/upload";
        tracing::debug!(endpoint, path, bytes = content.len(), "dropbox content call");
        let arg = json!({
            "path": self.remote_path(path),
            "mode": "overwrite",
            "autorename": false,
            "mute": true,
        });
        let response = self
            .http
            .post(format!("{}/2/{endpoint}", self.content_base))
            .bearer_auth(token)
            .header("Dropbox-API-Arg", api_arg(&arg))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content.to_string())
            .send()
            .await?;

        let response = check(endpoint, response).await?;
        let metadata: FileMetadata = decode(endpoint, response).await?;
        Ok(metadata.server_modified)
    }

    async fn move_path(
        &self,
        token: &str,
        from: &str,
        to: &str,
    ) -> Result<MoveOutcome, RemoteError> {
        let body = json!({
            "from_path": self.remote_path(from),
            "to_path": self.remote_path(to),
            "autorename": false,
        });

        match self.rpc::<Value>(token, "files/move_v2", &body).await {
            Ok(_) => Ok(MoveOutcome::Moved),
            Err(RemoteError::Api { summary, .. }) if summary.starts_with("from_lookup/not_found") => {
                Ok(MoveOutcome::SourceMissing)
            }
            Err(RemoteError::Api { summary, .. }) if summary.starts_with("to/conflict") => {
                tracing::debug!(%to, "move destination exists, replacing");
                self.delete(token, to).await?;
                self.rpc::<Value>(token, "files/move_v2", &body).await?;
                Ok(MoveOutcome::Replaced)
            }
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, token: &str, path: &str) -> Result<DeleteOutcome, RemoteError> {
        let body = json!({ "path": self.remote_path(path) });
        match self.rpc::<Value>(token, "files/delete_v2", &body).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(RemoteError::Api { summary, .. }) if summary.starts_with("path_lookup/not_found") => {
                Ok(DeleteOutcome::Missing)
            }
            Err(e) => Err(e),
        }
    }
}

/// Map non-success statuses to errors; 409 carries a structured summary.
async fn check(endpoint: &str, response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED => Err(RemoteError::Unauthorized),
        StatusCode::CONFLICT => {
            let summary = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error_summary)
                .unwrap_or(body);
            Err(RemoteError::Api {
                endpoint: endpoint.to_string(),
                summary,
            })
        }
        _ => Err(RemoteError::Http {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        }),
    }
}

async fn decode<T: DeserializeOwned>(
    endpoint: &str,
    response: reqwest::Response,
) -> Result<T, RemoteError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })
}

/// JSON for the `Dropbox-API-Arg` header, which must be pure ASCII.
fn api_arg(value: &Value) -> String {
    let mut out = String::new();
    for c in value.to_string().chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                let _ = write!(out, "\\u{unit:04x}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use mockito::Matcher;

    fn store(server: &mockito::ServerGuard, root: &str) -> DropboxStore {
        DropboxStore::new(&RemoteSection {
            api_base: server.url(),
            content_base: server.url(),
            root: root.to_string(),
        })
    }

    #[test]
    fn test_paths_map_under_root() {
        let section = RemoteSection {
            root: "/Apps/quire/".to_string(),
            ..RemoteSection::default()
        };
        let dropbox = DropboxStore::new(&section);

        assert_eq!(dropbox.remote_path(""), "/Apps/quire");
        assert_eq!(dropbox.remote_path("Work/Foo.md"), "/Apps/quire/Work/Foo.md");
        assert_eq!(
            dropbox.relative_path("/apps/Quire/Work/Foo.md").as_deref(),
            Some("Work/Foo.md")
        );
        assert_eq!(dropbox.relative_path("/Apps/quire"), None);
        assert_eq!(dropbox.relative_path("/Apps/quirefoo/x.md"), None);

        let at_root = DropboxStore::new(&RemoteSection::default());
        assert_eq!(at_root.remote_path(""), "");
        assert_eq!(at_root.remote_path("Foo.md"), "/Foo.md");
        assert_eq!(at_root.relative_path("/Foo.md").as_deref(), Some("Foo.md"));
    }

    #[test]
    fn test_api_arg_escapes_non_ascii() {
        let arg = api_arg(&json!({ "path": "/Café 🎉.md" }));
        assert!(arg.is_ascii());
        assert_eq!(arg, r#"{"path":"/Caf\u00e9 \ud83c\udf89.md"}"#);
    }

    #[tokio::test]
    async fn test_list_all_follows_cursor() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("POST", "/2/files/list_folder")
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::PartialJson(json!({ "path": "", "recursive": true })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "entries": [
                        { ".tag": "folder", "path_display": "/Work", "id": "id:1" },
                        {
                            ".tag": "file",
                            "path_display": "/Work/Foo.md",
                            "server_modified": "2024-05-01T10:00:00Z",
                            "size": 5
                        }
                    ],
                    "cursor": "c1",
                    "has_more": true
                })
                .to_string(),
            )
            .create_async()
            .await;
        let second = server
            .mock("POST", "/2/files/list_folder/continue")
            .match_body(Matcher::Json(json!({ "cursor": "c1" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "entries": [
                        { ".tag": "deleted", "path_display": "/Old.md" },
                        {
                            ".tag": "file",
                            "path_display": "/Bar.md",
                            "server_modified": "2024-05-02T10:00:00Z"
                        }
                    ],
                    "cursor": "c2",
                    "has_more": false
                })
                .to_string(),
            )
            .create_async()
            .await;

        let entries = store(&server, "").list_all("tok").await.unwrap();

        first.assert_async().await;
        second.assert_async().await;
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["Work", "Work/Foo.md", "Bar.md"]);
        assert!(entries[0].is_folder());
    }

    #[tokio::test]
    async fn test_list_all_missing_root_is_empty() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/2/files/list_folder")
            .with_status(409)
            .with_body(r#"{"error_summary":"path/not_found/..","error":{".tag":"path"}}"#)
            .create_async()
            .await;

        let entries = store(&server, "Notes").list_all("tok").await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/2/files/list_folder")
            .with_status(401)
            .with_body(r#"{"error_summary":"expired_access_token/"}"#)
            .create_async()
            .await;

        let err = store(&server, "").list_all("tok").await.unwrap_err();
        assert!(matches!(err, RemoteError::Unauthorized));
    }

    #[tokio::test]
    async fn test_upload_overwrites_and_returns_server_time() {
        let mut server = mockito::Server::new_async().await;
        let upload = server
            .mock("POST", "/2/files/upload")
            .match_header(
                "dropbox-api-arg",
                Matcher::AllOf(vec![
                    Matcher::Regex(r#""path":"/Notes/Foo.md""#.to_string()),
                    Matcher::Regex(r#""mode":"overwrite""#.to_string()),
                ]),
            )
            .match_body("hello")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"name":"Foo.md","server_modified":"2024-05-01T10:00:00Z"}"#)
            .create_async()
            .await;

        let modified = store(&server, "Notes")
            .write("tok", "Foo.md", "hello")
            .await
            .unwrap();

        upload.assert_async().await;
        assert_eq!(modified.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/2/files/download")
            .with_status(409)
            .with_body(r#"{"error_summary":"path/not_found/.."}"#)
            .create_async()
            .await;

        let err = store(&server, "").read("tok", "Gone.md").await.unwrap_err();
        assert!(matches!(err, RemoteError::NotFound { path } if path == "Gone.md"));
    }

    #[tokio::test]
    async fn test_move_missing_source_is_skipped() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/2/files/move_v2")
            .with_status(409)
            .with_body(r#"{"error_summary":"from_lookup/not_found/.."}"#)
            .create_async()
            .await;

        let outcome = store(&server, "").move_path("tok", "a.md", "b.md").await.unwrap();
        assert_eq!(outcome, MoveOutcome::SourceMissing);
    }

    #[tokio::test]
    async fn test_move_conflict_deletes_destination_then_retries() {
        let mut server = mockito::Server::new_async().await;
        // Both attempts conflict here, so the retry surfaces the second error.
        let moves = server
            .mock("POST", "/2/files/move_v2")
            .match_body(Matcher::PartialJson(json!({
                "from_path": "/a.md",
                "to_path": "/b.md"
            })))
            .with_status(409)
            .with_body(r#"{"error_summary":"to/conflict/file/.."}"#)
            .expect(2)
            .create_async()
            .await;
        let delete = server
            .mock("POST", "/2/files/delete_v2")
            .match_body(Matcher::Json(json!({ "path": "/b.md" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"metadata":{".tag":"file","name":"b.md"}}"#)
            .expect(1)
            .create_async()
            .await;

        let err = store(&server, "")
            .move_path("tok", "a.md", "b.md")
            .await
            .unwrap_err();

        moves.assert_async().await;
        delete.assert_async().await;
        assert!(matches!(err, RemoteError::Api { summary, .. } if summary.starts_with("to/conflict")));
    }

    #[tokio::test]
    async fn test_delete_missing_path() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/2/files/delete_v2")
            .with_status(409)
            .with_body(r#"{"error_summary":"path_lookup/not_found/.."}"#)
            .create_async()
            .await;

        let outcome = store(&server, "").delete("tok", "Gone.md").await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Missing);
    }
}
