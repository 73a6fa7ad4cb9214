//! Google Drive `appDataFolder` backend.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::{RemoteDocumentStore, RemoteFileInfo};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::util::parse_api_error;

const APP_DATA_FOLDER: &str = "appDataFolder";
const LIST_FIELDS: &str = "files(id,name,modifiedTime)";

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteFileInfo>,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

/// Documents stored as files in the user's private app-data space.
///
/// File ids are cached per name and evicted when the API answers 404.
pub struct DriveDocumentStore {
    api_base: String,
    upload_base: String,
    client: Client,
    file_ids: Mutex<HashMap<String, String>>,
}

impl DriveDocumentStore {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        Ok(Self::with_client(config, Client::builder().build()?))
    }

    #[must_use]
    pub fn with_client(config: &SyncConfig, client: Client) -> Self {
        Self {
            api_base: config.drive_api_base.trim_end_matches('/').to_string(),
            upload_base: config.drive_upload_base.trim_end_matches('/').to_string(),
            client,
            file_ids: Mutex::new(HashMap::new()),
        }
    }

    fn cached_id(&self, name: &str) -> Option<String> {
        self.file_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn remember(&self, name: &str, id: &str) {
        self.file_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), id.to_string());
    }

    fn evict(&self, name: &str) {
        self.file_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    async fn lookup_id(&self, token: &str, name: &str) -> SyncResult<Option<String>> {
        if let Some(id) = self.cached_id(name) {
            return Ok(Some(id));
        }

        let files = self.list(token, Some(&name_query(name))).await?;
        let Some(file) = files.into_iter().find(|file| file.name == name) else {
            return Ok(None);
        };
        self.remember(name, &file.id);
        Ok(Some(file.id))
    }

    async fn download(&self, token: &str, id: &str) -> SyncResult<Option<Value>> {
        let response = self
            .client
            .get(format!("{}/files/{id}", self.api_base))
            .query(&[("alt", "media")])
            .bearer_auth(token)
            .send()
            .await?;
        read_document(response).await
    }

    /// Replace file content. Returns `false` when the file no longer exists.
    async fn upload(&self, token: &str, id: &str, content: &Value) -> SyncResult<bool> {
        let response = self
            .client
            .patch(format!("{}/files/{id}", self.upload_base))
            .query(&[("uploadType", "media")])
            .bearer_auth(token)
            .json(content)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(response).await?;
        Ok(true)
    }

    /// Create the file with its content in a single multipart request.
    async fn create(&self, token: &str, name: &str, content: &Value) -> SyncResult<()> {
        let metadata = serde_json::json!({
            "name": name,
            "parents": [APP_DATA_FOLDER],
            "mimeType": "application/json",
        });
        let boundary = format!("precis-{}", Uuid::now_v7().simple());
        let body = multipart_body(&boundary, &metadata, content)?;
        let response = self
            .client
            .post(format!("{}/files", self.upload_base))
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .bearer_auth(token)
            .header(
                CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await?;
        let created = check_status(response).await?.json::<CreatedFile>().await?;
        tracing::debug!(document = name, "Created remote document");
        self.remember(name, &created.id);
        Ok(())
    }
}

#[async_trait]
impl RemoteDocumentStore for DriveDocumentStore {
    async fn get(&self, token: &str, name: &str) -> SyncResult<Option<Value>> {
        let Some(id) = self.lookup_id(token, name).await? else {
            return Ok(None);
        };
        if let Some(content) = self.download(token, &id).await? {
            return Ok(Some(content));
        }

        // Stale cached id or an empty file: look the name up once more.
        self.evict(name);
        match self.lookup_id(token, name).await? {
            Some(fresh) if fresh != id => self.download(token, &fresh).await,
            _ => {
                self.evict(name);
                Ok(None)
            }
        }
    }

    async fn save(&self, token: &str, name: &str, content: &Value) -> SyncResult<()> {
        if let Some(id) = self.lookup_id(token, name).await? {
            if self.upload(token, &id, content).await? {
                return Ok(());
            }
            self.evict(name);
        }

        self.create(token, name, content).await
    }

    async fn delete(&self, token: &str, name: &str) -> SyncResult<()> {
        let Some(id) = self.lookup_id(token, name).await? else {
            return Ok(());
        };
        let response = self
            .client
            .delete(format!("{}/files/{id}", self.api_base))
            .bearer_auth(token)
            .send()
            .await?;
        self.evict(name);
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response).await?;
        Ok(())
    }

    async fn list(&self, token: &str, query: Option<&str>) -> SyncResult<Vec<RemoteFileInfo>> {
        let mut request = self
            .client
            .get(format!("{}/files", self.api_base))
            .query(&[("spaces", APP_DATA_FOLDER), ("fields", LIST_FIELDS)])
            .bearer_auth(token);
        if let Some(query) = query {
            request = request.query(&[("q", query)]);
        }
        let list = check_status(request.send().await?)
            .await?
            .json::<FileList>()
            .await?;
        Ok(list.files)
    }
}

async fn check_status(response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(SyncError::TokenExpired);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::Network(parse_api_error(status, &body)))
}

/// 404 and an empty body both mean there is no document yet.
async fn read_document(response: Response) -> SyncResult<Option<Value>> {
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let body = check_status(response).await?.bytes().await?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(&body)?))
}

fn multipart_body(boundary: &str, metadata: &Value, content: &Value) -> SyncResult<Vec<u8>> {
    let mut body = Vec::new();
    for part in [metadata, content] {
        body.extend_from_slice(
            format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n")
                .as_bytes(),
        );
        body.extend_from_slice(&serde_json::to_vec(part)?);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    Ok(body)
}

fn name_query(name: &str) -> String {
    format!(
        "name = '{}' and trashed = false",
        name.replace('\\', "\\\\").replace('\'', "\\'")
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    const SETTINGS: &str = "precis-settings.json";

    fn response(status: u16, body: &'static str) -> Response {
        Response::from(
            http::Response::builder()
                .status(status)
                .body(body)
                .unwrap(),
        )
    }

    struct Recorded {
        line: String,
        body: String,
    }

    /// Minimal HTTP/1.1 stand-in for the Drive API. Each connection serves one
    /// request answered by `route(method, target)`.
    struct FakeDrive {
        base: String,
        requests: Arc<Mutex<Vec<Recorded>>>,
    }

    impl FakeDrive {
        async fn start<F>(route: F) -> Self
        where
            F: Fn(&str, &str) -> (u16, String) + Send + Sync + 'static,
        {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            let requests = Arc::new(Mutex::new(Vec::new()));
            let log = Arc::clone(&requests);

            tokio::spawn(async move {
                while let Ok((mut socket, _)) = listener.accept().await {
                    let (method, target, body) = read_request(&mut socket).await;
                    let (status, reply) = route(&method, &target);
                    log.lock().unwrap().push(Recorded {
                        line: format!("{method} {target}"),
                        body,
                    });
                    let raw = format!(
                        "HTTP/1.1 {status} Fake\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{reply}",
                        reply.len()
                    );
                    let _ = socket.write_all(raw.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            });

            Self { base, requests }
        }

        fn store(&self) -> DriveDocumentStore {
            let mut config = SyncConfig::new("client", "https://proxy.example.com");
            config.drive_api_base = format!("{}/drive/v3", self.base);
            config.drive_upload_base = format!("{}/upload/drive/v3", self.base);
            let client = Client::builder().no_proxy().build().unwrap();
            DriveDocumentStore::with_client(&config, client)
        }

        fn lines(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|request| request.line.clone())
                .collect()
        }
    }

    async fn read_request(socket: &mut TcpStream) -> (String, String, String) {
        let mut buffer = Vec::new();
        let mut chunk = [0_u8; 4096];
        loop {
            let read = socket.read(&mut chunk).await.unwrap();
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
            let text = String::from_utf8_lossy(&buffer);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buffer.len() >= header_end + 4 + length {
                    break;
                }
            }
        }

        let text = String::from_utf8_lossy(&buffer).to_string();
        let (head, body) = text.split_once("\r\n\r\n").unwrap_or((&text, ""));
        let mut parts = head.lines().next().unwrap_or_default().split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let target = parts.next().unwrap_or_default().to_string();
        (method, target, body.to_string())
    }

    #[test]
    fn name_query_escapes_quotes() {
        assert_eq!(
            name_query("precis-history.json"),
            "name = 'precis-history.json' and trashed = false"
        );
        assert_eq!(name_query("it's"), "name = 'it\\'s' and trashed = false");
    }

    #[test]
    fn file_list_parses_drive_payload() {
        let body = r#"{"files":[{"id":"f1","name":"precis-settings.json","modifiedTime":"2024-01-01T00:00:00.000Z"}]}"#;
        let list: FileList = serde_json::from_str(body).unwrap();
        assert_eq!(list.files.len(), 1);
        assert_eq!(list.files[0].id, "f1");
        assert!(list.files[0].modified_time.is_some());

        let empty: FileList = serde_json::from_str("{}").unwrap();
        assert!(empty.files.is_empty());
    }

    #[test]
    fn id_cache_round_trip() {
        let store = DriveDocumentStore::with_client(
            &SyncConfig::new("client", "https://proxy.example.com"),
            Client::new(),
        );
        store.remember("precis-library.json", "abc");
        assert_eq!(store.cached_id("precis-library.json").as_deref(), Some("abc"));
        store.evict("precis-library.json");
        assert_eq!(store.cached_id("precis-library.json"), None);
    }

    #[test]
    fn multipart_body_carries_metadata_and_content() {
        let metadata = serde_json::json!({ "name": SETTINGS });
        let content = serde_json::json!({ "version": 1 });
        let body = String::from_utf8(multipart_body("b0", &metadata, &content).unwrap()).unwrap();

        assert!(body.starts_with("--b0\r\nContent-Type: application/json"));
        assert!(body.contains(r#"{"name":"precis-settings.json"}"#));
        assert!(body.contains(r#"{"version":1}"#));
        assert!(body.ends_with("\r\n--b0--\r\n"));
    }

    #[tokio::test]
    async fn unauthorized_maps_to_token_expired() {
        let result = check_status(response(401, "")).await;
        assert!(matches!(result, Err(SyncError::TokenExpired)));
    }

    #[tokio::test]
    async fn other_failures_map_to_network() {
        let result = check_status(response(404, "not here")).await;
        assert!(matches!(result, Err(SyncError::Network(ref message)) if message.contains("404")));

        let result = check_status(response(500, "boom")).await;
        assert!(matches!(result, Err(SyncError::Network(ref message)) if message.contains("500")));

        assert!(check_status(response(200, "{}")).await.is_ok());
    }

    #[tokio::test]
    async fn missing_or_empty_download_reads_as_absent() {
        assert_eq!(read_document(response(404, "")).await.unwrap(), None);
        assert_eq!(read_document(response(200, "")).await.unwrap(), None);
        assert_eq!(read_document(response(200, " \n")).await.unwrap(), None);
        assert_eq!(
            read_document(response(200, r#"{"version":1}"#)).await.unwrap(),
            Some(serde_json::json!({ "version": 1 }))
        );
        assert!(matches!(
            read_document(response(401, "")).await,
            Err(SyncError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn new_document_is_created_in_one_request() {
        let drive = FakeDrive::start(|method, target| match method {
            "GET" if target.starts_with("/drive/v3/files?") => {
                (200, r#"{"files":[]}"#.to_string())
            }
            "POST" => (200, r#"{"id":"f1"}"#.to_string()),
            _ => (500, String::new()),
        })
        .await;
        let store = drive.store();

        store
            .save("token", SETTINGS, &serde_json::json!({ "version": 1 }))
            .await
            .unwrap();

        let lines = drive.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("POST /upload/drive/v3/files?uploadType=multipart"));
        let body = drive.requests.lock().unwrap()[1].body.clone();
        assert!(body.contains(SETTINGS));
        assert!(body.contains(r#"{"version":1}"#));
        assert_eq!(store.cached_id(SETTINGS).as_deref(), Some("f1"));
    }

    #[tokio::test]
    async fn failed_create_leaves_nothing_behind() {
        let drive = FakeDrive::start(|method, target| match method {
            "GET" if target.starts_with("/drive/v3/files?") => {
                (200, r#"{"files":[]}"#.to_string())
            }
            "POST" => (503, "backend unavailable".to_string()),
            _ => (500, String::new()),
        })
        .await;
        let store = drive.store();

        let result = store
            .save("token", SETTINGS, &serde_json::json!({ "version": 1 }))
            .await;

        assert!(matches!(result, Err(SyncError::Network(_))));
        assert!(drive.lines().iter().all(|line| !line.starts_with("PATCH")));
        assert_eq!(store.cached_id(SETTINGS), None);
    }

    #[tokio::test]
    async fn empty_remote_file_reads_as_absent() {
        let drive = FakeDrive::start(|method, target| match method {
            "GET" if target.starts_with("/drive/v3/files?") => (
                200,
                r#"{"files":[{"id":"f1","name":"precis-settings.json"}]}"#.to_string(),
            ),
            "GET" if target.starts_with("/drive/v3/files/f1?alt=media") => (200, String::new()),
            _ => (500, String::new()),
        })
        .await;

        assert_eq!(drive.store().get("token", SETTINGS).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unauthorized_download_surfaces_token_expired() {
        let drive = FakeDrive::start(|method, target| match method {
            "GET" if target.starts_with("/drive/v3/files?") => (
                200,
                r#"{"files":[{"id":"f1","name":"precis-settings.json"}]}"#.to_string(),
            ),
            _ => (401, String::new()),
        })
        .await;

        let result = drive.store().get("token", SETTINGS).await;
        assert!(matches!(result, Err(SyncError::TokenExpired)));
    }
}
