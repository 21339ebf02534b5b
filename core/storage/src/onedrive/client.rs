//! OneDrive (Microsoft Graph) drive API client.

use bytes::Bytes;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use url::{Origin, Url};

use drivelink_common::{DrivePath, Error, Result};

use super::auth::TokenSource;
use super::model::{
    ChildrenPage, ConflictBehavior, CreateFolderRequest, DriveItem, FileItem, FolderItem,
    FolderMarker, RenameRequest,
};

/// Graph API base for the signed-in user's drive.
pub const GRAPH_DRIVE_BASE: &str = "https://graph.microsoft.com/v1.0/me/drive/";

/// Which top-level folder a path is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveRoot {
    /// The user's whole drive.
    #[default]
    Drive,
    /// The application's private folder (`/Apps/<app name>`).
    AppRoot,
}

impl DriveRoot {
    /// Endpoint segment addressing this root.
    pub fn selector(&self) -> &'static str {
        match self {
            DriveRoot::Drive => "root",
            DriveRoot::AppRoot => "special/approot",
        }
    }

    /// Endpoint of the item at `path`.
    pub fn item_endpoint(&self, path: &DrivePath) -> String {
        if path.is_root() {
            self.selector().to_string()
        } else {
            format!("{}:/{}", self.selector(), path.encoded())
        }
    }

    /// Endpoint of the child collection of the folder at `path`.
    pub fn children_endpoint(&self, path: &DrivePath) -> String {
        if path.is_root() {
            format!("{}/children", self.selector())
        } else {
            format!("{}:/{}:/children", self.selector(), path.encoded())
        }
    }

    /// Endpoint receiving the content of the file at `path`.
    pub fn content_endpoint(&self, path: &DrivePath) -> String {
        format!("{}:/{}:/content", self.selector(), path.encoded())
    }
}

/// Endpoint of an item addressed by its server-assigned identifier.
pub fn id_endpoint(id: &str) -> String {
    format!("items/{}", id)
}

/// Drive client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Base URL every endpoint is appended to.
    pub api_base: String,
    pub user_agent: String,
    /// Whole-request timeout; `None` keeps the transport default.
    pub timeout_secs: Option<u64>,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base: GRAPH_DRIVE_BASE.to_string(),
            user_agent: format!("drivelink/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: None,
        }
    }
}

/// Graph error envelope: `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// OneDrive API client.
///
/// Every call fetches a token from the [`TokenSource`], sends exactly one
/// request and maps the response onto the common [`Error`]. Nothing is
/// retried.
pub struct DriveClient {
    http: Client,
    tokens: Arc<dyn TokenSource>,
    base: String,
    origin: Origin,
}

impl DriveClient {
    /// Create a new Drive client.
    ///
    /// # Errors
    /// - `InvalidInput` if the API base is not an absolute URL
    /// - The HTTP client could not be built
    pub fn new(config: DriveConfig, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let mut builder = Client::builder().user_agent(config.user_agent.clone());
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        let mut base = config.api_base;
        if !base.ends_with('/') {
            base.push('/');
        }
        let origin = Url::parse(&base)
            .map_err(|e| Error::InvalidInput(format!("Invalid API base '{}': {}", base, e)))?
            .origin();

        Ok(Self {
            http,
            tokens,
            base,
            origin,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base, endpoint)
    }

    /// Start an authenticated request against an absolute URL.
    async fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let token = self.tokens.access_token().await?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to {}: {}", action, e)))?;

        debug!(
            action,
            status = response.status().as_u16(),
            url = %response.url(),
            "Drive API response"
        );

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::error_from(response, action).await)
        }
    }

    /// Map a non-success response onto the common error type.
    async fn error_from(response: Response, action: &str) -> Error {
        let status = response.status();
        let reason = status.canonical_reason().unwrap_or("Unknown status");
        let body = response.text().await.unwrap_or_default();

        let detail = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .map(|envelope| envelope.error);
        let message = detail
            .as_ref()
            .and_then(|d| d.message.clone())
            .unwrap_or_else(|| reason.to_string());

        match status {
            StatusCode::NOT_FOUND => Error::NotFound(format!("Failed to {}: {}", action, message)),
            StatusCode::CONFLICT => {
                warn!(
                    action,
                    code = detail.as_ref().and_then(|d| d.code.as_deref()).unwrap_or(""),
                    "Drive API reported a conflict"
                );
                Error::Conflict(message)
            }
            StatusCode::UNAUTHORIZED => Error::Authentication(message),
            _ => Error::Api {
                status: status.as_u16(),
                message,
            },
        }
    }

    async fn read_item(response: Response) -> Result<DriveItem> {
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("Failed to read response: {}", e)))?;
        DriveItem::from_json(&body)
    }

    /// Check whether the application folder exists.
    ///
    /// # Errors
    /// - Any failure other than the folder being absent
    pub async fn app_root_exists(&self) -> Result<bool> {
        let url = self.url(DriveRoot::AppRoot.selector());
        let request = self.request(Method::GET, &url).await?;

        match self.send(request, "get app root").await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Get the item at `path`, whichever variant it is.
    pub async fn get_item(&self, root: DriveRoot, path: &str) -> Result<DriveItem> {
        let path = DrivePath::parse(path)?;
        let url = self.url(&root.item_endpoint(&path));
        let request = self.request(Method::GET, &url).await?;

        let response = self.send(request, "get item").await?;
        Self::read_item(response).await
    }

    /// Get the file at `path`.
    ///
    /// # Errors
    /// - `NotFound` if nothing exists at `path`
    /// - `TypeMismatch` if `path` is a folder
    pub async fn get_file(&self, root: DriveRoot, path: &str) -> Result<FileItem> {
        self.get_item(root, path).await?.into_file()
    }

    /// Get the folder at `path`.
    ///
    /// # Errors
    /// - `NotFound` if nothing exists at `path`
    /// - `TypeMismatch` if `path` is a file
    pub async fn get_folder(&self, root: DriveRoot, path: &str) -> Result<FolderItem> {
        self.get_item(root, path).await?.into_folder()
    }

    /// List the children of the folder at `path`, following every page.
    ///
    /// # Errors
    /// - `Serialization` if a page links to a host other than the API base
    pub async fn list_children(&self, root: DriveRoot, path: &str) -> Result<Vec<DriveItem>> {
        let path = DrivePath::parse(path)?;
        let mut url = self.url(&root.children_endpoint(&path));
        let mut items = Vec::new();

        loop {
            let request = self.request(Method::GET, &url).await?;
            let response = self.send(request, "list children").await?;
            let page: ChildrenPage = response
                .json()
                .await
                .map_err(|e| Error::Serialization(format!("Invalid children page: {}", e)))?;

            items.extend(page.value);

            match page.next_link {
                Some(next) => url = self.check_next_link(next)?,
                None => break,
            }
        }

        Ok(items)
    }

    /// Upload `data` as the content of the file at `path`.
    ///
    /// # Errors
    /// - `InvalidInput` if `path` is the root
    /// - `Conflict` if the server rejects the name
    pub async fn upload_file(
        &self,
        root: DriveRoot,
        path: &str,
        data: impl Into<Bytes>,
    ) -> Result<FileItem> {
        let data: Bytes = data.into();
        let len = data.len() as u64;
        self.put_content(root, path, reqwest::Body::from(data), len)
            .await
    }

    /// Upload `len` bytes read from `reader` as the content of the file at `path`.
    ///
    /// The reader is consumed whether or not the upload succeeds.
    pub async fn upload_stream<R>(
        &self,
        root: DriveRoot,
        path: &str,
        reader: R,
        len: u64,
    ) -> Result<FileItem>
    where
        R: AsyncRead + Send + Sync + 'static,
    {
        let body = reqwest::Body::wrap_stream(ReaderStream::new(reader));
        self.put_content(root, path, body, len).await
    }

    async fn put_content(
        &self,
        root: DriveRoot,
        path: &str,
        body: reqwest::Body,
        len: u64,
    ) -> Result<FileItem> {
        let path = DrivePath::parse(path)?;
        if path.is_root() {
            return Err(Error::InvalidInput(
                "Upload path must name a file".to_string(),
            ));
        }

        let url = self.url(&root.content_endpoint(&path));
        let request = self
            .request(Method::PUT, &url)
            .await?
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, len)
            .body(body);

        let response = self.send(request, "upload file").await?;
        Self::read_item(response).await?.into_file()
    }

    /// Delete a file or folder by ID.
    pub async fn delete_item(&self, id: &str) -> Result<()> {
        let url = self.url(&id_endpoint(Self::check_id(id)?));
        let request = self.request(Method::DELETE, &url).await?;

        self.send(request, "delete item").await?;
        Ok(())
    }

    pub async fn delete_file(&self, id: &str) -> Result<()> {
        self.delete_item(id).await
    }

    pub async fn delete_folder(&self, id: &str) -> Result<()> {
        self.delete_item(id).await
    }

    /// Rename a file or folder by ID.
    ///
    /// # Errors
    /// - `Conflict` if a sibling already has `new_name`
    pub async fn rename_item(&self, id: &str, new_name: &str) -> Result<()> {
        if new_name.trim().is_empty() {
            return Err(Error::InvalidInput("New name cannot be empty".to_string()));
        }

        let url = self.url(&id_endpoint(Self::check_id(id)?));
        let request = self
            .request(Method::PATCH, &url)
            .await?
            .json(&RenameRequest { name: new_name });

        self.send(request, "rename item").await?;
        Ok(())
    }

    pub async fn rename_file(&self, id: &str, new_name: &str) -> Result<()> {
        self.rename_item(id, new_name).await
    }

    pub async fn rename_folder(&self, id: &str, new_name: &str) -> Result<()> {
        self.rename_item(id, new_name).await
    }

    /// Create a folder named `name` directly under `root`.
    ///
    /// # Errors
    /// - `Conflict` if the name is taken and `conflict_behavior` is `Fail`
    pub async fn create_folder(
        &self,
        root: DriveRoot,
        name: &str,
        conflict_behavior: ConflictBehavior,
    ) -> Result<FolderItem> {
        self.create_folder_in(root, "", name, conflict_behavior)
            .await
    }

    /// Create a folder named `name` inside the folder at `parent`.
    pub async fn create_folder_in(
        &self,
        root: DriveRoot,
        parent: &str,
        name: &str,
        conflict_behavior: ConflictBehavior,
    ) -> Result<FolderItem> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("Folder name cannot be empty".to_string()));
        }

        let parent = DrivePath::parse(parent)?;
        let target = parent.join(name)?;
        debug!(path = %target, conflict = %conflict_behavior, "Creating folder");

        let url = self.url(&root.children_endpoint(&parent));
        let body = CreateFolderRequest {
            name,
            folder: FolderMarker {},
            conflict_behavior,
        };
        let request = self.request(Method::POST, &url).await?.json(&body);

        let response = self.send(request, "create folder").await?;
        Self::read_item(response).await?.into_folder()
    }

    /// Follow a next-page link only when it stays on the API host, since the
    /// bearer token goes with it.
    fn check_next_link(&self, next: String) -> Result<String> {
        let same_origin = Url::parse(&next)
            .map(|url| url.origin() == self.origin)
            .unwrap_or(false);
        if !same_origin {
            return Err(Error::Serialization(format!(
                "Next page link leaves the API host: {}",
                next
            )));
        }
        Ok(next)
    }

    /// Item IDs are spliced into `items/{id}` as a single opaque segment.
    fn check_id(id: &str) -> Result<&str> {
        let id = id.trim();
        if id.is_empty() {
            return Err(Error::InvalidInput("Item ID cannot be empty".to_string()));
        }
        let opaque = id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '!' | '-' | '_' | '.' | '~'));
        if !opaque || id == "." || id == ".." {
            return Err(Error::InvalidInput(format!("Invalid item ID: {}", id)));
        }
        Ok(id)
    }
}
