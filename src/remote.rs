//! Remote media-library service client
//!
//! The orchestration code only depends on the [`RemoteLibrary`] trait;
//! [`HttpRemote`] is the production implementation speaking the service's
//! JSON + multipart protocol over blocking reqwest.

use reqwest::blocking::multipart;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{TaskError, TaskErrorKind, UploadError};
use crate::models::{LocalFile, RemoteItem};

/// Client identification sent with every request
pub const CLIENT_NAME: &str = "media-uploader";
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default JSON API endpoint; override with `--api-url`
pub const DEFAULT_API_URL: &str = "https://api.medialib.example/v1/json";
/// Default upload endpoint; override with `--upload-url`
pub const DEFAULT_UPLOAD_URL: &str = "https://upload.medialib.example/v1/upload";

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Session credentials returned by a successful login
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub token: String,
}

/// Operations the uploader needs from the remote service
pub trait RemoteLibrary: Send + Sync {
    /// Exchange the login token for a session. Must be called before any
    /// other operation.
    fn authenticate(&self) -> Result<Session, UploadError>;

    /// File extensions the service accepts (lowercase, without dot).
    /// An empty set means the service did not advertise any restriction.
    fn supported_extensions(&self) -> Result<HashSet<String>, UploadError>;

    /// Snapshot of the library's current inventory
    fn list_items(&self) -> Result<Vec<RemoteItem>, UploadError>;

    /// Stream one file's bytes to the service; returns the remote id
    fn upload(&self, file: &LocalFile) -> Result<String, TaskError>;

    /// Attach a tag to an item. Idempotent: re-tagging is a no-op.
    fn add_tag(&self, remote_id: &str, tag: &str) -> Result<(), TaskError>;

    /// Append an item to a playlist. Idempotent: an item already in the
    /// playlist is not duplicated.
    fn add_to_playlist(&self, remote_id: &str, playlist: &str) -> Result<(), TaskError>;
}

/// Map an HTTP status to the task error taxonomy
fn classify_status(status: StatusCode) -> TaskErrorKind {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        TaskErrorKind::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        TaskErrorKind::Transient
    } else {
        TaskErrorKind::Permanent
    }
}

/// Transport-level failures (DNS, connect, timeout) are retryable
fn transport_error(err: reqwest::Error, path: Option<&Path>) -> TaskError {
    TaskError::transient(path.map(Path::to_path_buf), err.to_string())
}

/// Blocking HTTP implementation of [`RemoteLibrary`]
pub struct HttpRemote {
    client: Client,
    api_url: String,
    upload_url: String,
    login_token: String,
    session: Mutex<Option<Session>>,
}

impl HttpRemote {
    /// Build a client for the given endpoints and login token
    pub fn new(
        api_url: impl Into<String>,
        upload_url: impl Into<String>,
        login_token: impl Into<String>,
    ) -> Result<Self, UploadError> {
        let client = Client::builder()
            .user_agent(format!("{}/{}", CLIENT_NAME, VERSION))
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .map_err(|e| UploadError::Remote(e.to_string()))?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            upload_url: upload_url.into(),
            login_token: login_token.into(),
            session: Mutex::new(None),
        })
    }

    fn session(&self) -> Result<Session, UploadError> {
        self.session
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or_else(|| UploadError::Auth("not authenticated".into()))
    }

    /// POST a JSON request to the API endpoint and parse the body
    fn api_call(&self, body: Value) -> Result<Value, UploadError> {
        let response = self
            .client
            .post(&self.api_url)
            .json(&body)
            .send()
            .map_err(|e| UploadError::Remote(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            if classify_status(status) == TaskErrorKind::Auth {
                return Err(UploadError::Auth(format!("server returned {}", status)));
            }
            return Err(UploadError::Remote(format!("server returned {}", status)));
        }
        response
            .json::<Value>()
            .map_err(|e| UploadError::Remote(format!("bad response body: {}", e)))
    }

    fn base_request(&self, mode: &str, session: Option<&Session>) -> Value {
        let mut body = serde_json::json!({
            "mode": mode,
            "client": CLIENT_NAME,
            "version": VERSION,
        });
        if let Some(session) = session {
            body["user_id"] = Value::String(session.user_id.clone());
            body["token"] = Value::String(session.token.clone());
        }
        body
    }

    /// Per-item task call (tag/playlist); maps failures into the task taxonomy
    fn item_call(&self, body: Value) -> Result<(), TaskError> {
        let response = self
            .client
            .post(&self.api_url)
            .json(&body)
            .send()
            .map_err(|e| transport_error(e, None))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TaskError::new(
                classify_status(status),
                None,
                format!("server returned {}", status),
            ));
        }
        let json: Value = response
            .json()
            .map_err(|e| TaskError::permanent(None, format!("bad response body: {}", e)))?;
        if json.get("result").and_then(Value::as_bool) == Some(false) {
            let message = json
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("request rejected");
            return Err(TaskError::permanent(None, message));
        }
        Ok(())
    }
}

impl RemoteLibrary for HttpRemote {
    fn authenticate(&self) -> Result<Session, UploadError> {
        log::debug!("logging in");
        let mut body = self.base_request("login_token", None);
        body["login_token"] = Value::String(self.login_token.clone());

        let json = self.api_call(body)?;
        let user = json
            .get("user")
            .ok_or_else(|| {
                let message = json
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("login rejected");
                UploadError::Auth(message.to_string())
            })?
            .clone();

        let session = Session {
            user_id: json_id(user.get("id")).ok_or_else(|| {
                UploadError::Auth("login response missing user id".into())
            })?,
            token: user
                .get("token")
                .and_then(Value::as_str)
                .ok_or_else(|| UploadError::Auth("login response missing token".into()))?
                .to_string(),
        };
        log::debug!("login successful, user_id {}", session.user_id);

        if let Ok(mut guard) = self.session.lock() {
            *guard = Some(session.clone());
        }
        Ok(session)
    }

    fn supported_extensions(&self) -> Result<HashSet<String>, UploadError> {
        let session = self.session()?;
        let mut body = self.base_request("status", Some(&session));
        body["supported_types"] = Value::from(1);

        let json = self.api_call(body)?;
        let mut extensions = HashSet::new();
        if let Some(list) = json.get("supported").and_then(Value::as_array) {
            for entry in list {
                if let Some(ext) = entry.get("extension").and_then(Value::as_str) {
                    extensions.insert(ext.trim_start_matches('.').to_lowercase());
                }
            }
        }
        Ok(extensions)
    }

    fn list_items(&self) -> Result<Vec<RemoteItem>, UploadError> {
        let session = self.session()?;
        let body = self.base_request("library", Some(&session));
        let json = self.api_call(body)?;

        let items = json
            .get("items")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        serde_json::from_value(items)
            .map_err(|e| UploadError::Remote(format!("bad inventory listing: {}", e)))
    }

    fn upload(&self, file: &LocalFile) -> Result<String, TaskError> {
        let session = self
            .session()
            .map_err(|e| TaskError::auth(e.to_string()))?;

        let reader = File::open(&file.path)
            .map_err(|e| TaskError::permanent(Some(file.path.clone()), e.to_string()))?;
        let part = multipart::Part::reader(reader)
            .file_name(file.name.clone())
            .mime_str("application/octet-stream")
            .map_err(|e| TaskError::permanent(Some(file.path.clone()), e.to_string()))?;

        let form = multipart::Form::new()
            .text("user_id", session.user_id)
            .text("token", session.token)
            .text("file_path", file.path.to_string_lossy().to_string())
            .text("fingerprint", file.fingerprint.clone())
            .text("method", CLIENT_NAME)
            .part("file", part);

        let response = self
            .client
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .map_err(|e| transport_error(e, Some(&file.path)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TaskError::new(
                classify_status(status),
                Some(file.path.clone()),
                format!("server returned {}", status),
            ));
        }

        let json: Value = response.json().map_err(|e| {
            TaskError::permanent(Some(file.path.clone()), format!("bad response body: {}", e))
        })?;
        if json.get("result").and_then(Value::as_bool) == Some(false) {
            let message = json
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("upload rejected");
            return Err(TaskError::permanent(Some(file.path.clone()), message));
        }
        json_id(json.get("id")).ok_or_else(|| {
            TaskError::permanent(Some(file.path.clone()), "upload response missing item id")
        })
    }

    fn add_tag(&self, remote_id: &str, tag: &str) -> Result<(), TaskError> {
        let session = self
            .session()
            .map_err(|e| TaskError::auth(e.to_string()))?;
        let mut body = self.base_request("tag", Some(&session));
        body["item_id"] = Value::String(remote_id.to_string());
        body["tag_name"] = Value::String(tag.to_string());
        self.item_call(body)
    }

    fn add_to_playlist(&self, remote_id: &str, playlist: &str) -> Result<(), TaskError> {
        let session = self
            .session()
            .map_err(|e| TaskError::auth(e.to_string()))?;
        let mut body = self.base_request("playlist_add", Some(&session));
        body["item_id"] = Value::String(remote_id.to_string());
        body["playlist_name"] = Value::String(playlist.to_string());
        self.item_call(body)
    }
}

/// Remote ids arrive as either JSON strings or numbers
fn json_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
