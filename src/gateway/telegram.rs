use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{multipart, StatusCode};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, warn};

use super::{IdentifierProbe, UploadGateway};
use crate::error::{ProbeError, UploadError};
use crate::media::{MediaKind, SourceLocation, UploadedIdentifier};

/// Operación de envío de la Bot API para cada tipo de media
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOperation {
    pub method: &'static str,
    pub field: &'static str,
}

/// Tabla explícita MediaKind -> operación remota
pub const fn send_operation(kind: MediaKind) -> SendOperation {
    match kind {
        MediaKind::Video => SendOperation { method: "sendVideo", field: "video" },
        MediaKind::Image => SendOperation { method: "sendPhoto", field: "photo" },
        MediaKind::Audio => SendOperation { method: "sendAudio", field: "audio" },
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Message {
    video: Option<FileRef>,
    #[serde(default)]
    photo: Vec<PhotoSize>,
    audio: Option<FileRef>,
    voice: Option<FileRef>,
    document: Option<FileRef>,
}

#[derive(Debug, Deserialize)]
struct FileRef {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct PhotoSize {
    file_id: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

/// Upload gateway and identifier probe over the Telegram Bot API.
///
/// Warm-up uploads go to a dedicated storage chat; the `file_id` of the
/// resulting message is the reusable identifier. Probing uses `getFile`, which
/// fails for identifiers the transport no longer recognizes.
pub struct TelegramGateway {
    client: reqwest::Client,
    api_base: String,
    token: String,
    storage_chat_id: i64,
}

impl TelegramGateway {
    pub fn new(api_base: &str, token: String, storage_chat_id: i64) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("media-pool/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            storage_chat_id,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn build_form(&self, source: &SourceLocation, kind: MediaKind) -> Result<multipart::Form, UploadError> {
        let op = send_operation(kind);
        let form = multipart::Form::new()
            .text("chat_id", self.storage_chat_id.to_string())
            .text("disable_notification", "true");

        let form = match source {
            // El transporte descarga la URL por su cuenta
            SourceLocation::Remote(url) => form.text(op.field, url.to_string()),
            SourceLocation::Local(path) => {
                let data = Bytes::from(tokio::fs::read(path).await?);
                debug!("📦 Leídos {} bytes de {}", data.len(), path.display());
                let part = multipart::Part::stream(data).file_name(file_name(path));
                form.part(op.field, part)
            }
        };

        Ok(form)
    }
}

#[async_trait]
impl UploadGateway for TelegramGateway {
    async fn upload(
        &self,
        source: &SourceLocation,
        kind: MediaKind,
    ) -> Result<UploadedIdentifier, UploadError> {
        let op = send_operation(kind);
        let form = self.build_form(source, kind).await?;

        let response = self
            .client
            .post(self.endpoint(op.method))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body: ApiResponse<Message> = response.json().await?;

        if !body.ok {
            let description = body.description.unwrap_or_else(|| "unknown error".to_string());
            warn!("❌ {} rechazado ({}): {}", op.method, status, description);
            return Err(UploadError::Api {
                status: status.as_u16(),
                description,
            });
        }

        body.result
            .and_then(|message| extract_identifier(kind, &message))
            .ok_or(UploadError::MissingIdentifier(kind))
    }

    fn transport_name(&self) -> &'static str {
        "telegram"
    }
}

#[async_trait]
impl IdentifierProbe for TelegramGateway {
    async fn probe(&self, identifier: &UploadedIdentifier) -> Result<bool, ProbeError> {
        let response = self
            .client
            .get(self.endpoint("getFile"))
            .query(&[("file_id", identifier.as_str())])
            .send()
            .await
            .map_err(|e| ProbeError::Unavailable(e.to_string()))?;

        let status = response.status();
        if is_outage_status(status) {
            return Err(ProbeError::Unavailable(format!("getFile returned {}", status)));
        }

        let body: ApiResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| ProbeError::Unavailable(e.to_string()))?;

        probe_verdict(status, body)
    }
}

/// `getFile` se niega a servir archivos de más de 20 MB, pero el `file_id`
/// sigue siendo reenviable
const FILE_TOO_BIG: &str = "file is too big";

fn probe_verdict(status: StatusCode, body: ApiResponse<serde_json::Value>) -> Result<bool, ProbeError> {
    if body.ok {
        return Ok(true);
    }

    let description = body.description.unwrap_or_else(|| status.to_string());
    if description.to_lowercase().contains(FILE_TOO_BIG) {
        debug!("📏 getFile rechaza el tamaño, el identificador se considera válido");
        return Ok(true);
    }

    Err(ProbeError::Rejected(description))
}

fn extract_identifier(kind: MediaKind, message: &Message) -> Option<UploadedIdentifier> {
    let file_id = match kind {
        MediaKind::Video => message
            .video
            .as_ref()
            .or(message.document.as_ref())
            .map(|f| f.file_id.clone()),
        // La foto más grande es la que se reenvía
        MediaKind::Image => message
            .photo
            .iter()
            .max_by_key(|p| u64::from(p.width) * u64::from(p.height))
            .map(|p| p.file_id.clone()),
        MediaKind::Audio => message
            .audio
            .as_ref()
            .or(message.voice.as_ref())
            .or(message.document.as_ref())
            .map(|f| f.file_id.clone()),
    };

    file_id.map(UploadedIdentifier::from)
}

// 401/404 en la Bot API significan token o método inválido, no un file_id caducado
fn is_outage_status(status: StatusCode) -> bool {
    status.is_server_error()
        || [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
        ]
        .contains(&status)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("media")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn message(json: &str) -> Message {
        let response: ApiResponse<Message> = serde_json::from_str(json).unwrap();
        assert!(response.ok);
        response.result.unwrap()
    }

    #[test]
    fn test_operation_table() {
        assert_eq!(send_operation(MediaKind::Video).method, "sendVideo");
        assert_eq!(send_operation(MediaKind::Image).field, "photo");
        assert_eq!(send_operation(MediaKind::Audio).method, "sendAudio");
    }

    #[test]
    fn test_extracts_largest_photo() {
        let msg = message(
            r#"{"ok":true,"result":{"message_id":7,"photo":[
                {"file_id":"small","width":90,"height":90},
                {"file_id":"large","width":1280,"height":720},
                {"file_id":"medium","width":320,"height":180}
            ]}}"#,
        );

        assert_eq!(
            extract_identifier(MediaKind::Image, &msg),
            Some(UploadedIdentifier::from("large"))
        );
    }

    #[test]
    fn test_extracts_kind_specific_field() {
        let msg = message(r#"{"ok":true,"result":{"video":{"file_id":"BAAC-video"}}}"#);
        assert_eq!(
            extract_identifier(MediaKind::Video, &msg),
            Some(UploadedIdentifier::from("BAAC-video"))
        );
        assert_eq!(extract_identifier(MediaKind::Audio, &msg), None);

        let msg = message(r#"{"ok":true,"result":{"voice":{"file_id":"AwAC-voice"}}}"#);
        assert_eq!(
            extract_identifier(MediaKind::Audio, &msg),
            Some(UploadedIdentifier::from("AwAC-voice"))
        );
    }

    #[test]
    fn test_error_response_parses() {
        let response: ApiResponse<Message> = serde_json::from_str(
            r#"{"ok":false,"error_code":400,"description":"Bad Request: wrong file identifier"}"#,
        )
        .unwrap();

        assert!(!response.ok);
        assert!(response.result.is_none());
        assert_eq!(
            response.description.as_deref(),
            Some("Bad Request: wrong file identifier")
        );
    }

    fn probe_body(json: &str) -> ApiResponse<serde_json::Value> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_large_files_stay_valid() {
        let body = probe_body(r#"{"ok":false,"error_code":400,"description":"Bad Request: file is too big"}"#);
        assert!(probe_verdict(StatusCode::BAD_REQUEST, body).unwrap());
    }

    #[test]
    fn test_unknown_file_id_is_rejected() {
        let body = probe_body(r#"{"ok":false,"error_code":400,"description":"Bad Request: invalid file_id"}"#);
        let err = probe_verdict(StatusCode::BAD_REQUEST, body).unwrap_err();
        assert!(matches!(err, ProbeError::Rejected(d) if d.contains("invalid file_id")));

        let body = probe_body(r#"{"ok":true,"result":{"file_id":"x","file_size":12}}"#);
        assert!(probe_verdict(StatusCode::OK, body).unwrap());
    }

    #[test]
    fn test_outage_statuses() {
        assert!(is_outage_status(StatusCode::BAD_GATEWAY));
        assert!(is_outage_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_outage_status(StatusCode::UNAUTHORIZED));
        assert!(!is_outage_status(StatusCode::BAD_REQUEST));
        assert!(!is_outage_status(StatusCode::OK));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let gateway = TelegramGateway::new("https://api.telegram.org/", "123:abc".into(), -100).unwrap();
        assert_eq!(gateway.endpoint("getFile"), "https://api.telegram.org/bot123:abc/getFile");
    }
}
