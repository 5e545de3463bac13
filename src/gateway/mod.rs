pub mod telegram;

use async_trait::async_trait;

use crate::error::{ProbeError, UploadError};
use crate::media::{MediaKind, SourceLocation, UploadedIdentifier};

pub use telegram::TelegramGateway;

/// Transporte remoto que convierte un payload binario en un identificador reutilizable
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UploadGateway: Send + Sync {
    /// Sube la media y devuelve el identificador emitido por el transporte
    async fn upload(
        &self,
        source: &SourceLocation,
        kind: MediaKind,
    ) -> Result<UploadedIdentifier, UploadError>;

    /// Nombre del transporte para logs
    fn transport_name(&self) -> &'static str;
}

/// Verificación barata de que un identificador sigue siendo válido
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentifierProbe: Send + Sync {
    async fn probe(&self, identifier: &UploadedIdentifier) -> Result<bool, ProbeError>;
}
