use std::path::PathBuf;

use async_trait::async_trait;
use custodia_model::DepositStatus;
use tracing::info;
use url::Url;

use super::{
    Package, PackagerOptions, TransferContext, Transport, TransportResponse,
    TransportSession,
};
use crate::error::{DepositError, RemedialError, Result};

/// Packager option naming the target directory.
pub const DIRECTORY_OPTION: &str = "directory";

/// Writes packages below a configured directory, one folder per deposit.
/// A written package counts as accepted.
#[derive(Clone, Copy, Debug, Default)]
pub struct FilesystemTransport;

#[async_trait]
impl Transport for FilesystemTransport {
    async fn open(&self, options: &PackagerOptions) -> Result<Box<dyn TransportSession>> {
        let root = options.get(DIRECTORY_OPTION).ok_or_else(|| {
            RemedialError::InvalidConfiguration(format!(
                "filesystem transport requires the '{DIRECTORY_OPTION}' option"
            ))
        })?;
        let root = PathBuf::from(root);
        tokio::fs::create_dir_all(&root).await?;
        Ok(Box::new(FilesystemSession { root }))
    }
}

#[derive(Debug)]
struct FilesystemSession {
    root: PathBuf,
}

#[async_trait]
impl TransportSession for FilesystemSession {
    async fn send(
        &mut self,
        package: &Package,
        context: &TransferContext,
    ) -> Result<TransportResponse> {
        let dir = self.root.join(context.deposit.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(&package.name);
        tokio::fs::write(&path, &package.bytes).await?;

        let absolute = tokio::fs::canonicalize(&path).await?;
        let status_ref = Url::from_file_path(&absolute).map_err(|()| {
            DepositError::Transport {
                repository: context.repository,
                message: format!("cannot express {} as a URL", absolute.display()),
            }
        })?;

        info!(
            deposit = %context.deposit,
            repository = %context.repository,
            path = %absolute.display(),
            bytes = package.bytes.len(),
            "wrote deposit package"
        );

        Ok(TransportResponse {
            status_code: 201,
            status_ref: Some(status_ref.to_string()),
            terminal_hint: Some(DepositStatus::Accepted),
        })
    }
}
