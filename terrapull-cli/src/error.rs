//! CLI error type.

use terrapull::download::DownloadError;
use terrapull::provider::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("{0}")]
    Args(String),
}
