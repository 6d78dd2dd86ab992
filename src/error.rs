use crate::broadlink::ProtocolError;
use crate::config::ConfigError;

/// Top level error of the bridge
///
/// Startup paths return it to `main`, where it is rendered by color-eyre. Job and
/// message handlers log their errors at their own boundary instead.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Discovery found no supported devices")]
    DiscoveryFailure,

    #[error("No discovered device could be authenticated")]
    NoAuthenticatedDevices,

    #[error("Discovery failed: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
