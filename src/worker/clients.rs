use async_trait::async_trait;
use color_eyre::Result;
use tracing::info;

/// Client-notification collaborator: the pages a worker may control.
#[async_trait]
pub trait Clients: Send + Sync {
  /// Take control of every open client so already-loaded pages use the
  /// new worker without a reload. Returns how many were claimed.
  async fn claim(&self) -> Result<usize>;
}

/// Clients of a headless host, which has no pages to hand over.
pub struct HeadlessClients;

#[async_trait]
impl Clients for HeadlessClients {
  async fn claim(&self) -> Result<usize> {
    info!("No open clients to claim");
    Ok(0)
  }
}
