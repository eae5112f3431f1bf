//! `cygnet` agent binary
//!
//! ```bash
//! CYGNET_AGENT_NAME=agent-1 CYGNET_CONFIG_FILE=/etc/cygnet/pipeline.json cygnet
//! ```

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cygnet_runtime::run(|registry| async move { Ok(registry) }).await
}
