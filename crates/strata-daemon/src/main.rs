//! strata-daemon: runs the Strata layer stack behind a local SOCKS listener.
//!
//! Single OS process running a Tokio async runtime. Applications connect to
//! the SOCKS listener; each session is relayed through the configured
//! outbound stack.

mod config;
mod context;
mod status;

use std::sync::Arc;

use strata_net::{LayerProperties, NetAddress, NetLayerId};
use strata_socks::SocksServer;
use tracing::{error, info};

use crate::config::DaemonConfig;
use crate::context::NetContext;
use crate::status::StatusReport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = DaemonConfig::load()?;

    // 2. Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().or_else(|_| {
                tracing_subscriber::EnvFilter::try_new(format!(
                    "strata={}",
                    config.advanced.log_level
                ))
            })?,
        )
        .init();

    info!("Strata daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 3. Build the network context
    let context = NetContext::new(&config, &data_dir)?;
    let outbound_id: NetLayerId = config.network.outbound.parse()?;
    let outbound = context.layer(outbound_id)?;
    info!(outbound = %outbound_id, "outbound stack ready");

    // 4. Start the SOCKS listener
    let serve = async {
        if !config.socks.enabled {
            info!("SOCKS listener disabled");
            return std::future::pending::<anyhow::Result<()>>().await;
        }
        let listen: NetAddress = config.socks.listen.parse()?;
        let listener = context
            .layer(NetLayerId::Tcpip)?
            .create_server_socket(&LayerProperties::new(), Some(&listen))
            .await?;
        info!(listen = %listen, "SOCKS listener bound");
        info!(status = %StatusReport::collect(&context).to_json(), "daemon status");

        let server = Arc::new(
            SocksServer::new(outbound).with_connect_timeout(config.socks.connect_timeout()),
        );
        server.serve(listener).await?;
        Ok(())
    };

    // 5. Run until Ctrl-C
    tokio::select! {
        result = serve => {
            if let Err(e) = result {
                error!("SOCKS server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    // Graceful shutdown
    info!(status = %StatusReport::collect(&context).to_json(), "final status");
    context.clear_all();

    info!("Daemon stopped");
    Ok(())
}
