use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::http::connection::Connection;
use crate::server::handler::Handler;

pub async fn run(listen_addr: SocketAddr, handler: Arc<Handler>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!("Reverse proxy ready on {}", listener.local_addr()?);

    serve(listener, handler).await
}

/// Accepts connections forever, one task per connection.
pub async fn serve(listener: TcpListener, handler: Arc<Handler>) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // Usually fd exhaustion; back off instead of spinning
                warn!(error = %e, "Failed to accept connection");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        debug!("Accepted connection from {}", peer);

        if let Err(e) = socket.set_nodelay(true) {
            debug!(error = %e, "Could not set TCP_NODELAY");
        }

        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, handler);
            if let Err(e) = conn.run().await {
                debug!("Connection error from {}: {}", peer, e);
            }
        });
    }
}
