use std::sync::Arc;

use egress_proxy::config::Config;
use egress_proxy::proxy::stats::report_periodically;
use egress_proxy::server::{self, Handler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(cfg.log_level())
        .init();

    let handler = Arc::new(Handler::from_config(&cfg)?);

    let pool = handler.transport().pool();
    tracing::info!(
        addresses = pool.len(),
        first = %pool.get(0).ip(),
        "Egress pool ready"
    );
    if cfg.print_addrs {
        for address in pool.iter() {
            tracing::info!(index = address.index(), address = %address.ip(), "Egress address");
        }
    }

    let transport = Arc::clone(handler.transport());
    let stats_interval = cfg.stats_interval;
    let reporter = tokio::spawn(async move {
        report_periodically(transport.stats(), stats_interval).await;
    });

    tokio::select! {
        res = server::listener::run(cfg.listen_addr, handler) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    reporter.abort();
    Ok(())
}
