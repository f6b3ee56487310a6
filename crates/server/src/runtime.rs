//! Fixed-timestep scheduler driving a [`GameServer`](crate::GameServer).

use crate::GameServer;
use anyhow::Result;
use ironveil_core::TICKS_PER_SECOND;
use std::time::Duration;
use tracing::{info, warn};

/// Drive the server's clock and accept loop until shutdown.
///
/// Each iteration pumps the clock (running every owed tick), then waits on
/// whichever comes first: an incoming connection, the next tick coming due,
/// or an interrupt. With `max_ticks` set the loop stops once the tick counter
/// reaches it, which bounds headless runs.
pub async fn run(mut server: GameServer, max_ticks: Option<u64>) -> Result<()> {
    info!("Entering tick loop ({} ticks/sec)", TICKS_PER_SECOND);

    loop {
        let budget = server.pump().await?;

        if let Some(limit) = max_ticks {
            if server.current_tick().0 >= limit {
                info!("Reached tick limit {}, shutting down", limit);
                server.shutdown().await;
                return Ok(());
            }
        }

        tokio::select! {
            accepted = server.accept_session() => {
                if let Err(err) = accepted {
                    warn!("Accept failed: {err:#}");
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(budget)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                server.shutdown().await;
                return Ok(());
            }
        }
    }
}
