use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::client::NamingClient;
use super::protocol::Endpoint;

/// Keeps `endpoint` alive in the naming service until the handle is aborted.
///
/// Each tick sends a heartbeat. After any failed contact the next tick sends a
/// full registration instead, because a heartbeat alone cannot bring back a
/// record that was pruned in the meantime. Pass `registered = false` when the
/// initial registration did not succeed.
pub fn spawn_heartbeat(
    client: NamingClient,
    endpoint: Endpoint,
    interval: Duration,
    registered: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut needs_register = !registered;

        loop {
            ticker.tick().await;
            let result = if needs_register {
                client
                    .register(&endpoint.name, &endpoint.host, endpoint.port)
                    .await
            } else {
                client.heartbeat(&endpoint.name).await
            };

            match result {
                Ok(()) if needs_register => {
                    info!(instance = %endpoint.name, naming = %client.addr(), "registered with naming service");
                    needs_register = false;
                }
                Ok(()) => debug!(instance = %endpoint.name, "heartbeat sent"),
                Err(err) => {
                    warn!(instance = %endpoint.name, "heartbeat failed: {err}");
                    needs_register = true;
                }
            }
        }
    })
}
