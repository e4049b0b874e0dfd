use log::info;
use tokio::net::TcpListener;

use crate::errors::Result;
use crate::relay_utils::{run_relay, RelayConfig};

/// Run the relay server that pairs senders and receivers.
///
/// The relay is stateless across restarts: it holds only the in-memory slot
/// map, pairs peers by the slot id embedded in their password, and pipes
/// opaque encrypted frames between paired connections. A crash terminates
/// all active slots; peers observe a closed transport.
pub async fn run(port: u16) -> Result<()> {
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&bind_addr).await?;
    println!("Relay listening on {}", bind_addr);
    info!("relay started on {}", bind_addr);

    run_relay(listener, RelayConfig::default()).await
}
