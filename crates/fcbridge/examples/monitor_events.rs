//! Print everything a flight controller says.
//!
//! Opens the CLI, sends `status` once, then prints every event for thirty
//! seconds. Handy for checking cabling and baud rate before anything else.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p fcbridge --example monitor_events -- /dev/ttyACM0
//! ```

use std::time::Duration;

use fcbridge::{BridgeBuilder, BridgeEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyACM0".to_string());

    println!("Opening {port}...");
    let bridge = BridgeBuilder::new().serial_port(&port).build().await?;
    let mut events = bridge.subscribe();
    bridge.wait_ready().await?;

    bridge.send("status").await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(BridgeEvent::Line(line))) => println!("  {line}"),
            Ok(Ok(BridgeEvent::Sent(line))) => println!("> {line}"),
            Ok(Ok(BridgeEvent::Disconnected)) => {
                println!("Controller went away.");
                break;
            }
            Ok(Ok(event)) => println!("[{event:?}]"),
            Ok(Err(e)) => {
                println!("Event stream error: {e}");
                break;
            }
            Err(_) => break,
        }
    }

    bridge.close().await;
    Ok(())
}
