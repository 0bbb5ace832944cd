//! # fcbridge -- a terminal bridge to the flight-controller CLI
//!
//! `fcbridge` talks to the text configuration CLI of a flight controller
//! (Betaflight and its relatives) over the USB virtual serial port. It turns
//! the chunked byte stream into lines, correlates each command with the
//! response block that ends at the next `#` prompt, and checks settings
//! against a JSON expectation file.
//!
//! ## Quick Start
//!
//! ```no_run
//! use fcbridge::BridgeBuilder;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let bridge = BridgeBuilder::new()
//!         .serial_port("/dev/ttyACM0")
//!         .build()
//!         .await?;
//!     bridge.wait_ready().await?;
//!
//!     let version = bridge.send_and_await("version").await?;
//!     println!("{version}");
//!
//!     bridge.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                   | Purpose                                          |
//! |-------------------------|--------------------------------------------------|
//! | `fcbridge-core`         | [`Transport`], [`CommandSession`], events, errors |
//! | `fcbridge-transport`    | Serial transport and port enumeration            |
//! | `fcbridge-io`           | Line framer, command channel IO task, session log |
//! | `fcbridge-verify`       | Expectation files and the settings verifier      |
//! | **`fcbridge`**          | This facade: [`BridgeBuilder`] and [`Bridge`]    |
//!
//! ## Events
//!
//! Device output that is not part of an awaited response is written to the
//! session log and published as [`BridgeEvent::Line`]:
//!
//! ```no_run
//! use fcbridge::{Bridge, BridgeEvent};
//! # async fn example(bridge: &Bridge) {
//! let mut events = bridge.subscribe();
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         BridgeEvent::Line(line) => println!("{line}"),
//!         BridgeEvent::Disconnected => break,
//!         _ => {}
//!     }
//! }
//! # }
//! ```

pub mod bridge;
pub mod builder;

pub use fcbridge_core::*;

pub use bridge::Bridge;
pub use builder::{BridgeBuilder, CONNECTED_NOTICE};
pub use fcbridge_io::io::{IoConfig, PromptMatch};
pub use fcbridge_io::log::{DEFAULT_EXPORT_FILE, SessionLog};
pub use fcbridge_transport::{DEFAULT_BAUD_RATE, PortInfo, list_ports};

/// Expectation files and verification results.
pub mod verify {
    pub use fcbridge_verify::*;
}
