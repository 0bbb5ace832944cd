//! Check a controller against an expectation file.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p fcbridge --example verify_settings -- /dev/ttyACM0 expected.json
//! ```

use fcbridge::BridgeBuilder;
use fcbridge::verify::load_expectations;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| "/dev/ttyACM0".to_string());
    let file = args.next().unwrap_or_else(|| "expected.json".to_string());

    let expectations = load_expectations(&file)?;
    println!("{} settings to check on {port}", expectations.len());

    let bridge = BridgeBuilder::new().serial_port(&port).build().await?;
    bridge.wait_ready().await?;

    let report = bridge
        .verify_with(&expectations, |result| println!("{result}"))
        .await?;
    println!("\n{report}");

    bridge.close().await;
    Ok(())
}
