//! Example: Polling data tables
//!
//! Run with: cargo run --example simple_read
//!
//! This example demonstrates:
//! - Registering a session
//! - Building a poll list from symbolic addresses
//! - Reading the whole list in merged requests
//! - Inspecting item quality and timer bits

use pccc_eip::utils::get_bit;
use pccc_eip::{Client, ClientConfig, PlcValue};
use std::time::Duration;

#[tokio::main]
async fn main() -> pccc_eip::Result<()> {
    // =========================================================================
    // Connect to PLC
    // =========================================================================

    let config = ClientConfig::new("192.168.1.20")
        .with_connection_id("line-1")
        .with_timeout(Duration::from_secs(3));
    let client = Client::new(config)?;
    client.connect().await?;
    println!("Connected ({})", client.state());

    // =========================================================================
    // Poll List
    // =========================================================================

    // Neighbouring integers share one request
    client.add_items(["N7:0", "N7:1", "N7:2,8"])?;
    client.add_items(["F8:0", "B3:0/5", "T4:0", "T4:1.ACC", "ST9:0"])?;

    // =========================================================================
    // Read
    // =========================================================================

    for cycle in 0..3 {
        let result = client.read_all().await?;
        println!("\n=== Cycle {} ===\n", cycle);
        if result.disconnected {
            println!("Session lost, values are stale");
        }
        for (address, item) in &result.values {
            println!("{:<10} {:<24} {}", address, item.value.to_string(), item.quality);
        }

        if let Some(PlcValue::Timer(timer)) = result.values.get("T4:0").map(|i| &i.value) {
            println!("\nT4:0 done = {}, {}/{}", timer.dn, timer.acc, timer.pre);
        }
        if let Some(word) = result.values.get("N7:0").and_then(|i| i.value.as_i64()) {
            println!("N7:0 bit 3 = {}", get_bit(word as u16, 3));
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    // =========================================================================
    // Shrink the list
    // =========================================================================

    client.remove_items(["ST9:0"])?;
    let result = client.read_all().await?;
    println!("\n{} items, any bad: {}", result.values.len(), result.any_bad);

    client.disconnect()?;
    println!("\nRead example completed!");
    Ok(())
}
