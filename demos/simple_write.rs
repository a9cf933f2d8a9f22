//! Example: Writing data tables
//!
//! Run with: cargo run --example simple_write
//!
//! This example demonstrates:
//! - Writing single values of different types
//! - Masked bit writes that leave the rest of the word alone
//! - Writing a batch and checking per-item quality

use pccc_eip::{Client, ClientConfig, PcccError};

#[tokio::main]
async fn main() -> pccc_eip::Result<()> {
    let client = Client::new(ClientConfig::new("192.168.1.20").with_connection_id("line-1"))?;
    client.connect().await?;

    // =========================================================================
    // Single Values
    // =========================================================================

    println!("=== Single Values ===\n");

    client.write("N7:10", 1234i16).await?;
    println!("Wrote 1234 to N7:10");

    client.write("F8:2", 21.5f32).await?;
    println!("Wrote 21.5 to F8:2");

    client.write("L9:0", 100_000i32).await?;
    println!("Wrote 100000 to L9:0");

    client.write("ST10:0", "BATCH-0042").await?;
    println!("Wrote \"BATCH-0042\" to ST10:0");

    // =========================================================================
    // Bits
    // =========================================================================

    println!("\n=== Bits ===\n");

    // Only bit 4 of B3:1 changes
    client.write("B3:1/4", true).await?;
    client.write("T4:0.EN", false).await?;
    println!("Set B3:1/4, cleared T4:0.EN");

    // =========================================================================
    // Arrays and Batches
    // =========================================================================

    println!("\n=== Batches ===\n");

    client.write("N7:20,4", vec![1i16, 2, 3, 4]).await?;

    let result = client
        .write_items([("N7:30", 7i16), ("N7:31", 8i16), ("N99:0", 9i16)])
        .await?;
    for (address, quality) in &result.qualities {
        println!("{:<8} {}", address, quality);
    }

    // =========================================================================
    // Overlapping Writes
    // =========================================================================

    let (first, second) = tokio::join!(client.write("N7:0", 1i16), client.write("N7:1", 2i16));
    match second {
        Err(PcccError::WriteInProgress) => println!("\nSecond write rejected while the first ran"),
        other => println!("\nSecond write: {:?}", other.map(|r| r.any_bad)),
    }
    first?;

    client.disconnect()?;
    println!("\nWrite example completed!");
    Ok(())
}
