//! # PCCC over EtherNet/IP
//!
//! A Rust library for polling and writing Allen-Bradley SLC 500, MicroLogix
//! and PLC-5 data tables over EtherNet/IP encapsulated PCCC.
//!
//! The client registers a session, merges polled items into as few typed
//! read requests as the frame size allows, keeps several requests in flight,
//! and reconnects by itself after failures. Every read and write is answered
//! exactly once; items that fail carry a bad [`Quality`] instead of failing
//! the whole batch.
//!
//! ## Features
//!
//! - **Symbolic addressing**: `N7:0`, `F8:3`, `B3:1/4`, `T4:0.ACC`, `ST9:2`, `N7:0,10`
//! - **Request merging**: neighbouring items share one read within a byte gap
//! - **Exact bit writes**: masked writes touch only the addressed bits
//! - **Automatic reconnection**: registration timeouts and transport failures
//!   recover without caller involvement
//! - **Sans-IO core**: the protocol [`Engine`] is driven by events and can be
//!   tested without sockets
//! - **Structured logging**: every event of a client carries its connection id
//!
//! ## Quick Start
//!
//! ```no_run
//! use pccc_eip::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> pccc_eip::Result<()> {
//!     let client = Client::new(ClientConfig::new("192.168.1.20").with_connection_id("press-3"))?;
//!     client.connect().await?;
//!
//!     client.add_items(["N7:0,4", "F8:1", "B3:0/7", "T4:2.DN", "ST9:0"])?;
//!     let result = client.read_all().await?;
//!     if result.any_bad {
//!         eprintln!("some items failed");
//!     }
//!     for (address, item) in &result.values {
//!         println!("{:<10} {} {}", address, item.value, item.quality);
//!     }
//!
//!     client.write("N7:10", 250i16).await?;
//!     client.write("B3:0/7", false).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Addresses
//!
//! | File | Prefix | Element | Example |
//! |------|--------|---------|---------|
//! | Output / Input | `O`, `I` | word | `O:0/3`, `I:1.0` |
//! | Status | `S` | word | `S:1/5` |
//! | Bit | `B` | word | `B3:2/15`, `B3/40` |
//! | Timer / Counter / Control | `T`, `C`, `R` | 3 words | `T4:0.PRE`, `C5:1/DN`, `R6:0.LEN` |
//! | Integer | `N` | INT | `N7:0`, `N7:0,10` |
//! | Float | `F` | REAL | `F8:0` |
//! | Long | `L` | DINT | `L9:1` |
//! | String | `ST` | 82 chars | `ST10:0` |
//! | Integer-file string | `NST` | 40 chars | `NST12:0` |
//!
//! ```
//! use pccc_eip::{Address, DataKind, FileType};
//!
//! let addr = Address::parse("B3:1/4").unwrap();
//! assert_eq!(addr.file_type(), FileType::B);
//! assert_eq!(addr.area_code(), 0x85);
//! assert_eq!((addr.file(), addr.element(), addr.bit()), (3, 1, 4));
//! assert_eq!(addr.kind(), DataKind::Bit);
//! ```
//!
//! ## Request Planning
//!
//! ```
//! use pccc_eip::{Address, OptimizerConfig, plan_reads};
//!
//! let items: Vec<Address> = ["N7:0", "N7:1", "N7:3"]
//!     .iter()
//!     .map(|a| Address::parse(a).unwrap())
//!     .collect();
//! let plan = plan_reads(&items, &OptimizerConfig::default());
//! assert_eq!(plan.requests.len(), 1);
//! assert_eq!(plan.blocks[0].byte_length, 8);
//! ```
//!
//! ## Utility Functions
//!
//! The [`utils`] module provides the bit and byte helpers used by the codec:
//!
//! ```
//! use pccc_eip::utils::{get_bit, set_bit, pair_swap, format_hex_bytes};
//!
//! assert!(get_bit(0b0100, 2));
//! assert_eq!(set_bit(0, 15, true), 0x8000);
//! assert_eq!(pair_swap(b"ABC"), b"BAC");
//! assert_eq!(format_hex_bytes(&[0x6F, 0x00]), "6f 00");
//! ```
//!
//! ## Error Handling
//!
//! API calls return [`Result<T, PcccError>`]. Item-level problems never
//! surface as `Err`:
//!
//! ```no_run
//! use pccc_eip::{BadReason, Client, ClientConfig, PcccError, Quality};
//!
//! # async fn run() -> pccc_eip::Result<()> {
//! let client = Client::new(ClientConfig::new("192.168.1.20"))?;
//! match client.connect().await {
//!     Ok(()) => {}
//!     Err(PcccError::Timeout) => println!("controller did not register a session"),
//!     Err(e) => return Err(e),
//! }
//! client.add_items(["N7:0"])?;
//! let result = client.read_all().await?;
//! match result.values["N7:0"].quality {
//!     Quality::Good => {}
//!     Quality::Bad(BadReason::PcccStatus(code)) => println!("controller status 0x{:02X}", code),
//!     Quality::Bad(reason) => println!("read failed: {:?}", reason),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! The crate logs through [`tracing`]. Each client's driver task runs in a
//! `pccc` span whose `connection` field is the configured connection id, so
//! several clients can share one subscriber.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod address;
mod client;
mod command;
mod connection;
mod engine;
mod error;
mod file_type;
mod header;
mod ledger;
mod optimizer;
pub mod response;
mod transport;
pub mod utils;
mod value;

// Public re-exports
pub use address::{Address, DataKind, ScalarType, StructureField, StructureType, TextType};
pub use client::{Client, ClientConfig, DEFAULT_CONNECTION_ID, DEFAULT_MAX_PARALLEL};
pub use command::{
    MaskedWriteCommand, ReadCommand, WriteCommand, CMD_MASKED_WRITE, CMD_READ, CMD_WRITE,
    MAX_TRANSFER_BYTES,
};
pub use connection::{
    Action, Connection, ConnectionState, TimerKey, READ_RETRY_POLL, RECONNECT_BACKOFF,
    RESET_GRACE,
};
pub use engine::{
    Command, Engine, EngineConfig, Mutation, ReadResult, Translation, WriteResult,
};
pub use error::{PcccError, ProtocolError, Result};
pub use file_type::FileType;
pub use header::{
    register_session_request, FrameBuilder, CIP_HEADER_SIZE, ENCAP_HEADER_SIZE, PCCC_HEADER_SIZE,
    REGISTER_SESSION_SIZE,
};
pub use ledger::{DispatchLedger, Packet, PacketKind, ReplyMatch, SequenceCounter, MAX_SEQUENCE};
pub use optimizer::{
    plan_reads, plan_writes, Block, BlockMember, OptimizerConfig, ReadPlan, WireOp, WireRequest,
    WriteItem, WritePlan, DEFAULT_MAX_GAP, DEFAULT_MAX_PDU, MAX_PDU, MIN_PDU,
};
pub use transport::{
    complete_frames_len, TcpTransport, DEFAULT_EIP_PORT, DEFAULT_TIMEOUT, READ_BUFFER_SIZE,
};
pub use value::{
    bad_item, bad_value, decode, encode, BadReason, Control, Counter, ItemValue, PlcValue,
    Quality, Timer, MAX_STRING_LENGTH, QUALITY_BAD, QUALITY_GOOD,
};
