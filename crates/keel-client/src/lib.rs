//! Pipelined socket client for the keel consensus/application protocol.
//!
//! A consensus engine drives its application process over a single duplex
//! byte stream: requests are pipelined, responses arrive in strict FIFO
//! order, and small writes coalesce behind explicit `Flush` messages.
//!
//! ```no_run
//! use keel_client::Client;
//!
//! # async fn run() -> keel_client::Result<()> {
//! let client = Client::new("tcp://127.0.0.1:26658", true)?;
//! client.start().await?;
//! let echoed = client.echo("hello").await?;
//! assert_eq!(echoed, "hello");
//! client.stop();
//! # Ok(())
//! # }
//! ```
#[macro_use]
mod macros;

pub mod client;
pub mod config;
pub mod counters;
mod error;
pub(crate) mod wire;


pub use client::{Client, ReqRes, ReqResCallback};
pub use config::ClientConfig;
pub use counters::{frame_counters_snapshot, reset_frame_counters, FrameCountersSnapshot};
pub use error::{ClientError, Result};

// Re-export the wire types callers handle directly.
pub use keel_wire::{
    matches, BlockHeader, InfoResult, QueryParams, QueryResult, Request, Response, TxResult,
    Validator, CODE_OK,
};
