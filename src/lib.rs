//! # Omron FINS client with a reactive tag layer
//!
//! A client for Omron's FINS command protocol over TCP or UDP, plus a
//! polling tag engine that publishes typed value streams.
//!
//! The protocol layer speaks raw FINS datagrams over UDP and the
//! documented 16-byte envelope (with node-address negotiation) over TCP.
//! On top of it, the tag layer polls a user-declared set of PLC memory
//! addresses on a timer and multicasts change events to subscribers.
//!
//! ## Quick start
//!
//! ```no_run
//! use omron_tagio::{PlcClient, PlcOptions, Transport};
//!
//! #[tokio::main]
//! async fn main() -> omron_tagio::Result<()> {
//!     let options = PlcOptions::new("192.168.1.250", Transport::Udp, 1, 10);
//!     let client = PlcClient::new(options)?;
//!
//!     // Declare what to poll. Addresses use the programming-tool
//!     // syntax: area prefix, word, optional bit or length.
//!     client.register_tag::<i16>("D100", "temperature")?;
//!     client.register_tag::<bool>("CIO20.5", "running")?;
//!     client.register_tag::<String>("D300[12]", "batch_id")?;
//!
//!     // Streams re-emit the latest cached value to new subscribers.
//!     let mut temperature = client.observe::<i16>("temperature")?;
//!     tokio::spawn(async move {
//!         while let Some(value) = temperature.recv().await {
//!             println!("temperature = {:?}", value);
//!         }
//!     });
//!
//!     // Writes are fire-and-forget; failures flow to the error stream.
//!     client.write::<i16>("temperature", 215);
//!
//!     let mut errors = client.errors();
//!     if let Ok(error) = errors.recv().await {
//!         eprintln!("plc error: {}", error);
//!     }
//!
//!     client.dispose().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Tag types
//!
//! Values map onto a closed set of kinds with a fixed word layout:
//! `bool`, `u8`, `i16`, `u16`, `i32`, `u32`, `f32`, `f64`, `String`, and
//! the packed-BCD wrappers [`Bcd16`], [`UBcd16`], [`Bcd32`], [`UBcd32`].
//! Multi-word numerics travel high word first; strings pack two ASCII
//! characters per word.
//!
//! ## Concurrency model
//!
//! FINS carries no correlation beyond the one-byte service ID, so each
//! channel allows exactly one exchange in flight; the poll loop, writes,
//! and clock/cycle calls all serialize through it. Timeouts are
//! per-request, and transport failures tear the connection down and
//! rebuild it (TCP reconnects renegotiate node addresses).
//!
//! The client runs no keepalive of its own. Liveness-sensitive callers
//! subscribe to [`PlcClient::errors`] and recreate the client on
//! persistent failure.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod bcd;
mod client;
mod command;
mod error;
mod header;
mod memory;
mod model;
mod poll;
mod response;
mod session;
mod transport;
mod value;

pub use client::{
    PlcClient, PlcOptions, TagSubscription, DEFAULT_POLL_INTERVAL, DEFAULT_RETRIES,
    DEFAULT_TIMEOUT,
};
pub use command::FinsCommand;
pub use error::{end_code_message, EchoField, FinsError, Result};
pub use header::{FinsHeader, FINS_HEADER_SIZE};
pub use memory::{MemoryArea, TagAddress, MAX_TAG_LENGTH};
pub use model::PlcType;
pub use poll::{PlcError, TagEvent, DEFAULT_EVENT_CAPACITY};
pub use response::{
    ClockReading, ControllerData, CycleTime, FinsResponse, MIN_RESPONSE_SIZE,
};
pub use transport::{Exchange, Transport, DEFAULT_FINS_PORT};
pub use value::{
    Bcd16, Bcd32, PlcTagValue, TagValue, UBcd16, UBcd32, ValueKind, DEFAULT_STRING_LENGTH,
};
