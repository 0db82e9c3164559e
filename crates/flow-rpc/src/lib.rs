//! Outbound flow-stream transport.
//!
//! # Purpose
//! Pushes columnar batches from a local execution pipeline to a remote consumer over one
//! long-lived bidirectional stream, while listening on the same stream for drain
//! requests and termination.
//!
//! # Notes
//! The [`Outbox`] owns the protocol; the stream itself is reached through the
//! [`FlowStreamSender`]/[`FlowStreamReceiver`] halves so QUIC, in-process channels, and
//! test doubles are interchangeable.
mod codec;
pub mod config;
mod deselector;
mod error;
pub mod exec;
pub mod inprocess;
pub mod observability;
mod outbox;
pub mod quic;
mod stream;
#[macro_use]
mod telemetry;

pub use config::OutboxConfig;
pub use deselector::Deselector;
pub use error::StreamError;
pub use exec::{BatchSource, Closer, Closers, MetadataSource};
pub use outbox::Outbox;
pub use stream::{DialParams, Dialer, FlowStream, FlowStreamReceiver, FlowStreamSender};
