//! Batching exporter for finished spans
//!
//! - `encoder` - MessagePack payload format and its decoder
//! - `transport` - `Transport` trait, the reqwest-based `HttpTransport` and
//!   an in-memory `RecordingTransport`
//! - `writer` - background batching task implementing `SpanSink`

pub mod encoder;
pub mod transport;
pub mod writer;

pub use encoder::{decode, encode, Event, Metadata, Payload};
pub use transport::{HttpTransport, RecordingTransport, Transport};
pub use writer::{Writer, WriterOptions};
