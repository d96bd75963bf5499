//! Ingestion Module
//!
//! Decodes subscription-style envelopes into video payloads and provides the
//! sources the pipeline reads them from.

mod message;
mod source;

pub use message::{decode_message, IngestMessage};
pub use source::{ChannelSource, DirectorySource, EnvelopeFileSource, PayloadSource};
