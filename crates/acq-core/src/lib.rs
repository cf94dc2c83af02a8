//! `acq-core`
//!
//! Core types and collaborator traits for streaming from an acquisition
//! server.
//!
//! ## Key Types
//!
//! - [`AcquisitionServer`] / [`Connector`]: the opaque server and how to reach it
//! - [`StreamHandle`]: immutable description of one connected substream
//! - [`ChannelSet`]: validated, ordered channel indices
//! - [`RawBlock`] / [`Buffer`]: samples as fetched and as delivered
//! - [`AcqError`]: connection / protocol / configuration failures

pub mod buffer;
pub mod error;
pub mod server;
pub mod stream;

pub use buffer::{decimate, decimated_len, Buffer, RawBlock, Samples};
pub use error::{AcqError, AcqResult, ErrorKind};
pub use server::{AcquisitionServer, Command, Connector, TriggerLevel};
pub use stream::{
    ChannelSet, Endpoint, StreamHandle, StreamId, StreamKind, StreamSpec, DEFAULT_HOST,
    DEFAULT_PORT,
};
