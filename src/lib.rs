//! MPEG transport stream demultiplexer.
//!
//! Bytes pushed into a [`Demuxer`] are framed into transport packets,
//! PAT/PMT/CAT tables are tracked as they change, and each elementary stream
//! of the selected program is reassembled into timestamped access units
//! delivered to sinks created by an [`OutputFactory`].

pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod interfaces;
pub mod network;
pub mod packet;
pub mod pes;
pub mod processor;
pub mod psi;
pub mod report;
pub mod stats;
pub mod sync;
pub mod types;

pub use config::DemuxConfig;
pub use error::{DemuxError, Result};
pub use interfaces::{ByteSource, CaHook, ClockQuery, OutputFactory, ReaderSource, StreamSink};
pub use processor::Demuxer;
pub use types::{AccessUnit, DemuxState, StreamInfo, StreamType};
