//! ringfile: a fixed-size round-robin database engine.
//!
//! One file holds a set of evenly-spaced time series plus several
//! consolidated archives at coarser resolutions, all ring-buffered in
//! place so the disk footprint never changes after creation. The crate
//! exposes the four library operations the format supports: create,
//! update, fetch and info.

pub mod create;
pub mod error;
pub mod fetch;
pub mod file;
pub mod format;
pub mod hw;
pub mod info;
pub mod rpn;
pub mod timespec;
pub mod update;

pub use create::create;
pub use error::{Error, ErrorKind, Result};
pub use fetch::{fetch, FetchResult};
pub use file::RrdFile;
pub use format::{Consolidation, DsType, Rrd};
pub use info::{info, InfoValue};
pub use timespec::{parse_timespec, resolve_start_end, TimeRef, TimeSpec};
pub use update::update;
