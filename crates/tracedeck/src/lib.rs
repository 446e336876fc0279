//! Kernel trace data engine.
//!
//! `tracedeck` turns the per-CPU record streams of one or more kernel
//! traces into a single time-ordered array of compact [`Entry`] values,
//! maintains per-entry visibility under user filters, and answers
//! indexed queries over the result.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  TraceSource (per-CPU ring buffers) │
//! │    read_cpu_first / read_next       │
//! └──────────────┬──────────────────────┘
//!                │ raw records
//! ┌──────────────▼──────────────────────┐
//! │  Ingest (one pass per CPU)          │
//! │    loss markers, calibration,       │
//! │    plugin handlers, filters         │
//! └──────────────┬──────────────────────┘
//!                │ per-CPU lists
//! ┌──────────────▼──────────────────────┐
//! │  k-way merge → Vec<Entry>           │
//! │  pairwise merge (append streams)    │
//! └──────────────┬──────────────────────┘
//!                │
//! ┌──────────────▼──────────────────────┐
//! │  Consumers                          │
//! │    visibility recompute             │
//! │    CollectionCache (cpu/pid/event)  │
//! └─────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use tracedeck::collection::{Bin, Matcher};
//! use tracedeck::config::SessionConfig;
//! use tracedeck::entry::TEXT_VIEW;
//! use tracedeck::filter::FilterKind;
//! use tracedeck::session::Session;
//! use tracedeck::source::JsonOpener;
//!
//! let mut session = Session::new(SessionConfig::default()).unwrap();
//! let sd = session.open(&JsonOpener, "trace.json").unwrap();
//! let mut entries = session.load_entries(sd).unwrap();
//!
//! // Hide a task, then recompute visibility.
//! session.add_filter_id(sd, FilterKind::HideTask, 1234).unwrap();
//! session.filter_stream_entries(sd, &mut entries).unwrap();
//!
//! // What ran first on CPU 2 in the first thousand entries?
//! let key = session
//!     .register_collection(&entries, Matcher::CPU, sd, &[2], TEXT_VIEW, 0)
//!     .unwrap();
//! let first = session
//!     .collection_front(&key, &entries, Bin { first: 0, n: 1000 })
//!     .unwrap();
//! if let Some(i) = first {
//!     println!("{}", session.dump_entry(&entries[i]).unwrap());
//! }
//! ```

pub mod collection;
pub mod config;
pub mod entry;
pub mod error;
pub mod filter;
mod ingest;
pub mod merge;
pub mod plugin;
pub mod session;
pub mod source;
pub mod stream;

pub use entry::{Entry, StreamId};
pub use error::{Error, Result};
pub use session::Session;
