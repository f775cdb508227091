//! # Cache Module
//!
//! In-memory buffers that front slower stores.
//!
//! [`TtlBuffer`] is a concurrent map whose entries expire after a fixed
//! time-to-live. Buffers are owned by the store that uses them (for example
//! the guild settings store) and are flushed on an interval by the
//! maintenance task instead of living as process-wide singletons.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use open_music_engine::cache::TtlBuffer;
//! use std::time::Duration;
//!
//! # fn example() {
//! let buffer: TtlBuffer<u64, String> = TtlBuffer::new(Duration::from_secs(60));
//! buffer.insert(1, "guild one".to_string());
//!
//! if let Some(value) = buffer.get(&1) {
//!     println!("Found buffered value: {}", value);
//! }
//! # }
//! ```

pub mod ttl_buffer;

pub use ttl_buffer::{BufferMetrics, TtlBuffer};
