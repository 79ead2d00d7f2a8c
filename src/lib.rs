//! Continuous weather sampling with all-time record tracking.
//!
//! One process owns one [`SensorHandle`] for its whole lifetime and drives a
//! [`SamplingLoop`]: read, normalize, append to the measurement log, update
//! the highest/lowest record of every tracked metric. Records are replaced
//! through a compare-and-swap on the [`RecordStore`], so several instances
//! can share a database. A [`Summarizer`] derives hourly trend snapshots
//! and daily reports from the same log.
//!
//! Modules follow the Explicit Module Boundary Pattern (EMBP): each one
//! exposes a small surface and this file re-exports what the binary and
//! the integration tests need.

pub mod config;
pub mod error;
pub mod models;
pub mod normalize;
pub mod records;
pub mod routes;
pub mod sampler;
pub mod schema;
pub mod sensor;
pub mod shutdown;
pub mod store;
pub mod summary;

pub use config::Config;
pub use error::{CycleError, NormalizeError, SensorError, StoreError};
pub use models::{metric, Direction, ExtremumRecord, Measurement, RawReading};
pub use normalize::Normalizer;
pub use records::{RecordUpdater, UpdateOutcome, UpdateReport};
pub use sampler::{CycleSummary, LoopSettings, LoopState, LoopStats, SamplingLoop};
pub use sensor::{DeviceSample, DriverKind, SensorDriver, SensorHandle};
pub use store::{MemoryRecordStore, PgRecordStore, RecordStore, SummaryStore};
pub use summary::{DailyReport, Summarizer, SummaryReport, SummarySettings, TrendSnapshot};
