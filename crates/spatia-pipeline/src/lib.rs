//! Spatia write pipeline
//!
//! Every write command goes through four stages inside one exclusive
//! section: execution against the object store, append to the durable log
//! buffer, fan-out to live queries and geofence evaluation. The result is
//! an [`Invocation`] carrying the [`CommandDetail`] and per-stage timings.
//!
//! ```no_run
//! use spatia_pipeline::{Command, MemoryStore, Pipeline, PipelineConfig};
//!
//! let pipeline = Pipeline::new(MemoryStore::new(), &PipelineConfig::default());
//! let invocation = pipeline
//!     .execute(&Command::new(["SET", "fleet", "truck1", "POINT", "33.5", "-112.2"]))
//!     .unwrap();
//! assert_eq!(invocation.detail.seq, 1);
//! ```

pub mod aof;
pub mod config;
pub mod coordinator;
pub mod delivery;
pub mod errors;
pub mod executor;
pub mod fence;
pub mod geo;
pub mod live;
pub mod model;
pub mod store;

pub use aof::{AofFile, AofFlusher, ReplayReport};
pub use config::{AofConfig, FlushFailurePolicy, FsyncPolicy, PipelineConfig};
pub use coordinator::{Invocation, Pipeline, PipelineStats, Stage, StageTimings};
pub use delivery::{ChannelSink, DeliveryOutcome, DropReason, EventSink};
pub use errors::{AofError, PipelineError, Result};
pub use fence::{FenceRegistry, Geofence, Transition, TriggerEvent};
pub use geo::{Geometry, Position, Region};
pub use live::{ChangeEvent, LiveRegistry, SubscriptionId};
pub use model::{ChangeKind, Command, CommandDetail, Object, OpKind};
pub use store::{MemoryStore, ObjectStore};
