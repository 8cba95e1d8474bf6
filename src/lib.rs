//! gypsum - publish, index and purge versioned document sets
//!
//! Uploaders deposit a version of a project into an object store under a
//! lock. The [`Publisher`](publish::Publisher) validates and indexes the
//! version, advances the project's latest pointers and releases the lock.
//! The [`Purger`](purge::Purger) deletes abandoned uploads and expired
//! versions, rewriting the pointers first so they never reference a
//! deleted version. Work is handed between the two through an issue
//! tracker acting as a [`JobQueue`](queue::JobQueue).

pub mod clock;
pub mod config;
pub mod error;
pub mod fanout;
pub mod latest;
pub mod logging;
pub mod publish;
pub mod purge;
pub mod queue;
pub mod schema;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ExitCode, GypsumError};
pub use publish::{PublishOptions, PublishOutcome, Publisher};
pub use purge::{PurgeOptions, PurgeSummary, Purger};
pub use queue::{JobQueue, QueueError};
pub use schema::SchemaRegistry;
