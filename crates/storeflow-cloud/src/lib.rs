//! StoreFlow Cloud coordination
//!
//! This crate holds the provider-independent pieces every StoreFlow resource
//! builds on: the lifecycle trait the host calls, and the coordination
//! primitives that make lifecycle calls safe against a remote API that is
//! eventually consistent and stores sub-resources inside shared documents.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │            orchestration host                    │
//! │        (create / read / update / delete)         │
//! └─────────────────┬───────────────────────────────┘
//!                   │ trait ResourceLifecycle
//! ┌─────────────────▼───────────────────────────────┐
//! │               storeflow-cloud                    │
//! │  ┌──────────────┐  ┌──────────────────────────┐ │
//! │  │ LockRegistry │◄─┤ ListMergeEngine          │ │
//! │  │ (named locks)│◄─┤ LinkedResourceProvisioner│ │
//! │  └──────────────┘  └──────────────────────────┘ │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │ Poller (probe + clock state machine)     │   │
//! │  └──────────────────────────────────────────┘   │
//! └───────┬─────────────────────────────────────────┘
//!         │
//! ┌───────▼───────┐
//! │   storage     │
//! │   provider    │
//! └───────────────┘
//! ```

pub mod context;
pub mod error;
pub mod id;
pub mod linked;
pub mod lock;
pub mod merge;
pub mod poller;
pub mod provider;
pub mod saga;
pub mod state;

// Re-exports
pub use context::{OperationContext, OperationKind, Timeouts};
pub use error::{CloudError, Result};
pub use id::ResourceId;
pub use linked::{
    Compensation, Correlated, LinkedEndpoints, LinkedPair, LinkedRequest,
    LinkedResourceProvisioner, PairRef,
};
pub use lock::{LockKey, LockRegistry, MultiLockGuard, NamedLockGuard};
pub use merge::{DocumentStore, ListMergeEngine, Mutation, NamedRecord, RecordList};
pub use poller::{
    Clock, ManualClock, PollReport, PollSession, PollState, Poller, PollerConfig, Probe,
    ProbeStatus, TokioClock, Transition,
};
pub use provider::{ResourceConfig, ResourceLifecycle};
pub use saga::{SagaLog, Side, StepKind, StepRecord};
pub use state::{ResourceState, ResourceStatus};
