//! # warden-core
//!
//! Lock-state reconciliation engine for the warden device-compliance
//! agent: decides whether a managed device is fully usable, warned
//! (soft lock), or fully restricted (hard lock), and keeps that decision
//! synchronized with the remote authority across offline periods and
//! active tampering.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      ComplianceAgent                          │
//! │                                                               │
//! │  ┌───────────────┐  ┌───────────────┐  ┌──────────────────┐  │
//! │  │ TamperDetector│  │ Heartbeat     │  │ Escalation       │  │
//! │  │ (probe aggr.) │  │ Reconciler    │  │ Tracker          │  │
//! │  └───────┬───────┘  └───────┬───────┘  └────────┬─────────┘  │
//! │          │                  │                    │            │
//! │          ▼                  ▼                    ▼            │
//! │  ┌──────────────────────────────────────────────────────┐    │
//! │  │                  LockStateMachine                     │    │
//! │  │        (single writer, persist-then-enforce)          │    │
//! │  └──────────────────────┬───────────────────────────────┘    │
//! │                         │                                     │
//! │          ┌──────────────┼──────────────┐                      │
//! │          ▼              ▼              ▼                      │
//! │  ┌──────────────┐ ┌───────────┐ ┌──────────────────┐          │
//! │  │ Compliance   │ │ Offline   │ │ DeviceControl    │          │
//! │  │ StateStore   │ │ Command   │ │ (platform crate) │          │
//! │  │ (encrypted)  │ │ Queue     │ │                  │          │
//! │  └──────────────┘ └───────────┘ └──────────────────┘          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Properties
//!
//! - **Exactly one lock state**: reads are snapshots, writes are
//!   serialized through one actor.
//! - **Monotonic escalation**: a hard lock survives everything except an
//!   explicit unlock or administrator reset.
//! - **Persist-then-enforce**: state is durable before any enforcement
//!   side effect, so a crash mid-enforcement recovers correctly.
//! - **Fail-secure boot**: ambiguous persisted state resets to unlocked
//!   instead of being trusted.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

pub mod agent;
pub mod authority;
pub mod config;
pub mod error;
pub mod escalation;
pub mod heartbeat;
pub mod lock;
pub mod machine;
pub mod policy;
pub mod queue;
pub mod store;
pub mod tamper;
pub mod types;

pub use agent::{AgentHandle, ComplianceAgent};
pub use authority::{Authority, AuthorityClient, API_KEY_HEADER};
pub use config::{PolicyConfig, WardenConfig};
pub use error::WardenError;
pub use escalation::{EscalationDecision, EscalationTracker};
pub use heartbeat::{HeartbeatReconciler, ReconcileOutcome};
pub use lock::{LockNotice, LockRecord, LockSource, LockState, LockType};
pub use machine::{LockStateMachine, TransitionOutcome};
pub use policy::{classify_directive, LockDecision, ViolationCategory, CATEGORY_POLICY};
pub use queue::{CommandStatus, DrainReport, OfflineCommandQueue, QueuedCommand};
pub use store::{ComplianceStateStore, EscalationCounter};
pub use tamper::{classify_severity, TamperDetector, TamperSeverity, TamperStatus};
pub use types::{AuthorityDirective, DeviceIdentity, HeartbeatRequest};
