//! Attendance reconciliation
//!
//! - [`core`]: the engine and its session lifecycle
//! - [`session`]: per-session state and client snapshots
//! - [`channel`]: recognition event channel
//! - [`external`]: collaborator traits and local implementations
//! - [`remote`]: collaborators backed by the recognition backend

pub mod channel;
pub mod core;
pub mod external;
pub mod remote;
pub mod session;

pub use channel::{RecognitionEvent, RecognitionSender};
pub use self::core::{Collaborators, ReconciliationEngine, SubmitOutcome};
pub use external::{
    AttendanceSink, CaptureControl, LocalCapture, ModelFileGate, ReadinessGate, RosterSource,
    StoreRoster, StoreSink,
};
pub use remote::{HttpCapture, HttpRoster};
pub use session::{Phase, SessionSnapshot};
