//! Domain entities.
//!
//! Trigger and source definitions are declared by users and arrive through
//! the configuration; heads and revisions are discovered; build causes are
//! built per delivery and handed to the scheduler.

pub mod cause;
pub mod head;
pub mod job;
pub mod trigger;

pub use cause::{BuildCause, CauseDetails, MergeRequestCause, SafeMergeCause};
pub use head::{Head, HeadKind, MergeRequestHead, Revision};
pub use job::{JobRecord, JobSnapshot, MultibranchSource};
pub use trigger::{EventSelection, MergeRequestFilters, RemoteIds, TriggerSpec};
