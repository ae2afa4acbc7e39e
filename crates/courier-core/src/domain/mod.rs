//! Domain model (ids, task record, state machine, envelope, errors, events).

pub mod envelope;
pub mod errors;
pub mod events;
pub mod ids;
pub mod state;
pub mod task;

pub use self::envelope::{EventEnvelope, RawEnvelope};
pub use self::errors::{CourierError, ErrorKind, HandlerError};
pub use self::events::{AlertSeverity, DeadLetterAction, DomainEvent};
pub use self::ids::{MessageId, TaskId};
pub use self::state::TaskState;
pub use self::task::{FailureDisposition, Revision, TaskRecord};
