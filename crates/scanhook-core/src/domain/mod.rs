//! Domain model: identifiers, processor outcomes, and error types.

pub mod errors;
pub mod ids;
pub mod outcome;

pub use self::errors::{ProcessError, StoreError};
pub use self::ids::{JobId, NotificationId};
pub use self::outcome::{Outcome, OutcomeKind};
