//! Domain model (IDs, status machine, records, events, errors).

pub mod errors;
pub mod events;
pub mod ids;
pub mod record;
pub mod status;

pub use self::errors::{ErrorKind, HandoffError};
pub use self::events::{ResultFields, StatusEvent};
pub use self::ids::{OwnerId, RecordId};
pub use self::record::{AnalysisResult, BlobLocation, Decision, TaskRecord};
pub use self::status::RecordStatus;
