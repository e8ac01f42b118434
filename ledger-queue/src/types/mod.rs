pub mod ids;
pub mod message;
pub mod record;
pub mod events;
pub mod time;

pub use ids::{JobId, FailedJobId};
pub use message::NewJob;
pub use record::{JobRecord, JobStatus, FailedJobRecord};
pub use events::JobEvent;
