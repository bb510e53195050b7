// Job dispatch: one detection subprocess per request, tracked by id

pub mod dispatcher;
pub mod error;
pub mod execution;
pub mod types;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{DispatchError, ErrorKind};
pub use types::{JobEvent, JobId, JobStatus};
