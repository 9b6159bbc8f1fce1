pub mod dispatch;
pub mod job;
pub mod queue;
pub mod registry;

pub use dispatch::{DispatchOutcome, DispatchedJob, DispatchedTask, JobDispatcher};
pub use job::{CommandJob, EchoJob, Job, JobStrategy};
pub use queue::JobQueue;
pub use registry::{WorkerRegistration, WorkerRegistry};
