use serde::{Deserialize, Serialize};

use crate::error::{CorralError, Result};
use crate::protocol::codec;

/// How a job is spread over the live workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStrategy {
    /// One task per non-dead worker.
    RunOnAll,
    /// One task on a randomly chosen non-dead worker.
    RunOnOne,
}

impl std::fmt::Display for JobStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStrategy::RunOnAll => write!(f, "run-on-all"),
            JobStrategy::RunOnOne => write!(f, "run-on-one"),
        }
    }
}

/// Writes one line of text to the job output of every task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoJob {
    strategy: JobStrategy,
    line: String,
}

impl EchoJob {
    pub const TAG: &'static str = "EchoJob";

    pub fn new(strategy: JobStrategy, line: impl Into<String>) -> Self {
        Self {
            strategy,
            line: line.into(),
        }
    }

    pub fn strategy(&self) -> JobStrategy {
        self.strategy
    }

    pub fn line(&self) -> &str {
        &self.line
    }
}

/// Runs a shell command on the worker and reports its stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandJob {
    strategy: JobStrategy,
    command: String,
}

impl CommandJob {
    pub const TAG: &'static str = "CommandJob";

    pub fn new(strategy: JobStrategy, command: impl Into<String>) -> Self {
        Self {
            strategy,
            command: command.into(),
        }
    }

    pub fn strategy(&self) -> JobStrategy {
        self.strategy
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

/// A unit of work. Pure data: workers pick the behavior from the variant.
///
/// On the private worker channel the variant travels as a tag in the
/// `EXECUTE[id] <tag>` command and the payload frame holds only the variant's
/// fields. API clients send the whole enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Job {
    Echo(EchoJob),
    Command(CommandJob),
}

impl Job {
    pub fn strategy(&self) -> JobStrategy {
        match self {
            Job::Echo(job) => job.strategy(),
            Job::Command(job) => job.strategy(),
        }
    }

    /// Wire tag naming the variant.
    pub fn tag(&self) -> &'static str {
        match self {
            Job::Echo(_) => EchoJob::TAG,
            Job::Command(_) => CommandJob::TAG,
        }
    }

    /// Encode the variant's fields for the payload frame after `EXECUTE`.
    pub fn encode_payload(&self) -> Result<Vec<u8>> {
        match self {
            Job::Echo(job) => codec::encode(job),
            Job::Command(job) => codec::encode(job),
        }
    }

    /// Rebuild a job from a tag and the payload frame that followed it.
    pub fn decode_payload(tag: &str, payload: &[u8]) -> Result<Self> {
        match tag {
            EchoJob::TAG => Ok(Job::Echo(codec::decode(payload)?)),
            CommandJob::TAG => Ok(Job::Command(codec::decode(payload)?)),
            other => Err(CorralError::Protocol(format!("unknown job type {:?}", other))),
        }
    }
}

impl From<EchoJob> for Job {
    fn from(job: EchoJob) -> Self {
        Job::Echo(job)
    }
}

impl From<CommandJob> for Job {
    fn from(job: CommandJob) -> Self {
        Job::Command(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_is_fixed_at_construction() {
        let job = Job::from(EchoJob::new(JobStrategy::RunOnAll, "hello"));
        assert_eq!(job.strategy(), JobStrategy::RunOnAll);
        assert_eq!(job.tag(), "EchoJob");

        let job = Job::from(CommandJob::new(JobStrategy::RunOnOne, "true"));
        assert_eq!(job.strategy(), JobStrategy::RunOnOne);
        assert_eq!(job.tag(), "CommandJob");
    }

    #[test]
    fn payload_is_decoded_by_tag() {
        let job = Job::from(EchoJob::new(JobStrategy::RunOnOne, "hi"));
        let payload = job.encode_payload().unwrap();
        assert_eq!(Job::decode_payload(job.tag(), &payload).unwrap(), job);
    }

    #[test]
    fn payload_does_not_carry_the_variant() {
        let job = Job::from(EchoJob::new(JobStrategy::RunOnAll, "hi"));
        let payload = String::from_utf8(job.encode_payload().unwrap()).unwrap();
        assert!(!payload.contains("Echo\""));
        assert!(payload.contains("\"line\":\"hi\""));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = Job::decode_payload("SleepJob", b"{}").unwrap_err();
        assert!(matches!(err, CorralError::Protocol(_)));
    }

    #[test]
    fn mismatched_payload_is_a_decode_error() {
        let payload = Job::from(EchoJob::new(JobStrategy::RunOnAll, "hi"))
            .encode_payload()
            .unwrap();
        let err = Job::decode_payload(CommandJob::TAG, &payload).unwrap_err();
        assert!(matches!(err, CorralError::Decode { .. }));
    }

    #[test]
    fn unknown_strategy_does_not_deserialize() {
        let raw = br#"{"Echo":{"strategy":"RunOnSome","line":"x"}}"#;
        assert!(codec::decode::<Job>(raw).is_err());
    }
}
