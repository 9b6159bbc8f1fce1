use std::process::Stdio;
use tokio::process::Command;

use crate::scheduler::{CommandJob, EchoJob, Job};

/// Identity a task runs under; bound before the job executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    pub runner_name: String,
    pub task_id: u64,
}

impl TaskContext {
    pub fn new(runner_name: impl Into<String>, task_id: u64) -> Self {
        Self {
            runner_name: runner_name.into(),
            task_id,
        }
    }

    /// Emit one line of job output attributed to this task.
    pub fn output(&self, line: &str) {
        tracing::info!(
            target: "corral::output",
            runner = %self.runner_name,
            task = self.task_id,
            "{}",
            line
        );
    }
}

/// Result of task execution
#[derive(Debug)]
pub struct ExecutionResult {
    pub task_id: u64,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// Runs the behavior bound to each job kind.
#[derive(Debug, Clone, Default)]
pub struct JobExecutor;

impl JobExecutor {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(&self, context: &TaskContext, job: &Job) -> ExecutionResult {
        tracing::debug!(
            runner = %context.runner_name,
            task_id = context.task_id,
            job = job.tag(),
            "Executing task"
        );
        match job {
            Job::Echo(job) => Self::echo(context, job),
            Job::Command(job) => Self::command(context, job).await,
        }
    }

    fn echo(context: &TaskContext, job: &EchoJob) -> ExecutionResult {
        context.output(job.line());
        ExecutionResult {
            task_id: context.task_id,
            succeeded: true,
            error: None,
        }
    }

    async fn command(context: &TaskContext, job: &CommandJob) -> ExecutionResult {
        let result = Command::new("sh")
            .arg("-c")
            .arg(job.command())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        Self::process_output(context, result)
    }

    fn process_output(
        context: &TaskContext,
        result: Result<std::process::Output, std::io::Error>,
    ) -> ExecutionResult {
        match result {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let exit_code = output.status.code();

                for line in stdout.lines() {
                    context.output(line);
                }

                let error = if output.status.success() {
                    None
                } else if stderr.trim().is_empty() {
                    Some(format!("Exit code: {:?}", exit_code))
                } else {
                    Some(stderr.trim_end().to_string())
                };

                tracing::info!(
                    runner = %context.runner_name,
                    task_id = context.task_id,
                    exit_code = ?exit_code,
                    "Command finished"
                );

                ExecutionResult {
                    task_id: context.task_id,
                    succeeded: error.is_none(),
                    error,
                }
            }
            Err(e) => {
                tracing::error!(
                    runner = %context.runner_name,
                    task_id = context.task_id,
                    error = %e,
                    "Command could not be started"
                );
                ExecutionResult {
                    task_id: context.task_id,
                    succeeded: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::JobStrategy;

    fn context() -> TaskContext {
        TaskContext::new("worker-1", 7)
    }

    #[tokio::test]
    async fn echo_reports_its_line() {
        let job = Job::from(EchoJob::new(JobStrategy::RunOnAll, "hello cluster"));
        let result = JobExecutor::new().execute(&context(), &job).await;
        assert!(result.succeeded);
        assert_eq!(result.task_id, 7);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn zero_exit_is_a_success() {
        let job = Job::from(CommandJob::new(JobStrategy::RunOnOne, "echo hello"));
        let result = JobExecutor::new().execute(&context(), &job).await;
        assert!(result.succeeded);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_failure() {
        let job = Job::from(CommandJob::new(JobStrategy::RunOnOne, "echo oops >&2; exit 3"));
        let result = JobExecutor::new().execute(&context(), &job).await;
        assert!(!result.succeeded);
        assert_eq!(result.error.as_deref(), Some("oops"));
    }

    #[tokio::test]
    async fn silent_failure_reports_the_exit_code() {
        let job = Job::from(CommandJob::new(JobStrategy::RunOnOne, "exit 1"));
        let result = JobExecutor::new().execute(&context(), &job).await;
        assert!(!result.succeeded);
        assert_eq!(result.error.as_deref(), Some("Exit code: Some(1)"));
    }
}
