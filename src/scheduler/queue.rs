use std::collections::VecDeque;

use crate::scheduler::job::Job;

/// FIFO of jobs waiting for a live worker.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: VecDeque<Job>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job behind everything already waiting.
    pub fn push(&mut self, job: Job) {
        self.jobs.push_back(job);
    }

    /// Take the oldest waiting job.
    pub fn pop(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    pub fn peek(&self) -> Option<&Job> {
        self.jobs.front()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::{EchoJob, JobStrategy};

    fn echo(line: &str) -> Job {
        EchoJob::new(JobStrategy::RunOnOne, line).into()
    }

    #[test]
    fn jobs_leave_in_arrival_order() {
        let mut queue = JobQueue::new();
        queue.push(echo("first"));
        queue.push(echo("second"));
        queue.push(echo("third"));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.peek(), Some(&echo("first")));

        let drained: Vec<Job> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(drained, vec![echo("first"), echo("second"), echo("third")]);
        assert!(queue.is_empty());
    }

    #[test]
    fn empty_queue_pops_nothing() {
        let mut queue = JobQueue::default();
        assert!(queue.pop().is_none());
        assert!(queue.peek().is_none());
    }
}
