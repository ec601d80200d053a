use std::time::{Duration, Instant};

/// Identity and time budget of one entry-point invocation.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    worker_name: String,
    deadline: Instant,
}

impl InvocationContext {
    pub fn new(worker_name: impl Into<String>, budget: Duration) -> Self {
        Self {
            worker_name: worker_name.into(),
            deadline: Instant::now() + budget,
        }
    }

    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn remaining_millis(&self) -> u64 {
        u64::try_from(self.remaining().as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_counts_down_to_zero() {
        let ctx = InvocationContext::new("w", Duration::from_secs(60));
        assert_eq!(ctx.worker_name(), "w");
        assert!(ctx.remaining_millis() > 59_000);

        let expired = InvocationContext::new("w", Duration::ZERO);
        assert_eq!(expired.remaining(), Duration::ZERO);
        assert_eq!(expired.remaining_millis(), 0);
    }
}
