use std::time::Duration;

/// Fixed attempt budget with a constant pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn machine(&self) -> RetryMachine {
        RetryMachine::new(*self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting { attempt: u32 },
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
    Aborted { attempts: u32 },
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RetryState::Attempting { .. })
    }
}

/// How long to wait after a failed attempt before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    Delay,
    Immediate,
}

#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Attempting { attempt: 1 },
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Attempt number in progress, or the number of attempts spent once terminal.
    pub fn attempt(&self) -> u32 {
        match self.state {
            RetryState::Attempting { attempt } => attempt,
            RetryState::Succeeded { attempts }
            | RetryState::Exhausted { attempts }
            | RetryState::Aborted { attempts } => attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    pub fn is_attempting(&self) -> bool {
        !self.state.is_terminal()
    }

    pub fn succeed(&mut self) {
        if let RetryState::Attempting { attempt } = self.state {
            self.state = RetryState::Succeeded { attempts: attempt };
        }
    }

    /// Stops without spending the remaining budget.
    pub fn abort(&mut self) {
        if let RetryState::Attempting { attempt } = self.state {
            self.state = RetryState::Aborted { attempts: attempt };
        }
    }

    /// Records a failed attempt. Returns the pause before the next attempt, or
    /// `None` once the budget is spent.
    pub fn fail(&mut self, pause: Pause) -> Option<Duration> {
        let RetryState::Attempting { attempt } = self.state else {
            return None;
        };
        if attempt >= self.policy.max_attempts {
            self.state = RetryState::Exhausted { attempts: attempt };
            return None;
        }
        self.state = RetryState::Attempting {
            attempt: attempt + 1,
        };
        Some(match pause {
            Pause::Delay => self.policy.delay,
            Pause::Immediate => Duration::ZERO,
        })
    }
}

pub(crate) async fn pause_for(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(5))
    }

    #[test]
    fn test_success_on_first_attempt() {
        let mut machine = policy().machine();
        assert_eq!(machine.state(), RetryState::Attempting { attempt: 1 });
        machine.succeed();
        assert_eq!(machine.state(), RetryState::Succeeded { attempts: 1 });
        assert!(!machine.is_attempting());
    }

    #[test]
    fn test_fail_then_succeed() {
        let mut machine = policy().machine();
        assert_eq!(machine.fail(Pause::Delay), Some(Duration::from_secs(5)));
        assert_eq!(machine.fail(Pause::Immediate), Some(Duration::ZERO));
        assert_eq!(machine.attempt(), 3);
        machine.succeed();
        assert_eq!(machine.state(), RetryState::Succeeded { attempts: 3 });
    }

    #[test]
    fn test_exhaustion_after_budget() {
        let mut machine = policy().machine();
        assert!(machine.fail(Pause::Delay).is_some());
        assert!(machine.fail(Pause::Delay).is_some());
        assert_eq!(machine.fail(Pause::Delay), None);
        assert_eq!(machine.state(), RetryState::Exhausted { attempts: 3 });
        // terminal states are sticky
        assert_eq!(machine.fail(Pause::Delay), None);
        machine.succeed();
        assert_eq!(machine.state(), RetryState::Exhausted { attempts: 3 });
    }

    #[test]
    fn test_abort_keeps_attempt_count() {
        let mut machine = policy().machine();
        machine.fail(Pause::Delay);
        machine.abort();
        assert_eq!(machine.state(), RetryState::Aborted { attempts: 2 });
        assert_eq!(machine.attempt(), 2);
    }

    #[test]
    fn test_zero_budget_is_clamped_to_one() {
        let mut machine = RetryPolicy::new(0, Duration::ZERO).machine();
        assert_eq!(machine.max_attempts(), 1);
        assert_eq!(machine.fail(Pause::Delay), None);
        assert_eq!(machine.state(), RetryState::Exhausted { attempts: 1 });
    }
}
