/*
 * Schedule Module
 *
 * Cooperative, poll-driven timers for the tick loop. A RepeatingTask never
 * blocks: the host polls it at tick start with the current time and it
 * reports whether it is due. It fires at most once per poll, and the next
 * interval starts from the poll that fired it.
 */

#[derive(Clone, Debug, PartialEq)]
pub struct RepeatingTask {
    interval: f32,
    next_due: Option<f32>,
    cancelled: bool,
}

impl RepeatingTask {
    pub fn new(interval: f32) -> Self {
        Self {
            interval: interval.max(f32::EPSILON),
            next_due: None,
            cancelled: false,
        }
    }

    pub fn interval(&self) -> f32 {
        self.interval
    }

    // Arm the task so its first firing happens at `now`
    pub fn start(&mut self, now: f32) {
        if !self.cancelled {
            self.next_due = Some(now);
        }
    }

    pub fn is_running(&self) -> bool {
        self.next_due.is_some() && !self.cancelled
    }

    pub fn next_due(&self) -> Option<f32> {
        self.next_due
    }

    // True when the task is due at `now`; re-arms for `now + interval`
    pub fn poll(&mut self, now: f32) -> bool {
        if self.cancelled {
            return false;
        }
        match self.next_due {
            Some(due) if now >= due => {
                self.next_due = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }

    // Permanently stop the task
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.next_due = None;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}
