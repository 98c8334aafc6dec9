use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Pending-command slot plus FIFO queue for request/ack devices.
///
/// A new command goes on the wire only when the slot is empty. On
/// ACK/NACK the slot clears and the next queued command becomes ready
/// after the inter-command delay. A timeout is non-fatal: the slot
/// clears and the queue proceeds.
#[derive(Debug)]
pub struct CommandGate {
    pending: Option<(String, Instant)>,
    queue: VecDeque<String>,
    timeout: Duration,
    inter_command_delay: Duration,
    ready_at: Instant,
}

impl CommandGate {
    pub fn new(timeout: Duration, inter_command_delay: Duration) -> Self {
        CommandGate {
            pending: None,
            queue: VecDeque::new(),
            timeout,
            inter_command_delay,
            ready_at: Instant::now(),
        }
    }

    /// Queue a command. Returns the command to transmit now, if the slot
    /// was free.
    pub fn submit(&mut self, command: String) -> Option<String> {
        self.queue.push_back(command);
        self.try_dispatch(Instant::now())
    }

    /// The command currently awaiting its reply.
    pub fn pending(&self) -> Option<&str> {
        self.pending.as_ref().map(|(c, _)| c.as_str())
    }

    /// Reply (ACK or NACK) arrived: clear the slot. Returns the command
    /// that was pending.
    pub fn complete(&mut self) -> Option<String> {
        let done = self.pending.take().map(|(c, _)| c);
        self.ready_at = Instant::now() + self.inter_command_delay;
        done
    }

    /// Expire the pending command when its reply deadline passed.
    /// Returns the timed-out command.
    pub fn check_timeout(&mut self, now: Instant) -> Option<String> {
        match &self.pending {
            Some((_, sent_at)) if now.duration_since(*sent_at) >= self.timeout => {
                let (cmd, _) = self.pending.take().expect("pending checked above");
                self.ready_at = now + self.inter_command_delay;
                Some(cmd)
            }
            _ => None,
        }
    }

    /// Dispatch the next queued command when the slot is free and the
    /// inter-command delay elapsed.
    pub fn try_dispatch(&mut self, now: Instant) -> Option<String> {
        if self.pending.is_some() || now < self.ready_at {
            return None;
        }
        let cmd = self.queue.pop_front()?;
        self.pending = Some((cmd.clone(), now));
        Some(cmd)
    }

    /// Earliest instant at which the gate may need attention (reply
    /// timeout or dispatch readiness), for the device loop's timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.pending {
            Some((_, sent_at)) => Some(*sent_at + self.timeout),
            None if !self.queue.is_empty() => Some(self.ready_at),
            None => None,
        }
    }

    pub fn clear(&mut self) {
        self.pending = None;
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> CommandGate {
        CommandGate::new(Duration::from_millis(1000), Duration::from_millis(20))
    }

    #[test]
    fn second_command_waits_for_ack() {
        let mut gate = gate();
        assert_eq!(gate.submit("AP".into()).as_deref(), Some("AP"));
        assert_eq!(gate.submit("SR".into()), None);
        assert_eq!(gate.pending(), Some("AP"));

        assert_eq!(gate.complete().as_deref(), Some("AP"));
        // Inter-command delay not elapsed yet.
        assert_eq!(gate.try_dispatch(Instant::now()), None);
        let later = Instant::now() + Duration::from_millis(25);
        assert_eq!(gate.try_dispatch(later).as_deref(), Some("SR"));
    }

    #[test]
    fn timeout_clears_slot_and_queue_proceeds() {
        let mut gate = gate();
        gate.submit("MV 63000".into());
        gate.submit("AP".into());

        let now = Instant::now() + Duration::from_millis(1500);
        assert_eq!(gate.check_timeout(now).as_deref(), Some("MV 63000"));
        let after_delay = now + Duration::from_millis(25);
        assert_eq!(gate.try_dispatch(after_delay).as_deref(), Some("AP"));
    }
}
