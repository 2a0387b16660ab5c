use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rocket::tokio;

use super::{MailTransport, OutgoingEmail};

/// Fixed retry schedule: a cap on attempts plus the delay to wait after each
/// failed attempt, looked up by attempt index rather than computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    max_attempts: u32,
    delays: Vec<Duration>,
}

impl RetrySchedule {
    pub fn new(max_attempts: u32, delays: Vec<Duration>) -> Self {
        RetrySchedule {
            max_attempts: max_attempts.max(1),
            delays,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the next try after `attempt` (1-based) failed, or `None`
    /// when that was the last permitted attempt. A schedule shorter than the
    /// attempt cap repeats its final entry.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }
        let idx = (attempt - 1) as usize;
        Some(
            self.delays
                .get(idx)
                .or_else(|| self.delays.last())
                .copied()
                .unwrap_or(Duration::ZERO),
        )
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        RetrySchedule::new(
            3,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(3000),
                Duration::from_millis(5000),
            ],
        )
    }
}

/// Wave size and the pause between waves of a batch send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPolicy {
    pub size: usize,
    pub pause: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        BatchPolicy {
            size: 10,
            pause: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub to: String,
    pub attempts: u32,
    pub error: Option<String>,
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub reports: Vec<DeliveryReport>,
}

impl BatchReport {
    pub fn delivered(&self) -> usize {
        self.reports.iter().filter(|r| r.is_delivered()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.delivered()
    }
}

/// Sends transactional email with bounded retry and paced batches.
pub struct EmailDispatcher {
    transport: Arc<dyn MailTransport>,
    schedule: RetrySchedule,
    batch: BatchPolicy,
}

impl EmailDispatcher {
    pub fn new(transport: Arc<dyn MailTransport>, schedule: RetrySchedule, batch: BatchPolicy) -> Self {
        EmailDispatcher {
            transport,
            schedule,
            batch,
        }
    }

    /// Try until one attempt succeeds or the schedule is exhausted. Every
    /// error consumes an attempt; there is no classification.
    pub async fn send_with_retry(&self, email: &OutgoingEmail) -> DeliveryReport {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.transport.send(email).await {
                Ok(()) => {
                    if attempt > 1 {
                        log::info!("[email] Sent to {} on attempt {}", email.to, attempt);
                    } else {
                        log::info!("[email] Sent to {}", email.to);
                    }
                    return DeliveryReport {
                        to: email.to.clone(),
                        attempts: attempt,
                        error: None,
                    };
                }
                Err(e) => match self.schedule.delay_after(attempt) {
                    Some(delay) => {
                        log::warn!(
                            "[email] Attempt {} to {} failed, retrying in {}ms: {}",
                            attempt,
                            email.to,
                            delay.as_millis(),
                            e
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        log::error!(
                            "[email] Giving up on {} after {} attempts: {}",
                            email.to,
                            attempt,
                            e
                        );
                        return DeliveryReport {
                            to: email.to.clone(),
                            attempts: attempt,
                            error: Some(e),
                        };
                    }
                },
            }
        }
    }

    /// Fire-and-forget delivery: the outcome only reaches the log.
    pub async fn deliver(&self, email: OutgoingEmail) {
        let _ = self.send_with_retry(&email).await;
    }

    /// Spawn delivery in the background and return immediately.
    pub fn queue(self: &Arc<Self>, email: OutgoingEmail) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.deliver(email).await;
        });
    }

    /// Send in waves of `batch.size`; each wave runs concurrently and is
    /// joined in full before the pause that precedes the next wave.
    pub async fn send_batch(&self, emails: Vec<OutgoingEmail>) -> BatchReport {
        let mut report = BatchReport {
            reports: Vec::with_capacity(emails.len()),
        };
        for (i, wave) in emails.chunks(self.batch.size.max(1)).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.batch.pause).await;
            }
            let results = join_all(wave.iter().map(|email| self.send_with_retry(email))).await;
            report.reports.extend(results);
        }
        report
    }

    pub fn queue_batch(self: &Arc<Self>, emails: Vec<OutgoingEmail>) {
        if emails.is_empty() {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let total = emails.len();
            let report = this.send_batch(emails).await;
            log::info!(
                "[email] Batch finished: {}/{} delivered, {} failed",
                report.delivered(),
                total,
                report.failed()
            );
        });
    }
}
