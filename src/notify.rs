/// Receiver of blocked-call notices. Delivery is best-effort; the engine
/// calls this from its background worker, never from `evaluate`.
pub trait NotificationSink: Send + Sync {
    fn notify_blocked(&self, number: &str, reason: &str);
}

/// Writes each blocked call to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify_blocked(&self, number: &str, reason: &str) {
        let number = if number.is_empty() { "<anonymous>" } else { number };
        log::warn!("Blocked call from {number}: {reason}");
    }
}
