use crossbeam::channel::Sender;
use tracing::warn;

/// A delivered alert transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub rule: String,
    pub message: String,
}

/// Alert delivery targets. Chat and issue-tracker integrations live outside
/// the core; embedders bridge them through the channel variant.
#[derive(Debug, Clone)]
pub enum Sink {
    /// Emits the firing through the structured logger at WARN.
    Log,
    /// Forwards the firing to an in-process consumer.
    Channel(Sender<Notification>),
}

impl Sink {
    pub fn notify(&self, rule: &str, message: &str) {
        match self {
            Sink::Log => warn!(rule = %rule, message = %message, "alert fired"),
            Sink::Channel(tx) => {
                let _ = tx.send(Notification {
                    rule: rule.to_string(),
                    message: message.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_delivers() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let sink = Sink::Channel(tx);
        sink.notify("hot", "too many blocked tasks");
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification {
                rule: "hot".to_string(),
                message: "too many blocked tasks".to_string(),
            }
        );
    }

    #[test]
    fn closed_channel_is_ignored() {
        let (tx, rx) = crossbeam::channel::unbounded();
        drop(rx);
        Sink::Channel(tx).notify("hot", "msg");
    }
}
