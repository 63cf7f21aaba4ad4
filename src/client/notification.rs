//! Notification sink

use serde_json::Value;
use tracing::debug;

/// Sink for server-initiated notifications.
///
/// Called from the reader loop for every id-less message; implementations
/// must not block.
pub trait NotificationHandler: Send + Sync {
    /// Handle one notification.
    fn handle(&self, method: &str, params: Option<Value>);
}

/// Default sink that logs each notification.
pub struct LoggingNotificationHandler;

impl NotificationHandler for LoggingNotificationHandler {
    fn handle(&self, method: &str, params: Option<Value>) {
        debug!(%method, ?params, "server notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<String>>);

    impl NotificationHandler for Recorder {
        fn handle(&self, method: &str, _params: Option<Value>) {
            self.0.lock().unwrap().push(method.to_string());
        }
    }

    #[test]
    fn test_handler_receives_method() {
        let recorder = Recorder(Mutex::new(Vec::new()));
        recorder.handle("notifications/progress", None);
        assert_eq!(*recorder.0.lock().unwrap(), vec!["notifications/progress"]);
    }
}
