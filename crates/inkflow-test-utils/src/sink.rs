use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use inkflow_core::traits::ProgressSink;
use inkflow_core::types::ProgressEvent;

struct CancelTrigger {
    event: String,
    after: usize,
    token: CancellationToken,
}

/// Progress sink that keeps every event for inspection.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
    trigger: Mutex<Option<CancelTrigger>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel `token` as soon as the `n`th event named `event` is recorded.
    pub fn cancel_after(self, event: &str, n: usize, token: CancellationToken) -> Self {
        *self.trigger.lock().unwrap() = Some(CancelTrigger {
            event: event.to_string(),
            after: n,
            token,
        });
        self
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Event names in emission order.
    pub fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.name() == name)
            .count()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        let name = event.name();
        let seen = {
            let mut events = self.events.lock().unwrap();
            events.push(event);
            events.iter().filter(|e| e.name() == name).count()
        };
        if let Some(trigger) = self.trigger.lock().unwrap().as_ref() {
            if trigger.event == name && seen == trigger.after {
                trigger.token.cancel();
            }
        }
    }
}
