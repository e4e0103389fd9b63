use helmsman_protocol::{EventMsg, EventPayload, EventSink, LifecycleStage};
use parking_lot::Mutex;

/// Event sink that keeps every event in memory.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<EventMsg>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventMsg> {
        self.events.lock().clone()
    }

    pub fn payloads(&self) -> Vec<EventPayload> {
        self.events
            .lock()
            .iter()
            .map(|event| event.payload.clone())
            .collect()
    }

    /// Terminal stages emitted, in order.
    pub fn terminals(&self) -> Vec<LifecycleStage> {
        self.payloads()
            .into_iter()
            .filter_map(|payload| match payload {
                EventPayload::Terminal { stage, .. } => Some(stage),
                _ => None,
            })
            .collect()
    }

    /// Distinct trace ids seen, in first-seen order.
    pub fn trace_ids(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for event in self.events.lock().iter() {
            if !seen.contains(&event.trace_id) {
                seen.push(event.trace_id.clone());
            }
        }
        seen
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: EventMsg) {
        self.events.lock().push(event);
    }
}
