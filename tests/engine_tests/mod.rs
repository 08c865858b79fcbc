mod admin_test;
mod agent_loop_test;
mod event_test;
mod fork_test;
mod handler_test;

use std::sync::{Arc, Mutex};

use sandstep::{HostContext, Value};

/// Host whose emit and whisper callbacks record everything they receive.
#[derive(Clone, Default)]
pub struct Recorder {
    pub emitted: Arc<Mutex<Vec<Value>>>,
    pub whispered: Arc<Mutex<Vec<(Value, Value)>>>,
    pub event_errors: Arc<Mutex<Vec<(String, String, String)>>>,
}

impl Recorder {
    pub fn host(&self) -> HostContext {
        let emitted = self.emitted.clone();
        let whispered = self.whispered.clone();
        let event_errors = self.event_errors.clone();
        HostContext::new()
            .with_emit(move |v| emitted.lock().unwrap().push(v))
            .with_whisper(move |h, d| whispered.lock().unwrap().push((h, d)))
            .with_event_error(move |event, source, err| {
                event_errors
                    .lock()
                    .unwrap()
                    .push((event.to_string(), source.to_string(), err.to_string()))
            })
    }

    pub fn emitted(&self) -> Vec<Value> {
        self.emitted.lock().unwrap().clone()
    }

    pub fn whispered(&self) -> Vec<(Value, Value)> {
        self.whispered.lock().unwrap().clone()
    }

    pub fn event_errors(&self) -> Vec<(String, String, String)> {
        self.event_errors.lock().unwrap().clone()
    }
}
