use std::collections::HashMap;
use std::sync::Arc;

use inkflow_core::config::EngineConfig;
use inkflow_engine::{HandlerEnv, Orchestrator, PromptLibrary};
use inkflow_test_utils::{InMemoryCards, MemoryProjectStore, MockGenerator, RecordingSink};

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub sink: Arc<RecordingSink>,
    pub store: Arc<MemoryProjectStore>,
}

pub fn harness(generator: MockGenerator) -> Harness {
    harness_with_sink(generator, RecordingSink::new())
}

pub fn harness_with_sink(generator: MockGenerator, sink: RecordingSink) -> Harness {
    let sink = Arc::new(sink);
    let store = Arc::new(MemoryProjectStore::new());
    let env = HandlerEnv::new(
        Arc::new(generator),
        Arc::new(InMemoryCards::new()),
        sink.clone(),
        EngineConfig::default(),
        PromptLibrary::new(HashMap::new()),
    );
    Harness {
        orchestrator: Orchestrator::new(env, store.clone()),
        sink,
        store,
    }
}

/// Node ids of every `StepStarted` event, in order.
pub fn started(sink: &RecordingSink) -> Vec<String> {
    sink.events()
        .into_iter()
        .filter_map(|e| match e {
            inkflow_core::types::ProgressEvent::StepStarted { node_id } => Some(node_id),
            _ => None,
        })
        .collect()
}

/// Node ids of every `StepCompleted` event, in order.
pub fn completed(sink: &RecordingSink) -> Vec<String> {
    sink.events()
        .into_iter()
        .filter_map(|e| match e {
            inkflow_core::types::ProgressEvent::StepCompleted { node_id, .. } => Some(node_id),
            _ => None,
        })
        .collect()
}
