//! In-process research clients and fixtures for orchestrator tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use prospector_research::{ResearchClient, ResearchRequest, ResearchResponse};
use prospector_shared::{Candidate, RegionId, Result};
use prospector_storage::Storage;
use tokio::sync::Semaphore;
use uuid::Uuid;

type Responder = Box<dyn Fn(&ResearchRequest) -> Result<ResearchResponse> + Send + Sync>;

/// Answers each call from a closure, optionally holding every call until a
/// permit is released on its gate.
pub(crate) struct ScriptedClient {
    responder: Responder,
    gate: Option<Arc<Semaphore>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClient {
    /// Sub-regions requested so far, in call order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResearchClient for ScriptedClient {
    async fn research(&self, request: &ResearchRequest) -> Result<ResearchResponse> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.calls.lock().unwrap().push(request.sub_region.clone());
        (self.responder)(request)
    }
}

pub(crate) fn scripted(
    f: impl Fn(&ResearchRequest) -> Result<ResearchResponse> + Send + Sync + 'static,
) -> ScriptedClient {
    ScriptedClient {
        responder: Box::new(f),
        gate: None,
        calls: Mutex::new(Vec::new()),
    }
}

/// Like [`scripted`], but each call waits for one permit on the returned gate.
pub(crate) fn gated(
    f: impl Fn(&ResearchRequest) -> Result<ResearchResponse> + Send + Sync + 'static,
) -> (ScriptedClient, Arc<Semaphore>) {
    let gate = Arc::new(Semaphore::new(0));
    let client = ScriptedClient {
        gate: Some(gate.clone()),
        ..scripted(f)
    };
    (client, gate)
}

pub(crate) fn candidate(name: &str, confidence: f64) -> Candidate {
    Candidate {
        name: name.into(),
        description: Some(format!("{name} services")),
        confidence,
        source_urls: vec![format!("https://example.org/{}", name.replace(' ', "-"))],
        ..Default::default()
    }
}

pub(crate) fn structured(candidates: Vec<Candidate>) -> ResearchResponse {
    ResearchResponse::Structured {
        candidates,
        summary: Some("scripted".into()),
        raw: "{}".into(),
    }
}

/// A temp-file database holding Delaware and its three counties.
pub(crate) async fn delaware() -> (Storage, RegionId) {
    let path = std::env::temp_dir().join(format!("prospector_core_test_{}.db", Uuid::now_v7()));
    let storage = Storage::open(&path).await.expect("open test db");
    let de = storage.insert_region("Delaware", "DE").await.unwrap();
    for (name, fips) in [("New Castle", "10003"), ("Kent", "10001"), ("Sussex", "10005")] {
        storage
            .insert_sub_region(de, name, Some(fips), None)
            .await
            .unwrap();
    }
    (storage, de)
}
