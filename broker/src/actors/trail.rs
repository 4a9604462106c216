//! TrailActor - hands experiment records to the log collaborator.
//!
//! The broker casts one record per terminal turn and never waits for the
//! write; sink failures are diagnostics, not client-path errors. The actor
//! mailbox keeps appends ordered even though callers fire and forget.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio::io::AsyncWriteExt;

use shared_types::ExperimentRecord;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TrailError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("sink write failed: {0}")]
    Io(String),
}

/// External log collaborator contract.
#[async_trait]
pub trait TrailSink: Send + Sync {
    async fn append(&self, record: &ExperimentRecord) -> Result<(), TrailError>;
}

// ============================================================================
// Sinks
// ============================================================================

/// Default collaborator: one JSON object per line, appended to a file.
pub struct JsonlTrailSink {
    path: PathBuf,
}

impl JsonlTrailSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl TrailSink for JsonlTrailSink {
    async fn append(&self, record: &ExperimentRecord) -> Result<(), TrailError> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| TrailError::Serialization(e.to_string()))?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| TrailError::Io(e.to_string()))?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| TrailError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| TrailError::Io(e.to_string()))?;
        Ok(())
    }
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct MemoryTrailSink {
    records: std::sync::Mutex<Vec<ExperimentRecord>>,
}

impl MemoryTrailSink {
    pub fn records(&self) -> Vec<ExperimentRecord> {
        self.records.lock().expect("trail sink lock").clone()
    }
}

#[async_trait]
impl TrailSink for MemoryTrailSink {
    async fn append(&self, record: &ExperimentRecord) -> Result<(), TrailError> {
        self.records
            .lock()
            .expect("trail sink lock")
            .push(record.clone());
        Ok(())
    }
}

// ============================================================================
// Actor
// ============================================================================

#[derive(Debug, Default)]
pub struct TrailActor;

pub struct TrailArguments {
    pub sink: Arc<dyn TrailSink>,
}

pub struct TrailState {
    sink: Arc<dyn TrailSink>,
}

pub enum TrailMsg {
    /// Fire-and-forget append of one record.
    Append(ExperimentRecord),
    /// Barrier for tests: replies once all prior appends are handled.
    Sync { reply: RpcReplyPort<()> },
}

#[async_trait]
impl Actor for TrailActor {
    type Msg = TrailMsg;
    type State = TrailState;
    type Arguments = TrailArguments;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(TrailState { sink: args.sink })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            TrailMsg::Append(record) => {
                if let Err(e) = state.sink.append(&record).await {
                    tracing::error!(
                        turn_id = %record.turn_id,
                        error = %e,
                        "Failed to persist experiment record"
                    );
                } else {
                    tracing::debug!(turn_id = %record.turn_id, "Experiment record appended");
                }
            }
            TrailMsg::Sync { reply } => {
                let _ = reply.send(());
            }
        }
        Ok(())
    }
}
