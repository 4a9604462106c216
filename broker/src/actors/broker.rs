//! BrokerActor - pending queue, mode dispatch, and turn lifecycle.
//!
//! The actor mailbox is the single point of serialized access for the two
//! pieces of process-wide mutable state (the pending queue and the copilot
//! mode), so FIFO presentation, the Auto-mode first-disposition-wins
//! tie-break, and the release-connection-exactly-once rule all hold by
//! construction: every disposition, cancellation, and abort is one message
//! handled in mailbox order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::actors::draft::{DraftClient, DraftError};
use crate::actors::trail::TrailMsg;
use crate::relay;
use shared_types::{
    ChatMessage, CopilotMode, DraftStatus, DraftView, ExperimentRecord, OperatorEvent, Role,
    TurnDetail, TurnId, TurnOutcome, TurnState, TurnSummary,
};

/// How many terminal turn ids to remember for classifying late
/// dispositions as superseded rather than unknown.
const FINISHED_MEMORY: usize = 256;

const PREVIEW_CHARS: usize = 120;

// ============================================================================
// Data Types
// ============================================================================

/// One inbound request awaiting a response.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub turn_id: TurnId,
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub stream: bool,
    pub created_at: DateTime<Utc>,
    /// Mode captured at creation; later mode switches do not retroactively
    /// change this turn's contract.
    pub mode: CopilotMode,
}

/// Events relayed to the held client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Chunk(String),
    Done,
}

/// What the client-facing handler gets back when a turn is accepted.
pub struct TurnTicket {
    pub turn: ConversationTurn,
    pub events: mpsc::UnboundedReceiver<RelayEvent>,
}

/// Result of an operator/auto disposition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Delivered,
    /// The turn already reached a terminal state; the submission was
    /// discarded (first disposition wins). Not an error for any user.
    Superseded,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("turn not found: {0}")]
    TurnNotFound(String),

    #[error("final text cannot be empty")]
    EmptyText,

    #[error("turn already has streamed output; use append/finish")]
    AlreadyStreaming,
}

struct DraftSlot {
    status: DraftStatus,
    text: Option<String>,
    error: Option<String>,
    stale: bool,
    token: CancellationToken,
    generation: u64,
}

struct TurnHandle {
    turn: ConversationTurn,
    state: TurnState,
    /// Held client connection. Dropped exactly once, when the handle
    /// leaves the turn table on the terminal transition.
    relay: mpsc::UnboundedSender<RelayEvent>,
    draft: Option<DraftSlot>,
    /// Text already streamed by operator appends.
    partial: String,
}

// ============================================================================
// Messages
// ============================================================================

pub enum BrokerMsg {
    /// A normalized client request enters the broker.
    BeginTurn {
        model: String,
        stream: bool,
        messages: Vec<ChatMessage>,
        reply: RpcReplyPort<TurnTicket>,
    },
    /// The client connection for a turn went away. Idempotent.
    ClientGone { turn_id: TurnId },
    /// A spawned draft task finished (any outcome).
    DraftFinished {
        turn_id: TurnId,
        generation: u64,
        result: Result<String, DraftError>,
    },
    QueueList {
        reply: RpcReplyPort<Vec<TurnSummary>>,
    },
    /// Idempotent peek of the queue head.
    CurrentTurn {
        reply: RpcReplyPort<Option<TurnSummary>>,
    },
    GetTurn {
        turn_id: TurnId,
        reply: RpcReplyPort<Option<TurnDetail>>,
    },
    /// Operator claims a turn, blocking Auto-mode auto-submission.
    Claim {
        turn_id: TurnId,
        reply: RpcReplyPort<Result<TurnSummary, BrokerError>>,
    },
    /// Atomic disposition with the complete final text.
    SubmitFinal {
        turn_id: TurnId,
        text: String,
        reply: RpcReplyPort<Result<SubmitOutcome, BrokerError>>,
    },
    /// Incremental operator keystrokes for a streamed disposition.
    AppendDelta {
        turn_id: TurnId,
        delta: String,
        reply: RpcReplyPort<Result<SubmitOutcome, BrokerError>>,
    },
    /// Close an incremental disposition; the accumulated text is final.
    FinishStream {
        turn_id: TurnId,
        reply: RpcReplyPort<Result<SubmitOutcome, BrokerError>>,
    },
    /// Fresh draft request, superseding any in-flight generation.
    Regenerate {
        turn_id: TurnId,
        instruction: Option<String>,
        reply: RpcReplyPort<Result<(), BrokerError>>,
    },
    GetMode {
        reply: RpcReplyPort<CopilotMode>,
    },
    SetMode {
        mode: CopilotMode,
        reply: RpcReplyPort<CopilotMode>,
    },
    /// The operator surface disconnected: release claims, flag drafts stale.
    OperatorGone,
}

// ============================================================================
// Actor
// ============================================================================

#[derive(Debug, Default)]
pub struct BrokerActor;

pub struct BrokerArguments {
    pub draft_client: Arc<dyn DraftClient>,
    pub trail: ActorRef<TrailMsg>,
    pub default_mode: CopilotMode,
    pub draft_timeout: Duration,
    pub events: broadcast::Sender<OperatorEvent>,
}

pub struct BrokerState {
    mode: CopilotMode,
    queue: VecDeque<TurnId>,
    turns: HashMap<TurnId, TurnHandle>,
    finished: VecDeque<TurnId>,
    draft_client: Arc<dyn DraftClient>,
    trail: ActorRef<TrailMsg>,
    draft_timeout: Duration,
    events: broadcast::Sender<OperatorEvent>,
}

#[async_trait]
impl Actor for BrokerActor {
    type Msg = BrokerMsg;
    type State = BrokerState;
    type Arguments = BrokerArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            mode = %args.default_mode,
            "BrokerActor starting"
        );
        Ok(BrokerState {
            mode: args.default_mode,
            queue: VecDeque::new(),
            turns: HashMap::new(),
            finished: VecDeque::new(),
            draft_client: args.draft_client,
            trail: args.trail,
            draft_timeout: args.draft_timeout,
            events: args.events,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            BrokerMsg::BeginTurn {
                model,
                stream,
                messages,
                reply,
            } => {
                let ticket = self.handle_begin_turn(&myself, state, model, stream, messages);
                let _ = reply.send(ticket);
            }
            BrokerMsg::ClientGone { turn_id } => {
                self.abort_turn(state, &turn_id);
            }
            BrokerMsg::DraftFinished {
                turn_id,
                generation,
                result,
            } => {
                self.handle_draft_finished(state, turn_id, generation, result);
            }
            BrokerMsg::QueueList { reply } => {
                let list = state
                    .queue
                    .iter()
                    .filter_map(|id| state.turns.get(id).map(summary))
                    .collect();
                let _ = reply.send(list);
            }
            BrokerMsg::CurrentTurn { reply } => {
                let current = state
                    .queue
                    .front()
                    .and_then(|id| state.turns.get(id))
                    .map(summary);
                let _ = reply.send(current);
            }
            BrokerMsg::GetTurn { turn_id, reply } => {
                let detail = state.turns.get(&turn_id).map(|handle| TurnDetail {
                    summary: summary(handle),
                    messages: handle.turn.messages.clone(),
                });
                let _ = reply.send(detail);
            }
            BrokerMsg::Claim { turn_id, reply } => {
                let result = match state.turns.get_mut(&turn_id) {
                    Some(handle) => {
                        handle.state = TurnState::Claimed;
                        tracing::debug!(turn_id = %turn_id, "Turn claimed by operator");
                        Ok(summary(handle))
                    }
                    None => Err(BrokerError::TurnNotFound(turn_id.0.clone())),
                };
                let _ = reply.send(result);
            }
            BrokerMsg::SubmitFinal {
                turn_id,
                text,
                reply,
            } => {
                let result = self.handle_submit_final(state, &turn_id, text);
                let _ = reply.send(result);
            }
            BrokerMsg::AppendDelta {
                turn_id,
                delta,
                reply,
            } => {
                let result = self.handle_append_delta(state, &turn_id, delta);
                let _ = reply.send(result);
            }
            BrokerMsg::FinishStream { turn_id, reply } => {
                let result = self.handle_finish_stream(state, &turn_id);
                let _ = reply.send(result);
            }
            BrokerMsg::Regenerate {
                turn_id,
                instruction,
                reply,
            } => {
                let result = match state.turns.get_mut(&turn_id) {
                    Some(handle) => {
                        spawn_draft(&myself, state.draft_client.clone(), state.draft_timeout, handle, instruction);
                        Ok(())
                    }
                    None => Err(BrokerError::TurnNotFound(turn_id.0.clone())),
                };
                let _ = reply.send(result);
            }
            BrokerMsg::GetMode { reply } => {
                let _ = reply.send(state.mode);
            }
            BrokerMsg::SetMode { mode, reply } => {
                tracing::info!(from = %state.mode, to = %mode, "Copilot mode changed");
                state.mode = mode;
                let _ = reply.send(state.mode);
            }
            BrokerMsg::OperatorGone => {
                self.handle_operator_gone(state);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl BrokerActor {
    fn handle_begin_turn(
        &self,
        myself: &ActorRef<BrokerMsg>,
        state: &mut BrokerState,
        model: String,
        stream: bool,
        messages: Vec<ChatMessage>,
    ) -> TurnTicket {
        let turn = ConversationTurn {
            turn_id: TurnId::generate(),
            messages,
            model,
            stream,
            created_at: Utc::now(),
            mode: state.mode,
        };
        let turn_id = turn.turn_id.clone();

        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let mut handle = TurnHandle {
            turn: turn.clone(),
            state: TurnState::Queued,
            relay: relay_tx,
            draft: None,
            partial: String::new(),
        };

        match turn.mode {
            CopilotMode::Disabled => {}
            CopilotMode::Draft | CopilotMode::Auto => {
                spawn_draft(
                    myself,
                    state.draft_client.clone(),
                    state.draft_timeout,
                    &mut handle,
                    None,
                );
            }
        }

        let was_empty = state.queue.is_empty();
        state.queue.push_back(turn_id.clone());
        state.turns.insert(turn_id.clone(), handle);
        if was_empty {
            publish(state, OperatorEvent::QueueChanged { size: 1 });
        }

        tracing::info!(
            turn_id = %turn_id,
            mode = %turn.mode,
            stream,
            queued = state.queue.len(),
            "Turn accepted"
        );

        TurnTicket {
            turn,
            events: relay_rx,
        }
    }

    fn handle_draft_finished(
        &self,
        state: &mut BrokerState,
        turn_id: TurnId,
        generation: u64,
        result: Result<String, DraftError>,
    ) {
        let mut auto_submit: Option<String> = None;
        let mut event: Option<OperatorEvent> = None;
        {
            let Some(handle) = state.turns.get_mut(&turn_id) else {
                tracing::debug!(turn_id = %turn_id, "Late draft result for finished turn discarded");
                return;
            };
            let Some(slot) = handle.draft.as_mut() else {
                return;
            };
            if slot.generation != generation || slot.status != DraftStatus::Pending {
                tracing::debug!(
                    turn_id = %turn_id,
                    generation,
                    current_generation = slot.generation,
                    "Superseded draft result discarded"
                );
                return;
            }

            match result {
                Ok(text) => {
                    slot.status = DraftStatus::Ready;
                    slot.text = Some(text.clone());
                    tracing::info!(turn_id = %turn_id, generation, "Draft ready");
                    event = Some(OperatorEvent::DraftReady {
                        turn_id: turn_id.clone(),
                    });
                    if handle.turn.mode == CopilotMode::Auto
                        && handle.state != TurnState::Claimed
                        && handle.partial.is_empty()
                    {
                        auto_submit = Some(text);
                    }
                }
                Err(DraftError::Cancelled) => {
                    slot.status = DraftStatus::Cancelled;
                    tracing::debug!(turn_id = %turn_id, generation, "Draft cancelled");
                }
                Err(e) => {
                    slot.status = DraftStatus::Failed;
                    slot.error = Some(e.to_string());
                    tracing::warn!(
                        turn_id = %turn_id,
                        generation,
                        error = %e,
                        "Draft generation failed; turn degrades to human authorship"
                    );
                    event = Some(OperatorEvent::DraftFailed {
                        turn_id: turn_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if let Some(event) = event {
            publish(state, event);
        }
        if let Some(text) = auto_submit {
            // First disposition wins; this is first because it runs now,
            // inside the same serialized mailbox that any operator submit
            // would have to pass through.
            let _ = self.retire_with_text(state, &turn_id, text, "auto");
        }
    }

    fn handle_submit_final(
        &self,
        state: &mut BrokerState,
        turn_id: &TurnId,
        text: String,
    ) -> Result<SubmitOutcome, BrokerError> {
        if text.trim().is_empty() {
            return Err(BrokerError::EmptyText);
        }
        match state.turns.get(turn_id) {
            Some(handle) if !handle.partial.is_empty() => Err(BrokerError::AlreadyStreaming),
            Some(_) => self.retire_with_text(state, turn_id, text, "operator"),
            None => self.classify_missing(state, turn_id),
        }
    }

    fn handle_append_delta(
        &self,
        state: &mut BrokerState,
        turn_id: &TurnId,
        delta: String,
    ) -> Result<SubmitOutcome, BrokerError> {
        match state.turns.get_mut(turn_id) {
            Some(handle) => {
                // Typing counts as claiming: Auto must not race the operator.
                handle.state = TurnState::Claimed;
                if !delta.is_empty() {
                    handle.partial.push_str(&delta);
                    let _ = handle.relay.send(RelayEvent::Chunk(delta));
                }
                Ok(SubmitOutcome::Delivered)
            }
            None => self.classify_missing(state, turn_id),
        }
    }

    fn handle_finish_stream(
        &self,
        state: &mut BrokerState,
        turn_id: &TurnId,
    ) -> Result<SubmitOutcome, BrokerError> {
        match state.turns.get(turn_id) {
            Some(handle) if handle.partial.is_empty() => Err(BrokerError::EmptyText),
            Some(_) => match state.turns.remove(turn_id) {
                Some(handle) => {
                    let _ = handle.relay.send(RelayEvent::Done);
                    self.finish_turn(state, turn_id, handle, None, TurnOutcome::Retired, "operator");
                    Ok(SubmitOutcome::Delivered)
                }
                None => self.classify_missing(state, turn_id),
            },
            None => self.classify_missing(state, turn_id),
        }
    }

    fn handle_operator_gone(&self, state: &mut BrokerState) {
        let mut released = 0usize;
        let mut flagged = 0usize;
        for handle in state.turns.values_mut() {
            if handle.state == TurnState::Claimed {
                handle.state = TurnState::Queued;
                released += 1;
            }
            if let Some(slot) = handle.draft.as_mut() {
                if slot.status == DraftStatus::Ready && !slot.stale {
                    slot.stale = true;
                    flagged += 1;
                }
            }
        }
        tracing::info!(
            released,
            stale_drafts = flagged,
            pending = state.queue.len(),
            "Operator surface disconnected; turns remain queued"
        );
    }

    // ------------------------------------------------------------------
    // Terminal transitions
    // ------------------------------------------------------------------

    /// Atomic disposition: synthesize chunks, close the stream, retire.
    fn retire_with_text(
        &self,
        state: &mut BrokerState,
        turn_id: &TurnId,
        text: String,
        by: &'static str,
    ) -> Result<SubmitOutcome, BrokerError> {
        let Some(handle) = state.turns.remove(turn_id) else {
            return self.classify_missing(state, turn_id);
        };

        for chunk in relay::synthesize_chunks(&text) {
            let _ = handle.relay.send(RelayEvent::Chunk(chunk));
        }
        let _ = handle.relay.send(RelayEvent::Done);

        self.finish_turn(state, turn_id, handle, Some(text), TurnOutcome::Retired, by);
        Ok(SubmitOutcome::Delivered)
    }

    /// Client disconnect: retire with whatever was streamed. Idempotent;
    /// a second call finds no handle and does nothing.
    fn abort_turn(&self, state: &mut BrokerState, turn_id: &TurnId) {
        let Some(handle) = state.turns.remove(turn_id) else {
            tracing::debug!(turn_id = %turn_id, "Abort for already-terminal turn ignored");
            return;
        };
        self.finish_turn(state, turn_id, handle, None, TurnOutcome::Aborted, "client");
    }

    /// Common tail of every terminal transition. Consumes the handle, so
    /// the held connection is released exactly once and no disposition can
    /// follow: the turn is no longer addressable.
    fn finish_turn(
        &self,
        state: &mut BrokerState,
        turn_id: &TurnId,
        handle: TurnHandle,
        final_text: Option<String>,
        outcome: TurnOutcome,
        by: &'static str,
    ) {
        state.queue.retain(|id| id != turn_id);
        if let Some(slot) = &handle.draft {
            slot.token.cancel();
        }

        let final_text = final_text.or_else(|| {
            if handle.partial.is_empty() {
                None
            } else {
                Some(handle.partial.clone())
            }
        });
        let draft = handle
            .draft
            .as_ref()
            .filter(|slot| slot.status == DraftStatus::Ready)
            .and_then(|slot| slot.text.clone());

        let record = ExperimentRecord {
            turn_id: turn_id.clone(),
            messages: handle.turn.messages,
            draft,
            final_text,
            mode: handle.turn.mode,
            outcome,
            created_at: handle.turn.created_at,
            completed_at: Utc::now(),
        };
        if let Err(e) = state.trail.cast(TrailMsg::Append(record)) {
            tracing::error!(turn_id = %turn_id, error = %e, "Failed to hand record to trail actor");
        }

        state.finished.push_back(turn_id.clone());
        if state.finished.len() > FINISHED_MEMORY {
            state.finished.pop_front();
        }

        let event = match outcome {
            TurnOutcome::Retired => OperatorEvent::TurnRetired {
                turn_id: turn_id.clone(),
            },
            TurnOutcome::Aborted => OperatorEvent::TurnAborted {
                turn_id: turn_id.clone(),
            },
        };
        publish(state, event);

        tracing::info!(
            turn_id = %turn_id,
            ?outcome,
            by,
            remaining = state.queue.len(),
            "Turn reached terminal state"
        );
    }

    /// A disposition aimed at a turn that is no longer in the table lost
    /// the first-wins race if the turn finished recently; otherwise the id
    /// was never known.
    fn classify_missing(
        &self,
        state: &BrokerState,
        turn_id: &TurnId,
    ) -> Result<SubmitOutcome, BrokerError> {
        if state.finished.contains(turn_id) {
            tracing::debug!(turn_id = %turn_id, "Disposition lost first-wins race; discarded");
            Ok(SubmitOutcome::Superseded)
        } else {
            Err(BrokerError::TurnNotFound(turn_id.0.clone()))
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Start (or restart) draft generation for a turn. Any previous generation
/// is cancelled and its eventual result discarded via the generation check
/// in `handle_draft_finished`.
fn spawn_draft(
    myself: &ActorRef<BrokerMsg>,
    client: Arc<dyn DraftClient>,
    timeout: Duration,
    handle: &mut TurnHandle,
    instruction: Option<String>,
) {
    let generation = match handle.draft.take() {
        Some(previous) => {
            previous.token.cancel();
            previous.generation + 1
        }
        None => 1,
    };

    let token = CancellationToken::new();
    handle.draft = Some(DraftSlot {
        status: DraftStatus::Pending,
        text: None,
        error: None,
        stale: false,
        token: token.clone(),
        generation,
    });

    let turn_id = handle.turn.turn_id.clone();
    let messages = handle.turn.messages.clone();
    let myself = myself.clone();
    tracing::debug!(turn_id = %turn_id, generation, "Draft generation started");

    tokio::spawn(async move {
        let result = tokio::select! {
            _ = token.cancelled() => Err(DraftError::Cancelled),
            outcome = tokio::time::timeout(timeout, client.generate(&messages, instruction.as_deref())) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(DraftError::Timeout),
                }
            }
        };
        let _ = myself.cast(BrokerMsg::DraftFinished {
            turn_id,
            generation,
            result,
        });
    });
}

fn publish(state: &BrokerState, event: OperatorEvent) {
    // No subscribers is fine; the operator surface may be offline.
    let _ = state.events.send(event);
}

fn summary(handle: &TurnHandle) -> TurnSummary {
    let preview = handle
        .turn
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.chars().take(PREVIEW_CHARS).collect())
        .unwrap_or_default();

    TurnSummary {
        turn_id: handle.turn.turn_id.clone(),
        created_at: handle.turn.created_at,
        mode: handle.turn.mode,
        state: handle.state,
        model: handle.turn.model.clone(),
        stream: handle.turn.stream,
        preview,
        draft: handle.draft.as_ref().map(|slot| DraftView {
            status: slot.status,
            text: slot.text.clone(),
            error: slot.error.clone(),
            stale: slot.stale,
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================
