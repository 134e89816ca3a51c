use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assistant::{AssistantEndpoint, TurnRequest, TurnResponse};
use crate::error::{AssistantError, TurnError};
use crate::insights::build_insights;
use crate::session::{Message, Session, TITLE_MAX_CHARS};
use crate::store::SharedStore;

pub const TYPING_TEXT: &str = "MyFutureDrive AI est en train d’écrire ...";
pub const ERROR_TEXT: &str = "❌ Erreur API. Vérifie que le backend /chat est lancé.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStatus {
    Idle,
    Busy,
    Ok,
    Error,
}

impl ApiStatus {
    pub fn label(self) -> &'static str {
        match self {
            ApiStatus::Idle | ApiStatus::Ok => "API: OK",
            ApiStatus::Busy => "API: BUSY",
            ApiStatus::Error => "API: DOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Blank input; nothing was sent.
    Ignored,
    Applied,
    /// The endpoint failed; an error message was appended instead.
    Failed,
    /// A newer turn was issued for the same session before this one returned.
    Stale,
    /// The session was deleted while the turn was in flight.
    Orphaned,
}

impl TurnOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnOutcome::Ignored => "ignored",
            TurnOutcome::Applied => "applied",
            TurnOutcome::Failed => "failed",
            TurnOutcome::Stale => "stale",
            TurnOutcome::Orphaned => "orphaned",
        }
    }
}

#[derive(Default)]
struct TurnBook {
    latest: HashMap<Uuid, u64>,
    next_seq: u64,
    in_flight: usize,
    settled: Option<ApiStatus>,
}

pub struct TurnController {
    store: SharedStore,
    assistant: Arc<dyn AssistantEndpoint>,
    status: watch::Sender<ApiStatus>,
    book: Mutex<TurnBook>,
}

impl TurnController {
    pub fn new(store: SharedStore, assistant: Arc<dyn AssistantEndpoint>) -> Self {
        let (status, _) = watch::channel(ApiStatus::Idle);
        Self { store, assistant, status, book: Mutex::new(TurnBook::default()) }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn status(&self) -> ApiStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ApiStatus> {
        self.status.subscribe()
    }

    pub async fn send_turn(&self, raw: &str) -> Result<TurnOutcome, TurnError> {
        let text = raw.trim();
        if text.is_empty() {
            debug!("blank input ignored");
            return Ok(TurnOutcome::Ignored);
        }

        // The tag is issued under the store lock so a completing turn can
        // never observe the new user message without also seeing its tag.
        let (session_id, seq) = {
            let mut store = self.store.lock().await;
            let message = text.to_string();
            let session_id = store
                .update_active(move |s| {
                    if s.has_default_title() {
                        s.title = message.chars().take(TITLE_MAX_CHARS).collect();
                    }
                    s.messages.push(Message::user(message));
                    s.push_typing(TYPING_TEXT);
                    s.id
                })
                .await?;
            (session_id, self.begin(session_id))
        };
        info!(%session_id, seq, "turn issued");

        let request = TurnRequest { session_id, message: text.to_string() };
        let result = self.assistant.post_turn(&request).await;

        let outcome = self.complete(session_id, seq, result).await;
        self.finish(&outcome);
        outcome
    }

    fn begin(&self, session_id: Uuid) -> u64 {
        let mut book = self.lock_book();
        book.next_seq += 1;
        let seq = book.next_seq;
        book.latest.insert(session_id, seq);
        book.in_flight += 1;
        self.status.send_replace(ApiStatus::Busy);
        seq
    }

    fn is_latest(&self, session_id: Uuid, seq: u64) -> bool {
        self.lock_book().latest.get(&session_id) == Some(&seq)
    }

    async fn complete(
        &self,
        session_id: Uuid,
        seq: u64,
        result: Result<TurnResponse, AssistantError>,
    ) -> Result<TurnOutcome, TurnError> {
        let mut store = self.store.lock().await;
        if store.session(session_id).is_none() {
            info!(%session_id, seq, "turn finished after its session was deleted; discarded");
            self.lock_book().latest.remove(&session_id);
            return Ok(TurnOutcome::Orphaned);
        }
        if !self.is_latest(session_id, seq) {
            debug!(%session_id, seq, "stale turn discarded");
            return Ok(TurnOutcome::Stale);
        }

        match result {
            Ok(response) => {
                store.update_session(session_id, |s| apply_response(s, response)).await?;
                info!(%session_id, seq, "turn applied");
                Ok(TurnOutcome::Applied)
            }
            Err(err) => {
                warn!(%session_id, seq, error = %err, "turn failed");
                store
                    .update_session(session_id, |s| {
                        s.remove_typing();
                        s.messages.push(Message::bot(ERROR_TEXT));
                    })
                    .await?;
                Ok(TurnOutcome::Failed)
            }
        }
    }

    fn finish(&self, outcome: &Result<TurnOutcome, TurnError>) {
        let mut book = self.lock_book();
        book.in_flight = book.in_flight.saturating_sub(1);
        match outcome {
            Ok(TurnOutcome::Applied) => book.settled = Some(ApiStatus::Ok),
            Ok(TurnOutcome::Failed) | Err(_) => book.settled = Some(ApiStatus::Error),
            Ok(_) => {}
        }
        if book.in_flight == 0 {
            self.status.send_replace(book.settled.unwrap_or(ApiStatus::Idle));
        }
        let label = match outcome {
            Ok(o) => o.as_str(),
            Err(_) => "error",
        };
        metrics::counter!("copilot_turns_total", "outcome" => label).increment(1);
    }

    fn lock_book(&self) -> std::sync::MutexGuard<'_, TurnBook> {
        self.book.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn apply_response(session: &mut Session, response: TurnResponse) {
    session.remove_typing();
    if let Some(text) = response.assistant.filter(|t| !t.trim().is_empty()) {
        session.messages.push(Message::bot(text));
    }
    if let Some(slots) = response.slots {
        session.prefs.merge_slots(&slots);
        session.insights = build_insights(&session.prefs.snapshot());
    }
    if let Some(cars) = response.cars {
        session.cars = cars;
    }
    if let Some(replies) = response.quick_replies {
        session.quick_replies = replies;
    }
    if let Some(summary) = response.summary {
        session.summary = Some(summary).filter(|s| !s.trim().is_empty());
    }
}
