//! Ticket triage: pull the pending queue, inspect a ticket's camera, accept
//! or reject it, and resynchronize with the backend.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};

use shared::{
    domain::{CameraId, TicketDecision, TicketId},
    protocol::{Ticket, TicketDetail},
};
use tokio::{
    sync::{broadcast, Mutex},
    time::{sleep_until, Instant},
};
use tracing::{debug, error, info, warn};

use crate::{
    error::WorkflowError,
    transport::{CameraDirectory, TicketStore},
};

pub const NOTICE_TTL: Duration = Duration::from_millis(3000);
const EVENT_CAPACITY: usize = 256;

/// Transient success message shown after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub description: String,
}

impl Notice {
    pub fn for_decision(decision: TicketDecision) -> Self {
        let (title, description) = match decision {
            TicketDecision::Accepted => ("Ticket Accepted", "The ticket has been accepted."),
            TicketDecision::Rejected => ("Ticket Rejected", "The ticket has been rejected."),
        };
        Self {
            title: title.to_string(),
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum DetailView {
    #[default]
    Closed,
    Loading {
        ticket_id: TicketId,
    },
    Ready(TicketDetail),
    Failed {
        ticket_id: TicketId,
        error: WorkflowError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowOperation {
    LoadPendingTickets,
    OpenTicketDetail,
    SetTicketStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowFailure {
    pub operation: WorkflowOperation,
    pub error: WorkflowError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    PendingTicketsUpdated(Vec<Ticket>),
    DetailChanged(DetailView),
    NoticeChanged(Option<Notice>),
    /// Kept apart from [`WorkflowEvent::NoticeChanged`] so failures never
    /// look like success.
    Failed(WorkflowFailure),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkflowSnapshot {
    pub pending_tickets: Vec<Ticket>,
    pub detail: DetailView,
    pub notification: Option<Notice>,
    pub last_error: Option<WorkflowFailure>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The backend acknowledged the write; carries its copy of the ticket.
    Applied(Ticket),
    /// Another transition for the same ticket is still running; nothing was sent.
    AlreadyInFlight,
}

#[derive(Default)]
struct WorkflowState {
    pending_tickets: Vec<Ticket>,
    detail: DetailView,
    /// Bumped whenever the detail view changes hands so stale camera
    /// lookups can be dropped.
    detail_request: u64,
    /// Issued to each queue load; only a load newer than the last applied
    /// one may replace the queue.
    load_request: u64,
    load_applied: u64,
    notification: Option<Notice>,
    notice_generation: u64,
    last_error: Option<WorkflowFailure>,
}

/// Holds a ticket's slot in the in-flight set and frees it on drop, so a
/// cancelled transition does not block later ones.
struct InflightTransition<'a> {
    inflight: &'a StdMutex<HashSet<TicketId>>,
    ticket_id: TicketId,
}

impl<'a> InflightTransition<'a> {
    fn acquire(inflight: &'a StdMutex<HashSet<TicketId>>, ticket_id: &TicketId) -> Option<Self> {
        let inserted = inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ticket_id.clone());
        inserted.then(|| Self {
            inflight,
            ticket_id: ticket_id.clone(),
        })
    }
}

impl Drop for InflightTransition<'_> {
    fn drop(&mut self) {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.ticket_id);
    }
}

pub struct TicketWorkflowController {
    tickets: Arc<dyn TicketStore>,
    cameras: Arc<dyn CameraDirectory>,
    state: Arc<Mutex<WorkflowState>>,
    inflight_transitions: StdMutex<HashSet<TicketId>>,
    events: broadcast::Sender<WorkflowEvent>,
    notice_ttl: Duration,
}

impl TicketWorkflowController {
    pub fn new(tickets: Arc<dyn TicketStore>, cameras: Arc<dyn CameraDirectory>) -> Arc<Self> {
        Self::with_notice_ttl(tickets, cameras, NOTICE_TTL)
    }

    /// One backend serving both seams, e.g. [`crate::transport::HttpBackend`].
    pub fn from_backend<B>(backend: Arc<B>) -> Arc<Self>
    where
        B: TicketStore + CameraDirectory + 'static,
    {
        Self::new(backend.clone(), backend)
    }

    pub fn with_notice_ttl(
        tickets: Arc<dyn TicketStore>,
        cameras: Arc<dyn CameraDirectory>,
        notice_ttl: Duration,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            tickets,
            cameras,
            state: Arc::new(Mutex::new(WorkflowState::default())),
            inflight_transitions: StdMutex::new(HashSet::new()),
            events,
            notice_ttl,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> WorkflowSnapshot {
        let guard = self.state.lock().await;
        WorkflowSnapshot {
            pending_tickets: guard.pending_tickets.clone(),
            detail: guard.detail.clone(),
            notification: guard.notification.clone(),
            last_error: guard.last_error.clone(),
        }
    }

    /// Replaces the pending queue with the backend's current pending tickets.
    /// On failure the previous queue is left as it was. A response that
    /// arrives after a newer load was applied is returned but not applied.
    pub async fn load_pending_tickets(&self) -> Result<Vec<Ticket>, WorkflowError> {
        let request = {
            let mut guard = self.state.lock().await;
            guard.load_request += 1;
            guard.load_request
        };
        let tickets = match self.tickets.list_tickets().await {
            Ok(tickets) => tickets,
            Err(err) => {
                error!(error = %err, "failed to load tickets");
                self.record_failure(WorkflowOperation::LoadPendingTickets, err.clone())
                    .await;
                return Err(err);
            }
        };

        let total = tickets.len();
        let pending: Vec<Ticket> = tickets.into_iter().filter(Ticket::is_pending).collect();
        {
            let mut guard = self.state.lock().await;
            if guard.load_applied > request {
                debug!(request, applied = guard.load_applied, "discarding stale ticket load");
                return Ok(pending);
            }
            guard.load_applied = request;
            guard.pending_tickets = pending.clone();
            clear_failure(&mut guard, WorkflowOperation::LoadPendingTickets);
        }
        info!(total, pending = pending.len(), "pending tickets loaded");
        self.emit(WorkflowEvent::PendingTicketsUpdated(pending.clone()));
        Ok(pending)
    }

    pub async fn open_ticket(&self, ticket: &Ticket) -> Result<TicketDetail, WorkflowError> {
        match &ticket.camera_id {
            Some(camera_id) => self.open_ticket_detail(&ticket.id, camera_id).await,
            None => {
                let err =
                    WorkflowError::validation(format!("ticket {} has no camera", ticket.id));
                self.fail_detail(self.begin_detail(&ticket.id).await, &ticket.id, err)
                    .await
            }
        }
    }

    /// Loads the camera behind a ticket. The resulting detail always carries
    /// `ticket_id` as its id, whatever id the camera record has.
    pub async fn open_ticket_detail(
        &self,
        ticket_id: &TicketId,
        camera_id: &CameraId,
    ) -> Result<TicketDetail, WorkflowError> {
        let request = self.begin_detail(ticket_id).await;

        if camera_id.as_str().trim().is_empty() {
            let err = WorkflowError::validation(format!("ticket {ticket_id} has no camera"));
            return self.fail_detail(request, ticket_id, err).await;
        }

        let camera = match self.cameras.fetch_camera(camera_id).await {
            Ok(camera) => camera,
            Err(err) => {
                error!(ticket_id = %ticket_id, camera_id = %camera_id, error = %err, "failed to load ticket camera");
                return self.fail_detail(request, ticket_id, err).await;
            }
        };

        let detail = TicketDetail::merge(ticket_id.clone(), camera);
        {
            let mut guard = self.state.lock().await;
            if guard.detail_request != request {
                debug!(ticket_id = %ticket_id, "discarding superseded ticket detail");
                return Ok(detail);
            }
            guard.detail = DetailView::Ready(detail.clone());
            clear_failure(&mut guard, WorkflowOperation::OpenTicketDetail);
        }
        self.emit(WorkflowEvent::DetailChanged(DetailView::Ready(detail.clone())));
        Ok(detail)
    }

    pub async fn close_detail(&self) {
        {
            let mut guard = self.state.lock().await;
            guard.detail_request += 1;
            if guard.detail == DetailView::Closed {
                return;
            }
            guard.detail = DetailView::Closed;
        }
        self.emit(WorkflowEvent::DetailChanged(DetailView::Closed));
    }

    pub async fn dismiss_notification(&self) {
        {
            let mut guard = self.state.lock().await;
            if guard.notification.take().is_none() {
                return;
            }
            guard.notice_generation += 1;
        }
        self.emit(WorkflowEvent::NoticeChanged(None));
    }

    /// Accepts or rejects a ticket, then resynchronizes the pending queue.
    ///
    /// The resync starts only after the backend acknowledged the write. While
    /// a transition for `ticket_id` is running, further calls for the same
    /// ticket return [`TransitionOutcome::AlreadyInFlight`] without a write.
    pub async fn set_ticket_status(
        &self,
        ticket_id: &TicketId,
        decision: TicketDecision,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let Some(_slot) = InflightTransition::acquire(&self.inflight_transitions, ticket_id)
        else {
            debug!(ticket_id = %ticket_id, ?decision, "transition already in flight");
            return Ok(TransitionOutcome::AlreadyInFlight);
        };

        self.apply_transition(ticket_id, decision).await
    }

    async fn apply_transition(
        &self,
        ticket_id: &TicketId,
        decision: TicketDecision,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let ticket = match self
            .tickets
            .update_ticket_status(ticket_id, decision.status())
            .await
        {
            Ok(ticket) => ticket,
            Err(err) => {
                error!(ticket_id = %ticket_id, ?decision, error = %err, "ticket transition failed");
                self.record_failure(WorkflowOperation::SetTicketStatus, err.clone())
                    .await;
                return Err(err);
            }
        };
        info!(ticket_id = %ticket_id, status = %decision.status(), "ticket transitioned");

        let notice = Notice::for_decision(decision);
        let (detail_was_open, generation) = {
            let mut guard = self.state.lock().await;
            guard.detail_request += 1;
            let detail_was_open = guard.detail != DetailView::Closed;
            guard.detail = DetailView::Closed;
            guard.notification = Some(notice.clone());
            guard.notice_generation += 1;
            clear_failure(&mut guard, WorkflowOperation::SetTicketStatus);
            (detail_was_open, guard.notice_generation)
        };
        if detail_was_open {
            self.emit(WorkflowEvent::DetailChanged(DetailView::Closed));
        }
        self.emit(WorkflowEvent::NoticeChanged(Some(notice)));
        self.schedule_notice_dismissal(generation);

        if let Err(err) = self.load_pending_tickets().await {
            warn!(ticket_id = %ticket_id, error = %err, "resync after transition failed");
        }
        Ok(TransitionOutcome::Applied(ticket))
    }

    /// Clears the notice armed as `generation` once its time is up, unless a
    /// newer notice replaced it or it was dismissed already.
    fn schedule_notice_dismissal(&self, generation: u64) {
        let deadline = Instant::now() + self.notice_ttl;
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        tokio::spawn(async move {
            sleep_until(deadline).await;
            let mut guard = state.lock().await;
            if guard.notice_generation != generation || guard.notification.is_none() {
                return;
            }
            guard.notification = None;
            drop(guard);
            let _ = events.send(WorkflowEvent::NoticeChanged(None));
        });
    }

    async fn begin_detail(&self, ticket_id: &TicketId) -> u64 {
        let request = {
            let mut guard = self.state.lock().await;
            guard.detail_request += 1;
            guard.detail = DetailView::Loading {
                ticket_id: ticket_id.clone(),
            };
            guard.detail_request
        };
        self.emit(WorkflowEvent::DetailChanged(DetailView::Loading {
            ticket_id: ticket_id.clone(),
        }));
        request
    }

    async fn fail_detail(
        &self,
        request: u64,
        ticket_id: &TicketId,
        err: WorkflowError,
    ) -> Result<TicketDetail, WorkflowError> {
        let failed = DetailView::Failed {
            ticket_id: ticket_id.clone(),
            error: err.clone(),
        };
        let current = {
            let mut guard = self.state.lock().await;
            let current = guard.detail_request == request;
            if current {
                guard.detail = failed.clone();
            }
            current
        };
        if current {
            self.emit(WorkflowEvent::DetailChanged(failed));
        }
        self.record_failure(WorkflowOperation::OpenTicketDetail, err.clone())
            .await;
        Err(err)
    }

    async fn record_failure(&self, operation: WorkflowOperation, error: WorkflowError) {
        let failure = WorkflowFailure { operation, error };
        self.state.lock().await.last_error = Some(failure.clone());
        self.emit(WorkflowEvent::Failed(failure));
    }

    fn emit(&self, event: WorkflowEvent) {
        // No subscribers is fine; snapshots still carry the state.
        let _ = self.events.send(event);
    }
}

fn clear_failure(state: &mut WorkflowState, operation: WorkflowOperation) {
    if state
        .last_error
        .as_ref()
        .is_some_and(|failure| failure.operation == operation)
    {
        state.last_error = None;
    }
}

#[cfg(test)]
#[path = "tests/workflow_tests.rs"]
mod tests;
