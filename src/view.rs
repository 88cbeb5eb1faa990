//! Dashboard state machine.
//!
//! `AppState` is plain data and `transition` is a pure function of
//! (state, event). `Controller` owns a state and performs the side effects
//! (provider calls, history writes, the history subscription) around it.

use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::ai::AIProvider;
use crate::audit;
use crate::error::AuditError;
use crate::history::{HistoryAdapter, HistoryCallback, Subscription, HISTORY_LIMIT};
use crate::models::{AuditOutcome, AuditRequest, HistoryEntry, NewHistoryEntry};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum View {
    #[default]
    Home,
    AuditInput,
    AuditResult,
    Directory,
    History,
}

/// Navigation menu entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavTarget {
    Home,
    Audit,
    Directory,
    History,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAudit {
    pub id: u64,
    pub request: AuditRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayedAudit {
    pub request: AuditRequest,
    pub outcome: AuditOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    pub view: View,
    pub form: AuditRequest,
    pub pending: Option<PendingAudit>,
    next_request_id: u64,
    pub validation_error: Option<String>,
    pub service_error: Option<String>,
    pub current: Option<DisplayedAudit>,
    pub history: Vec<HistoryEntry>,
    pub local_only: bool,
}

impl AppState {
    pub fn is_submitting(&self) -> bool {
        self.pending.is_some()
    }

    pub fn can_submit(&self) -> bool {
        self.view == View::AuditInput && self.pending.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Navigate(NavTarget),
    EditForm(AuditRequest),
    SubmitRejected(String),
    SubmitStarted,
    AuditCompleted { id: u64, outcome: AuditOutcome },
    AuditFailed { id: u64, message: String },
    CancelAudit,
    DismissResult,
    DismissError,
    HistoryUpdated(Vec<HistoryEntry>),
}

pub fn transition(mut state: AppState, event: Event) -> AppState {
    match event {
        Event::Navigate(target) => {
            let view = match target {
                NavTarget::Home => View::Home,
                NavTarget::Directory => View::Directory,
                NavTarget::History => View::History,
                NavTarget::Audit if state.view == View::AuditResult => View::AuditResult,
                NavTarget::Audit => View::AuditInput,
            };
            if view != View::AuditResult {
                state.current = None;
            }
            state.view = view;
        }
        Event::EditForm(form) => {
            if state.view == View::AuditInput {
                state.form = form;
                state.validation_error = None;
            }
        }
        Event::SubmitRejected(message) => {
            if state.can_submit() {
                state.validation_error = Some(message);
            }
        }
        Event::SubmitStarted => {
            if state.can_submit() {
                state.next_request_id += 1;
                state.pending = Some(PendingAudit {
                    id: state.next_request_id,
                    request: state.form.clone(),
                });
                state.validation_error = None;
                state.service_error = None;
            }
        }
        Event::AuditCompleted { id, outcome } => {
            if let Some(pending) = take_matching(&mut state, id) {
                state.current = Some(DisplayedAudit {
                    request: pending.request,
                    outcome,
                });
                state.view = View::AuditResult;
            }
        }
        Event::AuditFailed { id, message } => {
            if take_matching(&mut state, id).is_some() {
                state.service_error = Some(message);
            }
        }
        Event::CancelAudit => {
            state.pending = None;
        }
        Event::DismissResult => {
            if state.view == View::AuditResult {
                state.current = None;
                state.view = View::AuditInput;
            }
        }
        Event::DismissError => {
            state.service_error = None;
        }
        Event::HistoryUpdated(mut entries) => {
            entries.truncate(HISTORY_LIMIT);
            state.history = entries;
        }
    }
    state
}

fn take_matching(state: &mut AppState, id: u64) -> Option<PendingAudit> {
    if state.pending.as_ref().is_some_and(|p| p.id == id) {
        state.pending.take()
    } else {
        debug!(id, "Discarding result of a cancelled or superseded audit");
        None
    }
}

/// Runs the provider call for a started audit. Safe to call off the UI thread.
pub fn execute(provider: &dyn AIProvider, pending: &PendingAudit) -> Result<AuditOutcome, AuditError> {
    audit::run_audit(provider, &pending.request)
}

pub struct Controller {
    state: AppState,
    provider: Arc<dyn AIProvider>,
    history: HistoryAdapter,
    subscription: Option<Subscription>,
    history_tx: mpsc::Sender<Vec<HistoryEntry>>,
    history_rx: mpsc::Receiver<Vec<HistoryEntry>>,
}

impl Controller {
    pub fn new(provider: Arc<dyn AIProvider>, history: HistoryAdapter) -> Self {
        let (history_tx, history_rx) = mpsc::channel();
        let state = AppState {
            local_only: history.is_local_only(),
            ..AppState::default()
        };
        Self {
            state,
            provider,
            history,
            subscription: None,
            history_tx,
            history_rx,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn provider(&self) -> Arc<dyn AIProvider> {
        Arc::clone(&self.provider)
    }

    fn apply(&mut self, event: Event) {
        self.state = transition(std::mem::take(&mut self.state), event);
        self.sync_subscription();
    }

    /// Keeps exactly one live history feed while the history view is shown.
    fn sync_subscription(&mut self) {
        match (self.state.view == View::History, self.subscription.is_some()) {
            (true, false) => {
                let tx = Mutex::new(self.history_tx.clone());
                let callback: HistoryCallback = Box::new(move |entries: &[HistoryEntry]| {
                    if let Ok(tx) = tx.lock() {
                        let _ = tx.send(entries.to_vec());
                    }
                });
                self.subscription = Some(self.history.subscribe(callback));
                self.drain_history();
            }
            (false, true) => {
                debug!("Releasing history subscription");
                self.subscription = None;
            }
            _ => {}
        }
    }

    fn drain_history(&mut self) {
        let mut latest = None;
        while let Ok(entries) = self.history_rx.try_recv() {
            latest = Some(entries);
        }
        if let Some(entries) = latest {
            self.state = transition(std::mem::take(&mut self.state), Event::HistoryUpdated(entries));
        }
    }

    pub fn navigate(&mut self, target: NavTarget) {
        self.apply(Event::Navigate(target));
    }

    pub fn edit_form(&mut self, form: AuditRequest) {
        self.apply(Event::EditForm(form));
    }

    /// Validates the form and, if it passes, marks an audit as in flight.
    /// Returns the work to hand to `execute`; `None` means nothing was sent.
    pub fn submit(&mut self) -> Option<PendingAudit> {
        if !self.state.can_submit() {
            return None;
        }
        if let Err(e) = audit::validate(&self.state.form) {
            self.apply(Event::SubmitRejected(e.to_string()));
            return None;
        }
        self.apply(Event::SubmitStarted);
        self.state.pending.clone()
    }

    /// Applies the outcome of `execute`. Successful audits are shown first and
    /// then written to history; a history failure never reaches the user.
    pub fn complete(&mut self, id: u64, result: Result<AuditOutcome, AuditError>) {
        let request = match &self.state.pending {
            Some(pending) if pending.id == id => pending.request.clone(),
            _ => {
                debug!(id, "Ignoring stale audit result");
                return;
            }
        };

        match result {
            Ok(outcome) => {
                let entry = NewHistoryEntry::from_audit(&request, &outcome.result);
                self.apply(Event::AuditCompleted { id, outcome });
                self.history.append(entry);
            }
            Err(e) => self.apply(Event::AuditFailed {
                id,
                message: e.to_string(),
            }),
        }
    }

    /// Submits and waits for the provider on the current thread.
    pub fn submit_blocking(&mut self) -> Option<u64> {
        let pending = self.submit()?;
        let result = execute(self.provider.as_ref(), &pending);
        self.complete(pending.id, result);
        Some(pending.id)
    }

    pub fn cancel(&mut self) {
        if let Some(pending) = &self.state.pending {
            info!(id = pending.id, "Audit cancelled by user");
        }
        self.apply(Event::CancelAudit);
    }

    pub fn dismiss_result(&mut self) {
        self.apply(Event::DismissResult);
    }

    pub fn dismiss_error(&mut self) {
        self.apply(Event::DismissError);
    }

    /// Pulls in history changes delivered since the last call.
    pub fn pump(&mut self) {
        if self.subscription.is_some() {
            self.history.poll();
            self.drain_history();
        }
    }

    #[cfg(test)]
    fn has_subscription(&self) -> bool {
        self.subscription.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::ScriptedProvider;
    use crate::history::{HistoryStore, SqliteHistoryStore};
    use crate::models::AuditResult;

    const REPLY: &str = r#"{"score": 0.78, "analysis": "Stale listing.", "factors": [
        {"name": "Reposted", "impact": 0.7, "reason": "Seen for 150 days"}]}"#;

    fn filled_form() -> AuditRequest {
        AuditRequest {
            title: "Backend Engineer".to_string(),
            company: "TechZenith".to_string(),
            requirements: "Rust, Postgres, on-call".to_string(),
            ..AuditRequest::default()
        }
    }

    fn outcome(score: f64) -> AuditOutcome {
        AuditOutcome {
            result: AuditResult {
                score,
                analysis: "ok".to_string(),
                factors: Vec::new(),
            },
            fallback_applied: false,
        }
    }

    fn input_state() -> AppState {
        let state = transition(AppState::default(), Event::Navigate(NavTarget::Audit));
        transition(state, Event::EditForm(filled_form()))
    }

    fn no_overlap(state: &AppState) {
        assert_eq!(state.view == View::AuditResult, state.current.is_some());
    }

    #[test]
    fn test_initial_state_is_home() {
        let state = AppState::default();
        assert_eq!(state.view, View::Home);
        assert!(state.current.is_none());
        assert!(!state.is_submitting());
    }

    #[test]
    fn test_navigation_targets() {
        let mut state = AppState::default();
        for (target, view) in [
            (NavTarget::Directory, View::Directory),
            (NavTarget::History, View::History),
            (NavTarget::Audit, View::AuditInput),
            (NavTarget::Home, View::Home),
        ] {
            state = transition(state, Event::Navigate(target));
            assert_eq!(state.view, view);
        }
    }

    #[test]
    fn test_submit_then_complete_shows_result() {
        let state = transition(input_state(), Event::SubmitStarted);
        let id = state.pending.as_ref().unwrap().id;
        assert!(!state.can_submit());

        let state = transition(state, Event::AuditCompleted { id, outcome: outcome(0.78) });
        assert_eq!(state.view, View::AuditResult);
        assert!(state.pending.is_none());
        assert_eq!(state.current.as_ref().unwrap().request, filled_form());
        no_overlap(&state);
    }

    #[test]
    fn test_failure_shows_banner_and_stays_on_input() {
        let state = transition(input_state(), Event::SubmitStarted);
        let id = state.pending.as_ref().unwrap().id;
        let state = transition(state, Event::AuditFailed { id, message: "No response from AI".to_string() });

        assert_eq!(state.view, View::AuditInput);
        assert_eq!(state.service_error.as_deref(), Some("No response from AI"));
        assert!(state.current.is_none());
        no_overlap(&state);

        let state = transition(state, Event::DismissError);
        assert!(state.service_error.is_none());
    }

    #[test]
    fn test_second_submit_while_in_flight_is_ignored() {
        let state = transition(input_state(), Event::SubmitStarted);
        let first = state.pending.clone();
        let state = transition(state, Event::SubmitStarted);
        assert_eq!(state.pending, first);
    }

    #[test]
    fn test_cannot_submit_while_result_is_shown() {
        let state = transition(input_state(), Event::SubmitStarted);
        let id = state.pending.as_ref().unwrap().id;
        let state = transition(state, Event::AuditCompleted { id, outcome: outcome(0.2) });

        let state = transition(state, Event::SubmitStarted);
        assert!(state.pending.is_none());
        assert_eq!(state.view, View::AuditResult);

        let state = transition(state, Event::DismissResult);
        assert_eq!(state.view, View::AuditInput);
        assert!(state.current.is_none());
        assert_eq!(state.form, filled_form());
        assert!(state.can_submit());
    }

    #[test]
    fn test_cancelled_audit_result_is_discarded() {
        let state = transition(input_state(), Event::SubmitStarted);
        let id = state.pending.as_ref().unwrap().id;
        let state = transition(state, Event::CancelAudit);
        assert!(state.can_submit());

        let state = transition(state, Event::AuditCompleted { id, outcome: outcome(0.9) });
        assert_eq!(state.view, View::AuditInput);
        assert!(state.current.is_none());
    }

    #[test]
    fn test_stale_result_does_not_hijack_newer_request() {
        let state = transition(input_state(), Event::SubmitStarted);
        let old = state.pending.as_ref().unwrap().id;
        let state = transition(state, Event::CancelAudit);
        let state = transition(state, Event::SubmitStarted);
        let new = state.pending.as_ref().unwrap().id;
        assert_ne!(old, new);

        let state = transition(state, Event::AuditFailed { id: old, message: "late".to_string() });
        assert!(state.service_error.is_none());
        assert_eq!(state.pending.as_ref().unwrap().id, new);
    }

    #[test]
    fn test_navigating_away_discards_result() {
        let state = transition(input_state(), Event::SubmitStarted);
        let id = state.pending.as_ref().unwrap().id;
        let state = transition(state, Event::AuditCompleted { id, outcome: outcome(0.5) });

        let same = transition(state.clone(), Event::Navigate(NavTarget::Audit));
        assert_eq!(same.view, View::AuditResult);
        assert!(same.current.is_some());

        let state = transition(state, Event::Navigate(NavTarget::Directory));
        assert!(state.current.is_none());
        let state = transition(state, Event::Navigate(NavTarget::Audit));
        assert_eq!(state.view, View::AuditInput);
        no_overlap(&state);
    }

    #[test]
    fn test_validation_error_cleared_by_editing() {
        let state = transition(input_state(), Event::SubmitRejected("missing".to_string()));
        assert_eq!(state.validation_error.as_deref(), Some("missing"));
        let state = transition(state, Event::EditForm(filled_form()));
        assert!(state.validation_error.is_none());
    }

    #[test]
    fn test_history_update_is_capped() {
        let entries: Vec<HistoryEntry> = (0..12)
            .map(|i| HistoryEntry {
                id: i.to_string(),
                job_title: format!("Job {}", i),
                company: String::new(),
                score: 0.1,
                summary: String::new(),
                timestamp: String::new(),
            })
            .collect();
        let state = transition(AppState::default(), Event::HistoryUpdated(entries));
        assert_eq!(state.history.len(), HISTORY_LIMIT);
    }

    #[test]
    fn test_state_serializes() {
        let state = transition(input_state(), Event::SubmitStarted);
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"audit-input\""));
        let back: AppState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    // --- Controller ---

    fn controller_with(
        provider: Arc<ScriptedProvider>,
        history: HistoryAdapter,
    ) -> Controller {
        let mut controller = Controller::new(provider, history);
        controller.navigate(NavTarget::Audit);
        controller
    }

    #[test]
    fn test_controller_rejects_empty_fields_without_calling_provider() {
        let provider = Arc::new(ScriptedProvider::replying(REPLY));
        let mut controller = controller_with(provider.clone(), HistoryAdapter::local_only());

        controller.edit_form(AuditRequest {
            title: "Engineer".to_string(),
            ..AuditRequest::default()
        });
        assert!(controller.submit_blocking().is_none());

        assert_eq!(provider.calls(), 0);
        assert_eq!(
            controller.state().validation_error.as_deref(),
            Some("Job Title and Requirements are mandatory.")
        );
        assert_eq!(controller.state().view, View::AuditInput);
    }

    #[test]
    fn test_controller_success_persists_to_history() {
        let provider = Arc::new(ScriptedProvider::replying(REPLY));
        let store = Arc::new(SqliteHistoryStore::open_in_memory("caller").unwrap());
        let mut controller = controller_with(provider.clone(), HistoryAdapter::new(store.clone()));

        controller.edit_form(filled_form());
        controller.submit_blocking().unwrap();

        assert_eq!(provider.calls(), 1);
        let state = controller.state();
        assert_eq!(state.view, View::AuditResult);
        assert_eq!(state.current.as_ref().unwrap().outcome.result.score, 0.78);
        assert!(!state.local_only);

        let saved = store.recent().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].job_title, "Backend Engineer");
        assert_eq!(saved[0].company, "TechZenith");
        assert_eq!(saved[0].summary, "Stale listing.");
    }

    #[test]
    fn test_controller_failure_does_not_persist() {
        let provider = Arc::new(ScriptedProvider::failing("Gemini API request failed with status 500"));
        let store = Arc::new(SqliteHistoryStore::open_in_memory("caller").unwrap());
        let mut controller = controller_with(provider, HistoryAdapter::new(store.clone()));

        controller.edit_form(filled_form());
        controller.submit_blocking();

        assert_eq!(controller.state().view, View::AuditInput);
        assert!(controller.state().service_error.is_some());
        assert!(store.recent().unwrap().is_empty());
    }

    #[test]
    fn test_local_only_mode_does_not_change_success_path() {
        let provider = Arc::new(ScriptedProvider::replying(REPLY));
        let mut controller = controller_with(provider, HistoryAdapter::local_only());
        assert!(controller.state().local_only);

        controller.edit_form(filled_form());
        controller.submit_blocking().unwrap();
        assert_eq!(controller.state().view, View::AuditResult);

        controller.navigate(NavTarget::History);
        controller.pump();
        assert!(controller.state().history.is_empty());
    }

    #[test]
    fn test_history_subscription_follows_the_view() {
        let provider = Arc::new(ScriptedProvider::replying(REPLY));
        let store = Arc::new(SqliteHistoryStore::open_in_memory("caller").unwrap());
        let mut controller = controller_with(provider, HistoryAdapter::new(store.clone()));

        controller.edit_form(filled_form());
        controller.submit_blocking().unwrap();
        assert!(!controller.has_subscription());

        controller.navigate(NavTarget::History);
        assert!(controller.has_subscription());
        assert_eq!(controller.state().history.len(), 1);

        store
            .append(&NewHistoryEntry {
                job_title: "Another".to_string(),
                company: String::new(),
                score: 0.2,
                summary: String::new(),
            })
            .unwrap();
        controller.pump();
        assert_eq!(controller.state().history.len(), 2);
        assert_eq!(controller.state().history[0].job_title, "Another");

        controller.navigate(NavTarget::Home);
        assert!(!controller.has_subscription());
    }

    #[test]
    fn test_cancelled_result_is_not_persisted() {
        let provider = Arc::new(ScriptedProvider::replying(REPLY));
        let store = Arc::new(SqliteHistoryStore::open_in_memory("caller").unwrap());
        let mut controller = controller_with(provider.clone(), HistoryAdapter::new(store.clone()));

        controller.edit_form(filled_form());
        let pending = controller.submit().unwrap();
        controller.cancel();
        let late = execute(provider.as_ref(), &pending);
        controller.complete(pending.id, late);

        assert_eq!(controller.state().view, View::AuditInput);
        assert!(store.recent().unwrap().is_empty());
    }
}
