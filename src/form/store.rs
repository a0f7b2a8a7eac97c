use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use futures::FutureExt;
use futures::future::{self, BoxFuture};

use super::controller::{
    FormResult, ValidationTicket, is_form_valid, read_lock, validation_errors, write_lock,
};
use super::value::{FieldKey, FieldMap, FieldRecord, ValidationError, ValidationResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FormPhase {
    Pristine,
    Editing,
    Submitted,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FormState<E> {
    pub fields: FieldMap<E>,
    pub submitted: bool,
    pub is_validating: bool,
    tickets: BTreeMap<FieldKey, ValidationTicket>,
}

impl<E> Default for FormState<E> {
    fn default() -> Self {
        Self {
            fields: BTreeMap::new(),
            submitted: false,
            is_validating: false,
            tickets: BTreeMap::new(),
        }
    }
}

impl<E> FormState<E> {
    pub fn is_valid(&self) -> bool {
        is_form_valid(&self.fields)
    }

    pub fn errors(&self) -> ValidationResult<E>
    where
        E: Clone,
    {
        validation_errors(&self.fields)
    }

    pub fn phase(&self) -> FormPhase {
        if self.submitted {
            FormPhase::Submitted
        } else if self.fields.is_empty() {
            FormPhase::Pristine
        } else {
            FormPhase::Editing
        }
    }

    pub fn latest_ticket(&self, key: &str) -> Option<ValidationTicket> {
        self.tickets.get(key).copied()
    }
}

/// Shallow update of a [`FormState`]. Keys left unset keep their committed value.
#[derive(Clone, Debug)]
pub struct StatePatch<E> {
    clear: bool,
    fields: Option<FieldMap<E>>,
    tickets: Vec<(FieldKey, ValidationTicket)>,
    upserts: Vec<FieldUpsert<E>>,
    submitted: Option<bool>,
    is_validating: Option<bool>,
}

#[derive(Clone, Debug)]
struct FieldUpsert<E> {
    key: FieldKey,
    record: FieldRecord<E>,
    ticket: Option<ValidationTicket>,
}

impl<E> Default for StatePatch<E> {
    fn default() -> Self {
        Self {
            clear: false,
            fields: None,
            tickets: Vec::new(),
            upserts: Vec::new(),
            submitted: None,
            is_validating: None,
        }
    }
}

impl<E> StatePatch<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every field record and ticket and clears `submitted`.
    pub fn reset() -> Self {
        Self {
            clear: true,
            submitted: Some(false),
            ..Self::default()
        }
    }

    pub fn fields(mut self, fields: FieldMap<E>) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn upsert_field(mut self, key: FieldKey, record: FieldRecord<E>) -> Self {
        self.upserts.push(FieldUpsert {
            key,
            record,
            ticket: None,
        });
        self
    }

    /// Like [`StatePatch::upsert_field`], but only applies while `ticket` is still the
    /// latest one issued for `key`.
    pub fn upsert_field_for_ticket(
        mut self,
        key: FieldKey,
        record: FieldRecord<E>,
        ticket: ValidationTicket,
    ) -> Self {
        self.upserts.push(FieldUpsert {
            key,
            record,
            ticket: Some(ticket),
        });
        self
    }

    pub fn issue_ticket(mut self, key: FieldKey, ticket: ValidationTicket) -> Self {
        self.tickets.push((key, ticket));
        self
    }

    pub fn submitted(mut self, submitted: bool) -> Self {
        self.submitted = Some(submitted);
        self
    }

    pub fn validating(mut self, is_validating: bool) -> Self {
        self.is_validating = Some(is_validating);
        self
    }

    /// False when the patch only carries bookkeeping that observers cannot see.
    pub fn is_visible(&self) -> bool {
        self.clear
            || self.fields.is_some()
            || !self.upserts.is_empty()
            || self.submitted.is_some()
            || self.is_validating.is_some()
    }

    /// Merges the patch into `state`, in the order: clear, field map, tickets,
    /// upserts, flags.
    pub fn apply(self, state: &mut FormState<E>) {
        if self.clear {
            state.fields.clear();
            state.tickets.clear();
        }
        if let Some(fields) = self.fields {
            state.fields = fields;
        }
        for (key, ticket) in self.tickets {
            let latest = state.tickets.entry(key).or_insert(ticket);
            *latest = (*latest).max(ticket);
        }
        for upsert in self.upserts {
            if let Some(ticket) = upsert.ticket {
                if state.tickets.get(&upsert.key) != Some(&ticket) {
                    tracing::debug!(
                        field = %upsert.key,
                        ticket = ticket.0,
                        "discarding superseded field update"
                    );
                    continue;
                }
            }
            state.fields.insert(upsert.key, upsert.record);
        }
        if let Some(submitted) = self.submitted {
            state.submitted = submitted;
        }
        if let Some(is_validating) = self.is_validating {
            state.is_validating = is_validating;
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubscriptionId(pub u64);

pub type StateObserver<E> = Arc<dyn Fn(&FormState<E>) + Send + Sync>;

/// Owner of a form's state. All mutation goes through [`StateContainer::set`].
///
/// Patches are ordered by the `set` call, not by polling the returned future: a
/// patch must be committed even if its future is dropped. The future resolves with
/// the state as of that commit, after observers have been notified.
pub trait StateContainer<E>: Send + Sync + 'static
where
    E: ValidationError,
{
    fn get(&self) -> FormResult<FormState<E>>;
    fn set(&self, patch: StatePatch<E>) -> BoxFuture<'static, FormResult<FormState<E>>>;
    fn subscribe(&self, observer: StateObserver<E>) -> FormResult<SubscriptionId>;
    fn unsubscribe(&self, id: SubscriptionId) -> FormResult<bool>;
}

impl<E> dyn StateContainer<E>
where
    E: ValidationError,
{
    pub fn select<R>(&self, selector: impl FnOnce(&FormState<E>) -> R) -> FormResult<R> {
        let state = self.get()?;
        Ok(selector(&state))
    }
}

struct Committed<E> {
    state: FormState<E>,
    revision: u64,
}

/// In-process store used when no external container is configured. Commits happen
/// during `set`, observers run on the calling thread once the lock is released.
pub struct LocalStore<E> {
    committed: Arc<RwLock<Committed<E>>>,
    observers: Arc<RwLock<BTreeMap<SubscriptionId, StateObserver<E>>>>,
    next_subscription: Arc<AtomicU64>,
}

impl<E> Clone for LocalStore<E> {
    fn clone(&self) -> Self {
        Self {
            committed: self.committed.clone(),
            observers: self.observers.clone(),
            next_subscription: self.next_subscription.clone(),
        }
    }
}

impl<E> LocalStore<E>
where
    E: ValidationError,
{
    pub fn new() -> Self {
        Self {
            committed: Arc::new(RwLock::new(Committed {
                state: FormState::default(),
                revision: 0,
            })),
            observers: Arc::new(RwLock::new(BTreeMap::new())),
            next_subscription: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn revision(&self) -> FormResult<u64> {
        Ok(read_lock(&self.committed, "reading store revision")?.revision)
    }

    fn commit(&self, patch: StatePatch<E>) -> FormResult<FormState<E>> {
        let visible = patch.is_visible();
        let snapshot = {
            let mut committed = write_lock(&self.committed, "committing state patch")?;
            patch.apply(&mut committed.state);
            if visible {
                committed.revision += 1;
            }
            tracing::trace!(
                revision = committed.revision,
                fields = committed.state.fields.len(),
                submitted = committed.state.submitted,
                is_validating = committed.state.is_validating,
                "state committed"
            );
            committed.state.clone()
        };

        if visible {
            let observers = read_lock(&self.observers, "reading state observers")?
                .values()
                .cloned()
                .collect::<Vec<_>>();
            for observer in observers {
                observer(&snapshot);
            }
        }
        Ok(snapshot)
    }
}

impl<E> Default for LocalStore<E>
where
    E: ValidationError,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> StateContainer<E> for LocalStore<E>
where
    E: ValidationError,
{
    fn get(&self) -> FormResult<FormState<E>> {
        Ok(read_lock(&self.committed, "reading form state")?
            .state
            .clone())
    }

    fn set(&self, patch: StatePatch<E>) -> BoxFuture<'static, FormResult<FormState<E>>> {
        future::ready(self.commit(patch)).boxed()
    }

    fn subscribe(&self, observer: StateObserver<E>) -> FormResult<SubscriptionId> {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        write_lock(&self.observers, "subscribing state observer")?.insert(id, observer);
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> FormResult<bool> {
        Ok(write_lock(&self.observers, "unsubscribing state observer")?
            .remove(&id)
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::value::{FieldValidation, FieldValue};
    use futures::executor::block_on;
    use std::sync::atomic::AtomicUsize;

    fn record(value: &str) -> FieldRecord<String> {
        FieldRecord::new(FieldValue::from(value), FieldValidation::valid())
    }

    #[test]
    fn set_is_visible_to_following_reads() {
        let store = LocalStore::<String>::new();
        let state = block_on(store.set(StatePatch::new().submitted(true))).expect("set");
        assert!(state.submitted);
        assert!(store.get().expect("get").submitted);
    }

    #[test]
    fn disjoint_patches_do_not_lose_updates() {
        let store = LocalStore::<String>::new();
        let first = store.set(StatePatch::new().upsert_field("a".into(), record("1")));
        let second = store.set(StatePatch::new().validating(true));
        let third = store.set(StatePatch::new().upsert_field("b".into(), record("2")));
        let (_, _, last) = block_on(futures::future::join3(first, second, third));

        let last = last.expect("third set");
        assert!(last.is_validating);
        assert_eq!(last.fields.len(), 2);
    }

    #[test]
    fn ticketed_upsert_is_dropped_once_superseded() {
        let store = LocalStore::<String>::new();
        let key = FieldKey::from("email");
        drop(store.set(StatePatch::new().issue_ticket(key.clone(), ValidationTicket(1))));
        drop(store.set(StatePatch::new().issue_ticket(key.clone(), ValidationTicket(2))));
        drop(store.set(StatePatch::new().upsert_field_for_ticket(
            key.clone(),
            record("new"),
            ValidationTicket(2),
        )));
        drop(store.set(StatePatch::new().upsert_field_for_ticket(
            key.clone(),
            record("old"),
            ValidationTicket(1),
        )));

        let state = store.get().expect("get");
        assert_eq!(state.fields["email"].value, FieldValue::from("new"));
        assert_eq!(state.latest_ticket("email"), Some(ValidationTicket(2)));
    }

    #[test]
    fn reset_drops_tickets_so_older_results_cannot_land() {
        let store = LocalStore::<String>::new();
        let key = FieldKey::from("email");
        drop(store.set(StatePatch::new().issue_ticket(key.clone(), ValidationTicket(7))));
        drop(store.set(StatePatch::reset()));
        drop(store.set(StatePatch::new().upsert_field_for_ticket(
            key,
            record("late"),
            ValidationTicket(7),
        )));
        assert!(store.get().expect("get").fields.is_empty());
    }

    #[test]
    fn observers_see_visible_commits_only() {
        let store = LocalStore::<String>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let id = store
            .subscribe(Arc::new(move |_state: &FormState<String>| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .expect("subscribe");

        drop(store.set(StatePatch::new().issue_ticket("a".into(), ValidationTicket(1))));
        drop(store.set(StatePatch::new().submitted(true)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.revision().expect("revision"), 1);

        assert!(store.unsubscribe(id).expect("unsubscribe"));
        drop(store.set(StatePatch::new().submitted(false)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn select_projects_current_state() {
        let store: Arc<dyn StateContainer<String>> = Arc::new(LocalStore::new());
        drop(store.set(StatePatch::new().upsert_field("a".into(), record("x"))));
        let count = store.select(|state| state.fields.len()).expect("select");
        assert_eq!(count, 1);
    }

    #[test]
    fn fields_patch_replaces_the_whole_map() {
        let store = LocalStore::<String>::new();
        drop(store.set(
            StatePatch::new()
                .upsert_field("a".into(), record("1"))
                .upsert_field("b".into(), record("2")),
        ));

        let replacement = FieldMap::from([(FieldKey::from("c"), record("3"))]);
        let state = block_on(
            store.set(
                StatePatch::new()
                    .fields(replacement)
                    .upsert_field("d".into(), record("4")),
            ),
        )
        .expect("replace fields");

        assert_eq!(
            state.fields.keys().map(FieldKey::as_str).collect::<Vec<_>>(),
            ["c", "d"]
        );
        assert_eq!(state.fields["c"].value, FieldValue::from("3"));
        assert_eq!(store.revision().expect("revision"), 2);
    }

    #[test]
    fn phase_follows_fields_and_submission() {
        let mut state = FormState::<String>::default();
        assert_eq!(state.phase(), FormPhase::Pristine);
        state.fields.insert("a".into(), record("x"));
        assert_eq!(state.phase(), FormPhase::Editing);
        state.submitted = true;
        assert_eq!(state.phase(), FormPhase::Submitted);
    }
}
