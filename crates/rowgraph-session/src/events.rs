//! Typed extension points.
//!
//! Callbacks run synchronously in registration order. Pre-callbacks may
//! return [`HookOutcome::Cancel`] to veto the operation; the outcome of a
//! post-callback is ignored.

use rowgraph_core::Value;

use crate::record::{Oid, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookOutcome {
    #[default]
    Continue,
    Cancel,
}

/// Record lifecycle extension points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordEvent {
    PreSave,
    PostSave,
    PreInsert,
    PostInsert,
    PreUpdate,
    PostUpdate,
    PreDelete,
    PostDelete,
}

impl RecordEvent {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RecordEvent::PreSave => "preSave",
            RecordEvent::PostSave => "postSave",
            RecordEvent::PreInsert => "preInsert",
            RecordEvent::PostInsert => "postInsert",
            RecordEvent::PreUpdate => "preUpdate",
            RecordEvent::PostUpdate => "postUpdate",
            RecordEvent::PreDelete => "preDelete",
            RecordEvent::PostDelete => "postDelete",
        }
    }

    pub const fn is_pre(&self) -> bool {
        matches!(
            self,
            RecordEvent::PreSave
                | RecordEvent::PreInsert
                | RecordEvent::PreUpdate
                | RecordEvent::PreDelete
        )
    }
}

/// A field value change, before or after it is applied.
#[derive(Debug)]
pub struct FieldChange<'a> {
    pub table: &'a str,
    pub oid: Oid,
    pub field: &'a str,
    pub old: &'a Value,
    pub new: &'a Value,
}

/// Record seen by a lifecycle callback.
///
/// Field writes are queued and applied through the session after the
/// callback returns, so relation bookkeeping still happens for them.
#[derive(Debug)]
pub struct RecordContext<'a> {
    event: RecordEvent,
    record: &'a Record,
    assignments: Vec<(String, Value)>,
}

impl<'a> RecordContext<'a> {
    pub(crate) fn new(event: RecordEvent, record: &'a Record) -> Self {
        Self {
            event,
            record,
            assignments: Vec::new(),
        }
    }

    pub fn event(&self) -> RecordEvent {
        self.event
    }

    pub fn table(&self) -> &str {
        self.record.table()
    }

    pub fn record(&self) -> &Record {
        self.record
    }

    /// Queue a field write.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.assignments.push((field.into(), value.into()));
    }

    pub(crate) fn into_assignments(self) -> Vec<(String, Value)> {
        self.assignments
    }
}

type FieldHookFn = Box<dyn FnMut(&FieldChange<'_>) -> HookOutcome + Send>;
type RecordHookFn = Box<dyn FnMut(&mut RecordContext<'_>) -> HookOutcome + Send>;

/// Registered callbacks of a session.
#[derive(Default)]
pub struct SessionHooks {
    pre_field_change: Vec<FieldHookFn>,
    post_field_change: Vec<FieldHookFn>,
    record: Vec<(RecordEvent, RecordHookFn)>,
}

impl std::fmt::Debug for SessionHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHooks")
            .field("pre_field_change", &self.pre_field_change.len())
            .field("post_field_change", &self.post_field_change.len())
            .field("record", &self.record.len())
            .finish()
    }
}

impl SessionHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pre_field_change.is_empty() && self.post_field_change.is_empty() && self.record.is_empty()
    }

    /// Register a callback that may veto a field change.
    pub fn on_pre_field_change(
        &mut self,
        f: impl FnMut(&FieldChange<'_>) -> HookOutcome + Send + 'static,
    ) {
        self.pre_field_change.push(Box::new(f));
    }

    /// Register a callback that observes applied field changes.
    pub fn on_post_field_change(&mut self, mut f: impl FnMut(&FieldChange<'_>) + Send + 'static) {
        self.post_field_change.push(Box::new(move |change| {
            f(change);
            HookOutcome::Continue
        }));
    }

    /// Register a record lifecycle callback.
    pub fn on(
        &mut self,
        event: RecordEvent,
        f: impl FnMut(&mut RecordContext<'_>) -> HookOutcome + Send + 'static,
    ) {
        self.record.push((event, Box::new(f)));
    }

    pub(crate) fn has_field_hooks(&self) -> bool {
        !self.pre_field_change.is_empty() || !self.post_field_change.is_empty()
    }

    pub(crate) fn fire_pre_field_change(&mut self, change: &FieldChange<'_>) -> HookOutcome {
        for cb in &mut self.pre_field_change {
            if cb(change) == HookOutcome::Cancel {
                tracing::debug!(table = change.table, field = change.field, "field change vetoed");
                return HookOutcome::Cancel;
            }
        }
        HookOutcome::Continue
    }

    pub(crate) fn fire_post_field_change(&mut self, change: &FieldChange<'_>) {
        for cb in &mut self.post_field_change {
            cb(change);
        }
    }

    /// Run the callbacks of `event`; returns the queued field writes.
    pub(crate) fn fire_record(
        &mut self,
        event: RecordEvent,
        record: &Record,
    ) -> (HookOutcome, Vec<(String, Value)>) {
        let mut ctx = RecordContext::new(event, record);
        let mut outcome = HookOutcome::Continue;
        for (registered, cb) in &mut self.record {
            if *registered != event {
                continue;
            }
            if cb(&mut ctx) == HookOutcome::Cancel {
                if event.is_pre() {
                    outcome = HookOutcome::Cancel;
                    break;
                }
                tracing::warn!(event = event.as_str(), "cancel returned from post callback is ignored");
            }
        }
        (outcome, ctx.into_assignments())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record() -> Record {
        Record::new(Oid(1), "article", HashMap::new())
    }

    #[test]
    fn record_callbacks_run_in_order_and_queue_writes() {
        let mut hooks = SessionHooks::new();
        hooks.on(RecordEvent::PreInsert, |ctx| {
            ctx.set("created_on", "2013-01-01 00:00:00");
            HookOutcome::Continue
        });
        hooks.on(RecordEvent::PreInsert, |ctx| {
            ctx.set("created_on", "2014-01-01 00:00:00");
            HookOutcome::Continue
        });
        hooks.on(RecordEvent::PreUpdate, |_| HookOutcome::Cancel);

        let record = record();
        let (outcome, writes) = hooks.fire_record(RecordEvent::PreInsert, &record);
        assert_eq!(outcome, HookOutcome::Continue);
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].1, Value::from("2014-01-01 00:00:00"));
    }

    #[test]
    fn pre_cancel_stops_remaining_callbacks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut hooks = SessionHooks::new();
        hooks.on(RecordEvent::PreDelete, |_| HookOutcome::Cancel);
        let counter = Arc::clone(&calls);
        hooks.on(RecordEvent::PreDelete, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            HookOutcome::Continue
        });
        let (outcome, _) = hooks.fire_record(RecordEvent::PreDelete, &record());
        assert_eq!(outcome, HookOutcome::Cancel);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn post_cancel_is_ignored() {
        let mut hooks = SessionHooks::new();
        hooks.on(RecordEvent::PostSave, |_| HookOutcome::Cancel);
        let (outcome, _) = hooks.fire_record(RecordEvent::PostSave, &record());
        assert_eq!(outcome, HookOutcome::Continue);
    }

    #[test]
    fn field_change_veto() {
        let mut hooks = SessionHooks::new();
        hooks.on_pre_field_change(|change| {
            if change.field == "username" {
                HookOutcome::Cancel
            } else {
                HookOutcome::Continue
            }
        });
        let (old, new) = (Value::Null, Value::from("x"));
        let change = FieldChange {
            table: "user",
            oid: Oid(1),
            field: "username",
            old: &old,
            new: &new,
        };
        assert_eq!(hooks.fire_pre_field_change(&change), HookOutcome::Cancel);
        assert!(hooks.has_field_hooks());
    }
}
