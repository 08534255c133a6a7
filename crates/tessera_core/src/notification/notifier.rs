//! Listener registrations of one realm handle.
//!
//! A registration captures what its target looked like when it was added
//! (the observed state). Each delivery recomputes the target against the
//! realm's current snapshot, diffs it against the observed state, replaces
//! the observed state and hands the change to the callback. Callbacks are
//! collected under the registry lock and invoked after it is released, so
//! a callback may add or remove listeners.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tessera_codec::{ObjLink, Value};

use super::changeset::{ChangeSet, ObjectChangeSet};
use super::diff::{diff_sequence_by, diff_unique};
use crate::error::CoreResult;
use crate::realm::Realm;
use crate::storage::State;
use crate::types::{ListenerToken, Version};

/// Recomputes a collection's elements against a snapshot.
pub(crate) type Compute = Arc<dyn Fn(&State) -> CoreResult<Vec<Value>> + Send + Sync>;

/// Callback of a collection listener.
pub type CollectionCallback = Arc<dyn Fn(&ChangeSet) + Send + Sync>;

/// Callback of an object listener.
pub type ObjectCallback = Arc<dyn Fn(&ObjectChangeSet) + Send + Sync>;

/// Callback of a realm-level change listener.
pub type RealmCallback = Arc<dyn Fn(&Realm) + Send + Sync>;

/// What a registration watches.
pub(crate) enum Watch {
    /// A results or list view. `unique` collections (results, sets) hold
    /// each element at most once.
    Collection {
        compute: Compute,
        unique: bool,
        observed: Vec<Value>,
        callback: CollectionCallback,
    },
    /// A single object. `observed` is `None` once its deletion has been
    /// reported.
    Object {
        link: ObjLink,
        observed: Option<Vec<Value>>,
        callback: ObjectCallback,
    },
    /// The realm itself.
    Realm { callback: RealmCallback },
}

struct Registration {
    token: ListenerToken,
    /// Identity of the watched collection or object, for bulk removal.
    target: u64,
    watch: Watch,
    version: Version,
    initial_pending: bool,
}

/// A callback ready to run.
pub(crate) enum Call {
    Collection(CollectionCallback, ChangeSet),
    Object(ObjectCallback, ObjectChangeSet),
    Realm(RealmCallback),
}

/// Registered listeners of one realm handle.
#[derive(Default)]
pub(crate) struct Notifier {
    registrations: Mutex<Vec<Registration>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `watch`, observed at `version`. Collections and objects
    /// receive an initial empty change on the next delivery.
    pub fn add(&self, target: u64, watch: Watch, version: Version) -> ListenerToken {
        let token = ListenerToken::next();
        let initial_pending = !matches!(watch, Watch::Realm { .. });
        self.registrations.lock().push(Registration {
            token,
            target,
            watch,
            version,
            initial_pending,
        });
        token
    }

    /// Removes one registration. Returns whether it existed.
    pub fn remove(&self, token: ListenerToken) -> bool {
        let mut regs = self.registrations.lock();
        let before = regs.len();
        regs.retain(|r| r.token != token);
        regs.len() != before
    }

    /// Removes every registration on `target`.
    pub fn remove_target(&self, target: u64) {
        self.registrations.lock().retain(|r| r.target != target);
    }

    /// Removes everything.
    pub fn clear(&self) {
        self.registrations.lock().clear();
    }

    pub fn contains(&self, token: ListenerToken) -> bool {
        self.registrations.lock().iter().any(|r| r.token == token)
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.lock().is_empty()
    }

    /// Brings every registration up to `state`, returning the callbacks to
    /// run in registration order.
    pub fn collect(&self, state: &State) -> Vec<(ListenerToken, Call)> {
        let mut calls = Vec::new();
        let mut regs = self.registrations.lock();
        for reg in regs.iter_mut() {
            if reg.initial_pending {
                reg.initial_pending = false;
                match &reg.watch {
                    Watch::Collection { callback, .. } => calls.push((
                        reg.token,
                        Call::Collection(Arc::clone(callback), ChangeSet::default()),
                    )),
                    Watch::Object { callback, .. } => calls.push((
                        reg.token,
                        Call::Object(Arc::clone(callback), ObjectChangeSet::default()),
                    )),
                    Watch::Realm { .. } => {}
                }
            }
            if state.version() <= reg.version {
                continue;
            }
            let since = reg.version;
            reg.version = state.version();
            match &mut reg.watch {
                Watch::Collection {
                    compute,
                    unique,
                    observed,
                    callback,
                } => {
                    // An invalidated collection reads as empty.
                    let current = compute(state).unwrap_or_default();
                    let touched =
                        |link: &ObjLink| state.row(link).is_some_and(|r| r.modified_since(since));
                    let changes = if *unique {
                        let old: Vec<&ObjLink> = observed.iter().filter_map(Value::as_link).collect();
                        let new: Vec<&ObjLink> = current.iter().filter_map(Value::as_link).collect();
                        diff_unique(&old, &new, |link| touched(*link))
                    } else {
                        // A different object at the same position is a
                        // deletion plus an insertion, not a modification.
                        diff_sequence_by(
                            observed.as_slice(),
                            &current,
                            |j| current[j].as_link().is_some_and(|link| touched(link)),
                            |old, new| old.as_link().is_none() && new.as_link().is_none(),
                        )
                    };
                    *observed = current;
                    if !changes.is_empty() {
                        calls.push((reg.token, Call::Collection(Arc::clone(callback), changes)));
                    }
                }
                Watch::Object {
                    link,
                    observed,
                    callback,
                } => {
                    let Some(before) = observed.as_ref() else { continue };
                    let changes = match state.row(link) {
                        None => {
                            *observed = None;
                            ObjectChangeSet {
                                deleted: true,
                                changed_properties: Vec::new(),
                            }
                        }
                        Some(row) if row.modified_since(since) => {
                            let changed = changed_properties(state, link, before, &row.values);
                            *observed = Some(row.values.clone());
                            ObjectChangeSet {
                                deleted: false,
                                changed_properties: changed,
                            }
                        }
                        Some(_) => continue,
                    };
                    if !changes.is_empty() {
                        calls.push((reg.token, Call::Object(Arc::clone(callback), changes)));
                    }
                }
                Watch::Realm { callback } => {
                    calls.push((reg.token, Call::Realm(Arc::clone(callback))));
                }
            }
        }
        calls
    }

    /// Runs `calls`, skipping registrations removed in the meantime.
    /// A panicking callback is logged and does not affect the others.
    pub fn dispatch(&self, calls: Vec<(ListenerToken, Call)>, realm: &Realm) {
        for (token, call) in calls {
            if !self.contains(token) {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| match &call {
                Call::Collection(callback, changes) => callback(changes),
                Call::Object(callback, changes) => callback(changes),
                Call::Realm(callback) => callback(realm),
            }));
            if outcome.is_err() {
                tracing::error!(listener = %token, "listener panicked during delivery");
            }
        }
    }
}

fn changed_properties(state: &State, link: &ObjLink, before: &[Value], after: &[Value]) -> Vec<String> {
    let Some(class) = state.schema().get(&link.class) else {
        return Vec::new();
    };
    class
        .persisted()
        .filter_map(|prop| {
            let column = prop.column?;
            let old = before.get(column).unwrap_or(&Value::Null);
            let new = after.get(column).unwrap_or(&Value::Null);
            (old != new).then(|| prop.name.clone())
        })
        .collect()
}

/// Elements a collection watch starts from.
pub(crate) fn observe(compute: &Compute, state: &State) -> Vec<Value> {
    compute(state).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ObjectSchemaDef, Schema};
    use crate::storage::WorkingState;
    use crate::types::UpdateMode;

    fn state() -> State {
        let schema = Schema::new(vec![ObjectSchemaDef::new("Item")
            .property("name", "string")
            .property("n", "int")])
        .unwrap();
        State::new(Arc::new(schema), 0)
    }

    fn all_items() -> Compute {
        Arc::new(|state: &State| {
            Ok(state
                .table("Item")?
                .keys()
                .map(|k| Value::Link(ObjLink::new("Item", k)))
                .collect())
        })
    }

    fn item(name: &str, n: i64) -> Value {
        Value::object([("name", Value::from(name)), ("n", Value::Int(n))])
    }

    fn commit(base: &State, f: impl FnOnce(&mut WorkingState)) -> State {
        let mut w = WorkingState::new(base);
        f(&mut w);
        w.state
    }

    fn recorder() -> (CollectionCallback, Arc<Mutex<Vec<ChangeSet>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        (Arc::new(move |c: &ChangeSet| sink.lock().push(c.clone())), log)
    }

    fn run(notifier: &Notifier, state: &State) {
        for (_, call) in notifier.collect(state) {
            if let Call::Collection(cb, changes) = call {
                cb(&changes);
            }
        }
    }

    #[test]
    fn initial_call_then_insertion() {
        let s0 = commit(&state(), |w| {
            w.create("Item", item("a", 1), UpdateMode::Never).unwrap();
        });
        let notifier = Notifier::new();
        let compute = all_items();
        let (cb, log) = recorder();
        notifier.add(
            1,
            Watch::Collection {
                observed: observe(&compute, &s0),
                compute,
                unique: true,
                callback: cb,
            },
            s0.version(),
        );
        let s1 = commit(&s0, |w| {
            w.create("Item", item("b", 2), UpdateMode::Never).unwrap();
        });
        run(&notifier, &s1);
        let calls = log.lock().clone();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].is_empty());
        assert_eq!(calls[1].insertions, vec![1]);
        assert!(calls[1].deletions.is_empty());
        assert!(calls[1].modifications.is_empty());
    }

    #[test]
    fn modification_is_detected_from_row_versions() {
        let mut key = None;
        let s0 = commit(&state(), |w| {
            key = Some(w.create("Item", item("a", 1), UpdateMode::Never).unwrap());
        });
        let notifier = Notifier::new();
        let compute = all_items();
        let (cb, log) = recorder();
        notifier.add(
            1,
            Watch::Collection {
                observed: observe(&compute, &s0),
                compute,
                unique: true,
                callback: cb,
            },
            s0.version(),
        );
        run(&notifier, &s0);
        let link = ObjLink::new("Item", key.unwrap());
        let s1 = commit(&s0, |w| w.set_property(&link, "n", Value::Int(5)).unwrap());
        run(&notifier, &s1);
        let calls = log.lock().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].modifications, vec![0]);
        assert_eq!(calls[1].old_modifications, vec![0]);
    }

    #[test]
    fn object_watch_reports_properties_then_deletion() {
        let mut key = None;
        let s0 = commit(&state(), |w| {
            key = Some(w.create("Item", item("a", 1), UpdateMode::Never).unwrap());
        });
        let link = ObjLink::new("Item", key.unwrap());
        let notifier = Notifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        notifier.add(
            2,
            Watch::Object {
                link: link.clone(),
                observed: Some(s0.row(&link).unwrap().values.clone()),
                callback: Arc::new(move |c: &ObjectChangeSet| sink.lock().push(c.clone())),
            },
            s0.version(),
        );
        let s1 = commit(&s0, |w| w.set_property(&link, "n", Value::Int(9)).unwrap());
        let s2 = commit(&s1, |w| w.delete(&link).unwrap());
        for s in [&s1, &s2, &s2] {
            for (_, call) in notifier.collect(s) {
                if let Call::Object(cb, c) = call {
                    cb(&c);
                }
            }
        }
        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].is_empty());
        assert_eq!(seen[1].changed_properties, vec!["n".to_string()]);
        assert!(seen[2].deleted);
    }

    #[test]
    fn removed_registrations_are_skipped() {
        let notifier = Notifier::new();
        let compute = all_items();
        let (cb, _) = recorder();
        let s = state();
        let token = notifier.add(
            1,
            Watch::Collection {
                observed: Vec::new(),
                compute,
                unique: true,
                callback: cb,
            },
            s.version(),
        );
        assert!(notifier.contains(token));
        assert!(notifier.remove(token));
        assert!(!notifier.remove(token));
        assert!(notifier.is_empty());
    }
}
