use crate::curriculum::{is_placeholder_id, LessonFields, ModuleFields};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum EntityKey {
    Lesson(String),
    Module(String),
}

impl EntityKey {
    pub fn id(&self) -> &str {
        match self {
            Self::Lesson(id) | Self::Module(id) => id,
        }
    }

    fn with_id(&self, id: String) -> Self {
        match self {
            Self::Lesson(_) => Self::Lesson(id),
            Self::Module(_) => Self::Module(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "fields", rename_all = "lowercase")]
pub enum EntityFields {
    Lesson(LessonFields),
    Module(ModuleFields),
}

impl EntityFields {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Lesson(f) => f.is_empty(),
            Self::Module(f) => f.is_empty(),
        }
    }

    /// Mismatched kinds never share a key, so they are ignored.
    fn merge(&mut self, newer: &Self) {
        match (self, newer) {
            (Self::Lesson(a), Self::Lesson(b)) => a.merge(b),
            (Self::Module(a), Self::Module(b)) => a.merge(b),
            _ => {}
        }
    }

    fn changed_from(&self, baseline: &Self) -> Self {
        match (self, baseline) {
            (Self::Lesson(a), Self::Lesson(b)) => Self::Lesson(a.changed_from(b)),
            (Self::Module(a), Self::Module(b)) => Self::Module(a.changed_from(b)),
            (other, _) => other.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveState {
    Idle,
    Pending,
    Saving,
    Saved,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosaveConfig {
    pub debounce: Duration,
    pub saved_display: Duration,
    pub error_display: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::milliseconds(1000),
            saved_display: Duration::milliseconds(2000),
            error_display: Duration::milliseconds(3000),
        }
    }
}

/// Per-key deadlines. Scheduling an armed key moves its deadline.
#[derive(Debug, Clone, Default)]
pub struct Debouncer<K: Ord + Clone> {
    deadlines: BTreeMap<K, DateTime<Utc>>,
}

impl<K: Ord + Clone> Debouncer<K> {
    pub fn new() -> Self {
        Self {
            deadlines: BTreeMap::new(),
        }
    }

    pub fn schedule(&mut self, key: K, at: DateTime<Utc>) {
        self.deadlines.insert(key, at);
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        self.deadlines.remove(key).is_some()
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        self.deadlines.contains_key(key)
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.deadlines.values().min().copied()
    }

    /// Pulls every later deadline forward to `now`.
    pub fn expedite(&mut self, now: DateTime<Utc>) {
        for at in self.deadlines.values_mut() {
            if *at > now {
                *at = now;
            }
        }
    }

    /// Removes and returns every key due at `now`, earliest first.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<K> {
        let mut due: Vec<(DateTime<Utc>, K)> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(k, at)| (*at, k.clone()))
            .collect();
        due.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        for (_, k) in &due {
            self.deadlines.remove(k);
        }
        due.into_iter().map(|(_, k)| k).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistRequest {
    pub entity: EntityKey,
    pub fields: EntityFields,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveEvent {
    pub entity: EntityKey,
    pub state: SaveState,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
struct Track {
    state: SaveState,
    baseline: EntityFields,
    pending: Option<EntityFields>,
    in_flight: Option<EntityFields>,
    display_until: Option<DateTime<Utc>>,
    last_saved_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl Track {
    fn new(baseline: EntityFields) -> Self {
        Self {
            state: SaveState::Idle,
            baseline,
            pending: None,
            in_flight: None,
            display_until: None,
            last_saved_at: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityStatus {
    pub entity: EntityKey,
    pub state: SaveState,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Edits the store has not confirmed yet, including a failed diff
    /// waiting for the next cycle.
    pub unsaved: bool,
}

/// Turns a stream of field edits into at most one persist call per entity
/// per settled debounce window. Time is always passed in.
#[derive(Debug)]
pub struct AutosaveCoordinator {
    config: AutosaveConfig,
    timers: Debouncer<EntityKey>,
    tracks: BTreeMap<EntityKey, Track>,
    events: Vec<SaveEvent>,
}

impl AutosaveCoordinator {
    pub fn new(config: AutosaveConfig) -> Self {
        Self {
            config,
            timers: Debouncer::new(),
            tracks: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    /// Records what the store currently holds for an entity.
    pub fn track(&mut self, entity: EntityKey, baseline: EntityFields) {
        match self.tracks.get_mut(&entity) {
            Some(track) => track.baseline = baseline,
            None => {
                self.tracks.insert(entity, Track::new(baseline));
            }
        }
    }

    pub fn forget(&mut self, entity: &EntityKey) {
        self.timers.cancel(entity);
        self.tracks.remove(entity);
    }

    /// Moves an entity's state to the id the store assigned.
    pub fn rekey(&mut self, from: &EntityKey, to_id: &str) {
        let Some(track) = self.tracks.remove(from) else {
            return;
        };
        let to = from.with_id(to_id.to_string());
        if let Some(at) = self.timers.deadlines.remove(from) {
            self.timers.schedule(to.clone(), at);
        }
        self.tracks.insert(to, track);
    }

    pub fn state(&self, entity: &EntityKey) -> SaveState {
        self.tracks
            .get(entity)
            .map(|t| t.state)
            .unwrap_or(SaveState::Idle)
    }

    pub fn statuses(&self) -> Vec<EntityStatus> {
        self.tracks
            .iter()
            .map(|(k, t)| EntityStatus {
                entity: k.clone(),
                state: t.state,
                last_saved_at: t.last_saved_at,
                last_error: t.last_error.clone(),
                unsaved: t.pending.is_some() || t.in_flight.is_some(),
            })
            .collect()
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timers.next_deadline()
    }

    pub fn has_pending_work(&self) -> bool {
        self.timers.next_deadline().is_some()
            || self
                .tracks
                .values()
                .any(|t| t.in_flight.is_some() || t.pending.is_some())
    }

    pub fn drain_events(&mut self) -> Vec<SaveEvent> {
        std::mem::take(&mut self.events)
    }

    /// Arms (or re-arms) the entity's timer. The caller has already
    /// applied the edit to the tree.
    pub fn edit(&mut self, entity: EntityKey, fields: EntityFields, now: DateTime<Utc>) {
        let track = self.tracks.entry(entity.clone()).or_insert_with(|| {
            let empty = match &fields {
                EntityFields::Lesson(_) => EntityFields::Lesson(LessonFields::default()),
                EntityFields::Module(_) => EntityFields::Module(ModuleFields::default()),
            };
            Track::new(empty)
        });
        match track.pending.as_mut() {
            Some(pending) => pending.merge(&fields),
            None => track.pending = Some(fields),
        }
        self.timers.schedule(entity.clone(), now + self.config.debounce);
        if track.state != SaveState::Saving && track.state != SaveState::Pending {
            track.state = SaveState::Pending;
            track.display_until = None;
            self.events.push(SaveEvent {
                entity,
                state: SaveState::Pending,
                at: now,
                message: None,
            });
        }
    }

    /// Fires due timers and expires finished status displays. Returns the
    /// persist calls the caller must execute and report via `complete`.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Vec<PersistRequest> {
        self.settle_due_status(now);
        let mut requests = Vec::new();
        for entity in self.timers.take_due(now) {
            let Some(track) = self.tracks.get_mut(&entity) else {
                continue;
            };
            if track.in_flight.is_some() {
                self.timers.schedule(entity, now + self.config.debounce);
                continue;
            }
            let Some(pending) = track.pending.take() else {
                continue;
            };
            let diff = pending.changed_from(&track.baseline);
            if diff.is_empty() {
                track.state = SaveState::Idle;
                self.events.push(SaveEvent {
                    entity,
                    state: SaveState::Idle,
                    at: now,
                    message: None,
                });
                continue;
            }
            if is_placeholder_id(entity.id()) {
                // Nothing to update remotely until the explicit save creates it.
                track.baseline.merge(&diff);
                mark_saved(track, &self.config, now);
                self.events.push(SaveEvent {
                    entity,
                    state: SaveState::Saved,
                    at: now,
                    message: None,
                });
                continue;
            }
            track.state = SaveState::Saving;
            track.in_flight = Some(diff.clone());
            self.events.push(SaveEvent {
                entity: entity.clone(),
                state: SaveState::Saving,
                at: now,
                message: None,
            });
            requests.push(PersistRequest {
                entity,
                fields: diff,
                updated_at: now,
            });
        }
        requests
    }

    /// Like `poll`, without waiting out the debounce windows. Diffs left
    /// over from a failed persist are sent too.
    pub fn flush(&mut self, now: DateTime<Utc>) -> Vec<PersistRequest> {
        self.timers.expedite(now);
        for (entity, track) in &self.tracks {
            if track.pending.is_some() && !self.timers.is_scheduled(entity) {
                self.timers.schedule(entity.clone(), now);
            }
        }
        self.poll(now)
    }

    /// Applies the outcome of a persist call issued by `poll`.
    pub fn complete(&mut self, entity: &EntityKey, outcome: Result<(), String>, now: DateTime<Utc>) {
        let Some(track) = self.tracks.get_mut(entity) else {
            return;
        };
        let Some(sent) = track.in_flight.take() else {
            return;
        };
        match outcome {
            Ok(()) => {
                track.baseline.merge(&sent);
                track.last_error = None;
                mark_saved(track, &self.config, now);
                self.events.push(SaveEvent {
                    entity: entity.clone(),
                    state: SaveState::Saved,
                    at: now,
                    message: None,
                });
                if track.pending.is_some() {
                    track.state = SaveState::Pending;
                    track.display_until = None;
                    self.events.push(SaveEvent {
                        entity: entity.clone(),
                        state: SaveState::Pending,
                        at: now,
                        message: None,
                    });
                }
            }
            Err(message) => {
                // Keep the unsaved diff so the next cycle sends it again.
                let mut retry = sent;
                if let Some(newer) = track.pending.take() {
                    retry.merge(&newer);
                }
                track.pending = Some(retry);
                track.state = SaveState::Error;
                track.display_until = Some(now + self.config.error_display);
                track.last_error = Some(message.clone());
                self.events.push(SaveEvent {
                    entity: entity.clone(),
                    state: SaveState::Error,
                    at: now,
                    message: Some(message),
                });
            }
        }
    }

    /// `saved` and `error` fall back to `idle` once their display window ends.
    pub fn settle_due_status(&mut self, now: DateTime<Utc>) {
        for (entity, track) in self.tracks.iter_mut() {
            let Some(until) = track.display_until else {
                continue;
            };
            if until > now || !matches!(track.state, SaveState::Saved | SaveState::Error) {
                continue;
            }
            track.display_until = None;
            track.state = SaveState::Idle;
            self.events.push(SaveEvent {
                entity: entity.clone(),
                state: SaveState::Idle,
                at: now,
                message: None,
            });
        }
    }
}

fn mark_saved(track: &mut Track, config: &AutosaveConfig, now: DateTime<Utc>) {
    track.state = SaveState::Saved;
    track.display_until = Some(now + config.saved_display);
    track.last_saved_at = Some(now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{parse_timestamp, Clock, ManualClock};
    use crate::curriculum::Content;
    use serde_json::json;

    fn start() -> DateTime<Utc> {
        parse_timestamp("2024-05-01T09:00:00Z").expect("start")
    }

    fn lesson_key() -> EntityKey {
        EntityKey::Lesson("l1".to_string())
    }

    fn content(v: serde_json::Value) -> EntityFields {
        EntityFields::Lesson(LessonFields {
            content: Some(Content::new(v)),
            ..LessonFields::default()
        })
    }

    fn coordinator() -> AutosaveCoordinator {
        let mut c = AutosaveCoordinator::new(AutosaveConfig::default());
        c.track(
            lesson_key(),
            EntityFields::Lesson(LessonFields {
                title: Some("Intro".to_string()),
                content: Some(Content::new(json!({ "text": "v0" }))),
                ..LessonFields::default()
            }),
        );
        c
    }

    fn states(events: &[SaveEvent]) -> Vec<SaveState> {
        events.iter().map(|e| e.state).collect()
    }

    #[test]
    fn two_edits_inside_the_window_persist_once_with_the_final_value() {
        let clock = ManualClock::at(start());
        let mut c = coordinator();
        c.edit(lesson_key(), content(json!({ "text": "v1" })), clock.now());
        clock.advance_ms(500);
        c.edit(lesson_key(), content(json!({ "text": "v2" })), clock.now());
        clock.advance_ms(600);
        assert!(c.poll(clock.now()).is_empty());
        clock.advance_ms(400);
        let requests = c.poll(clock.now());
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].fields, content(json!({ "text": "v2" })));
        assert_eq!(c.state(&lesson_key()), SaveState::Saving);

        c.complete(&lesson_key(), Ok(()), clock.now());
        assert_eq!(c.state(&lesson_key()), SaveState::Saved);
        assert!(c.poll(clock.now()).is_empty());
        assert_eq!(
            states(&c.drain_events()),
            vec![SaveState::Pending, SaveState::Saving, SaveState::Saved]
        );
    }

    #[test]
    fn restoring_the_baseline_skips_the_persist() {
        let clock = ManualClock::at(start());
        let mut c = coordinator();
        c.edit(lesson_key(), content(json!({ "text": "typo" })), clock.now());
        clock.advance_ms(300);
        c.edit(lesson_key(), content(json!({ "text": "v0" })), clock.now());
        clock.advance_ms(1000);
        assert!(c.poll(clock.now()).is_empty());
        assert_eq!(c.state(&lesson_key()), SaveState::Idle);
    }

    #[test]
    fn request_carries_only_changed_fields() {
        let clock = ManualClock::at(start());
        let mut c = coordinator();
        c.edit(
            lesson_key(),
            EntityFields::Lesson(LessonFields {
                title: Some("Intro".to_string()),
                is_published: Some(true),
                ..LessonFields::default()
            }),
            clock.now(),
        );
        clock.advance_ms(1000);
        let requests = c.poll(clock.now());
        assert_eq!(
            requests[0].fields,
            EntityFields::Lesson(LessonFields {
                is_published: Some(true),
                ..LessonFields::default()
            })
        );
        assert_eq!(requests[0].updated_at, clock.now());
    }

    #[test]
    fn placeholder_entities_are_saved_locally() {
        let clock = ManualClock::at(start());
        let mut c = AutosaveCoordinator::new(AutosaveConfig::default());
        let key = EntityKey::Lesson("temp-lesson-1".to_string());
        c.edit(key.clone(), content(json!({ "text": "draft" })), clock.now());
        clock.advance_ms(1000);
        assert!(c.poll(clock.now()).is_empty());
        assert_eq!(c.state(&key), SaveState::Saved);
    }

    #[test]
    fn failure_keeps_the_diff_for_the_next_cycle() {
        let clock = ManualClock::at(start());
        let mut c = coordinator();
        c.edit(lesson_key(), content(json!({ "text": "v1" })), clock.now());
        clock.advance_ms(1000);
        assert_eq!(c.poll(clock.now()).len(), 1);
        c.complete(&lesson_key(), Err("network down".to_string()), clock.now());
        assert_eq!(c.state(&lesson_key()), SaveState::Error);

        clock.advance_ms(3000);
        assert!(c.poll(clock.now()).is_empty());
        assert_eq!(c.state(&lesson_key()), SaveState::Idle);
        assert!(c.has_pending_work());
        assert!(c.statuses()[0].unsaved);

        // A title-only edit also carries the content that never made it.
        c.edit(
            lesson_key(),
            EntityFields::Lesson(LessonFields {
                title: Some("Intro to traits".to_string()),
                ..LessonFields::default()
            }),
            clock.now(),
        );
        clock.advance_ms(1000);
        let requests = c.poll(clock.now());
        assert_eq!(
            requests[0].fields,
            EntityFields::Lesson(LessonFields {
                title: Some("Intro to traits".to_string()),
                content: Some(Content::new(json!({ "text": "v1" }))),
                ..LessonFields::default()
            })
        );
    }

    #[test]
    fn edits_during_a_save_wait_for_it_to_finish() {
        let clock = ManualClock::at(start());
        let mut c = coordinator();
        c.edit(lesson_key(), content(json!({ "text": "v1" })), clock.now());
        clock.advance_ms(1000);
        assert_eq!(c.poll(clock.now()).len(), 1);

        c.edit(lesson_key(), content(json!({ "text": "v2" })), clock.now());
        assert_eq!(c.state(&lesson_key()), SaveState::Saving);
        clock.advance_ms(1000);
        // Still in flight: no second concurrent call.
        assert!(c.poll(clock.now()).is_empty());

        c.complete(&lesson_key(), Ok(()), clock.now());
        assert_eq!(c.state(&lesson_key()), SaveState::Pending);
        clock.advance_ms(1000);
        let requests = c.poll(clock.now());
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].fields, content(json!({ "text": "v2" })));
    }

    #[test]
    fn saved_display_expires_after_two_seconds() {
        let clock = ManualClock::at(start());
        let mut c = coordinator();
        c.edit(lesson_key(), content(json!({ "text": "v1" })), clock.now());
        clock.advance_ms(1000);
        c.poll(clock.now());
        c.complete(&lesson_key(), Ok(()), clock.now());
        clock.advance_ms(1999);
        c.settle_due_status(clock.now());
        assert_eq!(c.state(&lesson_key()), SaveState::Saved);
        clock.advance_ms(1);
        c.settle_due_status(clock.now());
        assert_eq!(c.state(&lesson_key()), SaveState::Idle);
    }

    #[test]
    fn entities_are_debounced_independently() {
        let clock = ManualClock::at(start());
        let mut c = coordinator();
        let module = EntityKey::Module("m1".to_string());
        c.track(
            module.clone(),
            EntityFields::Module(ModuleFields {
                title: Some("Week 1".to_string()),
                ..ModuleFields::default()
            }),
        );
        c.edit(lesson_key(), content(json!({ "text": "v1" })), clock.now());
        clock.advance_ms(700);
        c.edit(
            module.clone(),
            EntityFields::Module(ModuleFields {
                weekly_sprint_goal: Some(Some("Ship it".to_string())),
                ..ModuleFields::default()
            }),
            clock.now(),
        );
        clock.advance_ms(300);
        let first = c.poll(clock.now());
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].entity, lesson_key());
        assert_eq!(c.next_deadline(), Some(clock.now() + Duration::milliseconds(700)));
        clock.advance_ms(700);
        let second = c.poll(clock.now());
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].entity, module);
    }

    #[test]
    fn flush_sends_pending_edits_early() {
        let clock = ManualClock::at(start());
        let mut c = coordinator();
        c.edit(lesson_key(), content(json!({ "text": "v1" })), clock.now());
        clock.advance_ms(10);
        let requests = c.flush(clock.now());
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].updated_at, clock.now());
        assert!(c.flush(clock.now()).is_empty());
    }

    #[test]
    fn flush_resends_a_failed_diff() {
        let clock = ManualClock::at(start());
        let mut c = coordinator();
        c.edit(lesson_key(), content(json!({ "text": "v1" })), clock.now());
        clock.advance_ms(1000);
        assert_eq!(c.poll(clock.now()).len(), 1);
        c.complete(&lesson_key(), Err("network down".to_string()), clock.now());
        assert_eq!(c.next_deadline(), None);

        let requests = c.flush(clock.now());
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].fields, content(json!({ "text": "v1" })));
        c.complete(&lesson_key(), Ok(()), clock.now());
        assert!(!c.has_pending_work());
        assert!(!c.statuses()[0].unsaved);
    }

    #[test]
    fn forget_cancels_the_timer() {
        let clock = ManualClock::at(start());
        let mut c = coordinator();
        c.edit(lesson_key(), content(json!({ "text": "v1" })), clock.now());
        c.forget(&lesson_key());
        clock.advance_ms(5000);
        assert!(c.poll(clock.now()).is_empty());
        assert!(!c.has_pending_work());
    }

    #[test]
    fn debouncer_reschedule_moves_the_deadline() {
        let mut d: Debouncer<&str> = Debouncer::new();
        let t0 = start();
        d.schedule("a", t0 + Duration::milliseconds(1000));
        d.schedule("a", t0 + Duration::milliseconds(1500));
        assert!(d.take_due(t0 + Duration::milliseconds(1000)).is_empty());
        assert_eq!(d.take_due(t0 + Duration::milliseconds(1500)), vec!["a"]);
        assert!(!d.is_scheduled(&"a"));
        d.schedule("b", t0);
        assert!(d.cancel(&"b"));
        assert!(!d.cancel(&"b"));
    }
}
