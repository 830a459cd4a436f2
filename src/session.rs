use crate::autosave::{AutosaveConfig, AutosaveCoordinator, EntityFields, EntityKey, PersistRequest};
use crate::curriculum::{
    Course, CourseTree, CurriculumDefaults, LessonFields, ModuleFields, Rejection,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// The editing state for one open course: the tree the editor shows and
/// the autosave bookkeeping behind it.
#[derive(Debug)]
pub struct EditorSession {
    tree: CourseTree,
    pub autosave: AutosaveCoordinator,
    pub defaults: CurriculumDefaults,
}

impl EditorSession {
    pub fn open(tree: CourseTree, config: AutosaveConfig, defaults: CurriculumDefaults) -> Self {
        let mut autosave = AutosaveCoordinator::new(config);
        track_all(&mut autosave, &tree);
        Self {
            tree,
            autosave,
            defaults,
        }
    }

    pub fn tree(&self) -> &CourseTree {
        &self.tree
    }

    pub fn course_id(&self) -> &str {
        &self.tree.course.id
    }

    /// Installs a structural edit. New entities start tracking from their
    /// defaults; removed ones drop their pending saves.
    pub fn apply(&mut self, edit: Result<CourseTree, Rejection>) -> Result<(), Rejection> {
        let next = edit?;
        let before = entity_keys(&self.tree);
        let after = entity_keys(&next);
        for gone in before.difference(&after) {
            self.autosave.forget(gone);
        }
        for module in &next.modules {
            let key = EntityKey::Module(module.id.clone());
            if !before.contains(&key) {
                self.autosave
                    .track(key, EntityFields::Module(ModuleFields::snapshot(module)));
            }
            for lesson in &module.lessons {
                let key = EntityKey::Lesson(lesson.id.clone());
                if !before.contains(&key) {
                    self.autosave
                        .track(key, EntityFields::Lesson(LessonFields::snapshot(lesson)));
                }
            }
        }
        self.tree = next;
        Ok(())
    }

    /// Optimistic: the tree changes now, the store catches up after the
    /// debounce window.
    pub fn edit_lesson(
        &mut self,
        lesson_id: &str,
        fields: LessonFields,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        if fields.is_empty() {
            return Err(Rejection::Unchanged);
        }
        let fields = fields.cleaned()?;
        self.tree = self.tree.update_lesson(lesson_id, &fields)?;
        self.autosave.edit(
            EntityKey::Lesson(lesson_id.to_string()),
            EntityFields::Lesson(fields),
            now,
        );
        Ok(())
    }

    pub fn edit_module(
        &mut self,
        module_id: &str,
        fields: ModuleFields,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        if fields.is_empty() {
            return Err(Rejection::Unchanged);
        }
        let fields = fields.cleaned()?;
        self.tree = self.tree.update_module(module_id, &fields)?;
        self.autosave.edit(
            EntityKey::Module(module_id.to_string()),
            EntityFields::Module(fields),
            now,
        );
        Ok(())
    }

    /// Renames go through autosave like any other field edit.
    pub fn rename_module(
        &mut self,
        module_id: &str,
        title: &str,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        let next = self.tree.rename_module(module_id, title)?;
        let title = next.module(module_id).map(|m| m.title.clone());
        self.tree = next;
        self.autosave.edit(
            EntityKey::Module(module_id.to_string()),
            EntityFields::Module(ModuleFields {
                title,
                ..ModuleFields::default()
            }),
            now,
        );
        Ok(())
    }

    pub fn rename_lesson(
        &mut self,
        module_id: &str,
        lesson_id: &str,
        title: &str,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        let next = self.tree.rename_lesson(module_id, lesson_id, title)?;
        let title = next.find_lesson(lesson_id).map(|(_, l)| l.title.clone());
        self.tree = next;
        self.autosave.edit(
            EntityKey::Lesson(lesson_id.to_string()),
            EntityFields::Lesson(LessonFields {
                title,
                ..LessonFields::default()
            }),
            now,
        );
        Ok(())
    }

    /// Runs due persists through `persist` and feeds each outcome back.
    pub fn flush_due<F>(&mut self, now: DateTime<Utc>, persist: F) -> Vec<PersistRequest>
    where
        F: FnMut(&PersistRequest) -> Result<(), String>,
    {
        let requests = self.autosave.poll(now);
        self.run(requests, now, persist)
    }

    /// Sends everything still pending, e.g. before the session is closed.
    pub fn flush_all<F>(&mut self, now: DateTime<Utc>, persist: F) -> Vec<PersistRequest>
    where
        F: FnMut(&PersistRequest) -> Result<(), String>,
    {
        let requests = self.autosave.flush(now);
        self.run(requests, now, persist)
    }

    fn run<F>(
        &mut self,
        requests: Vec<PersistRequest>,
        now: DateTime<Utc>,
        mut persist: F,
    ) -> Vec<PersistRequest>
    where
        F: FnMut(&PersistRequest) -> Result<(), String>,
    {
        for request in &requests {
            let outcome = persist(request);
            self.autosave.complete(&request.entity, outcome, now);
        }
        requests
    }

    /// After an explicit save: adopt the store's ids and treat the saved
    /// tree as the new baseline.
    pub fn saved(&mut self, assigned: &HashMap<String, String>) {
        for module in &self.tree.modules {
            if let Some(id) = assigned.get(&module.id) {
                self.autosave
                    .rekey(&EntityKey::Module(module.id.clone()), id);
            }
            for lesson in &module.lessons {
                if let Some(id) = assigned.get(&lesson.id) {
                    self.autosave
                        .rekey(&EntityKey::Lesson(lesson.id.clone()), id);
                }
            }
        }
        self.tree = self.tree.rekey(assigned);
        track_all(&mut self.autosave, &self.tree);
    }

    pub fn replace_course(&mut self, course: Course) {
        self.tree.course = course;
    }
}

fn track_all(autosave: &mut AutosaveCoordinator, tree: &CourseTree) {
    for module in &tree.modules {
        autosave.track(
            EntityKey::Module(module.id.clone()),
            EntityFields::Module(ModuleFields::snapshot(module)),
        );
        for lesson in &module.lessons {
            autosave.track(
                EntityKey::Lesson(lesson.id.clone()),
                EntityFields::Lesson(LessonFields::snapshot(lesson)),
            );
        }
    }
}

fn entity_keys(tree: &CourseTree) -> HashSet<EntityKey> {
    let mut keys = HashSet::new();
    for module in &tree.modules {
        keys.insert(EntityKey::Module(module.id.clone()));
        for lesson in &module.lessons {
            keys.insert(EntityKey::Lesson(lesson.id.clone()));
        }
    }
    keys
}
