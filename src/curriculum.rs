use crate::reorder::{self, Ordered};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

pub const PLACEHOLDER_PREFIX: &str = "temp-";

/// Ids minted by the editor before the store has assigned a real one.
pub fn is_placeholder_id(id: &str) -> bool {
    id.starts_with(PLACEHOLDER_PREFIX)
}

pub fn placeholder_module_id() -> String {
    format!("{}module-{}", PLACEHOLDER_PREFIX, Uuid::new_v4())
}

pub fn placeholder_lesson_id() -> String {
    format!("{}lesson-{}", PLACEHOLDER_PREFIX, Uuid::new_v4())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryType {
    SelfPaced,
    Cohort,
}

impl DeliveryType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "self_paced" => Some(Self::SelfPaced),
            "cohort" => Some(Self::Cohort),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SelfPaced => "self_paced",
            Self::Cohort => "cohort",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseStatus {
    Draft,
    PendingReview,
    Published,
    Rejected,
}

impl CourseStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "pending_review" => Some(Self::PendingReview),
            "published" => Some(Self::Published),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingReview => "pending_review",
            Self::Published => "published",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonType {
    Video,
    Text,
    Quiz,
}

impl LessonType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "video" => Some(Self::Video),
            "text" => Some(Self::Text),
            "quiz" => Some(Self::Quiz),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Text => "text",
            Self::Quiz => "quiz",
        }
    }
}

/// Editor document. Its shape belongs to the editor; here it is only
/// compared and passed through.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Content(serde_json::Value);

impl Content {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Stored documents that fail to parse are kept as a raw string.
    pub fn from_stored(raw: Option<&str>) -> Self {
        match raw {
            None => Self::default(),
            Some(raw) => serde_json::from_str(raw)
                .map(Self)
                .unwrap_or_else(|_| Self(serde_json::Value::String(raw.to_string()))),
        }
    }

    pub fn to_stored(&self) -> Option<String> {
        if self.0.is_null() {
            None
        } else {
            Some(self.0.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub title: String,
    pub description: String,
    pub delivery_type: DeliveryType,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub status: CourseStatus,
}

impl Course {
    /// Cohort courses freeze their structure once the cohort has started.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.delivery_type == DeliveryType::Cohort
            && self.start_date.map(|start| start <= now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub lesson_type: LessonType,
    pub content: Content,
    pub is_published: bool,
    pub order: i64,
}

impl Ordered for Lesson {
    fn id(&self) -> &str {
        &self.id
    }
    fn set_order(&mut self, order: i64) {
        self.order = order;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: String,
    pub title: String,
    pub weekly_sprint_goal: Option<String>,
    pub unlocks_on_week: Option<i64>,
    pub order: i64,
    pub lessons: Vec<Lesson>,
}

impl Ordered for Module {
    fn id(&self) -> &str {
        &self.id
    }
    fn set_order(&mut self, order: i64) {
        self.order = order;
    }
}

/// Lesson fields the editor can change without touching structure.
/// `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub lesson_type: Option<LessonType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_published: Option<bool>,
}

impl LessonFields {
    /// Trims the title; a blank one is rejected.
    pub fn cleaned(mut self) -> Result<Self, Rejection> {
        if let Some(title) = self.title.as_deref() {
            self.title = Some(clean_title(title)?);
        }
        Ok(self)
    }

    pub fn snapshot(lesson: &Lesson) -> Self {
        Self {
            title: Some(lesson.title.clone()),
            content: Some(lesson.content.clone()),
            lesson_type: Some(lesson.lesson_type),
            is_published: Some(lesson.is_published),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.lesson_type.is_none()
            && self.is_published.is_none()
    }

    /// Later values win field by field.
    pub fn merge(&mut self, newer: &Self) {
        if newer.title.is_some() {
            self.title = newer.title.clone();
        }
        if newer.content.is_some() {
            self.content = newer.content.clone();
        }
        if newer.lesson_type.is_some() {
            self.lesson_type = newer.lesson_type;
        }
        if newer.is_published.is_some() {
            self.is_published = newer.is_published;
        }
    }

    /// The subset of `self` whose values differ from `baseline`.
    pub fn changed_from(&self, baseline: &Self) -> Self {
        Self {
            title: differing(&self.title, &baseline.title),
            content: differing(&self.content, &baseline.content),
            lesson_type: differing(&self.lesson_type, &baseline.lesson_type),
            is_published: differing(&self.is_published, &baseline.is_published),
        }
    }

    fn apply(&self, lesson: &mut Lesson) {
        if let Some(title) = &self.title {
            lesson.title = title.clone();
        }
        if let Some(content) = &self.content {
            lesson.content = content.clone();
        }
        if let Some(t) = self.lesson_type {
            lesson.lesson_type = t;
        }
        if let Some(p) = self.is_published {
            lesson.is_published = p;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_sprint_goal: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlocks_on_week: Option<Option<i64>>,
}

impl ModuleFields {
    pub fn cleaned(mut self) -> Result<Self, Rejection> {
        if let Some(title) = self.title.as_deref() {
            self.title = Some(clean_title(title)?);
        }
        Ok(self)
    }

    pub fn snapshot(module: &Module) -> Self {
        Self {
            title: Some(module.title.clone()),
            weekly_sprint_goal: Some(module.weekly_sprint_goal.clone()),
            unlocks_on_week: Some(module.unlocks_on_week),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.weekly_sprint_goal.is_none() && self.unlocks_on_week.is_none()
    }

    pub fn merge(&mut self, newer: &Self) {
        if newer.title.is_some() {
            self.title = newer.title.clone();
        }
        if newer.weekly_sprint_goal.is_some() {
            self.weekly_sprint_goal = newer.weekly_sprint_goal.clone();
        }
        if newer.unlocks_on_week.is_some() {
            self.unlocks_on_week = newer.unlocks_on_week;
        }
    }

    pub fn changed_from(&self, baseline: &Self) -> Self {
        Self {
            title: differing(&self.title, &baseline.title),
            weekly_sprint_goal: differing(&self.weekly_sprint_goal, &baseline.weekly_sprint_goal),
            unlocks_on_week: differing(&self.unlocks_on_week, &baseline.unlocks_on_week),
        }
    }

    fn apply(&self, module: &mut Module) {
        if let Some(title) = &self.title {
            module.title = title.clone();
        }
        if let Some(goal) = &self.weekly_sprint_goal {
            module.weekly_sprint_goal = goal.clone();
        }
        if let Some(week) = self.unlocks_on_week {
            module.unlocks_on_week = week;
        }
    }
}

fn differing<T: Clone + PartialEq>(value: &Option<T>, baseline: &Option<T>) -> Option<T> {
    match value {
        Some(v) if baseline.as_ref() != Some(v) => Some(v.clone()),
        _ => None,
    }
}

/// Why an edit left the tree untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Locked,
    ModuleNotFound,
    LessonNotFound,
    EmptyTitle,
    OutOfRange,
    Unchanged,
}

impl Rejection {
    pub fn code(self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::ModuleNotFound => "module_not_found",
            Self::LessonNotFound => "lesson_not_found",
            Self::EmptyTitle => "empty_title",
            Self::OutOfRange => "out_of_range",
            Self::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CurriculumDefaults {
    pub module_title: String,
    pub lesson_title: String,
    pub lesson_type: LessonType,
}

impl Default for CurriculumDefaults {
    fn default() -> Self {
        Self {
            module_title: "New Module".to_string(),
            lesson_title: "New Lesson".to_string(),
            lesson_type: LessonType::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekGroup<'a> {
    pub week: Option<i64>,
    pub modules: Vec<&'a Module>,
}

/// One course's modules and lessons as held by an editing session.
/// Every operation returns a fresh snapshot and leaves `self` untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseTree {
    pub course: Course,
    pub modules: Vec<Module>,
}

type Edit = Result<CourseTree, Rejection>;

impl CourseTree {
    /// Sorts by stored order and closes any gaps left by the store.
    pub fn new(course: Course, mut modules: Vec<Module>) -> Self {
        modules.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        reorder::renumber(&mut modules);
        for module in modules.iter_mut() {
            module
                .lessons
                .sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
            reorder::renumber(&mut module.lessons);
        }
        Self { course, modules }
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.course.is_locked(now)
    }

    fn guard_structure(&self, now: DateTime<Utc>) -> Result<(), Rejection> {
        if self.is_locked(now) {
            Err(Rejection::Locked)
        } else {
            Ok(())
        }
    }

    fn module_index(&self, module_id: &str) -> Result<usize, Rejection> {
        self.modules
            .iter()
            .position(|m| m.id == module_id)
            .ok_or(Rejection::ModuleNotFound)
    }

    pub fn module(&self, module_id: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.id == module_id)
    }

    pub fn find_lesson(&self, lesson_id: &str) -> Option<(&Module, &Lesson)> {
        self.modules.iter().find_map(|m| {
            m.lessons
                .iter()
                .find(|l| l.id == lesson_id)
                .map(|l| (m, l))
        })
    }

    pub fn lesson_count(&self) -> usize {
        self.modules.iter().map(|m| m.lessons.len()).sum()
    }

    pub fn add_module(&self, defaults: &CurriculumDefaults, now: DateTime<Utc>) -> Edit {
        self.guard_structure(now)?;
        let mut next = self.clone();
        next.modules.push(Module {
            id: placeholder_module_id(),
            title: defaults.module_title.clone(),
            weekly_sprint_goal: None,
            unlocks_on_week: None,
            order: self.modules.len() as i64,
            lessons: Vec::new(),
        });
        Ok(next)
    }

    pub fn delete_module(&self, module_id: &str, now: DateTime<Utc>) -> Edit {
        self.guard_structure(now)?;
        let idx = self.module_index(module_id)?;
        let mut next = self.clone();
        next.modules.remove(idx);
        reorder::renumber(&mut next.modules);
        Ok(next)
    }

    pub fn add_lesson(
        &self,
        module_id: &str,
        defaults: &CurriculumDefaults,
        now: DateTime<Utc>,
    ) -> Edit {
        self.guard_structure(now)?;
        let idx = self.module_index(module_id)?;
        let mut next = self.clone();
        let module = &mut next.modules[idx];
        let order = module.lessons.len() as i64;
        module.lessons.push(Lesson {
            id: placeholder_lesson_id(),
            title: defaults.lesson_title.clone(),
            lesson_type: defaults.lesson_type,
            content: Content::default(),
            is_published: false,
            order,
        });
        Ok(next)
    }

    pub fn delete_lesson(&self, module_id: &str, lesson_id: &str, now: DateTime<Utc>) -> Edit {
        self.guard_structure(now)?;
        let idx = self.module_index(module_id)?;
        let lesson_idx = self.modules[idx]
            .lessons
            .iter()
            .position(|l| l.id == lesson_id)
            .ok_or(Rejection::LessonNotFound)?;
        let mut next = self.clone();
        let lessons = &mut next.modules[idx].lessons;
        lessons.remove(lesson_idx);
        reorder::renumber(lessons);
        Ok(next)
    }

    pub fn rename_module(&self, module_id: &str, title: &str) -> Edit {
        let title = clean_title(title)?;
        self.update_module(
            module_id,
            &ModuleFields {
                title: Some(title),
                ..ModuleFields::default()
            },
        )
    }

    pub fn rename_lesson(&self, module_id: &str, lesson_id: &str, title: &str) -> Edit {
        let title = clean_title(title)?;
        let idx = self.module_index(module_id)?;
        if !self.modules[idx].lessons.iter().any(|l| l.id == lesson_id) {
            return Err(Rejection::LessonNotFound);
        }
        self.update_lesson(
            lesson_id,
            &LessonFields {
                title: Some(title),
                ..LessonFields::default()
            },
        )
    }

    /// Non-structural, so allowed on a locked course.
    pub fn update_module(&self, module_id: &str, fields: &ModuleFields) -> Edit {
        let fields = fields.clone().cleaned()?;
        let idx = self.module_index(module_id)?;
        let mut next = self.clone();
        fields.apply(&mut next.modules[idx]);
        Ok(next)
    }

    /// Non-structural, so allowed on a locked course.
    pub fn update_lesson(&self, lesson_id: &str, fields: &LessonFields) -> Edit {
        let fields = fields.clone().cleaned()?;
        let mut next = self.clone();
        let lesson = next
            .modules
            .iter_mut()
            .flat_map(|m| m.lessons.iter_mut())
            .find(|l| l.id == lesson_id)
            .ok_or(Rejection::LessonNotFound)?;
        fields.apply(lesson);
        Ok(next)
    }

    pub fn reorder_modules(&self, from: usize, to: usize, now: DateTime<Utc>) -> Edit {
        self.guard_structure(now)?;
        let moved = check_move(&self.modules, from, to)?;
        Ok(Self {
            course: self.course.clone(),
            modules: moved,
        })
    }

    pub fn reorder_lessons(
        &self,
        module_id: &str,
        from: usize,
        to: usize,
        now: DateTime<Utc>,
    ) -> Edit {
        self.guard_structure(now)?;
        let idx = self.module_index(module_id)?;
        let moved = check_move(&self.modules[idx].lessons, from, to)?;
        let mut next = self.clone();
        next.modules[idx].lessons = moved;
        Ok(next)
    }

    pub fn move_module(&self, active_id: &str, over_id: &str, now: DateTime<Utc>) -> Edit {
        self.guard_structure(now)?;
        match reorder::move_by_id(&self.modules, active_id, over_id) {
            Cow::Borrowed(_) => Err(Rejection::Unchanged),
            Cow::Owned(modules) => Ok(Self {
                course: self.course.clone(),
                modules,
            }),
        }
    }

    pub fn move_lesson(
        &self,
        module_id: &str,
        active_id: &str,
        over_id: &str,
        now: DateTime<Utc>,
    ) -> Edit {
        self.guard_structure(now)?;
        let idx = self.module_index(module_id)?;
        match reorder::move_by_id(&self.modules[idx].lessons, active_id, over_id) {
            Cow::Borrowed(_) => Err(Rejection::Unchanged),
            Cow::Owned(lessons) => {
                let mut next = self.clone();
                next.modules[idx].lessons = lessons;
                Ok(next)
            }
        }
    }

    /// Cohort courses group modules by unlock week (unset counts as week 1).
    pub fn modules_by_week(&self) -> Vec<WeekGroup<'_>> {
        if self.course.delivery_type != DeliveryType::Cohort {
            return vec![WeekGroup {
                week: None,
                modules: self.modules.iter().collect(),
            }];
        }
        let mut weeks: BTreeMap<i64, Vec<&Module>> = BTreeMap::new();
        for module in &self.modules {
            weeks
                .entry(module.unlocks_on_week.unwrap_or(1))
                .or_default()
                .push(module);
        }
        weeks
            .into_iter()
            .map(|(week, modules)| WeekGroup {
                week: Some(week),
                modules,
            })
            .collect()
    }

    /// Swaps placeholder ids for the ids the store assigned.
    pub fn rekey(&self, assigned: &HashMap<String, String>) -> Self {
        let mut next = self.clone();
        for module in next.modules.iter_mut() {
            if let Some(id) = assigned.get(&module.id) {
                module.id = id.clone();
            }
            for lesson in module.lessons.iter_mut() {
                if let Some(id) = assigned.get(&lesson.id) {
                    lesson.id = id.clone();
                }
            }
        }
        next
    }
}

fn clean_title(title: &str) -> Result<String, Rejection> {
    let title = title.trim();
    if title.is_empty() {
        Err(Rejection::EmptyTitle)
    } else {
        Ok(title.to_string())
    }
}

fn check_move<T: Ordered + Clone>(items: &[T], from: usize, to: usize) -> Result<Vec<T>, Rejection> {
    if from >= items.len() || to >= items.len() {
        return Err(Rejection::OutOfRange);
    }
    match reorder::move_item(items, from, to) {
        Cow::Borrowed(_) => Err(Rejection::Unchanged),
        Cow::Owned(moved) => Ok(moved),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::parse_timestamp;

    pub(crate) fn ts(raw: &str) -> DateTime<Utc> {
        parse_timestamp(raw).expect("timestamp")
    }

    pub(crate) fn lesson(id: &str, order: i64) -> Lesson {
        Lesson {
            id: id.to_string(),
            title: format!("Lesson {}", id),
            lesson_type: LessonType::Text,
            content: Content::new(serde_json::json!({ "doc": id })),
            is_published: false,
            order,
        }
    }

    pub(crate) fn module(id: &str, order: i64, lessons: Vec<Lesson>) -> Module {
        Module {
            id: id.to_string(),
            title: format!("Module {}", id),
            weekly_sprint_goal: None,
            unlocks_on_week: None,
            order,
            lessons,
        }
    }

    pub(crate) fn course(delivery_type: DeliveryType, start_date: Option<&str>) -> Course {
        Course {
            id: "c1".to_string(),
            title: "Rust for Instructors".to_string(),
            description: String::new(),
            delivery_type,
            start_date: start_date.map(ts),
            end_date: None,
            status: CourseStatus::Draft,
        }
    }

    /// A: [l1, l2], B: [l3]
    pub(crate) fn two_module_tree(course: Course) -> CourseTree {
        CourseTree::new(
            course,
            vec![
                module("A", 0, vec![lesson("l1", 0), lesson("l2", 1)]),
                module("B", 1, vec![lesson("l3", 0)]),
            ],
        )
    }

    fn now() -> DateTime<Utc> {
        ts("2024-03-01T12:00:00Z")
    }

    fn orders(tree: &CourseTree) -> Vec<(String, i64, Vec<(String, i64)>)> {
        tree.modules
            .iter()
            .map(|m| {
                (
                    m.id.clone(),
                    m.order,
                    m.lessons.iter().map(|l| (l.id.clone(), l.order)).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn lock_predicate_only_applies_to_started_cohorts() {
        assert!(!course(DeliveryType::SelfPaced, Some("2020-01-01")).is_locked(now()));
        assert!(!course(DeliveryType::Cohort, None).is_locked(now()));
        assert!(!course(DeliveryType::Cohort, Some("2030-01-01")).is_locked(now()));
        assert!(course(DeliveryType::Cohort, Some("2024-03-01T12:00:00Z")).is_locked(now()));
        assert!(course(DeliveryType::Cohort, Some("2024-01-01")).is_locked(now()));
    }

    #[test]
    fn new_tree_closes_stored_gaps() {
        let tree = CourseTree::new(
            course(DeliveryType::SelfPaced, None),
            vec![
                module("B", 7, vec![lesson("l9", 3), lesson("l8", 1)]),
                module("A", 2, vec![]),
            ],
        );
        assert_eq!(
            orders(&tree),
            vec![
                ("A".to_string(), 0, vec![]),
                (
                    "B".to_string(),
                    1,
                    vec![("l8".to_string(), 0), ("l9".to_string(), 1)]
                ),
            ]
        );
    }

    #[test]
    fn add_module_appends_placeholder_with_next_order() {
        let tree = two_module_tree(course(DeliveryType::SelfPaced, None));
        let next = tree
            .add_module(&CurriculumDefaults::default(), now())
            .expect("add");
        assert_eq!(tree.modules.len(), 2);
        let added = next.modules.last().expect("added");
        assert_eq!(added.order, 2);
        assert_eq!(added.title, "New Module");
        assert!(is_placeholder_id(&added.id));
        assert!(added.lessons.is_empty());
    }

    #[test]
    fn add_lesson_uses_module_length_for_order() {
        let tree = two_module_tree(course(DeliveryType::SelfPaced, None));
        let next = tree
            .add_lesson("A", &CurriculumDefaults::default(), now())
            .expect("add");
        let lessons = &next.modules[0].lessons;
        assert_eq!(lessons.len(), 3);
        assert_eq!(lessons[2].order, 2);
        assert_eq!(lessons[2].lesson_type, LessonType::Text);
        assert!(!lessons[2].is_published);
        assert_eq!(
            tree.add_lesson("nope", &CurriculumDefaults::default(), now()),
            Err(Rejection::ModuleNotFound)
        );
    }

    #[test]
    fn deletes_keep_orders_dense() {
        let tree = CourseTree::new(
            course(DeliveryType::SelfPaced, None),
            vec![
                module("A", 0, vec![lesson("l1", 0), lesson("l2", 1), lesson("l3", 2)]),
                module("B", 1, vec![]),
                module("C", 2, vec![]),
            ],
        );
        let next = tree.delete_module("A", now()).expect("delete module");
        assert_eq!(
            orders(&next),
            vec![("B".to_string(), 0, vec![]), ("C".to_string(), 1, vec![])]
        );
        let next = tree.delete_lesson("A", "l1", now()).expect("delete lesson");
        assert_eq!(
            next.modules[0]
                .lessons
                .iter()
                .map(|l| (l.id.as_str(), l.order))
                .collect::<Vec<_>>(),
            vec![("l2", 0), ("l3", 1)]
        );
        assert_eq!(
            tree.delete_lesson("A", "zz", now()),
            Err(Rejection::LessonNotFound)
        );
        assert_eq!(tree.delete_module("zz", now()), Err(Rejection::ModuleNotFound));
    }

    #[test]
    fn locked_course_rejects_every_structural_edit() {
        let tree = two_module_tree(course(DeliveryType::Cohort, Some("2024-02-01")));
        let before = tree.clone();
        let defaults = CurriculumDefaults::default();
        assert_eq!(tree.add_module(&defaults, now()), Err(Rejection::Locked));
        assert_eq!(tree.delete_module("A", now()), Err(Rejection::Locked));
        assert_eq!(tree.add_lesson("A", &defaults, now()), Err(Rejection::Locked));
        assert_eq!(tree.delete_lesson("A", "l1", now()), Err(Rejection::Locked));
        assert_eq!(tree.reorder_modules(1, 0, now()), Err(Rejection::Locked));
        assert_eq!(tree.reorder_lessons("A", 1, 0, now()), Err(Rejection::Locked));
        assert_eq!(tree.move_module("B", "A", now()), Err(Rejection::Locked));
        assert_eq!(tree.move_lesson("A", "l2", "l1", now()), Err(Rejection::Locked));
        assert_eq!(tree, before);

        // Field edits are not structural.
        let renamed = tree.rename_module("A", "Week One").expect("rename");
        assert_eq!(renamed.modules[0].title, "Week One");
    }

    #[test]
    fn renames_reject_empty_titles() {
        let tree = two_module_tree(course(DeliveryType::SelfPaced, None));
        assert_eq!(tree.rename_module("A", "   "), Err(Rejection::EmptyTitle));
        assert_eq!(tree.rename_lesson("A", "l1", ""), Err(Rejection::EmptyTitle));
        assert_eq!(
            tree.rename_lesson("B", "l1", "Moved?"),
            Err(Rejection::LessonNotFound)
        );
        let next = tree.rename_lesson("A", "l2", "  Ownership  ").expect("rename");
        assert_eq!(next.modules[0].lessons[1].title, "Ownership");
    }

    #[test]
    fn moving_module_b_before_a() {
        let tree = two_module_tree(course(DeliveryType::SelfPaced, None));
        let next = tree.reorder_modules(1, 0, now()).expect("reorder");
        assert_eq!(
            orders(&next),
            vec![
                ("B".to_string(), 0, vec![("l3".to_string(), 0)]),
                (
                    "A".to_string(),
                    1,
                    vec![("l1".to_string(), 0), ("l2".to_string(), 1)]
                ),
            ]
        );
    }

    #[test]
    fn reorder_no_ops_are_rejected_without_change() {
        let tree = two_module_tree(course(DeliveryType::SelfPaced, None));
        assert_eq!(tree.reorder_modules(0, 0, now()), Err(Rejection::Unchanged));
        assert_eq!(tree.reorder_modules(0, 2, now()), Err(Rejection::OutOfRange));
        assert_eq!(
            tree.reorder_lessons("B", 0, 1, now()),
            Err(Rejection::OutOfRange)
        );
        let next = tree.reorder_lessons("A", 1, 0, now()).expect("lessons");
        assert_eq!(next.modules[0].lessons[0].id, "l2");
        assert_eq!(next.modules[1], tree.modules[1]);
    }

    #[test]
    fn lesson_moves_stay_inside_their_module() {
        let tree = two_module_tree(course(DeliveryType::SelfPaced, None));
        assert_eq!(
            tree.move_lesson("A", "l1", "l3", now()),
            Err(Rejection::Unchanged)
        );
    }

    #[test]
    fn update_lesson_applies_only_given_fields() {
        let tree = two_module_tree(course(DeliveryType::SelfPaced, None));
        let next = tree
            .update_lesson(
                "l3",
                &LessonFields {
                    lesson_type: Some(LessonType::Quiz),
                    is_published: Some(true),
                    ..LessonFields::default()
                },
            )
            .expect("update");
        let (_, l3) = next.find_lesson("l3").expect("l3");
        assert_eq!(l3.lesson_type, LessonType::Quiz);
        assert!(l3.is_published);
        assert_eq!(l3.title, "Lesson l3");
    }

    #[test]
    fn cohort_modules_group_by_week() {
        let mut tree = CourseTree::new(
            course(DeliveryType::Cohort, Some("2030-01-01")),
            vec![
                module("A", 0, vec![]),
                module("B", 1, vec![]),
                module("C", 2, vec![]),
            ],
        );
        tree.modules[0].unlocks_on_week = Some(2);
        tree.modules[2].unlocks_on_week = Some(1);
        let groups = tree.modules_by_week();
        let shape: Vec<(Option<i64>, Vec<&str>)> = groups
            .iter()
            .map(|g| (g.week, g.modules.iter().map(|m| m.id.as_str()).collect()))
            .collect();
        assert_eq!(
            shape,
            vec![(Some(1), vec!["B", "C"]), (Some(2), vec!["A"])]
        );

        let self_paced = two_module_tree(course(DeliveryType::SelfPaced, None));
        let groups = self_paced.modules_by_week();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].week, None);
    }

    #[test]
    fn field_diffs_ignore_restored_values() {
        let base = LessonFields::snapshot(&lesson("l1", 0));
        let mut pending = LessonFields {
            content: Some(Content::new(serde_json::json!({ "doc": "draft" }))),
            ..LessonFields::default()
        };
        pending.merge(&LessonFields {
            content: Some(Content::new(serde_json::json!({ "doc": "l1" }))),
            ..LessonFields::default()
        });
        assert!(pending.changed_from(&base).is_empty());
    }
}
