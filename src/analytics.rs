use crate::curriculum::CourseTree;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// 1-decimal rounding, halves away from zero for the non-negative values
/// used here: `Int(10*x + 0.5) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

fn round_whole(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * (part as f64) / (whole as f64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentRow {
    pub user_id: String,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRow {
    pub lesson_id: String,
    pub user_id: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRow {
    pub id: String,
    pub user_name: Option<String>,
    pub rating: i64,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A lesson's position in the course as the funnel walks it.
#[derive(Debug, Clone, PartialEq)]
pub struct LessonRef {
    pub lesson_id: String,
    pub title: String,
    pub module_order: i64,
    pub lesson_order: i64,
}

/// Every lesson of the tree, in curriculum order.
pub fn lesson_refs(tree: &CourseTree) -> Vec<LessonRef> {
    tree.modules
        .iter()
        .flat_map(|m| {
            m.lessons.iter().map(move |l| LessonRef {
                lesson_id: l.id.clone(),
                title: l.title.clone(),
                module_order: m.order,
                lesson_order: l.order,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentRow {
    pub user_id: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthBucket {
    pub month: String,
    pub enrollments: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DropOffLevel {
    Low,
    Elevated,
    Critical,
}

impl DropOffLevel {
    pub fn classify(drop_off_rate: i64) -> Self {
        if drop_off_rate >= 30 {
            Self::Critical
        } else if drop_off_rate >= 15 {
            Self::Elevated
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunnelStep {
    pub lesson_id: String,
    pub lesson_title: String,
    pub lesson_order: usize,
    pub completed_count: usize,
    pub completion_rate: i64,
    /// Absent for the first lesson.
    pub drop_off_rate: Option<i64>,
    pub drop_off_level: Option<DropOffLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseMetrics {
    pub total_enrollments: usize,
    pub total_lessons: usize,
    pub completion_rate: i64,
    pub average_rating: f64,
    pub total_reviews: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseAnalytics {
    pub metrics: CourseMetrics,
    pub enrollment_trends: Vec<MonthBucket>,
    pub engagement_funnel: Vec<FunnelStep>,
    pub reviews: Vec<ReviewRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProgress {
    pub user_id: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub enrolled_at: DateTime<Utc>,
    pub completed_lessons: usize,
    pub total_lessons: usize,
    pub progress: i64,
}

/// Enrollments per calendar month, oldest first. Empty months are not filled.
pub fn enrollment_trends(enrollments: &[EnrollmentRow]) -> Vec<MonthBucket> {
    let mut months: BTreeMap<String, usize> = BTreeMap::new();
    for e in enrollments {
        *months
            .entry(e.enrolled_at.format("%Y-%m").to_string())
            .or_default() += 1;
    }
    months
        .into_iter()
        .map(|(month, enrollments)| MonthBucket { month, enrollments })
        .collect()
}

/// Distinct completing users per lesson, counting enrolled users only.
fn completions_by_lesson(
    enrollments: &[EnrollmentRow],
    completions: &[CompletionRow],
) -> HashMap<String, HashSet<String>> {
    let enrolled: HashSet<&str> = enrollments.iter().map(|e| e.user_id.as_str()).collect();
    let mut by_lesson: HashMap<String, HashSet<String>> = HashMap::new();
    for c in completions {
        if !enrolled.contains(c.user_id.as_str()) {
            continue;
        }
        by_lesson
            .entry(c.lesson_id.clone())
            .or_default()
            .insert(c.user_id.clone());
    }
    by_lesson
}

fn distinct_enrollments(enrollments: &[EnrollmentRow]) -> usize {
    enrollments
        .iter()
        .map(|e| e.user_id.as_str())
        .collect::<HashSet<_>>()
        .len()
}

/// Lessons in course order with completion and drop-off between neighbours.
/// A rise in completion between lessons is reported as zero drop-off.
pub fn engagement_funnel(
    lessons: &[LessonRef],
    enrollments: &[EnrollmentRow],
    completions: &[CompletionRow],
) -> Vec<FunnelStep> {
    let total = distinct_enrollments(enrollments);
    let by_lesson = completions_by_lesson(enrollments, completions);

    let mut ordered: Vec<&LessonRef> = lessons.iter().collect();
    ordered.sort_by(|a, b| {
        a.module_order
            .cmp(&b.module_order)
            .then_with(|| a.lesson_order.cmp(&b.lesson_order))
    });

    let mut steps = Vec::with_capacity(ordered.len());
    let mut prev_rate: Option<i64> = None;
    for (idx, lesson) in ordered.into_iter().enumerate() {
        let completed_count = by_lesson
            .get(&lesson.lesson_id)
            .map(|users| users.len())
            .unwrap_or(0);
        // Drop-off is taken between the displayed rates so the numbers agree.
        let rate = round_whole(percent(completed_count, total));
        let drop_off_rate = prev_rate.map(|prev| (prev - rate).max(0));
        steps.push(FunnelStep {
            lesson_id: lesson.lesson_id.clone(),
            lesson_title: lesson.title.clone(),
            lesson_order: idx,
            completed_count,
            completion_rate: rate,
            drop_off_rate,
            drop_off_level: drop_off_rate.map(DropOffLevel::classify),
        });
        prev_rate = Some(rate);
    }
    steps
}

pub fn average_rating(reviews: &[ReviewRow]) -> f64 {
    if reviews.is_empty() {
        return 0.0;
    }
    let sum: i64 = reviews.iter().map(|r| r.rating).sum();
    round_off_1_decimal(sum as f64 / reviews.len() as f64)
}

/// Share of enrolled students who completed the final lesson.
pub fn course_completion_rate(funnel: &[FunnelStep], total_enrollments: usize) -> i64 {
    funnel
        .last()
        .map(|last| round_whole(percent(last.completed_count, total_enrollments)))
        .unwrap_or(0)
}

pub struct AnalyticsInput<'a> {
    pub lessons: &'a [LessonRef],
    pub enrollments: &'a [EnrollmentRow],
    pub completions: &'a [CompletionRow],
    pub reviews: &'a [ReviewRow],
    pub recent_review_limit: usize,
}

pub fn course_analytics(input: &AnalyticsInput<'_>) -> CourseAnalytics {
    let total_enrollments = distinct_enrollments(input.enrollments);
    let engagement_funnel = engagement_funnel(input.lessons, input.enrollments, input.completions);
    let completion_rate = course_completion_rate(&engagement_funnel, total_enrollments);

    let mut reviews = input.reviews.to_vec();
    reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    reviews.truncate(input.recent_review_limit);

    CourseAnalytics {
        metrics: CourseMetrics {
            total_enrollments,
            total_lessons: input.lessons.len(),
            completion_rate,
            average_rating: average_rating(input.reviews),
            total_reviews: input.reviews.len(),
        },
        enrollment_trends: enrollment_trends(input.enrollments),
        engagement_funnel,
        reviews,
    }
}

/// Per-student progress across all lessons of the course.
pub fn student_progress(
    students: &[StudentRow],
    lessons: &[LessonRef],
    completions: &[CompletionRow],
) -> Vec<StudentProgress> {
    let lesson_ids: HashSet<&str> = lessons.iter().map(|l| l.lesson_id.as_str()).collect();
    let mut done: HashMap<&str, HashSet<&str>> = HashMap::new();
    for c in completions {
        if lesson_ids.contains(c.lesson_id.as_str()) {
            done.entry(c.user_id.as_str())
                .or_default()
                .insert(c.lesson_id.as_str());
        }
    }
    let total_lessons = lessons.len();
    let mut rows: Vec<StudentProgress> = students
        .iter()
        .map(|s| {
            let completed_lessons = done.get(s.user_id.as_str()).map(|d| d.len()).unwrap_or(0);
            StudentProgress {
                user_id: s.user_id.clone(),
                full_name: s.full_name.clone(),
                email: s.email.clone(),
                enrolled_at: s.enrolled_at,
                completed_lessons,
                total_lessons,
                progress: round_whole(percent(completed_lessons, total_lessons)),
            }
        })
        .collect();
    rows.sort_by(|a, b| {
        a.enrolled_at
            .cmp(&b.enrolled_at)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    rows
}

/// Case-insensitive match on name or email; a blank query keeps everyone.
pub fn filter_students(rows: Vec<StudentProgress>, query: Option<&str>) -> Vec<StudentProgress> {
    let Some(q) = query.map(|q| q.trim().to_lowercase()).filter(|q| !q.is_empty()) else {
        return rows;
    };
    rows.into_iter()
        .filter(|r| {
            let name = r.full_name.as_deref().unwrap_or("").to_lowercase();
            let email = r.email.as_deref().unwrap_or("").to_lowercase();
            name.contains(&q) || email.contains(&q)
        })
        .collect()
}
