use crate::analytics::{CompletionRow, EnrollmentRow, ReviewRow, StudentRow};
use crate::autosave::{EntityFields, EntityKey, PersistRequest};
use crate::clock::{format_timestamp, parse_timestamp};
use crate::curriculum::{
    is_placeholder_id, Content, Course, CourseStatus, CourseTree, DeliveryType, Lesson,
    LessonType, Module,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use uuid::Uuid;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("coursebook.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            delivery_type TEXT NOT NULL DEFAULT 'self_paced',
            start_date TEXT,
            end_date TEXT,
            status TEXT NOT NULL DEFAULT 'draft',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_modules(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            title TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id) ON DELETE CASCADE
        )",
        [],
    )?;
    // Workspaces created before cohort delivery lack the per-module week columns.
    ensure_module_cohort_columns(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_modules_course ON course_modules(course_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS module_lessons(
            id TEXT PRIMARY KEY,
            module_id TEXT NOT NULL,
            title TEXT NOT NULL,
            lesson_type TEXT NOT NULL DEFAULT 'text',
            content_json TEXT,
            is_published INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(module_id) REFERENCES course_modules(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_module_lessons_module ON module_lessons(module_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            full_name TEXT,
            email TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            course_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            enrolled_at TEXT NOT NULL,
            PRIMARY KEY(course_id, user_id),
            FOREIGN KEY(course_id) REFERENCES courses(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_user ON enrollments(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_progress(
            lesson_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            PRIMARY KEY(lesson_id, user_id),
            FOREIGN KEY(lesson_id) REFERENCES module_lessons(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS reviews(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            user_id TEXT,
            rating INTEGER NOT NULL,
            comment TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reviews_course ON reviews(course_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_module_cohort_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "course_modules", "weekly_sprint_goal")? {
        conn.execute(
            "ALTER TABLE course_modules ADD COLUMN weekly_sprint_goal TEXT",
            [],
        )?;
    }
    if !table_has_column(conn, "course_modules", "unlocks_on_week")? {
        conn.execute(
            "ALTER TABLE course_modules ADD COLUMN unlocks_on_week INTEGER",
            [],
        )?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        None => Ok(None),
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        params![key, value.to_string()],
    )?;
    Ok(())
}

fn opt_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref().and_then(parse_timestamp)
}

fn required_ts(raw: String, what: &str) -> anyhow::Result<DateTime<Utc>> {
    parse_timestamp(&raw).ok_or_else(|| anyhow::anyhow!("bad {} timestamp: {}", what, raw))
}

#[derive(Debug, Clone)]
pub struct NewCourse {
    pub title: String,
    pub description: String,
    pub delivery_type: DeliveryType,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

pub fn course_insert(conn: &Connection, input: &NewCourse, now: DateTime<Utc>) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    let ts = format_timestamp(&now);
    conn.execute(
        "INSERT INTO courses(id, title, description, delivery_type, start_date, end_date, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            id,
            input.title,
            input.description,
            input.delivery_type.as_str(),
            input.start_date.as_ref().map(format_timestamp),
            input.end_date.as_ref().map(format_timestamp),
            CourseStatus::Draft.as_str(),
            ts,
            ts
        ],
    )?;
    Ok(id)
}

fn course_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Course, String)> {
    let delivery: String = row.get(3)?;
    let status: String = row.get(6)?;
    Ok((
        Course {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            delivery_type: DeliveryType::parse(&delivery).unwrap_or(DeliveryType::SelfPaced),
            start_date: opt_ts(row.get(4)?),
            end_date: opt_ts(row.get(5)?),
            status: CourseStatus::parse(&status).unwrap_or(CourseStatus::Draft),
        },
        row.get(7)?,
    ))
}

const COURSE_COLUMNS: &str =
    "id, title, description, delivery_type, start_date, end_date, status, updated_at";

pub fn course_get(conn: &Connection, course_id: &str) -> anyhow::Result<Option<Course>> {
    let sql = format!("SELECT {} FROM courses WHERE id = ?", COURSE_COLUMNS);
    let course = conn
        .query_row(&sql, [course_id], course_from_row)
        .optional()?;
    Ok(course.map(|(c, _)| c))
}

pub fn courses_list(conn: &Connection) -> anyhow::Result<Vec<(Course, String)>> {
    let sql = format!(
        "SELECT {} FROM courses ORDER BY updated_at DESC, id",
        COURSE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], course_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Column/value pairs for a partial course update; `None` leaves a column as is.
#[derive(Debug, Clone, Default)]
pub struct CoursePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub delivery_type: Option<DeliveryType>,
    pub start_date: Option<Option<DateTime<Utc>>>,
    pub end_date: Option<Option<DateTime<Utc>>>,
    pub status: Option<CourseStatus>,
}

pub fn course_update(
    conn: &Connection,
    course_id: &str,
    patch: &CoursePatch,
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    if let Some(v) = &patch.title {
        sets.push("title = ?");
        values.push(Value::Text(v.clone()));
    }
    if let Some(v) = &patch.description {
        sets.push("description = ?");
        values.push(Value::Text(v.clone()));
    }
    if let Some(v) = patch.delivery_type {
        sets.push("delivery_type = ?");
        values.push(Value::Text(v.as_str().to_string()));
    }
    if let Some(v) = &patch.start_date {
        sets.push("start_date = ?");
        values.push(opt_text(v.as_ref().map(format_timestamp)));
    }
    if let Some(v) = &patch.end_date {
        sets.push("end_date = ?");
        values.push(opt_text(v.as_ref().map(format_timestamp)));
    }
    if let Some(v) = patch.status {
        sets.push("status = ?");
        values.push(Value::Text(v.as_str().to_string()));
    }
    sets.push("updated_at = ?");
    values.push(Value::Text(format_timestamp(&now)));
    values.push(Value::Text(course_id.to_string()));
    let sql = format!("UPDATE courses SET {} WHERE id = ?", sets.join(", "));
    Ok(conn.execute(&sql, params_from_iter(values))?)
}

fn opt_text(v: Option<String>) -> Value {
    v.map(Value::Text).unwrap_or(Value::Null)
}

/// Loads a course with its modules and lessons. `None` if the course is unknown.
pub fn load_course_tree(conn: &Connection, course_id: &str) -> anyhow::Result<Option<CourseTree>> {
    let Some(course) = course_get(conn, course_id)? else {
        return Ok(None);
    };

    let mut module_stmt = conn.prepare(
        "SELECT id, title, weekly_sprint_goal, unlocks_on_week, sort_order
         FROM course_modules WHERE course_id = ? ORDER BY sort_order, id",
    )?;
    let mut modules = module_stmt
        .query_map([course_id], |r| {
            Ok(Module {
                id: r.get(0)?,
                title: r.get(1)?,
                weekly_sprint_goal: r.get(2)?,
                unlocks_on_week: r.get(3)?,
                order: r.get(4)?,
                lessons: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut lesson_stmt = conn.prepare(
        "SELECT id, title, lesson_type, content_json, is_published, sort_order
         FROM module_lessons WHERE module_id = ? ORDER BY sort_order, id",
    )?;
    for module in modules.iter_mut() {
        module.lessons = lesson_stmt
            .query_map([&module.id], |r| {
                let lesson_type: String = r.get(2)?;
                let content: Option<String> = r.get(3)?;
                Ok(Lesson {
                    id: r.get(0)?,
                    title: r.get(1)?,
                    lesson_type: LessonType::parse(&lesson_type).unwrap_or(LessonType::Text),
                    content: Content::from_stored(content.as_deref()),
                    is_published: r.get::<_, i64>(4)? != 0,
                    order: r.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
    }

    Ok(Some(CourseTree::new(course, modules)))
}

/// Executes one autosave persist. Zero matched rows is a failure: the
/// entity no longer exists in the store.
pub fn persist_fields(conn: &Connection, request: &PersistRequest) -> anyhow::Result<()> {
    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    let table = match (&request.entity, &request.fields) {
        (EntityKey::Lesson(_), EntityFields::Lesson(f)) => {
            if let Some(v) = &f.title {
                sets.push("title = ?");
                values.push(Value::Text(v.clone()));
            }
            if let Some(v) = &f.content {
                sets.push("content_json = ?");
                values.push(opt_text(v.to_stored()));
            }
            if let Some(v) = f.lesson_type {
                sets.push("lesson_type = ?");
                values.push(Value::Text(v.as_str().to_string()));
            }
            if let Some(v) = f.is_published {
                sets.push("is_published = ?");
                values.push(Value::Integer(if v { 1 } else { 0 }));
            }
            "module_lessons"
        }
        (EntityKey::Module(_), EntityFields::Module(f)) => {
            if let Some(v) = &f.title {
                sets.push("title = ?");
                values.push(Value::Text(v.clone()));
            }
            if let Some(v) = &f.weekly_sprint_goal {
                sets.push("weekly_sprint_goal = ?");
                values.push(opt_text(v.clone()));
            }
            if let Some(v) = f.unlocks_on_week {
                sets.push("unlocks_on_week = ?");
                values.push(v.map(Value::Integer).unwrap_or(Value::Null));
            }
            "course_modules"
        }
        _ => anyhow::bail!("field set does not match entity kind"),
    };
    sets.push("updated_at = ?");
    values.push(Value::Text(format_timestamp(&request.updated_at)));
    values.push(Value::Text(request.entity.id().to_string()));

    let sql = format!("UPDATE {} SET {} WHERE id = ?", table, sets.join(", "));
    let changed = conn.execute(&sql, params_from_iter(values))?;
    if changed == 0 {
        anyhow::bail!("{} not found", request.entity.id());
    }
    Ok(())
}

/// Writes the whole tree in one transaction: placeholders are inserted with
/// fresh ids, known rows are updated, and rows missing from the tree are
/// deleted. Returns placeholder id => assigned id.
pub fn sync_course_tree(
    conn: &Connection,
    tree: &CourseTree,
    now: DateTime<Utc>,
) -> anyhow::Result<HashMap<String, String>> {
    let ts = format_timestamp(&now);
    let course_id = &tree.course.id;
    let tx = conn.unchecked_transaction()?;
    let mut assigned: HashMap<String, String> = HashMap::new();

    let existing_modules: HashSet<String> = {
        let mut stmt = tx.prepare("SELECT id FROM course_modules WHERE course_id = ?")?;
        let ids = stmt
            .query_map([course_id], |r| r.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        ids
    };
    let mut kept_modules: HashSet<String> = HashSet::new();
    let mut kept_lessons: HashSet<String> = HashSet::new();

    for module in &tree.modules {
        let module_id = if is_placeholder_id(&module.id) || !existing_modules.contains(&module.id) {
            let id = if is_placeholder_id(&module.id) {
                Uuid::new_v4().to_string()
            } else {
                module.id.clone()
            };
            tx.execute(
                "INSERT INTO course_modules(id, course_id, title, weekly_sprint_goal, unlocks_on_week, sort_order, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    course_id,
                    module.title,
                    module.weekly_sprint_goal,
                    module.unlocks_on_week,
                    module.order,
                    ts
                ],
            )?;
            if id != module.id {
                assigned.insert(module.id.clone(), id.clone());
            }
            id
        } else {
            tx.execute(
                "UPDATE course_modules SET title = ?, weekly_sprint_goal = ?, unlocks_on_week = ?, sort_order = ?, updated_at = ?
                 WHERE id = ? AND course_id = ?",
                params![
                    module.title,
                    module.weekly_sprint_goal,
                    module.unlocks_on_week,
                    module.order,
                    ts,
                    module.id,
                    course_id
                ],
            )?;
            module.id.clone()
        };
        kept_modules.insert(module_id.clone());

        for lesson in &module.lessons {
            let lesson_id = if is_placeholder_id(&lesson.id) {
                Uuid::new_v4().to_string()
            } else {
                lesson.id.clone()
            };
            let changed = tx.execute(
                "UPDATE module_lessons SET module_id = ?, title = ?, lesson_type = ?, content_json = ?, is_published = ?, sort_order = ?, updated_at = ?
                 WHERE id = ?",
                params![
                    module_id,
                    lesson.title,
                    lesson.lesson_type.as_str(),
                    lesson.content.to_stored(),
                    if lesson.is_published { 1 } else { 0 },
                    lesson.order,
                    ts,
                    lesson_id
                ],
            )?;
            if changed == 0 {
                tx.execute(
                    "INSERT INTO module_lessons(id, module_id, title, lesson_type, content_json, is_published, sort_order, updated_at)
                     VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        lesson_id,
                        module_id,
                        lesson.title,
                        lesson.lesson_type.as_str(),
                        lesson.content.to_stored(),
                        if lesson.is_published { 1 } else { 0 },
                        lesson.order,
                        ts
                    ],
                )?;
            }
            if lesson_id != lesson.id {
                assigned.insert(lesson.id.clone(), lesson_id.clone());
            }
            kept_lessons.insert(lesson_id);
        }
    }

    // Lessons first so a surviving module sheds the ones the editor removed.
    let stale_lessons: Vec<String> = {
        let mut stmt = tx.prepare(
            "SELECT l.id FROM module_lessons l
             JOIN course_modules m ON m.id = l.module_id
             WHERE m.course_id = ?",
        )?;
        let ids = stmt
            .query_map([course_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids.into_iter().filter(|id| !kept_lessons.contains(id)).collect()
    };
    for id in &stale_lessons {
        tx.execute("DELETE FROM module_lessons WHERE id = ?", [id])?;
    }
    for id in existing_modules.difference(&kept_modules) {
        tx.execute("DELETE FROM course_modules WHERE id = ?", [id])?;
    }
    tx.execute(
        "UPDATE courses SET updated_at = ? WHERE id = ?",
        params![ts, course_id],
    )?;
    tx.commit()?;
    Ok(assigned)
}

pub fn user_upsert(
    conn: &Connection,
    user_id: &str,
    full_name: Option<&str>,
    email: Option<&str>,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO users(id, full_name, email) VALUES(?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            full_name = COALESCE(excluded.full_name, users.full_name),
            email = COALESCE(excluded.email, users.email)",
        params![user_id, full_name, email],
    )?;
    Ok(())
}

/// Re-enrolling keeps the original enrollment date.
pub fn enrollment_add(
    conn: &Connection,
    course_id: &str,
    user_id: &str,
    enrolled_at: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO enrollments(course_id, user_id, enrolled_at) VALUES(?, ?, ?)",
        params![course_id, user_id, format_timestamp(&enrolled_at)],
    )?;
    Ok(changed > 0)
}

pub fn progress_complete(
    conn: &Connection,
    lesson_id: &str,
    user_id: &str,
    completed_at: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO lesson_progress(lesson_id, user_id, completed_at) VALUES(?, ?, ?)",
        params![lesson_id, user_id, format_timestamp(&completed_at)],
    )?;
    Ok(changed > 0)
}

pub fn review_add(
    conn: &Connection,
    course_id: &str,
    user_id: Option<&str>,
    rating: i64,
    comment: Option<&str>,
    created_at: DateTime<Utc>,
) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO reviews(id, course_id, user_id, rating, comment, created_at) VALUES(?, ?, ?, ?, ?, ?)",
        params![id, course_id, user_id, rating, comment, format_timestamp(&created_at)],
    )?;
    Ok(id)
}

pub fn load_enrollments(conn: &Connection, course_id: &str) -> anyhow::Result<Vec<EnrollmentRow>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, enrolled_at FROM enrollments WHERE course_id = ? ORDER BY enrolled_at, user_id",
    )?;
    let raw = stmt
        .query_map([course_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    raw.into_iter()
        .map(|(user_id, at)| {
            Ok(EnrollmentRow {
                user_id,
                enrolled_at: required_ts(at, "enrollment")?,
            })
        })
        .collect()
}

pub fn load_completions(conn: &Connection, course_id: &str) -> anyhow::Result<Vec<CompletionRow>> {
    let mut stmt = conn.prepare(
        "SELECT p.lesson_id, p.user_id, p.completed_at
         FROM lesson_progress p
         JOIN module_lessons l ON l.id = p.lesson_id
         JOIN course_modules m ON m.id = l.module_id
         WHERE m.course_id = ?",
    )?;
    let raw = stmt
        .query_map([course_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    raw.into_iter()
        .map(|(lesson_id, user_id, at)| {
            Ok(CompletionRow {
                lesson_id,
                user_id,
                completed_at: required_ts(at, "completion")?,
            })
        })
        .collect()
}

pub fn load_reviews(conn: &Connection, course_id: &str) -> anyhow::Result<Vec<ReviewRow>> {
    let mut stmt = conn.prepare(
        "SELECT r.id, u.full_name, r.rating, r.comment, r.created_at
         FROM reviews r LEFT JOIN users u ON u.id = r.user_id
         WHERE r.course_id = ?",
    )?;
    let raw = stmt
        .query_map([course_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    raw.into_iter()
        .map(|(id, user_name, rating, comment, at)| {
            Ok(ReviewRow {
                id,
                user_name,
                rating,
                comment,
                created_at: required_ts(at, "review")?,
            })
        })
        .collect()
}

pub fn load_students(conn: &Connection, course_id: &str) -> anyhow::Result<Vec<StudentRow>> {
    let mut stmt = conn.prepare(
        "SELECT e.user_id, u.full_name, u.email, e.enrolled_at
         FROM enrollments e LEFT JOIN users u ON u.id = e.user_id
         WHERE e.course_id = ?",
    )?;
    let raw = stmt
        .query_map([course_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    raw.into_iter()
        .map(|(user_id, full_name, email, at)| {
            Ok(StudentRow {
                user_id,
                full_name,
                email,
                enrolled_at: required_ts(at, "enrollment")?,
            })
        })
        .collect()
}

pub fn lesson_course_id(conn: &Connection, lesson_id: &str) -> anyhow::Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT m.course_id FROM module_lessons l JOIN course_modules m ON m.id = l.module_id WHERE l.id = ?",
            [lesson_id],
            |r| r.get(0),
        )
        .optional()?)
}
