use std::path::PathBuf;

use crate::clock::{Clock, SystemClock};
use crate::session::EditorSession;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// The course currently open in the editor.
    pub session: Option<EditorSession>,
    pub clock: Box<dyn Clock>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            session: None,
            clock: Box::new(SystemClock),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
