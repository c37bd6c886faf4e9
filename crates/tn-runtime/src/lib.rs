#![forbid(unsafe_code)]

//! Session handle that owns loaded frames and runs extraction requests.
//!
//! A [`Session`] is opened with [`Session::connect`] and closed with
//! [`Session::disconnect`]; every frame operation on a closed session fails
//! with [`SessionError::Disconnected`]. Frames are registered under string
//! keys and shared behind `Arc`, so a caller may keep a frame alive after the
//! session releases it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tn_frame::{ColumnSelector, DataFrame, Direction, FrameError};
use tracing::{debug, info};

const DEFAULT_MAX_FRAMES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub name: String,
    pub max_frames: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "local".to_owned(),
            max_frames: DEFAULT_MAX_FRAMES,
        }
    }
}

impl SessionConfig {
    pub fn from_json(body: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(body)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub frames_registered: usize,
    pub extractions: usize,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session '{0}' is disconnected")]
    Disconnected(String),
    #[error("frame '{0}' is not registered")]
    UnknownFrame(String),
    #[error("session frame capacity {capacity} exceeded")]
    CapacityExceeded { capacity: usize },
    #[error("expression parse error: {0}")]
    Parse(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Config(#[from] serde_json::Error),
}

/// A typed extraction request, the structured form of `(topn ...)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractRequest {
    pub frame: String,
    pub column: ColumnSelector,
    pub percent: f64,
    pub direction: Direction,
}

#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    state: SessionState,
    frames: BTreeMap<String, Arc<DataFrame>>,
    stats: SessionStats,
}

impl Session {
    #[must_use]
    pub fn connect(config: SessionConfig) -> Self {
        info!(session = %config.name, max_frames = config.max_frames, "session connected");
        Self {
            config,
            state: SessionState::Connected,
            frames: BTreeMap::new(),
            stats: SessionStats::default(),
        }
    }

    /// Release every registered frame. Calling it twice is a no-op.
    pub fn disconnect(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        info!(
            session = %self.config.name,
            released_frames = self.frames.len(),
            "session disconnected"
        );
        self.frames.clear();
        self.state = SessionState::Disconnected;
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    fn ensure_connected(&self) -> Result<(), SessionError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SessionError::Disconnected(self.config.name.clone()))
        }
    }

    /// Register `frame` under `key`, replacing any frame already there.
    pub fn register_frame(
        &mut self,
        key: impl Into<String>,
        frame: DataFrame,
    ) -> Result<Arc<DataFrame>, SessionError> {
        self.ensure_connected()?;
        let key = key.into();
        if !self.frames.contains_key(&key) && self.frames.len() >= self.config.max_frames {
            return Err(SessionError::CapacityExceeded {
                capacity: self.config.max_frames,
            });
        }
        debug!(
            frame = %key,
            rows = frame.len(),
            columns = frame.num_columns(),
            "frame registered"
        );
        let frame = Arc::new(frame);
        self.frames.insert(key, Arc::clone(&frame));
        self.stats.frames_registered += 1;
        Ok(frame)
    }

    pub fn frame(&self, key: &str) -> Result<Arc<DataFrame>, SessionError> {
        self.ensure_connected()?;
        self.frames
            .get(key)
            .cloned()
            .ok_or_else(|| SessionError::UnknownFrame(key.to_owned()))
    }

    pub fn remove_frame(&mut self, key: &str) -> Result<Arc<DataFrame>, SessionError> {
        self.ensure_connected()?;
        self.frames
            .remove(key)
            .ok_or_else(|| SessionError::UnknownFrame(key.to_owned()))
    }

    #[must_use]
    pub fn frame_keys(&self) -> Vec<&str> {
        self.frames.keys().map(String::as_str).collect()
    }

    pub fn extract(
        &mut self,
        key: &str,
        selector: &ColumnSelector,
        percent: f64,
        direction: Direction,
    ) -> Result<DataFrame, SessionError> {
        let frame = self.frame(key)?;
        let out = frame.extract_extremum_fraction(selector, percent, direction)?;
        self.stats.extractions += 1;
        debug!(
            frame = %key,
            column = %selector,
            percent,
            %direction,
            rows = out.len(),
            "extraction complete"
        );
        Ok(out)
    }

    pub fn top_n(
        &mut self,
        key: &str,
        selector: impl Into<ColumnSelector>,
        percent: f64,
    ) -> Result<DataFrame, SessionError> {
        self.extract(key, &selector.into(), percent, Direction::Top)
    }

    pub fn bottom_n(
        &mut self,
        key: &str,
        selector: impl Into<ColumnSelector>,
        percent: f64,
    ) -> Result<DataFrame, SessionError> {
        self.extract(key, &selector.into(), percent, Direction::Bottom)
    }

    pub fn run(&mut self, request: &ExtractRequest) -> Result<DataFrame, SessionError> {
        self.extract(
            &request.frame,
            &request.column,
            request.percent,
            request.direction,
        )
    }

    /// Execute a textual `(topn <frame> <col> <percent> <getBottomN>)` call.
    pub fn exec(&mut self, expr: &str) -> Result<DataFrame, SessionError> {
        self.ensure_connected()?;
        let request = parse_topn(expr)?;
        self.run(&request)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn tokenize(expr: &str) -> Result<Vec<String>, SessionError> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            '(' | ')' => {
                tokens.push(ch.to_string());
                chars.next();
            }
            '"' | '\'' => {
                chars.next();
                let mut quoted = String::from('"');
                loop {
                    match chars.next() {
                        Some(c) if c == ch => break,
                        Some(c) => quoted.push(c),
                        None => {
                            return Err(SessionError::Parse(format!(
                                "unterminated quoted token in {expr:?}"
                            )));
                        }
                    }
                }
                tokens.push(quoted);
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            _ => {
                let mut bare = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' {
                        break;
                    }
                    bare.push(c);
                    chars.next();
                }
                tokens.push(bare);
            }
        }
    }

    Ok(tokens)
}

/// Parse `(topn frame col percent getBottomN)`.
///
/// `col` is a column position or a quoted column name; `getBottomN` is
/// `0` (top) or `1` (bottom).
pub fn parse_topn(expr: &str) -> Result<ExtractRequest, SessionError> {
    let tokens = tokenize(expr)?;
    let [open, op, frame, column, percent, flag, close] = tokens.as_slice() else {
        return Err(SessionError::Parse(format!(
            "expected (topn frame col percent getBottomN), got {} tokens",
            tokens.len()
        )));
    };
    if open != "(" || close != ")" {
        return Err(SessionError::Parse(
            "expression must be wrapped in parentheses".to_owned(),
        ));
    }
    if op != "topn" {
        return Err(SessionError::Parse(format!("unknown primitive '{op}'")));
    }

    let column = match column.strip_prefix('"') {
        Some(name) => ColumnSelector::ByName(name.to_owned()),
        None => ColumnSelector::ByIndex(column.parse().map_err(|_| {
            SessionError::Parse(format!("column must be an index or quoted name: {column}"))
        })?),
    };
    let percent = percent
        .parse::<f64>()
        .map_err(|_| SessionError::Parse(format!("percent is not a number: {percent}")))?;
    let flag = flag
        .parse::<i64>()
        .map_err(|_| SessionError::Parse(format!("getBottomN is not an integer: {flag}")))?;

    Ok(ExtractRequest {
        frame: frame.strip_prefix('"').unwrap_or(frame).to_owned(),
        column,
        percent,
        direction: Direction::from_flag(flag)?,
    })
}
