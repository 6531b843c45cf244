use std::fmt;
use std::str::FromStr;

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, FsError};

/// A direct child of a listed directory: either a folder or a note file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemEntry {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
}

/// Success payload of a file service operation.
///
/// `on_failure` lets an operation attach fields to its failure shape as well,
/// e.g. listings always carry a `files` array.
pub trait Payload: Serialize + DeserializeOwned {
    fn on_failure() -> Option<Self> {
        None
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CreatedPath {
    pub path: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileContent {
    pub content: String,
}

/// Payload of operations that only report completion (save, delete).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Done {}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Listing {
    pub files: Vec<FileSystemEntry>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Moved {
    pub new_path: String,
}

impl Payload for CreatedPath {}
impl Payload for FileContent {}
impl Payload for Done {}
impl Payload for Moved {}

impl Payload for Listing {
    fn on_failure() -> Option<Self> {
        Some(Listing::default())
    }
}

/// Result of a file service operation.
///
/// Serialises to `{ "success": true, ...payload }` or
/// `{ "success": false, "error": "...", "kind": "..." }`.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Failure { kind: ErrorKind, error: String },
}

impl<T> Outcome<T> {
    pub fn failure(kind: ErrorKind, error: impl Into<String>) -> Self {
        Outcome::Failure {
            kind,
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure { error, .. } => Some(error),
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        match self {
            Outcome::Success(payload) => Ok(payload),
            Outcome::Failure { error, .. } => Err(error),
        }
    }
}

impl<T> From<crate::error::Result<T>> for Outcome<T> {
    fn from(result: crate::error::Result<T>) -> Self {
        match result {
            Ok(payload) => Outcome::Success(payload),
            Err(e) => Outcome::from(e),
        }
    }
}

impl<T> From<FsError> for Outcome<T> {
    fn from(e: FsError) -> Self {
        Outcome::failure(e.kind(), e.to_string())
    }
}

#[derive(Serialize)]
struct SuccessWire<'a, T> {
    success: bool,
    #[serde(flatten)]
    payload: &'a T,
}

#[derive(Serialize)]
struct FailureWire<'a, T> {
    success: bool,
    error: &'a str,
    kind: ErrorKind,
    #[serde(flatten)]
    fallback: Option<T>,
}

impl<T: Payload> Serialize for Outcome<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Outcome::Success(payload) => SuccessWire {
                success: true,
                payload,
            }
            .serialize(serializer),
            Outcome::Failure { kind, error } => FailureWire {
                success: false,
                error,
                kind: *kind,
                fallback: T::on_failure(),
            }
            .serialize(serializer),
        }
    }
}

impl<'de, T: Payload> Deserialize<'de> for Outcome<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let success = value
            .get("success")
            .and_then(serde_json::Value::as_bool)
            .ok_or_else(|| de::Error::missing_field("success"))?;

        if success {
            return T::deserialize(value)
                .map(Outcome::Success)
                .map_err(de::Error::custom);
        }

        let error = value
            .get("error")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("Unknown error")
            .to_string();
        // Older peers omit `kind`; treat those as plain I/O failures.
        let kind = value
            .get("kind")
            .and_then(|k| serde_json::from_value(k.clone()).ok())
            .unwrap_or(ErrorKind::Io);
        Ok(Outcome::Failure { kind, error })
    }
}

/// Colour theme of the application shell.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
    Blue,
    Sepia,
}

impl Theme {
    pub const ALL: [Theme; 4] = [Theme::Light, Theme::Dark, Theme::Blue, Theme::Sepia];

    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::Blue => "blue",
            Theme::Sepia => "sepia",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Theme::ALL
            .into_iter()
            .find(|theme| theme.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown theme '{}'", s))
    }
}

/// Persisted user preferences
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Preferences {
    pub theme: Theme,
    pub last_opened_file: Option<String>,
    pub autosave_delay_ms: u64,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            last_opened_file: None,
            autosave_delay_ms: 1000,
        }
    }
}
