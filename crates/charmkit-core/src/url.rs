//! Charm identity model.
//!
//! A charm is addressed by a URL of the canonical form
//! `schema:[~user/]series/name[-revision]`, e.g.
//! `store:~joe/precise/wordpress-12` or `local:trusty/mysql`.
//!
//! Two value types are provided:
//! - [`CharmUrl`]: a fully-qualified identity. The series is always present;
//!   a revision of `-1` means "unresolved, take latest".
//! - [`CharmRef`]: an identity whose series may be absent, as typed by a
//!   user. [`CharmRef::resolve`] applies a default series to produce a
//!   `CharmUrl`.
//!
//! Both are immutable; [`CharmUrl::with_revision`] returns a new value.
//! The canonical string form is used as the cache key and the wire key, so
//! `parse` and `Display` must round-trip exactly.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when parsing or resolving a charm identity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("charm URL without schema: {0:?}")]
    MissingSchema(String),
    #[error("charm URL has invalid schema: {0:?}")]
    InvalidSchema(String),
    #[error("charm URL has invalid user name: {0:?}")]
    InvalidUser(String),
    #[error("charm URL has invalid series: {0:?}")]
    InvalidSeries(String),
    #[error("charm URL has invalid charm name: {0:?}")]
    InvalidName(String),
    #[error("charm URL has malformed revision: {0:?}")]
    InvalidRevision(String),
    #[error("charm URL has invalid form: {0:?}")]
    InvalidForm(String),
    #[error("charm URL without series: {0:?}")]
    MissingSeries(String),
}

/// The repository schema a charm identity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schema {
    /// The remote charm store.
    Store,
    /// A local filesystem repository.
    Local,
}

impl Schema {
    pub fn as_str(&self) -> &'static str {
        match self {
            Schema::Store => "store",
            Schema::Local => "local",
        }
    }

    fn parse(s: &str) -> Option<Schema> {
        match s {
            "store" => Some(Schema::Store),
            "local" => Some(Schema::Local),
            _ => None,
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully-qualified charm identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharmUrl {
    schema: Schema,
    user: Option<String>,
    series: String,
    name: String,
    revision: i32,
}

impl CharmUrl {
    /// Parse a canonical charm URL. The series must be present.
    pub fn parse(s: &str) -> Result<CharmUrl, IdentityError> {
        CharmRef::parse(s)?.resolve(None)
    }

    pub fn schema(&self) -> Schema {
        self.schema
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn series(&self) -> &str {
        &self.series
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The revision, or `-1` when unresolved.
    pub fn revision(&self) -> i32 {
        self.revision
    }

    /// Return a copy of this URL with the given revision.
    pub fn with_revision(&self, revision: i32) -> CharmUrl {
        CharmUrl {
            revision,
            ..self.clone()
        }
    }

    /// The URL rendered without its schema, as used in artifact paths:
    /// `[~user/]series/name[-revision]`.
    pub fn path(&self) -> String {
        let mut out = String::new();
        if let Some(user) = &self.user {
            out.push('~');
            out.push_str(user);
            out.push('/');
        }
        out.push_str(&self.series);
        out.push('/');
        out.push_str(&self.name);
        if self.revision >= 0 {
            out.push('-');
            out.push_str(&self.revision.to_string());
        }
        out
    }
}

impl fmt::Display for CharmUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.schema, self.path())
    }
}

/// A charm identity whose series may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharmRef {
    schema: Schema,
    user: Option<String>,
    series: Option<String>,
    name: String,
    revision: i32,
}

impl CharmRef {
    /// Parse a charm reference from text.
    ///
    /// Accepted forms: `schema:[~user/][series/]name[-revision]`.
    pub fn parse(s: &str) -> Result<CharmRef, IdentityError> {
        let (schema_str, rest) = s
            .split_once(':')
            .ok_or_else(|| IdentityError::MissingSchema(s.to_string()))?;
        let schema =
            Schema::parse(schema_str).ok_or_else(|| IdentityError::InvalidSchema(s.to_string()))?;

        let mut parts: Vec<&str> = rest.split('/').collect();
        let mut user = None;
        if let Some(first) = parts.first() {
            if let Some(u) = first.strip_prefix('~') {
                if !is_valid_user(u) {
                    return Err(IdentityError::InvalidUser(s.to_string()));
                }
                user = Some(u.to_string());
                parts.remove(0);
            }
        }

        let (series, name_part) = match parts.as_slice() {
            [name] => (None, *name),
            [series, name] => {
                if !is_valid_series(series) {
                    return Err(IdentityError::InvalidSeries(s.to_string()));
                }
                (Some(series.to_string()), *name)
            }
            _ => return Err(IdentityError::InvalidForm(s.to_string())),
        };

        let (name, revision) = split_revision(name_part, s)?;
        if !is_valid_name(name) {
            return Err(IdentityError::InvalidName(s.to_string()));
        }

        Ok(CharmRef {
            schema,
            user,
            series,
            name: name.to_string(),
            revision,
        })
    }

    pub fn schema(&self) -> Schema {
        self.schema
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn series(&self) -> Option<&str> {
        self.series.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn revision(&self) -> i32 {
        self.revision
    }

    /// Resolve this reference into a fully-qualified URL, applying the
    /// given default series when the reference lacks one.
    pub fn resolve(&self, default_series: Option<&str>) -> Result<CharmUrl, IdentityError> {
        let series = match (&self.series, default_series) {
            (Some(series), _) => series.clone(),
            (None, Some(default)) if !default.is_empty() => default.to_string(),
            _ => return Err(IdentityError::MissingSeries(self.to_string())),
        };
        Ok(CharmUrl {
            schema: self.schema,
            user: self.user.clone(),
            series,
            name: self.name.clone(),
            revision: self.revision,
        })
    }
}

impl fmt::Display for CharmRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.schema)?;
        if let Some(user) = &self.user {
            write!(f, "~{user}/")?;
        }
        if let Some(series) = &self.series {
            write!(f, "{series}/")?;
        }
        f.write_str(&self.name)?;
        if self.revision >= 0 {
            write!(f, "-{}", self.revision)?;
        }
        Ok(())
    }
}

/// Split a trailing `-<digits>` revision suffix off a name.
fn split_revision<'a>(name_part: &'a str, whole: &str) -> Result<(&'a str, i32), IdentityError> {
    if let Some((base, suffix)) = name_part.rsplit_once('-') {
        if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
            let revision: i32 = suffix
                .parse()
                .map_err(|_| IdentityError::InvalidRevision(whole.to_string()))?;
            return Ok((base, revision));
        }
    }
    Ok((name_part, -1))
}

/// Charm names are dash-separated lowercase words; every segment after the
/// first must contain a letter, so a trailing `-<digits>` segment is always
/// a revision and never part of the name.
fn is_valid_name(name: &str) -> bool {
    let mut segments = name.split('-');
    match segments.next() {
        Some(first)
            if first.starts_with(|c: char| c.is_ascii_lowercase())
                && first.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()) => {}
        _ => return false,
    }
    segments.all(|seg| {
        !seg.is_empty()
            && seg.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
            && seg.bytes().any(|b| b.is_ascii_lowercase())
    })
}

fn is_valid_series(series: &str) -> bool {
    series.starts_with(|c: char| c.is_ascii_lowercase())
        && series
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

fn is_valid_user(user: &str) -> bool {
    let mut bytes = user.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'+' || b == b'-')
}

/// Render an identity string filesystem-safe for use as a cache file name.
///
/// Alphanumerics, `.` and `-` pass through; every other byte is replaced by
/// `_%02x_` so that distinct identities never collide.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || b == b'.' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("_{b:02x}_"));
        }
    }
    out
}
