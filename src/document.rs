//! Document records and the values that flow in and out of the store.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// A committed document: the metadata row for one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    /// User-supplied filename, passed through [`secure_filename`].
    pub display_name: String,
    /// Unique object name inside the backend.
    pub storage_key: String,
    pub locator: Locator,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating a row; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub display_name: String,
    pub storage_key: String,
    pub locator: Locator,
}

/// Partial update. Only these three fields are mutable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<Locator>,
}

impl DocumentPatch {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.storage_key.is_none() && self.locator.is_none()
    }

    /// Apply onto an existing record, leaving unset fields untouched.
    pub fn apply_to(&self, doc: &mut Document) {
        if let Some(ref name) = self.display_name {
            doc.display_name = name.clone();
        }
        if let Some(ref key) = self.storage_key {
            doc.storage_key = key.clone();
        }
        if let Some(ref locator) = self.locator {
            doc.locator = locator.clone();
        }
    }
}

/// Result of a page extraction, as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageExtract {
    pub document_name: String,
    pub number_of_pages: usize,
    pub text: String,
    pub page: i64,
}

// ── Locator ──────────────────────────────────────────────────────────────

/// Backend address of a stored object.
///
/// Serialised as a URI: `file:///abs/path` or `s3://bucket/key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Locator {
    Local { path: PathBuf },
    Remote { bucket: String, key: String },
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Local { path } => write!(f, "file://{}", path.display()),
            Locator::Remote { bucket, key } => write!(f, "s3://{bucket}/{key}"),
        }
    }
}

impl FromStr for Locator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("file://") {
            if path.is_empty() {
                return Err(format!("Locator '{s}' has an empty path"));
            }
            return Ok(Locator::Local {
                path: PathBuf::from(path),
            });
        }
        if let Some(rest) = s.strip_prefix("s3://") {
            return match rest.split_once('/') {
                Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                    Ok(Locator::Remote {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    })
                }
                _ => Err(format!("Locator '{s}' must be s3://<bucket>/<key>")),
            };
        }
        Err(format!("Unsupported locator scheme: '{s}'"))
    }
}

impl TryFrom<String> for Locator {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Locator> for String {
    fn from(l: Locator) -> Self {
        l.to_string()
    }
}

// ── Filenames and keys ───────────────────────────────────────────────────

static RE_UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.-]").unwrap());

const MAX_NAME_LEN: usize = 150;

/// Reduce a user-supplied filename to a safe, flat ASCII name.
///
/// Path separators become spaces, whitespace runs become `_`, anything
/// outside `[A-Za-z0-9_.-]` is dropped and leading/trailing `.`/`_` are
/// trimmed. The result may be empty (e.g. for `"../.."`).
pub fn secure_filename(name: &str) -> String {
    let flat = name.replace(['/', '\\'], " ");
    let joined = flat.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned = RE_UNSAFE_CHARS.replace_all(&joined, "");
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');
    truncate_keep_extension(trimmed, MAX_NAME_LEN)
}

/// Lower-cased extension after the last dot, if any.
pub fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// `"{uuid-v4}_{display_name}"`.
pub fn generate_storage_key(display_name: &str) -> String {
    format!("{}_{}", Uuid::new_v4(), display_name)
}

fn truncate_keep_extension(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if ext.len() < max / 2 => {
            let keep = max - ext.len() - 1;
            format!("{}.{}", &stem[..keep.min(stem.len())], ext)
        }
        _ => name[..max].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_filename_strips_traversal() {
        assert_eq!(secure_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("My cool movie.mov"), "My_cool_movie.mov");
        assert_eq!(secure_filename("a.txt"), "a.txt");
        assert_eq!(secure_filename("..\\..\\win.ini"), "win.ini");
        assert_eq!(secure_filename("../.."), "");
        assert_eq!(secure_filename("résumé.pdf"), "rsum.pdf");
    }

    #[test]
    fn secure_filename_caps_length_but_keeps_extension() {
        let long = format!("{}.pdf", "x".repeat(400));
        let safe = secure_filename(&long);
        assert_eq!(safe.len(), MAX_NAME_LEN);
        assert!(safe.ends_with(".pdf"));
    }

    #[test]
    fn extension_is_last_suffix_lowercased() {
        assert_eq!(extension_of("report.final.PDF").as_deref(), Some("pdf"));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of("trailing."), None);
        assert_eq!(extension_of(".bashrc"), None);
    }

    #[test]
    fn storage_keys_are_unique_and_carry_name() {
        let a = generate_storage_key("a.txt");
        let b = generate_storage_key("a.txt");
        assert_ne!(a, b);
        assert!(a.ends_with("_a.txt"));
        assert_eq!(a.len(), 36 + 1 + "a.txt".len());
    }

    #[test]
    fn locator_uri_forms() {
        let local: Locator = "file:///srv/uploads/k.pdf".parse().unwrap();
        assert_eq!(
            local,
            Locator::Local {
                path: PathBuf::from("/srv/uploads/k.pdf")
            }
        );
        let remote: Locator = "s3://docs/prefix/k.pdf".parse().unwrap();
        assert_eq!(
            remote,
            Locator::Remote {
                bucket: "docs".into(),
                key: "prefix/k.pdf".into()
            }
        );
        assert_eq!(remote.to_string(), "s3://docs/prefix/k.pdf");
        assert!("s3://bucket-only".parse::<Locator>().is_err());
        assert!("ftp://x/y".parse::<Locator>().is_err());
    }

    #[test]
    fn locator_serialises_as_string() {
        let l = Locator::Remote {
            bucket: "b".into(),
            key: "k".into(),
        };
        assert_eq!(serde_json::to_string(&l).unwrap(), r#""s3://b/k""#);
    }

    #[test]
    fn patch_applies_only_set_fields() {
        let now = Utc::now();
        let mut doc = Document {
            id: 1,
            display_name: "old.txt".into(),
            storage_key: "k".into(),
            locator: "s3://b/k".parse().unwrap(),
            created_at: now,
            updated_at: now,
        };
        let patch = DocumentPatch {
            display_name: Some("new.txt".into()),
            ..Default::default()
        };
        assert!(!patch.is_empty());
        patch.apply_to(&mut doc);
        assert_eq!(doc.display_name, "new.txt");
        assert_eq!(doc.storage_key, "k");
    }
}
