use std::fmt;
use std::str::FromStr;

use crate::error::{DfsError, Result};

/// Absolute path inside a filesystem namespace, optionally qualified with
/// `scheme://authority`.
///
/// Paths are normalized on construction: duplicate and trailing slashes are
/// dropped, `.` segments vanish and `..` segments pop their parent, clamped
/// at the root. A relative path is taken relative to `/`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DfsPath {
    scheme: Option<String>,
    authority: Option<String>,
    path: String,
}

impl DfsPath {
    pub fn new(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DfsError::InvalidPath(
                "can not create a path from an empty string".to_string(),
            ));
        }

        let (scheme, authority, rest) = match raw.split_once("://") {
            Some((scheme, rest)) => {
                if scheme.is_empty()
                    || !scheme
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
                {
                    return Err(DfsError::InvalidPath(raw.to_string()));
                }
                let (authority, path) = match rest.find('/') {
                    Some(idx) => (&rest[..idx], &rest[idx..]),
                    None => (rest, "/"),
                };
                let authority = (!authority.is_empty()).then(|| authority.to_string());
                (Some(scheme.to_ascii_lowercase()), authority, path)
            }
            None => (None, None, raw),
        };

        Ok(Self {
            scheme,
            authority,
            path: normalize(rest),
        })
    }

    pub fn root() -> Self {
        Self {
            scheme: None,
            authority: None,
            path: "/".to_string(),
        }
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// The namespace part, always starting with `/`.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// The namespace part without the leading `/`; empty for the root.
    pub fn relative(&self) -> &str {
        &self.path[1..]
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// Final component, empty for the root.
    pub fn name(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) => &self.path[idx + 1..],
            None => &self.path,
        }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let idx = self.path.rfind('/').unwrap_or(0);
        let parent = if idx == 0 { "/" } else { &self.path[..idx] };
        Some(Self {
            scheme: self.scheme.clone(),
            authority: self.authority.clone(),
            path: parent.to_string(),
        })
    }

    pub fn join(&self, child: &str) -> Self {
        Self {
            scheme: self.scheme.clone(),
            authority: self.authority.clone(),
            path: normalize(&format!("{}/{}", self.path, child)),
        }
    }

    /// The same namespace path under `base`'s scheme and authority.
    pub fn qualified_by(&self, base: &DfsPath) -> Self {
        Self {
            scheme: base.scheme.clone(),
            authority: base.authority.clone(),
            path: self.path.clone(),
        }
    }

    /// Drops `scheme://authority`, keeping only the namespace part.
    pub fn unqualified(&self) -> Self {
        Self {
            scheme: None,
            authority: None,
            path: self.path.clone(),
        }
    }
}

fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

impl FromStr for DfsPath {
    type Err = DfsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for DfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{}://{}", scheme, self.authority.as_deref().unwrap_or(""))?;
        }
        f.write_str(&self.path)
    }
}
