//! Heads discovered for multibranch sources and their revisions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadKind {
    Branch,
    MergeRequest,
}

/// Merge request details carried by a merge request head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequestHead {
    pub id: String,
    pub number: u32,
    pub title: String,
    pub source_branch: String,
    pub target_branch: String,
}

/// A named, buildable unit of a multibranch source.
///
/// Branch heads are named after the branch; merge request heads are
/// named `MR-{number}` so they never collide with a branch name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Head {
    pub name: String,
    pub kind: HeadKind,
    /// Commit the head currently points at.
    pub latest_commit: String,
    /// Milliseconds since the unix epoch, when known.
    pub last_updated: Option<i64>,
    pub merge_request: Option<MergeRequestHead>,
}

impl Head {
    pub fn branch(name: impl Into<String>, commit: impl Into<String>, last_updated: Option<i64>) -> Self {
        Self {
            name: name.into(),
            kind: HeadKind::Branch,
            latest_commit: commit.into(),
            last_updated,
            merge_request: None,
        }
    }

    pub fn merge_request(
        details: MergeRequestHead,
        commit: impl Into<String>,
        last_updated: Option<i64>,
    ) -> Self {
        Self {
            name: format!("MR-{}", details.number),
            kind: HeadKind::MergeRequest,
            latest_commit: commit.into(),
            last_updated,
            merge_request: Some(details),
        }
    }

    pub fn revision(&self) -> Revision {
        Revision {
            head: self.name.clone(),
            kind: self.kind,
            commit: self.latest_commit.clone(),
        }
    }

    /// Full git ref to check out for this head.
    pub fn full_ref(&self) -> String {
        let branch = match &self.merge_request {
            Some(mr) => mr.source_branch.as_str(),
            None => self.name.as_str(),
        };
        if branch.starts_with("refs/") {
            branch.to_string()
        } else {
            format!("refs/heads/{branch}")
        }
    }
}

/// A comparable state of a head.
///
/// Two revisions are equal iff they refer to the same head name, kind and
/// commit, regardless of which discovery pass produced them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision {
    pub head: String,
    pub kind: HeadKind,
    pub commit: String,
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.head, self.commit)
    }
}
