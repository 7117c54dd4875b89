//! Blob id resolution
//!
//! Ids come in more than one shape: blobs written by this store use a
//! structured UUID layout, older ones were stored under their raw key or
//! flat under the prefix. The resolvers are tried in a fixed order and the
//! first existing path wins.

use opendal::Operator;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

/// Lookup strategies, in resolution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdResolver {
    /// `<prefix>/<aa>/<uuid>` where `aa` is the first two hex digits
    Structured,
    /// The id is itself the storage key
    Direct,
    /// `<prefix>/<id>`
    Flat,
}

impl IdResolver {
    pub const ORDER: [IdResolver; 3] = [IdResolver::Structured, IdResolver::Direct, IdResolver::Flat];

    /// Candidate storage path for `id`, or `None` if this strategy cannot
    /// address it at all.
    pub fn candidate(&self, prefix: &str, id: &str) -> Option<String> {
        if id.is_empty() || id.split('/').any(|seg| seg == "..") {
            return None;
        }
        match self {
            IdResolver::Structured => {
                let uuid = Uuid::parse_str(id).ok()?;
                Some(structured_path(prefix, &uuid))
            }
            IdResolver::Direct => Some(id.trim_start_matches('/').to_string()),
            IdResolver::Flat => {
                if id.contains('/') {
                    None
                } else {
                    Some(format!("{}/{id}", prefix.trim_end_matches('/')))
                }
            }
        }
    }
}

/// Storage path for a structured blob id
pub fn structured_path(prefix: &str, id: &Uuid) -> String {
    let hyphenated = id.hyphenated().to_string();
    format!(
        "{}/{}/{hyphenated}",
        prefix.trim_end_matches('/'),
        &hyphenated[..2]
    )
}

/// Try each resolver in order; the first candidate that exists wins.
pub async fn resolve(op: &Operator, prefix: &str, id: &str) -> StorageResult<String> {
    for resolver in IdResolver::ORDER {
        let Some(path) = resolver.candidate(prefix, id) else {
            continue;
        };
        match op.exists(&path).await {
            Ok(true) => {
                tracing::trace!(id, ?resolver, %path, "blob id resolved");
                return Ok(path);
            }
            Ok(false) => {}
            Err(e) => return Err(StorageError::from_backend(e, id)),
        }
    }
    Err(StorageError::NotFound(id.to_string()))
}

/// Outcome of one resolver during a diagnostic run
#[derive(Debug, Clone, Serialize)]
pub struct ResolverFinding {
    pub strategy: IdResolver,
    pub path: Option<String>,
    pub exists: bool,
    pub error: Option<String>,
}

/// Per-strategy view of how an id resolves. Purely informational.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub id: String,
    pub resolved: Option<String>,
    pub findings: Vec<ResolverFinding>,
}

/// Run every resolver (not just up to the first hit) and log the findings.
pub async fn diagnose(op: &Operator, prefix: &str, id: &str) -> DiagnosticReport {
    let mut findings = Vec::with_capacity(IdResolver::ORDER.len());
    for strategy in IdResolver::ORDER {
        let path = strategy.candidate(prefix, id);
        let (exists, error) = match &path {
            None => (false, None),
            Some(p) => match op.exists(p).await {
                Ok(found) => (found, None),
                Err(e) => (false, Some(e.to_string())),
            },
        };
        tracing::info!(id, ?strategy, path = ?path, exists, error = ?error, "blob diagnostic");
        findings.push(ResolverFinding {
            strategy,
            path,
            exists,
            error,
        });
    }
    let resolved = findings
        .iter()
        .find(|f| f.exists)
        .and_then(|f| f.path.clone());
    DiagnosticReport {
        id: id.to_string(),
        resolved,
        findings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_operator() -> Operator {
        Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish()
    }

    #[test]
    fn test_candidates() {
        let id = "3f2b8c1e-0000-4000-8000-000000000001";
        assert_eq!(
            IdResolver::Structured.candidate("objects", id).as_deref(),
            Some("objects/3f/3f2b8c1e-0000-4000-8000-000000000001")
        );
        assert_eq!(IdResolver::Structured.candidate("objects", "legacy-key"), None);
        assert_eq!(
            IdResolver::Direct.candidate("objects", "media/old/clip.mp4").as_deref(),
            Some("media/old/clip.mp4")
        );
        assert_eq!(
            IdResolver::Flat.candidate("objects/", "abc123").as_deref(),
            Some("objects/abc123")
        );
        assert_eq!(IdResolver::Flat.candidate("objects", "a/b"), None);
        assert_eq!(IdResolver::Direct.candidate("objects", "../etc/passwd"), None);
        assert_eq!(IdResolver::Flat.candidate("objects", ""), None);
    }

    #[tokio::test]
    async fn test_resolution_order() {
        let op = memory_operator();
        let id = Uuid::new_v4();
        let structured = structured_path("objects", &id);
        op.write(&structured, vec![1u8]).await.unwrap();
        op.write("objects/legacy", vec![2u8]).await.unwrap();
        op.write("raw/key.bin", vec![3u8]).await.unwrap();

        assert_eq!(resolve(&op, "objects", &id.to_string()).await.unwrap(), structured);
        assert_eq!(resolve(&op, "objects", "legacy").await.unwrap(), "objects/legacy");
        assert_eq!(resolve(&op, "objects", "raw/key.bin").await.unwrap(), "raw/key.bin");

        let err = resolve(&op, "objects", "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_diagnose_reports_every_strategy() {
        let op = memory_operator();
        op.write("objects/legacy", vec![0u8]).await.unwrap();

        let report = diagnose(&op, "objects", "legacy").await;
        assert_eq!(report.findings.len(), 3);
        assert_eq!(report.resolved.as_deref(), Some("objects/legacy"));

        let flat = &report.findings[2];
        assert_eq!(flat.strategy, IdResolver::Flat);
        assert!(flat.exists);
        assert!(report.findings[0].path.is_none(), "not a uuid");

        let report = diagnose(&op, "objects", "nope").await;
        assert!(report.resolved.is_none());
        assert!(report.findings.iter().all(|f| !f.exists));
    }
}
