//! Secret Replacer.
//!
//! Secret values cannot be updated in place here: a new value means
//! deleting any secret with that name and creating it again. This is
//! destructive and not atomic; a failure between the delete and the create
//! leaves the secret absent.
//!
//! The value is handed to the store through a temporary file readable only
//! by the current user. The file is removed after the create call whether it
//! succeeded or not.

use crate::classify::Patterns;
use crate::context::{Context, Reporter};
use crate::error::{Error, Result};
use crate::types::{PutOutcome, PutReport, ResourceKind, SecretRecord};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Backend holding named secrets.
pub trait SecretStore: Send + Sync {
    /// Look the secret up; "not found" is an execution error the caller
    /// classifies.
    fn describe(&self, ctx: &Context, name: &str) -> Result<()>;

    fn delete(&self, ctx: &Context, name: &str) -> Result<()>;

    /// Create the secret with the value read from `data_file`.
    fn create(&self, ctx: &Context, name: &str, data_file: &Path) -> Result<()>;
}

/// Put a secret value under a name, replacing any existing secret.
///
/// A failed delete is reported through `reporter` and in
/// [`PutReport::deletion_failure`], and the create is attempted anyway.
/// When the secret was in fact still there, that create fails with a
/// conflict, which is not tolerated on this path.
pub fn put_secret(
    store: &dyn SecretStore,
    ctx: &Context,
    record: &SecretRecord,
    patterns: &Patterns,
    reporter: &dyn Reporter,
) -> Result<PutReport> {
    let existed = match store.describe(ctx, &record.name) {
        Ok(()) => true,
        Err(e) if e.execution().is_some_and(|x| patterns.is_not_found(x)) => false,
        Err(e) => {
            return Err(Error::Probe {
                kind: ResourceKind::Secret,
                name: record.name.clone(),
                source: Box::new(e),
            });
        }
    };

    let mut deletion_failure = None;
    if existed {
        log::debug!("secret '{}' exists; deleting before recreate", record.name);
        if let Err(e) = store.delete(ctx, &record.name) {
            let error = Error::Deletion {
                name: record.name.clone(),
                source: Box::new(e),
            };
            reporter.on_deletion_failed(&record.name, &error);
            deletion_failure = Some(error);
        }
    }

    create_staged(store, ctx, record).map_err(|e| match e {
        Error::Staging { .. } => e,
        other => Error::Creation {
            kind: ResourceKind::Secret,
            name: record.name.clone(),
            source: Box::new(other),
        },
    })?;

    let outcome = if existed {
        PutOutcome::Replaced
    } else {
        PutOutcome::Created
    };
    reporter.on_secret(&record.name, outcome);
    Ok(PutReport {
        outcome,
        deletion_failure,
    })
}

fn create_staged(store: &dyn SecretStore, ctx: &Context, record: &SecretRecord) -> Result<()> {
    let staged = stage(record)?;
    let result = store.create(ctx, &record.name, staged.path());
    if let Err(e) = staged.close() {
        log::warn!(
            "could not remove staged value for secret '{}': {e}",
            record.name
        );
    }
    result
}

/// Write the value to a fresh temp file. Dropping the handle removes the
/// file, so every early return cleans up.
fn stage(record: &SecretRecord) -> Result<NamedTempFile> {
    let staging = |source: std::io::Error| Error::Staging {
        name: record.name.clone(),
        source,
    };

    let mut file = tempfile::Builder::new()
        .prefix("gkforge-secret-")
        .tempfile()
        .map_err(staging)?;
    file.write_all(&record.value).map_err(staging)?;
    file.flush().map_err(staging)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoReport;
    use crate::exec::{ExecutionError, Status};
    use crate::testing::MemorySecretStore;
    use std::cell::RefCell;

    fn ctx() -> Context {
        Context::new("go-microservice-app")
    }

    fn put(store: &MemorySecretStore, name: &str, value: &str) -> Result<PutReport> {
        put_secret(
            store,
            &ctx(),
            &SecretRecord::new(name, value),
            &Patterns::default(),
            &NoReport,
        )
    }

    #[derive(Default)]
    struct Recorder {
        deletion_failures: RefCell<Vec<String>>,
    }

    impl Reporter for Recorder {
        fn on_deletion_failed(&self, name: &str, _error: &Error) {
            self.deletion_failures.borrow_mut().push(name.to_string());
        }
    }

    #[test]
    fn test_create_when_absent() {
        let store = MemorySecretStore::new();
        let report = put(&store, "postgres-user", "postgres").unwrap();
        assert_eq!(report.outcome, PutOutcome::Created);
        assert!(report.deletion_failure.is_none());
        assert_eq!(store.value("postgres-user").unwrap(), b"postgres");
        assert_eq!(
            store.log(),
            vec!["describe postgres-user", "create postgres-user"]
        );
    }

    #[test]
    fn test_replace_existing() {
        let store = MemorySecretStore::new().with_secret("postgres-password", b"oldpw");
        let report = put(&store, "postgres-password", "newpw").unwrap();

        assert_eq!(report.outcome, PutOutcome::Replaced);
        assert_eq!(store.value("postgres-password").unwrap(), b"newpw");
        assert_eq!(
            store.log(),
            vec![
                "describe postgres-password",
                "delete postgres-password",
                "create postgres-password"
            ]
        );
        let staged = store.staged_paths();
        assert_eq!(staged.len(), 1);
        assert!(!staged[0].exists());
    }

    #[test]
    fn test_staging_removed_when_create_fails() {
        let store = MemorySecretStore::new().with_secret("postgres-password", b"oldpw");
        store.fail_create(ExecutionError {
            command: "gcloud secrets create postgres-password".into(),
            status: Status::Exit(1),
            stderr: "PERMISSION_DENIED: secretmanager.secrets.create".into(),
        });

        let err = put(&store, "postgres-password", "newpw").unwrap_err();
        assert!(matches!(
            err,
            Error::Creation {
                kind: ResourceKind::Secret,
                ..
            }
        ));
        let staged = store.staged_paths();
        assert_eq!(staged.len(), 1);
        assert!(!staged[0].exists());
        // delete already happened: the secret is now absent
        assert!(store.value("postgres-password").is_none());
    }

    #[test]
    fn test_deletion_failure_is_reported_and_create_still_attempted() {
        let store = MemorySecretStore::new().with_secret("redis-password", b"old");
        store.fail_delete(
            ExecutionError {
                command: "gcloud secrets delete redis-password --quiet".into(),
                status: Status::Exit(1),
                stderr: "ERROR: deadline exceeded".into(),
            },
            true,
        );
        let recorder = Recorder::default();

        let report = put_secret(
            &store,
            &ctx(),
            &SecretRecord::new("redis-password", "new"),
            &Patterns::default(),
            &recorder,
        )
        .unwrap();

        assert_eq!(report.outcome, PutOutcome::Replaced);
        assert!(matches!(report.deletion_failure, Some(Error::Deletion { .. })));
        assert_eq!(*recorder.deletion_failures.borrow(), vec!["redis-password"]);
        assert_eq!(store.value("redis-password").unwrap(), b"new");
    }

    #[test]
    fn test_deletion_failure_then_conflict_is_creation_error() {
        let store = MemorySecretStore::new().with_secret("redis-password", b"old");
        store.fail_delete(
            ExecutionError {
                command: "gcloud secrets delete redis-password --quiet".into(),
                status: Status::Exit(1),
                stderr: "PERMISSION_DENIED".into(),
            },
            false,
        );

        let err = put(&store, "redis-password", "new").unwrap_err();
        match &err {
            Error::Creation { source, .. } => {
                assert!(source.to_string().contains("already exists"));
            }
            other => panic!("expected creation error, got {other}"),
        }
        assert_eq!(store.log().last().unwrap(), "create redis-password");
        assert_eq!(store.value("redis-password").unwrap(), b"old");
        assert!(!store.staged_paths()[0].exists());
    }

    #[test]
    fn test_ambiguous_describe_is_probe_error() {
        let store = MemorySecretStore::new();
        store.fail_describe(ExecutionError {
            command: "gcloud secrets describe jwt-secret".into(),
            status: Status::Exit(1),
            stderr: "ERROR: (gcloud.secrets.describe) There was a problem refreshing your current auth tokens".into(),
        });

        let err = put(&store, "jwt-secret", "s3cret").unwrap_err();
        assert!(matches!(err, Error::Probe { .. }));
        assert_eq!(store.log(), vec!["describe jwt-secret"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_staged_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let record = SecretRecord::new("jwt-secret", "s3cret");
        let staged = stage(&record).unwrap();
        let mode = std::fs::metadata(staged.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"s3cret");
    }
}
