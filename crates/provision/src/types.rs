//! Core value types: descriptors, outcomes, operation handles and status.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of resources the provisioner knows how to ensure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ServiceApi,
    ServiceAccount,
    ProjectIamBinding,
    ServiceAccountIamBinding,
    WorkloadIdentityPool,
    WorkloadIdentityProvider,
    Network,
    Subnetwork,
    FirewallRule,
    Router,
    RouterNat,
    ArtifactRepository,
    Secret,
    NotificationChannel,
    Namespace,
    HelmRepository,
    HelmRelease,
    Manifest,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceApi => "service_api",
            Self::ServiceAccount => "service_account",
            Self::ProjectIamBinding => "project_iam_binding",
            Self::ServiceAccountIamBinding => "service_account_iam_binding",
            Self::WorkloadIdentityPool => "workload_identity_pool",
            Self::WorkloadIdentityProvider => "workload_identity_provider",
            Self::Network => "network",
            Self::Subnetwork => "subnetwork",
            Self::FirewallRule => "firewall_rule",
            Self::Router => "router",
            Self::RouterNat => "router_nat",
            Self::ArtifactRepository => "artifact_repository",
            Self::Secret => "secret",
            Self::NotificationChannel => "notification_channel",
            Self::Namespace => "namespace",
            Self::HelmRepository => "helm_repository",
            Self::HelmRelease => "helm_release",
            Self::Manifest => "manifest",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parent context a resource name is unique within.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    /// Overrides the context project when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// A resource the caller wants to exist.
///
/// `name` is unique within `scope`, not globally. The payload is opaque to
/// the core; each kind's driver deserializes it into its own schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub name: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ResourceDescriptor {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            scope: Scope::default(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn in_project(mut self, project: impl Into<String>) -> Self {
        self.scope.project = Some(project.into());
        self
    }

    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.scope.region = Some(region.into());
        self
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.scope.namespace = Some(namespace.into());
        self
    }

    /// Attach a creation payload. Serialization of plain data cannot fail,
    /// so a failure here is stored as `Null` and surfaces on `payload_as`.
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Self {
        self.payload = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
        self
    }

    /// Decode the payload into a kind-specific schema.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|source| Error::Payload {
            kind: self.kind,
            name: self.name.clone(),
            source,
        })
    }

    /// Region from the scope; kinds that are regional fail without one.
    pub fn region(&self) -> Result<&str> {
        self.scope.region.as_deref().ok_or_else(|| Error::MissingScope {
            kind: self.kind,
            name: self.name.clone(),
            field: "region",
        })
    }

    /// "kind 'name'" for messages.
    pub fn label(&self) -> String {
        format!("{} '{}'", self.kind, self.name)
    }
}

/// How an existing resource was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// The existence probe found it
    Probe,
    /// The create call reported "already exists" (tolerated conflict)
    Conflict,
}

/// Result of [`ensure_exists`](crate::Provisioner::ensure_exists).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreationOutcome {
    AlreadyPresent { detected_by: Detection },
    Created,
    /// Creation started a long-running operation that still has to be waited on
    CreatedAsync(OperationHandle),
}

impl CreationOutcome {
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::CreatedAsync(_))
    }
}

/// Result of [`ensure`](crate::Provisioner::ensure): an outcome with any
/// operation resolved, plus the non-fatal warnings it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ensured {
    pub outcome: CreationOutcome,
    pub warnings: Vec<OperationWarning>,
}

/// Addressing scope of a long-running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationScope {
    Global,
    Regional(String),
}

impl fmt::Display for OperationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Regional(region) => write!(f, "regional({region})"),
        }
    }
}

/// Handle to a long-running operation, returned by an asynchronous create.
///
/// The scope has to be carried from the create call to the poller: polling a
/// regional operation through the global endpoint only yields "not found".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    pub id: String,
    pub scope: OperationScope,
    /// Project the operation lives in, when it differs from the context
    pub project: Option<String>,
}

impl OperationHandle {
    pub fn global(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scope: OperationScope::Global,
            project: None,
        }
    }

    pub fn regional(id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scope: OperationScope::Regional(region.into()),
            project: None,
        }
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.id, self.scope)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    Done,
}

/// One read of an operation's status. Each poll is a fresh read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStatus {
    pub state: OperationState,
    pub error: Option<OperationFailure>,
    pub warnings: Vec<OperationWarning>,
}

impl OperationStatus {
    pub fn pending() -> Self {
        Self {
            state: OperationState::Pending,
            error: None,
            warnings: Vec::new(),
        }
    }

    pub fn done() -> Self {
        Self {
            state: OperationState::Done,
            error: None,
            warnings: Vec::new(),
        }
    }

    pub fn failed(failure: OperationFailure) -> Self {
        Self {
            state: OperationState::Done,
            error: Some(failure),
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: OperationWarning) -> Self {
        self.warnings.push(warning);
        self
    }

    pub fn is_done(&self) -> bool {
        self.state == OperationState::Done
    }
}

/// Structured error payload reported by a finished operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFailure {
    #[serde(default)]
    pub errors: Vec<OperationErrorDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationErrorDetail {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl OperationFailure {
    pub fn single(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            errors: vec![OperationErrorDetail {
                code: code.into(),
                message: message.into(),
            }],
        }
    }
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return f.write_str("operation reported an error without details");
        }
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", e.code, e.message)?;
        }
        Ok(())
    }
}

/// Non-fatal diagnostic attached to an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationWarning {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl OperationWarning {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for OperationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Successful end of a wait.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationReport {
    pub warnings: Vec<OperationWarning>,
    /// Number of status reads performed
    pub polls: u32,
}

/// A secret value to be put under a name.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretRecord {
    pub name: String,
    pub value: Vec<u8>,
}

impl SecretRecord {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRecord")
            .field("name", &self.name)
            .field("value", &format_args!("<{} bytes redacted>", self.value.len()))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    /// An existing secret was deleted and recreated with the new value
    Replaced,
}

/// Result of [`put_secret`](crate::secret::put_secret).
#[derive(Debug)]
pub struct PutReport {
    pub outcome: PutOutcome,
    /// Set when deleting the previous secret failed but creation was still
    /// attempted and succeeded.
    pub deletion_failure: Option<Error>,
}
