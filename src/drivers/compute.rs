//! Compute Engine resources over REST: VPC networks, subnetworks and
//! firewall rules.
//!
//! Creates return a Compute `Operation`. Network and firewall creates run as
//! global operations, subnetwork creates as regional ones; the handle keeps
//! that scope so [`ComputeOperations`] reads the right endpoint.

use crate::api::{ApiClient, COMPUTE_BASE};
use provision::{
    Context, Driver, Error, OperationFailure, OperationHandle, OperationScope, OperationSource,
    OperationState, OperationStatus, OperationWarning, ResourceDescriptor, ResourceKind, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPayload {
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetworkPayload {
    /// Network name in the same project
    pub network: String,
    pub cidr_range: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallPayload {
    pub network: String,
    pub priority: u32,
    pub source_ranges: Vec<String>,
    #[serde(default)]
    pub target_tags: Vec<String>,
    pub allowed: Vec<AllowedPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedPayload {
    pub protocol: String,
    #[serde(default)]
    pub ports: Vec<String>,
}

/// Compute `Operation` resource, only the fields the poller reads.
#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<OperationFailure>,
    #[serde(default)]
    warnings: Vec<OperationWarning>,
}

impl Operation {
    fn into_status(self) -> OperationStatus {
        let state = if self.status == "DONE" {
            OperationState::Done
        } else {
            OperationState::Pending
        };
        OperationStatus {
            state,
            error: self.error.filter(|_| state == OperationState::Done),
            warnings: self.warnings,
        }
    }
}

fn parse_operation(value: serde_json::Value, what: &str) -> Result<Operation> {
    serde_json::from_value(value)
        .map_err(|e| Error::Other(format!("unexpected operation returned by {what}: {e}")))
}

/// Reads global and regional Compute operations.
pub struct ComputeOperations {
    api: ApiClient,
    base: String,
}

impl OperationSource for ComputeOperations {
    fn status(&self, ctx: &Context, handle: &OperationHandle) -> Result<OperationStatus> {
        let project = ctx.project_for_operation(handle);
        let url = match &handle.scope {
            OperationScope::Global => format!(
                "{}/projects/{project}/global/operations/{}",
                self.base, handle.id
            ),
            OperationScope::Regional(region) => format!(
                "{}/projects/{project}/regions/{region}/operations/{}",
                self.base, handle.id
            ),
        };
        let value = self.api.get(ctx, &url)?;
        Ok(parse_operation(value, &url)?.into_status())
    }
}

/// Driver for [`ResourceKind::Network`], [`ResourceKind::Subnetwork`] and
/// [`ResourceKind::FirewallRule`].
pub struct ComputeDriver {
    api: ApiClient,
    base: String,
    operations: ComputeOperations,
}

impl ComputeDriver {
    pub fn new(api: ApiClient) -> Self {
        Self::with_api_base(api, COMPUTE_BASE)
    }

    /// Driver against a different API root (for testing).
    pub fn with_api_base(api: ApiClient, base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            operations: ComputeOperations {
                api: api.clone(),
                base: base.clone(),
            },
            api,
            base,
        }
    }

    fn collection_url(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<String> {
        let project = ctx.project_for(desc);
        Ok(match desc.kind {
            ResourceKind::Network => format!("{}/projects/{project}/global/networks", self.base),
            ResourceKind::FirewallRule => {
                format!("{}/projects/{project}/global/firewalls", self.base)
            }
            ResourceKind::Subnetwork => format!(
                "{}/projects/{project}/regions/{}/subnetworks",
                self.base,
                desc.region()?
            ),
            other => return Err(Error::UnsupportedKind(other)),
        })
    }

    fn body(ctx: &Context, desc: &ResourceDescriptor) -> Result<serde_json::Value> {
        let project = ctx.project_for(desc);
        Ok(match desc.kind {
            ResourceKind::Network => {
                let payload: NetworkPayload = desc.payload_as()?;
                json!({
                    "name": desc.name,
                    "description": payload.description,
                    "autoCreateSubnetworks": false,
                })
            }
            ResourceKind::Subnetwork => {
                let payload: SubnetworkPayload = desc.payload_as()?;
                json!({
                    "name": desc.name,
                    "network": network_ref(project, &payload.network),
                    "ipCidrRange": payload.cidr_range,
                    "region": desc.region()?,
                })
            }
            ResourceKind::FirewallRule => {
                let payload: FirewallPayload = desc.payload_as()?;
                let allowed: Vec<_> = payload
                    .allowed
                    .iter()
                    .map(|a| {
                        if a.ports.is_empty() {
                            json!({ "IPProtocol": a.protocol })
                        } else {
                            json!({ "IPProtocol": a.protocol, "ports": a.ports })
                        }
                    })
                    .collect();
                json!({
                    "name": desc.name,
                    "network": network_ref(project, &payload.network),
                    "direction": "INGRESS",
                    "priority": payload.priority,
                    "sourceRanges": payload.source_ranges,
                    "targetTags": payload.target_tags,
                    "allowed": allowed,
                })
            }
            other => return Err(Error::UnsupportedKind(other)),
        })
    }
}

/// Relative URL of a network, as the Compute API expects in references.
pub fn network_ref(project: &str, network: &str) -> String {
    format!("projects/{project}/global/networks/{network}")
}

impl Driver for ComputeDriver {
    fn has_lookup(&self, desc: &ResourceDescriptor) -> bool {
        // Firewall rules are create-only; a duplicate is absorbed as a conflict.
        desc.kind != ResourceKind::FirewallRule
    }

    fn describe(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<()> {
        let url = format!("{}/{}", self.collection_url(ctx, desc)?, desc.name);
        self.api.get(ctx, &url)?;
        Ok(())
    }

    fn create(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<Option<OperationHandle>> {
        let url = self.collection_url(ctx, desc)?;
        let value = self.api.post(ctx, &url, Self::body(ctx, desc)?)?;
        let operation = parse_operation(value, &url)?;

        let mut handle = match desc.kind {
            ResourceKind::Subnetwork => OperationHandle::regional(operation.name, desc.region()?),
            _ => OperationHandle::global(operation.name),
        };
        handle.project.clone_from(&desc.scope.project);
        log::debug!("{} started operation {handle}", desc.label());
        Ok(Some(handle))
    }

    fn operations(&self) -> Option<&dyn OperationSource> {
        Some(&self.operations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{ScriptedTransport, StaticToken};
    use provision::testing::FakeClock;
    use provision::{
        CreationOutcome, Detection, NoReport, Provisioner, Registry, WaitConfig,
    };
    use std::sync::Arc;
    use std::time::Duration;

    const BASE: &str = "https://compute.test/compute/v1";

    fn driver(transport: &Arc<ScriptedTransport>) -> ComputeDriver {
        ComputeDriver::with_api_base(
            ApiClient::new(transport.clone(), Arc::new(StaticToken)),
            BASE,
        )
    }

    fn provisioner(transport: &Arc<ScriptedTransport>, clock: Arc<FakeClock>) -> Provisioner {
        let driver: Arc<dyn Driver> = Arc::new(driver(transport));
        let mut registry = Registry::new();
        registry.register_all(
            &[
                ResourceKind::Network,
                ResourceKind::Subnetwork,
                ResourceKind::FirewallRule,
            ],
            driver,
        );
        Provisioner::new(registry)
            .with_clock(clock)
            .with_reporter(Arc::new(NoReport))
            .with_wait(WaitConfig::default())
    }

    fn network() -> ResourceDescriptor {
        ResourceDescriptor::new(ResourceKind::Network, "custom-vpc-network").with_payload(
            &NetworkPayload {
                description: "Custom VPC for GKE".to_string(),
            },
        )
    }

    #[test]
    fn test_network_created_and_global_operation_polled() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(404, r#"{"error": {"code": 404, "message": "The resource was not found"}}"#)
            .push(200, r#"{"name": "operation-1", "status": "RUNNING"}"#)
            .push(200, r#"{"name": "operation-1", "status": "RUNNING"}"#)
            .push(200, r#"{"name": "operation-1", "status": "DONE"}"#);
        let clock = Arc::new(FakeClock::new());
        let provisioner = provisioner(&transport, clock.clone());

        let ensured = provisioner.ensure(&Context::new("p"), &network()).unwrap();
        assert_eq!(ensured.outcome, CreationOutcome::Created);
        assert_eq!(
            transport.calls(),
            vec![
                format!("GET {BASE}/projects/p/global/networks/custom-vpc-network"),
                format!("POST {BASE}/projects/p/global/networks"),
                format!("GET {BASE}/projects/p/global/operations/operation-1"),
                format!("GET {BASE}/projects/p/global/operations/operation-1"),
            ]
        );
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(10)]);

        let body = transport.requests()[1].body.clone().unwrap();
        assert_eq!(body["autoCreateSubnetworks"], false);
        assert_eq!(body["description"], "Custom VPC for GKE");
    }

    #[test]
    fn test_existing_network_is_not_created() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(200, r#"{"name": "custom-vpc-network"}"#);
        let provisioner = provisioner(&transport, Arc::new(FakeClock::new()));

        let ensured = provisioner.ensure(&Context::new("p"), &network()).unwrap();
        assert_eq!(
            ensured.outcome,
            CreationOutcome::AlreadyPresent {
                detected_by: Detection::Probe
            }
        );
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn test_subnetwork_uses_regional_operation() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(404, "not found")
            .push(200, r#"{"name": "operation-7", "status": "PENDING"}"#)
            .push(200, r#"{"name": "operation-7", "status": "DONE"}"#);
        let provisioner = provisioner(&transport, Arc::new(FakeClock::new()));

        let desc = ResourceDescriptor::new(ResourceKind::Subnetwork, "custom-subnetwork")
            .in_region("us-central1")
            .with_payload(&SubnetworkPayload {
                network: "custom-vpc-network".to_string(),
                cidr_range: "10.0.0.0/16".to_string(),
            });
        provisioner.ensure(&Context::new("p"), &desc).unwrap();

        let calls = transport.calls();
        assert_eq!(
            calls[2],
            format!("GET {BASE}/projects/p/regions/us-central1/operations/operation-7")
        );
        let body = transport.requests()[1].body.clone().unwrap();
        assert_eq!(body["network"], "projects/p/global/networks/custom-vpc-network");
        assert_eq!(body["ipCidrRange"], "10.0.0.0/16");
    }

    fn firewall() -> ResourceDescriptor {
        ResourceDescriptor::new(ResourceKind::FirewallRule, "custom-allow-ssh").with_payload(
            &FirewallPayload {
                network: "custom-vpc-network".to_string(),
                priority: 65534,
                source_ranges: vec!["0.0.0.0/0".to_string()],
                target_tags: vec!["custom".to_string()],
                allowed: vec![AllowedPayload {
                    protocol: "tcp".to_string(),
                    ports: vec!["22".to_string()],
                }],
            },
        )
    }

    #[test]
    fn test_firewall_conflict_is_tolerated() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(
            409,
            r#"{"error": {"code": 409, "message": "The resource 'projects/p/global/firewalls/custom-allow-ssh' already exists"}}"#,
        );
        let provisioner = provisioner(&transport, Arc::new(FakeClock::new()));

        let ensured = provisioner.ensure(&Context::new("p"), &firewall()).unwrap();
        assert_eq!(
            ensured.outcome,
            CreationOutcome::AlreadyPresent {
                detected_by: Detection::Conflict
            }
        );
        assert_eq!(
            transport.calls(),
            vec![format!("POST {BASE}/projects/p/global/firewalls")]
        );
    }

    #[test]
    fn test_firewall_body_and_warnings() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(200, r#"{"name": "operation-9", "status": "RUNNING"}"#)
            .push(
                200,
                r#"{"name": "operation-9", "status": "DONE", "warnings": [{"code": "FIELD_VALUE_OVERRIDEN", "message": "logConfig defaulted"}]}"#,
            );
        let provisioner = provisioner(&transport, Arc::new(FakeClock::new()));

        let ensured = provisioner.ensure(&Context::new("p"), &firewall()).unwrap();
        assert_eq!(ensured.warnings.len(), 1);
        assert_eq!(ensured.warnings[0].code, "FIELD_VALUE_OVERRIDEN");

        let body = transport.requests()[0].body.clone().unwrap();
        assert_eq!(body["allowed"][0]["IPProtocol"], "tcp");
        assert_eq!(body["allowed"][0]["ports"][0], "22");
        assert_eq!(body["direction"], "INGRESS");
    }

    #[test]
    fn test_operation_error_payload() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(
            200,
            r#"{"name": "operation-3", "status": "DONE", "error": {"errors": [{"code": "QUOTA_EXCEEDED", "message": "Quota 'NETWORKS' exceeded"}]}}"#,
        );
        let status = driver(&transport)
            .operations()
            .unwrap()
            .status(&Context::new("p"), &OperationHandle::global("operation-3"))
            .unwrap();
        assert!(status.is_done());
        assert_eq!(status.error.unwrap().errors[0].code, "QUOTA_EXCEEDED");
    }

    #[test]
    fn test_ambiguous_probe_prevents_create() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(
            403,
            r#"{"error": {"code": 403, "message": "Required 'compute.networks.get' permission"}}"#,
        );
        let provisioner = provisioner(&transport, Arc::new(FakeClock::new()));

        let err = provisioner.ensure(&Context::new("p"), &network()).unwrap_err();
        assert!(matches!(err, Error::Probe { .. }));
        assert_eq!(transport.calls().len(), 1);
    }
}
