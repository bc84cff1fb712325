//! Planner - turns the configuration into ordered provisioning steps.
//!
//! Planning is pure: it reads the config and produces descriptors and
//! commands, it never calls out. Stages always run in [`Stage::ALL`] order
//! regardless of the order they were requested in.

use clap::ValueEnum;
use provision::{CommandSpec, ResourceDescriptor, ResourceKind};

use crate::config::{GkforgeConfig, SecretConfig, WorkloadIdentityConfig};
use crate::drivers::compute::{AllowedPayload, FirewallPayload, NetworkPayload, SubnetworkPayload};
use crate::drivers::gcloud::{
    BindingPayload, NatPayload, PoolPayload, ProviderPayload, RepositoryPayload, RouterPayload,
    ServiceAccountPayload,
};
use crate::drivers::kube::{HelmReleasePayload, HelmRepositoryPayload};
use crate::drivers::monitoring::ChannelPayload;

/// A group of related resources, applied together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum Stage {
    /// Enable the required service APIs
    Apis,
    /// Service accounts and their project roles
    Accounts,
    /// Workload identity federation for CI
    Identity,
    /// VPC network and subnetwork
    Network,
    /// Cloud Router and NAT
    Nat,
    /// Firewall rules
    Firewall,
    /// Artifact Registry repository
    Registry,
    /// Secret Manager secrets
    Secrets,
    /// Alert notification channels
    Channels,
    /// Prometheus and Grafana chart
    Monitoring,
    /// Istio service mesh
    Mesh,
    /// Vertical Pod Autoscaler
    Autoscaler,
}

impl Stage {
    pub const ALL: [Self; 12] = [
        Self::Apis,
        Self::Accounts,
        Self::Identity,
        Self::Network,
        Self::Nat,
        Self::Firewall,
        Self::Registry,
        Self::Secrets,
        Self::Channels,
        Self::Monitoring,
        Self::Mesh,
        Self::Autoscaler,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Self::Apis => "Service APIs",
            Self::Accounts => "Service Accounts",
            Self::Identity => "Workload Identity",
            Self::Network => "VPC Network",
            Self::Nat => "Cloud NAT",
            Self::Firewall => "Firewall Rules",
            Self::Registry => "Artifact Registry",
            Self::Secrets => "Secrets",
            Self::Channels => "Notification Channels",
            Self::Monitoring => "Monitoring",
            Self::Mesh => "Service Mesh",
            Self::Autoscaler => "Vertical Pod Autoscaler",
        }
    }

    /// Requested stages in run order, deduplicated; all stages when none.
    pub fn ordered(requested: &[Self]) -> Vec<Self> {
        if requested.is_empty() {
            return Self::ALL.to_vec();
        }
        let mut stages = requested.to_vec();
        stages.sort_unstable();
        stages.dedup();
        stages
    }
}

/// One unit of work inside a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Make sure a resource exists
    Ensure(ResourceDescriptor),
    /// Replace a secret with the value from its configured source
    Secret(SecretConfig),
    /// Run a command that is safe to repeat
    Run { label: String, spec: CommandSpec },
    /// Nothing to do, and why
    Skip { label: String, reason: String },
}

impl Step {
    pub fn label(&self) -> String {
        match self {
            Self::Ensure(desc) => desc.label(),
            Self::Secret(secret) => format!("secret '{}'", secret.name),
            Self::Run { label, .. } | Self::Skip { label, .. } => label.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagePlan {
    pub stage: Stage,
    pub steps: Vec<Step>,
}

/// Plan the requested stages against `project`.
pub fn plan(config: &GkforgeConfig, project: &str, requested: &[Stage]) -> Vec<StagePlan> {
    Stage::ordered(requested)
        .into_iter()
        .map(|stage| StagePlan {
            stage,
            steps: steps(stage, config, project),
        })
        .collect()
}

pub fn steps(stage: Stage, config: &GkforgeConfig, project: &str) -> Vec<Step> {
    match stage {
        Stage::Apis => config
            .apis
            .iter()
            .map(|api| Step::Ensure(ResourceDescriptor::new(ResourceKind::ServiceApi, api)))
            .collect(),
        Stage::Accounts => accounts(config, project),
        Stage::Identity => match &config.workload_identity {
            Some(wi) => identity(wi, project),
            None => vec![Step::Skip {
                label: "workload identity".to_string(),
                reason: "no [workload_identity] section configured".to_string(),
            }],
        },
        Stage::Network => network(config),
        Stage::Nat => nat(config),
        Stage::Firewall => firewall(config),
        Stage::Registry => vec![Step::Ensure(
            ResourceDescriptor::new(ResourceKind::ArtifactRepository, &config.registry.name)
                .in_region(config.registry_location())
                .with_payload(&RepositoryPayload {
                    format: config.registry.format.clone(),
                }),
        )],
        Stage::Secrets => config.secrets.iter().cloned().map(Step::Secret).collect(),
        Stage::Channels => config
            .channels
            .iter()
            .map(|c| {
                Step::Ensure(
                    ResourceDescriptor::new(ResourceKind::NotificationChannel, &c.display_name)
                        .with_payload(&ChannelPayload {
                            email: c.email.clone(),
                        }),
                )
            })
            .collect(),
        Stage::Monitoring => monitoring(config),
        Stage::Mesh => mesh(config),
        Stage::Autoscaler => config
            .autoscaler
            .manifests
            .iter()
            .map(|url| Step::Ensure(ResourceDescriptor::new(ResourceKind::Manifest, url)))
            .collect(),
    }
}

fn accounts(config: &GkforgeConfig, project: &str) -> Vec<Step> {
    let mut steps = Vec::new();
    for sa in &config.service_accounts {
        steps.push(Step::Ensure(
            ResourceDescriptor::new(ResourceKind::ServiceAccount, &sa.name).with_payload(
                &ServiceAccountPayload {
                    display_name: sa.display_name(),
                },
            ),
        ));
        let member = format!("serviceAccount:{}", sa.email(project));
        for role in &sa.roles {
            steps.push(Step::Ensure(
                ResourceDescriptor::new(
                    ResourceKind::ProjectIamBinding,
                    format!("{role} for {}", sa.name),
                )
                .with_payload(&BindingPayload {
                    member: member.clone(),
                    role: role.clone(),
                    account: None,
                }),
            ));
        }
    }
    steps
}

fn identity(wi: &WorkloadIdentityConfig, project: &str) -> Vec<Step> {
    let email = format!("{}@{project}.iam.gserviceaccount.com", wi.service_account);
    let token_creator = "roles/iam.serviceAccountTokenCreator".to_string();

    vec![
        Step::Ensure(
            ResourceDescriptor::new(
                ResourceKind::ServiceAccountIamBinding,
                format!("token creator on {} for itself", wi.service_account),
            )
            .with_payload(&BindingPayload {
                member: format!("serviceAccount:{email}"),
                role: token_creator.clone(),
                account: Some(email.clone()),
            }),
        ),
        Step::Ensure(
            ResourceDescriptor::new(ResourceKind::WorkloadIdentityPool, &wi.pool).with_payload(
                &PoolPayload {
                    display_name: format!("{} Pool", wi.pool),
                },
            ),
        ),
        Step::Ensure(
            ResourceDescriptor::new(ResourceKind::WorkloadIdentityProvider, &wi.provider)
                .with_payload(&ProviderPayload {
                    pool: wi.pool.clone(),
                    display_name: format!("{} OIDC Provider", wi.provider),
                    issuer_uri: wi.issuer_uri.clone(),
                    attribute_mapping: wi.attribute_mapping.clone(),
                    attribute_condition: wi.attribute_condition(),
                    allowed_audiences: wi.allowed_audiences.clone(),
                }),
        ),
        Step::Ensure(
            ResourceDescriptor::new(
                ResourceKind::ServiceAccountIamBinding,
                format!(
                    "token creator on {} for {}@{}",
                    wi.service_account, wi.project_path, wi.branch
                ),
            )
            .with_payload(&BindingPayload {
                member: wi.branch_principal(),
                role: token_creator,
                account: Some(email),
            }),
        ),
    ]
}

fn network(config: &GkforgeConfig) -> Vec<Step> {
    let net = &config.network;
    vec![
        Step::Ensure(
            ResourceDescriptor::new(ResourceKind::Network, &net.name).with_payload(
                &NetworkPayload {
                    description: net.description.clone(),
                },
            ),
        ),
        Step::Ensure(
            ResourceDescriptor::new(ResourceKind::Subnetwork, &net.subnetwork)
                .in_region(&config.region)
                .with_payload(&SubnetworkPayload {
                    network: net.name.clone(),
                    cidr_range: net.cidr_range.clone(),
                }),
        ),
    ]
}

fn nat(config: &GkforgeConfig) -> Vec<Step> {
    let net = &config.network;
    vec![
        Step::Ensure(
            ResourceDescriptor::new(ResourceKind::Router, &net.router)
                .in_region(&config.region)
                .with_payload(&RouterPayload {
                    network: net.name.clone(),
                }),
        ),
        Step::Ensure(
            ResourceDescriptor::new(ResourceKind::RouterNat, &net.nat)
                .in_region(&config.region)
                .with_payload(&NatPayload {
                    router: net.router.clone(),
                }),
        ),
    ]
}

fn firewall(config: &GkforgeConfig) -> Vec<Step> {
    config
        .firewall
        .iter()
        .map(|rule| {
            Step::Ensure(
                ResourceDescriptor::new(ResourceKind::FirewallRule, &rule.name).with_payload(
                    &FirewallPayload {
                        network: config.network.name.clone(),
                        priority: rule.priority,
                        source_ranges: rule.source_ranges.clone(),
                        target_tags: rule.target_tags.clone(),
                        allowed: rule
                            .allowed
                            .iter()
                            .map(|a| AllowedPayload {
                                protocol: a.protocol.clone(),
                                ports: a.ports.clone(),
                            })
                            .collect(),
                    },
                ),
            )
        })
        .collect()
}

fn monitoring(config: &GkforgeConfig) -> Vec<Step> {
    let mon = &config.monitoring;
    vec![
        Step::Run {
            label: "helm dependency update".to_string(),
            spec: CommandSpec::new("helm").args(["dependency", "update", mon.chart.as_str()]),
        },
        Step::Run {
            label: "helm lint".to_string(),
            spec: CommandSpec::new("helm").args(["lint", mon.chart.as_str()]),
        },
        Step::Ensure(ResourceDescriptor::new(ResourceKind::Namespace, &mon.namespace)),
        Step::Ensure(
            ResourceDescriptor::new(ResourceKind::HelmRelease, &mon.release)
                .in_namespace(&mon.namespace)
                .with_payload(&HelmReleasePayload {
                    chart: mon.chart.clone(),
                    set: Vec::new(),
                    upgrade: true,
                }),
        ),
    ]
}

fn mesh(config: &GkforgeConfig) -> Vec<Step> {
    let mesh = &config.mesh;
    let release = |name: &str, chart: &str, set: Vec<(String, String)>| {
        Step::Ensure(
            ResourceDescriptor::new(ResourceKind::HelmRelease, name)
                .in_namespace(&mesh.namespace)
                .with_payload(&HelmReleasePayload {
                    chart: format!("{}/{chart}", mesh.repo_name),
                    set,
                    upgrade: false,
                }),
        )
    };

    let mut steps = vec![
        Step::Ensure(
            ResourceDescriptor::new(ResourceKind::HelmRepository, &mesh.repo_name).with_payload(
                &HelmRepositoryPayload {
                    url: mesh.repo_url.clone(),
                },
            ),
        ),
        Step::Run {
            label: "helm repo update".to_string(),
            spec: CommandSpec::new("helm").args(["repo", "update"]),
        },
        Step::Ensure(ResourceDescriptor::new(ResourceKind::Namespace, &mesh.namespace)),
        release("istio-base", "base", Vec::new()),
        release(
            "istiod",
            "istiod",
            vec![
                ("global.proxy.autoInject".to_string(), "enabled".to_string()),
                ("meshConfig.enableTracing".to_string(), "true".to_string()),
                (
                    "meshConfig.defaultConfig.tracing.sampling".to_string(),
                    format!("{:.1}", mesh.tracing_sampling),
                ),
            ],
        ),
        release("istio-ingress", "gateway", Vec::new()),
        Step::Run {
            label: format!("enable sidecar injection in '{}'", mesh.app_namespace),
            spec: CommandSpec::new("kubectl").args([
                "label",
                "namespace",
                mesh.app_namespace.as_str(),
                "istio-injection=enabled",
                "--overwrite",
            ]),
        },
    ];

    if mesh.restart_pods {
        steps.push(Step::Run {
            label: format!("restart pods in '{}'", mesh.app_namespace),
            spec: CommandSpec::new("kubectl").args([
                "delete",
                "pods",
                "--all",
                "-n",
                mesh.app_namespace.as_str(),
            ]),
        });
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkloadIdentityConfig;

    const PROJECT: &str = "go-microservice-app";

    fn kinds(steps: &[Step]) -> Vec<Option<ResourceKind>> {
        steps
            .iter()
            .map(|s| match s {
                Step::Ensure(d) => Some(d.kind),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_stage_order_is_fixed() {
        assert_eq!(
            Stage::ordered(&[Stage::Secrets, Stage::Apis, Stage::Secrets]),
            vec![Stage::Apis, Stage::Secrets]
        );
        assert_eq!(Stage::ordered(&[]).len(), 12);
    }

    #[test]
    fn test_full_plan_covers_every_stage() {
        let plan = plan(&GkforgeConfig::default(), PROJECT, &[]);
        let stages: Vec<_> = plan.iter().map(|p| p.stage).collect();
        assert_eq!(stages, Stage::ALL.to_vec());
        assert!(plan.iter().all(|p| !p.steps.is_empty()));
    }

    #[test]
    fn test_accounts_with_role_bindings() {
        let config = GkforgeConfig::default();
        let steps = steps(Stage::Accounts, &config, PROJECT);
        let roles: usize = config.service_accounts.iter().map(|s| s.roles.len()).sum();
        assert_eq!(steps.len(), config.service_accounts.len() + roles);

        let Step::Ensure(binding) = &steps[1] else {
            panic!("expected a binding");
        };
        let payload: BindingPayload = binding.payload_as().unwrap();
        assert_eq!(
            payload.member,
            "serviceAccount:terraform-service-account@go-microservice-app.iam.gserviceaccount.com"
        );
    }

    #[test]
    fn test_identity_skipped_without_config() {
        let steps = steps(Stage::Identity, &GkforgeConfig::default(), PROJECT);
        assert!(matches!(steps.as_slice(), [Step::Skip { .. }]));
    }

    #[test]
    fn test_identity_with_config() {
        let config = GkforgeConfig {
            workload_identity: Some(WorkloadIdentityConfig {
                namespace_id: "64250114".to_string(),
                project_path: "acme/app".to_string(),
                project_number: "501649434946".to_string(),
                ..WorkloadIdentityConfig::default()
            }),
            ..GkforgeConfig::default()
        };
        let steps = steps(Stage::Identity, &config, PROJECT);
        assert_eq!(
            kinds(&steps),
            vec![
                Some(ResourceKind::ServiceAccountIamBinding),
                Some(ResourceKind::WorkloadIdentityPool),
                Some(ResourceKind::WorkloadIdentityProvider),
                Some(ResourceKind::ServiceAccountIamBinding),
            ]
        );
        let Step::Ensure(principal) = &steps[3] else {
            panic!("expected a binding");
        };
        let payload: BindingPayload = principal.payload_as().unwrap();
        assert!(
            payload
                .member
                .starts_with("principal://iam.googleapis.com/projects/501649434946/")
        );
        assert_eq!(payload.role, "roles/iam.serviceAccountTokenCreator");
    }

    #[test]
    fn test_network_and_subnetwork() {
        let steps = steps(Stage::Network, &GkforgeConfig::default(), PROJECT);
        let Step::Ensure(subnet) = &steps[1] else {
            panic!("expected subnetwork");
        };
        assert_eq!(subnet.kind, ResourceKind::Subnetwork);
        assert_eq!(subnet.scope.region.as_deref(), Some("us-central1"));
        let payload: SubnetworkPayload = subnet.payload_as().unwrap();
        assert_eq!(payload.network, "custom-vpc-network");
        assert_eq!(payload.cidr_range, "10.0.0.0/16");
    }

    #[test]
    fn test_firewall_rules_reference_network() {
        let steps = steps(Stage::Firewall, &GkforgeConfig::default(), PROJECT);
        assert_eq!(steps.len(), 5);
        for step in &steps {
            let Step::Ensure(desc) = step else {
                panic!("expected firewall rule");
            };
            let payload: FirewallPayload = desc.payload_as().unwrap();
            assert_eq!(payload.network, "custom-vpc-network");
        }
    }

    #[test]
    fn test_mesh_steps() {
        let mut config = GkforgeConfig::default();
        let labels: Vec<_> = steps(Stage::Mesh, &config, PROJECT)
            .iter()
            .map(Step::label)
            .collect();
        assert_eq!(
            labels,
            vec![
                "helm_repository 'istio'",
                "helm repo update",
                "namespace 'istio-system'",
                "helm_release 'istio-base'",
                "helm_release 'istiod'",
                "helm_release 'istio-ingress'",
                "enable sidecar injection in 'default'",
            ]
        );

        config.mesh.restart_pods = true;
        let steps = steps(Stage::Mesh, &config, PROJECT);
        assert_eq!(steps.last().unwrap().label(), "restart pods in 'default'");
    }

    #[test]
    fn test_istiod_tracing_values() {
        let steps = steps(Stage::Mesh, &GkforgeConfig::default(), PROJECT);
        let Step::Ensure(istiod) = &steps[4] else {
            panic!("expected istiod");
        };
        let payload: HelmReleasePayload = istiod.payload_as().unwrap();
        assert_eq!(payload.chart, "istio/istiod");
        assert!(payload.set.contains(&(
            "meshConfig.defaultConfig.tracing.sampling".to_string(),
            "100.0".to_string()
        )));
    }

    #[test]
    fn test_monitoring_runs_checks_before_release() {
        let steps = steps(Stage::Monitoring, &GkforgeConfig::default(), PROJECT);
        assert_eq!(steps[0].label(), "helm dependency update");
        assert_eq!(steps[1].label(), "helm lint");
        assert_eq!(
            kinds(&steps)[2..],
            [Some(ResourceKind::Namespace), Some(ResourceKind::HelmRelease)]
        );
    }

    #[test]
    fn test_registry_location_defaults_to_region() {
        let mut config = GkforgeConfig::default();
        config.region = "europe-west4".to_string();
        let steps = steps(Stage::Registry, &config, PROJECT);
        let Step::Ensure(repo) = &steps[0] else {
            panic!("expected repository");
        };
        assert_eq!(repo.scope.region.as_deref(), Some("europe-west4"));
    }
}
