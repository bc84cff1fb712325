//! gkforge configuration (`gkforge.toml`).
//!
//! Every field has a default, so a missing file or an empty one describes
//! the stock environment: one VPC with a subnetwork and NAT, the CI and
//! logging service accounts, GitLab workload identity, five firewall rules,
//! a docker registry, the application secrets, alert channels and the
//! cluster add-ons.

use anyhow::{Context, Result, bail};
use provision::{Identity, Patterns, RetryConfig, WaitConfig};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

static RFC1035_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]([-a-z0-9]{0,61}[a-z0-9])?$").expect("valid regex"));

static DNS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$").expect("valid regex"));

static SECRET_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,255}$").expect("valid regex"));

static IPV4_CIDR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})/(\d{1,2})$").expect("valid regex")
});

// ============================================================================
// Main Config Schema
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GkforgeConfig {
    /// Project id; `--project`, `GKFORGE_PROJECT` and `CLOUDSDK_CORE_PROJECT` also set it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Region for regional resources (env: `REGION`)
    pub region: String,

    /// Identity calls are made as
    pub auth: AuthConfig,

    /// How long-running operations are waited on
    pub wait: WaitSection,

    /// Extra error-text markers
    pub patterns: PatternsSection,

    /// Service APIs to enable
    pub apis: Vec<String>,

    pub service_accounts: Vec<ServiceAccountConfig>,

    /// GitLab OIDC federation; skipped when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload_identity: Option<WorkloadIdentityConfig>,

    pub network: NetworkConfig,

    pub firewall: Vec<FirewallRuleConfig>,

    pub registry: RegistryConfig,

    pub secrets: Vec<SecretConfig>,

    pub channels: Vec<ChannelConfig>,

    pub monitoring: MonitoringConfig,

    pub mesh: MeshConfig,

    pub autoscaler: AutoscalerConfig,
}

impl Default for GkforgeConfig {
    fn default() -> Self {
        Self {
            project: None,
            region: "us-central1".to_string(),
            auth: AuthConfig::default(),
            wait: WaitSection::default(),
            patterns: PatternsSection::default(),
            apis: strings(&[
                "cloudresourcemanager.googleapis.com",
                "container.googleapis.com",
                "logging.googleapis.com",
                "monitoring.googleapis.com",
                "iam.googleapis.com",
                "iamcredentials.googleapis.com",
                "recommender.googleapis.com",
            ]),
            service_accounts: vec![
                ServiceAccountConfig {
                    name: "terraform-service-account".to_string(),
                    display_name: None,
                    roles: strings(&[
                        "roles/resourcemanager.projectIamAdmin",
                        "roles/serviceusage.serviceUsageAdmin",
                        "roles/iam.serviceAccountTokenCreator",
                        "roles/iam.serviceAccountUser",
                        "roles/iam.workloadIdentityPoolAdmin",
                        "roles/monitoring.viewer",
                        "roles/storage.admin",
                        "roles/iam.serviceAccountAdmin",
                        "roles/secretmanager.secretAccessor",
                        "roles/container.admin",
                        "roles/compute.admin",
                        "roles/logging.viewer",
                        "roles/monitoring.alertPolicyEditor",
                        "roles/logging.configWriter",
                        "roles/artifactregistry.reader",
                        "roles/artifactregistry.writer",
                    ]),
                },
                ServiceAccountConfig {
                    name: "logging-monitoring-service-acc".to_string(),
                    display_name: None,
                    roles: strings(&[
                        "roles/logging.logWriter",
                        "roles/logging.viewer",
                        "roles/monitoring.metricWriter",
                    ]),
                },
            ],
            workload_identity: None,
            network: NetworkConfig::default(),
            firewall: default_firewall_rules(),
            registry: RegistryConfig::default(),
            secrets: default_secrets(),
            channels: vec![
                ChannelConfig {
                    display_name: "System Handling Alerts".to_string(),
                    email: "system-alerts@example.com".to_string(),
                },
                ChannelConfig {
                    display_name: "Event Handling Alerts".to_string(),
                    email: "event-alerts@example.com".to_string(),
                },
            ],
            monitoring: MonitoringConfig::default(),
            mesh: MeshConfig::default(),
            autoscaler: AutoscalerConfig::default(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impersonate_service_account: Option<String>,
}

impl AuthConfig {
    pub fn identity(&self) -> Identity {
        Identity {
            account: self.account.clone(),
            impersonate: self.impersonate_service_account.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitSection {
    pub interval_secs: u64,
    pub timeout_secs: u64,
    /// Extra attempts for a failed status read (0 = read once)
    pub read_retries: u32,
}

impl Default for WaitSection {
    fn default() -> Self {
        Self {
            interval_secs: provision::DEFAULT_INTERVAL.as_secs(),
            timeout_secs: provision::DEFAULT_TIMEOUT.as_secs(),
            read_retries: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternsSection {
    pub not_found: Vec<String>,
    pub already_exists: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccountConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl ServiceAccountConfig {
    /// "terraform-service-account" -> "Terraform Service Account"
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.display_name {
            return name.clone();
        }
        self.name
            .split('-')
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                chars.next().map_or_else(String::new, |first| {
                    first.to_uppercase().collect::<String>() + chars.as_str()
                })
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn email(&self, project: &str) -> String {
        format!("{}@{project}.iam.gserviceaccount.com", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadIdentityConfig {
    /// Service account CI jobs impersonate
    pub service_account: String,
    pub pool: String,
    pub provider: String,
    pub issuer_uri: String,
    pub allowed_audiences: String,
    pub attribute_mapping: String,
    /// Numeric GitLab group id
    pub namespace_id: String,
    /// GitLab project path ("group/project")
    pub project_path: String,
    /// Branch whose pipelines may impersonate the service account
    pub branch: String,
    /// Numeric project number used in principal identifiers
    pub project_number: String,
}

impl Default for WorkloadIdentityConfig {
    fn default() -> Self {
        Self {
            service_account: "terraform-service-account".to_string(),
            pool: "gitlab-pool-1".to_string(),
            provider: "gitlab-provider-1".to_string(),
            issuer_uri: "https://gitlab.com".to_string(),
            allowed_audiences: "https://gitlab.com".to_string(),
            attribute_mapping: [
                "attribute.guest_access=assertion.guest_access",
                "attribute.planner_access=assertion.planner_access",
                "attribute.reporter_access=assertion.reporter_access",
                "attribute.developer_access=assertion.developer_access",
                "attribute.maintainer_access=assertion.maintainer_access",
                "attribute.owner_access=assertion.owner_access",
                "attribute.namespace_id=assertion.namespace_id",
                "attribute.namespace_path=assertion.namespace_path",
                "attribute.project_id=assertion.project_id",
                "attribute.project_path=assertion.project_path",
                "attribute.user_id=assertion.user_id",
                "attribute.user_login=assertion.user_login",
                "attribute.user_email=assertion.user_email",
                "attribute.user_access_level=assertion.user_access_level",
                "google.subject=assertion.sub",
            ]
            .join(","),
            namespace_id: String::new(),
            project_path: String::new(),
            branch: "main".to_string(),
            project_number: String::new(),
        }
    }
}

impl WorkloadIdentityConfig {
    pub fn attribute_condition(&self) -> String {
        format!(
            "assertion.namespace_id=='{}' && assertion.project_path=='{}'",
            self.namespace_id, self.project_path
        )
    }

    /// Principal for pipelines on the configured branch.
    pub fn branch_principal(&self) -> String {
        format!(
            "principal://iam.googleapis.com/projects/{}/locations/global/workloadIdentityPools/{}/subject/project_path:{}:ref_type:branch:ref:{}",
            self.project_number, self.pool, self.project_path, self.branch
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// VPC name (env: `NETWORK_NAME`)
    pub name: String,
    pub description: String,
    /// Subnetwork name (env: `SUBNETWORK_NAME`)
    pub subnetwork: String,
    /// Subnetwork primary range (env: `CIDR_RANGE`)
    pub cidr_range: String,
    pub router: String,
    pub nat: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: "custom-vpc-network".to_string(),
            description: "Custom VPC for GKE".to_string(),
            subnetwork: "custom-subnetwork".to_string(),
            cidr_range: "10.0.0.0/16".to_string(),
            router: "nat-router".to_string(),
            nat: "nat-config".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRuleConfig {
    pub name: String,
    pub priority: u32,
    pub source_ranges: Vec<String>,
    #[serde(default)]
    pub target_tags: Vec<String>,
    pub allowed: Vec<AllowedConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedConfig {
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
}

impl AllowedConfig {
    fn new(protocol: &str, ports: &[&str]) -> Self {
        Self {
            protocol: protocol.to_string(),
            ports: strings(ports),
        }
    }
}

fn rule(
    name: &str,
    priority: u32,
    source: &str,
    tag: &str,
    allowed: Vec<AllowedConfig>,
) -> FirewallRuleConfig {
    FirewallRuleConfig {
        name: name.to_string(),
        priority,
        source_ranges: vec![source.to_string()],
        target_tags: vec![tag.to_string()],
        allowed,
    }
}

fn default_firewall_rules() -> Vec<FirewallRuleConfig> {
    vec![
        rule(
            "custom-allow-icmp",
            65534,
            "0.0.0.0/0",
            "custom",
            vec![AllowedConfig::new("icmp", &[])],
        ),
        rule(
            "custom-allow-internal",
            65534,
            "10.128.0.0/9",
            "custom",
            vec![
                AllowedConfig::new("tcp", &["0-65535"]),
                AllowedConfig::new("udp", &["0-65535"]),
                AllowedConfig::new("icmp", &[]),
            ],
        ),
        rule(
            "custom-allow-rdp",
            65534,
            "0.0.0.0/0",
            "custom",
            vec![AllowedConfig::new("tcp", &["3389"])],
        ),
        rule(
            "custom-allow-ssh",
            65534,
            "0.0.0.0/0",
            "custom",
            vec![AllowedConfig::new("tcp", &["22"])],
        ),
        rule(
            "allow-master-to-worker-8443",
            1000,
            "10.0.0.0/16",
            "no-external-ip",
            vec![AllowedConfig::new("tcp", &["8443"])],
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub name: String,
    pub format: String,
    /// Defaults to the region
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            name: "go-microservices-repo".to_string(),
            format: "docker".to_string(),
            location: None,
        }
    }
}

/// A secret and where its value comes from. Values never live in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretConfig {
    pub name: String,
    /// Environment variable holding the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    /// File holding the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl SecretConfig {
    fn from_env(name: &str) -> Self {
        Self {
            name: name.to_string(),
            env: Some(name.replace('-', "_").to_uppercase()),
            file: None,
        }
    }
}

fn default_secrets() -> Vec<SecretConfig> {
    [
        "postgres-user",
        "postgres-password",
        "postgres-db",
        "mongo-user",
        "mongo-password",
        "mailer-username",
        "mailer-password",
        "user-email",
        "user-password",
        "pgadmin-user",
        "pgadmin-password",
    ]
    .into_iter()
    .map(SecretConfig::from_env)
    .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub display_name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Path to the local monitoring chart
    pub chart: String,
    pub release: String,
    pub namespace: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            chart: "config/helm-monitoring-chart".to_string(),
            release: "monitoring".to_string(),
            namespace: "monitoring".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub repo_name: String,
    pub repo_url: String,
    pub namespace: String,
    /// Namespace labelled for sidecar injection
    pub app_namespace: String,
    /// Percentage of requests traced
    pub tracing_sampling: f64,
    /// Delete pods in the app namespace so they come back with sidecars
    pub restart_pods: bool,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            repo_name: "istio".to_string(),
            repo_url: "https://istio-release.storage.googleapis.com/charts".to_string(),
            namespace: "istio-system".to_string(),
            app_namespace: "default".to_string(),
            tracing_sampling: 100.0,
            restart_pods: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscalerConfig {
    pub manifests: Vec<String>,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        let base = "https://raw.githubusercontent.com/kubernetes/autoscaler/vpa-release-1.0/vertical-pod-autoscaler/deploy";
        Self {
            manifests: [
                "vpa-v1-crd-gen.yaml",
                "vpa-rbac.yaml",
                "updater-deployment.yaml",
                "recommender-deployment.yaml",
                "admission-controller-deployment.yaml",
            ]
            .iter()
            .map(|m| format!("{base}/{m}"))
            .collect(),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl GkforgeConfig {
    /// Load the config file. A missing file means all defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}; using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid TOML format in {}", path.display()))
    }

    /// Write the config, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Could not write {}", path.display()))?;
        Ok(())
    }

    /// Apply `REGION`, `NETWORK_NAME`, `SUBNETWORK_NAME`, `CIDR_RANGE` and
    /// `CLOUDSDK_CORE_PROJECT` (only when no project is set).
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(region) = env("REGION") {
            self.region = region;
        }
        if let Some(name) = env("NETWORK_NAME") {
            self.network.name = name;
        }
        if let Some(name) = env("SUBNETWORK_NAME") {
            self.network.subnetwork = name;
        }
        if let Some(range) = env("CIDR_RANGE") {
            self.network.cidr_range = range;
        }
        if self.project.is_none() {
            self.project = env("CLOUDSDK_CORE_PROJECT");
        }
    }

    /// The project to operate on.
    pub fn project(&self) -> Result<&str> {
        self.project.as_deref().context(
            "No project configured. Pass --project, set GKFORGE_PROJECT, or add `project` to gkforge.toml",
        )
    }

    pub fn registry_location(&self) -> &str {
        self.registry.location.as_deref().unwrap_or(&self.region)
    }

    pub fn wait_config(&self) -> WaitConfig {
        let read_retry = if self.wait.read_retries == 0 {
            RetryConfig::no_retry()
        } else {
            RetryConfig::new(
                self.wait.read_retries.saturating_add(1),
                Duration::from_secs(2),
                2.0,
            )
        };
        WaitConfig {
            interval: Duration::from_secs(self.wait.interval_secs),
            timeout: Duration::from_secs(self.wait.timeout_secs),
            read_retry,
        }
    }

    pub fn patterns(&self) -> Patterns {
        Patterns::default().extend(
            self.patterns.not_found.iter().cloned(),
            self.patterns.already_exists.iter().cloned(),
        )
    }

    /// Reject values the cloud would reject, before any external call.
    pub fn validate(&self) -> Result<()> {
        if let Some(project) = &self.project {
            check_project_id(project)?;
        }
        check_label("region", &self.region, &DNS_LABEL)?;

        if self.wait.interval_secs == 0 {
            bail!("wait.interval_secs must be greater than zero");
        }
        if self.wait.timeout_secs == 0 {
            bail!("wait.timeout_secs must be greater than zero");
        }

        for sa in &self.service_accounts {
            check_label("service account", &sa.name, &RFC1035_LABEL)?;
            if !(6..=30).contains(&sa.name.len()) {
                bail!(
                    "service account '{}' must be 6-30 characters long",
                    sa.name
                );
            }
        }

        if let Some(wi) = &self.workload_identity {
            wi.validate()?;
        }

        let net = &self.network;
        check_label("network", &net.name, &RFC1035_LABEL)?;
        check_label("subnetwork", &net.subnetwork, &RFC1035_LABEL)?;
        check_label("router", &net.router, &RFC1035_LABEL)?;
        check_label("nat", &net.nat, &RFC1035_LABEL)?;
        check_cidr(&net.cidr_range).context("Invalid network.cidr_range")?;

        for rule in &self.firewall {
            rule.validate()
                .with_context(|| format!("Invalid firewall rule '{}'", rule.name))?;
        }

        check_label("registry", &self.registry.name, &RFC1035_LABEL)?;

        for secret in &self.secrets {
            check_secret_name(&secret.name)?;
            match (&secret.env, &secret.file) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => bail!(
                    "Secret '{}' needs exactly one of `env` or `file`",
                    secret.name
                ),
            }
        }

        for channel in &self.channels {
            if channel.display_name.trim().is_empty() {
                bail!("Notification channel display_name must not be empty");
            }
            if !channel.email.contains('@') {
                bail!(
                    "Notification channel '{}' has an invalid email '{}'",
                    channel.display_name,
                    channel.email
                );
            }
        }

        check_label("monitoring namespace", &self.monitoring.namespace, &DNS_LABEL)?;
        check_label("mesh namespace", &self.mesh.namespace, &DNS_LABEL)?;
        check_label("app namespace", &self.mesh.app_namespace, &DNS_LABEL)?;
        if !(0.0..=100.0).contains(&self.mesh.tracing_sampling) {
            bail!("mesh.tracing_sampling must be between 0 and 100");
        }

        Ok(())
    }
}

impl WorkloadIdentityConfig {
    fn validate(&self) -> Result<()> {
        check_label("workload identity pool", &self.pool, &RFC1035_LABEL)?;
        check_label("workload identity provider", &self.provider, &RFC1035_LABEL)?;
        if self.namespace_id.is_empty() || !self.namespace_id.chars().all(|c| c.is_ascii_digit()) {
            bail!("workload_identity.namespace_id must be the numeric GitLab group id");
        }
        if !self.project_path.contains('/') {
            bail!("workload_identity.project_path must look like 'group/project'");
        }
        if self.project_number.is_empty()
            || !self.project_number.chars().all(|c| c.is_ascii_digit())
        {
            bail!("workload_identity.project_number must be the numeric project number");
        }
        Ok(())
    }
}

impl FirewallRuleConfig {
    fn validate(&self) -> Result<()> {
        check_label("firewall rule", &self.name, &RFC1035_LABEL)?;
        if self.priority > 65535 {
            bail!("priority must be 0-65535");
        }
        if self.source_ranges.is_empty() {
            bail!("at least one source range is required");
        }
        for range in &self.source_ranges {
            check_cidr(range)?;
        }
        if self.allowed.is_empty() {
            bail!("at least one allowed protocol is required");
        }
        Ok(())
    }
}

fn check_label(what: &str, value: &str, pattern: &Regex) -> Result<()> {
    if pattern.is_match(value) {
        Ok(())
    } else {
        bail!("Invalid {what} name '{value}': use lowercase letters, digits and hyphens")
    }
}

fn check_project_id(project: &str) -> Result<()> {
    if (6..=30).contains(&project.len()) && RFC1035_LABEL.is_match(project) {
        Ok(())
    } else {
        bail!("Invalid project id '{project}'")
    }
}

/// Secret Manager ids: letters, digits, `-` and `_`, at most 255.
pub fn check_secret_name(name: &str) -> Result<()> {
    if !SECRET_NAME.is_match(name) {
        bail!("Invalid secret name '{name}'");
    }
    Ok(())
}

/// Accepts IPv4 CIDR notation such as `10.0.0.0/16`.
pub fn check_cidr(range: &str) -> Result<()> {
    let caps = IPV4_CIDR
        .captures(range)
        .with_context(|| format!("'{range}' is not IPv4 CIDR notation"))?;

    for i in 1..=4 {
        let octet: u16 = caps[i].parse()?;
        if octet > 255 {
            bail!("'{range}' has an octet above 255");
        }
    }
    let prefix: u8 = caps[5].parse()?;
    if prefix > 32 {
        bail!("'{range}' has a prefix longer than 32");
    }
    Ok(())
}
