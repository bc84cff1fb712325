//! Cluster-side resources through kubectl and helm.

use provision::{CommandBuilder, CommandSpec, Context, Error, ResourceDescriptor, Result};
use serde::{Deserialize, Serialize};

fn no_lookup(desc: &ResourceDescriptor) -> Error {
    Error::Other(format!("{} has no lookup command", desc.label()))
}

pub struct NamespaceBuilder;

impl CommandBuilder for NamespaceBuilder {
    fn describe(&self, _ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        Ok(CommandSpec::new("kubectl").args(["get", "namespace", desc.name.as_str()]))
    }

    fn create(&self, _ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        Ok(CommandSpec::new("kubectl").args(["create", "namespace", desc.name.as_str()]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmRepositoryPayload {
    pub url: String,
}

/// `helm repo add` succeeds for an identical existing entry and reports
/// "already exists" for a different one, so it needs no lookup.
pub struct HelmRepositoryBuilder;

impl CommandBuilder for HelmRepositoryBuilder {
    fn has_lookup(&self, _desc: &ResourceDescriptor) -> bool {
        false
    }

    fn describe(&self, _ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        Err(no_lookup(desc))
    }

    fn create(&self, _ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        let payload: HelmRepositoryPayload = desc.payload_as()?;
        Ok(CommandSpec::new("helm").args(["repo", "add", desc.name.as_str(), payload.url.as_str()]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmReleasePayload {
    /// Chart reference (`repo/chart`) or local chart path
    pub chart: String,
    /// `--set` values, in order
    #[serde(default)]
    pub set: Vec<(String, String)>,
    /// Always run `helm upgrade --install` instead of installing once
    #[serde(default)]
    pub upgrade: bool,
}

fn namespace(desc: &ResourceDescriptor) -> Result<&str> {
    desc.scope
        .namespace
        .as_deref()
        .ok_or_else(|| Error::MissingScope {
            kind: desc.kind,
            name: desc.name.clone(),
            field: "namespace",
        })
}

/// Helm releases. Install-once releases are looked up with `helm status`;
/// upgrade releases are applied every run.
pub struct HelmReleaseBuilder;

impl CommandBuilder for HelmReleaseBuilder {
    fn has_lookup(&self, desc: &ResourceDescriptor) -> bool {
        desc.payload_as::<HelmReleasePayload>()
            .map(|p| !p.upgrade)
            .unwrap_or(true)
    }

    fn describe(&self, _ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        Ok(CommandSpec::new("helm")
            .args(["status", desc.name.as_str()])
            .flag("-n", namespace(desc)?))
    }

    fn create(&self, _ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        let payload: HelmReleasePayload = desc.payload_as()?;
        let spec = if payload.upgrade {
            CommandSpec::new("helm").args(["upgrade", "--install"])
        } else {
            CommandSpec::new("helm").arg("install")
        };
        let mut spec = spec
            .args([desc.name.as_str(), payload.chart.as_str()])
            .flag("-n", namespace(desc)?);
        for (key, value) in &payload.set {
            spec = spec.flag("--set", format!("{key}={value}"));
        }
        Ok(spec)
    }
}

/// Remote manifests applied with `kubectl apply -f`; apply is declarative,
/// so there is no lookup. The descriptor name is the manifest URL.
pub struct ManifestBuilder;

impl CommandBuilder for ManifestBuilder {
    fn has_lookup(&self, _desc: &ResourceDescriptor) -> bool {
        false
    }

    fn describe(&self, _ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        Err(no_lookup(desc))
    }

    fn create(&self, _ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        Ok(CommandSpec::new("kubectl").args(["apply", "-f", desc.name.as_str()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provision::testing::ScriptedRunner;
    use provision::{
        CommandDriver, CreationOutcome, Detection, ExecutionResult, NoReport, Provisioner,
        Registry, ResourceKind,
    };
    use std::sync::Arc;

    fn ctx() -> Context {
        Context::new("p")
    }

    fn istiod() -> ResourceDescriptor {
        ResourceDescriptor::new(ResourceKind::HelmRelease, "istiod")
            .in_namespace("istio-system")
            .with_payload(&HelmReleasePayload {
                chart: "istio/istiod".to_string(),
                set: vec![
                    ("global.proxy.autoInject".to_string(), "enabled".to_string()),
                    ("meshConfig.enableTracing".to_string(), "true".to_string()),
                ],
                upgrade: false,
            })
    }

    #[test]
    fn test_helm_install_with_values() {
        assert!(HelmReleaseBuilder.has_lookup(&istiod()));
        assert_eq!(
            HelmReleaseBuilder.create(&ctx(), &istiod()).unwrap().to_string(),
            "helm install istiod istio/istiod -n istio-system --set global.proxy.autoInject=enabled --set meshConfig.enableTracing=true"
        );
        assert_eq!(
            HelmReleaseBuilder.describe(&ctx(), &istiod()).unwrap().to_string(),
            "helm status istiod -n istio-system"
        );
    }

    #[test]
    fn test_helm_upgrade_release_has_no_lookup() {
        let desc = ResourceDescriptor::new(ResourceKind::HelmRelease, "monitoring")
            .in_namespace("monitoring")
            .with_payload(&HelmReleasePayload {
                chart: "config/helm-monitoring-chart".to_string(),
                set: Vec::new(),
                upgrade: true,
            });
        assert!(!HelmReleaseBuilder.has_lookup(&desc));
        assert_eq!(
            HelmReleaseBuilder.create(&ctx(), &desc).unwrap().to_string(),
            "helm upgrade --install monitoring config/helm-monitoring-chart -n monitoring"
        );
    }

    #[test]
    fn test_release_needs_namespace() {
        let desc = ResourceDescriptor::new(ResourceKind::HelmRelease, "istio-base").with_payload(
            &HelmReleasePayload {
                chart: "istio/base".to_string(),
                set: Vec::new(),
                upgrade: false,
            },
        );
        assert!(matches!(
            HelmReleaseBuilder.create(&ctx(), &desc),
            Err(Error::MissingScope { field: "namespace", .. })
        ));
    }

    #[test]
    fn test_existing_release_is_left_alone() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push(ExecutionResult::ok("NAME: istiod\nSTATUS: deployed"));
        let mut registry = Registry::new();
        registry.register(
            ResourceKind::HelmRelease,
            Arc::new(CommandDriver::new(runner.clone(), HelmReleaseBuilder)),
        );
        let provisioner = Provisioner::new(registry).with_reporter(Arc::new(NoReport));

        let ensured = provisioner.ensure(&ctx(), &istiod()).unwrap();
        assert_eq!(
            ensured.outcome,
            CreationOutcome::AlreadyPresent {
                detected_by: Detection::Probe
            }
        );
        assert_eq!(runner.calls(), vec!["helm status istiod -n istio-system"]);
    }

    #[test]
    fn test_missing_release_is_installed() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push(ExecutionResult::failed(1, "Error: release: not found"));
        runner.push(ExecutionResult::ok("STATUS: deployed"));
        let mut registry = Registry::new();
        registry.register(
            ResourceKind::HelmRelease,
            Arc::new(CommandDriver::new(runner.clone(), HelmReleaseBuilder)),
        );
        let provisioner = Provisioner::new(registry).with_reporter(Arc::new(NoReport));

        let ensured = provisioner.ensure(&ctx(), &istiod()).unwrap();
        assert_eq!(ensured.outcome, CreationOutcome::Created);
        assert_eq!(runner.calls().len(), 2);
        assert!(runner.calls()[1].starts_with("helm install istiod"));
    }

    #[test]
    fn test_namespace_conflict_tolerated() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push(ExecutionResult::failed(
            1,
            "Error from server (NotFound): namespaces \"monitoring\" not found",
        ));
        runner.push(ExecutionResult::failed(
            1,
            "Error from server (AlreadyExists): namespaces \"monitoring\" already exists",
        ));
        let mut registry = Registry::new();
        registry.register(
            ResourceKind::Namespace,
            Arc::new(CommandDriver::new(runner, NamespaceBuilder)),
        );
        let provisioner = Provisioner::new(registry).with_reporter(Arc::new(NoReport));

        let desc = ResourceDescriptor::new(ResourceKind::Namespace, "monitoring");
        let ensured = provisioner.ensure(&ctx(), &desc).unwrap();
        assert_eq!(
            ensured.outcome,
            CreationOutcome::AlreadyPresent {
                detected_by: Detection::Conflict
            }
        );
    }

    #[test]
    fn test_manifest_apply() {
        let desc = ResourceDescriptor::new(
            ResourceKind::Manifest,
            "https://example.test/vpa-rbac.yaml",
        );
        assert!(!ManifestBuilder.has_lookup(&desc));
        assert_eq!(
            ManifestBuilder.create(&ctx(), &desc).unwrap().to_string(),
            "kubectl apply -f https://example.test/vpa-rbac.yaml"
        );
    }
}
