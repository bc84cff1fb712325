//! Per-kind drivers and the registry wiring them to resource kinds.

pub mod compute;
pub mod gcloud;
pub mod kube;
pub mod monitoring;
pub mod secrets;

use crate::api::ApiClient;
use provision::{CommandBuilder, CommandDriver, Driver, Registry, ResourceKind, Runner};
use std::sync::Arc;

/// Registry with a driver for every kind gkforge provisions.
pub fn build_registry(runner: &Arc<dyn Runner>, api: &ApiClient) -> Registry {
    let mut registry = Registry::new();

    let cli = [
        (ResourceKind::ServiceApi, command(runner, gcloud::ServiceApiBuilder)),
        (ResourceKind::ServiceAccount, command(runner, gcloud::ServiceAccountBuilder)),
        (ResourceKind::ProjectIamBinding, command(runner, gcloud::ProjectBindingBuilder)),
        (ResourceKind::ServiceAccountIamBinding, command(runner, gcloud::AccountBindingBuilder)),
        (ResourceKind::WorkloadIdentityPool, command(runner, gcloud::PoolBuilder)),
        (ResourceKind::WorkloadIdentityProvider, command(runner, gcloud::ProviderBuilder)),
        (ResourceKind::Router, command(runner, gcloud::RouterBuilder)),
        (ResourceKind::RouterNat, command(runner, gcloud::RouterNatBuilder)),
        (ResourceKind::ArtifactRepository, command(runner, gcloud::ArtifactRepositoryBuilder)),
        (ResourceKind::Namespace, command(runner, kube::NamespaceBuilder)),
        (ResourceKind::HelmRepository, command(runner, kube::HelmRepositoryBuilder)),
        (ResourceKind::HelmRelease, command(runner, kube::HelmReleaseBuilder)),
        (ResourceKind::Manifest, command(runner, kube::ManifestBuilder)),
    ];
    for (kind, driver) in cli {
        registry.register(kind, driver);
    }

    registry.register_all(
        &[
            ResourceKind::Network,
            ResourceKind::Subnetwork,
            ResourceKind::FirewallRule,
        ],
        Arc::new(compute::ComputeDriver::new(api.clone())),
    );
    registry.register(
        ResourceKind::NotificationChannel,
        Arc::new(monitoring::ChannelDriver::new(api.clone())),
    );

    registry
}

fn command<B: CommandBuilder + 'static>(runner: &Arc<dyn Runner>, builder: B) -> Arc<dyn Driver> {
    Arc::new(CommandDriver::new(Arc::clone(runner), builder))
}
