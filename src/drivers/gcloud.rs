//! gcloud-backed command builders.
//!
//! Every command carries `--project` and the context identity flags.

use provision::{CommandBuilder, CommandSpec, Context, Error, ResourceDescriptor, Result};
use serde::{Deserialize, Serialize};

fn gcloud(ctx: &Context, desc: &ResourceDescriptor, args: &[&str]) -> CommandSpec {
    ctx.identity.apply(
        CommandSpec::new("gcloud")
            .args(args.iter().copied())
            .flag("--project", ctx.project_for(desc)),
    )
}

fn no_lookup(desc: &ResourceDescriptor) -> Error {
    Error::Other(format!("{} has no lookup command", desc.label()))
}

/// Service APIs. `services enable` is idempotent, so there is no lookup.
pub struct ServiceApiBuilder;

impl CommandBuilder for ServiceApiBuilder {
    fn has_lookup(&self, _desc: &ResourceDescriptor) -> bool {
        false
    }

    fn describe(&self, _ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        Err(no_lookup(desc))
    }

    fn create(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        Ok(gcloud(ctx, desc, &["services", "enable", desc.name.as_str()]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccountPayload {
    pub display_name: String,
}

pub struct ServiceAccountBuilder;

impl ServiceAccountBuilder {
    fn email(ctx: &Context, desc: &ResourceDescriptor) -> String {
        format!(
            "{}@{}.iam.gserviceaccount.com",
            desc.name,
            ctx.project_for(desc)
        )
    }
}

impl CommandBuilder for ServiceAccountBuilder {
    fn describe(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        let email = Self::email(ctx, desc);
        Ok(gcloud(ctx, desc, &["iam", "service-accounts", "describe", email.as_str()]))
    }

    fn create(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        let payload: ServiceAccountPayload = desc.payload_as()?;
        Ok(
            gcloud(ctx, desc, &["iam", "service-accounts", "create", desc.name.as_str()])
                .flag("--display-name", payload.display_name),
        )
    }
}

/// A role granted to a member, on the project or on a service account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingPayload {
    pub member: String,
    pub role: String,
    /// Service account email for account-level bindings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

/// `add-iam-policy-binding` is idempotent; no lookup.
pub struct ProjectBindingBuilder;

impl CommandBuilder for ProjectBindingBuilder {
    fn has_lookup(&self, _desc: &ResourceDescriptor) -> bool {
        false
    }

    fn describe(&self, _ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        Err(no_lookup(desc))
    }

    fn create(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        let payload: BindingPayload = desc.payload_as()?;
        let project = ctx.project_for(desc).to_string();
        Ok(ctx.identity.apply(
            CommandSpec::new("gcloud")
                .args(["projects", "add-iam-policy-binding", project.as_str()])
                .flag("--member", payload.member)
                .flag("--role", payload.role)
                .arg("--condition=None"),
        ))
    }
}

pub struct AccountBindingBuilder;

impl CommandBuilder for AccountBindingBuilder {
    fn has_lookup(&self, _desc: &ResourceDescriptor) -> bool {
        false
    }

    fn describe(&self, _ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        Err(no_lookup(desc))
    }

    fn create(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        let payload: BindingPayload = desc.payload_as()?;
        let account = payload.account.ok_or_else(|| Error::MissingScope {
            kind: desc.kind,
            name: desc.name.clone(),
            field: "service account",
        })?;
        Ok(gcloud(
            ctx,
            desc,
            &["iam", "service-accounts", "add-iam-policy-binding", account.as_str()],
        )
        .flag("--role", payload.role)
        .flag("--member", payload.member))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolPayload {
    pub display_name: String,
}

pub struct PoolBuilder;

impl CommandBuilder for PoolBuilder {
    fn describe(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        Ok(
            gcloud(ctx, desc, &["iam", "workload-identity-pools", "describe", desc.name.as_str()])
                .flag("--location", "global"),
        )
    }

    fn create(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        let payload: PoolPayload = desc.payload_as()?;
        Ok(
            gcloud(ctx, desc, &["iam", "workload-identity-pools", "create", desc.name.as_str()])
                .flag("--location", "global")
                .flag("--display-name", payload.display_name),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPayload {
    pub pool: String,
    pub display_name: String,
    pub issuer_uri: String,
    pub attribute_mapping: String,
    pub attribute_condition: String,
    pub allowed_audiences: String,
}

/// OIDC provider inside a workload identity pool.
pub struct ProviderBuilder;

impl CommandBuilder for ProviderBuilder {
    fn describe(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        let payload: ProviderPayload = desc.payload_as()?;
        Ok(gcloud(
            ctx,
            desc,
            &["iam", "workload-identity-pools", "providers", "describe", desc.name.as_str()],
        )
        .flag("--location", "global")
        .flag("--workload-identity-pool", payload.pool))
    }

    fn create(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        let payload: ProviderPayload = desc.payload_as()?;
        Ok(gcloud(
            ctx,
            desc,
            &["iam", "workload-identity-pools", "providers", "create-oidc", desc.name.as_str()],
        )
        .flag("--location", "global")
        .flag("--workload-identity-pool", payload.pool)
        .flag("--issuer-uri", payload.issuer_uri)
        .flag("--display-name", payload.display_name)
        .flag("--attribute-mapping", payload.attribute_mapping)
        .flag("--attribute-condition", payload.attribute_condition)
        .flag("--allowed-audiences", payload.allowed_audiences))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterPayload {
    pub network: String,
}

pub struct RouterBuilder;

impl CommandBuilder for RouterBuilder {
    fn describe(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        Ok(
            gcloud(ctx, desc, &["compute", "routers", "describe", desc.name.as_str()])
                .flag("--region", desc.region()?),
        )
    }

    fn create(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        let payload: RouterPayload = desc.payload_as()?;
        Ok(
            gcloud(ctx, desc, &["compute", "routers", "create", desc.name.as_str()])
                .flag("--region", desc.region()?)
                .flag("--network", payload.network),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatPayload {
    pub router: String,
}

/// NAT on a Cloud Router: auto-allocated external IPs for every subnet
/// range, logging errors only.
pub struct RouterNatBuilder;

impl CommandBuilder for RouterNatBuilder {
    fn describe(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        let payload: NatPayload = desc.payload_as()?;
        Ok(
            gcloud(ctx, desc, &["compute", "routers", "nats", "describe", desc.name.as_str()])
                .flag("--router", payload.router)
                .flag("--region", desc.region()?),
        )
    }

    fn create(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        let payload: NatPayload = desc.payload_as()?;
        Ok(
            gcloud(ctx, desc, &["compute", "routers", "nats", "create", desc.name.as_str()])
                .flag("--router", payload.router)
                .flag("--region", desc.region()?)
                .args([
                    "--auto-allocate-nat-external-ips",
                    "--nat-all-subnet-ip-ranges",
                    "--enable-logging",
                ])
                .flag("--log-filter", "ERRORS_ONLY"),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryPayload {
    pub format: String,
}

/// Artifact Registry repository; the scope region is its location.
pub struct ArtifactRepositoryBuilder;

impl CommandBuilder for ArtifactRepositoryBuilder {
    fn describe(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        Ok(
            gcloud(ctx, desc, &["artifacts", "repositories", "describe", desc.name.as_str()])
                .flag("--location", desc.region()?),
        )
    }

    fn create(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<CommandSpec> {
        let payload: RepositoryPayload = desc.payload_as()?;
        Ok(
            gcloud(ctx, desc, &["artifacts", "repositories", "create", desc.name.as_str()])
                .arg(format!("--repository-format={}", payload.format))
                .flag("--location", desc.region()?),
        )
    }
}
