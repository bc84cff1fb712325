//! Secret Manager through gcloud.

use provision::{CommandSpec, Context, Runner, SecretStore};
use std::path::Path;
use std::sync::Arc;

pub struct GcloudSecretStore {
    runner: Arc<dyn Runner>,
}

impl GcloudSecretStore {
    pub fn new(runner: Arc<dyn Runner>) -> Self {
        Self { runner }
    }

    fn secrets(ctx: &Context, verb: &str, name: &str) -> CommandSpec {
        ctx.identity.apply(
            CommandSpec::new("gcloud")
                .args(["secrets", verb, name])
                .flag("--project", ctx.project.as_str()),
        )
    }
}

impl SecretStore for GcloudSecretStore {
    fn describe(&self, ctx: &Context, name: &str) -> provision::Result<()> {
        self.runner.execute(&Self::secrets(ctx, "describe", name))?;
        Ok(())
    }

    fn delete(&self, ctx: &Context, name: &str) -> provision::Result<()> {
        self.runner
            .execute(&Self::secrets(ctx, "delete", name).arg("--quiet"))?;
        Ok(())
    }

    fn create(&self, ctx: &Context, name: &str, data_file: &Path) -> provision::Result<()> {
        let spec = Self::secrets(ctx, "create", name)
            .arg("--replication-policy=automatic")
            .arg(format!("--data-file={}", data_file.display()));
        self.runner.execute(&spec)?;
        Ok(())
    }
}
