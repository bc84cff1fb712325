//! Access tokens for the REST drivers.
//!
//! Tokens come from `gcloud auth print-access-token` run as the context
//! identity, so REST calls and CLI calls act as the same principal.

use provision::{CommandSpec, Context, Identity, Runner};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Supplies OAuth access tokens for a context.
pub trait TokenSource: Send + Sync {
    fn token(&self, ctx: &Context) -> provision::Result<String>;
}

/// Token source backed by the gcloud CLI. Tokens are cached per identity
/// for the life of the process; a run is much shorter than token lifetime.
pub struct GcloudTokens {
    runner: Arc<dyn Runner>,
    cache: Mutex<HashMap<Identity, String>>,
}

impl GcloudTokens {
    pub fn new(runner: Arc<dyn Runner>) -> Self {
        Self {
            runner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn command(identity: &Identity) -> CommandSpec {
        identity.apply(CommandSpec::new("gcloud").args(["auth", "print-access-token"]))
    }
}

impl TokenSource for GcloudTokens {
    fn token(&self, ctx: &Context) -> provision::Result<String> {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(token) = cache.get(&ctx.identity) {
            return Ok(token.clone());
        }

        let result = self.runner.execute(&Self::command(&ctx.identity))?;
        let token = result.stdout.trim().to_string();
        if token.is_empty() {
            return Err(provision::Error::Other(
                "gcloud printed an empty access token".to_string(),
            ));
        }
        log::debug!("obtained access token for {:?}", ctx.identity);
        cache.insert(ctx.identity.clone(), token.clone());
        Ok(token)
    }
}
