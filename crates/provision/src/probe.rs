//! Existence Prober.
//!
//! A lookup that succeeds means the resource exists; a lookup that fails
//! with a recognized "not found" signal means it does not. Any other
//! failure is ambiguous and surfaces as [`Error::Probe`], so a permission
//! error or an outage is never mistaken for "safe to create".

use crate::classify::Patterns;
use crate::context::Context;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::types::ResourceDescriptor;

/// Check whether the described resource exists.
///
/// Returns `None` when the driver has no cheap lookup for this descriptor;
/// the caller then goes straight to the create call.
pub fn exists(
    driver: &dyn Driver,
    ctx: &Context,
    desc: &ResourceDescriptor,
    patterns: &Patterns,
) -> Result<Option<bool>> {
    if !driver.has_lookup(desc) {
        return Ok(None);
    }

    match driver.describe(ctx, desc) {
        Ok(()) => Ok(Some(true)),
        Err(e) if e.execution().is_some_and(|x| patterns.is_not_found(x)) => {
            log::debug!("{} not found", desc.label());
            Ok(Some(false))
        }
        Err(e) => Err(Error::Probe {
            kind: desc.kind,
            name: desc.name.clone(),
            source: Box::new(e),
        }),
    }
}
