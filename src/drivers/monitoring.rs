//! Cloud Monitoring e-mail notification channels.
//!
//! Channels have server-assigned ids, so the display name is the identity:
//! the lookup lists the project's channels and matches on it.

use crate::api::{ApiClient, MONITORING_BASE};
use provision::{
    Context, Driver, ExecutionError, OperationHandle, ResourceDescriptor, Result, Status,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPayload {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelPage {
    #[serde(default)]
    notification_channels: Vec<Channel>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Channel {
    name: String,
    #[serde(default)]
    display_name: String,
}

pub struct ChannelDriver {
    api: ApiClient,
    base: String,
}

impl ChannelDriver {
    pub fn new(api: ApiClient) -> Self {
        Self::with_api_base(api, MONITORING_BASE)
    }

    pub fn with_api_base(api: ApiClient, base: impl Into<String>) -> Self {
        Self {
            api,
            base: base.into(),
        }
    }

    fn collection_url(&self, ctx: &Context, desc: &ResourceDescriptor) -> String {
        format!(
            "{}/projects/{}/notificationChannels",
            self.base,
            ctx.project_for(desc)
        )
    }

    /// Resource name of the channel with this display name, if any.
    fn find(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<Option<String>> {
        let collection = self.collection_url(ctx, desc);
        let mut page_token: Option<String> = None;
        loop {
            let url = match &page_token {
                Some(token) => format!("{collection}?pageToken={}", urlencoding::encode(token)),
                None => collection.clone(),
            };
            let page: ChannelPage = serde_json::from_value(self.api.get(ctx, &url)?)
                .map_err(|e| provision::Error::Other(format!("unexpected reply from {url}: {e}")))?;

            if let Some(channel) = page
                .notification_channels
                .into_iter()
                .find(|c| c.display_name == desc.name)
            {
                return Ok(Some(channel.name));
            }
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => return Ok(None),
            }
        }
    }
}

impl Driver for ChannelDriver {
    fn describe(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<()> {
        match self.find(ctx, desc)? {
            Some(name) => {
                log::debug!("{} is {name}", desc.label());
                Ok(())
            }
            None => Err(ExecutionError {
                command: format!("GET {}", self.collection_url(ctx, desc)),
                status: Status::Http(404),
                stderr: format!("no notification channel named '{}'", desc.name),
            }
            .into()),
        }
    }

    fn create(&self, ctx: &Context, desc: &ResourceDescriptor) -> Result<Option<OperationHandle>> {
        let payload: ChannelPayload = desc.payload_as()?;
        let body = json!({
            "type": "email",
            "displayName": desc.name,
            "labels": { "email_address": payload.email },
        });
        let created = self.api.post(ctx, &self.collection_url(ctx, desc), body)?;
        if let Some(name) = created.get("name").and_then(|n| n.as_str()) {
            log::debug!("{} created as {name}", desc.label());
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{ScriptedTransport, StaticToken};
    use provision::{CreationOutcome, Detection, NoReport, Provisioner, Registry, ResourceKind};
    use std::sync::Arc;

    const BASE: &str = "https://monitoring.test/v3";

    fn provisioner(transport: &Arc<ScriptedTransport>) -> Provisioner {
        let api = ApiClient::new(transport.clone(), Arc::new(StaticToken));
        let mut registry = Registry::new();
        registry.register(
            ResourceKind::NotificationChannel,
            Arc::new(ChannelDriver::with_api_base(api, BASE)),
        );
        Provisioner::new(registry).with_reporter(Arc::new(NoReport))
    }

    fn channel() -> ResourceDescriptor {
        ResourceDescriptor::new(ResourceKind::NotificationChannel, "System Handling Alerts")
            .with_payload(&ChannelPayload {
                email: "system-alerts@example.com".to_string(),
            })
    }

    #[test]
    fn test_existing_channel_matched_across_pages() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(
                200,
                r#"{"notificationChannels": [{"name": "projects/p/notificationChannels/1", "displayName": "Event Handling Alerts"}], "nextPageToken": "abc"}"#,
            )
            .push(
                200,
                r#"{"notificationChannels": [{"name": "projects/p/notificationChannels/2", "displayName": "System Handling Alerts"}]}"#,
            );

        let ensured = provisioner(&transport)
            .ensure(&Context::new("p"), &channel())
            .unwrap();
        assert_eq!(
            ensured.outcome,
            CreationOutcome::AlreadyPresent {
                detected_by: Detection::Probe
            }
        );
        assert_eq!(
            transport.calls(),
            vec![
                format!("GET {BASE}/projects/p/notificationChannels"),
                format!("GET {BASE}/projects/p/notificationChannels?pageToken=abc"),
            ]
        );
    }

    #[test]
    fn test_page_token_is_encoded() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(200, r#"{"notificationChannels": [], "nextPageToken": "a+b/c="}"#)
            .push(200, "{}")
            .push(200, r#"{"name": "projects/p/notificationChannels/4"}"#);

        provisioner(&transport)
            .ensure(&Context::new("p"), &channel())
            .unwrap();
        assert_eq!(
            transport.calls()[1],
            format!("GET {BASE}/projects/p/notificationChannels?pageToken=a%2Bb%2Fc%3D")
        );
    }

    #[test]
    fn test_missing_channel_is_created() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(200, "{}")
            .push(200, r#"{"name": "projects/p/notificationChannels/3"}"#);

        let ensured = provisioner(&transport)
            .ensure(&Context::new("p"), &channel())
            .unwrap();
        assert_eq!(ensured.outcome, CreationOutcome::Created);

        let body = transport.requests()[1].body.clone().unwrap();
        assert_eq!(body["type"], "email");
        assert_eq!(body["displayName"], "System Handling Alerts");
        assert_eq!(body["labels"]["email_address"], "system-alerts@example.com");
    }

    #[test]
    fn test_list_failure_is_probe_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(403, r#"{"error": {"code": 403, "status": "PERMISSION_DENIED"}}"#);

        let err = provisioner(&transport)
            .ensure(&Context::new("p"), &channel())
            .unwrap_err();
        assert!(matches!(err, provision::Error::Probe { .. }));
    }
}
