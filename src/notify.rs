use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

use crate::report::ChangeSummary;

const EMBED_DESCRIPTION_LIMIT: usize = 4000;

/// Discord-style webhook payload, also accepted by most chat relays.
pub fn webhook_payload(changes: &ChangeSummary, link: Option<&str>) -> Value {
    let color = if changes.offline_count() > 0 { 0xE74C3C } else { 0x2ECC71 };
    let description: String = changes.body(link).chars().take(EMBED_DESCRIPTION_LIMIT).collect();
    let mut fields = vec![
        json!({ "name": "New Offline", "value": changes.offline_count().to_string(), "inline": true }),
        json!({ "name": "New Online", "value": changes.online_count().to_string(), "inline": true }),
    ];
    let first_seen = changes.first_seen_count();
    if first_seen > 0 {
        fields.push(json!({ "name": "First Seen", "value": first_seen.to_string(), "inline": true }));
    }
    json!({
        "username": "Reachwatch",
        "embeds": [{
            "title": changes.title(),
            "description": description,
            "color": color,
            "fields": fields,
            "timestamp": Utc::now().to_rfc3339(),
            "footer": { "text": "Reachwatch status transitions" }
        }]
    })
}

/// Client for webhook delivery; `timeout` bounds the whole request.
pub fn webhook_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

pub async fn send_webhook(
    client: &reqwest::Client,
    url: &str,
    changes: &ChangeSummary,
    link: Option<&str>,
) -> Result<(), reqwest::Error> {
    client
        .post(url)
        .json(&webhook_payload(changes, link))
        .send()
        .await?
        .error_for_status()?;
    info!("Notification delivered: {}", changes.title());
    Ok(())
}
