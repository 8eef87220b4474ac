//! Fleet REST endpoints: outputs and enrollment API keys.

use serde::{Deserialize, Serialize};

use super::{HttpApi, Result};

/// A Fleet output, as sent and as returned.
///
/// `ssl.key` is accepted on write but never returned.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Output {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub output_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_trusted_fingerprint: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_default_monitoring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_yaml: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl: Option<OutputSsl>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OutputSsl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authorities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutputEnvelope {
    item: Output,
}

pub async fn create_output(api: &HttpApi, output: &Output) -> Result<Output> {
    let envelope: OutputEnvelope = api.post(&["api", "fleet", "outputs"], output).await?;
    Ok(envelope.item)
}

/// Fetch an output; `None` when it does not exist.
pub async fn get_output(api: &HttpApi, id: &str) -> Result<Option<Output>> {
    let envelope: Option<OutputEnvelope> = api.get_optional(&["api", "fleet", "outputs", id]).await?;
    Ok(envelope.map(|e| e.item))
}

pub async fn update_output(api: &HttpApi, id: &str, output: &Output) -> Result<Output> {
    let envelope: OutputEnvelope = api.put(&["api", "fleet", "outputs", id], output).await?;
    Ok(envelope.item)
}

pub async fn delete_output(api: &HttpApi, id: &str) -> Result<()> {
    api.delete(&["api", "fleet", "outputs", id], &[]).await
}

/// An enrollment API key.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EnrollmentApiKey {
    pub id: String,
    pub api_key_id: String,
    pub api_key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub policy_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnrollmentApiKeyPage {
    #[serde(default)]
    items: Vec<EnrollmentApiKey>,
    #[serde(default)]
    total: usize,
}

const PAGE_SIZE: usize = 100;

/// List enrollment API keys, optionally restricted to one agent policy.
pub async fn list_enrollment_api_keys(
    api: &HttpApi,
    policy_id: Option<&str>,
) -> Result<Vec<EnrollmentApiKey>> {
    let mut keys = Vec::new();
    let mut page = 1usize;

    loop {
        let mut query = vec![
            ("page", page.to_string()),
            ("perPage", PAGE_SIZE.to_string()),
        ];
        if let Some(policy_id) = policy_id {
            query.push(("kuery", policy_kuery(policy_id)));
        }

        let batch: EnrollmentApiKeyPage = api
            .get(&["api", "fleet", "enrollment_api_keys"], &query)
            .await?;
        let fetched = batch.items.len();
        keys.extend(batch.items);

        if fetched == 0 || keys.len() >= batch.total {
            break;
        }
        page += 1;
    }

    Ok(keys)
}

/// KQL filter on `policy_id`; quotes and backslashes in the id are escaped.
fn policy_kuery(policy_id: &str) -> String {
    let mut escaped = String::with_capacity(policy_id.len());
    for c in policy_id.chars() {
        if c == '"' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("policy_id:\"{}\"", escaped)
}
