//! Elasticsearch REST endpoints: cluster info, security users, ML jobs.

use std::collections::HashMap;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{HttpApi, Result};

/// Response of `GET /`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ClusterInfo {
    pub name: String,
    pub cluster_name: String,
    pub cluster_uuid: String,
    pub version: ClusterVersion,
    #[serde(default)]
    pub tagline: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ClusterVersion {
    pub number: String,
    #[serde(default)]
    pub build_flavor: String,
    #[serde(default)]
    pub build_type: String,
    #[serde(default)]
    pub build_hash: String,
    #[serde(default)]
    pub build_date: String,
    #[serde(default)]
    pub build_snapshot: bool,
    #[serde(default)]
    pub lucene_version: String,
    #[serde(default)]
    pub minimum_wire_compatibility_version: String,
    #[serde(default)]
    pub minimum_index_compatibility_version: String,
}

pub async fn cluster_info(api: &HttpApi) -> Result<ClusterInfo> {
    api.get(&[], &[]).await
}

// ---------------------------------------------------------------------------
// Security users
// ---------------------------------------------------------------------------

/// Body of `PUT /_security/user/<name>`.
#[derive(Debug, Default, Serialize)]
pub struct PutUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub enabled: bool,
}

/// A user as returned by `GET /_security/user/<name>`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub metadata: Option<Value>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

pub async fn put_user(api: &HttpApi, username: &str, user: &PutUser) -> Result<()> {
    let _: Value = api.put(&["_security", "user", username], user).await?;
    Ok(())
}

/// Fetch a user; `None` when it does not exist.
pub async fn get_user(api: &HttpApi, username: &str) -> Result<Option<User>> {
    let users: Option<HashMap<String, User>> =
        api.get_optional(&["_security", "user", username]).await?;
    Ok(users.and_then(|mut users| users.remove(username)))
}

pub async fn delete_user(api: &HttpApi, username: &str) -> Result<()> {
    api.delete(&["_security", "user", username], &[]).await
}

#[derive(Serialize)]
struct ChangePassword<'a> {
    password: &'a str,
}

pub async fn change_password(api: &HttpApi, username: &str, password: &SecretString) -> Result<()> {
    let body = ChangePassword {
        password: password.expose_secret(),
    };
    let _: Value = api
        .put(&["_security", "user", username, "_password"], &body)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// ML anomaly detection jobs
// ---------------------------------------------------------------------------

/// An anomaly detection job, both as sent on create and as returned on read.
///
/// Fields only the API fills in are skipped when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnomalyDetector {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    pub analysis_config: AnalysisConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_limits: Option<AnalysisLimits>,
    pub data_description: DataDescription,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_plot_config: Option<ModelPlotConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_snapshot_retention_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_model_snapshot_retention_after_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_index_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_lazy_open: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_persist_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_settings: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renormalization_window_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_retention_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_snapshot_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_span: Option<String>,
    pub detectors: Vec<Detector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub influencers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_count_field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categorization_field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Detector {
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub over_field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detector_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_frequent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_null: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisLimits {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_memory_limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categorization_examples_limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DataDescription {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_format: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelPlotConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms: Option<String>,
}

/// Body of `POST /_ml/anomaly_detectors/<id>/_update`: only the updatable fields.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AnomalyDetectorUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_limits: Option<AnalysisLimits>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_plot_config: Option<ModelPlotConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_snapshot_retention_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_model_snapshot_retention_after_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_lazy_open: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_persist_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_settings: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renormalization_window_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_retention_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AnomalyDetectorList {
    #[serde(default)]
    jobs: Vec<AnomalyDetector>,
}

pub async fn put_anomaly_detector(
    api: &HttpApi,
    job_id: &str,
    job: &AnomalyDetector,
) -> Result<AnomalyDetector> {
    api.put(&["_ml", "anomaly_detectors", job_id], job).await
}

/// Fetch a job; `None` when it does not exist.
pub async fn get_anomaly_detector(api: &HttpApi, job_id: &str) -> Result<Option<AnomalyDetector>> {
    let list: Option<AnomalyDetectorList> =
        api.get_optional(&["_ml", "anomaly_detectors", job_id]).await?;
    Ok(list.and_then(|list| {
        list.jobs
            .into_iter()
            .find(|job| job.job_id.as_deref() == Some(job_id))
    }))
}

pub async fn update_anomaly_detector(
    api: &HttpApi,
    job_id: &str,
    update: &AnomalyDetectorUpdate,
) -> Result<AnomalyDetector> {
    api.post(&["_ml", "anomaly_detectors", job_id, "_update"], update)
        .await
}

/// Delete a job, closing it first if it is open.
pub async fn delete_anomaly_detector(api: &HttpApi, job_id: &str) -> Result<()> {
    api.delete(
        &["_ml", "anomaly_detectors", job_id],
        &[("force", "true".to_string())],
    )
    .await
}
