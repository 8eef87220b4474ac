//! `elasticstack_elasticsearch_ml_anomaly_detection_job`.
//!
//! Jobs are created with `PUT`, read back from the `{jobs: [...]}` listing and
//! updated through `_update`, which accepts only a subset of the settings.
//! Everything else (`analysis_config`, `data_description`,
//! `results_index_name`) forces a new job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::clients::elasticsearch::{
    self, AnalysisConfig, AnalysisLimits, AnomalyDetector, AnomalyDetectorUpdate, DataDescription,
    Detector, ModelPlotConfig,
};
use crate::clients::ApiClient;
use crate::composite_id::CompositeId;
use crate::error::ProviderError;
use crate::resources::{state_id, written, Resource};
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock, Schema};
use crate::typeutils::{adopt, from_state, json_string, list_or_null, non_empty, parse_json_string, to_state};
use crate::validation::{self, check_one_of};

const TYPE_NAME: &str = "elasticstack_elasticsearch_ml_anomaly_detection_job";
const ID_FORMAT: &str = "<cluster_uuid>/<job_id>";

/// Elasticsearch reports custom results indices with this prefix.
const CUSTOM_RESULTS_PREFIX: &str = "custom-";

const DETECTOR_FUNCTIONS: &[&str] = &[
    "count",
    "high_count",
    "low_count",
    "non_zero_count",
    "high_non_zero_count",
    "low_non_zero_count",
    "distinct_count",
    "high_distinct_count",
    "low_distinct_count",
    "info_content",
    "high_info_content",
    "low_info_content",
    "lat_long",
    "max",
    "min",
    "mean",
    "high_mean",
    "low_mean",
    "median",
    "high_median",
    "low_median",
    "metric",
    "varp",
    "high_varp",
    "low_varp",
    "rare",
    "freq_rare",
    "sum",
    "high_sum",
    "low_sum",
    "non_null_sum",
    "high_non_null_sum",
    "low_non_null_sum",
    "time_of_day",
    "time_of_week",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobState {
    pub id: Option<String>,
    pub job_id: String,
    pub description: Option<String>,
    pub groups: Option<Vec<String>>,
    pub analysis_config: AnalysisConfigState,
    pub analysis_limits: Option<AnalysisLimitsState>,
    pub data_description: Option<DataDescriptionState>,
    pub model_plot_config: Option<ModelPlotConfigState>,
    pub model_snapshot_retention_days: Option<i64>,
    pub daily_model_snapshot_retention_after_days: Option<i64>,
    pub results_index_name: Option<String>,
    pub allow_lazy_open: Option<bool>,
    pub background_persist_interval: Option<String>,
    pub custom_settings: Option<String>,
    pub renormalization_window_days: Option<i64>,
    pub results_retention_days: Option<i64>,
    pub create_time: Option<i64>,
    pub job_type: Option<String>,
    pub job_version: Option<String>,
    pub model_snapshot_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfigState {
    pub bucket_span: Option<String>,
    pub detectors: Vec<DetectorState>,
    pub influencers: Option<Vec<String>>,
    pub summary_count_field_name: Option<String>,
    pub categorization_field_name: Option<String>,
    pub latency: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorState {
    pub function: String,
    pub field_name: Option<String>,
    pub by_field_name: Option<String>,
    pub over_field_name: Option<String>,
    pub partition_field_name: Option<String>,
    pub detector_description: Option<String>,
    pub exclude_frequent: Option<String>,
    pub use_null: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisLimitsState {
    pub model_memory_limit: Option<String>,
    pub categorization_examples_limit: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataDescriptionState {
    pub time_field: Option<String>,
    pub time_format: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPlotConfigState {
    pub enabled: Option<bool>,
    pub annotations_enabled: Option<bool>,
    pub terms: Option<String>,
}

impl From<&DetectorState> for Detector {
    fn from(d: &DetectorState) -> Self {
        Self {
            function: d.function.clone(),
            field_name: d.field_name.clone(),
            by_field_name: d.by_field_name.clone(),
            over_field_name: d.over_field_name.clone(),
            partition_field_name: d.partition_field_name.clone(),
            detector_description: d.detector_description.clone(),
            exclude_frequent: d.exclude_frequent.clone(),
            use_null: d.use_null,
        }
    }
}

impl From<&AnalysisLimitsState> for AnalysisLimits {
    fn from(l: &AnalysisLimitsState) -> Self {
        Self {
            model_memory_limit: l.model_memory_limit.clone(),
            categorization_examples_limit: l.categorization_examples_limit,
        }
    }
}

impl From<&ModelPlotConfigState> for ModelPlotConfig {
    fn from(m: &ModelPlotConfigState) -> Self {
        Self {
            enabled: m.enabled,
            annotations_enabled: m.annotations_enabled,
            terms: m.terms.clone(),
        }
    }
}

impl JobState {
    fn to_request(&self) -> Result<AnomalyDetector, ProviderError> {
        let config = &self.analysis_config;
        Ok(AnomalyDetector {
            job_id: Some(self.job_id.clone()),
            description: self.description.clone(),
            groups: self.groups.clone(),
            analysis_config: AnalysisConfig {
                bucket_span: config.bucket_span.clone(),
                detectors: config.detectors.iter().map(Detector::from).collect(),
                influencers: config.influencers.clone().unwrap_or_default(),
                summary_count_field_name: config.summary_count_field_name.clone(),
                categorization_field_name: config.categorization_field_name.clone(),
                latency: config.latency.clone(),
            },
            analysis_limits: self.analysis_limits.as_ref().map(AnalysisLimits::from),
            data_description: self
                .data_description
                .as_ref()
                .map(|d| DataDescription {
                    time_field: d.time_field.clone(),
                    time_format: d.time_format.clone(),
                })
                .unwrap_or_default(),
            model_plot_config: self.model_plot_config.as_ref().map(ModelPlotConfig::from),
            model_snapshot_retention_days: self.model_snapshot_retention_days,
            daily_model_snapshot_retention_after_days: self
                .daily_model_snapshot_retention_after_days,
            results_index_name: self.results_index_name.clone(),
            allow_lazy_open: self.allow_lazy_open,
            background_persist_interval: self.background_persist_interval.clone(),
            custom_settings: parse_json_string("custom_settings", self.custom_settings.as_deref())?,
            renormalization_window_days: self.renormalization_window_days,
            results_retention_days: self.results_retention_days,
            ..Default::default()
        })
    }

    /// The `_update` body: updatable settings that differ from `prior`.
    ///
    /// Settings removed from the configuration are sent as empty values so
    /// Elasticsearch clears them.
    fn update_from(&self, prior: &JobState) -> Result<AnomalyDetectorUpdate, ProviderError> {
        fn changed<T: Clone + PartialEq>(new: &Option<T>, old: &Option<T>) -> Option<T> {
            (new != old).then(|| new.clone()).flatten()
        }

        let mut update = AnomalyDetectorUpdate {
            description: changed(&self.description, &prior.description),
            groups: changed(&self.groups, &prior.groups),
            analysis_limits: (self.analysis_limits != prior.analysis_limits)
                .then(|| self.analysis_limits.as_ref().map(AnalysisLimits::from))
                .flatten(),
            model_plot_config: (self.model_plot_config != prior.model_plot_config)
                .then(|| self.model_plot_config.as_ref().map(ModelPlotConfig::from))
                .flatten(),
            model_snapshot_retention_days: changed(
                &self.model_snapshot_retention_days,
                &prior.model_snapshot_retention_days,
            ),
            daily_model_snapshot_retention_after_days: changed(
                &self.daily_model_snapshot_retention_after_days,
                &prior.daily_model_snapshot_retention_after_days,
            ),
            allow_lazy_open: changed(&self.allow_lazy_open, &prior.allow_lazy_open),
            background_persist_interval: changed(
                &self.background_persist_interval,
                &prior.background_persist_interval,
            ),
            custom_settings: None,
            renormalization_window_days: changed(
                &self.renormalization_window_days,
                &prior.renormalization_window_days,
            ),
            results_retention_days: changed(
                &self.results_retention_days,
                &prior.results_retention_days,
            ),
        };

        if self.description.is_none() && prior.description.is_some() {
            update.description = Some(String::new());
        }
        if self.groups.is_none() && prior.groups.is_some() {
            update.groups = Some(Vec::new());
        }
        if self.custom_settings != prior.custom_settings {
            update.custom_settings = Some(
                parse_json_string("custom_settings", self.custom_settings.as_deref())?
                    .unwrap_or_else(|| Value::Object(Default::default())),
            );
        }

        Ok(update)
    }
}

/// Map a job returned by Elasticsearch onto state.
fn job_state(
    id: &CompositeId,
    job: AnomalyDetector,
    prior: Option<&JobState>,
) -> Result<JobState, ProviderError> {
    let prior_config = prior.map(|p| &p.analysis_config);
    let api_config = job.analysis_config;

    let detectors = api_config
        .detectors
        .into_iter()
        .enumerate()
        .map(|(i, d)| {
            let prior = prior_config.and_then(|c| c.detectors.get(i));
            DetectorState {
                function: d.function,
                field_name: adopt(prior.map(|p| &p.field_name), d.field_name),
                by_field_name: adopt(prior.map(|p| &p.by_field_name), d.by_field_name),
                over_field_name: adopt(prior.map(|p| &p.over_field_name), d.over_field_name),
                partition_field_name: adopt(
                    prior.map(|p| &p.partition_field_name),
                    d.partition_field_name,
                ),
                detector_description: adopt(
                    prior.map(|p| &p.detector_description),
                    non_empty(d.detector_description),
                ),
                exclude_frequent: adopt(prior.map(|p| &p.exclude_frequent), d.exclude_frequent),
                use_null: adopt(prior.map(|p| &p.use_null), d.use_null),
            }
        })
        .collect();

    let analysis_config = AnalysisConfigState {
        bucket_span: api_config.bucket_span,
        detectors,
        influencers: list_or_null(
            prior_config.map(|c| &c.influencers),
            Some(api_config.influencers),
        ),
        summary_count_field_name: adopt(
            prior_config.map(|c| &c.summary_count_field_name),
            api_config.summary_count_field_name,
        ),
        categorization_field_name: adopt(
            prior_config.map(|c| &c.categorization_field_name),
            api_config.categorization_field_name,
        ),
        latency: adopt(prior_config.map(|c| &c.latency), api_config.latency),
    };

    let analysis_limits = match prior.map(|p| &p.analysis_limits) {
        Some(None) => None,
        block => job.analysis_limits.map(|l| {
            let prior = block.and_then(Option::as_ref);
            AnalysisLimitsState {
                model_memory_limit: adopt(prior.map(|p| &p.model_memory_limit), l.model_memory_limit),
                categorization_examples_limit: adopt(
                    prior.map(|p| &p.categorization_examples_limit),
                    l.categorization_examples_limit,
                ),
            }
        }),
    };

    let data_description = match prior.map(|p| &p.data_description) {
        Some(None) => None,
        block => {
            let prior = block.and_then(Option::as_ref);
            Some(DataDescriptionState {
                time_field: adopt(prior.map(|p| &p.time_field), job.data_description.time_field),
                time_format: adopt(prior.map(|p| &p.time_format), job.data_description.time_format),
            })
        },
    };

    let model_plot_config = match prior.map(|p| &p.model_plot_config) {
        Some(None) => None,
        block => job.model_plot_config.map(|m| {
            let prior = block.and_then(Option::as_ref);
            ModelPlotConfigState {
                enabled: adopt(prior.map(|p| &p.enabled), m.enabled),
                annotations_enabled: adopt(prior.map(|p| &p.annotations_enabled), m.annotations_enabled),
                terms: adopt(prior.map(|p| &p.terms), m.terms),
            }
        }),
    };

    Ok(JobState {
        id: Some(id.to_string()),
        job_id: id.resource_id.clone(),
        description: adopt(prior.map(|p| &p.description), non_empty(job.description)),
        groups: list_or_null(prior.map(|p| &p.groups), job.groups),
        analysis_config,
        analysis_limits,
        data_description,
        model_plot_config,
        model_snapshot_retention_days: job.model_snapshot_retention_days,
        daily_model_snapshot_retention_after_days: job.daily_model_snapshot_retention_after_days,
        results_index_name: job
            .results_index_name
            .map(|name| name.strip_prefix(CUSTOM_RESULTS_PREFIX).map(str::to_string).unwrap_or(name)),
        allow_lazy_open: job.allow_lazy_open,
        background_persist_interval: adopt(
            prior.map(|p| &p.background_persist_interval),
            job.background_persist_interval,
        ),
        custom_settings: json_string(prior.map(|p| &p.custom_settings), job.custom_settings.as_ref())?,
        renormalization_window_days: adopt(
            prior.map(|p| &p.renormalization_window_days),
            job.renormalization_window_days,
        ),
        results_retention_days: adopt(
            prior.map(|p| &p.results_retention_days),
            job.results_retention_days,
        ),
        create_time: job.create_time,
        job_type: job.job_type,
        job_version: job.job_version,
        model_snapshot_id: job.model_snapshot_id,
    })
}

fn detector_block() -> Block {
    Block::new()
        .with_attribute(
            "function",
            Attribute::required_string().with_description("Analysis function, e.g. mean or count"),
        )
        .with_attribute("field_name", Attribute::optional_string())
        .with_attribute("by_field_name", Attribute::optional_string())
        .with_attribute("over_field_name", Attribute::optional_string())
        .with_attribute("partition_field_name", Attribute::optional_string())
        .with_attribute("detector_description", Attribute::optional_string())
        .with_attribute(
            "exclude_frequent",
            Attribute::optional_string().with_description("all, none, by or over"),
        )
        .with_attribute("use_null", Attribute::optional_bool())
}

pub struct MlAnomalyDetectionJob;

impl MlAnomalyDetectionJob {
    async fn refresh(
        &self,
        client: &ApiClient,
        id: &CompositeId,
        prior: Option<&JobState>,
    ) -> Result<Option<JobState>, ProviderError> {
        let api = client.elasticsearch()?;
        match elasticsearch::get_anomaly_detector(api, &id.resource_id).await? {
            Some(job) => job_state(id, job, prior).map(Some),
            None => {
                debug!(job_id = %id.resource_id, "anomaly detection job is gone");
                Ok(None)
            },
        }
    }
}

#[async_trait]
impl Resource for MlAnomalyDetectionJob {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        let analysis_config = Block::new()
            .with_attribute(
                "bucket_span",
                Attribute::required_string().with_description("Interval of analysis, e.g. 15m"),
            )
            .with_attribute("influencers", Attribute::optional_string_list())
            .with_attribute("summary_count_field_name", Attribute::optional_string())
            .with_attribute("categorization_field_name", Attribute::optional_string())
            .with_attribute("latency", Attribute::optional_string())
            .with_block("detectors", NestedBlock::list(detector_block()).with_min_items(1));

        Schema::v0()
            .with_attribute(
                "id",
                Attribute::computed_string().with_description(ID_FORMAT),
            )
            .with_attribute("job_id", Attribute::required_string().with_force_new())
            .with_attribute("description", Attribute::optional_string())
            .with_attribute("groups", Attribute::optional_string_list())
            .with_attribute("model_snapshot_retention_days", Attribute::optional_computed_int64())
            .with_attribute(
                "daily_model_snapshot_retention_after_days",
                Attribute::optional_computed_int64(),
            )
            .with_attribute(
                "results_index_name",
                Attribute::optional_computed_string().with_force_new(),
            )
            .with_attribute("allow_lazy_open", Attribute::optional_computed_bool())
            .with_attribute("background_persist_interval", Attribute::optional_string())
            .with_attribute(
                "custom_settings",
                Attribute::optional_string().with_description("Custom metadata as a JSON object string"),
            )
            .with_attribute("renormalization_window_days", Attribute::optional_int64())
            .with_attribute("results_retention_days", Attribute::optional_int64())
            .with_attribute("create_time", Attribute::computed_int64())
            .with_attribute("job_type", Attribute::computed_string())
            .with_attribute("job_version", Attribute::computed_string())
            .with_attribute("model_snapshot_id", Attribute::computed_string())
            .with_block(
                "analysis_config",
                NestedBlock::single(analysis_config)
                    .with_min_items(1)
                    .with_force_new(),
            )
            .with_block(
                "analysis_limits",
                NestedBlock::single(
                    Block::new()
                        .with_attribute("model_memory_limit", Attribute::optional_string())
                        .with_attribute("categorization_examples_limit", Attribute::optional_int64()),
                ),
            )
            .with_block(
                "data_description",
                NestedBlock::single(
                    Block::new()
                        .with_attribute("time_field", Attribute::optional_string())
                        .with_attribute("time_format", Attribute::optional_string()),
                )
                .with_force_new(),
            )
            .with_block(
                "model_plot_config",
                NestedBlock::single(
                    Block::new()
                        .with_attribute("enabled", Attribute::optional_bool())
                        .with_attribute("annotations_enabled", Attribute::optional_bool())
                        .with_attribute("terms", Attribute::optional_string()),
                ),
            )
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = validation::validate(&self.schema(), config);

        if let Some(job_id) = config.get("job_id").and_then(Value::as_str) {
            let valid = !job_id.is_empty()
                && job_id.len() <= 64
                && job_id
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
                && job_id.starts_with(|c: char| c.is_ascii_alphanumeric())
                && job_id.ends_with(|c: char| c.is_ascii_alphanumeric());
            if !valid {
                diagnostics.push(
                    Diagnostic::error("Invalid job_id")
                        .with_detail(
                            "job_id may contain lowercase alphanumerics, hyphens and underscores, \
                             must start and end with an alphanumeric and be at most 64 characters",
                        )
                        .with_attribute("job_id"),
                );
            }
        }

        let detectors = config
            .pointer("/analysis_config/detectors")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for (i, detector) in detectors.iter().enumerate() {
            if let Some(diag) = check_one_of(detector, "function", DETECTOR_FUNCTIONS) {
                diagnostics.push(diag.with_attribute(format!("analysis_config.detectors.{}.function", i)));
            }
            if let Some(diag) = check_one_of(detector, "exclude_frequent", &["all", "none", "by", "over"]) {
                diagnostics.push(
                    diag.with_attribute(format!("analysis_config.detectors.{}.exclude_frequent", i)),
                );
            }
        }

        if let Err(err) = parse_json_string(
            "custom_settings",
            config.get("custom_settings").and_then(Value::as_str),
        ) {
            diagnostics.push(err.to_diagnostic().with_attribute("custom_settings"));
        }

        diagnostics
    }

    async fn create(&self, client: &ApiClient, planned: Value) -> Result<Value, ProviderError> {
        let planned: JobState = from_state(planned)?;
        let api = client.elasticsearch()?;
        let id = CompositeId::new(client.cluster_uuid().await?, &planned.job_id);

        info!(job_id = %planned.job_id, "creating anomaly detection job");
        elasticsearch::put_anomaly_detector(api, &planned.job_id, &planned.to_request()?).await?;

        let state = self.refresh(client, &id, Some(&planned)).await?;
        to_state(&written(TYPE_NAME, &id.to_string(), state)?)
    }

    async fn read(&self, client: &ApiClient, state: Value) -> Result<Option<Value>, ProviderError> {
        let state: JobState = from_state(state)?;
        let id = CompositeId::parse(state_id(state.id.as_deref())?, ID_FORMAT)?;
        self.refresh(client, &id, Some(&state))
            .await?
            .map(|s| to_state(&s))
            .transpose()
    }

    async fn update(
        &self,
        client: &ApiClient,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: JobState = from_state(prior)?;
        let planned: JobState = from_state(planned)?;
        let id = CompositeId::parse(state_id(prior.id.as_deref())?, ID_FORMAT)?;

        let update = planned.update_from(&prior)?;
        if update != AnomalyDetectorUpdate::default() {
            info!(job_id = %id.resource_id, "updating anomaly detection job");
            elasticsearch::update_anomaly_detector(client.elasticsearch()?, &id.resource_id, &update)
                .await?;
        }

        let state = self.refresh(client, &id, Some(&planned)).await?;
        to_state(&written(TYPE_NAME, &id.to_string(), state)?)
    }

    async fn delete(&self, client: &ApiClient, state: Value) -> Result<(), ProviderError> {
        let state: JobState = from_state(state)?;
        let id = CompositeId::parse(state_id(state.id.as_deref())?, ID_FORMAT)?;
        info!(job_id = %id.resource_id, "deleting anomaly detection job");
        Ok(elasticsearch::delete_anomaly_detector(client.elasticsearch()?, &id.resource_id).await?)
    }

    async fn import(&self, client: &ApiClient, id: &str) -> Result<Option<Value>, ProviderError> {
        let id = CompositeId::parse(id, ID_FORMAT)?;
        self.refresh(client, &id, None)
            .await?
            .map(|s| to_state(&s))
            .transpose()
    }
}
