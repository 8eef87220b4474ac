//! Provider configuration.
//!
//! The provider block has one nested block per service (`elasticsearch`,
//! `kibana`, `fleet`). Every setting is resolved in this order, highest
//! first:
//!
//! 1. environment variables (`ELASTICSEARCH_*`, `KIBANA_*`, `FLEET_*`)
//! 2. the attribute in the provider block
//! 3. the value inherited from the parent service: Kibana inherits
//!    credentials from Elasticsearch, Fleet inherits endpoint and
//!    credentials from Kibana
//!
//! Credentials are inherited as a whole: a service falls back to its
//! parent's credentials only when neither its environment variables nor
//! its block set any of them.
//!
//! Empty or whitespace-only environment variables count as unset.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::schema::{
    Attribute, AttributeFlags, AttributeType, Block, Diagnostic, NestedBlock, Schema,
};

/// Environment variable names.
pub mod env {
    pub const ELASTICSEARCH_ENDPOINTS: &str = "ELASTICSEARCH_ENDPOINTS";
    pub const ELASTICSEARCH_USERNAME: &str = "ELASTICSEARCH_USERNAME";
    pub const ELASTICSEARCH_PASSWORD: &str = "ELASTICSEARCH_PASSWORD";
    pub const ELASTICSEARCH_API_KEY: &str = "ELASTICSEARCH_API_KEY";
    pub const ELASTICSEARCH_BEARER_TOKEN: &str = "ELASTICSEARCH_BEARER_TOKEN";
    pub const ELASTICSEARCH_ES_CLIENT_AUTHENTICATION: &str =
        "ELASTICSEARCH_ES_CLIENT_AUTHENTICATION";
    pub const ELASTICSEARCH_INSECURE: &str = "ELASTICSEARCH_INSECURE";

    pub const KIBANA_ENDPOINT: &str = "KIBANA_ENDPOINT";
    pub const KIBANA_USERNAME: &str = "KIBANA_USERNAME";
    pub const KIBANA_PASSWORD: &str = "KIBANA_PASSWORD";
    pub const KIBANA_API_KEY: &str = "KIBANA_API_KEY";
    pub const KIBANA_INSECURE: &str = "KIBANA_INSECURE";
    pub const KIBANA_CA_CERTS: &str = "KIBANA_CA_CERTS";

    pub const FLEET_ENDPOINT: &str = "FLEET_ENDPOINT";
    pub const FLEET_USERNAME: &str = "FLEET_USERNAME";
    pub const FLEET_PASSWORD: &str = "FLEET_PASSWORD";
    pub const FLEET_API_KEY: &str = "FLEET_API_KEY";
    pub const FLEET_CA_CERTS: &str = "FLEET_CA_CERTS";
}

/// Header carrying the shared secret for Elasticsearch client authentication.
pub const ES_CLIENT_AUTHENTICATION_HEADER: &str = "ES-Client-Authentication";

/// Errors raised while resolving the provider configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable holds a value of the wrong shape.
    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    /// An endpoint is not an absolute http(s) URL.
    #[error("Invalid endpoint '{value}' for {attribute}: {reason}")]
    InvalidEndpoint {
        attribute: String,
        value: String,
        reason: String,
    },

    /// `api_key` was combined with `username`/`password` in one block.
    #[error("{block}: api_key conflicts with username and password")]
    ConflictingCredentials { block: String },

    /// Only half of a username/password pair was supplied.
    #[error("{block}: username and password must be set together")]
    IncompleteBasicAuth { block: String },

    /// Kibana accepts a single endpoint.
    #[error("{block}: only one endpoint is supported")]
    TooManyEndpoints { block: String },
}

impl ConfigError {
    /// Attribute path the error refers to, for diagnostics.
    pub fn attribute(&self) -> Option<String> {
        match self {
            Self::InvalidValue { .. } => None,
            Self::InvalidEndpoint { attribute, .. } => Some(attribute.clone()),
            Self::ConflictingCredentials { block } => Some(format!("{}.api_key", block)),
            Self::IncompleteBasicAuth { block } => Some(format!("{}.password", block)),
            Self::TooManyEndpoints { block } => Some(format!("{}.endpoints", block)),
        }
    }

    /// Render as an error diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::error(self.to_string());
        match self.attribute() {
            Some(attr) => diag.with_attribute(attr),
            None => diag,
        }
    }
}

/// Source of environment variables.
///
/// The provider binary reads the process environment; tests inject a fixed
/// map so they do not depend on the caller's shell.
#[derive(Debug, Clone, Default)]
pub enum Environment {
    /// Read from `std::env`.
    #[default]
    Process,
    /// Read from a fixed set of variables.
    Fixed(HashMap<String, String>),
}

impl Environment {
    /// An environment with no variables set.
    pub fn empty() -> Self {
        Self::Fixed(HashMap::new())
    }

    /// Build a fixed environment from key/value pairs.
    pub fn fixed<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::Fixed(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Read a variable, returning None if unset, empty, or whitespace-only.
    pub fn var(&self, key: &str) -> Option<String> {
        let value = match self {
            Self::Process => std::env::var(key).ok(),
            Self::Fixed(vars) => vars.get(key).cloned(),
        };
        value.filter(|s| !s.trim().is_empty())
    }

    fn bool_var(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.var(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue {
                    var: key.to_string(),
                    message: "must be true or false".to_string(),
                }),
        }
    }

    fn list_var(&self, key: &str) -> Option<Vec<String>> {
        self.var(key).map(|raw| split_list(&raw))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Provider block as received from the host
// ---------------------------------------------------------------------------

/// The `elasticsearch` block.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ElasticsearchBlock {
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub bearer_token: Option<String>,
    pub es_client_authentication: Option<String>,
    pub endpoints: Option<Vec<String>>,
    pub insecure: Option<bool>,
    pub ca_file: Option<String>,
    pub ca_data: Option<String>,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub cert_data: Option<String>,
    pub key_data: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
}

/// The `kibana` block.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KibanaBlock {
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub endpoints: Option<Vec<String>>,
    pub insecure: Option<bool>,
    pub ca_certs: Option<Vec<String>>,
}

/// The `fleet` block.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FleetBlock {
    pub endpoint: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub insecure: Option<bool>,
    pub ca_certs: Option<Vec<String>>,
}

/// The whole provider configuration block.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub elasticsearch: Option<ElasticsearchBlock>,
    pub kibana: Option<KibanaBlock>,
    pub fleet: Option<FleetBlock>,
}

impl ProviderConfig {
    /// Decode the provider block. A null block is an empty configuration.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value)
    }

    /// The schema of the provider block.
    pub fn schema() -> Schema {
        let string_list = || {
            Attribute::new(
                AttributeType::list(AttributeType::String),
                AttributeFlags::optional(),
            )
        };

        let elasticsearch = Block::new()
            .with_description("Elasticsearch connection settings")
            .with_attribute("username", Attribute::optional_string())
            .with_attribute("password", Attribute::optional_string().sensitive())
            .with_attribute("api_key", Attribute::optional_string().sensitive())
            .with_attribute("bearer_token", Attribute::optional_string().sensitive())
            .with_attribute(
                "es_client_authentication",
                Attribute::optional_string().sensitive(),
            )
            .with_attribute(
                "endpoints",
                string_list().with_description("Elasticsearch URLs, tried in order"),
            )
            .with_attribute("insecure", Attribute::optional_bool())
            .with_attribute("ca_file", Attribute::optional_string())
            .with_attribute("ca_data", Attribute::optional_string())
            .with_attribute("cert_file", Attribute::optional_string())
            .with_attribute("key_file", Attribute::optional_string())
            .with_attribute("cert_data", Attribute::optional_string())
            .with_attribute("key_data", Attribute::optional_string().sensitive())
            .with_attribute(
                "headers",
                Attribute::new(
                    AttributeType::map(AttributeType::String),
                    AttributeFlags::optional().sensitive(),
                ),
            );

        let kibana = Block::new()
            .with_description("Kibana connection settings")
            .with_attribute("username", Attribute::optional_string())
            .with_attribute("password", Attribute::optional_string().sensitive())
            .with_attribute("api_key", Attribute::optional_string().sensitive())
            .with_attribute("endpoints", string_list())
            .with_attribute("insecure", Attribute::optional_bool())
            .with_attribute("ca_certs", string_list());

        let fleet = Block::new()
            .with_description("Fleet connection settings")
            .with_attribute("endpoint", Attribute::optional_string())
            .with_attribute("username", Attribute::optional_string())
            .with_attribute("password", Attribute::optional_string().sensitive())
            .with_attribute("api_key", Attribute::optional_string().sensitive())
            .with_attribute("insecure", Attribute::optional_bool())
            .with_attribute("ca_certs", string_list());

        Schema::v0()
            .with_block("elasticsearch", NestedBlock::single(elasticsearch))
            .with_block("kibana", NestedBlock::single(kibana))
            .with_block("fleet", NestedBlock::single(fleet))
    }

    /// Check the block as written, before environment variables apply.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if let Some(es) = &self.elasticsearch {
            check_credentials(
                "elasticsearch",
                &es.username,
                &es.password,
                &es.api_key,
                &mut errors,
            );
            for (i, endpoint) in es.endpoints.iter().flatten().enumerate() {
                let attribute = format!("elasticsearch.endpoints.{}", i);
                if let Err(e) = parse_endpoint(&attribute, endpoint) {
                    errors.push(e);
                }
            }
        }

        if let Some(kb) = &self.kibana {
            check_credentials("kibana", &kb.username, &kb.password, &kb.api_key, &mut errors);
            let endpoints = kb.endpoints.as_deref().unwrap_or_default();
            if endpoints.len() > 1 {
                errors.push(ConfigError::TooManyEndpoints {
                    block: "kibana".to_string(),
                });
            }
            for (i, endpoint) in endpoints.iter().enumerate() {
                if let Err(e) = parse_endpoint(&format!("kibana.endpoints.{}", i), endpoint) {
                    errors.push(e);
                }
            }
        }

        if let Some(fleet) = &self.fleet {
            check_credentials(
                "fleet",
                &fleet.username,
                &fleet.password,
                &fleet.api_key,
                &mut errors,
            );
            if let Some(endpoint) = non_empty(&fleet.endpoint) {
                if let Err(e) = parse_endpoint("fleet.endpoint", &endpoint) {
                    errors.push(e);
                }
            }
        }

        errors
    }

    /// Merge the block with the environment and inherited values.
    pub fn resolve(&self, environment: &Environment) -> Result<ResolvedConfig, ConfigError> {
        let es_block = self.elasticsearch.clone().unwrap_or_default();
        let kb_block = self.kibana.clone().unwrap_or_default();
        let fleet_block = self.fleet.clone().unwrap_or_default();

        let es = Settings {
            endpoints: environment
                .list_var(env::ELASTICSEARCH_ENDPOINTS)
                .or_else(|| es_block.endpoints.clone())
                .unwrap_or_default(),
            login: Login {
                username: environment
                    .var(env::ELASTICSEARCH_USERNAME)
                    .or_else(|| non_empty(&es_block.username)),
                password: environment
                    .var(env::ELASTICSEARCH_PASSWORD)
                    .or_else(|| non_empty(&es_block.password)),
                api_key: environment
                    .var(env::ELASTICSEARCH_API_KEY)
                    .or_else(|| non_empty(&es_block.api_key)),
                bearer_token: environment
                    .var(env::ELASTICSEARCH_BEARER_TOKEN)
                    .or_else(|| non_empty(&es_block.bearer_token)),
            },
            insecure: environment.bool_var(env::ELASTICSEARCH_INSECURE)?.or(es_block.insecure),
            ca_certs: non_empty(&es_block.ca_file).into_iter().collect(),
        };

        let kibana = Settings {
            endpoints: environment
                .var(env::KIBANA_ENDPOINT)
                .map(|e| vec![e.trim().to_string()])
                .or_else(|| kb_block.endpoints.clone())
                .unwrap_or_default(),
            login: Login {
                username: environment
                    .var(env::KIBANA_USERNAME)
                    .or_else(|| non_empty(&kb_block.username)),
                password: environment
                    .var(env::KIBANA_PASSWORD)
                    .or_else(|| non_empty(&kb_block.password)),
                api_key: environment
                    .var(env::KIBANA_API_KEY)
                    .or_else(|| non_empty(&kb_block.api_key)),
                bearer_token: None,
            }
            .or_inherit(&Login {
                bearer_token: None,
                ..es.login.clone()
            }),
            insecure: environment
                .bool_var(env::KIBANA_INSECURE)?
                .or(kb_block.insecure)
                .or(es.insecure),
            ca_certs: environment
                .list_var(env::KIBANA_CA_CERTS)
                .or_else(|| kb_block.ca_certs.clone())
                .unwrap_or_default(),
        };

        let fleet = Settings {
            endpoints: environment
                .var(env::FLEET_ENDPOINT)
                .or_else(|| non_empty(&fleet_block.endpoint))
                .map(|e| vec![e.trim().to_string()])
                .unwrap_or_else(|| kibana.endpoints.clone()),
            login: Login {
                username: environment
                    .var(env::FLEET_USERNAME)
                    .or_else(|| non_empty(&fleet_block.username)),
                password: environment
                    .var(env::FLEET_PASSWORD)
                    .or_else(|| non_empty(&fleet_block.password)),
                api_key: environment
                    .var(env::FLEET_API_KEY)
                    .or_else(|| non_empty(&fleet_block.api_key)),
                bearer_token: None,
            }
            .or_inherit(&kibana.login),
            insecure: fleet_block.insecure.or(kibana.insecure),
            ca_certs: environment
                .list_var(env::FLEET_CA_CERTS)
                .or_else(|| fleet_block.ca_certs.clone())
                .unwrap_or_else(|| kibana.ca_certs.clone()),
        };

        let mut elasticsearch = es.into_service("elasticsearch")?;
        if let Some(service) = elasticsearch.as_mut() {
            service.tls.ca_pems.extend(
                non_empty(&es_block.ca_data)
                    .map(|pem| PemSource::Inline(SecretString::new(pem.into()))),
            );
            service.tls.client_identity = client_identity(&es_block);
            if let Some(secret) = environment
                .var(env::ELASTICSEARCH_ES_CLIENT_AUTHENTICATION)
                .or_else(|| non_empty(&es_block.es_client_authentication))
            {
                service.headers.push((
                    ES_CLIENT_AUTHENTICATION_HEADER.to_string(),
                    SecretString::new(secret.into()),
                ));
            }
            for (name, value) in es_block.headers.iter().flatten() {
                service
                    .headers
                    .push((name.clone(), SecretString::new(value.clone().into())));
            }
        }

        Ok(ResolvedConfig {
            elasticsearch,
            kibana: kibana.into_service("kibana")?,
            fleet: fleet.into_service("fleet")?,
        })
    }
}

fn check_credentials(
    block: &str,
    username: &Option<String>,
    password: &Option<String>,
    api_key: &Option<String>,
    errors: &mut Vec<ConfigError>,
) {
    let username = non_empty(username).is_some();
    let password = non_empty(password).is_some();
    if non_empty(api_key).is_some() && (username || password) {
        errors.push(ConfigError::ConflictingCredentials {
            block: block.to_string(),
        });
    }
    if username != password {
        errors.push(ConfigError::IncompleteBasicAuth {
            block: block.to_string(),
        });
    }
}

fn client_identity(block: &ElasticsearchBlock) -> Option<ClientIdentity> {
    let cert = non_empty(&block.cert_data)
        .map(|pem| PemSource::Inline(SecretString::new(pem.into())))
        .or_else(|| non_empty(&block.cert_file).map(|p| PemSource::File(PathBuf::from(p))))?;
    let key = non_empty(&block.key_data)
        .map(|pem| PemSource::Inline(SecretString::new(pem.into())))
        .or_else(|| non_empty(&block.key_file).map(|p| PemSource::File(PathBuf::from(p))))?;
    Some(ClientIdentity { cert, key })
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|s| !s.trim().is_empty())
}

fn parse_endpoint(attribute: &str, value: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEndpoint {
        attribute: attribute.to_string(),
        value: value.to_string(),
        reason,
    };
    let url = Url::parse(value.trim()).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme '{}'", other))),
    }
}

/// Credential settings of one service.
#[derive(Clone, Default)]
struct Login {
    username: Option<String>,
    password: Option<String>,
    api_key: Option<String>,
    bearer_token: Option<String>,
}

impl Login {
    fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.password.is_none()
            && self.api_key.is_none()
            && self.bearer_token.is_none()
    }

    /// Take the parent's credentials when none were set at this level.
    fn or_inherit(self, parent: &Login) -> Login {
        if self.is_empty() {
            parent.clone()
        } else {
            self
        }
    }
}

/// Settings for one service after precedence has been applied.
#[derive(Default)]
struct Settings {
    endpoints: Vec<String>,
    login: Login,
    insecure: Option<bool>,
    ca_certs: Vec<String>,
}

impl Settings {
    fn into_service(self, block: &str) -> Result<Option<ServiceConfig>, ConfigError> {
        if self.endpoints.is_empty() {
            return Ok(None);
        }

        let endpoints = self
            .endpoints
            .iter()
            .enumerate()
            .map(|(i, e)| parse_endpoint(&format!("{}.endpoints.{}", block, i), e))
            .collect::<Result<Vec<_>, _>>()?;

        let login = self.login;
        let credentials = if let Some(key) = login.api_key {
            Credentials::ApiKey(SecretString::new(key.into()))
        } else if let Some(token) = login.bearer_token {
            Credentials::Bearer(SecretString::new(token.into()))
        } else {
            match (login.username, login.password) {
                (Some(username), Some(password)) => Credentials::Basic {
                    username,
                    password: SecretString::new(password.into()),
                },
                (None, None) => Credentials::Anonymous,
                _ => {
                    return Err(ConfigError::IncompleteBasicAuth {
                        block: block.to_string(),
                    })
                },
            }
        };

        Ok(Some(ServiceConfig {
            endpoints,
            credentials,
            tls: TlsSettings {
                insecure: self.insecure.unwrap_or(false),
                ca_pems: self
                    .ca_certs
                    .into_iter()
                    .map(|p| PemSource::File(PathBuf::from(p)))
                    .collect(),
                client_identity: None,
            },
            headers: Vec::new(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// How requests to a service authenticate.
#[derive(Debug)]
pub enum Credentials {
    /// No `Authorization` header.
    Anonymous,
    /// HTTP basic authentication.
    Basic {
        username: String,
        password: SecretString,
    },
    /// `Authorization: ApiKey <key>`.
    ApiKey(SecretString),
    /// `Authorization: Bearer <token>`.
    Bearer(SecretString),
}

impl Credentials {
    /// Short label for logs; never includes the secret.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Basic { .. } => "basic",
            Self::ApiKey(_) => "api_key",
            Self::Bearer(_) => "bearer",
        }
    }

    /// The `Authorization` header value, if any.
    pub fn header_value(&self) -> Option<SecretString> {
        match self {
            Self::ApiKey(key) => Some(SecretString::new(
                format!("ApiKey {}", key.expose_secret()).into(),
            )),
            Self::Bearer(token) => Some(SecretString::new(
                format!("Bearer {}", token.expose_secret()).into(),
            )),
            Self::Basic { .. } | Self::Anonymous => None,
        }
    }
}

/// A PEM document held either on disk or inline.
pub enum PemSource {
    File(PathBuf),
    Inline(SecretString),
}

impl PemSource {
    /// Load the PEM bytes.
    pub fn load(&self) -> std::io::Result<Vec<u8>> {
        match self {
            Self::File(path) => std::fs::read(path),
            Self::Inline(pem) => Ok(pem.expose_secret().as_bytes().to_vec()),
        }
    }
}

impl fmt::Debug for PemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Inline(_) => f.write_str("Inline(<pem>)"),
        }
    }
}

/// Client certificate and key for mutual TLS.
#[derive(Debug)]
pub struct ClientIdentity {
    pub cert: PemSource,
    pub key: PemSource,
}

/// TLS settings for one service.
#[derive(Debug, Default)]
pub struct TlsSettings {
    /// Skip certificate verification.
    pub insecure: bool,
    /// Extra trusted CA certificates.
    pub ca_pems: Vec<PemSource>,
    /// Client identity for mutual TLS.
    pub client_identity: Option<ClientIdentity>,
}

/// Connection settings for one service.
#[derive(Debug)]
pub struct ServiceConfig {
    /// Base URLs, tried in order.
    pub endpoints: Vec<Url>,
    pub credentials: Credentials,
    pub tls: TlsSettings,
    /// Extra headers sent with every request.
    pub headers: Vec<(String, SecretString)>,
}

/// The provider configuration after precedence rules were applied.
///
/// A service without any endpoint is left unconfigured.
#[derive(Debug, Default)]
pub struct ResolvedConfig {
    pub elasticsearch: Option<ServiceConfig>,
    pub kibana: Option<ServiceConfig>,
    pub fleet: Option<ServiceConfig>,
}
