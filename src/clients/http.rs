//! Shared HTTP plumbing for the Elastic Stack REST APIs.

use reqwest::{Method, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::clients::error::{ClientError, Result};
use crate::config::{Credentials, ServiceConfig};

const USER_AGENT: &str = concat!("hemmer-provider-elasticstack/", env!("CARGO_PKG_VERSION"));

/// A configured connection to one Elastic Stack service.
pub struct HttpApi {
    service: &'static str,
    http: reqwest::Client,
    endpoints: Vec<Url>,
    basic: Option<(String, SecretString)>,
    authorization: Option<SecretString>,
    headers: Vec<(String, SecretString)>,
    kibana_xsrf: bool,
}

impl std::fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApi")
            .field("service", &self.service)
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl HttpApi {
    /// Build a client for `service` from resolved settings.
    pub fn new(service: &'static str, config: &ServiceConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(config.tls.insecure);

        for pem in &config.tls.ca_pems {
            let bytes = pem
                .load()
                .map_err(|e| ClientError::Tls(format!("failed to read CA certificate: {}", e)))?;
            let cert = reqwest::Certificate::from_pem(&bytes)
                .map_err(|e| ClientError::Tls(format!("invalid CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }

        if let Some(identity) = &config.tls.client_identity {
            let mut pem = identity
                .cert
                .load()
                .map_err(|e| ClientError::Tls(format!("failed to read client certificate: {}", e)))?;
            pem.push(b'\n');
            pem.extend(
                identity
                    .key
                    .load()
                    .map_err(|e| ClientError::Tls(format!("failed to read client key: {}", e)))?,
            );
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| ClientError::Tls(format!("invalid client identity: {}", e)))?;
            builder = builder.identity(identity);
        }

        let basic = match &config.credentials {
            Credentials::Basic { username, password } => Some((
                username.clone(),
                SecretString::new(password.expose_secret().into()),
            )),
            _ => None,
        };

        debug!(
            service,
            endpoints = config.endpoints.len(),
            auth = config.credentials.kind(),
            insecure = config.tls.insecure,
            "Configured API client"
        );

        Ok(Self {
            service,
            http: builder.build()?,
            endpoints: config.endpoints.clone(),
            basic,
            authorization: config.credentials.header_value(),
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), SecretString::new(v.expose_secret().into())))
                .collect(),
            kibana_xsrf: service != "elasticsearch",
        })
    }

    /// Build the URL for `segments` below `endpoint`, percent-encoding each segment.
    pub fn url(endpoint: &Url, segments: &[&str]) -> Result<Url> {
        let mut url = endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(format!("{} cannot be a base URL", endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET and decode a JSON body.
    pub async fn get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self.execute(Method::GET, segments, query, None).await?;
        decode(segments, response).await
    }

    /// GET a single object, mapping 404 to `None`.
    pub async fn get_optional<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<Option<T>> {
        match self.get(segments, &[]).await {
            Ok(value) => Ok(Some(value)),
            Err(ClientError::NotFound(path)) => {
                debug!(service = self.service, path = %path, "Object not found");
                Ok(None)
            },
            Err(e) => Err(e),
        }
    }

    /// PUT a JSON body and decode the response.
    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T> {
        let body = encode(segments, body)?;
        let response = self.execute(Method::PUT, segments, &[], Some(body)).await?;
        decode(segments, response).await
    }

    /// POST a JSON body and decode the response.
    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T> {
        let body = encode(segments, body)?;
        let response = self.execute(Method::POST, segments, &[], Some(body)).await?;
        decode(segments, response).await
    }

    /// DELETE an object. An object that is already gone counts as deleted.
    pub async fn delete(&self, segments: &[&str], query: &[(&str, String)]) -> Result<()> {
        match self.execute(Method::DELETE, segments, query, None).await {
            Ok(_) => Ok(()),
            Err(ClientError::NotFound(path)) => {
                debug!(service = self.service, path = %path, "Object already deleted");
                Ok(())
            },
            Err(e) => Err(e),
        }
    }

    async fn execute(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<Response> {
        let path = display_path(segments);
        let mut last_error = None;

        for (attempt, endpoint) in self.endpoints.iter().enumerate() {
            let url = Self::url(endpoint, segments)?;
            debug!(service = self.service, method = %method, path = %path, endpoint = %endpoint, "Sending request");

            let mut request = self.http.request(method.clone(), url).query(query);
            if let Some((username, password)) = &self.basic {
                request = request.basic_auth(username, Some(password.expose_secret()));
            }
            if let Some(value) = &self.authorization {
                request = request.header(reqwest::header::AUTHORIZATION, value.expose_secret());
            }
            for (name, value) in &self.headers {
                request = request.header(name.as_str(), value.expose_secret());
            }
            if self.kibana_xsrf {
                request = request.header("kbn-xsrf", "true");
            }
            if let Some(body) = &body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => return check_status(&method, &path, response).await,
                Err(e) if e.is_connect() && attempt + 1 < self.endpoints.len() => {
                    warn!(
                        service = self.service,
                        endpoint = %endpoint,
                        error = %e,
                        "Endpoint unreachable, trying next"
                    );
                    last_error = Some(e);
                },
                Err(e) => return Err(ClientError::Http(e)),
            }
        }

        match last_error {
            Some(e) => Err(ClientError::Http(e)),
            None => Err(ClientError::InvalidUrl(format!(
                "no {} endpoints configured",
                self.service
            ))),
        }
    }
}

async fn check_status(method: &Method, path: &str, response: Response) -> Result<Response> {
    let status = response.status();
    debug!(method = %method, path = %path, status = status.as_u16(), "Received response");

    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound(path.to_string()));
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Could not read error response body".to_string());
    Err(ClientError::Api {
        method: method.to_string(),
        path: path.to_string(),
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(segments: &[&str], response: Response) -> Result<T> {
    let text = response.text().await?;
    let text = if text.trim().is_empty() { "null" } else { text.as_str() };
    serde_json::from_str(text).map_err(|source| ClientError::Decode {
        path: display_path(segments),
        source,
    })
}

fn encode<B: Serialize + ?Sized>(segments: &[&str], body: &B) -> Result<serde_json::Value> {
    serde_json::to_value(body).map_err(|source| ClientError::Decode {
        path: display_path(segments),
        source,
    })
}

/// Render segments as a path for logs and errors.
pub fn display_path(segments: &[&str]) -> String {
    format!("/{}", segments.join("/"))
}

/// Segments for a Kibana API path in `space_id`.
///
/// The default space lives at `/api/...`; any other space at `/s/<space>/api/...`.
pub fn space_segments<'a>(space_id: &'a str, rest: &[&'a str]) -> Vec<&'a str> {
    let mut segments = Vec::with_capacity(rest.len() + 3);
    if !space_id.is_empty() && space_id != "default" {
        segments.push("s");
        segments.push(space_id);
    }
    segments.push("api");
    segments.extend_from_slice(rest);
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_encodes_segments() {
        let base = Url::parse("http://localhost:9200").unwrap();
        let url = HttpApi::url(&base, &["_security", "user", "jane doe/admin"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:9200/_security/user/jane%20doe%2Fadmin"
        );
    }

    #[test]
    fn test_url_keeps_base_path() {
        let base = Url::parse("https://example.com/kibana/").unwrap();
        let url = HttpApi::url(&base, &["api", "spaces", "space"]).unwrap();
        assert_eq!(url.as_str(), "https://example.com/kibana/api/spaces/space");
    }

    #[test]
    fn test_space_segments() {
        assert_eq!(
            space_segments("default", &["data_views", "data_view"]),
            vec!["api", "data_views", "data_view"]
        );
        assert_eq!(
            space_segments("", &["data_views"]),
            vec!["api", "data_views"]
        );
        assert_eq!(
            space_segments("ops", &["data_views", "data_view", "abc"]),
            vec!["s", "ops", "api", "data_views", "data_view", "abc"]
        );
    }

    #[test]
    fn test_display_path() {
        assert_eq!(display_path(&[]), "/");
        assert_eq!(
            display_path(&["_ml", "anomaly_detectors", "job-1"]),
            "/_ml/anomaly_detectors/job-1"
        );
    }
}
