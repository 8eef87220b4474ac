//! Two-part resource identifiers of the form `<scope>/<resource_id>`.

use std::fmt;
use std::str::FromStr;

use crate::error::ProviderError;

/// A `<scope>/<resource_id>` identifier.
///
/// Elasticsearch resources scope their ids by cluster UUID, Kibana
/// resources by space id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeId {
    pub scope: String,
    pub resource_id: String,
}

impl CompositeId {
    pub fn new(scope: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            resource_id: resource_id.into(),
        }
    }

    /// Parse `"<a>/<b>"`. Both parts must be non-empty and there must be exactly one `/`.
    ///
    /// `format` names the expected shape in the error, e.g. `<space_id>/<data_view_id>`.
    pub fn parse(id: &str, format: &str) -> Result<Self, ProviderError> {
        let parts: Vec<&str> = id.split('/').collect();
        match parts.as_slice() {
            [scope, resource_id] if !scope.is_empty() && !resource_id.is_empty() => {
                Ok(Self::new(*scope, *resource_id))
            },
            _ => Err(ProviderError::InvalidRequest(format!(
                "Wrong resource ID: {:?}. Resource ID must have the following format: {}",
                id, format
            ))),
        }
    }
}

impl fmt::Display for CompositeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.resource_id)
    }
}

impl FromStr for CompositeId {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, "<scope>/<resource_id>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER_ID: &str = "<cluster_uuid>/<username>";

    #[test]
    fn test_parse() {
        let id = CompositeId::parse("abc123/jane", USER_ID).unwrap();
        assert_eq!(id.scope, "abc123");
        assert_eq!(id.resource_id, "jane");
        assert_eq!(id.to_string(), "abc123/jane");
    }

    #[test]
    fn test_format_then_parse() {
        let id = CompositeId::new("default", "logs-view");
        let parsed: CompositeId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_rejects_malformed_ids() {
        for bad in ["", "noslash", "/job", "cluster/", "a/b/c", "/"] {
            let err = CompositeId::parse(bad, USER_ID).unwrap_err();
            assert!(
                err.to_string().contains("Wrong resource ID"),
                "{:?} gave {}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_error_names_the_expected_format() {
        let err = CompositeId::parse("logs-view", "<space_id>/<data_view_id>").unwrap_err();
        assert!(err.to_string().contains("<space_id>/<data_view_id>"), "{}", err);
        assert!(!err.to_string().contains("cluster_uuid"));

        let err = "a/b/c".parse::<CompositeId>().unwrap_err();
        assert!(err.to_string().contains("<scope>/<resource_id>"), "{}", err);
    }
}
