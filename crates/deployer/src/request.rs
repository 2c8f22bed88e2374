//! Caller-facing description of a workload to build and deploy.

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::crds::EnvVar;

/// Kind of workload a `Component` describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Agent,
    Tool,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent => write!(f, "agent"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "agent" => Ok(Self::Agent),
            "tool" => Ok(Self::Tool),
            other => Err(format!("unknown resource kind '{other}', expected 'agent' or 'tool'")),
        }
    }
}

lazy_static! {
    static ref IMAGE_REFERENCE: Regex =
        Regex::new(r"^[\w.-]+(?::\d+)?(?:/[\w.-]+)+:[\w.-]+$").unwrap();
}

/// Where the workload image comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "type")]
pub enum Source {
    /// Build an image from a git repository, then deploy it
    Git {
        repo_url: String,
        branch: String,
        #[serde(default)]
        subfolder: String,
    },
    /// Deploy an already published image (`<registry>/<image>:<tag>`)
    Image {
        reference: String,
        #[serde(default)]
        pull_secret: Option<String>,
    },
}

impl Source {
    pub fn requires_build(&self) -> bool {
        matches!(self, Self::Git { .. })
    }
}

/// Immutable request handed to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    /// Resource name, already sanitized to a valid Kubernetes identifier
    pub name: String,
    pub namespace: String,
    pub kind: ResourceKind,
    pub source: Source,
    /// Protocol tag (e.g. "a2a", "mcp")
    pub protocol: String,
    /// Framework tag (e.g. "langgraph", "crewai")
    pub framework: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageReferenceError {
    #[error("image reference '{0}' must contain a tag (e.g. :latest)")]
    MissingTag(String),

    #[error("image reference '{0}' must contain at least a registry and an image name")]
    MissingRegistry(String),

    #[error("image reference '{0}' is not a valid <registry>/<image>:<tag> reference")]
    Malformed(String),
}

/// Parsed `<registry>/<image>:<tag>` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub image: String,
    pub tag: String,
}

impl ImageReference {
    /// Split on the last `:` for the tag and the last `/` for the image name.
    pub fn parse(reference: &str) -> Result<Self, ImageReferenceError> {
        let reference = reference.trim();
        let Some((base, tag)) = reference.rsplit_once(':') else {
            return Err(ImageReferenceError::MissingTag(reference.to_string()));
        };

        // A colon inside the final path segment is a tag; one before it is a registry port.
        if tag.is_empty() || tag.contains('/') {
            return Err(ImageReferenceError::MissingTag(reference.to_string()));
        }

        let parts: Vec<&str> = base.trim_matches('/').split('/').collect();
        if parts.len() < 2 {
            return Err(ImageReferenceError::MissingRegistry(reference.to_string()));
        }

        if !IMAGE_REFERENCE.is_match(reference) {
            return Err(ImageReferenceError::Malformed(reference.to_string()));
        }

        Ok(Self {
            registry: parts[..parts.len() - 1].join("/"),
            image: parts[parts.len() - 1].to_string(),
            tag: tag.to_string(),
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.image, self.tag)
    }
}

/// Parse `.env` content into container environment entries.
///
/// Values that look like JSON objects may carry a structured reference:
/// `{"value": ..}` / `{"valueFrom": ..}` are used as-is and the shorthand
/// `{"secretKeyRef": ..}` / `{"configMapKeyRef": ..}` becomes `valueFrom`.
/// Anything else is kept as a literal string.
pub fn parse_env_file(content: &str) -> Vec<EnvVar> {
    let mut env = Vec::new();

    for (index, raw_line) in content.trim().lines().enumerate() {
        let line_num = index + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((name, value)) = line.split_once('=') else {
            warn!(line = line_num, content = %raw_line, "Invalid env line (missing '=')");
            continue;
        };

        let name = name.trim();
        if name.is_empty() {
            warn!(line = line_num, "Empty environment variable name");
            continue;
        }

        let value = strip_quotes(value.trim());
        if value.starts_with('{') || value.starts_with('[') {
            env.push(parse_json_value(name, value, line_num));
        } else {
            env.push(EnvVar::literal(name, value));
        }
    }

    env
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn parse_json_value(name: &str, value: &str, line_num: usize) -> EnvVar {
    let parsed = match serde_json::from_str::<serde_json::Value>(value) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(line = line_num, error = %e, "Invalid JSON env value, kept as string");
            return EnvVar::literal(name, value);
        }
    };

    let Some(object) = parsed.as_object() else {
        warn!(line = line_num, name, "JSON env value is not an object, kept as string");
        return EnvVar::literal(name, value);
    };

    if object.contains_key("value") || object.contains_key("valueFrom") {
        return EnvVar {
            name: name.to_string(),
            value: object
                .get("value")
                .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string)),
            value_from: object.get("valueFrom").cloned(),
        };
    }

    if object.contains_key("secretKeyRef") || object.contains_key("configMapKeyRef") {
        return EnvVar {
            name: name.to_string(),
            value: None,
            value_from: Some(parsed),
        };
    }

    warn!(line = line_num, name, "JSON env value has unrecognized keys, kept as string");
    EnvVar::literal(name, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_image_reference_with_nested_registry_path() {
        let image = ImageReference::parse("ghcr.io/kagenti/agent-examples/weather-tool:v0.0.1").unwrap();
        assert_eq!(image.registry, "ghcr.io/kagenti/agent-examples");
        assert_eq!(image.image, "weather-tool");
        assert_eq!(image.tag, "v0.0.1");
        assert_eq!(image.to_string(), "ghcr.io/kagenti/agent-examples/weather-tool:v0.0.1");
    }

    #[test]
    fn registry_port_is_not_mistaken_for_a_tag() {
        let image = ImageReference::parse("registry.local:5000/team/app:1.2").unwrap();
        assert_eq!(image.registry, "registry.local:5000/team");
        assert_eq!(image.tag, "1.2");

        assert_eq!(
            ImageReference::parse("registry.local:5000/app"),
            Err(ImageReferenceError::MissingTag("registry.local:5000/app".into()))
        );
    }

    #[test]
    fn rejects_malformed_image_references() {
        assert!(matches!(
            ImageReference::parse("quay.io/org/app"),
            Err(ImageReferenceError::MissingTag(_))
        ));
        assert!(matches!(
            ImageReference::parse("app:latest"),
            Err(ImageReferenceError::MissingRegistry(_))
        ));
        assert!(matches!(
            ImageReference::parse("quay.io/org/my app:latest"),
            Err(ImageReferenceError::Malformed(_))
        ));
    }

    #[test]
    fn env_file_skips_comments_blank_and_invalid_lines() {
        let env = parse_env_file(
            r#"
# comment
PORT=8000

NO_EQUALS_SIGN
=orphan
QUOTED="hello world"
SINGLE='x=y'
"#,
        );

        assert_eq!(
            env,
            vec![
                EnvVar::literal("PORT", "8000"),
                EnvVar::literal("QUOTED", "hello world"),
                EnvVar::literal("SINGLE", "x=y"),
            ]
        );
    }

    #[test]
    fn env_file_understands_structured_references() {
        let env = parse_env_file(
            r#"API_KEY='{"secretKeyRef": {"name": "openai", "key": "apikey"}}'
FULL='{"valueFrom": {"configMapKeyRef": {"name": "env", "key": "MODEL"}}}'
ODD='{"foo": 1}'
LIST=[1,2]
BROKEN={not json"#,
        );

        assert_eq!(env.len(), 5);
        assert_eq!(
            env[0].value_from,
            Some(json!({"secretKeyRef": {"name": "openai", "key": "apikey"}}))
        );
        assert_eq!(env[0].value, None);
        assert_eq!(
            env[1].value_from,
            Some(json!({"configMapKeyRef": {"name": "env", "key": "MODEL"}}))
        );
        assert_eq!(env[2], EnvVar::literal("ODD", r#"{"foo": 1}"#));
        assert_eq!(env[3], EnvVar::literal("LIST", "[1,2]"));
        assert_eq!(env[4], EnvVar::literal("BROKEN", "{not json"));
    }

    #[test]
    fn resource_kind_round_trips_through_strings() {
        assert_eq!("Agent".parse::<ResourceKind>().unwrap(), ResourceKind::Agent);
        assert_eq!(ResourceKind::Tool.to_string(), "tool");
        assert!("service".parse::<ResourceKind>().is_err());
    }
}
