//! Container identity - routing/tagging metadata attached to every outbound message

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::SessionConfig;

const SHORT_ID_LEN: usize = 12;

/// Container description as sent by the host (Docker `logger.Info` layout)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerInfo {
    /// Log options of the container
    #[serde(deserialize_with = "null_as_default")]
    pub config: HashMap<String, String>,

    #[serde(rename = "ContainerID")]
    pub container_id: String,

    pub container_name: String,

    pub container_entrypoint: String,

    #[serde(deserialize_with = "null_as_default")]
    pub container_args: Vec<String>,

    #[serde(rename = "ContainerImageID")]
    pub container_image_id: String,

    pub container_image_name: String,

    /// `KEY=value` entries
    #[serde(deserialize_with = "null_as_default")]
    pub container_env: Vec<String>,

    #[serde(deserialize_with = "null_as_default")]
    pub container_labels: HashMap<String, String>,

    pub log_path: String,

    pub daemon_name: String,
}

/// Go encoders emit `null` for empty maps/slices
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ContainerInfo {
    /// Value of a `KEY=value` entry in the container environment
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.container_env.iter().find_map(|entry| {
            entry
                .split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

/// Immutable identity of one container for the lifetime of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerIdentity {
    /// Full container id
    pub id: String,

    /// Human-readable name (leading `/` stripped)
    pub name: String,

    pub image_id: String,

    pub image_name: String,

    /// Entrypoint followed by arguments
    pub command: String,

    /// Rendered tag
    pub tag: String,

    /// Tag attributes, every key prefixed with `_`
    pub attributes: BTreeMap<String, String>,
}

impl ContainerIdentity {
    /// Build the identity of a container under a session configuration
    pub fn from_info(info: &ContainerInfo, config: &SessionConfig) -> Self {
        let name = info.container_name.trim_start_matches('/').to_string();
        let command = std::iter::once(info.container_entrypoint.as_str())
            .chain(info.container_args.iter().map(String::as_str))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let tag = render_tag(&config.tag_template, info, &name);

        let mut attributes = BTreeMap::from([
            ("_container_id".to_string(), info.container_id.clone()),
            ("_container_name".to_string(), name.clone()),
            ("_image_id".to_string(), info.container_image_id.clone()),
            ("_image_name".to_string(), info.container_image_name.clone()),
            ("_command".to_string(), command.clone()),
            ("_tag".to_string(), tag.clone()),
        ]);

        for key in &config.labels {
            if let Some(value) = info.container_labels.get(key) {
                attributes.insert(attribute_key(key), value.clone());
            }
        }
        for key in &config.env {
            if let Some(value) = info.env_value(key) {
                attributes.insert(attribute_key(key), value.to_string());
            }
        }

        Self {
            id: info.container_id.clone(),
            name,
            image_id: info.container_image_id.clone(),
            image_name: info.container_image_name.clone(),
            command,
            tag,
            attributes,
        }
    }

    /// First 12 characters of the id
    pub fn short_id(&self) -> &str {
        short(&self.id)
    }

    /// Service name used as telemetry measurement: `_svcname` if set, else the image
    pub fn service_name(&self) -> &str {
        let fallback: &str = if self.image_name.is_empty() {
            &self.name
        } else {
            &self.image_name
        };
        self.attributes
            .get("_svcname")
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(fallback)
    }
}

fn short(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

fn attribute_key(key: &str) -> String {
    if key.starts_with('_') {
        key.to_string()
    } else {
        format!("_{key}")
    }
}

fn render_tag(template: &str, info: &ContainerInfo, name: &str) -> String {
    let image_id = info
        .container_image_id
        .split_once(':')
        .map(|(_, hash)| hash)
        .unwrap_or(&info.container_image_id);

    template
        .replace("{{.FullID}}", &info.container_id)
        .replace("{{.ID}}", short(&info.container_id))
        .replace("{{.Name}}", name)
        .replace("{{.ImageFullID}}", &info.container_image_id)
        .replace("{{.ImageID}}", short(image_id))
        .replace("{{.ImageName}}", &info.container_image_name)
        .replace("{{.DaemonName}}", &info.daemon_name)
}
