use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use validator::{Validate, ValidationError};

/// Keys the loader injects into every unit's data
pub const RESERVED_DATA_KEYS: [&str; 4] = ["currentRoute", "$query", "$lang", "$dataLoading"];

/// Layout selection for a view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutChoice {
    /// The configured default layout
    #[default]
    Default,
    /// Layout explicitly suppressed
    None,
    Named(String),
}

/// Remote data merged into a mounted unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataSource {
    /// One endpoint whose object response fills the unit's fields
    Single(String),
    /// Endpoints keyed by the field each response is stored under
    Multi(IndexMap<String, String>),
}

/// Typed description of a view module, checked when the module loads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "ViewDescriptor::validate_fields"))]
pub struct ViewDescriptor {
    /// Unit name; defaults to the PascalCase route name
    #[validate(length(min = 1))]
    pub name: Option<String>,

    /// Template embedded in the module, used in production
    pub template: Option<String>,

    #[serde(default)]
    pub layout: LayoutChoice,

    /// Initial instance data
    #[serde(default)]
    pub data: Map<String, JsonValue>,

    pub data_source: Option<DataSource>,
}

impl ViewDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_layout(mut self, layout: LayoutChoice) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn with_data_source(mut self, source: DataSource) -> Self {
        self.data_source = Some(source);
        self
    }

    fn validate_fields(&self) -> Result<(), ValidationError> {
        if let Some(key) = self
            .data
            .keys()
            .find(|key| RESERVED_DATA_KEYS.contains(&key.as_str()))
        {
            let mut err = ValidationError::new("reserved_data_key");
            err.add_param("key".into(), key);
            return Err(err);
        }
        if let LayoutChoice::Named(name) = &self.layout {
            if name.is_empty() {
                return Err(ValidationError::new("empty_layout_name"));
            }
        }
        match &self.data_source {
            Some(DataSource::Single(url)) if url.is_empty() => {
                Err(ValidationError::new("empty_data_url"))
            }
            Some(DataSource::Multi(urls)) if urls.is_empty() => {
                Err(ValidationError::new("empty_data_sources"))
            }
            Some(DataSource::Multi(urls))
                if urls.iter().any(|(key, url)| key.is_empty() || url.is_empty()) =>
            {
                Err(ValidationError::new("empty_data_url"))
            }
            _ => Ok(()),
        }
    }
}
