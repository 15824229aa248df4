use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod validation;

pub use validation::{validate, DescriptorError, MAX_FIELD_LEN, MAX_NAME_LEN};

/// CharacterDescriptor describes the identity/persona of one companion.
///
/// Descriptors are immutable values handed out by the character directory.
/// Within an owner's roster a descriptor is keyed by `name`; every other
/// field is carried along without interpretation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CharacterDescriptor {
    /// Unique key within an owner's roster
    pub name: String,

    /// Name shown above the companion's head
    #[serde(default)]
    pub short_name: String,

    /// Free-form persona description
    #[serde(default)]
    pub description: String,

    /// URL-like reference to the companion's skin texture
    #[serde(default)]
    pub skin_url: String,

    /// Directory-specific fields (opaque to retinue)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CharacterDescriptor {
    /// Build a descriptor with only the identifying fields set.
    pub fn new(name: impl Into<String>, short_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            short_name: short_name.into(),
            description: String::new(),
            skin_url: String::new(),
            extra: Map::new(),
        }
    }

    /// Builder-style setter for the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder-style setter for the skin reference.
    pub fn with_skin_url(mut self, skin_url: impl Into<String>) -> Self {
        self.skin_url = skin_url.into();
        self
    }

    /// Name to display for the companion: `short_name`, or `name` when empty.
    pub fn display_name(&self) -> &str {
        if self.short_name.is_empty() {
            &self.name
        } else {
            &self.short_name
        }
    }

    /// Validates the descriptor (see [`validate`]).
    pub fn validate(&self) -> Result<(), DescriptorError> {
        validation::validate(self)
    }
}
