//! The origin portal a deployment scrapes.

/// Name and URL template of a configured portal source.
#[derive(Debug, Clone)]
pub struct PortalSource {
    /// `source_name` persisted on every row this deployment writes.
    pub name: String,
    /// Canonical detail URL with an `{id}` placeholder for the 48-hex token.
    pub detail_url_template: String,
}

impl PortalSource {
    pub fn new(name: impl Into<String>, detail_url_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            detail_url_template: detail_url_template.into(),
        }
    }

    /// Builds the canonical detail URL for a token.
    pub fn detail_url(&self, token: &str) -> String {
        self.detail_url_template.replace("{id}", token)
    }

    /// True when the template carries the `{id}` placeholder.
    pub fn has_placeholder(&self) -> bool {
        self.detail_url_template.contains("{id}")
    }
}
