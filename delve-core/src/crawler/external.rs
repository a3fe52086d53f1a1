//! External extraction services used as the last stages of the cascade.

use crate::error::SearchError;
use crate::types::ExtractionMethod;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Content returned by an external service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalDocument {
    pub title: Option<String>,
    /// Plain text; paragraphs separated by blank lines.
    pub text: String,
    /// Known keys: `description`, `author`, `published`, `language`.
    pub metadata: BTreeMap<String, String>,
    pub links: Vec<String>,
    pub images: Vec<String>,
}

/// A remote service that turns a URL into readable text.
#[async_trait]
pub trait ExternalExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// Which cascade stage this service fills.
    fn method(&self) -> ExtractionMethod;

    async fn extract(&self, url: &str) -> Result<ExternalDocument, SearchError>;
}
