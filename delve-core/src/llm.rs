//! Model-invocation seam.
//!
//! The research agent can phrase its executive summary with a language
//! model. Hosting, prompting policy and cost control live outside this
//! crate; only "prompt in, text out" is needed here.

use crate::error::SearchError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

#[async_trait]
pub trait ModelClient: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, SearchError>;
}

/// Scripted model for tests. Queued replies are returned in order, then the
/// default reply (or an error when none is set).
#[derive(Debug, Default)]
pub struct MockModelClient {
    replies: Mutex<VecDeque<Result<String, SearchError>>>,
    default_reply: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl MockModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = Some(reply.into());
        self
    }

    pub fn queue(&self, reply: Result<String, SearchError>) {
        self.replies.lock().push_back(reply);
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    fn name(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, prompt: &str) -> Result<String, SearchError> {
        self.prompts.lock().push(prompt.to_string());
        if let Some(reply) = self.replies.lock().pop_front() {
            return reply;
        }
        self.default_reply.clone().ok_or_else(|| SearchError::Provider {
            provider: self.name().to_string(),
            message: "no scripted reply".to_string(),
        })
    }
}
