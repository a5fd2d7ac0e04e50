//! Session Management
//!
//! An [`EvalSession`] is created once the tool channel is connected. It owns
//! the channel for the rest of the run, runs prompts one at a time and
//! closes the channel exactly once however the batch ends.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Conversation;
use crate::provider::{ModelConfig, ModelGateway};
use crate::reasoning::{Orchestrator, OrchestratorConfig};
use crate::tool::{ToolChannel, ToolInvoker};

/// A named evaluation query
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// Short unique identifier, also used as the artifact file stem
    pub slug: String,

    /// Initial user query
    pub query: String,
}

impl Prompt {
    pub fn new(slug: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            query: query.into(),
        }
    }
}

/// Everything recorded about one prompt's run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunArtifact {
    pub prompt: Prompt,

    /// Text of the final assistant message
    pub response: String,

    /// Full transcript, exactly as exchanged with the model
    pub raw_messages: Conversation,

    pub run_at: DateTime<Utc>,

    /// Version reported by the tool process
    pub server_version: String,

    pub model_config: ModelConfig,
}

impl RunArtifact {
    /// Package a finished conversation, stamped with the current time
    pub fn package(
        prompt: Prompt,
        conversation: Conversation,
        server_version: impl Into<String>,
        model_config: ModelConfig,
    ) -> Self {
        Self {
            prompt,
            response: conversation.final_text(),
            raw_messages: conversation,
            run_at: Utc::now(),
            server_version: server_version.into(),
            model_config,
        }
    }
}

/// A connected evaluation run
pub struct EvalSession {
    channel: Arc<dyn ToolChannel>,
    gateway: ModelGateway,
    invoker: ToolInvoker,
    config: OrchestratorConfig,
}

impl EvalSession {
    pub fn new(channel: Arc<dyn ToolChannel>, gateway: ModelGateway, config: OrchestratorConfig) -> Self {
        let invoker = ToolInvoker::new(channel.clone());
        Self {
            channel,
            gateway,
            invoker,
            config,
        }
    }

    pub fn server_version(&self) -> &str {
        self.channel.server_version()
    }

    /// Run one prompt and package the result
    pub async fn run_prompt(&self, prompt: &Prompt) -> Result<RunArtifact> {
        tracing::info!(slug = %prompt.slug, "Running prompt");
        let conversation = Orchestrator::new(&self.gateway, &self.invoker, &self.config)
            .run(&prompt.query)
            .await?;

        Ok(RunArtifact::package(
            prompt.clone(),
            conversation,
            self.server_version(),
            self.config.model.clone(),
        ))
    }

    /// Run prompts in order, handing each artifact to `on_artifact` as soon as
    /// it is ready.
    ///
    /// Consumes the session: the channel is closed exactly once before this
    /// returns, whether the batch succeeded or not. The first error stops the
    /// batch.
    pub async fn run_all<F>(self, prompts: &[Prompt], mut on_artifact: F) -> Result<Vec<RunArtifact>>
    where
        F: FnMut(&RunArtifact) -> Result<()> + Send,
    {
        let outcome = self.run_batch(prompts, &mut on_artifact).await;
        let closed = self.channel.close().await;

        match (outcome, closed) {
            (Ok(artifacts), Ok(())) => Ok(artifacts),
            (Ok(_), Err(close_err)) => Err(close_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close_err)) => {
                tracing::warn!(error = %close_err, "Failed to close tool channel");
                Err(err)
            }
        }
    }

    async fn run_batch<F>(&self, prompts: &[Prompt], on_artifact: &mut F) -> Result<Vec<RunArtifact>>
    where
        F: FnMut(&RunArtifact) -> Result<()> + Send,
    {
        let mut artifacts = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            let artifact = self.run_prompt(prompt).await?;
            on_artifact(&artifact)?;
            artifacts.push(artifact);
        }
        Ok(artifacts)
    }
}
