//! Reasoning Loop
//!
//! Drives one conversation: call the model, run every requested tool in
//! order, hand all results back in a single user message, repeat until the
//! model stops asking for tools.

use crate::error::{EvalError, Result};
use crate::message::{ContentBlock, Conversation, Message};
use crate::provider::{ModelConfig, ModelGateway};
use crate::tool::{ToolFailurePolicy, ToolInvoker};

/// Orchestrator configuration
#[derive(Clone, Debug, Default)]
pub struct OrchestratorConfig {
    /// Model settings, constant for the whole conversation
    pub model: ModelConfig,

    /// Maximum model calls before giving up; unbounded when unset
    pub max_steps: Option<usize>,

    /// How tool failures are handled
    pub tool_failure: ToolFailurePolicy,
}

impl OrchestratorConfig {
    pub fn new(model: ModelConfig) -> Self {
        Self {
            model,
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    #[must_use]
    pub const fn with_tool_failure(mut self, policy: ToolFailurePolicy) -> Self {
        self.tool_failure = policy;
        self
    }
}

#[derive(Debug)]
enum LoopState {
    /// History ends with a user message; the model speaks next
    AwaitingModel,
    Terminated,
}

/// Runs the model ↔ tool loop for a single query
pub struct Orchestrator<'a> {
    gateway: &'a ModelGateway,
    invoker: &'a ToolInvoker,
    config: &'a OrchestratorConfig,
}

impl<'a> Orchestrator<'a> {
    pub const fn new(gateway: &'a ModelGateway, invoker: &'a ToolInvoker, config: &'a OrchestratorConfig) -> Self {
        Self {
            gateway,
            invoker,
            config,
        }
    }

    /// Run a query to completion and return the full transcript.
    ///
    /// The transcript starts with the query and ends with the assistant
    /// message that did not request tools.
    pub async fn run(&self, query: &str) -> Result<Conversation> {
        let mut conversation = Conversation::new(query);
        let mut state = LoopState::AwaitingModel;
        let mut steps = 0usize;

        while let LoopState::AwaitingModel = state {
            if let Some(max) = self.config.max_steps {
                if steps >= max {
                    tracing::warn!(max_steps = max, "Step limit reached");
                    return Err(EvalError::MaxSteps(max));
                }
            }
            steps += 1;

            let response = self
                .gateway
                .call(&conversation, self.invoker.tools(), &self.config.model)
                .await?;

            let tool_uses: Vec<ContentBlock> = response
                .content
                .iter()
                .filter(|block| block.is_tool_use())
                .cloned()
                .collect();
            let wants_tools = response.stop_reason.is_tool_use();

            conversation.push(Message::assistant(response.content));

            state = if wants_tools && !tool_uses.is_empty() {
                let mut results = Vec::with_capacity(tool_uses.len());
                for tool_use in &tool_uses {
                    results.push(self.invoker.invoke(tool_use, self.config.tool_failure).await?);
                }
                conversation.push(Message::user_blocks(results));
                LoopState::AwaitingModel
            } else {
                if wants_tools {
                    tracing::warn!("Model asked for tools without any tool_use blocks, stopping");
                }
                LoopState::Terminated
            };

            tracing::debug!(step = steps, messages = conversation.len(), state = ?state, "Step complete");
        }

        tracing::info!(steps, messages = conversation.len(), "Conversation finished");
        Ok(conversation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::mock::{ScriptedModelClient, ScriptedToolChannel};
    use crate::provider::{ModelResponse, RetryPolicy, StopReason};
    use crate::tool::ToolOutput;
    use serde_json::json;
    use std::sync::Arc;

    fn setup(
        responses: Vec<Result<ModelResponse>>,
        tool_results: Vec<Result<ToolOutput>>,
    ) -> (ModelGateway, ToolInvoker, Arc<ScriptedModelClient>, Arc<ScriptedToolChannel>) {
        let client = Arc::new(ScriptedModelClient::new(responses));
        let channel = Arc::new(ScriptedToolChannel::new(tool_results));
        let gateway = ModelGateway::new(client.clone(), RetryPolicy::no_retry());
        let invoker = ToolInvoker::new(channel.clone());
        (gateway, invoker, client, channel)
    }

    #[tokio::test]
    async fn direct_answer_is_two_messages() {
        let (gateway, invoker, _, channel) = setup(
            vec![Ok(ModelResponse::new(vec![ContentBlock::text("Hi!")], StopReason::EndTurn))],
            vec![],
        );
        let config = OrchestratorConfig::default();

        let conversation = Orchestrator::new(&gateway, &invoker, &config).run("Hello").await.unwrap();

        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.messages()[0], Message::user("Hello"));
        assert_eq!(conversation.final_text(), "Hi!");
        assert!(channel.invocations().is_empty());
    }

    #[tokio::test]
    async fn single_tool_round_trip() {
        let (gateway, invoker, client, _) = setup(
            vec![
                Ok(ModelResponse::new(
                    vec![
                        ContentBlock::text("Let me check."),
                        ContentBlock::tool_use("t1", "list_users", json!({"team": "X"})),
                    ],
                    StopReason::ToolUse,
                )),
                Ok(ModelResponse::new(vec![ContentBlock::text("Ada and Grace.")], StopReason::EndTurn)),
            ],
            vec![Ok(ToolOutput::new(vec![ContentBlock::text("[\"Ada\",\"Grace\"]")]))],
        );
        let config = OrchestratorConfig::default();

        let conversation = Orchestrator::new(&gateway, &invoker, &config)
            .run("Who works at X?")
            .await
            .unwrap();

        assert_eq!(conversation.len(), 4);
        let roles: Vec<Role> = conversation.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(conversation.messages()[2].tool_result_ids(), vec!["t1".to_string()]);
        assert_eq!(conversation.final_text(), "Ada and Grace.");
        assert!(conversation.validate().is_ok());

        // The second call saw the whole history
        assert_eq!(client.seen_history_lengths(), vec![1, 3]);
    }

    #[tokio::test]
    async fn multiple_tool_uses_answered_in_order_in_one_message() {
        let (gateway, invoker, _, channel) = setup(
            vec![
                Ok(ModelResponse::new(
                    vec![
                        ContentBlock::tool_use("a", "first", json!({})),
                        ContentBlock::tool_use("b", "second", json!({})),
                        ContentBlock::tool_use("c", "third", json!({})),
                    ],
                    StopReason::ToolUse,
                )),
                Ok(ModelResponse::new(vec![ContentBlock::text("done")], StopReason::EndTurn)),
            ],
            vec![
                Ok(ToolOutput::new(vec![ContentBlock::text("1")])),
                Ok(ToolOutput::new(vec![ContentBlock::text("2")])),
                Ok(ToolOutput::new(vec![ContentBlock::text("3")])),
            ],
        );
        let config = OrchestratorConfig::default();

        let conversation = Orchestrator::new(&gateway, &invoker, &config).run("go").await.unwrap();

        assert_eq!(conversation.len(), 4);
        assert_eq!(
            conversation.messages()[2].tool_result_ids(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        let names: Vec<String> = channel.invocations().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert!(conversation.validate().is_ok());
    }

    #[tokio::test]
    async fn tool_use_stop_without_blocks_terminates() {
        let (gateway, invoker, client, _) = setup(
            vec![Ok(ModelResponse::new(vec![ContentBlock::text("hmm")], StopReason::ToolUse))],
            vec![],
        );
        let config = OrchestratorConfig::default();

        let conversation = Orchestrator::new(&gateway, &invoker, &config).run("q").await.unwrap();
        assert_eq!(conversation.len(), 2);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn max_steps_bounds_model_calls() {
        let looping = || {
            Ok(ModelResponse::new(
                vec![ContentBlock::tool_use("t", "again", json!({}))],
                StopReason::ToolUse,
            ))
        };
        let (gateway, invoker, client, _) = setup(
            vec![looping(), looping(), looping()],
            vec![Ok(ToolOutput::default()), Ok(ToolOutput::default()), Ok(ToolOutput::default())],
        );
        let config = OrchestratorConfig::default().with_max_steps(2);

        let err = Orchestrator::new(&gateway, &invoker, &config).run("q").await.unwrap_err();
        assert!(matches!(err, EvalError::MaxSteps(2)));
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn tool_failure_aborts_by_default() {
        let (gateway, invoker, client, _) = setup(
            vec![Ok(ModelResponse::new(
                vec![ContentBlock::tool_use("t", "broken", json!({}))],
                StopReason::ToolUse,
            ))],
            vec![Err(EvalError::ToolInvocation("exploded".into()))],
        );
        let config = OrchestratorConfig::default();

        let err = Orchestrator::new(&gateway, &invoker, &config).run("q").await.unwrap_err();
        assert!(matches!(err, EvalError::ToolInvocation(_)));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn configured_policy_reports_tool_failure_to_model() {
        let (gateway, invoker, _, _) = setup(
            vec![
                Ok(ModelResponse::new(
                    vec![ContentBlock::tool_use("t", "broken", json!({}))],
                    StopReason::ToolUse,
                )),
                Ok(ModelResponse::new(vec![ContentBlock::text("the tool failed")], StopReason::EndTurn)),
            ],
            vec![Err(EvalError::ToolInvocation("exploded".into()))],
        );
        let config = OrchestratorConfig::default().with_tool_failure(ToolFailurePolicy::ReportToModel);

        let conversation = Orchestrator::new(&gateway, &invoker, &config).run("q").await.unwrap();
        assert_eq!(conversation.len(), 4);
        match &conversation.messages()[2].blocks()[0] {
            ContentBlock::ToolResult { is_error, .. } => assert!(is_error),
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[tokio::test]
    async fn model_errors_propagate() {
        let (gateway, invoker, _, _) = setup(
            vec![Err(EvalError::Auth("bad key".into()))],
            vec![],
        );
        let config = OrchestratorConfig::default();

        let err = Orchestrator::new(&gateway, &invoker, &config).run("q").await.unwrap_err();
        assert!(matches!(err, EvalError::Auth(_)));
    }

    #[tokio::test]
    async fn lost_channel_aborts_even_when_reporting() {
        let (gateway, invoker, client, _) = setup(
            vec![Ok(ModelResponse::new(
                vec![ContentBlock::tool_use("t", "crash", json!({}))],
                StopReason::ToolUse,
            ))],
            vec![Err(EvalError::Connection("Tool server closed its output".into()))],
        );
        let config = OrchestratorConfig::default().with_tool_failure(ToolFailurePolicy::ReportToModel);

        let err = Orchestrator::new(&gateway, &invoker, &config).run("q").await.unwrap_err();
        assert!(err.is_connection());
        assert_eq!(client.calls(), 1);
    }
}
