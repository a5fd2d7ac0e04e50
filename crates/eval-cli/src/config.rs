//! Run configuration
//!
//! Command-line options (each bound to an environment variable) and the
//! validated [`EvalConfig`] assembled from them.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, ValueEnum};
use eval_core::{ModelConfig, OrchestratorConfig, Prompt, ToolFailurePolicy, provider::DEFAULT_MODEL};
use eval_runtime::anthropic::DEFAULT_BASE_URL;
use eval_runtime::{AnthropicConfig, StdioServerConfig};

use crate::prompts;

/// What to do when a tool call fails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ToolErrorMode {
    /// Abort the prompt
    #[default]
    Fail,
    /// Send the error back to the model
    Report,
}

impl From<ToolErrorMode> for ToolFailurePolicy {
    fn from(mode: ToolErrorMode) -> Self {
        match mode {
            ToolErrorMode::Fail => Self::FailFast,
            ToolErrorMode::Report => Self::ReportToModel,
        }
    }
}

/// Options for `mcp-eval run`
#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Anthropic API key
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: String,

    /// Anthropic model
    #[arg(long, env = "ANTHROPIC_MODEL", default_value = DEFAULT_MODEL)]
    pub anthropic_model: String,

    /// Anthropic API root
    #[arg(long, env = "ANTHROPIC_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub anthropic_base_url: String,

    /// Maximum tokens per model response
    #[arg(long, env = "MCP_EVAL_MAX_TOKENS", default_value_t = 1000)]
    pub max_tokens: u32,

    /// Sampling temperature, the API default when unset
    #[arg(long, env = "MCP_EVAL_TEMPERATURE")]
    pub temperature: Option<f32>,

    /// Timeout for one model request, in seconds
    #[arg(long, env = "MCP_EVAL_TIMEOUT_SECS", default_value_t = 300)]
    pub timeout_secs: u64,

    /// Path to the MCP server binary
    #[arg(long, env = "MCP_SERVER_PATH")]
    pub mcp_server_path: String,

    /// Argument passed to the MCP server (repeatable)
    #[arg(long = "server-arg", allow_hyphen_values = true)]
    pub server_args: Vec<String>,

    /// Extra environment variable for the MCP server, as KEY=VALUE (repeatable)
    #[arg(long = "server-env", value_parser = parse_key_val)]
    pub server_env: Vec<(String, String)>,

    /// OpsLevel API token, forwarded to the MCP server
    #[arg(long, env = "OPSLEVEL_API_TOKEN", hide_env_values = true)]
    pub opslevel_api_token: Option<String>,

    /// OpsLevel app URL for local development or self-hosted, forwarded to the MCP server
    #[arg(long, env = "OPSLEVEL_APP_URL")]
    pub opslevel_app_url: Option<String>,

    /// Prompt slugs to run, defaults to all
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub slugs: Vec<String>,

    /// JSON file replacing the built-in prompts
    #[arg(long, env = "MCP_EVAL_PROMPTS")]
    pub prompts: Option<PathBuf>,

    /// Folder that receives one timestamped subfolder per run
    #[arg(long, env = "MCP_EVAL_RESULTS_DIR", default_value = "results")]
    pub results_dir: PathBuf,

    /// Maximum model calls per prompt, unbounded by default
    #[arg(long, env = "MCP_EVAL_MAX_STEPS")]
    pub max_steps: Option<usize>,

    /// What to do when a tool call fails
    #[arg(long, value_enum, default_value_t = ToolErrorMode::Fail)]
    pub on_tool_error: ToolErrorMode,
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    if key.is_empty() {
        return Err(format!("empty variable name in `{raw}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Validated settings for one run
#[derive(Clone, Debug)]
pub struct EvalConfig {
    pub anthropic: AnthropicConfig,
    pub orchestrator: OrchestratorConfig,
    pub server: StdioServerConfig,
    pub prompts: Vec<Prompt>,
    pub results_dir: PathBuf,
}

impl TryFrom<RunArgs> for EvalConfig {
    type Error = anyhow::Error;

    fn try_from(args: RunArgs) -> anyhow::Result<Self> {
        if args.anthropic_api_key.trim().is_empty() {
            bail!("--anthropic-api-key must not be empty");
        }
        if args.mcp_server_path.trim().is_empty() {
            bail!("--mcp-server-path must not be empty");
        }
        if args.max_tokens == 0 {
            bail!("--max-tokens must be greater than zero");
        }
        if args.max_steps == Some(0) {
            bail!("--max-steps must be greater than zero");
        }
        if args.timeout_secs == 0 {
            bail!("--timeout-secs must be greater than zero");
        }
        if let Some(t) = args.temperature {
            if !(0.0..=1.0).contains(&t) {
                bail!("--temperature must be between 0 and 1, got {t}");
            }
        }

        let corpus = match &args.prompts {
            Some(path) => prompts::load_file(path)?,
            None => prompts::builtin(),
        };
        let prompts = prompts::select(corpus, &args.slugs).context("Invalid prompt selection")?;

        let mut server = StdioServerConfig::new(args.mcp_server_path).with_args(args.server_args);
        if let Some(token) = args.opslevel_api_token {
            server = server.with_env("OPSLEVEL_API_TOKEN", token);
        }
        if let Some(url) = args.opslevel_app_url {
            server = server.with_env("OPSLEVEL_APP_URL", url);
        }
        for (key, value) in args.server_env {
            server = server.with_env(key, value);
        }

        let mut model = ModelConfig::new(args.anthropic_model).with_max_tokens(args.max_tokens);
        if let Some(temperature) = args.temperature {
            model = model.with_temperature(temperature);
        }
        let mut orchestrator = OrchestratorConfig::new(model).with_tool_failure(args.on_tool_error.into());
        orchestrator.max_steps = args.max_steps;

        Ok(Self {
            anthropic: AnthropicConfig::new(args.anthropic_api_key)
                .with_base_url(args.anthropic_base_url)
                .with_timeout_secs(args.timeout_secs),
            orchestrator,
            server,
            prompts,
            results_dir: args.results_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        run: RunArgs,
    }

    fn parse(extra: &[&str]) -> RunArgs {
        let mut argv = vec![
            "mcp-eval",
            "--anthropic-api-key",
            "sk-test",
            "--mcp-server-path",
            "/usr/local/bin/opslevel-mcp",
        ];
        argv.extend_from_slice(extra);
        TestCli::try_parse_from(argv).unwrap().run
    }

    #[test]
    fn defaults() {
        let config = EvalConfig::try_from(parse(&[])).unwrap();

        assert_eq!(config.orchestrator.model.model, DEFAULT_MODEL);
        assert_eq!(config.orchestrator.model.max_tokens, 1000);
        assert_eq!(config.orchestrator.model.temperature, None);
        assert_eq!(config.anthropic.timeout_secs, 300);
        assert_eq!(config.orchestrator.max_steps, None);
        assert_eq!(config.orchestrator.tool_failure, ToolFailurePolicy::FailFast);
        assert_eq!(config.prompts.len(), 14);
        assert_eq!(config.results_dir, PathBuf::from("results"));
        assert_eq!(config.server.command, "/usr/local/bin/opslevel-mcp");
    }

    #[test]
    fn server_environment_and_arguments() {
        let config = EvalConfig::try_from(parse(&[
            "--opslevel-api-token",
            "tok",
            "--server-env",
            "LOG_LEVEL=debug",
            "--server-arg",
            "serve",
            "--server-arg",
            "--verbose",
        ]))
        .unwrap();

        assert_eq!(config.server.env.get("OPSLEVEL_API_TOKEN").map(String::as_str), Some("tok"));
        assert_eq!(config.server.env.get("LOG_LEVEL").map(String::as_str), Some("debug"));
        assert_eq!(config.server.args, vec!["serve", "--verbose"]);
    }

    #[test]
    fn slugs_and_policies() {
        let config = EvalConfig::try_from(parse(&[
            "--slugs",
            "who,incident_page",
            "--max-steps",
            "8",
            "--on-tool-error",
            "report",
        ]))
        .unwrap();

        let slugs: Vec<&str> = config.prompts.iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(slugs, vec!["who", "incident_page"]);
        assert_eq!(config.orchestrator.max_steps, Some(8));
        assert_eq!(config.orchestrator.tool_failure, ToolFailurePolicy::ReportToModel);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(EvalConfig::try_from(parse(&["--max-steps", "0"])).is_err());
        assert!(EvalConfig::try_from(parse(&["--timeout-secs", "0"])).is_err());
        assert!(EvalConfig::try_from(parse(&["--temperature", "1.5"])).is_err());
        assert!(EvalConfig::try_from(parse(&["--slugs", "nope"])).is_err());
        assert!(parse_key_val("NOVALUE").is_err());
        assert!(parse_key_val("=x").is_err());
        assert_eq!(parse_key_val("A=b=c").unwrap(), ("A".into(), "b=c".into()));
    }

    #[test]
    fn model_tuning_flags() {
        let config = EvalConfig::try_from(parse(&["--temperature", "0.2", "--timeout-secs", "60"])).unwrap();

        assert_eq!(config.orchestrator.model.temperature, Some(0.2));
        assert_eq!(config.anthropic.timeout_secs, 60);
    }
}
