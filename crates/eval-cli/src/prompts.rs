//! Evaluation prompt corpus

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, bail};
use eval_core::Prompt;

const BUILTIN: &[(&str, &str)] = &[
    ("who", "Who works at opslevel?"),
    (
        "slow_service_debug_missing",
        "My x service is experiencing slowness, where should I start looking?",
    ),
    (
        "slow_service_debug",
        "My rails service is experiencing slowness, where should I start looking?",
    ),
    (
        "slow_service_related",
        "My Rails monolith service is experiencing slowness, are any related objects having an incident?",
    ),
    ("actions", "I need to rollback OpsSight, how can I do that?"),
    (
        "service_deps",
        "opslevel-runner is throwing errors when trying to pull jobs, which service is responsible for this?",
    ),
    (
        "system_diagram",
        "Generate a system summary and whole system diagrams based on the services, infra and relationships/dependencies in opslevel.",
    ),
    (
        "feature_impl_help",
        "I\u{2019}m trying to implement throttling feature into simplekiq service. How should I get started?",
    ),
    ("recommend_dep_rails", "What is the recommended/approved version of rails?"),
    ("recommend_dep_go", "What is the recommended/approved version of cobra?"),
    ("new_mcp", "I want to create an mcp server, how can I do this?"),
    ("new_service", "I want to create a new rails service, how can I do this?"),
    ("service_ownership", "Who owns backstage?"),
    ("incident_page", "How do I page the on-call engineer?"),
];

/// The built-in corpus, in run order
pub fn builtin() -> Vec<Prompt> {
    BUILTIN.iter().map(|(slug, query)| Prompt::new(*slug, *query)).collect()
}

/// Load a corpus from a JSON array of `{slug, query}` objects
pub fn load_file(path: &Path) -> anyhow::Result<Vec<Prompt>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read prompts file {}", path.display()))?;
    let prompts: Vec<Prompt> =
        serde_json::from_str(&raw).with_context(|| format!("Invalid prompts file {}", path.display()))?;
    validate(&prompts)?;
    Ok(prompts)
}

/// Slugs must be unique and usable as file names
pub fn validate(prompts: &[Prompt]) -> anyhow::Result<()> {
    let mut seen = HashSet::new();
    for prompt in prompts {
        if prompt.slug.is_empty()
            || !prompt
                .slug
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            bail!("Invalid prompt slug {:?}: use letters, digits, '_' or '-'", prompt.slug);
        }
        if !seen.insert(prompt.slug.as_str()) {
            bail!("Duplicate prompt slug {:?}", prompt.slug);
        }
    }
    Ok(())
}

/// Keep the prompts named in `slugs`, in corpus order.
///
/// An empty `slugs` keeps everything. Unknown slugs are logged and ignored;
/// a selection that ends up empty is an error.
pub fn select(corpus: Vec<Prompt>, slugs: &[String]) -> anyhow::Result<Vec<Prompt>> {
    if slugs.is_empty() {
        return Ok(corpus);
    }

    for slug in slugs {
        if !corpus.iter().any(|p| &p.slug == slug) {
            tracing::warn!(slug = %slug, "Unknown prompt slug, ignoring");
        }
    }

    let selected: Vec<Prompt> = corpus.into_iter().filter(|p| slugs.contains(&p.slug)).collect();
    if selected.is_empty() {
        bail!("No prompts match the requested slugs: {}", slugs.join(", "));
    }
    Ok(selected)
}
