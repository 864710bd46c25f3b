//! Prepends a web search step to tasks that need fresh information.

use async_trait::async_trait;
use serde_json::{json, Value};

use notable_core::pipeline::Step;
use notable_core::types::{MessageRole, Note, NoteKind};

use crate::error::RuleError;
use crate::rules::{Decision, Mutation, PlanningRule, RuleContext, RulePhase};

/// Config key recording that the rule already ran for a note.
pub const WEB_SEARCH_KEY: &str = "webSearch";

const RECENCY_KEYWORDS: &[&str] = &["latest", "today", "current", "news", "recent", "this week"];

pub struct WebSearchRule;

impl WebSearchRule {
    /// `requiresWebSearch` wins when set; otherwise look for recency keywords.
    fn needs_search(note: &Note) -> bool {
        if let Some(explicit) = note.requires_web_search {
            return explicit;
        }
        let text = format!("{} {}", note.title, note.description).to_lowercase();
        let words: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        RECENCY_KEYWORDS.iter().any(|k| contains_phrase(&words, k))
    }
}

/// Whether `phrase` occurs in `words` as whole consecutive words.
fn contains_phrase(words: &[&str], phrase: &str) -> bool {
    let wanted: Vec<&str> = phrase.split_whitespace().collect();
    !wanted.is_empty() && words.windows(wanted.len()).any(|w| w == wanted.as_slice())
}

#[async_trait]
impl PlanningRule for WebSearchRule {
    fn name(&self) -> &str {
        "web_search"
    }

    fn phase(&self) -> RulePhase {
        RulePhase::Before
    }

    async fn applies(&self, note: &Note, _ctx: &RuleContext) -> Result<bool, RuleError> {
        Ok(note.kind == NoteKind::Task
            && !note.config.contains_key(WEB_SEARCH_KEY)
            && Self::needs_search(note))
    }

    async fn evaluate(&self, note: &Note, ctx: &RuleContext) -> Result<Decision, RuleError> {
        let tools = ctx
            .tools
            .get_all()
            .map_err(|e| RuleError::Failed(e.to_string()))?;
        let search = tools
            .into_iter()
            .find(|t| t.title.to_lowercase().contains("search"));

        let Some(search) = search else {
            return Ok(Decision::Apply(vec![
                Mutation::AppendMessage {
                    role: MessageRole::System,
                    content: "Web search was requested but no search tool is registered"
                        .to_string(),
                },
                Mutation::SetConfig {
                    key: WEB_SEARCH_KEY.to_string(),
                    value: Value::Bool(false),
                },
            ]));
        };

        let step_id = unique_step_id(note, "web_search");
        Ok(Decision::Apply(vec![
            Mutation::PrependStep(Step::tool(
                step_id,
                search.id,
                json!({ "query": note.title }),
            )),
            Mutation::SetConfig {
                key: WEB_SEARCH_KEY.to_string(),
                value: Value::Bool(true),
            },
            Mutation::AppendMessage {
                role: MessageRole::System,
                content: format!("Added a web search step using '{}'", search.title),
            },
        ]))
    }
}

fn unique_step_id(note: &Note, base: &str) -> String {
    let taken = |id: &str| {
        note.logic
            .as_ref()
            .is_some_and(|p| p.steps.iter().any(|s| s.id == id))
    };
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", base, n))
        .find(|id| !taken(id))
        .unwrap_or_else(|| base.to_string())
}
