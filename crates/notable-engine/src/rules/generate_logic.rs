//! Asks the language model to plan a pipeline for tasks that have none.

use std::collections::HashSet;

use async_trait::async_trait;

use notable_core::pipeline::Pipeline;
use notable_core::types::{MessageRole, Note, NoteKind};

use crate::error::RuleError;
use crate::rules::{Decision, Mutation, PlanningRule, RuleContext, RulePhase};
use crate::tool::ToolDefinition;

pub struct GenerateLogicRule;

#[async_trait]
impl PlanningRule for GenerateLogicRule {
    fn name(&self) -> &str {
        "generate_logic"
    }

    fn phase(&self) -> RulePhase {
        RulePhase::Before
    }

    async fn applies(&self, note: &Note, ctx: &RuleContext) -> Result<bool, RuleError> {
        Ok(note.kind == NoteKind::Task && note.logic.is_none() && ctx.llm.is_some())
    }

    async fn evaluate(&self, note: &Note, ctx: &RuleContext) -> Result<Decision, RuleError> {
        let Some(llm) = ctx.llm.as_ref() else {
            return Ok(Decision::NoOp);
        };
        let tools = ctx
            .tools
            .get_all()
            .map_err(|e| RuleError::Failed(e.to_string()))?;

        let reply = llm
            .invoke(&planning_prompt(note, &tools))
            .await
            .map_err(|e| RuleError::Model(e.to_string()))?;
        let pipeline = Pipeline::parse(&reply)?;

        let known: HashSet<_> = tools.iter().map(|t| t.id).collect();
        if let Some(unknown) = pipeline.tool_ids().into_iter().find(|id| !known.contains(id)) {
            return Err(RuleError::Failed(format!(
                "generated plan references unknown tool {}",
                unknown
            )));
        }

        let summary = format!("Generated a {}-step plan", pipeline.steps.len());
        Ok(Decision::Apply(vec![
            Mutation::SetLogic(pipeline),
            Mutation::AppendMessage {
                role: MessageRole::System,
                content: summary,
            },
        ]))
    }
}

fn planning_prompt(note: &Note, tools: &[ToolDefinition]) -> String {
    let mut prompt = String::from("Plan the execution of the following task.\n\n");
    prompt.push_str(&format!("Task: {}\n", note.title));
    if !note.description.is_empty() {
        prompt.push_str(&format!("Details: {}\n", note.description));
    }

    prompt.push_str("\nAvailable tools:\n");
    if tools.is_empty() {
        prompt.push_str("(none)\n");
    }
    for tool in tools {
        prompt.push_str(&format!("- {}: {}", tool.id, tool.title));
        if !tool.description.is_empty() {
            prompt.push_str(&format!(" - {}", tool.description));
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "\nReply with JSON only, in the form \
         {\"steps\": [{\"id\": \"step1\", \"type\": \"tool\", \"toolId\": \"<tool id>\", \"input\": {}}]}. \
         Use {\"id\": \"...\", \"type\": \"prompt\", \"prompt\": \"...\"} for steps that need no tool; \
         {{previous}} in a prompt is replaced by the previous step's output.\n",
    );
    prompt
}
