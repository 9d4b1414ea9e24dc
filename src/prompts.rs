//! Prompt builders for specialists and the moderator
//!
//! Each specialist gets an identity, a mandate, and rules in its system
//! prompt. The moderator's contract is the important one: it must resolve
//! contradictions with the fixed precedence rules and must end with a
//! literal `Final Answer:` section so the finalizer can extract it.

use std::collections::BTreeMap;

use crate::classify::SpecialistRole;
use crate::memory::ConversationEntry;

/// System prompt for a specialist role
pub fn specialist_system_prompt(role: SpecialistRole) -> &'static str {
    match role {
        SpecialistRole::Domain => {
            "You are the domain expert on a product requirement panel. Your lens: \
             business context, target market, industry dynamics, compliance and \
             regulation.\n\n\
             Rules:\n\
             - Ground every claim in how this market actually works.\n\
             - Name the regulatory or compliance constraints that apply, or say none do.\n\
             - Call out assumptions the requirement makes about its users or industry.\n\
             - Take clear positions. Hedged analysis helps nobody."
        }
        SpecialistRole::UxUi => {
            "You are the UX/UI specialist on a product requirement panel. Your lens: \
             user experience, interface design, usability, accessibility.\n\n\
             Rules:\n\
             - Walk the primary user journey the requirement implies and flag friction.\n\
             - Be concrete about screens, flows, and interaction patterns.\n\
             - Accessibility is part of the baseline, not a nice-to-have.\n\
             - If the requirement is unclear about who the user is, say so first."
        }
        SpecialistRole::Technical => {
            "You are the technical architect on a product requirement panel. Your lens: \
             system architecture, data model, APIs, infrastructure, scalability.\n\n\
             Rules:\n\
             - Sketch the architecture this requirement actually needs, not the fashionable one.\n\
             - Name the hard technical problems and where the risk concentrates.\n\
             - Be specific about data storage, integration points, and scaling limits.\n\
             - Feasibility verdicts must be explicit: buildable, buildable-with-caveats, or not."
        }
        SpecialistRole::Revenue => {
            "You are the revenue analyst on a product requirement panel. Your lens: \
             pricing, monetization, unit economics, revenue potential.\n\n\
             Rules:\n\
             - Propose concrete pricing and monetization models, with numbers where possible.\n\
             - Identify who pays, why they keep paying, and what churns them.\n\
             - Flag requirements that cost more to run than they can earn.\n\
             - Separate proven revenue mechanics from speculation."
        }
    }
}

/// System prompt for the moderator pass.
///
/// The precedence rules and the closing `Final Answer:` label are the
/// contract; the finalizer extracts that section verbatim.
pub const MODERATOR_SYSTEM_PROMPT: &str = "\
You are the moderator of a product requirement panel. Specialists have each \
analyzed the same requirement through their own lens; your job is to produce \
one consolidated analysis.

Rules:
1. Summarize each specialist's key claims. Do not invent claims they did not make.
2. Where specialists contradict each other, resolve explicitly:
   - For feasibility questions, precedence is technical > domain > ux_ui > revenue.
   - For market or positioning questions, precedence is domain > revenue > ux_ui > technical.
   - Otherwise merge the positions without ranking them.
3. Write one continuous narrative, not a list of verdicts.
4. End with a section that begins with the literal label \"Final Answer:\" \
containing the consolidated recommendation. This label is mandatory.";

/// Render a thread's recent history for prompt context.
///
/// `entries` arrive most-recent-first (store order); the rendering is
/// chronological, capped at `limit` entries, one blank line between turns.
pub fn render_history(entries: &[ConversationEntry], limit: usize) -> String {
    let mut recent: Vec<&ConversationEntry> = entries.iter().take(limit).collect();
    recent.reverse();
    recent
        .iter()
        .map(|e| {
            format!(
                "[{}] Q: {} / A: {}",
                e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                e.user_query,
                e.final_answer
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Build the user message for a specialist invocation
pub fn build_specialist_prompt(user_query: &str, rendered_history: &str) -> String {
    let mut prompt = format!("## Requirement\n{user_query}\n\n");

    if !rendered_history.is_empty() {
        prompt.push_str(&format!("## Conversation So Far\n{rendered_history}\n\n"));
    }

    prompt.push_str(
        "## Your Task\nAnalyze this requirement through your lens. Be specific and \
         take clear positions.\n",
    );
    prompt
}

/// Build the moderator message from the specialist outputs
pub fn build_moderator_prompt(
    user_query: &str,
    outputs: &BTreeMap<String, String>,
) -> String {
    let mut prompt = format!("## Requirement\n{user_query}\n\n## Specialist Analyses\n\n");

    // Fixed role order so the prompt is stable across runs.
    for role in SpecialistRole::ALL {
        if let Some(text) = outputs.get(role.as_str()) {
            prompt.push_str(&format!("### {}\n{}\n\n", role.as_str(), text));
        }
    }

    prompt.push_str(
        "## Your Task\nConsolidate these analyses per your instructions. \
         Remember the mandatory closing \"Final Answer:\" section.\n",
    );
    prompt
}

/// Build the message for a moderator shortcut: no fresh specialist runs,
/// one aggregation pass over what the thread already established.
pub fn build_memory_review_prompt(user_query: &str, rendered_history: &str) -> String {
    format!(
        "## Follow-up Question\n{user_query}\n\n\
         ## Conversation So Far\n{rendered_history}\n\n\
         ## Your Task\nAnswer the follow-up from what the conversation has already \
         established. Do not re-analyze from scratch. \
         End with the mandatory \"Final Answer:\" section.\n"
    )
}
