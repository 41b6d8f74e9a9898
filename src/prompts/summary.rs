//! Re-summarization and event-tip prompts.

use crate::config::Language;

use super::language_requirement;

/// System prompt for shrinking an oversized profile memo.
#[must_use]
pub fn resummary_system_prompt(language: Language) -> String {
    format!(
        "You are given a piece of a user profile. Summarize it into a shorter form.\n\
\n\
## Requirement\n\
Summarize the given content concisely, in no more than 3 sentences.\n\
Remove redundant information and keep the most important facts.\n\
The result must use the same language as the input.{lang}",
        lang = language_requirement(language)
    )
}

/// System prompt for the per-flush event tip: a short record of what
/// happened in the batch, honoring the project's theme requirement.
#[must_use]
pub fn entry_summary_system_prompt(
    topics_str: &str,
    theme_requirement: Option<&str>,
    language: Language,
) -> String {
    let theme = theme_requirement
        .map(|req| format!("\n## Additional requirement\n{req}"))
        .unwrap_or_default();
    format!(
        "You are an expert at logging user information, schedules and events\n\
from a conversation between a user and an assistant.\n\
\n\
## Topics worth recording\n\
<topics>\n\
{topics_str}\n\
</topics>{theme}\n\
\n\
## Output format\n\
A markdown bullet list, one record per line, pure and concise. Include\n\
mention dates (and event dates when derivable) in a trailing [TIME] block.\n\
Output nothing when the conversation holds no recordable information.{lang}",
        lang = language_requirement(language)
    )
}

#[must_use]
pub fn entry_summary_pack_input(chat_section: &str) -> String {
    format!("## Conversation\n{chat_section}")
}
