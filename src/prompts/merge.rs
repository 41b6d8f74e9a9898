//! Old-memo/new-memo merge prompt.

use chrono::Utc;

use crate::config::Language;

use super::language_requirement;

#[must_use]
pub fn system_prompt(separator: &str, language: Language) -> String {
    format!(
        "You are a memo manager maintaining one memo per aspect of a user.\n\
You are given an old and a new memo on the same topic. Decide the final memo:\n\
- replace the old memo when it is outdated or conflicts with the new one;\n\
- merge them when the old memo holds information the new one lacks;\n\
- keep the old memo when the new one adds nothing useful.\n\
\n\
If an '## Update Instruction' section is present, follow it.\n\
If a '### Topic Description' section is present, the final memo must fit it.\n\
\n\
## Output format\n\
To replace or merge, output exactly one line:\n\
- UPDATE{separator}MEMO\n\
To keep the old memo, output KEEP.\n\
Keep the final memo under 5 sentences, concise, no explanations.{lang}",
        lang = language_requirement(language)
    )
}

#[must_use]
pub fn pack_input(
    topic: &str,
    sub_topic: &str,
    old_memo: &str,
    new_memo: &str,
    update_instruction: Option<&str>,
    topic_description: Option<&str>,
) -> String {
    let today = Utc::now().format("%Y-%m-%d");
    let mut sections = vec![format!("Today is {today}.")];
    if let Some(instruction) = update_instruction {
        sections.push(format!("## Update Instruction\n{instruction}"));
    }
    let mut topic_section = format!("## User Topic\n{topic}, {sub_topic}");
    if let Some(description) = topic_description {
        topic_section.push_str(&format!("\n### Topic Description\n{description}"));
    }
    sections.push(topic_section);
    sections.push(format!("## Old Memo\n{old_memo}\n## New Memo\n{new_memo}"));
    sections.join("\n")
}
