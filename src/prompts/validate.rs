//! Per-fact value validation prompt.

use chrono::Utc;

use crate::config::Language;

use super::language_requirement;

#[must_use]
pub fn system_prompt(separator: &str, language: Language) -> String {
    format!(
        "You validate whether a topic's value matches its description.\n\
Read the description's requirements (type, format, range, what it should\n\
record) and judge the given value against them.\n\
\n\
## Output format\n\
```\n\
THOUGHT\n\
---\n\
RESULT\n\
```\n\
Think first, then output RESULT after '---'.\n\
If the value can be revised to match the description, RESULT is one line:\n\
- SAVE{separator}REVISED_VALUE\n\
If the value is totally invalid for this topic, RESULT is exactly NONE.\n\
Never invent information that is not in the input; only revise or reject.{lang}",
        lang = language_requirement(language)
    )
}

#[must_use]
pub fn pack_input(topic: &str, sub_topic: &str, value: &str, topic_description: &str) -> String {
    let today = Utc::now().format("%Y-%m-%d");
    format!(
        "Today is {today}.\n\
## User Topic\n\
{topic}, {sub_topic}\n\
### Topic Description\n\
{topic_description}\n\
## Value\n\
{value}"
    )
}
