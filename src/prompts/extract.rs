//! Fact-extraction prompt.
//!
//! System prompt carries the candidate taxonomy and output grammar; user
//! prompt carries the already-known (topic, sub_topic) pairs and the
//! ordered transcript.

use crate::config::{Language, ResolvedProfileConfig};

use super::language_requirement;

/// Render the candidate taxonomy for the system prompt, capping the
/// sub_topics shown per topic.
#[must_use]
pub fn render_topics(config: &ResolvedProfileConfig, max_subtopics: usize) -> String {
    config
        .topics
        .iter()
        .map(|topic| {
            let header = match &topic.description {
                Some(desc) => format!("- {} ({desc})", topic.topic),
                None => format!("- {}", topic.topic),
            };
            if topic.sub_topics.is_empty() {
                return header;
            }
            let subs = topic
                .sub_topics
                .iter()
                .take(max_subtopics)
                .map(|sub| match &sub.description {
                    Some(desc) => format!("    - {}({desc})", sub.name),
                    None => format!("    - {}", sub.name),
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!("{header}\n{subs}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render known (topic, sub_topic) pairs as `- topic{sep}sub_topic`
/// lines, sorted and deduplicated. Empty input renders empty.
#[must_use]
pub fn render_known_pairs(pairs: &[(String, String)], separator: &str) -> String {
    let mut sorted: Vec<&(String, String)> = pairs.iter().collect();
    sorted.sort();
    sorted.dedup();
    sorted
        .iter()
        .map(|(topic, sub_topic)| format!("- {topic}{separator}{sub_topic}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[must_use]
pub fn system_prompt(
    topics_str: &str,
    separator: &str,
    strict_mode: bool,
    language: Language,
) -> String {
    let strict_clause = if strict_mode {
        "\nOnly use topics and sub_topics from the list above; never invent new ones."
    } else {
        "\nPrefer the topics and sub_topics above, but you may add a new sub_topic when the conversation clearly calls for one."
    };
    format!(
        "You are a professional psychologist extracting personal facts about the user from a conversation.\n\
\n\
## Candidate topics\n\
{topics_str}\n\
{strict_clause}\n\
\n\
## Output format\n\
One fact per line:\n\
- TOPIC{separator}SUB_TOPIC{separator}MEMO\n\
Each line starts with '- '. Keep each memo short and factual, about the user only.\n\
Record nothing when the conversation contains no personal information.{lang}",
        lang = language_requirement(language)
    )
}

#[must_use]
pub fn pack_input(already_known: &str, chat_section: &str) -> String {
    format!(
        "## Already recorded topics\n\
{already_known}\n\
\n\
## Conversation\n\
{chat_section}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ProfileConfig};

    #[test]
    fn render_topics_caps_subtopics_and_shows_descriptions() {
        let resolved = ProfileConfig::default().resolve(&Config::default());
        let rendered = render_topics(&resolved, 2);
        assert!(rendered.contains("- basic_info"));
        assert!(rendered.contains("    - name"));
        assert!(rendered.contains("    - age"));
        // third sub_topic cut by the cap
        assert!(!rendered.contains("gender"));
    }

    #[test]
    fn render_known_pairs_sorts_and_dedups() {
        let pairs = vec![
            ("work".to_string(), "title".to_string()),
            ("basic_info".to_string(), "age".to_string()),
            ("work".to_string(), "title".to_string()),
        ];
        assert_eq!(
            render_known_pairs(&pairs, "::"),
            "- basic_info::age\n- work::title"
        );
    }

    #[test]
    fn strict_mode_changes_instruction() {
        let strict = system_prompt("- t", "::", true, Language::En);
        let loose = system_prompt("- t", "::", false, Language::En);
        assert!(strict.contains("never invent"));
        assert!(loose.contains("may add a new sub_topic"));
    }
}
