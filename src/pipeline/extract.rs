//! Fact extraction from a claimed blob batch.

use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::blob::{Blob, BlobType, render_batch_xml};
use crate::config::{Config, ResolvedProfileConfig};
use crate::error::{BufferError, Result};
use crate::llm::CompletionProvider;
use crate::prompts::{self, ExtractedFact, ValidateOutcome};
use crate::store::{ProfileEntry, ProfileStore, ProjectConfigStore};

/// Precise-extraction temperature used for every pipeline completion.
pub(crate) const EXTRACTION_TEMPERATURE: f64 = 0.2;

/// Everything the merge step needs: the validated facts, the profile
/// snapshot they were extracted against, and the resolved project config.
#[derive(Debug)]
pub struct Extraction {
    pub facts: Vec<ExtractedFact>,
    pub profiles: Vec<ProfileEntry>,
    pub config: ResolvedProfileConfig,
}

pub struct ExtractionEngine {
    config: Arc<Config>,
    completion: Arc<dyn CompletionProvider>,
    profiles: Arc<ProfileStore>,
    project_configs: Arc<ProjectConfigStore>,
}

impl ExtractionEngine {
    pub fn new(
        config: Arc<Config>,
        completion: Arc<dyn CompletionProvider>,
        profiles: Arc<ProfileStore>,
        project_configs: Arc<ProjectConfigStore>,
    ) -> Self {
        Self {
            config,
            completion,
            profiles,
            project_configs,
        }
    }

    /// Run the extraction pass over a chat batch. Zero facts is a normal
    /// outcome, not an error.
    pub async fn extract(
        &self,
        user_id: &str,
        project_id: &str,
        blobs: &[Blob],
    ) -> Result<Extraction> {
        if let Some(blob) = blobs.iter().find(|b| b.blob_type() != BlobType::Chat) {
            return Err(BufferError::MixedBatch(format!(
                "blob {} is {}, extraction handles chat batches",
                blob.id,
                blob.blob_type()
            ))
            .into());
        }

        let profiles = self.profiles.get_user_profiles(user_id, project_id).await?;
        let resolved = self
            .project_configs
            .get(project_id)
            .await?
            .resolve(&self.config);

        let separator = &self.config.llm_tab_separator;
        let allowed = resolved.allowed_pairs();
        let mut known_pairs: Vec<(String, String)> = profiles
            .iter()
            .map(|p| (p.topic.clone(), p.sub_topic.clone()))
            .collect();
        if resolved.strict_mode {
            known_pairs.retain(|pair| allowed.contains(pair));
        }
        let known_section = prompts::extract::render_known_pairs(&known_pairs, separator);
        tracing::info!(
            user_id,
            project_id,
            profiles = profiles.len(),
            batch = blobs.len(),
            "extracting facts"
        );

        let system = prompts::extract::system_prompt(
            &prompts::extract::render_topics(&resolved, self.config.max_profile_subtopics),
            separator,
            resolved.strict_mode,
            resolved.language,
        );
        let input = prompts::extract::pack_input(&known_section, &render_batch_xml(blobs));
        let response = self
            .completion
            .complete(
                &input,
                Some(&system),
                &self.config.llm.best_llm_model,
                EXTRACTION_TEMPERATURE,
            )
            .await?;

        let mut facts = merge_same_key(parse_and_unify(&response, separator));
        if resolved.strict_mode {
            facts.retain(|fact| {
                let keep = allowed.contains(&(fact.topic.clone(), fact.sub_topic.clone()));
                if !keep {
                    tracing::warn!(
                        topic = %fact.topic,
                        sub_topic = %fact.sub_topic,
                        "strict mode dropped undeclared fact slot"
                    );
                }
                keep
            });
        }
        if facts.is_empty() {
            tracing::info!(user_id, "no new facts extracted");
        }

        let facts = self.validate_facts(facts, &resolved).await;
        Ok(Extraction {
            facts,
            profiles,
            config: resolved,
        })
    }

    /// Per-fact validation fan-out. A slot opts in via `validate_value`
    /// plus a description to judge against; a failed or unparseable
    /// validation call keeps the fact unrevised.
    async fn validate_facts(
        &self,
        facts: Vec<ExtractedFact>,
        resolved: &ResolvedProfileConfig,
    ) -> Vec<ExtractedFact> {
        let separator = &self.config.llm_tab_separator;
        let checks = facts.into_iter().map(|fact| async move {
            let description = resolved
                .find_sub_topic(&fact.topic, &fact.sub_topic)
                .filter(|slot| slot.validate_value)
                .and_then(|slot| slot.description.as_deref());
            let Some(description) = description else {
                return Some(fact);
            };

            let input =
                prompts::validate::pack_input(&fact.topic, &fact.sub_topic, &fact.memo, description);
            let system = prompts::validate::system_prompt(separator, resolved.language);
            match self
                .completion
                .complete(
                    &input,
                    Some(&system),
                    &self.config.llm.best_llm_model,
                    EXTRACTION_TEMPERATURE,
                )
                .await
            {
                Ok(response) => match prompts::parse_validate_result(&response, separator) {
                    Some(ValidateOutcome::Save(revised)) => Some(ExtractedFact {
                        memo: revised,
                        ..fact
                    }),
                    Some(ValidateOutcome::Reject) => {
                        tracing::info!(
                            topic = %fact.topic,
                            sub_topic = %fact.sub_topic,
                            "validation rejected fact"
                        );
                        None
                    }
                    None => {
                        tracing::warn!(
                            topic = %fact.topic,
                            "unparseable validation response, keeping fact unrevised"
                        );
                        Some(fact)
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        topic = %fact.topic,
                        error = %e,
                        "validation call failed, keeping fact unrevised"
                    );
                    Some(fact)
                }
            }
        });
        join_all(checks).await.into_iter().flatten().collect()
    }

    /// Summarize the batch into an event tip honoring the project's theme
    /// requirement. Uses the summary model when one is configured.
    pub async fn entry_summary(
        &self,
        blobs: &[Blob],
        resolved: &ResolvedProfileConfig,
    ) -> Result<String> {
        let system = prompts::summary::entry_summary_system_prompt(
            &prompts::extract::render_topics(resolved, self.config.max_profile_subtopics),
            resolved.event_theme_requirement.as_deref(),
            resolved.language,
        );
        let input = prompts::summary::entry_summary_pack_input(&render_batch_xml(blobs));
        let model = self
            .config
            .llm
            .summary_llm_model
            .as_deref()
            .unwrap_or(&self.config.llm.best_llm_model);
        let tip = self
            .completion
            .complete(&input, Some(&system), model, EXTRACTION_TEMPERATURE)
            .await?;
        Ok(tip.trim().to_string())
    }
}

fn parse_and_unify(response: &str, separator: &str) -> Vec<ExtractedFact> {
    prompts::parse_facts(response, separator)
        .into_iter()
        .map(|fact| ExtractedFact {
            topic: prompts::attribute_unify(&fact.topic),
            sub_topic: prompts::attribute_unify(&fact.sub_topic),
            memo: fact.memo,
        })
        .collect()
}

/// Intra-batch dedup: facts landing on the same slot concatenate with
/// `"; "`, first occurrence wins the position.
fn merge_same_key(facts: Vec<ExtractedFact>) -> Vec<ExtractedFact> {
    let mut order = Vec::new();
    let mut merged: BTreeMap<(String, String), ExtractedFact> = BTreeMap::new();
    for fact in facts {
        let key = (fact.topic.clone(), fact.sub_topic.clone());
        match merged.get_mut(&key) {
            Some(existing) => {
                existing.memo.push_str("; ");
                existing.memo.push_str(&fact.memo);
            }
            None => {
                order.push(key.clone());
                merged.insert(key, fact);
            }
        }
    }
    order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(topic: &str, sub_topic: &str, memo: &str) -> ExtractedFact {
        ExtractedFact {
            topic: topic.into(),
            sub_topic: sub_topic.into(),
            memo: memo.into(),
        }
    }

    #[test]
    fn same_key_facts_concatenate_in_order() {
        let merged = merge_same_key(vec![
            fact("interest", "food", "likes pizza"),
            fact("work", "title", "engineer"),
            fact("interest", "food", "likes pasta"),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].memo, "likes pizza; likes pasta");
        assert_eq!(merged[1].topic, "work");
    }

    #[test]
    fn parse_and_unify_normalizes_keys() {
        let facts = parse_and_unify("- Basic Info::Age::User is 40", "::");
        assert_eq!(facts[0].topic, "basic_info");
        assert_eq!(facts[0].sub_topic, "age");
    }
}
