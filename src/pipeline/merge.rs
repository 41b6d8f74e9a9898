//! Reconciling extracted facts with existing profile rows.
//!
//! All LLM-dependent decisions (merge calls, oversize re-summaries)
//! resolve before anything touches the store, so a provider failure
//! leaves profiles and events untouched.

use futures_util::future::join_all;
use std::sync::Arc;

use crate::config::{Config, ResolvedProfileConfig};
use crate::error::Result;
use crate::llm::CompletionProvider;
use crate::prompts::{self, ExtractedFact};
use crate::store::{
    EventData, EventStore, ProfileAttributes, ProfileDelta, ProfileEntry, ProfileStore,
};
use crate::tokens;

use super::extract::{EXTRACTION_TEMPERATURE, Extraction};

/// A resolved write against one profile slot.
#[derive(Debug)]
enum SlotDecision {
    Insert {
        fact: ExtractedFact,
    },
    Update {
        profile_id: String,
        fact: ExtractedFact,
    },
}

impl SlotDecision {
    fn fact(&self) -> &ExtractedFact {
        match self {
            Self::Insert { fact } | Self::Update { fact, .. } => fact,
        }
    }

    fn fact_mut(&mut self) -> &mut ExtractedFact {
        match self {
            Self::Insert { fact } | Self::Update { fact, .. } => fact,
        }
    }
}

pub struct MergeEngine {
    config: Arc<Config>,
    completion: Arc<dyn CompletionProvider>,
    profiles: Arc<ProfileStore>,
    events: Arc<EventStore>,
}

impl MergeEngine {
    pub fn new(
        config: Arc<Config>,
        completion: Arc<dyn CompletionProvider>,
        profiles: Arc<ProfileStore>,
        events: Arc<EventStore>,
    ) -> Self {
        Self {
            config,
            completion,
            profiles,
            events,
        }
    }

    /// Apply an extraction to the store and record the change as one
    /// event. Returns the applied delta and the event id, if any.
    pub async fn apply(
        &self,
        user_id: &str,
        project_id: &str,
        extraction: Extraction,
        event_tip: Option<String>,
    ) -> Result<(Vec<ProfileDelta>, Option<String>)> {
        let Extraction {
            facts,
            profiles,
            config: resolved,
        } = extraction;

        let mut decisions = Vec::new();
        for fact in facts {
            if let Some(decision) = self.decide(&profiles, &resolved, fact).await? {
                decisions.push(decision);
            }
        }
        self.resummarize_oversized(&resolved, &mut decisions).await?;

        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        let mut delta = Vec::new();
        for decision in &decisions {
            let fact = decision.fact();
            delta.push(ProfileDelta {
                content: fact.memo.clone(),
                topic: fact.topic.clone(),
                sub_topic: fact.sub_topic.clone(),
            });
            match decision {
                SlotDecision::Insert { fact } => inserts.push((
                    fact.memo.clone(),
                    ProfileAttributes {
                        topic: fact.topic.clone(),
                        sub_topic: fact.sub_topic.clone(),
                    },
                )),
                SlotDecision::Update { profile_id, fact } => {
                    updates.push((profile_id.clone(), fact.memo.clone()));
                }
            }
        }

        if !inserts.is_empty() || !updates.is_empty() {
            self.profiles
                .apply_delta(user_id, project_id, &inserts, &updates)
                .await?;
        }

        let event_id = if delta.is_empty() && event_tip.is_none() {
            None
        } else {
            let event_data = EventData {
                profile_delta: delta.clone(),
                event_tip,
                event_tags: None,
            };
            Some(
                self.events
                    .append_user_event(user_id, project_id, &event_data)
                    .await?,
            )
        };

        tracing::info!(
            user_id,
            project_id,
            inserted = inserts.len(),
            updated = updates.len(),
            "profile delta applied"
        );
        Ok((delta, event_id))
    }

    /// Decide what one fact does to its slot. `None` means keep the old
    /// memo untouched.
    async fn decide(
        &self,
        profiles: &[ProfileEntry],
        resolved: &ResolvedProfileConfig,
        fact: ExtractedFact,
    ) -> Result<Option<SlotDecision>> {
        let existing = profiles.iter().find(|p| {
            prompts::attribute_unify(&p.topic) == fact.topic
                && prompts::attribute_unify(&p.sub_topic) == fact.sub_topic
        });
        let Some(existing) = existing else {
            return Ok(Some(SlotDecision::Insert { fact }));
        };

        let slot = resolved.find_sub_topic(&fact.topic, &fact.sub_topic);
        let separator = &self.config.llm_tab_separator;
        let input = prompts::merge::pack_input(
            &fact.topic,
            &fact.sub_topic,
            &existing.content,
            &fact.memo,
            slot.and_then(|s| s.update_description.as_deref()),
            resolved.topic_description(&fact.topic),
        );
        let system = prompts::merge::system_prompt(separator, resolved.language);
        let response = self
            .completion
            .complete(
                &input,
                Some(&system),
                &self.config.llm.best_llm_model,
                EXTRACTION_TEMPERATURE,
            )
            .await?;

        match prompts::parse_merge_action(&response, separator) {
            Some(memo) => Ok(Some(SlotDecision::Update {
                profile_id: existing.id.clone(),
                fact: ExtractedFact { memo, ..fact },
            })),
            None => {
                tracing::info!(
                    topic = %fact.topic,
                    sub_topic = %fact.sub_topic,
                    "merge kept existing memo"
                );
                Ok(None)
            }
        }
    }

    /// Concurrently shrink any decided content above the per-profile token
    /// ceiling. A failed summary call fails the flush.
    async fn resummarize_oversized(
        &self,
        resolved: &ResolvedProfileConfig,
        decisions: &mut [SlotDecision],
    ) -> Result<()> {
        let ceiling = self.config.max_pre_profile_token_size;
        let oversized: Vec<usize> = decisions
            .iter()
            .enumerate()
            .filter(|(_, d)| tokens::count_tokens(&d.fact().memo) > ceiling)
            .map(|(i, _)| i)
            .collect();
        if oversized.is_empty() {
            return Ok(());
        }

        let system = prompts::summary::resummary_system_prompt(resolved.language);
        let summaries = join_all(oversized.iter().map(|&i| {
            let memo = decisions[i].fact().memo.clone();
            let system = system.clone();
            async move {
                self.completion
                    .complete(
                        &memo,
                        Some(&system),
                        &self.config.llm.best_llm_model,
                        EXTRACTION_TEMPERATURE,
                    )
                    .await
            }
        }))
        .await;

        for (&i, summary) in oversized.iter().zip(summaries) {
            let summary = summary?;
            decisions[i].fact_mut().memo = tokens::truncate_tokens(&summary, ceiling / 2);
        }
        Ok(())
    }
}
