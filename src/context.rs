//! Prompt-ready context assembly.
//!
//! Combines the truncated profile list with recent events into one string
//! a caller can drop into a system prompt. Both sections are ranked and
//! token-budgeted independently.

use std::sync::Arc;

use crate::error::Result;
use crate::store::{EventStore, ProfileStore, truncate_profiles};

/// Knobs for one context read; `Default` gives sensible budgets.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Topics hoisted to the front of the profile section, in order.
    pub prefer_topics: Option<Vec<String>>,
    /// Cap on profile rows before the token budget applies.
    pub profile_topk: Option<usize>,
    pub max_profile_token_size: Option<usize>,
    pub event_topk: usize,
    pub max_event_token_size: Option<usize>,
    /// Restrict the events section to tip-bearing events.
    pub require_event_summary: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            prefer_topics: None,
            profile_topk: None,
            max_profile_token_size: Some(2000),
            event_topk: 10,
            max_event_token_size: Some(1000),
            require_event_summary: false,
        }
    }
}

pub struct ContextBuilder {
    profiles: Arc<ProfileStore>,
    events: Arc<EventStore>,
}

impl ContextBuilder {
    pub fn new(profiles: Arc<ProfileStore>, events: Arc<EventStore>) -> Self {
        Self { profiles, events }
    }

    pub async fn get_user_context(
        &self,
        user_id: &str,
        project_id: &str,
        opts: &ContextOptions,
    ) -> Result<String> {
        let profiles = self.profiles.get_user_profiles(user_id, project_id).await?;
        let profiles = truncate_profiles(
            &profiles,
            opts.prefer_topics.as_deref(),
            opts.profile_topk,
            opts.max_profile_token_size,
        );
        let profile_section = profiles
            .iter()
            .map(|p| format!("- {}::{}: {}", p.topic, p.sub_topic, p.content))
            .collect::<Vec<_>>()
            .join("\n");

        let events = self
            .events
            .get_user_events(
                user_id,
                project_id,
                opts.event_topk,
                opts.max_event_token_size,
                opts.require_event_summary,
            )
            .await?;
        let event_section = events
            .iter()
            .map(crate::store::Event::render)
            .collect::<Vec<_>>()
            .join("\n");

        Ok(format!(
            "# Memory\n\
## User Profile\n\
{profile_section}\n\
\n\
## Latest Events\n\
{event_section}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::llm::NoopEmbedding;
    use crate::store::{Database, EventData, ProfileAttributes, ProfileDelta};
    use std::time::Duration;

    async fn builder() -> (Database, ContextBuilder, Arc<ProfileStore>, Arc<EventStore>) {
        let db = Database::in_memory().await.unwrap();
        let profiles = Arc::new(ProfileStore::new(
            db.pool().clone(),
            InMemoryCache::new(),
            Duration::from_secs(60),
        ));
        let events = Arc::new(EventStore::new(
            db.pool().clone(),
            Arc::new(NoopEmbedding),
            8192,
        ));
        let context = ContextBuilder::new(profiles.clone(), events.clone());
        (db, context, profiles, events)
    }

    #[tokio::test]
    async fn context_renders_profiles_and_events() {
        let (_db, context, profiles, events) = builder().await;
        profiles
            .add_user_profiles(
                "u1",
                "p1",
                &["User is 40".into()],
                &[ProfileAttributes {
                    topic: "basic_info".into(),
                    sub_topic: "age".into(),
                }],
            )
            .await
            .unwrap();
        events
            .append_user_event(
                "u1",
                "p1",
                &EventData {
                    profile_delta: vec![ProfileDelta {
                        content: "User is 40".into(),
                        topic: "basic_info".into(),
                        sub_topic: "age".into(),
                    }],
                    ..EventData::default()
                },
            )
            .await
            .unwrap();

        let rendered = context
            .get_user_context("u1", "p1", &ContextOptions::default())
            .await
            .unwrap();
        assert!(rendered.contains("## User Profile"));
        assert!(rendered.contains("- basic_info::age: User is 40"));
        assert!(rendered.contains("## Latest Events"));
    }

    #[tokio::test]
    async fn empty_user_yields_empty_sections() {
        let (_db, context, _profiles, _events) = builder().await;
        let rendered = context
            .get_user_context("ghost", "p1", &ContextOptions::default())
            .await
            .unwrap();
        assert!(rendered.starts_with("# Memory"));
    }
}
