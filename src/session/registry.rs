use std::collections::HashMap;

use crate::pipeline::{AudioPipeline, PipelineId};
use crate::protocol::ConnectionId;

/// Connection → live solo pipeline
///
/// Holds at most one pipeline per connection. Installing over an existing
/// entry hands the old pipeline back so the caller can tear it down.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<ConnectionId, AudioPipeline>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, id: ConnectionId, pipeline: AudioPipeline) -> Option<AudioPipeline> {
        self.sessions.insert(id, pipeline)
    }

    pub fn remove(&mut self, id: &ConnectionId) -> Option<AudioPipeline> {
        self.sessions.remove(id)
    }

    /// Remove the entry only while it still holds pipeline `pipeline`
    ///
    /// A stop notification from a superseded recognizer must never evict the
    /// live session that replaced it.
    pub fn remove_if_current(
        &mut self,
        id: &ConnectionId,
        pipeline: PipelineId,
    ) -> Option<AudioPipeline> {
        match self.sessions.get(id) {
            Some(current) if current.id() == pipeline => self.sessions.remove(id),
            _ => None,
        }
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&AudioPipeline> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &ConnectionId) -> Option<&mut AudioPipeline> {
        self.sessions.get_mut(id)
    }

    /// The pipeline for `id`, if it is `pipeline`
    pub fn current_mut(
        &mut self,
        id: &ConnectionId,
        pipeline: PipelineId,
    ) -> Option<&mut AudioPipeline> {
        self.sessions
            .get_mut(id)
            .filter(|current| current.id() == pipeline)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AudioSink, Recognizer, RecognizerFactory, RecognizerParts};
    use crate::pipeline::PipelineSettings;
    use anyhow::Result;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct Inert;

    #[async_trait::async_trait]
    impl Recognizer for Inert {
        async fn start(&mut self) -> Result<()> {
            Ok(())
        }
        async fn stop(&mut self) -> Result<()> {
            Ok(())
        }
        fn name(&self) -> &str {
            "inert"
        }
    }

    #[async_trait::async_trait]
    impl AudioSink for Inert {
        async fn write(&self, _audio: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl RecognizerFactory for Inert {
        async fn create(&self, _session_id: &str, _language: &str) -> Result<RecognizerParts> {
            let (_tx, events) = mpsc::unbounded_channel();
            Ok(RecognizerParts {
                recognizer: Box::new(Inert),
                sink: Arc::new(Inert),
                events,
            })
        }
    }

    async fn pipeline(id: &ConnectionId) -> AudioPipeline {
        let settings = PipelineSettings {
            language: "en-US".to_string(),
            target_language: Some("zh-TW".to_string()),
            tts_enabled: false,
        };
        AudioPipeline::open(&Inert, id, settings).await.unwrap().0
    }

    #[tokio::test]
    async fn test_install_returns_replaced_pipeline() {
        let mut registry = SessionRegistry::new();
        let conn = ConnectionId::new();

        let first = pipeline(&conn).await;
        let first_id = first.id();
        assert!(registry.install(conn.clone(), first).is_none());

        let replaced = registry.install(conn.clone(), pipeline(&conn).await).unwrap();
        assert_eq!(replaced.id(), first_id);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_removal_is_ignored() {
        let mut registry = SessionRegistry::new();
        let conn = ConnectionId::new();

        let old = pipeline(&conn).await;
        let old_id = old.id();
        registry.install(conn.clone(), old);
        let new = pipeline(&conn).await;
        let new_id = new.id();
        registry.install(conn.clone(), new);

        assert!(registry.remove_if_current(&conn, old_id).is_none());
        assert_eq!(registry.get(&conn).map(|p| p.id()), Some(new_id));

        assert!(registry.remove_if_current(&conn, new_id).is_some());
        assert!(registry.is_empty());
    }
}
