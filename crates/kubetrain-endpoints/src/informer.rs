//! Watcher event translation
//!
//! kube-rs watchers report `Apply`/`Delete` and full relists, while the
//! notification router wants add, update, and delete notifications with the
//! previous object on updates. [`EventTranslator`] remembers the last version
//! of each endpoint and turns one into the other. Objects missing from a
//! relist are reported as deleted.

use std::collections::HashMap;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Service;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use tracing::warn;

/// Lifecycle notification for one endpoint
#[derive(Clone, Debug)]
pub enum EndpointEvent {
    Added(Arc<Service>),
    Updated {
        old: Arc<Service>,
        new: Arc<Service>,
    },
    Deleted(Arc<Service>),
}

/// Turns watcher events into [`EndpointEvent`]s
#[derive(Default)]
pub struct EventTranslator {
    known: HashMap<ObjectRef<Service>, Arc<Service>>,
    relist: Option<HashMap<ObjectRef<Service>, Arc<Service>>>,
}

impl EventTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one watcher event
    pub fn translate(&mut self, event: watcher::Event<Service>) -> Vec<EndpointEvent> {
        match event {
            watcher::Event::Apply(svc) => vec![self.apply(Arc::new(svc))],
            watcher::Event::Delete(svc) => {
                let svc = Arc::new(svc);
                self.known.remove(&ObjectRef::from_obj(svc.as_ref()));
                vec![EndpointEvent::Deleted(svc)]
            }
            watcher::Event::Init => {
                self.relist = Some(HashMap::new());
                Vec::new()
            }
            watcher::Event::InitApply(svc) => {
                let svc = Arc::new(svc);
                if let Some(relist) = self.relist.as_mut() {
                    relist.insert(ObjectRef::from_obj(svc.as_ref()), Arc::clone(&svc));
                }
                vec![self.apply(svc)]
            }
            watcher::Event::InitDone => {
                let Some(relist) = self.relist.take() else {
                    return Vec::new();
                };
                let vanished: Vec<EndpointEvent> = self
                    .known
                    .iter()
                    .filter(|(key, _)| !relist.contains_key(*key))
                    .map(|(_, svc)| EndpointEvent::Deleted(Arc::clone(svc)))
                    .collect();
                self.known = relist;
                vanished
            }
        }
    }

    fn apply(&mut self, svc: Arc<Service>) -> EndpointEvent {
        let key = ObjectRef::from_obj(svc.as_ref());
        match self.known.insert(key, Arc::clone(&svc)) {
            Some(old) => EndpointEvent::Updated { old, new: svc },
            None => EndpointEvent::Added(svc),
        }
    }
}

/// Translate a watcher stream into endpoint notifications
///
/// Watch errors are logged and skipped; the watcher itself recovers.
pub fn endpoint_events<S>(events: S) -> impl Stream<Item = EndpointEvent>
where
    S: Stream<Item = Result<watcher::Event<Service>, watcher::Error>>,
{
    let mut translator = EventTranslator::new();
    events
        .filter_map(|event| {
            futures::future::ready(match event {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "endpoint watch error");
                    None
                }
            })
        })
        .map(move |event| futures::stream::iter(translator.translate(event)))
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::ResourceExt;

    fn svc(name: &str, resource_version: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ml".to_string()),
                resource_version: Some(resource_version.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn describe(events: &[EndpointEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| match e {
                EndpointEvent::Added(s) => format!("add {}", s.name_any()),
                EndpointEvent::Updated { old, new } => format!(
                    "update {} {}->{}",
                    new.name_any(),
                    old.resource_version().unwrap_or_default(),
                    new.resource_version().unwrap_or_default()
                ),
                EndpointEvent::Deleted(s) => format!("delete {}", s.name_any()),
            })
            .collect()
    }

    #[test]
    fn apply_then_reapply_is_add_then_update() {
        let mut t = EventTranslator::new();
        assert_eq!(
            describe(&t.translate(watcher::Event::Apply(svc("a", "1")))),
            vec!["add a"]
        );
        assert_eq!(
            describe(&t.translate(watcher::Event::Apply(svc("a", "2")))),
            vec!["update a 1->2"]
        );
    }

    #[test]
    fn delete_forgets_object() {
        let mut t = EventTranslator::new();
        t.translate(watcher::Event::Apply(svc("a", "1")));
        assert_eq!(
            describe(&t.translate(watcher::Event::Delete(svc("a", "2")))),
            vec!["delete a"]
        );
        assert_eq!(
            describe(&t.translate(watcher::Event::Apply(svc("a", "3")))),
            vec!["add a"]
        );
    }

    /// Story: a relist after a watch gap reports what changed while disconnected
    #[test]
    fn story_relist_reports_updates_and_vanished_objects() {
        let mut t = EventTranslator::new();
        t.translate(watcher::Event::Apply(svc("a", "1")));
        t.translate(watcher::Event::Apply(svc("b", "1")));

        assert!(t.translate(watcher::Event::Init).is_empty());
        assert_eq!(
            describe(&t.translate(watcher::Event::InitApply(svc("a", "1")))),
            vec!["update a 1->1"]
        );
        assert_eq!(
            describe(&t.translate(watcher::Event::InitApply(svc("c", "1")))),
            vec!["add c"]
        );
        assert_eq!(
            describe(&t.translate(watcher::Event::InitDone)),
            vec!["delete b"]
        );

        // b is gone from the translator's view
        assert_eq!(
            describe(&t.translate(watcher::Event::Apply(svc("b", "5")))),
            vec!["add b"]
        );
    }

    #[test]
    fn init_done_without_init_is_ignored() {
        let mut t = EventTranslator::new();
        t.translate(watcher::Event::Apply(svc("a", "1")));
        assert!(t.translate(watcher::Event::InitDone).is_empty());
        assert_eq!(
            describe(&t.translate(watcher::Event::Apply(svc("a", "2")))),
            vec!["update a 1->2"]
        );
    }

    #[tokio::test]
    async fn stream_skips_watch_errors() {
        let input = futures::stream::iter(vec![
            Ok(watcher::Event::Apply(svc("a", "1"))),
            Err(watcher::Error::NoResourceVersion),
            Ok(watcher::Event::Delete(svc("a", "2"))),
        ]);
        let out: Vec<EndpointEvent> = endpoint_events(input).collect().await;
        assert_eq!(describe(&out), vec!["add a", "delete a"]);
    }
}
