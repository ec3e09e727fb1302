use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use cf_registry::DimensionId;
use cf_types::OptionItem;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CanonicalKey;
use crate::{CascadeConfig, LookupRequest, ResolverOutcome, ResolverSession};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("lookup transport failure: {0}")]
    Transport(String),
    #[error("lookup timed out after {0} ms")]
    Timeout(u64),
}

/// Wire envelope returned by the per-edge lookup endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LookupResponse {
    Ok { data: Vec<OptionItem> },
    Error { message: String },
}

impl LookupResponse {
    pub fn into_result(self) -> Result<Vec<OptionItem>, LookupError> {
        match self {
            Self::Ok { data } => Ok(data),
            Self::Error { message } => Err(LookupError::Transport(message)),
        }
    }
}

/// Seam between the resolver and whatever executes the keyed lookups.
/// Implementations must respect `config.lookup_timeout_ms`.
pub trait LookupTransport {
    fn fetch(
        &self,
        request: &LookupRequest,
        config: &CascadeConfig,
    ) -> Result<Vec<OptionItem>, LookupError>;
}

/// Deterministic in-memory transport: responses are stubbed per
/// `(dimension, key)` pair, and an unstubbed pair behaves like a timeout.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    responses: Arc<Mutex<BTreeMap<(DimensionId, CanonicalKey), Result<Vec<OptionItem>, LookupError>>>>,
}

impl InMemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stub(&self, dimension: DimensionId, key: CanonicalKey, options: Vec<OptionItem>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert((dimension, key), Ok(options));
        }
    }

    pub fn stub_failure(&self, dimension: DimensionId, key: CanonicalKey, error: LookupError) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert((dimension, key), Err(error));
        }
    }
}

impl LookupTransport for InMemoryTransport {
    fn fetch(
        &self,
        request: &LookupRequest,
        config: &CascadeConfig,
    ) -> Result<Vec<OptionItem>, LookupError> {
        let responses = self
            .responses
            .lock()
            .map_err(|_| LookupError::Transport("in-memory transport lock poisoned".to_owned()))?;
        match responses.get(&(request.dimension, request.key.clone())) {
            Some(Ok(options)) => Ok(options.clone()),
            Some(Err(error)) => Err(error.clone()),
            None => Err(LookupError::Timeout(config.lookup_timeout_ms)),
        }
    }
}

/// Pump every pending lookup through the transport until the session has no
/// outstanding work, feeding completions and failures back through the
/// session so staleness discard and reconciliation apply as usual. Returns
/// the settled state with the events accumulated across the whole drain.
pub fn drive(
    session: &mut ResolverSession,
    transport: &impl LookupTransport,
    initial: Vec<LookupRequest>,
) -> ResolverOutcome {
    let mut queue = initial;
    let mut events = Vec::new();
    while let Some(request) = queue.pop() {
        let outcome = match transport.fetch(&request, session.config()) {
            Ok(options) => {
                session.complete_lookup(request.dimension, request.key.clone(), options)
            }
            Err(error) => {
                session.fail_lookup(request.dimension, request.key.clone(), error.to_string())
            }
        };
        queue.extend(outcome.pending);
        events.extend(outcome.events);
    }
    let mut settled = session.snapshot();
    settled.events = events;
    settled
}

#[cfg(test)]
mod tests {
    use super::{InMemoryTransport, LookupError, LookupResponse, drive};
    use crate::cache::CanonicalKey;
    use crate::{CascadeEvent, MetadataSnapshot, OptionMode, ResolverSession};
    use cf_registry::DimensionId;
    use cf_types::OptionItem;
    use std::collections::BTreeMap;

    fn owned(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_owned()).collect()
    }

    fn key_for(parent: DimensionId, values: &[&str]) -> CanonicalKey {
        let mut parents = BTreeMap::new();
        parents.insert(parent, owned(values));
        CanonicalKey::from_parents(&parents)
    }

    fn metadata() -> MetadataSnapshot {
        MetadataSnapshot::new()
            .with_options(DimensionId::Pic, vec![OptionItem::plain("picA")])
            .with_options(
                DimensionId::Pid,
                vec![OptionItem::new("Publisher 1001", "1001")],
            )
            .with_options(
                DimensionId::Mid,
                vec![OptionItem::new("Media 2001", "2001")],
            )
    }

    #[test]
    fn response_envelope_decodes_both_arms() {
        let ok: LookupResponse = serde_json::from_value(serde_json::json!({
            "status": "ok",
            "data": [{"label": "Publisher 1001", "value": "1001"}]
        }))
        .expect("decodes");
        assert_eq!(
            ok.into_result().expect("ok arm"),
            vec![OptionItem::new("Publisher 1001", "1001")]
        );

        let err: LookupResponse = serde_json::from_value(serde_json::json!({
            "status": "error",
            "message": "upstream 503"
        }))
        .expect("decodes");
        assert_eq!(
            err.into_result().expect_err("error arm"),
            LookupError::Transport("upstream 503".to_owned())
        );
    }

    #[test]
    fn drive_pumps_a_chained_cascade_to_completion() {
        let transport = InMemoryTransport::new();
        transport.stub(
            DimensionId::Pid,
            key_for(DimensionId::Pic, &["picA"]),
            vec![OptionItem::new("Publisher 1001", "1001")],
        );

        let mut session = ResolverSession::standard(metadata());
        let outcome = session.apply_selection(DimensionId::Pic, owned(&["picA"]));
        let settled = drive(&mut session, &transport, outcome.pending);

        assert_eq!(
            settled.option_sets[&DimensionId::Pid].mode,
            OptionMode::Filtered
        );
        assert_eq!(
            settled.option_sets[&DimensionId::Pid].options,
            vec![OptionItem::new("Publisher 1001", "1001")]
        );
        assert!(settled.pending.is_empty());
    }

    #[test]
    fn unstubbed_lookup_times_out_and_degrades_to_empty() {
        let transport = InMemoryTransport::new();
        let mut session = ResolverSession::standard(metadata());
        session.apply_selection(DimensionId::Pid, owned(&["1001"]));
        let outcome = session.apply_selection(DimensionId::Pic, owned(&["picA"]));
        let settled = drive(&mut session, &transport, outcome.pending);

        assert_eq!(
            settled.option_sets[&DimensionId::Pid].mode,
            OptionMode::Empty
        );
        // The selection survives the failure so a retry can restore it.
        assert_eq!(settled.selection.get(DimensionId::Pid), owned(&["1001"]));
        assert!(settled.events.iter().any(|event| matches!(
            event,
            CascadeEvent::LookupFailed { dimension: DimensionId::Pid, message, .. }
                if message.contains("timed out after 10000 ms")
        )));
    }

    #[test]
    fn stubbed_failure_surfaces_the_transport_message() {
        let transport = InMemoryTransport::new();
        transport.stub_failure(
            DimensionId::Pid,
            key_for(DimensionId::Pic, &["picA"]),
            LookupError::Transport("upstream 503".to_owned()),
        );

        let mut session = ResolverSession::standard(metadata());
        let outcome = session.apply_selection(DimensionId::Pic, owned(&["picA"]));
        let settled = drive(&mut session, &transport, outcome.pending);

        assert!(settled.events.iter().any(|event| matches!(
            event,
            CascadeEvent::LookupFailed { message, .. } if message.contains("upstream 503")
        )));
    }
}
