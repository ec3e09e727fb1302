#![forbid(unsafe_code)]

pub mod cache;
pub mod metadata;
pub mod selection;
pub mod transport;

use std::collections::{BTreeMap, BTreeSet};

use cf_graph::{CascadeGraph, Resolution};
use cf_registry::DimensionId;
use cf_types::OptionItem;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use cache::{CanonicalKey, OptionCache};
pub use metadata::{MetadataError, MetadataSnapshot};
pub use selection::Selection;
pub use transport::{InMemoryTransport, LookupError, LookupResponse, LookupTransport, drive};

use cache::now_unix_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionMode {
    All,
    Filtered,
    Loading,
    Empty,
}

/// A dimension's current valid option set and how it was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedOptionSet {
    pub options: Vec<OptionItem>,
    pub mode: OptionMode,
}

impl ResolvedOptionSet {
    fn unrestricted(options: Vec<OptionItem>) -> Self {
        Self {
            options,
            mode: OptionMode::All,
        }
    }

    fn from_restricted(options: Vec<OptionItem>) -> Self {
        let mode = if options.is_empty() {
            OptionMode::Empty
        } else {
            OptionMode::Filtered
        };
        Self { options, mode }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeConfig {
    pub lookup_timeout_ms: u64,
    pub cache_ttl_ms: u64,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: 10_000,
            cache_ttl_ms: 300_000,
        }
    }
}

/// An asynchronous lookup the host must execute. The key is captured at
/// dispatch time; completion compares it against the dimension's current
/// key so a slow, stale response can never clobber a newer one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequest {
    pub dimension: DimensionId,
    pub key: CanonicalKey,
    /// Comma-joined query fragment per parent dimension, ready for the
    /// `GET <endpoint>?<parent>=<values>` lookup contract.
    pub parents: BTreeMap<DimensionId, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeEvent {
    LookupFailed {
        dimension: DimensionId,
        key: CanonicalKey,
        message: String,
    },
    StaleLookupDiscarded {
        dimension: DimensionId,
        key: CanonicalKey,
    },
    SelectionPruned {
        dimension: DimensionId,
        removed: Vec<String>,
    },
}

/// Snapshot returned by every resolver entry point: the updated selection
/// and option sets, lookups that still need to be executed, and the typed
/// events raised during the pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverOutcome {
    pub selection: Selection,
    pub option_sets: BTreeMap<DimensionId, ResolvedOptionSet>,
    pub pending: Vec<LookupRequest>,
    pub events: Vec<CascadeEvent>,
}

/// Selection consistency maintenance: for every dimension whose mode is not
/// `LOADING`, keep only the selected values present in its option set. A
/// loading dimension is skipped because its placeholder list must never
/// evict a selection still awaiting its authoritative answer.
#[must_use]
pub fn reconcile(
    option_sets: &BTreeMap<DimensionId, ResolvedOptionSet>,
    selection: &Selection,
) -> (Selection, bool) {
    let mut next = selection.clone();
    let mut changed = false;
    for dimension in selection.dimensions().collect::<Vec<_>>() {
        let Some(set) = option_sets.get(&dimension) else {
            continue;
        };
        if set.mode == OptionMode::Loading {
            continue;
        }
        // An unrestricted dimension with no metadata list is unconstrained,
        // not empty.
        if set.mode == OptionMode::All && set.options.is_empty() {
            continue;
        }
        let allowed: BTreeSet<&str> = set.options.iter().map(|o| o.value.as_str()).collect();
        let current = selection.get(dimension);
        let kept: Vec<String> = current
            .iter()
            .filter(|value| allowed.contains(value.as_str()))
            .cloned()
            .collect();
        if kept.len() != current.len() {
            next.set(dimension, kept);
            changed = true;
        }
    }
    (next, changed)
}

/// One user session's cascade state: selections, per-dimension option sets,
/// the keyed option cache, and in-flight lookup bookkeeping. All mutation
/// goes through the entry points below so reconciliation is never bypassed.
#[derive(Debug, Clone)]
pub struct ResolverSession {
    graph: CascadeGraph,
    metadata: MetadataSnapshot,
    config: CascadeConfig,
    selection: Selection,
    option_sets: BTreeMap<DimensionId, ResolvedOptionSet>,
    cache: OptionCache,
    inflight: BTreeSet<(DimensionId, CanonicalKey)>,
    /// Dimensions whose last lookup failed. Their `EMPTY` option set is a
    /// degraded placeholder, so reconciliation must not evict against it;
    /// the user's selection survives transient failures.
    failed: BTreeSet<DimensionId>,
}

impl ResolverSession {
    #[must_use]
    pub fn new(graph: CascadeGraph, metadata: MetadataSnapshot, config: CascadeConfig) -> Self {
        let cache = OptionCache::new(config.cache_ttl_ms);
        let mut option_sets = BTreeMap::new();
        for dimension in DimensionId::ALL {
            option_sets.insert(
                dimension,
                ResolvedOptionSet::unrestricted(metadata.options_for(dimension).to_vec()),
            );
        }
        Self {
            graph,
            metadata,
            config,
            selection: Selection::new(),
            option_sets,
            cache,
            inflight: BTreeSet::new(),
            failed: BTreeSet::new(),
        }
    }

    /// Session over the production cascade graph with default timeouts.
    #[must_use]
    pub fn standard(metadata: MetadataSnapshot) -> Self {
        Self::new(CascadeGraph::standard(), metadata, CascadeConfig::default())
    }

    #[must_use]
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    #[must_use]
    pub fn option_set(&self, dimension: DimensionId) -> Option<&ResolvedOptionSet> {
        self.option_sets.get(&dimension)
    }

    #[must_use]
    pub fn option_sets(&self) -> &BTreeMap<DimensionId, ResolvedOptionSet> {
        &self.option_sets
    }

    #[must_use]
    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &OptionCache {
        &self.cache
    }

    #[must_use]
    pub fn graph(&self) -> &CascadeGraph {
        &self.graph
    }

    /// Current state without running a pass.
    #[must_use]
    pub fn snapshot(&self) -> ResolverOutcome {
        self.outcome(Vec::new(), Vec::new())
    }

    /// Replace the selection for one dimension and recompute everything
    /// downstream of it. The dimension's own option set is left alone; only
    /// descendants are recomputed.
    pub fn apply_selection(
        &mut self,
        dimension: DimensionId,
        values: Vec<String>,
    ) -> ResolverOutcome {
        self.selection.set(dimension, values);
        self.run_pass(&[dimension])
    }

    /// Append-union variant of [`ResolverSession::apply_selection`] for
    /// repeated picks on the same dimension.
    pub fn merge_selection(
        &mut self,
        dimension: DimensionId,
        values: Vec<String>,
    ) -> ResolverOutcome {
        self.selection.merge(dimension, values);
        self.run_pass(&[dimension])
    }

    /// Apply a finished lookup. The result is discarded when the dimension's
    /// current canonical key no longer matches the key captured at dispatch
    /// time (the user moved on while the lookup was in flight).
    pub fn complete_lookup(
        &mut self,
        dimension: DimensionId,
        key: CanonicalKey,
        options: Vec<OptionItem>,
    ) -> ResolverOutcome {
        self.inflight.remove(&(dimension, key.clone()));
        if self.current_key(dimension).as_ref() != Some(&key) {
            warn!(%dimension, %key, "discarding stale lookup result");
            return self.outcome(
                Vec::new(),
                vec![CascadeEvent::StaleLookupDiscarded { dimension, key }],
            );
        }

        let now_ms = now_unix_ms();
        debug!(%dimension, %key, count = options.len(), "lookup completed");
        let options = self.align_with_metadata(dimension, options);
        self.cache
            .insert(dimension, key, options.clone(), now_ms);
        self.option_sets
            .insert(dimension, ResolvedOptionSet::from_restricted(options));
        self.failed.remove(&dimension);

        let mut pending = Vec::new();
        let mut events = Vec::new();
        self.reconcile_to_fixed_point(now_ms, &mut pending, &mut events);
        self.outcome(pending, events)
    }

    /// Record a lookup error or timeout. The dimension degrades to `EMPTY`
    /// but the user's existing selection for it is preserved; the failure is
    /// surfaced as a [`CascadeEvent::LookupFailed`] the UI may retry.
    pub fn fail_lookup(
        &mut self,
        dimension: DimensionId,
        key: CanonicalKey,
        message: impl Into<String>,
    ) -> ResolverOutcome {
        self.inflight.remove(&(dimension, key.clone()));
        let message = message.into();
        if self.current_key(dimension).as_ref() != Some(&key) {
            warn!(%dimension, %key, %message, "discarding stale lookup failure");
            return self.outcome(
                Vec::new(),
                vec![CascadeEvent::StaleLookupDiscarded { dimension, key }],
            );
        }

        warn!(%dimension, %key, %message, "lookup failed");
        self.option_sets.insert(
            dimension,
            ResolvedOptionSet {
                options: Vec::new(),
                mode: OptionMode::Empty,
            },
        );
        self.failed.insert(dimension);
        self.outcome(
            Vec::new(),
            vec![CascadeEvent::LookupFailed {
                dimension,
                key,
                message,
            }],
        )
    }

    /// Retry affordance for a failed dimension: recompute it (re-dispatching
    /// the lookup if needed) and reconcile.
    pub fn retry_dimension(&mut self, dimension: DimensionId) -> ResolverOutcome {
        self.failed.remove(&dimension);
        let now_ms = now_unix_ms();
        let mut pending = Vec::new();
        let mut events = Vec::new();
        self.resolve_dimension(dimension, now_ms, &mut pending);
        self.reconcile_to_fixed_point(now_ms, &mut pending, &mut events);
        self.outcome(pending, events)
    }

    /// Process-wide metadata refresh: drop the whole option cache and
    /// recompute every dimension against the new snapshot.
    pub fn refresh_metadata(&mut self, metadata: MetadataSnapshot) -> ResolverOutcome {
        self.metadata = metadata;
        self.cache.invalidate_all();
        self.failed.clear();

        let now_ms = now_unix_ms();
        let mut pending = Vec::new();
        let mut events = Vec::new();
        for dimension in DimensionId::ALL {
            self.option_sets.insert(
                dimension,
                ResolvedOptionSet::unrestricted(self.metadata.options_for(dimension).to_vec()),
            );
        }
        for dimension in self.graph.topological_order().to_vec() {
            self.resolve_dimension(dimension, now_ms, &mut pending);
        }
        self.reconcile_to_fixed_point(now_ms, &mut pending, &mut events);
        self.outcome(pending, events)
    }

    fn run_pass(&mut self, roots: &[DimensionId]) -> ResolverOutcome {
        let now_ms = now_unix_ms();
        let mut pending = Vec::new();
        let mut events = Vec::new();
        self.resolve_descendants(roots, now_ms, &mut pending);
        self.reconcile_to_fixed_point(now_ms, &mut pending, &mut events);
        self.outcome(pending, events)
    }

    fn resolve_descendants(
        &mut self,
        roots: &[DimensionId],
        now_ms: u64,
        pending: &mut Vec<LookupRequest>,
    ) {
        let mut affected = BTreeSet::new();
        for root in roots {
            affected.extend(self.graph.descendants_of(*root));
        }
        let order: Vec<DimensionId> = self
            .graph
            .topological_order()
            .iter()
            .copied()
            .filter(|dimension| affected.contains(dimension))
            .collect();
        for dimension in order {
            self.resolve_dimension(dimension, now_ms, pending);
        }
    }

    fn resolve_dimension(
        &mut self,
        dimension: DimensionId,
        now_ms: u64,
        pending: &mut Vec<LookupRequest>,
    ) {
        let parents = self.selected_parents(dimension);
        if parents.is_empty() {
            self.failed.remove(&dimension);
            self.option_sets.insert(
                dimension,
                ResolvedOptionSet::unrestricted(self.metadata.options_for(dimension).to_vec()),
            );
            return;
        }

        let key = CanonicalKey::from_parents(&parents);
        if let Some(cached) = self.cache.get(dimension, &key, now_ms) {
            let options = cached.to_vec();
            debug!(%dimension, %key, "option cache hit");
            self.failed.remove(&dimension);
            self.option_sets
                .insert(dimension, ResolvedOptionSet::from_restricted(options));
            return;
        }

        let needs_remote = self
            .graph
            .parents_of(dimension)
            .iter()
            .any(|edge| edge.resolution == Resolution::Remote && parents.contains_key(&edge.from));
        if needs_remote {
            // Keep the previous list as a placeholder while loading; the
            // reconciler skips LOADING dimensions so it cannot evict
            // against it.
            let placeholder = self
                .option_sets
                .get(&dimension)
                .map(|set| set.options.clone())
                .unwrap_or_else(|| self.metadata.options_for(dimension).to_vec());
            self.option_sets.insert(
                dimension,
                ResolvedOptionSet {
                    options: placeholder,
                    mode: OptionMode::Loading,
                },
            );
            if self.inflight.insert((dimension, key.clone())) {
                debug!(%dimension, %key, "lookup dispatched");
                let query = parents
                    .iter()
                    .map(|(parent, values)| {
                        let mut sorted: Vec<&str> =
                            values.iter().map(String::as_str).collect();
                        sorted.sort_unstable();
                        sorted.dedup();
                        (*parent, sorted.join(","))
                    })
                    .collect();
                pending.push(LookupRequest {
                    dimension,
                    key,
                    parents: query,
                });
            }
            return;
        }

        // Client-side only: union within each parent's selected values,
        // intersection across parents.
        let mut allowed: Option<BTreeSet<String>> = None;
        for (parent, values) in &parents {
            let reachable = self
                .metadata
                .client_side_children(*parent, dimension, values);
            allowed = Some(match allowed {
                None => reachable,
                Some(acc) => acc.intersection(&reachable).cloned().collect(),
            });
        }
        let allowed = allowed.unwrap_or_default();
        let options: Vec<OptionItem> = self
            .metadata
            .options_for(dimension)
            .iter()
            .filter(|option| allowed.contains(&option.value))
            .cloned()
            .collect();
        self.cache
            .insert(dimension, key, options.clone(), now_ms);
        self.failed.remove(&dimension);
        self.option_sets
            .insert(dimension, ResolvedOptionSet::from_restricted(options));
    }

    /// Prune invalid selections and re-resolve downstream until nothing
    /// changes. The graph is a DAG and each pass only removes values, so
    /// `depth + 1` passes always suffice.
    fn reconcile_to_fixed_point(
        &mut self,
        now_ms: u64,
        pending: &mut Vec<LookupRequest>,
        events: &mut Vec<CascadeEvent>,
    ) {
        let max_passes = self.graph.depth() + 1;
        for _ in 0..max_passes {
            let pruned = self.prune_pass();
            if pruned.is_empty() {
                break;
            }
            let roots: Vec<DimensionId> = pruned.iter().map(|(dimension, _)| *dimension).collect();
            for (dimension, removed) in pruned {
                debug!(%dimension, ?removed, "selection pruned");
                let emptied = self.selection.is_empty(dimension);
                events.push(CascadeEvent::SelectionPruned { dimension, removed });
                // A selection emptied by pruning invalidates the context its
                // descendants were chosen under, so their selections go too.
                if emptied {
                    for descendant in self.graph.descendants_of(dimension) {
                        let values = self.selection.get(descendant).to_vec();
                        if !values.is_empty() {
                            self.selection.clear(descendant);
                            events.push(CascadeEvent::SelectionPruned {
                                dimension: descendant,
                                removed: values,
                            });
                        }
                    }
                }
            }
            self.resolve_descendants(&roots, now_ms, pending);
        }
    }

    fn prune_pass(&mut self) -> Vec<(DimensionId, Vec<String>)> {
        let mut pruned = Vec::new();
        for dimension in self.selection.dimensions().collect::<Vec<_>>() {
            if self.failed.contains(&dimension) {
                continue;
            }
            let Some(set) = self.option_sets.get(&dimension) else {
                continue;
            };
            if set.mode == OptionMode::Loading {
                continue;
            }
            if set.mode == OptionMode::All && set.options.is_empty() {
                continue;
            }
            let allowed: BTreeSet<&str> =
                set.options.iter().map(|o| o.value.as_str()).collect();
            let current = self.selection.get(dimension).to_vec();
            let (kept, removed): (Vec<String>, Vec<String>) = current
                .into_iter()
                .partition(|value| allowed.contains(value.as_str()));
            if !removed.is_empty() {
                self.selection.set(dimension, kept);
                pruned.push((dimension, removed));
            }
        }
        pruned
    }

    fn selected_parents(&self, dimension: DimensionId) -> BTreeMap<DimensionId, Vec<String>> {
        self.graph
            .parents_of(dimension)
            .iter()
            .filter(|edge| !self.selection.is_empty(edge.from))
            .map(|edge| (edge.from, self.selection.get(edge.from).to_vec()))
            .collect()
    }

    fn current_key(&self, dimension: DimensionId) -> Option<CanonicalKey> {
        let parents = self.selected_parents(dimension);
        if parents.is_empty() {
            None
        } else {
            Some(CanonicalKey::from_parents(&parents))
        }
    }

    /// Prefer the metadata snapshot's label and ordering for lookup results
    /// so option lists stay deterministic across endpoints; values the
    /// snapshot does not know keep the endpoint's own label and order.
    fn align_with_metadata(
        &self,
        dimension: DimensionId,
        fetched: Vec<OptionItem>,
    ) -> Vec<OptionItem> {
        let known = self.metadata.options_for(dimension);
        if known.is_empty() {
            return fetched;
        }
        let values: BTreeSet<&str> = fetched.iter().map(|o| o.value.as_str()).collect();
        let mut aligned: Vec<OptionItem> = known
            .iter()
            .filter(|option| values.contains(option.value.as_str()))
            .cloned()
            .collect();
        let covered: BTreeSet<String> = aligned.iter().map(|o| o.value.clone()).collect();
        aligned.extend(
            fetched
                .iter()
                .filter(|option| !covered.contains(option.value.as_str()))
                .cloned(),
        );
        aligned
    }

    fn outcome(&self, pending: Vec<LookupRequest>, events: Vec<CascadeEvent>) -> ResolverOutcome {
        ResolverOutcome {
            selection: self.selection.clone(),
            option_sets: self.option_sets.clone(),
            pending,
            events,
        }
    }
}
