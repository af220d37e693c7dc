//! The instance store: façade over registry, serialization, layout,
//! integrity tracking, and the matcher chain.
//!
//! [`InstanceStore`] owns the add/remove/update/get/query lifecycle for a
//! durable collection of frame instances. All operations run under one
//! coarse per-store lock; matchers and the index registry are only ever
//! touched while it is held.
//!
//! Start-up scans every area directory for persisted profiles, rebuilds the
//! registry and back-link sets, relocates instances whose owning area
//! changed, and feeds reloaded instances to matchers that require a rebuild.

pub mod index;
pub mod integrity;
pub mod layout;
pub mod log;
pub mod serial;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::StoreConfig;
use crate::error::{IndexError, SeshatResult, StoreError};
use crate::expand::{InstanceSource, ReferenceExpander};
use crate::frame::network::{Network, NetworkPipeline, NetworkTransform};
use crate::frame::{Frame, FrameFunction};
use crate::identity::Identity;
use crate::matcher::structural::StructuralMatcher;
use crate::matcher::{Matcher, MatcherChain, ValueKind, ValueMatchers};
use crate::types::TypeSystem;

use index::IndexRegistry;
use integrity::ReferenceTracker;
use layout::StoreLayout;
use log::ReloadLog;
use serial::{InstanceSerializer, Profile, ReadMode, Regen, RegenStatus};

/// Builder for an [`InstanceStore`].
pub struct StoreBuilder {
    root: PathBuf,
    config: StoreConfig,
    types: Arc<dyn TypeSystem>,
    matchers: Vec<(Option<usize>, Box<dyn Matcher>)>,
    default_matcher: Option<Box<dyn Matcher>>,
    pipeline: NetworkPipeline,
    value_matchers: ValueMatchers,
}

impl StoreBuilder {
    /// Start building a store rooted at `root`.
    pub fn new(root: &Path, types: Arc<dyn TypeSystem>) -> Self {
        Self {
            root: root.to_path_buf(),
            config: StoreConfig::main_only(),
            types,
            matchers: Vec::new(),
            default_matcher: None,
            pipeline: NetworkPipeline::new(),
            value_matchers: ValueMatchers::new(),
        }
    }

    /// Use the given area configuration.
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a matcher at the end of the chain.
    pub fn matcher(mut self, matcher: Box<dyn Matcher>) -> Self {
        self.matchers.push((None, matcher));
        self
    }

    /// Register a matcher at a specific priority position.
    pub fn matcher_at(mut self, position: usize, matcher: Box<dyn Matcher>) -> Self {
        self.matchers.push((Some(position), matcher));
        self
    }

    /// Replace the default matcher (otherwise an unscoped
    /// [`StructuralMatcher`]).
    pub fn default_matcher(mut self, matcher: Box<dyn Matcher>) -> Self {
        self.default_matcher = Some(matcher);
        self
    }

    /// Register a network transform, executed in registration order.
    pub fn transform(mut self, transform: Box<dyn NetworkTransform>) -> Self {
        self.pipeline.register(transform);
        self
    }

    /// Register a custom value-matching predicate for a value kind under
    /// the given slots.
    pub fn value_matcher<F>(
        mut self,
        kind: ValueKind,
        slots: impl IntoIterator<Item = Identity>,
        predicate: F,
    ) -> Self
    where
        F: Fn(&crate::frame::network::NetworkValue, &crate::frame::network::NetworkValue) -> bool
            + Send
            + Sync
            + 'static,
    {
        self.value_matchers.register(kind, slots, predicate);
        self
    }

    /// Open the store: initialize matchers and reload persisted instances.
    pub fn open(self) -> SeshatResult<InstanceStore> {
        let value_matchers = Arc::new(self.value_matchers);
        let default = match self.default_matcher {
            Some(matcher) => matcher,
            None => Box::new(StructuralMatcher::new(
                self.types.clone(),
                value_matchers.clone(),
            )),
        };
        let mut chain = MatcherChain::new(default);
        for (position, matcher) in self.matchers {
            match position {
                Some(p) => chain.register_at(p, matcher),
                None => chain.register(matcher),
            }
        }

        std::fs::create_dir_all(&self.root).map_err(StoreError::from)?;
        let mut inner = Inner {
            types: self.types.clone(),
            serializer: InstanceSerializer::new(self.types.clone()),
            layout: StoreLayout::new(&self.root, &self.config, self.types),
            registry: IndexRegistry::new(),
            tracker: ReferenceTracker::new(),
            chain,
            pipeline: self.pipeline,
            log: ReloadLog::new(&self.root),
            locations: HashMap::new(),
        };
        inner.reload()?;
        tracing::info!(
            root = %self.root.display(),
            instances = inner.registry.len(),
            "instance store opened"
        );
        Ok(InstanceStore {
            inner: Mutex::new(inner),
        })
    }
}

/// A durable, queryable collection of frame instances.
pub struct InstanceStore {
    inner: Mutex<Inner>,
}

impl InstanceStore {
    /// Build a store with custom matchers, areas, or transforms.
    pub fn builder(root: &Path, types: Arc<dyn TypeSystem>) -> StoreBuilder {
        StoreBuilder::new(root, types)
    }

    /// Open a store with the default configuration: a single main area and
    /// the structural default matcher.
    pub fn open(root: &Path, types: Arc<dyn TypeSystem>) -> SeshatResult<Self> {
        StoreBuilder::new(root, types).open()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store a new instance under `identity`.
    ///
    /// Fails with an identity conflict, before any mutation, if the
    /// identity is already present.
    pub fn add(&self, frame: &Frame, identity: &Identity) -> SeshatResult<()> {
        self.lock().add(frame, identity)
    }

    /// Remove a stored instance.
    ///
    /// Returns false (a benign no-op) when the identity is absent.
    /// Referencing instances are corrected in place: every reference to the
    /// removed identity is stripped from their slot trees and the corrected
    /// versions rewritten to disk.
    pub fn remove(&self, identity: &Identity) -> SeshatResult<bool> {
        self.lock().remove(identity)
    }

    /// Rewrite a stored instance in place, preserving its index.
    pub fn update(&self, frame: &Frame, identity: &Identity) -> SeshatResult<()> {
        self.lock().update(frame, identity)
    }

    /// Read back a stored instance with its regeneration status.
    pub fn get(&self, identity: &Identity) -> SeshatResult<Option<Regen>> {
        self.lock().get(identity)
    }

    /// Whether an instance is stored under `identity`.
    pub fn contains(&self, identity: &Identity) -> bool {
        self.lock().registry.has_index(identity)
    }

    /// Identities of every stored instance.
    pub fn stored_identities(&self) -> Vec<Identity> {
        let mut ids = self.lock().registry.identities();
        ids.sort();
        ids
    }

    /// Number of stored instances.
    pub fn len(&self) -> usize {
        self.lock().registry.len()
    }

    /// Whether the store holds no instances.
    pub fn is_empty(&self) -> bool {
        self.lock().registry.is_empty()
    }

    /// All stored instances matching the query frame.
    pub fn query(&self, query: &Frame) -> SeshatResult<Vec<Identity>> {
        let inner = self.lock();
        let network = inner.pipeline.process(&query.free_copy());
        inner.chain.matcher_for_ref(&query.ty).query(&network)
    }

    /// Whether one specific stored instance matches the query frame.
    pub fn matches(&self, query: &Frame, identity: &Identity) -> SeshatResult<bool> {
        let inner = self.lock();
        let network = inner.pipeline.process(&query.free_copy());
        inner.chain.matcher_for_ref(&query.ty).matches(&network, identity)
    }

    /// Tear down all matchers. Idempotent; the store remains readable for
    /// registry lookups but no longer matches.
    pub fn stop(&self) {
        self.lock().chain.stop_all();
    }
}

impl std::fmt::Debug for InstanceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceStore").finish()
    }
}

// ---------------------------------------------------------------------------
// Locked state
// ---------------------------------------------------------------------------

struct Inner {
    types: Arc<dyn TypeSystem>,
    serializer: InstanceSerializer,
    layout: StoreLayout,
    registry: IndexRegistry,
    tracker: ReferenceTracker,
    chain: MatcherChain,
    pipeline: NetworkPipeline,
    log: ReloadLog,
    /// index → directory the instance's files currently live in.
    locations: HashMap<usize, PathBuf>,
}

/// Reads editable free copies off disk for the reference expander.
struct DiskSource<'a> {
    registry: &'a IndexRegistry,
    locations: &'a HashMap<usize, PathBuf>,
    serializer: &'a InstanceSerializer,
}

impl InstanceSource for DiskSource<'_> {
    fn load(&self, identity: &Identity) -> Option<Network> {
        let index = self.registry.index_of(identity).ok()?;
        let dir = self.locations.get(&index)?;
        let regen = self.serializer.read(dir, index, ReadMode::Editable).ok()?;
        regen.frame.map(|frame| Network::from_frame(&frame))
    }
}

impl Inner {
    /// Build the matchable network for an instance: pipeline transforms,
    /// then reference expansion against the store's current contents.
    fn build_network(&self, frame: &Frame) -> Network {
        let mut network = self.pipeline.process(&frame.free_copy());
        let source = DiskSource {
            registry: &self.registry,
            locations: &self.locations,
            serializer: &self.serializer,
        };
        ReferenceExpander::new(&source, self.types.clone()).expand(&mut network);
        network
    }

    fn add(&mut self, frame: &Frame, identity: &Identity) -> SeshatResult<()> {
        if self.registry.has_index(identity) {
            let index = self.registry.index_of(identity)?;
            return Err(IndexError::IdentityConflict {
                identity: identity.id.clone(),
                index,
            }
            .into());
        }
        let index = self.registry.assign_index(identity)?;
        let dir = self.layout.area_dir(&frame.ty, frame.function);
        if let Err(e) = self.serializer.write(frame, identity, index, &dir) {
            self.registry.free_index(identity)?;
            return Err(e.into());
        }
        self.locations.insert(index, dir);
        self.tracker.update_links(identity, &frame.references());

        if frame.function == FrameFunction::Assertion {
            let network = self.build_network(frame);
            if let Err(e) = self.chain.matcher_for(&frame.ty).add(network, identity.clone()) {
                // Construction errors must leave no partial state behind.
                let dir = self.locations.remove(&index);
                if let Some(dir) = dir {
                    self.serializer.delete(&dir, index)?;
                }
                self.tracker.drop_referencer(identity);
                self.registry.free_index(identity)?;
                return Err(e);
            }
        }
        tracing::debug!(identity = %identity, index, ty = %frame.ty, "instance added");
        Ok(())
    }

    fn remove(&mut self, identity: &Identity) -> SeshatResult<bool> {
        if !self.registry.has_index(identity) {
            return Ok(false);
        }
        let index = self.registry.index_of(identity)?;
        let dir = self
            .locations
            .get(&index)
            .cloned()
            .ok_or(IndexError::UnknownIndex { index })?;
        let profile = self.serializer.read_profile(&dir, index)?;

        if profile.function == FrameFunction::Assertion {
            self.chain.matcher_for(&profile.type_id).remove(identity)?;
        }

        // Correct every referencing instance in place.
        let referencers = self.tracker.on_remove(identity);
        for referencer in referencers {
            self.repair_referencer(&referencer, identity)?;
        }

        self.serializer.delete(&dir, index)?;
        self.locations.remove(&index);
        self.registry.free_index(identity)?;
        tracing::debug!(identity = %identity, index, "instance removed");
        Ok(true)
    }

    /// Strip references to `removed` from one referencing instance and
    /// rewrite it. An unloadable referencer is skipped (logged), not fatal.
    fn repair_referencer(&mut self, referencer: &Identity, removed: &Identity) -> SeshatResult<()> {
        let Ok(index) = self.registry.index_of(referencer) else {
            return Ok(());
        };
        let Some(dir) = self.locations.get(&index).cloned() else {
            return Ok(());
        };
        let regen = self.serializer.read(&dir, index, ReadMode::Editable)?;
        let Some(mut frame) = regen.frame else {
            self.log.warn(
                referencer,
                &format!("skipped dangling-reference repair for removed \"{removed}\""),
            )?;
            return Ok(());
        };
        if frame.strip_references_to(removed) == 0 {
            return Ok(());
        }
        self.serializer.write(&frame, referencer, index, &dir)?;
        self.tracker.update_links(referencer, &frame.references());
        if frame.function == FrameFunction::Assertion {
            let network = self.build_network(&frame);
            let matcher = self.chain.matcher_for(&frame.ty);
            matcher.remove(referencer)?;
            matcher.add(network, referencer.clone())?;
        }
        Ok(())
    }

    fn update(&mut self, frame: &Frame, identity: &Identity) -> SeshatResult<()> {
        let index = self
            .registry
            .index_of(identity)
            .map_err(|_| StoreError::NotFound {
                identity: identity.id.clone(),
            })?;
        let old_dir = self
            .locations
            .get(&index)
            .cloned()
            .ok_or(IndexError::UnknownIndex { index })?;
        let old_profile = self.serializer.read_profile(&old_dir, index)?;

        // Re-index first, against the still-intact stored copy: remove
        // through the old owner, add through the new one. A matcher that
        // rejects the replacement leaves disk and registry untouched.
        if old_profile.function == FrameFunction::Assertion {
            self.chain.matcher_for(&old_profile.type_id).remove(identity)?;
        }
        if frame.function == FrameFunction::Assertion {
            let network = self.build_network(frame);
            if let Err(e) = self.chain.matcher_for(&frame.ty).add(network, identity.clone()) {
                if old_profile.function == FrameFunction::Assertion {
                    self.restore_matcher_entry(&old_profile, index, &old_dir, identity);
                }
                return Err(e);
            }
        }

        let new_dir = self.layout.area_dir(&frame.ty, frame.function);
        if new_dir != old_dir {
            self.serializer.delete(&old_dir, index)?;
        }
        self.serializer.write(frame, identity, index, &new_dir)?;
        self.locations.insert(index, new_dir);
        self.tracker.update_links(identity, &frame.references());
        tracing::debug!(identity = %identity, index, "instance updated");
        Ok(())
    }

    /// Put the previously-indexed version of an instance back into its
    /// matcher after a rejected replacement.
    fn restore_matcher_entry(
        &mut self,
        old_profile: &Profile,
        index: usize,
        old_dir: &Path,
        identity: &Identity,
    ) {
        let network = self
            .serializer
            .read(old_dir, index, ReadMode::Editable)
            .ok()
            .and_then(|regen| regen.frame)
            .map(|frame| self.build_network(&frame));
        let restored = network.and_then(|network| {
            self.chain
                .matcher_for(&old_profile.type_id)
                .add(network, identity.clone())
                .ok()
        });
        if restored.is_none() {
            tracing::warn!(identity = %identity, "stored instance left unindexed after rejected update");
        }
    }

    fn get(&self, identity: &Identity) -> SeshatResult<Option<Regen>> {
        let Ok(index) = self.registry.index_of(identity) else {
            return Ok(None);
        };
        let Some(dir) = self.locations.get(&index) else {
            return Ok(None);
        };
        Ok(Some(self.serializer.read(dir, index, ReadMode::Durable)?))
    }

    /// Start-up reload: scan area directories, restore registry and
    /// back-links, relocate strays, feed rebuild-requiring matchers.
    fn reload(&mut self) -> SeshatResult<()> {
        let mut seen_indices = HashSet::new();
        let mut reloaded: Vec<(Identity, Frame)> = Vec::new();

        for dir in self.layout.all_dirs() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries {
                let entry = entry.map_err(StoreError::from)?;
                let name = entry.file_name();
                let Some(index) = InstanceSerializer::index_of_profile(&name.to_string_lossy())
                else {
                    continue;
                };
                if !seen_indices.insert(index) {
                    continue;
                }
                self.reload_one(&dir, index, &mut reloaded)?;
            }
        }
        self.registry.rebuild_free_list();

        // Feed matchers that need their index rebuilt. Stored queries are
        // persisted but never indexed for matching.
        for (identity, frame) in reloaded {
            if frame.function != FrameFunction::Assertion {
                continue;
            }
            let needs_rebuild = self.chain.matcher_for(&frame.ty).requires_rebuild();
            if needs_rebuild {
                let network = self.build_network(&frame);
                if let Err(e) = self.chain.matcher_for(&frame.ty).add(network, identity.clone()) {
                    self.log.warn(&identity, &format!("not indexed for matching: {e}"))?;
                }
            }
        }
        Ok(())
    }

    fn reload_one(
        &mut self,
        dir: &Path,
        index: usize,
        reloaded: &mut Vec<(Identity, Frame)>,
    ) -> SeshatResult<()> {
        let profile = match self.serializer.read_profile(dir, index) {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(index, error = %e, "unreadable profile skipped");
                return Ok(());
            }
        };
        let identity = profile.identity.clone();
        let regen = match self.serializer.read(dir, index, ReadMode::Durable) {
            Ok(regen) => regen,
            Err(e) => {
                self.log.warn(&identity, &format!("unreadable instance body: {e}"))?;
                return Ok(());
            }
        };
        match regen.status {
            RegenStatus::FullyInvalid => {
                // Park the files outside the scanned areas, where they stay
                // for operator diagnosis and cannot shadow a later instance
                // that reuses this index.
                self.layout.relocate(index, dir, &self.layout.quarantine_dir())?;
                self.log.warn(
                    &identity,
                    &format!(
                        "root type \"{}\" no longer resolvable; instance quarantined",
                        profile.type_id
                    ),
                )?;
                return Ok(());
            }
            RegenStatus::PartiallyValid => {
                let pruned: Vec<String> = regen.pruned.iter().map(|p| p.id.clone()).collect();
                self.log.warn(
                    &identity,
                    &format!("partially regenerated; pruned: {}", pruned.join(", ")),
                )?;
            }
            RegenStatus::Valid => {}
        }

        if let Err(e) = self.registry.restore(&identity, index) {
            self.log.warn(&identity, &format!("duplicate identity on reload: {e}"))?;
            return Ok(());
        }
        self.tracker.update_links(&identity, &profile.references);

        // A type-system change may have moved the owning area.
        let proper = self.layout.area_dir(&profile.type_id, profile.function);
        let final_dir = if proper != dir {
            self.layout.relocate(index, dir, &proper)?;
            tracing::debug!(identity = %identity, from = %dir.display(), to = %proper.display(), "instance relocated");
            proper
        } else {
            dir.to_path_buf()
        };
        self.locations.insert(index, final_dir);

        if let Some(frame) = regen.frame {
            reloaded.push((identity, frame));
        }
        Ok(())
    }
}
