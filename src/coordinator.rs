//! The coordinator: the single point every mutator call goes through to request a collection,
//! owns the worker pool, the object/cluster tables' shared caches, and the incremental
//! destruction pipeline's cursor state (spec §4.1, §4.10).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use log::{debug, info, warn};

use crate::aro::{AroQueue, AroRegistry, AroTier};
use crate::cluster::{Cluster, ClusterIndex, ClusterTable};
use crate::config::{GcConfig, StallPolicy};
use crate::destroy::{purge, unhash, PurgePhase, TickOutcome};
use crate::error::{GcError, GcResult};
use crate::object::{ObjectIndex, Owner};
use crate::page_cache::PageCache;
use crate::queue::{new_block, recycle_block};
use crate::reachability::{ReachResult, ReachabilityProcessor, TraceBlock};
use crate::scheduler::worker_goals::CollectParams;
use crate::scheduler::{GcScheduler, GcWork, WorkBucketStage};
use crate::vm::Host;

/// One subscribed pre/post-collect hook, identified by a monotonically increasing id so it can
/// be unsubscribed later.
struct Hook {
    id: u32,
    callback: Box<dyn Fn() + Send + Sync>,
}

#[derive(Default)]
struct HookList {
    hooks: Vec<Hook>,
    next_id: u32,
}

impl HookList {
    fn subscribe(&mut self, callback: Box<dyn Fn() + Send + Sync>) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.hooks.push(Hook { id, callback });
        id
    }

    fn unsubscribe(&mut self, id: u32) {
        self.hooks.retain(|h| h.id != id);
    }

    fn fire(&self) {
        for hook in &self.hooks {
            (hook.callback)();
        }
    }
}

struct DestructionState {
    phase: PurgePhase,
    unreachable: Vec<ObjectIndex>,
    cursor: usize,
    /// Objects whose `FinishDestroy` was not yet ready; retried on the next tick.
    pending_destruction: Vec<ObjectIndex>,
    stall_started_at: Option<Instant>,
}

impl Default for DestructionState {
    fn default() -> Self {
        Self {
            phase: PurgePhase::Idle,
            unreachable: Vec::new(),
            cursor: 0,
            pending_destruction: Vec::new(),
            stall_started_at: None,
        }
    }
}

/// The GC core's single entry point. Construct one per managed-object universe; it owns the
/// worker pool for the lifetime of the process (or until tests explicitly tear it down).
pub struct Coordinator {
    pub(crate) scheduler: Arc<GcScheduler>,
    pub(crate) host: Arc<dyn Host>,
    pub(crate) config: GcConfig,
    pub(crate) cluster_table: ClusterTable,
    pub(crate) page_cache: PageCache,
    aro_registry: spin::RwLock<AroRegistry>,
    aro_queues: Vec<AroQueue>,
    collecting: AtomicBool,
    retry_count: AtomicU32,
    cycle_start: Mutex<Option<Instant>>,
    last_cycle_duration: Mutex<Duration>,
    destruction: Mutex<DestructionState>,
    pre_collect_hooks: Mutex<HookList>,
    post_collect_hooks: Mutex<HookList>,
    worker_threads: Mutex<Vec<std::thread::JoinHandle<()>>>,
    async_purge: Option<AsyncPurge>,
    /// `CollectParams::full_purge` for the cycle currently running, read by
    /// `set_unreachable_objects` to decide whether to drive destruction to completion inline
    /// even when `incremental_begin_destroy_enabled` is set.
    current_full_purge: AtomicBool,
    /// xorshift64 state backing `sample_chance`, seeded once at construction.
    assumption_rng: AtomicU64,
}

/// A dedicated background thread that runs thread-safe objects' destructors and frees their
/// storage, so `FinishDestroy`'s caller (a GC worker, or the mutator in non-incremental mode)
/// never blocks on a potentially slow destructor.
struct AsyncPurge {
    tx: std::sync::mpsc::Sender<ObjectIndex>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl AsyncPurge {
    fn spawn(host: Arc<dyn Host>) -> Self {
        let (tx, rx) = std::sync::mpsc::channel::<ObjectIndex>();
        let handle = std::thread::spawn(move || {
            while let Ok(object) = rx.recv() {
                host.lifecycle().destroy(object);
            }
        });
        Self {
            tx,
            handle: Mutex::new(Some(handle)),
        }
    }
}

impl Coordinator {
    pub fn new(host: Arc<dyn Host>, config: GcConfig) -> Arc<Self> {
        crate::logger::try_init();
        let num_workers = if config.allow_parallel {
            config.num_workers.max(1)
        } else {
            1
        };
        let (scheduler, workers) = GcScheduler::new(num_workers);
        // The page cache's per-worker minimum is sized for the worst case (every slow ARO
        // callback slot in use) since callbacks may still be registered after construction.
        let page_cache = PageCache::new(num_workers, crate::aro::MAX_CALLBACKS);
        let aro_queues = (0..num_workers).map(|_| AroQueue::default()).collect();
        let async_purge = config
            .multithreaded_destruction_enabled
            .then(|| AsyncPurge::spawn(host.clone()));

        let coordinator = Arc::new(Self {
            scheduler,
            host,
            config,
            cluster_table: ClusterTable::new(),
            page_cache,
            aro_registry: spin::RwLock::new(AroRegistry::default()),
            aro_queues,
            collecting: AtomicBool::new(false),
            retry_count: AtomicU32::new(0),
            cycle_start: Mutex::new(None),
            last_cycle_duration: Mutex::new(Duration::ZERO),
            destruction: Mutex::new(DestructionState::default()),
            pre_collect_hooks: Mutex::new(HookList::default()),
            post_collect_hooks: Mutex::new(HookList::default()),
            worker_threads: Mutex::new(Vec::new()),
            async_purge,
            current_full_purge: AtomicBool::new(false),
            assumption_rng: AtomicU64::new(initial_rng_seed()),
        });

        let mut handles = Vec::with_capacity(workers.len());
        for worker in workers {
            let coordinator = coordinator.clone();
            handles.push(std::thread::spawn(move || worker.run(coordinator)));
        }
        *coordinator.worker_threads.lock().unwrap() = handles;

        coordinator
    }

    pub fn num_workers(&self) -> usize {
        self.scheduler.num_workers()
    }

    pub fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::Acquire)
    }

    /// `true` while any phase holds the GC lock in a way that makes it unsafe for a mutator to
    /// mutate host-side hash/name tables (Unhash through FinishDestroy).
    pub fn is_locked_for_hash_tables(&self) -> bool {
        let destruction = self.destruction.lock().unwrap();
        matches!(
            destruction.phase,
            PurgePhase::Unhash | PurgePhase::BeginDestroy | PurgePhase::FinishDestroy
        ) || self.is_collecting()
    }

    pub fn is_incremental_purge_pending(&self) -> bool {
        !matches!(self.destruction.lock().unwrap().phase, PurgePhase::Idle)
    }

    pub fn is_incremental_unhash_pending(&self) -> bool {
        matches!(self.destruction.lock().unwrap().phase, PurgePhase::Unhash)
    }

    /// Registers a cluster: `root` and every entry in `members` have their `Owner` set
    /// accordingly in the object table, so mark and reachability treat the whole group as
    /// sharing the root's reachability fate (spec §3 "Cluster").
    pub fn register_cluster(
        &self,
        root: ObjectIndex,
        members: Vec<ObjectIndex>,
        referenced_clusters: Vec<ClusterIndex>,
        referenced_mutable: Vec<ObjectIndex>,
    ) -> ClusterIndex {
        let table = self.host.object_table();
        let index = self.cluster_table.register(Cluster::new(
            root,
            members.clone(),
            referenced_clusters,
            referenced_mutable,
        ));
        table.entry(root).set_owner(Owner::Root { cluster_index: index });
        for member in members {
            table.entry(member).set_owner(Owner::Member { root });
        }
        index
    }

    /// Blocks until a collection cycle runs, regardless of contention.
    pub fn collect(self: &Arc<Self>, params: CollectParams) {
        loop {
            match self.try_collect(params) {
                Ok(()) => return,
                Err(GcError::Busy) => std::thread::yield_now(),
            }
        }
    }

    /// Attempts to run a collection cycle. Returns `GcError::Busy` if another cycle is already
    /// running and the configured retry budget has not yet been exhausted.
    pub fn try_collect(self: &Arc<Self>, params: CollectParams) -> GcResult<()> {
        if self
            .collecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let retries = self.retry_count.fetch_add(1, Ordering::AcqRel) + 1;
            if retries < self.config.num_retries_before_forcing_gc {
                return Err(GcError::Busy);
            }
            warn!("forcing collection after {retries} busy retries");
        }
        self.retry_count.store(0, Ordering::Release);

        // A new cycle must not interleave with a destruction pipeline left over from the
        // previous one, so drive any pending incremental purge to completion first.
        if self.is_incremental_purge_pending() {
            self.run_destruction_pipeline_to_completion();
        }

        self.pre_collect_hooks.lock().unwrap().fire();
        self.scheduler.request_collect(params);
        self.wait_for_cycle_to_finish();
        self.post_collect_hooks.lock().unwrap().fire();
        Ok(())
    }

    fn wait_for_cycle_to_finish(&self) {
        while self.is_collecting() {
            std::thread::yield_now();
        }
    }

    pub(crate) fn on_cycle_start(&self, start_time: Instant) {
        *self.cycle_start.lock().unwrap() = Some(start_time);
        info!("collection cycle starting");
    }

    pub(crate) fn on_cycle_finished(&self) -> Duration {
        let started = self
            .cycle_start
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(Instant::now);
        let elapsed = started.elapsed();
        *self.last_cycle_duration.lock().unwrap() = elapsed;
        for worker_idx in 0..self.num_workers() {
            self.page_cache.trim_worker(worker_idx);
        }
        let num_unreachable = self.destruction.lock().unwrap().unreachable().len();
        crate::stats::log_cycle_finished(elapsed, num_unreachable, self.page_cache.count_bytes());
        if self.sample_chance(self.config.verify_assumptions_chance) {
            self.verify_assumptions();
        }
        self.collecting.store(false, Ordering::Release);
        elapsed
    }

    /// Draws one xorshift64 sample and reports whether it fell within `probability` (spec §6
    /// "Configuration", `verify_assumptions_chance`). `probability <= 0.0` always returns `false`
    /// without touching the RNG state, so the common default (`0.0`) costs nothing.
    fn sample_chance(&self, probability: f32) -> bool {
        if probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        let mut state = self.assumption_rng.load(Ordering::Relaxed);
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        self.assumption_rng.store(state, Ordering::Relaxed);
        let normalized = (state >> 11) as f64 / (1u64 << 53) as f64;
        normalized < probability as f64
    }

    /// Spec §6's "extra invariant checks at end of cycle": re-validate every live object's
    /// schema, which would catch a `ClassReflection` implementation handing back a corrupted or
    /// mutated schema between cycles. Gated by `verify_assumptions_chance` since it walks the
    /// whole object table.
    fn verify_assumptions(&self) {
        let table = self.host.object_table();
        let reflection = self.host.class_reflection();
        let start = table.first_gc_index().as_u32();
        let end = table.num_indices();
        let mut checked = 0u64;
        for raw in start..end {
            let index = ObjectIndex::new(raw);
            if !table.is_live(index) {
                continue;
            }
            let entry = table.entry(index);
            let schema = reflection.schema_for(entry.class_id);
            schema.validate(schema.stride);
            checked += 1;
        }
        debug!("verify_assumptions re-validated {checked} live object schemas");
    }

    pub fn last_cycle_duration(&self) -> Duration {
        *self.last_cycle_duration.lock().unwrap()
    }

    pub(crate) fn set_unreachable_objects(&self, objects: Vec<ObjectIndex>) {
        let mut destruction = self.destruction.lock().unwrap();
        destruction.unreachable = objects;
        destruction.cursor = 0;
        destruction.phase = if destruction.unreachable.is_empty() {
            PurgePhase::Idle
        } else {
            PurgePhase::Unhash
        };

        if !self.config.incremental_begin_destroy_enabled
            || self.current_full_purge.load(Ordering::Relaxed)
        {
            drop(destruction);
            self.run_destruction_pipeline_to_completion();
        }
    }

    fn run_destruction_pipeline_to_completion(&self) {
        loop {
            let outcome = self.incremental_purge_garbage(false, Duration::ZERO);
            if !outcome {
                break;
            }
        }
    }

    /// Advances the destruction pipeline. If `use_time_limit` is set, stops and returns `true`
    /// (more work pending) once `budget` has elapsed within this call; otherwise runs every
    /// phase available to completion. Returns `false` once the pipeline reaches `Idle`.
    pub fn incremental_purge_garbage(&self, use_time_limit: bool, budget: Duration) -> bool {
        let deadline = Instant::now() + budget;
        loop {
            let phase = self.destruction.lock().unwrap().phase;
            let outcome = match phase {
                PurgePhase::Idle => return false,
                PurgePhase::Unhash => unhash::run_unhash_tick(self, use_time_limit, deadline),
                PurgePhase::BeginDestroy => {
                    unhash::run_begin_destroy_tick(self, use_time_limit, deadline)
                }
                PurgePhase::FinishDestroy => {
                    purge::run_finish_destroy_tick(self, use_time_limit, deadline)
                }
                PurgePhase::Purge => purge::run_purge_tick(self, use_time_limit, deadline),
                PurgePhase::Done => {
                    let mut destruction = self.destruction.lock().unwrap();
                    destruction.phase = PurgePhase::Idle;
                    destruction.unreachable.clear();
                    destruction.cursor = 0;
                    debug!("incremental purge reached Done, resetting to Idle");
                    return false;
                }
            };
            match outcome {
                TickOutcome::Yielded => return true,
                TickOutcome::Finished => {
                    let mut destruction = self.destruction.lock().unwrap();
                    destruction.cursor = 0;
                    destruction.phase = next_phase(destruction.phase);
                }
            }
            if use_time_limit && Instant::now() >= deadline {
                return true;
            }
        }
    }

    pub(crate) fn with_destruction<R>(&self, f: impl FnOnce(&mut DestructionStateInner) -> R) -> R {
        let mut guard = self.destruction.lock().unwrap();
        f(&mut guard)
    }

    pub fn register_slow_aro(&self, tier: AroTier) -> u32 {
        self.aro_registry.write().register(tier)
    }

    pub fn find_slow_aro(&self, id: u32) -> Option<crate::aro::AroCallback> {
        self.aro_registry.read().find(id)
    }

    pub(crate) fn aro_queue(&self, worker_idx: usize) -> &AroQueue {
        &self.aro_queues[worker_idx]
    }

    /// Drains every worker's `Unbalanced`/`ExtraSlow`-tier ARO queue, dispatching each pending
    /// callback and rebatching any newly-reached target into the `Reachability` bucket. Called
    /// from [`GcScheduler::on_last_parked`] before a cycle is declared to have no more work, so a
    /// slow callback's references are never dropped on the floor (spec §4.4 "Slow callbacks",
    /// §8 "No false frees"). Returns `true` if it found anything to dispatch.
    pub(crate) fn drain_pending_aro_callbacks(&self) -> bool {
        let host = self.host.as_ref();
        let reach = ReachabilityProcessor::new(host, &self.cluster_table);
        let table = host.object_table();
        let mut newly_reached = Vec::new();

        for worker_idx in 0..self.aro_queues.len() {
            self.aro_queues[worker_idx].drain_all(worker_idx, |callback_id, owner| {
                let mut found = Vec::new();
                host.reference_enumerator()
                    .invoke_member_callback(owner, callback_id, &mut found);
                for target in found {
                    if !target.is_valid() || !table.is_live(target) {
                        continue;
                    }
                    if let ReachResult::NewlyReached(t) = reach.process_reference(target, false) {
                        newly_reached.push(t);
                    }
                }
            });
        }

        if newly_reached.is_empty() {
            return false;
        }

        // Called from the scheduler's park/wake protocol, not from a worker's own `do_work`, so
        // there is no natural worker index to charge new blocks against; 0 is as good as any.
        let mut block = new_block(&self.page_cache, 0);
        let mut packets: Vec<Box<dyn GcWork>> = Vec::new();
        for index in newly_reached {
            if !block.push(index) {
                packets.push(Box::new(TraceBlock::new(block)));
                block = new_block(&self.page_cache, 0);
                block.push(index);
            }
        }
        if !block.is_empty() {
            packets.push(Box::new(TraceBlock::new(block)));
        } else {
            recycle_block(&self.page_cache, 0, block);
        }
        self.scheduler.work_buckets[WorkBucketStage::Reachability].bulk_add(packets);
        true
    }

    pub fn subscribe_pre_collect(&self, callback: Box<dyn Fn() + Send + Sync>) -> u32 {
        self.pre_collect_hooks.lock().unwrap().subscribe(callback)
    }

    pub fn unsubscribe_pre_collect(&self, id: u32) {
        self.pre_collect_hooks.lock().unwrap().unsubscribe(id);
    }

    pub fn subscribe_post_collect(&self, callback: Box<dyn Fn() + Send + Sync>) -> u32 {
        self.post_collect_hooks.lock().unwrap().subscribe(callback)
    }

    pub fn unsubscribe_post_collect(&self, id: u32) {
        self.post_collect_hooks.lock().unwrap().unsubscribe(id);
    }

    /// Stops the worker pool and joins every worker thread. Only meant for orderly shutdown at
    /// the end of a process or test; not part of the spec's steady-state API.
    pub fn shutdown(&self) {
        self.scheduler.stop_workers();
        let mut handles = self.worker_threads.lock().unwrap();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }

    pub(crate) fn stall_policy(&self) -> StallPolicy {
        self.config.stall_policy
    }

    /// Hands a thread-safe object off to the dedicated purge worker. Falls back to destroying it
    /// inline if no such worker was started (`multithreaded_destruction_enabled == false`, which
    /// should mean this is never called, but a dropped receiver is handled the same way).
    pub(crate) fn dispatch_async_destroy(&self, object: ObjectIndex) {
        match &self.async_purge {
            Some(async_purge) => {
                if async_purge.tx.send(object).is_err() {
                    warn!("async purge worker is gone, destroying {object} inline");
                    self.host.lifecycle().destroy(object);
                }
            }
            None => self.host.lifecycle().destroy(object),
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Some(AsyncPurge { tx, handle }) = self.async_purge.take() {
            drop(tx);
            if let Some(handle) = handle.into_inner().unwrap() {
                let _ = handle.join();
            }
        }
    }
}

/// A per-process counter mixed into each `Coordinator`'s RNG seed, so two coordinators created
/// within the same clock tick still start from different states.
static RNG_SEED_COUNTER: AtomicU64 = AtomicU64::new(0);

fn initial_rng_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x9e3779b97f4a7c15);
    let counter = RNG_SEED_COUNTER.fetch_add(1, Ordering::Relaxed);
    let seed = nanos ^ counter.wrapping_mul(0x2545F4914F6CDD1D);
    if seed == 0 {
        0x9e3779b97f4a7c15
    } else {
        seed
    }
}

fn next_phase(phase: PurgePhase) -> PurgePhase {
    match phase {
        PurgePhase::Idle => PurgePhase::Idle,
        PurgePhase::Unhash => PurgePhase::BeginDestroy,
        PurgePhase::BeginDestroy => PurgePhase::FinishDestroy,
        PurgePhase::FinishDestroy => PurgePhase::Purge,
        PurgePhase::Purge => PurgePhase::Done,
        PurgePhase::Done => PurgePhase::Idle,
    }
}

/// The mutable destruction-pipeline fields `destroy::unhash`/`destroy::purge` read and write
/// through [`Coordinator::with_destruction`].
pub(crate) type DestructionStateInner = DestructionState;

impl DestructionStateInner {
    pub(crate) fn unreachable(&self) -> &[ObjectIndex] {
        &self.unreachable
    }

    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    pub(crate) fn advance_cursor(&mut self, by: usize) {
        self.cursor += by;
    }

    pub(crate) fn pending_destruction(&mut self) -> &mut Vec<ObjectIndex> {
        &mut self.pending_destruction
    }

    pub(crate) fn stall_started_at(&mut self) -> &mut Option<Instant> {
        &mut self.stall_started_at
    }
}

/// The bootstrap packet: splits the object table into stripes and seeds the mark phase. Queued
/// into the `Unconstrained` bucket by [`GcScheduler::add_schedule_collection_packet`] in
/// response to a mutator's collect request.
pub(crate) struct ScheduleCollection {
    pub(crate) params: CollectParams,
}

impl GcWork for ScheduleCollection {
    fn do_work(&mut self, coordinator: &Coordinator, _worker_idx: usize) {
        coordinator
            .current_full_purge
            .store(self.params.full_purge, Ordering::Relaxed);
        let table = coordinator.host.object_table();
        let start = table.first_gc_index().as_u32();
        let end = table.num_indices();
        let num_workers = coordinator.num_workers().max(1) as u32;
        let span = end.saturating_sub(start);
        let stripe = (span / num_workers).max(1);

        let mut packets: Vec<Box<dyn GcWork>> = Vec::new();
        let mut cursor = start;
        while cursor < end {
            let stripe_end = (cursor + stripe).min(end);
            packets.push(Box::new(crate::mark::MarkStripe {
                start: cursor,
                end: stripe_end,
                keep_flags: self.params.keep_flags,
            }));
            cursor = stripe_end;
        }
        packets.push(Box::new(crate::mark::SeedExplicitRoots));
        coordinator.scheduler.work_buckets[WorkBucketStage::Mark].bulk_add(packets);
        coordinator.scheduler.work_buckets[WorkBucketStage::Gather]
            .add(crate::gather::GatherPass);
        coordinator.scheduler.notify_workers();
    }
}
