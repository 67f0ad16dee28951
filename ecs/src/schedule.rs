//! Schedule construction: phases, per-system options, system sets,
//! and finalization into the immutable per-phase plan.
//!
//! The user's `setup` callback receives a [`ScheduleBuilder`] and
//! registers systems with the `add_*` operations. When the callback
//! returns, the builder appends the implementation-internal
//! default-resources startup system and replays the accumulated adds
//! in insertion order: sync phases keep that order, async systems run
//! through the batching analyzer. The first build error latches inside
//! the builder and surfaces from finalization, so a failed `add` makes
//! world construction fail synchronously.

use std::any::TypeId;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::access::LockSet;
use crate::batching::BatchPlan;
use crate::condition::{ConditionId, ConditionKey, ConditionTable, StoredCondition};
use crate::frame::Clock;
use crate::state::{state_hook, hash_state, State, StateHook, States};
use crate::stores::Stores;
use crate::system::{DynSystem, System, SystemContext, SystemId};
use crate::world::{FpsLimit, WorldOptions};

/// The five execution phases of a frame-scheduled world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Runs once when the world starts, before the first frame.
    Startup,
    /// Sequential systems at the start of every frame.
    FrameStart,
    /// The only phase that may parallelize; systems run in conflict-free
    /// batches.
    Async,
    /// Sequential systems at the end of every frame.
    FrameEnd,
    /// Runs once when the world shuts down.
    Shutdown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Startup => "startup",
            Phase::FrameStart => "frame_start",
            Phase::Async => "async",
            Phase::FrameEnd => "frame_end",
            Phase::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Error raised while building a schedule.
///
/// All variants are fatal: the first one latches in the builder and
/// world construction returns it to the caller of `setup`.
#[derive(Debug, Clone, Error)]
pub enum ScheduleError {
    /// The same system type was added twice (in any phase).
    #[error("system `{name}` is already registered")]
    DuplicateSystem {
        /// Type name of the offending system.
        name: &'static str,
    },
    /// A `run_after` tag references a system not yet placed in the
    /// async plan. Declaration order is significant.
    #[error("system `{system}` runs after `{predecessor}`, which is not in the async plan")]
    UnknownPredecessor {
        /// Type name of the system being added.
        system: &'static str,
        /// Type name of the missing predecessor.
        predecessor: &'static str,
    },
    /// Invalid world configuration.
    #[error("invalid world configuration: {reason}")]
    BadConfig {
        /// What was wrong with the configuration.
        reason: String,
    },
}

/// Reference to another system by tag, used by `run_after`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TagRef {
    pub(crate) type_id: TypeId,
    pub(crate) name: &'static str,
}

/// A state-based run condition before polarity is applied.
#[derive(Clone)]
pub(crate) struct StateCheck {
    state_type: TypeId,
    variant_hash: u64,
    state_name: &'static str,
    eval: Arc<dyn Fn(&Stores) -> bool + Send + Sync>,
}

/// Per-system scheduling options.
///
/// Options merge when systems are added inside
/// [`add_system_set`](ScheduleBuilder::add_system_set): values union,
/// flattened and de-duplicated, so merging a set of options with
/// itself is a no-op.
#[derive(Clone, Default)]
pub struct SystemOptions {
    pub(crate) run_after: Vec<TagRef>,
    pub(crate) run_if: Vec<Arc<dyn Fn(&Stores) -> bool + Send + Sync>>,
    pub(crate) run_in_state: Vec<StateCheck>,
    pub(crate) run_not_in_state: Vec<StateCheck>,
}

impl SystemOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires this system to run in a strictly later batch than `S`.
    ///
    /// Only meaningful in the async phase; sync phases log a warning
    /// and ignore it.
    pub fn run_after<S: System>(mut self) -> Self {
        let tag = TagRef {
            type_id: TypeId::of::<S>(),
            name: std::any::type_name::<S>(),
        };
        if !self.run_after.iter().any(|t| t.type_id == tag.type_id) {
            self.run_after.push(tag);
        }
        self
    }

    /// Gates this system on a user predicate, evaluated once per frame.
    pub fn run_if(mut self, predicate: impl Fn(&Stores) -> bool + Send + Sync + 'static) -> Self {
        self.run_if.push(Arc::new(predicate));
        self
    }

    /// Gates this system on the world being in the given state.
    ///
    /// Multiple state gates on one system conjoin, like every other
    /// run condition; in practice a single value is supplied.
    pub fn run_in_state<S: States>(mut self, state: S) -> Self {
        let check = Self::state_check(state);
        if !Self::has_check(&self.run_in_state, &check) {
            self.run_in_state.push(check);
        }
        self
    }

    /// Gates this system on the world *not* being in the given state.
    pub fn run_not_in_state<S: States>(mut self, state: S) -> Self {
        let check = Self::state_check(state);
        if !Self::has_check(&self.run_not_in_state, &check) {
            self.run_not_in_state.push(check);
        }
        self
    }

    fn state_check<S: States>(state: S) -> StateCheck {
        let state_type = TypeId::of::<S>();
        let variant_hash = hash_state(&state);
        let eval = Arc::new(move |stores: &Stores| {
            stores
                .resource::<State<S>>()
                .is_some_and(|current| current.current() == &state)
        });
        StateCheck {
            state_type,
            variant_hash,
            state_name: std::any::type_name::<S>(),
            eval,
        }
    }

    fn has_check(list: &[StateCheck], check: &StateCheck) -> bool {
        list.iter()
            .any(|c| c.state_type == check.state_type && c.variant_hash == check.variant_hash)
    }

    /// Merges another option set into this one (union, de-duplicated).
    pub(crate) fn merge(&mut self, other: &SystemOptions) {
        for tag in &other.run_after {
            if !self.run_after.iter().any(|t| t.type_id == tag.type_id) {
                self.run_after.push(*tag);
            }
        }
        for predicate in &other.run_if {
            if !self.run_if.iter().any(|p| Arc::ptr_eq(p, predicate)) {
                self.run_if.push(Arc::clone(predicate));
            }
        }
        for check in &other.run_in_state {
            if !Self::has_check(&self.run_in_state, check) {
                self.run_in_state.push(check.clone());
            }
        }
        for check in &other.run_not_in_state {
            if !Self::has_check(&self.run_not_in_state, check) {
                self.run_not_in_state.push(check.clone());
            }
        }
    }
}

/// One registered system with its merged options, kept in insertion
/// order until finalization replays it.
struct AddOp {
    phase: Phase,
    system: Arc<dyn DynSystem>,
    tag: TypeId,
    name: &'static str,
    options: SystemOptions,
}

/// A finalized system: instance, identity, and per-frame gating data.
pub(crate) struct SystemSlot {
    pub(crate) system: Arc<dyn DynSystem>,
    pub(crate) name: &'static str,
    pub(crate) phase: Phase,
    pub(crate) locks: LockSet,
    pub(crate) conditions: Vec<ConditionId>,
}

/// The immutable output of schedule finalization.
pub(crate) struct Schedule {
    pub(crate) slots: Vec<SystemSlot>,
    pub(crate) startup: Vec<SystemId>,
    pub(crate) frame_start: Vec<SystemId>,
    pub(crate) batches: Vec<Vec<SystemId>>,
    pub(crate) frame_end: Vec<SystemId>,
    pub(crate) shutdown: Vec<SystemId>,
    pub(crate) conditions: Vec<StoredCondition>,
    pub(crate) state_hooks: Vec<StateHook>,
}

/// Accumulates `add_*` operations from the user's `setup` callback.
///
/// # Example
///
/// ```ignore
/// let handle = World::spawn(WorldOptions::default(), StartupEvents::new(), |schedule| {
///     schedule
///         .add_startup_system(SpawnBoard)
///         .add_system(Movement, SystemOptions::new())
///         .add_system(Collision, SystemOptions::new().run_after::<Movement>())
///         .add_frame_end_system(Cleanup, SystemOptions::new())
/// })?;
/// ```
pub struct ScheduleBuilder {
    ops: Vec<AddOp>,
    registered: HashSet<TypeId>,
    set_stack: Vec<SetFrame>,
    next_set_id: u64,
    state_hooks: Vec<StateHook>,
    registered_states: HashSet<TypeId>,
    error: Option<ScheduleError>,
}

/// One active system set: its identity and its option contribution.
struct SetFrame {
    id: u64,
    options: SystemOptions,
}

impl ScheduleBuilder {
    pub(crate) fn new() -> Self {
        Self {
            ops: Vec::new(),
            registered: HashSet::new(),
            set_stack: Vec::new(),
            next_set_id: 0,
            state_hooks: Vec::new(),
            registered_states: HashSet::new(),
            error: None,
        }
    }

    /// Adds a system that runs once at world start. Startup systems
    /// take no options and are never gated.
    pub fn add_startup_system<S: System>(self, system: S) -> Self {
        self.push_op(Phase::Startup, system, SystemOptions::new(), false)
    }

    /// Adds a sequential system to the start of every frame.
    pub fn add_frame_start_system<S: System>(self, system: S, options: SystemOptions) -> Self {
        self.push_op(Phase::FrameStart, system, options, true)
    }

    /// Adds a system to the parallel async phase.
    pub fn add_system<S: System>(self, system: S, options: SystemOptions) -> Self {
        self.push_op(Phase::Async, system, options, true)
    }

    /// Adds a sequential system to the end of every frame.
    pub fn add_frame_end_system<S: System>(self, system: S, options: SystemOptions) -> Self {
        self.push_op(Phase::FrameEnd, system, options, true)
    }

    /// Adds a system that runs once at world shutdown. Shutdown
    /// systems take no options and are never gated.
    pub fn add_shutdown_system<S: System>(self, system: S) -> Self {
        self.push_op(Phase::Shutdown, system, SystemOptions::new(), false)
    }

    /// Groups further adds under shared options.
    ///
    /// The closure receives the builder and registers systems as
    /// usual; every add inside (including nested sets) also receives
    /// this set's options, merged union-wise with its own. The
    /// contribution is removed when the closure returns.
    pub fn add_system_set(
        mut self,
        options: SystemOptions,
        f: impl FnOnce(ScheduleBuilder) -> ScheduleBuilder,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        let id = self.next_set_id;
        self.next_set_id += 1;
        self.set_stack.push(SetFrame { id, options });

        let mut builder = f(self);

        debug_assert!(
            builder.set_stack.last().is_some_and(|frame| frame.id == id),
            "system-set frames must unwind in LIFO order",
        );
        builder.set_stack.pop();
        builder
    }

    /// Registers a state type with its initial value.
    ///
    /// Seeds the [`State<S>`](crate::State) and
    /// [`NextState<S>`](crate::NextState) resources at world start and
    /// applies queued transitions at every frame start, before run
    /// conditions refresh. Registering the same state type again is a
    /// no-op.
    pub fn init_state<S: States>(mut self, initial: S) -> Self {
        if self.registered_states.insert(TypeId::of::<S>()) {
            self.state_hooks.push(state_hook(initial));
        }
        self
    }

    fn push_op<S: System>(
        mut self,
        phase: Phase,
        system: S,
        options: SystemOptions,
        inherit_set_options: bool,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }

        let name = std::any::type_name::<S>();
        let tag = TypeId::of::<S>();

        if !self.registered.insert(tag) {
            self.error = Some(ScheduleError::DuplicateSystem { name });
            return self;
        }

        let mut merged = options;
        if inherit_set_options {
            for frame in &self.set_stack {
                merged.merge(&frame.options);
            }
        }

        if phase != Phase::Async && !merged.run_after.is_empty() {
            log::warn!(
                "system `{name}` declares run_after in the {phase} phase; \
                 sync phases preserve insertion order, ignoring"
            );
            merged.run_after.clear();
        }

        self.ops.push(AddOp {
            phase,
            system: Arc::new(system),
            tag,
            name,
            options: merged,
        });
        self
    }

    /// Replays the accumulated adds into the immutable schedule.
    pub(crate) fn finalize(mut self, options: &WorldOptions) -> Result<Schedule, ScheduleError> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        if options.fps_limit == FpsLimit::Limited(0) {
            return Err(ScheduleError::BadConfig {
                reason: "fps_limit must be a positive frame rate or unlimited".into(),
            });
        }

        self = self.add_startup_system(CreateDefaultResources);

        let mut slots = Vec::with_capacity(self.ops.len());
        let mut startup = Vec::new();
        let mut frame_start = Vec::new();
        let mut frame_end = Vec::new();
        let mut shutdown = Vec::new();
        let mut plan = BatchPlan::default();
        let mut table = ConditionTable::default();

        for op in self.ops {
            let id = SystemId(slots.len());
            let locks = op.system.locked_components();
            let conditions = intern_conditions(&mut table, &op.options);

            match op.phase {
                Phase::Startup => startup.push(id),
                Phase::FrameStart => frame_start.push(id),
                Phase::Async => {
                    plan.insert(id, op.tag, op.name, &locks, &op.options.run_after)?;
                }
                Phase::FrameEnd => frame_end.push(id),
                Phase::Shutdown => shutdown.push(id),
            }

            slots.push(SystemSlot {
                system: op.system,
                name: op.name,
                phase: op.phase,
                locks,
                conditions,
            });
        }

        Ok(Schedule {
            slots,
            startup,
            frame_start,
            batches: plan.into_batches(),
            frame_end,
            shutdown,
            conditions: table.into_conditions(),
            state_hooks: self.state_hooks,
        })
    }
}

/// Interns one system's run conditions, returning its gate list.
fn intern_conditions(table: &mut ConditionTable, options: &SystemOptions) -> Vec<ConditionId> {
    let mut ids = Vec::new();

    for check in &options.run_in_state {
        let id = table.intern(
            ConditionKey::StateEq(check.state_type, check.variant_hash),
            format!("in_state<{}>", check.state_name),
            Arc::clone(&check.eval),
        );
        ids.push(id);
    }
    for check in &options.run_not_in_state {
        let eval = Arc::clone(&check.eval);
        let id = table.intern(
            ConditionKey::StateNot(check.state_type, check.variant_hash),
            format!("not_in_state<{}>", check.state_name),
            Arc::new(move |stores: &Stores| !eval(stores)),
        );
        ids.push(id);
    }
    for predicate in &options.run_if {
        let address = Arc::as_ptr(predicate) as *const () as usize;
        let id = table.intern(
            ConditionKey::Predicate(address),
            format!("run_if({address:#x})"),
            Arc::clone(predicate),
        );
        ids.push(id);
    }

    ids
}

/// Internal startup system appended at finalization: seeds the default
/// resources every world carries.
struct CreateDefaultResources;

impl System for CreateDefaultResources {
    async fn run(&self, ctx: &SystemContext) {
        ctx.stores().insert_resource(Clock::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::WorldOptions;

    #[derive(Clone)]
    struct C1;
    impl crate::Component for C1 {}

    #[derive(Clone)]
    struct C2;
    impl crate::Component for C2 {}

    struct SysA;
    impl System for SysA {
        fn locked_components(&self) -> LockSet {
            LockSet::new().add::<C1>()
        }
        async fn run(&self, _ctx: &SystemContext) {}
    }

    struct SysB;
    impl System for SysB {
        fn locked_components(&self) -> LockSet {
            LockSet::new().add::<C1>()
        }
        async fn run(&self, _ctx: &SystemContext) {}
    }

    struct SysC;
    impl System for SysC {
        fn locked_components(&self) -> LockSet {
            LockSet::new().add::<C2>()
        }
        async fn run(&self, _ctx: &SystemContext) {}
    }

    struct NoLocks;
    impl System for NoLocks {
        async fn run(&self, _ctx: &SystemContext) {}
    }

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    enum Mode {
        On,
        Off,
    }
    impl States for Mode {}

    fn finalize(builder: ScheduleBuilder) -> Result<Schedule, ScheduleError> {
        builder.finalize(&WorldOptions::default())
    }

    #[test]
    fn conflict_forces_second_batch() {
        let schedule = finalize(
            ScheduleBuilder::new()
                .add_system(SysA, SystemOptions::new())
                .add_system(SysB, SystemOptions::new())
                .add_system(SysC, SystemOptions::new()),
        )
        .unwrap();

        assert_eq!(
            schedule.batches,
            vec![vec![SystemId(0), SystemId(2)], vec![SystemId(1)]]
        );
    }

    #[test]
    fn run_after_moves_to_later_batch() {
        let schedule = finalize(
            ScheduleBuilder::new()
                .add_system(SysA, SystemOptions::new())
                .add_system(SysC, SystemOptions::new())
                .add_system(NoLocks, SystemOptions::new().run_after::<SysA>()),
        )
        .unwrap();

        assert_eq!(
            schedule.batches,
            vec![vec![SystemId(0), SystemId(1)], vec![SystemId(2)]]
        );
    }

    #[test]
    fn duplicate_across_phases_is_rejected() {
        let result = finalize(
            ScheduleBuilder::new()
                .add_system(SysA, SystemOptions::new())
                .add_frame_end_system(SysA, SystemOptions::new()),
        );
        assert!(matches!(
            result,
            Err(ScheduleError::DuplicateSystem { .. })
        ));
    }

    #[test]
    fn duplicate_within_phase_is_rejected() {
        let result = finalize(
            ScheduleBuilder::new()
                .add_startup_system(SysA)
                .add_startup_system(SysA),
        );
        assert!(matches!(
            result,
            Err(ScheduleError::DuplicateSystem { .. })
        ));
    }

    #[test]
    fn error_latches_and_skips_later_adds() {
        let result = finalize(
            ScheduleBuilder::new()
                .add_system(SysA, SystemOptions::new())
                .add_system(SysA, SystemOptions::new())
                .add_system(SysB, SystemOptions::new()),
        );
        assert!(matches!(
            result,
            Err(ScheduleError::DuplicateSystem { .. })
        ));
    }

    #[test]
    fn unknown_predecessor_is_rejected() {
        let result = finalize(
            ScheduleBuilder::new().add_system(SysA, SystemOptions::new().run_after::<SysB>()),
        );
        assert!(matches!(
            result,
            Err(ScheduleError::UnknownPredecessor { .. })
        ));
    }

    #[test]
    fn run_after_on_sync_phase_is_ignored() {
        // SysB is never added anywhere: if run_after survived on the
        // sync phases, finalization would report UnknownPredecessor.
        let schedule = finalize(
            ScheduleBuilder::new()
                .add_frame_start_system(SysC, SystemOptions::new().run_after::<SysB>())
                .add_frame_end_system(NoLocks, SystemOptions::new().run_after::<SysB>()),
        )
        .unwrap();

        assert_eq!(schedule.frame_start, vec![SystemId(0)]);
        assert_eq!(schedule.frame_end, vec![SystemId(1)]);
    }

    #[test]
    fn sync_phases_preserve_insertion_order() {
        let schedule = finalize(
            ScheduleBuilder::new()
                .add_frame_start_system(SysA, SystemOptions::new())
                .add_frame_start_system(SysB, SystemOptions::new())
                .add_frame_start_system(SysC, SystemOptions::new()),
        )
        .unwrap();

        assert_eq!(
            schedule.frame_start,
            vec![SystemId(0), SystemId(1), SystemId(2)]
        );
    }

    #[test]
    fn default_resources_system_is_appended_to_startup() {
        let schedule = finalize(ScheduleBuilder::new().add_startup_system(SysA)).unwrap();

        assert_eq!(schedule.startup.len(), 2);
        let last = *schedule.startup.last().unwrap();
        assert!(schedule.slots[last.0].name.contains("CreateDefaultResources"));
    }

    #[test]
    fn bad_fps_limit_is_rejected() {
        let options = WorldOptions {
            fps_limit: FpsLimit::Limited(0),
            ..WorldOptions::default()
        };
        let result = ScheduleBuilder::new().finalize(&options);
        assert!(matches!(result, Err(ScheduleError::BadConfig { .. })));
    }

    #[test]
    fn set_options_apply_to_contained_adds() {
        let schedule = finalize(ScheduleBuilder::new().add_system_set(
            SystemOptions::new().run_in_state(Mode::On),
            |builder| {
                builder
                    .add_system(SysA, SystemOptions::new())
                    .add_system(SysC, SystemOptions::new())
            },
        ))
        .unwrap();

        // Both systems share the single interned state condition.
        assert_eq!(schedule.conditions.len(), 1);
        assert_eq!(schedule.slots[0].conditions, schedule.slots[1].conditions);
        assert_eq!(schedule.slots[0].conditions.len(), 1);
    }

    #[test]
    fn nested_sets_accumulate_and_unwind() {
        let schedule = finalize(ScheduleBuilder::new().add_system_set(
            SystemOptions::new().run_in_state(Mode::On),
            |builder| {
                builder
                    .add_system_set(
                        SystemOptions::new().run_not_in_state(Mode::Off),
                        |inner| inner.add_system(SysA, SystemOptions::new()),
                    )
                    .add_system(SysC, SystemOptions::new())
            },
        ))
        .unwrap();

        // SysA carries both gates, SysC only the outer one.
        assert_eq!(schedule.slots[0].conditions.len(), 2);
        assert_eq!(schedule.slots[1].conditions.len(), 1);
        assert_eq!(schedule.conditions.len(), 2);
    }

    #[test]
    fn adds_after_set_exit_are_unaffected() {
        let schedule = finalize(
            ScheduleBuilder::new()
                .add_system_set(SystemOptions::new().run_in_state(Mode::On), |builder| {
                    builder.add_system(SysA, SystemOptions::new())
                })
                .add_system(SysC, SystemOptions::new()),
        )
        .unwrap();

        assert_eq!(schedule.slots[0].conditions.len(), 1);
        assert!(schedule.slots[1].conditions.is_empty());
    }

    #[test]
    fn option_merge_is_idempotent() {
        let mut options = SystemOptions::new()
            .run_after::<SysA>()
            .run_in_state(Mode::On)
            .run_not_in_state(Mode::Off)
            .run_if(|_| true);
        let copy = options.clone();
        options.merge(&copy);

        assert_eq!(options.run_after.len(), 1);
        assert_eq!(options.run_if.len(), 1);
        assert_eq!(options.run_in_state.len(), 1);
        assert_eq!(options.run_not_in_state.len(), 1);
    }

    #[test]
    fn repeated_state_gate_interns_once() {
        let schedule = finalize(
            ScheduleBuilder::new()
                .add_system(SysA, SystemOptions::new().run_in_state(Mode::On))
                .add_system(SysC, SystemOptions::new().run_in_state(Mode::On)),
        )
        .unwrap();

        assert_eq!(schedule.conditions.len(), 1);
    }

    #[test]
    fn init_state_registers_once() {
        let builder = ScheduleBuilder::new()
            .init_state(Mode::On)
            .init_state(Mode::Off);
        let schedule = finalize(builder).unwrap();
        assert_eq!(schedule.state_hooks.len(), 1);
    }
}
