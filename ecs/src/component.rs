/// Capability trait for ECS components.
///
/// A component is a typed datum attached to an entity and the unit of
/// locking: async systems declare the component types they mutate via
/// [`LockSet`](crate::LockSet), and the schedule builder uses those
/// declarations to keep conflicting systems out of the same batch.
///
/// Components can be any `Send + Sync + 'static` type; the trait is a
/// deliberate opt-in marker so arbitrary types don't silently become
/// part of the locking vocabulary.
///
/// ```
/// use firethorn_ecs::Component;
///
/// #[derive(Clone)]
/// struct Health {
///     current: f32,
///     max: f32,
/// }
/// impl Component for Health {}
/// ```
///
/// Marker components with no fields are commonly used as entity tags
/// for scoped locks (see [`LockSet::add_scoped`](crate::LockSet::add_scoped)):
///
/// ```
/// use firethorn_ecs::Component;
///
/// #[derive(Clone)]
/// struct Hostile;
/// impl Component for Hostile {}
/// ```
pub trait Component: Send + Sync + 'static {}
