use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::component::Component;
use crate::entity::Entity;
use crate::events::{Event, EventRecord};

/// The shared component, resource, and event tables of one world.
///
/// All three tables are concurrently readable from any task. Component
/// and resource writes are only legal from a system that has declared
/// the matching locks; the schedule guarantees no two such writers run
/// in the same batch, so the coarse table locks below are held only
/// for the duration of a single access, never across awaits. The event
/// table is append-only within a frame and drained by the frame driver
/// alone.
///
/// The handle is shared behind `Arc` and dropped with the world.
pub struct Stores {
    components: RwLock<HashMap<(Entity, TypeId), Box<dyn Any + Send + Sync>>>,
    resources: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    events: Mutex<Vec<EventRecord>>,
    next_entity: AtomicU64,
}

impl Stores {
    pub(crate) fn new() -> Self {
        Self {
            components: RwLock::new(HashMap::new()),
            resources: RwLock::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            next_entity: AtomicU64::new(1),
        }
    }

    /// Allocates a fresh entity id.
    pub fn spawn_entity(&self) -> Entity {
        Entity::from_raw(self.next_entity.fetch_add(1, Ordering::Relaxed))
    }

    // ---- Components ----

    /// Returns a copy of entity's component of type `C`, if present.
    pub fn get_component<C: Component + Clone>(&self, entity: Entity) -> Option<C> {
        self.components
            .read()
            .get(&(entity, TypeId::of::<C>()))
            .and_then(|boxed| boxed.downcast_ref::<C>())
            .cloned()
    }

    /// Returns whether the entity carries a component of type `C`.
    pub fn has_component<C: Component>(&self, entity: Entity) -> bool {
        self.components
            .read()
            .contains_key(&(entity, TypeId::of::<C>()))
    }

    /// Inserts or replaces entity's component of type `C`.
    pub fn set_component<C: Component>(&self, entity: Entity, component: C) {
        self.components
            .write()
            .insert((entity, TypeId::of::<C>()), Box::new(component));
    }

    /// Removes entity's component of type `C`. Returns whether it existed.
    pub fn delete_component<C: Component>(&self, entity: Entity) -> bool {
        self.components
            .write()
            .remove(&(entity, TypeId::of::<C>()))
            .is_some()
    }

    /// Returns the entities currently carrying a component of type `C`.
    pub fn entities_with<C: Component>(&self) -> Vec<Entity> {
        let wanted = TypeId::of::<C>();
        self.components
            .read()
            .keys()
            .filter(|(_, type_id)| *type_id == wanted)
            .map(|(entity, _)| *entity)
            .collect()
    }

    // ---- Resources ----

    /// Returns a copy of the global resource of type `R`, if present.
    pub fn resource<R: Clone + Send + Sync + 'static>(&self) -> Option<R> {
        self.resources
            .read()
            .get(&TypeId::of::<R>())
            .and_then(|boxed| boxed.downcast_ref::<R>())
            .cloned()
    }

    /// Returns whether a resource of type `R` exists.
    pub fn has_resource<R: Send + Sync + 'static>(&self) -> bool {
        self.resources.read().contains_key(&TypeId::of::<R>())
    }

    /// Inserts or replaces the global resource of type `R`.
    pub fn insert_resource<R: Send + Sync + 'static>(&self, resource: R) {
        self.resources
            .write()
            .insert(TypeId::of::<R>(), Box::new(resource));
    }

    /// Removes the global resource of type `R`. Returns whether it existed.
    pub fn remove_resource<R: Send + Sync + 'static>(&self) -> bool {
        self.resources.write().remove(&TypeId::of::<R>()).is_some()
    }

    /// Mutates the resource of type `R` in place under the table lock.
    ///
    /// Returns `false` without calling `f` if the resource is missing.
    pub fn update_resource<R: Send + Sync + 'static>(&self, f: impl FnOnce(&mut R)) -> bool {
        let mut table = self.resources.write();
        match table
            .get_mut(&TypeId::of::<R>())
            .and_then(|boxed| boxed.downcast_mut::<R>())
        {
            Some(resource) => {
                f(resource);
                true
            }
            None => false,
        }
    }

    // ---- Events ----

    /// Appends an event under the given key id.
    ///
    /// Events inserted during frame N are drained at the start of
    /// frame N+1 and batched into that frame's data.
    pub fn insert_event<E: Event>(&self, key: u64, event: E) {
        self.insert_record(EventRecord::new(key, event));
    }

    pub(crate) fn insert_record(&self, record: EventRecord) {
        self.events.lock().push(record);
    }

    /// Removes and returns all pending events, clearing the table.
    pub(crate) fn drain_events(&self) -> Vec<EventRecord> {
        std::mem::take(&mut *self.events.lock())
    }
}
