//! # Grid Relevancy
//!
//! Decides which entities each observer (a connected client, a replay
//! recorder) needs to hear about. An observer subscribes to the square of
//! cells within `interest_radius` of its own cell; an entity is visible while
//! its cell is subscribed.
//!
//! ```text
//!   +---+---+---+
//!   |   |   |   |      radius 1: 3x3 cells around the observer
//!   +---+---+---+
//!   |   | @ |   |      entered  -> full snapshot in the next batch
//!   +---+---+---+      exited   -> id in removed_entities
//!   |   |   |   |
//!   +---+---+---+
//! ```
//!
//! [`GridRelevancy::update`] runs once per tick on the simulation thread.
//! [`GridRelevancy::build_frame_batches`] only reads, so it fans out over
//! observers with rayon.

use std::collections::{BTreeMap, BTreeSet};

use kinetic_core::{EntityStore, SpatialSystem};
use kinetic_shared::{CellChangeEvent, CellCoord, EntityId, FrameBatch, IntentEvent, Vec3};
use rayon::prelude::*;

/// Observer movement (world units) below which the subscription is kept.
pub const MOVEMENT_THRESHOLD: f32 = 100.0;

/// Largest accepted interest radius, in cells (a 65x65 square).
pub const MAX_INTEREST_RADIUS: i32 = 32;

/// Identifies a registered observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(pub u32);

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Observer({})", self.0)
    }
}

/// Per-observer interest state.
#[derive(Clone, Debug)]
struct Observer {
    location: Vec3,
    /// Location the subscription was last computed for.
    last_location: Vec3,
    current_cell: CellCoord,
    subscribed: BTreeSet<CellCoord>,
    visible: BTreeSet<EntityId>,
    entered: Vec<EntityId>,
    exited: Vec<EntityId>,
    initialized: bool,
}

impl Observer {
    fn new(location: Vec3) -> Self {
        Self {
            location,
            last_location: location,
            current_cell: CellCoord::INVALID,
            subscribed: BTreeSet::new(),
            visible: BTreeSet::new(),
            entered: Vec::new(),
            exited: Vec::new(),
            initialized: false,
        }
    }

    fn begin_frame(&mut self) {
        self.entered.clear();
        self.exited.clear();
    }

    fn subscribe_around(&mut self, cell_size: f32, radius: i32) {
        let center = CellCoord::from_position(self.location, cell_size);
        self.subscribed.clear();
        for x in -radius..=radius {
            for y in -radius..=radius {
                self.subscribed
                    .insert(CellCoord::new(center.x.wrapping_add(x), center.y.wrapping_add(y)));
            }
        }
        self.current_cell = center;
        self.last_location = self.location;
    }

    fn reveal(&mut self, entity: EntityId) {
        if self.visible.insert(entity) {
            self.entered.push(entity);
        }
    }

    fn hide(&mut self, entity: EntityId) {
        if self.visible.remove(&entity) {
            self.exited.push(entity);
        }
    }

    fn interested_in(&self, cell: CellCoord) -> bool {
        cell.is_valid() && self.subscribed.contains(&cell)
    }
}

/// Where an intent happened, resolved once per batch build.
enum EventScope {
    Everyone,
    Cell(CellCoord),
}

/// Cell-based interest management for every observer.
#[derive(Debug)]
pub struct GridRelevancy {
    interest_radius: i32,
    observers: BTreeMap<ObserverId, Observer>,
    next_id: u32,
}

impl GridRelevancy {
    /// Creates an empty relevancy set. The radius is clamped to
    /// `0..=MAX_INTEREST_RADIUS`.
    #[must_use]
    pub fn new(interest_radius: i32) -> Self {
        Self {
            interest_radius: interest_radius.clamp(0, MAX_INTEREST_RADIUS),
            observers: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Half-width of the subscribed square, in cells.
    #[must_use]
    pub const fn interest_radius(&self) -> i32 {
        self.interest_radius
    }

    /// Number of registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Adds an observer. It receives every entity in range as "entered" on
    /// the next [`Self::update`].
    pub fn register_observer(&mut self, location: Vec3) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.observers.insert(id, Observer::new(location));
        tracing::info!("[GridRelevancy] Registered {}", id);
        id
    }

    /// Removes an observer. Returns false for unknown ids.
    pub fn unregister_observer(&mut self, id: ObserverId) -> bool {
        let removed = self.observers.remove(&id).is_some();
        if removed {
            tracing::info!("[GridRelevancy] Unregistered {}", id);
        }
        removed
    }

    /// Moves an observer. Takes effect on the next [`Self::update`].
    pub fn update_observer_location(&mut self, id: ObserverId, location: Vec3) {
        if let Some(observer) = self.observers.get_mut(&id) {
            observer.location = location;
        }
    }

    /// Forces every observer to re-derive its visible set on the next
    /// [`Self::update`], e.g. after the store was restored.
    pub fn invalidate(&mut self) {
        for observer in self.observers.values_mut() {
            observer.initialized = false;
        }
    }

    /// Entities currently visible to an observer, ascending id.
    #[must_use]
    pub fn visible_entities(&self, id: ObserverId) -> Vec<EntityId> {
        self.observers
            .get(&id)
            .map(|o| o.visible.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Entities that became visible during the last update.
    #[must_use]
    pub fn newly_visible(&self, id: ObserverId) -> &[EntityId] {
        self.observers.get(&id).map_or(&[], |o| o.entered.as_slice())
    }

    /// Entities that stopped being visible during the last update.
    #[must_use]
    pub fn removed(&self, id: ObserverId) -> &[EntityId] {
        self.observers.get(&id).map_or(&[], |o| o.exited.as_slice())
    }

    /// True if the observer subscribes to `cell`.
    #[must_use]
    pub fn is_interested_in_cell(&self, id: ObserverId, cell: CellCoord) -> bool {
        self.observers.get(&id).is_some_and(|o| o.interested_in(cell))
    }

    /// Observers subscribed to the cell containing `location`.
    #[must_use]
    pub fn observers_at_location(&self, location: Vec3, cell_size: f32) -> Vec<ObserverId> {
        let cell = CellCoord::from_position(location, cell_size);
        self.observers
            .iter()
            .filter(|(_, o)| o.interested_in(cell))
            .map(|(id, _)| *id)
            .collect()
    }

    // =========================================================================
    // Per-tick update
    // =========================================================================

    /// Recomputes entered/exited lists for this tick.
    ///
    /// Order: clear last frame's lists, move subscriptions of observers that
    /// moved more than [`MOVEMENT_THRESHOLD`] into a new cell, synchronize
    /// new or invalidated observers, then apply the tick's cell changes.
    pub fn update(&mut self, spatial: &SpatialSystem, cell_events: &[CellChangeEvent]) {
        let cell_size = spatial.cell_size();
        let radius = self.interest_radius;

        for observer in self.observers.values_mut() {
            observer.begin_frame();
        }

        for observer in self.observers.values_mut().filter(|o| o.initialized) {
            if observer.location.distance_squared(observer.last_location)
                <= MOVEMENT_THRESHOLD * MOVEMENT_THRESHOLD
            {
                continue;
            }
            let new_cell = CellCoord::from_position(observer.location, cell_size);
            if new_cell == observer.current_cell {
                observer.last_location = observer.location;
                continue;
            }

            let old_cells = std::mem::take(&mut observer.subscribed);
            observer.subscribe_around(cell_size, radius);

            let mut gained = BTreeSet::new();
            spatial.get_entities_in_cells(observer.subscribed.difference(&old_cells), &mut gained);
            for entity in gained {
                observer.reveal(entity);
            }

            let mut lost = BTreeSet::new();
            spatial.get_entities_in_cells(old_cells.difference(&observer.subscribed), &mut lost);
            for entity in lost {
                observer.hide(entity);
            }
        }

        for (id, observer) in self.observers.iter_mut().filter(|(_, o)| !o.initialized) {
            observer.subscribe_around(cell_size, radius);
            let mut in_range = BTreeSet::new();
            spatial.get_entities_in_cells(&observer.subscribed, &mut in_range);
            let stale: Vec<EntityId> = observer.visible.difference(&in_range).copied().collect();
            for entity in stale {
                observer.hide(entity);
            }
            for entity in in_range {
                observer.reveal(entity);
            }
            observer.initialized = true;
            tracing::debug!(
                "[GridRelevancy] Synchronized {} ({} visible)",
                id,
                observer.visible.len()
            );
        }

        for event in cell_events {
            for observer in self.observers.values_mut() {
                let was_visible = observer.interested_in(event.old_cell);
                let is_visible = observer.interested_in(event.new_cell);
                match (was_visible, is_visible) {
                    (false, true) => observer.reveal(event.entity),
                    (true, false) => observer.hide(event.entity),
                    _ => {}
                }
            }
        }
    }

    // =========================================================================
    // Batch fan-out
    // =========================================================================

    /// Builds one [`FrameBatch`] per observer from the finalized store.
    ///
    /// Global intents and intents whose source has no position go to every
    /// observer; the rest only to observers subscribed to the source's cell.
    /// Snapshots cover the entities that entered this tick.
    #[must_use]
    pub fn build_frame_batches(
        &self,
        store: &EntityStore,
        cell_size: f32,
        frame: i32,
        events: &[IntentEvent],
    ) -> Vec<(ObserverId, FrameBatch)> {
        let scopes: Vec<EventScope> = events
            .iter()
            .map(|event| {
                if event.is_global {
                    return EventScope::Everyone;
                }
                store
                    .try_get_position(event.source)
                    .map_or(EventScope::Everyone, |pos| {
                        EventScope::Cell(CellCoord::from_position(pos, cell_size))
                    })
            })
            .collect();

        let observers: Vec<(&ObserverId, &Observer)> = self.observers.iter().collect();
        observers
            .par_iter()
            .map(|&(id, observer)| {
                let mut batch = FrameBatch {
                    frame_number: frame,
                    ..FrameBatch::default()
                };
                batch.events = events
                    .iter()
                    .zip(&scopes)
                    .filter(|(_, scope)| match scope {
                        EventScope::Everyone => true,
                        EventScope::Cell(cell) => observer.interested_in(*cell),
                    })
                    .map(|(event, _)| event.clone())
                    .collect();
                batch.snapshots = observer
                    .entered
                    .iter()
                    .filter(|&&entity| store.is_valid(entity))
                    .map(|&entity| store.create_snapshot(entity))
                    .collect();
                batch.removed_entities.clone_from(&observer.exited);
                (*id, batch)
            })
            .collect()
    }
}
