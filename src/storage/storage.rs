use super::material::{Material, MaterialEntry};
use super::quantity::{CloneFlags, OrderEnum, Quantity, QuantityId, QuantityValue, ValueKind};
use std::collections::BTreeMap;
use std::sync::{RwLock, Weak};

/// Behaviour of [`Storage::resize`] for buffers left empty by a partial
/// clone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeFlag {
    /// Size-0 buffers stay empty; only the populated ones grow.
    KeepEmpty,
    /// Every buffer is grown to the new particle count.
    GrowAll,
}

/// Ordered mapping from [`QuantityId`] to [`Quantity`], plus the material
/// ranges partitioning the particles and an optional chain of dependent
/// storages (shadow copies held by predictor–corrector).
///
/// Invariants, upheld by every mutating operation:
/// - all quantities have the same particle count,
/// - material ranges tile `[0, N)` contiguously,
/// - buffers of one quantity are either the common length or empty.
#[derive(Default)]
pub struct Storage {
    quantities: BTreeMap<QuantityId, Quantity>,
    materials: Vec<MaterialEntry>,
    dependents: Vec<Weak<RwLock<Storage>>>,
}

impl Storage {
    pub fn new() -> Self {
        Storage::default()
    }

    pub fn with_material(material: Material) -> Self {
        Storage {
            quantities: BTreeMap::new(),
            materials: vec![MaterialEntry {
                material,
                range: 0..0,
            }],
            dependents: Vec::new(),
        }
    }

    pub fn particle_count(&self) -> usize {
        self.quantities
            .values()
            .next()
            .map(|q| q.len())
            .unwrap_or(0)
    }

    pub fn quantity_count(&self) -> usize {
        self.quantities.len()
    }

    pub fn has(&self, id: QuantityId) -> bool {
        self.quantities.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = QuantityId> + '_ {
        self.quantities.keys().copied()
    }

    pub fn quantity(&self, id: QuantityId) -> &Quantity {
        self.quantities
            .get(&id)
            .unwrap_or_else(|| panic!("quantity {:?} not in storage", id))
    }

    pub fn quantity_mut(&mut self, id: QuantityId) -> &mut Quantity {
        self.quantities
            .get_mut(&id)
            .unwrap_or_else(|| panic!("quantity {:?} not in storage", id))
    }

    pub fn quantities(&self) -> impl Iterator<Item = (QuantityId, &Quantity)> {
        self.quantities.iter().map(|(id, q)| (*id, q))
    }

    pub fn quantities_mut(&mut self) -> impl Iterator<Item = (QuantityId, &mut Quantity)> {
        self.quantities.iter_mut().map(|(id, q)| (*id, q))
    }

    /// Creates a quantity or extends the order of an existing one. Fails
    /// (panics) if the id exists with a different value type; inserting with
    /// a lower order keeps the existing higher order.
    pub fn insert<T: QuantityValue>(&mut self, id: QuantityId, order: OrderEnum, values: Vec<T>) {
        let n = self.particle_count();
        if let Some(existing) = self.quantities.get_mut(&id) {
            assert_eq!(
                existing.kind(),
                T::KIND,
                "quantity {:?} already stored with a different type",
                id
            );
            if order > existing.order() {
                existing.extend_order(order);
            }
            return;
        }
        assert!(
            self.quantities.is_empty() || values.len() == n,
            "quantity {:?} has {} particles, storage has {}",
            id,
            values.len(),
            n
        );
        let len = values.len();
        self.quantities.insert(id, Quantity::new(order, values));
        if self.quantities.len() == 1 {
            // first quantity defines the particle count
            if let [entry] = &mut self.materials[..] {
                entry.range = 0..len;
            }
        }
    }

    /// Inserts an already constructed quantity; used when rows are copied
    /// wholesale from another storage.
    pub fn insert_quantity(&mut self, id: QuantityId, quantity: Quantity) {
        assert!(
            self.quantities.is_empty() || quantity.len() == self.particle_count(),
            "quantity {:?} does not match the particle count",
            id
        );
        let len = quantity.len();
        assert!(self.quantities.insert(id, quantity).is_none());
        if self.quantities.len() == 1 {
            if let [entry] = &mut self.materials[..] {
                entry.range = 0..len;
            }
        }
    }

    pub fn insert_uniform<T: QuantityValue>(&mut self, id: QuantityId, order: OrderEnum, value: T) {
        let n = self.particle_count();
        assert!(n > 0, "cannot broadcast into an empty storage");
        self.insert(id, order, vec![value; n]);
    }

    pub fn get<T: QuantityValue>(&self, id: QuantityId) -> &[T] {
        self.quantity(id).values()
    }

    pub fn get_mut<T: QuantityValue>(&mut self, id: QuantityId) -> &mut Vec<T> {
        self.quantity_mut(id).values_mut()
    }

    pub fn get_dt<T: QuantityValue>(&self, id: QuantityId) -> &[T] {
        self.quantity(id).dt()
    }

    pub fn get_dt_mut<T: QuantityValue>(&mut self, id: QuantityId) -> &mut Vec<T> {
        self.quantity_mut(id).dt_mut()
    }

    pub fn get_d2t<T: QuantityValue>(&self, id: QuantityId) -> &[T] {
        self.quantity(id).d2t()
    }

    pub fn get_d2t_mut<T: QuantityValue>(&mut self, id: QuantityId) -> &mut Vec<T> {
        self.quantity_mut(id).d2t_mut()
    }

    /// Moves the value buffer out, leaving an empty one; pair with
    /// [`Storage::put_values`]. Used by solvers that mutate several columns
    /// at once.
    pub fn take_values<T: QuantityValue>(&mut self, id: QuantityId) -> Vec<T> {
        std::mem::take(self.quantity_mut(id).values_mut())
    }

    pub fn put_values<T: QuantityValue>(&mut self, id: QuantityId, values: Vec<T>) {
        let slot = self.quantity_mut(id).values_mut::<T>();
        assert!(slot.is_empty(), "buffer of {:?} was not taken", id);
        *slot = values;
    }

    pub fn take_dt<T: QuantityValue>(&mut self, id: QuantityId) -> Vec<T> {
        std::mem::take(self.quantity_mut(id).dt_mut())
    }

    pub fn put_dt<T: QuantityValue>(&mut self, id: QuantityId, values: Vec<T>) {
        let slot = self.quantity_mut(id).dt_mut::<T>();
        assert!(slot.is_empty(), "derivative buffer of {:?} was not taken", id);
        *slot = values;
    }

    /// Sets the particle count. `KeepEmpty` leaves size-0 buffers (from a
    /// partial clone) untouched.
    pub fn resize(&mut self, n: usize, flag: ResizeFlag) {
        assert!(
            self.materials.len() <= 1,
            "cannot resize a storage with multiple materials"
        );
        for q in self.quantities.values_mut() {
            q.for_each_buffer(|buffer| {
                if flag == ResizeFlag::KeepEmpty && buffer.is_empty() {
                    return;
                }
                buffer.resize(n);
            });
        }
        if let [entry] = &mut self.materials[..] {
            entry.range = 0..n;
        }
    }

    /// Appends another storage. Quantities present in either side end up
    /// with the concatenated length; buffers missing on one side are filled
    /// with the type's zero. Material ranges are shifted and appended.
    pub fn merge(&mut self, other: Storage) {
        if self.quantities.is_empty() && self.materials.is_empty() {
            *self = other;
            return;
        }
        let n_self = self.particle_count();
        let n_other = other.particle_count();

        // validate before touching anything
        for (id, q) in &other.quantities {
            if let Some(existing) = self.quantities.get(id) {
                assert_eq!(
                    existing.kind(),
                    q.kind(),
                    "cannot merge {:?}: value types differ",
                    id
                );
            }
        }

        // quantities only on this side grow by the other side's zeros;
        // empty buffers of a partial clone stay empty
        let other_ids: std::collections::BTreeSet<QuantityId> =
            other.quantities.keys().copied().collect();
        for (id, q) in self.quantities.iter_mut() {
            if other_ids.contains(id) {
                continue;
            }
            q.for_each_buffer(|buffer| {
                if buffer.len() == n_self {
                    buffer.append_zeros(n_other);
                }
            });
        }

        for (id, q) in other.quantities {
            match self.quantities.get_mut(&id) {
                Some(existing) => {
                    if q.order() > existing.order() {
                        existing.extend_order(q.order());
                    }
                    for level in 0..existing.order().levels() {
                        let dst = existing.buffer_mut(level).unwrap();
                        match q.buffer(level) {
                            Some(src) if !src.is_empty() => dst.append(src),
                            _ => dst.append_zeros(n_other),
                        }
                    }
                }
                None => {
                    // quantity only in the other storage: prepend zeros
                    let mut fresh = q.clone_selected(CloneFlags::ALL);
                    let order = fresh.order();
                    for level in 0..order.levels() {
                        let buffer = fresh.buffer_mut(level).unwrap();
                        let mut grown = super::quantity::Buffer::empty(buffer.kind());
                        grown.resize(n_self);
                        grown.append(buffer);
                        *buffer = grown;
                    }
                    self.quantities.insert(id, fresh);
                }
            }
        }

        for mut entry in other.materials {
            entry.range = entry.range.start + n_self..entry.range.end + n_self;
            self.materials.push(entry);
        }
    }

    /// Deletes the given particles, preserving the order of the remaining
    /// ones. Material ranges shrink accordingly; empty materials are
    /// dropped.
    pub fn remove(&mut self, indices: &[usize]) {
        if indices.is_empty() {
            return;
        }
        let mut sorted: Vec<usize> = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let n = self.particle_count();
        assert!(*sorted.last().unwrap() < n, "removed index out of range");

        for q in self.quantities.values_mut() {
            q.for_each_buffer(|buffer| {
                if !buffer.is_empty() {
                    buffer.remove_indices(&sorted);
                }
            });
        }

        // shrink material ranges by the number of removed indices below them
        let removed_below = |idx: usize| sorted.partition_point(|&r| r < idx);
        for entry in &mut self.materials {
            entry.range =
                entry.range.start - removed_below(entry.range.start)..entry.range.end - removed_below(entry.range.end);
        }
        self.materials.retain(|entry| !entry.range.is_empty());
    }

    /// Deep-copies the selected derivative levels; unselected buffers come
    /// out empty. The set of quantity ids and the materials are always
    /// preserved.
    pub fn clone_selected(&self, flags: CloneFlags) -> Storage {
        Storage {
            quantities: self
                .quantities
                .iter()
                .map(|(id, q)| (*id, q.clone_selected(flags)))
                .collect(),
            materials: self.materials.clone(),
            dependents: Vec::new(),
        }
    }

    /// Swaps selected buffers with another storage of the same layout.
    pub fn swap(&mut self, other: &mut Storage, flags: CloneFlags) {
        assert_eq!(self.quantity_count(), other.quantity_count());
        for ((id_a, a), (id_b, b)) in self
            .quantities
            .iter_mut()
            .zip(other.quantities.iter_mut())
        {
            assert_eq!(id_a, id_b, "cannot swap storages with different quantities");
            a.swap_selected(b, flags);
        }
    }

    /// Zeroes the highest derivative of every quantity; called before each
    /// derivative sweep.
    pub fn init(&mut self) {
        for q in self.quantities.values_mut() {
            q.zero_highest();
        }
    }

    pub fn add_dependent(&mut self, dependent: Weak<RwLock<Storage>>) {
        self.dependents.push(dependent);
    }

    /// Applies `f` to every live dependent storage; used to keep shadow
    /// storages size-consistent after merges and removals.
    pub fn propagate(&mut self, f: impl Fn(&mut Storage)) {
        self.dependents.retain(|weak| weak.upgrade().is_some());
        for weak in &self.dependents {
            if let Some(dependent) = weak.upgrade() {
                f(&mut dependent.write().unwrap());
            }
        }
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn materials(&self) -> &[MaterialEntry] {
        &self.materials
    }

    pub fn push_material(&mut self, entry: MaterialEntry) {
        self.materials.push(entry);
    }

    /// Material owning particle `i`, found by binary search over the
    /// ranges.
    pub fn material_of(&self, i: usize) -> &MaterialEntry {
        let slot = self
            .materials
            .partition_point(|entry| entry.range.end <= i);
        let entry = self
            .materials
            .get(slot)
            .unwrap_or_else(|| panic!("particle {} has no material", i));
        assert!(entry.range.contains(&i));
        entry
    }

    /// Debug validation of the storage invariants.
    pub fn check_consistency(&self) -> bool {
        let n = self.particle_count();
        for q in self.quantities.values() {
            if q.len() != n {
                return false;
            }
            for level in 0..q.order().levels() {
                let len = q.buffer(level).unwrap().len();
                if len != n && len != 0 {
                    return false;
                }
            }
        }
        let mut expected = 0;
        for entry in &self.materials {
            if entry.range.start != expected {
                return false;
            }
            expected = entry.range.end;
        }
        self.materials.is_empty() || expected == n
    }

    pub fn has_kind(&self, id: QuantityId, kind: ValueKind, order: OrderEnum) -> bool {
        self.quantities
            .get(&id)
            .map(|q| q.kind() == kind && q.order() >= order)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::floating_type_mod::FT;
    use crate::{vec4, V4};

    fn test_storage(n: usize) -> Storage {
        let mut storage = Storage::with_material(Material::null());
        let r: Vec<V4> = (0..n).map(|i| vec4(i as FT, 0., 0., 1.)).collect();
        storage.insert(QuantityId::Position, OrderEnum::Second, r);
        storage.insert_uniform::<FT>(QuantityId::Mass, OrderEnum::Zero, 2.);
        storage
    }

    #[test]
    fn insert_and_access() {
        let storage = test_storage(4);
        assert_eq!(storage.particle_count(), 4);
        assert_eq!(storage.get::<V4>(QuantityId::Position).len(), 4);
        assert_eq!(storage.get_dt::<V4>(QuantityId::Position).len(), 4);
        assert_eq!(storage.get_d2t::<V4>(QuantityId::Position).len(), 4);
        assert!(storage.check_consistency());
    }

    #[test]
    #[should_panic]
    fn type_mismatch_on_reinsert_panics() {
        let mut storage = test_storage(4);
        storage.insert_uniform::<V4>(QuantityId::Mass, OrderEnum::Zero, V4::zeros());
    }

    #[test]
    fn clone_preserves_size_and_ids() {
        let storage = test_storage(5);
        for flags in [
            CloneFlags::VALUES,
            CloneFlags::HIGHEST_DERIVATIVES,
            CloneFlags::ALL,
            CloneFlags::FIRST_DERIVATIVES | CloneFlags::SECOND_DERIVATIVES,
        ] {
            let cloned = storage.clone_selected(flags);
            assert_eq!(cloned.quantity_count(), storage.quantity_count());
            let ids_a: Vec<_> = storage.ids().collect();
            let ids_b: Vec<_> = cloned.ids().collect();
            assert_eq!(ids_a, ids_b);
        }
        let highest = storage.clone_selected(CloneFlags::HIGHEST_DERIVATIVES);
        assert_eq!(highest.get_d2t::<V4>(QuantityId::Position).len(), 5);
        assert!(highest.get::<V4>(QuantityId::Position).is_empty());
    }

    #[test]
    fn resize_after_partial_clone() {
        let storage = test_storage(5);
        let mut cloned = storage.clone_selected(CloneFlags::HIGHEST_DERIVATIVES);
        cloned.resize(8, ResizeFlag::KeepEmpty);
        assert!(cloned.get::<V4>(QuantityId::Position).is_empty());
        assert_eq!(cloned.get_d2t::<V4>(QuantityId::Position).len(), 8);

        let mut grown = storage.clone_selected(CloneFlags::HIGHEST_DERIVATIVES);
        grown.resize(8, ResizeFlag::GrowAll);
        assert_eq!(grown.get::<V4>(QuantityId::Position).len(), 8);
        assert!(grown.check_consistency());
    }

    #[test]
    fn merge_into_empty_is_identity() {
        let body = test_storage(3);
        let reference = test_storage(3);
        let mut empty = Storage::new();
        empty.merge(body);
        assert_eq!(empty.particle_count(), 3);
        assert_eq!(
            empty.get::<V4>(QuantityId::Position),
            reference.get::<V4>(QuantityId::Position)
        );
        assert_eq!(empty.material_count(), 1);
    }

    #[test]
    fn merge_fills_missing_quantities_with_zeros() {
        let mut a = test_storage(2);
        a.insert_uniform::<FT>(QuantityId::Density, OrderEnum::First, 100.);
        let b = test_storage(3);
        a.merge(b);
        assert_eq!(a.particle_count(), 5);
        assert_eq!(a.get::<FT>(QuantityId::Density), &[100., 100., 0., 0., 0.]);
        assert_eq!(a.material_count(), 2);
        assert_eq!(a.material_of(1).range, 0..2);
        assert_eq!(a.material_of(4).range, 2..5);
        assert!(a.check_consistency());
    }

    #[test]
    fn merge_extends_this_sides_extra_quantities() {
        let mut a = test_storage(2);
        a.insert_uniform::<FT>(QuantityId::Energy, OrderEnum::First, 7.);
        let mut b = test_storage(3);
        b.insert_uniform::<FT>(QuantityId::Density, OrderEnum::First, 100.);
        a.merge(b);
        assert_eq!(a.get::<FT>(QuantityId::Energy), &[7., 7., 0., 0., 0.]);
        assert_eq!(a.get::<FT>(QuantityId::Density), &[0., 0., 100., 100., 100.]);
        assert!(a.check_consistency());
    }

    #[test]
    fn remove_reranges_materials() {
        let mut a = test_storage(2);
        let b = test_storage(3);
        a.merge(b);
        // remove the whole first body and one particle of the second
        a.remove(&[0, 1, 3]);
        assert_eq!(a.particle_count(), 2);
        assert_eq!(a.material_count(), 1);
        assert_eq!(a.material_of(0).range, 0..2);
        let r = a.get::<V4>(QuantityId::Position);
        assert_eq!(r[0].x, 0.);
        assert_eq!(r[1].x, 2.);
        assert!(a.check_consistency());
    }

    #[test]
    fn init_zeroes_highest_derivatives_only() {
        let mut storage = test_storage(2);
        storage.get_dt_mut::<V4>(QuantityId::Position)[0] = vec4(1., 1., 1., 0.);
        storage.get_d2t_mut::<V4>(QuantityId::Position)[0] = vec4(2., 2., 2., 0.);
        storage.init();
        assert_eq!(storage.get_dt::<V4>(QuantityId::Position)[0], vec4(1., 1., 1., 0.));
        assert_eq!(storage.get_d2t::<V4>(QuantityId::Position)[0], V4::zeros());
    }

    #[test]
    fn swap_exchanges_selected_levels() {
        let mut a = test_storage(2);
        let mut b = test_storage(2);
        b.get_mut::<V4>(QuantityId::Position)[0] = vec4(9., 9., 9., 1.);
        b.get_d2t_mut::<V4>(QuantityId::Position)[0] = vec4(1., 0., 0., 0.);

        a.swap(&mut b, CloneFlags::HIGHEST_DERIVATIVES);
        // accelerations swapped, values untouched
        assert_eq!(a.get_d2t::<V4>(QuantityId::Position)[0], vec4(1., 0., 0., 0.));
        assert_eq!(b.get_d2t::<V4>(QuantityId::Position)[0], V4::zeros());
        assert_eq!(a.get::<V4>(QuantityId::Position)[0], vec4(0., 0., 0., 1.));
        assert_eq!(b.get::<V4>(QuantityId::Position)[0], vec4(9., 9., 9., 1.));
    }

    #[test]
    fn propagate_reaches_dependents() {
        use std::sync::{Arc, RwLock};
        let mut storage = test_storage(3);
        let shadow = Arc::new(RwLock::new(storage.clone_selected(CloneFlags::ALL)));
        storage.add_dependent(Arc::downgrade(&shadow));
        storage.propagate(|s| s.resize(6, ResizeFlag::GrowAll));
        assert_eq!(shadow.read().unwrap().particle_count(), 6);
    }
}
