use crate::storage::{Buffer, OrderEnum, QuantityId, QuantityValue, Storage};

/// Whether a buffer is written by exactly one equation term or shared by
/// several terms adding into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRole {
    Unique,
    Shared,
}

/// Set of thread-local output buffers of a derivative sweep, keyed by
/// quantity id. Each worker slot owns one clone; at the end of the sweep
/// the slots are reduced by plain addition in ascending slot order, which
/// keeps the result bitwise reproducible, and then stored into the
/// storage.
#[derive(Clone)]
pub struct Accumulated {
    buffers: Vec<(QuantityId, OrderEnum, BufferRole, Buffer)>,
}

impl Accumulated {
    pub fn new() -> Self {
        Accumulated {
            buffers: Vec::new(),
        }
    }

    /// Registers an output buffer. A `Shared` registration of an already
    /// known buffer is a no-op; two `Unique` registrations of the same id
    /// are a programmer error.
    pub fn insert<T: QuantityValue>(&mut self, id: QuantityId, order: OrderEnum, role: BufferRole) {
        if let Some((_, existing_order, existing_role, buffer)) =
            self.buffers.iter().find(|(bid, ..)| *bid == id)
        {
            assert!(
                *existing_role == BufferRole::Shared && role == BufferRole::Shared,
                "buffer {:?} registered twice but not shared",
                id
            );
            assert_eq!(*existing_order, order);
            assert_eq!(buffer.kind(), T::KIND);
            return;
        }
        self.buffers
            .push((id, order, role, T::into_buffer(Vec::new())));
    }

    pub fn ids(&self) -> impl Iterator<Item = QuantityId> + '_ {
        self.buffers.iter().map(|(id, ..)| *id)
    }

    /// Grows all buffers to the particle count and zeroes them; called at
    /// the start of each sweep.
    pub fn initialize(&mut self, n: usize) {
        for (.., buffer) in &mut self.buffers {
            buffer.resize(n);
            buffer.fill_zero();
        }
    }

    pub fn get_mut<T: QuantityValue>(&mut self, id: QuantityId) -> &mut [T] {
        let (.., buffer) = self
            .buffers
            .iter_mut()
            .find(|(bid, ..)| *bid == id)
            .unwrap_or_else(|| panic!("accumulator buffer {:?} not registered", id));
        T::values_mut(buffer)
    }

    /// Adds another slot into this one; buffers must have been registered
    /// identically, which holds for clones of one prototype.
    pub fn merge_in(&mut self, other: &Accumulated) {
        assert_eq!(self.buffers.len(), other.buffers.len());
        for ((id_a, _, _, a), (id_b, _, _, b)) in
            self.buffers.iter_mut().zip(other.buffers.iter())
        {
            assert_eq!(id_a, id_b);
            a.axpy(b, 1.);
        }
    }

    /// Moves the results into the storage: derivative buffers add into the
    /// highest derivative of their quantity, zero-order buffers overwrite
    /// the value. Buffers of quantities not present in the storage belong
    /// to terms disabled for this material set and are dropped.
    pub fn store(&self, storage: &mut Storage) {
        for (id, order, _, buffer) in &self.buffers {
            if !storage.has(*id) {
                continue;
            }
            let quantity = storage.quantity_mut(*id);
            match order {
                OrderEnum::Zero => {
                    *quantity.buffer_mut(0).unwrap() = buffer.clone();
                }
                _ => {
                    quantity.highest_buffer_mut().axpy(buffer, 1.);
                }
            }
        }
    }
}

impl Default for Accumulated {
    fn default() -> Self {
        Accumulated::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::floating_type_mod::FT;

    #[test]
    fn shared_registration_is_idempotent() {
        let mut acc = Accumulated::new();
        acc.insert::<FT>(QuantityId::Density, OrderEnum::First, BufferRole::Shared);
        acc.insert::<FT>(QuantityId::Density, OrderEnum::First, BufferRole::Shared);
        assert_eq!(acc.ids().count(), 1);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_unique_registration_panics() {
        let mut acc = Accumulated::new();
        acc.insert::<FT>(QuantityId::Density, OrderEnum::First, BufferRole::Unique);
        acc.insert::<FT>(QuantityId::Density, OrderEnum::First, BufferRole::Unique);
    }

    #[test]
    fn merge_adds_elementwise() {
        let mut a = Accumulated::new();
        a.insert::<FT>(QuantityId::Density, OrderEnum::First, BufferRole::Unique);
        a.initialize(3);
        let mut b = a.clone();
        a.get_mut::<FT>(QuantityId::Density)[0] = 1.;
        b.get_mut::<FT>(QuantityId::Density)[0] = 2.;
        b.get_mut::<FT>(QuantityId::Density)[2] = 5.;
        a.merge_in(&b);
        assert_eq!(a.get_mut::<FT>(QuantityId::Density), &[3., 0., 5.]);
    }
}
