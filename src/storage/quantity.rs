use crate::floating_type_mod::FT;
use crate::math::{Interval, SymTensor, TracelessTensor};
use crate::{M3, V4};
use serde::{Deserialize, Serialize};

/// Identifiers of the per-particle quantities understood by the solvers.
/// The discriminants are stable and used as tags in binary dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum QuantityId {
    /// Positions, with smoothing length or particle radius in the H lane.
    Position = 0,
    Mass = 1,
    Pressure = 2,
    Density = 3,
    /// Specific internal energy.
    Energy = 4,
    SoundSpeed = 5,
    DeviatoricStress = 6,
    Damage = 7,
    VelocityDivergence = 8,
    VelocityGradient = 9,
    VelocityRotation = 10,
    /// Correction tensor of the velocity gradient.
    StrainRateCorrection = 11,
    XsphVelocities = 12,
    AngularVelocity = 13,
    MomentOfInertia = 14,
    /// Orientation of the body frame of a spinning hard sphere.
    LocalFrame = 15,
    AngularMomentum = 16,
    /// Index of the body the particle originally belonged to.
    Flag = 17,
    MaterialId = 18,
    NeighbourCount = 19,
}

pub struct QuantityMetadata {
    pub name: &'static str,
    pub label: &'static str,
    pub expected: ValueKind,
}

impl QuantityId {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<QuantityId> {
        use QuantityId::*;
        const ALL: [QuantityId; 20] = [
            Position,
            Mass,
            Pressure,
            Density,
            Energy,
            SoundSpeed,
            DeviatoricStress,
            Damage,
            VelocityDivergence,
            VelocityGradient,
            VelocityRotation,
            StrainRateCorrection,
            XsphVelocities,
            AngularVelocity,
            MomentOfInertia,
            LocalFrame,
            AngularMomentum,
            Flag,
            MaterialId,
            NeighbourCount,
        ];
        ALL.iter().copied().find(|id| id.code() == code)
    }

    pub fn metadata(self) -> QuantityMetadata {
        use QuantityId::*;
        let (name, label, expected) = match self {
            Position => ("Position", "r", ValueKind::Vector),
            Mass => ("Particle mass", "m", ValueKind::Scalar),
            Pressure => ("Pressure", "p", ValueKind::Scalar),
            Density => ("Density", "rho", ValueKind::Scalar),
            Energy => ("Specific energy", "u", ValueKind::Scalar),
            SoundSpeed => ("Sound speed", "cs", ValueKind::Scalar),
            DeviatoricStress => ("Deviatoric stress", "S", ValueKind::TracelessTensor),
            Damage => ("Damage", "D", ValueKind::Scalar),
            VelocityDivergence => ("Velocity divergence", "div v", ValueKind::Scalar),
            VelocityGradient => ("Velocity gradient", "grad v", ValueKind::SymmetricTensor),
            VelocityRotation => ("Velocity rotation", "rot v", ValueKind::Vector),
            StrainRateCorrection => ("Correction tensor", "C", ValueKind::SymmetricTensor),
            XsphVelocities => ("XSPH correction", "v_x", ValueKind::Vector),
            AngularVelocity => ("Angular velocity", "omega", ValueKind::Vector),
            MomentOfInertia => ("Moment of inertia", "I", ValueKind::SymmetricTensor),
            LocalFrame => ("Local frame", "E", ValueKind::Tensor),
            AngularMomentum => ("Angular momentum", "L", ValueKind::Vector),
            Flag => ("Flag", "flag", ValueKind::Index),
            MaterialId => ("Material id", "mat", ValueKind::Index),
            NeighbourCount => ("Neighbour count", "N_neigh", ValueKind::Index),
        };
        QuantityMetadata {
            name,
            label,
            expected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueKind {
    Scalar = 0,
    Vector = 1,
    SymmetricTensor = 2,
    TracelessTensor = 3,
    Tensor = 4,
    Index = 5,
}

impl ValueKind {
    pub fn from_tag(tag: u8) -> Option<ValueKind> {
        use ValueKind::*;
        [Scalar, Vector, SymmetricTensor, TracelessTensor, Tensor, Index]
            .into_iter()
            .find(|k| *k as u8 == tag)
    }
}

/// Number of time-derivative levels a quantity carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum OrderEnum {
    Zero = 0,
    First = 1,
    Second = 2,
}

impl OrderEnum {
    pub fn from_tag(tag: u8) -> Option<OrderEnum> {
        [OrderEnum::Zero, OrderEnum::First, OrderEnum::Second]
            .into_iter()
            .find(|o| *o as u8 == tag)
    }

    pub fn levels(self) -> usize {
        self as usize + 1
    }
}

/// Type-erased column of particle values.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    Scalar(Vec<FT>),
    Vector(Vec<V4>),
    SymTensor(Vec<SymTensor>),
    TracelessTensor(Vec<TracelessTensor>),
    Tensor(Vec<M3>),
    Index(Vec<u32>),
}

macro_rules! for_each_buffer {
    ($buffer:expr, $v:ident => $body:expr) => {
        match $buffer {
            Buffer::Scalar($v) => $body,
            Buffer::Vector($v) => $body,
            Buffer::SymTensor($v) => $body,
            Buffer::TracelessTensor($v) => $body,
            Buffer::Tensor($v) => $body,
            Buffer::Index($v) => $body,
        }
    };
}

macro_rules! for_each_buffer_pair {
    ($a:expr, $b:expr, $va:ident, $vb:ident => $body:expr) => {
        match ($a, $b) {
            (Buffer::Scalar($va), Buffer::Scalar($vb)) => $body,
            (Buffer::Vector($va), Buffer::Vector($vb)) => $body,
            (Buffer::SymTensor($va), Buffer::SymTensor($vb)) => $body,
            (Buffer::TracelessTensor($va), Buffer::TracelessTensor($vb)) => $body,
            (Buffer::Tensor($va), Buffer::Tensor($vb)) => $body,
            (Buffer::Index($va), Buffer::Index($vb)) => $body,
            (a, b) => panic!("buffer kind mismatch: {:?} vs {:?}", a.kind(), b.kind()),
        }
    };
}

impl Buffer {
    pub fn empty(kind: ValueKind) -> Buffer {
        match kind {
            ValueKind::Scalar => Buffer::Scalar(Vec::new()),
            ValueKind::Vector => Buffer::Vector(Vec::new()),
            ValueKind::SymmetricTensor => Buffer::SymTensor(Vec::new()),
            ValueKind::TracelessTensor => Buffer::TracelessTensor(Vec::new()),
            ValueKind::Tensor => Buffer::Tensor(Vec::new()),
            ValueKind::Index => Buffer::Index(Vec::new()),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Buffer::Scalar(_) => ValueKind::Scalar,
            Buffer::Vector(_) => ValueKind::Vector,
            Buffer::SymTensor(_) => ValueKind::SymmetricTensor,
            Buffer::TracelessTensor(_) => ValueKind::TracelessTensor,
            Buffer::Tensor(_) => ValueKind::Tensor,
            Buffer::Index(_) => ValueKind::Index,
        }
    }

    pub fn len(&self) -> usize {
        for_each_buffer!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grows or shrinks to `n` elements, filling new slots with zeros.
    pub fn resize(&mut self, n: usize) {
        match self {
            Buffer::Scalar(v) => v.resize(n, 0.),
            Buffer::Vector(v) => v.resize(n, V4::zeros()),
            Buffer::SymTensor(v) => v.resize(n, SymTensor::null()),
            Buffer::TracelessTensor(v) => v.resize(n, TracelessTensor::null()),
            Buffer::Tensor(v) => v.resize(n, M3::zeros()),
            Buffer::Index(v) => v.resize(n, 0),
        }
    }

    pub fn fill_zero(&mut self) {
        let n = self.len();
        for_each_buffer!(self, v => v.clear());
        self.resize(n);
    }

    /// Appends the contents of `other`; panics on kind mismatch.
    pub fn append(&mut self, other: &Buffer) {
        for_each_buffer_pair!(self, other, a, b => a.extend_from_slice(b))
    }

    pub fn append_zeros(&mut self, n: usize) {
        let len = self.len();
        self.resize(len + n);
    }

    /// Copies out the rows at the given indices, preserving their order.
    pub fn gather(&self, indices: &[usize]) -> Buffer {
        match self {
            Buffer::Scalar(v) => Buffer::Scalar(indices.iter().map(|&i| v[i]).collect()),
            Buffer::Vector(v) => Buffer::Vector(indices.iter().map(|&i| v[i]).collect()),
            Buffer::SymTensor(v) => Buffer::SymTensor(indices.iter().map(|&i| v[i]).collect()),
            Buffer::TracelessTensor(v) => {
                Buffer::TracelessTensor(indices.iter().map(|&i| v[i]).collect())
            }
            Buffer::Tensor(v) => Buffer::Tensor(indices.iter().map(|&i| v[i]).collect()),
            Buffer::Index(v) => Buffer::Index(indices.iter().map(|&i| v[i]).collect()),
        }
    }

    /// Removes the listed indices (strictly increasing), preserving the
    /// relative order of the remaining elements.
    pub fn remove_indices(&mut self, sorted: &[usize]) {
        debug_assert!(sorted.windows(2).all(|w| w[0] < w[1]));
        for_each_buffer!(self, v => {
            let mut removed = sorted.iter().peekable();
            let mut write = 0;
            for read in 0..v.len() {
                if removed.peek() == Some(&&read) {
                    removed.next();
                    continue;
                }
                v.swap(write, read);
                write += 1;
            }
            v.truncate(write);
        })
    }

    /// In-place `y = a * y + b * x`; panics on kind or length mismatch.
    pub fn blend(&mut self, x: &Buffer, a: FT, b: FT) {
        assert_eq!(self.len(), x.len());
        match (self, x) {
            (Buffer::Scalar(y), Buffer::Scalar(x)) => {
                for (y, x) in y.iter_mut().zip(x) {
                    *y = a * *y + b * x;
                }
            }
            (Buffer::Vector(y), Buffer::Vector(x)) => {
                for (y, x) in y.iter_mut().zip(x) {
                    *y = a * *y + b * x;
                }
            }
            (Buffer::SymTensor(y), Buffer::SymTensor(x)) => {
                for (y, x) in y.iter_mut().zip(x) {
                    *y = *y * a + *x * b;
                }
            }
            (Buffer::TracelessTensor(y), Buffer::TracelessTensor(x)) => {
                for (y, x) in y.iter_mut().zip(x) {
                    *y = *y * a + *x * b;
                }
            }
            (Buffer::Tensor(y), Buffer::Tensor(x)) => {
                for (y, x) in y.iter_mut().zip(x) {
                    *y = a * *y + b * x;
                }
            }
            (y, x) => panic!("buffer kind mismatch: {:?} vs {:?}", y.kind(), x.kind()),
        }
    }

    /// In-place `y += a * x`; panics on kind or length mismatch.
    pub fn axpy(&mut self, x: &Buffer, a: FT) {
        assert_eq!(self.len(), x.len());
        match (self, x) {
            (Buffer::Scalar(y), Buffer::Scalar(x)) => {
                for (y, x) in y.iter_mut().zip(x) {
                    *y += a * x;
                }
            }
            (Buffer::Vector(y), Buffer::Vector(x)) => {
                for (y, x) in y.iter_mut().zip(x) {
                    *y += a * x;
                }
            }
            (Buffer::SymTensor(y), Buffer::SymTensor(x)) => {
                for (y, x) in y.iter_mut().zip(x) {
                    *y += *x * a;
                }
            }
            (Buffer::TracelessTensor(y), Buffer::TracelessTensor(x)) => {
                for (y, x) in y.iter_mut().zip(x) {
                    *y += *x * a;
                }
            }
            (Buffer::Tensor(y), Buffer::Tensor(x)) => {
                for (y, x) in y.iter_mut().zip(x) {
                    *y += a * x;
                }
            }
            (y, x) => panic!("buffer kind mismatch: {:?} vs {:?}", y.kind(), x.kind()),
        }
    }
}

/// Statically typed access into [`Buffer`] variants. Mismatches are
/// programmer errors and panic.
pub trait QuantityValue: Clone + PartialEq + Send + Sync + 'static {
    const KIND: ValueKind;
    fn zero() -> Self;
    fn values(buffer: &Buffer) -> &Vec<Self>;
    fn values_mut(buffer: &mut Buffer) -> &mut Vec<Self>;
    fn into_buffer(values: Vec<Self>) -> Buffer;
}

macro_rules! impl_quantity_value {
    ($ty:ty, $variant:ident, $kind:expr, $zero:expr) => {
        impl QuantityValue for $ty {
            const KIND: ValueKind = $kind;

            fn zero() -> Self {
                $zero
            }

            fn values(buffer: &Buffer) -> &Vec<Self> {
                match buffer {
                    Buffer::$variant(v) => v,
                    other => panic!(
                        "quantity type mismatch: requested {:?}, stored {:?}",
                        $kind,
                        other.kind()
                    ),
                }
            }

            fn values_mut(buffer: &mut Buffer) -> &mut Vec<Self> {
                match buffer {
                    Buffer::$variant(v) => v,
                    other => panic!(
                        "quantity type mismatch: requested {:?}, stored {:?}",
                        $kind,
                        other.kind()
                    ),
                }
            }

            fn into_buffer(values: Vec<Self>) -> Buffer {
                Buffer::$variant(values)
            }
        }
    };
}

impl_quantity_value!(FT, Scalar, ValueKind::Scalar, 0.);
impl_quantity_value!(V4, Vector, ValueKind::Vector, V4::zeros());
impl_quantity_value!(SymTensor, SymTensor, ValueKind::SymmetricTensor, SymTensor::null());
impl_quantity_value!(
    TracelessTensor,
    TracelessTensor,
    ValueKind::TracelessTensor,
    TracelessTensor::null()
);
impl_quantity_value!(M3, Tensor, ValueKind::Tensor, M3::zeros());
impl_quantity_value!(u32, Index, ValueKind::Index, 0);

/// Selector of derivative levels for cloning and swapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloneFlags(u8);

impl CloneFlags {
    pub const VALUES: CloneFlags = CloneFlags(1);
    pub const FIRST_DERIVATIVES: CloneFlags = CloneFlags(2);
    pub const SECOND_DERIVATIVES: CloneFlags = CloneFlags(4);
    /// The derivative written by the solver; nothing for zero-order
    /// quantities.
    pub const HIGHEST_DERIVATIVES: CloneFlags = CloneFlags(8);
    pub const ALL: CloneFlags = CloneFlags(16);

    pub fn has_any(self, other: CloneFlags) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for CloneFlags {
    type Output = CloneFlags;
    fn bitor(self, rhs: CloneFlags) -> CloneFlags {
        CloneFlags(self.0 | rhs.0)
    }
}

/// One named column with up to two derivative levels. All present buffers
/// have the same length; buffers skipped by a partial clone are empty
/// rather than zero-filled.
#[derive(Debug, Clone)]
pub struct Quantity {
    order: OrderEnum,
    values: Buffer,
    dt: Option<Buffer>,
    d2t: Option<Buffer>,
    bounds: Interval,
    /// Minimal scale of the quantity used by the derivative time-step
    /// criterion; zero means no limit.
    dt_scale: FT,
}

impl Quantity {
    pub fn new<T: QuantityValue>(order: OrderEnum, values: Vec<T>) -> Self {
        let n = values.len();
        let kind = T::KIND;
        let mut q = Quantity {
            order,
            values: T::into_buffer(values),
            dt: None,
            d2t: None,
            bounds: Interval::unbounded(),
            dt_scale: 0.,
        };
        if order >= OrderEnum::First {
            let mut dt = Buffer::empty(kind);
            dt.resize(n);
            q.dt = Some(dt);
        }
        if order >= OrderEnum::Second {
            let mut d2t = Buffer::empty(kind);
            d2t.resize(n);
            q.d2t = Some(d2t);
        }
        q
    }

    pub fn uniform<T: QuantityValue>(order: OrderEnum, value: T, n: usize) -> Self {
        Quantity::new(order, vec![value; n])
    }

    /// Reassembles a quantity from raw level buffers, e.g. when reading a
    /// dump.
    pub fn from_buffers(order: OrderEnum, mut levels: Vec<Buffer>) -> Self {
        assert_eq!(levels.len(), order.levels());
        let values = levels.remove(0);
        let mut iter = levels.into_iter();
        let dt = iter.next();
        let d2t = iter.next();
        for level in [&dt, &d2t].into_iter().flatten() {
            assert_eq!(level.kind(), values.kind());
            assert!(level.len() == values.len() || level.is_empty());
        }
        Quantity {
            order,
            values,
            dt,
            d2t,
            bounds: Interval::unbounded(),
            dt_scale: 0.,
        }
    }

    pub fn kind(&self) -> ValueKind {
        self.values.kind()
    }

    pub fn order(&self) -> OrderEnum {
        self.order
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn bounds(&self) -> Interval {
        self.bounds
    }

    pub fn set_bounds(&mut self, bounds: Interval) {
        self.bounds = bounds;
    }

    pub fn dt_scale(&self) -> FT {
        self.dt_scale
    }

    pub fn set_dt_scale(&mut self, scale: FT) {
        self.dt_scale = scale;
    }

    /// Raises the order, adding zero-filled derivative buffers. Lowering is
    /// not allowed.
    pub fn extend_order(&mut self, order: OrderEnum) {
        assert!(order >= self.order, "cannot lower quantity order");
        let n = self.len();
        let kind = self.kind();
        if order >= OrderEnum::First && self.dt.is_none() {
            let mut dt = Buffer::empty(kind);
            dt.resize(n);
            self.dt = Some(dt);
        }
        if order >= OrderEnum::Second && self.d2t.is_none() {
            let mut d2t = Buffer::empty(kind);
            d2t.resize(n);
            self.d2t = Some(d2t);
        }
        self.order = order;
    }

    pub fn values<T: QuantityValue>(&self) -> &[T] {
        T::values(&self.values)
    }

    pub fn values_mut<T: QuantityValue>(&mut self) -> &mut Vec<T> {
        T::values_mut(&mut self.values)
    }

    pub fn dt<T: QuantityValue>(&self) -> &[T] {
        T::values(self.dt.as_ref().expect("quantity has no derivative"))
    }

    pub fn dt_mut<T: QuantityValue>(&mut self) -> &mut Vec<T> {
        T::values_mut(self.dt.as_mut().expect("quantity has no derivative"))
    }

    pub fn d2t<T: QuantityValue>(&self) -> &[T] {
        T::values(self.d2t.as_ref().expect("quantity has no 2nd derivative"))
    }

    pub fn d2t_mut<T: QuantityValue>(&mut self) -> &mut Vec<T> {
        T::values_mut(self.d2t.as_mut().expect("quantity has no 2nd derivative"))
    }

    /// Split mutable access to all levels of a second-order quantity.
    pub fn all_mut<T: QuantityValue>(&mut self) -> (&mut Vec<T>, &mut Vec<T>, &mut Vec<T>) {
        let dt = self.dt.as_mut().expect("quantity has no derivative");
        let d2t = self.d2t.as_mut().expect("quantity has no 2nd derivative");
        (
            T::values_mut(&mut self.values),
            T::values_mut(dt),
            T::values_mut(d2t),
        )
    }

    pub fn buffer(&self, level: usize) -> Option<&Buffer> {
        match level {
            0 => Some(&self.values),
            1 => self.dt.as_ref(),
            2 => self.d2t.as_ref(),
            _ => None,
        }
    }

    pub fn buffer_mut(&mut self, level: usize) -> Option<&mut Buffer> {
        match level {
            0 => Some(&mut self.values),
            1 => self.dt.as_mut(),
            2 => self.d2t.as_mut(),
            _ => None,
        }
    }

    /// Split mutable access to the raw buffers of all levels.
    pub fn levels_mut(&mut self) -> (&mut Buffer, Option<&mut Buffer>, Option<&mut Buffer>) {
        (&mut self.values, self.dt.as_mut(), self.d2t.as_mut())
    }

    pub fn highest_buffer_mut(&mut self) -> &mut Buffer {
        match self.order {
            OrderEnum::Zero => &mut self.values,
            OrderEnum::First => self.dt.as_mut().unwrap(),
            OrderEnum::Second => self.d2t.as_mut().unwrap(),
        }
    }

    /// Which levels a selector picks for this quantity's order.
    fn selected(&self, flags: CloneFlags, level: usize) -> bool {
        if flags.has_any(CloneFlags::ALL) {
            return true;
        }
        match level {
            0 => flags.has_any(CloneFlags::VALUES),
            1 => {
                flags.has_any(CloneFlags::FIRST_DERIVATIVES)
                    || (self.order == OrderEnum::First
                        && flags.has_any(CloneFlags::HIGHEST_DERIVATIVES))
            }
            2 => {
                flags.has_any(CloneFlags::SECOND_DERIVATIVES)
                    || flags.has_any(CloneFlags::HIGHEST_DERIVATIVES)
            }
            _ => false,
        }
    }

    /// Deep-copies the selected levels; unselected buffers are allocated
    /// empty.
    pub fn clone_selected(&self, flags: CloneFlags) -> Quantity {
        let kind = self.kind();
        let pick = |buffer: &Option<Buffer>, level: usize| -> Option<Buffer> {
            buffer.as_ref().map(|b| {
                if self.selected(flags, level) {
                    b.clone()
                } else {
                    Buffer::empty(kind)
                }
            })
        };
        Quantity {
            order: self.order,
            values: if self.selected(flags, 0) {
                self.values.clone()
            } else {
                Buffer::empty(kind)
            },
            dt: pick(&self.dt, 1),
            d2t: pick(&self.d2t, 2),
            bounds: self.bounds,
            dt_scale: self.dt_scale,
        }
    }

    /// Swaps the selected levels with another quantity of the same shape.
    pub fn swap_selected(&mut self, other: &mut Quantity, flags: CloneFlags) {
        assert_eq!(self.kind(), other.kind());
        assert_eq!(self.order, other.order);
        if self.selected(flags, 0) {
            std::mem::swap(&mut self.values, &mut other.values);
        }
        if self.selected(flags, 1) && self.dt.is_some() {
            std::mem::swap(&mut self.dt, &mut other.dt);
        }
        if self.selected(flags, 2) && self.d2t.is_some() {
            std::mem::swap(&mut self.d2t, &mut other.d2t);
        }
    }

    /// Zeroes the highest derivative; no-op for zero-order quantities.
    pub fn zero_highest(&mut self) {
        match self.order {
            OrderEnum::Zero => {}
            OrderEnum::First => self.dt.as_mut().unwrap().fill_zero(),
            OrderEnum::Second => self.d2t.as_mut().unwrap().fill_zero(),
        }
    }

    pub fn for_each_buffer(&mut self, mut f: impl FnMut(&mut Buffer)) {
        f(&mut self.values);
        if let Some(dt) = &mut self.dt {
            f(dt);
        }
        if let Some(d2t) = &mut self.d2t {
            f(d2t);
        }
    }
}
