//! Typed wrappers around simulator object handles.
//!
//! Raw GPI handles are opaque tokens; the factory [`sim_object`] wraps
//! each one, exactly once, in a typed object matching its GPI kind:
//! scopes become [`HierarchyObject`], scalar logic becomes
//! [`LogicObject`], packed vectors become [`LogicArrayObject`] and
//! unpacked arrays become [`ArrayObject`].
//!
//! All writes are routed through the deferred-write scheduler and carry a
//! write [`Action`]; `set_immediate` bypasses scheduling and applies the
//! value in place.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::gpi::{self, ObjectKind, RawHdl, SetAction};
use crate::types::{Logic, LogicArray, Range, ValueError};
use crate::write_scheduler::{self, WriteCall};
use crate::Result;

/// An error interacting with a simulation object handle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HandleError {
    /// The object is immutable, e.g. a Verilog parameter or VHDL constant.
    #[error("{path} is constant")]
    Constant { path: String },
    /// The object is not of the requested kind.
    #[error("{path} is a {found:?} object, not a {expected}")]
    Kind {
        path: String,
        expected: &'static str,
        found: ObjectKind,
    },
    /// No child object with the given name.
    #[error("{path} contains no object named {name}")]
    NotFound { path: String, name: String },
    /// No child object at the given index.
    #[error("{path} contains no object at index {index}")]
    IndexOutOfRange { path: String, index: i32 },
    /// The GPI kind has no object model in this crate.
    #[error("no object model for GPI kind {kind:?} (path={path})")]
    Unsupported { path: String, kind: ObjectKind },
}

/// A write action with increasing stickiness.
///
/// `Deposit` is the default and what plain values convert into. `Force`
/// makes the value sticky until a `Release`; `Freeze` forces the signal's
/// current value.
#[derive(Debug, Clone)]
pub enum Action<V> {
    Deposit(V),
    Force(V),
    Freeze,
    Release,
}

impl<V> Action<V> {
    /// A deposit of any value convertible into the target's value type.
    pub fn deposit(value: impl Into<V>) -> Action<V> {
        Action::Deposit(value.into())
    }

    /// A force of any value convertible into the target's value type.
    pub fn force(value: impl Into<V>) -> Action<V> {
        Action::Force(value.into())
    }
}

impl<V> From<V> for Action<V> {
    fn from(value: V) -> Action<V> {
        Action::Deposit(value)
    }
}

impl From<bool> for Action<Logic> {
    fn from(value: bool) -> Action<Logic> {
        Action::Deposit(Logic::from(value))
    }
}

/// A value assignable to a [`LogicArrayObject`].
#[derive(Debug, Clone)]
pub enum LogicArrayValue {
    Int(i64),
    Str(String),
    Array(LogicArray),
    Bit(Logic),
}

macro_rules! impl_logic_array_value_from {
    ($($ty:ty => $variant:ident ($conv:expr)),* $(,)?) => {$(
        impl From<$ty> for LogicArrayValue {
            fn from(value: $ty) -> LogicArrayValue {
                LogicArrayValue::$variant($conv(value))
            }
        }

        impl From<$ty> for Action<LogicArrayValue> {
            fn from(value: $ty) -> Action<LogicArrayValue> {
                Action::Deposit(value.into())
            }
        }
    )*};
}

impl_logic_array_value_from! {
    i64 => Int(|v| v),
    i32 => Int(|v: i32| v as i64),
    u32 => Int(|v: u32| v as i64),
    &str => Str(|v: &str| v.to_owned()),
    String => Str(|v| v),
    LogicArray => Array(|v| v),
    Logic => Bit(|v| v),
}

/// Identity of a simulation object, shared by every typed wrapper.
struct HandleBase {
    raw: RawHdl,
    path: String,
    name: String,
}

impl HandleBase {
    fn new(raw: RawHdl, path: Option<String>) -> Result<HandleBase> {
        let name = gpi::get_name_string(raw)?;
        let path = path.unwrap_or_else(|| name.clone());
        Ok(HandleBase { raw, path, name })
    }
}

/// Common identity surface of every value-having simulation object,
/// used e.g. by the edge triggers.
pub trait ValueObject {
    /// The raw GPI handle.
    fn raw(&self) -> RawHdl;
    /// The full hierarchical path of the object.
    fn path(&self) -> &str;
}

macro_rules! impl_handle_common {
    ($ty:ident) => {
        impl $ty {
            /// The name of the object.
            pub fn name(&self) -> &str {
                &self.inner.base.name
            }

            /// The full hierarchical path of the object.
            pub fn path(&self) -> &str {
                &self.inner.base.path
            }

            /// The raw GPI handle.
            pub fn raw(&self) -> RawHdl {
                self.inner.base.raw
            }

            /// The object's type as reported by the simulator.
            pub fn type_string(&self) -> Result<String> {
                gpi::get_type_string(self.inner.base.raw)
            }

            /// The name of the object's definition, where the simulator
            /// supports it.
            pub fn def_name(&self) -> Result<String> {
                gpi::get_definition_name(self.inner.base.raw)
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}({})", stringify!($ty), self.inner.base.path)
            }
        }
    };
}

macro_rules! impl_value_object {
    ($ty:ident) => {
        impl ValueObject for $ty {
            fn raw(&self) -> RawHdl {
                self.inner.base.raw
            }

            fn path(&self) -> &str {
                &self.inner.base.path
            }
        }

        impl $ty {
            /// Whether the simulator object is immutable.
            pub fn is_const(&self) -> Result<bool> {
                if let Some(cached) = self.inner.is_const.get() {
                    return Ok(cached);
                }
                let value = gpi::get_const(self.inner.base.raw)?;
                self.inner.is_const.set(Some(value));
                Ok(value)
            }

            fn reject_const(&self) -> Result<()> {
                if self.is_const()? {
                    Err(HandleError::Constant { path: self.path().to_owned() }.into())
                } else {
                    Ok(())
                }
            }
        }
    };
}

// ---------------------------------------------------------------------
// Hierarchy objects
// ---------------------------------------------------------------------

struct HierarchyInner {
    base: HandleBase,
    children: RefCell<HashMap<String, SimObject>>,
    discovered: Cell<bool>,
}

/// A scope: a module/entity instantiation, generate block, or package.
///
/// Children are discovered lazily and cached; the hierarchy cannot change
/// after elaboration so each lookup is performed at most once.
#[derive(Clone)]
pub struct HierarchyObject {
    inner: Rc<HierarchyInner>,
}

impl_handle_common!(HierarchyObject);

impl HierarchyObject {
    fn new(base: HandleBase) -> HierarchyObject {
        HierarchyObject {
            inner: Rc::new(HierarchyInner {
                base,
                children: RefCell::new(HashMap::new()),
                discovered: Cell::new(false),
            }),
        }
    }

    fn child_path(&self, name: &str) -> String {
        format!("{}.{}", self.path(), name)
    }

    /// Looks up a child object by name.
    pub fn get(&self, name: &str) -> Result<SimObject> {
        if let Some(child) = self.inner.children.borrow().get(name) {
            return Ok(child.clone());
        }

        let raw = gpi::get_handle_by_name(self.raw(), name)?.ok_or_else(|| HandleError::NotFound {
            path: self.path().to_owned(),
            name: name.to_owned(),
        })?;
        let child = sim_object(raw, Some(self.child_path(name)))?;
        self.inner.children.borrow_mut().insert(name.to_owned(), child.clone());
        Ok(child)
    }

    /// Looks up a child scope by name.
    pub fn hierarchy(&self, name: &str) -> Result<HierarchyObject> {
        self.get(name)?.as_hierarchy()
    }

    /// Looks up a scalar logic child by name.
    pub fn logic(&self, name: &str) -> Result<LogicObject> {
        self.get(name)?.as_logic()
    }

    /// Looks up a logic-array child by name.
    pub fn logic_array(&self, name: &str) -> Result<LogicArrayObject> {
        self.get(name)?.as_logic_array()
    }

    /// Looks up an unpacked-array child by name.
    pub fn array(&self, name: &str) -> Result<ArrayObject> {
        self.get(name)?.as_array()
    }

    /// All child objects, discovering them on first use. Children whose
    /// GPI kind has no object model are skipped.
    pub fn children(&self) -> Result<Vec<SimObject>> {
        self.discover_all()?;
        Ok(self.inner.children.borrow().values().cloned().collect())
    }

    fn discover_all(&self) -> Result<()> {
        if self.inner.discovered.get() {
            return Ok(());
        }
        for raw in gpi::iterate(self.raw())? {
            let name = gpi::get_name_string(raw)?;
            let name = name.rsplit('.').next().unwrap_or(&name).to_owned();
            if self.inner.children.borrow().contains_key(&name) {
                continue;
            }
            match sim_object(raw, Some(self.child_path(&name))) {
                Ok(child) => {
                    self.inner.children.borrow_mut().insert(name, child);
                }
                Err(err) => {
                    log::error!("unable to construct an object for {}: {}", name, err);
                }
            }
        }
        self.inner.discovered.set(true);
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Value objects
// ---------------------------------------------------------------------

struct ValueInner {
    base: HandleBase,
    is_const: Cell<Option<bool>>,
    num_elems: Cell<Option<usize>>,
}

impl ValueInner {
    fn new(base: HandleBase) -> ValueInner {
        ValueInner { base, is_const: Cell::new(None), num_elems: Cell::new(None) }
    }
}

enum WriteMode {
    Scheduled,
    Immediate,
}

#[derive(Clone)]
enum Encoded {
    Int(i64),
    BinStr(String),
}

fn dispatch_write(raw: RawHdl, path: &str, action: SetAction, encoded: Encoded, mode: WriteMode) -> Result<()> {
    match mode {
        WriteMode::Scheduled => {
            let call: WriteCall = Box::new(move || match encoded {
                Encoded::Int(v) => gpi::set_signal_val_int(raw, action, v),
                Encoded::BinStr(s) => gpi::set_signal_val_binstr(raw, action, &s),
            });
            write_scheduler::schedule_write(raw, path, call)
        }
        WriteMode::Immediate => {
            let action = if action == SetAction::Deposit { SetAction::NoDelay } else { action };
            match encoded {
                Encoded::Int(v) => gpi::set_signal_val_int(raw, action, v),
                Encoded::BinStr(s) => gpi::set_signal_val_binstr(raw, action, &s),
            }
        }
    }
}

/// A scalar logic simulation object (`logic`, `bit`, `std_logic`, ...).
#[derive(Clone)]
pub struct LogicObject {
    inner: Rc<ValueInner>,
}

impl_handle_common!(LogicObject);
impl_value_object!(LogicObject);

impl LogicObject {
    fn new(base: HandleBase) -> LogicObject {
        LogicObject { inner: Rc::new(ValueInner::new(base)) }
    }

    /// The current value of the object.
    pub fn value(&self) -> Result<Logic> {
        let binstr = gpi::get_signal_val_binstr(self.raw())?;
        let mut chars = binstr.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(Logic::try_from(c).map_err(crate::Error::from)?),
            _ => Err(ValueError::LengthMismatch { expected: 1, got: binstr.chars().count() }.into()),
        }
    }

    /// Assigns a value at the end of the current delta cycle.
    pub fn set(&self, value: impl Into<Action<Logic>>) -> Result<()> {
        self.write(value.into(), WriteMode::Scheduled)
    }

    /// Assigns a value immediately, bypassing the write scheduler.
    pub fn set_immediate(&self, value: impl Into<Action<Logic>>) -> Result<()> {
        self.write(value.into(), WriteMode::Immediate)
    }

    fn write(&self, action: Action<Logic>, mode: WriteMode) -> Result<()> {
        self.reject_const()?;
        let (action, value) = match action {
            Action::Deposit(v) => (SetAction::Deposit, v),
            Action::Force(v) => (SetAction::Force, v),
            Action::Freeze => (SetAction::Force, self.value()?),
            Action::Release => (SetAction::Release, self.value()?),
        };
        let encoded = Encoded::BinStr(value.to_char().to_string());
        dispatch_write(self.raw(), self.path(), action, encoded, mode)
    }
}

/// A logic-array simulation object: packed vectors and packed structures.
#[derive(Clone)]
pub struct LogicArrayObject {
    inner: Rc<ValueInner>,
}

impl_handle_common!(LogicArrayObject);
impl_value_object!(LogicArrayObject);

impl LogicArrayObject {
    fn new(base: HandleBase) -> LogicArrayObject {
        LogicArrayObject { inner: Rc::new(ValueInner::new(base)) }
    }

    /// The width of the object in bits.
    pub fn len(&self) -> Result<usize> {
        if let Some(cached) = self.inner.num_elems.get() {
            return Ok(cached);
        }
        let len = gpi::get_num_elems(self.raw())?;
        self.inner.num_elems.set(Some(len));
        Ok(len)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// The object's bounds as `n-1 downto 0`.
    pub fn range(&self) -> Result<Range> {
        Ok(Range::with_width(self.len()?))
    }

    /// The current value of the object.
    pub fn value(&self) -> Result<LogicArray> {
        let binstr = gpi::get_signal_val_binstr(self.raw())?;
        Ok(LogicArray::from_handle(&binstr).map_err(crate::Error::from)?)
    }

    /// Assigns a value at the end of the current delta cycle.
    ///
    /// Integers within `[-2^(n-1), 2^n - 1]` are accepted; anything wider
    /// than the object or outside that range fails.
    pub fn set(&self, value: impl Into<Action<LogicArrayValue>>) -> Result<()> {
        self.write(value.into(), WriteMode::Scheduled)
    }

    /// Assigns a value immediately, bypassing the write scheduler.
    pub fn set_immediate(&self, value: impl Into<Action<LogicArrayValue>>) -> Result<()> {
        self.write(value.into(), WriteMode::Immediate)
    }

    fn write(&self, action: Action<LogicArrayValue>, mode: WriteMode) -> Result<()> {
        self.reject_const()?;
        let (action, value) = match action {
            Action::Deposit(v) => (SetAction::Deposit, v),
            Action::Force(v) => (SetAction::Force, v),
            Action::Freeze => (SetAction::Force, LogicArrayValue::Array(self.value()?)),
            Action::Release => (SetAction::Release, LogicArrayValue::Array(self.value()?)),
        };
        let encoded = self.encode(value)?;
        dispatch_write(self.raw(), self.path(), action, encoded, mode)
    }

    // The write-encoding rules: small in-range integers go to the
    // simulator as integers, everything else as a canonical binary
    // string.
    fn encode(&self, value: LogicArrayValue) -> Result<Encoded> {
        let width = self.len()?;
        match value {
            LogicArrayValue::Int(v) => {
                let min = if width >= 64 { i128::from(i64::MIN) } else { -(1i128 << (width - 1)) };
                let max = if width >= 64 { i128::from(i64::MAX) } else { (1i128 << width) - 1 };
                let v128 = i128::from(v);
                if v128 < min || v128 > max {
                    return Err(ValueError::Overflow { value: v, width }.into());
                }
                if width <= 32 {
                    return Ok(Encoded::Int(v));
                }
                let range = Range::with_width(width);
                let rendered = if v < 0 {
                    LogicArray::from_signed(v, range)
                } else {
                    LogicArray::from_unsigned(v as u64, range)
                }
                .map_err(crate::Error::from)?;
                Ok(Encoded::BinStr(rendered.to_binstr()))
            }
            LogicArrayValue::Str(s) => {
                let range = Range::with_width(width);
                let checked = LogicArray::new(&s, Some(range)).map_err(crate::Error::from)?;
                Ok(Encoded::BinStr(checked.to_binstr()))
            }
            LogicArrayValue::Array(a) => {
                if a.len() != width {
                    return Err(
                        ValueError::LengthMismatch { expected: width, got: a.len() }.into()
                    );
                }
                Ok(Encoded::BinStr(a.to_binstr()))
            }
            LogicArrayValue::Bit(bit) => {
                if width != 1 {
                    return Err(ValueError::LengthMismatch { expected: width, got: 1 }.into());
                }
                Ok(Encoded::BinStr(bit.to_char().to_string()))
            }
        }
    }
}

// ---------------------------------------------------------------------
// Unpacked arrays
// ---------------------------------------------------------------------

struct ArrayInner {
    base: HandleBase,
    is_const: Cell<Option<bool>>,
    num_elems: Cell<Option<usize>>,
    children: RefCell<HashMap<i32, SimObject>>,
}

/// An unpacked-array simulation object.
///
/// Elements are value objects in their own right; writes go through the
/// element handles.
#[derive(Clone)]
pub struct ArrayObject {
    inner: Rc<ArrayInner>,
}

impl_handle_common!(ArrayObject);

impl ValueObject for ArrayObject {
    fn raw(&self) -> RawHdl {
        self.inner.base.raw
    }

    fn path(&self) -> &str {
        &self.inner.base.path
    }
}

impl ArrayObject {
    fn new(base: HandleBase) -> ArrayObject {
        ArrayObject {
            inner: Rc::new(ArrayInner {
                base,
                is_const: Cell::new(None),
                num_elems: Cell::new(None),
                children: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// The number of elements.
    pub fn len(&self) -> Result<usize> {
        if let Some(cached) = self.inner.num_elems.get() {
            return Ok(cached);
        }
        let len = gpi::get_num_elems(self.raw())?;
        self.inner.num_elems.set(Some(len));
        Ok(len)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// The element at `index`.
    pub fn index(&self, index: i32) -> Result<SimObject> {
        if let Some(child) = self.inner.children.borrow().get(&index) {
            return Ok(child.clone());
        }
        let raw = gpi::get_handle_by_index(self.raw(), index)?.ok_or_else(|| {
            HandleError::IndexOutOfRange { path: self.path().to_owned(), index }
        })?;
        let child = sim_object(raw, Some(format!("{}[{}]", self.path(), index)))?;
        self.inner.children.borrow_mut().insert(index, child.clone());
        Ok(child)
    }

    /// Whether the array is immutable.
    pub fn is_const(&self) -> Result<bool> {
        if let Some(cached) = self.inner.is_const.get() {
            return Ok(cached);
        }
        let value = gpi::get_const(self.raw())?;
        self.inner.is_const.set(Some(value));
        Ok(value)
    }
}

// ---------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------

/// Any simulation object produced by the factory.
#[derive(Clone, Debug)]
pub enum SimObject {
    Hierarchy(HierarchyObject),
    Logic(LogicObject),
    LogicArray(LogicArrayObject),
    Array(ArrayObject),
}

impl SimObject {
    /// The full hierarchical path of the object.
    pub fn path(&self) -> &str {
        match self {
            SimObject::Hierarchy(h) => h.path(),
            SimObject::Logic(l) => l.path(),
            SimObject::LogicArray(l) => l.path(),
            SimObject::Array(a) => a.path(),
        }
    }

    fn kind_error(&self, expected: &'static str) -> crate::Error {
        let found = match self {
            SimObject::Hierarchy(_) => ObjectKind::Module,
            SimObject::Logic(_) => ObjectKind::Logic,
            SimObject::LogicArray(_) => ObjectKind::LogicArray,
            SimObject::Array(_) => ObjectKind::NetArray,
        };
        HandleError::Kind { path: self.path().to_owned(), expected, found }.into()
    }

    /// The object as a scope.
    pub fn as_hierarchy(&self) -> Result<HierarchyObject> {
        match self {
            SimObject::Hierarchy(h) => Ok(h.clone()),
            other => Err(other.kind_error("hierarchy")),
        }
    }

    /// The object as a scalar logic object.
    pub fn as_logic(&self) -> Result<LogicObject> {
        match self {
            SimObject::Logic(l) => Ok(l.clone()),
            other => Err(other.kind_error("scalar logic")),
        }
    }

    /// The object as a logic array.
    pub fn as_logic_array(&self) -> Result<LogicArrayObject> {
        match self {
            SimObject::LogicArray(l) => Ok(l.clone()),
            other => Err(other.kind_error("logic array")),
        }
    }

    /// The object as an unpacked array.
    pub fn as_array(&self) -> Result<ArrayObject> {
        match self {
            SimObject::Array(a) => Ok(a.clone()),
            other => Err(other.kind_error("array")),
        }
    }
}

thread_local! {
    // One wrapper per raw handle, so handles obtained through different
    // discovery routes stay identical.
    static HANDLE_CACHE: RefCell<HashMap<RawHdl, SimObject>> = RefCell::new(HashMap::new());
}

/// Wraps a raw GPI handle in the typed object matching its kind.
///
/// Wrappers are interned per raw handle; repeated calls return the same
/// object.
pub fn sim_object(raw: RawHdl, path: Option<String>) -> Result<SimObject> {
    if let Some(cached) = HANDLE_CACHE.with(|c| c.borrow().get(&raw).cloned()) {
        return Ok(cached);
    }

    let kind = gpi::get_type(raw)?;
    let base = HandleBase::new(raw, path)?;
    let object = match kind {
        ObjectKind::Module => SimObject::Hierarchy(HierarchyObject::new(base)),
        ObjectKind::Logic => SimObject::Logic(LogicObject::new(base)),
        ObjectKind::LogicArray | ObjectKind::PackedStructure => {
            SimObject::LogicArray(LogicArrayObject::new(base))
        }
        ObjectKind::NetArray => SimObject::Array(ArrayObject::new(base)),
        other => {
            return Err(HandleError::Unsupported { path: base.path, kind: other }.into());
        }
    };
    HANDLE_CACHE.with(|c| c.borrow_mut().insert(raw, object.clone()));
    Ok(object)
}

/// Clears the per-thread handle cache. Used at teardown.
pub(crate) fn clear_handle_cache() {
    HANDLE_CACHE.with(|c| c.borrow_mut().clear());
}
