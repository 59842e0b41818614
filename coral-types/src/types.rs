use core::fmt;

use crate::TypeIdx;

/// Value type of one operand slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValType {
    /// 32-bit integer.
    I32,
    /// 64-bit integer.
    I64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// 128-bit SIMD vector.
    V128,
    /// Reference type.
    Ref(RefType),
}

impl ValType {
    /// Untyped function reference, the `funcref` shorthand.
    pub const FUNC_REF: Self = ValType::Ref(RefType::nullable(HeapType::Func));

    /// External reference, the `externref` shorthand.
    pub const EXTERN_REF: Self = ValType::Ref(RefType::nullable(HeapType::Extern));

    /// Exception reference, the `exnref` shorthand.
    pub const EXN_REF: Self = ValType::Ref(RefType::nullable(HeapType::Exn));

    /// Whether a value of this type occupies the full 128-bit slot.
    pub const fn is_wide(&self) -> bool {
        matches!(self, ValType::V128)
    }

    /// Whether this is any reference type.
    pub const fn is_ref(&self) -> bool {
        matches!(self, ValType::Ref(_))
    }

    /// Number of 64-bit argument slots a value of this type occupies in the
    /// embedder argument/result arrays. V128 takes two (low, high).
    pub const fn arg_slots(&self) -> usize {
        match self {
            ValType::V128 => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValType::I32 => write!(f, "i32"),
            ValType::I64 => write!(f, "i64"),
            ValType::F32 => write!(f, "f32"),
            ValType::F64 => write!(f, "f64"),
            ValType::V128 => write!(f, "v128"),
            ValType::Ref(r) => write!(f, "{r}"),
        }
    }
}

/// Reference type: nullability plus the referenced heap type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RefType {
    /// Whether null is a member of the type.
    pub nullable: bool,
    /// The heap type referenced.
    pub heap: HeapType,
}

impl RefType {
    /// Nullable reference to the given heap type.
    pub const fn nullable(heap: HeapType) -> Self {
        Self {
            nullable: true,
            heap,
        }
    }

    /// Non-nullable reference to the given heap type.
    pub const fn non_nullable(heap: HeapType) -> Self {
        Self {
            nullable: false,
            heap,
        }
    }
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "(ref null {:?})", self.heap)
        } else {
            write!(f, "(ref {:?})", self.heap)
        }
    }
}

/// Heap type of a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HeapType {
    /// Any function.
    Func,
    /// Host value.
    Extern,
    /// Exception package.
    Exn,
    /// Top of the internal hierarchy.
    Any,
    /// Comparable internal values.
    Eq,
    /// 31-bit unboxed scalar.
    I31,
    /// Any struct.
    Struct,
    /// Any array.
    Array,
    /// Bottom of the internal hierarchy.
    None,
    /// Bottom of the function hierarchy.
    NoFunc,
    /// Bottom of the external hierarchy.
    NoExtern,
    /// Bottom of the exception hierarchy.
    NoExn,
    /// A concrete type from the module type section.
    Concrete(TypeIdx),
}

/// Storage type of a struct field or array element. Packed fields widen to
/// i32 on access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StorageType {
    /// Packed 8-bit field.
    I8,
    /// Packed 16-bit field.
    I16,
    /// Unpacked value.
    Val(ValType),
}

impl StorageType {
    /// The value type this storage widens to on access.
    pub const fn unpacked(&self) -> ValType {
        match self {
            StorageType::I8 | StorageType::I16 => ValType::I32,
            StorageType::Val(ty) => *ty,
        }
    }
}

/// A struct field or array element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldType {
    /// Storage representation.
    pub storage: StorageType,
    /// Whether the field is mutable.
    pub mutable: bool,
}

/// Function signature.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FuncType {
    /// Parameter types, in order.
    pub params: Vec<ValType>,
    /// Result types, in order.
    pub results: Vec<ValType>,
}

impl FuncType {
    /// New signature from parameter and result slices.
    pub fn new(params: impl Into<Vec<ValType>>, results: impl Into<Vec<ValType>>) -> Self {
        Self {
            params: params.into(),
            results: results.into(),
        }
    }

    /// Structural equality of the parameter and result type slices,
    /// element-wise. This is what `call_indirect` checks.
    pub fn matches(&self, other: &FuncType) -> bool {
        self.params == other.params && self.results == other.results
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ") -> (")?;
        for (i, r) in self.results.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{r}")?;
        }
        write!(f, ")")
    }
}

/// Size limits of a memory or table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Limits {
    /// Initial size, in pages or elements.
    pub min: u64,
    /// Optional maximum size, in pages or elements.
    pub max: Option<u64>,
}

impl Limits {
    /// New limits with an optional maximum.
    pub const fn new(min: u64, max: Option<u64>) -> Self {
        Self { min, max }
    }
}
