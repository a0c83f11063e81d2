use std::fmt::Display;

use half::{bf16, f16};

/// Supported dtypes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum DType {
    /// 32-bit float (8e23m)
    #[default]
    F32,
    /// 16-bit float (5e10m)
    F16,
    /// 16-bit float (8e7m)
    Bf16,
    /// 32-bit integer
    Int,
    /// Boolean (stored as i8, 0 or 1)
    Bool,
}

impl Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl DType {
    pub fn sizeof(&self) -> usize {
        match self {
            DType::F32 | DType::Int => 4,
            DType::Bf16 | DType::F16 => 2,
            DType::Bool => 1,
        }
    }

    /// Type spelling in the generated device IR.
    pub fn ir(&self) -> &'static str {
        match self {
            DType::F32 => "float",
            DType::F16 => "half",
            DType::Bf16 => "bfloat",
            DType::Int => "i32",
            DType::Bool => "i8",
        }
    }

    /// One-char code used in kernel-name fields.
    pub fn code(&self) -> char {
        match self {
            DType::F32 => 'f',
            DType::F16 => 'h',
            DType::Bf16 => 'g',
            DType::Int => 'i',
            DType::Bool => 'b',
        }
    }

    /// Predicate results narrow (`trunc`) into these; everything else widens (`sitofp`).
    pub fn is_integral(&self) -> bool {
        matches!(self, DType::Int | DType::Bool)
    }
}

/// A literal embedded in the graph at construction time. Contributes a by-value
/// kernel parameter, never buffer traffic.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScalarValue {
    F32(f32),
    F16(f16),
    Bf16(bf16),
    Int(i32),
    Bool(bool),
}

impl ScalarValue {
    pub fn dtype(&self) -> DType {
        match self {
            ScalarValue::F32(_) => DType::F32,
            ScalarValue::F16(_) => DType::F16,
            ScalarValue::Bf16(_) => DType::Bf16,
            ScalarValue::Int(_) => DType::Int,
            ScalarValue::Bool(_) => DType::Bool,
        }
    }
}

impl Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarValue::F32(v) => write!(f, "{v:?}"),
            ScalarValue::F16(v) => write!(f, "{v}"),
            ScalarValue::Bf16(v) => write!(f, "{v}"),
            ScalarValue::Int(v) => write!(f, "{v}"),
            ScalarValue::Bool(v) => write!(f, "{}", *v as u8),
        }
    }
}

/// Single-argument device functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Recip,
    Abs,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Tanh,
    // Predicates: the device function returns an i32 truth value that must be
    // cast back to the node's declared output type.
    IsNan,
    IsInf,
    Not,
}

impl UnaryOp {
    /// Stable opcode for kernel-name fields.
    pub fn code(&self) -> u8 {
        match self {
            UnaryOp::Neg => 0x10,
            UnaryOp::Recip => 0x11,
            UnaryOp::Abs => 0x12,
            UnaryOp::Sqrt => 0x13,
            UnaryOp::Exp => 0x14,
            UnaryOp::Log => 0x15,
            UnaryOp::Sin => 0x16,
            UnaryOp::Cos => 0x17,
            UnaryOp::Tanh => 0x18,
            UnaryOp::IsNan => 0x19,
            UnaryOp::IsInf => 0x1a,
            UnaryOp::Not => 0x1b,
        }
    }

    /// Device function symbol; the declaration signature adds the operand type.
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "___neg",
            UnaryOp::Recip => "___recip",
            UnaryOp::Abs => "___abs",
            UnaryOp::Sqrt => "___sqrt",
            UnaryOp::Exp => "___exp",
            UnaryOp::Log => "___log",
            UnaryOp::Sin => "___sin",
            UnaryOp::Cos => "___cos",
            UnaryOp::Tanh => "___tanh",
            UnaryOp::IsNan => "___isnan",
            UnaryOp::IsInf => "___isinf",
            UnaryOp::Not => "___not",
        }
    }

    pub fn is_predicate(&self) -> bool {
        matches!(self, UnaryOp::IsNan | UnaryOp::IsInf | UnaryOp::Not)
    }
}

/// Two-argument device functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Pow,
    // Predicates, same cast rule as unary predicates.
    Eq,
    Lt,
    Gt,
    And,
    Or,
}

impl BinaryOp {
    pub fn code(&self) -> u8 {
        match self {
            BinaryOp::Add => 0x30,
            BinaryOp::Sub => 0x31,
            BinaryOp::Mul => 0x32,
            BinaryOp::Div => 0x33,
            BinaryOp::Min => 0x34,
            BinaryOp::Max => 0x35,
            BinaryOp::Pow => 0x36,
            BinaryOp::Eq => 0x37,
            BinaryOp::Lt => 0x38,
            BinaryOp::Gt => 0x39,
            BinaryOp::And => 0x3a,
            BinaryOp::Or => 0x3b,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "___add",
            BinaryOp::Sub => "___sub",
            BinaryOp::Mul => "___mul",
            BinaryOp::Div => "___div",
            BinaryOp::Min => "___min",
            BinaryOp::Max => "___max",
            BinaryOp::Pow => "___pow",
            BinaryOp::Eq => "___eq",
            BinaryOp::Lt => "___lt",
            BinaryOp::Gt => "___gt",
            BinaryOp::And => "___and",
            BinaryOp::Or => "___or",
        }
    }

    pub fn is_predicate(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Lt | BinaryOp::Gt | BinaryOp::And | BinaryOp::Or
        )
    }
}
