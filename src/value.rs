//! SQL 绑定参数值类型。

use std::borrow::Cow;
use std::fmt;

/// 绑定参数的线上类型标签（对应 PDO 的 PARAM_* 分类）。
///
/// 浮点与时间值在绑定层按字符串处理，与常见 PDO 驱动的默认行为一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindType {
    Str,
    Int,
    Bool,
    Null,
}

/// SQL 绑定参数值。
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Cow<'static, str>),
    DateTime(time::OffsetDateTime),
}

impl BindValue {
    /// 将 `Option<T>` 映射为 `BindValue`：`None => Null`，`Some(v) => v.into()`。
    pub fn from_option<T: Into<BindValue>>(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }

    /// 返回该值的类型标签。
    pub fn bind_type(&self) -> BindType {
        match self {
            Self::Null => BindType::Null,
            Self::Bool(_) => BindType::Bool,
            Self::Int(_) => BindType::Int,
            Self::Float(_) | Self::Str(_) | Self::DateTime(_) => BindType::Str,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for BindValue {
    /// 未加引号的字面形式，仅用于日志；SQL 字面量请走 `interpolate`。
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
            Self::DateTime(v) => write!(f, "{v}"),
        }
    }
}

impl From<()> for BindValue {
    fn from(_: ()) -> Self {
        Self::Null
    }
}

impl From<bool> for BindValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i8> for BindValue {
    fn from(v: i8) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i16> for BindValue {
    fn from(v: i16) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i32> for BindValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for BindValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u8> for BindValue {
    fn from(v: u8) -> Self {
        Self::Int(v as i64)
    }
}

impl From<u16> for BindValue {
    fn from(v: u16) -> Self {
        Self::Int(v as i64)
    }
}

impl From<u32> for BindValue {
    fn from(v: u32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f32> for BindValue {
    fn from(v: f32) -> Self {
        Self::Float(v as f64)
    }
}

impl From<f64> for BindValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for BindValue {
    fn from(v: String) -> Self {
        Self::Str(Cow::Owned(v))
    }
}

impl From<&'static str> for BindValue {
    fn from(v: &'static str) -> Self {
        Self::Str(Cow::Borrowed(v))
    }
}

impl From<time::OffsetDateTime> for BindValue {
    fn from(v: time::OffsetDateTime) -> Self {
        Self::DateTime(v)
    }
}
