//! 错误类型：配置、连接、执行、参数绑定四类。

use crate::value::BindValue;
use std::fmt;

/// 执行类错误的默认错误码。
pub const DEFAULT_ERROR_CODE: i32 = 10502;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// 配置错误（缺失/未知的后端类型等），构造期即失败，不重试。
    #[error("configuration error: {0}")]
    Config(String),

    /// 物理连接失败；除显式提供的备用配置外不做自动重试。
    #[error("connection error: {0}")]
    Connection(String),

    /// 后端拒绝了一条已编译的语句。携带可完整复现现场的调试信息。
    #[error("{0}")]
    Execution(Box<ExecutionDetail>),

    /// 某个占位符绑定失败。
    #[error("error occurred when binding parameter '{placeholder}': {message}")]
    Binding { placeholder: String, message: String },
}

/// 执行错误的完整现场：错误信息、错误码、可复现的调试 SQL、
/// 参数快照与解析后的连接配置摘要。
#[derive(Debug, Clone)]
pub struct ExecutionDetail {
    pub message: String,
    pub code: i32,
    pub debug_sql: String,
    pub binds: Vec<(String, BindValue)>,
    pub config: String,
}

impl fmt::Display for ExecutionDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (code {}) [SQL: {}]",
            self.message, self.code, self.debug_sql
        )
    }
}

impl DbError {
    /// 组装一个执行错误；`code` 为 `None` 时使用默认错误码。
    pub fn execution(
        message: impl Into<String>,
        code: Option<i32>,
        debug_sql: impl Into<String>,
        binds: Vec<(String, BindValue)>,
        config: impl Into<String>,
    ) -> Self {
        Self::Execution(Box::new(ExecutionDetail {
            message: message.into(),
            code: code.unwrap_or(DEFAULT_ERROR_CODE),
            debug_sql: debug_sql.into(),
            binds,
            config: config.into(),
        }))
    }

    /// 执行错误的现场数据（其余类别返回 `None`）。
    pub fn execution_detail(&self) -> Option<&ExecutionDetail> {
        match self {
            Self::Execution(d) => Some(d),
            _ => None,
        }
    }
}
