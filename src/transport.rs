//! 物理传输层：连接、预处理语句与结果集的最小同步接口。
//!
//! 会话管理器只驱动这里的 trait 对象，不感知任何具体驱动；
//! 接入一个后端即提供一份 `Transport`/`Link`/`Statement` 实现。

use crate::bind::is_positional_key;
use crate::config::{Config, ResultKind};
use crate::value::BindValue;

pub type TransportResult<T> = Result<T, TransportError>;

/// 传输层错误。`lost_connection` 标记物理链路已断开
/// （如 server has gone away），供断线重连策略判定。
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub code: Option<i32>,
    pub lost_connection: bool,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            lost_connection: false,
        }
    }

    pub fn with_code(message: impl Into<String>, code: i32) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
            lost_connection: false,
        }
    }

    /// 链路丢失类错误。
    pub fn lost(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            lost_connection: true,
        }
    }
}

/// 占位符引用：命名 `:name`，或位置 `?`（位置从 1 起）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRef<'a> {
    Named(&'a str),
    Position(usize),
}

/// 数字键映射为位置占位符，其余映射为命名占位符。
pub fn param_ref(key: &str) -> ParamRef<'_> {
    if is_positional_key(key)
        && let Ok(i) = key.parse::<usize>()
    {
        return ParamRef::Position(i + 1);
    }
    ParamRef::Named(key)
}

/// 一行结果。`ResultKind::Num` 形态下列名为空，仅按序取值。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<BindValue>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<BindValue>) -> Self {
        Self { columns, values }
    }

    pub fn get(&self, name: &str) -> Option<&BindValue> {
        let i = self.columns.iter().position(|c| c == name)?;
        self.values.get(i)
    }

    pub fn at(&self, index: usize) -> Option<&BindValue> {
        self.values.get(index)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[BindValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// 查询输出：普通结果集，或存储过程产出的多个结果集。
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Rows(Vec<Row>),
    Sets(Vec<Vec<Row>>),
}

impl QueryOutput {
    /// 压平成单个行集合（多结果集按顺序拼接）。
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Self::Rows(rows) => rows,
            Self::Sets(sets) => sets.into_iter().flatten().collect(),
        }
    }

    pub fn into_sets(self) -> Vec<Vec<Row>> {
        match self {
            Self::Rows(rows) => vec![rows],
            Self::Sets(sets) => sets,
        }
    }
}

/// 预处理语句句柄。一个句柄只归属一个物理链接，
/// 被新语句替换前由会话管理器显式释放。
pub trait Statement {
    /// 以值方式绑定参数（普通语句）。
    fn bind_value(&mut self, param: ParamRef<'_>, value: &BindValue) -> TransportResult<()>;

    /// 以引用方式绑定参数（存储过程的输入输出参数）。
    fn bind_param(&mut self, param: ParamRef<'_>, value: &BindValue) -> TransportResult<()>;

    fn execute(&mut self) -> TransportResult<()>;

    /// 上次执行影响的行数。
    fn row_count(&self) -> u64;

    /// 取回当前结果集的全部行。
    fn fetch_all(&mut self, kind: ResultKind) -> TransportResult<Vec<Row>>;

    /// 取回下一行；结果耗尽返回 `None`。
    fn fetch_row(&mut self, kind: ResultKind) -> TransportResult<Option<Row>>;

    /// 推进到下一个结果集（存储过程）；没有更多结果集时返回 `false`。
    fn next_rowset(&mut self) -> TransportResult<bool>;
}

/// 一条物理链接。
pub trait Link {
    fn prepare(&mut self, sql: &str) -> TransportResult<Box<dyn Statement>>;

    /// 直接执行一条不带参数的指令（BEGIN/SAVEPOINT 等），返回影响行数。
    fn exec(&mut self, sql: &str) -> TransportResult<u64>;

    fn begin(&mut self) -> TransportResult<()>;

    fn commit(&mut self) -> TransportResult<()>;

    fn rollback(&mut self) -> TransportResult<()>;

    /// 最近插入行的自增 id（或指定序列的当前值）。
    fn last_insert_id(&mut self, sequence: Option<&str>) -> TransportResult<i64>;
}

/// 传输工厂：按单节点配置建立物理链接。
pub trait Transport {
    fn connect(&self, config: &Config) -> TransportResult<Box<dyn Link>>;
}
