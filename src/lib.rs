//! halo-db：链式查询、SQL 编译与主从连接管理的同步数据库访问层。

pub mod bind;
pub mod builder;
#[cfg(test)]
mod builder_tests;
pub mod config;
pub mod connection;
pub mod db;
pub mod driver;
pub mod error;
pub mod interpolate;
pub mod options;
pub mod query;
mod string_builder;
#[cfg(test)]
pub(crate) mod test_transport;
pub mod transport;
pub mod value;

pub use crate::bind::BindSet;
pub use crate::builder::SqlBuilder;
pub use crate::config::{Config, Deploy, ResultKind};
pub use crate::connection::{Connection, Metrics};
pub use crate::db::Db;
pub use crate::driver::{Backend, Driver, FieldInfo, MysqlDriver, PostgresDriver, SqliteDriver};
pub use crate::error::{DEFAULT_ERROR_CODE, DbError, DbResult, ExecutionDetail};
pub use crate::interpolate::real_sql;
pub use crate::options::{
    CondValue, DataValue, FieldItem, JoinKind, JoinSpec, Limit, Logic, Operator, OrderItem,
    QueryOptions, SortDir, TableRef, UnionItem, UnionKind, WhereGroup, WherePart, WhereTree,
};
pub use crate::query::{Query, WhereBuilder};
pub use crate::transport::{
    Link, ParamRef, QueryOutput, Row, Statement, Transport, TransportError, TransportResult,
    param_ref,
};
pub use crate::value::{BindType, BindValue};
