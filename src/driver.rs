//! 驱动能力层：按后端标签静态分发的方言能力。
//!
//! 核心从不在能力分发之外判断后端身份；新增一个后端只需实现一份
//! [`Driver`] 并在 [`Backend`] 注册表中挂上标签。

use crate::config::Config;
use crate::error::{DbError, DbResult};
use crate::transport::Row;
use crate::value::{BindType, BindValue};

/// 后端标签注册表。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Mysql,
    Postgres,
    Sqlite,
}

impl Backend {
    /// 配置里的类型标签 -> 后端；未知标签在构造期即失败。
    pub fn from_tag(tag: &str) -> DbResult<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "mysql" => Ok(Self::Mysql),
            "pgsql" | "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "" => Err(DbError::Config("undefined db type".to_string())),
            other => Err(DbError::Config(format!("unknown db type '{other}'"))),
        }
    }

    pub fn driver(self) -> &'static dyn Driver {
        match self {
            Self::Mysql => &MysqlDriver,
            Self::Postgres => &PostgresDriver,
            Self::Sqlite => &SqliteDriver,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Postgres => "pgsql",
            Self::Sqlite => "sqlite",
        }
    }
}

/// 表字段元数据。
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub type_name: String,
    pub primary: bool,
}

/// 字段类型名 -> 绑定类型标签。
pub(crate) fn bind_type_of(type_name: &str) -> BindType {
    let t = type_name.to_ascii_lowercase();
    const INT_MARKS: [&str; 8] = [
        "int", "double", "float", "decimal", "real", "numeric", "serial", "bit",
    ];
    if t.contains("bool") {
        BindType::Bool
    } else if INT_MARKS.iter().any(|m| t.contains(m)) {
        BindType::Int
    } else {
        BindType::Str
    }
}

/// 每个后端的方言能力。
pub trait Driver: Sync {
    fn backend(&self) -> Backend;

    /// 由单节点配置拼出连接 DSN（配置已有现成 DSN 时不会调用）。
    fn build_dsn(&self, config: &Config) -> String;

    /// 把字符串按该后端的字面量规则加引号转义。
    fn quote_str(&self, s: &str) -> String;

    /// `[rand]` 排序哨兵对应的随机排序表达式。
    fn random_order(&self) -> &'static str;

    /// 是否支持事务保存点。
    fn supports_savepoint(&self) -> bool {
        true
    }

    /// 取表字段元数据的查询语句。
    fn fields_sql(&self, table: &str) -> String;

    /// 把 `fields_sql` 的结果行解码为字段元数据。
    fn parse_fields(&self, rows: &[Row]) -> Vec<FieldInfo>;

    /// 字段类型名 -> 绑定类型标签。
    fn field_bind_type(&self, type_name: &str) -> BindType {
        bind_type_of(type_name)
    }

    /// 性能分析语句。
    fn explain_sql(&self, sql: &str) -> String {
        format!("EXPLAIN {sql}")
    }
}

fn quote_doubling(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

pub struct MysqlDriver;

impl Driver for MysqlDriver {
    fn backend(&self) -> Backend {
        Backend::Mysql
    }

    fn build_dsn(&self, config: &Config) -> String {
        let mut dsn = format!("mysql:host={}", config.hostname);
        if !config.hostport.is_empty() {
            dsn.push_str(&format!(";port={}", config.hostport));
        }
        dsn.push_str(&format!(";dbname={}", config.database));
        if !config.charset.is_empty() {
            dsn.push_str(&format!(";charset={}", config.charset));
        }
        dsn
    }

    fn quote_str(&self, s: &str) -> String {
        let mut out = String::with_capacity(s.len() + 2);
        out.push('\'');
        for c in s.chars() {
            match c {
                '\'' => out.push_str("\\'"),
                '\\' => out.push_str("\\\\"),
                _ => out.push(c),
            }
        }
        out.push('\'');
        out
    }

    fn random_order(&self) -> &'static str {
        "rand()"
    }

    fn fields_sql(&self, table: &str) -> String {
        format!("SHOW COLUMNS FROM `{table}`")
    }

    fn parse_fields(&self, rows: &[Row]) -> Vec<FieldInfo> {
        rows.iter()
            .filter_map(|row| {
                let name = row.get("Field")?.as_str()?.to_string();
                let type_name = row
                    .get("Type")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let primary = row
                    .get("Key")
                    .and_then(|v| v.as_str())
                    .is_some_and(|k| k.eq_ignore_ascii_case("pri"));
                Some(FieldInfo {
                    name,
                    type_name,
                    primary,
                })
            })
            .collect()
    }
}

pub struct PostgresDriver;

impl Driver for PostgresDriver {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    fn build_dsn(&self, config: &Config) -> String {
        let mut dsn = format!("pgsql:host={}", config.hostname);
        if !config.hostport.is_empty() {
            dsn.push_str(&format!(";port={}", config.hostport));
        }
        dsn.push_str(&format!(";dbname={}", config.database));
        dsn
    }

    fn quote_str(&self, s: &str) -> String {
        quote_doubling(s)
    }

    fn random_order(&self) -> &'static str {
        "random()"
    }

    fn fields_sql(&self, table: &str) -> String {
        format!(
            "SELECT a.attname AS field, t.typname AS type, \
             COALESCE(i.indisprimary, false) AS pk \
             FROM pg_attribute a \
             JOIN pg_type t ON a.atttypid = t.oid \
             LEFT JOIN pg_index i ON a.attrelid = i.indrelid \
             AND a.attnum = ANY(i.indkey) AND i.indisprimary \
             WHERE a.attrelid = '{table}'::regclass AND a.attnum > 0 \
             ORDER BY a.attnum"
        )
    }

    fn parse_fields(&self, rows: &[Row]) -> Vec<FieldInfo> {
        rows.iter()
            .filter_map(|row| {
                let name = row.get("field")?.as_str()?.to_string();
                let type_name = row
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let primary = matches!(row.get("pk"), Some(&BindValue::Bool(true)));
                Some(FieldInfo {
                    name,
                    type_name,
                    primary,
                })
            })
            .collect()
    }
}

pub struct SqliteDriver;

impl Driver for SqliteDriver {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn build_dsn(&self, config: &Config) -> String {
        format!("sqlite:{}", config.database)
    }

    fn quote_str(&self, s: &str) -> String {
        quote_doubling(s)
    }

    fn random_order(&self) -> &'static str {
        "random()"
    }

    fn fields_sql(&self, table: &str) -> String {
        format!("PRAGMA table_info('{table}')")
    }

    fn parse_fields(&self, rows: &[Row]) -> Vec<FieldInfo> {
        rows.iter()
            .filter_map(|row| {
                let name = row.get("name")?.as_str()?.to_string();
                let type_name = row
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let primary = row.get("pk").and_then(|v| v.as_int()).unwrap_or(0) > 0;
                Some(FieldInfo {
                    name,
                    type_name,
                    primary,
                })
            })
            .collect()
    }

    fn explain_sql(&self, sql: &str) -> String {
        format!("EXPLAIN QUERY PLAN {sql}")
    }
}
