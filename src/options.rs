//! 查询意图模型：链式 setter 累积、编译时一次性消费的选项快照。

use crate::value::BindValue;

/// 条件组的逻辑连接词。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Logic {
    And,
    Or,
}

impl Logic {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// 条件操作符。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    NotLike,
    Null,
    NotNull,
    In,
    NotIn,
}

impl Operator {
    /// 大小写不敏感地解析操作符写法。
    pub fn parse(op: &str) -> Option<Self> {
        match op.trim().to_ascii_uppercase().as_str() {
            "=" | "EQ" => Some(Self::Eq),
            "<>" | "!=" | "NEQ" => Some(Self::Ne),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            "LIKE" => Some(Self::Like),
            "NOT LIKE" => Some(Self::NotLike),
            "NULL" => Some(Self::Null),
            "NOT NULL" => Some(Self::NotNull),
            "IN" => Some(Self::In),
            "NOT IN" => Some(Self::NotIn),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::Null => "NULL",
            Self::NotNull => "NOT NULL",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Gt | Self::Ge | Self::Lt | Self::Le
        )
    }

    pub fn is_pattern(self) -> bool {
        matches!(self, Self::Like | Self::NotLike)
    }

    pub fn is_null_test(self) -> bool {
        matches!(self, Self::Null | Self::NotNull)
    }

    pub fn is_membership(self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}

/// 条件右值：无值（NULL 判断）、单值或集合。
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CondValue {
    #[default]
    None,
    One(BindValue),
    Many(Vec<BindValue>),
}

impl CondValue {
    pub fn one(v: impl Into<BindValue>) -> Self {
        Self::One(v.into())
    }

    pub fn many<T: Into<BindValue>>(vs: impl IntoIterator<Item = T>) -> Self {
        Self::Many(vs.into_iter().map(Into::into).collect())
    }
}

macro_rules! cond_value_from {
    ($($t:ty),+ $(,)?) => {$(
        impl From<$t> for CondValue {
            fn from(v: $t) -> Self {
                Self::One(v.into())
            }
        }
        impl From<Vec<$t>> for CondValue {
            fn from(v: Vec<$t>) -> Self {
                Self::many(v)
            }
        }
    )+};
}

cond_value_from!(bool, i32, i64, f64, String, &'static str);

impl From<BindValue> for CondValue {
    fn from(v: BindValue) -> Self {
        Self::One(v)
    }
}

impl From<Vec<BindValue>> for CondValue {
    fn from(v: Vec<BindValue>) -> Self {
        Self::Many(v)
    }
}

/// where 树的节点：三元组条件、原样片段或嵌套子组。
#[derive(Debug, Clone, PartialEq)]
pub enum WherePart {
    Cond {
        field: String,
        op: Operator,
        value: CondValue,
    },
    Raw(String),
    Group(WhereTree),
}

/// 同一逻辑词下的有序条件列表。
#[derive(Debug, Clone, PartialEq)]
pub struct WhereGroup {
    pub logic: Logic,
    pub parts: Vec<WherePart>,
}

/// 递归 where 树；逻辑组按首次出现的顺序排列。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WhereTree {
    pub groups: Vec<WhereGroup>,
}

impl WhereTree {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// 追加一个条件：同逻辑词的组已存在则并入，否则新开一组。
    pub fn push(&mut self, logic: Logic, part: WherePart) {
        if let Some(group) = self.groups.iter_mut().find(|g| g.logic == logic) {
            group.parts.push(part);
            return;
        }
        self.groups.push(WhereGroup {
            logic,
            parts: vec![part],
        });
    }
}

/// 表引用（名字 + 可选别名）。
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    /// 解析 `"name"` 或 `"name alias"` 的内联写法。
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.split_once(' ') {
            Some((name, alias)) if !raw.contains('(') => Self {
                name: name.to_string(),
                alias: Some(alias.trim().to_string()),
            },
            _ => Self {
                name: raw.to_string(),
                alias: None,
            },
        }
    }
}

/// JOIN 类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    pub fn parse(kind: &str) -> Self {
        match kind.trim().to_ascii_uppercase().as_str() {
            "LEFT" => Self::Left,
            "RIGHT" => Self::Right,
            "FULL" => Self::Full,
            _ => Self::Inner,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inner => "INNER",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::Full => "FULL",
        }
    }
}

/// 一条 JOIN 规格：表、类型与 ON 条件片段列表。
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    pub table: TableRef,
    pub kind: JoinKind,
    pub on: Vec<String>,
}

/// 排序方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// 排序项：`[rand]` 哨兵、含 `(` 的原样片段，或列 + 方向。
#[derive(Debug, Clone, PartialEq)]
pub enum OrderItem {
    Rand,
    Raw(String),
    Col {
        field: String,
        dir: Option<SortDir>,
    },
}

impl OrderItem {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw == "[rand]" {
            return Self::Rand;
        }
        if raw.contains('(') {
            return Self::Raw(raw.to_string());
        }
        match raw.rsplit_once(' ') {
            Some((field, dir)) if dir.eq_ignore_ascii_case("asc") => Self::Col {
                field: field.trim().to_string(),
                dir: Some(SortDir::Asc),
            },
            Some((field, dir)) if dir.eq_ignore_ascii_case("desc") => Self::Col {
                field: field.trim().to_string(),
                dir: Some(SortDir::Desc),
            },
            _ => Self::Col {
                field: raw.to_string(),
                dir: None,
            },
        }
    }
}

/// LIMIT 子句：起始偏移与可选数量。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub offset: u64,
    pub count: Option<u64>,
}

/// UNION 的去重形态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnionKind {
    Distinct,
    All,
}

impl UnionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Distinct => "UNION",
            Self::All => "UNION ALL",
        }
    }
}

/// 一段 UNION：类型 + 已渲染的查询文本。
#[derive(Debug, Clone, PartialEq)]
pub struct UnionItem {
    pub kind: UnionKind,
    pub sql: String,
}

/// 查询字段项。
#[derive(Debug, Clone, PartialEq)]
pub struct FieldItem {
    pub name: String,
    pub alias: Option<String>,
}

impl FieldItem {
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
        }
    }
}

/// 写入负载的值：NULL、标量、原样表达式，或被静默丢弃的集合。
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Null,
    Value(BindValue),
    /// 不转义、不绑定的 SQL 表达式。
    Expr(String),
    /// 非标量负载；编译时静默跳过（刻意保留的历史行为）。
    List(Vec<BindValue>),
}

macro_rules! data_value_from {
    ($($t:ty),+ $(,)?) => {$(
        impl From<$t> for DataValue {
            fn from(v: $t) -> Self {
                Self::Value(v.into())
            }
        }
    )+};
}

data_value_from!(bool, i32, i64, f64, String, &'static str, time::OffsetDateTime);

impl From<()> for DataValue {
    fn from(_: ()) -> Self {
        Self::Null
    }
}

impl From<BindValue> for DataValue {
    fn from(v: BindValue) -> Self {
        match v {
            BindValue::Null => Self::Null,
            other => Self::Value(other),
        }
    }
}

impl From<Vec<BindValue>> for DataValue {
    fn from(v: Vec<BindValue>) -> Self {
        Self::List(v)
    }
}

/// 一次编译消费的选项快照。编译后构建器内部状态清空，
/// 复用同一个 `Query` 前必须重新配置。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub tables: Vec<TableRef>,
    pub aliases: Vec<(String, String)>,
    pub fields: Vec<FieldItem>,
    pub field_excludes: Vec<String>,
    pub wheres: WhereTree,
    pub joins: Vec<JoinSpec>,
    pub group: String,
    pub having: String,
    pub order: Vec<OrderItem>,
    pub limit: Option<Limit>,
    pub unions: Vec<UnionItem>,
    pub lock: bool,
    pub distinct: bool,
    pub force_index: Vec<String>,
    pub comment: String,
    pub using: String,
    pub data: Vec<(String, DataValue)>,
    pub master: bool,
    pub cursor: bool,
}

impl QueryOptions {
    /// 显式别名映射优先，其次表引用内联别名。
    pub fn alias_of(&self, table: &str) -> Option<&str> {
        self.aliases
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, alias)| alias.as_str())
    }

    /// 记录一个别名；同名表的旧别名被覆盖。
    pub fn set_alias(&mut self, table: impl Into<String>, alias: impl Into<String>) {
        let table = table.into();
        let alias = alias.into();
        if let Some(slot) = self.aliases.iter_mut().find(|(name, _)| *name == table) {
            slot.1 = alias;
            return;
        }
        self.aliases.push((table, alias));
    }
}

#[cfg(test)]
mod tests {
    use super::{JoinKind, Logic, Operator, OrderItem, SortDir, TableRef, WherePart, WhereTree};
    use pretty_assertions::assert_eq;

    #[test]
    fn operator_parse_loose() {
        assert_eq!(Operator::parse("="), Some(Operator::Eq));
        assert_eq!(Operator::parse("not like"), Some(Operator::NotLike));
        assert_eq!(Operator::parse("Not In"), Some(Operator::NotIn));
        assert_eq!(Operator::parse("between"), None);
    }

    #[test]
    fn where_tree_groups_by_logic_in_first_seen_order() {
        let mut tree = WhereTree::default();
        tree.push(Logic::And, WherePart::Raw("a".into()));
        tree.push(Logic::Or, WherePart::Raw("b".into()));
        tree.push(Logic::And, WherePart::Raw("c".into()));
        assert_eq!(tree.groups.len(), 2);
        assert_eq!(tree.groups[0].logic, Logic::And);
        assert_eq!(tree.groups[0].parts.len(), 2);
        assert_eq!(tree.groups[1].logic, Logic::Or);
    }

    #[test]
    fn table_ref_inline_alias() {
        let t = TableRef::parse("user u");
        assert_eq!(t.name, "user");
        assert_eq!(t.alias.as_deref(), Some("u"));
        let sub = TableRef::parse("( SELECT 1 ) t");
        assert_eq!(sub.alias, None);
    }

    #[test]
    fn order_item_parse() {
        assert_eq!(OrderItem::parse("[rand]"), OrderItem::Rand);
        assert_eq!(
            OrderItem::parse("field(id,3,1,2)"),
            OrderItem::Raw("field(id,3,1,2)".into())
        );
        assert_eq!(
            OrderItem::parse("score desc"),
            OrderItem::Col {
                field: "score".into(),
                dir: Some(SortDir::Desc)
            }
        );
        assert_eq!(
            OrderItem::parse("id"),
            OrderItem::Col {
                field: "id".into(),
                dir: None
            }
        );
    }

    #[test]
    fn join_kind_parse_defaults_to_inner() {
        assert_eq!(JoinKind::parse("left"), JoinKind::Left);
        assert_eq!(JoinKind::parse("bogus"), JoinKind::Inner);
    }
}
