//! Query：链式累积查询意图，终结方法触发编译与执行。
//!
//! 所有 setter 都是对选项快照的纯修改，不做任何 I/O；终结方法
//! （select/insert/update/delete 及其 `_sql` 形态）把快照一次性交给
//! SQL 编译器，然后委托会话管理器执行。编译会清空内部状态，复用同一
//! 个 `Query` 前必须重新配置。

use crate::bind::BindSet;
use crate::builder::SqlBuilder;
use crate::connection::Connection;
use crate::error::DbResult;
use crate::interpolate::format_datetime;
use crate::options::{
    CondValue, DataValue, FieldItem, JoinKind, JoinSpec, Limit, Logic, Operator, OrderItem,
    QueryOptions, TableRef, UnionItem, UnionKind, WherePart, WhereTree,
};
use crate::transport::Row;
use crate::value::BindValue;

impl Connection {
    /// 从一张表（可含内联别名与逗号分隔的多表）开始构造链式查询。
    pub fn table(&mut self, table: &str) -> Query<'_> {
        let mut query = Query::new(self);
        query.table(table);
        query
    }

    /// 以不含前缀的表名开始构造链式查询，前缀由配置补全。
    pub fn name(&mut self, name: &str) -> Query<'_> {
        let mut query = Query::new(self);
        query.name(name);
        query
    }
}

/// 嵌套 where 子组的构建器：以闭包形式收拢一棵子树。
#[derive(Debug, Default)]
pub struct WhereBuilder {
    tree: WhereTree,
}

impl WhereBuilder {
    /// 追加一个 AND 条件。无法识别的操作符写法会被静默忽略。
    pub fn where_cond(
        &mut self,
        field: &str,
        op: &str,
        value: impl Into<CondValue>,
    ) -> &mut Self {
        push_cond(&mut self.tree, Logic::And, field, op, value);
        self
    }

    /// 追加一个 OR 条件。
    pub fn where_or(&mut self, field: &str, op: &str, value: impl Into<CondValue>) -> &mut Self {
        push_cond(&mut self.tree, Logic::Or, field, op, value);
        self
    }

    pub fn where_raw(&mut self, raw: impl Into<String>) -> &mut Self {
        self.tree.push(Logic::And, WherePart::Raw(raw.into()));
        self
    }

    pub fn where_or_raw(&mut self, raw: impl Into<String>) -> &mut Self {
        self.tree.push(Logic::Or, WherePart::Raw(raw.into()));
        self
    }

    /// 再嵌套一层 AND 子组。
    pub fn where_group(&mut self, f: impl FnOnce(&mut WhereBuilder)) -> &mut Self {
        push_group(&mut self.tree, Logic::And, f);
        self
    }

    /// 再嵌套一层 OR 子组。
    pub fn where_or_group(&mut self, f: impl FnOnce(&mut WhereBuilder)) -> &mut Self {
        push_group(&mut self.tree, Logic::Or, f);
        self
    }

    pub(crate) fn into_tree(self) -> WhereTree {
        self.tree
    }
}

fn push_cond(
    tree: &mut WhereTree,
    logic: Logic,
    field: &str,
    op: &str,
    value: impl Into<CondValue>,
) {
    let Some(op) = Operator::parse(op) else {
        return;
    };
    tree.push(
        logic,
        WherePart::Cond {
            field: field.to_string(),
            op,
            value: value.into(),
        },
    );
}

fn push_group(tree: &mut WhereTree, logic: Logic, f: impl FnOnce(&mut WhereBuilder)) {
    let mut child = WhereBuilder::default();
    f(&mut child);
    let sub = child.into_tree();
    if !sub.is_empty() {
        tree.push(logic, WherePart::Group(sub));
    }
}

/// 链式查询构建器。
pub struct Query<'a> {
    connection: &'a mut Connection,
    options: QueryOptions,
    binds: BindSet,
    table_name: String,
}

impl<'a> Query<'a> {
    pub fn new(connection: &'a mut Connection) -> Self {
        Self {
            connection,
            options: QueryOptions::default(),
            binds: BindSet::new(),
            table_name: String::new(),
        }
    }

    /// 指定默认数据表名（不含前缀）。
    pub fn name(&mut self, name: &str) -> &mut Self {
        self.table_name = name.to_string();
        self
    }

    /// 指定当前操作的数据表。支持 `"user"`、`"user u"`、逗号分隔的
    /// 多表写法；含 `)` 的子查询文本原样透传。
    pub fn table(&mut self, table: &str) -> &mut Self {
        if table.contains(')') {
            self.options.tables.push(TableRef {
                name: table.to_string(),
                alias: None,
            });
            return self;
        }
        for item in table.split(',') {
            let table_ref = TableRef::parse(item);
            if let Some(alias) = &table_ref.alias {
                self.options.set_alias(table_ref.name.clone(), alias.clone());
            }
            self.options.tables.push(table_ref);
        }
        self
    }

    /// 给当前表（最近一次 `table`/`name` 指定的表）设置别名。
    pub fn alias(&mut self, alias: &str) -> &mut Self {
        let table = match self.options.tables.first() {
            Some(t) => t.name.clone(),
            None => self.resolve_table(),
        };
        self.options.set_alias(table, alias);
        self
    }

    /// 指定查询字段，逗号分隔；重复字段去重，先出现的生效。
    pub fn field(&mut self, fields: &str) -> &mut Self {
        for item in fields.split(',') {
            let item = item.trim();
            if !item.is_empty() {
                self.push_field(FieldItem::plain(item));
            }
        }
        self
    }

    /// 指定一个带别名的查询字段。
    pub fn field_as(&mut self, field: &str, alias: &str) -> &mut Self {
        self.push_field(FieldItem {
            name: field.to_string(),
            alias: Some(alias.to_string()),
        });
        self
    }

    /// 为一批字段统一加上表限定与别名前缀：`table.col AS aliascol`。
    pub fn field_prefixed(
        &mut self,
        table: &str,
        fields: &str,
        alias_prefix: &str,
    ) -> &mut Self {
        for item in fields.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            let alias = if alias_prefix.is_empty() {
                None
            } else {
                Some(format!("{alias_prefix}{item}"))
            };
            self.push_field(FieldItem {
                name: format!("{table}.{item}"),
                alias,
            });
        }
        self
    }

    /// 排除一批查询字段（编译时从已累积的字段里剔除）。
    pub fn field_except(&mut self, fields: &str) -> &mut Self {
        for item in fields.split(',') {
            let item = item.trim();
            if !item.is_empty() {
                self.options.field_excludes.push(item.to_string());
            }
        }
        self
    }

    fn push_field(&mut self, item: FieldItem) {
        if self.options.fields.iter().any(|f| f.name == item.name) {
            return;
        }
        self.options.fields.push(item);
    }

    /// INNER JOIN。
    pub fn join(&mut self, table: &str, condition: &str) -> &mut Self {
        self.join_type(table, condition, "INNER")
    }

    /// 指定类型的 JOIN（INNER/LEFT/RIGHT/FULL）。
    pub fn join_type(&mut self, table: &str, condition: &str, kind: &str) -> &mut Self {
        let mut table_ref = TableRef::parse(table);
        table_ref.name = self.prefixed_join_table(&table_ref.name);
        if let Some(alias) = &table_ref.alias {
            self.options.set_alias(table_ref.name.clone(), alias.clone());
        }
        self.options.joins.push(JoinSpec {
            table: table_ref,
            kind: JoinKind::parse(kind),
            on: vec![condition.to_string()],
        });
        self
    }

    /// 批量 JOIN：每项为 (表, 条件, 类型)。
    pub fn joins<I, T, C, K>(&mut self, items: I) -> &mut Self
    where
        I: IntoIterator<Item = (T, C, K)>,
        T: AsRef<str>,
        C: AsRef<str>,
        K: AsRef<str>,
    {
        for (table, condition, kind) in items {
            self.join_type(table.as_ref(), condition.as_ref(), kind.as_ref());
        }
        self
    }

    /// 不含 `.` 且未带前缀的 join 表名自动补全表前缀。
    fn prefixed_join_table(&self, table: &str) -> String {
        let prefix = &self.connection.config().prefix;
        if prefix.is_empty()
            || table.contains('.')
            || table.contains('(')
            || table.starts_with(prefix.as_str())
        {
            return table.to_string();
        }
        format!("{prefix}{table}")
    }

    /// 指定 AND 查询条件。无法识别的操作符写法会被静默忽略。
    pub fn where_cond(
        &mut self,
        field: &str,
        op: &str,
        value: impl Into<CondValue>,
    ) -> &mut Self {
        push_cond(&mut self.options.wheres, Logic::And, field, op, value);
        self
    }

    /// 指定 OR 查询条件。
    pub fn where_or(&mut self, field: &str, op: &str, value: impl Into<CondValue>) -> &mut Self {
        push_cond(&mut self.options.wheres, Logic::Or, field, op, value);
        self
    }

    /// 追加一段原样 AND 条件表达式。
    pub fn where_raw(&mut self, raw: impl Into<String>) -> &mut Self {
        self.options.wheres.push(Logic::And, WherePart::Raw(raw.into()));
        self
    }

    /// 追加一段原样 OR 条件表达式。
    pub fn where_or_raw(&mut self, raw: impl Into<String>) -> &mut Self {
        self.options.wheres.push(Logic::Or, WherePart::Raw(raw.into()));
        self
    }

    /// 以闭包构造一个 AND 嵌套子组：闭包拿到一个全新的子构建器，
    /// 产出的子树整体括号包裹后并入当前条件。
    pub fn where_group(&mut self, f: impl FnOnce(&mut WhereBuilder)) -> &mut Self {
        push_group(&mut self.options.wheres, Logic::And, f);
        self
    }

    /// 以闭包构造一个 OR 嵌套子组。
    pub fn where_or_group(&mut self, f: impl FnOnce(&mut WhereBuilder)) -> &mut Self {
        push_group(&mut self.options.wheres, Logic::Or, f);
        self
    }

    /// 去除指定逻辑组里针对某字段的查询条件。
    pub fn remove_where_field(&mut self, field: &str, logic: Logic) -> &mut Self {
        if let Some(group) = self
            .options
            .wheres
            .groups
            .iter_mut()
            .find(|g| g.logic == logic)
        {
            group
                .parts
                .retain(|p| !matches!(p, WherePart::Cond { field: f, .. } if f == field));
        }
        self.options.wheres.groups.retain(|g| !g.parts.is_empty());
        self
    }

    pub fn group(&mut self, group: &str) -> &mut Self {
        self.options.group = group.to_string();
        self
    }

    pub fn having(&mut self, having: &str) -> &mut Self {
        self.options.having = having.to_string();
        self
    }

    /// 指定排序，逗号分隔。`[rand]` 映射为后端的随机排序表达式，
    /// 含 `(` 的片段原样透传，其余按 `列 [asc|desc]` 解析。
    pub fn order(&mut self, order: &str) -> &mut Self {
        for item in order.split(',') {
            let item = item.trim();
            if !item.is_empty() {
                self.options.order.push(OrderItem::parse(item));
            }
        }
        self
    }

    pub fn order_asc(&mut self, field: &str) -> &mut Self {
        self.order(&format!("{field} asc"))
    }

    pub fn order_desc(&mut self, field: &str) -> &mut Self {
        self.order(&format!("{field} desc"))
    }

    /// 指定查询数量：`LIMIT n`。
    pub fn limit(&mut self, count: u64) -> &mut Self {
        self.options.limit = Some(Limit {
            offset: count,
            count: None,
        });
        self
    }

    /// 指定起始位置与数量：`LIMIT offset,count`。
    pub fn limit_range(&mut self, offset: u64, count: u64) -> &mut Self {
        self.options.limit = Some(Limit {
            offset,
            count: Some(count),
        });
        self
    }

    /// 以 `"offset,count"` 字符串形式指定 limit。
    pub fn limit_str(&mut self, limit: &str) -> &mut Self {
        match limit.split_once(',') {
            Some((offset, count)) => {
                let offset = offset.trim().parse().unwrap_or(0);
                let count = count.trim().parse().unwrap_or(0);
                self.limit_range(offset, count)
            }
            None => self.limit(limit.trim().parse().unwrap_or(0)),
        }
    }

    /// 追加一段 UNION 查询（子查询文本可用 [`build_sql`](Self::build_sql) 生成）。
    pub fn union(&mut self, sql: impl Into<String>) -> &mut Self {
        self.options.unions.push(UnionItem {
            kind: UnionKind::Distinct,
            sql: sql.into(),
        });
        self
    }

    /// 追加一段 UNION ALL 查询。
    pub fn union_all(&mut self, sql: impl Into<String>) -> &mut Self {
        self.options.unions.push(UnionItem {
            kind: UnionKind::All,
            sql: sql.into(),
        });
        self
    }

    /// 设置一个写入字段。
    pub fn data(&mut self, field: &str, value: impl Into<DataValue>) -> &mut Self {
        self.push_data(field.to_string(), value.into());
        self
    }

    /// 合并一批写入字段。
    pub fn data_map<I, K, V>(&mut self, data: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
    {
        for (field, value) in data {
            self.push_data(field.into(), value.into());
        }
        self
    }

    /// 以原样 SQL 表达式设置写入字段（不转义、不绑定）。
    pub fn exp(&mut self, field: &str, expr: impl Into<String>) -> &mut Self {
        self.push_data(field.to_string(), DataValue::Expr(expr.into()));
        self
    }

    fn push_data(&mut self, field: String, value: DataValue) {
        if let Some(slot) = self.options.data.iter_mut().find(|(k, _)| *k == field) {
            slot.1 = value;
            return;
        }
        self.options.data.push((field, value));
    }

    /// 查询加锁（`FOR UPDATE`）；加锁查询强制走主库。
    pub fn lock(&mut self, lock: bool) -> &mut Self {
        self.options.lock = lock;
        self.options.master = true;
        self
    }

    /// 指定强制索引，逗号分隔。
    pub fn force(&mut self, index: &str) -> &mut Self {
        self.options.force_index = index
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    /// 给语句附加注释。
    pub fn comment(&mut self, comment: &str) -> &mut Self {
        self.options.comment = comment.to_string();
        self
    }

    pub fn distinct(&mut self, distinct: bool) -> &mut Self {
        self.options.distinct = distinct;
        self
    }

    /// 后续读操作强制路由到主库。
    pub fn master(&mut self) -> &mut Self {
        self.options.master = true;
        self
    }

    /// USING 支持，用于多表删除。
    pub fn using(&mut self, using: &str) -> &mut Self {
        self.options.using = using.to_string();
        self
    }

    /// 预先注册一个命名绑定，之后可在条件值里以 `:key` 引用。
    pub fn bind(&mut self, key: impl Into<String>, value: impl Into<BindValue>) -> &mut Self {
        self.binds.bind(key, value);
        self
    }

    /// 该参数名是否已注册绑定。
    pub fn is_bind(&self, key: &str) -> bool {
        self.binds.contains(key)
    }

    /// 查询后不物化结果集，改用 [`fetch_row`](Self::fetch_row) 逐行取回。
    pub fn cursor(&mut self) -> &mut Self {
        self.options.cursor = true;
        self
    }

    /// cursor 模式下取回下一行。
    pub fn fetch_row(&mut self) -> DbResult<Option<Row>> {
        self.connection.fetch_row()
    }

    /// 当前（或指定名称）对应的完整表名。
    fn resolve_table(&self) -> String {
        let prefix = &self.connection.config().prefix;
        format!("{prefix}{}", self.table_name)
    }

    /// 分析表达式：补全缺省选项并取走快照，同时清空自身状态。
    fn take_options(&mut self) -> QueryOptions {
        let mut options = std::mem::take(&mut self.options);
        if options.tables.is_empty() && !self.table_name.is_empty() {
            options.tables.push(TableRef {
                name: self.resolve_table(),
                alias: None,
            });
        }
        self.table_name.clear();
        options
    }

    /// 查找，返回全部结果行。
    pub fn select(&mut self) -> DbResult<Vec<Row>> {
        let options = self.take_options();
        let (sql, binds) = self.compile(|b, o| b.select(o), &options);
        Ok(self
            .connection
            .query(&sql, binds, options.master, options.cursor)?
            .into_rows())
    }

    /// 查找的 dry-run：返回参数代回后的实际 SQL，不执行。
    pub fn select_sql(&mut self) -> String {
        let options = self.take_options();
        let (sql, binds) = self.compile(|b, o| b.select(o), &options);
        self.connection.get_real_sql(&sql, &binds)
    }

    /// 生成子查询文本：`( SELECT ... )`。
    pub fn build_sql(&mut self) -> String {
        format!("( {} )", self.select_sql())
    }

    /// 插入一行，返回影响行数；空负载不执行并返回 0。
    pub fn insert(&mut self) -> DbResult<u64> {
        self.do_insert(false)
    }

    /// REPLACE 方式插入。
    pub fn replace(&mut self) -> DbResult<u64> {
        self.do_insert(true)
    }

    fn do_insert(&mut self, replace: bool) -> DbResult<u64> {
        let mut options = self.take_options();
        self.apply_write_guards(&mut options, true)?;
        let (sql, binds) = self.compile(|b, o| b.insert(o, replace), &options);
        if sql.is_empty() {
            return Ok(0);
        }
        self.connection.execute(&sql, binds)
    }

    /// 插入一行并返回自增主键。
    pub fn insert_get_id(&mut self) -> DbResult<i64> {
        let affected = self.insert()?;
        if affected == 0 {
            return Ok(0);
        }
        self.connection.last_insert_id(None)
    }

    /// 插入的 dry-run。空负载返回空串。
    pub fn insert_sql(&mut self) -> String {
        let mut options = self.take_options();
        if self.apply_write_guards(&mut options, true).is_err() {
            return String::new();
        }
        let (sql, binds) = self.compile(|b, o| b.insert(o, false), &options);
        if sql.is_empty() {
            return String::new();
        }
        self.connection.get_real_sql(&sql, &binds)
    }

    /// 批量插入多行，返回影响行数。列序以第一行为准，缺列补 NULL。
    pub fn insert_all(&mut self, rows: Vec<Vec<(String, DataValue)>>) -> DbResult<u64> {
        let options = self.take_options();
        let (sql, binds) = self.compile(|b, o| b.insert_all(&rows, o), &options);
        if sql.is_empty() {
            return Ok(0);
        }
        self.connection.execute(&sql, binds)
    }

    /// 更新，返回影响行数；空负载不执行并返回 0。
    pub fn update(&mut self) -> DbResult<u64> {
        let mut options = self.take_options();
        self.apply_write_guards(&mut options, false)?;
        let (sql, binds) = self.compile(|b, o| b.update(o), &options);
        if sql.is_empty() {
            return Ok(0);
        }
        self.connection.execute(&sql, binds)
    }

    /// 更新的 dry-run。空负载返回空串。
    pub fn update_sql(&mut self) -> String {
        let mut options = self.take_options();
        if self.apply_write_guards(&mut options, false).is_err() {
            return String::new();
        }
        let (sql, binds) = self.compile(|b, o| b.update(o), &options);
        if sql.is_empty() {
            return String::new();
        }
        self.connection.get_real_sql(&sql, &binds)
    }

    /// 删除，返回影响行数。
    pub fn delete(&mut self) -> DbResult<u64> {
        let options = self.take_options();
        let (sql, binds) = self.compile(|b, o| b.delete(o), &options);
        self.connection.execute(&sql, binds)
    }

    /// 删除的 dry-run。
    pub fn delete_sql(&mut self) -> String {
        let options = self.take_options();
        let (sql, binds) = self.compile(|b, o| b.delete(o), &options);
        self.connection.get_real_sql(&sql, &binds)
    }

    /// 编译：选项快照 -> (SQL, 绑定集合)。绑定集合随之清空。
    fn compile(
        &mut self,
        f: impl FnOnce(&mut SqlBuilder<'_>, &QueryOptions) -> String,
        options: &QueryOptions,
    ) -> (String, Vec<(String, BindValue)>) {
        let datetime_format = self.connection.config().datetime_format.clone();
        let driver = self.connection.driver();
        let mut builder = SqlBuilder::new(driver, &mut self.binds, &datetime_format);
        let sql = f(&mut builder, options);
        (sql, self.binds.take())
    }

    /// 写入前置处理：`fields_strict` 按表结构过滤负载，
    /// `auto_timestamp` 补写时间字段。元数据不可得时都静默退化。
    fn apply_write_guards(&mut self, options: &mut QueryOptions, is_insert: bool) -> DbResult<()> {
        let config = self.connection.config();
        if options.data.is_empty() || (!config.fields_strict && !config.auto_timestamp) {
            return Ok(());
        }
        let strict = config.fields_strict;
        let auto_timestamp = config.auto_timestamp;
        let datetime_format = config.datetime_format.clone();

        let Some(table) = options.tables.first().map(|t| t.name.clone()) else {
            return Ok(());
        };
        let fields = match self.connection.table_fields(&table) {
            Ok(fields) => fields,
            Err(_) => return Ok(()),
        };
        if fields.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();

        if strict {
            options.data.retain(|(k, _)| names.contains(&k.as_str()));
        }

        if auto_timestamp {
            let now = format_datetime(&time::OffsetDateTime::now_utc(), &datetime_format);
            let mut stamps = vec!["update_time"];
            if is_insert {
                stamps.push("create_time");
            }
            for stamp in stamps {
                if names.contains(&stamp) && !options.data.iter().any(|(k, _)| k == stamp) {
                    options
                        .data
                        .push((stamp.to_string(), DataValue::Value(now.clone().into())));
                }
            }
        }
        Ok(())
    }
}
