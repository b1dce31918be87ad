#[cfg(test)]
mod tests {
    use crate::bind::BindSet;
    use crate::builder::SqlBuilder;
    use crate::driver::Backend;
    use crate::options::{
        CondValue, DataValue, FieldItem, JoinKind, JoinSpec, Limit, Logic, Operator, OrderItem,
        QueryOptions, TableRef, UnionItem, UnionKind, WherePart, WhereTree,
    };
    use crate::value::BindValue;
    use pretty_assertions::assert_eq;

    const FMT: &str = "[year]-[month]-[day] [hour]:[minute]:[second]";

    fn opts(table: &str) -> QueryOptions {
        QueryOptions {
            tables: vec![TableRef::parse(table)],
            ..QueryOptions::default()
        }
    }

    fn cond(field: &str, op: Operator, value: impl Into<CondValue>) -> WherePart {
        WherePart::Cond {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }

    fn compile_select(options: &QueryOptions) -> (String, Vec<(String, BindValue)>) {
        let mut binds = BindSet::new();
        let sql = SqlBuilder::new(Backend::Mysql.driver(), &mut binds, FMT).select(options);
        (sql, binds.take())
    }

    #[test]
    fn select_defaults_to_star() {
        let (sql, binds) = compile_select(&opts("user"));
        assert_eq!(sql, "SELECT * FROM user");
        assert!(binds.is_empty());
    }

    #[test]
    fn where_and_then_or_has_no_leading_logic() {
        let mut options = opts("user");
        options.wheres.push(Logic::And, cond("a", Operator::Eq, 1_i64));
        options.wheres.push(Logic::Or, cond("b", Operator::Eq, 2_i64));

        let (sql, binds) = compile_select(&options);
        assert_eq!(sql, "SELECT * FROM user WHERE a = :where_a OR b = :where_b");
        assert_eq!(binds.len(), 2);
        assert_eq!(binds[0].1, BindValue::Int(1));
        assert_eq!(binds[1].1, BindValue::Int(2));
    }

    #[test]
    fn where_in_binds_one_placeholder_per_element() {
        let mut options = opts("t");
        options
            .wheres
            .push(Logic::And, cond("f", Operator::In, vec![1_i64, 2, 3]));

        let (sql, binds) = compile_select(&options);
        assert_eq!(binds.len(), 3);
        assert_eq!(sql.matches(":where_f").count(), 3);
        assert!(sql.contains("f IN ("));
        assert!(sql.ends_with(")"));
    }

    #[test]
    fn where_in_scalar_binds_single_placeholder() {
        let mut options = opts("t");
        options.wheres.push(Logic::And, cond("f", Operator::In, 5_i64));

        let (sql, binds) = compile_select(&options);
        assert_eq!(sql, "SELECT * FROM t WHERE f IN (:where_f)");
        assert_eq!(binds.len(), 1);
    }

    #[test]
    fn null_and_pattern_tests_skip_binding() {
        let mut options = opts("t");
        options
            .wheres
            .push(Logic::And, cond("status", Operator::NotNull, CondValue::None));
        options
            .wheres
            .push(Logic::And, cond("name", Operator::Like, "foo%"));

        let (sql, binds) = compile_select(&options);
        assert_eq!(
            sql,
            "SELECT * FROM t WHERE status IS NOT NULL AND name LIKE 'foo%'"
        );
        assert!(binds.is_empty());
    }

    #[test]
    fn nested_group_renders_parenthesized() {
        let mut sub = WhereTree::default();
        sub.push(Logic::And, cond("b", Operator::Eq, 2_i64));
        sub.push(Logic::Or, cond("c", Operator::Eq, 3_i64));

        let mut options = opts("t");
        options.wheres.push(Logic::And, cond("a", Operator::Eq, 1_i64));
        options.wheres.push(Logic::And, WherePart::Group(sub));

        let (sql, binds) = compile_select(&options);
        assert_eq!(
            sql,
            "SELECT * FROM t WHERE a = :where_a AND ( b = :where_b OR c = :where_c )"
        );
        assert_eq!(binds.len(), 3);
    }

    #[test]
    fn raw_condition_passes_through() {
        let mut options = opts("t");
        options
            .wheres
            .push(Logic::And, WherePart::Raw("a > b + 1".to_string()));

        let (sql, binds) = compile_select(&options);
        assert_eq!(sql, "SELECT * FROM t WHERE a > b + 1");
        assert!(binds.is_empty());
    }

    #[test]
    fn known_bind_reference_is_not_rebound() {
        let mut binds = BindSet::new();
        binds.bind("uid", 7_i64);
        let mut options = opts("t");
        options
            .wheres
            .push(Logic::And, cond("a", Operator::Eq, ":uid"));

        let sql = SqlBuilder::new(Backend::Mysql.driver(), &mut binds, FMT).select(&options);
        assert_eq!(sql, "SELECT * FROM t WHERE a = :uid");
        assert_eq!(binds.len(), 1);
    }

    #[test]
    fn identical_chains_compile_identically() {
        let build = || {
            let mut options = opts("user u");
            options
                .wheres
                .push(Logic::And, cond("u.id", Operator::Gt, 10_i64));
            options
                .wheres
                .push(Logic::And, cond("u.id", Operator::Lt, 99_i64));
            options.order.push(OrderItem::parse("u.id desc"));
            compile_select(&options)
        };
        let (sql_a, binds_a) = build();
        let (sql_b, binds_b) = build();
        assert_eq!(sql_a, sql_b);
        let keys_a: Vec<&String> = binds_a.iter().map(|(k, _)| k).collect();
        let keys_b: Vec<&String> = binds_b.iter().map(|(k, _)| k).collect();
        assert_eq!(keys_a, keys_b);
    }

    #[test]
    fn colliding_field_paths_get_unique_names() {
        let mut options = opts("t");
        options
            .wheres
            .push(Logic::And, cond("u.id", Operator::Eq, 1_i64));
        options
            .wheres
            .push(Logic::And, cond("u_id", Operator::Eq, 2_i64));

        let (_, binds) = compile_select(&options);
        assert_eq!(binds.len(), 2);
        assert_ne!(binds[0].0, binds[1].0);
    }

    #[test]
    fn field_list_alias_and_excludes() {
        let mut options = opts("user");
        options.fields = vec![
            FieldItem::plain("id"),
            FieldItem {
                name: "name".to_string(),
                alias: Some("n".to_string()),
            },
            FieldItem::plain("password"),
        ];
        options.field_excludes = vec!["password".to_string()];

        let (sql, _) = compile_select(&options);
        assert_eq!(sql, "SELECT id,name AS n FROM user");
    }

    #[test]
    fn table_alias_from_inline_and_map() {
        let mut options = opts("user u");
        options.tables.push(TableRef::parse("role"));
        options.set_alias("role", "r");

        let (sql, _) = compile_select(&options);
        assert_eq!(sql, "SELECT * FROM user u,role r");
    }

    #[test]
    fn join_condition_splits_on_first_equals() {
        let mut options = opts("user u");
        options.joins.push(JoinSpec {
            table: TableRef::parse("role r"),
            kind: JoinKind::Left,
            on: vec!["u.role_id = r.id".to_string()],
        });
        options.joins.push(JoinSpec {
            table: TableRef::parse("log"),
            kind: JoinKind::Inner,
            on: vec!["matched(u.id, log.uid)".to_string()],
        });

        let (sql, _) = compile_select(&options);
        assert_eq!(
            sql,
            "SELECT * FROM user u LEFT JOIN role r ON u.role_id=r.id INNER JOIN log ON matched(u.id, log.uid)"
        );
    }

    #[test]
    fn order_rand_sentinel_and_raw_fragment() {
        let mut options = opts("t");
        options.order = vec![
            OrderItem::parse("[rand]"),
            OrderItem::parse("field(status,2,1)"),
            OrderItem::parse("id desc"),
        ];

        let (sql, _) = compile_select(&options);
        assert_eq!(
            sql,
            "SELECT * FROM t ORDER BY rand(),field(status,2,1),id DESC"
        );

        let mut binds = BindSet::new();
        let sqlite = SqlBuilder::new(Backend::Sqlite.driver(), &mut binds, FMT).select(&options);
        assert!(sqlite.contains("ORDER BY random()"));
    }

    #[test]
    fn limit_one_and_two_part() {
        let mut options = opts("t");
        options.limit = Some(Limit {
            offset: 10,
            count: None,
        });
        assert_eq!(compile_select(&options).0, "SELECT * FROM t LIMIT 10");

        options.limit = Some(Limit {
            offset: 10,
            count: Some(20),
        });
        assert_eq!(compile_select(&options).0, "SELECT * FROM t LIMIT 10,20");
    }

    #[test]
    fn union_and_modifier_clauses() {
        let mut options = opts("a");
        options.distinct = true;
        options.lock = true;
        options.comment = "stats".to_string();
        options.force_index = vec!["idx_a".to_string()];
        options.unions = vec![
            UnionItem {
                kind: UnionKind::Distinct,
                sql: "SELECT * FROM b".to_string(),
            },
            UnionItem {
                kind: UnionKind::All,
                sql: "SELECT * FROM c".to_string(),
            },
        ];

        let (sql, _) = compile_select(&options);
        assert_eq!(
            sql,
            "SELECT DISTINCT * FROM a FORCE INDEX ( idx_a ) UNION SELECT * FROM b UNION ALL SELECT * FROM c FOR UPDATE /* stats */"
        );
    }

    #[test]
    fn group_and_having() {
        let mut options = opts("t");
        options.group = "kind".to_string();
        options.having = "COUNT(*) > 1".to_string();
        let (sql, _) = compile_select(&options);
        assert_eq!(sql, "SELECT * FROM t GROUP BY kind HAVING COUNT(*) > 1");
    }

    #[test]
    fn insert_binds_scalars_and_keeps_raw() {
        let mut options = opts("user");
        options.data = vec![
            ("name".to_string(), DataValue::Value("foo".into())),
            ("deleted_at".to_string(), DataValue::Null),
            ("count".to_string(), DataValue::Expr("count+1".to_string())),
        ];

        let mut binds = BindSet::new();
        let sql = SqlBuilder::new(Backend::Mysql.driver(), &mut binds, FMT).insert(&options, false);
        assert_eq!(
            sql,
            "INSERT INTO user (name,deleted_at,count) VALUES (:data_name,NULL,count+1)"
        );
        assert_eq!(binds.len(), 1);
        assert_eq!(binds.get("data_name"), Some(&BindValue::from("foo")));
    }

    #[test]
    fn replace_variant_changes_verb() {
        let mut options = opts("user");
        options.data = vec![("name".to_string(), DataValue::Value("foo".into()))];
        let mut binds = BindSet::new();
        let sql = SqlBuilder::new(Backend::Mysql.driver(), &mut binds, FMT).insert(&options, true);
        assert!(sql.starts_with("REPLACE INTO user"));
    }

    #[test]
    fn non_scalar_payload_is_silently_dropped() {
        let mut options = opts("user");
        options.data = vec![
            ("name".to_string(), DataValue::Value("foo".into())),
            (
                "tags".to_string(),
                DataValue::List(vec![BindValue::Int(1), BindValue::Int(2)]),
            ),
        ];

        let mut binds = BindSet::new();
        let sql = SqlBuilder::new(Backend::Mysql.driver(), &mut binds, FMT).insert(&options, false);
        assert_eq!(sql, "INSERT INTO user (name) VALUES (:data_name)");
    }

    #[test]
    fn insert_with_empty_or_invalid_payload_compiles_to_nothing() {
        let mut binds = BindSet::new();
        let empty = opts("user");
        assert_eq!(
            SqlBuilder::new(Backend::Mysql.driver(), &mut binds, FMT).insert(&empty, false),
            ""
        );

        let mut invalid = opts("user");
        invalid.data = vec![("tags".to_string(), DataValue::List(vec![BindValue::Int(1)]))];
        assert_eq!(
            SqlBuilder::new(Backend::Mysql.driver(), &mut binds, FMT).insert(&invalid, false),
            ""
        );
        assert!(binds.is_empty());
    }

    #[test]
    fn insert_all_aligns_columns_to_first_row() {
        let options = opts("user");
        let rows = vec![
            vec![
                ("name".to_string(), DataValue::Value("a".into())),
                ("age".to_string(), DataValue::Value(1_i64.into())),
            ],
            vec![("name".to_string(), DataValue::Value("b".into()))],
        ];

        let mut binds = BindSet::new();
        let sql =
            SqlBuilder::new(Backend::Mysql.driver(), &mut binds, FMT).insert_all(&rows, &options);
        assert!(sql.starts_with("INSERT INTO user (name,age) VALUES (:data_name,:data_age),("));
        assert!(sql.ends_with(",NULL)"));
        // 第二行的同名字段拿到的是不冲突的新占位符
        assert_eq!(binds.len(), 3);
    }

    #[test]
    fn update_renders_set_and_where() {
        let mut options = opts("user");
        options.data = vec![
            ("name".to_string(), DataValue::Value("foo".into())),
            (
                "login_count".to_string(),
                DataValue::Expr("login_count+1".to_string()),
            ),
        ];
        options.wheres.push(Logic::And, cond("id", Operator::Eq, 9_i64));

        let mut binds = BindSet::new();
        let sql = SqlBuilder::new(Backend::Mysql.driver(), &mut binds, FMT).update(&options);
        assert_eq!(
            sql,
            "UPDATE user SET name=:data_name,login_count=login_count+1 WHERE id = :where_id"
        );
    }

    #[test]
    fn update_with_empty_payload_compiles_to_nothing() {
        let mut options = opts("user");
        options.wheres.push(Logic::And, cond("id", Operator::Eq, 9_i64));
        let mut binds = BindSet::new();
        assert_eq!(
            SqlBuilder::new(Backend::Mysql.driver(), &mut binds, FMT).update(&options),
            ""
        );
    }

    #[test]
    fn delete_with_using_and_limit() {
        let mut options = opts("user");
        options.using = "archive".to_string();
        options.wheres.push(Logic::And, cond("id", Operator::Lt, 100_i64));
        options.limit = Some(Limit {
            offset: 10,
            count: None,
        });

        let mut binds = BindSet::new();
        let sql = SqlBuilder::new(Backend::Mysql.driver(), &mut binds, FMT).delete(&options);
        assert_eq!(
            sql,
            "DELETE FROM user USING archive WHERE id < :where_id LIMIT 10"
        );
    }
}
