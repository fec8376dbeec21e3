use std::sync::Arc;

use rustql_where::executor::describe_scan;
use rustql_where::parser::{BinaryOp, Expr, SrcItem, SrcList};
use rustql_where::schema::{Column, Index, Table};
use rustql_where::{begin_plan, explain_rows, PlanRequest, PlannerConfig, ProgramBuilder, WhereFlags};

fn table(name: &str, columns: &[&str], indexes: &[(&str, &[i32])]) -> Arc<Table> {
    let mut t = Table::new(name);
    for c in columns {
        t.add_column(Column::new(*c, "INTEGER"));
    }
    for (ix, cols) in indexes {
        let mut index = Index::new(*ix, name);
        for c in cols.iter() {
            index = index.with_column(*c);
        }
        t.add_index(index);
    }
    Arc::new(t)
}

/// Plan `SELECT * FROM src WHERE w` and return the plan lines
fn explain_details(src: &SrcList, w: Option<&Expr>) -> Vec<String> {
    let star: Vec<Expr> = src
        .items
        .iter()
        .flat_map(|item| {
            (0..item.table.columns.len()).map(move |c| Expr::column(item.cursor, &item.table, c as i32))
        })
        .collect();
    let mut b = ProgramBuilder::with_cursors(src.len() as i32);
    let mut req = PlanRequest::new(src).with_result_set(&star);
    if let Some(w) = w {
        req = req.with_where(w);
    }
    let info = begin_plan(&mut b, &PlannerConfig::default(), req).unwrap();
    info.end(&mut b).unwrap();
    explain_rows(b.ops()).into_iter().map(|r| r.detail).collect()
}

#[test]
fn test_single_column_equality_uses_index() {
    let t1 = table("t1", &["a", "b"], &[("i1", &[0])]);
    let src = SrcList::new(vec![SrcItem::new(t1.clone(), 0)]);
    let w = Expr::eq(Expr::column(0, &t1, 0), Expr::int(5));

    let details = explain_details(&src, Some(&w));
    assert_eq!(details, vec!["SEARCH t1 USING INDEX i1 (a=?)".to_string()]);
}

#[test]
fn test_multi_column_index_partial_match() {
    let t1 = table("t1", &["a", "b", "c"], &[("i1", &[0, 1, 2])]);
    let src = SrcList::new(vec![SrcItem::new(t1.clone(), 0)]);
    let w = Expr::and(
        Expr::eq(Expr::column(0, &t1, 0), Expr::int(1)),
        Expr::eq(Expr::column(0, &t1, 1), Expr::int(2)),
    );

    let details = explain_details(&src, Some(&w));
    assert_eq!(details, vec!["SEARCH t1 USING COVERING INDEX i1 (a=? AND b=?)".to_string()]);
}

#[test]
fn test_range_after_equality() {
    let t1 = table("t1", &["a", "b", "c"], &[("i1", &[0, 1])]);
    let src = SrcList::new(vec![SrcItem::new(t1.clone(), 0)]);
    let w = Expr::and(
        Expr::eq(Expr::column(0, &t1, 0), Expr::int(1)),
        Expr::binary(BinaryOp::Lt, Expr::column(0, &t1, 1), Expr::int(9)),
    );

    let details = explain_details(&src, Some(&w));
    assert!(details[0].contains("USING INDEX i1 (a=? AND b<?)"));
}

#[test]
fn test_no_usable_index_scans() {
    let t1 = table("t1", &["a", "b"], &[("i1", &[0])]);
    let src = SrcList::new(vec![SrcItem::new(t1.clone(), 0)]);
    let w = Expr::eq(Expr::column(0, &t1, 1), Expr::int(5));

    let mut config = PlannerConfig::default();
    config.auto_index = false;
    let mut b = ProgramBuilder::with_cursors(1);
    let info = begin_plan(&mut b, &config, PlanRequest::new(&src).with_where(&w)).unwrap();
    let text = describe_scan(info.src(), &info.levels()[0], WhereFlags::empty());
    assert_eq!(text.as_deref(), Some("SCAN t1"));
    info.end(&mut b).unwrap();
}

#[test]
fn test_rowid_lookup_beats_index() {
    let t1 = table("t1", &["a", "b"], &[("i1", &[0])]);
    let src = SrcList::new(vec![SrcItem::new(t1.clone(), 0)]);
    let w = Expr::and(
        Expr::eq(Expr::rowid(0, &t1), Expr::int(5)),
        Expr::eq(Expr::column(0, &t1, 0), Expr::int(1)),
    );

    let details = explain_details(&src, Some(&w));
    assert_eq!(details, vec!["SEARCH t1 USING INTEGER PRIMARY KEY (rowid=?)".to_string()]);
}

#[test]
fn test_unique_index_preferred_for_equality() {
    let mut t = Table::new("t1");
    t.add_column(Column::new("a", "INTEGER"));
    t.add_column(Column::new("b", "INTEGER"));
    t.add_index(Index::new("i_a", "t1").with_column(0));
    t.add_index(Index::new("u_b", "t1").with_column(1).unique());
    let t1 = Arc::new(t);
    let src = SrcList::new(vec![SrcItem::new(t1.clone(), 0)]);
    let w = Expr::and(
        Expr::eq(Expr::column(0, &t1, 0), Expr::int(1)),
        Expr::eq(Expr::column(0, &t1, 1), Expr::int(2)),
    );

    let details = explain_details(&src, Some(&w));
    assert!(details[0].contains("u_b"));
}
