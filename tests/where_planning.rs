use std::sync::Arc;

use rustql_where::executor::{TermFlags, WsFlags};
use rustql_where::parser::{BinaryOp, Expr, JoinFlags, SrcItem, SrcList};
use rustql_where::schema::{Column, Index, Table};
use rustql_where::vdbe::Opcode;
use rustql_where::{
    begin_plan, explain_rows, render_plan, PlanRequest, PlannerConfig, ProgramBuilder, WhereFlags,
};

fn table(name: &str, rows: u64, indexes: &[(&str, &[i32], bool)]) -> Arc<Table> {
    let mut t = Table::new(name).with_row_estimate(rows);
    t.add_column(Column::new("a", "INTEGER"));
    t.add_column(Column::new("b", "INTEGER"));
    t.add_column(Column::new("c", "TEXT"));
    for (ix, cols, unique) in indexes {
        let mut index = Index::new(*ix, name);
        for c in cols.iter() {
            index = index.with_column(*c);
        }
        if *unique {
            index = index.unique();
        }
        t.add_index(index);
    }
    Arc::new(t)
}

fn star(src: &SrcList) -> Vec<Expr> {
    src.items
        .iter()
        .flat_map(|item| (0..3).map(move |c| Expr::column(item.cursor, &item.table, c)))
        .collect()
}

fn opcodes(b: &ProgramBuilder) -> Vec<Opcode> {
    b.ops().iter().map(|op| op.opcode).collect()
}

#[test]
fn test_equality_and_range_with_residual() {
    let t = table("t", 1_000_000, &[("ix", &[0, 1], false)]);
    let src = SrcList::new(vec![SrcItem::new(t.clone(), 0)]);
    let rs = star(&src);
    let w = Expr::conjunction(vec![
        Expr::eq(Expr::column(0, &t, 0), Expr::int(1)),
        Expr::binary(BinaryOp::Gt, Expr::column(0, &t, 1), Expr::int(2)),
        Expr::eq(Expr::column(0, &t, 2), Expr::string("z")),
    ])
    .unwrap();

    let mut b = ProgramBuilder::with_cursors(1);
    let req = PlanRequest::new(&src).with_where(&w).with_result_set(&rs);
    let info = begin_plan(&mut b, &PlannerConfig::default(), req).unwrap();
    let lp = &info.levels()[0].lp;
    assert!(lp.flags.contains(WsFlags::INDEXED | WsFlags::COLUMN_EQ | WsFlags::BTM_LIMIT));
    assert_eq!(lp.n_eq(), 1);
    assert!(info
        .clause()
        .terms
        .iter()
        .all(|t| t.flags.intersects(TermFlags::VIRTUAL | TermFlags::CODED)));
    info.end(&mut b).unwrap();

    let rows = explain_rows(b.ops());
    assert_eq!(rows[0].detail, "SEARCH t USING INDEX ix (a=? AND b>?)");
    let program = b.finish().unwrap();
    assert!(!program.ops.is_empty());
}

#[test]
fn test_in_on_small_table_without_index_scans() {
    let t = table("t", 10, &[]);
    let src = SrcList::new(vec![SrcItem::new(t.clone(), 0)]);
    let w = Expr::in_list(
        Expr::column(0, &t, 0),
        vec![Expr::int(1), Expr::int(2), Expr::int(3)],
    );
    let mut config = PlannerConfig::default();
    config.auto_index = false;

    let mut b = ProgramBuilder::with_cursors(1);
    let info = begin_plan(&mut b, &config, PlanRequest::new(&src).with_where(&w)).unwrap();
    assert!(!info.levels()[0].lp.flags.contains(WsFlags::INDEXED));
    info.end(&mut b).unwrap();
    assert_eq!(explain_rows(b.ops())[0].detail, "SCAN t");
}

#[test]
fn test_in_on_unique_index_searches() {
    let t = table("t", 1_000_000, &[("tu", &[0], true)]);
    let src = SrcList::new(vec![SrcItem::new(t.clone(), 0)]);
    let rs = star(&src);
    let w = Expr::in_list(
        Expr::column(0, &t, 0),
        vec![Expr::int(1), Expr::int(2), Expr::int(3)],
    );

    let mut b = ProgramBuilder::with_cursors(1);
    let req = PlanRequest::new(&src).with_where(&w).with_result_set(&rs);
    let info = begin_plan(&mut b, &PlannerConfig::default(), req).unwrap();
    let level = &info.levels()[0];
    assert!(level.lp.flags.contains(WsFlags::COLUMN_IN));
    assert_eq!(level.in_loops.len(), 1);
    info.end(&mut b).unwrap();
    assert_eq!(explain_rows(b.ops())[0].detail, "SEARCH t USING INDEX tu (a=?)");
    assert!(opcodes(&b).contains(&Opcode::OpenEphemeral));
}

#[test]
fn test_join_puts_indexed_table_inside() {
    let t1 = table("t1", 1_000, &[]);
    let t2 = table("t2", 1_000_000, &[("t2a", &[0], false)]);
    let src = SrcList::new(vec![SrcItem::new(t1.clone(), 0), SrcItem::new(t2.clone(), 1)]);
    let rs = star(&src);
    let w = Expr::eq(Expr::column(1, &t2, 0), Expr::column(0, &t1, 1));

    let mut b = ProgramBuilder::with_cursors(2);
    let req = PlanRequest::new(&src).with_where(&w).with_result_set(&rs);
    let info = begin_plan(&mut b, &PlannerConfig::default(), req).unwrap();
    let order: Vec<usize> = info.levels().iter().map(|l| l.from).collect();
    assert_eq!(order, vec![0, 1]);
    info.end(&mut b).unwrap();

    let details: Vec<String> = explain_rows(b.ops()).into_iter().map(|r| r.detail).collect();
    assert_eq!(details, vec!["SCAN t1".to_string(), "SEARCH t2 USING INDEX t2a (a=?)".to_string()]);
}

#[test]
fn test_left_join_emits_null_row() {
    let t1 = table("t1", 1_000, &[]);
    let t2 = table("t2", 1_000, &[("t2a", &[0], false)]);
    let mut right = SrcItem::new(t2.clone(), 1);
    right.join_type = JoinFlags::LEFT | JoinFlags::OUTER;
    right.on_clause = Some(Expr::eq(Expr::column(1, &t2, 0), Expr::column(0, &t1, 0)));
    let src = SrcList::new(vec![SrcItem::new(t1.clone(), 0), right]);
    let rs = star(&src);

    let mut b = ProgramBuilder::with_cursors(2);
    let req = PlanRequest::new(&src).with_result_set(&rs);
    let info = begin_plan(&mut b, &PlannerConfig::default(), req).unwrap();
    assert_eq!(info.levels()[1].from, 1);
    assert!(info.levels()[1].left_join > 0);
    info.end(&mut b).unwrap();

    let ops = opcodes(&b);
    assert!(ops.contains(&Opcode::IfPos));
    assert!(ops.contains(&Opcode::NullRow));
    b.finish().unwrap();
}

#[test]
fn test_or_union_deduplicates_rows() {
    let t = table("t", 1_000_000, &[("ia", &[0], false), ("ib", &[1], false)]);
    let src = SrcList::new(vec![SrcItem::new(t.clone(), 0)]);
    let rs = star(&src);
    let w = Expr::or(
        Expr::eq(Expr::column(0, &t, 0), Expr::int(1)),
        Expr::eq(Expr::column(0, &t, 1), Expr::int(2)),
    );

    let mut b = ProgramBuilder::with_cursors(1);
    let req = PlanRequest::new(&src).with_where(&w).with_result_set(&rs);
    let info = begin_plan(&mut b, &PlannerConfig::default(), req).unwrap();
    assert!(info.levels()[0].lp.flags.contains(WsFlags::MULTI_OR));
    info.end(&mut b).unwrap();

    let ops = opcodes(&b);
    assert_eq!(ops.iter().filter(|o| **o == Opcode::RowSetTest).count(), 2);
    let plan = render_plan(&explain_rows(b.ops()));
    assert_eq!(
        plan,
        "QUERY PLAN\n\
         `--MULTI-INDEX OR\n\
         \x20  |--INDEX 1\n\
         \x20  |  `--SEARCH t USING INDEX ia (a=?)\n\
         \x20  `--INDEX 2\n\
         \x20     `--SEARCH t USING INDEX ib (b=?)\n"
    );
}

#[test]
fn test_or_union_without_dedupe() {
    let t = table("t", 1_000_000, &[("ia", &[0], false), ("ib", &[1], false)]);
    let src = SrcList::new(vec![SrcItem::new(t.clone(), 0)]);
    let w = Expr::or(
        Expr::eq(Expr::column(0, &t, 0), Expr::int(1)),
        Expr::eq(Expr::column(0, &t, 1), Expr::int(2)),
    );

    let mut b = ProgramBuilder::with_cursors(1);
    let req = PlanRequest::new(&src)
        .with_where(&w)
        .with_flags(WhereFlags::DUPLICATES_OK);
    let info = begin_plan(&mut b, &PlannerConfig::default(), req).unwrap();
    info.end(&mut b).unwrap();
    assert!(!opcodes(&b).contains(&Opcode::RowSetTest));
}

#[test]
fn test_on_clause_to_the_right_is_rejected() {
    let t = table("t", 100, &[]);
    let mut middle = SrcItem::new(t.clone(), 1);
    middle.join_type = JoinFlags::LEFT | JoinFlags::OUTER;
    middle.on_clause = Some(Expr::eq(Expr::column(1, &t, 0), Expr::column(2, &t, 0)));
    let src = SrcList::new(vec![SrcItem::new(t.clone(), 0), middle, SrcItem::new(t.clone(), 2)]);

    let mut b = ProgramBuilder::with_cursors(3);
    let err = begin_plan(&mut b, &PlannerConfig::default(), PlanRequest::new(&src)).unwrap_err();
    assert_eq!(err.to_string(), "ON clause references tables to its right");
}

#[test]
fn test_sixty_five_tables_rejected() {
    let t = table("t", 10, &[]);
    let src = SrcList::new((0..65).map(|i| SrcItem::new(t.clone(), i)).collect());
    let mut b = ProgramBuilder::with_cursors(65);
    let err = begin_plan(&mut b, &PlannerConfig::default(), PlanRequest::new(&src)).unwrap_err();
    assert_eq!(err.to_string(), "at most 64 tables in a join");
}

#[test]
fn test_order_by_satisfied_by_index() {
    let t = table("t", 1_000_000, &[("ia", &[0], false)]);
    let src = SrcList::new(vec![SrcItem::new(t.clone(), 0)]);
    let order_by = vec![rustql_where::parser::OrderingTerm::asc(Expr::column(0, &t, 0))];
    let w = Expr::binary(BinaryOp::Gt, Expr::column(0, &t, 0), Expr::int(5));

    let mut b = ProgramBuilder::with_cursors(1);
    let req = PlanRequest::new(&src).with_where(&w).with_order_by(&order_by);
    let info = begin_plan(&mut b, &PlannerConfig::default(), req).unwrap();
    assert_eq!(info.n_ob_sat(), 1);
    assert_eq!(info.levels()[0].lp.index().map(|i| i.name.as_str()), Some("ia"));
    info.end(&mut b).unwrap();
}
