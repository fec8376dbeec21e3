//! Plan description
//!
//! One line of text per scan, in the engine's EXPLAIN QUERY PLAN wording,
//! emitted as `Explain` instructions whose P1 is their own address and P2
//! the address of the parent line. `explain_rows` reads them back out of a
//! program and `render_plan` draws the tree.

use crate::parser::ast::{SrcList, EXPR_COLUMN, ROWID_COLUMN};
use crate::schema::{Index, Table};
use crate::util::LogEst;
use crate::vdbe::{Opcode, ProgramBuilder, VdbeOp, P4};

use super::where_clause::{WhereFlags, WhereLevel};
use super::where_loop::{WhereLoop, WsFlags};

fn index_column_name<'a>(index: &Index, table: &'a Table, i: usize) -> &'a str {
    match index.column_at(i) {
        EXPR_COLUMN => "<expr>",
        ROWID_COLUMN => "rowid",
        column => table.column_name(column),
    }
}

/// `(a,b)>(?,?)` or `b>?` for a range bound on `n_term` columns from `first`
fn append_range_term(out: &mut String, index: &Index, table: &Table, n_term: usize, first: usize, and: bool, op: char) {
    if and {
        out.push_str(" AND ");
    }
    let names: Vec<&str> = (0..n_term).map(|i| index_column_name(index, table, first + i)).collect();
    let params = vec!["?"; n_term].join(",");
    if n_term > 1 {
        out.push_str(&format!("({}){}({})", names.join(","), op, params));
    } else {
        out.push_str(&format!("{}{}{}", names.join(","), op, params));
    }
}

/// The ` (a=? AND b>?)` suffix of an index scan
fn append_index_range(out: &mut String, lp: &WhereLoop, index: &Index, table: &Table) {
    let n_eq = lp.n_eq();
    if n_eq == 0 && !lp.flags.intersects(WsFlags::BOTH_LIMIT) {
        return;
    }
    out.push_str(" (");
    for i in 0..n_eq {
        if i > 0 {
            out.push_str(" AND ");
        }
        let name = index_column_name(index, table, i);
        if i >= lp.n_skip as usize {
            out.push_str(&format!("{}=?", name));
        } else {
            out.push_str(&format!("ANY({})", name));
        }
    }
    let mut and = n_eq > 0;
    if lp.flags.contains(WsFlags::BTM_LIMIT) {
        append_range_term(out, index, table, lp.n_btm().max(1), n_eq, and, '>');
        and = true;
    }
    if lp.flags.contains(WsFlags::TOP_LIMIT) {
        append_range_term(out, index, table, lp.n_top().max(1), n_eq, and, '<');
    }
    out.push(')');
}

/// Describe how a level scans its table. OR-union levels and the levels
/// of an OR sub-plan describe themselves elsewhere and return None.
pub fn describe_scan(src: &SrcList, level: &WhereLevel, wctrl: WhereFlags) -> Option<String> {
    let lp = &level.lp;
    let flags = lp.flags;
    if flags.contains(WsFlags::MULTI_OR) || wctrl.contains(WhereFlags::OR_SUBCLAUSE) {
        return None;
    }
    let item = &src.items[level.from];
    let table: &Table = &item.table;
    let is_search = flags.intersects(WsFlags::BOTH_LIMIT)
        || (!flags.contains(WsFlags::VIRTUALTABLE) && lp.n_eq() > 0)
        || wctrl.intersects(WhereFlags::ORDERBY_MIN | WhereFlags::ORDERBY_MAX);
    let mut out = format!("{} {}", if is_search { "SEARCH" } else { "SCAN" }, item.display_name());

    if !flags.intersects(WsFlags::IPK | WsFlags::VIRTUALTABLE) {
        if let Some(index) = lp.index() {
            out.push_str(" USING ");
            if flags.contains(WsFlags::PARTIALIDX) {
                out.push_str("AUTOMATIC PARTIAL COVERING INDEX");
            } else if flags.contains(WsFlags::AUTO_INDEX) {
                out.push_str("AUTOMATIC COVERING INDEX");
            } else if flags.contains(WsFlags::IDX_ONLY) {
                out.push_str(&format!("COVERING INDEX {}", index.name));
            } else {
                out.push_str(&format!("INDEX {}", index.name));
            }
            append_index_range(&mut out, lp, index, table);
        }
    } else if flags.contains(WsFlags::IPK) && flags.intersects(WsFlags::CONSTRAINT) {
        let range_op = if flags.intersects(WsFlags::COLUMN_EQ | WsFlags::COLUMN_IN) {
            "="
        } else if flags.contains(WsFlags::BOTH_LIMIT) {
            ">? AND rowid<"
        } else if flags.contains(WsFlags::BTM_LIMIT) {
            ">"
        } else {
            "<"
        };
        out.push_str(&format!(" USING INTEGER PRIMARY KEY (rowid{}?)", range_op));
    } else if let Some(vtab) = lp.vtab() {
        out.push_str(&format!(
            " VIRTUAL TABLE INDEX {}:{}",
            vtab.idx_num,
            vtab.idx_str.as_deref().unwrap_or("")
        ));
    }
    Some(out)
}

/// Emit an `Explain` line under `parent` and return its address
pub fn explain_text(b: &mut ProgramBuilder, parent: i32, text: impl Into<String>) -> i32 {
    let addr = b.current_addr();
    b.add_op4(Opcode::Explain, addr, parent, 0, P4::Text(text.into()))
}

/// Emit the explain line for one level. Returns its address, or 0 when the
/// level has no line of its own.
pub fn explain_one_scan(
    b: &mut ProgramBuilder,
    src: &SrcList,
    level: &WhereLevel,
    wctrl: WhereFlags,
    parent: i32,
) -> i32 {
    match describe_scan(src, level, wctrl) {
        Some(text) => explain_text(b, parent, text),
        None => 0,
    }
}

// ============================================================================
// Scan status
// ============================================================================

/// Profiling record for one scan: where it is explained, where its loop
/// starts, where rows are counted, and what the planner expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanStatus {
    pub addr_explain: i32,
    pub addr_loop: i32,
    pub addr_visit: i32,
    /// Estimated rows per run of the loop
    pub n_est: LogEst,
    /// Index name, or the table name for table and virtual table scans
    pub name: String,
}

impl ScanStatus {
    pub fn new(src: &SrcList, level: &WhereLevel, addr_explain: i32) -> Self {
        let lp = &level.lp;
        let name = match lp.index() {
            Some(index) if !lp.flags.contains(WsFlags::VIRTUALTABLE) => index.name.clone(),
            _ => src.items[level.from].table.name.clone(),
        };
        ScanStatus {
            addr_explain,
            addr_loop: level.addr_body,
            addr_visit: level.addr_visit,
            n_est: lp.n_out,
            name,
        }
    }
}

// ============================================================================
// Reading plans back
// ============================================================================

/// One line of a query plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplainRow {
    pub id: i32,
    pub parent: i32,
    pub detail: String,
}

/// Collect the `Explain` instructions of a program, in program order
pub fn explain_rows(ops: &[VdbeOp]) -> Vec<ExplainRow> {
    ops.iter()
        .filter(|op| op.opcode == Opcode::Explain)
        .filter_map(|op| match &op.p4 {
            P4::Text(detail) => Some(ExplainRow {
                id: op.p1,
                parent: op.p2,
                detail: detail.clone(),
            }),
            _ => None,
        })
        .collect()
}

/// Draw plan rows as a tree, one line per row:
///
/// ```text
/// QUERY PLAN
/// |--SCAN t1
/// `--SEARCH t2 USING INTEGER PRIMARY KEY (rowid=?)
/// ```
pub fn render_plan(rows: &[ExplainRow]) -> String {
    fn draw(rows: &[ExplainRow], level: &[&ExplainRow], prefix: &str, out: &mut String) {
        for (i, row) in level.iter().enumerate() {
            let last = i + 1 == level.len();
            out.push_str(prefix);
            out.push_str(if last { "`--" } else { "|--" });
            out.push_str(&row.detail);
            out.push('\n');
            let children: Vec<&ExplainRow> = rows
                .iter()
                .filter(|r| r.parent == row.id && r.id != row.id)
                .collect();
            let deeper = format!("{}{}", prefix, if last { "   " } else { "|  " });
            draw(rows, &children, &deeper, out);
        }
    }
    // Rows whose parent is not another row hang off the root
    let roots: Vec<&ExplainRow> = rows
        .iter()
        .filter(|r| !rows.iter().any(|p| p.id == r.parent && p.id != r.id))
        .collect();
    let mut out = String::from("QUERY PLAN\n");
    draw(rows, &roots, "", &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::SrcItem;
    use crate::schema::Column;
    use std::sync::Arc;

    fn level_for(lp: WhereLoop) -> WhereLevel {
        WhereLevel {
            lp,
            from: 0,
            tab_cur: 0,
            idx_cur: -1,
            left_join: 0,
            addr_brk: 0,
            addr_nxt: 0,
            addr_skip: 0,
            addr_cont: 0,
            addr_first: 0,
            addr_body: 3,
            addr_visit: 5,
            addr_like_rep: 0,
            like_rep_cntr: 0,
            op: Opcode::Next,
            p1: 0,
            p2: 0,
            p3: 0,
            p5: 0,
            in_loops: Vec::new(),
            not_ready: 0,
            cov_idx: None,
        }
    }

    fn table_src() -> (SrcList, Arc<Table>) {
        let mut t = Table::new("t");
        t.add_column(Column::new("a", "INTEGER"));
        t.add_column(Column::new("b", "INTEGER"));
        t.add_column(Column::new("c", "TEXT"));
        t.add_index(Index::new("ix", "t").with_column(0).with_column(1));
        let t = Arc::new(t);
        (SrcList::new(vec![SrcItem::new(t.clone(), 0)]), t)
    }

    #[test]
    fn test_full_scan_text() {
        let (src, _) = table_src();
        let level = level_for(WhereLoop::new(0, 1));
        assert_eq!(describe_scan(&src, &level, WhereFlags::empty()).unwrap(), "SCAN t");
    }

    #[test]
    fn test_index_range_text() {
        let (src, t) = table_src();
        let mut lp = WhereLoop::new(0, 1);
        lp.flags = WsFlags::COLUMN_EQ | WsFlags::COLUMN_RANGE | WsFlags::BTM_LIMIT | WsFlags::INDEXED;
        let bt = lp.btree_mut();
        bt.n_eq = 1;
        bt.n_btm = 1;
        bt.index = Some(t.indexes[0].clone());
        let level = level_for(lp);
        assert_eq!(
            describe_scan(&src, &level, WhereFlags::empty()).unwrap(),
            "SEARCH t USING INDEX ix (a=? AND b>?)"
        );
    }

    #[test]
    fn test_covering_and_vector_range_text() {
        let (src, t) = table_src();
        let mut lp = WhereLoop::new(0, 1);
        lp.flags = WsFlags::COLUMN_RANGE | WsFlags::BTM_LIMIT | WsFlags::INDEXED | WsFlags::IDX_ONLY;
        let bt = lp.btree_mut();
        bt.n_btm = 2;
        bt.index = Some(t.indexes[0].clone());
        let level = level_for(lp);
        assert_eq!(
            describe_scan(&src, &level, WhereFlags::empty()).unwrap(),
            "SEARCH t USING COVERING INDEX ix ((a,b)>(?,?))"
        );
    }

    #[test]
    fn test_rowid_text() {
        let (src, _) = table_src();
        let mut lp = WhereLoop::new(0, 1);
        lp.flags = WsFlags::IPK | WsFlags::COLUMN_RANGE | WsFlags::BOTH_LIMIT;
        let level = level_for(lp);
        assert_eq!(
            describe_scan(&src, &level, WhereFlags::empty()).unwrap(),
            "SEARCH t USING INTEGER PRIMARY KEY (rowid>? AND rowid<?)"
        );
        let mut lp = WhereLoop::new(0, 1);
        lp.flags = WsFlags::IPK | WsFlags::COLUMN_EQ | WsFlags::ONEROW;
        lp.btree_mut().n_eq = 1;
        let level = level_for(lp);
        assert_eq!(
            describe_scan(&src, &level, WhereFlags::empty()).unwrap(),
            "SEARCH t USING INTEGER PRIMARY KEY (rowid=?)"
        );
    }

    #[test]
    fn test_multi_or_has_no_line() {
        let (src, _) = table_src();
        let mut lp = WhereLoop::new(0, 1);
        lp.flags = WsFlags::MULTI_OR;
        let level = level_for(lp);
        assert!(describe_scan(&src, &level, WhereFlags::empty()).is_none());
        let mut b = ProgramBuilder::new();
        assert_eq!(explain_one_scan(&mut b, &src, &level, WhereFlags::empty(), 0), 0);
        assert!(b.ops().is_empty());
    }

    #[test]
    fn test_scan_status_names_index() {
        let (src, t) = table_src();
        let mut lp = WhereLoop::new(0, 1);
        lp.flags = WsFlags::INDEXED;
        lp.n_out = 33;
        lp.btree_mut().index = Some(t.indexes[0].clone());
        let level = level_for(lp);
        let status = ScanStatus::new(&src, &level, 7);
        assert_eq!(status.name, "ix");
        assert_eq!((status.addr_explain, status.addr_loop, status.addr_visit), (7, 3, 5));
        assert_eq!(status.n_est, 33);
    }

    #[test]
    fn test_render_tree() {
        let mut b = ProgramBuilder::new();
        let or = explain_text(&mut b, 0, "MULTI-INDEX OR");
        let one = explain_text(&mut b, or, "INDEX 1");
        explain_text(&mut b, one, "SEARCH t USING INDEX ia (a=?)");
        let two = explain_text(&mut b, or, "INDEX 2");
        explain_text(&mut b, two, "SEARCH t USING INDEX ib (b=?)");
        let rows = explain_rows(b.ops());
        assert_eq!(rows.len(), 5);
        assert_eq!(
            render_plan(&rows),
            "QUERY PLAN\n\
             `--MULTI-INDEX OR\n   \
             |--INDEX 1\n   \
             |  `--SEARCH t USING INDEX ia (a=?)\n   \
             `--INDEX 2\n      \
             `--SEARCH t USING INDEX ib (b=?)\n"
        );
    }
}
