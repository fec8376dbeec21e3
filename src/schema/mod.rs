//! Schema descriptors consumed by the planner
//!
//! Tables, columns, and indexes as the planner sees them, together with the
//! statistics loaded from sqlite_stat1/sqlite_stat4. The planner never
//! modifies a schema object; it only reads declared structure and
//! estimates.

pub mod vtab;

use std::sync::Arc;

use crate::error::{Error, ErrorCode, Result};
use crate::parser::ast::{Expr, EXPR_COLUMN, ROWID_COLUMN};
use crate::types::Value;
use crate::util::log_est::{log_est, LogEst};

pub use vtab::{
    ConstraintOp, ConstraintUsage, IndexConstraint, IndexInfo, IndexOrderBy, IndexScanFlags,
    VirtualTable,
};

// ============================================================================
// Constants
// ============================================================================

/// Default collation sequence
pub const DEFAULT_COLLATION: &str = "BINARY";

/// Row estimate for a table nobody has analyzed (about 1 million rows)
pub const DEFAULT_TABLE_ROW_LOG_EST: LogEst = 200;

/// Default per-prefix repetition estimates for an unanalyzed index
const DEFAULT_PREFIX_LOG_EST: [LogEst; 5] = [33, 32, 30, 28, 26];

// ============================================================================
// Basic Types
// ============================================================================

/// Column type affinity (Section 3.1 of the SQL language documentation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Affinity {
    /// BLOB affinity (no type coercion)
    #[default]
    Blob,
    /// TEXT affinity
    Text,
    /// NUMERIC affinity (prefers integer, then real)
    Numeric,
    /// INTEGER affinity
    Integer,
    /// REAL affinity
    Real,
}

impl Affinity {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Affinity::Numeric | Affinity::Integer | Affinity::Real)
    }

    /// One-letter code used in affinity strings ('A'..'E')
    pub fn code(&self) -> char {
        match self {
            Affinity::Blob => 'A',
            Affinity::Text => 'B',
            Affinity::Numeric => 'C',
            Affinity::Integer => 'D',
            Affinity::Real => 'E',
        }
    }

    /// Affinity to use when comparing two operands (sqlite3CompareAffinity)
    pub fn compare(left: Affinity, right: Affinity) -> Affinity {
        if left.is_numeric() || right.is_numeric() {
            Affinity::Numeric
        } else if left != Affinity::Blob && right != Affinity::Blob {
            Affinity::Blob
        } else if left != Affinity::Blob {
            left
        } else {
            right
        }
    }
}

/// Sort order for columns/indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn is_desc(&self) -> bool {
        matches!(self, SortOrder::Desc)
    }
}

/// Determine column affinity from type name
///
/// 1. If type contains "INT" -> INTEGER
/// 2. If type contains "CHAR", "CLOB", or "TEXT" -> TEXT
/// 3. If type contains "BLOB" or is empty -> BLOB
/// 4. If type contains "REAL", "FLOA", or "DOUB" -> REAL
/// 5. Otherwise -> NUMERIC
pub fn type_affinity(type_name: &str) -> Affinity {
    let upper = type_name.to_uppercase();

    if upper.contains("INT") {
        return Affinity::Integer;
    }
    if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
        return Affinity::Text;
    }
    if upper.contains("BLOB") || type_name.is_empty() {
        return Affinity::Blob;
    }
    if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
        return Affinity::Real;
    }
    Affinity::Numeric
}

/// Compare collation names the way the engine does (case-insensitive,
/// missing means BINARY)
pub fn same_collation(a: Option<&str>, b: Option<&str>) -> bool {
    a.unwrap_or(DEFAULT_COLLATION)
        .eq_ignore_ascii_case(b.unwrap_or(DEFAULT_COLLATION))
}

// ============================================================================
// Column
// ============================================================================

/// Column definition
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Declared type (if any)
    pub type_name: Option<String>,
    /// Type affinity
    pub affinity: Affinity,
    /// NOT NULL constraint
    pub not_null: bool,
    /// Collation sequence name, if not BINARY
    pub collation: Option<String>,
    /// Hidden column (table-valued function argument)
    pub is_hidden: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, type_name: &str) -> Self {
        Column {
            name: name.into(),
            type_name: if type_name.is_empty() {
                None
            } else {
                Some(type_name.to_string())
            },
            affinity: type_affinity(type_name),
            not_null: false,
            collation: None,
            is_hidden: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn with_collation(mut self, collation: impl Into<String>) -> Self {
        self.collation = Some(collation.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.is_hidden = true;
        self
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Parsed sqlite_stat1 entry for an index
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexStats {
    /// Number of rows in the index
    pub row_count: u64,
    /// Average number of rows matching each prefix of 1..=N columns
    pub avg_eq: Vec<u64>,
    /// "unordered": never use the index for ORDER BY or ranges
    pub unordered: bool,
    /// "noskipscan": never plan a skip-scan on this index
    pub no_skip_scan: bool,
    /// "sz=N": estimated average row size
    pub size_hint: Option<u64>,
}

/// Parse a stat1 string such as `"10000 100 5 unordered"`
pub fn parse_stat1(stat: &str) -> Result<IndexStats> {
    let mut parts = stat.split_whitespace();
    let row_part = parts
        .next()
        .ok_or_else(|| Error::with_message(ErrorCode::Corrupt, "empty stat string"))?;
    let row_count = row_part
        .parse::<u64>()
        .map_err(|_| Error::with_message(ErrorCode::Corrupt, "invalid row count in stat string"))?;

    let mut stats = IndexStats {
        row_count,
        ..IndexStats::default()
    };
    for part in parts {
        if part == "unordered" {
            stats.unordered = true;
        } else if part == "noskipscan" {
            stats.no_skip_scan = true;
        } else if let Some(sz) = part.strip_prefix("sz=") {
            stats.size_hint = sz.parse::<u64>().ok();
        } else if let Ok(avg) = part.parse::<u64>() {
            stats.avg_eq.push(avg);
        } else {
            return Err(Error::with_message(
                ErrorCode::Corrupt,
                format!("invalid index stat value: {}", part),
            ));
        }
    }
    Ok(stats)
}

/// One sqlite_stat4 sample: an index key plus counts for every prefix
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSample {
    /// Sample key: the index columns followed by the rowid
    pub key: Vec<Value>,
    /// Rows equal to the sample on the first i+1 columns
    pub n_eq: Vec<u64>,
    /// Rows less than the sample on the first i+1 columns
    pub n_lt: Vec<u64>,
    /// Distinct keys less than the sample on the first i+1 columns
    pub n_dlt: Vec<u64>,
}

// ============================================================================
// Index
// ============================================================================

/// A column of an index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexColumn {
    /// Table column number, ROWID_COLUMN, or EXPR_COLUMN
    pub column: i32,
    /// Defining expression for EXPR_COLUMN entries. Column references use
    /// cursor -1.
    pub expr: Option<Expr>,
    pub sort_order: SortOrder,
    pub collation: String,
}

impl IndexColumn {
    pub fn new(column: i32) -> Self {
        IndexColumn {
            column,
            expr: None,
            sort_order: SortOrder::Asc,
            collation: DEFAULT_COLLATION.to_string(),
        }
    }

    pub fn expression(expr: Expr) -> Self {
        IndexColumn {
            column: EXPR_COLUMN,
            expr: Some(expr),
            sort_order: SortOrder::Asc,
            collation: DEFAULT_COLLATION.to_string(),
        }
    }

    pub fn desc(mut self) -> Self {
        self.sort_order = SortOrder::Desc;
        self
    }

    pub fn with_collation(mut self, collation: impl Into<String>) -> Self {
        self.collation = collation.into();
        self
    }
}

/// Index definition with its planner estimates
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Index {
    /// Index name
    pub name: String,
    /// Table this indexes
    pub table: String,
    /// Key columns. The rowid follows them implicitly.
    pub columns: Vec<IndexColumn>,
    /// Root page
    pub root_page: u32,
    /// Is UNIQUE index
    pub unique: bool,
    /// Partial index predicate. Column references use cursor -1.
    pub partial: Option<Expr>,
    /// Is primary key index
    pub is_primary_key: bool,
    /// Statistics for the index (sqlite_stat1)
    pub stats: Option<IndexStats>,
    /// Samples for the index (sqlite_stat4), in key order
    pub samples: Vec<IndexSample>,
    /// Average rows per distinct key, per prefix, derived from the samples
    pub avg_eq: Vec<u64>,
    /// Row estimate per prefix length (0 = whole index)
    pub row_log_est: Vec<LogEst>,
    /// Estimated size of an index entry
    pub sz_idx_row: LogEst,
    /// Index contains every column of its table
    pub is_covering: bool,
}

impl Index {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Index {
            name: name.into(),
            table: table.into(),
            ..Index::default()
        }
    }

    /// Add a key column by table column number
    pub fn with_column(mut self, column: i32) -> Self {
        self.columns.push(IndexColumn::new(column));
        self
    }

    pub fn with_index_column(mut self, column: IndexColumn) -> Self {
        self.columns.push(column);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_partial(mut self, predicate: Expr) -> Self {
        self.partial = Some(predicate);
        self
    }

    pub fn with_stats(mut self, stats: IndexStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_samples(mut self, samples: Vec<IndexSample>) -> Self {
        self.samples = samples;
        self
    }

    /// Number of key columns (nKeyCol)
    pub fn n_key_col(&self) -> usize {
        self.columns.len()
    }

    /// Number of columns including the trailing rowid (nColumn)
    pub fn n_column(&self) -> usize {
        self.columns.len() + 1
    }

    /// Table column stored at index position `i`; the position just past
    /// the key columns is the rowid
    pub fn column_at(&self, i: usize) -> i32 {
        self.columns.get(i).map_or(ROWID_COLUMN, |c| c.column)
    }

    /// Sort order at index position `i`
    pub fn sort_order_at(&self, i: usize) -> SortOrder {
        self.columns.get(i).map_or(SortOrder::Asc, |c| c.sort_order)
    }

    /// Collation at index position `i`
    pub fn collation_at(&self, i: usize) -> &str {
        self.columns
            .get(i)
            .map_or(DEFAULT_COLLATION, |c| c.collation.as_str())
    }

    /// True if the index enforces uniqueness over its key columns
    pub fn is_unique(&self) -> bool {
        self.unique || self.is_primary_key
    }

    pub fn is_unordered(&self) -> bool {
        self.stats.as_ref().map_or(false, |s| s.unordered)
    }

    pub fn no_skip_scan(&self) -> bool {
        self.stats.as_ref().map_or(false, |s| s.no_skip_scan)
    }

    /// True if `column` of the table is stored in the index
    pub fn contains_column(&self, column: i32) -> bool {
        column == ROWID_COLUMN || self.columns.iter().any(|c| c.column == column)
    }

    /// Position of table column `column` among the key columns
    pub fn position_of(&self, column: i32) -> Option<usize> {
        self.columns.iter().position(|c| c.column == column)
    }

    /// Fill in `row_log_est`, `sz_idx_row`, `avg_eq` and `is_covering`
    /// from the statistics, or defaults when the index was never analyzed.
    fn estimate(&mut self, table: &Table) {
        let n_key = self.columns.len();
        let mut est = vec![0 as LogEst; n_key + 1];
        match &self.stats {
            Some(stats) => {
                est[0] = log_est(stats.row_count);
                for i in 1..=n_key {
                    est[i] = match stats.avg_eq.get(i - 1) {
                        Some(avg) => log_est(*avg),
                        None => est[i - 1].min(est[0]),
                    };
                }
            }
            None => {
                let mut x = table.row_log_est;
                if x < 99 {
                    x = 99;
                }
                if self.partial.is_some() {
                    x -= 10;
                }
                est[0] = x;
                for i in 1..=n_key {
                    est[i] = DEFAULT_PREFIX_LOG_EST.get(i - 1).copied().unwrap_or(23);
                }
                if self.is_unique() && n_key > 0 {
                    est[n_key] = 0;
                }
            }
        }
        self.row_log_est = est;

        let width: usize = self
            .columns
            .iter()
            .map(|c| usize::try_from(c.column).ok().map_or(8, |i| table.column_width(i)))
            .sum::<usize>()
            + 8;
        self.sz_idx_row = match self.stats.as_ref().and_then(|s| s.size_hint) {
            Some(sz) => log_est(sz),
            None => log_est(width as u64 * 4),
        };

        self.is_covering = (0..table.columns.len() as i32)
            .all(|c| Some(c as usize) == table.ipk || self.contains_column(c));

        self.avg_eq = self.sample_avg_eq();
    }

    /// Average repetition of keys not present in the sample, per prefix
    fn sample_avg_eq(&self) -> Vec<u64> {
        let n_sample = self.samples.len();
        if n_sample == 0 {
            return Vec::new();
        }
        let n_col = self.columns.len().max(1);
        let mut out = vec![1u64; n_col + 1];
        let last = &self.samples[n_sample - 1];
        for col in 0..n_col {
            let analyzed = self
                .stats
                .as_ref()
                .and_then(|s| s.avg_eq.get(col).copied())
                .filter(|v| *v > 0);
            let (n_row, n_dist100, n_used) = match (analyzed, &self.stats) {
                (Some(avg), Some(stats)) => (
                    stats.row_count,
                    100 * stats.row_count / avg,
                    n_sample,
                ),
                _ => (
                    last.n_lt.get(col).copied().unwrap_or(0),
                    100 * last.n_dlt.get(col).copied().unwrap_or(0),
                    n_sample - 1,
                ),
            };
            let mut sum_eq = 0u64;
            let mut sum100 = 0u64;
            for i in 0..n_used {
                let next_dlt = self.samples.get(i + 1).and_then(|s| s.n_dlt.get(col));
                if i == n_sample - 1 || self.samples[i].n_dlt.get(col) != next_dlt {
                    sum_eq += self.samples[i].n_eq.get(col).copied().unwrap_or(0);
                    sum100 += 100;
                }
            }
            let mut avg = 0;
            if n_dist100 > sum100 && sum_eq < n_row {
                avg = 100 * (n_row - sum_eq) / (n_dist100 - sum100);
            }
            out[col] = avg.max(1);
        }
        out
    }
}

// ============================================================================
// Table
// ============================================================================

/// Table definition
#[derive(Debug, Clone, Default)]
pub struct Table {
    /// Table name
    pub name: String,
    /// Root page number
    pub root_page: u32,
    /// Columns
    pub columns: Vec<Column>,
    /// Column that aliases the rowid (INTEGER PRIMARY KEY)
    pub ipk: Option<usize>,
    /// Indexes on this table
    pub indexes: Vec<Arc<Index>>,
    /// Estimated number of rows
    pub row_log_est: LogEst,
    /// Estimated size of a row
    pub sz_tab_row: LogEst,
    /// Statistics were loaded for at least one index
    pub has_stat1: bool,
    /// Virtual table implementation
    pub vtab: Option<Arc<dyn VirtualTable>>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Table {
            name: name.into(),
            row_log_est: DEFAULT_TABLE_ROW_LOG_EST,
            sz_tab_row: log_est(48),
            ..Table::default()
        }
    }

    /// Set the row estimate directly
    pub fn with_row_estimate(mut self, rows: u64) -> Self {
        self.row_log_est = log_est(rows);
        self
    }

    pub fn with_vtab(mut self, vtab: Arc<dyn VirtualTable>) -> Self {
        self.vtab = Some(vtab);
        self
    }

    pub fn add_column(&mut self, column: Column) -> usize {
        self.columns.push(column);
        self.sz_tab_row = log_est(self.row_width() as u64 * 4);
        self.columns.len() - 1
    }

    /// Declare column `column` as INTEGER PRIMARY KEY
    pub fn set_integer_primary_key(&mut self, column: usize) {
        self.ipk = Some(column);
        if let Some(c) = self.columns.get_mut(column) {
            c.affinity = Affinity::Integer;
            c.not_null = true;
        }
    }

    /// Attach an index and compute its estimates. Statistics on a
    /// non-partial index also set the table's row estimate.
    pub fn add_index(&mut self, mut index: Index) {
        if let Some(stats) = &index.stats {
            if index.partial.is_none() {
                self.row_log_est = log_est(stats.row_count);
            }
            self.has_stat1 = true;
        }
        index.table = self.name.clone();
        index.estimate(self);
        self.indexes.push(Arc::new(index));
    }

    pub fn is_virtual(&self) -> bool {
        self.vtab.is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn find_index(&self, name: &str) -> Option<usize> {
        self.indexes
            .iter()
            .position(|i| i.name.eq_ignore_ascii_case(name))
    }

    /// Map a reference to the INTEGER PRIMARY KEY column onto the rowid
    pub fn normalize_column(&self, column: i32) -> i32 {
        match self.ipk {
            Some(ipk) if column >= 0 && column as usize == ipk => ROWID_COLUMN,
            _ => column,
        }
    }

    pub fn column_affinity(&self, column: i32) -> Affinity {
        usize::try_from(column)
            .ok()
            .and_then(|i| self.columns.get(i))
            .map_or(Affinity::Integer, |c| c.affinity)
    }

    pub fn column_collation(&self, column: i32) -> Option<&str> {
        usize::try_from(column)
            .ok()
            .and_then(|i| self.columns.get(i))
            .and_then(|c| c.collation.as_deref())
    }

    pub fn column_not_null(&self, column: i32) -> bool {
        usize::try_from(column)
            .ok()
            .and_then(|i| self.columns.get(i))
            .map_or(true, |c| c.not_null)
    }

    pub fn column_name(&self, column: i32) -> &str {
        usize::try_from(column)
            .ok()
            .and_then(|i| self.columns.get(i))
            .map_or("rowid", |c| c.name.as_str())
    }

    fn column_width(&self, column: usize) -> usize {
        match self.columns.get(column).map(|c| c.affinity) {
            Some(Affinity::Integer) | Some(Affinity::Real) | Some(Affinity::Numeric) => 8,
            Some(Affinity::Text) => 16,
            _ => 12,
        }
    }

    fn row_width(&self) -> usize {
        (0..self.columns.len()).map(|c| self.column_width(c)).sum::<usize>() + 8
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        let mut t = Table::new("t");
        t.add_column(Column::new("a", "INTEGER"));
        t.add_column(Column::new("b", "TEXT"));
        t.add_column(Column::new("c", ""));
        t
    }

    #[test]
    fn test_type_affinity() {
        assert_eq!(type_affinity("INTEGER"), Affinity::Integer);
        assert_eq!(type_affinity("VARCHAR(10)"), Affinity::Text);
        assert_eq!(type_affinity(""), Affinity::Blob);
        assert_eq!(type_affinity("DOUBLE"), Affinity::Real);
        assert_eq!(type_affinity("DECIMAL"), Affinity::Numeric);
    }

    #[test]
    fn test_compare_affinity() {
        assert_eq!(
            Affinity::compare(Affinity::Text, Affinity::Integer),
            Affinity::Numeric
        );
        assert_eq!(Affinity::compare(Affinity::Text, Affinity::Blob), Affinity::Text);
        assert_eq!(Affinity::compare(Affinity::Text, Affinity::Text), Affinity::Blob);
    }

    #[test]
    fn test_parse_stat1() {
        let stats = parse_stat1("10000 100 5 unordered sz=20").unwrap();
        assert_eq!(stats.row_count, 10000);
        assert_eq!(stats.avg_eq, vec![100, 5]);
        assert!(stats.unordered);
        assert!(!stats.no_skip_scan);
        assert_eq!(stats.size_hint, Some(20));

        assert!(parse_stat1("").is_err());
        assert!(parse_stat1("10 x").is_err());
    }

    #[test]
    fn test_default_row_estimates() {
        let mut t = sample_table();
        t.add_index(Index::new("ab", "t").with_column(0).with_column(1));
        t.add_index(Index::new("u", "t").with_column(2).unique());
        let ab = &t.indexes[0];
        assert_eq!(ab.row_log_est, vec![200, 33, 32]);
        let u = &t.indexes[1];
        assert_eq!(u.row_log_est, vec![200, 0]);
        assert!(!ab.is_covering);
    }

    #[test]
    fn test_small_table_clamped_to_million_rows() {
        let mut t = sample_table().with_row_estimate(10);
        t.add_index(Index::new("a", "t").with_column(0));
        assert_eq!(t.indexes[0].row_log_est[0], 99);
    }

    #[test]
    fn test_stat1_sets_table_estimate() {
        let mut t = sample_table();
        let stats = parse_stat1("1000 10").unwrap();
        t.add_index(Index::new("a", "t").with_column(0).with_stats(stats));
        assert_eq!(t.row_log_est, 99);
        assert!(t.has_stat1);
        assert_eq!(t.indexes[0].row_log_est, vec![99, 33]);
    }

    #[test]
    fn test_covering_index() {
        let mut t = sample_table();
        t.add_index(
            Index::new("all", "t")
                .with_column(0)
                .with_column(1)
                .with_column(2),
        );
        assert!(t.indexes[0].is_covering);
        assert_eq!(t.indexes[0].column_at(3), ROWID_COLUMN);
    }

    #[test]
    fn test_ipk_normalization() {
        let mut t = sample_table();
        t.set_integer_primary_key(0);
        assert_eq!(t.normalize_column(0), ROWID_COLUMN);
        assert_eq!(t.normalize_column(1), 1);
    }

    #[test]
    fn test_sample_avg_eq() {
        let mut t = sample_table();
        let samples = vec![
            IndexSample {
                key: vec![Value::Integer(1), Value::Integer(1)],
                n_eq: vec![50],
                n_lt: vec![0],
                n_dlt: vec![0],
            },
            IndexSample {
                key: vec![Value::Integer(9), Value::Integer(80)],
                n_eq: vec![10],
                n_lt: vec![90],
                n_dlt: vec![8],
            },
        ];
        let stats = parse_stat1("100 10").unwrap();
        t.add_index(
            Index::new("a", "t")
                .with_column(0)
                .with_stats(stats)
                .with_samples(samples),
        );
        // 10 distinct keys, 2 sampled holding 60 rows: 40 rows over 8 keys
        assert_eq!(t.indexes[0].avg_eq[0], 5);
    }
}
