//! Resolved expression tree
//!
//! The planner consumes expressions after name resolution: every column
//! reference already names the cursor of the FROM-clause item it reads and
//! the column's position in that table. Statement-level syntax is handled
//! upstream and does not appear here.

use std::sync::Arc;

use crate::schema::{type_affinity, Affinity, SortOrder, Table};
use crate::types::Value;

/// Column number used for the rowid (XN_ROWID)
pub const ROWID_COLUMN: i32 = -1;

/// Column number of an index column defined by an expression (XN_EXPR)
pub const EXPR_COLUMN: i32 = -2;

// ============================================================================
// Expressions
// ============================================================================

/// Resolved expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    // Literals
    Literal(Literal),

    // Column reference
    Column(ColumnRef),

    // Parameter/variable
    Variable(Variable),

    // Unary operators
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },

    // Binary operators
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    // BETWEEN
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },

    // IN
    In {
        expr: Box<Expr>,
        list: InList,
        negated: bool,
    },

    // LIKE/GLOB/REGEXP/MATCH
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        escape: Option<Box<Expr>>,
        op: LikeOp,
        negated: bool,
    },

    // IS NULL / IS NOT NULL
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },

    // CAST expression
    Cast {
        expr: Box<Expr>,
        type_name: String,
    },

    // COLLATE
    Collate {
        expr: Box<Expr>,
        collation: String,
    },

    // Function call
    Function(FunctionCall),

    // Row value (a, b, c)
    Vector(Vec<Expr>),

    // Scalar subquery
    Subquery(Box<Subquery>),

    // EXISTS
    Exists {
        subquery: Box<Subquery>,
        negated: bool,
    },
}

impl Expr {
    pub fn int(value: i64) -> Self {
        Expr::Literal(Literal::Integer(value))
    }

    pub fn float(value: f64) -> Self {
        Expr::Literal(Literal::Float(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::Literal(Literal::String(value.into()))
    }

    pub fn null() -> Self {
        Expr::Literal(Literal::Null)
    }

    /// Reference column `column` of `table`, read through `cursor`
    pub fn column(cursor: i32, table: &Table, column: i32) -> Self {
        Expr::Column(ColumnRef::resolve(cursor, table, column))
    }

    /// Reference the rowid of `table`
    pub fn rowid(cursor: i32, table: &Table) -> Self {
        Expr::Column(ColumnRef::resolve(cursor, table, ROWID_COLUMN))
    }

    /// Unbound parameter `?N`
    pub fn variable(index: i32) -> Self {
        Expr::Variable(Variable {
            index,
            name: None,
            value: None,
        })
    }

    /// Parameter `?N` whose current binding is known at plan time
    pub fn bound_variable(index: i32, value: Value) -> Self {
        Expr::Variable(Variable {
            index,
            name: None,
            value: Some(value),
        })
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Expr::binary(BinaryOp::Eq, left, right)
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::binary(BinaryOp::And, left, right)
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Expr::binary(BinaryOp::Or, left, right)
    }

    pub fn not(expr: Expr) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(expr),
        }
    }

    pub fn in_list(expr: Expr, values: Vec<Expr>) -> Self {
        Expr::In {
            expr: Box::new(expr),
            list: InList::Values(values),
            negated: false,
        }
    }

    pub fn between(expr: Expr, low: Expr, high: Expr) -> Self {
        Expr::Between {
            expr: Box::new(expr),
            low: Box::new(low),
            high: Box::new(high),
            negated: false,
        }
    }

    pub fn like(expr: Expr, pattern: Expr) -> Self {
        Expr::Like {
            expr: Box::new(expr),
            pattern: Box::new(pattern),
            escape: None,
            op: LikeOp::Like,
            negated: false,
        }
    }

    pub fn is_null(expr: Expr) -> Self {
        Expr::IsNull {
            expr: Box::new(expr),
            negated: false,
        }
    }

    pub fn is_not_null(expr: Expr) -> Self {
        Expr::IsNull {
            expr: Box::new(expr),
            negated: true,
        }
    }

    pub fn function(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function(FunctionCall {
            name: name.into(),
            args,
        })
    }

    /// Join a list of conjuncts with AND. Returns None for an empty list.
    pub fn conjunction(terms: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        terms.into_iter().reduce(Expr::and)
    }

    /// Skip any COLLATE operators at the top of the expression
    pub fn skip_collate(&self) -> &Expr {
        let mut e = self;
        while let Expr::Collate { expr, .. } = e {
            e = expr;
        }
        e
    }

    /// Skip COLLATE operators and likely()/unlikely()/likelihood() wrappers
    pub fn skip_collate_and_likely(&self) -> &Expr {
        let mut e = self;
        loop {
            match e {
                Expr::Collate { expr, .. } => e = expr,
                Expr::Function(f) if f.likelihood().is_some() && !f.args.is_empty() => {
                    e = &f.args[0]
                }
                _ => return e,
            }
        }
    }

    /// The column reference at the top of the expression, if any
    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self.skip_collate() {
            Expr::Column(c) => Some(c),
            _ => None,
        }
    }

    /// Affinity of the expression's result (sqlite3ExprAffinity)
    pub fn affinity(&self) -> Affinity {
        match self {
            Expr::Column(c) => c.affinity,
            Expr::Cast { type_name, .. } => type_affinity(type_name),
            Expr::Collate { expr, .. } => expr.affinity(),
            Expr::Vector(items) => items.first().map_or(Affinity::Blob, Expr::affinity),
            Expr::Subquery(sub) => sub.affinity,
            _ => Affinity::Blob,
        }
    }

    /// Explicit or implied collating sequence (sqlite3ExprCollSeq)
    pub fn collation(&self) -> Option<&str> {
        match self {
            Expr::Collate { collation, .. } => Some(collation),
            Expr::Column(c) => c.collation.as_deref(),
            Expr::Cast { expr, .. } | Expr::Unary { expr, .. }
                if !matches!(self, Expr::Unary { op: UnaryOp::Not, .. }) =>
            {
                expr.collation()
            }
            Expr::Binary { left, right, op } if !op.is_comparison() && !op.is_logical() => {
                left.collation().or_else(|| right.collation())
            }
            _ => None,
        }
    }

    /// True if the expression has an explicit COLLATE at the top
    pub fn has_explicit_collation(&self) -> bool {
        matches!(self, Expr::Collate { .. })
    }

    /// Number of columns in a row value, 1 for scalars
    pub fn vector_size(&self) -> usize {
        match self.skip_collate() {
            Expr::Vector(items) => items.len(),
            Expr::Subquery(sub) => sub.n_column,
            _ => 1,
        }
    }

    pub fn is_vector(&self) -> bool {
        self.vector_size() > 1
    }

    /// Component `i` of a row value, or the expression itself for scalars
    pub fn vector_field(&self, i: usize) -> Option<&Expr> {
        match self.skip_collate() {
            Expr::Vector(items) => items.get(i),
            _ if i == 0 => Some(self),
            _ => None,
        }
    }

    /// Constant value of a literal, or of a parameter with a known binding
    pub fn constant_value(&self) -> Option<Value> {
        match self.skip_collate() {
            Expr::Literal(lit) => Some(lit.to_value()),
            Expr::Variable(v) => v.value.clone(),
            Expr::Unary {
                op: UnaryOp::Neg,
                expr,
            } => match expr.constant_value()? {
                Value::Integer(i) => Some(Value::Integer(i.checked_neg()?)),
                Value::Real(r) => Some(Value::Real(-r)),
                _ => None,
            },
            Expr::Unary {
                op: UnaryOp::Pos,
                expr,
            } => expr.constant_value(),
            _ => None,
        }
    }

    /// True if the expression references no columns, parameters, or
    /// subqueries (sqlite3ExprIsConstant)
    pub fn is_constant(&self) -> bool {
        let mut constant = true;
        self.walk(&mut |e| {
            if matches!(
                e,
                Expr::Column(_) | Expr::Variable(_) | Expr::Subquery(_) | Expr::Exists { .. }
            ) {
                constant = false;
            }
        });
        constant
    }

    /// True if the expression contains a subquery anywhere
    pub fn has_subquery(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if matches!(e, Expr::Subquery(_) | Expr::Exists { .. })
                || matches!(e, Expr::In { list: InList::Subquery(_), .. })
            {
                found = true;
            }
        });
        found
    }

    /// True if the expression can never be NULL (sqlite3ExprCanBeNull == 0)
    pub fn never_null(&self) -> bool {
        match self.skip_collate() {
            Expr::Literal(Literal::Null) => false,
            Expr::Literal(_) => true,
            Expr::Column(c) => c.column == ROWID_COLUMN || c.not_null,
            _ => false,
        }
    }

    /// Visit this expression and every sub-expression, pre-order
    pub fn walk(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Literal(_) | Expr::Column(_) | Expr::Variable(_) => {}
            Expr::Unary { expr, .. }
            | Expr::IsNull { expr, .. }
            | Expr::Cast { expr, .. }
            | Expr::Collate { expr, .. } => expr.walk(f),
            Expr::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.walk(f);
                low.walk(f);
                high.walk(f);
            }
            Expr::In { expr, list, .. } => {
                expr.walk(f);
                match list {
                    InList::Values(values) => values.iter().for_each(|v| v.walk(f)),
                    InList::Subquery(sub) => sub.correlated.iter().for_each(|v| v.walk(f)),
                }
            }
            Expr::Like {
                expr,
                pattern,
                escape,
                ..
            } => {
                expr.walk(f);
                pattern.walk(f);
                if let Some(escape) = escape {
                    escape.walk(f);
                }
            }
            Expr::Function(call) => call.args.iter().for_each(|a| a.walk(f)),
            Expr::Vector(items) => items.iter().for_each(|a| a.walk(f)),
            Expr::Subquery(sub) | Expr::Exists { subquery: sub, .. } => {
                sub.correlated.iter().for_each(|a| a.walk(f))
            }
        }
    }

    /// Structural comparison where column references of `pattern` with
    /// cursor -1 match any column reference to the same column through
    /// `cursor`. Used to match index expressions and partial-index
    /// predicates against WHERE terms.
    pub fn matches_pattern(&self, pattern: &Expr, cursor: i32) -> bool {
        match (self, pattern) {
            (Expr::Column(a), Expr::Column(b)) => {
                a.column == b.column && (a.cursor == b.cursor || (b.cursor < 0 && a.cursor == cursor))
            }
            (Expr::Collate { expr: a, collation: ca }, Expr::Collate { expr: b, collation: cb }) => {
                ca.eq_ignore_ascii_case(cb) && a.matches_pattern(b, cursor)
            }
            (Expr::Unary { op: oa, expr: a }, Expr::Unary { op: ob, expr: b }) => {
                oa == ob && a.matches_pattern(b, cursor)
            }
            (
                Expr::Binary {
                    op: oa,
                    left: la,
                    right: ra,
                },
                Expr::Binary {
                    op: ob,
                    left: lb,
                    right: rb,
                },
            ) => oa == ob && la.matches_pattern(lb, cursor) && ra.matches_pattern(rb, cursor),
            (
                Expr::IsNull {
                    expr: a,
                    negated: na,
                },
                Expr::IsNull {
                    expr: b,
                    negated: nb,
                },
            ) => na == nb && a.matches_pattern(b, cursor),
            (Expr::Cast { expr: a, type_name: ta }, Expr::Cast { expr: b, type_name: tb }) => {
                ta.eq_ignore_ascii_case(tb) && a.matches_pattern(b, cursor)
            }
            (Expr::Function(a), Expr::Function(b)) => {
                a.name.eq_ignore_ascii_case(&b.name)
                    && a.args.len() == b.args.len()
                    && a
                        .args
                        .iter()
                        .zip(&b.args)
                        .all(|(x, y)| x.matches_pattern(y, cursor))
            }
            (Expr::Vector(a), Expr::Vector(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.matches_pattern(y, cursor))
            }
            (a, b) => a == b,
        }
    }
}

// ============================================================================
// Leaf types
// ============================================================================

/// Literal value
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Integer(i64),
    Float(f64),
    String(String),
    Blob(Vec<u8>),
    Bool(bool),
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Integer(i) => Value::Integer(*i),
            Literal::Float(f) => Value::Real(*f),
            Literal::String(s) => Value::Text(s.clone()),
            Literal::Blob(b) => Value::Blob(b.clone()),
            Literal::Bool(b) => Value::Integer(*b as i64),
        }
    }
}

/// Resolved column reference
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    /// Cursor of the FROM-clause item the column belongs to
    pub cursor: i32,
    /// Column index in the table, or ROWID_COLUMN
    pub column: i32,
    /// Table name, for explain output
    pub table: String,
    /// Column name, for explain output
    pub name: String,
    pub affinity: Affinity,
    /// Declared collating sequence of the column
    pub collation: Option<String>,
    /// Column carries a NOT NULL constraint
    pub not_null: bool,
}

impl ColumnRef {
    /// Build a reference from the table definition
    pub fn resolve(cursor: i32, table: &Table, column: i32) -> Self {
        let column = table.normalize_column(column);
        match usize::try_from(column).ok().and_then(|i| table.columns.get(i)) {
            Some(col) => ColumnRef {
                cursor,
                column,
                table: table.name.clone(),
                name: col.name.clone(),
                affinity: col.affinity,
                collation: col.collation.clone(),
                not_null: col.not_null,
            },
            None => ColumnRef {
                cursor,
                column: ROWID_COLUMN,
                table: table.name.clone(),
                name: "rowid".to_string(),
                affinity: Affinity::Integer,
                collation: None,
                not_null: true,
            },
        }
    }

    pub fn is_rowid(&self) -> bool {
        self.column == ROWID_COLUMN
    }
}

/// Bound parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Parameter number (1-based)
    pub index: i32,
    /// Name for :name/@name/$name parameters
    pub name: Option<String>,
    /// Current binding, when the statement is compiled with its bindings
    /// known
    pub value: Option<Value>,
}

/// Unary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,    // -
    Pos,    // +
    Not,    // NOT
    BitNot, // ~
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Is,
    IsNot,

    // Logical
    And,
    Or,

    // Bitwise
    BitAnd,
    BitOr,
    ShiftLeft,
    ShiftRight,

    // String
    Concat,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::Is
                | BinaryOp::IsNot
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// The operator that results from swapping the operands
    pub fn commuted(&self) -> BinaryOp {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Le => BinaryOp::Ge,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Ge => BinaryOp::Le,
            other => *other,
        }
    }

    /// SQL spelling, for explain output
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Is => "IS",
            BinaryOp::IsNot => "IS NOT",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
            BinaryOp::Concat => "||",
        }
    }
}

/// Right-hand side of IN
#[derive(Debug, Clone, PartialEq)]
pub enum InList {
    Values(Vec<Expr>),
    Subquery(Box<Subquery>),
}

/// LIKE operator type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeOp {
    Like,
    Glob,
    Regexp,
    Match,
}

impl LikeOp {
    pub fn function_name(&self) -> &'static str {
        match self {
            LikeOp::Like => "like",
            LikeOp::Glob => "glob",
            LikeOp::Regexp => "regexp",
            LikeOp::Match => "match",
        }
    }
}

/// Function call
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<Expr>,
}

impl FunctionCall {
    /// Truth probability hint for likely()/unlikely()/likelihood(), as a
    /// value in 0.0..=1.0
    pub fn likelihood(&self) -> Option<f64> {
        if self.name.eq_ignore_ascii_case("unlikely") && self.args.len() == 1 {
            Some(0.0625)
        } else if self.name.eq_ignore_ascii_case("likely") && self.args.len() == 1 {
            Some(0.9375)
        } else if self.name.eq_ignore_ascii_case("likelihood") && self.args.len() == 2 {
            match self.args[1].constant_value() {
                Some(Value::Real(p)) if (0.0..=1.0).contains(&p) => Some(p),
                _ => None,
            }
        } else {
            None
        }
    }
}

/// A subquery as the planner sees it: already compiled elsewhere, known by
/// id, with a size estimate and the outer columns it reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    /// Identifier of the compiled subquery program
    pub id: u32,
    /// Number of result columns
    pub n_column: usize,
    /// Estimated number of result rows
    pub est_rows: u64,
    /// Affinity of the (first) result column
    pub affinity: Affinity,
    /// Outer-query column references the subquery uses
    pub correlated: Vec<Expr>,
}

impl Subquery {
    pub fn new(id: u32, est_rows: u64) -> Self {
        Subquery {
            id,
            n_column: 1,
            est_rows,
            affinity: Affinity::Blob,
            correlated: Vec::new(),
        }
    }
}

// ============================================================================
// FROM clause
// ============================================================================

bitflags::bitflags! {
    /// Join type flags - matches the engine's JT_* flags
    ///
    /// The flags on an item describe the join between that item and the
    /// item before it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct JoinFlags: u8 {
        /// Any kind of inner or cross join (JT_INNER)
        const INNER   = 0x01;
        /// Explicit use of the CROSS keyword (JT_CROSS)
        const CROSS   = 0x02;
        /// True for a "natural" join (JT_NATURAL)
        const NATURAL = 0x04;
        /// Left outer join (JT_LEFT)
        const LEFT    = 0x08;
        /// Right outer join (JT_RIGHT)
        const RIGHT   = 0x10;
        /// The "OUTER" keyword is present (JT_OUTER)
        const OUTER   = 0x20;
    }
}

impl JoinFlags {
    pub fn is_left(&self) -> bool {
        self.contains(JoinFlags::LEFT)
    }

    /// LEFT and CROSS joins fix the relative order of the two tables
    pub fn fixes_order(&self) -> bool {
        self.intersects(JoinFlags::LEFT | JoinFlags::CROSS)
    }
}

/// INDEXED BY clause
#[derive(Debug, Clone, PartialEq)]
pub enum IndexedBy {
    /// INDEXED BY index_name
    Index(String),
    /// NOT INDEXED
    NotIndexed,
}

/// One resolved FROM-clause item
#[derive(Debug, Clone)]
pub struct SrcItem {
    pub table: Arc<Table>,
    pub alias: Option<String>,
    /// Cursor number assigned to the table by the caller
    pub cursor: i32,
    /// Join with the previous item
    pub join_type: JoinFlags,
    /// ON clause, for joins that carry one
    pub on_clause: Option<Expr>,
    pub indexed_by: Option<IndexedBy>,
    /// Bitmask of columns the statement reads; bit 63 stands for every
    /// column past the 63rd
    pub col_used: u64,
    /// Arguments of a table-valued function, bound to hidden columns
    pub func_args: Vec<Expr>,
}

impl SrcItem {
    pub fn new(table: Arc<Table>, cursor: i32) -> Self {
        SrcItem {
            table,
            alias: None,
            cursor,
            join_type: JoinFlags::empty(),
            on_clause: None,
            indexed_by: None,
            col_used: 0,
            func_args: Vec::new(),
        }
    }

    /// Name used in explain output
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table.name)
    }

    /// Record that column `column` is read by the statement
    pub fn use_column(&mut self, column: i32) {
        if column >= 0 {
            self.col_used |= 1u64 << (column as u32).min(63);
        }
    }

    /// Record every column of this item referenced by `expr`
    pub fn use_columns_of(&mut self, expr: &Expr) {
        let cursor = self.cursor;
        let mut cols = Vec::new();
        expr.walk(&mut |e| {
            if let Expr::Column(c) = e {
                if c.cursor == cursor {
                    cols.push(c.column);
                }
            }
        });
        cols.into_iter().for_each(|c| self.use_column(c));
    }
}

/// Ordered FROM clause
#[derive(Debug, Clone, Default)]
pub struct SrcList {
    pub items: Vec<SrcItem>,
}

impl SrcList {
    pub fn new(items: Vec<SrcItem>) -> Self {
        SrcList { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Position of the item with the given cursor
    pub fn position_of(&self, cursor: i32) -> Option<usize> {
        self.items.iter().position(|i| i.cursor == cursor)
    }

    /// Mark every column referenced by `expr` as used by its table
    pub fn note_columns(&mut self, expr: &Expr) {
        for item in &mut self.items {
            item.use_columns_of(expr);
        }
    }
}

/// ORDER BY / GROUP BY term
#[derive(Debug, Clone, PartialEq)]
pub struct OrderingTerm {
    pub expr: Expr,
    pub order: SortOrder,
}

impl OrderingTerm {
    pub fn asc(expr: Expr) -> Self {
        OrderingTerm {
            expr,
            order: SortOrder::Asc,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        OrderingTerm {
            expr,
            order: SortOrder::Desc,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
