//! VDBE Opcodes and Instructions
//!
//! The planner emits its nested-loop program as a flat list of `VdbeOp`
//! instructions. This module defines the opcodes it uses and the operand
//! encoding. Executing the program is the virtual machine's concern.

use std::fmt;
use std::sync::Arc;

// ============================================================================
// Opcode Definitions
// ============================================================================

/// VDBE opcode (operation code)
///
/// Only the instructions the planner emits are listed. The naming follows
/// the engine's conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // ========================================================================
    // Control Flow
    // ========================================================================
    /// Do nothing (placeholder)
    Noop = 0,
    /// Initialize program state and jump to P2
    Init,
    /// Unconditional jump to P2
    Goto,
    /// Store the return address in register P1 and jump to P2
    Gosub,
    /// Jump to the address stored in register P1
    Return,
    /// Jump to P2 if register P1 is true
    If,
    /// Jump to P2 if register P1 is false (or NULL when P3 is set)
    IfNot,
    /// Jump to P2 if register P1 is positive, decrementing it by P3
    IfPos,
    /// Decrement register P1 and jump to P2 if it reached zero
    DecrJumpZero,
    /// Fall through the first time, jump to P2 on later passes
    Once,
    /// End of program
    Halt,
    /// Query plan line for EXPLAIN QUERY PLAN; no-op at run time
    Explain,
    /// Run a separately compiled subquery program (P4) into cursor P1 or register P2
    Program,

    // ========================================================================
    // Comparison
    // ========================================================================
    /// Jump to P2 if r[P3] == r[P1]
    Eq,
    /// Jump to P2 if r[P3] != r[P1]
    Ne,
    /// Jump to P2 if r[P3] < r[P1]
    Lt,
    /// Jump to P2 if r[P3] <= r[P1]
    Le,
    /// Jump to P2 if r[P3] > r[P1]
    Gt,
    /// Jump to P2 if r[P3] >= r[P1]
    Ge,
    /// Jump to P2 if register P1 is NULL
    IsNull,
    /// Jump to P2 if register P1 is not NULL
    NotNull,
    /// If cursor P1 is on a NULL row, store NULL in P3 and jump to P2
    IfNullRow,

    // ========================================================================
    // Registers
    // ========================================================================
    /// Set registers P2..P3 to NULL
    Null,
    /// Store the 32-bit integer P1 in register P2
    Integer,
    /// Store the 64-bit integer P4 in register P2
    Int64,
    /// Store the real P4 in register P2
    Real,
    /// Store the string P4 in register P2
    String8,
    /// Store the blob P4 in register P2
    Blob,
    /// Copy the value of parameter P1 into register P2
    Variable,
    /// Deep copy register P1 into P2
    Copy,
    /// Shallow copy register P1 into P2
    SCopy,
    /// Add the constant P2 to register P1
    AddImm,
    /// Convert register P1 to an integer, jumping to P2 if that is impossible
    MustBeInt,
    /// Convert an integer in register P1 to a real
    RealAffinity,
    /// Apply the affinity string P4 to P2 registers starting at P1
    Affinity,
    /// Apply affinity P2 to register P1
    Cast,
    /// Build a record from P2 registers starting at P1 into register P3
    MakeRecord,

    // ========================================================================
    // Arithmetic and Logic
    // ========================================================================
    /// r[P3] = r[P2] + r[P1]
    Add,
    /// r[P3] = r[P2] - r[P1]
    Subtract,
    /// r[P3] = r[P2] * r[P1]
    Multiply,
    /// r[P3] = r[P2] / r[P1]
    Divide,
    /// r[P3] = r[P2] % r[P1]
    Remainder,
    /// r[P3] = r[P2] || r[P1]
    Concat,
    /// r[P3] = r[P1] & r[P2]
    BitAnd,
    /// r[P3] = r[P1] | r[P2]
    BitOr,
    /// r[P3] = r[P2] << r[P1]
    ShiftLeft,
    /// r[P3] = r[P2] >> r[P1]
    ShiftRight,
    /// r[P3] = r[P1] AND r[P2]
    And,
    /// r[P3] = r[P1] OR r[P2]
    Or,
    /// r[P2] = NOT r[P1]
    Not,
    /// r[P2] = ~r[P1]
    BitNot,
    /// r[P2] = truth value of r[P1] (P3 is the NULL result, P4 inverts)
    IsTrue,
    /// Call function P4 with arguments starting at P2, result in P3
    Function,

    // ========================================================================
    // Cursors
    // ========================================================================
    /// Open a read cursor P1 on the b-tree rooted at page P2
    OpenRead,
    /// Open a read/write cursor P1 on the b-tree rooted at page P2
    OpenWrite,
    /// Reopen index cursor P1 unless it is already open on the same root
    ReopenIdx,
    /// Open an ephemeral index cursor P1 for an automatic index
    OpenAutoindex,
    /// Open an ephemeral table or index cursor P1
    OpenEphemeral,
    /// Close cursor P1
    Close,
    /// Record the columns cursor P1 will read (P4)
    ColumnsUsed,
    /// Move cursor P1 to its first entry, jumping to P2 if empty
    Rewind,
    /// Move cursor P1 to its last entry, jumping to P2 if empty
    Last,
    /// Advance cursor P1, jumping to P2 if there is another entry
    Next,
    /// Move cursor P1 back, jumping to P2 if there is another entry
    Prev,
    /// Move cursor P1 to rowid r[P3], jumping to P2 if not found
    SeekRowid,
    /// Move cursor P1 to rowid r[P3], jumping to P2 if not found
    NotExists,
    /// Move cursor P1 to the first entry >= key, jump to P2 if none
    SeekGE,
    /// Move cursor P1 to the first entry > key, jump to P2 if none
    SeekGT,
    /// Move cursor P1 to the last entry <= key, jump to P2 if none
    SeekLE,
    /// Move cursor P1 to the last entry < key, jump to P2 if none
    SeekLT,
    /// Set the seek-hit flag of cursor P1 to P2
    SeekHit,
    /// Jump to P2 if cursor P1 cannot contain the key
    IfNoHope,
    /// Jump to P2 if the key is in index cursor P1
    Found,
    /// Jump to P2 if the key is not in index cursor P1
    NotFound,
    /// Jump to P2 if the index key at P1 >= key
    IdxGE,
    /// Jump to P2 if the index key at P1 > key
    IdxGT,
    /// Jump to P2 if the index key at P1 <= key
    IdxLE,
    /// Jump to P2 if the index key at P1 < key
    IdxLT,
    /// Store the rowid of index cursor P1 in register P2
    IdxRowid,
    /// Insert record r[P2] into index cursor P1
    IdxInsert,
    /// Defer moving table cursor P3 to the rowid of index cursor P1
    DeferredSeek,
    /// Read column P2 of cursor P1 into register P3
    Column,
    /// Store the rowid of cursor P1 in register P2
    Rowid,
    /// Move cursor P1 onto a NULL row
    NullRow,

    // ========================================================================
    // Row Sets
    // ========================================================================
    /// Jump to P2 if r[P3] is in rowset P1; insert it unless P4 is -1
    RowSetTest,
    /// Insert r[P2] into rowset P1
    RowSetAdd,

    // ========================================================================
    // Virtual Tables
    // ========================================================================
    /// Open virtual table cursor P1 on the table in P4
    VOpen,
    /// Start virtual table cursor P1 with plan P4, args at P3; jump to P2 if empty
    VFilter,
    /// Advance virtual table cursor P1, jumping to P2 on another row
    VNext,
    /// Read column P2 of virtual table cursor P1 into register P3
    VColumn,
}

impl Opcode {
    /// Check if this opcode is a jump instruction (P2 is an address)
    pub fn is_jump(&self) -> bool {
        matches!(
            self,
            Opcode::Init
                | Opcode::Goto
                | Opcode::Gosub
                | Opcode::If
                | Opcode::IfNot
                | Opcode::IfPos
                | Opcode::DecrJumpZero
                | Opcode::Once
                | Opcode::Eq
                | Opcode::Ne
                | Opcode::Lt
                | Opcode::Le
                | Opcode::Gt
                | Opcode::Ge
                | Opcode::IsNull
                | Opcode::NotNull
                | Opcode::IfNullRow
                | Opcode::MustBeInt
                | Opcode::Rewind
                | Opcode::Last
                | Opcode::Next
                | Opcode::Prev
                | Opcode::SeekRowid
                | Opcode::NotExists
                | Opcode::SeekGE
                | Opcode::SeekGT
                | Opcode::SeekLE
                | Opcode::SeekLT
                | Opcode::IfNoHope
                | Opcode::Found
                | Opcode::NotFound
                | Opcode::IdxGE
                | Opcode::IdxGT
                | Opcode::IdxLE
                | Opcode::IdxLT
                | Opcode::RowSetTest
                | Opcode::VFilter
                | Opcode::VNext
        )
    }

    /// Check if this opcode uses a cursor reference in P1
    pub fn uses_cursor(&self) -> bool {
        matches!(
            self,
            Opcode::OpenRead
                | Opcode::OpenWrite
                | Opcode::ReopenIdx
                | Opcode::OpenAutoindex
                | Opcode::OpenEphemeral
                | Opcode::Close
                | Opcode::ColumnsUsed
                | Opcode::Rewind
                | Opcode::Last
                | Opcode::Next
                | Opcode::Prev
                | Opcode::SeekRowid
                | Opcode::NotExists
                | Opcode::SeekGE
                | Opcode::SeekGT
                | Opcode::SeekLE
                | Opcode::SeekLT
                | Opcode::SeekHit
                | Opcode::IfNoHope
                | Opcode::Found
                | Opcode::NotFound
                | Opcode::IdxGE
                | Opcode::IdxGT
                | Opcode::IdxLE
                | Opcode::IdxLT
                | Opcode::IdxRowid
                | Opcode::IdxInsert
                | Opcode::DeferredSeek
                | Opcode::Column
                | Opcode::Rowid
                | Opcode::NullRow
                | Opcode::IfNullRow
                | Opcode::VOpen
                | Opcode::VFilter
                | Opcode::VNext
                | Opcode::VColumn
        )
    }

    /// Get opcode name as string
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Noop => "Noop",
            Opcode::Init => "Init",
            Opcode::Goto => "Goto",
            Opcode::Gosub => "Gosub",
            Opcode::Return => "Return",
            Opcode::If => "If",
            Opcode::IfNot => "IfNot",
            Opcode::IfPos => "IfPos",
            Opcode::DecrJumpZero => "DecrJumpZero",
            Opcode::Once => "Once",
            Opcode::Halt => "Halt",
            Opcode::Explain => "Explain",
            Opcode::Program => "Program",
            Opcode::Eq => "Eq",
            Opcode::Ne => "Ne",
            Opcode::Lt => "Lt",
            Opcode::Le => "Le",
            Opcode::Gt => "Gt",
            Opcode::Ge => "Ge",
            Opcode::IsNull => "IsNull",
            Opcode::NotNull => "NotNull",
            Opcode::IfNullRow => "IfNullRow",
            Opcode::Null => "Null",
            Opcode::Integer => "Integer",
            Opcode::Int64 => "Int64",
            Opcode::Real => "Real",
            Opcode::String8 => "String8",
            Opcode::Blob => "Blob",
            Opcode::Variable => "Variable",
            Opcode::Copy => "Copy",
            Opcode::SCopy => "SCopy",
            Opcode::AddImm => "AddImm",
            Opcode::MustBeInt => "MustBeInt",
            Opcode::RealAffinity => "RealAffinity",
            Opcode::Affinity => "Affinity",
            Opcode::Cast => "Cast",
            Opcode::MakeRecord => "MakeRecord",
            Opcode::Add => "Add",
            Opcode::Subtract => "Subtract",
            Opcode::Multiply => "Multiply",
            Opcode::Divide => "Divide",
            Opcode::Remainder => "Remainder",
            Opcode::Concat => "Concat",
            Opcode::BitAnd => "BitAnd",
            Opcode::BitOr => "BitOr",
            Opcode::ShiftLeft => "ShiftLeft",
            Opcode::ShiftRight => "ShiftRight",
            Opcode::And => "And",
            Opcode::Or => "Or",
            Opcode::Not => "Not",
            Opcode::BitNot => "BitNot",
            Opcode::IsTrue => "IsTrue",
            Opcode::Function => "Function",
            Opcode::OpenRead => "OpenRead",
            Opcode::OpenWrite => "OpenWrite",
            Opcode::ReopenIdx => "ReopenIdx",
            Opcode::OpenAutoindex => "OpenAutoindex",
            Opcode::OpenEphemeral => "OpenEphemeral",
            Opcode::Close => "Close",
            Opcode::ColumnsUsed => "ColumnsUsed",
            Opcode::Rewind => "Rewind",
            Opcode::Last => "Last",
            Opcode::Next => "Next",
            Opcode::Prev => "Prev",
            Opcode::SeekRowid => "SeekRowid",
            Opcode::NotExists => "NotExists",
            Opcode::SeekGE => "SeekGE",
            Opcode::SeekGT => "SeekGT",
            Opcode::SeekLE => "SeekLE",
            Opcode::SeekLT => "SeekLT",
            Opcode::SeekHit => "SeekHit",
            Opcode::IfNoHope => "IfNoHope",
            Opcode::Found => "Found",
            Opcode::NotFound => "NotFound",
            Opcode::IdxGE => "IdxGE",
            Opcode::IdxGT => "IdxGT",
            Opcode::IdxLE => "IdxLE",
            Opcode::IdxLT => "IdxLT",
            Opcode::IdxRowid => "IdxRowid",
            Opcode::IdxInsert => "IdxInsert",
            Opcode::DeferredSeek => "DeferredSeek",
            Opcode::Column => "Column",
            Opcode::Rowid => "Rowid",
            Opcode::NullRow => "NullRow",
            Opcode::RowSetTest => "RowSetTest",
            Opcode::RowSetAdd => "RowSetAdd",
            Opcode::VOpen => "VOpen",
            Opcode::VFilter => "VFilter",
            Opcode::VNext => "VNext",
            Opcode::VColumn => "VColumn",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// P4 Union Type
// ============================================================================

/// P4 operand - can hold various types of data
#[derive(Debug, Clone, PartialEq, Default)]
pub enum P4 {
    /// Not used
    #[default]
    Unused,
    /// 64-bit integer
    Int64(i64),
    /// Real number
    Real(f64),
    /// Text string
    Text(String),
    /// Binary blob
    Blob(Vec<u8>),
    /// Collation sequence name
    Collation(String),
    /// Function name and argument count
    FuncDef(String, usize),
    /// Key info for comparison
    KeyInfo(Arc<KeyInfo>),
    /// Affinity string, one code per register
    Affinity(String),
    /// Table name (for cursors opened on tables)
    Table(String),
    /// Index name (for cursors opened on indexes)
    Index(String),
    /// Identifier of an externally compiled subquery program
    Subquery(u32),
}

impl P4 {
    /// Check if P4 is unused
    pub fn is_unused(&self) -> bool {
        matches!(self, P4::Unused)
    }
}

// ============================================================================
// Key Info
// ============================================================================

/// Key comparison information
#[derive(Debug, Clone, PartialEq)]
pub struct KeyInfo {
    /// Collation sequences for each key column
    pub collations: Vec<String>,
    /// Sort orders for each key column (true = descending)
    pub sort_orders: Vec<bool>,
    /// Number of key columns
    pub n_key_field: u16,
}

impl KeyInfo {
    pub fn new(n_fields: usize) -> Self {
        Self {
            collations: vec!["BINARY".to_string(); n_fields],
            sort_orders: vec![false; n_fields],
            n_key_field: n_fields as u16,
        }
    }
}

// ============================================================================
// VDBE Instruction
// ============================================================================

/// A single VDBE instruction
#[derive(Debug, Clone, PartialEq)]
pub struct VdbeOp {
    /// Operation code
    pub opcode: Opcode,
    /// First operand (usually register or cursor)
    pub p1: i32,
    /// Second operand (usually jump target or register)
    pub p2: i32,
    /// Third operand
    pub p3: i32,
    /// Fourth operand (type varies by opcode)
    pub p4: P4,
    /// Fifth operand (flags/extra info)
    pub p5: u16,
    /// Comment for debugging/explain
    pub comment: Option<String>,
}

impl VdbeOp {
    /// Create a new instruction with minimal operands
    pub fn new(opcode: Opcode, p1: i32, p2: i32, p3: i32) -> Self {
        Self {
            opcode,
            p1,
            p2,
            p3,
            p4: P4::Unused,
            p5: 0,
            comment: None,
        }
    }

    /// Create instruction with P4
    pub fn with_p4(opcode: Opcode, p1: i32, p2: i32, p3: i32, p4: P4) -> Self {
        Self {
            opcode,
            p1,
            p2,
            p3,
            p4,
            p5: 0,
            comment: None,
        }
    }

    /// Set comment for debugging
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Set P5 flags
    pub fn with_p5(mut self, p5: u16) -> Self {
        self.p5 = p5;
        self
    }
}

impl fmt::Display for VdbeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<12} {:>4} {:>4} {:>4}",
            self.opcode.name(),
            self.p1,
            self.p2,
            self.p3
        )?;

        match &self.p4 {
            P4::Unused => {}
            P4::Int64(i) => write!(f, "  {}", i)?,
            P4::Real(r) => write!(f, "  {}", r)?,
            P4::Text(s) => write!(f, "  \"{}\"", s)?,
            P4::Blob(b) => write!(f, "  x'{}'", hex::encode(b))?,
            P4::Collation(c) => write!(f, "  collseq({})", c)?,
            P4::FuncDef(n, argc) => write!(f, "  func({}/{})", n, argc)?,
            P4::KeyInfo(k) => write!(f, "  k({} cols)", k.n_key_field)?,
            P4::Affinity(a) => write!(f, "  aff({})", a)?,
            P4::Table(t) => write!(f, "  table({})", t)?,
            P4::Index(i) => write!(f, "  index({})", i)?,
            P4::Subquery(id) => write!(f, "  subquery({})", id)?,
        }

        if self.p5 != 0 {
            write!(f, "  p5={:#x}", self.p5)?;
        }

        if let Some(ref comment) = self.comment {
            write!(f, "  ; {}", comment)?;
        }

        Ok(())
    }
}

// ============================================================================
// Comparison Flags (P5)
// ============================================================================

/// Comparison flags for P5 operand
pub mod cmp_flags {
    /// NULL values compare equal
    pub const NULLEQ: u16 = 0x80;
    /// Jump if either operand is NULL
    pub const JUMPIFNULL: u16 = 0x10;
    /// Comparison result stored in register
    pub const STOREP2: u16 = 0x20;
    /// Affinity mask
    pub const AFFINITY_MASK: u16 = 0x0F;
}

/// Affinity values for P5
pub mod affinity {
    pub const BLOB: u16 = 0x01;
    pub const TEXT: u16 = 0x02;
    pub const NUMERIC: u16 = 0x03;
    pub const INTEGER: u16 = 0x04;
    pub const REAL: u16 = 0x05;
}

/// P5 flag on seek opcodes: the seek is an equality lookup (OPFLAG_SEEKEQ)
pub const SEEK_EQ: u16 = 0x02;

/// P5 flag on Column: read for a LEFT JOIN null check only
pub const COLUMN_NULLCHECK: u16 = 0x40;

// ============================================================================
// Tests
// ============================================================================
