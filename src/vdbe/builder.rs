//! Program builder
//!
//! The emission interface the planner writes through: it owns the growing
//! instruction list, hands out registers, cursors and forward-jump labels,
//! and patches label references once their addresses are known.

use crate::error::{Error, ErrorCode, Result};

use super::ops::{Opcode, VdbeOp, P4};

/// A finished program
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub ops: Vec<VdbeOp>,
    /// Number of registers used (registers are numbered from 1)
    pub n_mem: i32,
    /// Number of cursors used
    pub n_cursor: i32,
}

impl Program {
    /// Render the program as an EXPLAIN-style listing
    pub fn listing(&self) -> String {
        self.ops
            .iter()
            .enumerate()
            .map(|(addr, op)| format!("{:>4}  {}\n", addr, op))
            .collect()
    }
}

/// Incremental program builder
#[derive(Debug, Clone, Default)]
pub struct ProgramBuilder {
    /// Generated instructions
    ops: Vec<VdbeOp>,
    /// Registers allocated so far
    n_mem: i32,
    /// Cursors allocated so far
    n_cursor: i32,
    /// Label targets. Label `-1 - i` resolves to `labels[i]`.
    labels: Vec<Option<i32>>,
    /// Cursors opened on virtual tables; columns are read with VColumn
    virtual_cursors: Vec<i32>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder whose first `n` cursor numbers are already taken by the
    /// caller's FROM-clause items
    pub fn with_cursors(n: i32) -> Self {
        ProgramBuilder {
            n_cursor: n,
            ..Self::default()
        }
    }

    // ========================================================================
    // Resources
    // ========================================================================

    /// Allocate a new register
    pub fn alloc_reg(&mut self) -> i32 {
        self.n_mem += 1;
        self.n_mem
    }

    /// Allocate `count` consecutive registers and return the first
    pub fn alloc_regs(&mut self, count: i32) -> i32 {
        let first = self.n_mem + 1;
        self.n_mem += count.max(0);
        first
    }

    /// Allocate a cursor number
    pub fn alloc_cursor(&mut self) -> i32 {
        let cursor = self.n_cursor;
        self.n_cursor += 1;
        cursor
    }

    /// Note that `cursor` reads a virtual table
    pub fn mark_virtual_cursor(&mut self, cursor: i32) {
        if !self.virtual_cursors.contains(&cursor) {
            self.virtual_cursors.push(cursor);
        }
    }

    pub fn is_virtual_cursor(&self, cursor: i32) -> bool {
        self.virtual_cursors.contains(&cursor)
    }

    pub fn n_mem(&self) -> i32 {
        self.n_mem
    }

    pub fn n_cursor(&self) -> i32 {
        self.n_cursor
    }

    // ========================================================================
    // Labels
    // ========================================================================

    /// Create a new label for a forward jump. Labels are negative numbers
    /// placed in P2 until resolved.
    pub fn make_label(&mut self) -> i32 {
        self.labels.push(None);
        -(self.labels.len() as i32)
    }

    /// Resolve a label to the address of the next instruction
    pub fn resolve_label(&mut self, label: i32) {
        let addr = self.current_addr();
        if let Some(slot) = Self::label_slot(label).and_then(|i| self.labels.get_mut(i)) {
            *slot = Some(addr);
        }
    }

    /// Address a label resolved to, if it has been resolved
    pub fn label_address(&self, label: i32) -> Option<i32> {
        Self::label_slot(label).and_then(|i| self.labels.get(i).copied().flatten())
    }

    fn label_slot(label: i32) -> Option<usize> {
        if label < 0 {
            Some((-1 - label) as usize)
        } else {
            None
        }
    }

    // ========================================================================
    // Instructions
    // ========================================================================

    /// Address the next instruction will have
    pub fn current_addr(&self) -> i32 {
        self.ops.len() as i32
    }

    /// Add an instruction and return its address
    pub fn add_op(&mut self, opcode: Opcode, p1: i32, p2: i32, p3: i32) -> i32 {
        let addr = self.current_addr();
        self.ops.push(VdbeOp::new(opcode, p1, p2, p3));
        addr
    }

    /// Add an instruction with P4 and return its address
    pub fn add_op4(&mut self, opcode: Opcode, p1: i32, p2: i32, p3: i32, p4: P4) -> i32 {
        let addr = self.current_addr();
        self.ops.push(VdbeOp::with_p4(opcode, p1, p2, p3, p4));
        addr
    }

    /// Set P5 of the most recent instruction
    pub fn change_p5(&mut self, p5: u16) {
        if let Some(op) = self.ops.last_mut() {
            op.p5 = p5;
        }
    }

    /// Attach a comment to the most recent instruction
    pub fn comment(&mut self, text: impl Into<String>) {
        if let Some(op) = self.ops.last_mut() {
            op.comment = Some(text.into());
        }
    }

    pub fn change_p1(&mut self, addr: i32, p1: i32) {
        if let Some(op) = self.op_mut(addr) {
            op.p1 = p1;
        }
    }

    pub fn change_p2(&mut self, addr: i32, p2: i32) {
        if let Some(op) = self.op_mut(addr) {
            op.p2 = p2;
        }
    }

    pub fn change_p3(&mut self, addr: i32, p3: i32) {
        if let Some(op) = self.op_mut(addr) {
            op.p3 = p3;
        }
    }

    /// Make the jump at `addr` target the next instruction
    pub fn jump_here(&mut self, addr: i32) {
        let here = self.current_addr();
        self.change_p2(addr, here);
    }

    /// Turn the instruction at `addr` into a no-op
    pub fn change_to_noop(&mut self, addr: i32) {
        if let Some(op) = self.op_mut(addr) {
            *op = VdbeOp::new(Opcode::Noop, 0, 0, 0);
        }
    }

    pub fn op(&self, addr: i32) -> Option<&VdbeOp> {
        usize::try_from(addr).ok().and_then(|i| self.ops.get(i))
    }

    pub fn op_mut(&mut self, addr: i32) -> Option<&mut VdbeOp> {
        usize::try_from(addr).ok().and_then(move |i| self.ops.get_mut(i))
    }

    pub fn ops(&self) -> &[VdbeOp] {
        &self.ops
    }

    /// Mutable access to the instructions in `start..` for rewriting
    pub fn ops_from_mut(&mut self, start: i32) -> &mut [VdbeOp] {
        let start = usize::try_from(start).unwrap_or(0).min(self.ops.len());
        &mut self.ops[start..]
    }

    /// Patch every label reference whose label has been resolved
    pub fn resolve_labels(&mut self) {
        let labels = &self.labels;
        for op in &mut self.ops {
            if op.opcode.is_jump() && op.p2 < 0 {
                if let Some(Some(addr)) = Self::label_slot(op.p2).and_then(|i| labels.get(i)) {
                    op.p2 = *addr;
                }
            }
        }
    }

    /// Resolve all labels and return the program. Fails if a jump still
    /// refers to an unresolved label.
    pub fn finish(mut self) -> Result<Program> {
        self.resolve_labels();
        if let Some((addr, op)) = self
            .ops
            .iter()
            .enumerate()
            .find(|(_, op)| op.opcode.is_jump() && op.p2 < 0)
        {
            return Err(Error::with_message(
                ErrorCode::Internal,
                format!("unresolved label {} at address {} ({})", op.p2, addr, op.opcode),
            ));
        }
        Ok(Program {
            ops: self.ops,
            n_mem: self.n_mem,
            n_cursor: self.n_cursor,
        })
    }
}
