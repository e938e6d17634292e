//! The stack machine.
//!
//! A [`Machine`] owns the operand stack, linear memory, globals and tables
//! of one instantiated module and interprets instruction trees against
//! them. Structured control flow runs on an explicit label stack: entering
//! a block, loop or if pushes a label recording the operand stack height
//! and result arity, and a branch trims the operand stack to that height
//! while keeping the label's results on top.

use std::sync::Arc;

use log::{debug, trace, warn};

use crate::{
    frame::Frame,
    global::Global,
    host::HostFunc,
    ir::{
        BlockType, F32BinOp, F64BinOp, FuncBody, Function, I32BinOp, I64BinOp, Instruction,
        LoadOp, MemArg, NullaryOp, SatOp, StoreOp, UnaryOp,
    },
    memory::{effective_address, Memory},
    module::Module,
    numeric,
    runtime::Config,
    stack::OperandStack,
    table::Table,
    trap::{ExecError, ExecResult, Result, Trap},
    types::{FuncType, Val, ValType},
};

// ── Labels ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelKind {
    Function,
    Block,
    Loop,
    If,
}

#[derive(Debug, Clone, Copy)]
struct Label {
    kind: LabelKind,
    /// Operand stack height when the construct was entered.
    height: usize,
    /// Values the construct leaves behind.
    arity: usize,
}

impl Label {
    /// Values carried by a branch to this label. Branching to a loop
    /// restarts it, so nothing is carried.
    fn branch_arity(&self) -> usize {
        match self.kind {
            LabelKind::Loop => 0,
            _ => self.arity,
        }
    }
}

/// One entry of the control stack: the sequence being run and where.
struct Ctrl<'c> {
    code: &'c [Instruction],
    pc: usize,
    label: Label,
}

/// A guest call running inside the dispatch loop.
struct Activation {
    frame: Frame,
    /// Operand stack height once the arguments were taken.
    base: usize,
    arity: usize,
    /// Position of the callee's function label in the control stack.
    label_index: usize,
    index: u32,
}

/// What the dispatch loop does after an instruction.
enum Flow<'c> {
    Next,
    Enter(&'c [Instruction], Label),
    Branch(u32),
    Return,
    Call(u32),
    CallIndirect { type_index: u32, table_index: u32 },
}

// ── Machine ──────────────────────────────────────────────────────────────────

/// A live instantiation of a module.
pub struct Machine {
    stack: OperandStack,
    memory: Memory,
    globals: Vec<Global>,
    tables: Vec<Table>,
    types: Vec<FuncType>,
    functions: Arc<Vec<Function>>,
    exports: Vec<(String, u32)>,
    max_call_depth: usize,
    depth: usize,
}

impl Machine {
    pub fn new(module: &Module, config: &Config) -> Result<Self> {
        let max_pages = match (module.max_memory_pages, config.max_memory_pages) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let mut memory = Memory::new(module.initial_memory_pages, max_pages);
        for (offset, bytes) in &module.data_segments {
            memory.store(u64::from(*offset), bytes)?;
        }
        Ok(Machine {
            stack: OperandStack::with_capacity(config.stack_capacity),
            memory,
            globals: module.globals.clone(),
            tables: module.tables.clone(),
            types: module.types.clone(),
            functions: Arc::new(module.functions.clone()),
            exports: module.exports.clone(),
            max_call_depth: config.max_call_depth,
            depth: 0,
        })
    }

    // ── Operand stack ────────────────────────────────────────────────────────

    pub fn push(&mut self, cell: u64) {
        self.stack.push(cell);
    }

    pub fn pop(&mut self) -> Result<u64> {
        self.stack.pop()
    }

    pub fn push_i32(&mut self, v: i32) {
        self.stack.push_i32(v);
    }

    pub fn push_i64(&mut self, v: i64) {
        self.stack.push_i64(v);
    }

    pub fn push_f32(&mut self, v: f32) {
        self.stack.push_f32(v);
    }

    pub fn push_f64(&mut self, v: f64) {
        self.stack.push_f64(v);
    }

    pub fn pop_i32(&mut self) -> Result<i32> {
        self.stack.pop_i32()
    }

    pub fn pop_i64(&mut self) -> Result<i64> {
        self.stack.pop_i64()
    }

    pub fn pop_f32(&mut self) -> Result<f32> {
        self.stack.pop_f32()
    }

    pub fn pop_f64(&mut self) -> Result<f64> {
        self.stack.pop_f64()
    }

    pub fn drop_keep(&mut self, drop: usize, keep: usize) -> Result<()> {
        self.stack.drop_keep(drop, keep)
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    // ── Memory, globals, tables ──────────────────────────────────────────────

    pub fn load(&self, address: u64, len: usize) -> Result<&[u8]> {
        self.memory.load(address, len)
    }

    pub fn store(&mut self, address: u64, bytes: &[u8]) -> Result<()> {
        self.memory.store(address, bytes)
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn global(&self, index: u32) -> Result<Val> {
        self.globals
            .get(index as usize)
            .map(Global::value)
            .ok_or(Trap::UndefinedGlobal(index))
    }

    /// Host-side write. Immutable globals and mistyped values are refused.
    pub fn set_global(&mut self, index: u32, val: Val) -> Result<()> {
        let g = self.globals.get_mut(index as usize).ok_or(Trap::UndefinedGlobal(index))?;
        if !g.mutable {
            return Err(Trap::ImmutableGlobal(index));
        }
        if g.ty != val.ty() {
            return Err(Trap::ArgumentMismatch(g.ty.to_string()));
        }
        g.set_bits(val.to_bits());
        Ok(())
    }

    pub fn table(&self, index: u32) -> Result<&Table> {
        self.tables.get(index as usize).ok_or(Trap::UndefinedTable(index))
    }

    pub fn table_mut(&mut self, index: u32) -> Result<&mut Table> {
        self.tables.get_mut(index as usize).ok_or(Trap::UndefinedTable(index))
    }

    pub fn find_export(&self, name: &str) -> Option<u32> {
        self.exports.iter().find(|(n, _)| n == name).map(|(_, idx)| *idx)
    }

    // ── Calls ────────────────────────────────────────────────────────────────

    /// Calls an exported function with typed arguments.
    pub fn invoke(&mut self, name: &str, args: &[Val]) -> ExecResult<Vec<Val>> {
        let index = self
            .find_export(name)
            .ok_or_else(|| Trap::UndefinedExport(name.into()))?;
        let func = self
            .functions
            .get(index as usize)
            .ok_or(Trap::UndefinedFunction(index))?;
        let params = &func.ty.params;
        if args.len() != params.len() || args.iter().zip(params).any(|(a, &ty)| a.ty() != ty) {
            return Err(Trap::ArgumentMismatch(func.ty.to_string()).into());
        }

        let base = self.stack.len();
        for arg in args {
            self.stack.push(arg.to_bits());
        }
        let out = self.call(index);
        if out.is_err() {
            self.stack.truncate(base);
        }
        out
    }

    /// Calls function `index` with its arguments already on the stack and
    /// returns its results in declaration order.
    pub fn call(&mut self, index: u32) -> ExecResult<Vec<Val>> {
        let results = self
            .functions
            .get(index as usize)
            .ok_or(Trap::UndefinedFunction(index))?
            .ty
            .results
            .clone();
        self.call_function(index)?;
        Ok(self.pop_vals(&results)?)
    }

    /// Pops a slot index and calls the function stored there in table
    /// `table_index`, which must have exactly the signature `declared`.
    pub fn call_indirect(&mut self, table_index: u32, declared: &FuncType) -> ExecResult<Vec<Val>> {
        let slot = self.stack.pop_i32()? as u32;
        let index = self.resolve_indirect(table_index, slot, declared)?;
        self.call(index)
    }

    fn resolve_indirect(&self, table_index: u32, slot: u32, declared: &FuncType) -> Result<u32> {
        let index = self
            .table(table_index)?
            .get(slot)?
            .ok_or(Trap::UninitializedElement(slot))?;
        let func = self
            .functions
            .get(index as usize)
            .ok_or(Trap::UndefinedFunction(index))?;
        if func.ty != *declared {
            return Err(Trap::IndirectCallTypeMismatch);
        }
        Ok(index)
    }

    /// Runs function `index`, leaving its results on the stack.
    fn call_function(&mut self, index: u32) -> ExecResult<()> {
        let functions = Arc::clone(&self.functions);
        let func = functions
            .get(index as usize)
            .ok_or(Trap::UndefinedFunction(index))?;

        match &func.body {
            FuncBody::Host(host) => Ok(self.call_host(host, &func.name)?),
            FuncBody::Code(code) => {
                if self.depth >= self.max_call_depth {
                    return Err(Trap::CallStackExhausted.into());
                }
                let mut frame = Frame::enter(&mut self.stack, &func.ty.params, &func.locals)?;
                debug!("enter {} (depth {})", func.name, self.depth);

                let base = self.stack.len();
                self.depth += 1;
                let outcome = self.execute(code, &mut frame);
                self.depth -= 1;
                if let Err(e) = outcome {
                    warn!("function {index} unwound: {e}");
                    return Err(e);
                }
                self.unwind_to(base, func.ty.results.len())?;
                debug!("exit function {index}");
                Ok(())
            }
        }
    }

    fn call_host(&mut self, host: &HostFunc, name: &str) -> Result<()> {
        trace!("host call {name}");
        let args = self.pop_vals(&host.ty().params)?;
        for v in host.invoke(&args)? {
            self.stack.push(v.to_bits());
        }
        Ok(())
    }

    /// Starts a call from inside `execute`. Host functions run to
    /// completion here; guest functions get an activation and a function
    /// label, and the dispatch loop carries on in their body.
    fn enter_call<'c>(
        &mut self,
        functions: &'c [Function],
        index: u32,
        ctrl: &mut Vec<Ctrl<'c>>,
        calls: &mut Vec<Activation>,
    ) -> Result<()> {
        let func = functions.get(index as usize).ok_or(Trap::UndefinedFunction(index))?;
        match &func.body {
            FuncBody::Host(host) => self.call_host(host, &func.name),
            FuncBody::Code(code) => {
                if self.depth >= self.max_call_depth {
                    return Err(Trap::CallStackExhausted);
                }
                let frame = Frame::enter(&mut self.stack, &func.ty.params, &func.locals)?;
                let base = self.stack.len();
                let arity = func.ty.results.len();
                debug!("enter {} (depth {})", func.name, self.depth);
                self.depth += 1;
                calls.push(Activation { frame, base, arity, label_index: ctrl.len(), index });
                ctrl.push(Ctrl {
                    code: code.as_slice(),
                    pc: 0,
                    label: Label { kind: LabelKind::Function, height: base, arity },
                });
                Ok(())
            }
        }
    }

    /// Removes the function label at `idx` and everything above it. For a
    /// nested call this also completes the activation, trimming the stack
    /// to its results.
    fn leave_function(
        &mut self,
        ctrl: &mut Vec<Ctrl<'_>>,
        calls: &mut Vec<Activation>,
        idx: usize,
    ) -> Result<()> {
        ctrl.truncate(idx);
        if idx == 0 {
            return Ok(());
        }
        if let Some(act) = calls.pop() {
            self.depth -= 1;
            self.unwind_to(act.base, act.arity)?;
            debug!("exit function {}", act.index);
        }
        Ok(())
    }

    /// Pops one cell per type, first type deepest.
    fn pop_vals(&mut self, tys: &[ValType]) -> Result<Vec<Val>> {
        let cells = self.stack.top(tys.len())?;
        let vals = tys
            .iter()
            .zip(cells)
            .map(|(&ty, &bits)| Val::from_bits(ty, bits))
            .collect();
        let base = self.stack.len() - tys.len();
        self.stack.truncate(base);
        Ok(vals)
    }

    /// Trims the stack to `height`, keeping the top `keep` cells.
    fn unwind_to(&mut self, height: usize, keep: usize) -> Result<()> {
        let len = self.stack.len();
        let drop = len
            .checked_sub(height + keep)
            .ok_or(Trap::StackUnderflow { needed: height + keep, depth: len })?;
        self.stack.drop_keep(drop, keep)
    }

    // ── Interpreter ──────────────────────────────────────────────────────────

    /// Interprets `code` against `frame` as a function body. A `return`, or
    /// a branch to the outermost label, ends the sequence with its values
    /// left on the stack.
    ///
    /// Guest calls made from `code` run in this same loop on an explicit
    /// activation stack, so the native stack does not grow with guest
    /// recursion.
    pub fn execute(&mut self, code: &[Instruction], frame: &mut Frame) -> ExecResult<()> {
        let functions = Arc::clone(&self.functions);
        let mut calls = Vec::new();
        let outcome = self.run(code, frame, &functions, &mut calls);
        if !calls.is_empty() {
            warn!("trap unwound {} nested calls", calls.len());
            self.depth -= calls.len();
        }
        outcome
    }

    fn run<'c>(
        &mut self,
        code: &'c [Instruction],
        outer: &mut Frame,
        functions: &'c [Function],
        calls: &mut Vec<Activation>,
    ) -> ExecResult<()> {
        let mut ctrl: Vec<Ctrl<'c>> = Vec::with_capacity(8);
        ctrl.push(Ctrl {
            code,
            pc: 0,
            label: Label { kind: LabelKind::Function, height: self.stack.len(), arity: 0 },
        });

        while let Some(top) = ctrl.last_mut() {
            let seq = top.code;
            let offset = top.pc;
            let Some(ins) = seq.get(offset) else {
                // Natural end: the construct's results are already on top.
                let idx = ctrl.len() - 1;
                if ctrl[idx].label.kind == LabelKind::Function {
                    self.leave_function(&mut ctrl, calls, idx)?;
                } else {
                    ctrl.pop();
                }
                continue;
            };
            top.pc += 1;

            let opcode = ins.opcode();
            let at = |t: Trap| ExecError::at(t, opcode, offset);
            let frame = match calls.last_mut() {
                Some(act) => &mut act.frame,
                None => &mut *outer,
            };
            let flow = self.step(ins, frame).map_err(at)?;

            match flow {
                Flow::Next => {}
                Flow::Enter(body, label) => ctrl.push(Ctrl { code: body, pc: 0, label }),
                Flow::Branch(depth) => self.branch(&mut ctrl, calls, depth).map_err(at)?,
                Flow::Return => {
                    let idx = calls.last().map_or(0, |act| act.label_index);
                    self.leave_function(&mut ctrl, calls, idx).map_err(at)?;
                }
                Flow::Call(index) => {
                    self.enter_call(functions, index, &mut ctrl, calls).map_err(at)?
                }
                Flow::CallIndirect { type_index, table_index } => {
                    let index = self.resolve_indirect_instr(type_index, table_index).map_err(at)?;
                    self.enter_call(functions, index, &mut ctrl, calls).map_err(at)?
                }
            }
        }
        Ok(())
    }

    fn resolve_indirect_instr(&mut self, type_index: u32, table_index: u32) -> Result<u32> {
        let slot = self.stack.pop_i32()? as u32;
        let declared = self
            .types
            .get(type_index as usize)
            .ok_or(Trap::UndefinedType(type_index))?;
        self.resolve_indirect(table_index, slot, declared)
    }

    fn branch(
        &mut self,
        ctrl: &mut Vec<Ctrl<'_>>,
        calls: &mut Vec<Activation>,
        depth: u32,
    ) -> Result<()> {
        // Labels below the current function label belong to callers.
        let floor = calls.last().map_or(0, |act| act.label_index);
        let idx = ctrl
            .len()
            .checked_sub(1 + depth as usize)
            .filter(|&idx| idx >= floor)
            .ok_or(Trap::InvalidBranchDepth(depth))?;
        let label = ctrl[idx].label;
        trace!("br {depth} to {:?} label at height {}", label.kind, label.height);

        match label.kind {
            LabelKind::Function => self.leave_function(ctrl, calls, idx)?,
            LabelKind::Loop => {
                self.unwind_to(label.height, label.branch_arity())?;
                ctrl.truncate(idx + 1);
                ctrl[idx].pc = 0;
            }
            LabelKind::Block | LabelKind::If => {
                self.unwind_to(label.height, label.branch_arity())?;
                ctrl.truncate(idx);
            }
        }
        Ok(())
    }

    fn enter<'c>(&self, kind: LabelKind, ty: BlockType, body: &'c [Instruction]) -> Flow<'c> {
        let label = Label { kind, height: self.stack.len(), arity: ty.arity() };
        Flow::Enter(body, label)
    }

    fn step<'c>(&mut self, ins: &'c Instruction, frame: &mut Frame) -> Result<Flow<'c>> {
        use Instruction as I;
        match ins {
            I::Nullary(op) => return self.nullary(*op),
            I::Unary(op) => self.unary(*op)?,
            I::I32Binary(op) => self.i32_binary(*op)?,
            I::I64Binary(op) => self.i64_binary(*op)?,
            I::F32Binary(op) => self.f32_binary(*op)?,
            I::F64Binary(op) => self.f64_binary(*op)?,
            I::Saturating(op) => self.saturating(*op)?,
            I::Load(op, m) => self.exec_load(*op, *m)?,
            I::Store(op, m) => self.exec_store(*op, *m)?,

            // ── Constants ────────────────────────────────────────────────────
            I::I32Const(v) => self.stack.push_i32(*v),
            I::I64Const(v) => self.stack.push_i64(*v),
            I::F32Const(v) => self.stack.push_f32(*v),
            I::F64Const(v) => self.stack.push_f64(*v),

            // ── Variables ────────────────────────────────────────────────────
            I::Select => {
                let cond = self.stack.pop_i32()?;
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                self.stack.push(if cond != 0 { a } else { b });
            }
            I::LocalGet(i) => self.stack.push(frame.get(*i)?),
            I::LocalSet(i) => {
                let v = self.stack.pop()?;
                frame.set(*i, v)?;
            }
            I::LocalTee(i) => frame.set(*i, self.stack.peek()?)?,
            I::GlobalGet(i) => {
                let g = self.globals.get(*i as usize).ok_or(Trap::UndefinedGlobal(*i))?;
                self.stack.push(g.bits());
            }
            I::GlobalSet(i) => {
                let v = self.stack.pop()?;
                let g = self.globals.get_mut(*i as usize).ok_or(Trap::UndefinedGlobal(*i))?;
                if !g.mutable {
                    return Err(Trap::ImmutableGlobal(*i));
                }
                g.set_bits(v);
            }

            I::Call(index) => return Ok(Flow::Call(*index)),
            I::CallIndirect { type_index, table_index } => {
                return Ok(Flow::CallIndirect {
                    type_index: *type_index,
                    table_index: *table_index,
                })
            }

            // ── Control flow ─────────────────────────────────────────────────
            I::Block { ty, body } => return Ok(self.enter(LabelKind::Block, *ty, body)),
            I::Loop { ty, body } => return Ok(self.enter(LabelKind::Loop, *ty, body)),
            I::If { ty, then, otherwise } => {
                let cond = self.stack.pop_i32()?;
                let body = if cond != 0 { then } else { otherwise };
                return Ok(self.enter(LabelKind::If, *ty, body));
            }
            I::Br(depth) => return Ok(Flow::Branch(*depth)),
            I::BrIf(depth) => {
                if self.stack.pop_i32()? != 0 {
                    return Ok(Flow::Branch(*depth));
                }
            }
            I::BrTable { targets, default } => {
                let i = self.stack.pop_i32()? as u32;
                let depth = targets.get(i as usize).copied().unwrap_or(*default);
                return Ok(Flow::Branch(depth));
            }
        }
        Ok(Flow::Next)
    }

    fn nullary<'c>(&mut self, op: NullaryOp) -> Result<Flow<'c>> {
        match op {
            NullaryOp::Unreachable => return Err(Trap::Unreachable),
            NullaryOp::Nop => {}
            NullaryOp::Return => return Ok(Flow::Return),
            NullaryOp::MemorySize => self.stack.push_i32(self.memory.pages() as i32),
        }
        Ok(Flow::Next)
    }

    fn unary(&mut self, op: UnaryOp) -> Result<()> {
        use UnaryOp::*;
        let s = &mut self.stack;
        match op {
            Drop => {
                s.pop()?;
            }
            MemoryGrow => {
                let delta = s.pop_i32()? as u32 as usize;
                let old = match self.memory.grow(delta) {
                    Ok(pages) => pages as i32,
                    Err(_) => {
                        debug!("memory.grow by {delta} pages refused");
                        -1
                    }
                };
                s.push_i32(old);
            }

            // ── Integer tests and bit counts ─────────────────────────────────
            I32Eqz => {
                let a = s.pop_i32()?;
                s.push_bool(a == 0);
            }
            I64Eqz => {
                let a = s.pop_i64()?;
                s.push_bool(a == 0);
            }
            I32Clz => {
                let a = s.pop_i32()?;
                s.push_i32(a.leading_zeros() as i32);
            }
            I32Ctz => {
                let a = s.pop_i32()?;
                s.push_i32(a.trailing_zeros() as i32);
            }
            I32Popcnt => {
                let a = s.pop_i32()?;
                s.push_i32(a.count_ones() as i32);
            }
            I64Clz => {
                let a = s.pop_i64()?;
                s.push_i64(i64::from(a.leading_zeros()));
            }
            I64Ctz => {
                let a = s.pop_i64()?;
                s.push_i64(i64::from(a.trailing_zeros()));
            }
            I64Popcnt => {
                let a = s.pop_i64()?;
                s.push_i64(i64::from(a.count_ones()));
            }

            // ── Float unary ──────────────────────────────────────────────────
            F32Abs | F32Neg | F32Ceil | F32Floor | F32Trunc | F32Nearest | F32Sqrt => {
                let a = s.pop_f32()?;
                s.push_f32(match op {
                    F32Abs => a.abs(),
                    F32Neg => -a,
                    F32Ceil => a.ceil(),
                    F32Floor => a.floor(),
                    F32Trunc => a.trunc(),
                    F32Nearest => numeric::nearest_f32(a),
                    _ => a.sqrt(),
                });
            }
            F64Abs | F64Neg | F64Ceil | F64Floor | F64Trunc | F64Nearest | F64Sqrt => {
                let a = s.pop_f64()?;
                s.push_f64(match op {
                    F64Abs => a.abs(),
                    F64Neg => -a,
                    F64Ceil => a.ceil(),
                    F64Floor => a.floor(),
                    F64Trunc => a.trunc(),
                    F64Nearest => numeric::nearest_f64(a),
                    _ => a.sqrt(),
                });
            }

            // ── Conversions ──────────────────────────────────────────────────
            I32WrapI64 => {
                let a = s.pop_i64()?;
                s.push_i32(a as i32);
            }
            I32TruncF32S => {
                let a = s.pop_f32()?;
                s.push_i32(numeric::trunc_sat_i32_f32(a));
            }
            I32TruncF32U => {
                let a = s.pop_f32()?;
                s.push_i32(numeric::trunc_sat_u32_f32(a) as i32);
            }
            I32TruncF64S => {
                let a = s.pop_f64()?;
                s.push_i32(numeric::trunc_sat_i32_f64(a));
            }
            I32TruncF64U => {
                let a = s.pop_f64()?;
                s.push_i32(numeric::trunc_sat_u32_f64(a) as i32);
            }
            I64ExtendI32S => {
                let a = s.pop_i32()?;
                s.push_i64(i64::from(a));
            }
            I64ExtendI32U => {
                let a = s.pop_i32()?;
                s.push_i64(i64::from(a as u32));
            }
            I64TruncF32S => {
                let a = s.pop_f32()?;
                s.push_i64(numeric::trunc_sat_i64_f32(a));
            }
            I64TruncF32U => {
                let a = s.pop_f32()?;
                s.push_i64(numeric::trunc_sat_u64_f32(a) as i64);
            }
            I64TruncF64S => {
                let a = s.pop_f64()?;
                s.push_i64(numeric::trunc_sat_i64_f64(a));
            }
            I64TruncF64U => {
                let a = s.pop_f64()?;
                s.push_i64(numeric::trunc_sat_u64_f64(a) as i64);
            }
            F32ConvertI32S => {
                let a = s.pop_i32()?;
                s.push_f32(a as f32);
            }
            F32ConvertI32U => {
                let a = s.pop_i32()?;
                s.push_f32(a as u32 as f32);
            }
            F32ConvertI64S => {
                let a = s.pop_i64()?;
                s.push_f32(a as f32);
            }
            F32ConvertI64U => {
                let a = s.pop_i64()?;
                s.push_f32(a as u64 as f32);
            }
            F32DemoteF64 => {
                let a = s.pop_f64()?;
                s.push_f32(a as f32);
            }
            F64ConvertI32S => {
                let a = s.pop_i32()?;
                s.push_f64(f64::from(a));
            }
            F64ConvertI32U => {
                let a = s.pop_i32()?;
                s.push_f64(f64::from(a as u32));
            }
            F64ConvertI64S => {
                let a = s.pop_i64()?;
                s.push_f64(a as f64);
            }
            F64ConvertI64U => {
                let a = s.pop_i64()?;
                s.push_f64(a as u64 as f64);
            }
            F64PromoteF32 => {
                let a = s.pop_f32()?;
                s.push_f64(f64::from(a));
            }
            // Cells carry raw bits already.
            I32ReinterpretF32 | I64ReinterpretF64 | F32ReinterpretI32 | F64ReinterpretI64 => {
                s.require(1)?;
            }

            // ── Sign extension ───────────────────────────────────────────────
            I32Extend8S => {
                let a = s.pop_i32()?;
                s.push_i32(numeric::extend8_s_i32(a));
            }
            I32Extend16S => {
                let a = s.pop_i32()?;
                s.push_i32(numeric::extend16_s_i32(a));
            }
            I64Extend8S => {
                let a = s.pop_i64()?;
                s.push_i64(numeric::extend8_s_i64(a));
            }
            I64Extend16S => {
                let a = s.pop_i64()?;
                s.push_i64(numeric::extend16_s_i64(a));
            }
            I64Extend32S => {
                let a = s.pop_i64()?;
                s.push_i64(numeric::extend32_s_i64(a));
            }
        }
        Ok(())
    }

    fn i32_binary(&mut self, op: I32BinOp) -> Result<()> {
        use I32BinOp::*;
        let s = &mut self.stack;
        let b = s.pop_i32()?;
        let a = s.pop_i32()?;
        let (ua, ub) = (a as u32, b as u32);
        match op {
            Eq => s.push_bool(a == b),
            Ne => s.push_bool(a != b),
            LtS => s.push_bool(a < b),
            LtU => s.push_bool(ua < ub),
            GtS => s.push_bool(a > b),
            GtU => s.push_bool(ua > ub),
            LeS => s.push_bool(a <= b),
            LeU => s.push_bool(ua <= ub),
            GeS => s.push_bool(a >= b),
            GeU => s.push_bool(ua >= ub),
            Add => s.push_i32(a.wrapping_add(b)),
            Sub => s.push_i32(a.wrapping_sub(b)),
            Mul => s.push_i32(a.wrapping_mul(b)),
            DivS => s.push_i32(numeric::i32_div_s(a, b)?),
            DivU => s.push_i32(numeric::i32_div_u(a, b)?),
            RemS => s.push_i32(numeric::i32_rem_s(a, b)?),
            RemU => s.push_i32(numeric::i32_rem_u(a, b)?),
            And => s.push_i32(a & b),
            Or => s.push_i32(a | b),
            Xor => s.push_i32(a ^ b),
            Shl => s.push_i32(a.wrapping_shl(ub)),
            ShrS => s.push_i32(a.wrapping_shr(ub)),
            ShrU => s.push_i32(ua.wrapping_shr(ub) as i32),
            Rotl => s.push_i32(a.rotate_left(ub % 32)),
            Rotr => s.push_i32(a.rotate_right(ub % 32)),
        }
        Ok(())
    }

    fn i64_binary(&mut self, op: I64BinOp) -> Result<()> {
        use I64BinOp::*;
        let s = &mut self.stack;
        let b = s.pop_i64()?;
        let a = s.pop_i64()?;
        let (ua, ub) = (a as u64, b as u64);
        // Shift and rotate counts are taken modulo 64 by the wrapping ops.
        let count = b as u32;
        match op {
            Eq => s.push_bool(a == b),
            Ne => s.push_bool(a != b),
            LtS => s.push_bool(a < b),
            LtU => s.push_bool(ua < ub),
            GtS => s.push_bool(a > b),
            GtU => s.push_bool(ua > ub),
            LeS => s.push_bool(a <= b),
            LeU => s.push_bool(ua <= ub),
            GeS => s.push_bool(a >= b),
            GeU => s.push_bool(ua >= ub),
            Add => s.push_i64(a.wrapping_add(b)),
            Sub => s.push_i64(a.wrapping_sub(b)),
            Mul => s.push_i64(a.wrapping_mul(b)),
            DivS => s.push_i64(numeric::i64_div_s(a, b)?),
            DivU => s.push_i64(numeric::i64_div_u(a, b)?),
            RemS => s.push_i64(numeric::i64_rem_s(a, b)?),
            RemU => s.push_i64(numeric::i64_rem_u(a, b)?),
            And => s.push_i64(a & b),
            Or => s.push_i64(a | b),
            Xor => s.push_i64(a ^ b),
            Shl => s.push_i64(a.wrapping_shl(count)),
            ShrS => s.push_i64(a.wrapping_shr(count)),
            ShrU => s.push_i64(ua.wrapping_shr(count) as i64),
            Rotl => s.push_i64(a.rotate_left(count % 64)),
            Rotr => s.push_i64(a.rotate_right(count % 64)),
        }
        Ok(())
    }

    fn f32_binary(&mut self, op: F32BinOp) -> Result<()> {
        use F32BinOp::*;
        let s = &mut self.stack;
        let b = s.pop_f32()?;
        let a = s.pop_f32()?;
        match op {
            Eq => s.push_bool(a == b),
            Ne => s.push_bool(a != b),
            Lt => s.push_bool(a < b),
            Gt => s.push_bool(a > b),
            Le => s.push_bool(a <= b),
            Ge => s.push_bool(a >= b),
            Add => s.push_f32(a + b),
            Sub => s.push_f32(a - b),
            Mul => s.push_f32(a * b),
            Div => s.push_f32(a / b),
            Min => s.push_f32(numeric::min_f32(a, b)),
            Max => s.push_f32(numeric::max_f32(a, b)),
            Copysign => s.push_f32(a.copysign(b)),
        }
        Ok(())
    }

    fn f64_binary(&mut self, op: F64BinOp) -> Result<()> {
        use F64BinOp::*;
        let s = &mut self.stack;
        let b = s.pop_f64()?;
        let a = s.pop_f64()?;
        match op {
            Eq => s.push_bool(a == b),
            Ne => s.push_bool(a != b),
            Lt => s.push_bool(a < b),
            Gt => s.push_bool(a > b),
            Le => s.push_bool(a <= b),
            Ge => s.push_bool(a >= b),
            Add => s.push_f64(a + b),
            Sub => s.push_f64(a - b),
            Mul => s.push_f64(a * b),
            Div => s.push_f64(a / b),
            Min => s.push_f64(numeric::min_f64(a, b)),
            Max => s.push_f64(numeric::max_f64(a, b)),
            Copysign => s.push_f64(a.copysign(b)),
        }
        Ok(())
    }

    fn saturating(&mut self, op: SatOp) -> Result<()> {
        use SatOp::*;
        let s = &mut self.stack;
        match op {
            I32TruncSatF32S => {
                let a = s.pop_f32()?;
                s.push_i32(numeric::trunc_sat_i32_f32(a));
            }
            I32TruncSatF32U => {
                let a = s.pop_f32()?;
                s.push_i32(numeric::trunc_sat_u32_f32(a) as i32);
            }
            I32TruncSatF64S => {
                let a = s.pop_f64()?;
                s.push_i32(numeric::trunc_sat_i32_f64(a));
            }
            I32TruncSatF64U => {
                let a = s.pop_f64()?;
                s.push_i32(numeric::trunc_sat_u32_f64(a) as i32);
            }
            I64TruncSatF32S => {
                let a = s.pop_f32()?;
                s.push_i64(numeric::trunc_sat_i64_f32(a));
            }
            I64TruncSatF32U => {
                let a = s.pop_f32()?;
                s.push_i64(numeric::trunc_sat_u64_f32(a) as i64);
            }
            I64TruncSatF64S => {
                let a = s.pop_f64()?;
                s.push_i64(numeric::trunc_sat_i64_f64(a));
            }
            I64TruncSatF64U => {
                let a = s.pop_f64()?;
                s.push_i64(numeric::trunc_sat_u64_f64(a) as i64);
            }
        }
        Ok(())
    }

    // ── Memory ops ───────────────────────────────────────────────────────────

    fn exec_load(&mut self, op: LoadOp, m: MemArg) -> Result<()> {
        use LoadOp::*;
        let base = self.stack.pop_i32()? as u32;
        let addr = effective_address(base, m.offset);
        let mem = &self.memory;
        let s = &mut self.stack;
        match op {
            I32Load => s.push_i32(mem.read_i32(addr)?),
            I64Load => s.push_i64(mem.read_i64(addr)?),
            F32Load => s.push_f32(mem.read_f32(addr)?),
            F64Load => s.push_f64(mem.read_f64(addr)?),
            I32Load8S => s.push_i32(i32::from(mem.read_u8(addr)? as i8)),
            I32Load8U => s.push_i32(i32::from(mem.read_u8(addr)?)),
            I32Load16S => s.push_i32(i32::from(mem.read_u16(addr)? as i16)),
            I32Load16U => s.push_i32(i32::from(mem.read_u16(addr)?)),
            I64Load8S => s.push_i64(i64::from(mem.read_u8(addr)? as i8)),
            I64Load8U => s.push_i64(i64::from(mem.read_u8(addr)?)),
            I64Load16S => s.push_i64(i64::from(mem.read_u16(addr)? as i16)),
            I64Load16U => s.push_i64(i64::from(mem.read_u16(addr)?)),
            I64Load32S => s.push_i64(i64::from(mem.read_i32(addr)?)),
            I64Load32U => s.push_i64(i64::from(mem.read_u32(addr)?)),
        }
        Ok(())
    }

    fn exec_store(&mut self, op: StoreOp, m: MemArg) -> Result<()> {
        use StoreOp::*;
        let value = self.stack.pop()?;
        let base = self.stack.pop_i32()? as u32;
        let addr = effective_address(base, m.offset);
        let mem = &mut self.memory;
        match op {
            I32Store | F32Store | I64Store32 => mem.write_u32(addr, value as u32),
            I64Store | F64Store => mem.write_u64(addr, value),
            I32Store8 | I64Store8 => mem.write_u8(addr, value as u8),
            I32Store16 | I64Store16 => mem.write_u16(addr, value as u16),
        }
    }
}
