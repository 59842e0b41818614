//! Register IR: a linearized form of the pre-decoded IR over a per-call
//! virtual register file.
//!
//! Registerization is positional: register `i` holds parameter/local `i`,
//! and operand-stack depth `d` maps to register `locals + d`. Merge points
//! therefore need no phi nodes; a branch that carries values emits moves
//! from the current depth positions to the target's base positions.
//!
//! Conversion silently declines (the function stays on the IR tier) for
//! multi-value results, v128 anywhere in a touched signature, globals,
//! tables, wide-arithmetic ops, and register files wider than the u8
//! encoding allows.

use coral_asm::op;
use coral_types::{FuncType, ValType};

use crate::consts::MAX_REGIR_REGISTERS;
use crate::interpreter::alu;
use crate::interpreter::predecode::{
    ir_op, slots_of, IrBody, IrInstr, EXTRA_HAS_ELSE, EXTRA_TYPE_INDEX, EXTRA_VALUE_MASK,
};
use crate::store::{Function, SubType};

/// Register-IR opcode ids outside the reused single-byte space.
pub mod reg_op {
    #![allow(missing_docs)]

    pub const MOV: u16 = 0x0200;
    pub const CONST32: u16 = 0x0201;
    pub const CONST64: u16 = 0x0202;
    pub const BR: u16 = 0x0203;
    pub const BR_IF: u16 = 0x0204;
    pub const BR_IF_NOT: u16 = 0x0205;
    pub const RETURN: u16 = 0x0206;
    pub const RETURN_VOID: u16 = 0x0207;
    pub const CALL: u16 = 0x0208;
    pub const CALL_INDIRECT: u16 = 0x0209;
    pub const BR_TABLE: u16 = 0x020A;
    pub const MEMORY_FILL: u16 = 0x020B;
    pub const MEMORY_COPY: u16 = 0x020C;
    pub const TAIL_CALL: u16 = 0x020D;
    pub const TAIL_CALL_INDIRECT: u16 = 0x020E;
    /// Data slot for `BR_TABLE` targets and `CALL_INDIRECT` table indices.
    pub const EXT: u16 = 0x020F;
    pub const ADDI32: u16 = 0x0210;
    pub const SUBI32: u16 = 0x0211;
    pub const LT_S_I32: u16 = 0x0212;
    pub const GE_S_I32: u16 = 0x0213;
    pub const LT_U_I32: u16 = 0x0218;
}

/// One register instruction. Meaning of `rd`/`rs1`/`operand` is per-opcode;
/// ALU ops pack the second source register in the operand's low byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegInstr {
    /// Opcode: a reused single-byte Wasm opcode, a `0xFC00`-range op, or a
    /// [`reg_op`] id.
    pub op: u16,
    /// Destination register.
    pub rd: u8,
    /// First source register.
    pub rs1: u8,
    /// Immediate, pre-resolved target, pool index, or packed second source.
    pub operand: u32,
}

impl RegInstr {
    /// Second source register packed into the operand.
    #[inline]
    pub fn rs2(&self) -> u8 {
        (self.operand & 0xFF) as u8
    }
}

/// A converted function body.
#[derive(Debug, Clone, Default)]
pub struct RegIrBody {
    /// Instructions with pre-resolved targets.
    pub code: Vec<RegInstr>,
    /// 64-bit constant pool (shared layout with the pre-decoded pool).
    pub pool: Vec<u64>,
    /// Registers the function needs (locals + max operand depth).
    pub reg_count: u16,
    /// Parameter-plus-local registers seeded from the frame on entry.
    pub local_count: u16,
    /// 0 or 1 results.
    pub result_count: u16,
}

/// Conversion refusal; latched by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Refused;

type Result<T> = core::result::Result<T, Refused>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Block,
    Loop,
    If,
}

struct CtlFrame {
    kind: FrameKind,
    /// Sim depth at entry, params included.
    entry_depth: usize,
    params: usize,
    results: usize,
    /// Emitted indices whose operand patches to the end position.
    end_fixups: Vec<usize>,
    /// Loop header position.
    loop_start: usize,
    /// Pending `BR_IF_NOT` of an `if`, patched at else/end.
    else_fixup: Option<usize>,
}

struct Converter<'a> {
    ir: &'a IrBody,
    types: &'a [SubType],
    funcs: &'a [Function],
    instance_funcs: &'a [usize],
    locals: usize,
    results: usize,
    code: Vec<RegInstr>,
    ctl: Vec<CtlFrame>,
    depth: usize,
    max_depth: usize,
}

/// Convert a pre-decoded body. `types` is the owning instance's type
/// section, `funcs`/`instance_funcs` resolve callee signatures.
pub fn convert(
    ir: &IrBody,
    ty: &FuncType,
    locals: &[ValType],
    types: &[SubType],
    funcs: &[Function],
    instance_funcs: &[usize],
) -> Result<RegIrBody> {
    if ty.results.len() > 1 {
        return Err(Refused);
    }
    if ty.params.iter().chain(ty.results.iter()).chain(locals.iter())
        .any(|t| *t == ValType::V128)
    {
        return Err(Refused);
    }

    let mut cv = Converter {
        ir,
        types,
        funcs,
        instance_funcs,
        locals: ty.params.len() + locals.len(),
        results: ty.results.len(),
        code: Vec::new(),
        ctl: Vec::new(),
        depth: 0,
        max_depth: 0,
    };
    cv.run()?;

    let reg_count = cv.locals + cv.max_depth;
    if reg_count > MAX_REGIR_REGISTERS {
        return Err(Refused);
    }
    Ok(RegIrBody {
        code: cv.code,
        pool: ir.pool.clone(),
        reg_count: reg_count as u16,
        local_count: cv.locals as u16,
        result_count: cv.results as u16,
    })
}

impl Converter<'_> {
    fn reg(&self, d: usize) -> Result<u8> {
        let r = self.locals + d;
        u8::try_from(r).map_err(|_| Refused)
    }

    fn bump(&mut self, d: usize) {
        if d > self.max_depth {
            self.max_depth = d;
        }
    }

    fn emit(&mut self, op: u16, rd: u8, rs1: u8, operand: u32) -> usize {
        self.code.push(RegInstr { op, rd, rs1, operand });
        self.code.len() - 1
    }

    fn block_arity(&self, extra: u16, is_loop: bool) -> Result<(usize, usize)> {
        let extra = extra & !EXTRA_HAS_ELSE;
        if extra & EXTRA_TYPE_INDEX != 0 {
            let idx = usize::from(extra & EXTRA_VALUE_MASK);
            let fty = self
                .types
                .get(idx)
                .and_then(|s| s.composite.as_func())
                .ok_or(Refused)?;
            let params = fty.params.len();
            Ok((params, if is_loop { params } else { fty.results.len() }))
        } else {
            let lit = usize::from(extra & EXTRA_VALUE_MASK);
            Ok((0, if is_loop { 0 } else { lit }))
        }
    }

    fn callee_sig(&self, func_idx: u32) -> Result<(usize, usize)> {
        let addr = *self
            .instance_funcs
            .get(func_idx as usize)
            .ok_or(Refused)?;
        let fty = &self.funcs.get(addr).ok_or(Refused)?.ty;
        self.check_sig(fty)
    }

    fn type_sig(&self, type_idx: u32) -> Result<(usize, usize)> {
        let fty = self
            .types
            .get(type_idx as usize)
            .and_then(|s| s.composite.as_func())
            .ok_or(Refused)?;
        self.check_sig(fty)
    }

    fn check_sig(&self, fty: &FuncType) -> Result<(usize, usize)> {
        if fty.params.iter().chain(fty.results.iter()).any(|t| *t == ValType::V128) {
            return Err(Refused);
        }
        Ok((fty.params.len(), fty.results.len()))
    }

    /// Emit the moves placing the top `count` values at the branch target's
    /// base, then resolve the branch destination (loop start, or an end
    /// fixup registered on the frame).
    fn branch_to(&mut self, depth: u32) -> Result<BranchPlan> {
        if depth as usize >= self.ctl.len() {
            return Ok(BranchPlan::Return);
        }
        let fi = self.ctl.len() - 1 - depth as usize;
        let (count, dest_base, is_loop, loop_start) = {
            let f = &self.ctl[fi];
            let count = if f.kind == FrameKind::Loop { f.params } else { f.results };
            (count, f.entry_depth - f.params, f.kind == FrameKind::Loop, f.loop_start)
        };
        if count > self.depth {
            return Err(Refused);
        }
        let src_base = self.depth - count;
        Ok(BranchPlan::Jump {
            fi,
            moves: (src_base != dest_base).then_some((src_base, dest_base, count)),
            target: if is_loop { Some(loop_start) } else { None },
        })
    }

    fn emit_moves(&mut self, src_base: usize, dest_base: usize, count: usize) -> Result<()> {
        for i in 0..count {
            let rd = self.reg(dest_base + i)?;
            let rs = self.reg(src_base + i)?;
            if rd != rs {
                self.emit(reg_op::MOV, rd, rs, 0);
            }
        }
        Ok(())
    }

    fn emit_return(&mut self) -> Result<()> {
        if self.results == 1 {
            let rs = self.reg(self.depth.checked_sub(1).ok_or(Refused)?)?;
            self.emit(reg_op::RETURN, 0, rs, 0);
        } else {
            self.emit(reg_op::RETURN_VOID, 0, 0, 0);
        }
        Ok(())
    }

    /// Skip IR records until the enclosing frame's else/end becomes live
    /// again. Returns the next IR index to process (the else or end record
    /// itself).
    fn skip_dead(&self, mut iw: usize) -> Result<usize> {
        let code = &self.ir.code;
        let mut nesting = 0usize;
        while iw < code.len() {
            let rec = code[iw];
            match rec.op {
                x if x == u16::from(op::BLOCK)
                    || x == u16::from(op::LOOP)
                    || x == u16::from(op::IF) =>
                {
                    nesting += 1;
                }
                x if x == u16::from(op::ELSE) => {
                    if nesting == 0 {
                        return Ok(iw);
                    }
                }
                x if x == u16::from(op::END) => {
                    if nesting == 0 {
                        return Ok(iw);
                    }
                    nesting -= 1;
                }
                _ => {}
            }
            iw += slots_of(rec);
        }
        Err(Refused)
    }

    fn run(&mut self) -> Result<()> {
        // Copy the shared reference out so record reads do not pin `self`.
        let ir = self.ir;
        let code = &ir.code;
        let mut iw = 0usize;
        // Whether the current position is reachable; cleared after an
        // unconditional terminator until the frame's else/end.
        let mut live = true;

        while iw < code.len() {
            if !live {
                iw = self.skip_dead(iw)?;
                live = true;
                // Fall through to process the else/end record itself, with
                // the "came from dead code" flag.
                let rec = code[iw];
                if rec.op == u16::from(op::ELSE) {
                    self.process_else(rec, false)?;
                    iw += 1;
                    continue;
                }
                // END record.
                match self.process_end(true)? {
                    EndOutcome::FunctionDone => return Ok(()),
                    EndOutcome::Continue => {
                        iw += 1;
                        continue;
                    }
                }
            }

            let rec = code[iw];
            match rec.op {
                x if x == u16::from(op::NOP) => {}
                x if x == u16::from(op::UNREACHABLE) => {
                    // Trapping is rare enough to leave to the lower tiers.
                    return Err(Refused);
                }

                x if x == u16::from(op::BLOCK) => {
                    let (params, results) = self.block_arity(rec.extra, false)?;
                    if params > self.depth {
                        return Err(Refused);
                    }
                    self.ctl.push(CtlFrame {
                        kind: FrameKind::Block,
                        entry_depth: self.depth,
                        params,
                        results,
                        end_fixups: Vec::new(),
                        loop_start: 0,
                        else_fixup: None,
                    });
                }
                x if x == u16::from(op::LOOP) => {
                    let (params, _) = self.block_arity(rec.extra, true)?;
                    if params > self.depth {
                        return Err(Refused);
                    }
                    self.ctl.push(CtlFrame {
                        kind: FrameKind::Loop,
                        entry_depth: self.depth,
                        params,
                        results: self.block_arity(rec.extra, false)?.1,
                        end_fixups: Vec::new(),
                        loop_start: self.code.len(),
                        else_fixup: None,
                    });
                }
                x if x == u16::from(op::IF) => {
                    let (params, results) = self.block_arity(rec.extra, false)?;
                    let cond = self.reg(self.depth.checked_sub(1).ok_or(Refused)?)?;
                    self.depth -= 1;
                    if params > self.depth {
                        return Err(Refused);
                    }
                    let fixup = self.emit(reg_op::BR_IF_NOT, 0, cond, 0);
                    self.ctl.push(CtlFrame {
                        kind: FrameKind::If,
                        entry_depth: self.depth,
                        params,
                        results,
                        end_fixups: Vec::new(),
                        loop_start: 0,
                        else_fixup: Some(fixup),
                    });
                    iw += 2;
                    continue;
                }
                x if x == u16::from(op::ELSE) => {
                    self.process_else(rec, true)?;
                }
                x if x == u16::from(op::END) => {
                    match self.process_end(false)? {
                        EndOutcome::FunctionDone => return Ok(()),
                        EndOutcome::Continue => {}
                    }
                }

                x if x == u16::from(op::BR) => {
                    match self.branch_to(rec.operand)? {
                        BranchPlan::Return => self.emit_return()?,
                        BranchPlan::Jump { fi, moves, target } => {
                            if let Some((s, d, n)) = moves {
                                self.emit_moves(s, d, n)?;
                            }
                            let at = self.emit(reg_op::BR, 0, 0, 0);
                            match target {
                                Some(t) => self.code[at].operand = t as u32,
                                None => self.ctl[fi].end_fixups.push(at),
                            }
                        }
                    }
                    live = false;
                }
                x if x == u16::from(op::BR_IF) => {
                    let cond = self.reg(self.depth.checked_sub(1).ok_or(Refused)?)?;
                    self.depth -= 1;
                    match self.branch_to(rec.operand)? {
                        BranchPlan::Return => {
                            // Conditional return: skip over the return
                            // sequence when the condition is false.
                            let skip = self.emit(reg_op::BR_IF_NOT, 0, cond, 0);
                            self.emit_return()?;
                            let next = self.code.len() as u32;
                            self.code[skip].operand = next;
                        }
                        BranchPlan::Jump { fi, moves, target } => match moves {
                            None => {
                                let at = self.emit(reg_op::BR_IF, 0, cond, 0);
                                match target {
                                    Some(t) => self.code[at].operand = t as u32,
                                    None => self.ctl[fi].end_fixups.push(at),
                                }
                            }
                            Some((s, d, n)) => {
                                let skip = self.emit(reg_op::BR_IF_NOT, 0, cond, 0);
                                self.emit_moves(s, d, n)?;
                                let at = self.emit(reg_op::BR, 0, 0, 0);
                                match target {
                                    Some(t) => self.code[at].operand = t as u32,
                                    None => self.ctl[fi].end_fixups.push(at),
                                }
                                let next = self.code.len() as u32;
                                self.code[skip].operand = next;
                            }
                        },
                    }
                }
                x if x == u16::from(op::BR_TABLE) => {
                    let count = rec.operand as usize;
                    let sel = self.reg(self.depth.checked_sub(1).ok_or(Refused)?)?;
                    self.depth -= 1;
                    // Every target must need no value shuffle; a target
                    // that is a return keeps the function on lower tiers.
                    self.emit(reg_op::BR_TABLE, 0, sel, count as u32);
                    for k in 0..=count {
                        let depth = code[iw + 1 + k].operand;
                        match self.branch_to(depth)? {
                            BranchPlan::Return => return Err(Refused),
                            BranchPlan::Jump { fi, moves, target } => {
                                if moves.is_some() {
                                    return Err(Refused);
                                }
                                let at = self.emit(reg_op::EXT, 0, 0, 0);
                                match target {
                                    Some(t) => self.code[at].operand = t as u32,
                                    None => self.ctl[fi].end_fixups.push(at),
                                }
                            }
                        }
                    }
                    live = false;
                }
                x if x == u16::from(op::RETURN) => {
                    self.emit_return()?;
                    live = false;
                }

                x if x == u16::from(op::CALL) => {
                    let (argc, resc) = self.callee_sig(rec.operand)?;
                    if argc > self.depth {
                        return Err(Refused);
                    }
                    let base = self.reg(self.depth - argc)?;
                    self.emit(reg_op::CALL, base, 0, rec.operand);
                    self.depth = self.depth - argc + resc;
                    self.bump(self.depth);
                }
                x if x == u16::from(op::CALL_INDIRECT) => {
                    let (argc, resc) = self.type_sig(rec.operand)?;
                    if argc + 1 > self.depth {
                        return Err(Refused);
                    }
                    let sel = self.reg(self.depth - 1)?;
                    let base = self.reg(self.depth - 1 - argc)?;
                    self.emit(reg_op::CALL_INDIRECT, base, sel, rec.operand);
                    self.emit(reg_op::EXT, 0, 0, u32::from(rec.extra));
                    self.depth = self.depth - 1 - argc + resc;
                    self.bump(self.depth);
                }
                x if x == u16::from(op::RETURN_CALL) => {
                    let (argc, _) = self.callee_sig(rec.operand)?;
                    if argc > self.depth {
                        return Err(Refused);
                    }
                    let base = self.reg(self.depth - argc)?;
                    self.emit(reg_op::TAIL_CALL, base, argc as u8, rec.operand);
                    live = false;
                }
                x if x == u16::from(op::RETURN_CALL_INDIRECT) => {
                    let (argc, _) = self.type_sig(rec.operand)?;
                    if argc + 1 > self.depth {
                        return Err(Refused);
                    }
                    let sel = self.reg(self.depth - 1)?;
                    let base = self.reg(self.depth - 1 - argc)?;
                    self.emit(reg_op::TAIL_CALL_INDIRECT, base, sel, rec.operand);
                    self.emit(reg_op::EXT, 0, argc as u8, u32::from(rec.extra));
                    live = false;
                }
                x if x == u16::from(op::CALL_REF) || x == u16::from(op::RETURN_CALL_REF) => {
                    return Err(Refused);
                }

                x if x == u16::from(op::DROP) => {
                    self.depth = self.depth.checked_sub(1).ok_or(Refused)?;
                }
                x if x == u16::from(op::SELECT) => {
                    if self.depth < 3 {
                        return Err(Refused);
                    }
                    let base = self.reg(self.depth - 3)?;
                    self.emit(u16::from(op::SELECT), base, 0, 0);
                    self.depth -= 2;
                }

                x if x == u16::from(op::LOCAL_GET) => {
                    let rd = self.reg(self.depth)?;
                    let rs = u8::try_from(rec.operand).map_err(|_| Refused)?;
                    self.emit(reg_op::MOV, rd, rs, 0);
                    self.depth += 1;
                    self.bump(self.depth);
                }
                x if x == u16::from(op::LOCAL_SET) => {
                    let rs = self.reg(self.depth.checked_sub(1).ok_or(Refused)?)?;
                    let rd = u8::try_from(rec.operand).map_err(|_| Refused)?;
                    self.emit(reg_op::MOV, rd, rs, 0);
                    self.depth -= 1;
                }
                x if x == u16::from(op::LOCAL_TEE) => {
                    let rs = self.reg(self.depth.checked_sub(1).ok_or(Refused)?)?;
                    let rd = u8::try_from(rec.operand).map_err(|_| Refused)?;
                    self.emit(reg_op::MOV, rd, rs, 0);
                }

                x if x == u16::from(op::GLOBAL_GET)
                    || x == u16::from(op::GLOBAL_SET)
                    || x == u16::from(op::TABLE_GET)
                    || x == u16::from(op::TABLE_SET)
                    || x == u16::from(op::REF_NULL)
                    || x == u16::from(op::REF_IS_NULL)
                    || x == u16::from(op::REF_FUNC)
                    || x == u16::from(op::REF_EQ)
                    || x == u16::from(op::REF_AS_NON_NULL)
                    || x == u16::from(op::BR_ON_NULL)
                    || x == u16::from(op::BR_ON_NON_NULL) =>
                {
                    return Err(Refused);
                }

                x if (u16::from(op::I32_LOAD)..=u16::from(op::I64_LOAD32_U)).contains(&x) => {
                    let rs = self.reg(self.depth.checked_sub(1).ok_or(Refused)?)?;
                    let rd = rs;
                    self.emit(x, rd, rs, rec.operand);
                }
                x if (u16::from(op::I32_STORE)..=u16::from(op::I64_STORE32)).contains(&x) => {
                    if self.depth < 2 {
                        return Err(Refused);
                    }
                    let value = self.reg(self.depth - 1)?;
                    let addr = self.reg(self.depth - 2)?;
                    self.emit(x, value, addr, rec.operand);
                    self.depth -= 2;
                }
                x if x == u16::from(op::MEMORY_SIZE) => {
                    let rd = self.reg(self.depth)?;
                    self.emit(x, rd, 0, 0);
                    self.depth += 1;
                    self.bump(self.depth);
                }
                x if x == u16::from(op::MEMORY_GROW) => {
                    let r = self.reg(self.depth.checked_sub(1).ok_or(Refused)?)?;
                    self.emit(x, r, r, 0);
                }

                x if x == u16::from(op::I32_CONST) || x == u16::from(op::F32_CONST) => {
                    let rd = self.reg(self.depth)?;
                    self.emit(reg_op::CONST32, rd, 0, rec.operand);
                    self.depth += 1;
                    self.bump(self.depth);
                }
                x if x == u16::from(op::I64_CONST) || x == u16::from(op::F64_CONST) => {
                    let rd = self.reg(self.depth)?;
                    self.emit(reg_op::CONST64, rd, 0, rec.operand);
                    self.depth += 1;
                    self.bump(self.depth);
                }

                // Superops expand to their fused register forms.
                ir_op::LOCAL_GET2 => {
                    let rd1 = self.reg(self.depth)?;
                    let rs1 = u8::try_from(rec.operand).map_err(|_| Refused)?;
                    self.emit(reg_op::MOV, rd1, rs1, 0);
                    let rd2 = self.reg(self.depth + 1)?;
                    let rs2 = u8::try_from(code[iw + 1].operand).map_err(|_| Refused)?;
                    self.emit(reg_op::MOV, rd2, rs2, 0);
                    self.depth += 2;
                    self.bump(self.depth);
                    iw += 2;
                    continue;
                }
                ir_op::LOCAL_GET_CONST32 => {
                    let rd1 = self.reg(self.depth)?;
                    let rs1 = u8::try_from(rec.operand).map_err(|_| Refused)?;
                    self.emit(reg_op::MOV, rd1, rs1, 0);
                    let rd2 = self.reg(self.depth + 1)?;
                    self.emit(reg_op::CONST32, rd2, 0, code[iw + 1].operand);
                    self.depth += 2;
                    self.bump(self.depth);
                    iw += 2;
                    continue;
                }
                ir_op::LGET2_ADD_I32
                | ir_op::LGET2_SUB_I32
                | ir_op::LGET2_GT_S_I32
                | ir_op::LGET2_LE_S_I32 => {
                    let alu_op = match rec.op {
                        ir_op::LGET2_ADD_I32 => op::I32_ADD,
                        ir_op::LGET2_SUB_I32 => op::I32_SUB,
                        ir_op::LGET2_GT_S_I32 => op::I32_GT_S,
                        _ => op::I32_LE_S,
                    };
                    let rd = self.reg(self.depth)?;
                    let rs1 = u8::try_from(rec.operand).map_err(|_| Refused)?;
                    let rs2 = u8::try_from(code[iw + 1].operand).map_err(|_| Refused)?;
                    self.emit(u16::from(alu_op), rd, rs1, u32::from(rs2));
                    self.depth += 1;
                    self.bump(self.depth);
                    iw += 3;
                    continue;
                }
                ir_op::LGETC_ADD_I32
                | ir_op::LGETC_SUB_I32
                | ir_op::LGETC_LT_S_I32
                | ir_op::LGETC_GE_S_I32
                | ir_op::LGETC_LT_U_I32 => {
                    let fused = match rec.op {
                        ir_op::LGETC_ADD_I32 => reg_op::ADDI32,
                        ir_op::LGETC_SUB_I32 => reg_op::SUBI32,
                        ir_op::LGETC_LT_S_I32 => reg_op::LT_S_I32,
                        ir_op::LGETC_GE_S_I32 => reg_op::GE_S_I32,
                        _ => reg_op::LT_U_I32,
                    };
                    let rd = self.reg(self.depth)?;
                    let rs1 = u8::try_from(rec.operand).map_err(|_| Refused)?;
                    self.emit(fused, rd, rs1, code[iw + 1].operand);
                    self.depth += 1;
                    self.bump(self.depth);
                    iw += 3;
                    continue;
                }

                x if x & 0xFF00 == 0xFC00 => {
                    let sub = x & 0xFF;
                    match sub {
                        0x00..=0x07 => {
                            let r = self.reg(self.depth.checked_sub(1).ok_or(Refused)?)?;
                            self.emit(x, r, r, 0);
                        }
                        0x0A => {
                            // memory.copy
                            if self.depth < 3 {
                                return Err(Refused);
                            }
                            let base = self.reg(self.depth - 3)?;
                            self.emit(reg_op::MEMORY_COPY, 0, base, 0);
                            self.depth -= 3;
                        }
                        0x0B => {
                            // memory.fill
                            if self.depth < 3 {
                                return Err(Refused);
                            }
                            let base = self.reg(self.depth - 3)?;
                            self.emit(reg_op::MEMORY_FILL, 0, base, 0);
                            self.depth -= 3;
                        }
                        _ => return Err(Refused),
                    }
                }

                x if x < 0x100 => {
                    let opcode = x as u8;
                    match alu::scalar_arity(opcode) {
                        Some(2) => {
                            if self.depth < 2 {
                                return Err(Refused);
                            }
                            let rd = self.reg(self.depth - 2)?;
                            let rs2 = self.reg(self.depth - 1)?;
                            self.emit(x, rd, rd, u32::from(rs2));
                            self.depth -= 1;
                        }
                        Some(_) => {
                            let r = self.reg(self.depth.checked_sub(1).ok_or(Refused)?)?;
                            self.emit(x, r, r, 0);
                        }
                        None => return Err(Refused),
                    }
                }

                _ => return Err(Refused),
            }
            iw += slots_of(rec);
        }

        Err(Refused)
    }

    fn process_else(&mut self, _rec: IrInstr, reachable: bool) -> Result<()> {
        let fi = self.ctl.len().checked_sub(1).ok_or(Refused)?;
        if self.ctl[fi].kind != FrameKind::If {
            return Err(Refused);
        }
        if reachable {
            // Then-branch fall-through jumps over the else branch.
            let at = self.emit(reg_op::BR, 0, 0, 0);
            self.ctl[fi].end_fixups.push(at);
        }
        if let Some(fixup) = self.ctl[fi].else_fixup.take() {
            self.code[fixup].operand = self.code.len() as u32;
        }
        self.depth = self.ctl[fi].entry_depth;
        Ok(())
    }

    fn process_end(&mut self, from_dead: bool) -> Result<EndOutcome> {
        match self.ctl.pop() {
            None => {
                // Function-level end; the implicit return only exists on
                // the reachable fall-through path.
                if !from_dead {
                    self.emit_return()?;
                }
                Ok(EndOutcome::FunctionDone)
            }
            Some(frame) => {
                let here = self.code.len() as u32;
                for fixup in frame.end_fixups {
                    self.code[fixup].operand = here;
                }
                if let Some(fixup) = frame.else_fixup {
                    self.code[fixup].operand = here;
                }
                self.depth = frame.entry_depth - frame.params + frame.results;
                self.bump(self.depth);
                Ok(EndOutcome::Continue)
            }
        }
    }
}

enum EndOutcome {
    FunctionDone,
    Continue,
}

enum BranchPlan {
    /// Branch past the last label: return.
    Return,
    Jump {
        fi: usize,
        moves: Option<(usize, usize, usize)>,
        target: Option<usize>,
    },
}
