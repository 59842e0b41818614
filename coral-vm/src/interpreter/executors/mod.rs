//! Call dispatch: entry points, tier selection, frame lifecycle, and the
//! tail-call trampoline.

use std::rc::Rc;
use std::sync::Arc;

use coral_types::{ValType, Word};

use crate::consts::HOT_CALL_THRESHOLD;
use crate::error::{ExecResult, VmError};
use crate::interpreter::branch::BranchTable;
use crate::interpreter::jit::JitCode;
use crate::interpreter::predecode::IrBody;
use crate::interpreter::regir::RegIrBody;
use crate::interpreter::{predecode, regir, Vm};
use crate::state::Frame;
use crate::store::{Export, FuncAddr, FuncKind, HostFn, InstanceId, Store};

mod atomic;
mod bytecode;
mod gc;
mod misc;
mod predecoded;
mod register;
mod simd;

/// Per-call execution context: everything the tiers need that is cached on
/// the function object, cloned out so the store stays borrowable.
#[derive(Debug, Clone)]
pub(crate) struct ExecCtx {
    /// Store address of the executing function.
    pub func: FuncAddr,
    /// Owning instance.
    pub instance: InstanceId,
    /// Raw body bytes.
    pub body: Arc<[u8]>,
    /// Branch-target side table, if the one-pass build succeeded.
    pub branch: Option<Arc<BranchTable>>,
    /// Pre-decoded IR, if built.
    pub predecoded: Option<Arc<IrBody>>,
    /// Register IR, if converted.
    pub regir: Option<Arc<RegIrBody>>,
    /// Native code, if compiled.
    pub jit: Option<Arc<JitCode>>,
}

enum Prepared {
    Host(Rc<HostFn>),
    Wasm {
        ctx: ExecCtx,
        params: usize,
        declared: usize,
        arity: usize,
    },
}

impl Vm {
    /// Look up an exported function by name and call it.
    pub fn invoke(
        &mut self,
        store: &mut Store,
        instance: InstanceId,
        name: &str,
        args: &[Word],
        results: &mut [Word],
    ) -> ExecResult<()> {
        let export = store
            .instance(instance)?
            .exports
            .get(name)
            .copied()
            .ok_or_else(|| VmError::UnknownExport(name.to_string()))?;
        let idx = match export {
            Export::Func(idx) => idx,
            _ => return Err(VmError::UnknownExport(name.to_string())),
        };
        self.invoke_by_index(store, instance, idx, args, results)
    }

    /// Call a function by instance-local index (start functions, exports).
    pub fn invoke_by_index(
        &mut self,
        store: &mut Store,
        instance: InstanceId,
        func_index: u32,
        args: &[Word],
        results: &mut [Word],
    ) -> ExecResult<()> {
        let addr = store.func_addr(instance, func_index)?;
        self.call_function(store, instance, addr, args, results)
    }

    /// The dispatch-by-pointer core used by both public entry points.
    ///
    /// `args` and `results` use 64-bit slots; a v128 value occupies two
    /// (low then high).
    pub fn call_function(
        &mut self,
        store: &mut Store,
        instance: InstanceId,
        func: FuncAddr,
        args: &[Word],
        results: &mut [Word],
    ) -> ExecResult<()> {
        let ty = store.func(func)?.ty.clone();

        let arg_slots: usize = ty.params.iter().map(ValType::arg_slots).sum();
        if args.len() != arg_slots {
            return Err(VmError::ArgumentCountMismatch {
                expected: arg_slots,
                actual: args.len(),
            });
        }
        let result_slots: usize = ty.results.iter().map(ValType::arg_slots).sum();
        if results.len() != result_slots {
            return Err(VmError::ResultCountMismatch {
                expected: result_slots,
                actual: results.len(),
            });
        }

        let base = self.sp();
        let saved_instance = self.current_instance();
        self.set_current_instance(instance);

        let mut cursor = 0usize;
        for param in &ty.params {
            match param {
                ValType::V128 => {
                    let lo = args[cursor] as u128;
                    let hi = args[cursor + 1] as u128;
                    cursor += 2;
                    self.push((hi << 64) | lo)?;
                }
                _ => {
                    self.push_u64(args[cursor])?;
                    cursor += 1;
                }
            }
        }

        let outcome = self.call_internal(store, func, 0);
        self.set_current_instance(saved_instance);
        outcome?;

        let mut slot = base;
        let mut out = 0usize;
        for result in &ty.results {
            let value = self.slot(slot);
            slot += 1;
            match result {
                ValType::V128 => {
                    results[out] = value as u64;
                    results[out + 1] = (value >> 64) as u64;
                    out += 2;
                }
                _ => {
                    results[out] = value as u64;
                    out += 1;
                }
            }
        }
        self.truncate_ops(base);
        Ok(())
    }

    /// Internal call protocol: arguments are already on the operand stack.
    /// Runs the tail-call trampoline: as long as the returning frame left a
    /// pending tail call, re-enter at the same operand base without growing
    /// the frame stack.
    pub(crate) fn call_internal(
        &mut self,
        store: &mut Store,
        func: FuncAddr,
        resume_pc: usize,
    ) -> ExecResult<()> {
        let mut addr = func;
        loop {
            self.call_once(store, addr, resume_pc)?;
            match self.take_tail_call() {
                None => return Ok(()),
                Some(tc) => {
                    for i in 0..tc.len {
                        self.push(tc.args[i])?;
                    }
                    addr = tc.func;
                }
            }
        }
    }

    fn call_once(
        &mut self,
        store: &mut Store,
        func: FuncAddr,
        resume_pc: usize,
    ) -> ExecResult<()> {
        let prepared = self.prepare_call(store, func)?;
        let (ctx, params, declared, arity) = match prepared {
            Prepared::Host(callback) => return callback(self, store),
            Prepared::Wasm {
                ctx,
                params,
                declared,
                arity,
            } => (ctx, params, declared, arity),
        };

        // Declared locals default to zero in every encoding (numeric zero,
        // null reference, zero vector), so the seed is uniform.
        for _ in 0..declared {
            self.push(0)?;
        }
        let fp = self
            .sp()
            .checked_sub(declared + params)
            .ok_or(VmError::StackUnderflow)?;

        self.push_frame(Frame {
            fp,
            locals: params + declared,
            arity,
            label_base: self.label_depth(),
            resume_pc,
            instance: ctx.instance,
        })?;
        let saved_instance = self.current_instance();
        self.set_current_instance(ctx.instance);

        let result = self.dispatch_tier(store, &ctx);

        let frame = self.pop_frame()?;
        self.truncate_labels(frame.label_base);
        self.set_current_instance(saved_instance);

        match result {
            Ok(()) => {
                if self.tail_call_pending() {
                    // The frame's operand window is reused by the
                    // trampoline; drop everything above the base.
                    self.truncate_ops(frame.fp);
                } else {
                    self.shuffle_down(frame.fp, frame.arity)?;
                }
                Ok(())
            }
            Err(VmError::WasmException) => {
                // Unwind the callee window; the caller's frame searches its
                // own labels next.
                self.truncate_ops(frame.fp);
                Err(VmError::WasmException)
            }
            Err(other) => Err(other),
        }
    }

    fn prepare_call(&mut self, store: &mut Store, func: FuncAddr) -> ExecResult<Prepared> {
        let promote = self.promotion_enabled();

        // Counter bump, branch table, and pre-decode under one mutable
        // borrow of the function.
        let (ty, instance, wants_regir) = {
            let function = store
                .funcs
                .get_mut(func)
                .ok_or(VmError::FunctionIndexOutOfBounds(func))?;
            let ty = function.ty.clone();
            let wasm = match &mut function.kind {
                FuncKind::Host(host) => return Ok(Prepared::Host(host.callback.clone())),
                FuncKind::Wasm(wasm) => wasm,
            };

            wasm.tiers.call_count = wasm.tiers.call_count.saturating_add(1);

            if wasm.tiers.branch.is_none() && !wasm.tiers.branch_failed {
                match BranchTable::build(&wasm.body) {
                    Ok(table) => wasm.tiers.branch = Some(Arc::new(table)),
                    Err(_) => {
                        // Non-fatal: the bytecode tier scans forward on
                        // demand.
                        wasm.tiers.branch_failed = true;
                    }
                }
            }

            if promote && wasm.tiers.predecoded.is_none() && !wasm.tiers.predecode_failed {
                match predecode::build(&wasm.body) {
                    Ok(ir) => {
                        tracing::trace!(func, records = ir.code.len(), "pre-decoded");
                        wasm.tiers.predecoded = Some(Arc::new(ir));
                    }
                    Err(_) => wasm.tiers.predecode_failed = true,
                }
            }

            let wants_regir = promote
                && wasm.tiers.predecoded.is_some()
                && wasm.tiers.regir.is_none()
                && !wasm.tiers.regir_failed;
            (ty, wasm.instance, wants_regir)
        };

        // Conversion reads callee signatures and the instance type section,
        // so it runs under shared borrows and installs afterwards.
        if wants_regir {
            let converted = {
                let wasm = store.funcs[func].as_wasm().expect("checked wasm above");
                let ir = wasm.tiers.predecoded.clone().expect("checked above");
                let inst = store
                    .instances
                    .get(instance)
                    .ok_or(VmError::UndefinedInstance(instance))?;
                regir::convert(&ir, &ty, &wasm.locals, &inst.types, &store.funcs, &inst.funcs)
            };
            let wasm = store.funcs[func].as_wasm_mut().expect("checked wasm above");
            match converted {
                Ok(body) => {
                    tracing::trace!(func, regs = body.reg_count, "converted to register ir");
                    wasm.tiers.regir = Some(Arc::new(body));
                }
                Err(_) => wasm.tiers.regir_failed = true,
            }
        }

        // Hot-call promotion to native code.
        if promote {
            let wasm = store.funcs[func].as_wasm_mut().expect("checked wasm above");
            if let Some(reg) = wasm.tiers.regir.clone() {
                if wasm.tiers.jit.is_none()
                    && !wasm.tiers.jit_failed
                    && wasm.tiers.call_count >= HOT_CALL_THRESHOLD
                {
                    match crate::interpreter::jit::compile(&reg) {
                        Ok(code) => {
                            tracing::debug!(func, "hot-call jit compile");
                            wasm.tiers.jit = Some(Arc::new(code));
                        }
                        Err(_) => wasm.tiers.jit_failed = true,
                    }
                }
            }
        }

        let wasm = store.funcs[func].as_wasm().expect("checked wasm above");
        Ok(Prepared::Wasm {
            ctx: ExecCtx {
                func,
                instance: wasm.instance,
                body: wasm.body.clone(),
                branch: wasm.tiers.branch.clone(),
                predecoded: wasm.tiers.predecoded.clone(),
                regir: wasm.tiers.regir.clone(),
                jit: wasm.tiers.jit.clone(),
            },
            params: ty.params.len(),
            declared: wasm.locals.len(),
            arity: ty.results.len(),
        })
    }

    fn dispatch_tier(&mut self, store: &mut Store, ctx: &ExecCtx) -> ExecResult<()> {
        if self.profile().is_some() {
            // Profiling pins execution to the baseline tier.
            return self.execute_bytecode(store, ctx);
        }
        if self.fuel().is_none() {
            if let Some(code) = ctx.jit.clone() {
                return self.execute_jit(store, ctx, code);
            }
        }
        if let Some(reg) = ctx.regir.clone() {
            return match self.execute_reg_ir(store, ctx, reg) {
                Err(VmError::JitRestart) => {
                    // A back edge compiled this function; re-enter through
                    // the native entry with the same frame.
                    let code = store
                        .func(ctx.func)?
                        .as_wasm()
                        .and_then(|w| w.tiers.jit.clone())
                        .ok_or(VmError::OutOfMemory("jit code"))?;
                    tracing::debug!(func = ctx.func, "jit restart");
                    self.execute_jit(store, ctx, code)
                }
                other => other,
            };
        }
        if let Some(ir) = ctx.predecoded.clone() {
            return self.execute_ir(store, ctx, ir);
        }
        self.execute_bytecode(store, ctx)
    }
}
