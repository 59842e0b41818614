//! `try_table` / `throw` protocol.
//!
//! `throw` flattens the tag parameters into the pending-exception buffer
//! and the current frame's label stack is searched newest-first for a
//! matching catch clause. A match unwinds the operand stack to the catch
//! target and pushes the payload back (plus an exnref for the `_ref`
//! clause kinds); no match surfaces as `WasmException`, and each caller
//! frame repeats the search at its call site.

use coral_types::ValType;

use crate::consts::EXCEPTION_PAYLOAD_SLOTS;
use crate::error::{ExecResult, VmError};
use crate::interpreter::Vm;
use crate::state::{Label, LabelTarget, PendingException};
use crate::store::{Store, TagAddr};

/// Where a matched catch resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CatchOutcome {
    /// Branch to a label target (tier-specific position).
    Target(LabelTarget),
    /// The catch targeted the function body itself: return with the
    /// payload as results.
    Return,
}

impl Vm {
    /// Pop the parameters of `tag` into the pending-exception buffer.
    pub(crate) fn raise_exception(
        &mut self,
        store: &Store,
        tag: TagAddr,
    ) -> ExecResult<()> {
        let ty = store
            .tags
            .get(tag)
            .ok_or(VmError::TagIndexOutOfBounds(tag))?
            .ty
            .clone();

        let slots: usize = ty.params.iter().map(ValType::arg_slots).sum();
        if slots > EXCEPTION_PAYLOAD_SLOTS {
            return Err(VmError::OutOfMemory("exception payload"));
        }

        let mut values = [0u64; EXCEPTION_PAYLOAD_SLOTS];
        let mut pos = slots;
        for param in ty.params.iter().rev() {
            match param {
                ValType::V128 => {
                    let v = self.pop()?;
                    pos -= 2;
                    values[pos] = v as u64;
                    values[pos + 1] = (v >> 64) as u64;
                }
                _ => {
                    pos -= 1;
                    values[pos] = self.pop_u64()?;
                }
            }
        }

        self.set_pending_exception(PendingException {
            tag,
            values,
            len: slots,
        });
        Ok(())
    }

    /// Re-raise a snapshotted exception (`throw_ref`).
    pub(crate) fn reraise_exception(&mut self, exnref: u64) -> ExecResult<()> {
        if exnref == 0 {
            return Err(VmError::Trap(coral_asm::TrapKind::NullReference));
        }
        let snapshot = self
            .exception_snapshot(exnref)
            .ok_or(VmError::Trap(coral_asm::TrapKind::NullReference))?;
        self.set_pending_exception(snapshot);
        Ok(())
    }

    /// Search the current frame's labels for a clause matching the pending
    /// exception. On a match the operand/label stacks are adjusted and the
    /// payload pushed; `None` leaves the exception pending for the caller.
    pub(crate) fn dispatch_exception(
        &mut self,
        store: &Store,
    ) -> ExecResult<Option<CatchOutcome>> {
        let pending = match self.take_pending_exception() {
            Some(p) => p,
            None => return Err(VmError::StackUnderflow),
        };
        let label_base = self.current_frame()?.label_base;

        let mut found: Option<(usize, crate::state::CatchClause)> = None;
        'search: for ti in (label_base..self.label_depth()).rev() {
            let label = self.label(ti)?;
            let clauses = match &label.catches {
                Some(c) => c,
                None => continue,
            };
            for clause in clauses.iter() {
                let matches =
                    clause.kind.is_catch_all() || clause.tag == Some(pending.tag);
                if matches {
                    found = Some((ti, *clause));
                    break 'search;
                }
            }
        }

        let (ti, clause) = match found {
            Some(f) => f,
            None => {
                self.set_pending_exception(pending);
                return Ok(None);
            }
        };

        // Control leaves the try_table: pop it and everything inner.
        self.truncate_labels(ti);

        let labels_in_frame = self.label_depth() - label_base;
        if clause.depth as usize >= labels_in_frame {
            // Catch targets the function body: payload becomes the results.
            self.push_payload(store, &pending, clause.kind.captures_ref())?;
            return Ok(Some(CatchOutcome::Return));
        }

        let idx = self.label_depth() - 1 - clause.depth as usize;
        let target = self.label(idx)?;
        let (op_base, arity, target_kind) = (target.op_base, target.arity, target.target);

        self.truncate_ops(op_base);
        self.push_payload(store, &pending, clause.kind.captures_ref())?;
        self.truncate_labels(idx);
        if target_kind.is_loop() {
            self.push_label(Label {
                arity,
                op_base,
                target: target_kind,
                catches: None,
            })?;
        }
        Ok(Some(CatchOutcome::Target(target_kind)))
    }

    fn push_payload(
        &mut self,
        store: &Store,
        pending: &PendingException,
        with_ref: bool,
    ) -> ExecResult<()> {
        let ty = store
            .tags
            .get(pending.tag)
            .ok_or(VmError::TagIndexOutOfBounds(pending.tag))?
            .ty
            .clone();

        let mut i = 0usize;
        for param in &ty.params {
            match param {
                ValType::V128 => {
                    let lo = pending.values[i] as u128;
                    let hi = pending.values[i + 1] as u128;
                    i += 2;
                    self.push((hi << 64) | lo)?;
                }
                _ => {
                    self.push_u64(pending.values[i])?;
                    i += 1;
                }
            }
        }
        if with_ref {
            let handle = self.snapshot_exception(*pending);
            self.push_u64(handle)?;
        }
        Ok(())
    }
}
