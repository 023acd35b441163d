//! Structural verifier.
//!
//! Checks the invariants every stage relies on: each block ends in exactly one
//! terminator, branch targets are blocks of the layout, operands name live
//! instructions of the same function and in-range arguments, and integer
//! operands agree on their widths.

use super::*;

fn fail(func: &Function, reason: String) -> IrError {
    IrError::Verify { func: func.name.clone(), reason }
}

pub fn verify_function(func: &Function) -> IrResult<()> {
    if func.declaration {
        return Ok(());
    }
    if func.layout().is_empty() {
        return Err(IrError::NoBody(func.name.clone()));
    }

    let in_layout: HashSet<BlockId> = func.layout().iter().copied().collect();

    for &block in func.layout() {
        let data = func.block(block);
        let Some((&last, body)) = data.insts.split_last() else {
            return Err(fail(func, format!("block '{}' is empty", data.name)));
        };
        if !func.inst(last).kind.is_terminator() {
            return Err(fail(func, format!("block '{}' does not end in a terminator", data.name)));
        }
        if let Some(&early) = body.iter().find(|&&i| func.inst(i).kind.is_terminator()) {
            return Err(fail(
                func,
                format!("terminator '{}' in the middle of block '{}'", func.inst(early).kind.opcode(), data.name),
            ));
        }

        for &inst in &data.insts {
            let inst_data = func.inst(inst);
            if inst_data.parent() != Some(block) {
                return Err(fail(func, format!("instruction {:?} has a stale parent link", inst)));
            }
            for succ in inst_data.kind.successors() {
                if !in_layout.contains(&succ) {
                    return Err(fail(func, format!("branch in '{}' targets a missing block", data.name)));
                }
            }
            for op in inst_data.kind.operands() {
                match op {
                    Value::Inst(def) => {
                        if def.0 as usize >= func.inst_count() || !func.is_live(def) {
                            return Err(fail(
                                func,
                                format!("'{}' in '{}' uses an erased value", inst_data.kind.opcode(), data.name),
                            ));
                        }
                        if func.inst(def).ty.is_void() {
                            return Err(fail(func, format!("'{}' uses a void result", inst_data.kind.opcode())));
                        }
                    }
                    Value::Arg(i) if i as usize >= func.params.len() => {
                        return Err(fail(func, format!("argument index {} out of range", i)));
                    }
                    _ => {}
                }
            }
            check_types(func, inst)?;
        }
    }

    Ok(())
}

fn check_types(func: &Function, inst: InstId) -> IrResult<()> {
    let data = func.inst(inst);
    let ty = |v: &Value| func.value_type(v);
    match &data.kind {
        InstKind::Binary { lhs, rhs, .. } | InstKind::Icmp { lhs, rhs, .. } => {
            let (l, r) = (ty(lhs), ty(rhs));
            if l.int_width().is_none() || l != r {
                return Err(fail(
                    func,
                    format!("'{}' operands have types {} and {}", data.kind.opcode(), l, r),
                ));
            }
        }
        InstKind::Load { ptr, .. } | InstKind::Store { ptr, .. } if ty(ptr) != Type::Ptr => {
            return Err(fail(func, format!("'{}' through a non-pointer", data.kind.opcode())));
        }
        InstKind::Gep { base, .. } if ty(base) != Type::Ptr => {
            return Err(fail(func, "gep base is not a pointer".to_string()));
        }
        InstKind::CondBr { cond, .. } | InstKind::Select { cond, .. } if ty(cond) != Type::i1() => {
            return Err(fail(func, format!("'{}' condition is not i1", data.kind.opcode())));
        }
        InstKind::Cast { op, value, to } => {
            let (Some(from), Some(to)) = (ty(value).int_width(), to.int_width()) else {
                return Err(fail(func, format!("'{}' on a non-integer", op.name())));
            };
            let ok = match op {
                CastOp::Trunc => to <= from,
                CastOp::ZExt | CastOp::SExt => to >= from,
            };
            if !ok {
                return Err(fail(func, format!("'{}' from i{} to i{}", op.name(), from, to)));
            }
        }
        InstKind::Ret { value } => {
            let actual = value.as_ref().map(ty).unwrap_or(Type::Void);
            if actual != func.ret {
                return Err(fail(func, format!("returns {} from a function returning {}", actual, func.ret)));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Verify every function of a module.
pub fn verify_module(module: &Module) -> IrResult<()> {
    module.functions.iter().try_for_each(verify_function)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_function_passes() {
        let module = Module::parse(
            "define i8 @f(i8 %a) {\nentry:\n  %x = xor i8 %a, 1\n  ret i8 %x\n}\n",
        )
        .unwrap();
        verify_module(&module).unwrap();
    }

    #[test]
    fn test_missing_terminator() {
        let module = Module::parse("define void @f() {\nentry:\n  %x = alloca i8\n}\n").unwrap();
        let err = verify_module(&module).unwrap_err();
        assert!(err.to_string().contains("does not end in a terminator"), "{}", err);
    }

    #[test]
    fn test_erased_operand_is_rejected() {
        let mut module = Module::parse(
            "define i8 @f(i8 %a) {\nentry:\n  %x = xor i8 %a, 1\n  %y = xor i8 %x, 1\n  ret i8 %y\n}\n",
        )
        .unwrap();
        let func = module.function_mut("f").unwrap();
        let x = func.inst_by_name("x").unwrap();
        func.erase(x);
        let err = verify_function(func).unwrap_err();
        assert!(err.to_string().contains("erased value"), "{}", err);
    }

    #[test]
    fn test_width_mismatch() {
        let module = Module::parse(
            "define void @f(i8 %a, i32 %b) {\nentry:\n  %x = and i8 %a, %b\n  ret void\n}\n",
        )
        .unwrap();
        assert!(verify_module(&module).is_err());
    }
}
