//! Erasure of instructions made dead by the rewriting stages.
//!
//! Runs strictly after every stage has finished inserting code. Candidates
//! come from the session's erase set; a candidate is only removed while it is
//! still attached to a block and no live instruction uses its result, so an
//! original whose value escaped the rewrite survives instead of dangling.

use crate::core::TransformSession;
use crate::ir::Function;

/// Tag prefixes owned by the slicer.
const SLICER_TAG_PREFIXES: [&str; 3] = ["marker.", "bitsliced", "sliced."];

/// Erase every dead candidate. Returns the number of erased instructions.
pub fn erase_dead(func: &mut Function, session: &TransformSession) -> usize {
    let candidates = session.erase_candidates();
    let mut erased = 0;

    // Erasing a user can free its operands, so repeat until nothing moves.
    loop {
        let users = func.users();
        let before = erased;
        for &inst in &candidates {
            if !func.is_live(inst) {
                continue;
            }
            let in_use = users
                .get(&inst)
                .is_some_and(|list| list.iter().any(|&user| func.is_live(user)));
            if in_use {
                continue;
            }
            if func.erase(inst) {
                log::trace!("{}: erased {}", func.name, func.inst(inst).kind.opcode());
                erased += 1;
            }
        }
        if erased == before {
            break;
        }
    }

    let kept = candidates.iter().filter(|&&inst| func.is_live(inst)).count();
    if kept > 0 {
        log::debug!("{}: {} scheduled instruction(s) still in use, kept", func.name, kept);
    }
    session.record_erased(erased);
    erased
}

/// Drop the slicer's tags from every live instruction.
pub fn strip_tags(func: &mut Function) {
    for inst in func.program_order() {
        func.inst_mut(inst)
            .tags
            .retain(|tag| !SLICER_TAG_PREFIXES.iter().any(|prefix| tag.starts_with(prefix)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Module;
    use bumpalo::Bump;

    const SRC: &str = r#"
define i8 @f() {
entry:
  %buf = alloca [4 x i8]
  %p = gep [4 x i8], ptr %buf, i64 0, i64 1
  %v = load i8, ptr %p
  %dead = xor i8 %v, 1
  %kept = add i8 %v, 2
  call void @end_slice(ptr %buf)
  ret i8 %kept
}
"#;

    #[test]
    fn test_erase_dead_keeps_used_values() {
        let _ = env_logger::builder().is_test(true).try_init();
        let arena = Bump::new();
        let session = TransformSession::new(&arena);
        let mut module = Module::parse(SRC).unwrap();
        let func = module.function_mut("f").unwrap();
        session.begin_function("f");

        let dead = func.inst_by_name("dead").unwrap();
        let p = func.inst_by_name("p").unwrap();
        let marker = func.program_order()[5];
        session.schedule_erase(p);
        session.schedule_erase(dead);
        session.schedule_erase(marker);

        assert_eq!(erase_dead(func, &session), 2);
        assert!(!func.is_live(dead));
        assert!(!func.is_live(marker));
        assert!(func.is_live(p));
        assert_eq!(session.stats().instructions_erased, 2);
    }

    #[test]
    fn test_erase_dead_twice_is_noop() {
        let arena = Bump::new();
        let session = TransformSession::new(&arena);
        let mut module = Module::parse(SRC).unwrap();
        let func = module.function_mut("f").unwrap();
        let dead = func.inst_by_name("dead").unwrap();
        session.schedule_erase(dead);

        assert_eq!(erase_dead(func, &session), 1);
        assert_eq!(erase_dead(func, &session), 0);
    }

    #[test]
    fn test_strip_tags_keeps_foreign_tags() {
        let mut module = Module::parse(SRC).unwrap();
        let func = module.function_mut("f").unwrap();
        let buf = func.inst_by_name("buf").unwrap();
        func.add_tag(buf, "bitsliced");
        func.add_tag(buf, "marker.end_slice");
        func.add_tag(buf, "user.note");

        strip_tags(func);
        assert_eq!(func.inst(buf).tags, vec!["user.note".to_string()]);
    }
}
