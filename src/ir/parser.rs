//! Textual IR parser.
//!
//! ```text
//! module   := (global | declare | define)*
//! global   := 'global' @name '=' (c"..." | type (int | '[' int,* ']' | 'zeroinitializer'))
//! declare  := 'declare' type @name '(' type,* ')'
//! define   := 'define' type @name '(' (type %name),* ')' '{' (label ':' inst*)+ '}'
//! inst     := [%name '='] opcode operands ('#' tag)*
//! ```
//!
//! Local values and block labels may be used before they are defined; both are
//! resolved once the function body has been read. `;` starts a comment that runs
//! to the end of the line.

use super::*;
use hashbrown::HashMap;

pub fn parse_module(text: &str) -> Result<Module, String> {
    let parser = Parser::new(text);
    parser.parse()
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    module: Module,

    // Per-function maps
    blocks: HashMap<&'a str, BlockId>,
    values: HashMap<&'a str, Value>,
    block_resolves: Vec<Resolve<'a>>,
    value_resolves: Vec<Resolve<'a>>,
}

#[derive(Debug)]
struct Resolve<'a> {
    name: &'a str,
    inst: InstId,
    slot: usize,
}

/// Operand as written; locals may still be forward references.
#[derive(Debug, Clone, Copy)]
enum Operand<'a> {
    Ready(Value),
    Pending(&'a str),
}

/// An instruction read from the text whose forward references are still open.
struct ParsedInst<'a> {
    kind: InstKind,
    ty: Type,
    values: Vec<(usize, &'a str)>,
    blocks: Vec<(usize, &'a str)>,
}

impl<'a> ParsedInst<'a> {
    fn new(kind: InstKind, ty: Type) -> Self {
        Self { kind, ty, values: Vec::new(), blocks: Vec::new() }
    }
}

/// Placeholder for an operand that is patched during resolution.
const UNRESOLVED: Value = Value::Arg(u32::MAX);
const UNRESOLVED_BLOCK: BlockId = BlockId(u32::MAX);

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            module: Module::new(),
            blocks: HashMap::new(),
            values: HashMap::new(),
            block_resolves: Vec::new(),
            value_resolves: Vec::new(),
        }
    }

    fn parse(mut self) -> Result<Module, String> {
        self.skip_whitespace();

        while !self.is_eof() {
            if let Err(e) = self.parse_top_level() {
                let (line, column) = self.line_col();
                log::debug!("parse error near '{}'", self.context());
                return Err(format!("{} (line {}, column {})", e, line, column));
            }
            self.skip_whitespace();
        }

        Ok(self.module)
    }

    fn line_col(&self) -> (usize, usize) {
        let upto = &self.text[..self.pos.min(self.text.len())];
        let line = upto.matches('\n').count() + 1;
        let column = upto.rfind('\n').map(|nl| upto.len() - nl).unwrap_or(upto.len() + 1);
        (line, column)
    }

    fn context(&self) -> &'a str {
        let start = self.pos.saturating_sub(20);
        let end = (self.pos + 20).min(self.text.len());
        self.text.get(start..end).unwrap_or("")
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn current_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn peek_char(&self, offset: usize) -> Option<char> {
        self.text[self.pos..].chars().nth(offset)
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            self.pos += ch.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch == ';' {
                // Skip comment line
                while let Some(ch) = self.current_char() {
                    self.advance();
                    if ch == '\n' {
                        break;
                    }
                }
            } else if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn try_read(&mut self, ch: char) -> bool {
        self.skip_whitespace();
        if self.current_char() == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> Result<(), String> {
        if !self.try_read(ch) {
            return Err(format!("Expected '{}' but found {:?}", ch, self.current_char()));
        }
        Ok(())
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), String> {
        let word = self.read_identifier()?;
        if word != keyword {
            return Err(format!("Expected '{}' but found '{}'", keyword, word));
        }
        Ok(())
    }

    fn is_ident_char(ch: char) -> bool {
        ch.is_ascii_alphanumeric() || ch == '_' || ch == '.'
    }

    fn read_identifier(&mut self) -> Result<&'a str, String> {
        self.skip_whitespace();
        let start = self.pos;

        match self.current_char() {
            Some(ch) if Self::is_ident_char(ch) => {}
            Some(ch) => return Err(format!("Expected identifier but found '{}'", ch)),
            None => return Err("Expected identifier but found EOF".to_string()),
        }

        while let Some(ch) = self.current_char() {
            if !Self::is_ident_char(ch) {
                break;
            }
            self.advance();
        }

        Ok(&self.text[start..self.pos])
    }

    fn read_sigil_name(&mut self, sigil: char) -> Result<&'a str, String> {
        self.expect(sigil)?;
        // The name follows the sigil directly.
        match self.current_char() {
            Some(ch) if Self::is_ident_char(ch) => self.read_identifier(),
            other => Err(format!("Expected name after '{}' but found {:?}", sigil, other)),
        }
    }

    fn read_number(&mut self) -> Result<i128, String> {
        self.skip_whitespace();
        let start = self.pos;
        if self.current_char() == Some('-') {
            self.advance();
        }
        let hex = self.current_char() == Some('0') && self.peek_char(1) == Some('x');
        if hex {
            self.advance();
            self.advance();
        }
        let digits_start = self.pos;
        while let Some(ch) = self.current_char() {
            if ch.is_ascii_hexdigit() && (hex || ch.is_ascii_digit()) {
                self.advance();
            } else {
                break;
            }
        }
        let digits = &self.text[digits_start..self.pos];
        if digits.is_empty() {
            return Err(format!("Expected number but found {:?}", self.current_char()));
        }
        let magnitude = i128::from_str_radix(digits, if hex { 16 } else { 10 })
            .map_err(|e| format!("Invalid number '{}': {}", &self.text[start..self.pos], e))?;
        Ok(if self.text[start..].starts_with('-') { -magnitude } else { magnitude })
    }

    fn read_string_literal(&mut self) -> Result<String, String> {
        self.expect('"')?;
        let mut bytes = Vec::new();
        loop {
            match self.current_char() {
                None => return Err("Unterminated string literal".to_string()),
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    if self.current_char() == Some('\\') {
                        self.advance();
                        bytes.push(b'\\');
                        continue;
                    }
                    let hex = self.text.get(self.pos..self.pos + 2).unwrap_or("");
                    let byte = u8::from_str_radix(hex, 16)
                        .map_err(|_| format!("Invalid escape '\\{}'", hex))?;
                    bytes.push(byte);
                    self.pos += 2;
                }
                Some(ch) => {
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                    self.advance();
                }
            }
        }
        String::from_utf8(bytes).map_err(|e| format!("String literal is not UTF-8: {}", e))
    }

    fn parse_top_level(&mut self) -> Result<(), String> {
        match self.read_identifier()? {
            "global" => self.parse_global(),
            "declare" => self.parse_declaration(),
            "define" => self.parse_function(),
            other => Err(format!("Expected 'global', 'declare' or 'define' but found '{}'", other)),
        }
    }

    fn parse_type(&mut self) -> Result<Type, String> {
        if self.try_read('[') {
            let len = self.read_number()?;
            if len < 0 {
                return Err(format!("Negative array length {}", len));
            }
            self.expect_keyword("x")?;
            let elem = self.parse_type()?;
            self.expect(']')?;
            return Ok(Type::array(len as u64, elem));
        }

        let word = self.read_identifier()?;
        match word {
            "void" => Ok(Type::Void),
            "ptr" => Ok(Type::Ptr),
            _ => {
                let width = word
                    .strip_prefix('i')
                    .and_then(|w| w.parse::<u32>().ok())
                    .filter(|w| (1..=64).contains(w))
                    .ok_or_else(|| format!("Unknown type '{}'", word))?;
                Ok(Type::Int(width))
            }
        }
    }

    fn parse_global(&mut self) -> Result<(), String> {
        let name = self.read_sigil_name('@')?;
        if self.module.globals.by_name(name).is_some() {
            return Err(format!("Duplicate global @{}", name));
        }
        self.expect('=')?;
        self.skip_whitespace();

        let global = if self.current_char() == Some('c') && self.peek_char(1) == Some('"') {
            self.advance();
            let s = self.read_string_literal()?;
            let ty = Type::array(s.len() as u64 + 1, Type::i8());
            Global { name: name.to_string(), ty, init: GlobalInit::Str(s) }
        } else {
            let ty = self.parse_type()?;
            self.skip_whitespace();
            let init = if self.try_read('[') {
                let mut values = Vec::new();
                if !self.try_read(']') {
                    loop {
                        values.push(self.read_number()? as u64);
                        if self.try_read(']') {
                            break;
                        }
                        self.expect(',')?;
                    }
                }
                if ty.array_len() != Some(values.len() as u64) {
                    return Err(format!(
                        "Global @{} has {} initializers for type {}",
                        name,
                        values.len(),
                        ty
                    ));
                }
                GlobalInit::Ints(values)
            } else if self.text[self.pos..].starts_with("zeroinitializer") {
                self.read_identifier()?;
                GlobalInit::Zero
            } else {
                GlobalInit::Ints(vec![self.read_number()? as u64])
            };
            Global { name: name.to_string(), ty, init }
        };

        self.module.globals.push(global);
        Ok(())
    }

    fn parse_declaration(&mut self) -> Result<(), String> {
        let ret = self.parse_type()?;
        let name = self.read_sigil_name('@')?;
        self.expect('(')?;
        let mut params = Vec::new();
        if !self.try_read(')') {
            loop {
                let ty = self.parse_type()?;
                self.skip_whitespace();
                let pname = if self.current_char() == Some('%') {
                    self.read_sigil_name('%')?.to_string()
                } else {
                    format!("arg{}", params.len())
                };
                params.push(Param { name: pname, ty });
                if self.try_read(')') {
                    break;
                }
                self.expect(',')?;
            }
        }
        let mut func = Function::new(name, params, ret);
        func.declaration = true;
        self.module.functions.push(func);
        Ok(())
    }

    fn parse_function(&mut self) -> Result<(), String> {
        self.blocks.clear();
        self.values.clear();
        self.block_resolves.clear();
        self.value_resolves.clear();

        let ret = self.parse_type()?;
        let name = self.read_sigil_name('@')?;
        if self.module.function(name).is_some() {
            return Err(format!("Duplicate function @{}", name));
        }

        self.expect('(')?;
        let mut params = Vec::new();
        if !self.try_read(')') {
            loop {
                let ty = self.parse_type()?;
                let pname = self.read_sigil_name('%')?;
                if self.values.contains_key(pname) {
                    return Err(format!("Duplicate parameter %{}", pname));
                }
                self.values.insert(pname, Value::Arg(params.len() as u32));
                params.push(Param { name: pname.to_string(), ty });
                if self.try_read(')') {
                    break;
                }
                self.expect(',')?;
            }
        }

        let mut func = Function::new(name, params, ret);
        self.expect('{')?;

        let mut current: Option<BlockId> = None;
        loop {
            if self.try_read('}') {
                break;
            }
            if self.is_eof() {
                return Err(format!("Unexpected EOF in function @{}", name));
            }

            // A label is an identifier directly followed by ':'.
            let save = self.pos;
            if self.current_char().is_some_and(Self::is_ident_char) {
                let label = self.read_identifier()?;
                if self.current_char() == Some(':') {
                    self.advance();
                    if self.blocks.contains_key(label) {
                        return Err(format!("Duplicate block label '{}'", label));
                    }
                    let block = func.add_block(label);
                    self.blocks.insert(label, block);
                    current = Some(block);
                    continue;
                }
                self.pos = save;
            }

            let block = current.ok_or_else(|| "Instruction outside of a block".to_string())?;
            self.parse_instruction(&mut func, block)?;
        }

        if func.layout().is_empty() {
            return Err(format!("Function @{} has no blocks", name));
        }

        self.resolve_references(&mut func)?;
        self.module.functions.push(func);
        Ok(())
    }

    fn parse_operand(&mut self, ty: &Type) -> Result<Operand<'a>, String> {
        self.skip_whitespace();
        match self.current_char() {
            Some('%') => {
                let name = self.read_sigil_name('%')?;
                Ok(match self.values.get(name) {
                    Some(v) => Operand::Ready(*v),
                    None => Operand::Pending(name),
                })
            }
            Some('@') => {
                let name = self.read_sigil_name('@')?;
                let id = self
                    .module
                    .globals
                    .by_name(name)
                    .ok_or_else(|| format!("Unknown global @{}", name))?;
                Ok(Operand::Ready(Value::Global(id)))
            }
            Some(ch) if ch == '-' || ch.is_ascii_digit() => {
                let width = ty
                    .int_width()
                    .ok_or_else(|| format!("Integer constant used with type {}", ty))?;
                let n = self.read_number()?;
                Ok(Operand::Ready(Value::int(width, n as u64)))
            }
            Some(_) => match self.read_identifier()? {
                "true" => Ok(Operand::Ready(Value::int(1, 1))),
                "false" => Ok(Operand::Ready(Value::int(1, 0))),
                other => Err(format!("Expected operand but found '{}'", other)),
            },
            None => Err("Expected operand but found EOF".to_string()),
        }
    }

    fn parse_typed_operand(&mut self) -> Result<(Type, Operand<'a>), String> {
        let ty = self.parse_type()?;
        let op = self.parse_operand(&ty)?;
        Ok((ty, op))
    }

    fn parse_block_ref(&mut self) -> Result<&'a str, String> {
        self.read_sigil_name('^')
    }

    fn parse_instruction(&mut self, func: &mut Function, block: BlockId) -> Result<(), String> {
        let mut name = None;
        self.skip_whitespace();
        if self.current_char() == Some('%') {
            let n = self.read_sigil_name('%')?;
            self.expect('=')?;
            if self.values.contains_key(n) || func.is_name_taken(n) {
                return Err(format!("Duplicate value name %{}", n));
            }
            name = Some(n);
        }

        let opcode = self.read_identifier()?;
        let parsed = self.parse_instruction_body(opcode)?;

        if parsed.ty.is_void() && name.is_some() {
            return Err(format!("Instruction '{}' produces no value to name", opcode));
        }
        if !parsed.ty.is_void() && name.is_none() {
            return Err(format!("Instruction '{}' needs a result name", opcode));
        }

        let inst = func.create_inst(parsed.kind, parsed.ty, name);
        func.push_inst(block, inst);
        if let Some(n) = name {
            self.values.insert(n, Value::Inst(inst));
        }
        for (slot, pending) in parsed.values {
            self.value_resolves.push(Resolve { name: pending, inst, slot });
        }
        for (slot, pending) in parsed.blocks {
            self.block_resolves.push(Resolve { name: pending, inst, slot });
        }

        while self.try_read('#') {
            let tag = self.read_identifier()?;
            func.add_tag(inst, tag);
        }

        Ok(())
    }

    fn parse_instruction_body(&mut self, opcode: &str) -> Result<ParsedInst<'a>, String> {
        let mut pending = Vec::new();
        let take = |op: Operand<'a>, slot: usize, pending: &mut Vec<(usize, &'a str)>| match op {
            Operand::Ready(v) => v,
            Operand::Pending(n) => {
                pending.push((slot, n));
                UNRESOLVED
            }
        };

        let mut parsed = match opcode {
            "alloca" => {
                let ty = self.parse_type()?;
                ParsedInst::new(InstKind::Alloca { ty }, Type::Ptr)
            }
            "gep" => {
                let elem = self.parse_type()?;
                self.expect(',')?;
                let (_, base) = self.parse_typed_operand()?;
                let base = take(base, 0, &mut pending);
                let mut indices = Vec::new();
                while self.try_read(',') {
                    let (_, idx) = self.parse_typed_operand()?;
                    indices.push(take(idx, indices.len() + 1, &mut pending));
                }
                if indices.is_empty() {
                    return Err("gep needs at least one index".to_string());
                }
                ParsedInst::new(InstKind::Gep { elem, base, indices }, Type::Ptr)
            }
            "load" => {
                let ty = self.parse_type()?;
                self.expect(',')?;
                let (_, ptr) = self.parse_typed_operand()?;
                let ptr = take(ptr, 0, &mut pending);
                ParsedInst::new(InstKind::Load { ty: ty.clone(), ptr }, ty)
            }
            "store" => {
                let (_, value) = self.parse_typed_operand()?;
                let value = take(value, 0, &mut pending);
                self.expect(',')?;
                let (_, ptr) = self.parse_typed_operand()?;
                let ptr = take(ptr, 1, &mut pending);
                ParsedInst::new(InstKind::Store { value, ptr }, Type::Void)
            }
            "icmp" => {
                let pred_name = self.read_identifier()?;
                let pred = IcmpPred::parse(pred_name)
                    .ok_or_else(|| format!("Unknown icmp predicate '{}'", pred_name))?;
                let (ty, lhs) = self.parse_typed_operand()?;
                let lhs = take(lhs, 0, &mut pending);
                self.expect(',')?;
                let rhs = self.parse_operand(&ty)?;
                let rhs = take(rhs, 1, &mut pending);
                ParsedInst::new(InstKind::Icmp { pred, lhs, rhs }, Type::i1())
            }
            "select" => {
                let (_, cond) = self.parse_typed_operand()?;
                let cond = take(cond, 0, &mut pending);
                self.expect(',')?;
                let (ty, on_true) = self.parse_typed_operand()?;
                let on_true = take(on_true, 1, &mut pending);
                self.expect(',')?;
                let (_, on_false) = self.parse_typed_operand()?;
                let on_false = take(on_false, 2, &mut pending);
                ParsedInst::new(InstKind::Select { cond, on_true, on_false }, ty)
            }
            "call" => {
                let ret = self.parse_type()?;
                let callee = self.read_sigil_name('@')?.to_string();
                self.expect('(')?;
                let mut args = Vec::new();
                if !self.try_read(')') {
                    loop {
                        let (_, arg) = self.parse_typed_operand()?;
                        args.push(take(arg, args.len(), &mut pending));
                        if self.try_read(')') {
                            break;
                        }
                        self.expect(',')?;
                    }
                }
                ParsedInst::new(InstKind::Call { callee, args }, ret)
            }
            "br" => {
                let target = self.parse_block_ref()?;
                let mut p = ParsedInst::new(InstKind::Br { target: UNRESOLVED_BLOCK }, Type::Void);
                p.blocks.push((0, target));
                p
            }
            "condbr" => {
                let cond = self.parse_operand(&Type::i1())?;
                let cond = take(cond, 0, &mut pending);
                self.expect(',')?;
                let then_dest = self.parse_block_ref()?;
                self.expect(',')?;
                let else_dest = self.parse_block_ref()?;
                let kind = InstKind::CondBr {
                    cond,
                    then_dest: UNRESOLVED_BLOCK,
                    else_dest: UNRESOLVED_BLOCK,
                };
                let mut p = ParsedInst::new(kind, Type::Void);
                p.blocks.push((0, then_dest));
                p.blocks.push((1, else_dest));
                p
            }
            "ret" => {
                let ty = self.parse_type()?;
                let value = if ty.is_void() {
                    None
                } else {
                    let v = self.parse_operand(&ty)?;
                    Some(take(v, 0, &mut pending))
                };
                ParsedInst::new(InstKind::Ret { value }, Type::Void)
            }
            other => {
                if let Some(op) = BinOp::parse(other) {
                    let (ty, lhs) = self.parse_typed_operand()?;
                    let lhs = take(lhs, 0, &mut pending);
                    self.expect(',')?;
                    let rhs = self.parse_operand(&ty)?;
                    let rhs = take(rhs, 1, &mut pending);
                    ParsedInst::new(InstKind::Binary { op, lhs, rhs }, ty)
                } else if let Some(op) = CastOp::parse(other) {
                    let (_, value) = self.parse_typed_operand()?;
                    let value = take(value, 0, &mut pending);
                    self.expect_keyword("to")?;
                    let to = self.parse_type()?;
                    ParsedInst::new(InstKind::Cast { op, value, to: to.clone() }, to)
                } else {
                    return Err(format!("Unknown instruction '{}'", other));
                }
            }
        };

        parsed.values = pending;
        Ok(parsed)
    }

    fn resolve_references(&mut self, func: &mut Function) -> Result<(), String> {
        for resolve in self.value_resolves.drain(..) {
            let value = *self
                .values
                .get(resolve.name)
                .ok_or_else(|| format!("Unknown value %{}", resolve.name))?;
            let slot = func
                .inst_mut(resolve.inst)
                .kind
                .operand_mut(resolve.slot)
                .ok_or_else(|| format!("Bad operand slot for %{}", resolve.name))?;
            *slot = value;
        }

        for resolve in self.block_resolves.drain(..) {
            let block = *self
                .blocks
                .get(resolve.name)
                .ok_or_else(|| format!("Unknown block ^{}", resolve.name))?;
            let slot = func
                .inst_mut(resolve.inst)
                .kind
                .successor_mut(resolve.slot)
                .ok_or_else(|| format!("Bad successor slot for ^{}", resolve.name))?;
            *slot = block;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_globals() {
        let module = parse_module(
            r#"
global @table = [4 x i8] [3, 0, 2, 1]
global @desc = c"out:all::^::a:all-b:all"
global @zero = [8 x i32] zeroinitializer
global @esc = c"a\3Bb"
"#,
        )
        .unwrap();

        let table = module.globals.by_name("table").unwrap();
        assert_eq!(module.globals.get(table).bytes(), vec![3, 0, 2, 1]);

        let desc = module.globals.by_name("desc").unwrap();
        assert_eq!(module.globals.string(desc), Some("out:all::^::a:all-b:all"));
        assert_eq!(module.globals.get(desc).ty, Type::array(24, Type::i8()));

        let zero = module.globals.by_name("zero").unwrap();
        assert_eq!(module.globals.get(zero).bytes().len(), 32);

        let esc = module.globals.by_name("esc").unwrap();
        assert_eq!(module.globals.string(esc), Some("a;b"));
    }

    #[test]
    fn test_parse_function_with_forward_refs() {
        let module = parse_module(
            r#"
define i32 @f(i32 %n) {
entry:
  %c = icmp ult i32 %n, 16
  condbr %c, ^then, ^done
then:
  br ^done
done:
  %r = add i32 %n, 1 ; trailing comment
  ret i32 %r
}
"#,
        )
        .unwrap();

        let func = module.function("f").unwrap();
        assert_eq!(func.layout().len(), 3);
        let order = func.program_order();
        assert_eq!(order.len(), 5);
        match &func.inst(order[1]).kind {
            InstKind::CondBr { then_dest, else_dest, .. } => {
                assert_eq!(func.block(*then_dest).name, "then");
                assert_eq!(func.block(*else_dest).name, "done");
            }
            other => panic!("expected condbr, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_forward_value_reference() {
        let module = parse_module(
            r#"
define i8 @f() {
entry:
  br ^b
a:
  ret i8 %v
b:
  %v = add i8 1, 2
  br ^a
}
"#,
        )
        .unwrap();
        let func = module.function("f").unwrap();
        let v = func.inst_by_name("v").unwrap();
        let ret = func.block(func.block_by_name("a").unwrap()).insts[0];
        assert_eq!(func.inst(ret).kind.operands(), vec![Value::Inst(v)]);
    }

    #[test]
    fn test_parse_gep_call_and_tags() {
        let module = parse_module(
            r#"
declare void @begin_slice(ptr, i32, i32)

define void @main() {
entry:
  %buf = alloca [16 x i8] #bitsliced
  %p = gep [16 x i8], ptr %buf, i64 0, i64 3
  call void @begin_slice(ptr %buf, i32 1, i32 16) #marker.begin_slice
  ret void
}
"#,
        )
        .unwrap();

        assert!(module.function("begin_slice").unwrap().declaration);
        let func = module.function("main").unwrap();
        let buf = func.inst_by_name("buf").unwrap();
        assert!(func.has_tag(buf, "bitsliced"));
        let p = func.inst_by_name("p").unwrap();
        match &func.inst(p).kind {
            InstKind::Gep { elem, indices, .. } => {
                assert_eq!(*elem, Type::array(16, Type::i8()));
                assert_eq!(indices, &vec![Value::i64(0), Value::i64(3)]);
            }
            other => panic!("expected gep, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors_report_position() {
        let err = parse_module("define void @f() {\nentry:\n  %x = frob i8 1\n}").unwrap_err();
        assert!(err.contains("Unknown instruction 'frob'"), "{}", err);
        assert!(err.contains("line 3"), "{}", err);

        let err = parse_module("define void @f() {\nentry:\n  br ^nowhere\n}").unwrap_err();
        assert!(err.contains("Unknown block ^nowhere"), "{}", err);

        let err = parse_module("define void @f() {\nentry:\n  %x = add i8 1, 2\n  %x = add i8 1, 2\n  ret void\n}")
            .unwrap_err();
        assert!(err.contains("Duplicate value name %x"), "{}", err);
    }
}
