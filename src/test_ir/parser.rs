//! TIR (Test IR) parser implementation.

use super::*;
use hashbrown::HashMap;

pub fn parse_ir(text: &str) -> Result<TestIR, String> {
    let parser = Parser::new(text);
    parser.parse()
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    ir: TestIR,

    // Global maps
    funcs: HashMap<&'a str, u32>,

    // Per-function maps
    func: Function,
    blocks: HashMap<&'a str, u32>,
    regs: HashMap<&'a str, u32>,
    block_resolves: Vec<Resolve<'a>>,
}

/// Block operand waiting for its block to be defined.
#[derive(Debug)]
struct Resolve<'a> {
    name: &'a str,
    inst: u32,
    slot: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            ir: TestIR::new(),
            funcs: HashMap::new(),
            func: Function::default(),
            blocks: HashMap::new(),
            regs: HashMap::new(),
            block_resolves: Vec::new(),
        }
    }

    fn parse(mut self) -> Result<TestIR, String> {
        self.skip_whitespace(true);

        while !self.is_eof() {
            if let Err(e) = self.parse_function() {
                log::debug!("TIR parse error at position {}: {}", self.pos, e);
                if self.pos < self.text.len() {
                    let context_start = self.pos.saturating_sub(20);
                    let context_end = (self.pos + 20).min(self.text.len());
                    log::debug!("Context: '{}'", &self.text[context_start..context_end]);
                }
                return Err(e);
            }
            self.skip_whitespace(true);
        }

        Ok(self.ir)
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn current_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            self.pos += ch.len_utf8();
        }
    }

    fn skip_whitespace(&mut self, skip_newlines: bool) {
        while let Some(ch) = self.current_char() {
            if ch == ';' {
                // Skip comment line
                while let Some(ch) = self.current_char() {
                    if ch == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else if ch.is_whitespace() {
                if ch == '\n' && !skip_newlines {
                    break;
                }
                self.advance();
            } else {
                break;
            }
        }
    }

    fn try_read(&mut self, ch: char) -> bool {
        self.skip_whitespace(true);
        if self.current_char() == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> Result<(), String> {
        if !self.try_read(ch) {
            return Err(format!(
                "Expected '{}' but found {:?}",
                ch,
                self.current_char()
            ));
        }
        Ok(())
    }

    fn read_word(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' || ch == '.' {
                self.advance();
            } else {
                break;
            }
        }
        &self.text[start..self.pos]
    }

    fn read_identifier(&mut self) -> Result<&'a str, String> {
        self.skip_whitespace(true);
        match self.current_char() {
            Some(ch) if ch.is_alphabetic() || ch == '_' => Ok(self.read_word()),
            Some(ch) => Err(format!("Expected identifier but found '{}'", ch)),
            None => Err("Expected identifier but found EOF".to_string()),
        }
    }

    fn read_block_name(&mut self) -> Result<&'a str, String> {
        self.expect('^')?;
        self.read_identifier()
    }

    /// Peek at the rest of the current line without consuming it.
    fn at_line_end(&mut self) -> bool {
        self.skip_whitespace(false);
        matches!(self.current_char(), None | Some('\n'))
    }

    fn parse_function(&mut self) -> Result<(), String> {
        let func_name = self.read_identifier()?;
        let func_idx = self.ir.functions.len() as u32;

        if self.funcs.contains_key(func_name) {
            return Err(format!("Duplicate function definition: '{}'", func_name));
        }

        // Reset per-function state
        self.func = Function { name: func_name.to_string(), ..Function::default() };
        self.blocks.clear();
        self.regs.clear();
        self.block_resolves.clear();

        // Attributes
        self.expect('(')?;
        while !self.try_read(')') {
            match self.read_identifier()? {
                "ps" => self.func.pixel_shader = true,
                "uniform_outputs" => self.func.uniform_outputs = true,
                other => return Err(format!("Unknown function attribute: '{}'", other)),
            }
            if !self.try_read(',') && self.current_char() != Some(')') {
                return Err("Expected ',' or ')' in attribute list".to_string());
            }
        }

        self.expect('{')?;
        while !self.try_read('}') {
            if self.is_eof() {
                return Err(format!("Unterminated body of function '{}'", func_name));
            }
            self.parse_block()?;
        }
        if self.func.blocks.is_empty() {
            return Err(format!("Function '{}' has no blocks", func_name));
        }

        self.resolve_function_references()?;

        self.funcs.insert(func_name, func_idx);
        let func = std::mem::take(&mut self.func);
        self.ir.functions.push(func);
        Ok(())
    }

    fn parse_block(&mut self) -> Result<(), String> {
        let block_name = self.read_identifier()?;
        self.expect(':')?;

        let block_idx = self.func.blocks.len() as u32;
        if self.blocks.insert(block_name, block_idx).is_some() {
            return Err(format!("Duplicate block name: '{}'", block_name));
        }
        self.func.blocks.push(Block { name: block_name.to_string(), ..Block::default() });

        let mut seen_non_phi = false;
        loop {
            self.skip_whitespace(true);
            if self.is_eof() || self.current_char() == Some('}') || self.peek_block_label() {
                break;
            }

            let inst = self.parse_instruction(block_idx)?;
            let op = self.func.insts[inst as usize].op;
            if op == Opcode::Phi {
                if seen_non_phi {
                    return Err("PHI nodes must be at the beginning of a block".to_string());
                }
            } else {
                seen_non_phi = true;
            }
            self.func.blocks[block_idx as usize].insts.push(inst);
        }

        let terminated = self.func.blocks[block_idx as usize]
            .insts
            .last()
            .is_some_and(|&i| self.func.insts[i as usize].op.info().is_terminator);
        if !terminated {
            return Err(format!("Block '{}' does not end with a terminator", block_name));
        }
        Ok(())
    }

    fn peek_block_label(&mut self) -> bool {
        let saved = self.pos;
        let is_label = match self.current_char() {
            Some(ch) if ch.is_alphabetic() || ch == '_' => {
                self.read_word();
                self.current_char() == Some(':')
            }
            _ => false,
        };
        self.pos = saved;
        is_label
    }

    /// Register operand: `%name`, `%name:s` (definitions only) or `$phys`.
    fn parse_reg(&mut self, is_def: bool) -> Result<Reg, String> {
        self.skip_whitespace(true);
        if self.try_read('$') {
            let name = self.read_word();
            return PhysReg::parse(name)
                .map(Reg::Phys)
                .ok_or_else(|| format!("Unknown physical register: '${}'", name));
        }
        self.expect('%')?;
        let name = self.read_word();
        if name.is_empty() {
            return Err("Expected register name after '%'".to_string());
        }
        let scalar = if self.current_char() == Some(':') {
            if !is_def {
                return Err(format!("Register class only allowed on definitions: '%{}'", name));
            }
            self.advance();
            match self.read_word() {
                "s" => true,
                "v" => false,
                other => return Err(format!("Unknown register class: '{}'", other)),
            }
        } else {
            false
        };

        let idx = match self.regs.get(name) {
            Some(&idx) => idx,
            None => {
                let idx = self.func.regs.len() as u32;
                self.func.regs.push(VirtReg { name: name.to_string(), scalar: false, def: None });
                self.regs.insert(name, idx);
                idx
            }
        };
        if is_def {
            let reg = &mut self.func.regs[idx as usize];
            if reg.def.is_some() {
                return Err(format!("Register '%{}' defined more than once", name));
            }
            reg.scalar = scalar;
        }
        Ok(Reg::Virt(idx))
    }

    fn parse_instruction(&mut self, block_idx: u32) -> Result<u32, String> {
        self.skip_whitespace(true);

        // Definitions
        let mut defs = Vec::new();
        if matches!(self.current_char(), Some('%') | Some('$')) {
            loop {
                defs.push(self.parse_reg(true)?);
                if !self.try_read(',') {
                    break;
                }
            }
            self.expect('=')?;
        }

        let op_str = self.read_identifier()?;
        let op = Opcode::parse(op_str).ok_or_else(|| format!("Unknown operation: {}", op_str))?;
        let info = op.info();

        let inst_idx = self.func.insts.len() as u32;
        let mut inst = Inst::new(op, defs, Vec::new());
        inst.block = block_idx;

        // Operands
        if !self.at_line_end() {
            loop {
                self.skip_whitespace(false);
                match self.current_char() {
                    Some('[') if op == Opcode::Phi => {
                        self.advance();
                        let block = self.read_block_name()?;
                        self.expect(',')?;
                        let reg = self.parse_reg(false)?;
                        self.expect(']')?;
                        self.block_resolves.push(Resolve { name: block, inst: inst_idx, slot: inst.targets.len() });
                        inst.targets.push(0); // Placeholder
                        inst.uses.push(reg);
                    }
                    Some('^') => {
                        let block = self.read_block_name()?;
                        self.block_resolves.push(Resolve { name: block, inst: inst_idx, slot: inst.targets.len() });
                        inst.targets.push(0); // Placeholder
                    }
                    Some('%') | Some('$') => inst.uses.push(self.parse_reg(false)?),
                    Some(ch) if ch.is_alphabetic() => {
                        let word = self.read_word();
                        if op == Opcode::Else && word == "invert" {
                            inst.invert = true;
                            break;
                        }
                        return Err(format!("Unexpected operand '{}' for {}", word, info.name));
                    }
                    other => return Err(format!("Unexpected {:?} in operands of {}", other, info.name)),
                }
                if self.at_line_end() {
                    break;
                }
                if !self.try_read(',') {
                    self.skip_whitespace(false);
                    if op == Opcode::Else && self.current_char().is_some_and(char::is_alphabetic) {
                        continue;
                    }
                    return Err(format!("Expected ',' between operands of {}", info.name));
                }
            }
        }

        if info.target_count != !0 && inst.targets.len() != info.target_count as usize {
            return Err(format!(
                "Operation '{}' expects {} block operand(s), got {}",
                info.name,
                info.target_count,
                inst.targets.len()
            ));
        }

        Ok(self.func.push_inst(inst))
    }

    fn resolve_function_references(&mut self) -> Result<(), String> {
        for resolve in &self.block_resolves {
            let block = *self
                .blocks
                .get(resolve.name)
                .ok_or_else(|| format!("Undefined block: '{}'", resolve.name))?;
            self.func.insts[resolve.inst as usize].targets[resolve.slot] = block;
        }

        for reg in &self.func.regs {
            if reg.def.is_none() {
                return Err(format!("Register '%{}' used but never defined", reg.name));
            }
        }

        // Successors come from the block terminators.
        for block in &mut self.func.blocks {
            let Some(&last) = block.insts.last() else {
                continue;
            };
            for &target in &self.func.insts[last as usize].targets {
                if !block.succs.contains(&target) {
                    block.succs.push(target);
                }
            }
        }
        self.func.compute_preds();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_straight_line() {
        let ir = parse_ir(
            r#"
main(ps) {
entry:
  %a = v_op
  %b = v_op %a
  %t = sample %b
  store %t
  ret
}
"#,
        )
        .unwrap();

        assert_eq!(ir.functions.len(), 1);
        let func = &ir.functions[0];
        assert_eq!(func.name, "main");
        assert!(func.pixel_shader);
        assert!(!func.uniform_outputs);
        assert_eq!(func.blocks.len(), 1);
        assert_eq!(func.blocks[0].insts.len(), 5);
        assert_eq!(func.insts[2].op, Opcode::Sample);
        assert_eq!(func.insts[2].uses, vec![Reg::Virt(1)]);
    }

    #[test]
    fn test_parse_branches_and_preds() {
        let ir = parse_ir(
            r#"
f(ps) {
entry:
  $vcc = v_op
  condbr $vcc, ^left, ^right
left:
  br ^join
right:
  br ^join
join:
  ret
}
"#,
        )
        .unwrap();

        let func = &ir.functions[0];
        assert_eq!(func.blocks[0].succs, vec![1, 2]);
        assert_eq!(func.blocks[3].preds, vec![1, 2]);
        assert!(func.blocks[0].preds.is_empty());
    }

    #[test]
    fn test_parse_phi_forward_reference() {
        let ir = parse_ir(
            r#"
loop(ps) {
entry:
  %init = v_op
  br ^body
body:
  %x = phi [^entry, %init], [^body, %next]
  %next = v_op %x
  $scc = s_cmp %next
  s_cbranch $scc, ^body, ^exit
exit:
  ret
}
"#,
        )
        .unwrap();

        let func = &ir.functions[0];
        let phi = &func.insts[func.blocks[1].insts[0] as usize];
        assert_eq!(phi.op, Opcode::Phi);
        assert_eq!(phi.targets, vec![0, 1]);
        assert_eq!(func.blocks[1].preds, vec![0, 1]);
    }

    #[test]
    fn test_parse_scalar_class_and_invert() {
        let ir = parse_ir(
            r#"
f() {
entry:
  %m:s = live
  %e:s = else %m, ^exit invert
exit:
  ret
}
"#,
        )
        .unwrap();

        let func = &ir.functions[0];
        assert!(!func.pixel_shader);
        assert!(func.regs[0].scalar);
        assert!(func.insts[1].invert);
    }

    #[test]
    fn test_reject_double_definition() {
        let err = parse_ir("f() {\nentry:\n  %a = v_op\n  %a = v_op\n  ret\n}\n").unwrap_err();
        assert!(err.contains("defined more than once"));
    }

    #[test]
    fn test_reject_missing_terminator() {
        let err = parse_ir("f() {\nentry:\n  %a = v_op\n}\n").unwrap_err();
        assert!(err.contains("terminator"));
    }

    #[test]
    fn test_reject_undefined_block() {
        let err = parse_ir("f() {\nentry:\n  br ^nowhere\n}\n").unwrap_err();
        assert!(err.contains("Undefined block"));
    }

    #[test]
    fn test_print_round_trip() {
        let text = r#"f(ps) {
entry:
  %a = v_op
  %m:s = live
  $scc = s_cmp %a
  s_cbranch $scc, ^exit, ^exit
exit:
  %e:s = else %m, ^exit invert
}
"#;
        let ir = parse_ir(text).unwrap();
        let printed = ir.print();
        assert_eq!(printed, text);
        assert_eq!(parse_ir(&printed).unwrap(), ir);
    }
}
