use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use ostinato_ir::{
    dfg::BlockId, BinaryOp, CastOp, CmpOp, Function, FunctionFlags, GlobalVariableData,
    GvInitializer, Immediate, InstData, Linkage, Module, Param, Signature, SourceLoc, Type,
    ValueId,
};
use smallvec::SmallVec;

use crate::{
    lexer::{lex, Spanned, Token},
    ParseError,
};

/// Parse a module in canonical textual form.
pub fn parse_module(src: &str) -> Result<Module, ParseError> {
    let tokens = lex(src)?;
    Parser::new(tokens).parse()
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

struct PendingBody {
    func_name: SmolStr,
    body_start: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn parse(mut self) -> Result<Module, ParseError> {
        self.skip_newlines();
        self.expect_keyword("module")?;
        let name = self.expect_percent()?;
        let mut module = Module::new(name);

        // First pass: globals and every function header, so that call
        // operands resolve no matter the order of definitions.
        let mut bodies = Vec::new();
        loop {
            self.skip_newlines();
            let Some(token) = self.peek() else { break };
            match token {
                Token::Ident(id) if id == "global" => self.parse_global(&mut module)?,
                Token::Ident(id) if id == "declare" => {
                    self.bump();
                    let (sig, flags) = self.parse_func_header()?;
                    let mut func = Function::new(sig);
                    func.flags = flags;
                    module.push_function(func);
                }
                Token::Ident(id) if id == "func" => {
                    let (sig, flags) = self.parse_func_header()?;
                    self.expect(Token::LBrace)?;
                    let func_name: SmolStr = sig.name().into();
                    let mut func = Function::new(sig);
                    func.flags = flags;
                    module.push_function(func);
                    bodies.push(PendingBody {
                        func_name,
                        body_start: self.pos,
                    });
                    self.skip_body()?;
                }
                other => {
                    return Err(self.unexpected("`global`, `declare` or `func`", other.clone()))
                }
            }
        }

        // Second pass: function bodies.
        for pending in bodies {
            self.pos = pending.body_start;
            let func_ref = module
                .func_by_symbol(&pending.func_name)
                .expect("function was registered in the first pass");
            let sig = module.funcs[func_ref].sig.clone();
            let flags = module.funcs[func_ref].flags;
            let mut func = Function::new(sig);
            func.flags = flags;
            self.parse_body(&mut func, &module)?;
            module.funcs[func_ref] = func;
        }

        Ok(module)
    }

    fn parse_global(&mut self, module: &mut Module) -> Result<(), ParseError> {
        self.expect_keyword("global")?;
        let linkage = self.parse_linkage()?;
        let is_const = self.eat_keyword("const");
        let ty = self.parse_type()?;
        let symbol = self.expect_dollar()?;

        let init = if self.eat(Token::Eq) {
            Some(self.parse_gv_initializer(ty)?)
        } else {
            None
        };

        module
            .gv_store
            .make_gv(GlobalVariableData::new(symbol, ty, linkage, is_const, init));
        Ok(())
    }

    fn parse_gv_initializer(&mut self, ty: Type) -> Result<GvInitializer, ParseError> {
        // `x"6d6f64"` — opaque byte blob.
        if matches!(self.peek(), Some(Token::Ident(id)) if id == "x")
            && matches!(self.peek_nth(1), Some(Token::Str(_)))
        {
            self.bump();
            let Token::Str(hex) = self.next_token()? else {
                unreachable!("peeked a string literal");
            };
            let line = self.line();
            if hex.len() % 2 != 0 {
                return Err(ParseError::BadInteger { line });
            }
            let bytes = (0..hex.len() / 2)
                .map(|i| u8::from_str_radix(&hex[2 * i..2 * i + 2], 16))
                .collect::<Result<Vec<u8>, _>>()
                .map_err(|_| ParseError::BadInteger { line })?;
            return Ok(GvInitializer::Bytes(bytes));
        }

        if self.eat(Token::LBracket) {
            let mut elems = Vec::new();
            loop {
                if self.eat(Token::RBracket) {
                    break;
                }
                if !elems.is_empty() {
                    self.expect(Token::Comma)?;
                }
                elems.push(self.parse_gv_initializer(ty)?);
            }
            Ok(GvInitializer::Array(elems))
        } else {
            let bits = self.expect_int()?;
            let imm = Immediate::from_bits(ty, bits as u64)
                .ok_or(ParseError::BadInteger { line: self.line() })?;
            Ok(GvInitializer::Immediate(imm))
        }
    }

    fn parse_func_header(&mut self) -> Result<(Signature, FunctionFlags), ParseError> {
        self.expect_keyword("func")?;
        let linkage = self.parse_linkage()?;
        let name = self.expect_percent()?;

        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        loop {
            if self.eat(Token::RParen) {
                break;
            }
            if !params.is_empty() {
                self.expect(Token::Comma)?;
            }
            let ty = self.parse_type()?;
            let nonnull = self.eat_keyword("nonnull");
            let pname = self.expect_percent()?;
            params.push(Param {
                ty,
                name: pname,
                nonnull,
            });
        }

        let ret_ty = if self.eat(Token::Arrow) {
            Some(self.parse_type()?)
        } else {
            None
        };

        let mut flags = FunctionFlags::default();
        loop {
            match self.peek() {
                Some(Token::Ident(id)) if id == "jit_candidate" => {
                    self.bump();
                    flags.jit_candidate = true;
                }
                Some(Token::Ident(id)) if id == "no_inline" => {
                    self.bump();
                    flags.no_inline = true;
                }
                Some(Token::Ident(id)) if id == "bounds" => {
                    self.bump();
                    self.expect(Token::LParen)?;
                    flags.lower_bound_count = self.expect_int()? as u32;
                    self.expect(Token::RParen)?;
                }
                Some(Token::Ident(id)) if id == "globals" => {
                    self.bump();
                    self.expect(Token::LParen)?;
                    flags.global_count = self.expect_int()? as u32;
                    self.expect(Token::RParen)?;
                }
                _ => break,
            }
        }

        Ok((Signature::new(name, linkage, params, ret_ty), flags))
    }

    /// Skip a `{ ... }` body whose opening brace is already consumed.
    fn skip_body(&mut self) -> Result<(), ParseError> {
        let mut depth = 1usize;
        loop {
            match self.next_token()? {
                Token::LBrace => depth += 1,
                Token::RBrace => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
    }

    fn parse_body(&mut self, func: &mut Function, module: &Module) -> Result<(), ParseError> {
        // Syntactic scan.
        let mut blocks: Vec<Vec<ParsedInst>> = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek() {
                Some(Token::RBrace) => {
                    self.bump();
                    break;
                }
                Some(Token::Ident(id)) if id.starts_with("block") => {
                    let num = self.parse_block_ref()?;
                    self.expect(Token::Colon)?;
                    if num as usize != blocks.len() {
                        return Err(ParseError::UndefinedBlock { line: self.line(), num });
                    }
                    blocks.push(Vec::new());
                }
                _ => {
                    let inst = self.parse_inst()?;
                    let Some(block) = blocks.last_mut() else {
                        return Err(self.unexpected("block header", self.current_token()));
                    };
                    block.push(inst);
                }
            }
        }

        // Materialize blocks and placeholder instructions so operand
        // references (including loop back edges) resolve before the real
        // instruction payloads are written.
        let mut block_ids = Vec::with_capacity(blocks.len());
        for _ in &blocks {
            let block = func.dfg.make_block();
            func.layout.append_block(block);
            block_ids.push(block);
        }

        let mut value_nums: FxHashMap<u32, ValueId> = FxHashMap::default();
        let mut inst_ids = Vec::new();
        for (block_idx, insts) in blocks.iter().enumerate() {
            for parsed in insts {
                let inst = func.dfg.make_inst(InstData::Return { arg: None });
                func.layout.append_inst(inst, block_ids[block_idx]);
                if let Some((num, ty)) = parsed.result {
                    let value = func.dfg.make_result(inst, ty);
                    value_nums.insert(num, value);
                }
                inst_ids.push(inst);
            }
        }

        let arg_indices: FxHashMap<SmolStr, usize> = func
            .sig
            .params()
            .iter()
            .enumerate()
            .map(|(idx, param)| (param.name.clone(), idx))
            .collect();

        let mut idx = 0;
        for insts in &blocks {
            for parsed in insts {
                let inst = inst_ids[idx];
                idx += 1;

                let data =
                    self.resolve_inst(parsed, func, module, &value_nums, &arg_indices, &block_ids)?;
                func.dfg.replace_inst(inst, data);

                if let Some(name) = &parsed.name {
                    let result = func.dfg.inst_result(inst).expect("named inst has a result");
                    func.dfg.set_value_name(result, name.clone());
                }
                if let Some((line, col)) = parsed.loc {
                    func.srclocs.insert(inst, SourceLoc { line, col });
                }
            }
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_inst(
        &self,
        parsed: &ParsedInst,
        func: &mut Function,
        module: &Module,
        value_nums: &FxHashMap<u32, ValueId>,
        arg_indices: &FxHashMap<SmolStr, usize>,
        block_ids: &[BlockId],
    ) -> Result<InstData, ParseError> {
        let line = parsed.line;
        let resolve = |op: &POperand, func: &mut Function| -> Result<ValueId, ParseError> {
            match op {
                POperand::Value(num) => value_nums
                    .get(num)
                    .copied()
                    .ok_or_else(|| ParseError::UndefinedValue {
                        line,
                        name: format!("v{num}"),
                    }),
                POperand::Arg(name) => {
                    let idx = arg_indices
                        .get(name)
                        .ok_or_else(|| ParseError::UndefinedValue {
                            line,
                            name: format!("%{name}"),
                        })?;
                    Ok(func.arg_values[*idx])
                }
                POperand::Imm { bits, ty } => {
                    let imm = Immediate::from_bits(*ty, *bits as u64)
                        .ok_or(ParseError::BadInteger { line })?;
                    Ok(func.dfg.make_imm_value(imm))
                }
                POperand::Global(symbol) => {
                    let gv = module.gv_store.gv_by_symbol(symbol).ok_or_else(|| {
                        ParseError::UndefinedGlobal {
                            line,
                            name: symbol.to_string(),
                        }
                    })?;
                    Ok(func.dfg.make_global_value(gv))
                }
                POperand::ConstGep(symbol, offset) => {
                    let gv = module.gv_store.gv_by_symbol(symbol).ok_or_else(|| {
                        ParseError::UndefinedGlobal {
                            line,
                            name: symbol.to_string(),
                        }
                    })?;
                    Ok(func.dfg.make_const_gep_value(gv, *offset))
                }
            }
        };

        let block = |num: u32| -> Result<BlockId, ParseError> {
            block_ids
                .get(num as usize)
                .copied()
                .ok_or(ParseError::UndefinedBlock { line, num })
        };

        let data = match &parsed.inst {
            PInst::Binary { code, lhs, rhs } => InstData::Binary {
                code: *code,
                args: [resolve(lhs, func)?, resolve(rhs, func)?],
            },
            PInst::Cmp { code, lhs, rhs } => InstData::Cmp {
                code: *code,
                args: [resolve(lhs, func)?, resolve(rhs, func)?],
            },
            PInst::Cast { code, arg } => InstData::Cast {
                code: *code,
                arg: resolve(arg, func)?,
                ty: parsed.result_ty(line)?,
            },
            PInst::Load { addr } => InstData::Load {
                addr: resolve(addr, func)?,
                ty: parsed.result_ty(line)?,
            },
            PInst::Store { addr, value } => InstData::Store {
                addr: resolve(addr, func)?,
                value: resolve(value, func)?,
            },
            PInst::Gep {
                elem_ty,
                base,
                index,
            } => InstData::Gep {
                base: resolve(base, func)?,
                index: resolve(index, func)?,
                elem_ty: *elem_ty,
            },
            PInst::Alloca { ty, count } => InstData::Alloca {
                ty: *ty,
                count: *count,
            },
            PInst::Phi { args } => {
                let mut resolved = SmallVec::new();
                for (op, num) in args {
                    resolved.push((resolve(op, func)?, block(*num)?));
                }
                InstData::Phi {
                    args: resolved,
                    ty: parsed.result_ty(line)?,
                }
            }
            PInst::Call { callee, args } => {
                let func_ref = module.func_by_symbol(callee).ok_or_else(|| {
                    ParseError::UndefinedFunction {
                        line,
                        name: callee.to_string(),
                    }
                })?;
                let sig = module.funcs[func_ref].sig.clone();
                func.record_callee(func_ref, sig);
                let mut resolved = SmallVec::new();
                for op in args {
                    resolved.push(resolve(op, func)?);
                }
                InstData::Call {
                    callee: func_ref,
                    args: resolved,
                }
            }
            PInst::CallIndirect { callee, args } => {
                let mut resolved = SmallVec::new();
                for op in args {
                    resolved.push(resolve(op, func)?);
                }
                InstData::CallIndirect {
                    callee: resolve(callee, func)?,
                    args: resolved,
                    ret_ty: parsed.result.map(|(_, ty)| ty),
                }
            }
            PInst::Jump { dest } => InstData::Jump {
                dest: block(*dest)?,
            },
            PInst::Branch {
                cond,
                then_dest,
                else_dest,
            } => InstData::Branch {
                cond: resolve(cond, func)?,
                then_dest: block(*then_dest)?,
                else_dest: block(*else_dest)?,
            },
            PInst::Return { arg } => InstData::Return {
                arg: match arg {
                    Some(op) => Some(resolve(op, func)?),
                    None => None,
                },
            },
        };
        Ok(data)
    }

    fn parse_inst(&mut self) -> Result<ParsedInst, ParseError> {
        let line = self.line();

        // Optional result prefix: `v3.i64 = `.
        let result_num = match (self.peek(), self.peek_nth(1)) {
            (Some(Token::Ident(id)), Some(Token::Dot)) => parse_value_num(id),
            _ => None,
        };
        let result = match result_num {
            Some(num) => {
                self.bump();
                self.bump();
                let ty = self.parse_type()?;
                self.expect(Token::Eq)?;
                Some((num, ty))
            }
            None => None,
        };

        let mnemonic = match self.next_token()? {
            Token::Ident(id) => id,
            other => return Err(self.unexpected("instruction mnemonic", other)),
        };

        let inst = if let Some(code) = BinaryOp::from_str(&mnemonic) {
            let lhs = self.parse_operand()?;
            self.expect(Token::Comma)?;
            let rhs = self.parse_operand()?;
            PInst::Binary { code, lhs, rhs }
        } else if let Some(code) = CmpOp::from_str(&mnemonic) {
            let lhs = self.parse_operand()?;
            self.expect(Token::Comma)?;
            let rhs = self.parse_operand()?;
            PInst::Cmp { code, lhs, rhs }
        } else if let Some(code) = CastOp::from_str(&mnemonic) {
            PInst::Cast {
                code,
                arg: self.parse_operand()?,
            }
        } else {
            match mnemonic.as_str() {
                "load" => PInst::Load {
                    addr: self.parse_operand()?,
                },
                "store" => {
                    let addr = self.parse_operand()?;
                    self.expect(Token::Comma)?;
                    let value = self.parse_operand()?;
                    PInst::Store { addr, value }
                }
                "gep" => {
                    self.expect(Token::Dot)?;
                    let elem_ty = self.parse_type()?;
                    let base = self.parse_operand()?;
                    self.expect(Token::Comma)?;
                    let index = self.parse_operand()?;
                    PInst::Gep {
                        elem_ty,
                        base,
                        index,
                    }
                }
                "alloca" => {
                    self.expect(Token::Dot)?;
                    let ty = self.parse_type()?;
                    let count = match self.peek() {
                        Some(Token::Int(_)) => self.expect_int()? as u32,
                        _ => 1,
                    };
                    PInst::Alloca { ty, count }
                }
                "phi" => {
                    let mut args = Vec::new();
                    while self.eat(Token::LParen) {
                        let op = self.parse_operand()?;
                        self.expect(Token::Comma)?;
                        let block = self.parse_block_ref()?;
                        self.expect(Token::RParen)?;
                        args.push((op, block));
                    }
                    PInst::Phi { args }
                }
                "call" => {
                    let callee = self.expect_percent()?;
                    let args = self.parse_call_args()?;
                    PInst::Call { callee, args }
                }
                "call_indirect" => {
                    let callee = self.parse_operand()?;
                    let args = self.parse_call_args()?;
                    PInst::CallIndirect { callee, args }
                }
                "jump" => PInst::Jump {
                    dest: self.parse_block_ref()?,
                },
                "br" => {
                    let cond = self.parse_operand()?;
                    self.expect(Token::Comma)?;
                    let then_dest = self.parse_block_ref()?;
                    self.expect(Token::Comma)?;
                    let else_dest = self.parse_block_ref()?;
                    PInst::Branch {
                        cond,
                        then_dest,
                        else_dest,
                    }
                }
                "return" => {
                    let arg = match self.peek() {
                        Some(Token::Newline) | Some(Token::At) | Some(Token::RBrace) | None => None,
                        _ => Some(self.parse_operand()?),
                    };
                    PInst::Return { arg }
                }
                _ => {
                    return Err(ParseError::UnknownInst {
                        line,
                        name: mnemonic.to_string(),
                    })
                }
            }
        };

        // Trailing annotations.
        let mut name = None;
        let mut loc = None;
        while self.eat(Token::At) {
            let kind = match self.next_token()? {
                Token::Ident(id) => id,
                other => return Err(self.unexpected("annotation kind", other)),
            };
            self.expect(Token::LParen)?;
            match kind.as_str() {
                "name" => {
                    name = Some(match self.next_token()? {
                        Token::Ident(id) => id,
                        other => return Err(self.unexpected("value name", other)),
                    });
                }
                "loc" => {
                    let l = self.expect_int()? as u32;
                    self.expect(Token::Comma)?;
                    let c = self.expect_int()? as u32;
                    loc = Some((l, c));
                }
                _ => {
                    return Err(ParseError::UnknownInst {
                        line,
                        name: format!("@{kind}"),
                    })
                }
            }
            self.expect(Token::RParen)?;
        }

        Ok(ParsedInst {
            line,
            result,
            inst,
            name,
            loc,
        })
    }

    fn parse_call_args(&mut self) -> Result<Vec<POperand>, ParseError> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        loop {
            if self.eat(Token::RParen) {
                break;
            }
            if !args.is_empty() {
                self.expect(Token::Comma)?;
            }
            args.push(self.parse_operand()?);
        }
        Ok(args)
    }

    fn parse_operand(&mut self) -> Result<POperand, ParseError> {
        match self.next_token()? {
            Token::Ident(id) => parse_value_num(&id)
                .map(POperand::Value)
                .ok_or_else(|| ParseError::UndefinedValue {
                    line: self.line(),
                    name: id.to_string(),
                }),
            Token::Percent(name) => Ok(POperand::Arg(name)),
            Token::Dollar(symbol) => {
                if self.eat(Token::Plus) {
                    let offset = self.expect_int()?;
                    Ok(POperand::ConstGep(symbol, offset))
                } else {
                    Ok(POperand::Global(symbol))
                }
            }
            Token::Int(bits) => {
                self.expect(Token::Dot)?;
                let ty = self.parse_type()?;
                Ok(POperand::Imm { bits, ty })
            }
            other => Err(self.unexpected("operand", other)),
        }
    }

    fn parse_block_ref(&mut self) -> Result<u32, ParseError> {
        let line = self.line();
        match self.next_token()? {
            Token::Ident(id) => id
                .strip_prefix("block")
                .and_then(|n| n.parse().ok())
                .ok_or(ParseError::Unexpected {
                    line,
                    expected: "block reference",
                    found: id.to_string(),
                }),
            other => Err(self.unexpected("block reference", other)),
        }
    }

    fn parse_linkage(&mut self) -> Result<Linkage, ParseError> {
        let line = self.line();
        match self.next_token()? {
            Token::Ident(id) => Linkage::from_str(&id).ok_or(ParseError::Unexpected {
                line,
                expected: "linkage",
                found: id.to_string(),
            }),
            other => Err(self.unexpected("linkage", other)),
        }
    }

    fn parse_type(&mut self) -> Result<Type, ParseError> {
        let line = self.line();
        match self.next_token()? {
            Token::Ident(id) => Type::from_str(&id).ok_or(ParseError::UnknownType {
                line,
                name: id.to_string(),
            }),
            other => Err(self.unexpected("type", other)),
        }
    }

    // Token plumbing.

    fn peek(&self) -> Option<&Token> {
        self.peek_skipping(0)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.peek_skipping(n)
    }

    fn peek_skipping(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|s| &s.token)
    }

    fn current_token(&self) -> Token {
        self.tokens
            .get(self.pos)
            .map(|s| s.token.clone())
            .unwrap_or(Token::Newline)
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ParseError::UnexpectedEof)?;
        self.pos += 1;
        Ok(token.token)
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Some(Token::Newline)) {
            self.bump();
        }
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|s| s.line)
            .unwrap_or(0)
    }

    fn eat(&mut self, token: Token) -> bool {
        if self.peek() == Some(&token) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        match self.peek() {
            Some(Token::Ident(id)) if id == kw => {
                self.bump();
                true
            }
            _ => false,
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), ParseError> {
        let found = self.next_token()?;
        if found == token {
            Ok(())
        } else {
            Err(self.unexpected("punctuation", found))
        }
    }

    fn expect_keyword(&mut self, kw: &'static str) -> Result<(), ParseError> {
        let found = self.next_token()?;
        match found {
            Token::Ident(ref id) if id == kw => Ok(()),
            other => Err(self.unexpected(kw, other)),
        }
    }

    fn expect_percent(&mut self) -> Result<SmolStr, ParseError> {
        match self.next_token()? {
            Token::Percent(name) => Ok(name),
            other => Err(self.unexpected("`%`-symbol", other)),
        }
    }

    fn expect_dollar(&mut self) -> Result<SmolStr, ParseError> {
        match self.next_token()? {
            Token::Dollar(name) => Ok(name),
            other => Err(self.unexpected("`$`-symbol", other)),
        }
    }

    fn expect_int(&mut self) -> Result<i64, ParseError> {
        match self.next_token()? {
            Token::Int(v) => Ok(v),
            other => Err(self.unexpected("integer", other)),
        }
    }

    fn unexpected(&self, expected: &'static str, found: Token) -> ParseError {
        ParseError::Unexpected {
            line: self.line(),
            expected,
            found: format!("{found:?}"),
        }
    }
}

fn parse_value_num(id: &str) -> Option<u32> {
    id.strip_prefix('v').and_then(|n| n.parse().ok())
}

#[derive(Debug)]
struct ParsedInst {
    line: u32,
    result: Option<(u32, Type)>,
    inst: PInst,
    name: Option<SmolStr>,
    loc: Option<(u32, u32)>,
}

impl ParsedInst {
    fn result_ty(&self, line: u32) -> Result<Type, ParseError> {
        self.result
            .map(|(_, ty)| ty)
            .ok_or(ParseError::Unexpected {
                line,
                expected: "result type",
                found: "none".to_string(),
            })
    }
}

#[derive(Debug)]
enum POperand {
    Value(u32),
    Arg(SmolStr),
    Imm { bits: i64, ty: Type },
    Global(SmolStr),
    ConstGep(SmolStr, i64),
}

#[derive(Debug)]
enum PInst {
    Binary {
        code: BinaryOp,
        lhs: POperand,
        rhs: POperand,
    },
    Cmp {
        code: CmpOp,
        lhs: POperand,
        rhs: POperand,
    },
    Cast {
        code: CastOp,
        arg: POperand,
    },
    Load {
        addr: POperand,
    },
    Store {
        addr: POperand,
        value: POperand,
    },
    Gep {
        elem_ty: Type,
        base: POperand,
        index: POperand,
    },
    Alloca {
        ty: Type,
        count: u32,
    },
    Phi {
        args: Vec<(POperand, u32)>,
    },
    Call {
        callee: SmolStr,
        args: Vec<POperand>,
    },
    CallIndirect {
        callee: POperand,
        args: Vec<POperand>,
    },
    Jump {
        dest: u32,
    },
    Branch {
        cond: POperand,
        then_dest: u32,
        else_dest: u32,
    },
    Return {
        arg: Option<POperand>,
    },
}
