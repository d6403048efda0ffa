//! The single pass compiler.
//!
//! There is no syntax tree: the parser pulls tokens from the scanner on demand and emits
//! bytecode while it recognizes the grammar. Statements are parsed by recursive descent,
//! expressions by precedence climbing driven by the [`get_rule`] table.
//!
//! Every function body gets its own [`Compiler`], which owns the locals and upvalues of
//! that function. The compiler of the function that is currently being compiled is
//! `Parser::compiler`, the compilers of the functions lexically enclosing it are on the
//! `Parser::enclosing` stack, the outermost (the script) first.

use log::debug;
use thiserror::Error;

use crate::core::*;
use crate::scanner::{Scanner, Token, TokenKind};

pub type Result<T> = std::result::Result<T, CompileErrors>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[line {line}] Error{location}: {message}")]
pub struct CompileError {
    pub line: usize,
    /// ` at 'lexeme'`, ` at end`, or empty for errors reported by the scanner
    pub location: String,
    pub message: String,
}

/// Every error reported during one compilation, in source order
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", join_lines(.0))]
pub struct CompileErrors(pub Vec<CompileError>);

fn join_lines(errors: &[CompileError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Compiles a script into a function on the given heap.
///
/// Strings and nested functions are allocated while compiling, so they stay on the heap
/// even if compilation fails.
pub fn compile(source: &str, heap: &mut Heap) -> Result<ObjRef> {
    let mut parser = Parser::new(source, heap);
    parser.advance();
    while !parser.match_token(TokenKind::Eof) {
        parser.declaration();
    }
    let (function, _) = parser.end_compiler();
    if parser.errors.is_empty() {
        Ok(parser.heap.allocate(function))
    } else {
        Err(CompileErrors(parser.errors))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // () []
    Primary,
}

impl Precedence {
    /// the next higher precedence, binary operators parse their right operand with it
    fn next(self) -> Self {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call | Primary => Primary,
        }
    }
}

type ParseFn<'src, 'h> = fn(&mut Parser<'src, 'h>, bool);

struct ParseRule<'src, 'h> {
    prefix: Option<ParseFn<'src, 'h>>,
    infix: Option<ParseFn<'src, 'h>>,
    precedence: Precedence,
}

fn get_rule<'src, 'h>(kind: TokenKind) -> ParseRule<'src, 'h> {
    use TokenKind as T;
    let (prefix, infix, precedence): (Option<ParseFn<'src, 'h>>, Option<ParseFn<'src, 'h>>, _) =
        match kind {
        T::LeftParen => (Some(Parser::grouping), Some(Parser::call), Precedence::Call),
        T::LeftBracket => (Some(Parser::array), Some(Parser::index), Precedence::Call),
        T::Minus => (Some(Parser::unary), Some(Parser::binary), Precedence::Term),
        T::Plus => (None, Some(Parser::binary), Precedence::Term),
        T::Slash | T::Star => (None, Some(Parser::binary), Precedence::Factor),
        T::Bang => (Some(Parser::unary), None, Precedence::None),
        T::BangEqual | T::EqualEqual => (None, Some(Parser::binary), Precedence::Equality),
        T::Greater | T::GreaterEqual | T::Less | T::LessEqual => {
            (None, Some(Parser::binary), Precedence::Comparison)
        }
        T::Identifier => (Some(Parser::variable), None, Precedence::None),
        T::String => (Some(Parser::string), None, Precedence::None),
        T::Number => (Some(Parser::number), None, Precedence::None),
        T::And => (None, Some(Parser::and), Precedence::And),
        T::Or => (None, Some(Parser::or), Precedence::Or),
        T::False | T::True | T::Nil => (Some(Parser::literal), None, Precedence::None),
        _ => (None, None, Precedence::None),
    };
    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
}

#[derive(Debug, Clone, Copy)]
struct Local<'src> {
    name: Token<'src>,
    /// None while the variable is declared but its initializer is still being compiled
    depth: Option<usize>,
    is_captured: bool,
}

/// The compile time state of one function
struct Compiler<'src> {
    function: ObjFunction,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    upvalues: Vec<Capture>,
    scope_depth: usize,
}

impl<'src> Compiler<'src> {
    fn new(kind: FunctionKind, name: Option<ObjRef>) -> Self {
        let mut locals = Vec::with_capacity(UINT8_COUNT);
        // slot zero holds the closure that is being called, it can't be named
        locals.push(Local {
            name: Token::synthetic(""),
            depth: Some(0),
            is_captured: false,
        });
        Compiler {
            function: ObjFunction::new(name),
            kind,
            locals,
            upvalues: vec![],
            scope_depth: 0,
        }
    }
}

struct Parser<'src, 'h> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    panic_mode: bool,
    errors: Vec<CompileError>,
    heap: &'h mut Heap,
    compiler: Compiler<'src>,
    enclosing: Vec<Compiler<'src>>,
}

impl<'src, 'h> Parser<'src, 'h> {
    fn new(source: &'src str, heap: &'h mut Heap) -> Self {
        let placeholder = Token {
            kind: TokenKind::Eof,
            lexeme: "",
            start: 0,
            line: 1,
        };
        Parser {
            scanner: Scanner::new(source),
            current: placeholder,
            previous: placeholder,
            panic_mode: false,
            errors: vec![],
            heap,
            compiler: Compiler::new(FunctionKind::Script, None),
            enclosing: vec![],
        }
    }

    // ==============================================================================
    // Token handling
    // ==============================================================================

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            self.error_at_current(self.current.lexeme);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    // ==============================================================================
    // Error reporting
    // ==============================================================================

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    /// records an error, unless we are already recovering from one
    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let location = match token.kind {
            TokenKind::Eof => String::from(" at end"),
            TokenKind::Error => String::new(),
            _ => format!(" at '{}'", token.lexeme),
        };
        self.errors.push(CompileError {
            line: token.line,
            location,
            message: message.to_string(),
        });
    }

    /// skips tokens until something that looks like a statement boundary
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            use TokenKind::*;
            match self.current.kind {
                Class | Fun | Var | For | If | While | Print | Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ==============================================================================
    // Code generation
    // ==============================================================================

    fn chunk(&mut self) -> &mut Chunk {
        &mut self.compiler.function.chunk
    }

    fn emit(&mut self, op: OpCode) -> usize {
        let line = self.previous.line;
        self.chunk().write(op, line)
    }

    fn emit_return(&mut self) {
        self.emit(OpCode::Nil);
        self.emit(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        match self.chunk().add_constant(value) {
            Some(idx) => idx,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit(OpCode::Constant(idx));
    }

    /// emits a jump with a placeholder offset, returns the offset to patch later
    fn emit_jump(&mut self, jump: fn(u16) -> OpCode) -> usize {
        self.emit(jump(u16::MAX))
    }

    /// makes the jump at offset land on the next instruction that will be emitted
    fn patch_jump(&mut self, offset: usize) {
        let after_jump = offset + OpCode::Jump(0).serialized_size();
        let distance = self.chunk().code.len() - after_jump;
        match u16::try_from(distance) {
            Ok(distance) => self.chunk().patch_jump(offset, distance),
            Err(_) => self.error("Too much code to jump over."),
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        let after_loop = self.chunk().code.len() + OpCode::Loop(0).serialized_size();
        match u16::try_from(after_loop - loop_start) {
            Ok(distance) => {
                self.emit(OpCode::Loop(distance));
            }
            Err(_) => self.error("Loop body too large."),
        }
    }

    fn begin_compiler(&mut self, kind: FunctionKind, name: Option<ObjRef>) {
        let enclosing = std::mem::replace(&mut self.compiler, Compiler::new(kind, name));
        self.enclosing.push(enclosing);
    }

    /// finishes the current function and makes its enclosing function current again
    fn end_compiler(&mut self) -> (ObjFunction, Vec<Capture>) {
        self.emit_return();
        let enclosing = self
            .enclosing
            .pop()
            .unwrap_or_else(|| Compiler::new(FunctionKind::Script, None));
        let finished = std::mem::replace(&mut self.compiler, enclosing);
        let function = finished.function;
        debug!(
            "compiled {} ({} bytes, {} constants, {} upvalues)",
            function
                .name
                .and_then(|n| self.heap.as_string(n))
                .map_or("<script>", ObjString::as_str),
            function.chunk.code.len(),
            function.chunk.constants.len(),
            function.upvalue_count,
        );
        (function, finished.upvalues)
    }

    fn begin_scope(&mut self) {
        self.compiler.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.compiler.scope_depth -= 1;
        let depth = self.compiler.scope_depth;
        while let Some(local) = self.compiler.locals.last().copied() {
            if local.depth.map_or(false, |d| d <= depth) {
                break;
            }
            self.emit(if local.is_captured {
                OpCode::CloseUpvalue
            } else {
                OpCode::Pop
            });
            self.compiler.locals.pop();
        }
    }

    // ==============================================================================
    // Variables
    // ==============================================================================

    /// the level of the current compiler, the script is level 0
    fn level(&self) -> usize {
        self.enclosing.len()
    }

    fn compiler_at(&mut self, level: usize) -> &mut Compiler<'src> {
        if level < self.enclosing.len() {
            &mut self.enclosing[level]
        } else {
            &mut self.compiler
        }
    }

    fn identifier_constant(&mut self, name: Token<'src>) -> u8 {
        let name = self.heap.intern(name.lexeme);
        self.make_constant(Value::Obj(name))
    }

    /// finds the slot of a local in the function at the given level, innermost declaration first
    fn resolve_local(&mut self, level: usize, name: &str) -> Option<u8> {
        let (slot, local) = self
            .compiler_at(level)
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| local.name.lexeme == name)
            .map(|(slot, local)| (slot, *local))?;
        if local.depth.is_none() {
            self.error("Can't read local variable in its own initializer.");
        }
        u8::try_from(slot).ok()
    }

    /// Resolves a variable of an enclosing function. Every function between the one that
    /// declares the variable and the one at `level` captures it too, so the closures can
    /// hand it down at runtime.
    fn resolve_upvalue(&mut self, level: usize, name: &str) -> Option<u8> {
        let enclosing = level.checked_sub(1)?;
        if let Some(local) = self.resolve_local(enclosing, name) {
            self.compiler_at(enclosing).locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(
                level,
                Capture {
                    is_local: true,
                    index: local,
                },
            ));
        }
        let upvalue = self.resolve_upvalue(enclosing, name)?;
        Some(self.add_upvalue(
            level,
            Capture {
                is_local: false,
                index: upvalue,
            },
        ))
    }

    fn add_upvalue(&mut self, level: usize, capture: Capture) -> u8 {
        let compiler = self.compiler_at(level);
        if let Some(idx) = compiler.upvalues.iter().position(|u| *u == capture) {
            return idx as u8;
        }
        if compiler.upvalues.len() >= UINT8_COUNT {
            self.error("Too many closure variables in function.");
            return 0;
        }
        compiler.upvalues.push(capture);
        compiler.function.upvalue_count = compiler.upvalues.len();
        (compiler.upvalues.len() - 1) as u8
    }

    fn add_local(&mut self, name: Token<'src>) {
        if self.compiler.locals.len() >= UINT8_COUNT {
            self.error("Too many local variables in function.");
            return;
        }
        self.compiler.locals.push(Local {
            name,
            depth: None,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self) {
        let depth = self.compiler.scope_depth;
        if depth == 0 {
            return;
        }
        let name = self.previous;
        let already_declared = self
            .compiler
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth.map_or(true, |d| d >= depth))
            .any(|local| local.name.lexeme == name.lexeme);
        if already_declared {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    /// consumes a variable name. Returns the constant index of the name for globals, 0 for locals
    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.compiler.scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous)
    }

    fn mark_initialized(&mut self) {
        let depth = self.compiler.scope_depth;
        if depth == 0 {
            return;
        }
        if let Some(local) = self.compiler.locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.compiler.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit(OpCode::DefineGlobal(global));
    }

    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let level = self.level();
        let (get, set) = if let Some(slot) = self.resolve_local(level, name.lexeme) {
            (OpCode::GetLocal(slot), OpCode::SetLocal(slot))
        } else if let Some(idx) = self.resolve_upvalue(level, name.lexeme) {
            (OpCode::GetUpvalue(idx), OpCode::SetUpvalue(idx))
        } else {
            let idx = self.identifier_constant(name);
            (OpCode::GetGlobal(idx), OpCode::SetGlobal(idx))
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit(set);
        } else {
            self.emit(get);
        }
    }

    // ==============================================================================
    // Declarations and statements
    // ==============================================================================

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // a function may refer to itself in its body
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit(OpCode::Nil);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );
        self.define_variable(global);
    }

    fn function(&mut self, kind: FunctionKind) {
        let name = self.heap.intern(self.previous.lexeme);
        self.begin_compiler(kind, Some(name));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                self.compiler.function.arity += 1;
                if self.compiler.function.arity > u8::MAX as usize {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.end_compiler();
        let function = self.heap.allocate(function);
        let constant = self.make_constant(Value::Obj(function));
        self.emit(OpCode::Closure(constant));
        for capture in upvalues {
            self.emit(OpCode::Capture(capture));
        }
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit(OpCode::Pop);
    }

    fn return_statement(&mut self) {
        if self.compiler.kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit(OpCode::Return);
        }
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit(OpCode::Pop);
        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk().code.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk().code.len();
        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            // the increment runs after the body, so the body jumps over it first
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk().code.len();
            self.expression();
            self.emit(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit(OpCode::Pop);
        }
        self.end_scope();
    }

    // ==============================================================================
    // Expressions
    // ==============================================================================

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    /// parses an expression whose operators bind at least as tight as `precedence`
    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = get_rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= get_rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = get_rule(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self, _can_assign: bool) {
        match self.previous.lexeme.parse::<f64>() {
            Ok(n) => self.emit_constant(Value::Number(n)),
            Err(_) => self.error("Invalid number literal."),
        }
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        // strip the quotes
        let chars = &lexeme[1..lexeme.len() - 1];
        let string = self.heap.intern(chars);
        self.emit_constant(Value::Obj(string));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit(OpCode::False),
            TokenKind::True => self.emit(OpCode::True),
            _ => self.emit(OpCode::Nil),
        };
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous, can_assign);
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Minus => self.emit(OpCode::Negate),
            _ => self.emit(OpCode::Not),
        };
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let rule = get_rule(operator);
        self.parse_precedence(rule.precedence.next());

        use TokenKind as T;
        let ops: &[OpCode] = match operator {
            T::BangEqual => &[OpCode::Equal, OpCode::Not],
            T::EqualEqual => &[OpCode::Equal],
            T::Greater => &[OpCode::Greater],
            T::GreaterEqual => &[OpCode::Less, OpCode::Not],
            T::Less => &[OpCode::Less],
            T::LessEqual => &[OpCode::Greater, OpCode::Not],
            T::Plus => &[OpCode::Add],
            T::Minus => &[OpCode::Subtract],
            T::Star => &[OpCode::Multiply],
            T::Slash => &[OpCode::Divide],
            _ => &[],
        };
        for op in ops {
            self.emit(*op);
        }
    }

    fn and(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let arg_count = self.comma_separated(
            TokenKind::RightParen,
            "Can't have more than 255 arguments.",
            "Expect ')' after arguments.",
        );
        self.emit(OpCode::Call(arg_count));
    }

    fn array(&mut self, _can_assign: bool) {
        let count = self.comma_separated(
            TokenKind::RightBracket,
            "Can't have more than 255 elements in an array literal.",
            "Expect ']' after array elements.",
        );
        self.emit(OpCode::Array(count));
    }

    fn index(&mut self, can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightBracket, "Expect ']' after index.");
        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit(OpCode::SetIndex);
        } else {
            self.emit(OpCode::GetIndex);
        }
    }

    /// parses expressions separated by commas up to the closing token, returns how many
    fn comma_separated(&mut self, close: TokenKind, too_many: &str, missing_close: &str) -> u8 {
        let mut count: usize = 0;
        if !self.check(close) {
            loop {
                self.expression();
                if count == u8::MAX as usize {
                    self.error(too_many);
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(close, missing_close);
        count.min(u8::MAX as usize) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops(heap: &Heap, function: ObjRef) -> Vec<OpCode> {
        let chunk = &heap.as_function(function).unwrap().chunk;
        let mut offset = 0;
        let mut ops = vec![];
        while let Some(op) = chunk.read(offset) {
            offset += op.serialized_size();
            ops.push(op);
        }
        ops
    }

    fn errors(source: &str) -> Vec<String> {
        let mut heap = Heap::new();
        match compile(source, &mut heap) {
            Ok(_) => vec![],
            Err(CompileErrors(errors)) => errors.iter().map(ToString::to_string).collect(),
        }
    }

    /// the function constants of a function, in the order they appear in the pool
    fn nested_functions(heap: &Heap, function: ObjRef) -> Vec<ObjRef> {
        heap.as_function(function)
            .unwrap()
            .chunk
            .constants
            .iter()
            .filter_map(|c| c.as_obj())
            .filter(|r| heap.as_function(*r).is_some())
            .collect()
    }

    #[test]
    fn precedence_climbing() {
        let mut heap = Heap::new();
        let script = compile("1 + 2 * 3;", &mut heap).unwrap();
        use OpCode::*;
        assert_eq!(
            ops(&heap, script),
            vec![
                Constant(0),
                Constant(1),
                Constant(2),
                Multiply,
                Add,
                Pop,
                Nil,
                Return
            ]
        );
    }

    #[test]
    fn comparison_operators_are_composed() {
        let mut heap = Heap::new();
        let script = compile("1 <= 2;", &mut heap).unwrap();
        assert_eq!(
            &ops(&heap, script)[2..4],
            &[OpCode::Greater, OpCode::Not]
        );
    }

    #[test]
    fn assignment_is_right_associative() {
        let mut heap = Heap::new();
        let script = compile("var a; var b; a = b = 1;", &mut heap).unwrap();
        let ops = ops(&heap, script);
        let sets: Vec<_> = ops
            .iter()
            .filter(|op| matches!(op, OpCode::SetGlobal(_)))
            .collect();
        // b is assigned first
        assert_eq!(sets, vec![&OpCode::SetGlobal(1), &OpCode::SetGlobal(0)]);
    }

    #[test]
    fn locals_resolve_to_slots() {
        let mut heap = Heap::new();
        let script = compile("{ var a = 1; var b = a; }", &mut heap).unwrap();
        use OpCode::*;
        assert_eq!(
            ops(&heap, script),
            vec![Constant(0), GetLocal(1), Pop, Pop, Nil, Return]
        );
    }

    #[test]
    fn shadowing_resolves_to_the_innermost_declaration() {
        let mut heap = Heap::new();
        let script = compile("{ var a = 1; { var a = 2; a; } a; }", &mut heap).unwrap();
        let gets: Vec<_> = ops(&heap, script)
            .into_iter()
            .filter(|op| matches!(op, OpCode::GetLocal(_)))
            .collect();
        assert_eq!(gets, vec![OpCode::GetLocal(2), OpCode::GetLocal(1)]);
    }

    #[test]
    fn upvalues_are_chained_through_intermediate_functions() {
        let mut heap = Heap::new();
        let source = "
            fun outer() {
                var x = 1;
                fun middle() {
                    fun inner() { return x + x; }
                    return inner;
                }
                return middle;
            }";
        let script = compile(source, &mut heap).unwrap();
        let outer = nested_functions(&heap, script)[0];
        let middle = nested_functions(&heap, outer)[0];
        let inner = nested_functions(&heap, middle)[0];
        assert_eq!(heap.as_function(middle).unwrap().upvalue_count, 1);
        // captured once, even though it is used twice
        assert_eq!(heap.as_function(inner).unwrap().upvalue_count, 1);

        let outer_ops = ops(&heap, outer);
        assert!(outer_ops.contains(&OpCode::Capture(Capture {
            is_local: true,
            index: 1
        })));
        let middle_ops = ops(&heap, middle);
        assert!(middle_ops.contains(&OpCode::Capture(Capture {
            is_local: false,
            index: 0
        })));
    }

    #[test]
    fn captured_block_locals_are_closed() {
        let mut heap = Heap::new();
        let script = compile("{ var a = 1; fun f() { return a; } }", &mut heap).unwrap();
        let ops = ops(&heap, script);
        assert!(ops.contains(&OpCode::CloseUpvalue));
    }

    #[test]
    fn reports_missing_semicolon_at_end() {
        assert_eq!(
            errors("print 1"),
            vec!["[line 1] Error at end: Expect ';' after value."]
        );
    }

    #[test]
    fn recovers_and_reports_independent_errors() {
        let errs = errors("var 1 = 2;\nprint ;\nvar ok = 3;\nok = ;");
        assert_eq!(
            errs,
            vec![
                "[line 1] Error at '1': Expect variable name.",
                "[line 2] Error at ';': Expect expression.",
                "[line 4] Error at ';': Expect expression.",
            ]
        );
    }

    #[test]
    fn scanner_errors_have_no_location() {
        assert_eq!(
            errors("print @;"),
            vec!["[line 1] Error: Unexpected character."]
        );
        assert_eq!(
            errors("print \"abc;"),
            vec!["[line 1] Error: Unterminated string."]
        );
    }

    #[test]
    fn invalid_assignment_target() {
        assert_eq!(
            errors("var a; var b; a + b = 3;"),
            vec!["[line 1] Error at '=': Invalid assignment target."]
        );
    }

    #[test]
    fn own_initializer() {
        assert_eq!(
            errors("{ var a = a; }"),
            vec!["[line 1] Error at 'a': Can't read local variable in its own initializer."]
        );
        // globals are late bound, so this is fine
        assert!(errors("var a = a;").is_empty());
    }

    #[test]
    fn duplicate_local() {
        assert_eq!(
            errors("{ var a; var a; }"),
            vec!["[line 1] Error at 'a': Already a variable with this name in this scope."]
        );
        assert!(errors("{ var a; { var a; } }").is_empty());
    }

    #[test]
    fn top_level_return() {
        assert_eq!(
            errors("return 1;"),
            vec!["[line 1] Error at 'return': Can't return from top-level code."]
        );
    }

    #[test]
    fn constant_limit_is_a_compile_error() {
        let source: String = (0..=UINT8_COUNT).map(|i| format!("print {};", i)).collect();
        let errs = errors(&source);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].ends_with("Too many constants in one chunk."));
    }

    #[test]
    fn local_limit_is_a_compile_error() {
        let locals = |n: usize| -> String {
            let decls: String = (0..n).map(|i| format!("var v{};", i)).collect();
            format!("{{ {} }}", decls)
        };
        // slot zero is taken by the function itself
        assert!(errors(&locals(UINT8_COUNT - 1)).is_empty());
        let errs = errors(&locals(UINT8_COUNT));
        assert_eq!(errs.len(), 1);
        assert!(errs[0].ends_with("Too many local variables in function."));
    }

    #[test]
    fn too_many_arguments() {
        let args = vec!["1"; 256].join(",");
        let errs = errors(&format!("f({});", args));
        assert_eq!(errs.len(), 1);
        assert!(errs[0].ends_with("Can't have more than 255 arguments."));
    }

    #[test]
    fn index_assignment_compiles() {
        let mut heap = Heap::new();
        let script = compile("var a = [1, 2]; a[0] = a[1];", &mut heap).unwrap();
        let ops = ops(&heap, script);
        assert!(ops.contains(&OpCode::Array(2)));
        assert!(ops.contains(&OpCode::GetIndex));
        assert!(ops.contains(&OpCode::SetIndex));
    }

    #[test]
    fn functions_record_their_arity() {
        let mut heap = Heap::new();
        let script = compile("fun add(a, b, c) { return a + b + c; }", &mut heap).unwrap();
        let add = nested_functions(&heap, script)[0];
        let add = heap.as_function(add).unwrap();
        assert_eq!(add.arity, 3);
        assert_eq!(heap.as_string(add.name.unwrap()).unwrap().as_str(), "add");
    }
}
