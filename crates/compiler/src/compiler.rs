//! Single-Pass Pratt Compiler
//!
//! Parses source text and emits bytecode directly into a function's chunk;
//! no AST is built. A table of `(prefix, infix, precedence)` rules drives
//! expression parsing; forward jumps are back-patched.
//!
//! Function compilation uses an explicit context stack: one [`FnCtx`] per
//! function being compiled, carrying its locals, upvalue descriptors, loop
//! contexts, and the chunk under construction. Compiled functions and every
//! string literal are static heap objects, so nothing the compiler allocates
//! can be collected mid-compile.

use ember_core::chunk::UINT24_MAX;
use ember_core::{BuiltinModule, Chunk, FunId, Heap, ObjFunction, OpCode, StrId, Value};

use crate::scanner::{Scanner, Token, TokenKind};

/// Hard limit on locals in scope per function (slot 0 included).
pub const LOCAL_MAX: usize = 1024;
/// Upvalue indices must fit the u8 operand of GET_UPVALUE.
pub const UPVALUE_MAX: usize = 256;
const FUNCTION_MAX_NESTING: u16 = 8;
const OBJECT_MAX_NESTING: u16 = 12;
const ARRAY_LITERAL_MAX: usize = 1024;
const BREAK_MAX: usize = u16::MAX as usize;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FunctionKind {
    Script,
    Function,
    Lambda,
    Method,
    Initializer,
    Module,
}

/// Compilation failed; diagnostics were already written to stderr.
#[derive(Debug)]
pub struct CompileError {
    pub errors: u32,
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "compilation failed with {} error(s)", self.errors)
    }
}

impl std::error::Error for CompileError {}

/// Compile `source` as a top-level script or module. On success the
/// finished function is added to the heap's static arena.
pub fn compile(source: &str, kind: FunctionKind, heap: &mut Heap) -> Result<FunId, CompileError> {
    let mut parser = Parser::new(source, heap);
    parser.push_ctx(kind, None);
    parser.advance();
    while !parser.match_token(TokenKind::Eof) {
        parser.declaration();
    }
    let (function, _) = parser.end_compiler();
    let had_error = parser.had_error;
    let errors = parser.error_count;
    if had_error {
        Err(CompileError { errors })
    } else {
        Ok(heap.add_function(function))
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Bitwise,    // | ^ & << >> >>>
    Equality,   // == !=
    InstanceOf, // instanceOf
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * / %
    Unary,      // ! - ~ typeof
    Call,       // . () []
    Primary,
}

impl Precedence {
    fn one_higher(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Bitwise,
            Precedence::Bitwise => Precedence::Equality,
            Precedence::Equality => Precedence::InstanceOf,
            Precedence::InstanceOf => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src, 'h> = fn(&mut Parser<'src, 'h>, bool);

struct ParseRule<'src, 'h> {
    prefix: Option<ParseFn<'src, 'h>>,
    infix: Option<ParseFn<'src, 'h>>,
    precedence: Precedence,
}

struct Local<'src> {
    name: &'src str,
    /// -1 while the initializer is being compiled.
    depth: i32,
    captured: bool,
    constant: bool,
}

#[derive(Clone, Copy)]
struct UpvalueDesc {
    index: u16,
    is_local: bool,
}

struct LoopCtx {
    start: usize,
    enter_local_count: usize,
    break_jumps: Vec<usize>,
}

struct FnCtx<'src> {
    function: ObjFunction,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    scope_depth: i32,
    upvalues: Vec<UpvalueDesc>,
    loops: Vec<LoopCtx>,
    object_nesting: u16,
    nesting: u16,
}

struct ClassCtx {
    has_superclass: bool,
}

pub struct Parser<'src, 'h> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    error_count: u32,
    heap: &'h mut Heap,
    ctxs: Vec<FnCtx<'src>>,
    classes: Vec<ClassCtx>,
}

impl<'src, 'h> Parser<'src, 'h> {
    fn new(source: &'src str, heap: &'h mut Heap) -> Parser<'src, 'h> {
        let placeholder = Token {
            kind: TokenKind::Eof,
            lexeme: "",
            line: 1,
        };
        Parser {
            scanner: Scanner::new(source),
            current: placeholder,
            previous: placeholder,
            had_error: false,
            panic_mode: false,
            error_count: 0,
            heap,
            ctxs: Vec::new(),
            classes: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Context stack
    // ------------------------------------------------------------------

    fn ctx(&self) -> &FnCtx<'src> {
        match self.ctxs.last() {
            Some(ctx) => ctx,
            None => unreachable!("no active function context"),
        }
    }

    fn ctx_mut(&mut self) -> &mut FnCtx<'src> {
        match self.ctxs.last_mut() {
            Some(ctx) => ctx,
            None => unreachable!("no active function context"),
        }
    }

    fn push_ctx(&mut self, kind: FunctionKind, name: Option<StrId>) {
        let nesting = match self.ctxs.last() {
            None => 0,
            Some(parent) => parent.nesting + 1,
        };
        if nesting == FUNCTION_MAX_NESTING {
            self.error("Too many nested functions.");
        }
        let id = self.heap.reserve_function_id();
        let mut ctx = FnCtx {
            function: ObjFunction {
                arity: 0,
                upvalue_count: 0,
                id,
                name,
                chunk: Chunk::new(),
            },
            kind,
            locals: Vec::with_capacity(8),
            scope_depth: 0,
            upvalues: Vec::new(),
            loops: Vec::new(),
            object_nesting: 0,
            nesting,
        };
        // Slot 0 belongs to the callee; methods expose it as `this`.
        let slot_zero: &'src str = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "this",
            _ => "",
        };
        ctx.locals.push(Local {
            name: slot_zero,
            depth: 0,
            captured: false,
            constant: false,
        });
        self.ctxs.push(ctx);
    }

    fn end_compiler(&mut self) -> (ObjFunction, Vec<UpvalueDesc>) {
        self.emit_return();
        match self.ctxs.pop() {
            Some(ctx) => (ctx.function, ctx.upvalues),
            None => unreachable!("no active function context"),
        }
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme;
            self.error_at_current(message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
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

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        eprint!("[line {}] Error", token.line);
        match token.kind {
            TokenKind::Eof => eprint!(" at end"),
            TokenKind::Error => {}
            _ => eprint!(" at '{}'", token.lexeme),
        }
        eprintln!(": {message}");
        self.had_error = true;
        self.error_count += 1;
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::Const
                | TokenKind::For
                | TokenKind::If
                | TokenKind::Branch
                | TokenKind::Do
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return
                | TokenKind::Throw => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.ctx_mut().function.chunk.write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_u16(&mut self, value: u16) {
        self.emit_byte(value as u8);
        self.emit_byte((value >> 8) as u8);
    }

    /// Opcode with a 24-bit little-endian constant operand.
    fn emit_const_op(&mut self, op: OpCode, index: u32) {
        if index > UINT24_MAX {
            self.error("Too many constants in chunk.");
            return;
        }
        self.emit_op(op);
        self.emit_byte(index as u8);
        self.emit_byte((index >> 8) as u8);
        self.emit_byte((index >> 16) as u8);
    }

    fn make_constant(&mut self, value: Value) -> u32 {
        self.heap.make_constant(value)
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_const_op(OpCode::Constant, index);
    }

    fn emit_number(&mut self, value: f64) {
        self.emit_constant(Value::number(value));
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.ctx().function.chunk.count() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        // -2 to adjust for the operand of the jump itself.
        let jump = self.ctx().function.chunk.count() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        let code = &mut self.ctx_mut().function.chunk.code;
        code[offset] = jump as u8;
        code[offset + 1] = (jump >> 8) as u8;
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.ctx().function.chunk.count() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
            return;
        }
        self.emit_byte(offset as u8);
        self.emit_byte((offset >> 8) as u8);
    }

    fn emit_return(&mut self) {
        if self.ctx().kind == FunctionKind::Initializer {
            self.emit_op(OpCode::GetLocal);
            self.emit_u16(0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn emit_pop_count(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        if count == 1 {
            self.emit_op(OpCode::Pop);
        } else {
            self.emit_op(OpCode::PopN);
            self.emit_u16(count as u16);
        }
    }

    // ------------------------------------------------------------------
    // Scopes, locals, upvalues
    // ------------------------------------------------------------------

    fn begin_scope(&mut self) {
        self.ctx_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let ctx = self.ctx_mut();
        ctx.scope_depth -= 1;
        let depth = ctx.scope_depth;

        let mut pop_count = 0usize;
        let mut ops: Vec<bool> = Vec::new(); // true = close upvalue boundary
        while let Some(local) = ctx.locals.last() {
            if local.depth <= depth {
                break;
            }
            ops.push(local.captured);
            ctx.locals.pop();
        }
        for captured in ops {
            if captured {
                self.emit_pop_count(pop_count);
                pop_count = 0;
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                pop_count += 1;
            }
        }
        self.emit_pop_count(pop_count);
    }

    fn add_local(&mut self, name: &'src str) {
        if self.ctx().locals.len() >= LOCAL_MAX {
            self.error("Too many nested local variables in scope.");
            return;
        }
        self.ctx_mut().locals.push(Local {
            name,
            depth: -1,
            captured: false,
            constant: false,
        });
    }

    fn declare_variable(&mut self) {
        if self.ctx().scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme;
        let ctx = self.ctx();
        let mut duplicate = false;
        for local in ctx.locals.iter().rev() {
            if local.depth != -1 && local.depth < ctx.scope_depth {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn mark_initialized(&mut self, constant: bool) {
        let ctx = self.ctx_mut();
        if ctx.scope_depth == 0 {
            return;
        }
        let depth = ctx.scope_depth;
        if let Some(local) = ctx.locals.last_mut() {
            local.depth = depth;
            local.constant = constant;
        }
    }

    fn define_variable(&mut self, global: u32) {
        if self.ctx().scope_depth > 0 {
            self.mark_initialized(false);
            return;
        }
        self.emit_const_op(OpCode::DefineGlobal, global);
    }

    fn define_const(&mut self, _global: u32) {
        if self.ctx().scope_depth > 0 {
            self.mark_initialized(true);
        } else {
            self.error_at_current("Constant can only be defined in the local scope.");
        }
    }

    fn identifier_constant(&mut self, name: &str) -> u32 {
        let id = self.heap.intern_str(name);
        self.make_constant(Value::string(id))
    }

    fn parse_variable(&mut self, message: &str) -> u32 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.ctx().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous.lexeme)
    }

    /// Local slot and const flag when `name` resolves in `ctx_index`'s
    /// scope chain.
    fn resolve_local(&mut self, ctx_index: usize, name: &str) -> Option<(usize, bool)> {
        let found = self.ctxs[ctx_index]
            .locals
            .iter()
            .rposition(|local| local.name == name);
        let slot = found?;
        if self.ctxs[ctx_index].locals[slot].depth == -1 {
            self.error("Can't read local variable in its own initializer.");
        }
        let constant = self.ctxs[ctx_index].locals[slot].constant;
        Some((slot, constant))
    }

    fn add_upvalue(&mut self, ctx_index: usize, index: u16, is_local: bool) -> usize {
        let ctx = &self.ctxs[ctx_index];
        for (i, upvalue) in ctx.upvalues.iter().enumerate() {
            if upvalue.index == index && upvalue.is_local == is_local {
                return i;
            }
        }
        if ctx.upvalues.len() == UPVALUE_MAX {
            self.error("Too many closure variables in function.");
            return 0;
        }
        let ctx = &mut self.ctxs[ctx_index];
        ctx.upvalues.push(UpvalueDesc { index, is_local });
        ctx.function.upvalue_count = ctx.upvalues.len() as u16;
        ctx.upvalues.len() - 1
    }

    /// Walks outward: a capture of an enclosing local, or a chained capture
    /// of the next-outer function's upvalue.
    fn resolve_upvalue(&mut self, ctx_index: usize, name: &str) -> Option<(usize, bool)> {
        if ctx_index == 0 {
            return None;
        }
        let enclosing = ctx_index - 1;
        if let Some((slot, constant)) = self.resolve_local(enclosing, name) {
            self.ctxs[enclosing].locals[slot].captured = true;
            let upvalue = self.add_upvalue(ctx_index, slot as u16, true);
            return Some((upvalue, constant));
        }
        if let Some((upvalue, constant)) = self.resolve_upvalue(enclosing, name) {
            let upvalue = self.add_upvalue(ctx_index, upvalue as u16, false);
            return Some((upvalue, constant));
        }
        None
    }

    fn named_variable(&mut self, name: &'src str, can_assign: bool) {
        let top = self.ctxs.len() - 1;

        if let Some((slot, constant)) = self.resolve_local(top, name) {
            if can_assign && self.match_token(TokenKind::Equal) {
                self.expression();
                if constant {
                    self.error_at_current("Assignment to constant variable.");
                    return;
                }
                self.emit_op(OpCode::SetLocal);
                self.emit_u16(slot as u16);
            } else {
                self.emit_op(OpCode::GetLocal);
                self.emit_u16(slot as u16);
            }
            return;
        }

        if let Some((upvalue, constant)) = self.resolve_upvalue(top, name) {
            if can_assign && self.match_token(TokenKind::Equal) {
                self.expression();
                if constant {
                    self.error_at_current("Assignment to constant variable.");
                    return;
                }
                self.emit_op(OpCode::SetUpvalue);
                self.emit_byte(upvalue as u8);
            } else {
                self.emit_op(OpCode::GetUpvalue);
                self.emit_byte(upvalue as u8);
            }
            return;
        }

        let arg = self.identifier_constant(name);
        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_const_op(OpCode::SetGlobal, arg);
        } else {
            self.emit_const_op(OpCode::GetGlobal, arg);
        }
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn declaration(&mut self) {
        if self.panic_mode {
            self.synchronize();
        }

        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else if self.match_token(TokenKind::Const) {
            self.const_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self) {
        loop {
            let arg = self.parse_variable("Expect variable name.");
            if self.match_token(TokenKind::Equal) {
                self.expression();
            } else {
                self.emit_op(OpCode::Nil);
            }
            self.define_variable(arg);
            if self.had_error || !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
    }

    fn const_declaration(&mut self) {
        loop {
            let arg = self.parse_variable("Expect constant name.");
            if !self.match_token(TokenKind::Equal) {
                self.error_at_current("Constant must be initialized.");
            }
            self.expression();
            self.define_const(arg);
            if self.had_error || !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after constant declaration.");
    }

    fn fun_declaration(&mut self) {
        let arg = self.parse_variable("Expect function name.");
        self.mark_initialized(false);
        self.function(FunctionKind::Function);
        self.define_variable(arg);
    }

    fn function(&mut self, kind: FunctionKind) {
        let name = match kind {
            FunctionKind::Function | FunctionKind::Method | FunctionKind::Initializer => {
                Some(self.heap.intern_str(self.previous.lexeme))
            }
            FunctionKind::Lambda => Some(self.heap.intern_str("")),
            _ => None,
        };
        self.push_ctx(kind, name);
        self.begin_scope();

        if kind == FunctionKind::Lambda {
            self.consume(TokenKind::LeftParen, "Expect '(' after lambda.");
        } else {
            self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        }
        if !self.check(TokenKind::RightParen) {
            loop {
                self.ctx_mut().function.arity += 1;
                if self.ctx().function.arity > 255 {
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
        let fun_id = self.heap.add_function(function);
        let constant = self.make_constant(Value::function(fun_id));
        self.emit_const_op(OpCode::Closure, constant);
        for upvalue in upvalues {
            self.emit_byte(u8::from(upvalue.is_local));
            self.emit_u16(upvalue.index);
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_constant = self.identifier_constant(class_name.lexeme);
        self.declare_variable();

        self.emit_const_op(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassCtx {
            has_superclass: false,
        });

        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            self.variable_rule(false);

            if class_name.lexeme == self.previous.lexeme {
                self.error("A class can't inherit from itself.");
            }

            self.begin_scope();
            self.add_local("super");
            self.define_variable(0);

            self.named_variable(class_name.lexeme, false);
            self.emit_op(OpCode::Inherit);

            if let Some(class) = self.classes.last_mut() {
                class.has_superclass = true;
            }
        }

        self.named_variable(class_name.lexeme, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        let has_superclass = self.classes.last().is_some_and(|c| c.has_superclass);
        if has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let constant = self.identifier_constant(self.previous.lexeme);
        let kind = if self.previous.lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);
        self.emit_const_op(OpCode::Method, constant);
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Branch) {
            self.branch_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::Do) {
            self.do_while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::Break) {
            self.break_statement();
        } else if self.match_token(TokenKind::Continue) {
            self.continue_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else if self.match_token(TokenKind::Throw) {
            self.throw_statement();
        } else if self.match_token(TokenKind::Exports) {
            self.exports_statement();
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

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn throw_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Throw);
    }

    fn return_statement(&mut self) {
        match self.ctx().kind {
            FunctionKind::Script | FunctionKind::Module => {
                self.error("Can't return from top-level code.");
            }
            _ => {}
        }

        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.ctx().kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    /// `exports expr;` is a module's result; compiles to RETURN.
    fn exports_statement(&mut self) {
        if self.ctx().kind != FunctionKind::Module {
            self.error("Only module can use 'exports'.");
        }

        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after exports value.");
            self.emit_op(OpCode::Return);
        }
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalsePop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn branch_statement(&mut self) {
        self.consume(TokenKind::LeftBrace, "Expect '{' after 'branch'.");
        self.branch_case();
    }

    fn branch_case(&mut self) {
        if !self.match_token(TokenKind::NoneKw) {
            self.expression();
            let then_jump = self.emit_jump(OpCode::JumpIfFalsePop);
            self.consume(TokenKind::Colon, "Expect ':' after condition.");
            self.statement();

            let else_jump = self.emit_jump(OpCode::Jump);
            self.patch_jump(then_jump);

            if self.had_error {
                return;
            }

            if !self.match_token(TokenKind::RightBrace) {
                self.branch_case();
            }
            self.patch_jump(else_jump);
        } else {
            // 'none' must be the last case.
            self.consume(TokenKind::Colon, "Expect ':' after 'none'.");
            self.statement();
            self.consume(TokenKind::RightBrace, "Expect '}' after 'none' case.");
        }
    }

    fn push_loop(&mut self, start: usize) {
        let enter_local_count = self.ctx().locals.len();
        self.ctx_mut().loops.push(LoopCtx {
            start,
            enter_local_count,
            break_jumps: Vec::new(),
        });
    }

    fn pop_loop(&mut self) {
        let jumps = match self.ctx_mut().loops.pop() {
            Some(ctx) => ctx.break_jumps,
            None => return,
        };
        for jump in jumps {
            self.patch_jump(jump);
        }
    }

    fn while_statement(&mut self) {
        let loop_start = self.ctx().function.chunk.count();

        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalsePop);

        self.push_loop(loop_start);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.pop_loop();
    }

    fn do_while_statement(&mut self) {
        let loop_start = self.ctx().function.chunk.count();
        self.push_loop(loop_start);

        self.statement();

        self.consume(
            TokenKind::While,
            "Expect 'while' after 'do' to form a valid 'do-while'.",
        );
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");
        self.consume(TokenKind::Semicolon, "Expect ';' after 'do-while' loop.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalsePop);
        self.emit_loop(loop_start);
        self.patch_jump(exit_jump);
        self.pop_loop();
    }

    fn for_statement(&mut self) {
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenKind::Semicolon) {
            // No initializer.
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.ctx().function.chunk.count();

        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalsePop));
        }

        // The increment runs between iterations but is emitted before the
        // body, so jump over it on the way in and back to it on the way out.
        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.ctx().function.chunk.count();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.push_loop(loop_start);
        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
        }
        self.pop_loop();
        self.end_scope();
    }

    fn break_statement(&mut self) {
        if self.ctx().loops.is_empty() {
            self.error("Cannot use 'break' outside of a loop.");
            return;
        }

        let enter_count = self
            .ctx()
            .loops
            .last()
            .map_or(0, |l| l.enter_local_count);
        let pop_count = self.ctx().locals.len() - enter_count;
        self.emit_pop_count(pop_count);
        let jump = self.emit_jump(OpCode::Jump);

        let full = self
            .ctx()
            .loops
            .last()
            .is_some_and(|l| l.break_jumps.len() == BREAK_MAX);
        if full {
            self.error("Too many break statements in one loop.");
            return;
        }
        if let Some(current_loop) = self.ctx_mut().loops.last_mut() {
            current_loop.break_jumps.push(jump);
        }

        self.consume(TokenKind::Semicolon, "Expect ';' after 'break'.");
    }

    fn continue_statement(&mut self) {
        if self.ctx().loops.is_empty() {
            self.error("Cannot use 'continue' outside of a loop.");
            return;
        }

        let (start, enter_count) = self
            .ctx()
            .loops
            .last()
            .map_or((0, 0), |l| (l.start, l.enter_local_count));
        let pop_count = self.ctx().locals.len() - enter_count;
        self.emit_pop_count(pop_count);
        self.emit_loop(start);
        self.consume(TokenKind::Semicolon, "Expect ';' after 'continue'.");
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();

        let Some(prefix) = Self::rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };

        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= Self::rule(self.current.kind).precedence {
            self.advance();
            match Self::rule(self.previous.kind).infix {
                Some(infix) => infix(self, can_assign),
                None => {
                    self.error("Syntax error, no infix syntax at current location.");
                    break;
                }
            }
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count.min(255) as u8
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn call(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        self.emit_op(OpCode::Call);
        self.emit_byte(arg_count);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous.lexeme);

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_const_op(OpCode::SetProperty, name);
        } else if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.emit_const_op(OpCode::Invoke, name);
            self.emit_byte(arg_count);
        } else {
            self.emit_const_op(OpCode::GetProperty, name);
        }
    }

    fn subscript(&mut self, can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightBracket, "Expect ']' after subscript.");
        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op(OpCode::SetSubscript);
        } else {
            self.emit_op(OpCode::GetSubscript);
        }
    }

    fn array_literal(&mut self, _can_assign: bool) {
        let mut count = 0usize;
        if !self.check(TokenKind::RightBracket) && !self.check(TokenKind::Eof) {
            loop {
                self.expression();
                count += 1;
                if self.had_error || !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBracket, "Expect ']' to close the array.");

        if count > ARRAY_LITERAL_MAX {
            self.error("Array literal is too long.");
            return;
        }
        self.emit_op(OpCode::NewArray);
        self.emit_u16(count as u16);
    }

    fn object_literal(&mut self, _can_assign: bool) {
        if self.ctx().object_nesting == OBJECT_MAX_NESTING {
            self.error("Too many nested objects.");
            return;
        }
        self.ctx_mut().object_nesting += 1;
        self.emit_op(OpCode::NewObject);

        if !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            loop {
                let constant = if self.match_token(TokenKind::Identifier) {
                    self.identifier_constant(self.previous.lexeme)
                } else if self.match_token(TokenKind::Str) {
                    let lexeme = self.previous.lexeme;
                    let id = self.heap.intern_str(&lexeme[1..lexeme.len() - 1]);
                    self.make_constant(Value::string(id))
                } else if self.match_token(TokenKind::StrEscape) {
                    let lexeme = self.previous.lexeme;
                    let id = self
                        .heap
                        .intern_escaped(lexeme[1..lexeme.len() - 1].as_bytes());
                    self.make_constant(Value::string(id))
                } else {
                    self.error_at_current("Expect property name.");
                    0
                };

                self.consume(TokenKind::Colon, "Expect ':' after property name.");
                self.expression();
                self.emit_const_op(OpCode::NewProperty, constant);

                if self.had_error || !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }

        self.consume(TokenKind::RightBrace, "Expect '}' to close the object.");
        self.ctx_mut().object_nesting -= 1;
    }

    fn lambda(&mut self, _can_assign: bool) {
        self.function(FunctionKind::Lambda);
    }

    fn import_expr(&mut self, _can_assign: bool) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'import'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after import path.");
        self.emit_op(OpCode::Import);
    }

    fn builtin_literal(&mut self, _can_assign: bool) {
        let module = match self.previous.kind {
            TokenKind::ModuleMath => BuiltinModule::Math,
            TokenKind::ModuleArray => BuiltinModule::Array,
            TokenKind::ModuleObject => BuiltinModule::Object,
            TokenKind::ModuleString => BuiltinModule::String,
            TokenKind::ModuleTime => BuiltinModule::Time,
            TokenKind::ModuleCtor => BuiltinModule::Ctor,
            _ => BuiltinModule::System,
        };
        self.emit_op(OpCode::ModuleBuiltin);
        self.emit_byte(module as u8);
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            _ => {}
        }
    }

    fn number(&mut self, _can_assign: bool) {
        let value = self.previous.lexeme.parse::<f64>().unwrap_or(0.0);
        self.emit_number(value);
    }

    fn number_bin(&mut self, _can_assign: bool) {
        let digits = &self.previous.lexeme[2..];
        let value = u64::from_str_radix(digits, 2).unwrap_or(0) as f64;
        self.emit_number(value);
    }

    fn number_hex(&mut self, _can_assign: bool) {
        let digits = &self.previous.lexeme[2..];
        let value = u64::from_str_radix(digits, 16).unwrap_or(0) as f64;
        self.emit_number(value);
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let id = self.heap.intern_str(&lexeme[1..lexeme.len() - 1]);
        self.emit_constant(Value::string(id));
    }

    fn string_escape(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let id = self
            .heap
            .intern_escaped(lexeme[1..lexeme.len() - 1].as_bytes());
        self.emit_constant(Value::string(id));
    }

    fn variable_rule(&mut self, can_assign: bool) {
        self.named_variable(self.previous.lexeme, can_assign);
    }

    fn this_rule(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.variable_rule(false);
    }

    fn super_rule(&mut self, _can_assign: bool) {
        match self.classes.last() {
            None => self.error("Can't use 'super' outside of a class."),
            Some(class) if !class.has_superclass => {
                self.error("Can't use 'super' in a class with no superclass.");
            }
            _ => {}
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant(self.previous.lexeme);

        self.named_variable("this", false);
        if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.named_variable("super", false);
            self.emit_const_op(OpCode::SuperInvoke, name);
            self.emit_byte(arg_count);
        } else {
            self.named_variable("super", false);
            self.emit_const_op(OpCode::GetSuper, name);
        }
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Bang => self.emit_op(OpCode::Not),
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::BitNot => {
                self.emit_op(OpCode::Bitwise);
                self.emit_byte(ember_core::BitOp::Not as u8);
            }
            TokenKind::TypeOf => self.emit_op(OpCode::TypeOf),
            _ => {}
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let precedence = Self::rule(operator).precedence;
        self.parse_precedence(precedence.one_higher());

        use ember_core::BitOp;
        match operator {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::Percent => self.emit_op(OpCode::Modulus),
            TokenKind::BangEqual => self.emit_op(OpCode::NotEqual),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => self.emit_op(OpCode::GreaterEqual),
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => self.emit_op(OpCode::LessEqual),
            TokenKind::InstanceOf => self.emit_op(OpCode::InstanceOf),
            TokenKind::BitAnd => {
                self.emit_op(OpCode::Bitwise);
                self.emit_byte(BitOp::And as u8);
            }
            TokenKind::BitOr => {
                self.emit_op(OpCode::Bitwise);
                self.emit_byte(BitOp::Or as u8);
            }
            TokenKind::BitXor => {
                self.emit_op(OpCode::Bitwise);
                self.emit_byte(BitOp::Xor as u8);
            }
            TokenKind::Shl => {
                self.emit_op(OpCode::Bitwise);
                self.emit_byte(BitOp::Shl as u8);
            }
            TokenKind::Sar => {
                self.emit_op(OpCode::Bitwise);
                self.emit_byte(BitOp::Sar as u8);
            }
            TokenKind::Shr => {
                self.emit_op(OpCode::Bitwise);
                self.emit_byte(BitOp::Shr as u8);
            }
            _ => {}
        }
    }

    fn and_rule(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_rule(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfTrue);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    // ------------------------------------------------------------------
    // Rule table
    // ------------------------------------------------------------------

    fn rule(kind: TokenKind) -> ParseRule<'src, 'h> {
        use TokenKind as T;
        let (prefix, infix, precedence): (
            Option<ParseFn<'src, 'h>>,
            Option<ParseFn<'src, 'h>>,
            Precedence,
        ) = match kind {
            T::LeftParen => (Some(Self::grouping), Some(Self::call), Precedence::Call),
            T::LeftBrace => (Some(Self::object_literal), None, Precedence::Call),
            T::LeftBracket => (
                Some(Self::array_literal),
                Some(Self::subscript),
                Precedence::Call,
            ),
            T::Dot => (None, Some(Self::dot), Precedence::Call),
            T::Minus => (Some(Self::unary), Some(Self::binary), Precedence::Term),
            T::Plus => (None, Some(Self::binary), Precedence::Term),
            T::Slash | T::Star | T::Percent => (None, Some(Self::binary), Precedence::Factor),
            T::Bang => (Some(Self::unary), None, Precedence::None),
            T::BangEqual | T::EqualEqual => (None, Some(Self::binary), Precedence::Equality),
            T::Greater | T::GreaterEqual | T::Less | T::LessEqual => {
                (None, Some(Self::binary), Precedence::Comparison)
            }
            T::InstanceOf => (None, Some(Self::binary), Precedence::InstanceOf),
            T::TypeOf => (Some(Self::unary), None, Precedence::Unary),
            T::BitAnd | T::BitOr | T::BitXor | T::Shl | T::Sar | T::Shr => {
                (None, Some(Self::binary), Precedence::Bitwise)
            }
            T::BitNot => (Some(Self::unary), None, Precedence::Unary),
            T::Identifier => (Some(Self::variable_rule), None, Precedence::None),
            T::Str => (Some(Self::string), None, Precedence::None),
            T::StrEscape => (Some(Self::string_escape), None, Precedence::None),
            T::Number => (Some(Self::number), None, Precedence::None),
            T::NumberBin => (Some(Self::number_bin), None, Precedence::None),
            T::NumberHex => (Some(Self::number_hex), None, Precedence::None),
            T::ModuleMath
            | T::ModuleArray
            | T::ModuleObject
            | T::ModuleString
            | T::ModuleTime
            | T::ModuleCtor
            | T::ModuleSystem => (Some(Self::builtin_literal), None, Precedence::None),
            T::And => (None, Some(Self::and_rule), Precedence::And),
            T::Or => (None, Some(Self::or_rule), Precedence::Or),
            T::False | T::True | T::Nil => (Some(Self::literal), None, Precedence::None),
            T::Lambda => (Some(Self::lambda), None, Precedence::None),
            T::Import => (Some(Self::import_expr), None, Precedence::None),
            T::Super => (Some(Self::super_rule), None, Precedence::None),
            T::This => (Some(Self::this_rule), None, Precedence::None),
            _ => (None, None, Precedence::None),
        };
        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_ok(source: &str) -> bool {
        let mut heap = Heap::new();
        compile(source, FunctionKind::Script, &mut heap).is_ok()
    }

    #[test]
    fn test_simple_programs_compile() {
        assert!(compile_ok("print 1 + 2 * 3;"));
        assert!(compile_ok("var a = 1, b; b = a + 1; print b;"));
        assert!(compile_ok("fun f(a, b) { return a + b; } print f(1, 2);"));
        assert!(compile_ok(
            "class A { init(n) { this.n = n; } get() { return this.n; } } print A(1).get();"
        ));
        assert!(compile_ok("for (var i = 0; i < 3; i = i + 1) { print i; }"));
        assert!(compile_ok("var i = 0; do { i = i + 1; } while (i < 3);"));
        assert!(compile_ok(
            "var x = 2; branch { x == 1: print \"one\"; x == 2: print \"two\"; none: print \"?\"; }"
        ));
        assert!(compile_ok("var f = lambda(x) { return x * 2; }; print f(2);"));
        assert!(compile_ok("var a = [1, 2, 3]; print a[0];"));
        assert!(compile_ok("var o = { name: \"x\", n: 1 }; print o.name;"));
        assert!(compile_ok("print @math.max(1, 2);"));
        assert!(compile_ok("print 0b101 | 0x0F << 2;"));
    }

    #[test]
    fn test_statement_errors() {
        assert!(!compile_ok("return 1;"));
        assert!(!compile_ok("break;"));
        assert!(!compile_ok("continue;"));
        assert!(!compile_ok("exports 1;"));
        assert!(!compile_ok("const g = 1;"));
        assert!(!compile_ok("var a = 1"));
        assert!(!compile_ok("1 + ;"));
        assert!(!compile_ok("{ var a = a; }"));
        assert!(!compile_ok("{ var a = 1; var a = 2; }"));
        assert!(!compile_ok("print this;"));
        assert!(!compile_ok("class A { f() { return super.f(); } }"));
        assert!(!compile_ok("class A < A {}"));
        assert!(!compile_ok("1 = 2;"));
    }

    #[test]
    fn test_const_rules() {
        assert!(compile_ok("{ const a = 1; print a; }"));
        assert!(!compile_ok("{ const a = 1; a = 2; }"));
        assert!(!compile_ok("{ const a; }"));
    }

    #[test]
    fn test_module_exports() {
        let mut heap = Heap::new();
        assert!(compile("exports 42;", FunctionKind::Module, &mut heap).is_ok());
        assert!(compile("return 42;", FunctionKind::Module, &mut heap).is_err());
    }

    #[test]
    fn test_parameter_limit() {
        let params: Vec<String> = (0..255).map(|i| format!("p{i}")).collect();
        let ok = format!("fun f({}) {{}}", params.join(", "));
        assert!(compile_ok(&ok));

        let params: Vec<String> = (0..256).map(|i| format!("p{i}")).collect();
        let too_many = format!("fun f({}) {{}}", params.join(", "));
        assert!(!compile_ok(&too_many));
    }

    #[test]
    fn test_argument_limit() {
        let args: Vec<String> = (0..255).map(|i| i.to_string()).collect();
        let ok = format!("fun f() {{}} f({});", args.join(", "));
        assert!(compile_ok(&ok));

        let args: Vec<String> = (0..256).map(|i| i.to_string()).collect();
        let too_many = format!("fun f() {{}} f({});", args.join(", "));
        assert!(!compile_ok(&too_many));
    }

    #[test]
    fn test_local_limit() {
        // Slot 0 is reserved, so a function holds LOCAL_MAX - 1 user locals.
        let decls: Vec<String> = (0..LOCAL_MAX - 1).map(|i| format!("var l{i} = {i};")).collect();
        let ok = format!("{{ {} }}", decls.join(" "));
        assert!(compile_ok(&ok));

        let decls: Vec<String> = (0..LOCAL_MAX).map(|i| format!("var l{i} = {i};")).collect();
        let too_many = format!("{{ {} }}", decls.join(" "));
        assert!(!compile_ok(&too_many));
    }

    #[test]
    fn test_upvalue_limit() {
        // 257 distinct captures from the enclosing function.
        let decls: Vec<String> = (0..257).map(|i| format!("var u{i} = {i};")).collect();
        let uses: Vec<String> = (0..257).map(|i| format!("print u{i};")).collect();
        let source = format!(
            "fun outer() {{ {} fun inner() {{ {} }} }}",
            decls.join(" "),
            uses.join(" ")
        );
        assert!(!compile_ok(&source));

        let decls: Vec<String> = (0..256).map(|i| format!("var u{i} = {i};")).collect();
        let uses: Vec<String> = (0..256).map(|i| format!("print u{i};")).collect();
        let source = format!(
            "fun outer() {{ {} fun inner() {{ {} }} }}",
            decls.join(" "),
            uses.join(" ")
        );
        assert!(compile_ok(&source));
    }

    #[test]
    fn test_number_pool_dedupes_across_functions() {
        let mut heap = Heap::new();
        let before = heap.constant_count();
        compile(
            "var a = 1.25; fun f() { return 1.25; } var b = 1.25;",
            FunctionKind::Script,
            &mut heap,
        )
        .expect("compiles");
        // 1.25 lands in exactly one constant slot no matter how often it
        // appears (the function object and names use their own slots).
        let mut hits = 0;
        for i in before..heap.constant_count() {
            let v = heap.constant(i as u32);
            if v.is_number() && v.as_number() == 1.25 {
                hits += 1;
            }
        }
        assert_eq!(hits, 1);
    }
}
