//! Bytecode virtual machine
//!
//! A stack machine over one operand stack. Every entry of the operand stack
//! owns one reference to its type node; composite instructions pop their
//! operands and move those references into the node they build. Calls get a
//! frame from a fixed-size pool, `Distribute` loops get a cursor from a
//! second pool. Results of argument-less calls to named subroutines are
//! cached per subroutine and marked `STORED`, so later in-place edits go
//! through a copy.
//!
//! User-facing type errors are reported on the [`Module`] and execution
//! continues; a [`VmError`] aborts the run.

mod cartesian;
mod config;
mod error;
mod module;
mod pool;

pub use cartesian::{CartesianProduct, distribution_members};
pub use config::VmConfig;
pub use error::{Result, VmError};
pub use module::{
    DiagnosticMessage, LineCharacter, Module, ModuleSubroutine, SUBROUTINE_FLAG_INLINE, SUBROUTINE_FLAG_MAIN,
};
pub use pool::{PoolKind, StackPool};

use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::bytecode::{ErrorCode, Instruction, Op, read_storage, runtime_hash};
use crate::types::{
    Payload, Type, TypeArena, TypeFlags, TypeId, TypeKind, combine_hash, is_assignable, stringify, table,
};

/// What the caller does with a subroutine's result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum ReturnAction {
    #[default]
    Push,
    /// Compare the inferred body type with the declared type on the stack.
    CheckBody { ip: usize },
}

/// An active subroutine
#[derive(Debug, Clone, Copy, Default)]
struct Frame {
    subroutine: usize,
    ip: usize,
    depth: usize,
    initial_sp: usize,
    args: usize,
    /// Type arguments bound so far
    type_arguments: usize,
    /// Slots holding this frame's symbols, from `initial_sp`
    symbols: usize,
    /// Function reference whose captured scopes sit lexically above this
    /// frame. Owned.
    closure: Option<TypeId>,
    loop_index: Option<usize>,
    /// Subroutine whose cache receives the result
    cache: Option<usize>,
    on_return: ReturnAction,
}

/// Cursor of a `Distribute` loop
#[derive(Debug, Clone, Default)]
struct LoopHelper {
    /// Offset of the `Distribute` instruction
    ip: usize,
    start_sp: usize,
    /// Absolute stack index of the bound type variable
    slot: usize,
    /// Owned
    members: Vec<TypeId>,
    cursor: usize,
    parent: Option<usize>,
}

pub struct Vm {
    config: VmConfig,
    stack: Vec<TypeId>,
    frames: StackPool<Frame>,
    loops: StackPool<LoopHelper>,
    arena: TypeArena,
    cache: Vec<Option<TypeId>>,
    /// Hash of the image the cache belongs to
    cache_image: u64,
    steps: u64,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        Self {
            stack: Vec::with_capacity(config.stack_size.min(4096)),
            frames: StackPool::new(PoolKind::Frame, config.frame_pool_size),
            loops: StackPool::new(PoolKind::Loop, config.loop_pool_size),
            arena: TypeArena::new(),
            cache: Vec::new(),
            cache_image: 0,
            steps: 0,
            config,
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn arena(&self) -> &TypeArena {
        &self.arena
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Instructions dispatched by the last run.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn stringify(&self, id: TypeId) -> String {
        stringify(&self.arena, id)
    }

    /// Drop a reference handed out by [`evaluate`](Self::evaluate).
    pub fn release(&mut self, id: TypeId) -> Result<()> {
        self.arena.release(id)
    }

    /// Cached result of an argument-less call to `routine`.
    pub fn cached(&self, routine: usize) -> Option<TypeId> {
        self.cache.get(routine).copied().flatten()
    }

    /// Drop every cached subroutine result.
    pub fn clear_cache(&mut self) -> Result<()> {
        for entry in &mut self.cache {
            if let Some(id) = entry.take() {
                self.arena.release(id)?;
            }
        }
        Ok(())
    }

    /// Run main to its `Halt`. Diagnostics end up on `module`.
    pub fn run(&mut self, module: &mut Module) -> Result<()> {
        self.prepare(module)?;
        debug!(file = %module.file_name, subroutines = module.subroutines.len(), "running module");
        self.call(module, 0, 0, ReturnAction::Push, 0)?;
        if let Some(result) = self.process(module)? {
            self.arena.release(result)?;
        }
        self.truncate(0)?;
        self.frames.reset();
        debug!(errors = module.errors().len(), steps = self.steps, live = self.arena.live_count(), "run finished");
        Ok(())
    }

    /// Evaluate one subroutine without arguments and return its result. The
    /// caller owns one reference to it.
    pub fn evaluate(&mut self, module: &mut Module, routine: usize) -> Result<TypeId> {
        self.prepare(module)?;
        let index = u32::try_from(routine).map_err(|_| VmError::UnknownSubroutine { index: u32::MAX })?;
        debug!(routine, "evaluating subroutine");
        self.call(module, index, 0, ReturnAction::Push, 0)?;
        let result = if self.frames.is_empty() {
            // answered from the cache
            self.pop(0)?
        } else {
            match self.process(module)? {
                Some(result) => result,
                None => return Err(VmError::UnexpectedOp { op: Op::Halt, ip: 0 }),
            }
        };
        self.truncate(0)?;
        Ok(result)
    }

    fn prepare(&mut self, module: &mut Module) -> Result<()> {
        if module.subroutines.is_empty() {
            module.parse_header()?;
        }
        let image = runtime_hash(&module.bin);
        if image != self.cache_image {
            self.clear_cache()?;
            self.cache_image = image;
        }
        if self.cache.len() < module.subroutines.len() {
            self.cache.resize(module.subroutines.len(), None);
        }
        self.truncate(0)?;
        while !self.loops.is_empty() {
            for member in std::mem::take(&mut self.loops.current_mut()?.members) {
                self.arena.release(member)?;
            }
            self.loops.pop()?;
        }
        for index in 0..self.frames.len() {
            if let Some(closure) = self.frames.at_mut(index).and_then(|frame| frame.closure.take()) {
                self.arena.release(closure)?;
            }
        }
        self.frames.reset();
        self.steps = 0;
        Ok(())
    }

    // ====================================================================
    // Operand stack
    // ====================================================================

    /// Push an owned reference.
    fn push_owned(&mut self, id: TypeId) -> Result<()> {
        if self.stack.len() >= self.config.stack_size {
            return Err(VmError::StackOverflow { capacity: self.config.stack_size });
        }
        self.stack.push(id);
        Ok(())
    }

    /// Acquire and push.
    fn push_shared(&mut self, id: TypeId) -> Result<()> {
        self.arena.use_type(id);
        self.push_owned(id)
    }

    fn push_new(&mut self, ty: Type) -> Result<()> {
        let id = self.new_owned(ty);
        self.push_owned(id)
    }

    /// Allocate a node holding one reference.
    fn new_owned(&mut self, ty: Type) -> TypeId {
        let id = self.arena.alloc(ty);
        self.arena.use_type(id)
    }

    fn pop(&mut self, ip: usize) -> Result<TypeId> {
        self.stack.pop().ok_or(VmError::StackUnderflow { ip })
    }

    /// Pop the top `count` entries, bottom first.
    fn pop_n(&mut self, count: usize, ip: usize) -> Result<Vec<TypeId>> {
        let at = self.stack.len().checked_sub(count).ok_or(VmError::StackUnderflow { ip })?;
        Ok(self.stack.drain(at..).collect())
    }

    fn top(&self, ip: usize) -> Result<TypeId> {
        self.stack.last().copied().ok_or(VmError::StackUnderflow { ip })
    }

    /// Release entries until the stack is `len` long.
    fn truncate(&mut self, len: usize) -> Result<()> {
        while self.stack.len() > len {
            if let Some(id) = self.stack.pop() {
                self.arena.release(id)?;
            }
        }
        Ok(())
    }

    /// Make the top entry safe to edit in place, copying it when shared or
    /// stored.
    fn mutable_top(&mut self, ip: usize) -> Result<TypeId> {
        let id = self.top(ip)?;
        let ty = self.arena.get(id);
        if ty.ref_count == 1 && !ty.flags.contains(TypeFlags::STORED) {
            return Ok(id);
        }
        let mut copy = ty.clone();
        copy.flags.remove(TypeFlags::STORED);
        for child in copy.children() {
            self.arena.use_type(child);
        }
        let copy = self.new_owned(copy);
        if let Some(top) = self.stack.last_mut() {
            *top = copy;
        }
        self.arena.release(id)?;
        Ok(copy)
    }

    fn set_flag(&mut self, flag: TypeFlags, ip: usize) -> Result<()> {
        let id = self.mutable_top(ip)?;
        let ty = self.arena.get_mut(id);
        ty.flags.insert(flag);
        // named members keep the name hash used for table lookups
        if !matches!(ty.kind, TypeKind::PropertySignature | TypeKind::Parameter | TypeKind::Method) {
            ty.hash = combine_hash(ty.kind, &[ty.hash, u64::from(flag.bits())]);
        }
        Ok(())
    }

    // ====================================================================
    // Frames
    // ====================================================================

    fn step(&mut self) -> Result<()> {
        self.steps += 1;
        match self.config.step_limit {
            Some(limit) if self.steps > limit => Err(VmError::StepLimitExceeded { limit }),
            _ => Ok(()),
        }
    }

    fn cacheable(routine: &ModuleSubroutine, args: u16) -> bool {
        args == 0 && routine.flags & (SUBROUTINE_FLAG_MAIN | SUBROUTINE_FLAG_INLINE) == 0
    }

    /// Enter `routine` with the top `args` entries as its arguments.
    fn call(&mut self, module: &mut Module, routine: u32, args: u16, on_return: ReturnAction, ip: usize) -> Result<()> {
        let index = routine as usize;
        let target = module.subroutines.get(index).ok_or(VmError::UnknownSubroutine { index: routine })?;
        let cacheable = Self::cacheable(target, args);
        let address = target.address as usize;
        if cacheable {
            if let Some(cached) = self.cached(index) {
                trace!(routine = index, "cached result");
                self.arena.use_type(cached);
                return self.complete(module, cached, on_return);
            }
        }
        let initial_sp = self.stack.len().checked_sub(usize::from(args)).ok_or(VmError::StackUnderflow { ip })?;
        let depth = self.frames.current().map_or(0, |frame| frame.depth + 1);
        let slot = self.frames.push()?;
        if let Some(frame) = self.frames.at_mut(slot) {
            *frame = Frame {
                subroutine: index,
                ip: address,
                depth,
                initial_sp,
                args: usize::from(args),
                cache: cacheable.then_some(index),
                on_return,
                ..Frame::default()
            };
        }
        trace!(routine = index, args, depth, "call");
        Ok(())
    }

    /// Replace the current frame's subroutine, keeping its depth and cache
    /// target.
    fn tail_call(&mut self, module: &mut Module, routine: u32, args: u16, ip: usize) -> Result<()> {
        let index = routine as usize;
        let target = module.subroutines.get(index).ok_or(VmError::UnknownSubroutine { index: routine })?;
        let address = target.address as usize;
        if Self::cacheable(target, args) {
            if let Some(cached) = self.cached(index) {
                trace!(routine = index, "cached result");
                return self.push_shared(cached);
            }
        }
        let frame = *self.frames.current()?;
        if frame.loop_index.is_some() {
            return self.call(module, routine, args, ReturnAction::Push, ip);
        }
        let args = usize::from(args);
        let args_start = self.stack.len().checked_sub(args).ok_or(VmError::StackUnderflow { ip })?;
        if args_start < frame.initial_sp {
            return Err(VmError::StackUnderflow { ip });
        }
        let moved: Vec<TypeId> = self.stack.drain(args_start..).collect();
        self.truncate(frame.initial_sp)?;
        self.stack.extend(moved);

        let current = self.frames.current_mut()?;
        current.subroutine = index;
        current.ip = address;
        current.args = args;
        current.type_arguments = 0;
        current.symbols = 0;
        let closure = current.closure.take();
        trace!(routine = index, args, depth = current.depth, "tail call");
        match closure {
            Some(closure) => self.arena.release(closure),
            None => Ok(()),
        }
    }

    /// Leave the current frame. Returns the result when the bottom frame
    /// returns.
    fn ret(&mut self, module: &mut Module, ip: usize) -> Result<Option<TypeId>> {
        let result = self.pop(ip)?;
        let frame = *self.frames.current()?;
        self.truncate(frame.initial_sp)?;
        if let Some(index) = frame.cache {
            self.arena.get_mut(result).flags.insert(TypeFlags::STORED);
            self.arena.use_type(result);
            if let Some(old) = self.cache[index].replace(result) {
                self.arena.release(old)?;
            }
        }
        self.frames.pop()?;
        if let Some(closure) = frame.closure {
            self.arena.release(closure)?;
        }
        trace!(routine = frame.subroutine, depth = frame.depth, "return");
        if self.frames.is_empty() {
            return Ok(Some(result));
        }
        self.complete(module, result, frame.on_return)?;
        Ok(None)
    }

    /// Hand an owned result to the caller.
    fn complete(&mut self, module: &mut Module, result: TypeId, action: ReturnAction) -> Result<()> {
        match action {
            ReturnAction::Push => self.push_owned(result),
            ReturnAction::CheckBody { ip } => {
                let declared = self.top(ip)?;
                if !is_assignable(&self.arena, result, declared) {
                    module.report(DiagnosticMessage::new(self.not_assignable(result, declared), ip));
                }
                self.arena.release(result)
            }
        }
    }

    fn not_assignable(&self, source: TypeId, target: TypeId) -> String {
        format!(
            "Type '{}' is not assignable to type '{}'.",
            stringify(&self.arena, source),
            stringify(&self.arena, target)
        )
    }

    // ====================================================================
    // Dispatch
    // ====================================================================

    fn process(&mut self, module: &mut Module) -> Result<Option<TypeId>> {
        loop {
            self.step()?;
            let ip = self.frames.current()?.ip;
            let (instruction, next) = Instruction::decode(&module.bin, ip)?;
            trace!(ip, op = %instruction.op(), "dispatch");
            self.frames.current_mut()?.ip = next;

            if let Some(kind) = keyword_kind(instruction) {
                self.push_new(Type::keyword(kind))?;
                continue;
            }

            match instruction {
                Instruction::Noop => {}
                Instruction::Halt => return Ok(None),
                Instruction::Error { code } => {
                    let message = match code {
                        ErrorCode::CannotFind => format!("Cannot find name '{}'", module.find_identifier(ip)),
                        other => other.message().to_string(),
                    };
                    module.report(DiagnosticMessage::new(message, ip));
                }
                Instruction::Pop => {
                    let top = self.pop(ip)?;
                    self.arena.release(top)?;
                }
                Instruction::True => self.push_new(Type::boolean_literal(true))?,
                Instruction::False => self.push_new(Type::boolean_literal(false))?,
                Instruction::StringLiteral { address } => {
                    let text = storage_text(module, address)?;
                    self.push_new(Type::string_literal(text))?;
                }
                Instruction::NumberLiteral { address } => {
                    let text = storage_text(module, address)?;
                    self.push_new(Type::literal(TypeFlags::NUMBER_LITERAL, text))?;
                }
                Instruction::BigIntLiteral { address } => {
                    let text = storage_text(module, address)?;
                    self.push_new(Type::literal(TypeFlags::BIGINT_LITERAL, text))?;
                }

                Instruction::Parameter { address } => {
                    let name = storage_text(module, address)?;
                    let ty = self.pop(ip)?;
                    self.push_named(TypeKind::Parameter, name, ty)?;
                }
                Instruction::PropertySignature => {
                    let name = self.pop(ip)?;
                    let ty = self.pop(ip)?;
                    let text = self.arena.get(name).text.clone();
                    self.arena.release(name)?;
                    self.push_named(TypeKind::PropertySignature, text, ty)?;
                }
                Instruction::Optional => self.set_flag(TypeFlags::OPTIONAL, ip)?,
                Instruction::Readonly => self.set_flag(TypeFlags::READONLY, ip)?,
                Instruction::TupleMember => self.wrap(TypeKind::TupleMember, TypeFlags::NONE, ip)?,
                Instruction::Rest => self.wrap(TypeKind::Rest, TypeFlags::NONE, ip)?,
                Instruction::RestReuse => {
                    let spread = self.top(ip)?;
                    self.consume_symbol(spread)?;
                    self.wrap(TypeKind::Rest, TypeFlags::REST_REUSE, ip)?;
                }
                Instruction::Array => self.wrap(TypeKind::Array, TypeFlags::NONE, ip)?,
                Instruction::Union { count } => {
                    let members = self.pop_n(usize::from(count), ip)?;
                    let union = self.make_union(members)?;
                    self.push_owned(union)?;
                }
                Instruction::Tuple { count } => self.tuple(usize::from(count), ip)?,
                Instruction::TemplateLiteral { count } => self.template_literal(usize::from(count), ip)?,
                Instruction::ObjectLiteral { count } => {
                    self.hash_table(TypeKind::ObjectLiteral, String::new(), usize::from(count), ip)?;
                }
                Instruction::Class { count } => {
                    let subroutine = self.frames.current()?.subroutine;
                    let name = module.subroutines.get(subroutine).map(|r| r.name.clone()).unwrap_or_default();
                    self.hash_table(TypeKind::Class, name, usize::from(count), ip)?;
                }
                Instruction::ClassRef { routine } => {
                    let name = module.subroutines.get(routine as usize).map(|r| r.name.clone()).unwrap_or_default();
                    self.push_address(TypeKind::ClassRef, routine, name)?;
                }
                Instruction::FunctionRef { routine } => self.function_ref(module, routine, ip)?,
                Instruction::Function { size } => self.function(TypeKind::Function, usize::from(size), ip)?,
                Instruction::Method { size } => self.function(TypeKind::Method, usize::from(size), ip)?,

                Instruction::Extends => {
                    let target = self.pop(ip)?;
                    let source = self.pop(ip)?;
                    let result = is_assignable(&self.arena, source, target);
                    self.arena.release(source)?;
                    self.arena.release(target)?;
                    self.push_new(Type::boolean_literal(result))?;
                }
                Instruction::JumpCondition { offset } => {
                    let condition = self.pop(ip)?;
                    let taken = self.arena.get(condition).flags.contains(TypeFlags::TRUE);
                    self.arena.release(condition)?;
                    if !taken {
                        self.frames.current_mut()?.ip = ip + offset as usize;
                    }
                }
                Instruction::Jump { offset } => {
                    let target = usize::try_from(ip as i64 + i64::from(offset))
                        .map_err(|_| VmError::malformed(Op::Jump, ip, "jump before the start of the image"))?;
                    self.frames.current_mut()?.ip = target;
                }

                Instruction::Call { routine, args } => self.call(module, routine, args, ReturnAction::Push, ip)?,
                Instruction::TailCall { routine, args } => self.tail_call(module, routine, args, ip)?,
                Instruction::Return => {
                    if let Some(result) = self.ret(module, ip)? {
                        return Ok(Some(result));
                    }
                }
                Instruction::Loads { frame, symbol } => self.loads(usize::from(frame), usize::from(symbol), ip)?,
                Instruction::TypeArgument => {
                    let frame = self.frames.current_mut()?;
                    let bound = frame.type_arguments < frame.args;
                    frame.type_arguments += 1;
                    frame.symbols += 1;
                    if !bound {
                        self.push_new(Type::keyword(TypeKind::Unknown))?;
                    }
                }
                Instruction::TypeArgumentDefault { routine } => {
                    let frame = self.frames.current_mut()?;
                    let bound = frame.type_arguments < frame.args;
                    frame.type_arguments += 1;
                    frame.symbols += 1;
                    if !bound {
                        self.call(module, routine, 0, ReturnAction::Push, ip)?;
                    }
                }
                Instruction::Slots { count } => {
                    let frame = *self.frames.current()?;
                    self.truncate(frame.initial_sp + frame.type_arguments)?;
                    for _ in 0..count {
                        self.push_new(Type::keyword(TypeKind::Never))?;
                    }
                    self.frames.current_mut()?.symbols = frame.type_arguments + usize::from(count);
                }
                Instruction::Distribute { slot, offset } => self.distribute(usize::from(slot), offset, ip)?,

                Instruction::CheckBody { routine } => {
                    self.push_new(collector())?;
                    self.call(module, routine, 1, ReturnAction::CheckBody { ip }, ip)?;
                }
                Instruction::InferBody { routine } => {
                    self.push_new(collector())?;
                    self.call(module, routine, 1, ReturnAction::Push, ip)?;
                }
                Instruction::ReturnStatement => {
                    let value = self.pop(ip)?;
                    let frame = *self.frames.current()?;
                    let collector = *self
                        .stack
                        .get(frame.initial_sp)
                        .ok_or_else(|| VmError::malformed(Op::ReturnStatement, ip, "no body collector"))?;
                    match &mut self.arena.get_mut(collector).payload {
                        Payload::List(returns) => returns.push(value),
                        _ => return Err(VmError::malformed(Op::ReturnStatement, ip, "collector is not a list")),
                    }
                }
                Instruction::UnwrapInferBody => {
                    let collector = self.pop(ip)?;
                    let returns = self.arena.get(collector).children();
                    for id in &returns {
                        self.arena.use_type(*id);
                    }
                    self.arena.release(collector)?;
                    let result = if returns.is_empty() {
                        self.new_owned(Type::keyword(TypeKind::Void))
                    } else {
                        self.make_union(returns)?
                    };
                    self.push_owned(result)?;
                }
                Instruction::Instantiate { count } => self.instantiate(module, count, ip)?,
                Instruction::CallExpression { args } => self.call_expression(module, usize::from(args), ip)?,
                Instruction::Assign => {
                    let value = self.pop(ip)?;
                    let declared = self.pop(ip)?;
                    if !is_assignable(&self.arena, value, declared) {
                        module.report(DiagnosticMessage::new(self.not_assignable(value, declared), ip));
                    }
                    self.arena.release(value)?;
                    self.arena.release(declared)?;
                }

                Instruction::Main | Instruction::Subroutine { .. } | Instruction::SourceMap { .. } => {
                    return Err(VmError::UnexpectedOp { op: instruction.op(), ip });
                }
                // keywords are handled above
                _ => return Err(VmError::UnexpectedOp { op: instruction.op(), ip }),
            }
        }
    }

    fn loads(&mut self, frame: usize, symbol: usize, ip: usize) -> Result<()> {
        let id = self
            .resolve(frame, symbol)
            .ok_or_else(|| VmError::malformed(Op::Loads, ip, format!("frame {frame} symbol {symbol} out of range")))?;
        self.push_shared(id)
    }

    /// Symbol `symbol` of the frame `depth` lexical levels up. Frames entered
    /// through a function reference continue in the scopes it captured;
    /// every other frame was called from its lexical parent.
    fn resolve(&self, depth: usize, symbol: usize) -> Option<TypeId> {
        let mut index = self.frames.len().checked_sub(1)?;
        let mut depth = depth;
        loop {
            let frame = self.frames.at(index)?;
            if depth == 0 {
                return self.stack.get(frame.initial_sp + symbol).copied();
            }
            if let Some(closure) = frame.closure {
                return match &self.arena.get(closure).payload {
                    Payload::Closure { scopes, .. } => scopes.get(depth - 1)?.get(symbol).copied(),
                    _ => None,
                };
            }
            index = index.checked_sub(1)?;
            depth -= 1;
        }
    }

    /// Acquire the symbols of the current frame and of every frame lexically
    /// enclosing it, innermost first. The walk stops at the first named
    /// subroutine.
    fn capture_scopes(&mut self, module: &Module, ip: usize) -> Result<Vec<Vec<TypeId>>> {
        let mut scopes = Vec::new();
        let Some(mut index) = self.frames.len().checked_sub(1) else {
            return Ok(scopes);
        };
        loop {
            let frame = *self
                .frames
                .at(index)
                .ok_or_else(|| VmError::malformed(Op::FunctionRef, ip, "enclosing frame vanished"))?;
            let end = (frame.initial_sp + frame.symbols).min(self.stack.len());
            let scope: Vec<TypeId> = self.stack[frame.initial_sp.min(end)..end].to_vec();
            for id in &scope {
                self.arena.use_type(*id);
            }
            scopes.push(scope);

            if let Some(closure) = frame.closure {
                if let Payload::Closure { scopes: outer, .. } = &self.arena.get(closure).payload {
                    let outer = outer.clone();
                    for id in outer.iter().flatten() {
                        self.arena.use_type(*id);
                    }
                    scopes.extend(outer);
                }
                break;
            }
            let inline = module
                .subroutines
                .get(frame.subroutine)
                .is_some_and(|routine| routine.flags & SUBROUTINE_FLAG_INLINE != 0);
            if !inline || index == 0 {
                break;
            }
            index -= 1;
        }
        Ok(scopes)
    }

    /// Reference to a generic function's wrapper, closing over the scopes it
    /// was declared in.
    fn function_ref(&mut self, module: &Module, routine: u32, ip: usize) -> Result<()> {
        let label = module
            .subroutines
            .get(routine as usize)
            .ok_or(VmError::UnknownSubroutine { index: routine })?
            .name
            .clone();
        let scopes = self.capture_scopes(module, ip)?;
        // generic methods live in member tables under their name
        let hash = match method_name(&label) {
            Some(name) => runtime_hash(name.as_bytes()),
            None => {
                let mut parts = vec![u64::from(routine)];
                parts.extend(scopes.iter().flatten().map(|id| self.arena.get(*id).hash));
                combine_hash(TypeKind::FunctionRef, &parts)
            }
        };
        let mut ty = Type::new(TypeKind::FunctionRef, hash);
        ty.text = label;
        ty.payload = Payload::Closure { routine, scopes };
        self.push_new(ty)
    }

    /// Give up the current frame's reference to `id`, held in a symbol slot
    /// nothing reads again, so a spread of it can take its storage.
    fn consume_symbol(&mut self, id: TypeId) -> Result<()> {
        let frame = *self.frames.current()?;
        let end = (frame.initial_sp + frame.symbols).min(self.stack.len());
        let holders: Vec<usize> = (frame.initial_sp.min(end)..end).filter(|slot| self.stack[*slot] == id).collect();
        let &[slot] = holders.as_slice() else {
            return Ok(());
        };
        let never = self.new_owned(Type::keyword(TypeKind::Never));
        self.stack[slot] = never;
        self.arena.release(id)
    }

    // ====================================================================
    // Composite types
    // ====================================================================

    fn wrap(&mut self, kind: TypeKind, flags: TypeFlags, ip: usize) -> Result<()> {
        let child = self.pop(ip)?;
        let mut ty = Type::new(kind, combine_hash(kind, &[self.arena.get(child).hash]));
        ty.flags = flags;
        ty.payload = Payload::Child(child);
        self.push_new(ty)
    }

    fn push_named(&mut self, kind: TypeKind, name: String, child: TypeId) -> Result<()> {
        let mut ty = Type::new(kind, runtime_hash(name.as_bytes()));
        ty.text = name;
        ty.payload = Payload::Child(child);
        self.push_new(ty)
    }

    fn push_address(&mut self, kind: TypeKind, routine: u32, name: String) -> Result<()> {
        let mut ty = Type::new(kind, combine_hash(kind, &[u64::from(routine)]));
        ty.text = name;
        ty.payload = Payload::Address(routine);
        self.push_new(ty)
    }

    /// Join owned members into one owned type: nested unions are flattened,
    /// `never` and duplicates dropped, `any` absorbs everything.
    fn make_union(&mut self, members: Vec<TypeId>) -> Result<TypeId> {
        let mut flat = Vec::with_capacity(members.len());
        for member in members {
            if self.arena.get(member).kind == TypeKind::Union {
                for child in self.arena.get(member).children() {
                    flat.push(self.arena.use_type(child));
                }
                self.arena.release(member)?;
            } else {
                flat.push(member);
            }
        }

        if let Some(position) = flat.iter().position(|id| self.arena.get(*id).kind == TypeKind::Any) {
            let any = flat.swap_remove(position);
            for other in flat {
                self.arena.release(other)?;
            }
            return Ok(any);
        }

        let mut seen = FxHashSet::default();
        let mut unique = Vec::with_capacity(flat.len());
        for member in flat {
            let ty = self.arena.get(member);
            if ty.kind == TypeKind::Never || !seen.insert(ty.hash) {
                self.arena.release(member)?;
            } else {
                unique.push(member);
            }
        }

        match unique.len() {
            0 => Ok(self.new_owned(Type::keyword(TypeKind::Never))),
            1 => Ok(unique[0]),
            _ => {
                let hashes: Vec<u64> = unique.iter().map(|id| self.arena.get(*id).hash).collect();
                let mut union = Type::new(TypeKind::Union, combine_hash(TypeKind::Union, &hashes));
                union.payload = Payload::List(unique);
                Ok(self.new_owned(union))
            }
        }
    }

    /// Build a tuple, splicing in the members of spread tuples. A leading
    /// spread that nothing else holds is grown in place.
    fn tuple(&mut self, count: usize, ip: usize) -> Result<()> {
        let members = self.pop_n(count, ip)?;
        let mut children = Vec::with_capacity(members.len());
        let mut reused = None;
        for member in members {
            let Some(spread) = self.spread_source(member) else {
                children.push(member);
                continue;
            };
            let rest = self.arena.get(member).child();
            let reusable = rest.is_some_and(|rest| {
                let rest = self.arena.get(rest);
                rest.flags.contains(TypeFlags::REST_REUSE) && rest.ref_count == 1
            }) && self.arena.get(member).ref_count == 1
                && self.arena.get(spread).ref_count == 1
                && !self.arena.get(spread).flags.contains(TypeFlags::STORED);
            if reusable {
                trace!("reusing spread tuple members");
                if let Payload::List(stolen) = std::mem::take(&mut self.arena.get_mut(spread).payload) {
                    if children.is_empty() && reused.is_none() {
                        reused = Some(self.arena.use_type(spread));
                    }
                    children.extend(stolen);
                }
            } else {
                for child in self.arena.get(spread).children() {
                    children.push(self.arena.use_type(child));
                }
            }
            self.arena.release(member)?;
        }
        let hashes: Vec<u64> = children.iter().map(|id| self.arena.get(*id).hash).collect();
        let hash = combine_hash(TypeKind::Tuple, &hashes);
        if let Some(tuple) = reused {
            let ty = self.arena.get_mut(tuple);
            ty.hash = hash;
            ty.flags = TypeFlags::NONE;
            ty.payload = Payload::List(children);
            return self.push_owned(tuple);
        }
        let mut tuple = Type::new(TypeKind::Tuple, hash);
        tuple.payload = Payload::List(children);
        self.push_new(tuple)
    }

    /// The tuple spread by a `...T` tuple member, if any.
    fn spread_source(&self, member: TypeId) -> Option<TypeId> {
        let member = self.arena.get(member);
        if member.kind != TypeKind::TupleMember {
            return None;
        }
        let rest = self.arena.get(member.child()?);
        if rest.kind != TypeKind::Rest {
            return None;
        }
        rest.child().filter(|spread| self.arena.get(*spread).kind == TypeKind::Tuple)
    }

    /// Expand a template literal over the unions in its holes.
    fn template_literal(&mut self, count: usize, ip: usize) -> Result<()> {
        let parts = self.pop_n(count, ip)?;
        let mut product = CartesianProduct::new();
        for part in &parts {
            product.add(&mut self.arena, *part);
        }
        let rows = product.calculate(&self.arena);
        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            results.push(self.template_row(row));
        }
        product.release(&mut self.arena)?;
        for part in parts {
            self.arena.release(part)?;
        }
        let union = self.make_union(results)?;
        self.push_owned(union)
    }

    /// One combination: a string literal when every piece is a literal,
    /// otherwise a template with adjacent literals merged.
    fn template_row(&mut self, row: &[TypeId]) -> TypeId {
        if row.iter().any(|id| self.arena.get(*id).kind == TypeKind::Never) {
            return self.new_owned(Type::keyword(TypeKind::Never));
        }
        let mut pieces = Vec::new();
        let mut text = String::new();
        for id in row {
            let ty = self.arena.get(*id);
            if ty.is_literal() {
                text.push_str(&ty.text);
                continue;
            }
            if !text.is_empty() {
                let literal = self.new_owned(Type::string_literal(std::mem::take(&mut text)));
                pieces.push(literal);
            }
            pieces.push(self.arena.use_type(*id));
        }
        if pieces.is_empty() {
            return self.new_owned(Type::string_literal(text));
        }
        if !text.is_empty() {
            pieces.push(self.new_owned(Type::string_literal(text)));
        }
        let hashes: Vec<u64> = pieces.iter().map(|id| self.arena.get(*id).hash).collect();
        let mut template = Type::new(TypeKind::TemplateLiteral, combine_hash(TypeKind::TemplateLiteral, &hashes));
        template.payload = Payload::List(pieces);
        self.new_owned(template)
    }

    /// Object literals and classes keep their members in a hash table keyed
    /// by member name.
    fn hash_table(&mut self, kind: TypeKind, name: String, count: usize, ip: usize) -> Result<()> {
        let members = self.pop_n(count, ip)?;
        let mut parts = Vec::with_capacity(members.len() * 3);
        for member in &members {
            let ty = self.arena.get(*member);
            let inner = ty.child().map_or(0, |child| self.arena.get(child).hash);
            parts.extend([ty.hash, inner, u64::from(ty.flags.bits())]);
        }
        let mut object = Type::new(kind, combine_hash(kind, &parts));
        object.text = name;
        object.payload = table(members.len());
        let object = self.arena.alloc(object);
        for member in &members {
            self.arena.add_hash_child(object, *member);
        }
        for member in members {
            self.arena.release(member)?;
        }
        self.push_shared(object)
    }

    /// `Function`/`Method`: the name on top, below it the return type and
    /// `size - 1` parameters.
    fn function(&mut self, kind: TypeKind, size: usize, ip: usize) -> Result<()> {
        let name = self.pop(ip)?;
        let name_ty = self.arena.get(name);
        let text = if name_ty.is_string_literal() { name_ty.text.clone() } else { String::new() };
        self.arena.release(name)?;
        let items = self.pop_n(size, ip)?;
        let hash = if kind == TypeKind::Method {
            runtime_hash(text.as_bytes())
        } else {
            let hashes: Vec<u64> = items.iter().map(|id| self.arena.get(*id).hash).collect();
            combine_hash(kind, &hashes)
        };
        let mut function = Type::new(kind, hash);
        function.text = text;
        function.payload = Payload::List(items);
        self.push_new(function)
    }

    // ====================================================================
    // Loops, instantiation and call checks
    // ====================================================================

    /// One step of a `Distribute` loop at `ip`: bind the next member and run
    /// the body, or join the collected results and jump past the loop.
    fn distribute(&mut self, slot: usize, offset: u32, ip: usize) -> Result<()> {
        let frame = *self.frames.current()?;
        let active = frame
            .loop_index
            .filter(|index| self.loops.at(*index).is_some_and(|helper| helper.ip == ip));
        let index = match active {
            Some(index) => index,
            None => {
                let source = self.pop(ip)?;
                let members = distribution_members(&mut self.arena, source);
                self.arena.release(source)?;
                let helper = LoopHelper {
                    ip,
                    start_sp: self.stack.len(),
                    slot: frame.initial_sp + slot,
                    members,
                    cursor: 0,
                    parent: frame.loop_index,
                };
                let index = self.loops.push()?;
                if let Some(entry) = self.loops.at_mut(index) {
                    *entry = helper;
                }
                self.frames.current_mut()?.loop_index = Some(index);
                trace!(ip, loop_index = index, "enter distribute");
                index
            }
        };

        let helper = self
            .loops
            .at_mut(index)
            .ok_or_else(|| VmError::malformed(Op::Distribute, ip, "loop cursor vanished"))?;
        if let Some(&member) = helper.members.get(helper.cursor) {
            helper.cursor += 1;
            let slot = helper.slot;
            let bound = self
                .stack
                .get_mut(slot)
                .ok_or_else(|| VmError::malformed(Op::Distribute, ip, format!("slot {slot} out of range")))?;
            let old = std::mem::replace(bound, member);
            self.arena.use_type(member);
            return self.arena.release(old);
        }

        let start_sp = helper.start_sp;
        let parent = helper.parent;
        let members = std::mem::take(&mut helper.members);
        let results: Vec<TypeId> = self.stack.drain(start_sp.min(self.stack.len())..).collect();
        let union = self.make_union(results)?;
        for member in members {
            self.arena.release(member)?;
        }
        self.loops.pop()?;
        let current = self.frames.current_mut()?;
        current.loop_index = parent;
        current.ip = ip + offset as usize;
        self.push_owned(union)
    }

    /// Instantiate a generic callee with the `count` type arguments above it.
    fn instantiate(&mut self, module: &mut Module, count: u16, ip: usize) -> Result<()> {
        let at = self
            .stack
            .len()
            .checked_sub(usize::from(count) + 1)
            .ok_or(VmError::StackUnderflow { ip })?;
        let callee = self.stack.remove(at);
        let ty = self.arena.get(callee);
        let generic = match ty.payload {
            Payload::Closure { routine, .. } if ty.kind == TypeKind::FunctionRef => Some(routine),
            _ => None,
        };
        if let Some(routine) = generic {
            let frames = self.frames.len();
            self.call(module, routine, count, ReturnAction::Push, ip)?;
            if self.frames.len() > frames {
                // the wrapper frame owns the reference until it returns
                self.frames.current_mut()?.closure = Some(callee);
                return Ok(());
            }
            return self.arena.release(callee);
        }
        let arguments = self.pop_n(usize::from(count), ip)?;
        for argument in arguments {
            self.arena.release(argument)?;
        }
        self.push_owned(callee)
    }

    fn call_expression(&mut self, module: &mut Module, count: usize, ip: usize) -> Result<()> {
        let arguments = self.pop_n(count, ip)?;
        let callee = self.pop(ip)?;
        let result = match self.arena.get(callee).kind {
            TypeKind::Function | TypeKind::Method => {
                self.check_arguments(module, callee, &arguments, ip);
                match self.arena.get(callee).children().first() {
                    Some(ret) => self.arena.use_type(*ret),
                    None => self.new_owned(Type::keyword(TypeKind::Unknown)),
                }
            }
            TypeKind::Any => self.new_owned(Type::keyword(TypeKind::Any)),
            // already reported where it was produced
            TypeKind::Never => self.new_owned(Type::keyword(TypeKind::Never)),
            _ => {
                module.report(DiagnosticMessage::new(ErrorCode::NotCallable.message(), ip));
                self.new_owned(Type::keyword(TypeKind::Never))
            }
        };
        for argument in arguments {
            self.arena.release(argument)?;
        }
        self.arena.release(callee)?;
        self.push_owned(result)
    }

    fn check_arguments(&self, module: &mut Module, callee: TypeId, arguments: &[TypeId], ip: usize) {
        let children = self.arena.get(callee).children();
        let params = children.get(1..).unwrap_or_default();

        let mut required = 0;
        let mut positional = Vec::new();
        let mut rest = None;
        for param in params {
            let param_ty = self.arena.get(*param);
            let Some(inner) = param_ty.child() else { continue };
            let inner_ty = self.arena.get(inner);
            if inner_ty.kind == TypeKind::Rest {
                rest = inner_ty.child().map(|element| match self.arena.get(element) {
                    array if array.kind == TypeKind::Array => array.child().unwrap_or(element),
                    _ => element,
                });
                break;
            }
            if !param_ty.is_optional() {
                required += 1;
            }
            positional.push(inner);
        }

        let too_many = rest.is_none() && arguments.len() > positional.len();
        if arguments.len() < required || too_many {
            let expected = if rest.is_some() {
                format!("at least {required}")
            } else if required == positional.len() {
                required.to_string()
            } else {
                format!("{required}-{}", positional.len())
            };
            let message = format!("Expected {expected} arguments, but got {}.", arguments.len());
            module.report(DiagnosticMessage::new(message, ip));
            return;
        }

        for (i, argument) in arguments.iter().enumerate() {
            let Some(target) = positional.get(i).copied().or(rest) else { continue };
            if !is_assignable(&self.arena, *argument, target) {
                let message = format!(
                    "Argument of type '{}' is not assignable to parameter of type '{}'.",
                    stringify(&self.arena, *argument),
                    stringify(&self.arena, target)
                );
                module.report(DiagnosticMessage::new(message, ip));
            }
        }
    }
}

/// Empty list that `ReturnStatement` appends returned types to.
fn collector() -> Type {
    let mut ty = Type::new(TypeKind::Union, 0);
    ty.payload = Payload::List(Vec::new());
    ty
}

/// Member name carried by a generic method's label, `m` for `m<U>(x: U): U`.
fn method_name(label: &str) -> Option<&str> {
    label.split_once('<').map(|(name, _)| name).filter(|name| !name.is_empty())
}

fn storage_text(module: &Module, address: u32) -> Result<String> {
    Ok(read_storage(&module.bin, address as usize)?.text().into_owned())
}

fn keyword_kind(instruction: Instruction) -> Option<TypeKind> {
    Some(match instruction {
        Instruction::Never => TypeKind::Never,
        Instruction::Any => TypeKind::Any,
        Instruction::Unknown => TypeKind::Unknown,
        Instruction::Undefined => TypeKind::Undefined,
        Instruction::Null => TypeKind::Null,
        Instruction::Void => TypeKind::Void,
        Instruction::String => TypeKind::String,
        Instruction::Number => TypeKind::Number,
        Instruction::BigInt => TypeKind::BigInt,
        Instruction::Boolean => TypeKind::Boolean,
        Instruction::Symbol => TypeKind::Symbol,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn module(source: &str) -> Module {
        let tokens = tokenize(source).unwrap();
        let file = parse("test.ts", source, tokens).unwrap();
        let bin = compile(&file).unwrap().build().unwrap();
        let mut module = Module::new(bin, "test.ts", source);
        module.parse_header().unwrap();
        module
    }

    /// Evaluate `name` and render it; checks every node is freed afterwards.
    fn eval(source: &str, name: &str) -> String {
        let mut module = module(source);
        let mut vm = Vm::default();
        let routine = module.find_subroutine(name).unwrap();
        let id = vm.evaluate(&mut module, routine).unwrap();
        let text = vm.stringify(id);
        vm.release(id).unwrap();
        vm.clear_cache().unwrap();
        assert_eq!(vm.arena().live_count(), 0, "leaked nodes evaluating {name}");
        text
    }

    fn errors(source: &str) -> Vec<String> {
        let mut module = module(source);
        let mut vm = Vm::default();
        vm.run(&mut module).unwrap();
        assert_eq!(vm.stack_len(), 0);
        vm.clear_cache().unwrap();
        assert_eq!(vm.arena().live_count(), 0);
        module.errors().iter().map(|error| error.message.clone()).collect()
    }

    #[test]
    fn test_union_drops_duplicates_and_never() {
        assert_eq!(eval("type A = string | number | string | never;", "A"), "string | number");
        assert_eq!(eval("type A = never | never;", "A"), "never");
        assert_eq!(eval("type A = string | any;", "A"), "any");
    }

    #[test]
    fn test_conditional_branches() {
        let source = "type A = \"a\" extends string ? 1 : 2; type B = 1 extends string ? 1 : 2;";
        assert_eq!(eval(source, "A"), "1");
        assert_eq!(eval(source, "B"), "2");
    }

    #[test]
    fn test_distributive_conditional() {
        let source = "type NonString<T> = T extends string ? never : T;\n\
                      type R = NonString<string | number | boolean>;";
        assert_eq!(eval(source, "R"), "number | true | false");
    }

    #[test]
    fn test_nested_distribution() {
        let source = "type Wrap<T> = T extends string ? [T] : T;\n\
                      type Outer<U> = U extends number ? never : Wrap<U>;\n\
                      type R = Outer<\"a\" | 1 | boolean>;";
        assert_eq!(eval(source, "R"), "[\"a\"] | true | false");
    }

    #[test]
    fn test_boolean_distributes_as_true_and_false() {
        let source = "type D<T> = T extends true ? 1 : 2; type R = D<boolean>;";
        assert_eq!(eval(source, "R"), "1 | 2");
        let source = "type E<T> = T extends true ? \"yes\" : [T]; type R = E<boolean | \"x\">;";
        assert_eq!(eval(source, "R"), "\"yes\" | [false] | [\"x\"]");
    }

    #[test]
    fn test_template_literal_expansion() {
        assert_eq!(eval("type T = `a-${\"x\" | \"y\"}`;", "T"), "\"a-x\" | \"a-y\"");
        assert_eq!(eval("type T = `${boolean}!`;", "T"), "\"true!\" | \"false!\"");
        assert_eq!(eval("type T = `id-${number}`;", "T"), "`id-${number}`");
    }

    #[test]
    fn test_tuple_spread() {
        let source = "type Append<T> = [...T, string]; type R = Append<[number, boolean]>;";
        assert_eq!(eval(source, "R"), "[number, boolean, string]");
    }

    /// Runs `Append` on a tuple built by hand so the result can be compared
    /// with the argument node.
    fn append_to(shared: bool) -> (bool, String, String) {
        let mut module = module("type Append<T> = [...T, string];");
        let routine = module.find_subroutine("Append").unwrap() as u32;
        let mut vm = Vm::default();
        vm.prepare(&mut module).unwrap();
        let number = vm.new_owned(Type::keyword(TypeKind::Number));
        let mut member = Type::new(TypeKind::TupleMember, 1);
        member.payload = Payload::Child(number);
        let member = vm.new_owned(member);
        let mut tuple = Type::new(TypeKind::Tuple, 2);
        tuple.payload = Payload::List(vec![member]);
        let argument = vm.new_owned(tuple);
        if shared {
            vm.arena.use_type(argument);
        }
        vm.push_owned(argument).unwrap();
        vm.call(&mut module, routine, 1, ReturnAction::Push, 0).unwrap();
        let result = vm.process(&mut module).unwrap().unwrap();

        let same = result == argument;
        let rendered = vm.stringify(result);
        vm.release(result).unwrap();
        let before = if shared {
            let text = vm.stringify(argument);
            vm.release(argument).unwrap();
            text
        } else {
            String::new()
        };
        assert_eq!(vm.stack_len(), 0);
        assert_eq!(vm.arena().live_count(), 0);
        (same, rendered, before)
    }

    #[test]
    fn test_spread_argument_grows_in_place() {
        let (same, rendered, _) = append_to(false);
        assert!(same);
        assert_eq!(rendered, "[number, string]");
    }

    #[test]
    fn test_shared_spread_argument_is_copied() {
        let (same, rendered, before) = append_to(true);
        assert!(!same);
        assert_eq!(rendered, "[number, string]");
        assert_eq!(before, "[number]");
    }

    #[test]
    fn test_default_type_argument() {
        let source = "type A<T, U = T[]> = [T, U]; type R = A<string>; type S = A<string, number>;";
        assert_eq!(eval(source, "R"), "[string, Array<string>]");
        assert_eq!(eval(source, "S"), "[string, number]");
    }

    #[test]
    fn test_missing_type_argument_is_unknown() {
        assert_eq!(eval("type A<T> = [T]; type R = A;", "R"), "[unknown]");
    }

    #[test]
    fn test_object_literal_members() {
        let rendered = eval("type O = { readonly a: string; b?: number; m(x: string): void };", "O");
        assert!(rendered.starts_with('{'));
        assert!(rendered.contains("readonly a: string"));
        assert!(rendered.contains("b?: number"));
        assert!(rendered.contains("m(x: string): void"));
    }

    #[test]
    fn test_generic_function_type_renders_signature() {
        assert_eq!(eval("type F = <U>(a: U) => U;", "F"), "<U>(a: U) => U");
        let rendered = eval("type O = { m<U>(x: U): U; n: string };", "O");
        assert!(rendered.contains("m<U>(x: U): U"), "{rendered}");
        assert!(!rendered.contains("Function"));
    }

    #[test]
    fn test_generic_method_is_found_by_name() {
        let source = "type O = { m<U>(x: U): U };
                      type R = O extends { m: string } ? 1 : 2;
                      type S = O extends O ? 1 : 2;";
        assert_eq!(eval(source, "S"), "1");
        assert_eq!(eval(source, "R"), "2");
    }

    #[test]
    fn test_generic_function_type_reads_its_declaring_scope() {
        let source = "type Make<T> = <U>(a: T, b: U) => T;\n\
                      let f: Make<string>;\n\
                      f<number>(\"x\", 1);\n\
                      f<number>(1, 2);";
        assert_eq!(errors(source), vec!["Argument of type '1' is not assignable to parameter of type 'string'."]);
    }

    #[test]
    fn test_captured_arguments_decide_identity() {
        let source = "type Make<T> = <U>(a: T) => U;\n\
                      type Same = Make<string> extends Make<string> ? 1 : 2;\n\
                      type Other = Make<string> extends Make<number> ? 1 : 2;";
        assert_eq!(eval(source, "Same"), "1");
        assert_eq!(eval(source, "Other"), "2");
    }

    #[test]
    fn test_cache_holds_results() {
        let mut module = module("type A = [string]; type B = A;");
        let mut vm = Vm::default();
        let a = module.find_subroutine("A").unwrap();
        let first = vm.evaluate(&mut module, a).unwrap();
        let second = vm.evaluate(&mut module, a).unwrap();
        assert_eq!(first, second);
        assert_eq!(vm.cached(a), Some(first));
        assert!(vm.arena().get(first).flags.contains(TypeFlags::STORED));
        vm.release(first).unwrap();
        vm.release(second).unwrap();
        assert!(vm.arena().is_live(first));
        vm.clear_cache().unwrap();
        assert_eq!(vm.arena().live_count(), 0);
    }

    #[test]
    fn test_cannot_find_renders_identifier() {
        assert_eq!(errors("type A = Missing;"), vec!["Cannot find name 'Missing'"]);
    }

    #[test]
    fn test_assign_reports_mismatch() {
        assert_eq!(
            errors("const x: string = 1; const y: number = 2;"),
            vec!["Type '1' is not assignable to type 'string'."]
        );
    }

    #[test]
    fn test_check_body_against_return_type() {
        assert_eq!(
            errors("function f(): string { return 1; }\nfunction g(): number { return 2; }"),
            vec!["Type '1' is not assignable to type 'string'."]
        );
    }

    #[test]
    fn test_inferred_body_joins_returns() {
        let source = "function f(a: number) { return a; return \"x\"; }\nconst y: number = f(1);";
        assert_eq!(errors(source), vec!["Type 'number | \"x\"' is not assignable to type 'number'."]);
    }

    #[test]
    fn test_call_expression_checks_arguments() {
        let source = "function f(a: string, b?: number): void;\nf(1);\nf();\nf(\"a\", 2);";
        assert_eq!(
            errors(source),
            vec![
                "Argument of type '1' is not assignable to parameter of type 'string'.",
                "Expected 1-2 arguments, but got 0.",
            ]
        );
    }

    #[test]
    fn test_generic_call_is_instantiated() {
        let source = "function id<T>(a: T): T;\nconst x: string = id<string>(\"a\");\nconst y: number = id<string>(\"a\");";
        assert_eq!(errors(source), vec!["Type 'string' is not assignable to type 'number'."]);
    }

    #[test]
    fn test_not_callable() {
        assert_eq!(errors("type A = string; A();"), vec![ErrorCode::NotCallable.message()]);
        assert_eq!(errors("const x = 1; x();"), vec![ErrorCode::NotCallable.message()]);
    }

    #[test]
    fn test_step_limit_stops_tail_recursion() {
        let mut module = module("type A = B; type B = A;");
        let mut vm = Vm::new(VmConfig::default().with_step_limit(1000));
        let a = module.find_subroutine("A").unwrap();
        assert_eq!(vm.evaluate(&mut module, a), Err(VmError::StepLimitExceeded { limit: 1000 }));
    }

    #[test]
    fn test_frame_pool_overflow() {
        let mut module = module("type A = [A];");
        let config = VmConfig { frame_pool_size: 64, ..VmConfig::default() };
        let mut vm = Vm::new(config);
        let a = module.find_subroutine("A").unwrap();
        assert_eq!(vm.evaluate(&mut module, a), Err(VmError::FramePoolOverflow { capacity: 64 }));
    }

    #[test]
    fn test_stack_overflow() {
        let mut module = module("type A = [string, string, string, string];");
        let config = VmConfig { stack_size: 2, ..VmConfig::default() };
        let mut vm = Vm::new(config);
        let a = module.find_subroutine("A").unwrap();
        assert_eq!(vm.evaluate(&mut module, a), Err(VmError::StackOverflow { capacity: 2 }));
    }
}
