//! Per-function-body compilation state.
//!
//! A [`CompileState`] owns everything one body's code generation needs: the
//! code block under construction, the temporary-register pool, the static
//! local-symbol table, the identifier interner, and the nesting stack that
//! break/continue and try/finally resolution walk.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::Error;
use crate::ast::TargetId;
use crate::compiler::bytecode::{CodeBlock, JumpSite, RegId};
use crate::compiler::opvalue::{OpValue, Register, TempHandle};

/// What kind of code a state compiles. Drives variable classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeType {
    /// Top-level program code
    Global,
    /// Function body code
    Function,
    /// Eval code (always dynamically scoped)
    Eval,
}

/// Compile-time classification of an identifier reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarClass {
    /// A fixed register in the current activation; no lookup opcode
    Local(RegId),
    /// Lives in an enclosing function's scope; scope-chain search that
    /// skips the current activation
    NonLocal,
    /// A property of the global object; direct access, no chain walk
    Global,
    /// Requires a full runtime scope-chain search
    Dynamic,
}

/// Register free lists, split by markability.
///
/// Allocation is LIFO for locality. A new id is minted only when the
/// matching free list is empty; the markability bit vector is indexed by
/// register id and grows with the high-water mark.
#[derive(Debug, Default)]
pub struct RegisterPool {
    free_plain: Vec<RegId>,
    free_markable: Vec<RegId>,
    high_water: RegId,
    markable: Vec<bool>,
}

impl RegisterPool {
    fn allocate(&mut self, markable: bool) -> RegId {
        let free = if markable {
            &mut self.free_markable
        } else {
            &mut self.free_plain
        };
        if let Some(id) = free.pop() {
            id
        } else {
            let id = self.high_water;
            self.high_water += 1;
            self.markable.push(markable);
            id
        }
    }

    /// Mints a fixed register that never enters the free lists.
    fn allocate_fixed(&mut self) -> RegId {
        let id = self.high_water;
        self.high_water += 1;
        self.markable.push(true);
        id
    }

    fn release(&mut self, id: RegId, markable: bool) {
        if markable {
            self.free_markable.push(id);
        } else {
            self.free_plain.push(id);
        }
    }

    fn free_count(&self) -> usize {
        self.free_plain.len() + self.free_markable.len()
    }
}

/// One allocated temporary slot. The last [`TempHandle`] to drop returns
/// the slot to its free list.
#[derive(Debug)]
pub struct TempSlot {
    id: RegId,
    markable: bool,
    pool: Rc<RefCell<RegisterPool>>,
}

impl Drop for TempSlot {
    fn drop(&mut self) {
        self.pool.borrow_mut().release(self.id, self.markable);
    }
}

/// A break/continue target frame with its pending jump sites.
#[derive(Debug)]
pub struct BreakTarget {
    /// The bound target this frame answers for
    pub target: TargetId,
    /// Break jump sites awaiting the construct's end address
    pub breaks: Vec<JumpSite>,
    /// Continue jump sites awaiting the construct's continue address
    pub continues: Vec<JumpSite>,
}

/// One entry of the nesting stack. Stack order encodes innermost-first
/// unwind order; the relative interleaving between kinds is what the
/// break/continue search depends on.
#[derive(Debug)]
pub enum NestEntry {
    /// A scope-chain entry (catch binding or `with` object)
    LexicalScope,
    /// A try region whose handler is a finally block; direct jumps out of
    /// it are unsound
    TryFinally,
    /// A cleanup entry that an early exit must pop (an active catch-only
    /// exception handler)
    OtherCleanup,
    /// A bound break/continue target
    ContinueBreakTarget(BreakTarget),
}

/// How a break/continue reaches its target from the current nesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpPath {
    /// The target frame is reachable directly after popping `scopes`
    /// scope/cleanup entries
    Direct {
        /// Number of scope/cleanup entries between here and the target
        scopes: u32,
    },
    /// A try/finally region intervenes; the transfer must be carried
    /// through its finally block by the unwind machinery
    ThroughFinally,
}

/// Per-function-body compilation context.
#[derive(Debug)]
pub struct CompileState {
    /// What kind of code is being compiled
    pub code_type: CodeType,
    /// The code block under construction
    pub block: CodeBlock,
    pool: Rc<RefCell<RegisterPool>>,
    locals: FxHashMap<Rc<str>, RegId>,
    local_count: usize,
    interner: FxHashSet<Rc<str>>,
    nest: Vec<NestEntry>,
    dynamic_depth: usize,
}

impl CompileState {
    /// Creates a fresh state for one compilation unit.
    pub fn new(code_type: CodeType) -> Self {
        Self {
            code_type,
            block: CodeBlock::new(),
            pool: Rc::new(RefCell::new(RegisterPool::default())),
            locals: FxHashMap::default(),
            local_count: 0,
            interner: FxHashSet::default(),
            nest: Vec::new(),
            dynamic_depth: 0,
        }
    }

    /// Interns an identifier, deduplicated within this unit.
    pub fn intern(&mut self, name: &str) -> Rc<str> {
        if let Some(existing) = self.interner.get(name) {
            return Rc::clone(existing);
        }
        let interned: Rc<str> = Rc::from(name);
        self.interner.insert(Rc::clone(&interned));
        interned
    }

    /// Assigns a fixed register to a local variable. Locals are declared by
    /// the hoisting pass before any temporary is requested, so they occupy
    /// the lowest register ids. Re-declaring a name keeps its first slot.
    pub fn declare_local(&mut self, name: &str) -> RegId {
        if let Some(id) = self.locals.get(name) {
            return *id;
        }
        let id = self.pool.borrow_mut().allocate_fixed();
        let interned = self.intern(name);
        self.locals.insert(interned, id);
        self.local_count += 1;
        id
    }

    /// Looks up a local in the static symbol table.
    pub fn lookup_local(&self, name: &str) -> Option<RegId> {
        self.locals.get(name).copied()
    }

    /// Classifies an identifier reference, in priority order: dynamic scope
    /// regions beat everything, then global code, then the irregular
    /// `arguments` binding, then the static symbol table.
    pub fn classify_variable(&self, name: &str) -> VarClass {
        if self.dynamic_depth > 0 || self.code_type == CodeType::Eval {
            return VarClass::Dynamic;
        }
        if self.code_type == CodeType::Global {
            return VarClass::Global;
        }
        if name == "arguments" {
            return VarClass::Dynamic;
        }
        match self.lookup_local(name) {
            Some(id) => VarClass::Local(id),
            None => VarClass::NonLocal,
        }
    }

    /// Allocates one logical temporary, returning a value view and a name
    /// view of the same slot. The slot is reclaimed when the last view (or
    /// clone of one) is dropped.
    pub fn request_temporary(&mut self, markable: bool) -> (OpValue, OpValue) {
        let id = self.pool.borrow_mut().allocate(markable);
        let handle = TempHandle(Rc::new(TempSlot {
            id,
            markable,
            pool: Rc::clone(&self.pool),
        }));
        let reg = Register {
            id,
            temp: Some(handle),
        };
        (OpValue::Reg(reg.clone()), OpValue::Dest(reg))
    }

    /// Number of temporaries currently allocated.
    pub fn live_temporaries(&self) -> usize {
        let pool = self.pool.borrow();
        pool.high_water as usize - self.local_count - pool.free_count()
    }

    /// Marks entry into a dynamically scoped region (`with` body, catch
    /// body). Identifier references inside classify as [`VarClass::Dynamic`].
    pub fn enter_dynamic_scope(&mut self) {
        self.dynamic_depth += 1;
    }

    /// Leaves the innermost dynamically scoped region.
    pub fn exit_dynamic_scope(&mut self) {
        debug_assert!(self.dynamic_depth > 0);
        self.dynamic_depth -= 1;
    }

    /// Pushes a nesting-stack entry.
    pub fn push_nest(&mut self, entry: NestEntry) {
        self.nest.push(entry);
    }

    /// Pops the innermost nesting-stack entry.
    pub fn pop_nest(&mut self) -> Option<NestEntry> {
        self.nest.pop()
    }

    /// Pushes a break/continue target frame.
    pub fn push_target(&mut self, target: TargetId) {
        self.nest.push(NestEntry::ContinueBreakTarget(BreakTarget {
            target,
            breaks: Vec::new(),
            continues: Vec::new(),
        }));
    }

    /// Pops a break/continue target frame, yielding its pending jump sites.
    pub fn pop_target(&mut self) -> Result<BreakTarget, Error> {
        match self.nest.pop() {
            Some(NestEntry::ContinueBreakTarget(frame)) => Ok(frame),
            _ => Err(Error::InternalError(
                "nesting stack top is not a break/continue target".into(),
            )),
        }
    }

    /// Walks the nesting stack innermost-first to decide how a
    /// break/continue reaches `target`.
    pub fn jump_path(&self, target: TargetId) -> Result<JumpPath, Error> {
        let mut scopes = 0u32;
        for entry in self.nest.iter().rev() {
            match entry {
                NestEntry::LexicalScope | NestEntry::OtherCleanup => scopes += 1,
                NestEntry::TryFinally => return Ok(JumpPath::ThroughFinally),
                NestEntry::ContinueBreakTarget(frame) if frame.target == target => {
                    return Ok(JumpPath::Direct { scopes });
                }
                NestEntry::ContinueBreakTarget(_) => {}
            }
        }
        Err(Error::InternalError(
            "break/continue target not on the nesting stack".into(),
        ))
    }

    /// Queues a break jump site on its target frame for later patch-up.
    pub fn register_break(&mut self, target: TargetId, site: JumpSite) -> Result<(), Error> {
        self.target_frame(target)?.breaks.push(site);
        Ok(())
    }

    /// Queues a continue jump site on its target frame for later patch-up.
    pub fn register_continue(&mut self, target: TargetId, site: JumpSite) -> Result<(), Error> {
        self.target_frame(target)?.continues.push(site);
        Ok(())
    }

    fn target_frame(&mut self, target: TargetId) -> Result<&mut BreakTarget, Error> {
        for entry in self.nest.iter_mut().rev() {
            if let NestEntry::ContinueBreakTarget(frame) = entry
                && frame.target == target
            {
                return Ok(frame);
            }
        }
        Err(Error::InternalError(
            "break/continue target not on the nesting stack".into(),
        ))
    }

    /// Whether any enclosing construct is a try/finally region. Decides
    /// between the direct and finally-aware return variants.
    pub fn in_try_finally(&self) -> bool {
        self.nest
            .iter()
            .any(|e| matches!(e, NestEntry::TryFinally))
    }

    /// Finalizes the unit, moving register metadata into the code block.
    pub fn finish(self) -> CodeBlock {
        debug_assert!(self.nest.is_empty(), "unbalanced nesting stack");
        debug_assert_eq!(self.live_temporaries(), 0, "leaked temporaries");
        let mut block = self.block;
        let pool = self.pool.borrow();
        block.register_count = pool.high_water as usize;
        block.markable = pool.markable.clone();
        block
    }
}
