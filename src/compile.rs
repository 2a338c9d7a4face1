//! Load-time compiler: lowering, validation and scheduling.
//!
//! Turns a flattened IR module into a [`Design`]: a dense signal table, the
//! expression arena, the combinational assigns in dependency order, and the
//! clocked work grouped per clock signal. All structural errors (duplicate
//! names, unknown references, multiple drivers, combinational cycles,
//! unsupported operators) are caught here; a design that compiles never
//! raises during simulation.

use std::collections::HashMap;

use log::debug;

use crate::error::LoadError;
use crate::expr::{mask_for, BinOp, Expr, ExprArena, ExprId, UnOp};
use crate::ir::{Document, ExprDef, FlatModule};

/// What a signal is, per the IR declaration sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Input,
    Output,
    Net,
    Reg,
}

/// Per-signal metadata, indexed densely.
#[derive(Debug, Clone)]
pub struct SignalInfo {
    pub name: String,
    pub width: u32,
    pub kind: SignalKind,
}

impl SignalInfo {
    #[inline(always)]
    pub fn mask(&self) -> u64 {
        mask_for(self.width)
    }
}

/// A combinational assignment in scheduled order.
#[derive(Debug, Clone)]
pub struct CompiledAssign {
    pub target: usize,
    pub expr: ExprId,
    pub mask: u64,
}

/// Synchronous reset attached to a register update.
#[derive(Debug, Clone, Copy)]
pub struct ResetSpec {
    pub signal: usize,
    pub active_level: u64,
}

/// One register's next-state rule.
#[derive(Debug, Clone)]
pub struct RegUpdate {
    pub target: usize,
    pub next: ExprId,
    pub enable: Option<ExprId>,
    pub reset: Option<ResetSpec>,
    pub reset_value: u64,
    pub mask: u64,
}

/// Synchronous memory write port.
#[derive(Debug, Clone)]
pub struct MemWritePort {
    pub memory: usize,
    pub addr: ExprId,
    pub data: ExprId,
    pub enable: ExprId,
}

/// Synchronous memory read port latching into `target`.
#[derive(Debug, Clone)]
pub struct MemReadPort {
    pub memory: usize,
    pub addr: ExprId,
    pub enable: ExprId,
    pub target: usize,
    pub mask: u64,
}

/// All clocked work keyed to one clock signal, in load order.
#[derive(Debug, Clone)]
pub struct ClockGroup {
    pub clock: usize,
    pub regs: Vec<RegUpdate>,
    pub writes: Vec<MemWritePort>,
    pub reads: Vec<MemReadPort>,
}

/// Memory geometry.
#[derive(Debug, Clone)]
pub struct MemoryInfo {
    pub name: String,
    pub depth: usize,
    pub width: u32,
}

/// The compiled plan shared by every backend: signal table, arena,
/// topologically ordered assigns and per-clock groups.
#[derive(Debug, Clone)]
pub struct Design {
    pub name: String,
    pub signals: Vec<SignalInfo>,
    pub index: HashMap<String, usize>,
    pub input_names: Vec<String>,
    pub output_names: Vec<String>,
    pub arena: ExprArena,
    pub comb: Vec<CompiledAssign>,
    pub clocks: Vec<ClockGroup>,
    /// Dense signal -> clock-list index map; -1 when the signal is not a
    /// registered process clock.
    pub clock_of_signal: Vec<i32>,
    pub memories: Vec<MemoryInfo>,
    pub reg_count: usize,
}

impl Design {
    /// Parse, flatten and compile an IR document.
    pub fn from_json(json: &str) -> Result<Self, LoadError> {
        let doc = Document::parse(json)?;
        Self::build(&doc.flatten())
    }

    pub fn build(flat: &FlatModule) -> Result<Self, LoadError> {
        let mut signals: Vec<SignalInfo> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut input_names = Vec::new();
        let mut output_names = Vec::new();

        let mut declare = |name: &str, width: u32, kind: SignalKind| -> Result<usize, LoadError> {
            if width == 0 {
                return Err(LoadError::ZeroWidth(name.to_string()));
            }
            let idx = signals.len();
            if index.insert(name.to_string(), idx).is_some() {
                return Err(LoadError::DuplicateSignal(name.to_string()));
            }
            signals.push(SignalInfo {
                name: name.to_string(),
                width: width.min(64),
                kind,
            });
            Ok(idx)
        };

        // Signal table: ports first, then nets, then registers.
        for port in &flat.ports {
            let kind = match port.direction {
                crate::ir::Direction::In => SignalKind::Input,
                crate::ir::Direction::Out => SignalKind::Output,
            };
            declare(&port.name, port.width, kind)?;
            match kind {
                SignalKind::Input => input_names.push(port.name.clone()),
                _ => output_names.push(port.name.clone()),
            }
        }
        for net in &flat.nets {
            declare(&net.name, net.width, SignalKind::Net)?;
        }
        let reg_count = flat.regs.len();
        for reg in &flat.regs {
            declare(&reg.name, reg.width, SignalKind::Reg)?;
        }

        let mut memories = Vec::with_capacity(flat.memories.len());
        let mut memory_index: HashMap<String, usize> = HashMap::new();
        for mem in &flat.memories {
            if memory_index.insert(mem.name.clone(), memories.len()).is_some() {
                return Err(LoadError::DuplicateSignal(mem.name.clone()));
            }
            memories.push(MemoryInfo {
                name: mem.name.clone(),
                depth: mem.depth,
                width: mem.width.min(64),
            });
        }

        let mut lowerer = Lowerer {
            arena: ExprArena::new(),
            signals: &signals,
            index: &index,
        };

        // Driver bookkeeping enforces the single-driver invariant across
        // assigns, process statements and memory read ports.
        let mut driven = vec![false; signals.len()];

        let mut comb_raw: Vec<CompiledAssign> = Vec::with_capacity(flat.assigns.len());
        for assign in &flat.assigns {
            let target = *index
                .get(&assign.target)
                .ok_or_else(|| LoadError::UnknownSignal(assign.target.clone()))?;
            match signals[target].kind {
                SignalKind::Net | SignalKind::Output => {}
                _ => return Err(LoadError::InvalidAssignTarget(assign.target.clone())),
            }
            if driven[target] {
                return Err(LoadError::MultipleDrivers(assign.target.clone()));
            }
            driven[target] = true;
            let expr = lowerer.lower(&assign.expr)?;
            comb_raw.push(CompiledAssign {
                target,
                expr,
                mask: signals[target].mask(),
            });
        }

        // Clock groups in first-appearance order.
        let mut clocks: Vec<ClockGroup> = Vec::new();
        let mut clock_list: HashMap<usize, usize> = HashMap::new();
        let mut group_for = |clock_name: &str,
                             clocks: &mut Vec<ClockGroup>|
         -> Result<usize, LoadError> {
            let clock = *index
                .get(clock_name)
                .ok_or_else(|| LoadError::UnknownSignal(clock_name.to_string()))?;
            Ok(*clock_list.entry(clock).or_insert_with(|| {
                clocks.push(ClockGroup {
                    clock,
                    regs: Vec::new(),
                    writes: Vec::new(),
                    reads: Vec::new(),
                });
                clocks.len() - 1
            }))
        };

        for process in &flat.processes {
            let group = group_for(&process.clock, &mut clocks)?;
            let reset = match &process.reset {
                Some(name) => Some(ResetSpec {
                    signal: *index
                        .get(name)
                        .ok_or_else(|| LoadError::UnknownSignal(name.clone()))?,
                    active_level: process.reset_level & 1,
                }),
                None => None,
            };
            for stmt in &process.statements {
                let target = *index
                    .get(&stmt.target)
                    .ok_or_else(|| LoadError::UnknownSignal(stmt.target.clone()))?;
                if signals[target].kind != SignalKind::Reg {
                    return Err(LoadError::InvalidProcessTarget(stmt.target.clone()));
                }
                if driven[target] {
                    return Err(LoadError::MultipleDrivers(stmt.target.clone()));
                }
                driven[target] = true;
                let mask = signals[target].mask();
                let next = lowerer.lower(&stmt.expr)?;
                let enable = stmt.enable.as_ref().map(|e| lowerer.lower(e)).transpose()?;
                clocks[group].regs.push(RegUpdate {
                    target,
                    next,
                    enable,
                    reset,
                    reset_value: stmt.reset_value & mask,
                    mask,
                });
            }
        }

        for (mem_idx, mem) in flat.memories.iter().enumerate() {
            for wp in &mem.write_ports {
                let group = group_for(&wp.clock, &mut clocks)?;
                let addr = lowerer.lower(&wp.addr)?;
                let data = lowerer.lower(&wp.data)?;
                let enable = lowerer.lower(&wp.enable)?;
                clocks[group].writes.push(MemWritePort {
                    memory: mem_idx,
                    addr,
                    data,
                    enable,
                });
            }
            for rp in &mem.read_ports {
                let group = group_for(&rp.clock, &mut clocks)?;
                let target = *index
                    .get(&rp.target)
                    .ok_or_else(|| LoadError::UnknownSignal(rp.target.clone()))?;
                if signals[target].kind == SignalKind::Input {
                    return Err(LoadError::InvalidAssignTarget(rp.target.clone()));
                }
                if driven[target] {
                    return Err(LoadError::MultipleDrivers(rp.target.clone()));
                }
                driven[target] = true;
                let addr = lowerer.lower(&rp.addr)?;
                let enable = lowerer.lower(&rp.enable)?;
                clocks[group].reads.push(MemReadPort {
                    memory: mem_idx,
                    addr,
                    enable,
                    target,
                    mask: signals[target].mask(),
                });
            }
        }

        // A clock must be an input port or a pure combinational chain of
        // divisions thereof: its comb-dependency closure must not reach any
        // register its own group updates. The closure is walked over the
        // same "reads" graph the scheduler orders by.
        let mut comb_driver: Vec<i32> = vec![-1; signals.len()];
        for (i, assign) in comb_raw.iter().enumerate() {
            comb_driver[assign.target] = i as i32;
        }
        let mut reads_buf = Vec::new();
        for group in &clocks {
            let mut updated = vec![false; signals.len()];
            for ru in &group.regs {
                updated[ru.target] = true;
            }
            let mut visited = vec![false; signals.len()];
            let mut stack = vec![group.clock];
            while let Some(sig) = stack.pop() {
                if visited[sig] {
                    continue;
                }
                visited[sig] = true;
                if updated[sig] {
                    return Err(LoadError::ClockFeedback(signals[group.clock].name.clone()));
                }
                if comb_driver[sig] >= 0 {
                    let expr = comb_raw[comb_driver[sig] as usize].expr;
                    reads_buf.clear();
                    signal_reads(&lowerer.arena, expr, &mut reads_buf);
                    stack.extend(reads_buf.iter().map(|&s| s as usize));
                }
            }
        }

        let mut clock_of_signal = vec![-1i32; signals.len()];
        for (list_idx, group) in clocks.iter().enumerate() {
            clock_of_signal[group.clock] = list_idx as i32;
        }

        let arena = lowerer.arena;
        let comb = schedule_assigns(comb_raw, &arena, &signals)?;

        debug!(
            "compiled design `{}`: {} signals ({} regs), {} assigns, {} clock domains, {} memories, {} arena nodes",
            flat.name,
            signals.len(),
            reg_count,
            comb.len(),
            clocks.len(),
            memories.len(),
            arena.len()
        );

        Ok(Design {
            name: flat.name.clone(),
            signals,
            index,
            input_names,
            output_names,
            arena,
            comb,
            clocks,
            clock_of_signal,
            memories,
            reg_count,
        })
    }
}

struct Lowerer<'a> {
    arena: ExprArena,
    signals: &'a [SignalInfo],
    index: &'a HashMap<String, usize>,
}

impl Lowerer<'_> {
    fn lower(&mut self, def: &ExprDef) -> Result<ExprId, LoadError> {
        match def {
            ExprDef::Signal { name } => {
                let idx = *self
                    .index
                    .get(name)
                    .ok_or_else(|| LoadError::UnknownSignal(name.clone()))?;
                let width = self.signals[idx].width;
                Ok(self.arena.push(Expr::Signal(idx as u32), width))
            }
            ExprDef::Literal { value, width } => {
                if *width == 0 {
                    return Err(LoadError::ZeroWidth("literal".to_string()));
                }
                let mask = mask_for(*width);
                if *value >= 0 && (*value as u64) > mask {
                    return Err(LoadError::WidthMismatch {
                        value: *value as u64,
                        width: *width,
                    });
                }
                Ok(self.arena.push(Expr::Literal(*value as u64 & mask), *width))
            }
            ExprDef::Unary { op, operand } => {
                let operand = self.lower(operand)?;
                let (op, width) = match op.as_str() {
                    "~" | "not" => (UnOp::Not, self.arena.width(operand)),
                    "-" | "neg" => (UnOp::Neg, self.arena.width(operand)),
                    "!" => (UnOp::LogicalNot, 1),
                    "&" => (UnOp::ReduceAnd, 1),
                    "|" => (UnOp::ReduceOr, 1),
                    "^" => (UnOp::ReduceXor, 1),
                    other => return Err(LoadError::UnsupportedOperator(other.to_string())),
                };
                Ok(self.arena.push(Expr::Unary { op, operand }, width))
            }
            ExprDef::Binary {
                op,
                left,
                right,
                signed,
            } => {
                let left = self.lower(left)?;
                let right = self.lower(right)?;
                let lw = self.arena.width(left);
                let rw = self.arena.width(right);
                let mut signed = *signed;
                let (op, width) = match op.as_str() {
                    "+" => (BinOp::Add, lw.max(rw)),
                    "-" => (BinOp::Sub, lw.max(rw)),
                    "*" => (BinOp::Mul, lw.max(rw)),
                    "&" => (BinOp::And, lw.max(rw)),
                    "|" => (BinOp::Or, lw.max(rw)),
                    "^" => (BinOp::Xor, lw.max(rw)),
                    "==" => (BinOp::Eq, 1),
                    "!=" => (BinOp::Ne, 1),
                    "<" => (BinOp::Lt, 1),
                    "<=" => (BinOp::Le, 1),
                    ">" => (BinOp::Gt, 1),
                    ">=" => (BinOp::Ge, 1),
                    "<<" => (BinOp::Shl, lw),
                    ">>" => (BinOp::Shr, lw),
                    ">>>" => {
                        signed = true;
                        (BinOp::Shr, lw)
                    }
                    other => return Err(LoadError::UnsupportedOperator(other.to_string())),
                };
                Ok(self.arena.push(
                    Expr::Binary {
                        op,
                        signed,
                        left,
                        right,
                    },
                    width,
                ))
            }
            ExprDef::Slice { base, hi, lo } => {
                let base = self.lower(base)?;
                let source_width = self.arena.width(base);
                if lo > hi || *hi >= source_width {
                    return Err(LoadError::SliceOutOfRange {
                        hi: *hi,
                        lo: *lo,
                        width: source_width,
                    });
                }
                Ok(self
                    .arena
                    .push(Expr::Slice { base, lo: *lo }, hi - lo + 1))
            }
            ExprDef::Concat { parts } => {
                let mut lowered = Vec::with_capacity(parts.len());
                let mut width = 0u32;
                for part in parts {
                    let id = self.lower(part)?;
                    width += self.arena.width(id);
                    lowered.push(id);
                }
                Ok(self.arena.push(Expr::Concat { parts: lowered }, width))
            }
            ExprDef::Mux {
                selector,
                cases,
                default,
            } => {
                let selector = self.lower(selector)?;
                let default = self.lower(default)?;
                let mut width = self.arena.width(default);
                let mut lowered = Vec::with_capacity(cases.len());
                for case in cases {
                    let then = self.lower(&case.then)?;
                    width = width.max(self.arena.width(then));
                    lowered.push((case.when, then));
                }
                Ok(self.arena.push(
                    Expr::Mux {
                        selector,
                        cases: lowered,
                        default,
                    },
                    width,
                ))
            }
            ExprDef::Extend {
                base,
                width,
                signed,
            } => {
                if *width == 0 {
                    return Err(LoadError::ZeroWidth("extend".to_string()));
                }
                let base = self.lower(base)?;
                Ok(self.arena.push(
                    Expr::Extend {
                        base,
                        signed: *signed,
                    },
                    *width,
                ))
            }
        }
    }
}

/// Collect the signal indices an expression reads.
fn signal_reads(arena: &ExprArena, root: ExprId, out: &mut Vec<u32>) {
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        match arena.node(id) {
            Expr::Signal(idx) => out.push(*idx),
            Expr::Literal(_) => {}
            Expr::Unary { operand, .. } => stack.push(*operand),
            Expr::Binary { left, right, .. } => {
                stack.push(*left);
                stack.push(*right);
            }
            Expr::Slice { base, .. } => stack.push(*base),
            Expr::Concat { parts } => stack.extend(parts.iter().copied()),
            Expr::Mux {
                selector,
                cases,
                default,
            } => {
                stack.push(*selector);
                stack.push(*default);
                stack.extend(cases.iter().map(|(_, then)| *then));
            }
            Expr::Extend { base, .. } => stack.push(*base),
        }
    }
}

/// Order the assigns so that every signal an assign reads is a port, a
/// register, a read-port latch, or the target of an earlier assign.
/// Iterative Tarjan SCC over the "reads" graph; any component larger than
/// one assign, or a self-loop, is a combinational cycle and fatal.
fn schedule_assigns(
    assigns: Vec<CompiledAssign>,
    arena: &ExprArena,
    signals: &[SignalInfo],
) -> Result<Vec<CompiledAssign>, LoadError> {
    let n = assigns.len();
    if n == 0 {
        return Ok(assigns);
    }

    let mut driver_of: Vec<i32> = vec![-1; signals.len()];
    for (i, assign) in assigns.iter().enumerate() {
        driver_of[assign.target] = i as i32;
    }

    // Edges point from an assign to the assigns producing its inputs.
    let mut edges: Vec<Vec<usize>> = Vec::with_capacity(n);
    let mut reads = Vec::new();
    for assign in &assigns {
        reads.clear();
        signal_reads(arena, assign.expr, &mut reads);
        let mut deps: Vec<usize> = reads
            .iter()
            .filter_map(|&sig| {
                let d = driver_of[sig as usize];
                (d >= 0).then(|| d as usize)
            })
            .collect();
        deps.sort_unstable();
        deps.dedup();
        edges.push(deps);
    }

    // Iterative Tarjan. SCCs pop in dependency-first order, which is
    // exactly the evaluation order we need.
    let mut order: Vec<usize> = Vec::with_capacity(n);
    let mut visit_index: Vec<i32> = vec![-1; n];
    let mut lowlink: Vec<u32> = vec![0; n];
    let mut on_stack: Vec<bool> = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0u32;
    let mut frames: Vec<(usize, usize)> = Vec::new();

    for start in 0..n {
        if visit_index[start] >= 0 {
            continue;
        }
        frames.push((start, 0));
        while let Some(&(v, edge_pos)) = frames.last() {
            if edge_pos == 0 {
                visit_index[v] = next_index as i32;
                lowlink[v] = next_index;
                next_index += 1;
                stack.push(v);
                on_stack[v] = true;
            }
            if let Some(&w) = edges[v].get(edge_pos) {
                frames.last_mut().unwrap().1 += 1;
                if visit_index[w] < 0 {
                    frames.push((w, 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(visit_index[w] as u32);
                }
                continue;
            }
            // All successors explored: close the node.
            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[v]);
            }
            if lowlink[v] == visit_index[v] as u32 {
                let first = stack.iter().rposition(|&x| x == v).unwrap();
                let scc: Vec<usize> = stack.split_off(first);
                for &m in &scc {
                    on_stack[m] = false;
                }
                let self_loop = scc.len() == 1 && edges[scc[0]].contains(&scc[0]);
                if scc.len() > 1 || self_loop {
                    let mut names: Vec<String> = scc
                        .iter()
                        .map(|&m| signals[assigns[m].target].name.clone())
                        .collect();
                    names.sort();
                    return Err(LoadError::CombinationalCycle(names));
                }
                order.extend(scc);
            }
        }
    }

    // Reindex the assigns into emission order.
    let mut slots: Vec<Option<CompiledAssign>> = assigns.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .map(|i| slots[i].take().expect("assign scheduled twice"))
        .collect())
}
