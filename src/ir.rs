//! JSON IR document model.
//!
//! This is the declarative form of a design: ports, nets, registers,
//! memories, combinational assigns and clocked processes, optionally nested
//! as a module hierarchy. `Document::parse` deserializes the JSON text and
//! `Document::flatten` inlines the hierarchy into a single flat module with
//! `__`-joined leaf names, which is what the compiler consumes.

use serde::Deserialize;

use crate::error::LoadError;

/// Separator used when joining hierarchical paths into flat signal names.
pub const HIER_SEP: &str = "__";

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

/// Port definition
#[derive(Debug, Clone, Deserialize)]
pub struct PortDef {
    pub name: String,
    pub direction: Direction,
    pub width: u32,
}

/// Wire/net definition
#[derive(Debug, Clone, Deserialize)]
pub struct NetDef {
    pub name: String,
    pub width: u32,
}

/// Register definition
#[derive(Debug, Clone, Deserialize)]
pub struct RegDef {
    pub name: String,
    pub width: u32,
}

/// One case arm of a `mux` expression.
#[derive(Debug, Clone, Deserialize)]
pub struct MuxCaseDef {
    /// Selector value this arm matches.
    pub when: u64,
    pub then: ExprDef,
}

/// Expression tree as it appears in the JSON document. Signal widths are
/// never carried here; they come from the declarations.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExprDef {
    Signal {
        name: String,
    },
    Literal {
        value: i64,
        width: u32,
    },
    Unary {
        op: String,
        operand: Box<ExprDef>,
    },
    Binary {
        op: String,
        left: Box<ExprDef>,
        right: Box<ExprDef>,
        #[serde(default)]
        signed: bool,
    },
    Slice {
        base: Box<ExprDef>,
        hi: u32,
        lo: u32,
    },
    Concat {
        parts: Vec<ExprDef>,
    },
    Mux {
        selector: Box<ExprDef>,
        #[serde(default)]
        cases: Vec<MuxCaseDef>,
        default: Box<ExprDef>,
    },
    Extend {
        base: Box<ExprDef>,
        width: u32,
        #[serde(default)]
        signed: bool,
    },
}

/// Combinational assignment
#[derive(Debug, Clone, Deserialize)]
pub struct AssignDef {
    pub target: String,
    pub expr: ExprDef,
}

/// One register update inside a clocked process.
#[derive(Debug, Clone, Deserialize)]
pub struct SeqAssignDef {
    pub target: String,
    pub expr: ExprDef,
    #[serde(default)]
    pub enable: Option<ExprDef>,
    #[serde(default)]
    pub reset_value: u64,
}

/// Clocked process
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessDef {
    pub clock: String,
    #[serde(default)]
    pub reset: Option<String>,
    #[serde(default = "default_reset_level")]
    pub reset_level: u64,
    pub statements: Vec<SeqAssignDef>,
}

fn default_reset_level() -> u64 {
    1
}

/// Synchronous memory write port.
#[derive(Debug, Clone, Deserialize)]
pub struct WritePortDef {
    pub addr: ExprDef,
    pub data: ExprDef,
    pub enable: ExprDef,
    pub clock: String,
}

/// Synchronous memory read port latching into `target`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadPortDef {
    pub addr: ExprDef,
    pub enable: ExprDef,
    pub clock: String,
    pub target: String,
}

/// Memory definition
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryDef {
    pub name: String,
    pub depth: usize,
    pub width: u32,
    #[serde(default)]
    pub write_ports: Vec<WritePortDef>,
    #[serde(default)]
    pub read_ports: Vec<ReadPortDef>,
}

/// A module: one level of the design hierarchy.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleDef {
    #[serde(default = "default_module_name")]
    pub name: String,
    #[serde(default)]
    pub ports: Vec<PortDef>,
    #[serde(default)]
    pub nets: Vec<NetDef>,
    #[serde(default)]
    pub regs: Vec<RegDef>,
    #[serde(default)]
    pub memories: Vec<MemoryDef>,
    #[serde(default)]
    pub assigns: Vec<AssignDef>,
    #[serde(default)]
    pub processes: Vec<ProcessDef>,
    #[serde(default)]
    pub children: Vec<ModuleDef>,
}

fn default_module_name() -> String {
    "top".to_string()
}

/// A parsed IR document. Immutable after `parse`.
#[derive(Debug, Clone)]
pub struct Document {
    pub top: ModuleDef,
}

impl Document {
    /// Parse an IR document from JSON text. Flattened designs produce deep
    /// expression trees, so the serde_json recursion limit is lifted.
    pub fn parse(json: &str) -> Result<Self, LoadError> {
        let mut de = serde_json::Deserializer::from_str(json);
        de.disable_recursion_limit();
        let top = ModuleDef::deserialize(&mut de)?;
        Ok(Self { top })
    }

    /// Inline the hierarchy into a single flat module. Child signals are
    /// renamed `parent__child__signal`; child ports lose their direction
    /// and become plain nets, wired up by whatever assigns the document
    /// carries against the joined names.
    pub fn flatten(&self) -> FlatModule {
        let mut flat = FlatModule {
            name: self.top.name.clone(),
            ports: self.top.ports.clone(),
            nets: self.top.nets.clone(),
            regs: self.top.regs.clone(),
            memories: self.top.memories.clone(),
            assigns: self.top.assigns.clone(),
            processes: self.top.processes.clone(),
        };
        for child in &self.top.children {
            inline_module(child, &child.name, &mut flat);
        }
        flat
    }
}

/// The hierarchy-free form of a design.
#[derive(Debug, Clone)]
pub struct FlatModule {
    pub name: String,
    pub ports: Vec<PortDef>,
    pub nets: Vec<NetDef>,
    pub regs: Vec<RegDef>,
    pub memories: Vec<MemoryDef>,
    pub assigns: Vec<AssignDef>,
    pub processes: Vec<ProcessDef>,
}

fn join(prefix: &str, name: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + HIER_SEP.len() + name.len());
    out.push_str(prefix);
    out.push_str(HIER_SEP);
    out.push_str(name);
    out
}

fn inline_module(module: &ModuleDef, prefix: &str, flat: &mut FlatModule) {
    // Child ports become internal nets of the flat design.
    for port in &module.ports {
        flat.nets.push(NetDef {
            name: join(prefix, &port.name),
            width: port.width,
        });
    }
    for net in &module.nets {
        flat.nets.push(NetDef {
            name: join(prefix, &net.name),
            width: net.width,
        });
    }
    for reg in &module.regs {
        flat.regs.push(RegDef {
            name: join(prefix, &reg.name),
            width: reg.width,
        });
    }
    for mem in &module.memories {
        flat.memories.push(MemoryDef {
            name: join(prefix, &mem.name),
            depth: mem.depth,
            width: mem.width,
            write_ports: mem
                .write_ports
                .iter()
                .map(|wp| WritePortDef {
                    addr: rename_expr(&wp.addr, prefix),
                    data: rename_expr(&wp.data, prefix),
                    enable: rename_expr(&wp.enable, prefix),
                    clock: join(prefix, &wp.clock),
                })
                .collect(),
            read_ports: mem
                .read_ports
                .iter()
                .map(|rp| ReadPortDef {
                    addr: rename_expr(&rp.addr, prefix),
                    enable: rename_expr(&rp.enable, prefix),
                    clock: join(prefix, &rp.clock),
                    target: join(prefix, &rp.target),
                })
                .collect(),
        });
    }
    for assign in &module.assigns {
        flat.assigns.push(AssignDef {
            target: join(prefix, &assign.target),
            expr: rename_expr(&assign.expr, prefix),
        });
    }
    for process in &module.processes {
        flat.processes.push(ProcessDef {
            clock: join(prefix, &process.clock),
            reset: process.reset.as_ref().map(|r| join(prefix, r)),
            reset_level: process.reset_level,
            statements: process
                .statements
                .iter()
                .map(|stmt| SeqAssignDef {
                    target: join(prefix, &stmt.target),
                    expr: rename_expr(&stmt.expr, prefix),
                    enable: stmt.enable.as_ref().map(|e| rename_expr(e, prefix)),
                    reset_value: stmt.reset_value,
                })
                .collect(),
        });
    }
    for grandchild in &module.children {
        let path = join(prefix, &grandchild.name);
        inline_module(grandchild, &path, flat);
    }
}

fn rename_expr(expr: &ExprDef, prefix: &str) -> ExprDef {
    match expr {
        ExprDef::Signal { name } => ExprDef::Signal {
            name: join(prefix, name),
        },
        ExprDef::Literal { value, width } => ExprDef::Literal {
            value: *value,
            width: *width,
        },
        ExprDef::Unary { op, operand } => ExprDef::Unary {
            op: op.clone(),
            operand: Box::new(rename_expr(operand, prefix)),
        },
        ExprDef::Binary {
            op,
            left,
            right,
            signed,
        } => ExprDef::Binary {
            op: op.clone(),
            left: Box::new(rename_expr(left, prefix)),
            right: Box::new(rename_expr(right, prefix)),
            signed: *signed,
        },
        ExprDef::Slice { base, hi, lo } => ExprDef::Slice {
            base: Box::new(rename_expr(base, prefix)),
            hi: *hi,
            lo: *lo,
        },
        ExprDef::Concat { parts } => ExprDef::Concat {
            parts: parts.iter().map(|p| rename_expr(p, prefix)).collect(),
        },
        ExprDef::Mux {
            selector,
            cases,
            default,
        } => ExprDef::Mux {
            selector: Box::new(rename_expr(selector, prefix)),
            cases: cases
                .iter()
                .map(|c| MuxCaseDef {
                    when: c.when,
                    then: rename_expr(&c.then, prefix),
                })
                .collect(),
            default: Box::new(rename_expr(default, prefix)),
        },
        ExprDef::Extend {
            base,
            width,
            signed,
        } => ExprDef::Extend {
            base: Box::new(rename_expr(base, prefix)),
            width: *width,
            signed: *signed,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_module() {
        let doc = Document::parse(r#"{"name": "t", "ports": [], "nets": []}"#).unwrap();
        assert_eq!(doc.top.name, "t");
        assert!(doc.top.assigns.is_empty());
    }

    #[test]
    fn missing_arrays_default_to_empty() {
        let doc = Document::parse("{}").unwrap();
        assert_eq!(doc.top.name, "top");
        assert!(doc.top.ports.is_empty());
        assert!(doc.top.children.is_empty());
    }

    #[test]
    fn flatten_joins_child_names_with_double_underscore() {
        let doc = Document::parse(
            r#"{
                "name": "top",
                "ports": [{"name": "clk", "direction": "in", "width": 1}],
                "children": [{
                    "name": "cpu",
                    "ports": [{"name": "clk", "direction": "in", "width": 1}],
                    "regs": [{"name": "pc", "width": 16}],
                    "assigns": [],
                    "processes": [{
                        "clock": "clk",
                        "statements": [{
                            "target": "pc",
                            "expr": {"type": "signal", "name": "pc"}
                        }]
                    }],
                    "children": [{
                        "name": "alu",
                        "nets": [{"name": "out", "width": 8}]
                    }]
                }]
            }"#,
        )
        .unwrap();
        let flat = doc.flatten();
        assert!(flat.nets.iter().any(|n| n.name == "cpu__clk"));
        assert!(flat.regs.iter().any(|r| r.name == "cpu__pc"));
        assert!(flat.nets.iter().any(|n| n.name == "cpu__alu__out"));
        assert_eq!(flat.processes[0].clock, "cpu__clk");
        match &flat.processes[0].statements[0].expr {
            ExprDef::Signal { name } => assert_eq!(name, "cpu__pc"),
            other => panic!("unexpected expr {other:?}"),
        }
    }
}
