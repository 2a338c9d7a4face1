//! Shared IR document builders for the integration suites.

#![allow(dead_code)]

use serde_json::{json, Value};

pub fn sig(name: &str) -> Value {
    json!({"type": "signal", "name": name})
}

pub fn lit(value: i64, width: u32) -> Value {
    json!({"type": "literal", "value": value, "width": width})
}

pub fn bin(op: &str, left: Value, right: Value) -> Value {
    json!({"type": "binary", "op": op, "left": left, "right": right})
}

pub fn un(op: &str, operand: Value) -> Value {
    json!({"type": "unary", "op": op, "operand": operand})
}

/// Case-style mux: first matching `when` wins, otherwise `default`.
pub fn mux(selector: Value, cases: Vec<(u64, Value)>, default: Value) -> Value {
    let cases: Vec<Value> = cases
        .into_iter()
        .map(|(when, then)| json!({"when": when, "then": then}))
        .collect();
    json!({"type": "mux", "selector": selector, "cases": cases, "default": default})
}

/// `width`-bit up-counter on input `clk`: reg `q` with `next = q + 1`.
pub fn counter_ir(width: u32) -> String {
    json!({
        "name": "counter",
        "ports": [{"name": "clk", "direction": "in", "width": 1}],
        "regs": [{"name": "q", "width": width}],
        "processes": [{
            "clock": "clk",
            "statements": [{"target": "q", "expr": bin("+", sig("q"), lit(1, width))}]
        }]
    })
    .to_string()
}

/// A small Apple II bus master. Per rising edge of `clk_14m` a 2-bit phase
/// register steps 0..3:
///   phase 0: fetch `$D000` and latch the bus byte into `dr`
///   phase 1: present `dr` on `d` with `ram_we` high at `$0400`
///   phase 2: touch `$C010`, raising `read_key`
///   phase 3: toggle the speaker flip-flop
pub fn apple2_demo_ir() -> String {
    json!({
        "name": "a2demo",
        "ports": [
            {"name": "clk_14m", "direction": "in", "width": 1},
            {"name": "ram_do", "direction": "in", "width": 8},
            {"name": "k", "direction": "in", "width": 8},
            {"name": "ram_addr", "direction": "out", "width": 16},
            {"name": "ram_we", "direction": "out", "width": 1},
            {"name": "d", "direction": "out", "width": 8},
            {"name": "read_key", "direction": "out", "width": 1},
            {"name": "speaker", "direction": "out", "width": 1}
        ],
        "regs": [
            {"name": "phase", "width": 2},
            {"name": "dr", "width": 8},
            {"name": "spk", "width": 1}
        ],
        "assigns": [
            {"target": "ram_addr", "expr": mux(
                sig("phase"),
                vec![(0, lit(0xD000, 16)), (1, lit(0x0400, 16)), (2, lit(0xC010, 16))],
                lit(0, 16)
            )},
            {"target": "ram_we", "expr": bin("==", sig("phase"), lit(1, 2))},
            {"target": "d", "expr": sig("dr")},
            {"target": "read_key", "expr": bin("==", sig("ram_addr"), lit(0xC010, 16))},
            {"target": "speaker", "expr": sig("spk")}
        ],
        "processes": [{
            "clock": "clk_14m",
            "statements": [
                {"target": "phase", "expr": bin("+", sig("phase"), lit(1, 2))},
                {"target": "dr", "expr": mux(sig("phase"), vec![(0, sig("ram_do"))], sig("dr"))},
                {"target": "spk", "expr": mux(sig("phase"), vec![(3, un("~", sig("spk")))], sig("spk"))}
            ]
        }]
    })
    .to_string()
}
