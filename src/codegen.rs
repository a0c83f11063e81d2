//! Compile passes over a fusion DAG.
//!
//! All per-pass bookkeeping lives in a driver-owned [`PassState`] (post-order
//! node list, id map, visited bitsets) rather than in the nodes themselves, so
//! a node arena can be recompiled any number of times and a shared
//! sub-expression contributes exactly one id, one parameter, one offset block
//! and one body emission no matter how many parents reach it. Dropping the
//! pass state between compilations is the flag reset.

use crate::driver::FusionError;
use crate::graph::{FusionGraph, NodeKind};
use crate::op::ScalarValue;
use crate::shape::Shape;
use fixedbitset::FixedBitSet;
use indexmap::IndexSet;
use petgraph::{stable_graph::NodeIndex, visit::NodeIndexable};
use rustc_hash::FxHashMap;

/// Addressing strategy selected once per compilation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressMode {
    /// Every buffer is dense row-major for the target shape; one flattened
    /// index addresses all operands with no per-dimension stride math.
    Linear,
    /// General strided/broadcast addressing; each buffer leaf gets an offset
    /// prologue decomposing the flat index into coordinates.
    General,
}

/// A runtime argument to bind at launch, in declared-parameter order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KernelArg {
    /// Device pointer for a buffer leaf (or the output).
    Ptr(u64),
    /// One dimension extent or stride, general mode only.
    Int(i32),
    /// A scalar leaf's embedded literal, passed by value.
    Scalar(ScalarValue),
}

/// Generated kernel text plus the name it was generated under.
#[derive(Clone, Debug, PartialEq)]
pub struct KernelSource {
    pub name: String,
    pub text: String,
    pub mode: AddressMode,
}

/// Aggregate DAG statistics for fusion-budget decisions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FusionStats {
    /// Total node count (shared nodes counted once).
    pub nodes: usize,
    /// Distinct buffer leaves.
    pub buffers: usize,
    /// Total addressed byte footprint of all buffer leaves.
    pub bytes: u64,
    /// Root height.
    pub height: u32,
}

/// Pass-local bookkeeping for one compilation of one DAG root.
#[derive(Debug)]
pub struct PassState {
    order: Vec<NodeIndex>,
    ids: FxHashMap<NodeIndex, usize>,
}

impl PassState {
    /// The id assigned to `node`. Ids form a contiguous `[0, node_count)`
    /// range in deterministic post-order, children before parents.
    pub fn id(&self, node: NodeIndex) -> usize {
        self.ids[&node]
    }

    /// Nodes in id order.
    pub fn order(&self) -> &[NodeIndex] {
        &self.order
    }

    pub fn node_count(&self) -> usize {
        self.order.len()
    }
}

/// Post-order id assignment. Shared nodes are visited once and keep the id
/// from their first visit, so `a + a` yields two ids, not three.
pub fn assign_ids(graph: &FusionGraph, root: NodeIndex) -> PassState {
    let mut visited = FixedBitSet::with_capacity(graph.graph.node_bound());
    let mut order = Vec::new();
    post_order(graph, root, &mut visited, &mut order);
    let ids = order.iter().enumerate().map(|(id, n)| (*n, id)).collect();
    PassState { order, ids }
}

fn post_order(
    graph: &FusionGraph,
    node: NodeIndex,
    visited: &mut FixedBitSet,
    order: &mut Vec<NodeIndex>,
) {
    if visited.contains(node.index()) {
        return;
    }
    visited.insert(node.index());
    for child in graph.children(node) {
        post_order(graph, child, visited, order);
    }
    order.push(node);
}

/// True iff every buffer leaf under `root` can be addressed by the flattened
/// index alone: dense row-major strides for exactly the target shape.
/// Scalars need no addressing; composite nodes AND over their children.
pub fn compute_linearity(graph: &FusionGraph, root: NodeIndex, target: &Shape) -> bool {
    let mut memo = FxHashMap::default();
    linearity(graph, root, target, &mut memo)
}

fn linearity(
    graph: &FusionGraph,
    node: NodeIndex,
    target: &Shape,
    memo: &mut FxHashMap<NodeIndex, bool>,
) -> bool {
    if let Some(known) = memo.get(&node) {
        return *known;
    }
    let linear = match &graph[node].kind {
        NodeKind::Buffer { shape, strides, .. } => {
            *shape == *target && *strides == target.row_major()
        }
        NodeKind::Scalar { .. } => true,
        NodeKind::Unary { .. } | NodeKind::Binary { .. } => graph
            .children(node)
            .into_iter()
            .all(|child| linearity(graph, child, target, memo)),
    };
    memo.insert(node, linear);
    linear
}

/// Flat element indices and bound extents/strides are 32-bit in the kernel.
const MAX_FLAT_INDEX: u64 = i32::MAX as u64;

/// LINEARITY phase: validate every buffer leaf against the target under
/// implicit-broadcast rules and reject anything that cannot be addressed in
/// 32 bits, then pick the addressing mode. A reconcilable element-count
/// mismatch forces general mode instead of failing.
pub fn select_address_mode(
    graph: &FusionGraph,
    root: NodeIndex,
    target: &Shape,
) -> Result<AddressMode, FusionError> {
    let max_index = target.elements().saturating_sub(1);
    if max_index > MAX_FLAT_INDEX {
        return Err(FusionError::AddressOverflow {
            shape: *target,
            max_index,
        });
    }
    let mut visited = FixedBitSet::with_capacity(graph.graph.node_bound());
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if visited.contains(node.index()) {
            continue;
        }
        visited.insert(node.index());
        if let NodeKind::Buffer { shape, strides, .. } = &graph[node].kind {
            if !shape.broadcasts_to(target) {
                return Err(FusionError::ShapeMismatch {
                    found: *shape,
                    target: *target,
                });
            }
            let max_index: u64 = shape
                .0
                .iter()
                .zip(strides.0.iter())
                .map(|(d, s)| d.saturating_sub(1) * s)
                .sum();
            if max_index > MAX_FLAT_INDEX {
                return Err(FusionError::AddressOverflow {
                    shape: *shape,
                    max_index,
                });
            }
        }
        stack.extend(graph.children(node));
    }
    if compute_linearity(graph, root, target) {
        Ok(AddressMode::Linear)
    } else {
        Ok(AddressMode::General)
    }
}

/// One DAG-safe walk accumulating node/buffer/byte totals.
pub fn collect_stats(graph: &FusionGraph, root: NodeIndex) -> FusionStats {
    let mut visited = FixedBitSet::with_capacity(graph.graph.node_bound());
    let mut stats = FusionStats {
        height: graph[root].height,
        ..Default::default()
    };
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if visited.contains(node.index()) {
            continue;
        }
        visited.insert(node.index());
        stats.nodes += 1;
        if let NodeKind::Buffer { shape, .. } = &graph[node].kind {
            stats.buffers += 1;
            stats.bytes += shape.elements() * graph[node].dtype.sizeof() as u64;
        }
        stack.extend(graph.children(node));
    }
    stats
}

/// Structural fingerprint of the DAG, used as cache key and kernel symbol.
///
/// Post-order concatenation of fixed-width hex fields: opcode, child ids, own
/// id, plus a dtype code per node. The addressing mode is deliberately not
/// folded in; it is the second component of the cache key.
pub fn kernel_name(graph: &FusionGraph, pass: &PassState) -> String {
    let mut name = String::from("KER");
    for &node in pass.order() {
        let n = &graph[node];
        name.push('_');
        let opcode = match &n.kind {
            NodeKind::Buffer { .. } => 0x01,
            NodeKind::Scalar { .. } => 0x02,
            NodeKind::Unary { op } => op.code(),
            NodeKind::Binary { op } => op.code(),
        };
        name.push_str(&format!("{opcode:02x}"));
        for child in graph.children(node) {
            name.push_str(&format!("{:02x}", pass.id(child)));
        }
        name.push_str(&format!("{:02x}", pass.id(node)));
        name.push(n.dtype.code());
    }
    name
}

/// Kernel parameter declarations in id order. Only leaves contribute: a buffer
/// its pointer (plus extents and strides in general mode), a scalar its
/// by-value literal slot. Composite nodes need no parameter of their own.
pub fn generate_params(graph: &FusionGraph, pass: &PassState, mode: AddressMode) -> Vec<String> {
    let mut params = Vec::new();
    for &node in pass.order() {
        let id = pass.id(node);
        let ty = graph[node].dtype.ir();
        match &graph[node].kind {
            NodeKind::Buffer { .. } => {
                params.push(format!("{ty}* %ptr{id}"));
                if mode == AddressMode::General {
                    for dim in 0..crate::shape::MAX_DIMS {
                        params.push(format!("i32 %dim{id}_{dim}"));
                    }
                    for dim in 0..crate::shape::MAX_DIMS {
                        params.push(format!("i32 %str{id}_{dim}"));
                    }
                }
            }
            NodeKind::Scalar { .. } => params.push(format!("{ty} %val{id}")),
            NodeKind::Unary { .. } | NodeKind::Binary { .. } => {}
        }
    }
    params
}

/// Offset prologue, general mode only: decompose the output flat index into
/// per-dimension coordinates over the *target* extents (once per kernel),
/// then derive each buffer leaf's strided element offset from those
/// coordinates. A broadcast leaf's unit extents clamp its coordinates to
/// zero, so it re-reads element 0 instead of running past its allocation.
/// A no-op in linear mode, where the flat index is reused directly.
pub fn generate_offsets(graph: &FusionGraph, pass: &PassState, mode: AddressMode) -> String {
    let mut text = String::new();
    if mode == AddressMode::Linear {
        return text;
    }
    index_decomposition(&mut text);
    for &node in pass.order() {
        if matches!(graph[node].kind, NodeKind::Buffer { .. }) {
            buffer_offset(&mut text, pass.id(node));
        }
    }
    text
}

// Row-major decomposition of %idx over the target extents, trailing dim
// fastest. The %tdim parameters bind the target shape, not any buffer's.
fn index_decomposition(text: &mut String) {
    text.push_str("%crd3 = srem i32 %idx, %tdim3\n");
    text.push_str("%tquo3 = sdiv i32 %idx, %tdim3\n");
    text.push_str("%crd2 = srem i32 %tquo3, %tdim2\n");
    text.push_str("%tquo2 = sdiv i32 %tquo3, %tdim2\n");
    text.push_str("%crd1 = srem i32 %tquo2, %tdim1\n");
    text.push_str("%crd0 = sdiv i32 %tquo2, %tdim1\n");
}

// Each buffer extent equals the target extent or 1 (checked during the
// LINEARITY phase), so `coord % extent` passes matching dims through and
// zeroes broadcast ones before the stride multiply.
fn buffer_offset(text: &mut String, id: usize) {
    for dim in 0..crate::shape::MAX_DIMS {
        text.push_str(&format!(
            "%bcrd{id}_{dim} = srem i32 %crd{dim}, %dim{id}_{dim}\n"
        ));
    }
    for dim in 0..crate::shape::MAX_DIMS {
        text.push_str(&format!(
            "%mul{id}_{dim} = mul i32 %bcrd{id}_{dim}, %str{id}_{dim}\n"
        ));
    }
    text.push_str(&format!("%add{id}_1 = add i32 %mul{id}_0, %mul{id}_1\n"));
    text.push_str(&format!("%add{id}_2 = add i32 %add{id}_1, %mul{id}_2\n"));
    text.push_str(&format!("%off{id} = add i32 %add{id}_2, %mul{id}_3\n"));
}

/// Per-node instruction bodies in id order. External device functions record
/// their declaration signature into `decls` so each distinct signature is
/// declared exactly once, in first-call order.
pub fn generate_body(
    graph: &FusionGraph,
    pass: &PassState,
    mode: AddressMode,
    decls: &mut IndexSet<String>,
) -> String {
    let mut text = String::new();
    for &node in pass.order() {
        let id = pass.id(node);
        let ty = graph[node].dtype.ir();
        match &graph[node].kind {
            NodeKind::Buffer { .. } => {
                let index = match mode {
                    AddressMode::Linear => "%idx".to_string(),
                    AddressMode::General => format!("%off{id}"),
                };
                text.push_str(&format!(
                    "%bptr{id} = getelementptr {ty}, {ty}* %ptr{id}, i32 {index}\n"
                ));
                text.push_str(&format!("%val{id} = load {ty}, {ty}* %bptr{id}\n"));
            }
            // Pure source: the by-value parameter already is %val{id}.
            NodeKind::Scalar { .. } => {}
            NodeKind::Unary { op } => {
                let child = graph.children(node)[0];
                let operands = format!("{} %val{}", graph[child].dtype.ir(), pass.id(child));
                let signature = graph[child].dtype.ir().to_string();
                emit_call(
                    &mut text,
                    decls,
                    id,
                    ty,
                    op.symbol(),
                    &operands,
                    &signature,
                    op.is_predicate(),
                    graph[node].dtype.is_integral(),
                );
            }
            NodeKind::Binary { op } => {
                let children = graph.children(node);
                let (lhs, rhs) = (children[0], children[1]);
                let operands = format!(
                    "{} %val{}, {} %val{}",
                    graph[lhs].dtype.ir(),
                    pass.id(lhs),
                    graph[rhs].dtype.ir(),
                    pass.id(rhs)
                );
                let signature = format!("{}, {}", graph[lhs].dtype.ir(), graph[rhs].dtype.ir());
                emit_call(
                    &mut text,
                    decls,
                    id,
                    ty,
                    op.symbol(),
                    &operands,
                    &signature,
                    op.is_predicate(),
                    graph[node].dtype.is_integral(),
                );
            }
        }
    }
    text
}

/// One call instruction, plus the truth-value cast for predicates: the device
/// predicate always returns an i32, which narrows into integral output types
/// and converts into float output types.
#[allow(clippy::too_many_arguments)]
fn emit_call(
    text: &mut String,
    decls: &mut IndexSet<String>,
    id: usize,
    out_ty: &str,
    symbol: &str,
    operands: &str,
    signature: &str,
    predicate: bool,
    integral_out: bool,
) {
    let ret_ty = if predicate { "i32" } else { out_ty };
    decls.insert(format!("declare {ret_ty} {symbol}({signature})\n"));
    if predicate {
        text.push_str(&format!("%tmp{id} = call i32 {symbol}({operands})\n"));
        let cast = if integral_out { "trunc" } else { "sitofp" };
        text.push_str(&format!("%val{id} = {cast} i32 %tmp{id} to {out_ty}\n"));
    } else {
        text.push_str(&format!("%val{id} = call {out_ty} {symbol}({operands})\n"));
    }
}

/// Runtime arguments in declared-parameter order: buffer pointer (plus dims
/// and strides in general mode), scalar literal, nothing for composites.
pub fn bind_args(graph: &FusionGraph, pass: &PassState, mode: AddressMode) -> Vec<KernelArg> {
    let mut args = Vec::new();
    for &node in pass.order() {
        match &graph[node].kind {
            NodeKind::Buffer {
                shape,
                strides,
                ptr,
            } => {
                args.push(KernelArg::Ptr(*ptr));
                if mode == AddressMode::General {
                    args.extend(shape.0.iter().map(|d| KernelArg::Int(*d as i32)));
                    args.extend(strides.0.iter().map(|s| KernelArg::Int(*s as i32)));
                }
            }
            NodeKind::Scalar { value } => args.push(KernelArg::Scalar(*value)),
            NodeKind::Unary { .. } | NodeKind::Binary { .. } => {}
        }
    }
    args
}

/// Assemble the full kernel text: declarations, parameter list, offset
/// prologue, bodies in id order, terminating store of the root value.
pub fn generate_kernel(graph: &FusionGraph, pass: &PassState, mode: AddressMode) -> KernelSource {
    let name = kernel_name(graph, pass);
    let mut decls: IndexSet<String> = IndexSet::new();
    decls.insert("declare i32 __global_index()\n".to_string());

    let params = generate_params(graph, pass, mode);
    let offsets = generate_offsets(graph, pass, mode);
    let body = generate_body(graph, pass, mode, &mut decls);

    let root = *pass.order().last().expect("empty pass order");
    let root_ty = graph[root].dtype.ir();
    let root_id = pass.id(root);

    let mut text = String::new();
    for decl in &decls {
        text.push_str(decl);
    }
    let mut full_params = vec![format!("{root_ty}* %out")];
    if mode == AddressMode::General {
        for dim in 0..crate::shape::MAX_DIMS {
            full_params.push(format!("i32 %tdim{dim}"));
        }
    }
    full_params.extend(params);
    text.push_str(&format!("define void {name}({}) {{\n", full_params.join(", ")));
    text.push_str("%idx = call i32 __global_index()\n");
    text.push_str(&offsets);
    text.push_str(&body);
    text.push_str(&format!(
        "%optr = getelementptr {root_ty}, {root_ty}* %out, i32 %idx\n"
    ));
    text.push_str(&format!("store {root_ty} %val{root_id}, {root_ty}* %optr\n"));
    text.push_str("ret void\n}\n");

    KernelSource { name, text, mode }
}
