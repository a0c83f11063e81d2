use crate::op::{BinaryOp, DType, ScalarValue, UnaryOp};
use crate::shape::{Shape, Strides};
use itertools::Itertools;
use petgraph::{stable_graph::NodeIndex, stable_graph::StableGraph, visit::EdgeRef, Direction};
use std::ops::{Deref, DerefMut};

/// Non-owning reference to a device allocation. The array layer owns the
/// memory; it must stay valid for the duration of one compile+launch.
pub type DevicePtr = u64;

/// The four concrete node kinds, as a closed variant so every compile pass can
/// match exhaustively.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    /// Leaf referencing an externally-owned device array.
    Buffer {
        shape: Shape,
        strides: Strides,
        ptr: DevicePtr,
    },
    /// Leaf embedding an immutable literal.
    Scalar { value: ScalarValue },
    /// One child, named single-argument device function.
    Unary { op: UnaryOp },
    /// Two children, named two-argument device function.
    Binary { op: BinaryOp },
}

#[derive(Clone, Debug, PartialEq)]
pub struct FusionNode {
    pub kind: NodeKind,
    /// Semantic element type of this node's result.
    pub dtype: DType,
    /// Longest path to a leaf, fixed at construction. Caps fusion depth.
    pub height: u32,
}

/// An expression DAG over elementwise operations.
///
/// Nodes live in a stable arena; sub-expressions shared by multiple parents
/// are shared handles, never copies. Data-flow edges run child -> parent and
/// a parent's operand order is its incoming-edge insertion order.
#[derive(Debug, Default)]
pub struct FusionGraph {
    pub graph: StableGraph<FusionNode, ()>,
}

impl FusionGraph {
    pub fn new() -> FusionGraph {
        FusionGraph::default()
    }

    /// Add a buffer leaf. `ptr` is borrowed from the array layer, not owned.
    pub fn buffer(
        &mut self,
        dtype: DType,
        shape: impl Into<Shape>,
        strides: Strides,
        ptr: DevicePtr,
    ) -> NodeIndex {
        self.graph.add_node(FusionNode {
            kind: NodeKind::Buffer {
                shape: shape.into(),
                strides,
                ptr,
            },
            dtype,
            height: 0,
        })
    }

    /// Add a buffer leaf with dense row-major strides.
    pub fn contiguous_buffer(
        &mut self,
        dtype: DType,
        shape: impl Into<Shape>,
        ptr: DevicePtr,
    ) -> NodeIndex {
        let shape = shape.into();
        self.buffer(dtype, shape, shape.row_major(), ptr)
    }

    pub fn scalar(&mut self, value: ScalarValue) -> NodeIndex {
        self.graph.add_node(FusionNode {
            kind: NodeKind::Scalar { value },
            dtype: value.dtype(),
            height: 0,
        })
    }

    pub fn unary(&mut self, op: UnaryOp, dtype: DType, src: NodeIndex) -> NodeIndex {
        let height = self.graph[src].height + 1;
        let node = self.graph.add_node(FusionNode {
            kind: NodeKind::Unary { op },
            dtype,
            height,
        });
        self.graph.add_edge(src, node, ());
        node
    }

    /// `lhs` and `rhs` may be the same handle (e.g. `a + a`); the parallel
    /// edges keep both operand slots.
    pub fn binary(
        &mut self,
        op: BinaryOp,
        dtype: DType,
        lhs: NodeIndex,
        rhs: NodeIndex,
    ) -> NodeIndex {
        let height = self.graph[lhs].height.max(self.graph[rhs].height) + 1;
        let node = self.graph.add_node(FusionNode {
            kind: NodeKind::Binary { op },
            dtype,
            height,
        });
        self.graph.add_edge(lhs, node, ());
        self.graph.add_edge(rhs, node, ());
        node
    }

    /// Operands of a node in slot order.
    pub fn children(&self, node: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .edges_directed(node, Direction::Incoming)
            .sorted_by_key(|e| e.id())
            .map(|e| e.source())
            .collect()
    }
}

impl Deref for FusionGraph {
    type Target = StableGraph<FusionNode, ()>;
    fn deref(&self) -> &Self::Target {
        &self.graph
    }
}

impl DerefMut for FusionGraph {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.graph
    }
}
