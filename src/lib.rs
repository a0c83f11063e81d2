pub mod cache;
pub mod codegen;
pub mod driver;
pub mod graph;
pub mod op;
pub mod shape;


pub mod prelude {
    pub use crate::cache::{CacheKey, KernelCache};
    pub use crate::codegen::{
        assign_ids, bind_args, collect_stats, compute_linearity, generate_body, generate_kernel,
        generate_offsets, generate_params, kernel_name, select_address_mode, AddressMode,
        FusionStats, KernelArg, KernelSource, PassState,
    };
    pub use crate::driver::{
        Driver, FlatPlanner, FusionBudget, FusionError, JitBackend, LaunchGeometry, LaunchPlanner,
    };
    pub use crate::graph::{DevicePtr, FusionGraph, FusionNode, NodeKind};
    pub use crate::op::{BinaryOp, DType, ScalarValue, UnaryOp};
    pub use crate::shape::{Shape, Strides, MAX_DIMS};
    pub use anyhow;
    pub use half::{bf16, f16};
    pub use petgraph;
    pub use petgraph::stable_graph::NodeIndex;
    pub use rustc_hash::{FxHashMap, FxHashSet};
    pub use tracing;
}
