//! Compile-and-launch orchestration over one DAG root.
//!
//! The state machine is LINEARITY -> ASSIGN_IDS -> NAME -> CACHE_LOOKUP ->
//! {hit: BIND | miss: GENERATE -> DEVICE_COMPILE -> CACHE_INSERT -> BIND} ->
//! LAUNCH -> RESET. Pass ordering is enforced by construction: the pass state
//! is created and consumed inside one `evaluate` call, so no generation step
//! can observe a node before the steps it depends on have run.

use crate::cache::{CacheKey, KernelCache};
use crate::codegen::{
    assign_ids, bind_args, collect_stats, generate_kernel, kernel_name, select_address_mode,
    AddressMode, FusionStats, KernelArg,
};
use crate::graph::{DevicePtr, FusionGraph};
use crate::shape::Shape;
use petgraph::stable_graph::NodeIndex;
use tracing::debug;

/// Grid/block dimensions produced by the launch-geometry calculator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchGeometry {
    pub grid: (u32, u32, u32),
    pub block: (u32, u32, u32),
}

/// External launch-geometry calculator: output shape in, grid/block out.
pub trait LaunchPlanner {
    fn geometry(&self, shape: &Shape) -> LaunchGeometry;
}

/// One thread per output element, flat 1D launch.
#[derive(Clone, Copy, Debug)]
pub struct FlatPlanner {
    pub block_size: u32,
}

impl Default for FlatPlanner {
    fn default() -> Self {
        Self { block_size: 256 }
    }
}

impl LaunchPlanner for FlatPlanner {
    fn geometry(&self, shape: &Shape) -> LaunchGeometry {
        let grid = shape.elements().div_ceil(self.block_size as u64) as u32;
        LaunchGeometry {
            grid: (grid.max(1), 1, 1),
            block: (self.block_size, 1, 1),
        }
    }
}

/// The device driver / JIT backend consumed by the driver.
pub trait JitBackend {
    type Kernel;

    /// Turn generated IR text into a loadable kernel object, or return the
    /// backend's diagnostic verbatim.
    fn compile(&self, name: &str, source: &str) -> Result<Self::Kernel, String>;

    fn launch(
        &self,
        kernel: &Self::Kernel,
        geometry: &LaunchGeometry,
        args: &[KernelArg],
    ) -> anyhow::Result<()>;
}

/// Policy limits on what a single fused kernel may contain.
#[derive(Clone, Copy, Debug)]
pub struct FusionBudget {
    pub max_nodes: usize,
    pub max_buffers: usize,
    pub max_bytes: u64,
    pub max_height: u32,
}

impl Default for FusionBudget {
    fn default() -> Self {
        Self {
            // Ids render as two hex digits in kernel names.
            max_nodes: 255,
            max_buffers: 64,
            max_bytes: 1 << 34,
            max_height: 128,
        }
    }
}

impl FusionBudget {
    fn allows(&self, stats: &FusionStats) -> bool {
        stats.nodes <= self.max_nodes
            && stats.buffers <= self.max_buffers
            && stats.bytes <= self.max_bytes
            && stats.height <= self.max_height
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    #[error("buffer shape {found} cannot broadcast to target shape {target}")]
    ShapeMismatch { found: Shape, target: Shape },
    #[error("shape {shape} exceeds 32-bit element addressing (max flat element index {max_index})")]
    AddressOverflow { shape: Shape, max_index: u64 },
    #[error("fusion too large: {stats:?} exceeds {budget:?}; split the DAG and compile the halves separately")]
    BudgetExceeded {
        stats: FusionStats,
        budget: FusionBudget,
    },
    #[error("device JIT rejected kernel {name}: {diagnostic}\n--- generated IR ---\n{source_text}")]
    DeviceCompile {
        name: String,
        diagnostic: String,
        source_text: String,
    },
    #[error(transparent)]
    Launch(#[from] anyhow::Error),
}

/// Orchestrates compile-and-launch passes over DAG roots, holding the
/// kernel-object cache and the fusion budget.
///
/// A single compilation is single-threaded over its DAG; independent DAGs may
/// be evaluated concurrently through a shared driver as long as they share no
/// node arena, which is why `evaluate` takes `&self` and the cache is the only
/// shared mutable state.
pub struct Driver<B: JitBackend> {
    backend: B,
    planner: Box<dyn LaunchPlanner + Send + Sync>,
    cache: KernelCache<B::Kernel>,
    budget: FusionBudget,
}

impl<B: JitBackend> Driver<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            planner: Box::new(FlatPlanner::default()),
            cache: KernelCache::default(),
            budget: FusionBudget::default(),
        }
    }

    pub fn with_budget(mut self, budget: FusionBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_planner(mut self, planner: impl LaunchPlanner + Send + Sync + 'static) -> Self {
        self.planner = Box::new(planner);
        self
    }

    pub fn cache(&self) -> &KernelCache<B::Kernel> {
        &self.cache
    }

    /// Fusion statistics for `root`, for callers deciding where to split a
    /// DAG that exceeds the budget.
    pub fn stats(&self, graph: &FusionGraph, root: NodeIndex) -> FusionStats {
        collect_stats(graph, root)
    }

    /// Compile (or fetch from cache) and launch the fused kernel for `root`,
    /// writing the result over `target` elements at `out`.
    #[tracing::instrument(skip_all, fields(shape = %target))]
    pub fn evaluate(
        &self,
        graph: &FusionGraph,
        root: NodeIndex,
        target: Shape,
        out: DevicePtr,
    ) -> Result<(), FusionError> {
        // LINEARITY: fails on irreconcilable shapes before any device work.
        let mode = select_address_mode(graph, root, &target)?;
        let stats = collect_stats(graph, root);
        if !self.budget.allows(&stats) {
            return Err(FusionError::BudgetExceeded {
                stats,
                budget: self.budget,
            });
        }

        // ASSIGN_IDS, NAME
        let pass = assign_ids(graph, root);
        let name = kernel_name(graph, &pass);
        debug!(name = %name, ?mode, nodes = stats.nodes, "compiling fusion");

        // CACHE_LOOKUP; on a miss, generate and device-compile outside any lock
        let key: CacheKey = (name, mode);
        let kernel = match self.cache.get(&key) {
            Some(kernel) => {
                debug!("kernel cache hit");
                kernel
            }
            None => {
                let source = generate_kernel(graph, &pass, mode);
                let object = self
                    .backend
                    .compile(&source.name, &source.text)
                    .map_err(|diagnostic| FusionError::DeviceCompile {
                        name: source.name.clone(),
                        diagnostic,
                        source_text: source.text,
                    })?;
                // A racing insert for the same key keeps the resident object.
                self.cache.insert_or_keep(key, object)
            }
        };

        // BIND: output pointer first, the target extents in general mode,
        // then leaf args in declared order.
        let mut args = vec![KernelArg::Ptr(out)];
        if mode == AddressMode::General {
            args.extend(target.0.iter().map(|d| KernelArg::Int(*d as i32)));
        }
        args.extend(bind_args(graph, &pass, mode));

        // LAUNCH
        let geometry = self.planner.geometry(&target);
        self.backend.launch(&kernel, &geometry, &args)?;

        // RESET: dropping the pass state clears all per-pass bookkeeping.
        drop(pass);
        Ok(())
    }

    pub fn into_backend(self) -> B {
        self.backend
    }
}
