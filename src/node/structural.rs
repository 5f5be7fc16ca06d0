//! Structural node kinds: sources and combinators built directly on
//! [`NodeBehavior`], plus the chain/combine sugar that wires them together
//! under the three replacement policies.
//!
//! `Constant` is grounded directly on `nodes/constant.rs`'s `ConstantNode`
//! (the simplest possible source, a fixed `f32` returned every tick) ported
//! to `f64` samples and the `&self` dispatch this crate's nodes use.
//! `Chain` and `BinaryOp` have no single teacher file (`phonon` wires nodes
//! together at the graph level, not as combinator node kinds) and are
//! grounded instead on the fan-in contract in `mod.rs`: both read their
//! children through [`NodeHandle::read_as_modulator`] so a shared upstream
//! is only evaluated once per cycle no matter how many combinators read it.

use crate::context::RunContext;
use crate::node::{NodeBehavior, NodeHandle, Sample};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A fixed value, unaffected by its input. Stateless: `save_state` and
/// `restore_state` use the trait defaults.
pub struct Constant {
    value: AtomicU64,
}

impl Constant {
    pub fn new(value: Sample) -> Self {
        Self {
            value: AtomicU64::new(value.to_bits()),
        }
    }

    pub fn set(&self, value: Sample) {
        self.value.store(value.to_bits(), Ordering::Release);
    }

    pub fn get(&self) -> Sample {
        f64::from_bits(self.value.load(Ordering::Acquire))
    }
}

impl NodeBehavior for Constant {
    fn process_sample(&self, _input: Sample, _ctx: &RunContext) -> Sample {
        self.get()
    }

    fn kind_name(&self) -> &str {
        "Constant"
    }
}

/// Replacement policy applied when chaining or combining nodes that may
/// already participate in another structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPolicy {
    /// The new combinator takes the upstream's place wherever it was
    /// referenced; the upstream itself is left untouched as a node but
    /// callers should treat the combinator as its replacement.
    ReplaceTarget,
    /// Both the original node and the new combinator remain independently
    /// addressable; nothing is replaced.
    PreserveBoth,
    /// Only the chain link itself is created; no bookkeeping beyond holding
    /// the two `NodeHandle`s is performed.
    OnlyChain,
}

/// `upstream >> downstream`: feeds `upstream`'s fan-in-deduplicated output
/// into `downstream` as its `input`.
pub struct Chain {
    upstream: NodeHandle,
    downstream: NodeHandle,
    policy: LinkPolicy,
}

impl Chain {
    pub fn new(upstream: NodeHandle, downstream: NodeHandle, policy: LinkPolicy) -> Self {
        Self {
            upstream,
            downstream,
            policy,
        }
    }

    pub fn policy(&self) -> LinkPolicy {
        self.policy
    }

    pub fn upstream(&self) -> &NodeHandle {
        &self.upstream
    }

    pub fn downstream(&self) -> &NodeHandle {
        &self.downstream
    }
}

impl NodeBehavior for Chain {
    fn process_sample(&self, input: Sample, ctx: &RunContext) -> Sample {
        let fed = self.upstream.read_as_modulator(input, ctx);
        self.downstream.read_as_modulator(fed, ctx)
    }

    fn save_state(&self) {
        let _ = self.upstream.save_state();
        let _ = self.downstream.save_state();
    }

    fn restore_state(&self) {
        self.upstream.restore_state();
        self.downstream.restore_state();
    }

    fn kind_name(&self) -> &str {
        "Chain"
    }
}

/// A binary combining function over two independently-read children, e.g.
/// `a + b` or `a * b`. Built with [`LinkPolicy::OnlyChain`] semantics always
/// — a combinator never claims to replace either operand.
pub struct BinaryOp {
    left: NodeHandle,
    right: NodeHandle,
    op: Box<dyn Fn(Sample, Sample) -> Sample + Send + Sync>,
    name: Mutex<&'static str>,
}

impl BinaryOp {
    pub fn new(
        left: NodeHandle,
        right: NodeHandle,
        name: &'static str,
        op: impl Fn(Sample, Sample) -> Sample + Send + Sync + 'static,
    ) -> Self {
        Self {
            left,
            right,
            op: Box::new(op),
            name: Mutex::new(name),
        }
    }

    pub fn add(left: NodeHandle, right: NodeHandle) -> Self {
        Self::new(left, right, "BinaryOp(+)", |a, b| a + b)
    }

    pub fn mul(left: NodeHandle, right: NodeHandle) -> Self {
        Self::new(left, right, "BinaryOp(*)", |a, b| a * b)
    }

    pub fn scale(node: NodeHandle, constant: NodeHandle) -> Self {
        Self::new(node, constant, "BinaryOp(scale)", |a, b| a * b)
    }
}

impl NodeBehavior for BinaryOp {
    fn process_sample(&self, input: Sample, ctx: &RunContext) -> Sample {
        // Both children see the same per-cycle `input`; this matches
        // `Chain`'s policy of passing the incoming sample down rather than
        // silently dropping it for the right-hand operand.
        let a = self.left.read_as_modulator(input, ctx);
        let b = self.right.read_as_modulator(input, ctx);
        (self.op)(a, b)
    }

    fn save_state(&self) {
        let _ = self.left.save_state();
        let _ = self.right.save_state();
    }

    fn restore_state(&self) {
        self.left.restore_state();
        self.right.restore_state();
    }

    fn kind_name(&self) -> &str {
        *self.name.lock().unwrap()
    }
}

/// `>>` sugar: `a >> b` builds a [`Chain`] node under
/// [`LinkPolicy::ReplaceTarget`], matching the common case of inserting a
/// processing stage after an existing source.
impl std::ops::Shr for NodeHandle {
    type Output = NodeHandle;
    fn shr(self, rhs: NodeHandle) -> NodeHandle {
        NodeHandle::new(
            format!("{} >> {}", self.name(), rhs.name()),
            Chain::new(self, rhs, LinkPolicy::ReplaceTarget),
        )
    }
}

impl std::ops::Add for NodeHandle {
    type Output = NodeHandle;
    fn add(self, rhs: NodeHandle) -> NodeHandle {
        let name = format!("{} + {}", self.name(), rhs.name());
        NodeHandle::new(name, BinaryOp::add(self, rhs))
    }
}

impl std::ops::Mul for NodeHandle {
    type Output = NodeHandle;
    fn mul(self, rhs: NodeHandle) -> NodeHandle {
        let name = format!("{} * {}", self.name(), rhs.name());
        NodeHandle::new(name, BinaryOp::mul(self, rhs))
    }
}
