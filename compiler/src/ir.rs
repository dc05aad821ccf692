// ir.rs: Stencil IR data model
//
// A `Function` owns three arenas: external buffers, temporaries and apply
// regions. Operators reference each other only through integer handles
// (`id.rs`), so the producer/consumer graph carries no shared ownership.
// Deleted regions and temporaries leave `None` tombstones; handles stay valid
// identifiers for diagnostics but resolve to nothing.
//
// Preconditions: none (construction API; invariants are checked by `verify`).
// Postconditions: handles returned by `add_*` are unique within the function.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::bbox::{BoundingBox, Offset, Shape};
use crate::error::PassError;
use crate::id::{ApplyId, BufferId, TempId, ValueId};

// ── Scalars ─────────────────────────────────────────────────────────────────

/// Element type of a temporary or buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElemType {
    F32,
    F64,
}

impl ElemType {
    pub fn name(self) -> &'static str {
        match self {
            ElemType::F32 => "f32",
            ElemType::F64 => "f64",
        }
    }

    pub fn from_name(name: &str) -> Option<ElemType> {
        match name {
            "f32" => Some(ElemType::F32),
            "f64" => Some(ElemType::F64),
            _ => None,
        }
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Abs,
    Sqrt,
    Exp,
}

impl UnaryOp {
    pub const ALL: [UnaryOp; 4] = [UnaryOp::Neg, UnaryOp::Abs, UnaryOp::Sqrt, UnaryOp::Exp];

    pub fn mnemonic(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Abs => "abs",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Exp => "exp",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<UnaryOp> {
        Self::ALL.into_iter().find(|op| op.mnemonic() == s)
    }

    pub fn apply(self, x: f64) -> f64 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Abs => x.abs(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Exp => x.exp(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 6] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Min,
        BinaryOp::Max,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<BinaryOp> {
        Self::ALL.into_iter().find(|op| op.mnemonic() == s)
    }

    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Min => a.min(b),
            BinaryOp::Max => a.max(b),
        }
    }
}

// ── Apply bodies ────────────────────────────────────────────────────────────

/// Operand of an apply region: a temporary or an external buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operand {
    Temp(TempId),
    Buffer(BufferId),
}

/// One op of an apply body. Each op defines the value `ValueId(position)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BodyOp {
    /// Read operand slot `operand` at `offset` from the current point.
    Access { operand: usize, offset: Offset },
    /// The current coordinate along `dim`, displaced by `offset[dim]`.
    Index { dim: usize, offset: Offset },
    Constant(f64),
    Unary {
        op: UnaryOp,
        arg: ValueId,
    },
    Binary {
        op: BinaryOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Opaque scalar function. Impure calls are observable side effects.
    Call {
        callee: String,
        args: Vec<ValueId>,
        pure: bool,
    },
}

impl BodyOp {
    /// Values this op reads.
    pub fn args(&self) -> Vec<ValueId> {
        match self {
            BodyOp::Access { .. } | BodyOp::Index { .. } | BodyOp::Constant(_) => Vec::new(),
            BodyOp::Unary { arg, .. } => vec![*arg],
            BodyOp::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            BodyOp::Call { args, .. } => args.clone(),
        }
    }

    /// Copy with every value argument renamed through `f`.
    pub fn map_args(&self, f: impl Fn(ValueId) -> ValueId) -> BodyOp {
        match self {
            BodyOp::Unary { op, arg } => BodyOp::Unary { op: *op, arg: f(*arg) },
            BodyOp::Binary { op, lhs, rhs } => BodyOp::Binary {
                op: *op,
                lhs: f(*lhs),
                rhs: f(*rhs),
            },
            BodyOp::Call { callee, args, pure } => BodyOp::Call {
                callee: callee.clone(),
                args: args.iter().map(|a| f(*a)).collect(),
                pure: *pure,
            },
            other => other.clone(),
        }
    }

    /// Copy with spatial offsets (accesses and index ops) displaced by `delta`.
    pub fn shifted(&self, delta: &Offset) -> BodyOp {
        match self {
            BodyOp::Access { operand, offset } => BodyOp::Access {
                operand: *operand,
                offset: offset.compose(delta),
            },
            BodyOp::Index { dim, offset } => BodyOp::Index {
                dim: *dim,
                offset: offset.compose(delta),
            },
            other => other.clone(),
        }
    }

    pub fn has_side_effects(&self) -> bool {
        matches!(self, BodyOp::Call { pure: false, .. })
    }
}

/// Unroll annotation of a return: `factor` replicas along `axis`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnrollAttr {
    pub axis: usize,
    pub factor: u32,
}

/// Body terminator. With an unroll attribute, `values` holds `factor` values
/// per result, grouped by result: `values[result * factor + replica]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnOp {
    pub values: Vec<ValueId>,
    pub unroll: Option<UnrollAttr>,
}

impl ReturnOp {
    pub fn factor(&self) -> u32 {
        self.unroll.map_or(1, |u| u.factor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub ops: Vec<BodyOp>,
    pub ret: ReturnOp,
}

impl Body {
    /// All accesses as (defined value, operand slot, offset).
    pub fn accesses(&self) -> impl Iterator<Item = (ValueId, usize, &Offset)> + '_ {
        self.ops.iter().enumerate().filter_map(|(i, op)| match op {
            BodyOp::Access { operand, offset } => Some((ValueId(i as u32), *operand, offset)),
            _ => None,
        })
    }

    pub fn has_side_effects(&self) -> bool {
        self.ops.iter().any(BodyOp::has_side_effects)
    }

    pub fn reads_slot(&self, slot: usize) -> bool {
        self.accesses().any(|(_, s, _)| s == slot)
    }
}

/// Incremental construction of a `Body`.
#[derive(Debug, Default)]
pub struct BodyBuilder {
    ops: Vec<BodyOp>,
}

impl BodyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: BodyOp) -> ValueId {
        let id = ValueId(self.ops.len() as u32);
        self.ops.push(op);
        id
    }

    pub fn access(&mut self, operand: usize, offset: &[i64]) -> ValueId {
        self.push(BodyOp::Access {
            operand,
            offset: Offset(offset.to_vec()),
        })
    }

    pub fn index(&mut self, dim: usize, offset: &[i64]) -> ValueId {
        self.push(BodyOp::Index {
            dim,
            offset: Offset(offset.to_vec()),
        })
    }

    pub fn constant(&mut self, value: f64) -> ValueId {
        self.push(BodyOp::Constant(value))
    }

    pub fn unary(&mut self, op: UnaryOp, arg: ValueId) -> ValueId {
        self.push(BodyOp::Unary { op, arg })
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.push(BodyOp::Binary { op, lhs, rhs })
    }

    pub fn call(&mut self, callee: &str, args: &[ValueId], pure: bool) -> ValueId {
        self.push(BodyOp::Call {
            callee: callee.to_string(),
            args: args.to_vec(),
            pure,
        })
    }

    pub fn finish(self, values: &[ValueId]) -> Body {
        Body {
            ops: self.ops,
            ret: ReturnOp {
                values: values.to_vec(),
                unroll: None,
            },
        }
    }
}

// ── Operators ───────────────────────────────────────────────────────────────

/// `stencil.apply`: computes its result temporaries pointwise from offset
/// reads of its operands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRegion {
    pub name: String,
    pub operands: Vec<Operand>,
    pub body: Body,
    /// Non-unrolled copy of the body for the trailing `extent % factor` points.
    pub epilogue: Option<Body>,
    pub results: Vec<TempId>,
    /// Iteration domain computed by shape inference.
    pub shape: Shape,
}

/// How an apply region walks its computed domain.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationPlan {
    /// Base points of the main body. For an unrolled region this box is
    /// walked with stride `step` along `axis`.
    pub main: Option<BoundingBox>,
    pub axis: usize,
    pub step: i64,
    /// Points covered by the epilogue body.
    pub epilogue: Option<BoundingBox>,
}

impl ApplyRegion {
    pub fn unroll(&self) -> Option<UnrollAttr> {
        self.body.ret.unroll
    }

    pub fn has_side_effects(&self) -> bool {
        self.body.has_side_effects()
            || self.epilogue.as_ref().is_some_and(Body::has_side_effects)
    }

    pub fn reads_slot(&self, slot: usize) -> bool {
        self.body.reads_slot(slot) || self.epilogue.as_ref().is_some_and(|b| b.reads_slot(slot))
    }

    /// The domain the region actually computes when `required` is demanded.
    /// An unrolled region without an epilogue rounds its extent along the
    /// unroll axis up to a multiple of the factor.
    pub fn computed_domain(&self, required: &BoundingBox) -> BoundingBox {
        match (self.unroll(), &self.epilogue) {
            (Some(u), None) if !required.is_empty() && u.factor > 1 => {
                let k = i64::from(u.factor);
                let lb = required.lb[u.axis];
                let groups = (required.extent(u.axis) + k - 1) / k;
                required.with_axis(u.axis, lb, lb + groups * k)
            }
            _ => required.clone(),
        }
    }

    /// Split a computed domain into main-body base points and epilogue points.
    pub fn iteration_plan(&self, domain: &BoundingBox) -> IterationPlan {
        if domain.is_empty() {
            return IterationPlan {
                main: None,
                axis: 0,
                step: 1,
                epilogue: None,
            };
        }
        let Some(u) = self.unroll() else {
            return IterationPlan {
                main: Some(domain.clone()),
                axis: 0,
                step: 1,
                epilogue: None,
            };
        };
        let k = i64::from(u.factor.max(1));
        let a = u.axis;
        let lb = domain.lb[a];
        let ub = domain.ub[a];
        let extent = domain.extent(a);
        let groups = if self.epilogue.is_some() {
            extent / k
        } else {
            (extent + k - 1) / k
        };
        let main = (groups > 0).then(|| domain.with_axis(a, lb, lb + (groups - 1) * k + 1));
        let tail_start = lb + groups * k;
        let epilogue = (self.epilogue.is_some() && tail_start < ub)
            .then(|| domain.with_axis(a, tail_start, ub));
        IterationPlan {
            main,
            axis: a,
            step: k,
            epilogue,
        }
    }
}

/// Virtual buffer produced by exactly one apply region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Temporary {
    pub name: String,
    pub elem: ElemType,
    pub producer: ApplyId,
    pub result_index: usize,
    /// Minimal box its consumers require.
    pub shape: Shape,
}

/// Input buffer owned outside the stencil program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalBuffer {
    pub name: String,
    pub elem: ElemType,
    /// Declared domain; `None` means unbounded.
    pub domain: Option<BoundingBox>,
    /// Box read by the program, computed by shape inference.
    pub required: Shape,
}

/// A temporary flagged as a final output over a caller-declared domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMark {
    pub temp: TempId,
    pub domain: BoundingBox,
}

/// Digest of everything in a function except its shape annotations.
pub type ShapeStamp = [u8; 32];

// ── Function ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub rank: usize,
    pub buffers: Vec<ExternalBuffer>,
    temps: Vec<Option<Temporary>>,
    regions: Vec<Option<ApplyRegion>>,
    pub outputs: Vec<OutputMark>,
    #[serde(skip)]
    shape_stamp: Option<ShapeStamp>,
}

impl Function {
    pub fn new(name: impl Into<String>, rank: usize) -> Self {
        Function {
            name: name.into(),
            rank,
            buffers: Vec::new(),
            temps: Vec::new(),
            regions: Vec::new(),
            outputs: Vec::new(),
            shape_stamp: None,
        }
    }

    /// Assemble a function from fully built arenas (used by the resolver).
    pub fn from_parts(
        name: String,
        rank: usize,
        buffers: Vec<ExternalBuffer>,
        temps: Vec<Temporary>,
        regions: Vec<ApplyRegion>,
        outputs: Vec<OutputMark>,
    ) -> Self {
        Function {
            name,
            rank,
            buffers,
            temps: temps.into_iter().map(Some).collect(),
            regions: regions.into_iter().map(Some).collect(),
            outputs,
            shape_stamp: None,
        }
    }

    pub fn add_buffer(
        &mut self,
        name: impl Into<String>,
        elem: ElemType,
        domain: Option<BoundingBox>,
    ) -> BufferId {
        let id = BufferId(self.buffers.len() as u32);
        self.buffers.push(ExternalBuffer {
            name: name.into(),
            elem,
            domain,
            required: Shape::Unknown,
        });
        id
    }

    /// Add an apply region and allocate one temporary per `(name, type)`.
    pub fn add_apply(
        &mut self,
        name: impl Into<String>,
        operands: Vec<Operand>,
        body: Body,
        results: &[(&str, ElemType)],
    ) -> (ApplyId, Vec<TempId>) {
        let apply = ApplyId(self.regions.len() as u32);
        let mut temps = Vec::with_capacity(results.len());
        for (i, (temp_name, elem)) in results.iter().enumerate() {
            let id = TempId(self.temps.len() as u32);
            self.temps.push(Some(Temporary {
                name: temp_name.to_string(),
                elem: *elem,
                producer: apply,
                result_index: i,
                shape: Shape::Unknown,
            }));
            temps.push(id);
        }
        self.regions.push(Some(ApplyRegion {
            name: name.into(),
            operands,
            body,
            epilogue: None,
            results: temps.clone(),
            shape: Shape::Unknown,
        }));
        (apply, temps)
    }

    pub fn mark_output(&mut self, temp: TempId, domain: BoundingBox) {
        self.outputs.push(OutputMark { temp, domain });
    }

    // ── Arena access ──

    pub fn region(&self, id: ApplyId) -> Option<&ApplyRegion> {
        self.regions.get(id.index()).and_then(Option::as_ref)
    }

    pub fn region_mut(&mut self, id: ApplyId) -> Option<&mut ApplyRegion> {
        self.regions.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Live regions in program order.
    pub fn regions(&self) -> impl Iterator<Item = (ApplyId, &ApplyRegion)> + '_ {
        self.regions
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().map(|r| (ApplyId(i as u32), r)))
    }

    pub fn region_ids(&self) -> Vec<ApplyId> {
        self.regions().map(|(id, _)| id).collect()
    }

    pub fn region_count(&self) -> usize {
        self.regions.iter().filter(|r| r.is_some()).count()
    }

    pub fn temp(&self, id: TempId) -> Option<&Temporary> {
        self.temps.get(id.index()).and_then(Option::as_ref)
    }

    pub fn temp_mut(&mut self, id: TempId) -> Option<&mut Temporary> {
        self.temps.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Live temporaries in allocation order.
    pub fn temps(&self) -> impl Iterator<Item = (TempId, &Temporary)> + '_ {
        self.temps
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.as_ref().map(|t| (TempId(i as u32), t)))
    }

    pub fn buffer(&self, id: BufferId) -> Option<&ExternalBuffer> {
        self.buffers.get(id.index())
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> Option<&mut ExternalBuffer> {
        self.buffers.get_mut(id.index())
    }

    /// Delete a region together with its result temporaries.
    /// The caller guarantees nothing references them any more.
    pub fn remove_region(&mut self, id: ApplyId) -> Option<ApplyRegion> {
        let region = self.regions.get_mut(id.index())?.take()?;
        for t in &region.results {
            if let Some(slot) = self.temps.get_mut(t.index()) {
                *slot = None;
            }
        }
        Some(region)
    }

    pub fn find_region(&self, name: &str) -> Option<ApplyId> {
        self.regions().find(|(_, r)| r.name == name).map(|(id, _)| id)
    }

    pub fn find_temp(&self, name: &str) -> Option<TempId> {
        self.temps().find(|(_, t)| t.name == name).map(|(id, _)| id)
    }

    /// Textual reference of an operand: `%temp` or `@buffer`.
    pub fn operand_name(&self, operand: Operand) -> String {
        match operand {
            Operand::Temp(t) => match self.temp(t) {
                Some(temp) => format!("%{}", temp.name),
                None => format!("%<deleted {}>", t.0),
            },
            Operand::Buffer(b) => match self.buffer(b) {
                Some(buf) => format!("@{}", buf.name),
                None => format!("@<invalid {}>", b.0),
            },
        }
    }

    /// Current shape annotation of an operand's source.
    pub fn operand_shape(&self, operand: Operand) -> Option<&Shape> {
        match operand {
            Operand::Temp(t) => self.temp(t).map(|t| &t.shape),
            Operand::Buffer(b) => self.buffer(b).map(|b| &b.required),
        }
    }

    /// Reset every shape annotation to ⊥.
    pub fn clear_shapes(&mut self) {
        for t in self.temps.iter_mut().flatten() {
            t.shape = Shape::Unknown;
        }
        for r in self.regions.iter_mut().flatten() {
            r.shape = Shape::Unknown;
        }
        for b in &mut self.buffers {
            b.required = Shape::Unknown;
        }
        self.shape_stamp = None;
    }

    // ── Shape freshness ──

    /// SHA-256 over the function's structure: operand lists, bodies,
    /// result types, buffer domains and outputs. Shape annotations are
    /// excluded so recording them does not change the digest.
    pub fn structure_fingerprint(&self) -> ShapeStamp {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.rank.to_string().as_bytes());
        for b in &self.buffers {
            hasher.update(b"\0buffer\0");
            hasher.update(format!("{}\0{:?}\0{:?}", b.name, b.elem, b.domain).as_bytes());
        }
        for (i, t) in self.temps.iter().enumerate() {
            hasher.update(b"\0temp\0");
            match t {
                Some(t) => hasher.update(
                    format!("{}\0{}\0{:?}\0{:?}\0{}", i, t.name, t.elem, t.producer, t.result_index)
                        .as_bytes(),
                ),
                None => hasher.update(format!("{}\0-", i).as_bytes()),
            }
        }
        for (i, r) in self.regions.iter().enumerate() {
            hasher.update(b"\0apply\0");
            match r {
                Some(r) => hasher.update(
                    format!(
                        "{}\0{}\0{:?}\0{:?}\0{:?}\0{:?}",
                        i, r.name, r.operands, r.body, r.epilogue, r.results
                    )
                    .as_bytes(),
                ),
                None => hasher.update(format!("{}\0-", i).as_bytes()),
            }
        }
        for o in &self.outputs {
            hasher.update(b"\0output\0");
            hasher.update(format!("{:?}\0{:?}", o.temp, o.domain).as_bytes());
        }
        let digest = hasher.finalize();
        let mut stamp = [0u8; 32];
        stamp.copy_from_slice(&digest);
        stamp
    }

    /// Record that the current shape annotations match the current structure.
    pub(crate) fn record_shape_stamp(&mut self) {
        self.shape_stamp = Some(self.structure_fingerprint());
    }

    /// Mark shape data as stale after a structural rewrite.
    pub fn invalidate_shapes(&mut self) {
        self.shape_stamp = None;
    }

    pub fn shapes_fresh(&self) -> bool {
        self.shape_stamp
            .is_some_and(|stamp| stamp == self.structure_fingerprint())
    }

    /// Entry check for passes that consume shape data.
    pub fn ensure_fresh_shapes(&self, pass: &'static str) -> Result<(), PassError> {
        if self.shapes_fresh() {
            Ok(())
        } else {
            Err(PassError::StaleShapes { pass })
        }
    }
}

// ── Module ──────────────────────────────────────────────────────────────────

/// A compilation unit: independent functions, optimized one at a time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Module {
    pub functions: Vec<Function>,
}

impl Module {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Module> {
        serde_json::from_str(text)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}
