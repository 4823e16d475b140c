use log::debug;
use nalgebra::DVector;
use num_complex::Complex64;
use std::f64::consts::PI;

use crate::circuit::{Circuit, Element, ElementKind, GROUND};
use crate::error::{Result, SimError};
use crate::solver::{MatrixBuilder, MnaScalar, Representation, SystemMatrix};

/// Per-step equivalent of a dynamic element.
///
/// For a capacitor `coefficient` is the companion conductance and `source` the
/// equivalent current injected into the positive node. For an inductor
/// `coefficient` is the companion resistance and `source` the equivalent
/// voltage, stamped into the branch row as `-source`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Companion {
    pub coefficient: f64,
    pub source: f64,
}

/// Replaces the value of one independent source (DC sweep).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceOverride {
    /// Index into `Circuit::elements`
    pub element: usize,
    pub value: f64,
}

/// What the real-valued stamps are evaluated against.
#[derive(Debug, Clone, Copy, Default)]
pub struct StampContext<'a> {
    /// Evaluate source waveforms at this time; `None` uses DC values
    pub time: Option<f64>,
    /// One entry per circuit element; `None` stamps capacitors open and inductors short
    pub companions: Option<&'a [Option<Companion>]>,
    pub sweep: Option<SourceOverride>,
}

impl<'a> StampContext<'a> {
    /// Plain DC pass: capacitors open, inductors short, DC source values.
    pub fn dc() -> Self {
        StampContext::default()
    }

    /// DC pass with one source forced to `value`.
    pub fn with_sweep(element: usize, value: f64) -> Self {
        StampContext {
            sweep: Some(SourceOverride { element, value }),
            ..StampContext::default()
        }
    }

    /// DC pass with sources evaluated at time `t` (transient operating point).
    pub fn at_time(time: f64) -> Self {
        StampContext {
            time: Some(time),
            ..StampContext::default()
        }
    }

    /// Transient step at time `t` with companion models.
    pub fn transient(time: f64, companions: &'a [Option<Companion>]) -> Self {
        StampContext {
            time: Some(time),
            companions: Some(companions),
            sweep: None,
        }
    }

    fn source_value(&self, index: usize, element: &Element) -> f64 {
        match self.sweep {
            Some(o) if o.element == index => o.value,
            _ => element.source_value(self.time),
        }
    }

    fn companion(&self, index: usize) -> Option<Companion> {
        self.companions.and_then(|c| c.get(index).copied().flatten())
    }
}

/// Writes element stamps. Without a matrix builder only the RHS is touched.
struct Stamper<'s, T: MnaScalar> {
    matrix: Option<&'s mut MatrixBuilder<T>>,
    rhs: &'s mut DVector<T>,
    num_nodes: usize,
}

impl<'s, T: MnaScalar> Stamper<'s, T> {
    fn row(node: usize) -> Option<usize> {
        if node == GROUND {
            None
        } else {
            Some(node - 1)
        }
    }

    fn branch(&self, offset: usize) -> usize {
        self.num_nodes + offset
    }

    fn add(&mut self, row: Option<usize>, col: Option<usize>, value: T) {
        if let (Some(matrix), Some(r), Some(c)) = (self.matrix.as_mut(), row, col) {
            matrix.add(r, c, value);
        }
    }

    /// Two-terminal admittance between `pos` and `neg`
    fn admittance(&mut self, pos: usize, neg: usize, y: T) {
        let (p, n) = (Self::row(pos), Self::row(neg));
        self.add(p, p, y);
        self.add(n, n, y);
        self.add(p, n, -y);
        self.add(n, p, -y);
    }

    /// `±1` coupling between the terminal KCL rows and the branch row `br`
    fn incidence(&mut self, pos: usize, neg: usize, br: usize) {
        let (p, n) = (Self::row(pos), Self::row(neg));
        self.add(p, Some(br), T::one());
        self.add(Some(br), p, T::one());
        self.add(n, Some(br), -T::one());
        self.add(Some(br), n, -T::one());
    }

    /// Current `i` flowing out of `pos`, through the element, into `neg`
    fn current(&mut self, pos: usize, neg: usize, i: T) {
        if let Some(p) = Self::row(pos) {
            self.rhs[p] -= i;
        }
        if let Some(n) = Self::row(neg) {
            self.rhs[n] += i;
        }
    }
}

fn branch_of(element: &Element, branch: Option<usize>) -> Result<usize> {
    branch.ok_or_else(|| SimError::invalid_element(&element.name, "missing branch-current unknown"))
}

/// Real-valued stamp rule, one arm per element kind.
fn stamp_real(
    s: &mut Stamper<'_, f64>,
    index: usize,
    element: &Element,
    branch: Option<usize>,
    ctx: &StampContext<'_>,
) -> Result<()> {
    let (pos, neg) = (element.pos, element.neg);
    match &element.kind {
        ElementKind::Resistor => s.admittance(pos, neg, 1.0 / element.value),
        ElementKind::CurrentSource(_) => s.current(pos, neg, ctx.source_value(index, element)),
        ElementKind::VoltageSource(_) => {
            let br = s.branch(branch_of(element, branch)?);
            s.incidence(pos, neg, br);
            s.rhs[br] += ctx.source_value(index, element);
        }
        ElementKind::Capacitor => {
            if let Some(c) = ctx.companion(index) {
                s.admittance(pos, neg, c.coefficient);
                s.current(pos, neg, -c.source);
            }
        }
        ElementKind::Inductor => {
            let br = s.branch(branch_of(element, branch)?);
            s.incidence(pos, neg, br);
            if let Some(c) = ctx.companion(index) {
                s.add(Some(br), Some(br), -c.coefficient);
                s.rhs[br] -= c.source;
            }
        }
    }
    Ok(())
}

/// Small-signal stamp rule at angular frequency `omega`.
fn stamp_ac(
    s: &mut Stamper<'_, Complex64>,
    element: &Element,
    branch: Option<usize>,
    omega: f64,
) -> Result<()> {
    let (pos, neg) = (element.pos, element.neg);
    let phasor = element
        .kind
        .source_spec()
        .and_then(|spec| spec.ac)
        .map(|ac| ac.to_complex())
        .unwrap_or_default();

    match &element.kind {
        ElementKind::Resistor => s.admittance(pos, neg, Complex64::new(1.0 / element.value, 0.0)),
        ElementKind::Capacitor => s.admittance(pos, neg, Complex64::new(0.0, omega * element.value)),
        ElementKind::Inductor => {
            let br = s.branch(branch_of(element, branch)?);
            s.incidence(pos, neg, br);
            s.add(Some(br), Some(br), Complex64::new(0.0, -omega * element.value));
        }
        ElementKind::CurrentSource(_) => s.current(pos, neg, phasor),
        ElementKind::VoltageSource(_) => {
            let br = s.branch(branch_of(element, branch)?);
            s.incidence(pos, neg, br);
            s.rhs[br] += phasor;
        }
    }
    Ok(())
}

/// MNA system `A x = b` over `n` node voltages followed by `m` branch currents.
#[derive(Debug, Clone)]
pub struct MnaSystem<T: MnaScalar> {
    pub matrix: SystemMatrix<T>,
    pub rhs: DVector<T>,
    /// Non-ground node count (`n`)
    pub num_nodes: usize,
    /// Group-2 element count (`m`)
    pub num_branches: usize,
    /// Branch offset per element, `None` for group-1 elements
    branches: Vec<Option<usize>>,
}

impl<T: MnaScalar> MnaSystem<T> {
    pub fn size(&self) -> usize {
        self.num_nodes + self.num_branches
    }

    /// Non-zero count of the assembled matrix
    pub fn nnz(&self) -> usize {
        self.matrix.nnz()
    }

    /// Row of the branch current of element `index`, if it has one.
    pub fn branch_row(&self, index: usize) -> Option<usize> {
        self.branches
            .get(index)
            .copied()
            .flatten()
            .map(|b| self.num_nodes + b)
    }

    /// Voltage of `node` in solution `x` (ground reads zero).
    pub fn node_voltage(&self, x: &DVector<T>, node: usize) -> T {
        if node == GROUND {
            T::zero()
        } else {
            x[node - 1]
        }
    }

    /// `v(pos) - v(neg)` for an element
    pub fn voltage_across(&self, x: &DVector<T>, element: &Element) -> T {
        self.node_voltage(x, element.pos) - self.node_voltage(x, element.neg)
    }

    fn check_shape(&self) -> Result<()> {
        let size = self.size();
        if self.matrix.dim() != size || !self.matrix.is_square() {
            return Err(SimError::Shape {
                context: "system matrix",
                expected: size,
                found: self.matrix.dim(),
            });
        }
        if self.rhs.len() != size {
            return Err(SimError::Shape {
                context: "right-hand side",
                expected: size,
                found: self.rhs.len(),
            });
        }
        Ok(())
    }

    fn build(
        circuit: &Circuit,
        representation: Representation,
        mut stamp: impl FnMut(&mut Stamper<'_, T>, usize, &Element, Option<usize>) -> Result<()>,
    ) -> Result<Self> {
        circuit.validate()?;
        let num_nodes = circuit.node_count();
        let num_branches = circuit.group2_count();
        let size = num_nodes + num_branches;
        let branches = circuit.branch_indices();

        let mut builder = MatrixBuilder::new(size, representation);
        let mut rhs = DVector::zeros(size);
        {
            let mut stamper = Stamper {
                matrix: Some(&mut builder),
                rhs: &mut rhs,
                num_nodes,
            };
            for (index, element) in circuit.elements.iter().enumerate() {
                stamp(&mut stamper, index, element, branches[index])?;
            }
        }

        let system = MnaSystem {
            matrix: builder.finish(),
            rhs,
            num_nodes,
            num_branches,
            branches,
        };
        system.check_shape()?;
        debug!(
            "Assembled MNA system: {} nodes + {} branches, nnz = {}",
            num_nodes,
            num_branches,
            system.nnz()
        );
        Ok(system)
    }
}

impl MnaSystem<f64> {
    /// Full rebuild of `(A, b)`.
    pub fn assemble(
        circuit: &Circuit,
        representation: Representation,
        ctx: &StampContext<'_>,
    ) -> Result<Self> {
        check_companions(circuit, ctx)?;
        Self::build(circuit, representation, |s, index, element, branch| {
            stamp_real(s, index, element, branch, ctx)
        })
    }

    /// Rebuild `b` only. `A` is left untouched, so a factorisation of it
    /// stays valid as long as `ctx` carries the same companion coefficients
    /// that were used for the last [`MnaSystem::assemble`].
    pub fn restamp_rhs(&mut self, circuit: &Circuit, ctx: &StampContext<'_>) -> Result<()> {
        if circuit.system_size() != self.size() {
            return Err(SimError::Shape {
                context: "circuit used for RHS restamp",
                expected: self.size(),
                found: circuit.system_size(),
            });
        }
        check_companions(circuit, ctx)?;

        self.rhs.fill(0.0);
        let mut stamper = Stamper {
            matrix: None,
            rhs: &mut self.rhs,
            num_nodes: self.num_nodes,
        };
        for (index, element) in circuit.elements.iter().enumerate() {
            stamp_real(&mut stamper, index, element, self.branches[index], ctx)?;
        }
        Ok(())
    }
}

impl MnaSystem<Complex64> {
    /// Complex small-signal system at `omega` rad/s.
    pub fn assemble_ac(circuit: &Circuit, representation: Representation, omega: f64) -> Result<Self> {
        if !omega.is_finite() || omega < 0.0 {
            return Err(SimError::InvalidFrequency(format!(
                "angular frequency {} is not a finite non-negative value",
                omega
            )));
        }
        Self::build(circuit, representation, |s, _, element, branch| {
            stamp_ac(s, element, branch, omega)
        })
    }

    /// Convenience wrapper taking a frequency in Hz.
    pub fn assemble_at_frequency(
        circuit: &Circuit,
        representation: Representation,
        frequency: f64,
    ) -> Result<Self> {
        Self::assemble_ac(circuit, representation, 2.0 * PI * frequency)
    }
}

fn check_companions(circuit: &Circuit, ctx: &StampContext<'_>) -> Result<()> {
    if let Some(companions) = ctx.companions {
        if companions.len() != circuit.elements.len() {
            return Err(SimError::Shape {
                context: "companion table",
                expected: circuit.elements.len(),
                found: companions.len(),
            });
        }
    }
    if let Some(o) = ctx.sweep {
        let is_source = circuit
            .elements
            .get(o.element)
            .map(|e| e.kind.is_source())
            .unwrap_or(false);
        if !is_source {
            return Err(SimError::UnknownSource(format!("element #{}", o.element)));
        }
    }
    Ok(())
}
