//! Windowed dense refinement over buffer poses.
//!
//! Each factor is a directed edge `source -> target` between two buffer
//! slots. One iteration uses the three-phase pattern:
//! 1. COLLECT: snapshot poses, depths and features from the buffer, then
//!    reproject every source cell and ask the oracle for a flow revision
//! 2. SOLVE: accumulate damped Gauss-Newton normal equations and solve them
//!    with a Cholesky factorization
//! 3. APPLY: retract the poses (and disparities) in range and write them
//!    back through `PoseBuffer::assign`

use std::ops::Range;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Vector2, Vector6};

use crate::buffer::{DEFAULT_DISPARITY, KeyframeRecord, PoseBuffer, SlotUpdate};
use crate::config::FactorGraphConfig;
use crate::error::{Result, TrackError};
use crate::geometry::SE3;
use crate::oracle::{ContextState, CoordGrid, CorrelationBackend, CorrelationOracle, InputState};

use super::projective::{Projection, project_cell};

/// Disparities are kept above this after a full update.
const MIN_DISPARITY: f64 = 1e-3;

/// Directed edge between two buffer slots.
#[derive(Debug, Clone)]
pub struct Factor {
    /// Slot whose cells are reprojected.
    pub source: usize,

    /// Slot the cells are reprojected into.
    pub target: usize,

    /// Update-operator hidden state, evolving across iterations.
    context: ContextState,

    /// Static update-operator input of the source slot.
    input: Arc<InputState>,

    /// Per-cell flow targets from the last iteration.
    targets: Vec<Vector2<f64>>,

    /// Per-cell confidence from the last iteration.
    weights: Vec<Vector2<f64>>,
}

impl Factor {
    /// Whether either endpoint lies in `[lo, hi)`.
    pub fn touches(&self, lo: usize, hi: usize) -> bool {
        let range = lo..hi;
        range.contains(&self.source) || range.contains(&self.target)
    }

    pub fn context(&self) -> &ContextState {
        &self.context
    }

    pub fn targets(&self) -> &[Vector2<f64>] {
        &self.targets
    }

    pub fn weights(&self) -> &[Vector2<f64>] {
        &self.weights
    }
}

/// Result of one refinement iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IterationOutcome {
    /// No factor touches the range; nothing was changed.
    NoFactors,
    /// Poses in range were updated.
    Applied {
        /// Factors that contributed.
        factors: usize,
        /// Norm of the solved increment.
        step_norm: f64,
        /// Weighted squared residual before the step.
        residual: f64,
    },
}

/// Summary of a fixed-budget refinement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefineReport {
    /// Iterations whose step was applied.
    pub applied: usize,

    /// Iterations skipped because the system was singular.
    pub singular: usize,

    /// Weighted squared residual seen by the last applied iteration.
    pub final_residual: Option<f64>,
}

/// Factor graph over a shared pose buffer.
pub struct FactorGraph<'a, B> {
    buffer: &'a PoseBuffer,
    oracle: &'a CorrelationOracle<B>,
    config: FactorGraphConfig,
    factors: Vec<Factor>,
}

impl<'a, B: CorrelationBackend> FactorGraph<'a, B> {
    pub fn new(
        buffer: &'a PoseBuffer,
        oracle: &'a CorrelationOracle<B>,
        config: FactorGraphConfig,
    ) -> Self {
        Self {
            buffer,
            oracle,
            config,
            factors: Vec::new(),
        }
    }

    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    /// Add one edge per `(sources[k], targets[k])` pair.
    ///
    /// All pairs are validated before any is added. Each edge starts from
    /// its source's stored context state.
    pub fn add_factors(&mut self, sources: &[usize], targets: &[usize]) -> Result<usize> {
        if sources.len() != targets.len() {
            return Err(TrackError::ShapeMismatch {
                what: "factor endpoints",
                expected: (sources.len(), 1),
                actual: (targets.len(), 1),
            });
        }

        let live = self.buffer.len();
        let mut added = Vec::with_capacity(sources.len());
        for (&source, &target) in sources.iter().zip(targets) {
            if source >= live || target >= live {
                return Err(TrackError::InvalidEdge {
                    from: source,
                    to: target,
                    live,
                });
            }
            let record = self
                .buffer
                .record(source)
                .ok_or(TrackError::InvalidEdge {
                    from: source,
                    to: target,
                    live,
                })?;
            let (context, input) = match (&record.context, &record.input) {
                (Some(context), Some(input)) => (context.as_ref().clone(), Arc::clone(input)),
                _ => return Err(TrackError::MissingContext { index: source }),
            };
            added.push(Factor {
                source,
                target,
                context,
                input,
                targets: Vec::new(),
                weights: Vec::new(),
            });
        }

        let count = added.len();
        self.factors.extend(added);
        Ok(count)
    }

    /// One refinement iteration over poses in `[lo, hi)`.
    ///
    /// Poses outside the range are held fixed. With `motion_only == false`
    /// the scalar disparity of each slot in range is solved as well.
    pub fn update(&mut self, lo: usize, hi: usize, motion_only: bool) -> Result<IterationOutcome> {
        self.iterate(lo, hi, motion_only, 0)
    }

    /// Run `iterations` updates. Singular iterations are logged and skipped.
    pub fn refine(
        &mut self,
        lo: usize,
        hi: usize,
        iterations: usize,
        motion_only: bool,
    ) -> Result<RefineReport> {
        let mut report = RefineReport::default();

        for iteration in 0..iterations {
            match self.iterate(lo, hi, motion_only, iteration) {
                Ok(IterationOutcome::Applied { residual, .. }) => {
                    report.applied += 1;
                    report.final_residual = Some(residual);
                }
                Ok(IterationOutcome::NoFactors) => break,
                Err(TrackError::SingularSystem { iteration }) => {
                    tracing::warn!(
                        "Skipping refinement iteration {} over [{}, {}): singular system",
                        iteration,
                        lo,
                        hi
                    );
                    report.singular += 1;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::debug!(
            "Refined [{}, {}): {} applied, {} singular, residual {:?}",
            lo,
            hi,
            report.applied,
            report.singular,
            report.final_residual
        );
        Ok(report)
    }

    fn iterate(
        &mut self,
        lo: usize,
        hi: usize,
        motion_only: bool,
        iteration: usize,
    ) -> Result<IterationOutcome> {
        let live = self.buffer.len();
        if lo > hi || hi > live {
            return Err(TrackError::InvalidRange { lo, hi, len: live });
        }

        let active: Vec<usize> = (0..self.factors.len())
            .filter(|&e| self.factors[e].touches(lo, hi))
            .collect();
        if active.is_empty() {
            return Ok(IterationOutcome::NoFactors);
        }

        // =====================================================================
        // PHASE 1: COLLECT
        // =====================================================================
        let records: Vec<KeyframeRecord> = self.buffer.slice(0, live)?.to_vec();
        for &e in &active {
            let factor = &self.factors[e];
            if factor.source >= live || factor.target >= live {
                return Err(TrackError::InvalidEdge {
                    from: factor.source,
                    to: factor.target,
                    live,
                });
            }
        }
        let poses = collect_poses(&records, &self.factors, &active, lo..hi)?;

        let window = hi - lo;
        let dim = if motion_only { 6 * window } else { 7 * window };
        let mut h = DMatrix::<f64>::zeros(dim, dim);
        let mut b = DVector::<f64>::zeros(dim);
        let mut residual = 0.0;

        let pose_var = |k: usize| (lo..hi).contains(&k).then(|| (k - lo) * 6);
        let disparity_var = |k: usize, sensor: bool| {
            (!motion_only && !sensor && (lo..hi).contains(&k)).then(|| 6 * window + (k - lo))
        };

        for &e in &active {
            let (i, j) = (self.factors[e].source, self.factors[e].target);
            let src = &records[i];
            let dst = &records[j];
            let (gi, gj) = (pose_at(&poses, i)?, pose_at(&poses, j)?);

            let relative = gj.compose(&gi.inverse());
            let adjoint = relative.adjoint();
            let depths = src.cell_inverse_depths();
            let (rows, cols) = src.grid_shape();
            let grid = CoordGrid::identity(rows, cols);

            let projections: Vec<Option<Projection>> = grid
                .coords()
                .iter()
                .zip(&depths)
                .map(|(pixel, &(inv_depth, _))| {
                    project_cell(
                        &relative,
                        &adjoint,
                        &src.intrinsics,
                        &dst.intrinsics,
                        pixel,
                        inv_depth,
                        self.config.min_depth,
                    )
                })
                .collect();
            let coords = CoordGrid::from_coords(
                rows,
                cols,
                projections
                    .iter()
                    .zip(grid.coords())
                    .map(|(proj, pixel)| proj.map_or(*pixel, |p| p.coords))
                    .collect(),
            )?;

            let corr = self.oracle.correlate(&src.features, &dst.features, &coords)?;
            let out = self
                .oracle
                .update(&self.factors[e].context, &self.factors[e].input, &corr)?;

            let mut targets = Vec::with_capacity(coords.len());
            let mut weights = Vec::with_capacity(coords.len());
            for (cell, (proj, lookup)) in projections.iter().zip(coords.coords()).enumerate() {
                let target = lookup + out.motion.delta()[cell];
                let weight = match proj {
                    Some(_) if !src.mask.is_masked(cell) => out.motion.weight()[cell],
                    _ => Vector2::zeros(),
                };
                targets.push(target);
                weights.push(weight);

                let Some(proj) = proj else { continue };
                if weight == Vector2::zeros() {
                    continue;
                }

                let r = target - proj.coords;
                residual += weight.x * r.x * r.x + weight.y * r.y * r.y;

                let mut columns: Vec<(usize, Vector2<f64>)> = Vec::with_capacity(13);
                if let Some(offset) = pose_var(i) {
                    for c in 0..6 {
                        columns.push((offset + c, proj.jac_source.column(c).into_owned()));
                    }
                }
                if let Some(offset) = pose_var(j) {
                    for c in 0..6 {
                        columns.push((offset + c, proj.jac_target.column(c).into_owned()));
                    }
                }
                if let Some(offset) = disparity_var(i, depths[cell].1) {
                    columns.push((offset, proj.jac_disparity));
                }

                for &(a, ja) in &columns {
                    b[a] += ja.x * weight.x * r.x + ja.y * weight.y * r.y;
                    for &(c, jc) in &columns {
                        h[(a, c)] += ja.x * weight.x * jc.x + ja.y * weight.y * jc.y;
                    }
                }
            }

            let factor = &mut self.factors[e];
            factor.context = out.context;
            factor.targets = targets;
            factor.weights = weights;
        }

        // =====================================================================
        // PHASE 2: SOLVE
        // =====================================================================
        let delta = solve_damped(h, &b, &self.config).ok_or(TrackError::SingularSystem { iteration })?;

        // =====================================================================
        // PHASE 3: APPLY
        // =====================================================================
        let mut updated = Vec::with_capacity(window);
        for k in lo..hi {
            let offset = (k - lo) * 6;
            let xi = Vector6::from_column_slice(&delta.as_slice()[offset..offset + 6]);
            updated.push(pose_at(&poses, k)?.retract(&xi));
        }
        self.buffer.assign(lo, hi, SlotUpdate::Poses(updated))?;

        if !motion_only {
            let disparities = (lo..hi)
                .map(|k| {
                    let current = records[k].disparity.unwrap_or(DEFAULT_DISPARITY);
                    (current + delta[6 * window + (k - lo)]).max(MIN_DISPARITY)
                })
                .collect();
            self.buffer.assign(lo, hi, SlotUpdate::Disparities(disparities))?;
        }

        Ok(IterationOutcome::Applied {
            factors: active.len(),
            step_norm: delta.norm(),
            residual,
        })
    }
}

/// Current pose of every slot the iteration reads, indexed by slot.
fn collect_poses(
    records: &[KeyframeRecord],
    factors: &[Factor],
    active: &[usize],
    range: Range<usize>,
) -> Result<Vec<Option<SE3>>> {
    let mut poses = vec![None; records.len()];
    let needed = range.chain(
        active
            .iter()
            .flat_map(|&e| [factors[e].source, factors[e].target]),
    );
    for k in needed {
        let pose = records[k].pose.ok_or(TrackError::UnsetPose { index: k })?;
        poses[k] = Some(pose);
    }
    Ok(poses)
}

fn pose_at(poses: &[Option<SE3>], index: usize) -> Result<SE3> {
    poses
        .get(index)
        .copied()
        .flatten()
        .ok_or(TrackError::UnsetPose { index })
}

/// Solve `(H + diag(ε + λ·H_ii)) δ = b`, `None` if the system is not
/// symmetric positive definite.
fn solve_damped(
    mut h: DMatrix<f64>,
    b: &DVector<f64>,
    config: &FactorGraphConfig,
) -> Option<DVector<f64>> {
    for i in 0..h.nrows() {
        h[(i, i)] += config.epsilon + config.damping * h[(i, i)];
    }

    if h.iter().chain(b.iter()).any(|v| !v.is_finite()) {
        return None;
    }
    if (0..h.nrows()).any(|i| h[(i, i)] <= f64::EPSILON) {
        return None;
    }

    let delta = h.cholesky()?.solve(b);
    delta.iter().all(|v| v.is_finite()).then_some(delta)
}
