//! Raw detector coordinates → normalized screen coordinates.
//!
//! The mapping is an affine least-squares fit over the collected fixation
//! points: `x' = a·x + b·y + c`, `y' = d·x + e·y + f`, clamped to `[0, 1]`.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Determinants below this are treated as a singular fit.
const SINGULAR_EPSILON: f64 = 1e-12;

/// Default fixation targets: four corners inset by 10%, then the centre.
pub const DEFAULT_TARGETS: [Point; 5] = [
    Point { x: 0.1, y: 0.1 },
    Point { x: 0.9, y: 0.1 },
    Point { x: 0.1, y: 0.9 },
    Point { x: 0.9, y: 0.9 },
    Point { x: 0.5, y: 0.5 },
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CalibrationPoint {
    pub raw: Point,
    pub screen: Point,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Affine {
    x_coeffs: [f64; 3],
    y_coeffs: [f64; 3],
}

impl Affine {
    const IDENTITY: Affine = Affine {
        x_coeffs: [1.0, 0.0, 0.0],
        y_coeffs: [0.0, 1.0, 0.0],
    };

    fn apply(&self, raw: Point) -> Point {
        let [a, b, c] = self.x_coeffs;
        let [d, e, f] = self.y_coeffs;
        Point {
            x: (a * raw.x + b * raw.y + c).clamp(0.0, 1.0),
            y: (d * raw.x + e * raw.y + f).clamp(0.0, 1.0),
        }
    }
}

/// Immutable once built; `map` is a pure function and the profile is
/// shared across tasks behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationProfile {
    points: Vec<CalibrationPoint>,
    mapping: Affine,
    calibrated: bool,
}

impl CalibrationProfile {
    /// Fallback used when calibration is skipped or fails.
    pub fn identity() -> Self {
        Self {
            points: Vec::new(),
            mapping: Affine::IDENTITY,
            calibrated: false,
        }
    }

    pub fn map(&self, raw: Point) -> Point {
        self.mapping.apply(raw)
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }
}

/// Collects fixation correspondences and fits the profile.
#[derive(Debug, Clone)]
pub struct CalibrationMapper {
    min_points: usize,
    points: Vec<CalibrationPoint>,
}

impl CalibrationMapper {
    pub fn new(min_points: usize) -> Self {
        Self {
            min_points,
            points: Vec::with_capacity(min_points),
        }
    }

    pub fn collect_point(&mut self, raw: Point, screen_target: Point) {
        self.points.push(CalibrationPoint {
            raw,
            screen: screen_target,
        });
        log_info!(
            "calibration point {}/{} recorded",
            self.points.len(),
            self.min_points
        );
    }

    /// Discards partially collected points.
    pub fn cancel(&mut self) {
        if !self.points.is_empty() {
            log_info!("calibration cancelled, discarding {} points", self.points.len());
        }
        self.points.clear();
    }

    pub fn finalize(self) -> EngineResult<CalibrationProfile> {
        if self.points.len() < self.min_points {
            log_warn!(
                "calibration finalized with {} of {} points",
                self.points.len(),
                self.min_points
            );
            return Err(EngineError::CalibrationIncomplete {
                collected: self.points.len(),
                required: self.min_points,
            });
        }

        let mapping = fit_affine(&self.points)?;
        Ok(CalibrationProfile {
            points: self.points,
            mapping,
            calibrated: true,
        })
    }
}

fn fit_affine(points: &[CalibrationPoint]) -> EngineResult<Affine> {
    // Normal equations (AᵀA)·c = Aᵀb with rows [x, y, 1].
    let mut ata = [[0.0_f64; 3]; 3];
    let mut atb_x = [0.0_f64; 3];
    let mut atb_y = [0.0_f64; 3];

    for point in points {
        let row = [point.raw.x, point.raw.y, 1.0];
        for i in 0..3 {
            for j in 0..3 {
                ata[i][j] += row[i] * row[j];
            }
            atb_x[i] += row[i] * point.screen.x;
            atb_y[i] += row[i] * point.screen.y;
        }
    }

    let x_coeffs = solve3(&ata, &atb_x).ok_or_else(|| {
        EngineError::CalibrationDegenerate("raw points do not span a plane".into())
    })?;
    let y_coeffs = solve3(&ata, &atb_y).ok_or_else(|| {
        EngineError::CalibrationDegenerate("raw points do not span a plane".into())
    })?;

    Ok(Affine { x_coeffs, y_coeffs })
}

fn det3(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Cramer's rule; `None` when the system is singular.
fn solve3(m: &[[f64; 3]; 3], b: &[f64; 3]) -> Option<[f64; 3]> {
    let det = det3(m);
    if !det.is_finite() || det.abs() < SINGULAR_EPSILON {
        return None;
    }

    let mut solution = [0.0; 3];
    for (col, value) in solution.iter_mut().enumerate() {
        let mut replaced = *m;
        for row in 0..3 {
            replaced[row][col] = b[row];
        }
        *value = det3(&replaced) / det;
    }
    Some(solution)
}
