//! One-dimensional root finding for goal seek.
//!
//! Newton steps with a forward-difference slope while no sign change has
//! been seen; once a bracket exists, alternating false-position and
//! bisection steps keep the root enclosed.

use crate::engine::EngineError;

/// Iteration limits for a seek.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalSeekLimits {
    pub max_iterations: usize,
    /// Absolute tolerance on `goal - target`.
    pub tolerance: f64,
}

impl Default for GoalSeekLimits {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SeekReport {
    pub solution: f64,
    /// `goal - target` at `solution`; `None` when the goal was never numeric.
    pub residual: Option<f64>,
    pub iterations: usize,
    pub converged: bool,
}

/// Retries toward the last good point when a step lands where the goal is
/// not numeric (e.g. `#DIV/0!`).
const MAX_STEP_HALVINGS: usize = 30;

#[derive(Debug, Clone, Copy)]
struct Bracket {
    lo: f64,
    r_lo: f64,
    hi: f64,
    r_hi: f64,
    bisect_next: bool,
}

impl Bracket {
    fn next_point(&self) -> f64 {
        let mid = 0.5 * (self.lo + self.hi);
        if self.bisect_next {
            return mid;
        }
        let secant = self.hi - self.r_hi * (self.hi - self.lo) / (self.r_hi - self.r_lo);
        let (min, max) = (self.lo.min(self.hi), self.lo.max(self.hi));
        if secant.is_finite() && secant > min && secant < max {
            secant
        } else {
            mid
        }
    }

    fn update(&mut self, x: f64, r: f64) {
        if r.signum() == self.r_lo.signum() {
            self.lo = x;
            self.r_lo = r;
        } else {
            self.hi = x;
            self.r_hi = r;
        }
        self.bisect_next = !self.bisect_next;
    }

    fn width(&self) -> f64 {
        (self.hi - self.lo).abs()
    }
}

/// Find `x` with `goal_at(x) == target`, starting from `start`.
///
/// `goal_at` returns `Ok(None)` where the goal is not numeric; only engine
/// failures abort the seek.
pub(crate) fn seek<F>(
    start: f64,
    target: f64,
    limits: GoalSeekLimits,
    mut goal_at: F,
) -> Result<SeekReport, EngineError>
where
    F: FnMut(f64) -> Result<Option<f64>, EngineError>,
{
    let mut residual = |x: f64| -> Result<Option<f64>, EngineError> {
        Ok(goal_at(x)?.map(|g| g - target).filter(|r| r.is_finite()))
    };
    let tolerance = limits.tolerance;

    let mut x = start;
    let Some(mut r) = residual(x)? else {
        return Ok(SeekReport {
            solution: start,
            residual: None,
            iterations: 0,
            converged: false,
        });
    };
    let mut best = (x, r);
    let mut bracket: Option<Bracket> = None;
    let mut probe = x.abs().max(1.0) * 0.1;
    let mut iterations = 0;

    while iterations < limits.max_iterations && best.1.abs() > tolerance {
        iterations += 1;

        let proposal = match bracket {
            Some(b) => b.next_point(),
            None => match newton_step(x, r, &mut residual)? {
                Some(next) => next,
                None => {
                    // Flat or undefined slope: widen the search alternately
                    // either side of the current point.
                    let next = x + probe;
                    probe *= -2.0;
                    next
                }
            },
        };

        let mut candidate = proposal;
        let mut value = residual(candidate)?;
        let mut halvings = 0;
        while value.is_none() && halvings < MAX_STEP_HALVINGS {
            candidate = 0.5 * (x + candidate);
            value = residual(candidate)?;
            halvings += 1;
        }
        let Some(rc) = value else {
            break;
        };

        match bracket.as_mut() {
            Some(b) => b.update(candidate, rc),
            None if rc.signum() != r.signum() => {
                bracket = Some(Bracket {
                    lo: x,
                    r_lo: r,
                    hi: candidate,
                    r_hi: rc,
                    bisect_next: false,
                });
            }
            None => {}
        }

        x = candidate;
        r = rc;
        if r.abs() < best.1.abs() {
            best = (x, r);
        }
        if bracket.is_some_and(|b| b.width() <= f64::EPSILON * x.abs().max(1.0)) {
            break;
        }
    }

    Ok(SeekReport {
        solution: best.0,
        residual: Some(best.1),
        iterations,
        converged: best.1.abs() <= tolerance,
    })
}

fn newton_step<F>(x: f64, r: f64, residual: &mut F) -> Result<Option<f64>, EngineError>
where
    F: FnMut(f64) -> Result<Option<f64>, EngineError>,
{
    let h = 1e-5 * x.abs().max(1.0);
    let Some(r_h) = residual(x + h)? else {
        return Ok(None);
    };
    let slope = (r_h - r) / h;
    if slope == 0.0 || !slope.is_finite() {
        return Ok(None);
    }
    let next = x - r / slope;
    Ok(next.is_finite().then_some(next))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(start: f64, target: f64, f: impl Fn(f64) -> Option<f64>) -> SeekReport {
        seek(start, target, GoalSeekLimits::default(), |x| Ok(f(x))).unwrap()
    }

    #[test]
    fn linear_goal_converges_in_one_newton_step() {
        let report = run(1.0, 1.0, |x| Some(x / 12.3));
        assert!(report.converged);
        assert!((report.solution - 12.3).abs() < 1e-5);
        assert!(report.iterations <= 2);
    }

    #[test]
    fn nonlinear_goal_converges() {
        let report = run(1.0, 2.0, |x| Some(x * x));
        assert!(report.converged);
        assert!((report.solution - 2f64.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn already_at_target_needs_no_iterations() {
        let report = run(5.0, 10.0, |x| Some(x * 2.0));
        assert!(report.converged);
        assert_eq!(report.iterations, 0);
        assert_eq!(report.solution, 5.0);
    }

    #[test]
    fn saturating_goal_falls_back_to_bracketing() {
        // Flat to the left of 3, so Newton starts with no slope.
        let report = run(0.0, 0.5, |x| Some(if x < 3.0 { 0.0 } else { (x - 3.0).min(1.0) }));
        assert!(report.converged, "{report:?}");
        assert!((report.solution - 3.5).abs() < 1e-6);
    }

    #[test]
    fn undefined_regions_are_stepped_around() {
        // Ratio with a pole at zero, like gains / reintroductions.
        let report = run(10.0, 1.0, |x| if x <= 0.0 { None } else { Some(40.0 / x) });
        assert!(report.converged, "{report:?}");
        assert!((report.solution - 40.0).abs() < 1e-4);
    }

    #[test]
    fn unreachable_target_reports_non_convergence() {
        let report = run(1.0, 1.0, |_| Some(5.0));
        assert!(!report.converged);
        assert_eq!(report.iterations, GoalSeekLimits::default().max_iterations);
        assert!(report.residual.is_some());
    }

    #[test]
    fn non_numeric_start_is_reported_without_iterating() {
        let report = run(0.0, 1.0, |_| None);
        assert!(!report.converged);
        assert_eq!(report.residual, None);
    }
}
