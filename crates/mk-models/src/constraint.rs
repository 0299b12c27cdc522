//! Feasible-region projection helpers for family constraints.

use mk_core::{Params, Result};

/// Push selected packed coordinates above their lower bounds.
///
/// Each `(index, bound)` names a coordinate of the packed parameter vector
/// and its open lower bound; any coordinate at or below the bound is moved
/// to `bound + margin`. Returns the total distance moved, which estimation
/// code uses as a penalty so the optimizer is steered back inside.
pub fn lower_bounds(params: &mut Params, bounds: &[(usize, f64)], margin: f64) -> Result<f64> {
    let mut packed = params.pack();
    let mut moved = 0.0;
    for &(i, bound) in bounds {
        let v = packed[i];
        if v <= bound || v.is_nan() {
            let target = bound + margin;
            moved += if v.is_nan() { margin } else { target - v };
            packed[i] = target;
        }
    }
    if moved > 0.0 {
        params.unpack(&packed)?;
    }
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_feasible_point_untouched() {
        let mut p = Params::from_vector(vec![2.0, 0.5]);
        let moved = lower_bounds(&mut p, &[(0, 1.0), (1, 0.0)], 1e-3).unwrap();
        assert_eq!(moved, 0.0);
        assert_eq!(p.vector[0], 2.0);
    }

    #[test]
    fn test_infeasible_point_projected() {
        let mut p = Params::from_vector(vec![0.2, -1.0]);
        let moved = lower_bounds(&mut p, &[(0, 1.0), (1, 0.0)], 1e-3).unwrap();
        assert_relative_eq!(p.vector[0], 1.001, epsilon = 1e-12);
        assert_relative_eq!(p.vector[1], 0.001, epsilon = 1e-12);
        assert_relative_eq!(moved, (1.001 - 0.2) + (0.001 + 1.0), epsilon = 1e-12);
    }
}
