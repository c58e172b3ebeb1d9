pub(super) fn manhattan(ax: i32, ay: i32, bx: i32, by: i32) -> i32 {
    (ax - bx).abs() + (ay - by).abs()
}

pub(super) fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Moves `from` toward `to` by `step` world units. A zero-length offset stays put.
pub(super) fn step_toward(from: (f32, f32), to: (f32, f32), step: f32) -> (f32, f32) {
    let dx = to.0 - from.0;
    let dy = to.1 - from.1;
    let len = (dx * dx + dy * dy).sqrt();
    if len <= f32::EPSILON {
        return from;
    }
    (from.0 + dx / len * step, from.1 + dy / len * step)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manhattan_ignores_direction() {
        assert_eq!(manhattan(0, 0, 3, -4), 7);
        assert_eq!(manhattan(3, -4, 0, 0), 7);
    }

    #[test]
    fn step_toward_moves_along_unit_direction() {
        let next = step_toward((0.0, 0.0), (100.0, 0.0), 25.0);
        assert_eq!(next, (25.0, 0.0));
        let diag = step_toward((0.0, 0.0), (30.0, 40.0), 5.0);
        assert!((diag.0 - 3.0).abs() < 1e-4 && (diag.1 - 4.0).abs() < 1e-4);
    }

    #[test]
    fn step_toward_same_point_is_noop() {
        assert_eq!(step_toward((5.0, 5.0), (5.0, 5.0), 10.0), (5.0, 5.0));
    }

    #[test]
    fn distance_is_euclidean() {
        assert!((distance((0.0, 0.0), (30.0, 40.0)) - 50.0).abs() < 1e-4);
    }
}
