//! Pointer path interpolation
//!
//! Produces the intermediate points for a simulated mouse move. A single
//! teleport to the target is trivially distinguishable from real usage, so
//! the move is split into fixed-count linear steps walked with small
//! randomized delays between them.

use rand::Rng;

/// Reference viewport used for generating pointer targets. Targets are
/// generated against a fixed size rather than the real window so every
/// session produces comparable motion.
pub const REFERENCE_VIEWPORT: (u32, u32) = (1920, 1080);

/// Number of interpolation steps per pointer move
pub const POINTER_STEPS: u32 = 15;

/// Generate a random pointer target inside the given viewport
pub fn random_target(width: u32, height: u32) -> (f64, f64) {
    let mut rng = rand::thread_rng();
    (
        rng.gen_range(0.0..width as f64),
        rng.gen_range(0.0..height as f64),
    )
}

/// Linearly interpolate a pointer path from the origin to `target`.
///
/// Returns `steps + 1` points; the first is the origin, the last is exactly
/// `target`, and the parameter grows monotonically in between.
pub fn interpolate_path(target: (f64, f64), steps: u32) -> Vec<(f64, f64)> {
    let (tx, ty) = target;
    let mut points = Vec::with_capacity(steps as usize + 1);

    for i in 0..=steps {
        let t = f64::from(i) / f64::from(steps);
        points.push((tx * t, ty * t));
    }

    points
}

/// Randomized per-step delay in milliseconds (50-150ms)
pub fn step_delay_ms() -> u64 {
    rand::thread_rng().gen_range(50..=150)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_has_steps_plus_one_points() {
        let path = interpolate_path((640.0, 480.0), POINTER_STEPS);
        assert_eq!(path.len(), POINTER_STEPS as usize + 1);
    }

    #[test]
    fn test_path_ends_exactly_at_target() {
        for target in [(0.0, 0.0), (1.0, 1.0), (1919.0, 1079.0), (333.3, 777.7)] {
            let path = interpolate_path(target, POINTER_STEPS);
            assert_eq!(*path.last().unwrap(), target);
        }
    }

    #[test]
    fn test_path_starts_at_origin() {
        let path = interpolate_path((500.0, 500.0), POINTER_STEPS);
        assert_eq!(path[0], (0.0, 0.0));
    }

    #[test]
    fn test_path_parameter_is_monotonic() {
        let (tx, ty) = (1234.0, 567.0);
        let path = interpolate_path((tx, ty), POINTER_STEPS);
        let mut last_t = -1.0;
        for (x, y) in path {
            // Recover the parameter from either axis; both must agree.
            let t = x / tx;
            assert!((y / ty - t).abs() < 1e-9);
            assert!(t > last_t);
            last_t = t;
        }
        assert!((last_t - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_random_target_stays_in_viewport() {
        let (w, h) = REFERENCE_VIEWPORT;
        for _ in 0..100 {
            let (x, y) = random_target(w, h);
            assert!(x >= 0.0 && x < w as f64);
            assert!(y >= 0.0 && y < h as f64);
        }
    }

    #[test]
    fn test_step_delay_in_bounds() {
        for _ in 0..100 {
            let d = step_delay_ms();
            assert!((50..=150).contains(&d));
        }
    }
}
