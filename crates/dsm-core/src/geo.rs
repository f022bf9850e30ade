//! Bearing and turn-direction geometry used by streets and intersections.

use std::f64::consts::{PI, TAU};

/// One of the four turn buckets assigned to a turn from its signed angle.
/// U-turn aliases to `Left` wherever the model only distinguishes three
/// lanes (right/straight/left), per the traffic-light cycle indexing.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Direction {
    Right,
    Straight,
    Left,
    UTurn,
}

impl Direction {
    /// The traffic-light cycle slot a direction maps onto: U-turn aliases
    /// to `Left` since a traffic light only stores three per-street cycles.
    pub fn cycle_index(self) -> usize {
        match self {
            Direction::Right => 0,
            Direction::Straight => 1,
            Direction::Left | Direction::UTurn => 2,
        }
    }
}

/// Wrap `angle` into `(-pi, pi]`.
pub fn wrap_signed(angle: f64) -> f64 {
    let mut a = angle % TAU;
    if a <= -PI {
        a += TAU;
    } else if a > PI {
        a -= TAU;
    }
    a
}

/// Normalize `angle` into `[0, 2*pi)`.
pub fn wrap_unsigned(angle: f64) -> f64 {
    let mut a = angle % TAU;
    if a < 0.0 {
        a += TAU;
    }
    a
}

/// Signed angular difference `to - from`, wrapped to `(-pi, pi]`.
pub fn delta_angle(from: f64, to: f64) -> f64 {
    wrap_signed(to - from)
}

/// Classify a signed turn angle (outgoing bearing minus incoming bearing,
/// wrapped to `(-pi, pi]`) into a direction bucket.
///
/// A near-zero delta is `Straight`; a large-magnitude delta close to +-pi is
/// a `UTurn`; negative deltas are `Right` turns (clockwise), positive are
/// `Left` turns (counter-clockwise), matching a right-hand-drive convention
/// where turning right decreases bearing.
pub fn classify_turn(delta: f64) -> Direction {
    const STRAIGHT_TOL: f64 = PI / 8.0;
    const UTURN_TOL: f64 = PI - PI / 8.0;
    let d = wrap_signed(delta);
    if d.abs() >= UTURN_TOL {
        Direction::UTurn
    } else if d.abs() <= STRAIGHT_TOL {
        Direction::Straight
    } else if d < 0.0 {
        Direction::Right
    } else {
        Direction::Left
    }
}

/// Centi-radian signed turn key used as the ordering key in an
/// intersection's pending-agent multimap (smallest key first == rightmost
/// turn first).
pub fn turn_key_centirad(delta: f64) -> i32 {
    (wrap_signed(delta) * 100.0).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_signed_examples() {
        assert!((wrap_signed(0.0)).abs() < 1e-9);
        assert!((wrap_signed(TAU) - 0.0).abs() < 1e-9);
        assert!((wrap_signed(PI + 0.1) - (-PI + 0.1)).abs() < 1e-9);
    }

    #[test]
    fn classify_straight() {
        assert_eq!(classify_turn(0.0), Direction::Straight);
    }

    #[test]
    fn classify_right_and_left() {
        assert_eq!(classify_turn(-PI / 2.0), Direction::Right);
        assert_eq!(classify_turn(PI / 2.0), Direction::Left);
    }

    #[test]
    fn classify_uturn() {
        assert_eq!(classify_turn(PI), Direction::UTurn);
        assert_eq!(classify_turn(-PI + 0.01), Direction::UTurn);
    }

    #[test]
    fn turn_key_orders_right_before_straight_before_left() {
        let right = turn_key_centirad(-PI / 2.0);
        let straight = turn_key_centirad(0.0);
        let left = turn_key_centirad(PI / 2.0);
        assert!(right < straight);
        assert!(straight < left);
    }
}
