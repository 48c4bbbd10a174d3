//! Motion commands
//!
//! Commands are what application code puts into the [`CommandQueue`](crate::queue::CommandQueue).
//! Each one carries the time it was issued; the service uses that timestamp to
//! order commands and to drop the ones that arrive out of order.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A motion intent tagged with the time it was issued
///
/// Equality compares the payload only and ignores the timestamp, so two
/// `Vector` commands with the same shift are equal no matter when they were
/// issued. Commands of different variants are never equal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Command {
    /// Joystick-style 2-D shift
    Vector { x: i32, y: i32, timestamp_millis: i64 },
    /// Independent left/right speed targets (two joysticks)
    Tractor {
        left: i32,
        right: i32,
        timestamp_millis: i64,
    },
}

impl Command {
    pub fn vector(x: i32, y: i32, timestamp_millis: i64) -> Self {
        Command::Vector {
            x,
            y,
            timestamp_millis,
        }
    }

    pub fn tractor(left: i32, right: i32, timestamp_millis: i64) -> Self {
        Command::Tractor {
            left,
            right,
            timestamp_millis,
        }
    }

    /// STOP in the vector style
    pub fn vector_stop(timestamp_millis: i64) -> Self {
        Command::vector(0, 0, timestamp_millis)
    }

    /// STOP in the tractor style
    pub fn tractor_stop(timestamp_millis: i64) -> Self {
        Command::tractor(0, 0, timestamp_millis)
    }

    /// STOP of the same variant as `self`
    pub fn stop_like(&self, timestamp_millis: i64) -> Self {
        match self {
            Command::Vector { .. } => Command::vector_stop(timestamp_millis),
            Command::Tractor { .. } => Command::tractor_stop(timestamp_millis),
        }
    }

    pub fn timestamp_millis(&self) -> i64 {
        match *self {
            Command::Vector {
                timestamp_millis, ..
            }
            | Command::Tractor {
                timestamp_millis, ..
            } => timestamp_millis,
        }
    }

    /// Whether the payload is all zeroes
    pub fn is_stop(&self) -> bool {
        match *self {
            Command::Vector { x, y, .. } => x == 0 && y == 0,
            Command::Tractor { left, right, .. } => left == 0 && right == 0,
        }
    }

    /// Order by timestamp only
    pub fn cmp_timestamp(&self, other: &Command) -> Ordering {
        self.timestamp_millis().cmp(&other.timestamp_millis())
    }
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        match (*self, *other) {
            (Command::Vector { x: x1, y: y1, .. }, Command::Vector { x: x2, y: y2, .. }) => {
                x1 == x2 && y1 == y2
            }
            (
                Command::Tractor {
                    left: l1,
                    right: r1,
                    ..
                },
                Command::Tractor {
                    left: l2,
                    right: r2,
                    ..
                },
            ) => l1 == l2 && r1 == r2,
            _ => false,
        }
    }
}

impl Eq for Command {}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Vector {
                x,
                y,
                timestamp_millis,
            } => write!(f, "Vector[{},{}]@{}", x, y, timestamp_millis),
            Command::Tractor {
                left,
                right,
                timestamp_millis,
            } => write!(f, "Tractor[{},{}]@{}", left, right, timestamp_millis),
        }
    }
}

/// Direct per-wheel speeds, bypassing any translation in the driver
///
/// One variant per chassis layout; a driver rejects layouts it does not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EachWheelCommand {
    /// Two-wheel differential drive, device speed units
    TwoWheel { left: i32, right: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_timestamp() {
        assert_eq!(Command::vector(50, 0, 100), Command::vector(50, 0, 50));
        assert_eq!(Command::tractor(10, -10, 1), Command::tractor(10, -10, 2));
        assert_ne!(Command::vector(50, 0, 100), Command::vector(50, 1, 100));
    }

    #[test]
    fn test_variants_never_equal() {
        assert_ne!(Command::vector_stop(0), Command::tractor_stop(0));
        assert_ne!(Command::vector(1, 2, 5), Command::tractor(1, 2, 5));
    }

    #[test]
    fn test_stop_like_keeps_variant() {
        let stop = Command::vector(30, 40, 7).stop_like(7);
        assert_eq!(stop, Command::vector_stop(0));
        assert_eq!(stop.timestamp_millis(), 7);
        assert!(stop.is_stop());
        assert!(!Command::tractor(0, 1, 0).is_stop());
    }

    #[test]
    fn test_timestamp_order() {
        let a = Command::vector(1, 1, 10);
        let b = Command::tractor(5, 5, 20);
        assert_eq!(a.cmp_timestamp(&b), Ordering::Less);
        assert_eq!(b.cmp_timestamp(&a), Ordering::Greater);
        assert_eq!(a.cmp_timestamp(&Command::vector(9, 9, 10)), Ordering::Equal);
    }
}
