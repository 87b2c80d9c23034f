//! Pixel-space geometry shared by prediction, camera and rendering.

use serde::{Deserialize, Serialize};

/// Point in source-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn offset(self, velocity: Velocity, seconds: f64) -> Point {
        Point {
            x: self.x + velocity.vx * seconds,
            y: self.y + velocity.vy * seconds,
        }
    }

    pub fn distance(self, other: Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

/// Velocity in px/sec.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity {
    pub vx: f64,
    pub vy: f64,
}

impl Velocity {
    pub const ZERO: Velocity = Velocity { vx: 0.0, vy: 0.0 };

    pub const fn new(vx: f64, vy: f64) -> Self {
        Self { vx, vy }
    }

    /// Velocity needed to travel from `from` to `to` in `dt` seconds; zero for `dt <= 0`.
    pub fn between(from: Point, to: Point, dt: f64) -> Velocity {
        if dt <= 0.0 || !dt.is_finite() {
            return Velocity::ZERO;
        }
        Velocity {
            vx: (to.x - from.x) / dt,
            vy: (to.y - from.y) / dt,
        }
    }

    pub fn speed(self) -> f64 {
        self.vx.hypot(self.vy)
    }
}

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_center(center: Point, width: f64, height: f64) -> Self {
        Self {
            x: center.x - width * 0.5,
            y: center.y - height * 0.5,
            width,
            height,
        }
    }

    /// Full extent of a `width` x `height` frame.
    pub fn extent(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f64, height as f64)
    }

    pub fn right(self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(self) -> f64 {
        self.y + self.height
    }

    pub fn center(self) -> Point {
        Point {
            x: self.x + self.width * 0.5,
            y: self.y + self.height * 0.5,
        }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
    }

    /// Shrinks the rect to fit `bounds`, then shifts it inside while keeping its size.
    pub fn clamp_within(self, bounds: Rect) -> Rect {
        let width = self.width.clamp(0.0, bounds.width.max(0.0));
        let height = self.height.clamp(0.0, bounds.height.max(0.0));
        Rect {
            x: self.x.clamp(bounds.x, bounds.right() - width),
            y: self.y.clamp(bounds.y, bounds.bottom() - height),
            width,
            height,
        }
    }

    /// Component-wise linear interpolation; `t == 0` and `t == 1` return the endpoints exactly.
    pub fn lerp(self, other: Rect, t: f64) -> Rect {
        if t <= 0.0 {
            return self;
        }
        if t >= 1.0 {
            return other;
        }
        Rect {
            x: lerp(self.x, other.x, t),
            y: lerp(self.y, other.y, t),
            width: lerp(self.width, other.width, t),
            height: lerp(self.height, other.height, t),
        }
    }

    /// Largest absolute difference across the four components.
    pub fn max_delta(self, other: Rect) -> f64 {
        (self.x - other.x)
            .abs()
            .max((self.y - other.y).abs())
            .max((self.width - other.width).abs())
            .max((self.height - other.height).abs())
    }
}

pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_within_shifts_rect_back_inside_bounds() {
        let bounds = Rect::extent(1_920, 1_080);
        let clamped = Rect::new(1_800.0, -50.0, 400.0, 400.0).clamp_within(bounds);
        assert_eq!(clamped, Rect::new(1_520.0, 0.0, 400.0, 400.0));
    }

    #[test]
    fn clamp_within_shrinks_oversized_rect() {
        let bounds = Rect::extent(300, 200);
        let clamped = Rect::new(-10.0, -10.0, 600.0, 600.0).clamp_within(bounds);
        assert_eq!(clamped, bounds);
    }

    #[test]
    fn lerp_hits_endpoints_exactly() {
        let a = Rect::new(0.1, 0.2, 0.3, 0.7);
        let b = Rect::new(100.0, 33.3, 401.0, 409.9);
        assert_eq!(a.lerp(b, 0.0), a);
        assert_eq!(a.lerp(b, 1.0), b);
        let mid = a.lerp(b, 0.5);
        assert!((mid.x - 50.05).abs() < 1e-9);
    }

    #[test]
    fn velocity_between_ignores_non_positive_dt() {
        let v = Velocity::between(Point::new(0.0, 0.0), Point::new(10.0, 0.0), 0.0);
        assert_eq!(v, Velocity::ZERO);
        let v = Velocity::between(Point::new(0.0, 0.0), Point::new(100.0, 0.0), 0.1);
        assert!((v.vx - 1_000.0).abs() < 1e-9);
        assert!((v.speed() - 1_000.0).abs() < 1e-9);
    }
}
