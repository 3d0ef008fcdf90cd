use std::ops::{Add, Mul, Neg, Sub};

/// Point or direction in world coordinates (meters).
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

pub type Location = Vector3;

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Vector3 { x, y, z }
    }

    pub fn zero() -> Self {
        Default::default()
    }

    pub fn dot(&self, other: &Vector3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Z component of the cross product, i.e. the signed area in the ground plane.
    pub fn cross_z(&self, other: &Vector3) -> f64 {
        self.x * other.y - self.y * other.x
    }

    pub fn length(&self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn distance(&self, other: &Vector3) -> f64 {
        (*other - *self).length()
    }

    /// Unit vector in the same direction, or the zero vector if too short.
    pub fn normalized(&self) -> Vector3 {
        let l = self.length();
        if l < 1e-9 {
            Vector3::zero()
        } else {
            *self * (1.0 / l)
        }
    }

    /// Unit vector in the ground plane for a yaw given in degrees.
    pub fn from_yaw(degrees: f64) -> Vector3 {
        let r = degrees.to_radians();
        Vector3::new(r.cos(), r.sin(), 0.0)
    }

    /// Signed angle (radians) rotating `self` onto `other` in the ground plane.
    pub fn signed_angle(&self, other: &Vector3) -> f64 {
        self.cross_z(other).atan2(self.dot(other))
    }
}

impl Add for Vector3 {
    type Output = Vector3;
    fn add(self, o: Vector3) -> Vector3 {
        Vector3::new(self.x + o.x, self.y + o.y, self.z + o.z)
    }
}

impl Sub for Vector3 {
    type Output = Vector3;
    fn sub(self, o: Vector3) -> Vector3 {
        Vector3::new(self.x - o.x, self.y - o.y, self.z - o.z)
    }
}

impl Mul<f64> for Vector3 {
    type Output = Vector3;
    fn mul(self, s: f64) -> Vector3 {
        Vector3::new(self.x * s, self.y * s, self.z * s)
    }
}

impl Neg for Vector3 {
    type Output = Vector3;
    fn neg(self) -> Vector3 {
        Vector3::new(-self.x, -self.y, -self.z)
    }
}

#[test]
fn test_signed_angle() {
    let ahead = Vector3::from_yaw(0.0);
    let left = Vector3::from_yaw(90.0);
    assert!((ahead.signed_angle(&left) - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
    assert!((left.signed_angle(&ahead) + std::f64::consts::FRAC_PI_2).abs() < 1e-9);
    assert!(ahead.signed_angle(&ahead).abs() < 1e-9);
}
