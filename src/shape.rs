use std::fmt::Display;

/// Every shape is padded out to this rank; trailing dimension is fastest-moving.
pub const MAX_DIMS: usize = 4;

/// Dimension extents of a buffer or of a fusion's output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Shape(pub [u64; MAX_DIMS]);

/// Per-dimension strides in *elements*, matching [`Shape`] dimension order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Strides(pub [u64; MAX_DIMS]);

impl Shape {
    /// Build a shape from up to 4 dims, left-padding with 1s.
    pub fn from_dims(dims: &[u64]) -> Shape {
        assert!(
            !dims.is_empty() && dims.len() <= MAX_DIMS,
            "shapes are 1-{MAX_DIMS} dimensional, got {dims:?}"
        );
        let mut out = [1; MAX_DIMS];
        out[MAX_DIMS - dims.len()..].copy_from_slice(dims);
        Shape(out)
    }

    pub fn elements(&self) -> u64 {
        self.0.iter().product()
    }

    /// Dense row-major strides for this shape (trailing dim has stride 1).
    pub fn row_major(&self) -> Strides {
        let mut strides = [1; MAX_DIMS];
        for dim in (0..MAX_DIMS - 1).rev() {
            strides[dim] = strides[dim + 1] * self.0[dim + 1];
        }
        Strides(strides)
    }

    /// Implicit-broadcast compatibility: each dim must match the target or be 1.
    pub fn broadcasts_to(&self, target: &Shape) -> bool {
        self.0
            .iter()
            .zip(target.0.iter())
            .all(|(d, t)| *d == *t || *d == 1)
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl From<[u64; 1]> for Shape {
    fn from(dims: [u64; 1]) -> Shape {
        Shape::from_dims(&dims)
    }
}
impl From<[u64; 2]> for Shape {
    fn from(dims: [u64; 2]) -> Shape {
        Shape::from_dims(&dims)
    }
}
impl From<[u64; 3]> for Shape {
    fn from(dims: [u64; 3]) -> Shape {
        Shape::from_dims(&dims)
    }
}
impl From<[u64; 4]> for Shape {
    fn from(dims: [u64; 4]) -> Shape {
        Shape(dims)
    }
}
impl From<u64> for Shape {
    fn from(dim: u64) -> Shape {
        Shape::from_dims(&[dim])
    }
}
