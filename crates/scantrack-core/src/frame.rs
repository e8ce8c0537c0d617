use std::sync::Arc;

/// A single grid sample: x, y, z and a pad/weight channel.
pub type Point4 = [f32; 4];

/// An error type for the frame module.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum FrameError {
    /// The number of points does not match the frame grid.
    #[error("Point count ({actual}) does not match the frame size ({expected})")]
    PointCountMismatch {
        /// Number of points implied by the frame size.
        expected: usize,
        /// Number of points provided.
        actual: usize,
    },
}

/// Frame size in grid points
///
/// # Examples
///
/// ```
/// use scantrack_core::FrameSize;
///
/// let size = FrameSize {
///   width: 640,
///   height: 480,
/// };
///
/// assert_eq!(size.num_points(), 640 * 480);
/// assert!(!size.is_empty());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameSize {
    /// Number of columns in the grid
    pub width: usize,
    /// Number of rows in the grid
    pub height: usize,
}

impl FrameSize {
    /// Create a new frame size.
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Total number of grid points.
    #[inline]
    pub fn num_points(&self) -> usize {
        self.width * self.height
    }

    /// True when either dimension is zero.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "FrameSize {{ width: {}, height: {} }}",
            self.width, self.height
        )
    }
}

impl From<[usize; 2]> for FrameSize {
    fn from(size: [usize; 2]) -> Self {
        FrameSize {
            width: size[0],
            height: size[1],
        }
    }
}

/// A point-cloud sample laid out as a dense `width x height` grid.
///
/// The point storage is reference counted, so cloning a frame is cheap and
/// never copies the grid. Frames are immutable once built.
#[derive(Clone, Debug)]
pub struct Frame {
    size: FrameSize,
    points: Arc<[Point4]>,
    timestamp_ms: u64,
    valid: bool,
}

impl Frame {
    /// Create a valid frame from a row-major grid of points.
    ///
    /// # Arguments
    ///
    /// * `size` - The grid dimensions.
    /// * `points` - Row-major points, `size.width * size.height` of them.
    /// * `timestamp_ms` - Elapsed milliseconds since the session started.
    pub fn new(
        size: FrameSize,
        points: Vec<Point4>,
        timestamp_ms: u64,
    ) -> Result<Self, FrameError> {
        if points.len() != size.num_points() {
            return Err(FrameError::PointCountMismatch {
                expected: size.num_points(),
                actual: points.len(),
            });
        }

        Ok(Self {
            size,
            points: points.into(),
            timestamp_ms,
            valid: true,
        })
    }

    /// Create an explicitly invalid frame.
    ///
    /// Invalid frames carry no points and are used by producers as
    /// sentinels, e.g. to mark the end of a stream.
    pub fn invalid(timestamp_ms: u64) -> Self {
        Self {
            size: FrameSize::default(),
            points: Vec::<Point4>::new().into(),
            timestamp_ms,
            valid: false,
        }
    }

    /// Return the same frame flagged as invalid, keeping its points.
    pub fn into_invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    /// Whether the frame holds usable data.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The grid dimensions.
    #[inline]
    pub fn size(&self) -> FrameSize {
        self.size
    }

    /// Elapsed milliseconds since the session started.
    #[inline]
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Row-major view of the point grid.
    #[inline]
    pub fn points(&self) -> &[Point4] {
        &self.points
    }

    /// Get the point at `(col, row)`, if inside the grid.
    pub fn point(&self, col: usize, row: usize) -> Option<&Point4> {
        if col >= self.size.width || row >= self.size.height {
            return None;
        }
        self.points.get(row * self.size.width + col)
    }

    /// Number of points with finite coordinates.
    pub fn num_valid_points(&self) -> usize {
        self.points.iter().filter(|p| is_valid_point(p)).count()
    }

    /// True when both frames share the same point storage.
    pub fn shares_points_with(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.points, &other.points)
    }
}

/// A point takes part in registration only if x, y and z are finite.
#[inline]
pub fn is_valid_point(point: &Point4) -> bool {
    point[0].is_finite() && point[1].is_finite() && point[2].is_finite()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_new() -> Result<(), FrameError> {
        let size = FrameSize::new(2, 2);
        let points = vec![
            [0.0, 0.0, 1.0, 1.0],
            [1.0, 0.0, 1.0, 1.0],
            [0.0, 1.0, f32::NAN, 1.0],
            [1.0, 1.0, 1.0, 1.0],
        ];
        let frame = Frame::new(size, points, 33)?;

        assert!(frame.is_valid());
        assert_eq!(frame.size(), size);
        assert_eq!(frame.timestamp_ms(), 33);
        assert_eq!(frame.points().len(), 4);
        assert_eq!(frame.num_valid_points(), 3);
        assert_eq!(frame.point(1, 1), Some(&[1.0, 1.0, 1.0, 1.0]));
        assert_eq!(frame.point(2, 0), None);
        Ok(())
    }

    #[test]
    fn test_frame_point_count_mismatch() {
        let res = Frame::new(FrameSize::new(3, 2), vec![[0.0; 4]; 5], 0);
        assert_eq!(
            res.err(),
            Some(FrameError::PointCountMismatch {
                expected: 6,
                actual: 5
            })
        );
    }

    #[test]
    fn test_frame_invalid() {
        let frame = Frame::invalid(120);
        assert!(!frame.is_valid());
        assert!(frame.size().is_empty());
        assert_eq!(frame.timestamp_ms(), 120);
    }

    #[test]
    fn test_frame_clone_shares_points() -> Result<(), FrameError> {
        let frame = Frame::new(FrameSize::new(1, 1), vec![[1.0, 2.0, 3.0, 0.0]], 0)?;
        let copy = frame.clone();
        assert!(frame.shares_points_with(&copy));

        let invalid = copy.into_invalid();
        assert!(!invalid.is_valid());
        assert!(frame.is_valid());
        assert!(frame.shares_points_with(&invalid));
        Ok(())
    }

    #[test]
    fn test_frame_size() {
        let size: FrameSize = [0, 10].into();
        assert!(size.is_empty());
        assert_eq!(size.to_string(), "FrameSize { width: 0, height: 10 }");
    }
}
