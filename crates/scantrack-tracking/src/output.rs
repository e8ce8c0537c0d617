use scantrack_core::{Frame, RigidTransform};

/// A frame annotated with the transform computed by a registration worker.
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    /// The registered frame.
    pub frame: Frame,
    /// Transform aligning the previously submitted frame onto this one.
    pub transform: RigidTransform,
}

impl RegistrationResult {
    /// A result that leaves the frame where it is.
    pub fn identity(frame: Frame) -> Self {
        Self {
            frame,
            transform: RigidTransform::IDENTITY,
        }
    }
}

/// A registered frame released in chronological order.
#[derive(Debug, Clone)]
pub struct TrackedFrame {
    /// The registered frame.
    pub frame: Frame,
    /// Transform aligning the previous tracked frame onto this one.
    pub transform: RigidTransform,
    /// Transform mapping this frame into the coordinates of the first tracked frame.
    pub pose: RigidTransform,
}

/// What the controller hands to the downstream consumer.
#[derive(Debug, Clone)]
pub enum TrackingOutput {
    /// A frame that went through registration.
    Tracked(TrackedFrame),
    /// A frame forwarded untouched, e.g. an end of stream marker.
    PassThrough(Frame),
}

impl TrackingOutput {
    /// The frame carried by this output.
    pub fn frame(&self) -> &Frame {
        match self {
            TrackingOutput::Tracked(tracked) => &tracked.frame,
            TrackingOutput::PassThrough(frame) => frame,
        }
    }

    /// Take the frame out of this output.
    pub fn into_frame(self) -> Frame {
        match self {
            TrackingOutput::Tracked(tracked) => tracked.frame,
            TrackingOutput::PassThrough(frame) => frame,
        }
    }

    /// Timestamp of the carried frame.
    pub fn timestamp_ms(&self) -> u64 {
        self.frame().timestamp_ms()
    }

    /// Whether the frame went through registration.
    pub fn is_tracked(&self) -> bool {
        matches!(self, TrackingOutput::Tracked(_))
    }

    /// The registration data, if the frame was registered.
    pub fn tracked(&self) -> Option<&TrackedFrame> {
        match self {
            TrackingOutput::Tracked(tracked) => Some(tracked),
            TrackingOutput::PassThrough(_) => None,
        }
    }
}

/// Downstream consumer of the controller output.
///
/// Outputs may arrive in bursts when several results become releasable at
/// once. Only tracked frames are chronological; a pass-through frame is
/// emitted as soon as it is submitted, so an end of stream marker does not
/// mean every tracked frame has been received. Implemented for every
/// `FnMut(TrackingOutput)` closure.
pub trait FrameSink {
    /// Receive the next output.
    fn emit(&mut self, output: TrackingOutput);
}

impl<F: FnMut(TrackingOutput)> FrameSink for F {
    fn emit(&mut self, output: TrackingOutput) {
        self(output)
    }
}
