//! Handles held by one decode call.

use std::fmt;

use crate::convert::OutputPixelBuffer;
use crate::engine::Engine;
use crate::segments::Segment;

/// Kinds of resource a session can hold, listed in release order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Codec,
    Stream,
    Image,
    InputPin,
    OutputBuffer,
    SegmentTable,
}

impl ResourceKind {
    pub const RELEASE_ORDER: [ResourceKind; 6] = [
        ResourceKind::Codec,
        ResourceKind::Stream,
        ResourceKind::Image,
        ResourceKind::InputPin,
        ResourceKind::OutputBuffer,
        ResourceKind::SegmentTable,
    ];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Codec => "codec",
            ResourceKind::Stream => "stream",
            ResourceKind::Image => "image",
            ResourceKind::InputPin => "input pin",
            ResourceKind::OutputBuffer => "output buffer",
            ResourceKind::SegmentTable => "segment table",
        };
        f.write_str(name)
    }
}

/// Typed slots for every live handle, plus the order they were acquired in.
///
/// A slot is filled only once its acquisition succeeded, so releasing never
/// touches a handle that does not exist.
pub struct ResourceSet<'a, E: Engine> {
    pub(crate) codec: Option<E::Codec>,
    pub(crate) stream: Option<E::Stream<'a>>,
    pub(crate) image: Option<E::Image>,
    pub(crate) input: Option<&'a [u8]>,
    pub(crate) output: Option<OutputPixelBuffer>,
    pub(crate) segments: Option<Vec<Segment>>,
    acquired: Vec<ResourceKind>,
}

impl<'a, E: Engine> Default for ResourceSet<'a, E> {
    fn default() -> Self {
        Self {
            codec: None,
            stream: None,
            image: None,
            input: None,
            output: None,
            segments: None,
            acquired: Vec::new(),
        }
    }
}

impl<'a, E: Engine> ResourceSet<'a, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pin_input(&mut self, bytes: &'a [u8]) {
        self.input = Some(bytes);
        self.log(ResourceKind::InputPin);
    }

    pub fn record_segments(&mut self, segments: Vec<Segment>) {
        self.segments = Some(segments);
        self.log(ResourceKind::SegmentTable);
    }

    pub fn set_stream(&mut self, stream: E::Stream<'a>) {
        self.stream = Some(stream);
        self.log(ResourceKind::Stream);
    }

    pub fn set_codec(&mut self, codec: E::Codec) {
        self.codec = Some(codec);
        self.log(ResourceKind::Codec);
    }

    pub fn set_image(&mut self, image: E::Image) {
        self.image = Some(image);
        self.log(ResourceKind::Image);
    }

    pub fn set_output(&mut self, output: OutputPixelBuffer) {
        self.output = Some(output);
        self.log(ResourceKind::OutputBuffer);
    }

    /// Hands the output buffer over to the caller.
    pub fn take_output(&mut self) -> Option<OutputPixelBuffer> {
        let output = self.output.take();
        if output.is_some() {
            self.acquired.retain(|&k| k != ResourceKind::OutputBuffer);
        }
        output
    }

    /// Kinds currently held, in acquisition order.
    pub fn live(&self) -> &[ResourceKind] {
        &self.acquired
    }

    pub fn is_empty(&self) -> bool {
        self.acquired.is_empty()
    }

    fn log(&mut self, kind: ResourceKind) {
        tracing::trace!("acquired {kind}");
        if !self.acquired.contains(&kind) {
            self.acquired.push(kind);
        }
    }

    /// Releases one kind if held. Returns whether anything was released.
    pub fn release_kind(&mut self, engine: &mut E, kind: ResourceKind) -> bool {
        let released = match kind {
            ResourceKind::Codec => match self.codec.take() {
                Some(codec) => {
                    engine.destroy_codec(codec);
                    true
                }
                None => false,
            },
            ResourceKind::Stream => match self.stream.take() {
                Some(stream) => {
                    engine.destroy_stream(stream);
                    true
                }
                None => false,
            },
            ResourceKind::Image => match self.image.take() {
                Some(image) => {
                    engine.destroy_image(image);
                    true
                }
                None => false,
            },
            ResourceKind::InputPin => self.input.take().is_some(),
            ResourceKind::OutputBuffer => self.output.take().is_some(),
            ResourceKind::SegmentTable => self.segments.take().is_some(),
        };
        if released {
            self.acquired.retain(|&k| k != kind);
            tracing::trace!("released {kind}");
        }
        released
    }

    /// Releases everything still held, in [`ResourceKind::RELEASE_ORDER`].
    /// A second call finds nothing to do.
    pub fn release(&mut self, engine: &mut E) -> Vec<ResourceKind> {
        ResourceKind::RELEASE_ORDER
            .into_iter()
            .filter(|&kind| self.release_kind(engine, kind))
            .collect()
    }
}
