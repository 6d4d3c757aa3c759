//! One decode call, from probe to host pixels.
//!
//! A [`Session`] owns every handle it acquires in a [`ResourceSet`]. Each
//! step returns early on failure and the session releases everything it
//! holds before the error reaches the caller. Dropping a session releases
//! as well, so no exit path leaks a handle.

use std::io::Cursor;

use crate::color::{self, ColorManagement};
use crate::convert::{Conversion, DecodedImage, OutputPixelBuffer};
use crate::engine::{CapacityInfo, Engine, InputStream};
use crate::error::{DecodeError, EngineError, Result};
use crate::format::{self, CodecFormat};
use crate::host::{Field, HostAccess, Level};
use crate::params::{self, Selection};
use crate::resources::{ResourceKind, ResourceSet};
use crate::segments::SegmentReader;
use crate::InputDescriptor;

fn codec_init(e: EngineError) -> DecodeError {
    DecodeError::CodecInit(e.to_string())
}

fn decode_failure(e: EngineError) -> DecodeError {
    DecodeError::Decode(e.to_string())
}

fn missing(what: &str) -> DecodeError {
    DecodeError::Decode(format!("session holds no {what}"))
}

pub struct Session<'a, E: Engine> {
    engine: &'a mut E,
    format: CodecFormat,
    resources: ResourceSet<'a, E>,
    capacity: Option<CapacityInfo>,
    /// Engine messages not yet delivered to a host.
    pending: Vec<(Level, String)>,
}

impl<'a, E: Engine> Session<'a, E> {
    /// Probes the input and brings the engine up to the point where the
    /// header can be read.
    pub fn open(engine: &'a mut E, input: &InputDescriptor<'a>) -> Result<Self> {
        let format = format::probe(input)?;
        tracing::debug!("opening {} session", format.name());

        let mut session = Session {
            engine,
            format,
            resources: ResourceSet::new(),
            capacity: None,
            pending: Vec::new(),
        };
        match session.acquire(input) {
            Ok(()) => Ok(session),
            Err(e) => {
                session.release();
                Err(e)
            }
        }
    }

    fn acquire(&mut self, input: &InputDescriptor<'a>) -> Result<()> {
        let stream = match input {
            InputDescriptor::Buffer(bytes) => {
                let bytes: &'a [u8] = *bytes;
                self.resources.pin_input(bytes);
                InputStream::new(Cursor::new(bytes), bytes.len() as u64)
            }
            InputDescriptor::File { path, segments } => {
                let file = format::open_input(path)?;
                match segments {
                    Some(list) => {
                        let segments = list.validate()?;
                        self.resources.record_segments(segments.clone());
                        let reader = SegmentReader::new(file, segments);
                        let len = reader.len();
                        InputStream::new(reader, len)
                    }
                    None => {
                        let len = file
                            .metadata()
                            .map_err(|e| DecodeError::InvalidInput(format!("{}: {e}", path.display())))?
                            .len();
                        InputStream::new(file, len)
                    }
                }
            }
        };

        let stream = self.engine.create_stream(stream);
        self.collect_messages();
        self.resources.set_stream(stream.map_err(codec_init)?);

        let codec = self.engine.create_codec(self.format);
        self.collect_messages();
        self.resources.set_codec(codec.map_err(codec_init)?);

        let codec = self.resources.codec.as_mut().ok_or_else(|| missing("codec"))?;
        let setup = self.engine.setup_decoder(codec);
        self.collect_messages();
        setup.map_err(codec_init)
    }

    pub fn format(&self) -> CodecFormat {
        self.format
    }

    pub fn capacity(&self) -> Option<CapacityInfo> {
        self.capacity
    }

    pub fn resources(&self) -> &ResourceSet<'a, E> {
        &self.resources
    }

    /// Parses the main header and reports the codestream limits.
    pub fn read_header(&mut self) -> Result<CapacityInfo> {
        let result = self.read_header_inner();
        if result.is_err() {
            self.release();
        }
        result
    }

    fn read_header_inner(&mut self) -> Result<CapacityInfo> {
        if let Some(capacity) = self.capacity {
            return Ok(capacity);
        }
        let Session {
            engine, resources, ..
        } = self;
        let codec = resources.codec.as_mut().ok_or_else(|| missing("codec"))?;
        let stream = resources.stream.as_mut().ok_or_else(|| missing("stream"))?;
        let image = engine.read_header(codec, stream);
        self.collect_messages();
        self.resources.set_image(image.map_err(codec_init)?);

        let codec = self.resources.codec.as_mut().ok_or_else(|| missing("codec"))?;
        let capacity = self.engine.capacity(codec);
        self.collect_messages();
        let capacity = capacity.map_err(codec_init)?;
        tracing::debug!(
            tiles_x = capacity.tile_count_x,
            tiles_y = capacity.tile_count_y,
            resolutions = capacity.max_resolution_levels,
            "header parsed"
        );
        self.capacity = Some(capacity);
        Ok(capacity)
    }

    /// Resolves the host's request, decodes and exports the planes. The
    /// codec and stream are released once the planes are out.
    ///
    /// After a host boundary failure the host is not called again; engine
    /// messages still pending are only logged.
    pub fn decode<H: HostAccess + ?Sized>(&mut self, host: &mut H) -> Result<DecodedImage> {
        let result = self.decode_inner(host);
        if result.is_err() {
            self.release();
        }
        match &result {
            Err(e) if e.is_host_boundary() => {
                self.collect_messages();
                self.pending.clear();
            }
            _ => self.flush_messages(host),
        }
        result
    }

    fn decode_inner<H: HostAccess + ?Sized>(&mut self, host: &mut H) -> Result<DecodedImage> {
        let capacity = self.read_header_inner()?;
        self.flush_messages(host);

        let request = params::read_request(host, &capacity)?;
        let resolution = request.resolve(&capacity)?;
        for warning in &resolution.warnings {
            tracing::warn!("{warning}");
            host.notify(Level::Warning, warning);
        }

        let Session {
            engine, resources, ..
        } = self;
        let codec = resources.codec.as_mut().ok_or_else(|| missing("codec"))?;
        let stream = resources.stream.as_mut().ok_or_else(|| missing("stream"))?;
        let image = resources.image.as_mut().ok_or_else(|| missing("image"))?;

        if let Some(factor) = resolution.reduction {
            let step = engine.set_resolution_factor(codec, factor);
            Self::forward(engine, host);
            step.map_err(decode_failure)?;
        }

        match resolution.selection {
            Selection::Tile(tile) => {
                tracing::debug!("decoding tile {tile}");
                let step = engine.decoded_tile(codec, stream, image, tile);
                Self::forward(engine, host);
                step.map_err(decode_failure)?;
            }
            Selection::Area(region) => {
                tracing::debug!(?region, "decoding area");
                let step = engine.set_decode_area(codec, image, region);
                Self::forward(engine, host);
                step.map_err(decode_failure)?;
                let step = engine.decode(codec, stream, image);
                Self::forward(engine, host);
                step.map_err(decode_failure)?;
            }
        }

        let step = engine.end_decompress(codec, stream);
        Self::forward(engine, host);
        step.map_err(decode_failure)?;

        let exported = engine.export_image(image);
        Self::forward(engine, host);
        let exported = exported.map_err(decode_failure)?;

        self.resources.release_kind(self.engine, ResourceKind::Codec);
        self.resources.release_kind(self.engine, ResourceKind::Stream);
        Ok(exported)
    }

    /// Normalizes color, publishes the output geometry to the host and
    /// packs the pixels into the output slot.
    pub fn convert<H: HostAccess + ?Sized>(
        &mut self,
        host: &mut H,
        cms: &dyn ColorManagement,
        mut image: DecodedImage,
    ) -> Result<()> {
        let result = self.convert_inner(host, cms, &mut image);
        if result.is_err() {
            self.release();
        }
        result
    }

    fn convert_inner<H: HostAccess + ?Sized>(
        &mut self,
        host: &mut H,
        cms: &dyn ColorManagement,
        image: &mut DecodedImage,
    ) -> Result<()> {
        let report = color::apply(image, cms);
        for warning in report.warnings {
            tracing::warn!("{warning}");
            host.notify(Level::Warning, &warning.to_string());
        }

        let plan = Conversion::plan(image)?;
        let precision = image.components[0].precision();
        host.set(Field::Width, plan.width as i32)?;
        host.set(Field::Height, plan.height as i32)?;
        host.set(Field::BitsPerSample, precision as i32)?;

        for note in plan.fallback.iter().chain(plan.alpha_dropped.iter()) {
            tracing::warn!("{note}");
            host.notify(Level::Warning, note);
        }
        host.prepare_output(plan.format, plan.width, plan.height)?;

        let output = plan.run(image);
        tracing::debug!(
            format = ?plan.format,
            width = plan.width,
            height = plan.height,
            "pixels converted"
        );
        self.resources.set_output(output);
        Ok(())
    }

    /// Transfers the converted pixels to the caller.
    pub fn take_output(&mut self) -> Option<OutputPixelBuffer> {
        self.resources.take_output()
    }

    /// Releases everything still held. Safe to call any number of times.
    pub fn release(&mut self) -> Vec<ResourceKind> {
        let released = self.resources.release(self.engine);
        self.collect_messages();
        released
    }

    fn collect_messages(&mut self) {
        for (level, message) in self.engine.drain_messages() {
            log_engine_message(level, &message);
            self.pending.push((level, message));
        }
    }

    fn flush_messages<H: HostAccess + ?Sized>(&mut self, host: &mut H) {
        self.collect_messages();
        for (level, message) in self.pending.drain(..) {
            host.notify(level, &message);
        }
    }

    fn forward<H: HostAccess + ?Sized>(engine: &mut E, host: &mut H) {
        for (level, message) in engine.drain_messages() {
            log_engine_message(level, &message);
            host.notify(level, &message);
        }
    }
}

impl<E: Engine> Drop for Session<'_, E> {
    fn drop(&mut self) {
        let released = self.resources.release(self.engine);
        if !released.is_empty() {
            tracing::trace!(?released, "session dropped with live resources");
        }
    }
}

fn log_engine_message(level: Level, message: &str) {
    let message = message.trim_end();
    match level {
        Level::Info => tracing::debug!(target: "j2kdecode::engine", "{message}"),
        Level::Warning => tracing::warn!(target: "j2kdecode::engine", "{message}"),
        Level::Error => tracing::error!(target: "j2kdecode::engine", "{message}"),
    }
}

/// Decodes `input` with `engine` and hands the pixels to the caller.
///
/// Host fields are read and written through `host`; diagnostics go to
/// [`HostAccess::notify`]. Every resource is released before this returns,
/// on success and on failure.
pub fn decode_with<E, H>(
    engine: &mut E,
    input: &InputDescriptor<'_>,
    host: &mut H,
    cms: &dyn ColorManagement,
) -> Result<OutputPixelBuffer>
where
    E: Engine,
    H: HostAccess + ?Sized,
{
    let mut session = Session::open(engine, input)?;
    let image = session.decode(host)?;
    session.convert(host, cms, image)?;
    let output = session
        .take_output()
        .ok_or_else(|| DecodeError::Decode("no output produced".into()))?;
    let released = session.release();
    tracing::trace!(?released, "decode finished");
    Ok(output)
}

/// Opens `input` and returns its codestream limits without decoding pixels.
pub fn inspect<E: Engine>(engine: &mut E, input: &InputDescriptor<'_>) -> Result<(CodecFormat, CapacityInfo)> {
    let mut session = Session::open(engine, input)?;
    let capacity = session.read_header()?;
    Ok((session.format(), capacity))
}
