//! [`Engine`] backed by the OpenJPEG library.

use std::ffi::{CStr, c_char, c_void};
use std::io::{Read, Seek, SeekFrom};
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::Mutex;

use openjpeg_sys as sys;

use crate::convert::{ColorSpace, ComponentPlane, DecodedImage};
use crate::engine::{CapacityInfo, Engine, InputStream, ReadSeek};
use crate::error::EngineError;
use crate::format::CodecFormat;
use crate::host::Level;
use crate::params::Region;

/// Chunk size used by OpenJPEG when pulling from the stream.
const STREAM_CHUNK: usize = 1 << 20;

impl From<CodecFormat> for sys::CODEC_FORMAT {
    fn from(format: CodecFormat) -> Self {
        match format {
            CodecFormat::J2k => sys::CODEC_FORMAT::OPJ_CODEC_J2K,
            CodecFormat::Jp2 => sys::CODEC_FORMAT::OPJ_CODEC_JP2,
            CodecFormat::Jpt => sys::CODEC_FORMAT::OPJ_CODEC_JPT,
        }
    }
}

impl From<sys::COLOR_SPACE> for ColorSpace {
    fn from(color: sys::COLOR_SPACE) -> Self {
        use sys::COLOR_SPACE::*;
        match color {
            OPJ_CLRSPC_UNKNOWN => ColorSpace::Unknown,
            OPJ_CLRSPC_UNSPECIFIED => ColorSpace::Unspecified,
            OPJ_CLRSPC_SRGB => ColorSpace::Srgb,
            OPJ_CLRSPC_GRAY => ColorSpace::Gray,
            OPJ_CLRSPC_SYCC => ColorSpace::Sycc,
            OPJ_CLRSPC_EYCC => ColorSpace::Eycc,
            OPJ_CLRSPC_CMYK => ColorSpace::Cmyk,
        }
    }
}

type MessageSink = Mutex<Vec<(Level, String)>>;

fn push_message(sink: *mut c_void, level: Level, msg: *const c_char) {
    if sink.is_null() || msg.is_null() {
        return;
    }
    // SAFETY: sink is the boxed queue owned by the engine, msg a C string
    // valid for the duration of the callback.
    let (sink, text) = unsafe {
        (
            &*(sink as *const MessageSink),
            CStr::from_ptr(msg).to_string_lossy().into_owned(),
        )
    };
    if let Ok(mut queue) = sink.lock() {
        queue.push((level, text));
    }
}

unsafe extern "C" fn info_handler(msg: *const c_char, sink: *mut c_void) {
    push_message(sink, Level::Info, msg);
}

unsafe extern "C" fn warning_handler(msg: *const c_char, sink: *mut c_void) {
    push_message(sink, Level::Warning, msg);
}

unsafe extern "C" fn error_handler(msg: *const c_char, sink: *mut c_void) {
    push_message(sink, Level::Error, msg);
}

type Reader = Box<dyn ReadSeek>;

unsafe extern "C" fn stream_read(buffer: *mut c_void, nb_bytes: usize, user: *mut c_void) -> usize {
    if buffer.is_null() || user.is_null() {
        return usize::MAX;
    }
    // SAFETY: user is the boxed reader installed in create_stream and
    // buffer is writable for nb_bytes.
    let (reader, buf) = unsafe {
        (
            &mut *(user as *mut Reader),
            std::slice::from_raw_parts_mut(buffer as *mut u8, nb_bytes),
        )
    };
    match reader.read(buf) {
        Ok(0) | Err(_) => usize::MAX,
        Ok(n) => n,
    }
}

unsafe extern "C" fn stream_skip(nb_bytes: i64, user: *mut c_void) -> i64 {
    // SAFETY: see stream_read.
    let reader = unsafe { &mut *(user as *mut Reader) };
    match reader.seek(SeekFrom::Current(nb_bytes)) {
        Ok(_) => nb_bytes,
        Err(_) => -1,
    }
}

unsafe extern "C" fn stream_seek(offset: i64, user: *mut c_void) -> i32 {
    // SAFETY: see stream_read.
    let reader = unsafe { &mut *(user as *mut Reader) };
    match u64::try_from(offset).map(|o| reader.seek(SeekFrom::Start(o))) {
        Ok(Ok(_)) => 1,
        _ => 0,
    }
}

unsafe extern "C" fn stream_free(user: *mut c_void) {
    if !user.is_null() {
        // SAFETY: user came from Box::into_raw in create_stream.
        drop(unsafe { Box::from_raw(user as *mut Reader) });
    }
}

pub struct OpjStream<'a> {
    ptr: NonNull<sys::opj_stream_t>,
    _input: PhantomData<&'a mut ()>,
}

pub struct OpjCodec(NonNull<sys::opj_codec_t>);

pub struct OpjImage(NonNull<sys::opj_image_t>);

/// OpenJPEG decode engine.
///
/// Engine messages are queued and handed out through
/// [`Engine::drain_messages`].
pub struct OpenJpeg {
    messages: Box<MessageSink>,
}

impl Default for OpenJpeg {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenJpeg {
    pub fn new() -> Self {
        Self {
            messages: Box::new(Mutex::new(Vec::new())),
        }
    }

    fn sink(&self) -> *mut c_void {
        &*self.messages as *const MessageSink as *mut c_void
    }
}

fn check(ok: i32, operation: &'static str) -> Result<(), EngineError> {
    if ok != 0 {
        Ok(())
    } else {
        Err(EngineError::new(operation))
    }
}

impl Engine for OpenJpeg {
    type Stream<'a> = OpjStream<'a>;
    type Codec = OpjCodec;
    type Image = OpjImage;

    fn create_stream<'a>(&mut self, input: InputStream<'a>) -> Result<OpjStream<'a>, EngineError> {
        // SAFETY: plain constructor.
        let ptr = NonNull::new(unsafe { sys::opj_stream_create(STREAM_CHUNK, 1) })
            .ok_or_else(|| EngineError::new("opj_stream_create"))?;

        let reader: Box<dyn ReadSeek + 'a> = input.reader;
        // SAFETY: only the lifetime bound changes. OpjStream<'a> keeps the
        // borrow alive and destroying the stream drops the reader.
        let reader: Reader = unsafe { std::mem::transmute::<Box<dyn ReadSeek + 'a>, Reader>(reader) };
        let user = Box::into_raw(Box::new(reader)) as *mut c_void;

        // SAFETY: ptr is a fresh stream; user is freed by stream_free.
        unsafe {
            sys::opj_stream_set_read_function(ptr.as_ptr(), Some(stream_read));
            sys::opj_stream_set_skip_function(ptr.as_ptr(), Some(stream_skip));
            sys::opj_stream_set_seek_function(ptr.as_ptr(), Some(stream_seek));
            sys::opj_stream_set_user_data(ptr.as_ptr(), user, Some(stream_free));
            sys::opj_stream_set_user_data_length(ptr.as_ptr(), input.len);
        }
        Ok(OpjStream {
            ptr,
            _input: PhantomData,
        })
    }

    fn create_codec(&mut self, format: CodecFormat) -> Result<OpjCodec, EngineError> {
        // SAFETY: plain constructor.
        let codec = NonNull::new(unsafe { sys::opj_create_decompress(format.into()) })
            .ok_or_else(|| EngineError::with_detail("opj_create_decompress", format.name()))?;
        let sink = self.sink();
        // SAFETY: the sink is boxed and lives as long as the engine, which
        // outlives every codec it creates.
        unsafe {
            sys::opj_set_info_handler(codec.as_ptr(), Some(info_handler), sink);
            sys::opj_set_warning_handler(codec.as_ptr(), Some(warning_handler), sink);
            sys::opj_set_error_handler(codec.as_ptr(), Some(error_handler), sink);
        }
        Ok(OpjCodec(codec))
    }

    fn setup_decoder(&mut self, codec: &mut OpjCodec) -> Result<(), EngineError> {
        // SAFETY: zeroed parameters are immediately overwritten with defaults.
        let ok = unsafe {
            let mut params = std::mem::zeroed::<sys::opj_dparameters_t>();
            sys::opj_set_default_decoder_parameters(&mut params);
            sys::opj_setup_decoder(codec.0.as_ptr(), &mut params)
        };
        check(ok, "opj_setup_decoder")
    }

    fn read_header(&mut self, codec: &mut OpjCodec, stream: &mut OpjStream<'_>) -> Result<OpjImage, EngineError> {
        let mut image: *mut sys::opj_image_t = ptr::null_mut();
        // SAFETY: codec and stream are live handles.
        let ok = unsafe { sys::opj_read_header(stream.ptr.as_ptr(), codec.0.as_ptr(), &mut image) };
        match (check(ok, "opj_read_header"), NonNull::new(image)) {
            (Ok(()), Some(image)) => Ok(OpjImage(image)),
            (result, image) => {
                if let Some(image) = image {
                    // SAFETY: image was allocated by opj_read_header.
                    unsafe { sys::opj_image_destroy(image.as_ptr()) };
                }
                Err(result.err().unwrap_or_else(|| EngineError::with_detail("opj_read_header", "no image")))
            }
        }
    }

    fn capacity(&mut self, codec: &mut OpjCodec) -> Result<CapacityInfo, EngineError> {
        // SAFETY: codec has read its header; the info block is destroyed
        // before returning.
        unsafe {
            let mut info = sys::opj_get_cstr_info(codec.0.as_ptr());
            if info.is_null() {
                return Err(EngineError::new("opj_get_cstr_info"));
            }
            let tccp = (*info).m_default_tile_info.tccp_info;
            let capacity = CapacityInfo {
                tile_count_x: (*info).tw,
                tile_count_y: (*info).th,
                max_resolution_levels: if tccp.is_null() { 0 } else { (*tccp).numresolutions },
            };
            sys::opj_destroy_cstr_info(&mut info);
            Ok(capacity)
        }
    }

    fn set_resolution_factor(&mut self, codec: &mut OpjCodec, factor: u32) -> Result<(), EngineError> {
        // SAFETY: live codec.
        let ok = unsafe { sys::opj_set_decoded_resolution_factor(codec.0.as_ptr(), factor) };
        check(ok, "opj_set_decoded_resolution_factor")
    }

    fn set_decode_area(&mut self, codec: &mut OpjCodec, image: &mut OpjImage, region: Region) -> Result<(), EngineError> {
        // SAFETY: live codec and header image.
        let ok = unsafe {
            sys::opj_set_decode_area(
                codec.0.as_ptr(),
                image.0.as_ptr(),
                region.x0,
                region.y0,
                region.x1,
                region.y1,
            )
        };
        check(ok, "opj_set_decode_area")
    }

    fn decode(&mut self, codec: &mut OpjCodec, stream: &mut OpjStream<'_>, image: &mut OpjImage) -> Result<(), EngineError> {
        // SAFETY: live handles.
        let ok = unsafe { sys::opj_decode(codec.0.as_ptr(), stream.ptr.as_ptr(), image.0.as_ptr()) };
        check(ok, "opj_decode")
    }

    fn decoded_tile(
        &mut self,
        codec: &mut OpjCodec,
        stream: &mut OpjStream<'_>,
        image: &mut OpjImage,
        tile: u32,
    ) -> Result<(), EngineError> {
        // SAFETY: live handles.
        let ok = unsafe {
            sys::opj_get_decoded_tile(codec.0.as_ptr(), stream.ptr.as_ptr(), image.0.as_ptr(), tile)
        };
        check(ok, "opj_get_decoded_tile")
    }

    fn end_decompress(&mut self, codec: &mut OpjCodec, stream: &mut OpjStream<'_>) -> Result<(), EngineError> {
        // SAFETY: live handles.
        let ok = unsafe { sys::opj_end_decompress(codec.0.as_ptr(), stream.ptr.as_ptr()) };
        check(ok, "opj_end_decompress")
    }

    fn export_image(&mut self, image: &OpjImage) -> Result<DecodedImage, EngineError> {
        // SAFETY: image is a decoded OpenJPEG image; every component's data
        // holds w * h samples once decoding succeeded.
        let raw = unsafe { image.0.as_ref() };
        if raw.comps.is_null() || raw.numcomps == 0 {
            return Err(EngineError::with_detail("export", "image has no components"));
        }
        let comps = unsafe { std::slice::from_raw_parts(raw.comps, raw.numcomps as usize) };

        let mut planes = Vec::with_capacity(comps.len());
        for (i, comp) in comps.iter().enumerate() {
            if comp.data.is_null() {
                return Err(EngineError::with_detail("export", format!("component {i} has no data")));
            }
            let count = comp.w as usize * comp.h as usize;
            let samples = unsafe { std::slice::from_raw_parts(comp.data, count) }.to_vec();
            let plane = ComponentPlane::new(comp.w, comp.h, comp.prec, comp.sgnd != 0, samples)
                .map_err(|e| EngineError::with_detail("export", e.to_string()))?
                .with_subsampling(comp.dx, comp.dy);
            planes.push(plane);
        }

        let mut decoded = DecodedImage::new(planes, raw.color_space.into());
        if !raw.icc_profile_buf.is_null() && raw.icc_profile_len > 0 {
            let profile = unsafe { std::slice::from_raw_parts(raw.icc_profile_buf, raw.icc_profile_len as usize) };
            decoded = decoded.with_icc_profile(profile.to_vec());
        }
        Ok(decoded)
    }

    fn destroy_codec(&mut self, codec: OpjCodec) {
        // SAFETY: codec is consumed, destroyed exactly once.
        unsafe { sys::opj_destroy_codec(codec.0.as_ptr()) };
    }

    fn destroy_stream(&mut self, stream: OpjStream<'_>) {
        // SAFETY: stream is consumed; this also frees the reader.
        unsafe { sys::opj_stream_destroy(stream.ptr.as_ptr()) };
    }

    fn destroy_image(&mut self, image: OpjImage) {
        // SAFETY: image is consumed, destroyed exactly once.
        unsafe { sys::opj_image_destroy(image.0.as_ptr()) };
    }

    fn drain_messages(&mut self) -> Vec<(Level, String)> {
        self.messages
            .lock()
            .map(|mut queue| std::mem::take(&mut *queue))
            .unwrap_or_default()
    }
}
