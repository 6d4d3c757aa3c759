//! C Foreign Function Interface for j2kdecode-rs.
//!
//! Opaque decoder handles keep the caller's decode state (tile, reduction,
//! area and the published limits) between calls. Decoded pixels are handed
//! out in a [`J2kOutput`] whose buffer must be returned with
//! [`j2kdecode_output_free`].

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::path::PathBuf;
use std::ptr;

use crate::error::HostError;
use crate::host::{Field, HostAccess, HostState, Level};
use crate::{DecodeError, InputDescriptor, OutputPixelBuffer, SegmentList};

/// Returned by every call that fails.
pub const J2K_ERROR: c_int = -1;
pub const J2K_OK: c_int = 0;

/// Opaque decoder handle.
#[repr(C)]
pub struct J2kDecoder {
    _private: [u8; 0],
}

/// Decoded pixels.
#[repr(C)]
pub struct J2kOutput {
    /// 0 = 8-bit gray, 1 = 16-bit gray, 2 = packed ARGB.
    pub format: c_int,
    pub width: u32,
    pub height: u32,
    pub bits_per_sample: u32,
    /// Native-endian samples, `len` bytes.
    pub data: *mut u8,
    pub len: usize,
}

/// Diagnostic callback: level 0 = info, 1 = warning, 2 = error.
pub type J2kLogger = Option<unsafe extern "C" fn(level: c_int, message: *const c_char, user: *mut c_void)>;

struct DecoderState {
    host: HostState,
    logger: J2kLogger,
    user: *mut c_void,
}

impl HostAccess for DecoderState {
    fn get(&mut self, field: Field) -> Result<i32, HostError> {
        self.host.get(field)
    }

    fn set(&mut self, field: Field, value: i32) -> Result<(), HostError> {
        self.host.set(field, value)
    }

    fn notify(&mut self, level: Level, message: &str) {
        let Some(logger) = self.logger else {
            return;
        };
        let code = match level {
            Level::Info => 0,
            Level::Warning => 1,
            Level::Error => 2,
        };
        if let Ok(text) = CString::new(message.replace('\0', " ")) {
            // SAFETY: the caller registered this callback with this user pointer.
            unsafe { logger(code, text.as_ptr(), self.user) };
        }
    }
}

fn state<'a>(decoder: *mut J2kDecoder) -> Option<&'a mut DecoderState> {
    // SAFETY: non-null handles come from j2kdecode_decoder_new.
    unsafe { (decoder as *mut DecoderState).as_mut() }
}

fn path_from(path: *const c_char) -> Option<PathBuf> {
    if path.is_null() {
        return None;
    }
    // SAFETY: caller passes a NUL-terminated string.
    let path = unsafe { CStr::from_ptr(path) };
    match path.to_str() {
        Ok(p) => Some(PathBuf::from(p)),
        Err(e) => {
            tracing::warn!("rejecting non UTF-8 path: {e}");
            None
        }
    }
}

fn slice_from<'a, T>(data: *const T, len: usize) -> &'a [T] {
    if data.is_null() || len == 0 {
        &[]
    } else {
        // SAFETY: caller guarantees data points to len elements.
        unsafe { std::slice::from_raw_parts(data, len) }
    }
}

/// Detect the format of a file: 0 = J2K, 1 = JP2, 2 = JPT, -1 = unknown.
///
/// # Safety
/// `path` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn j2kdecode_detect_file(path: *const c_char) -> c_int {
    match path_from(path) {
        Some(path) => crate::detect_format(&InputDescriptor::file(path)).map_or(J2K_ERROR, i32::from),
        None => J2K_ERROR,
    }
}

/// Detect the format of a memory buffer.
///
/// # Safety
/// `data` must be null or valid for `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn j2kdecode_detect_buffer(data: *const u8, len: usize) -> c_int {
    crate::format::detect_buffer(slice_from(data, len)).map_or(J2K_ERROR, i32::from)
}

/// Create a decoder with default state (no tile, no reduction, whole image).
#[unsafe(no_mangle)]
pub extern "C" fn j2kdecode_decoder_new() -> *mut J2kDecoder {
    let state = Box::new(DecoderState {
        host: HostState::new(),
        logger: None,
        user: ptr::null_mut(),
    });
    Box::into_raw(state) as *mut J2kDecoder
}

/// Free a decoder handle.
///
/// # Safety
/// `decoder` must be null or a handle from `j2kdecode_decoder_new`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn j2kdecode_decoder_free(decoder: *mut J2kDecoder) {
    if !decoder.is_null() {
        let _ = unsafe { Box::from_raw(decoder as *mut DecoderState) };
    }
}

/// Install a diagnostic callback. Pass a null callback to remove it.
///
/// # Safety
/// `decoder` must be valid; `user` is passed back untouched.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn j2kdecode_set_logger(decoder: *mut J2kDecoder, logger: J2kLogger, user: *mut c_void) -> c_int {
    let Some(state) = state(decoder) else {
        return J2K_ERROR;
    };
    state.logger = logger;
    state.user = user;
    J2K_OK
}

/// Select a single tile. A negative index selects none.
///
/// # Safety
/// `decoder` must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn j2kdecode_set_tile(decoder: *mut J2kDecoder, tile: c_int) -> c_int {
    let Some(state) = state(decoder) else {
        return J2K_ERROR;
    };
    state.host.set_tile(tile);
    J2K_OK
}

/// Select a resolution reduction.
///
/// # Safety
/// `decoder` must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn j2kdecode_set_reduction(decoder: *mut J2kDecoder, reduction: c_int) -> c_int {
    let Some(state) = state(decoder) else {
        return J2K_ERROR;
    };
    state.host.set_reduction(reduction);
    J2K_OK
}

/// Select a decode area. All zeros selects the whole image.
///
/// # Safety
/// `decoder` must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn j2kdecode_set_area(
    decoder: *mut J2kDecoder,
    x0: c_int,
    y0: c_int,
    x1: c_int,
    y1: c_int,
) -> c_int {
    let Some(state) = state(decoder) else {
        return J2K_ERROR;
    };
    state.host.set_area(x0, y0, x1, y1);
    J2K_OK
}

/// Tile count published by the last decode.
///
/// # Safety
/// `decoder` must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn j2kdecode_max_tiles(decoder: *mut J2kDecoder) -> c_int {
    state(decoder).map_or(J2K_ERROR, |s| s.host.max_tiles)
}

/// Resolution level count published by the last decode.
///
/// # Safety
/// `decoder` must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn j2kdecode_max_reduction(decoder: *mut J2kDecoder) -> c_int {
    state(decoder).map_or(J2K_ERROR, |s| s.host.max_reduction)
}

fn finish(state: &mut DecoderState, result: Result<OutputPixelBuffer, DecodeError>, out: *mut J2kOutput) -> c_int {
    let pixels = match result {
        Ok(pixels) => pixels,
        Err(e) => {
            tracing::error!("{e}");
            state.notify(Level::Error, &e.to_string());
            return e.code();
        }
    };
    let bytes = pixels.to_ne_bytes();
    let data = crate::alloc::copy_from_slice(&bytes);
    if data.is_null() {
        state.notify(Level::Error, "output allocation failed");
        return J2K_ERROR;
    }
    let output = J2kOutput {
        format: pixels.format().into(),
        width: state.host.width as u32,
        height: state.host.height as u32,
        bits_per_sample: state.host.bits_per_sample as u32,
        data,
        len: bytes.len(),
    };
    // SAFETY: out was checked non-null by the caller of finish.
    unsafe { out.write(output) };
    J2K_OK
}

/// Decode a file, optionally restricted to byte segments.
///
/// Pass null `positions` to read the whole file. On success `out` receives
/// a buffer that must be released with `j2kdecode_output_free`.
///
/// # Safety
/// `decoder` and `out` must be valid, `path` a NUL-terminated string,
/// `positions`/`lengths` valid for `n_positions`/`n_lengths` elements.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn j2kdecode_decode_file(
    decoder: *mut J2kDecoder,
    path: *const c_char,
    positions: *const i64,
    n_positions: usize,
    lengths: *const i64,
    n_lengths: usize,
    out: *mut J2kOutput,
) -> c_int {
    let Some(state) = state(decoder) else {
        return J2K_ERROR;
    };
    if out.is_null() {
        return J2K_ERROR;
    }
    let Some(path) = path_from(path) else {
        state.notify(Level::Error, "input file missing");
        return J2K_ERROR;
    };
    let input = if positions.is_null() && lengths.is_null() {
        InputDescriptor::file(path)
    } else {
        let segments = SegmentList::new(
            slice_from(positions, n_positions).to_vec(),
            slice_from(lengths, n_lengths).to_vec(),
        );
        InputDescriptor::segmented(path, segments)
    };
    let result = crate::decode(&input, state);
    finish(state, result, out)
}

/// Decode an in-memory codestream.
///
/// # Safety
/// `decoder` and `out` must be valid, `data` valid for `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn j2kdecode_decode_buffer(
    decoder: *mut J2kDecoder,
    data: *const u8,
    len: usize,
    out: *mut J2kOutput,
) -> c_int {
    let Some(state) = state(decoder) else {
        return J2K_ERROR;
    };
    if out.is_null() {
        return J2K_ERROR;
    }
    let input = InputDescriptor::buffer(slice_from(data, len));
    let result = crate::decode(&input, state);
    finish(state, result, out)
}

/// Release the pixel buffer of an output. The struct itself stays with the
/// caller and is reset to empty.
///
/// # Safety
/// `out` must be null or filled by a successful decode call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn j2kdecode_output_free(out: *mut J2kOutput) {
    // SAFETY: caller contract.
    let Some(out) = (unsafe { out.as_mut() }) else {
        return;
    };
    unsafe { crate::alloc::free(out.data) };
    out.data = ptr::null_mut();
    out.len = 0;
}
