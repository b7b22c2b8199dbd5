//! C FFI: bridges [`Narrator`] to iOS / Android callers.
//!
//! Functions are `#[no_mangle] extern "C"` so Swift / Kotlin can call them
//! through a thin bridging header without any Objective-C wrapper.
//!
//! ## Memory contract
//!
//! | Function                        | Caller frees with          |
//! |---------------------------------|----------------------------|
//! | [`echoverse_narrator_load`]     | [`echoverse_narrator_free`] |
//! | [`echoverse_voices`]            | [`echoverse_free_string`]  |
//! | [`echoverse_generate_speech`]   | [`echoverse_free_audio`]   |

use std::ffi::{c_char, CStr, CString};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, warn};

use crate::{
    config::{EmbeddingConfig, NarratorConfig},
    embeddings::{EmbeddingStore, LocalArchive, NoArchive, XvectorSource},
    model::{SpeechSynthesizer, SpeechT5Onnx, UnavailableModel},
    narrator::Narrator,
    voice::{VoiceId, VoiceProfile},
};

// ─────────────────────────────────────────────────────────────────────────────

/// Opaque handle to a loaded narrator.
pub struct EchoverseHandle {
    narrator: Narrator,
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Convert a non-null `*const c_char` to an owned `String` (lossy UTF-8).
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Heap-allocate an owned C string.  Returns null on interior nul bytes.
fn to_c_str(s: &str) -> *const c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => std::ptr::null(),
    }
}

fn load(model_dir: &Path, cache_path: PathBuf, archive: Option<PathBuf>) -> anyhow::Result<Narrator> {
    let config = NarratorConfig::default();
    let engine: Box<dyn SpeechSynthesizer> =
        match SpeechT5Onnx::from_dir(model_dir, config.max_tokens) {
            Ok(model) => Box::new(model),
            Err(e) => {
                let reason = format!("{e:#}");
                warn!(error = %reason, "model unavailable; narrating with fallback audio");
                Box::new(UnavailableModel::new(reason))
            }
        };

    let embeddings = EmbeddingConfig { cache_path, ..EmbeddingConfig::default() };
    let source: Box<dyn XvectorSource> = match archive {
        Some(path) => Box::new(LocalArchive(path)),
        None => Box::new(NoArchive),
    };
    let store = EmbeddingStore::initialize(&embeddings, source.as_ref())?;

    Ok(Narrator::new(engine, Arc::new(store), config))
}

// ─── Public API ──────────────────────────────────────────────────────────────

/// Load the narrator from disk.
///
/// @param model_dir     UTF-8 path of a directory holding `config.json`, the
///                      acoustic and vocoder graphs and `vocab.json`.
/// @param cache_path    UTF-8 path of the speaker-embedding cache (`.npz`).
///                      Created on first load if an archive is given.
/// @param xvector_zip   UTF-8 path of the x-vector archive, or `NULL`.
///                      Without cache or archive, random voices are used.
/// @return              Opaque handle, or `NULL` on failure (details are logged).
///                      A model that fails to load still yields a handle whose
///                      narrations are fallback tones.
///                      Free with [`echoverse_narrator_free`].
#[no_mangle]
pub unsafe extern "C" fn echoverse_narrator_load(
    model_dir: *const c_char,
    cache_path: *const c_char,
    xvector_zip: *const c_char,
) -> *mut EchoverseHandle {
    let (Some(dir), Some(cache)) = (
        unsafe { cstr_to_string(model_dir) },
        unsafe { cstr_to_string(cache_path) },
    ) else {
        error!("echoverse_narrator_load: null argument");
        return std::ptr::null_mut();
    };
    let archive = unsafe { cstr_to_string(xvector_zip) }.map(PathBuf::from);

    match load(Path::new(&dir), PathBuf::from(cache), archive) {
        Ok(narrator) => Box::into_raw(Box::new(EchoverseHandle { narrator })),
        Err(e) => {
            error!("echoverse_narrator_load failed: {e:#}");
            std::ptr::null_mut()
        }
    }
}

/// Return the voice catalogue as a JSON array of
/// `{"id","name","gender","accent","description"}` objects.
///
/// @return  Heap-allocated UTF-8 JSON string, or `NULL` on error.
///          Free with [`echoverse_free_string`].
#[no_mangle]
pub extern "C" fn echoverse_voices() -> *const c_char {
    match serde_json::to_string(VoiceProfile::all()) {
        Ok(json) => to_c_str(&json),
        Err(_) => std::ptr::null(),
    }
}

/// Narrate `text` and return WAV bytes (mono, 16-bit, 16 kHz).
///
/// Unknown voice ids use the default voice; `speed` is clamped to
/// `[0.5, 2.0]`. A model failure still yields audio (a fallback tone).
///
/// @param handle   Handle from [`echoverse_narrator_load`].
/// @param text     UTF-8 text to narrate.
/// @param voice_id Catalogue voice id.
/// @param speed    Speed multiplier (1.0 = normal).
/// @param out_len  Receives the byte length of the returned buffer.
/// @return         Buffer of `*out_len` bytes, or `NULL` on error.
///                 Free with [`echoverse_free_audio`].
#[no_mangle]
pub unsafe extern "C" fn echoverse_generate_speech(
    handle: *const EchoverseHandle,
    text: *const c_char,
    voice_id: u32,
    speed: f32,
    out_len: *mut usize,
) -> *mut u8 {
    if handle.is_null() || out_len.is_null() {
        return std::ptr::null_mut();
    }
    let Some(txt) = (unsafe { cstr_to_string(text) }) else {
        return std::ptr::null_mut();
    };

    let h = unsafe { &*handle };
    match h.narrator.generate_speech(&txt, VoiceId(voice_id), speed) {
        Ok(bytes) => {
            let boxed = bytes.into_boxed_slice();
            unsafe { *out_len = boxed.len() };
            Box::into_raw(boxed) as *mut u8
        }
        Err(e) => {
            error!("echoverse_generate_speech failed: {e}");
            unsafe { *out_len = 0 };
            std::ptr::null_mut()
        }
    }
}

/// Free a buffer returned by [`echoverse_generate_speech`].
#[no_mangle]
pub unsafe extern "C" fn echoverse_free_audio(data: *mut u8, len: usize) {
    if !data.is_null() {
        let slice = std::ptr::slice_from_raw_parts_mut(data, len);
        drop(unsafe { Box::from_raw(slice) });
    }
}

/// Free a string returned by [`echoverse_voices`].
#[no_mangle]
pub unsafe extern "C" fn echoverse_free_string(s: *const c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s as *mut c_char) });
    }
}

/// Destroy a narrator handle and release all resources.
#[no_mangle]
pub unsafe extern "C" fn echoverse_narrator_free(handle: *mut EchoverseHandle) {
    if !handle.is_null() {
        drop(unsafe { Box::from_raw(handle) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voices_json() {
        let ptr = echoverse_voices();
        assert!(!ptr.is_null());
        let json = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
        unsafe { echoverse_free_string(ptr) };

        let voices: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(voices.as_array().unwrap().len(), VoiceProfile::all().len());
        assert_eq!(voices[0]["name"], "Sarah");
        assert!(voices[0].get("xvector_index").is_none());
    }

    #[test]
    fn test_null_arguments() {
        let handle = unsafe {
            echoverse_narrator_load(std::ptr::null(), std::ptr::null(), std::ptr::null())
        };
        assert!(handle.is_null());

        let mut len = 7usize;
        let audio = unsafe {
            echoverse_generate_speech(std::ptr::null(), std::ptr::null(), 0, 1.0, &mut len)
        };
        assert!(audio.is_null());
        unsafe { echoverse_free_audio(std::ptr::null_mut(), 0) };
        unsafe { echoverse_narrator_free(std::ptr::null_mut()) };
    }

    #[test]
    fn test_missing_model_dir_still_narrates() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = CString::new("/nonexistent/model").unwrap();
        let cache = CString::new(tmp.path().join("cache.npz").to_str().unwrap()).unwrap();
        let handle =
            unsafe { echoverse_narrator_load(dir.as_ptr(), cache.as_ptr(), std::ptr::null()) };
        assert!(!handle.is_null());

        let text = CString::new("Hello").unwrap();
        let mut len = 0usize;
        let audio = unsafe { echoverse_generate_speech(handle, text.as_ptr(), 0, 1.0, &mut len) };
        assert!(!audio.is_null());
        let bytes = unsafe { std::slice::from_raw_parts(audio, len) }.to_vec();
        assert!(crate::wav::is_valid(&bytes));
        // Five characters of fallback tone.
        assert!((crate::wav::duration_secs(&bytes) - 0.5).abs() < 1e-6);

        unsafe { echoverse_free_audio(audio, len) };
        unsafe { echoverse_narrator_free(handle) };
    }
}
