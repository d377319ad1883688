//! Raw FFI bindings to the chatglm.cpp inference engine.
//!
//! The engine exposes a C++ API, so these bindings go through a small C
//! shim (`csrc/shim.cpp`) compiled by `build.rs`. All functions returning
//! `*mut c_char` hand ownership to the caller; release the string with
//! [`chatglm_string_free`], never with `free()` from another allocator.

#![allow(non_camel_case_types)]

use std::os::raw::{c_char, c_float, c_int, c_void};

/// Opaque handle to a loaded `chatglm::Pipeline`.
#[repr(C)]
pub struct chatglm_pipeline {
    _private: [u8; 0],
}

/// Generation knobs forwarded verbatim to the engine's `GenerationConfig`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct chatglm_params {
    pub max_length: c_int,
    pub max_context_length: c_int,
    pub do_sample: bool,
    pub top_k: c_int,
    pub top_p: c_float,
    pub temperature: c_float,
    pub repetition_penalty: c_float,
    pub num_threads: c_int,
}

/// Invoked by the shim with each batch of newly sampled token ids.
///
/// The first invocation of a generation run carries the prompt echo.
/// Returning `false` stops further invocations for the current run.
pub type chatglm_token_callback =
    Option<unsafe extern "C" fn(user_data: *mut c_void, tokens: *const c_int, n_tokens: usize) -> bool>;

unsafe extern "C" {
    //  Pipeline lifecycle

    pub fn chatglm_pipeline_load(path: *const c_char) -> *mut chatglm_pipeline;
    pub fn chatglm_pipeline_free(pipeline: *mut chatglm_pipeline);

    /// Model family name ("ChatGLM", "ChatGLM2", ...). Owned string.
    pub fn chatglm_model_type(pipeline: *const chatglm_pipeline) -> *mut c_char;

    //  Generation

    /// Multi-turn chat over role/content pairs. Returns the assistant
    /// reply as an owned string, or null on failure.
    pub fn chatglm_chat(
        pipeline: *mut chatglm_pipeline,
        roles: *const *const c_char,
        contents: *const *const c_char,
        n_messages: usize,
        params: *const chatglm_params,
        callback: chatglm_token_callback,
        user_data: *mut c_void,
    ) -> *mut c_char;

    /// Raw text completion. Returns the generated text as an owned
    /// string, or null on failure.
    pub fn chatglm_generate(
        pipeline: *mut chatglm_pipeline,
        prompt: *const c_char,
        params: *const chatglm_params,
        callback: chatglm_token_callback,
        user_data: *mut c_void,
    ) -> *mut c_char;

    //  Tokenizer

    /// Encode `text`; writes the id count to `n_out`. Owned array, free
    /// with [`chatglm_tokens_free`]. Null on failure.
    pub fn chatglm_tokenize(
        pipeline: *const chatglm_pipeline,
        text: *const c_char,
        max_length: c_int,
        n_out: *mut usize,
    ) -> *mut c_int;

    /// Decode a token id sequence to UTF-8 text. Owned string.
    pub fn chatglm_detokenize(
        pipeline: *const chatglm_pipeline,
        tokens: *const c_int,
        n_tokens: usize,
    ) -> *mut c_char;

    //  Memory

    pub fn chatglm_string_free(s: *mut c_char);
    pub fn chatglm_tokens_free(tokens: *mut c_int);
}
