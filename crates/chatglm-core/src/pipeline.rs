//! Safe RAII wrapper around the engine's `chatglm::Pipeline`.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::path::Path;
use std::ptr;

use tracing::{debug, info};

use crate::chat::ChatMessage;
use crate::config::GenerationConfig;
use crate::error::{ChatGlmError, Result};
use crate::stream::{StreamSink, TextStreamer, TokenDecoder};

/// Owns a `chatglm_pipeline` pointer and frees it on drop.
///
/// One pipeline holds one loaded model plus its tokenizer. Generation
/// takes `&mut self`; the tokenizer side is read-only and is also safe
/// to call from inside a streaming callback while generation runs.
pub struct Pipeline {
    ptr: *mut chatglm_sys::chatglm_pipeline,
}

// Safety: all mutating use of the pipeline goes through &mut self.
unsafe impl Send for Pipeline {}

impl Pipeline {
    /// Load a GGML model from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_str().ok_or_else(|| ChatGlmError::ModelLoadFailed {
            path: path.display().to_string(),
            reason: "Invalid UTF-8 in path".into(),
        })?;
        let c_path = CString::new(path_str).map_err(|_| ChatGlmError::ModelLoadFailed {
            path: path_str.into(),
            reason: "Path contains null byte".into(),
        })?;

        info!(path = %path.display(), "Loading model…");
        let ptr = unsafe { chatglm_sys::chatglm_pipeline_load(c_path.as_ptr()) };
        if ptr.is_null() {
            return Err(ChatGlmError::ModelLoadFailed {
                path: path_str.into(),
                reason: "chatglm_pipeline_load returned null".into(),
            });
        }

        info!(path = %path.display(), "Model loaded");
        Ok(Self { ptr })
    }

    /// Model family name ("ChatGLM", "ChatGLM2", ...).
    pub fn model_type(&self) -> String {
        unsafe { owned_string(chatglm_sys::chatglm_model_type(self.ptr)) }.unwrap_or_default()
    }

    //  Chat

    /// Run a full multi-turn chat and return the assistant reply.
    pub fn chat(&mut self, messages: &[ChatMessage], config: &GenerationConfig) -> Result<String> {
        self.chat_inner(messages, config, None, ptr::null_mut())
    }

    /// Like [`chat`](Self::chat), but also stream printable fragments
    /// of the reply to `sink` as they are decoded.
    pub fn chat_stream(
        &mut self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
        sink: &mut dyn StreamSink,
    ) -> Result<String> {
        let decoder = RawDecoder { ptr: self.ptr };
        let mut streamer = TextStreamer::new(&decoder, sink);
        let user_data = ptr::from_mut(&mut streamer).cast::<c_void>();
        let result = self.chat_inner(
            messages,
            config,
            Some(token_trampoline::<RawDecoder, dyn StreamSink>),
            user_data,
        );
        streamer.end();
        result
    }

    fn chat_inner(
        &mut self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
        callback: chatglm_sys::chatglm_token_callback,
        user_data: *mut c_void,
    ) -> Result<String> {
        if messages.is_empty() {
            return Err(ChatGlmError::GenerationFailed("empty chat history".into()));
        }

        // The CStrings must live until the call completes.
        let (c_roles, c_contents) = marshal_messages(messages)?;
        let role_ptrs: Vec<*const c_char> = c_roles.iter().map(|c| c.as_ptr()).collect();
        let content_ptrs: Vec<*const c_char> = c_contents.iter().map(|c| c.as_ptr()).collect();

        debug!(turns = messages.len(), "Chat generation started");
        let out = unsafe {
            chatglm_sys::chatglm_chat(
                self.ptr,
                role_ptrs.as_ptr(),
                content_ptrs.as_ptr(),
                messages.len(),
                &raw_params(config),
                callback,
                user_data,
            )
        };
        let reply = unsafe { owned_string(out) }
            .ok_or_else(|| ChatGlmError::GenerationFailed("chatglm_chat returned null".into()))?;
        Ok(trim_reply(reply))
    }

    //  Completion

    /// Run a raw text completion.
    pub fn generate(&mut self, prompt: &str, config: &GenerationConfig) -> Result<String> {
        self.generate_inner(prompt, config, None, ptr::null_mut())
    }

    /// Like [`generate`](Self::generate), but also stream printable
    /// fragments to `sink` as they are decoded.
    pub fn generate_stream(
        &mut self,
        prompt: &str,
        config: &GenerationConfig,
        sink: &mut dyn StreamSink,
    ) -> Result<String> {
        let decoder = RawDecoder { ptr: self.ptr };
        let mut streamer = TextStreamer::new(&decoder, sink);
        let user_data = ptr::from_mut(&mut streamer).cast::<c_void>();
        let result = self.generate_inner(
            prompt,
            config,
            Some(token_trampoline::<RawDecoder, dyn StreamSink>),
            user_data,
        );
        streamer.end();
        result
    }

    fn generate_inner(
        &mut self,
        prompt: &str,
        config: &GenerationConfig,
        callback: chatglm_sys::chatglm_token_callback,
        user_data: *mut c_void,
    ) -> Result<String> {
        let c_prompt = CString::new(prompt)
            .map_err(|_| ChatGlmError::GenerationFailed("prompt contains null byte".into()))?;

        debug!("Text generation started");
        let out = unsafe {
            chatglm_sys::chatglm_generate(
                self.ptr,
                c_prompt.as_ptr(),
                &raw_params(config),
                callback,
                user_data,
            )
        };
        unsafe { owned_string(out) }
            .ok_or_else(|| ChatGlmError::GenerationFailed("chatglm_generate returned null".into()))
    }

    //  Tokenizer

    /// Encode `text` to token ids, truncated to `max_length`.
    pub fn tokenize(&self, text: &str, max_length: usize) -> Result<Vec<i32>> {
        let c_text = CString::new(text)
            .map_err(|_| ChatGlmError::TokenizationFailed("text contains null byte".into()))?;

        let mut n_out: usize = 0;
        let ids = unsafe {
            chatglm_sys::chatglm_tokenize(self.ptr, c_text.as_ptr(), max_length as c_int, &mut n_out)
        };
        if ids.is_null() {
            return Err(ChatGlmError::TokenizationFailed(
                "chatglm_tokenize returned null".into(),
            ));
        }

        let tokens = unsafe { std::slice::from_raw_parts(ids, n_out) }.to_vec();
        unsafe { chatglm_sys::chatglm_tokens_free(ids) };
        Ok(tokens)
    }

    /// Decode a token id sequence to text. Returns an empty string for
    /// an empty sequence.
    pub fn decode_tokens(&self, tokens: &[i32]) -> String {
        if tokens.is_empty() {
            return String::new();
        }
        unsafe {
            owned_string(chatglm_sys::chatglm_detokenize(
                self.ptr,
                tokens.as_ptr(),
                tokens.len(),
            ))
        }
        .unwrap_or_default()
    }

    /// Embedding ids for `text`: the engine's encoder output, bounded
    /// by `config.max_length`.
    pub fn embeddings(&self, text: &str, config: &GenerationConfig) -> Result<Vec<i32>> {
        self.tokenize(text, config.max_length as usize)
            .map_err(|e| ChatGlmError::EmbeddingFailed(e.to_string()))
    }
}

impl TokenDecoder for Pipeline {
    fn decode(&self, tokens: &[i32]) -> String {
        self.decode_tokens(tokens)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            debug!("Freeing chatglm pipeline");
            unsafe { chatglm_sys::chatglm_pipeline_free(self.ptr) }
        }
    }
}

//  FFI plumbing

/// Tokenizer-only view of the pipeline, used by the streaming callback
/// while `&mut self` is committed to the generation call.
struct RawDecoder {
    ptr: *mut chatglm_sys::chatglm_pipeline,
}

impl TokenDecoder for RawDecoder {
    fn decode(&self, tokens: &[i32]) -> String {
        if tokens.is_empty() {
            return String::new();
        }
        unsafe {
            owned_string(chatglm_sys::chatglm_detokenize(
                self.ptr,
                tokens.as_ptr(),
                tokens.len(),
            ))
        }
        .unwrap_or_default()
    }
}

/// Bridges the engine's token callback onto a [`TextStreamer`].
///
/// `user_data` must point at a live `TextStreamer<'_, D, S>` for the
/// duration of the generation call.
unsafe extern "C" fn token_trampoline<D, S>(
    user_data: *mut c_void,
    tokens: *const c_int,
    n_tokens: usize,
) -> bool
where
    D: TokenDecoder,
    S: StreamSink + ?Sized,
{
    let streamer = unsafe { &mut *user_data.cast::<TextStreamer<'_, D, S>>() };
    let tokens = if tokens.is_null() {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(tokens, n_tokens) }
    };
    streamer.put(tokens)
}

/// Take ownership of a shim-allocated C string.
unsafe fn owned_string(ptr: *mut c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let s = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
    unsafe { chatglm_sys::chatglm_string_free(ptr) };
    Some(s)
}

fn raw_params(config: &GenerationConfig) -> chatglm_sys::chatglm_params {
    chatglm_sys::chatglm_params {
        max_length: config.max_length,
        max_context_length: config.max_context_length,
        do_sample: config.do_sample,
        top_k: config.top_k,
        top_p: config.top_p,
        temperature: config.temperature,
        repetition_penalty: config.repetition_penalty,
        num_threads: config.num_threads,
    }
}

/// Convert chat turns to C strings. A message with an interior null
/// byte is rejected rather than marshaled as a blank turn.
fn marshal_messages(messages: &[ChatMessage]) -> Result<(Vec<CString>, Vec<CString>)> {
    let mut roles = Vec::with_capacity(messages.len());
    let mut contents = Vec::with_capacity(messages.len());
    for message in messages {
        roles.push(CString::new(message.role.as_str()).map_err(|_| {
            ChatGlmError::GenerationFailed("message role contains null byte".into())
        })?);
        contents.push(CString::new(message.content.as_str()).map_err(|_| {
            ChatGlmError::GenerationFailed("message content contains null byte".into())
        })?);
    }
    Ok((roles, contents))
}

/// Drop the engine's leading space / newline artifacts from a reply.
fn trim_reply(reply: String) -> String {
    let trimmed = reply.strip_prefix(' ').unwrap_or(&reply);
    let trimmed = trimmed.strip_prefix('\n').unwrap_or(trimmed);
    if trimmed.len() == reply.len() {
        reply
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_byte_in_content_is_rejected() {
        let messages = [ChatMessage::user("a\0b")];
        let err = marshal_messages(&messages).unwrap_err();
        assert!(matches!(err, ChatGlmError::GenerationFailed(_)));
    }

    #[test]
    fn clean_messages_marshal_in_order() {
        let messages = [ChatMessage::system("be brief"), ChatMessage::user("hi")];
        let (roles, contents) = marshal_messages(&messages).unwrap();
        assert_eq!(roles[0].to_str().unwrap(), "system");
        assert_eq!(contents[1].to_str().unwrap(), "hi");
    }

    #[test]
    fn reply_prefix_trimming() {
        assert_eq!(trim_reply(" 4".into()), "4");
        assert_eq!(trim_reply("\n4".into()), "4");
        assert_eq!(trim_reply(" \n4".into()), "4");
        // Only one leading space and one leading newline are engine
        // artifacts; everything else is real output.
        assert_eq!(trim_reply("  indented".into()), " indented");
        assert_eq!(trim_reply("4".into()), "4");
    }
}
