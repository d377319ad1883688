//! Generation configuration.

/// User-facing generation knobs, forwarded to the engine unchanged.
///
/// Defaults match the engine's own: sampling enabled, `top_p = 0.7`,
/// `temperature = 0.95`. `num_threads = 0` lets the engine pick a
/// thread count.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GenerationConfig {
    /// Max total length, prompt included.
    #[serde(default = "default_max_length")]
    pub max_length: i32,
    /// Max prompt context length; older history is truncated.
    #[serde(default = "default_max_context_length")]
    pub max_context_length: i32,
    /// Sample from the distribution instead of greedy decoding.
    #[serde(default = "default_do_sample")]
    pub do_sample: bool,
    #[serde(default)]
    pub top_k: i32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// 1.0 = disabled.
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f32,
    #[serde(default)]
    pub num_threads: i32,
}

fn default_max_length() -> i32 {
    2048
}
fn default_max_context_length() -> i32 {
    512
}
fn default_do_sample() -> bool {
    true
}
fn default_top_p() -> f32 {
    0.7
}
fn default_temperature() -> f32 {
    0.95
}
fn default_repetition_penalty() -> f32 {
    1.0
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
            max_context_length: default_max_context_length(),
            do_sample: default_do_sample(),
            top_k: 0,
            top_p: default_top_p(),
            temperature: default_temperature(),
            repetition_penalty: default_repetition_penalty(),
            num_threads: 0,
        }
    }
}
