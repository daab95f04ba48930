//! HuggingFace token resolution.

use std::path::{Path, PathBuf};

/// HuggingFace environment variable for authentication tokens.
const HF_TOKEN_ENV_VAR: &str = "HF_TOKEN";

/// Resolve a token from the environment or the HuggingFace CLI cache.
///
/// Checks in order:
/// 1. `HF_TOKEN` environment variable
/// 2. HuggingFace CLI cache (`~/.cache/huggingface/token`)
///
/// Returns the token and a label identifying its source.
pub fn resolve_token() -> Option<(String, &'static str)> {
    if let Ok(token) = std::env::var(HF_TOKEN_ENV_VAR) {
        if let Some(token) = non_empty(&token) {
            return Some((token, "env_var"));
        }
    }

    let cache_file = hf_cli_token_path()?;
    read_token_file(&cache_file).map(|token| (token, "hf_cache"))
}

fn hf_cli_token_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".cache").join("huggingface").join("token"))
}

fn read_token_file(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|content| non_empty(&content))
}

fn non_empty(token: &str) -> Option<String> {
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}
