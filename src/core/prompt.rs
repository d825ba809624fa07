//! Request payload for the hosted text-generation model.

use crate::core::error::AppError;
use serde::{Deserialize, Serialize};

pub const MODEL_NAME: &str = "meta/codellama-70b-instruct:a279116fe47a0f65701a8817188601e2fe8f4b9e04a518789655ea7b995851bf";
pub const DEFAULT_MAX_TOKENS: u32 = 2000;
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a Python programming expert.
Your task is to help users by answering questions related to Python or by executing tasks requested of you.
You should ALWAYS structure code in markdown format before you respond.
If the task is unrelated to Python, then say 'I cannot help with anything not related to Python.'"#;

const TOP_K: u32 = 10;
const TOP_P: f64 = 0.95;
const TEMPERATURE: f64 = 0.8;
const REPEAT_PENALTY: f64 = 1.1;
const PRESENCE_PENALTY: f64 = 0.0;
const FREQUENCY_PENALTY: f64 = 0.0;

/// User-adjustable generation options. `None` means "left unedited".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptOptions {
    pub max_tokens: Option<i64>,
    pub system_prompt: Option<String>,
}

/// The full parameter object sent to the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationInput {
    pub top_k: u32,
    pub top_p: f64,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub system_prompt: String,
    pub repeat_penalty: f64,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
}

impl GenerationInput {
    /// Builds the payload, rejecting a token budget that is not a positive integer.
    pub fn new(prompt: impl Into<String>, options: &PromptOptions) -> Result<Self, AppError> {
        let max_tokens = match options.max_tokens {
            None => DEFAULT_MAX_TOKENS,
            Some(n) if n <= 0 => {
                return Err(AppError::Configuration(format!(
                    "max_tokens must be a positive integer, got {n}"
                )));
            }
            Some(n) => u32::try_from(n).map_err(|_| {
                AppError::Configuration(format!("max_tokens {n} is out of range"))
            })?,
        };

        Ok(GenerationInput {
            top_k: TOP_K,
            top_p: TOP_P,
            prompt: prompt.into(),
            max_tokens,
            temperature: TEMPERATURE,
            system_prompt: options
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_owned()),
            repeat_penalty: REPEAT_PENALTY,
            presence_penalty: PRESENCE_PENALTY,
            frequency_penalty: FREQUENCY_PENALTY,
        })
    }
}
