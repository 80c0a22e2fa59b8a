//! Shared constants used across the application

/// Model used when neither the config file nor the CLI names one.
pub const DEFAULT_MODEL: &str = "gemini-pro";

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

pub const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Header carrying the conversation thread id on relay responses.
pub const THREAD_ID_HEADER: &str = "x-thread-id";

pub const API_KEY_HEADER: &str = "x-goog-api-key";

/// Generation parameters sent with every provider request. These are not
/// tunable per request.
pub const TEMPERATURE: f32 = 0.7;
pub const TOP_K: u32 = 1;
pub const TOP_P: f32 = 0.95;
pub const MAX_OUTPUT_TOKENS: u32 = 2048;

pub const SAFETY_THRESHOLD: &str = "BLOCK_MEDIUM_AND_ABOVE";

pub const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];
