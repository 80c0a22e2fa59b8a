//! URL utilities for consistent endpoint construction
//!
//! Base URLs come from configuration and may carry trailing slashes; these
//! helpers keep the joined endpoints free of double slashes.

/// Normalize a base URL by removing trailing slashes
///
/// # Examples
///
/// ```
/// use sifra::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://example.com/v1beta/"), "https://example.com/v1beta");
/// assert_eq!(normalize_base_url("https://example.com/v1beta///"), "https://example.com/v1beta");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Construct a complete API endpoint URL from a base URL and endpoint path
///
/// # Examples
///
/// ```
/// use sifra::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("http://localhost:3000/", "/api/chat"),
///     "http://localhost:3000/api/chat"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

/// URL of a model method such as `generateContent`.
///
/// Model names may be given bare (`gemini-pro`) or fully qualified
/// (`models/gemini-pro`).
pub fn model_method_url(base_url: &str, model: &str, method: &str) -> String {
    let model = model.trim_start_matches("models/");
    construct_api_url(base_url, &format!("models/{model}:{method}"))
}
