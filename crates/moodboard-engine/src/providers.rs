use std::io::Cursor;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Pixel size the dryrun provider uses for a fresh 16:9 board.
const DRYRUN_WIDTH: u32 = 1376;
const DRYRUN_HEIGHT: u32 = 768;

/// One request to an image model: a prompt, optionally with the picture being
/// edited, plus the generation settings the model accepts.
#[derive(Debug, Clone, Default)]
pub struct ImageCall {
    pub model: String,
    pub prompt: String,
    /// PNG bytes of the image being edited.
    pub source_image: Option<Vec<u8>>,
    pub aspect_ratio: Option<String>,
    pub image_size: Option<String>,
    pub search_grounding: bool,
    pub include_reasoning: bool,
    /// Ask for thought summaries; only models that expose them accept this.
    pub include_thoughts: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePart {
    Image {
        bytes: Vec<u8>,
        mime_type: Option<String>,
    },
    Text {
        text: String,
        thought: bool,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ImageCallResponse {
    pub parts: Vec<ResponsePart>,
    pub warnings: Vec<String>,
}

impl ImageCallResponse {
    /// The first inline image; later images are ignored.
    pub fn first_image(&self) -> Option<&[u8]> {
        self.parts.iter().find_map(|part| match part {
            ResponsePart::Image { bytes, .. } if !bytes.is_empty() => Some(bytes.as_slice()),
            _ => None,
        })
    }

    pub fn reasoning_trace(&self) -> String {
        let segments: Vec<&str> = self
            .parts
            .iter()
            .filter_map(|part| match part {
                ResponsePart::Text {
                    text,
                    thought: true,
                } => Some(text.trim()),
                _ => None,
            })
            .filter(|text| !text.is_empty())
            .collect();
        if segments.is_empty() {
            return "No reasoning traces recovered.".to_string();
        }
        segments.join("\n\n")
    }
}

pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, call: &ImageCall) -> Result<ImageCallResponse>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: usize,
    /// Multiplied by the attempt number before each retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_retries: 2,
            backoff: Duration::from_millis(1200),
        }
    }
}

pub struct GeminiProvider {
    api_base: String,
    api_key: String,
    retry: RetryPolicy,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, api_base: &str, retry: RetryPolicy) -> Self {
        let api_base = api_base.trim().trim_end_matches('/');
        Self {
            api_base: if api_base.is_empty() {
                DEFAULT_API_BASE.to_string()
            } else {
                api_base.to_string()
            },
            api_key: api_key.into(),
            retry,
            http: HttpClient::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(call: &ImageCall) -> Value {
        let mut parts = Vec::new();
        if let Some(source) = call.source_image.as_ref() {
            parts.push(json!({
                "inlineData": {
                    "mimeType": "image/png",
                    "data": BASE64.encode(source),
                }
            }));
        }
        parts.push(json!({ "text": call.prompt }));

        let mut image_config = Map::new();
        if let Some(aspect_ratio) = call.aspect_ratio.as_ref() {
            image_config.insert("aspectRatio".to_string(), json!(aspect_ratio));
        }
        if let Some(image_size) = call.image_size.as_ref() {
            image_config.insert("imageSize".to_string(), json!(image_size));
        }

        let mut generation_config = Map::new();
        generation_config.insert("imageConfig".to_string(), Value::Object(image_config));
        if call.include_reasoning {
            generation_config.insert("responseModalities".to_string(), json!(["TEXT", "IMAGE"]));
        }
        if call.include_reasoning && call.include_thoughts {
            generation_config.insert(
                "thinkingConfig".to_string(),
                json!({ "includeThoughts": true }),
            );
        }

        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            json!([{ "role": "user", "parts": parts }]),
        );
        payload.insert(
            "generationConfig".to_string(),
            Value::Object(generation_config),
        );
        if call.search_grounding {
            payload.insert("tools".to_string(), json!([{ "googleSearch": {} }]));
        }
        Value::Object(payload)
    }

    fn post_with_transport_retries(
        &self,
        endpoint: &str,
        payload: &Value,
        warnings: &mut Vec<String>,
    ) -> Result<HttpResponse> {
        let max_retries = self.retry.max_retries;
        let mut attempt = 0;
        loop {
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", self.api_key.as_str())])
                .timeout(self.retry.timeout)
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(raw) => {
                    let err = anyhow::Error::new(raw)
                        .context(format!("Gemini request failed ({endpoint})"));
                    if !is_retryable_transport_error(&err) || attempt >= max_retries {
                        return Err(err);
                    }
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max_retries,
                        "retrying Gemini request after transport failure"
                    );
                    warnings.push(format!(
                        "Gemini transport retry {attempt}/{max_retries} \
                         after transient request failure."
                    ));
                    thread::sleep(self.retry.backoff * attempt as u32);
                }
            }
        }
    }

    fn extract_parts(response_payload: &Value) -> Result<Vec<ResponsePart>> {
        let mut out = Vec::new();
        let candidates = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for candidate in candidates {
            let parts = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for part in parts {
                if let Some(inline) = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object)
                {
                    let data = inline
                        .get("data")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    if data.is_empty() {
                        continue;
                    }
                    let bytes = BASE64
                        .decode(data.as_bytes())
                        .context("Gemini image base64 decode failed")?;
                    let mime_type = inline
                        .get("mimeType")
                        .or_else(|| inline.get("mime_type"))
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    out.push(ResponsePart::Image { bytes, mime_type });
                } else if let Some(text) = part.get("text").and_then(Value::as_str) {
                    let thought = part
                        .get("thought")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    out.push(ResponsePart::Text {
                        text: text.to_string(),
                        thought,
                    });
                }
            }
        }

        Ok(out)
    }
}

impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, call: &ImageCall) -> Result<ImageCallResponse> {
        let endpoint = self.endpoint_for_model(&call.model);
        let payload = Self::build_payload(call);
        let mut warnings = Vec::new();

        tracing::debug!(
            model = %call.model,
            edit = call.source_image.is_some(),
            grounding = call.search_grounding,
            "sending Gemini generateContent request"
        );
        let response = self.post_with_transport_retries(&endpoint, &payload, &mut warnings)?;
        let response_payload = response_json_or_error("Gemini", response)?;
        let parts = Self::extract_parts(&response_payload)?;

        Ok(ImageCallResponse { parts, warnings })
    }
}

/// Offline provider: answers every call with a solid-colour PNG derived from
/// the prompt. Edits keep the source image's size.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryrunProvider;

impl ImageProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, call: &ImageCall) -> Result<ImageCallResponse> {
        let (width, height) = match call.source_image.as_ref() {
            Some(source) => {
                let decoded = image::load_from_memory(source)
                    .context("dryrun provider could not decode the source image")?;
                (decoded.width(), decoded.height())
            }
            None => (DRYRUN_WIDTH, DRYRUN_HEIGHT),
        };
        let (r, g, b) = color_from_prompt(&call.prompt);
        let canvas = RgbImage::from_pixel(width, height, Rgb([r, g, b]));

        let mut bytes = Cursor::new(Vec::new());
        canvas
            .write_to(&mut bytes, ImageFormat::Png)
            .context("dryrun provider failed to encode PNG")?;

        let mut parts = Vec::new();
        if call.include_reasoning {
            parts.push(ResponsePart::Text {
                text: format!("dryrun: painted {width}x{height} in #{r:02x}{g:02x}{b:02x}"),
                thought: true,
            });
        }
        parts.push(ResponsePart::Image {
            bytes: bytes.into_inner(),
            mime_type: Some("image/png".to_string()),
        });
        Ok(ImageCallResponse {
            parts,
            warnings: Vec::new(),
        })
    }
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(prompt.as_bytes());
    (digest[0], digest[1], digest[2])
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| reqwest_err.is_timeout() || reqwest_err.is_connect())
            .unwrap_or(false)
    })
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(prompt: &str) -> ImageCall {
        ImageCall {
            model: "gemini-3-pro-image-preview".to_string(),
            prompt: prompt.to_string(),
            aspect_ratio: Some("16:9".to_string()),
            image_size: Some("1K".to_string()),
            ..ImageCall::default()
        }
    }

    #[test]
    fn gemini_payload_for_plain_generation() {
        let payload = GeminiProvider::build_payload(&call("linen separates"));
        assert_eq!(
            payload["contents"],
            json!([{ "role": "user", "parts": [{ "text": "linen separates" }] }])
        );
        assert_eq!(
            payload["generationConfig"],
            json!({ "imageConfig": { "aspectRatio": "16:9", "imageSize": "1K" } })
        );
        assert!(payload.get("tools").is_none());
    }

    #[test]
    fn gemini_payload_with_source_reasoning_and_grounding() {
        let mut request = call("swap the coat");
        request.image_size = None;
        request.source_image = Some(vec![1, 2, 3]);
        request.include_reasoning = true;
        request.include_thoughts = true;
        request.search_grounding = true;

        let payload = GeminiProvider::build_payload(&request);
        let parts = payload["contents"][0]["parts"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["inlineData"]["mimeType"], json!("image/png"));
        assert_eq!(parts[0]["inlineData"]["data"], json!(BASE64.encode([1, 2, 3])));
        assert_eq!(parts[1]["text"], json!("swap the coat"));

        let config = &payload["generationConfig"];
        assert_eq!(config["imageConfig"], json!({ "aspectRatio": "16:9" }));
        assert_eq!(config["responseModalities"], json!(["TEXT", "IMAGE"]));
        assert_eq!(config["thinkingConfig"]["includeThoughts"], json!(true));
        assert_eq!(payload["tools"], json!([{ "googleSearch": {} }]));
    }

    #[test]
    fn thoughts_are_only_requested_from_models_that_expose_them() {
        let mut request = call("swap the coat");
        request.include_reasoning = true;
        let config = GeminiProvider::build_payload(&request)["generationConfig"].clone();
        assert_eq!(config["responseModalities"], json!(["TEXT", "IMAGE"]));
        assert!(config.get("thinkingConfig").is_none());

        request.include_reasoning = false;
        request.include_thoughts = true;
        let config = GeminiProvider::build_payload(&request)["generationConfig"].clone();
        assert!(config.get("responseModalities").is_none());
        assert!(config.get("thinkingConfig").is_none());
    }

    #[test]
    fn unreachable_endpoint_retries_then_fails() {
        let retry = RetryPolicy {
            timeout: Duration::from_secs(5),
            max_retries: 2,
            backoff: Duration::from_millis(1),
        };
        let provider = GeminiProvider::new("key", "http://127.0.0.1:1", retry);
        let endpoint = provider.endpoint_for_model("gemini-2.5-flash-image");

        let mut warnings = Vec::new();
        let err = match provider.post_with_transport_retries(&endpoint, &json!({}), &mut warnings) {
            Ok(_) => panic!("nothing listens on port 1"),
            Err(err) => err,
        };
        assert!(is_retryable_transport_error(&err));
        assert!(err.chain().any(|cause| cause
            .downcast_ref::<reqwest::Error>()
            .map(reqwest::Error::is_connect)
            .unwrap_or(false)));
        assert_eq!(warnings.len(), 2);
        assert!(warnings[1].starts_with("Gemini transport retry 2/2"));

        let result = provider.generate(&call("linen separates"));
        assert!(result.is_err());
    }

    #[test]
    fn gemini_endpoint_accepts_prefixed_model_names() {
        let provider =
            GeminiProvider::new("key", "https://example.test/v1beta/", RetryPolicy::default());
        assert_eq!(
            provider.endpoint_for_model("gemini-2.5-flash-image"),
            "https://example.test/v1beta/models/gemini-2.5-flash-image:generateContent"
        );
        assert_eq!(
            provider.endpoint_for_model("models/gemini-2.5-flash-image"),
            "https://example.test/v1beta/models/gemini-2.5-flash-image:generateContent"
        );
    }

    #[test]
    fn extract_parts_keeps_order_and_thought_flags() -> anyhow::Result<()> {
        let payload = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "Planning the layout", "thought": true },
                        {
                            "inline_data": {
                                "mime_type": "image/png",
                                "data": BASE64.encode(b"png")
                            }
                        },
                        { "text": "Here is your board." },
                        { "inlineData": { "data": "" } }
                    ]
                }
            }]
        });
        let parts = GeminiProvider::extract_parts(&payload)?;
        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts[1],
            ResponsePart::Image {
                bytes: b"png".to_vec(),
                mime_type: Some("image/png".to_string()),
            }
        );

        let response = ImageCallResponse {
            parts,
            warnings: Vec::new(),
        };
        assert_eq!(response.first_image(), Some(b"png".as_slice()));
        assert_eq!(response.reasoning_trace(), "Planning the layout");
        Ok(())
    }

    #[test]
    fn extract_parts_rejects_bad_base64() {
        let payload = json!({
            "candidates": [{ "content": { "parts": [{ "inlineData": { "data": "***" } }] } }]
        });
        assert!(GeminiProvider::extract_parts(&payload).is_err());
        assert!(GeminiProvider::extract_parts(&json!({}))
            .map(|parts| parts.is_empty())
            .unwrap_or(false));
    }

    #[test]
    fn reasoning_trace_joins_thoughts_or_reports_none() {
        let response = ImageCallResponse {
            parts: vec![
                ResponsePart::Text {
                    text: "  first idea ".to_string(),
                    thought: true,
                },
                ResponsePart::Text {
                    text: "visible answer".to_string(),
                    thought: false,
                },
                ResponsePart::Text {
                    text: "second idea".to_string(),
                    thought: true,
                },
            ],
            warnings: Vec::new(),
        };
        assert_eq!(response.reasoning_trace(), "first idea\n\nsecond idea");
        assert_eq!(
            ImageCallResponse::default().reasoning_trace(),
            "No reasoning traces recovered."
        );
        assert_eq!(ImageCallResponse::default().first_image(), None);
    }

    #[test]
    fn dryrun_is_deterministic_and_keeps_edit_size() -> anyhow::Result<()> {
        let provider = DryrunProvider;
        let first = provider.generate(&call("rococo"))?;
        let second = provider.generate(&call("rococo"))?;
        assert_eq!(first.first_image(), second.first_image());

        let decoded = image::load_from_memory(first.first_image().unwrap_or_default())?;
        assert_eq!((decoded.width(), decoded.height()), (DRYRUN_WIDTH, DRYRUN_HEIGHT));

        let mut source = Cursor::new(Vec::new());
        RgbImage::new(40, 30).write_to(&mut source, ImageFormat::Png)?;
        let mut edit = call("make it red");
        edit.source_image = Some(source.into_inner());
        edit.include_reasoning = true;
        let edited = provider.generate(&edit)?;
        let decoded = image::load_from_memory(edited.first_image().unwrap_or_default())?;
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
        assert!(edited.reasoning_trace().starts_with("dryrun: painted 40x30"));
        Ok(())
    }
}
