//! Strategy parameters.
//!
//! Strategies arrive as `{name, method_type, parameters}` with a loosely typed
//! JSON parameter object. [`SegmentationMethod::from_spec`] validates that
//! object once into one strongly typed variant per algorithm.

use crate::error::{EvalError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A chunking strategy as configured by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySpec {
    pub name: String,
    /// One of `length`, `structure`, `semantic`.
    pub method_type: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Token-window parameters (~4 characters per token).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenWindowParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

/// Paragraph delimiter, compiled at construction.
#[derive(Clone)]
pub struct ParagraphParams {
    separator: Regex,
}

impl ParagraphParams {
    pub fn new(pattern: &str) -> Result<Self> {
        let separator = Regex::new(pattern).map_err(|e| {
            EvalError::Configuration(format!("invalid paragraph_separator '{}': {}", pattern, e))
        })?;
        if separator.is_match("") {
            return Err(EvalError::Configuration(format!(
                "paragraph_separator '{}' matches the empty string",
                pattern
            )));
        }
        Ok(Self { separator })
    }

    pub fn separator(&self) -> &Regex {
        &self.separator
    }
}

impl fmt::Debug for ParagraphParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParagraphParams")
            .field("separator", &self.separator.as_str())
            .finish()
    }
}

impl PartialEq for ParagraphParams {
    fn eq(&self, other: &Self) -> bool {
        self.separator.as_str() == other.separator.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NSentenceParams {
    pub sentences_per_chunk: usize,
    pub sentence_overlap: usize,
}

impl NSentenceParams {
    /// Sentences to advance per window, never less than one.
    pub fn step(&self) -> usize {
        self.sentences_per_chunk
            .saturating_sub(self.sentence_overlap)
            .max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceWindowParams {
    pub min_chars: usize,
    pub max_chars: usize,
    pub overlap_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticParams {
    pub embed_model_name: String,
    pub breakpoint_percentile_threshold: f64,
    pub buffer_size: usize,
}

/// Validated segmentation configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentationMethod {
    TokenWindow(TokenWindowParams),
    Paragraph(ParagraphParams),
    NSentence(NSentenceParams),
    SentenceWindow(SentenceWindowParams),
    Semantic(SemanticParams),
}

impl SegmentationMethod {
    /// Validate a strategy into a typed method. Every failure is a
    /// configuration error; nothing is coerced later.
    pub fn from_spec(spec: &StrategySpec) -> Result<Self> {
        let params = parameter_object(&spec.parameters)?;
        match spec.method_type.as_str() {
            "length" => {
                let chunk_size = get_usize(&params, "chunk_size", 512)?;
                let chunk_overlap = get_usize(&params, "chunk_overlap", 50)?;
                if chunk_size == 0 {
                    return Err(config_err("chunk_size must be greater than 0"));
                }
                if chunk_overlap >= chunk_size {
                    return Err(config_err("chunk_overlap must be less than chunk_size"));
                }
                Ok(Self::TokenWindow(TokenWindowParams {
                    chunk_size,
                    chunk_overlap,
                }))
            }
            "structure" => match get_str(&params, "structure_type")? {
                Some("pure_paragraph") => {
                    let pattern = get_str(&params, "paragraph_separator")?.unwrap_or("\n\n");
                    Ok(Self::Paragraph(ParagraphParams::new(pattern)?))
                }
                Some("n_sentence_chunking") => {
                    let sentences_per_chunk = get_usize(&params, "sentences_per_chunk", 5)?;
                    if sentences_per_chunk == 0 {
                        return Err(config_err("sentences_per_chunk must be greater than 0"));
                    }
                    Ok(Self::NSentence(NSentenceParams {
                        sentences_per_chunk,
                        sentence_overlap: get_usize(&params, "sentence_overlap", 1)?,
                    }))
                }
                Some("sentence_window") => {
                    let min_chars = get_usize(&params, "min_chars_per_chunk", 200)?;
                    let max_chars = get_usize(&params, "max_chars_per_chunk", 500)?;
                    if max_chars == 0 {
                        return Err(config_err("max_chars_per_chunk must be greater than 0"));
                    }
                    if min_chars > max_chars {
                        return Err(config_err(
                            "min_chars_per_chunk must not exceed max_chars_per_chunk",
                        ));
                    }
                    Ok(Self::SentenceWindow(SentenceWindowParams {
                        min_chars,
                        max_chars,
                        overlap_chars: get_usize(&params, "sentence_overlap_chars", 50)?,
                    }))
                }
                Some(other) => Err(config_err(&format!(
                    "unknown structure_type '{}' (expected pure_paragraph, n_sentence_chunking or sentence_window)",
                    other
                ))),
                None => Err(config_err("structure strategies require a structure_type")),
            },
            "semantic" => {
                let embed_model_name = get_str(&params, "embed_model_name")?
                    .filter(|name| !name.trim().is_empty())
                    .ok_or_else(|| config_err("semantic strategies require embed_model_name"))?;
                let threshold = get_f64(&params, "breakpoint_percentile_threshold", 95.0)?;
                if !(0.0..=100.0).contains(&threshold) {
                    return Err(config_err(
                        "breakpoint_percentile_threshold must be between 0 and 100",
                    ));
                }
                Ok(Self::Semantic(SemanticParams {
                    embed_model_name: embed_model_name.to_string(),
                    breakpoint_percentile_threshold: threshold,
                    buffer_size: get_usize(&params, "buffer_size", 1)?,
                }))
            }
            other => Err(config_err(&format!(
                "unknown method_type '{}' (expected length, structure or semantic)",
                other
            ))),
        }
    }

    /// Method family as stored with the strategy.
    pub fn method_type(&self) -> &'static str {
        match self {
            Self::TokenWindow(_) => "length",
            Self::Paragraph(_) | Self::NSentence(_) | Self::SentenceWindow(_) => "structure",
            Self::Semantic(_) => "semantic",
        }
    }
}

fn config_err(message: &str) -> EvalError {
    EvalError::Configuration(message.to_string())
}

/// Accept an object, null (defaults), or a JSON string holding an object.
fn parameter_object(value: &Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(config_err("parameters string is not a JSON object")),
        },
        _ => Err(config_err("parameters must be a JSON object")),
    }
}

fn get_usize(params: &Map<String, Value>, key: &str, default: usize) -> Result<usize> {
    let invalid = || config_err(&format!("{} must be a non-negative integer", key));
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_u64() {
                return usize::try_from(v).map_err(|_| invalid());
            }
            match n.as_f64() {
                Some(f) if f >= 0.0 && f.fract() == 0.0 => Ok(f as usize),
                _ => Err(invalid()),
            }
        }
        Some(Value::String(s)) => s.trim().parse::<usize>().map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

fn get_f64(params: &Map<String, Value>, key: &str, default: f64) -> Result<f64> {
    let invalid = || config_err(&format!("{} must be a number", key));
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(invalid),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(invalid),
        Some(_) => Err(invalid()),
    }
}

fn get_str<'a>(params: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(config_err(&format!("{} must be a string", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(method_type: &str, parameters: Value) -> StrategySpec {
        StrategySpec {
            name: "test".to_string(),
            method_type: method_type.to_string(),
            parameters,
        }
    }

    #[test]
    fn length_defaults() {
        let method = SegmentationMethod::from_spec(&spec("length", json!({}))).unwrap();
        assert_eq!(
            method,
            SegmentationMethod::TokenWindow(TokenWindowParams {
                chunk_size: 512,
                chunk_overlap: 50
            })
        );
        assert_eq!(method.method_type(), "length");
    }

    #[test]
    fn numeric_strings_are_accepted_once() {
        let method = SegmentationMethod::from_spec(&spec(
            "structure",
            json!({"structure_type": "n_sentence_chunking", "sentences_per_chunk": "3", "sentence_overlap": 1.0}),
        ))
        .unwrap();
        assert_eq!(
            method,
            SegmentationMethod::NSentence(NSentenceParams {
                sentences_per_chunk: 3,
                sentence_overlap: 1
            })
        );
    }

    #[test]
    fn parameters_as_json_string() {
        let method = SegmentationMethod::from_spec(&spec(
            "structure",
            Value::String(r#"{"structure_type": "pure_paragraph"}"#.to_string()),
        ))
        .unwrap();
        assert!(matches!(method, SegmentationMethod::Paragraph(_)));
    }

    #[test]
    fn unknown_method_is_configuration_error() {
        let err = SegmentationMethod::from_spec(&spec("fuzzy", json!({}))).unwrap_err();
        assert!(matches!(err, EvalError::Configuration(_)));
        assert!(err.to_string().contains("fuzzy"));
    }

    #[test]
    fn malformed_parameters_are_rejected() {
        let cases = vec![
            spec("length", json!({"chunk_size": "big"})),
            spec("length", json!({"chunk_size": 100, "chunk_overlap": 100})),
            spec("length", json!({"chunk_size": -3})),
            spec("length", json!([1, 2])),
            spec("structure", json!({})),
            spec("structure", json!({"structure_type": "chapters"})),
            spec("structure", json!({"structure_type": "pure_paragraph", "paragraph_separator": "\\s*"})),
            spec("structure", json!({"structure_type": "pure_paragraph", "paragraph_separator": "("})),
            spec("structure", json!({"structure_type": "n_sentence_chunking", "sentences_per_chunk": 0})),
            spec("structure", json!({"structure_type": "sentence_window", "min_chars_per_chunk": 600, "max_chars_per_chunk": 500})),
            spec("semantic", json!({})),
            spec("semantic", json!({"embed_model_name": "m", "breakpoint_percentile_threshold": 140})),
        ];
        for case in cases {
            let result = SegmentationMethod::from_spec(&case);
            assert!(
                matches!(result, Err(EvalError::Configuration(_))),
                "expected configuration error for {:?}",
                case.parameters
            );
        }
    }

    #[test]
    fn n_sentence_step_is_clamped() {
        let params = NSentenceParams {
            sentences_per_chunk: 3,
            sentence_overlap: 5,
        };
        assert_eq!(params.step(), 1);
    }

    #[test]
    fn semantic_parameters() {
        let method = SegmentationMethod::from_spec(&spec(
            "semantic",
            json!({"embed_model_name": "BAAI/bge-small-en-v1.5", "buffer_size": 2}),
        ))
        .unwrap();
        match method {
            SegmentationMethod::Semantic(p) => {
                assert_eq!(p.buffer_size, 2);
                assert_eq!(p.breakpoint_percentile_threshold, 95.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
