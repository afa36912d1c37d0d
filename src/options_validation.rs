//! Build-time validation of engine-specific options JSON.
//!
//! Called from [`ProviderBuilder::build`](crate::provider::ProviderBuilder::build)
//! to reject unknown or malformed options before any model loading occurs.

use crate::api::Modality;
use crate::error::{Result, RuntimeError};
use serde_json::Value;

/// Validate the options a modality passes to `engine_id`.
///
/// Returns `Ok(())` if the options are valid or the engine is unknown (unknown
/// engines are accepted so third-party engines can define their own keys).
pub fn validate_engine_options(engine_id: &str, modality: Modality, options: &Value) -> Result<()> {
    match engine_id {
        "local/candle" => validate_candle_options(engine_id, options),
        "local/fastembed" => {
            let Some(map) = as_object(engine_id, options)? else {
                return Ok(());
            };
            reject_unknown_keys(engine_id, map, &[])
        }
        "local/mistralrs" => validate_mistralrs_options(engine_id, modality, options),
        _ => Ok(()),
    }
}

/// Parse `options` as a JSON object map, returning `None` for null and an
/// error for non-object types.
fn as_object<'a>(
    engine_id: &str,
    options: &'a Value,
) -> Result<Option<&'a serde_json::Map<String, Value>>> {
    match options {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        _ => Err(RuntimeError::Config(format!(
            "Options for engine '{}' must be a JSON object or null",
            engine_id
        ))),
    }
}

fn reject_unknown_keys(
    engine_id: &str,
    map: &serde_json::Map<String, Value>,
    allowed: &[&str],
) -> Result<()> {
    if let Some(key) = map.keys().find(|k| !allowed.contains(&k.as_str())) {
        return Err(RuntimeError::Config(format!(
            "Unknown option '{}' for engine '{}'",
            key, engine_id
        )));
    }
    Ok(())
}

fn require_string_keys(
    engine_id: &str,
    map: &serde_json::Map<String, Value>,
    keys: &[&str],
) -> Result<()> {
    for key in keys {
        if let Some(value) = map.get(*key)
            && !value.is_string()
        {
            return Err(RuntimeError::Config(format!(
                "Option '{}' for engine '{}' must be a string",
                key, engine_id
            )));
        }
    }
    Ok(())
}

fn require_bool_keys(
    engine_id: &str,
    map: &serde_json::Map<String, Value>,
    keys: &[&str],
) -> Result<()> {
    for key in keys {
        if let Some(value) = map.get(*key)
            && !value.is_boolean()
        {
            return Err(RuntimeError::Config(format!(
                "Option '{}' for engine '{}' must be a boolean",
                key, engine_id
            )));
        }
    }
    Ok(())
}

/// Require that the named key, if present, is a positive (> 0) integer.
fn require_positive_u64(
    engine_id: &str,
    map: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<()> {
    if let Some(value) = map.get(key) {
        let Some(v) = value.as_u64() else {
            return Err(RuntimeError::Config(format!(
                "Option '{}' for engine '{}' must be a positive integer",
                key, engine_id
            )));
        };
        if v == 0 {
            return Err(RuntimeError::Config(format!(
                "Option '{}' for engine '{}' must be greater than 0",
                key, engine_id
            )));
        }
    }
    Ok(())
}

fn validate_candle_options(engine_id: &str, options: &Value) -> Result<()> {
    let Some(map) = as_object(engine_id, options)? else {
        return Ok(());
    };
    reject_unknown_keys(engine_id, map, &["normalize", "max_length"])?;
    require_bool_keys(engine_id, map, &["normalize"])?;
    require_positive_u64(engine_id, map, "max_length")
}

/// mistral.rs: ISQ type, boolean flags, GGUF files and embedding dimensions.
fn validate_mistralrs_options(engine_id: &str, modality: Modality, options: &Value) -> Result<()> {
    let Some(map) = as_object(engine_id, options)? else {
        return Ok(());
    };

    reject_unknown_keys(
        engine_id,
        map,
        &[
            "isq",
            "force_cpu",
            "paged_attention",
            "max_num_seqs",
            "chat_template",
            "tokenizer_json",
            "embedding_dimensions",
            "gguf_files",
        ],
    )?;
    require_string_keys(engine_id, map, &["isq", "chat_template", "tokenizer_json"])?;
    require_bool_keys(engine_id, map, &["force_cpu", "paged_attention"])?;
    require_positive_u64(engine_id, map, "max_num_seqs")?;

    if map.contains_key("embedding_dimensions") {
        require_positive_u64(engine_id, map, "embedding_dimensions")?;
        if modality != Modality::Embedding {
            return Err(RuntimeError::Config(
                "Option 'embedding_dimensions' is only valid for the embedding modality"
                    .to_string(),
            ));
        }
    }

    if let Some(value) = map.get("gguf_files") {
        let valid = value
            .as_array()
            .is_some_and(|items| !items.is_empty() && items.iter().all(Value::is_string));
        if !valid {
            return Err(RuntimeError::Config(format!(
                "Option 'gguf_files' for engine '{}' must be a non-empty array of strings",
                engine_id
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_engine_accepts_anything() {
        assert!(validate_engine_options("custom/x", Modality::Llm, &json!({"a": 1})).is_ok());
    }

    #[test]
    fn null_options_are_valid_everywhere() {
        for engine in ["local/candle", "local/fastembed", "local/mistralrs"] {
            assert!(validate_engine_options(engine, Modality::Embedding, &Value::Null).is_ok());
        }
    }

    #[test]
    fn non_object_options_rejected() {
        let err = validate_engine_options("local/candle", Modality::Embedding, &json!([1, 2]))
            .unwrap_err();
        assert!(err.to_string().contains("must be a JSON object"));
    }

    #[test]
    fn candle_accepts_normalize_and_max_length() {
        let opts = json!({ "normalize": false, "max_length": 256 });
        assert!(validate_engine_options("local/candle", Modality::Embedding, &opts).is_ok());
    }

    #[test]
    fn candle_rejects_zero_max_length_and_string_normalize() {
        assert!(
            validate_engine_options(
                "local/candle",
                Modality::Embedding,
                &json!({ "max_length": 0 })
            )
            .is_err()
        );
        assert!(
            validate_engine_options(
                "local/candle",
                Modality::Embedding,
                &json!({ "normalize": "yes" })
            )
            .is_err()
        );
    }

    #[test]
    fn fastembed_rejects_any_key() {
        let err = validate_engine_options(
            "local/fastembed",
            Modality::Embedding,
            &json!({ "cache_dir": "/tmp" }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unknown option 'cache_dir'"));
    }

    #[test]
    fn mistralrs_accepts_full_option_set() {
        let opts = json!({
            "isq": "Q4K",
            "force_cpu": true,
            "paged_attention": false,
            "max_num_seqs": 8,
            "chat_template": "chatml",
            "tokenizer_json": "/tmp/tokenizer.json",
            "gguf_files": ["model-q4.gguf"]
        });
        assert!(validate_engine_options("local/mistralrs", Modality::Llm, &opts).is_ok());
    }

    #[test]
    fn mistralrs_embedding_dimensions_only_for_embedding() {
        let opts = json!({ "embedding_dimensions": 384 });
        assert!(validate_engine_options("local/mistralrs", Modality::Embedding, &opts).is_ok());
        assert!(validate_engine_options("local/mistralrs", Modality::Llm, &opts).is_err());
    }

    #[test]
    fn mistralrs_rejects_bad_types() {
        for opts in [
            json!({ "force_cpu": "true" }),
            json!({ "isq": 4 }),
            json!({ "max_num_seqs": -1 }),
            json!({ "gguf_files": "model.gguf" }),
            json!({ "gguf_files": [] }),
            json!({ "gguf_files": [1] }),
        ] {
            assert!(
                validate_engine_options("local/mistralrs", Modality::Llm, &opts).is_err(),
                "{opts} should be rejected"
            );
        }
    }
}
