//! Payload decoder scripts
//!
//! Decoder scripts are small JavaScript functions that turn decrypted
//! FRMPayload bytes into JSON. Two entry points are recognised, checked in
//! this order:
//!
//! - `decodeUplink({ bytes, fPort })` (TTN / LoRaWAN codec API style)
//! - `Decoder(bytes, fPort)` (legacy two-argument style)
//!
//! Every call gets a fresh engine context, so nothing a script does is
//! visible to the next call. The context has no filesystem, network or
//! process bindings. Loop iterations and recursion depth are capped by
//! [`ScriptLimits`].

use anyhow::Context as _;
use boa_engine::{Context, JsValue, Source};
use serde::Serialize;
use serde_json::Value;

/// Step budget for one decoder call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptLimits {
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            loop_iteration_limit: 1_000_000,
            recursion_limit: 512,
        }
    }
}

/// Which entry point a script exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Convention {
    DecodeUplink,
    Legacy,
}

#[derive(Serialize)]
struct DecoderInput<'a> {
    bytes: &'a [u8],
    #[serde(rename = "fPort")]
    f_port: u8,
}

/// A decoder script plus the limits it runs under
#[derive(Debug, Clone)]
pub struct ScriptDecoder {
    source: String,
    limits: ScriptLimits,
}

impl ScriptDecoder {
    pub fn new(source: impl Into<String>, limits: ScriptLimits) -> Self {
        Self {
            source: source.into(),
            limits,
        }
    }

    /// Run the script against decrypted payload bytes.
    ///
    /// A missing port is passed to the script as 0.
    pub fn decode(&self, bytes: &[u8], f_port: Option<u8>) -> anyhow::Result<Value> {
        evaluate(&self.source, bytes, f_port.unwrap_or(0), self.limits)
    }
}

/// Evaluate `source` in a fresh context and call its decoder entry point
pub fn evaluate(source: &str, bytes: &[u8], f_port: u8, limits: ScriptLimits) -> anyhow::Result<Value> {
    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(limits.loop_iteration_limit);
    context
        .runtime_limits_mut()
        .set_recursion_limit(limits.recursion_limit);

    eval(&mut context, source)?;

    let input = serde_json::to_string(&DecoderInput { bytes, f_port })?;
    let call = match detect_convention(&mut context)? {
        Convention::DecodeUplink => {
            format!("JSON.stringify(decodeUplink({input}))")
        }
        Convention::Legacy => {
            format!("(function (input) {{ return JSON.stringify(Decoder(input.bytes, input.fPort)); }})({input})")
        }
    };

    let result = eval(&mut context, &call)?;
    let text = result
        .as_string()
        .map(|s| s.to_std_string_escaped())
        .ok_or_else(|| anyhow::anyhow!("decoder returned a value that is not JSON-serializable"))?;

    serde_json::from_str(&text).context("decoder produced invalid JSON")
}

fn detect_convention(context: &mut Context) -> anyhow::Result<Convention> {
    let probe = eval(
        context,
        "typeof decodeUplink === 'function' ? 1 : (typeof Decoder === 'function' ? 2 : 0)",
    )?;
    match probe.as_number() {
        Some(n) if n == 1.0 => Ok(Convention::DecodeUplink),
        Some(n) if n == 2.0 => Ok(Convention::Legacy),
        _ => Err(anyhow::anyhow!(
            "script defines neither decodeUplink(input) nor Decoder(bytes, fPort)"
        )),
    }
}

fn eval(context: &mut Context, code: &str) -> anyhow::Result<JsValue> {
    context
        .eval(Source::from_bytes(code))
        .map_err(|e| anyhow::anyhow!("{}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(source: &str, bytes: &[u8], f_port: Option<u8>) -> anyhow::Result<Value> {
        ScriptDecoder::new(source, ScriptLimits::default()).decode(bytes, f_port)
    }

    #[test]
    fn test_decode_uplink_convention() {
        let source = r#"
            function decodeUplink(input) {
              const sum = input.bytes.reduce((acc, value) => acc + value, 0);
              return { data: { sum: sum, port: input.fPort } };
            }
        "#;
        let value = run(source, &[1, 2, 3, 4], Some(7)).unwrap();
        assert_eq!(value, json!({"data": {"sum": 10, "port": 7}}));
    }

    #[test]
    fn test_legacy_convention() {
        let source = r#"
            function Decoder(bytes, port) {
              return { first: bytes[0], port: port };
            }
        "#;
        let value = run(source, &[0xFF, 0x01], None).unwrap();
        assert_eq!(value, json!({"first": 255, "port": 0}));
    }

    #[test]
    fn test_decode_uplink_preferred_over_legacy() {
        let source = r#"
            function decodeUplink(input) { return "uplink"; }
            function Decoder(bytes, port) { return "legacy"; }
        "#;
        assert_eq!(run(source, &[], Some(1)).unwrap(), json!("uplink"));
    }

    #[test]
    fn test_missing_entry_point_is_error() {
        let err = run("var x = 1;", &[1], Some(1)).unwrap_err();
        assert!(err.to_string().contains("neither decodeUplink"));
    }

    #[test]
    fn test_thrown_error_is_reported() {
        let source = "function decodeUplink(input) { throw new Error('bad payload'); }";
        assert!(run(source, &[1], Some(1)).is_err());
    }

    #[test]
    fn test_syntax_error_is_reported() {
        assert!(run("function decodeUplink(input) {", &[1], Some(1)).is_err());
    }

    #[test]
    fn test_undefined_result_is_error() {
        let source = "function decodeUplink(input) { return undefined; }";
        let err = run(source, &[1], Some(1)).unwrap_err();
        assert!(err.to_string().contains("not JSON-serializable"));
    }

    #[test]
    fn test_no_state_shared_between_calls() {
        let source = r#"
            var calls = (typeof calls === 'undefined') ? 0 : calls;
            function decodeUplink(input) { calls += 1; return { calls: calls }; }
        "#;
        let decoder = ScriptDecoder::new(source, ScriptLimits::default());
        assert_eq!(decoder.decode(&[], Some(1)).unwrap(), json!({"calls": 1}));
        assert_eq!(decoder.decode(&[], Some(1)).unwrap(), json!({"calls": 1}));
    }

    #[test]
    fn test_runaway_loop_hits_budget() {
        let source = "function decodeUplink(input) { while (true) {} }";
        let limits = ScriptLimits {
            loop_iteration_limit: 10_000,
            recursion_limit: 64,
        };
        let decoder = ScriptDecoder::new(source, limits);
        assert!(decoder.decode(&[1], Some(1)).is_err());
    }

    #[test]
    fn test_runaway_recursion_hits_budget() {
        let source = "function f(n) { return f(n + 1); } function decodeUplink(input) { return f(0); }";
        let limits = ScriptLimits {
            loop_iteration_limit: 10_000,
            recursion_limit: 64,
        };
        assert!(ScriptDecoder::new(source, limits).decode(&[1], Some(1)).is_err());
    }

    #[test]
    fn test_no_host_bindings() {
        let source = r#"
            function decodeUplink(input) {
              return {
                require: typeof require,
                process: typeof process,
                fetch: typeof fetch,
              };
            }
        "#;
        let value = run(source, &[], Some(1)).unwrap();
        assert_eq!(
            value,
            json!({"require": "undefined", "process": "undefined", "fetch": "undefined"})
        );
    }
}
