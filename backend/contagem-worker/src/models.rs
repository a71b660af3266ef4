use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::de::Error as _;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Hours subtracted from UTC when stamping `DataProcessamento` (UTC-3, Brasília)
pub const PROCESSING_UTC_OFFSET_HOURS: i64 = 3;

/// Counting result carried by one event
///
/// Expected payload (keys are matched case-insensitively):
/// ```json
/// {
///   "ValorAtual": 42,
///   "Producer": "svc-a",
///   "Mensagem": "ok",
///   "Kernel": "5.1",
///   "TargetFramework": "net6.0"
/// }
/// ```
/// Keys are lowercased before matching. Missing keys take their default (0 / null).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContagemEventData {
    #[serde(rename = "valoratual")]
    pub valor_atual: i32,
    pub producer: Option<String>,
    pub mensagem: Option<String>,
    pub kernel: Option<String>,
    #[serde(rename = "targetframework")]
    pub target_framework: Option<String>,
}

impl ContagemEventData {
    /// Deserialize an event body, ignoring the case of property names.
    ///
    /// Anything but a JSON object is rejected, including `null`.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        let object = match serde_json::from_str::<Value>(payload)? {
            Value::Object(object) => object,
            other => {
                return Err(serde_json::Error::custom(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        // later keys win when two differ only by case
        let normalized: Map<String, Value> = object
            .into_iter()
            .map(|(key, value)| (key.to_ascii_lowercase(), value))
            .collect();

        serde_json::from_value(Value::Object(normalized))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Row of the `HistoricoContagem` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricoContagem {
    pub data_processamento: NaiveDateTime,
    pub valor_atual: i32,
    pub producer: Option<String>,
    pub consumer: String,
    pub event_hub: String,
    pub mensagem: Option<String>,
    pub kernel: Option<String>,
    pub target_framework: Option<String>,
}

impl HistoricoContagem {
    pub fn new(
        event: &ContagemEventData,
        processed_at: DateTime<Utc>,
        consumer: &str,
        event_hub: &str,
    ) -> Self {
        Self {
            data_processamento: processing_timestamp(processed_at),
            valor_atual: event.valor_atual,
            producer: event.producer.clone(),
            consumer: consumer.to_string(),
            event_hub: event_hub.to_string(),
            mensagem: event.mensagem.clone(),
            kernel: event.kernel.clone(),
            target_framework: event.target_framework.clone(),
        }
    }
}

/// `DataProcessamento` for a row written at `now`
pub fn processing_timestamp(now: DateTime<Utc>) -> NaiveDateTime {
    (now - Duration::hours(PROCESSING_UTC_OFFSET_HOURS)).naive_utc()
}
