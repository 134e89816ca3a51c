use std::time::Duration;

use async_trait::async_trait;
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::AssistantError;
use crate::session::{Item, ItemId};

/// One slot as it travels on the wire. `null`, `""` and `"UNSET"` mean the
/// slot has not been filled; `"ANY"` means the user does not care.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotValue {
    Unset,
    Any,
    Number(f64),
    Text(String),
}

impl SlotValue {
    pub fn from_json(v: &Value) -> Option<Self> {
        match v {
            Value::Null => Some(Self::Unset),
            Value::String(s) => {
                let t = s.trim();
                if t.is_empty() || t.eq_ignore_ascii_case("UNSET") {
                    Some(Self::Unset)
                } else if t.eq_ignore_ascii_case("ANY") {
                    Some(Self::Any)
                } else {
                    Some(Self::Text(t.to_string()))
                }
            }
            Value::Number(n) => n.as_f64().map(Self::Number),
            _ => None,
        }
    }

    pub fn from_text(v: Option<&str>) -> Self {
        match v {
            Some(s) if !s.is_empty() => Self::Text(s.to_string()),
            _ => Self::Unset,
        }
    }

    pub fn from_number(v: Option<f64>) -> Self {
        v.map(Self::Number).unwrap_or(Self::Unset)
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, Self::Unset | Self::Any)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => integral(*n),
            Self::Text(s) => loose_number(s).and_then(integral),
            Self::Unset | Self::Any => None,
        }
    }
}

impl std::fmt::Display for SlotValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unset => f.write_str("UNSET"),
            Self::Any => f.write_str("ANY"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for SlotValue {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let v = Value::deserialize(d)?;
        Self::from_json(&v).ok_or_else(|| serde::de::Error::custom("slot value must be a string, number or null"))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SlotSnapshot {
    #[serde(default, rename = "type", deserialize_with = "lenient")]
    pub kind: Option<SlotValue>,
    #[serde(default, deserialize_with = "lenient")]
    pub fuel: Option<SlotValue>,
    #[serde(default, deserialize_with = "lenient")]
    pub gearbox: Option<SlotValue>,
    #[serde(default, deserialize_with = "lenient")]
    pub price_max: Option<SlotValue>,
    #[serde(default, deserialize_with = "lenient")]
    pub city: Option<SlotValue>,
    #[serde(default, deserialize_with = "lenient")]
    pub km_max: Option<SlotValue>,
    #[serde(default, deserialize_with = "lenient")]
    pub year_min: Option<SlotValue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnRequest {
    pub session_id: Uuid,
    pub message: String,
}

/// Decoded reply. Every field is optional and a field with an unexpected
/// shape decodes as absent, so a degraded reply still applies what it has.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnResponse {
    #[serde(default, deserialize_with = "lenient")]
    pub assistant: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub slots: Option<SlotSnapshot>,
    #[serde(default, deserialize_with = "items")]
    pub cars: Option<Vec<Item>>,
    #[serde(default, deserialize_with = "lenient")]
    pub quick_replies: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient")]
    pub summary: Option<String>,
}

impl TurnResponse {
    pub fn from_body(body: &str) -> Result<Self, AssistantError> {
        let value: Value = serde_json::from_str(body).map_err(AssistantError::Decode)?;
        if !value.is_object() {
            return Err(AssistantError::Shape);
        }
        serde_json::from_value(value).map_err(AssistantError::Decode)
    }
}

fn lenient<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let v = Value::deserialize(d)?;
    Ok(serde_json::from_value(v).ok())
}

fn items<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<Item>>, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(v.as_array().map(|records| records.iter().filter_map(ingest_item).collect()))
}

/// Builds an [`Item`] from a wire record, fixing its identifier once.
pub fn ingest_item(record: &Value) -> Option<Item> {
    let obj = record.as_object()?;
    let text = |key: &str| obj.get(key).and_then(loose_string);
    let number = |key: &str| obj.get(key).and_then(loose_f64);

    let model = text("model");
    let city = text("city");
    let price = number("price").and_then(non_negative);
    let id = ItemId::derive(text("id").as_deref(), model.as_deref(), city.as_deref(), price);

    Some(Item {
        id,
        model,
        price,
        year: number("year").and_then(integral).and_then(|y| i32::try_from(y).ok()),
        km: number("km").and_then(non_negative),
        fuel: text("fuel"),
        gearbox: text("gearbox"),
        kind: text("type"),
        city,
        image: text("image"),
        whatsapp: text("whatsapp"),
        score: number("score"),
        why: text("why"),
    })
}

fn loose_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn loose_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => loose_number(s),
        _ => None,
    }
}

fn loose_number(s: &str) -> Option<f64> {
    let cleaned: String = s.chars().filter(|c| !c.is_whitespace() && *c != '_').collect();
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn integral(n: f64) -> Option<i64> {
    (n.is_finite() && n.fract() == 0.0).then_some(n as i64)
}

fn non_negative(n: f64) -> Option<u64> {
    (n.is_finite() && n >= 0.0).then(|| n.round() as u64)
}

#[async_trait]
pub trait AssistantEndpoint: Send + Sync {
    async fn post_turn(&self, req: &TurnRequest) -> Result<TurnResponse, AssistantError>;
}

#[derive(Clone)]
pub struct HttpAssistant {
    client: reqwest::Client,
    url: String,
}

impl HttpAssistant {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AssistantError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl AssistantEndpoint for HttpAssistant {
    async fn post_turn(&self, req: &TurnRequest) -> Result<TurnResponse, AssistantError> {
        let resp = self.client.post(&self.url).json(req).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AssistantError::Status(status));
        }
        let body = resp.text().await?;
        TurnResponse::from_body(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::post};
    use serde_json::json;

    #[test]
    fn sentinels_decode_distinctly() {
        let slots: SlotSnapshot = serde_json::from_value(json!({
            "type": "UNSET", "fuel": "ANY", "gearbox": null, "price_max": 100000, "city": "Casablanca", "km_max": [1]
        }))
        .unwrap();
        assert_eq!(slots.kind, Some(SlotValue::Unset));
        assert_eq!(slots.fuel, Some(SlotValue::Any));
        assert_eq!(slots.gearbox, Some(SlotValue::Unset));
        assert_eq!(slots.price_max, Some(SlotValue::Number(100000.0)));
        assert_eq!(slots.city, Some(SlotValue::Text("Casablanca".into())));
        assert_eq!(slots.km_max, None);
        assert_eq!(slots.year_min, None);
    }

    #[test]
    fn malformed_fields_are_dropped_not_fatal() {
        let resp = TurnResponse::from_body(r#"{"assistant": "ok", "cars": "nope", "slots": 3}"#).unwrap();
        assert_eq!(resp.assistant.as_deref(), Some("ok"));
        assert!(resp.cars.is_none());
        assert!(resp.slots.is_none());

        assert!(matches!(TurnResponse::from_body("[]"), Err(AssistantError::Shape)));
        assert!(matches!(TurnResponse::from_body("<html>"), Err(AssistantError::Decode(_))));
    }

    #[test]
    fn ingest_fixes_identifier_and_reads_loose_numbers() {
        let item = ingest_item(&json!({"model": "Dacia Logan", "city": "Rabat", "price": "85 000", "year": 2019.0})).unwrap();
        assert_eq!(item.id.as_str(), "Dacia Logan|Rabat|85000");
        assert_eq!(item.price, Some(85000));
        assert_eq!(item.year, Some(2019));
        assert_eq!(item.score, None);

        let with_id = ingest_item(&json!({"id": 42, "model": "Clio"})).unwrap();
        assert_eq!(with_id.id.as_str(), "42");
        assert!(ingest_item(&json!("Clio")).is_none());
    }

    #[tokio::test]
    async fn http_assistant_posts_session_and_message() {
        let app = Router::new()
            .route("/chat", post(|Json(body): Json<Value>| async move {
                Json(json!({
                    "assistant": format!("echo {}", body["message"].as_str().unwrap_or_default()),
                    "slots": {"city": body["session_id"].clone()},
                    "cars": [{"model": "Clio", "price": 90000}]
                }))
            }))
            .route("/down", post(|| async { axum::http::StatusCode::BAD_GATEWAY }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let sid = Uuid::new_v4();
        let req = TurnRequest { session_id: sid, message: "salut".into() };
        let client = HttpAssistant::new(format!("http://{addr}/chat"), Duration::from_secs(5)).unwrap();
        let resp = client.post_turn(&req).await.unwrap();
        assert_eq!(resp.assistant.as_deref(), Some("echo salut"));
        assert_eq!(resp.slots.unwrap().city, Some(SlotValue::Text(sid.to_string())));
        assert_eq!(resp.cars.unwrap().len(), 1);

        let down = HttpAssistant::new(format!("http://{addr}/down"), Duration::from_secs(5)).unwrap();
        let err = down.post_turn(&req).await.unwrap_err();
        assert!(matches!(err, AssistantError::Status(s) if s.as_u16() == 502));
    }
}
