use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assistant::{SlotSnapshot, SlotValue};

pub const DEFAULT_TITLE: &str = "New Session";
pub const TITLE_MAX_CHARS: usize = 32;
const WELCOME_TEXT: &str = "Salut 👋 Je suis MyFutureDrive AI, ton assistant pour trouver ta prochaine voiture. Dis-moi ce que tu recherches.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub kind: MessageKind,
    pub time: DateTime<Utc>,
    pub text: String,
    /// Marks the single ephemeral "assistant is writing" placeholder.
    #[serde(default, rename = "isTyping", skip_serializing_if = "std::ops::Not::not")]
    pub typing: bool,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self::text(Role::Bot, text)
    }

    pub fn typing(text: impl Into<String>) -> Self {
        Self { typing: true, ..Self::bot(text) }
    }

    fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            kind: MessageKind::Text,
            time: Utc::now(),
            text: text.into(),
            typing: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Prefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_max: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub km_max: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_min: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gearbox: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Prefs {
    /// Field-by-field merge of a slot update. Absent slots keep their value;
    /// sentinels clear it.
    pub fn merge_slots(&mut self, slots: &SlotSnapshot) {
        merge_text(&mut self.kind, slots.kind.as_ref());
        merge_text(&mut self.fuel, slots.fuel.as_ref());
        merge_text(&mut self.gearbox, slots.gearbox.as_ref());
        merge_text(&mut self.city, slots.city.as_ref());
        merge_number(&mut self.budget_max, slots.price_max.as_ref());
        merge_number(&mut self.km_max, slots.km_max.as_ref());
        merge_number(&mut self.year_min, slots.year_min.as_ref());
    }

    pub fn snapshot(&self) -> SlotSnapshot {
        SlotSnapshot {
            kind: Some(SlotValue::from_text(self.kind.as_deref())),
            fuel: Some(SlotValue::from_text(self.fuel.as_deref())),
            gearbox: Some(SlotValue::from_text(self.gearbox.as_deref())),
            price_max: Some(SlotValue::from_number(self.budget_max.map(|v| v as f64))),
            city: Some(SlotValue::from_text(self.city.as_deref())),
            km_max: Some(SlotValue::from_number(self.km_max.map(|v| v as f64))),
            year_min: Some(SlotValue::from_number(self.year_min.map(f64::from))),
        }
    }
}

fn merge_text(field: &mut Option<String>, update: Option<&SlotValue>) {
    let Some(update) = update else { return };
    *field = match update {
        SlotValue::Unset | SlotValue::Any => None,
        SlotValue::Text(s) => Some(s.clone()),
        SlotValue::Number(n) => Some(n.to_string()),
    };
}

fn merge_number<T: TryFrom<i64>>(field: &mut Option<T>, update: Option<&SlotValue>) {
    let Some(update) = update else { return };
    match update {
        SlotValue::Unset | SlotValue::Any => *field = None,
        other => {
            // a value that does not parse as a number is not applied
            if let Some(v) = other.as_i64().and_then(|n| T::try_from(n).ok()) {
                *field = Some(v);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Insights {
    #[serde(default)]
    pub understood: Vec<String>,
    #[serde(default)]
    pub missing: Vec<String>,
    #[serde(default)]
    pub tips: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    /// Source id when the record carries one, otherwise `model|city|price`.
    pub fn derive(source: Option<&str>, model: Option<&str>, city: Option<&str>, price: Option<u64>) -> Self {
        match source.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => Self(id.to_string()),
            None => Self(format!(
                "{}|{}|{}",
                model.unwrap_or_default(),
                city.unwrap_or_default(),
                price.map(|p| p.to_string()).unwrap_or_default()
            )),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub km: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gearbox: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whatsapp: Option<String>,
    /// Score as provided by the assistant. Never filled locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub prefs: Prefs,
    #[serde(default)]
    pub insights: Insights,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub cars: Vec<Item>,
    #[serde(default)]
    pub compare: Vec<ItemId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quick_replies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: DEFAULT_TITLE.to_string(),
            created_at: now,
            updated_at: now,
            prefs: Prefs::default(),
            insights: Insights::default(),
            messages: vec![Message::bot(WELCOME_TEXT)],
            cars: Vec::new(),
            compare: Vec::new(),
            quick_replies: Vec::new(),
            summary: None,
        }
    }

    pub fn has_default_title(&self) -> bool {
        self.title.is_empty() || self.title == DEFAULT_TITLE
    }

    pub fn has_typing(&self) -> bool {
        self.messages.iter().any(|m| m.typing)
    }

    pub fn push_typing(&mut self, text: &str) {
        if !self.has_typing() {
            self.messages.push(Message::typing(text));
        }
    }

    pub fn remove_typing(&mut self) {
        self.messages.retain(|m| !m.typing);
    }

    pub fn item(&self, id: &ItemId) -> Option<&Item> {
        self.cars.iter().find(|c| &c.id == id)
    }

    pub fn export(&self) -> ExportDoc {
        ExportDoc {
            title: self.title.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            prefs: self.prefs.clone(),
            insights: self.insights.clone(),
            cars: self.cars.clone(),
            messages: self.messages.iter().filter(|m| !m.typing).cloned().collect(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the store persists under one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreRoot {
    pub active_id: Option<Uuid>,
    pub sessions: Vec<Session>,
}

impl StoreRoot {
    pub fn fresh() -> Self {
        let session = Session::new();
        Self { active_id: Some(session.id), sessions: vec![session] }
    }

    pub fn get(&self, id: Uuid) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn active(&self) -> Option<&Session> {
        self.active_id.and_then(|id| self.get(id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDoc {
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub prefs: Prefs,
    pub insights: Insights,
    pub cars: Vec<Item>,
    pub messages: Vec<Message>,
}
