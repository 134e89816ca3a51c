//! Insight panel derivation: what the assistant has understood so far, what
//! is still missing, and what to suggest next. Everything here is a pure
//! function of a slot snapshot and can be recomputed at will.

use crate::assistant::{SlotSnapshot, SlotValue};
use crate::session::Insights;

pub const CURRENCY: &str = "MAD";
const GROUP_SEPARATOR: char = '\u{202f}';

pub const TIP_FREE_FORM: &str = "Tu peux répondre librement ou dire “peu importe” pour passer un critère.";
pub const TIP_BUDGET_CITY: &str = "Si tu mets juste un budget + une ville, je peux déjà proposer des voitures.";
pub const TIP_READY: &str = "Tout est prêt ✅ Je lance la recherche et je te propose les meilleures options.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKey {
    Type,
    Fuel,
    Gearbox,
    PriceMax,
    City,
}

/// Keys reported in the insight panel, in display order.
pub const INSIGHT_KEYS: [SlotKey; 5] = [SlotKey::Type, SlotKey::Fuel, SlotKey::Gearbox, SlotKey::PriceMax, SlotKey::City];

impl SlotKey {
    pub fn label(self) -> &'static str {
        match self {
            SlotKey::Type => "Type",
            SlotKey::Fuel => "Carburant",
            SlotKey::Gearbox => "Boîte",
            SlotKey::PriceMax => "Budget",
            SlotKey::City => "Ville",
        }
    }

    pub fn get(self, slots: &SlotSnapshot) -> Option<&SlotValue> {
        match self {
            SlotKey::Type => slots.kind.as_ref(),
            SlotKey::Fuel => slots.fuel.as_ref(),
            SlotKey::Gearbox => slots.gearbox.as_ref(),
            SlotKey::PriceMax => slots.price_max.as_ref(),
            SlotKey::City => slots.city.as_ref(),
        }
    }
}

pub fn build_insights(slots: &SlotSnapshot) -> Insights {
    let mut understood = Vec::new();
    let mut missing = Vec::new();

    for key in INSIGHT_KEYS {
        match key.get(slots) {
            Some(value) if !value.is_sentinel() => {
                understood.push(format!("{}: {}", key.label(), format_slot_value(key, value)));
            }
            _ => missing.push(key.label().to_string()),
        }
    }

    let tips = if missing.is_empty() {
        vec![TIP_READY.to_string()]
    } else {
        vec![TIP_FREE_FORM.to_string(), TIP_BUDGET_CITY.to_string()]
    };

    Insights { understood, missing, tips }
}

pub fn format_slot_value(key: SlotKey, value: &SlotValue) -> String {
    match (key, value.as_i64()) {
        (SlotKey::PriceMax, Some(n)) if n >= 0 => format_price(n as u64),
        (_, Some(n)) => n.to_string(),
        (_, None) => value.to_string(),
    }
}

pub fn format_price(amount: u64) -> String {
    format!("{} {CURRENCY}", group_thousands(amount))
}

pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 * 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(GROUP_SEPARATOR);
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SlotSnapshot {
        SlotSnapshot {
            price_max: Some(SlotValue::Number(100000.0)),
            city: Some(SlotValue::Text("Casablanca".into())),
            fuel: Some(SlotValue::Any),
            ..SlotSnapshot::default()
        }
    }

    #[test]
    fn every_key_lands_in_exactly_one_bucket() {
        let insights = build_insights(&snapshot());
        assert_eq!(insights.understood, vec!["Budget: 100\u{202f}000 MAD".to_string(), "Ville: Casablanca".to_string()]);
        assert_eq!(insights.missing, vec!["Type", "Carburant", "Boîte"]);
        assert_eq!(insights.understood.len() + insights.missing.len(), INSIGHT_KEYS.len());
        assert_eq!(insights.tips, vec![TIP_FREE_FORM, TIP_BUDGET_CITY]);
    }

    #[test]
    fn deterministic() {
        let a = serde_json::to_string(&build_insights(&snapshot())).unwrap();
        let b = serde_json::to_string(&build_insights(&snapshot())).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn complete_snapshot_is_ready() {
        let slots = SlotSnapshot {
            kind: Some(SlotValue::Text("SUV".into())),
            fuel: Some(SlotValue::Text("diesel".into())),
            gearbox: Some(SlotValue::Text("automatique".into())),
            price_max: Some(SlotValue::Text("250000".into())),
            city: Some(SlotValue::Text("Rabat".into())),
            ..SlotSnapshot::default()
        };
        let insights = build_insights(&slots);
        assert!(insights.missing.is_empty());
        assert_eq!(insights.tips, vec![TIP_READY]);
        assert!(insights.understood.contains(&"Budget: 250\u{202f}000 MAD".to_string()));
    }

    #[test]
    fn mileage_and_year_stay_out_of_the_panel() {
        let slots = SlotSnapshot {
            km_max: Some(SlotValue::Number(80000.0)),
            year_min: Some(SlotValue::Number(2018.0)),
            ..snapshot()
        };
        let insights = build_insights(&slots);
        assert_eq!(insights, build_insights(&snapshot()));
        assert!(insights.understood.iter().chain(&insights.missing).all(|l| !l.contains("80") && !l.contains("2018")));
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1\u{202f}000");
        assert_eq!(group_thousands(1234567), "1\u{202f}234\u{202f}567");
    }
}
