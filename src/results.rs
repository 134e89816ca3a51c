use std::str::FromStr;

use crate::session::{Item, ItemId};

pub const COMPARE_CAPACITY: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    Score,
    Price,
    Year,
}

impl FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "score" => Ok(Self::Score),
            "price" | "prix" => Ok(Self::Price),
            "year" | "annee" | "année" => Ok(Self::Year),
            other => Err(format!("unknown sort mode {other:?} (score, price, year)")),
        }
    }
}

/// Stable in-place reorder. Missing values always sort last.
pub fn sort_items(items: &mut [Item], mode: SortMode) {
    match mode {
        SortMode::Score => items.sort_by(|a, b| b.score.unwrap_or(0.0).total_cmp(&a.score.unwrap_or(0.0))),
        SortMode::Price => items.sort_by(|a, b| price_key(a).total_cmp(&price_key(b))),
        SortMode::Year => items.sort_by(|a, b| b.year.unwrap_or(0).cmp(&a.year.unwrap_or(0))),
    }
}

fn price_key(item: &Item) -> f64 {
    item.price.map(|p| p as f64).unwrap_or(f64::INFINITY)
}

/// Selecting an already selected id removes it; otherwise the oldest
/// selection is evicted once capacity is reached.
pub fn toggle_compare(compare: &mut Vec<ItemId>, id: ItemId) {
    if let Some(pos) = compare.iter().position(|c| *c == id) {
        compare.remove(pos);
        return;
    }
    while compare.len() >= COMPARE_CAPACITY {
        compare.remove(0);
    }
    compare.push(id);
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompareSlot<'a> {
    Empty,
    Filled(&'a Item),
    Invalid(&'a ItemId),
}

pub fn compare_pair<'a>(compare: &'a [ItemId], items: &'a [Item]) -> [CompareSlot<'a>; COMPARE_CAPACITY] {
    std::array::from_fn(|slot| match compare.get(slot) {
        None => CompareSlot::Empty,
        Some(id) => items
            .iter()
            .find(|item| item.id == *id)
            .map(CompareSlot::Filled)
            .unwrap_or(CompareSlot::Invalid(id)),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreSource {
    Server,
    /// Presentation filler for items the assistant did not score.
    Synthetic,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayScore {
    pub value: f64,
    pub source: ScoreSource,
}

impl DisplayScore {
    pub fn is_synthetic(&self) -> bool {
        self.source == ScoreSource::Synthetic
    }
}

impl std::fmt::Display for DisplayScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.source {
            ScoreSource::Server => write!(f, "{}/100", self.value.round()),
            ScoreSource::Synthetic => write!(f, "~{}/100", self.value.round()),
        }
    }
}

pub fn display_score(item: &Item) -> DisplayScore {
    match item.score {
        Some(value) => DisplayScore { value, source: ScoreSource::Server },
        None => DisplayScore { value: synthetic_score(&item.id), source: ScoreSource::Synthetic },
    }
}

// FNV-1a over the id so the filler stays put across renders and restarts.
fn synthetic_score(id: &ItemId) -> f64 {
    let hash = id.as_str().bytes().fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    });
    (75 + hash % 15) as f64
}

pub fn explain(item: &Item) -> String {
    if let Some(why) = item.why.as_deref().filter(|w| !w.is_empty()) {
        return why.to_string();
    }
    let mut bits = Vec::new();
    if let Some(kind) = &item.kind {
        bits.push(format!("type {kind}"));
    }
    if let Some(fuel) = &item.fuel {
        bits.push(format!("carburant {fuel}"));
    }
    if let Some(gearbox) = &item.gearbox {
        bits.push(format!("boîte {gearbox}"));
    }
    if let Some(year) = item.year {
        bits.push(format!("année {year}"));
    }
    if let Some(km) = item.km {
        bits.push(format!("{km} km"));
    }
    if let Some(price) = item.price {
        bits.push(format!("{price} MAD"));
    }
    format!("Bon compromis basé sur {} selon tes critères.", bits.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, price: Option<u64>, year: Option<i32>, score: Option<f64>) -> Item {
        Item {
            id: ItemId(id.into()),
            model: Some(id.to_uppercase()),
            price,
            year,
            km: None,
            fuel: None,
            gearbox: None,
            kind: None,
            city: None,
            image: None,
            whatsapp: None,
            score,
            why: None,
        }
    }

    fn ids(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn missing_values_sort_last_in_every_mode() {
        let mut items = vec![
            item("none", None, None, None),
            item("a", Some(90000), Some(2018), Some(70.0)),
            item("b", Some(50000), Some(2021), Some(88.0)),
        ];
        sort_items(&mut items, SortMode::Price);
        assert_eq!(ids(&items), vec!["b", "a", "none"]);
        sort_items(&mut items, SortMode::Year);
        assert_eq!(ids(&items), vec!["b", "a", "none"]);
        sort_items(&mut items, SortMode::Score);
        assert_eq!(ids(&items), vec!["b", "a", "none"]);
    }

    #[test]
    fn price_sort_is_stable_and_idempotent() {
        let mut items = vec![
            item("x", Some(100), None, None),
            item("y", None, None, None),
            item("z", Some(100), None, None),
            item("w", None, None, None),
        ];
        sort_items(&mut items, SortMode::Price);
        let first = ids(&items).into_iter().map(String::from).collect::<Vec<_>>();
        assert_eq!(first, vec!["x", "z", "y", "w"]);
        sort_items(&mut items, SortMode::Price);
        assert_eq!(ids(&items), first);
    }

    #[test]
    fn compare_is_fifo_with_capacity_two() {
        let mut compare = Vec::new();
        for id in ["1", "2", "3"] {
            toggle_compare(&mut compare, ItemId(id.into()));
        }
        assert_eq!(compare, vec![ItemId("2".into()), ItemId("3".into())]);
        toggle_compare(&mut compare, ItemId("2".into()));
        assert_eq!(compare, vec![ItemId("3".into())]);
    }

    #[test]
    fn compare_pair_always_has_two_slots() {
        let items = vec![item("a", None, None, None)];
        let compare = vec![ItemId("a".into()), ItemId("gone".into())];
        let pair = compare_pair(&compare, &items);
        assert!(matches!(pair[0], CompareSlot::Filled(i) if i.id.as_str() == "a"));
        assert!(matches!(pair[1], CompareSlot::Invalid(id) if id.as_str() == "gone"));
        assert_eq!(compare_pair(&[], &items), [CompareSlot::Empty, CompareSlot::Empty]);
    }

    #[test]
    fn synthetic_score_is_tagged_and_stable() {
        let unscored = item("a", None, None, None);
        let s1 = display_score(&unscored);
        assert!(s1.is_synthetic());
        assert!((75.0..90.0).contains(&s1.value));
        assert_eq!(s1, display_score(&unscored));
        assert_eq!(unscored.score, None);
        assert!(!display_score(&item("b", None, None, Some(91.0))).is_synthetic());
    }

    #[test]
    fn explain_falls_back_to_attributes() {
        let mut car = item("a", Some(90000), Some(2020), None);
        car.fuel = Some("diesel".into());
        assert_eq!(explain(&car), "Bon compromis basé sur carburant diesel, année 2020, 90000 MAD selon tes critères.");
        car.why = Some("Très économique".into());
        assert_eq!(explain(&car), "Très économique");
    }
}
