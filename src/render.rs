//! Projection of store state into the fragments the terminal front end
//! draws. Nothing here mutates the store; every frame is rebuilt from
//! scratch after each state change.

use std::fmt;

use chrono::{DateTime, Local, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::insights::{format_price, group_thousands};
use crate::results::{CompareSlot, DisplayScore, compare_pair, display_score, explain};
use crate::session::{Item, ItemId, Message, Role, Session, StoreRoot};
use crate::turn::ApiStatus;

const BOT_NAME: &str = "MyFutureDrive AI";
const EMPTY_UNDERSTOOD: &str = "Commence par décrire ton besoin (ville, budget, type…).";
const EMPTY_MISSING: &str = "Aucun (tu peux demander des résultats maintenant)";
const EMPTY_TIPS: &str = "Je peux affiner si tu veux, mais je peux aussi proposer des véhicules sans tout préciser.";
const EMPTY_RESULTS: &str = "Aucun résultat pour l’instant. Lance une recherche via le chat.";
const EMPTY_COMPARE: &str = "Choisis un véhicule puis “Comparer”.";
const INVALID_COMPARE: &str = "Sélection invalide.";
const DASH: &str = "—";
const WHATSAPP_BASE: &str = "https://wa.me/";

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub transcript_rows: usize,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub status: ApiStatus,
    pub sidebar: Vec<SidebarEntry>,
    pub insights: InsightPanel,
    pub transcript: Transcript,
    pub results: ResultsView,
    pub compare: [CompareView; 2],
    pub quick_replies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SidebarEntry {
    pub id: Uuid,
    pub title: String,
    pub message_count: usize,
    pub updated: DateTime<Utc>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsightPanel {
    pub session_title: String,
    pub understood: Vec<String>,
    pub missing: Vec<String>,
    pub tips: Vec<String>,
    pub result_count: usize,
    pub top_score: String,
    pub budget: String,
    pub city: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptLine {
    pub role: Role,
    pub author: &'static str,
    pub time: DateTime<Utc>,
    pub text: String,
    pub typing: bool,
}

/// Full transcript plus the index of the first line inside the viewport,
/// which always ends on the newest message.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub lines: Vec<TranscriptLine>,
    pub first_visible: usize,
}

impl Transcript {
    pub fn visible(&self) -> &[TranscriptLine] {
        &self.lines[self.first_visible..]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultsView {
    pub summary: String,
    pub rows: Vec<ResultRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub position: usize,
    pub id: ItemId,
    pub model: String,
    pub price: String,
    pub score: DisplayScore,
    pub why: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompareView {
    Empty { slot: usize },
    Invalid { slot: usize, id: ItemId },
    Filled { slot: usize, card: CompareCard },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompareCard {
    pub model: String,
    pub score: DisplayScore,
    pub price: String,
    pub year: String,
    pub km: String,
    pub city: String,
    pub fuel: String,
    pub gearbox: String,
    pub kind: Option<String>,
}

/// Everything known about one result, as shown by `/details`.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailsCard {
    pub position: usize,
    pub id: ItemId,
    pub model: String,
    pub price: String,
    pub kind: Option<String>,
    pub city: Option<String>,
    pub fuel: Option<String>,
    pub gearbox: Option<String>,
    pub year: Option<i32>,
    pub km: Option<String>,
    pub score: DisplayScore,
    pub contact: Option<String>,
    pub image: Option<String>,
    pub why: String,
    pub in_compare: bool,
}

pub fn render(root: &StoreRoot, status: ApiStatus, opts: &RenderOptions) -> Result<Frame, StoreError> {
    let active = root.active().ok_or(StoreError::NoActiveSession)?;
    Ok(Frame {
        status,
        sidebar: sidebar(root),
        insights: insight_panel(active),
        transcript: transcript(&active.messages, opts.transcript_rows),
        results: results(active),
        compare: compare(active),
        quick_replies: active.quick_replies.clone(),
    })
}

fn sidebar(root: &StoreRoot) -> Vec<SidebarEntry> {
    root.sessions
        .iter()
        .map(|s| SidebarEntry {
            id: s.id,
            title: if s.title.is_empty() { "Session".into() } else { s.title.clone() },
            message_count: s.messages.len(),
            updated: s.updated_at,
            active: root.active_id == Some(s.id),
        })
        .collect()
}

fn insight_panel(s: &Session) -> InsightPanel {
    let or_placeholder = |items: &[String], placeholder: &str| {
        if items.is_empty() { vec![placeholder.to_string()] } else { items.to_vec() }
    };
    InsightPanel {
        session_title: if s.title.is_empty() { DASH.into() } else { s.title.clone() },
        understood: or_placeholder(&s.insights.understood, EMPTY_UNDERSTOOD),
        missing: or_placeholder(&s.insights.missing, EMPTY_MISSING),
        tips: or_placeholder(&s.insights.tips, EMPTY_TIPS),
        result_count: s.cars.len(),
        top_score: s.cars.first().map(|c| display_score(c).to_string()).unwrap_or_else(|| DASH.into()),
        budget: s.prefs.budget_max.map(format_price).unwrap_or_else(|| DASH.into()),
        city: s.prefs.city.clone().unwrap_or_else(|| DASH.into()),
    }
}

fn transcript(messages: &[Message], rows: usize) -> Transcript {
    let lines: Vec<TranscriptLine> = messages
        .iter()
        .map(|m| TranscriptLine {
            role: m.role,
            author: match m.role {
                Role::User => "You",
                Role::Bot => BOT_NAME,
            },
            time: m.time,
            text: m.text.clone(),
            typing: m.typing,
        })
        .collect();
    let first_visible = lines.len().saturating_sub(rows.max(1));
    Transcript { lines, first_visible }
}

fn results(s: &Session) -> ResultsView {
    if s.cars.is_empty() {
        return ResultsView { summary: EMPTY_RESULTS.into(), rows: Vec::new() };
    }
    let summary = s
        .summary
        .clone()
        .unwrap_or_else(|| format!("Top {} véhicules (/compare N pour comparer).", s.cars.len()));
    let rows = s
        .cars
        .iter()
        .enumerate()
        .map(|(i, car)| ResultRow {
            position: i + 1,
            id: car.id.clone(),
            model: car.model.clone().unwrap_or_else(|| DASH.into()),
            price: price_or_dash(car),
            score: display_score(car),
            why: explain(car),
        })
        .collect();
    ResultsView { summary, rows }
}

fn compare(s: &Session) -> [CompareView; 2] {
    let [first, second] = compare_pair(&s.compare, &s.cars);
    [compare_view(1, first), compare_view(2, second)]
}

fn compare_view(slot: usize, entry: CompareSlot<'_>) -> CompareView {
    match entry {
        CompareSlot::Empty => CompareView::Empty { slot },
        CompareSlot::Invalid(id) => CompareView::Invalid { slot, id: id.clone() },
        CompareSlot::Filled(car) => CompareView::Filled { slot, card: card(car) },
    }
}

fn card(car: &Item) -> CompareCard {
    let or_dash = |v: Option<String>| v.unwrap_or_else(|| DASH.into());
    CompareCard {
        model: or_dash(car.model.clone()),
        score: display_score(car),
        price: price_or_dash(car),
        year: or_dash(car.year.map(|y| y.to_string())),
        km: or_dash(car.km.map(|k| k.to_string())),
        city: or_dash(car.city.clone()),
        fuel: or_dash(car.fuel.clone()),
        gearbox: or_dash(car.gearbox.clone()),
        kind: car.kind.clone(),
    }
}

/// `None` when the id does not resolve to a result of this session.
pub fn details(s: &Session, id: &ItemId) -> Option<DetailsCard> {
    let (index, car) = s.cars.iter().enumerate().find(|(_, c)| &c.id == id)?;
    Some(DetailsCard {
        position: index + 1,
        id: car.id.clone(),
        model: car.model.clone().unwrap_or_else(|| "Détails véhicule".into()),
        price: price_or_dash(car),
        kind: car.kind.clone(),
        city: car.city.clone(),
        fuel: car.fuel.clone(),
        gearbox: car.gearbox.clone(),
        year: car.year,
        km: car.km.map(|k| format!("{} km", group_thousands(k))),
        score: display_score(car),
        contact: car.whatsapp.as_deref().and_then(whatsapp_link),
        image: car.image.clone().filter(|u| !u.trim().is_empty()),
        why: explain(car),
        in_compare: s.compare.contains(&car.id),
    })
}

fn whatsapp_link(handle: &str) -> Option<String> {
    let handle = handle.trim();
    if handle.starts_with("http://") || handle.starts_with("https://") {
        return Some(handle.to_string());
    }
    let digits: String = handle.chars().filter(char::is_ascii_digit).collect();
    (!digits.is_empty()).then(|| format!("{WHATSAPP_BASE}{digits}"))
}

fn price_or_dash(car: &Item) -> String {
    car.price.map(format_price).unwrap_or_else(|| DASH.into())
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "── Sessions ─────────────── {}", self.status.label())?;
        for (i, entry) in self.sidebar.iter().enumerate() {
            let marker = if entry.active { '>' } else { ' ' };
            writeln!(
                f,
                "{marker} {:>2}. {}  ({} msg, {})",
                i + 1,
                entry.title,
                entry.message_count,
                entry.updated.with_timezone(&Local).format("%d/%m/%Y")
            )?;
        }

        let p = &self.insights;
        writeln!(f, "── Session: {} ──", p.session_title)?;
        for line in &p.understood {
            writeln!(f, "  • {line}")?;
        }
        writeln!(f, "  Manquant: {}", p.missing.join(" | "))?;
        for tip in &p.tips {
            writeln!(f, "  ↳ {tip}")?;
        }
        writeln!(
            f,
            "  Résultats: {}  Top score: {}  Budget: {}  Ville: {}",
            p.result_count, p.top_score, p.budget, p.city
        )?;

        writeln!(f, "── Chat ──")?;
        for line in self.transcript.visible() {
            let time = line.time.with_timezone(&Local).format("%H:%M");
            writeln!(f, "[{time}] {}: {}", line.author, line.text)?;
        }

        writeln!(f, "── Résultats ──")?;
        writeln!(f, "  {}", self.results.summary)?;
        for row in &self.results.rows {
            writeln!(f, "  {:>2}. {}  {}  {}", row.position, row.model, row.price, row.score)?;
            writeln!(f, "      {}", row.why)?;
        }

        writeln!(f, "── Comparer ──")?;
        for view in &self.compare {
            match view {
                CompareView::Empty { slot } => writeln!(f, "  Slot {slot}: {EMPTY_COMPARE}")?,
                CompareView::Invalid { slot, .. } => writeln!(f, "  Slot {slot}: {INVALID_COMPARE}")?,
                CompareView::Filled { slot, card } => {
                    writeln!(
                        f,
                        "  Slot {slot}: {}  Score {}  Prix {}  Année {}  KM {}  Ville {}  {} • {}{}",
                        card.model,
                        card.score,
                        card.price,
                        card.year,
                        card.km,
                        card.city,
                        card.fuel,
                        card.gearbox,
                        card.kind.as_deref().map(|k| format!("  Type {k}")).unwrap_or_default()
                    )?;
                }
            }
        }

        if !self.quick_replies.is_empty() {
            let replies: Vec<String> = self
                .quick_replies
                .iter()
                .enumerate()
                .map(|(i, r)| format!("[{}] {r}", i + 1))
                .collect();
            writeln!(f, "── Réponses rapides: {}", replies.join("  "))?;
        }
        Ok(())
    }
}

impl fmt::Display for DetailsCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "── {} ──", self.model)?;
        writeln!(f, "  Prix: {}", self.price)?;
        let attributes = [
            ("Type", self.kind.clone()),
            ("Ville", self.city.clone()),
            ("Carburant", self.fuel.clone()),
            ("Boîte", self.gearbox.clone()),
            ("Année", self.year.map(|y| y.to_string())),
            ("KM", self.km.clone()),
        ];
        for (label, value) in attributes {
            if let Some(value) = value {
                writeln!(f, "  • {label}: {value}")?;
            }
        }
        writeln!(f, "  • Score: {}", self.score)?;
        if let Some(link) = &self.contact {
            writeln!(f, "  WhatsApp: {link}")?;
        }
        if let Some(url) = &self.image {
            writeln!(f, "  Photo: {url}")?;
        }
        writeln!(f, "  {}", self.why)?;
        if self.in_compare {
            writeln!(f, "  Dans le comparateur (/compare {} pour retirer)", self.position)
        } else {
            writeln!(f, "  /compare {} pour comparer", self.position)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::ScoreSource;

    const OPTS: RenderOptions = RenderOptions { transcript_rows: 3 };

    fn car(id: &str, score: Option<f64>) -> Item {
        Item {
            id: ItemId(id.into()),
            model: Some(format!("Model {id}")),
            price: Some(120000),
            year: Some(2020),
            km: None,
            fuel: Some("diesel".into()),
            gearbox: None,
            kind: None,
            city: Some("Rabat".into()),
            image: None,
            whatsapp: None,
            score,
            why: None,
        }
    }

    fn populated() -> StoreRoot {
        let mut root = StoreRoot::fresh();
        root.sessions.insert(0, Session::new());
        let s = &mut root.sessions[1];
        for i in 0..5 {
            s.messages.push(Message::user(format!("msg {i}")));
        }
        s.push_typing("...");
        s.cars = vec![car("a", Some(92.0)), car("b", None)];
        s.compare = vec![ItemId("b".into()), ItemId("gone".into())];
        s.prefs.budget_max = Some(150000);
        s.quick_replies = vec!["diesel".into()];
        root
    }

    #[test]
    fn frame_reflects_active_session() {
        let root = populated();
        let frame = render(&root, ApiStatus::Busy, &OPTS).unwrap();

        assert_eq!(frame.sidebar.len(), 2);
        assert_eq!(frame.sidebar.iter().filter(|e| e.active).count(), 1);
        assert!(frame.sidebar[1].active);

        assert_eq!(frame.transcript.lines.len(), 7);
        let visible = frame.transcript.visible();
        assert_eq!(visible.len(), 3);
        assert!(visible.last().unwrap().typing, "newest line must be last");

        assert_eq!(frame.results.rows.len(), 2);
        assert_eq!(frame.results.rows[1].score.source, ScoreSource::Synthetic);
        assert_eq!(frame.insights.top_score, "92/100");
        assert_eq!(frame.insights.budget, "150\u{202f}000 MAD");
        assert_eq!(frame.insights.city, DASH);

        assert!(matches!(&frame.compare[0], CompareView::Filled { slot: 1, card } if card.model == "Model b"));
        assert!(matches!(&frame.compare[1], CompareView::Invalid { slot: 2, id } if id.as_str() == "gone"));
        assert_eq!(frame.quick_replies, vec!["diesel"]);
    }

    #[test]
    fn rendering_is_pure() {
        let root = populated();
        let before = root.clone();
        let a = render(&root, ApiStatus::Ok, &OPTS).unwrap().to_string();
        let b = render(&root, ApiStatus::Ok, &OPTS).unwrap().to_string();
        assert_eq!(a, b);
        assert_eq!(root, before);
        assert_eq!(root.sessions[1].cars[1].score, None);
    }

    #[test]
    fn empty_session_uses_placeholders() {
        let root = StoreRoot::fresh();
        let frame = render(&root, ApiStatus::Idle, &OPTS).unwrap();
        assert_eq!(frame.results.summary, EMPTY_RESULTS);
        assert!(frame.results.rows.is_empty());
        assert_eq!(frame.insights.understood, vec![EMPTY_UNDERSTOOD]);
        assert_eq!(frame.insights.top_score, DASH);
        assert!(matches!(frame.compare, [CompareView::Empty { slot: 1 }, CompareView::Empty { slot: 2 }]));
        assert!(frame.quick_replies.is_empty());
        assert!(!frame.to_string().contains("Réponses rapides"));
    }

    #[test]
    fn result_rows_carry_their_explanation() {
        let mut root = populated();
        root.sessions[1].cars[0].why = Some("Faible kilométrage".into());
        let frame = render(&root, ApiStatus::Ok, &OPTS).unwrap();
        assert_eq!(frame.results.rows[0].why, "Faible kilométrage");

        let text = frame.to_string();
        assert!(text.contains("      Faible kilométrage\n"));
        assert!(text.contains(&format!("      {}\n", frame.results.rows[1].why)));
    }

    #[test]
    fn details_card_lists_contact_image_and_explanation() {
        let mut root = populated();
        let s = &mut root.sessions[1];
        s.cars[1].km = Some(45000);
        s.cars[1].kind = Some("SUV".into());
        s.cars[1].whatsapp = Some("+212 600-112233".into());
        s.cars[1].image = Some("https://img.example/b.jpg".into());

        let card = details(&root.sessions[1], &ItemId("b".into())).unwrap();
        assert_eq!(card.position, 2);
        assert_eq!(card.km.as_deref(), Some("45\u{202f}000 km"));
        assert_eq!(card.contact.as_deref(), Some("https://wa.me/212600112233"));
        assert_eq!(card.image.as_deref(), Some("https://img.example/b.jpg"));
        assert!(card.why.starts_with("Bon compromis"));
        assert!(card.score.is_synthetic());
        assert!(card.in_compare);

        let text = card.to_string();
        assert!(text.starts_with("── Model b ──"));
        assert!(text.contains("  • Type: SUV\n"));
        assert!(text.contains("  • Ville: Rabat\n"));
        assert!(!text.contains("Boîte"));
        assert!(text.contains("  WhatsApp: https://wa.me/212600112233\n"));
        assert!(text.contains("  Photo: https://img.example/b.jpg\n"));
        assert!(text.contains("/compare 2 pour retirer"));

        let plain = details(&root.sessions[1], &ItemId("a".into())).unwrap();
        assert_eq!(plain.contact, None);
        assert_eq!(plain.image, None);
        assert!(plain.to_string().contains("/compare 1 pour comparer"));

        assert!(details(&root.sessions[1], &ItemId("gone".into())).is_none());
    }

    #[test]
    fn dangling_active_pointer_is_reported() {
        let mut root = StoreRoot::fresh();
        root.active_id = None;
        assert!(matches!(render(&root, ApiStatus::Idle, &OPTS), Err(StoreError::NoActiveSession)));
    }
}
