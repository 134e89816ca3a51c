use std::path::{Path, PathBuf};

use tracing::{debug, info};
use uuid::Uuid;

use crate::render::{DetailsCard, details};
use crate::results::{SortMode, sort_items, toggle_compare};
use crate::session::{Insights, ItemId, Message, Prefs, Session, StoreRoot};
use crate::turn::{TurnController, TurnOutcome};

const RESET_TEXT: &str = "OK ✅ On repart de zéro. Décris ton besoin.";

pub struct CommandContext<'a> {
    pub turns: &'a TurnController,
}

/// Everything the user can ask the front end to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    SendTurn(String),
    NewSession,
    DeleteSession,
    SwitchSession(Uuid),
    Sort(SortMode),
    SelectForCompare(ItemId),
    ShowDetails(ItemId),
    ResetPrefs,
    Export(PathBuf),
    QuickReply(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Turn(TurnOutcome),
    Changed,
    /// The intent was valid but would have broken an invariant; nothing changed.
    Refused,
    Exported(PathBuf),
    Details(Box<DetailsCard>),
}

pub async fn dispatch(ctx: &CommandContext<'_>, intent: Intent) -> anyhow::Result<Dispatched> {
    debug!(?intent, "dispatch");
    let store = ctx.turns.store();
    match intent {
        Intent::SendTurn(text) => Ok(Dispatched::Turn(ctx.turns.send_turn(&text).await?)),
        Intent::QuickReply(n) => {
            let reply = {
                let store = store.lock().await;
                n.checked_sub(1).and_then(|i| store.active().ok()?.quick_replies.get(i).cloned())
            };
            match reply {
                Some(text) => Ok(Dispatched::Turn(ctx.turns.send_turn(&text).await?)),
                None => Ok(Dispatched::Refused),
            }
        }
        Intent::NewSession => {
            store.lock().await.new_session().await?;
            Ok(Dispatched::Changed)
        }
        Intent::DeleteSession => Ok(changed_or_refused(store.lock().await.delete_active().await?)),
        Intent::SwitchSession(id) => Ok(changed_or_refused(store.lock().await.set_active(id).await?)),
        Intent::Sort(mode) => {
            store.lock().await.update_active(|s| sort_items(&mut s.cars, mode)).await?;
            Ok(Dispatched::Changed)
        }
        Intent::SelectForCompare(id) => {
            let mut store = store.lock().await;
            let active = store.active()?;
            // a selection that no longer resolves can still be cleared
            if active.item(&id).is_none() && !active.compare.contains(&id) {
                debug!(%id, "compare: unknown item");
                return Ok(Dispatched::Refused);
            }
            store.update_active(|s| toggle_compare(&mut s.compare, id)).await?;
            Ok(Dispatched::Changed)
        }
        Intent::ShowDetails(id) => {
            let store = store.lock().await;
            Ok(details(store.active()?, &id).map_or(Dispatched::Refused, |card| Dispatched::Details(Box::new(card))))
        }
        Intent::ResetPrefs => {
            store.lock().await.update_active(reset).await?;
            Ok(Dispatched::Changed)
        }
        Intent::Export(target) => {
            let doc = store.lock().await.active()?.export();
            let path = export_path(&target, &doc.title);
            std::fs::write(&path, serde_json::to_vec_pretty(&doc)?)?;
            info!(path = %path.display(), "session exported");
            Ok(Dispatched::Exported(path))
        }
    }
}

fn changed_or_refused(changed: bool) -> Dispatched {
    if changed { Dispatched::Changed } else { Dispatched::Refused }
}

fn reset(s: &mut Session) {
    s.prefs = Prefs::default();
    s.insights = Insights::default();
    s.cars.clear();
    s.summary = None;
    s.quick_replies.clear();
    s.compare.clear();
    s.messages.push(Message::bot(RESET_TEXT));
}

fn export_path(target: &Path, title: &str) -> PathBuf {
    if target.is_dir() {
        target.join(format!("{}.json", file_stem(title)))
    } else {
        target.to_path_buf()
    }
}

fn file_stem(title: &str) -> String {
    let stem: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stem = stem.trim_matches('_');
    if stem.is_empty() { "session".to_string() } else { stem.to_string() }
}

/// Maps one line of terminal input to an intent. Plain text is a turn.
pub fn parse_line(line: &str, root: &StoreRoot) -> Result<Intent, String> {
    let Some(command) = line.trim_start().strip_prefix('/') else {
        return Ok(Intent::SendTurn(line.to_string()));
    };
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let arg = parts.next();

    match (name, arg) {
        ("new", _) => Ok(Intent::NewSession),
        ("delete", _) => Ok(Intent::DeleteSession),
        ("reset", _) => Ok(Intent::ResetPrefs),
        ("export", path) => Ok(Intent::Export(PathBuf::from(path.unwrap_or(".")))),
        ("sort", Some(mode)) => mode.parse().map(Intent::Sort),
        ("switch", Some(n)) => {
            let index = position(n)?;
            root.sessions
                .get(index)
                .map(|s| Intent::SwitchSession(s.id))
                .ok_or_else(|| format!("no session #{n}"))
        }
        ("compare", Some(target)) => resolve_item(target, root).map(Intent::SelectForCompare),
        ("details", Some(target)) => resolve_item(target, root).map(Intent::ShowDetails),
        ("reply", Some(n)) => n.parse().map(Intent::QuickReply).map_err(|_| format!("not a number: {n}")),
        _ => Err(format!("unknown command /{command}")),
    }
}

/// A number is a 1-based position in the active result list; anything else is an id.
fn resolve_item(target: &str, root: &StoreRoot) -> Result<ItemId, String> {
    if target.parse::<usize>().is_err() {
        return Ok(ItemId(target.to_string()));
    }
    let index = position(target)?;
    root.active()
        .and_then(|s| s.cars.get(index))
        .map(|c| c.id.clone())
        .ok_or_else(|| format!("no result #{target}"))
}

fn position(n: &str) -> Result<usize, String> {
    match n.parse::<usize>() {
        Ok(i) if i >= 1 => Ok(i - 1),
        _ => Err(format!("expected a position starting at 1, got {n:?}")),
    }
}
