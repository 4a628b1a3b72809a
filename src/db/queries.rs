use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::models::BookingContext;
use crate::services::step_controller::StepTransition;

fn now() -> String {
    Utc::now().naive_utc().format("%Y-%m-%d %H:%M:%S").to_string()
}

// ── Booking contexts ──

pub fn load_context(conn: &Connection, chat_id: &str) -> anyhow::Result<Option<BookingContext>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT ctx FROM booking_contexts WHERE chat_id = ?1",
            params![chat_id],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

pub fn save_context(conn: &Connection, ctx: &BookingContext) -> anyhow::Result<()> {
    let json = serde_json::to_string(ctx)?;
    let next_step = ctx.next_booking_step.map(|s| s.as_str());

    conn.execute(
        "INSERT INTO booking_contexts (chat_id, ctx, version, next_step, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(chat_id) DO UPDATE SET
           ctx = excluded.ctx,
           version = excluded.version,
           next_step = excluded.next_step,
           updated_at = excluded.updated_at",
        params![ctx.chat_id, json, ctx.version as i64, next_step, now()],
    )?;
    Ok(())
}

/// Forget a conversation's booking state and its step log. Returns whether
/// a context existed.
pub fn delete_context(conn: &Connection, chat_id: &str) -> anyhow::Result<bool> {
    conn.execute("DELETE FROM step_events WHERE chat_id = ?1", params![chat_id])?;
    let count = conn.execute(
        "DELETE FROM booking_contexts WHERE chat_id = ?1",
        params![chat_id],
    )?;
    Ok(count > 0)
}

// ── Step events ──

#[derive(Debug, Clone, Serialize)]
pub struct StepEvent {
    pub id: i64,
    pub turn_id: String,
    pub tool: String,
    pub from_step: Option<String>,
    pub to_step: Option<String>,
    pub version: i64,
    pub created_at: String,
}

pub fn insert_step_events(
    conn: &Connection,
    chat_id: &str,
    turn_id: &str,
    tool: &str,
    transitions: &[StepTransition],
) -> anyhow::Result<()> {
    let created_at = now();
    let mut stmt = conn.prepare(
        "INSERT INTO step_events (chat_id, turn_id, tool, from_step, to_step, version, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for t in transitions {
        stmt.execute(params![
            chat_id,
            turn_id,
            tool,
            t.from.map(|s| s.as_str()),
            t.to.map(|s| s.as_str()),
            t.version as i64,
            created_at,
        ])?;
    }
    Ok(())
}

/// Most recent events first.
pub fn list_step_events(
    conn: &Connection,
    chat_id: &str,
    limit: i64,
) -> anyhow::Result<Vec<StepEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, turn_id, tool, from_step, to_step, version, created_at
         FROM step_events WHERE chat_id = ?1
         ORDER BY id DESC LIMIT ?2",
    )?;

    let events = stmt
        .query_map(params![chat_id, limit], |row| {
            Ok(StepEvent {
                id: row.get(0)?,
                turn_id: row.get(1)?,
                tool: row.get(2)?,
                from_step: row.get(3)?,
                to_step: row.get(4)?,
                version: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}
