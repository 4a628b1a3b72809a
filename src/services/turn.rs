//! One agent tool call, end to end: load the conversation's context, run
//! the handler, commit its patch, persist.

use serde::Serialize;
use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use crate::db::queries;
use crate::errors::{AppError, StepError};
use crate::models::{BookingContext, BookingStep, ToolCall};
use crate::services::step_controller::StepController;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub turn_id: String,
    pub public_text: String,
    pub next_booking_step: Option<BookingStep>,
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_data: Option<Value>,
}

fn load_or_new(state: &AppState, chat_id: &str) -> Result<BookingContext, AppError> {
    let db = state.db()?;
    let ctx = queries::load_context(&db, chat_id)?;
    Ok(ctx.unwrap_or_else(|| BookingContext::new(chat_id, &state.config.timezone)))
}

/// Run `call` against `chat_id`'s booking. When `expected_version` is set
/// and the stored context has moved on, the turn fails with a conflict and
/// nothing is written.
pub async fn run_turn(
    state: &AppState,
    chat_id: &str,
    call: ToolCall,
    expected_version: Option<u64>,
) -> Result<TurnOutcome, AppError> {
    let turn_id = Uuid::new_v4().to_string();
    let tool = call.name();
    let span = tracing::info_span!("turn", chat_id, tool, turn_id = %turn_id);

    async move {
        let loaded = load_or_new(state, chat_id)?;
        let base_version = expected_version.unwrap_or(loaded.version);
        if base_version != loaded.version {
            return Err(StepError::VersionConflict {
                expected: base_version,
                actual: loaded.version,
            }
            .into());
        }

        let result = state.tools.dispatch(&loaded, call).await;

        // re-read under the lock so a turn that finished meanwhile is caught
        // by the version check instead of being overwritten
        let db = state.db()?;
        let mut ctx = queries::load_context(&db, chat_id)?
            .unwrap_or_else(|| BookingContext::new(chat_id, &state.config.timezone));

        let mut controller = StepController::new(&mut ctx);
        let mut public_text = result.public_text;
        let mut private_data = result.private_data;
        match controller.apply_patch(result.ctx_patch, true, Some(base_version)) {
            Ok(()) => {}
            Err(e) if e.is_validation() => {
                tracing::warn!(error = %e, "handler patch rejected");
                public_text = rejected_patch_text(controller.context());
                private_data = None;
            }
            Err(e) => return Err(e.into()),
        }
        let transitions = controller.take_transitions();
        drop(controller);

        queries::save_context(&db, &ctx)
            .and_then(|_| queries::insert_step_events(&db, chat_id, &turn_id, tool, &transitions))
            .inspect_err(|e| tracing::error!(error = %e, "failed to persist booking context"))?;

        tracing::info!(
            version = ctx.version,
            step = ?ctx.next_booking_step,
            "turn complete"
        );

        Ok(TurnOutcome {
            turn_id,
            public_text,
            next_booking_step: ctx.next_booking_step,
            version: ctx.version,
            private_data,
        })
    }
    .instrument(span)
    .await
}

fn rejected_patch_text(ctx: &BookingContext) -> String {
    ctx.user_lang
        .pick(
            "عذراً، تعذر حفظ هذا التغيير. لنحاول مرة أخرى.",
            "Sorry, that change couldn't be saved. Let's try again.",
        )
        .to_string()
}
